use log_tail::{Entry, FileInput, FileInputConfig, OffsetDatabase, StartAt, tail_files};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Directory to tail, defaults to the current one
    let dir = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    let mut config = FileInputConfig::with_include([format!("{}/*.log", dir)]);
    config.start_at = StartAt::Beginning;

    println!("1. Streaming entries from {}/*.log:", dir);
    stream_entries(&config).await?;

    println!("\n{}\n", "=".repeat(50));

    println!("2. Tailing with offsets kept in offsets.json:");
    tail_with_offsets(&config).await?;

    Ok(())
}

async fn stream_entries(config: &FileInputConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = tail_files(config)?;

    let mut count = 0;
    while let Ok(Some(entry)) = tokio::time::timeout(Duration::from_secs(1), stream.next()).await {
        count += 1;
        println!(
            "  [{}] {}: {}",
            count,
            entry.file_name().unwrap_or("-"),
            entry.body
        );
        if count >= 10 {
            // Only show the first few entries for demo
            break;
        }
    }

    if count == 0 {
        println!("  No entries within a second");
    }
    Ok(())
}

async fn tail_with_offsets(config: &FileInputConfig) -> Result<(), Box<dyn std::error::Error>> {
    // A second run resumes where this one stopped
    let db = OffsetDatabase::open("offsets.json")?;
    let (tx, mut rx) = mpsc::channel::<Entry>(64);

    let input = FileInput::new(config, tx, &db)?;
    input.start()?;
    println!("  Tailing, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(entry) = rx.recv() => println!("  {}", serde_json::to_string(&entry)?),
            _ = &mut ctrl_c => break,
        }
    }

    input.stop().await?;
    println!("  Offsets saved");
    Ok(())
}

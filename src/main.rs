use log_tail::{FileInput, FileInputConfig, OffsetDatabase, StartAt};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: log-tail [--config <file.json>] [--offsets <file.json>] [--from-beginning] [<glob>...]";

struct Args {
    config: Option<PathBuf>,
    offsets: Option<PathBuf>,
    from_beginning: bool,
    include: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        offsets: None,
        from_beginning: false,
        include: Vec::new(),
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config = Some(iter.next().ok_or("--config needs a file")?.into());
            }
            "--offsets" => {
                args.offsets = Some(iter.next().ok_or("--offsets needs a file")?.into());
            }
            "--from-beginning" => args.from_beginning = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            _ => args.include.push(arg),
        }
    }

    Ok(args)
}

fn load_config(args: &Args) -> Result<FileInputConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => FileInputConfig::default(),
    };

    config.include.extend(args.include.iter().cloned());
    if args.from_beginning {
        config.start_at = StartAt::Beginning;
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            process::exit(1);
        }
    };

    let db = match &args.offsets {
        Some(path) => match OffsetDatabase::open(path) {
            Ok(db) => db,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to open offset database");
                process::exit(1);
            }
        },
        None => OffsetDatabase::in_memory(),
    };

    let (tx, mut rx) = mpsc::channel(1024);
    let input = match FileInput::new(&config, tx, &db) {
        Ok(input) => input,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            process::exit(1);
        }
    };

    if let Err(e) = input.start() {
        error!(error = %e, "Failed to start file input");
        process::exit(1);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            entry = rx.recv() => match entry {
                Some(entry) => match serde_json::to_string(&entry) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!(error = %e, "Failed to serialize entry"),
                },
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if let Err(e) = input.stop().await {
        error!(error = %e, "Shutdown finished with errors");
        process::exit(1);
    }
}

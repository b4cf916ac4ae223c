//! Charset decoding of raw record bytes.

use crate::error::{Error, Result};
use crate::split::LineEnding;
use encoding_rs::{DecoderResult, Encoding, UTF_8, UTF_16BE, UTF_16LE};

/// Converts record bytes from the configured charset to UTF-8.
///
/// Each reader holds its own clone.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    /// `None` passes bytes through unchanged.
    encoding: Option<&'static Encoding>,
}

/// Decoded text and the number of malformed bytes that were dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub malformed: usize,
}

impl Decoder {
    /// Resolves a charset name. The empty string and `nop` select raw
    /// pass-through; other names are looked up as encoding labels.
    pub fn lookup(name: &str) -> Result<Self> {
        let encoding = match name.trim().to_ascii_lowercase().as_str() {
            "" | "nop" => None,
            "utf8" | "ascii" | "us-ascii" => Some(UTF_8),
            "utf16" | "utf-16" => Some(UTF_16LE),
            label => Some(Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                Error::UnsupportedEncoding {
                    name: name.to_string(),
                }
            })?),
        };

        Ok(Self { encoding })
    }

    /// Pass-through decoder.
    pub fn nop() -> Self {
        Self { encoding: None }
    }

    pub fn name(&self) -> &'static str {
        self.encoding.map_or("nop", |e| e.name())
    }

    /// Newline and carriage return as they appear in this charset.
    pub fn line_ending(&self) -> LineEnding {
        match self.encoding {
            Some(e) if e == UTF_16LE => LineEnding {
                newline: vec![0x0A, 0x00],
                carriage_return: vec![0x0D, 0x00],
                unit: 2,
            },
            Some(e) if e == UTF_16BE => LineEnding {
                newline: vec![0x00, 0x0A],
                carriage_return: vec![0x00, 0x0D],
                unit: 2,
            },
            _ => LineEnding::default(),
        }
    }

    /// Decodes one record. Malformed sequences are skipped and counted.
    pub fn decode(&self, bytes: &[u8]) -> Decoded {
        let Some(encoding) = self.encoding else {
            return Decoded {
                text: String::from_utf8_lossy(bytes).into_owned(),
                malformed: 0,
            };
        };

        let mut decoder = encoding.new_decoder_without_bom_handling();
        let mut text = String::new();
        let mut input = bytes;
        let mut malformed = 0;

        loop {
            let needed = decoder
                .max_utf8_buffer_length_without_replacement(input.len())
                .unwrap_or(input.len() * 3 + 16);
            text.reserve(needed);

            let (result, read) = decoder.decode_to_string_without_replacement(input, &mut text, true);
            input = &input[read..];

            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => continue,
                DecoderResult::Malformed(bad, _) => malformed += bad as usize,
            }
        }

        Decoded { text, malformed }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::nop()
    }
}

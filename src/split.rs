//! Record boundary detection over a growing byte buffer.
//!
//! A [`Splitter`] is called repeatedly by a reader with everything it has
//! read but not yet emitted. It returns every record that is complete so far
//! and how many bytes those records consumed; the unconsumed tail stays in
//! the reader's buffer for the next call. The same buffer always produces the
//! same split points.

use regex::bytes::Regex;

/// How a newline looks in the configured charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEnding {
    pub newline: Vec<u8>,
    pub carriage_return: Vec<u8>,
    /// Width of one code unit; boundaries are only searched on multiples of it.
    pub unit: usize,
}

impl Default for LineEnding {
    fn default() -> Self {
        Self {
            newline: b"\n".to_vec(),
            carriage_return: b"\r".to_vec(),
            unit: 1,
        }
    }
}

/// The record boundary policy of one input.
#[derive(Debug, Clone)]
pub enum SplitMode {
    /// One record per line, with a trailing carriage return removed.
    Line(LineEnding),
    /// A record starts wherever the pattern matches.
    LineStart(Regex),
    /// A record ends wherever the pattern matches.
    LineEnd(Regex),
}

/// One complete record found in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub bytes: &'a [u8],
    /// Buffer position just past this record, including its boundary.
    pub end: usize,
}

/// Result of splitting a buffer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Split<'a> {
    pub tokens: Vec<Token<'a>>,
    /// Bytes that may be dropped from the front of the buffer.
    pub consumed: usize,
}

/// Splits buffers according to a [`SplitMode`], capping records at
/// `max_log_size` bytes.
#[derive(Debug, Clone)]
pub struct Splitter {
    mode: SplitMode,
    max_log_size: usize,
}

/// A record boundary: bytes to advance past it, where the record's content
/// ends, and the record if it is worth emitting.
struct Found<'a> {
    advance: usize,
    content: usize,
    token: Option<&'a [u8]>,
}

impl<'a> Found<'a> {
    /// A record whose boundary is its last byte.
    fn span(end: usize, token: Option<&'a [u8]>) -> Self {
        Self {
            advance: end,
            content: end,
            token,
        }
    }
}

impl Splitter {
    pub fn new(mode: SplitMode, max_log_size: usize) -> Self {
        Self {
            mode,
            max_log_size: max_log_size.max(1),
        }
    }

    pub fn mode(&self) -> &SplitMode {
        &self.mode
    }

    /// Finds all complete records in `data`.
    ///
    /// With `flush` set, whatever remains after the last boundary is returned
    /// as a final record instead of being left for more data.
    pub fn split<'a>(&self, data: &'a [u8], flush: bool) -> Split<'a> {
        let mut split = Split::default();

        while split.consumed < data.len() {
            let rest = &data[split.consumed..];
            let Some((advance, token)) = self.step(rest, flush) else {
                break;
            };
            if advance == 0 {
                break;
            }

            split.consumed += advance;
            if let Some(bytes) = token {
                split.tokens.push(Token {
                    bytes,
                    end: split.consumed,
                });
            }
        }

        split
    }

    fn step<'a>(&self, data: &'a [u8], flush: bool) -> Option<(usize, Option<&'a [u8]>)> {
        let found = match &self.mode {
            SplitMode::Line(ending) => line_step(ending, data, flush),
            SplitMode::LineStart(re) => line_start_step(re, data, flush),
            SplitMode::LineEnd(re) => line_end_step(re, data, flush),
        };

        // a record longer than max_log_size is cut and the rest stays
        // buffered, so the cut lands at the same byte however the data arrived
        match found {
            Some(found) if found.content > self.max_log_size => Some(self.cut(data)),
            Some(found) => Some((found.advance, found.token)),
            None if data.len() > self.max_log_size => Some(self.cut(data)),
            None => None,
        }
    }

    fn cut<'a>(&self, data: &'a [u8]) -> (usize, Option<&'a [u8]>) {
        let unit = match &self.mode {
            SplitMode::Line(ending) => ending.unit.max(1),
            _ => 1,
        };
        // never cut through a code unit
        let at = (self.max_log_size - self.max_log_size % unit)
            .max(unit)
            .min(data.len());
        (at, Some(&data[..at]))
    }
}

fn line_step<'a>(ending: &LineEnding, data: &'a [u8], flush: bool) -> Option<Found<'a>> {
    match find_aligned(data, &ending.newline, ending.unit) {
        Some(pos) => Some(Found {
            advance: pos + ending.newline.len(),
            content: pos,
            token: Some(strip_suffix(&data[..pos], &ending.carriage_return)),
        }),
        None if flush && !data.is_empty() => Some(Found::span(
            data.len(),
            Some(strip_suffix(data, &ending.carriage_return)),
        )),
        None => None,
    }
}

fn line_start_step<'a>(re: &Regex, data: &'a [u8], flush: bool) -> Option<Found<'a>> {
    let Some(first) = re.find(data) else {
        return rest_step(data, flush);
    };

    if first.start() != 0 {
        // bytes ahead of the first record start form a record of their own
        return Some(Found::span(first.start(), non_blank(&data[..first.start()])));
    }

    if first.end() == data.len() {
        return rest_step(data, flush);
    }

    let next_from = first.end().max(first.start() + 1);
    match re.find_at(data, next_from) {
        Some(next) => Some(Found::span(next.start(), non_blank(&data[..next.start()]))),
        None => rest_step(data, flush),
    }
}

fn line_end_step<'a>(re: &Regex, data: &'a [u8], flush: bool) -> Option<Found<'a>> {
    let Some(found) = re.find_iter(data).find(|m| m.end() > 0) else {
        return rest_step(data, flush);
    };

    // the match may continue once more bytes arrive
    if found.end() == data.len() && !flush {
        return None;
    }

    Some(Found::span(found.end(), non_blank(&data[..found.end()])))
}

fn rest_step(data: &[u8], flush: bool) -> Option<Found<'_>> {
    if flush && !data.is_empty() {
        Some(Found::span(data.len(), non_blank(data)))
    } else {
        None
    }
}

fn non_blank(data: &[u8]) -> Option<&[u8]> {
    let trimmed = data.trim_ascii();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn strip_suffix<'a>(data: &'a [u8], suffix: &[u8]) -> &'a [u8] {
    data.strip_suffix(suffix).unwrap_or(data)
}

fn find_aligned(data: &[u8], needle: &[u8], unit: usize) -> Option<usize> {
    let last_start = (data.len() + 1).checked_sub(needle.len())?;
    (0..last_start)
        .step_by(unit.max(1))
        .find(|&i| data[i..].starts_with(needle))
}

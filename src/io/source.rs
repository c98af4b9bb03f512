//! Reading sources - turn line-oriented sensor logs into events
//!
//! Accepted record layouts (whitespace- or comma-separated):
//! - `HH:MM:SS <light> <count>` - sequence assigned in acceptance order
//! - `<sequence> HH:MM:SS <light> <count>`
//!
//! Blank lines and lines starting with `#` are ignored. Filtering (cutoff time,
//! unknown lights) and the skip-or-fail policy for bad records live here, never
//! in the pipeline core.

use crate::domain::error::SourceError;
use crate::domain::types::{parse_timestamp, Event, LightId};
use chrono::NaiveTime;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// Finite stream of events; `Ok(None)` signals end of stream
pub trait Source: Send {
    fn next_event(&mut self) -> Result<Option<Event>, SourceError>;

    /// Records the source dropped instead of returning
    fn rejected(&self) -> u64 {
        0
    }
}

/// What to do with a record that cannot be turned into an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log and continue with the next record
    #[default]
    Skip,
    /// Stop the stream with an error
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Drop readings later than this time of day
    pub cutoff: Option<NaiveTime>,
    pub on_malformed: MalformedPolicy,
    /// When set, readings for other lights are malformed
    pub known_lights: Option<Vec<LightId>>,
}

/// Source over any buffered reader of text records
pub struct LineSource<R> {
    reader: R,
    options: SourceOptions,
    line_no: u64,
    next_sequence: u64,
    /// Records skipped as malformed or filtered by cutoff
    rejected: u64,
    exhausted: bool,
    buf: Vec<u8>,
}

impl LineSource<BufReader<File>> {
    /// Open a record file
    pub fn open<P: AsRef<Path>>(path: P, options: SourceOptions) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!(file = %path.display(), cutoff = ?options.cutoff, "source_opened");
        Ok(Self::new(BufReader::new(file), options))
    }
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R, options: SourceOptions) -> Self {
        Self {
            reader,
            options,
            line_no: 0,
            next_sequence: 0,
            rejected: 0,
            exhausted: false,
            buf: Vec::new(),
        }
    }

    /// Parse one record; a record without a sequence takes the next free one
    fn parse_line(&self, line: &str) -> Result<Event, SourceError> {
        let malformed = |reason: String| SourceError::Malformed { line: self.line_no, reason };

        let fields: Vec<&str> =
            line.split(|c: char| c == ',' || c.is_whitespace()).filter(|f| !f.is_empty()).collect();

        let (sequence, rest) = match fields.len() {
            3 => (self.next_sequence, &fields[..]),
            4 => {
                let seq = fields[0]
                    .parse::<u64>()
                    .map_err(|_| malformed(format!("bad sequence {:?}", fields[0])))?;
                (seq, &fields[1..])
            }
            n => return Err(malformed(format!("expected 3 or 4 fields, found {}", n))),
        };
        // The successor must exist for records that follow without a sequence
        if sequence.checked_add(1).is_none() {
            return Err(malformed(format!("sequence {} out of range", sequence)));
        }

        let timestamp =
            parse_timestamp(rest[0]).ok_or_else(|| malformed(format!("bad timestamp {:?}", rest[0])))?;
        let light = rest[1]
            .parse::<u32>()
            .map(LightId)
            .map_err(|_| malformed(format!("bad light id {:?}", rest[1])))?;
        let count =
            rest[2].parse::<u32>().map_err(|_| malformed(format!("bad count {:?}", rest[2])))?;

        if let Some(known) = &self.options.known_lights {
            if !known.contains(&light) {
                return Err(SourceError::UnknownLight { line: self.line_no, light });
            }
        }

        Ok(Event::new(sequence, timestamp, light, count))
    }
}

impl<R: BufRead + Send> Source for LineSource<R> {
    fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        while !self.exhausted {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                self.exhausted = true;
                info!(lines = %self.line_no, rejected = %self.rejected, "source_exhausted");
                break;
            }
            self.line_no += 1;

            let parsed = match std::str::from_utf8(&self.buf) {
                Ok(text) => {
                    let line = text.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    self.parse_line(line)
                }
                Err(e) => Err(SourceError::Malformed {
                    line: self.line_no,
                    reason: format!("invalid UTF-8: {}", e),
                }),
            };

            let event = match parsed {
                Ok(event) => event,
                Err(e) => {
                    self.rejected += 1;
                    match self.options.on_malformed {
                        MalformedPolicy::Skip => {
                            warn!(error = %e, "record_skipped");
                            continue;
                        }
                        MalformedPolicy::Fail => {
                            self.exhausted = true;
                            return Err(e);
                        }
                    }
                }
            };

            if self.options.cutoff.is_some_and(|cutoff| event.timestamp > cutoff) {
                self.rejected += 1;
                continue;
            }

            // Checked in parse_line
            self.next_sequence = event.sequence + 1;
            return Ok(Some(event));
        }
        Ok(None)
    }

    /// Records dropped so far (malformed, unknown light, or past cutoff)
    fn rejected(&self) -> u64 {
        self.rejected
    }
}

/// Source over an in-memory iterator of events
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I> {
    pub fn new<T>(events: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self { inner: events.into_iter() }
    }
}

impl<I> Source for IterSource<I>
where
    I: Iterator<Item = Event> + Send,
{
    fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.inner.next())
    }
}

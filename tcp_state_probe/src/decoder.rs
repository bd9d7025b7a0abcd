//! Offline conversion of binary probe captures.

use std::{
    collections::BTreeSet,
    fmt,
    io::{self, Read, Write},
};

use crate::{
    error::{ProbeError, Result},
    format,
    snapshot::{Endpoints, RawLogRecord, Snapshot, RECORD_SIZE},
};

/// Iterator over the fixed-size records of a binary capture.
///
/// Stops at end of input; a trailing partial record is discarded.
pub struct BinaryRecords<R> {
    reader: R,
    buf: [u8; RECORD_SIZE],
    done: bool,
}

impl<R: Read> BinaryRecords<R> {
    pub fn new(reader: R) -> Self {
        BinaryRecords {
            reader,
            buf: [0; RECORD_SIZE],
            done: false,
        }
    }

    /// Reads as much of one record as the input holds.
    fn fill(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.reader.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for BinaryRecords<R> {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let filled = match self.fill() {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if filled < RECORD_SIZE {
            if filled > 0 {
                log::debug!("discarding {} trailing bytes", filled);
            }
            self.done = true;
            return None;
        }
        let raw = RawLogRecord::read_from(&self.buf)?;
        Some(Snapshot::try_from(&raw))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub records: u32,
    pub skipped: u32,
}

/// Rewrites a binary capture as decoded text lines, numbering records from 0.
/// Records that do not decode are logged and skipped.
pub fn decode_stream<R: Read, W: Write>(reader: R, mut writer: W) -> Result<DecodeSummary> {
    let mut summary = DecodeSummary::default();
    let mut line = Vec::with_capacity(256);

    for record in BinaryRecords::new(reader) {
        match record {
            Ok(snapshot) => {
                line.clear();
                format::write_decoded_line(&snapshot, summary.records, &mut line);
                writer.write_all(&line)?;
                summary.records += 1;
            }
            Err(ProbeError::Io(e)) => return Err(e.into()),
            Err(e) => {
                log::warn!("skipping record: {}", e);
                summary.skipped += 1;
            }
        }
    }
    writer.flush()?;

    Ok(summary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Binary,
    Text,
}

/// Guesses the format of a capture from its first bytes.
pub fn guess_format(head: &[u8]) -> Option<LogFormat> {
    if head
        .iter()
        .take(19)
        .any(|b| *b < 32 || *b > 127)
    {
        return Some(LogFormat::Binary);
    }
    match head.first() {
        Some(b'i') | Some(b'o') => Some(LogFormat::Text),
        _ => None,
    }
}

/// One direction of a TCP connection as it appears in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    pub src: std::net::IpAddr,
    pub src_port: u16,
    pub dst: std::net::IpAddr,
    pub dst_port: u16,
}

impl From<&Snapshot> for FlowKey {
    fn from(s: &Snapshot) -> Self {
        let (src, dst) = match s.endpoints {
            Endpoints::V4 { src, dst } => (src.into(), dst.into()),
            Endpoints::V6 { src, dst } => (src.into(), dst.into()),
        };
        FlowKey {
            src,
            src_port: s.src_port,
            dst,
            dst_port: s.dst_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.src, self.src_port, self.dst, self.dst_port)
    }
}

/// Unique flows of a binary capture, sorted.
pub fn flows<R: Read>(reader: R) -> Result<BTreeSet<FlowKey>> {
    let mut set = BTreeSet::new();
    for record in BinaryRecords::new(reader) {
        match record {
            Ok(snapshot) => {
                set.insert(FlowKey::from(&snapshot));
            }
            Err(ProbeError::Io(e)) => return Err(e.into()),
            Err(e) => log::warn!("skipping record: {}", e),
        }
    }
    Ok(set)
}

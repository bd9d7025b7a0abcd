//! Record encoders for the log stream.
//!
//! Every encoder is a pure function of a [`Snapshot`] and the running packet
//! counter, so the offline decoder can reuse them without a live log.
//!
//! The text formats scale the window fields differently on purpose; tools
//! downstream parse each format by its own rules:
//!
//! | field    | ttprobe       | decoded (bin2ascii) | web10g        |
//! |----------|---------------|---------------------|---------------|
//! | srtt     | raw           | / 1000              | / 1000        |
//! | ssthresh | x mss         | raw                 | x mss         |
//! | snd_wnd  | raw           | x mss               | omitted       |
//! | rcv_wnd  | raw           | x mss               | raw           |
//! | length   | yes           | yes                 | omitted       |

use std::{
    fmt,
    io::Write,
    net::{Ipv4Addr, Ipv6Addr},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::snapshot::{Endpoints, Snapshot};

/// Number of comma separated columns in a web10g line.
pub const WEB10G_COLUMNS: usize = 109;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum OutputMode {
    /// One comma separated text line per record
    #[default]
    Ttprobe,
    /// Raw fixed-size binary records
    Binary,
    /// Sparse text line in the web10g column layout
    #[value(name = "web10g")]
    Web10g,
}

/// Appends the encoding of `snapshot` in `mode` to `out`.
pub fn encode(mode: OutputMode, snapshot: &Snapshot, counter: u32, out: &mut Vec<u8>) {
    match mode {
        OutputMode::Ttprobe => write_ttprobe_line(snapshot, counter, out),
        OutputMode::Binary => write_binary(snapshot, out),
        OutputMode::Web10g => write_web10g_line(snapshot, counter, out),
    }
}

/// Live structured text line.
pub fn write_ttprobe_line(s: &Snapshot, counter: u32, out: &mut Vec<u8>) {
    let (src, dst) = addresses(&s.endpoints);
    // writing into a Vec cannot fail
    let _ = writeln!(
        out,
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        char::from(s.direction.as_byte()),
        TimestampText(s),
        src,
        s.src_port,
        dst,
        s.dst_port,
        counter,
        s.mss_cache,
        s.srtt,
        s.snd_cwnd.wrapping_mul(s.mss_cache),
        s.ssthresh.wrapping_mul(s.mss_cache),
        s.snd_wnd,
        s.rcv_wnd,
        u8::from(s.state),
        s.snd_una,
        s.snd_nxt,
        s.length,
    );
}

/// Structured text as produced from a binary capture by the offline decoder.
pub fn write_decoded_line(s: &Snapshot, counter: u32, out: &mut Vec<u8>) {
    let (src, dst) = addresses(&s.endpoints);
    let _ = writeln!(
        out,
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        char::from(s.direction.as_byte()),
        TimestampText(s),
        src,
        s.src_port,
        dst,
        s.dst_port,
        counter,
        s.mss_cache,
        s.srtt / 1000,
        s.snd_cwnd.wrapping_mul(s.mss_cache),
        s.ssthresh,
        s.snd_wnd.wrapping_mul(s.mss_cache),
        s.rcv_wnd.wrapping_mul(s.mss_cache),
        u8::from(s.state),
        s.snd_una,
        s.snd_nxt,
        s.length,
    );
}

pub fn write_binary(s: &Snapshot, out: &mut Vec<u8>) {
    out.extend_from_slice(s.to_raw().as_bytes());
}

/// Web10g compatible line, only the columns this probe can fill are set.
pub fn write_web10g_line(s: &Snapshot, counter: u32, out: &mut Vec<u8>) {
    let (src, dst) = addresses(&s.endpoints);
    let columns: [(usize, String); 13] = [
        (1, TimestampText(s).to_string()),
        (3, src),
        (4, s.src_port.to_string()),
        (5, dst),
        (6, s.dst_port.to_string()),
        (7, counter.to_string()),
        (20, s.mss_cache.to_string()),
        (23, (s.srtt / 1000).to_string()),
        (26, s.snd_cwnd.wrapping_mul(s.mss_cache).to_string()),
        (27, s.ssthresh.wrapping_mul(s.mss_cache).to_string()),
        (29, s.rcv_wnd.to_string()),
        (76, u8::from(s.state).to_string()),
        (108, s.snd_una.to_string()),
    ];

    let mut next = 1;
    for (column, value) in columns.iter() {
        while next < *column {
            out.push(b',');
            next += 1;
        }
        out.extend_from_slice(value.as_bytes());
    }
    while next < WEB10G_COLUMNS {
        out.push(b',');
        next += 1;
    }
    let _ = writeln!(out, "{}", s.snd_nxt);
}

struct TimestampText<'a>(&'a Snapshot);

impl fmt::Display for TimestampText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0.timestamp.secs, self.0.timestamp.micros)
    }
}

fn addresses(endpoints: &Endpoints) -> (String, String) {
    match endpoints {
        Endpoints::V4 { src, dst } => (format_v4(src), format_v4(dst)),
        Endpoints::V6 { src, dst } => (format_v6(src), format_v6(dst)),
    }
}

fn format_v4(addr: &Ipv4Addr) -> String {
    addr.to_string()
}

/// Eight zero-padded uppercase groups, no `::` compression.
pub fn format_v6(addr: &Ipv6Addr) -> String {
    let s = addr.segments();
    format!(
        "{:04X}:{:04X}:{:04X}:{:04X}:{:04X}:{:04X}:{:04X}:{:04X}",
        s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]
    )
}

//! Probe configuration, read once at startup.

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ProbeError, Result},
    format::OutputMode,
    snapshot::{Direction, RawTcpEvent},
};

/// Which hook directions feed the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum Capture {
    /// Outbound segments only
    Snd,
    /// Inbound segments only
    Rcv,
    #[default]
    Both,
}

impl Capture {
    pub fn includes(self, direction: Direction) -> bool {
        match (self, direction) {
            (Capture::Both, _) => true,
            (Capture::Snd, Direction::Outbound) => true,
            (Capture::Rcv, Direction::Inbound) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Port to match on either side of the connection (0 = all)
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// skb mark to match (0 = no mark)
    #[arg(long, default_value_t = 0)]
    pub fwmark: u32,

    /// Log buffer size in records, rounded up to a power of two
    #[arg(long, default_value_t = 8192)]
    pub bufsize: usize,

    /// Log every segment (true) or only congestion window changes (false)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub full: bool,

    /// Output format of the log stream
    #[arg(long, value_enum, default_value_t = OutputMode::Ttprobe)]
    pub omode: OutputMode,

    /// Hook directions to capture
    #[arg(long, value_enum, default_value_t = Capture::Both)]
    pub direction: Capture,
}

/// Largest ring, in records, a `--bufsize` may ask for.
pub const MAX_CAPACITY: usize = 1 << 24;

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            port: 0,
            fwmark: 0,
            bufsize: 8192,
            full: true,
            omode: OutputMode::Ttprobe,
            direction: Capture::Both,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bufsize == 0 || self.bufsize > MAX_CAPACITY {
            return Err(ProbeError::InvalidCapacity);
        }
        Ok(())
    }

    /// Ring size actually allocated. One slot stays empty, so `capacity - 1`
    /// records fit at once.
    pub fn effective_capacity(&self) -> Result<usize> {
        self.validate()?;
        self.bufsize
            .max(2)
            .checked_next_power_of_two()
            .ok_or(ProbeError::InvalidCapacity)
    }

    pub fn match_key(&self) -> MatchKey {
        MatchKey {
            port: (self.port != 0).then_some(self.port),
            mark: (self.fwmark != 0).then_some(self.fwmark),
        }
    }
}

/// Port/mark selector. Both unset matches every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchKey {
    pub port: Option<u16>,
    pub mark: Option<u32>,
}

impl MatchKey {
    pub fn matches(&self, event: &RawTcpEvent) -> bool {
        if self.port.is_none() && self.mark.is_none() {
            return true;
        }
        let port_hit = self
            .port
            .map_or(false, |p| event.src_port() == p || event.dst_port() == p);
        let mark_hit = self.mark.map_or(false, |m| event.mark == m);
        port_hit || mark_hit
    }
}

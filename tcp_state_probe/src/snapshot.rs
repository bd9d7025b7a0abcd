//! Captured TCP state records.
//!
//! [`Snapshot`] is the typed in-memory form; [`RawLogRecord`] is the fixed
//! 96-byte layout written by the binary output mode and read back by the
//! offline decoder. [`RawTcpEvent`] mirrors the kernel-side hook event.

use std::{
    mem,
    net::{Ipv4Addr, Ipv6Addr},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

/// Size in bytes of one binary log record.
pub const RECORD_SIZE: usize = mem::size_of::<RawLogRecord>();

const AF_INET: u8 = libc::AF_INET as u8;
const AF_INET6: u8 = libc::AF_INET6 as u8;

/// Wall-clock capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: u64,
    pub micros: u64,
}

impl Timestamp {
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            secs: elapsed.as_secs(),
            micros: u64::from(elapsed.subsec_micros()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Outbound => b'o',
            Direction::Inbound => b'i',
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'o' => Ok(Direction::Outbound),
            b'i' => Ok(Direction::Inbound),
            other => Err(ProbeError::UnknownDirection(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn as_raw(self) -> u8 {
        match self {
            AddressFamily::Inet => AF_INET,
            AddressFamily::Inet6 => AF_INET6,
        }
    }

    pub fn from_raw(family: u8) -> Result<Self> {
        match family {
            AF_INET => Ok(AddressFamily::Inet),
            AF_INET6 => Ok(AddressFamily::Inet6),
            other => Err(ProbeError::UnknownAddressFamily(other)),
        }
    }
}

/// Source and destination address of a flow. Both sides always share a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoints {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
}

impl Endpoints {
    pub fn family(&self) -> AddressFamily {
        match self {
            Endpoints::V4 { .. } => AddressFamily::Inet,
            Endpoints::V6 { .. } => AddressFamily::Inet6,
        }
    }

    /// Builds endpoints from the 16-byte address slots used on the wire.
    /// IPv4 addresses live in the first four bytes.
    pub fn from_slots(family: u8, src: &[u8; 16], dst: &[u8; 16]) -> Result<Self> {
        match AddressFamily::from_raw(family)? {
            AddressFamily::Inet => Ok(Endpoints::V4 {
                src: Ipv4Addr::new(src[0], src[1], src[2], src[3]),
                dst: Ipv4Addr::new(dst[0], dst[1], dst[2], dst[3]),
            }),
            AddressFamily::Inet6 => Ok(Endpoints::V6 {
                src: Ipv6Addr::from(*src),
                dst: Ipv6Addr::from(*dst),
            }),
        }
    }

    fn to_slots(self) -> ([u8; 16], [u8; 16]) {
        let mut src_slot = [0u8; 16];
        let mut dst_slot = [0u8; 16];
        match self {
            Endpoints::V4 { src, dst } => {
                src_slot[..4].copy_from_slice(&src.octets());
                dst_slot[..4].copy_from_slice(&dst.octets());
            }
            Endpoints::V6 { src, dst } => {
                src_slot = src.octets();
                dst_slot = dst.octets();
            }
        }
        (src_slot, dst_slot)
    }
}

/// Linux TCP connection states, numbered as in `include/net/tcp_states.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    NewSynRecv,
    Unknown(u8),
}

impl From<u8> for SocketState {
    fn from(state: u8) -> Self {
        match state {
            1 => SocketState::Established,
            2 => SocketState::SynSent,
            3 => SocketState::SynRecv,
            4 => SocketState::FinWait1,
            5 => SocketState::FinWait2,
            6 => SocketState::TimeWait,
            7 => SocketState::Close,
            8 => SocketState::CloseWait,
            9 => SocketState::LastAck,
            10 => SocketState::Listen,
            11 => SocketState::Closing,
            12 => SocketState::NewSynRecv,
            other => SocketState::Unknown(other),
        }
    }
}

impl From<SocketState> for u8 {
    fn from(state: SocketState) -> u8 {
        match state {
            SocketState::Established => 1,
            SocketState::SynSent => 2,
            SocketState::SynRecv => 3,
            SocketState::FinWait1 => 4,
            SocketState::FinWait2 => 5,
            SocketState::TimeWait => 6,
            SocketState::Close => 7,
            SocketState::CloseWait => 8,
            SocketState::LastAck => 9,
            SocketState::Listen => 10,
            SocketState::Closing => 11,
            SocketState::NewSynRecv => 12,
            SocketState::Unknown(other) => other,
        }
    }
}

/// One captured TCP state transition. Immutable once admitted to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub endpoints: Endpoints,
    /// Host byte order
    pub src_port: u16,
    /// Host byte order
    pub dst_port: u16,
    pub length: u16,
    pub snd_nxt: u32,
    pub snd_una: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub snd_cwnd: u32,
    pub ssthresh: u32,
    pub srtt: u32,
    pub mss_cache: u32,
    pub state: SocketState,
    pub direction: Direction,
}

impl Snapshot {
    pub fn to_raw(&self) -> RawLogRecord {
        let (src_addr, dst_addr) = self.endpoints.to_slots();
        RawLogRecord {
            tv_sec: self.timestamp.secs,
            tv_usec: self.timestamp.micros,
            src_addr,
            dst_addr,
            src_port: self.src_port.to_be(),
            dst_port: self.dst_port.to_be(),
            length: self.length,
            _pad0: 0,
            snd_nxt: self.snd_nxt,
            snd_una: self.snd_una,
            snd_wnd: self.snd_wnd,
            rcv_wnd: self.rcv_wnd,
            snd_cwnd: self.snd_cwnd,
            ssthresh: self.ssthresh,
            srtt: self.srtt,
            mss_cache: self.mss_cache,
            sock_state: self.state.into(),
            direction: self.direction.as_byte(),
            addr_family: self.endpoints.family().as_raw(),
            _pad1: [0; 5],
        }
    }

    /// Builds a snapshot from a hook event, stamping it with `timestamp`.
    pub fn from_event(event: &RawTcpEvent, direction: Direction, timestamp: Timestamp) -> Result<Self> {
        let family = u8::try_from(event.family)
            .map_err(|_| ProbeError::UnknownAddressFamily(u8::MAX))?;
        Ok(Snapshot {
            timestamp,
            endpoints: Endpoints::from_slots(family, &event.src_addr, &event.dst_addr)?,
            src_port: u16::from_be(event.src_port),
            dst_port: u16::from_be(event.dst_port),
            length: event.length,
            snd_nxt: event.snd_nxt,
            snd_una: event.snd_una,
            snd_wnd: event.snd_wnd,
            rcv_wnd: event.rcv_wnd,
            snd_cwnd: event.snd_cwnd,
            ssthresh: event.ssthresh,
            srtt: event.srtt_us,
            mss_cache: event.mss_cache,
            state: event.state.into(),
            direction,
        })
    }
}

impl TryFrom<&RawLogRecord> for Snapshot {
    type Error = ProbeError;

    fn try_from(raw: &RawLogRecord) -> Result<Self> {
        Ok(Snapshot {
            timestamp: Timestamp {
                secs: raw.tv_sec,
                micros: raw.tv_usec,
            },
            endpoints: Endpoints::from_slots(raw.addr_family, &raw.src_addr, &raw.dst_addr)?,
            src_port: u16::from_be(raw.src_port),
            dst_port: u16::from_be(raw.dst_port),
            length: raw.length,
            snd_nxt: raw.snd_nxt,
            snd_una: raw.snd_una,
            snd_wnd: raw.snd_wnd,
            rcv_wnd: raw.rcv_wnd,
            snd_cwnd: raw.snd_cwnd,
            ssthresh: raw.ssthresh,
            srtt: raw.srtt,
            mss_cache: raw.mss_cache,
            state: raw.sock_state.into(),
            direction: Direction::from_byte(raw.direction)?,
        })
    }
}

/// Binary log record. Ports are network order, everything else native.
/// Padding is explicit so every byte of the record is initialized.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawLogRecord {
    pub tv_sec: u64,
    pub tv_usec: u64,
    pub src_addr: [u8; 16],
    pub dst_addr: [u8; 16],
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub _pad0: u16,
    pub snd_nxt: u32,
    pub snd_una: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub snd_cwnd: u32,
    pub ssthresh: u32,
    pub srtt: u32,
    pub mss_cache: u32,
    pub sock_state: u8,
    pub direction: u8,
    pub addr_family: u8,
    pub _pad1: [u8; 5],
}

// SAFETY: RawLogRecord is repr(C), has no implicit padding and contains only POD types
unsafe impl plain::Plain for RawLogRecord {}

impl RawLogRecord {
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: every byte is an initialized field, see the Plain impl
        unsafe { plain::as_bytes(self) }
    }

    /// Copies one record out of `bytes`, which must hold at least [`RECORD_SIZE`] bytes.
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        let mut raw = RawLogRecord::default();
        plain::copy_from_bytes(&mut raw, bytes).ok()?;
        Some(raw)
    }
}

// Mirror kernel-side types
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct RawTcpEvent {
    pub family: u16,
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub mark: u32,
    pub src_addr: [u8; 16],
    pub dst_addr: [u8; 16],
    pub snd_nxt: u32,
    pub snd_una: u32,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    pub snd_cwnd: u32,
    pub ssthresh: u32,
    pub srtt_us: u32,
    pub mss_cache: u32,
    pub state: u8,
    pub direction: u8,
    pub _pad: [u8; 2],
}

// SAFETY: RawTcpEvent is repr(C) and contains only POD types
unsafe impl plain::Plain for RawTcpEvent {}

impl RawTcpEvent {
    /// Convenience constructor for an IPv4 flow; ports in host order.
    pub fn v4(src: Ipv4Addr, src_port: u16, dst: Ipv4Addr, dst_port: u16) -> Self {
        let mut event = RawTcpEvent {
            family: u16::from(AF_INET),
            src_port: src_port.to_be(),
            dst_port: dst_port.to_be(),
            ..RawTcpEvent::default()
        };
        event.src_addr[..4].copy_from_slice(&src.octets());
        event.dst_addr[..4].copy_from_slice(&dst.octets());
        event
    }

    /// Convenience constructor for an IPv6 flow; ports in host order.
    pub fn v6(src: Ipv6Addr, src_port: u16, dst: Ipv6Addr, dst_port: u16) -> Self {
        RawTcpEvent {
            family: u16::from(AF_INET6),
            src_port: src_port.to_be(),
            dst_port: dst_port.to_be(),
            src_addr: src.octets(),
            dst_addr: dst.octets(),
            ..RawTcpEvent::default()
        }
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be(self.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be(self.dst_port)
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot() -> Snapshot {
    Snapshot {
        timestamp: Timestamp { secs: 1_500_000_000, micros: 42 },
        endpoints: Endpoints::V4 {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
        },
        src_port: 5001,
        dst_port: 80,
        length: 1448,
        snd_nxt: 1000,
        snd_una: 900,
        snd_wnd: 29200,
        rcv_wnd: 65535,
        snd_cwnd: 10,
        ssthresh: 7,
        srtt: 2500,
        mss_cache: 1448,
        state: SocketState::Established,
        direction: Direction::Outbound,
    }
}

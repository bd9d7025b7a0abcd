//Library for logging TCP connection state at send/receive events and streaming it to a reader

pub mod buffer;
pub mod collector;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod format;
pub mod probe;
pub mod snapshot;

pub use buffer::{Push, RingBuffer};
pub use collector::ProbeCollector;
pub use config::{Capture, MatchKey, ProbeConfig};
pub use consumer::{Command, ControlChannel, Drain, LogReader};
pub use decoder::{decode_stream, flows, guess_format, BinaryRecords, DecodeSummary, FlowKey, LogFormat};
pub use error::{ProbeError, Result};
pub use format::OutputMode;
pub use probe::{Admission, ProbeStats, TcpProbe};
pub use snapshot::{
    AddressFamily, Direction, Endpoints, RawLogRecord, RawTcpEvent, Snapshot, SocketState, Timestamp,
    RECORD_SIZE,
};

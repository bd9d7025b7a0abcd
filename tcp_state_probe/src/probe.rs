//! The shared probe log: ring buffer, counters and control flags behind one
//! lock, plus the producer entry point used by the capture hooks.

use std::{sync::Arc, time::Instant};

use parking_lot::{Condvar, Mutex};

use crate::{
    buffer::{Push, RingBuffer},
    config::{MatchKey, ProbeConfig},
    consumer::{Command, ControlChannel, LogReader},
    error::Result,
    format::OutputMode,
    snapshot::{Direction, RawTcpEvent, Snapshot, Timestamp},
};

/// Result of offering a hook event to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Written to the ring buffer
    Admitted,
    /// Log full, counted in `dropped`
    Dropped,
    /// Did not pass the direction, match key or cwnd-change filter
    Filtered,
    /// Event did not describe an inet socket
    Rejected,
}

pub(crate) struct ProbeState {
    pub(crate) ring: RingBuffer,
    pub(crate) packets: u32,
    pub(crate) last_cwnd: u32,
    pub(crate) flush: bool,
    pub(crate) finish: bool,
    pub(crate) interrupted: bool,
    shut_down: bool,
    epoch: Instant,
}

/// Point-in-time view of the log counters.
#[derive(Debug, Clone, Copy)]
pub struct ProbeStats {
    pub capacity: usize,
    pub occupied: usize,
    pub dropped: u64,
    pub packets: u32,
    pub epoch: Instant,
}

pub struct TcpProbe {
    config: ProbeConfig,
    key: MatchKey,
    pub(crate) state: Mutex<ProbeState>,
    pub(crate) wait: Condvar,
}

impl TcpProbe {
    pub fn new(config: ProbeConfig) -> Result<Arc<Self>> {
        let capacity = config.effective_capacity()?;
        log::info!(
            "tcp probe log created (port={}/fwmark={}) bufsize={} omode={:?}",
            config.port,
            config.fwmark,
            capacity,
            config.omode,
        );

        Ok(Arc::new(TcpProbe {
            key: config.match_key(),
            config,
            state: Mutex::new(ProbeState {
                ring: RingBuffer::with_capacity(capacity),
                packets: 0,
                last_cwnd: 0,
                flush: false,
                finish: false,
                interrupted: false,
                shut_down: false,
                epoch: Instant::now(),
            }),
            wait: Condvar::new(),
        }))
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn output_mode(&self) -> OutputMode {
        self.config.omode
    }

    /// Offers one hook event to the log. Never blocks beyond the log lock.
    pub fn submit(&self, event: &RawTcpEvent, direction: Direction) -> Admission {
        if !self.config.direction.includes(direction) || !self.key.matches(event) {
            return Admission::Filtered;
        }

        let snapshot = Snapshot::from_event(event, direction, Timestamp::now());

        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                log::error!("discarding hook event: {}", e);
                return Admission::Rejected;
            }
        };

        let mut state = self.state.lock();
        if !self.config.full && event.snd_cwnd == state.last_cwnd {
            return Admission::Filtered;
        }
        state.last_cwnd = event.snd_cwnd;

        let admission = match state.ring.try_push(snapshot) {
            Push::Admitted => Admission::Admitted,
            Push::Dropped => Admission::Dropped,
        };
        drop(state);

        if admission == Admission::Admitted {
            self.wait.notify_all();
        }
        log::trace!("{:?} {:?} event: {:?}", direction, admission, snapshot);
        admission
    }

    /// Empties the log and starts a new capture epoch.
    pub fn open(self: &Arc<Self>) -> LogReader {
        {
            let mut state = self.state.lock();
            state.ring.reset();
            state.epoch = Instant::now();
        }
        log::info!("tcp probe log opened");
        LogReader::new(self.clone())
    }

    pub fn control(self: &Arc<Self>) -> ControlChannel {
        ControlChannel::new(self.clone())
    }

    pub fn command(&self, command: Command) {
        let mut state = self.state.lock();
        match command {
            Command::Flush => {
                log::info!("flushing the buffer");
                log::info!("dropped packets = {}", state.ring.dropped());
                state.flush = true;
            }
            Command::Finish => {
                log::info!("sending end of stream to the reader");
                state.finish = true;
            }
        }
        drop(state);
        self.wait.notify_all();
    }

    /// Unblocks a waiting reader with an interrupted error.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.wait.notify_all();
    }

    /// Teardown path: delivers a single end-of-stream, later calls do nothing.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.finish = true;
        log::info!("tcp probe shutting down, dropped packets = {}", state.ring.dropped());
        drop(state);
        self.wait.notify_all();
    }

    pub fn stats(&self) -> ProbeStats {
        let state = self.state.lock();
        ProbeStats {
            capacity: state.ring.capacity(),
            occupied: state.ring.occupied(),
            dropped: state.ring.dropped(),
            packets: state.packets,
            epoch: state.epoch,
        }
    }
}

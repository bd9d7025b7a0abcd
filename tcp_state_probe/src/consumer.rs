//! Reader side of the probe log.
//!
//! [`LogReader`] drains serialized records; [`ControlChannel`] accepts the
//! `flush` and `finish` text commands.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use crate::{
    error::{ProbeError, Result},
    format,
    probe::TcpProbe,
};

/// Control commands understood by the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Return what is buffered now instead of waiting for more
    Flush,
    /// Deliver one end-of-stream to the reader
    Finish,
}

impl Command {
    /// Parses a written command. Trailing NULs and whitespace are ignored,
    /// anything else has to match exactly.
    pub fn parse(input: &[u8]) -> Option<Self> {
        let end = input
            .iter()
            .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
            .map_or(0, |p| p + 1);
        match &input[..end] {
            b"flush" => Some(Command::Flush),
            b"finish" => Some(Command::Finish),
            _ => None,
        }
    }
}

/// Result of one [`LogReader::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// This many bytes of whole records were written to the output. Zero
    /// only when the output cannot hold the next record.
    Records(usize),
    /// A flush arrived while the log was empty
    Flushed,
    /// A finish was requested
    EndOfStream,
}

pub struct LogReader {
    probe: Arc<TcpProbe>,
    scratch: Vec<u8>,
}

impl LogReader {
    pub(crate) fn new(probe: Arc<TcpProbe>) -> Self {
        LogReader {
            probe,
            scratch: Vec::with_capacity(1024),
        }
    }

    pub fn probe(&self) -> &Arc<TcpProbe> {
        &self.probe
    }

    /// Fills `out` with whole serialized records, blocking until there is
    /// data, a flush, a finish or an interrupt.
    ///
    /// A record that does not fit in the rest of `out` stays in the log and
    /// is delivered first on the next call.
    pub fn drain(&mut self, out: &mut [u8]) -> Result<Drain> {
        let len = out.len();
        let mode = self.probe.output_mode();
        let mut cnt = 0;

        let mut state = self.probe.state.lock();
        while cnt < len {
            while state.ring.is_empty() && !state.flush && !state.finish && !state.interrupted {
                self.probe.wait.wait(&mut state);
            }

            if state.finish {
                if cnt > 0 {
                    // hand over what we have, end of stream comes next call
                    break;
                }
                state.finish = false;
                return Ok(Drain::EndOfStream);
            }

            // buffered records are delivered before a pending interrupt
            if state.interrupted && state.ring.is_empty() {
                state.interrupted = false;
                if cnt == 0 {
                    return Err(ProbeError::Interrupted);
                }
                break;
            }

            if state.ring.is_empty() && state.flush {
                if cnt == 0 {
                    state.flush = false;
                    return Ok(Drain::Flushed);
                }
                break;
            }

            let snapshot = match state.ring.peek() {
                Some(s) => *s,
                None => continue,
            };
            let counter = state.packets;
            state.packets = state.packets.wrapping_add(1);

            self.scratch.clear();
            format::encode(mode, &snapshot, counter, &mut self.scratch);
            let width = self.scratch.len();
            if cnt + width > len {
                break;
            }

            state.ring.advance();
            out[cnt..cnt + width].copy_from_slice(&self.scratch);
            cnt += width;
        }

        // everything buffered has been handed out
        if state.flush && cnt < len {
            state.flush = false;
        }

        Ok(Drain::Records(cnt))
    }
}

impl Read for LogReader {
    /// Returns `Ok(0)` once per `finish`. A flush on an empty log keeps
    /// waiting, so a zero-length read always means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.drain(buf)? {
                Drain::Records(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "read buffer smaller than one log record",
                    ))
                }
                Drain::Records(n) => return Ok(n),
                Drain::Flushed => continue,
                Drain::EndOfStream => return Ok(0),
            }
        }
    }
}

/// Write side of the log. Unknown input is accepted and ignored.
pub struct ControlChannel {
    probe: Arc<TcpProbe>,
}

impl ControlChannel {
    pub(crate) fn new(probe: Arc<TcpProbe>) -> Self {
        ControlChannel { probe }
    }
}

impl Write for ControlChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match Command::parse(buf) {
            Some(command) => self.probe.command(command),
            None => log::debug!("ignoring control input of {} bytes", buf.len()),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, thread, time::Duration};

    use super::*;
    use crate::{
        config::ProbeConfig,
        format::OutputMode,
        snapshot::{Direction, RawTcpEvent, RECORD_SIZE},
    };

    fn probe(bufsize: usize, omode: OutputMode) -> Arc<TcpProbe> {
        TcpProbe::new(ProbeConfig {
            bufsize,
            omode,
            ..ProbeConfig::default()
        })
        .unwrap()
    }

    fn push(probe: &TcpProbe, seq: u32) {
        let event = RawTcpEvent {
            snd_nxt: seq,
            ..RawTcpEvent::v4(Ipv4Addr::LOCALHOST, 1, Ipv4Addr::LOCALHOST, 2)
        };
        probe.submit(&event, Direction::Outbound);
    }

    #[test]
    fn command_parsing() {
        assert_eq!(Command::parse(b"flush"), Some(Command::Flush));
        assert_eq!(Command::parse(b"flush\n"), Some(Command::Flush));
        assert_eq!(Command::parse(b"finish\0"), Some(Command::Finish));
        assert_eq!(Command::parse(b"flushx"), None);
        assert_eq!(Command::parse(b" flush"), None);
        assert_eq!(Command::parse(b""), None);
    }

    #[test]
    fn drains_whole_binary_records() {
        let probe = probe(16, OutputMode::Binary);
        let mut reader = probe.open();
        for seq in 0..3 {
            push(&probe, seq);
        }
        probe.command(Command::Flush);

        let mut out = vec![0u8; RECORD_SIZE * 2 + 10];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::Records(RECORD_SIZE * 2));
        assert_eq!(probe.stats().occupied, 1);

        probe.command(Command::Flush);
        let mut out = vec![0u8; RECORD_SIZE * 4];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::Records(RECORD_SIZE));
        assert_eq!(probe.stats().occupied, 0);
    }

    #[test]
    fn record_exactly_filling_output_is_committed() {
        let probe = probe(16, OutputMode::Binary);
        let mut reader = probe.open();
        push(&probe, 0);
        let mut out = vec![0u8; RECORD_SIZE];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::Records(RECORD_SIZE));
    }

    #[test]
    fn too_small_output_keeps_record() {
        let probe = probe(16, OutputMode::Binary);
        let mut reader = probe.open();
        push(&probe, 0);
        let mut out = vec![0u8; RECORD_SIZE - 1];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::Records(0));
        assert_eq!(probe.stats().occupied, 1);
        assert_eq!(
            reader.read(&mut out).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn truncated_text_record_is_redelivered() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut reader = probe.open();
        push(&probe, 111);
        push(&probe, 222);

        let mut small = vec![0u8; 100];
        let n = match reader.drain(&mut small).unwrap() {
            Drain::Records(n) => n,
            other => panic!("unexpected {:?}", other),
        };
        let first = String::from_utf8(small[..n].to_vec()).unwrap();
        assert_eq!(first.lines().count(), 1);
        assert!(first.trim_end().ends_with(",111,0"));

        let mut big = vec![0u8; 4096];
        let n = match reader.drain(&mut big).unwrap() {
            Drain::Records(n) => n,
            other => panic!("unexpected {:?}", other),
        };
        let rest = String::from_utf8(big[..n].to_vec()).unwrap();
        assert_eq!(rest.lines().count(), 1);
        assert!(rest.trim_end().ends_with(",222,0"));
    }

    #[test]
    fn flush_on_empty_log_returns_immediately() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut reader = probe.open();
        probe.command(Command::Flush);
        let mut out = vec![0u8; 4096];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::Flushed);
        assert!(!probe.state.lock().flush);
    }

    #[test]
    fn finish_is_one_shot() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut reader = probe.open();
        probe.command(Command::Finish);
        probe.command(Command::Finish);
        let mut out = vec![0u8; 4096];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::EndOfStream);

        // next read blocks until data arrives
        let producer = {
            let probe = probe.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                push(&probe, 1);
                probe.command(Command::Flush);
            })
        };
        assert!(matches!(reader.drain(&mut out).unwrap(), Drain::Records(n) if n > 0));
        producer.join().unwrap();
    }

    #[test]
    fn interrupt_unblocks_waiting_reader() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut reader = probe.open();
        let waker = {
            let probe = probe.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                probe.interrupt();
            })
        };
        let mut out = vec![0u8; 4096];
        assert!(matches!(reader.drain(&mut out), Err(ProbeError::Interrupted)));
        waker.join().unwrap();

        let err = {
            probe.interrupt();
            reader.read(&mut out).unwrap_err()
        };
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn pending_interrupt_does_not_hide_buffered_records() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut reader = probe.open();
        push(&probe, 7);
        probe.interrupt();

        let mut out = vec![0u8; 4096];
        let n = match reader.drain(&mut out).unwrap() {
            Drain::Records(n) => n,
            other => panic!("unexpected {:?}", other),
        };
        let text = String::from_utf8(out[..n].to_vec()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.trim_end().ends_with(",7,0"));
        assert_eq!(probe.stats().occupied, 0);
        assert!(!probe.state.lock().interrupted);
    }

    #[test]
    fn interrupt_after_accumulation_is_short_read() {
        let probe = probe(16, OutputMode::Binary);
        let mut reader = probe.open();
        push(&probe, 1);
        let waker = {
            let probe = probe.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                probe.interrupt();
            })
        };

        // one record fits with room to spare, so the drain waits for more
        let mut out = vec![0u8; RECORD_SIZE * 4];
        assert_eq!(reader.drain(&mut out).unwrap(), Drain::Records(RECORD_SIZE));
        waker.join().unwrap();
        assert!(!probe.state.lock().interrupted);
        assert_eq!(probe.stats().occupied, 0);
    }

    #[test]
    fn control_channel_ignores_garbage() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut control = probe.control();
        assert_eq!(control.write(b"reboot\n").unwrap(), 7);
        {
            let state = probe.state.lock();
            assert!(!state.flush && !state.finish);
        }
        control.write_all(b"finish\n").unwrap();
        assert!(probe.state.lock().finish);
    }

    #[test]
    fn read_impl_reports_end_of_stream() {
        let probe = probe(16, OutputMode::Ttprobe);
        let mut reader = probe.open();
        push(&probe, 5);
        probe.command(Command::Finish);
        let mut out = Vec::new();
        // finish preempts buffered data
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(probe.stats().occupied, 1);
    }
}

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    net::Ipv4Addr,
    sync::Arc,
    thread,
};

use tcp_state_probe::{
    decode_stream, Admission, Command, Direction, Drain, OutputMode, ProbeConfig, RawTcpEvent,
    TcpProbe, RECORD_SIZE,
};

fn probe(config: ProbeConfig) -> Arc<TcpProbe> {
    TcpProbe::new(config).unwrap()
}

fn event(dport: u16, snd_nxt: u32, cwnd: u32) -> RawTcpEvent {
    RawTcpEvent {
        snd_nxt,
        snd_una: snd_nxt.saturating_sub(1448),
        snd_cwnd: cwnd,
        ssthresh: 20,
        mss_cache: 1448,
        srtt_us: 12_345,
        snd_wnd: 64,
        rcv_wnd: 128,
        length: 1448,
        state: 1,
        ..RawTcpEvent::v4(Ipv4Addr::new(192, 168, 1, 10), 40000, Ipv4Addr::new(192, 168, 1, 20), dport)
    }
}

/// Drains everything currently buffered as text lines.
fn drain_lines(reader: &mut tcp_state_probe::LogReader) -> Vec<String> {
    let probe = reader.probe().clone();
    let mut lines = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        probe.command(Command::Flush);
        match reader.drain(&mut buf).unwrap() {
            Drain::Records(n) => lines.extend(
                String::from_utf8(buf[..n].to_vec())
                    .unwrap()
                    .lines()
                    .map(str::to_owned),
            ),
            Drain::Flushed => return lines,
            Drain::EndOfStream => panic!("unexpected end of stream"),
        }
    }
}

fn column(line: &str, index: usize) -> &str {
    line.split(',').nth(index).unwrap()
}

#[test]
fn changed_only_scenario_on_port_80() {
    let probe = probe(ProbeConfig {
        port: 80,
        full: false,
        ..ProbeConfig::default()
    });
    let mut reader = probe.open();

    for (seq, cwnd) in [10, 10, 20].into_iter().enumerate() {
        probe.submit(&event(80, seq as u32, cwnd), Direction::Outbound);
    }

    let lines = drain_lines(&mut reader);
    assert_eq!(lines.len(), 2);
    // cwnd column is scaled by mss
    assert_eq!(column(&lines[0], 9), (10 * 1448).to_string());
    assert_eq!(column(&lines[1], 9), (20 * 1448).to_string());
    assert_eq!(probe.stats().dropped, 0);
}

#[test]
fn full_log_drops_and_keeps_order() {
    let probe = probe(ProbeConfig {
        bufsize: 4,
        ..ProbeConfig::default()
    });
    let mut reader = probe.open();

    let outcomes: Vec<Admission> = (0..4)
        .map(|seq| probe.submit(&event(80, seq, 1), Direction::Inbound))
        .collect();
    assert_eq!(outcomes[3], Admission::Dropped);
    assert_eq!(probe.stats().dropped, 1);

    let lines = drain_lines(&mut reader);
    let seqs: Vec<&str> = lines.iter().map(|l| column(l, 15)).collect();
    assert_eq!(seqs, vec!["0", "1", "2"]);
    assert!(lines.iter().all(|l| l.starts_with("i,")));
}

#[test]
fn requested_capacity_five_holds_seven() {
    let probe = probe(ProbeConfig {
        bufsize: 5,
        ..ProbeConfig::default()
    });
    let admitted = (0..10)
        .map(|seq| probe.submit(&event(80, seq, 1), Direction::Outbound))
        .filter(|a| *a == Admission::Admitted)
        .count();
    assert_eq!(admitted, 7);
    assert_eq!(probe.stats().capacity, 8);
    assert_eq!(probe.stats().dropped, 3);
}

#[test]
fn concurrent_producers_keep_per_producer_order() {
    let probe = probe(ProbeConfig {
        bufsize: 1024,
        ..ProbeConfig::default()
    });
    let mut reader = probe.open();

    let producers: Vec<_> = [80u16, 443]
        .into_iter()
        .map(|port| {
            let probe = probe.clone();
            thread::spawn(move || {
                for seq in 0..200 {
                    probe.submit(&event(port, seq, 1), Direction::Outbound);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let lines = drain_lines(&mut reader);
    assert_eq!(lines.len(), 400);
    for port in ["80", "443"] {
        let seqs: Vec<u32> = lines
            .iter()
            .filter(|l| column(l, 5) == port)
            .map(|l| column(l, 15).parse().unwrap())
            .collect();
        assert_eq!(seqs, (0..200).collect::<Vec<u32>>());
    }
    // a record held back by a short read takes a new counter value when redelivered
    let counters: Vec<u32> = lines.iter().map(|l| column(l, 6).parse().unwrap()).collect();
    assert!(counters.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn blocked_reader_wakes_on_data_and_finish() {
    let probe = probe(ProbeConfig::default());
    let mut reader = probe.open();

    let consumer = thread::spawn(move || {
        // read_to_end probes with a tiny buffer when it has no spare capacity
        let mut out = Vec::with_capacity(64 * 1024);
        reader.read_to_end(&mut out).unwrap();
        out
    });

    probe.submit(&event(80, 1, 1), Direction::Outbound);
    probe.command(Command::Flush);
    // let the reader hand the record over before ending the stream
    while probe.stats().occupied > 0 {
        thread::yield_now();
    }
    probe.command(Command::Finish);

    let out = String::from_utf8(consumer.join().unwrap()).unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.starts_with("o,"));
}

#[test]
fn binary_capture_decodes_like_live_text() {
    let binary = probe(ProbeConfig {
        omode: OutputMode::Binary,
        ..ProbeConfig::default()
    });
    let text = probe(ProbeConfig::default());
    let mut binary_reader = binary.open();
    let mut text_reader = text.open();

    for seq in 0..5 {
        let e = event(80, seq * 1448, 10 + seq);
        binary.submit(&e, Direction::Outbound);
        text.submit(&e, Direction::Outbound);
    }

    let mut capture = tempfile::tempfile().unwrap();
    let mut buf = vec![0u8; RECORD_SIZE * 2];
    loop {
        binary.command(Command::Flush);
        match binary_reader.drain(&mut buf).unwrap() {
            Drain::Records(n) => capture.write_all(&buf[..n]).unwrap(),
            _ => break,
        }
    }
    assert_eq!(capture.stream_position().unwrap(), 5 * RECORD_SIZE as u64);

    capture.seek(SeekFrom::Start(0)).unwrap();
    let mut decoded = Vec::new();
    let summary = decode_stream(&mut capture, &mut decoded).unwrap();
    assert_eq!(summary.records, 5);

    let decoded = String::from_utf8(decoded).unwrap();
    let live = drain_lines(&mut text_reader);
    assert_eq!(decoded.lines().count(), live.len());

    for (d, l) in decoded.lines().zip(live.iter()) {
        let d: Vec<&str> = d.split(',').collect();
        let l: Vec<&str> = l.split(',').collect();
        // identical apart from the timestamp and the per-mode scaled columns
        // (srtt, ssthresh, snd_wnd, rcv_wnd)
        for i in [0, 2, 3, 4, 5, 6, 7, 9, 13, 14, 15, 16] {
            assert_eq!(d[i], l[i], "column {}", i);
        }
        assert_eq!(d[8], "12");
        assert_eq!(l[8], "12345");
        assert_eq!(d[10], "20");
        assert_eq!(l[10], (20 * 1448).to_string());
        assert_eq!(d[11], (64 * 1448).to_string());
        assert_eq!(l[11], "64");
    }
}

#[test]
fn decoder_reads_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.bin");

    let probe = probe(ProbeConfig {
        omode: OutputMode::Binary,
        ..ProbeConfig::default()
    });
    let mut reader = probe.open();
    probe.submit(&event(80, 7, 1), Direction::Inbound);
    probe.command(Command::Flush);
    let mut buf = vec![0u8; RECORD_SIZE];
    assert_eq!(reader.drain(&mut buf).unwrap(), Drain::Records(RECORD_SIZE));

    let mut file = File::create(&path).unwrap();
    file.write_all(&buf).unwrap();
    // half a record at the end of an interrupted capture
    file.write_all(&buf[..RECORD_SIZE / 2]).unwrap();
    drop(file);

    let mut out = Vec::new();
    let summary = decode_stream(File::open(&path).unwrap(), &mut out).unwrap();
    assert_eq!(summary.records, 1);
    let line = String::from_utf8(out).unwrap();
    assert!(line.starts_with("i,"));
    assert!(line.contains(",192.168.1.10,40000,192.168.1.20,80,0,1448,"));
}

//Streams the TCP state log of the running kernel to stdout or a file

use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use tcp_state_probe::{Command, LogReader, ProbeCollector, ProbeConfig, TcpProbe};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal, task,
};

#[derive(Parser, Debug)]
#[command(version, about = "TCP connection state logger", long_about = None)]
struct Cli {
    /// Compiled kernel-side hook object
    #[arg(long, default_value = "target/bpfel-unknown-none/release/tcp_state_probe")]
    bpf_object: PathBuf,

    /// Write the log to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log buffer counters every N seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    stats_interval: u64,

    #[command(flatten)]
    probe: ProbeConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let probe = TcpProbe::new(cli.probe)?;
    let mut collector = ProbeCollector::load(&cli.bpf_object, probe.clone())
        .with_context(|| format!("loading {}", cli.bpf_object.display()))?;
    let reader = probe.open();
    collector.start_collection().await?;

    let output = cli.output;
    let mut drain = task::spawn_blocking(move || stream_log(reader, output));

    // `flush` / `finish` lines on stdin
    let control_probe = probe.clone();
    task::spawn(async move {
        let mut control = control_probe.control();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            // the control channel never fails
            let _ = control.write_all(line.as_bytes());
        }
    });

    if cli.stats_interval > 0 {
        let stats_probe = probe.clone();
        let period = Duration::from_secs(cli.stats_interval);
        task::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let stats = stats_probe.stats();
                log::info!(
                    "[{:>4}s] buffered: {:>6}/{} | logged: {:>8} | dropped: {:>6}",
                    stats.epoch.elapsed().as_secs(),
                    stats.occupied,
                    stats.capacity - 1,
                    stats.packets,
                    stats.dropped,
                );
            }
        });
    }

    let written = tokio::select! {
        res = &mut drain => res??,
        res = signal::ctrl_c() => {
            res?;
            log::info!("interrupted, finishing the log");
            probe.command(Command::Finish);
            drain.await??
        }
    };

    let stats = probe.stats();
    log::info!(
        "wrote {} bytes, {} records logged, {} dropped",
        written,
        stats.packets,
        stats.dropped
    );
    drop(collector);
    Ok(())
}

fn stream_log(mut reader: LogReader, output: Option<PathBuf>) -> anyhow::Result<u64> {
    let mut writer: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(
            File::create(&path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let written = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(written)
}

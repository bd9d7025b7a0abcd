//Converts binary tcp probe captures to text

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use tcp_state_probe::{decode_stream, flows, guess_format, LogFormat};

#[derive(Parser, Debug)]
#[command(version, about = "Convert binary tcp probe captures to text", long_about = None)]
struct Cli {
    /// Binary capture to read (stdin when omitted)
    input: Option<PathBuf>,

    /// List the unique flows of the capture instead of decoding it
    #[arg(long)]
    flows: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let source: Box<dyn Read> = match &cli.input {
        Some(path) => {
            Box::new(File::open(path).with_context(|| format!("opening {}", path.display()))?)
        }
        None => Box::new(io::stdin().lock()),
    };
    let mut input = BufReader::new(source);

    if guess_format(input.fill_buf()?) == Some(LogFormat::Text) {
        anyhow::bail!("input is already a text log");
    }

    if cli.flows {
        for flow in flows(input)? {
            println!("{}", flow);
        }
        return Ok(());
    }

    let stdout = io::stdout();
    let summary = decode_stream(input, BufWriter::new(stdout.lock()))?;
    log::info!("decoded {} records, skipped {}", summary.records, summary.skipped);
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;
use qmstep::{Adapter, config::Config, run, summary::Summary};

/// run one quantum chemistry step for a dynamics driver
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// input file
    #[arg(value_parser, default_value_t = String::from("qmstep.toml"))]
    infile: String,

    /// Validate the input file, print the input deck that would be written,
    /// and exit without running anything. Defaults to false.
    #[arg(short, long, default_value_t = false)]
    check: bool,

    /// Write the JSON summary to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load(&args.infile)?;
    info!("{config}");

    if args.check {
        let adapter = Adapter::new(&config.qm, &config.molecule)
            .context("invalid qm options")?;
        print!("{}", adapter.preview(&config));
        return Ok(());
    }

    let (adapter, molecule) = run(&config)?;
    let summary = Summary::new(&adapter, &config, &molecule);
    let json = serde_json::to_string_pretty(&summary)?;
    match args.output {
        Some(path) => std::fs::write(&path, json + "\n").with_context(|| {
            format!("failed to write summary to {}", path.display())
        })?,
        None => println!("{json}"),
    }
    info!("normal termination of qmstep");

    Ok(())
}

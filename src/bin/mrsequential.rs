use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mrjobs::mr::partition;
use mrjobs::mrapps;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Runs an application over its inputs in one process")]
struct Args {
    /// Built-in application (wc, indexer) or path to a plugin .so.
    app: String,

    /// Input files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    #[arg(short, long, default_value = "mr-out-0")]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let app = mrapps::load(&args.app).with_context(|| format!("cannot load {}", args.app))?;

    let mut intermediate = vec![];
    for file in &args.inputs {
        let content = std::fs::read(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let name = file.to_string_lossy();
        intermediate.append(&mut (app.map)(&name, &String::from_utf8_lossy(&content)));
    }

    let mut out = BufWriter::new(
        File::create(&args.out)
            .with_context(|| format!("failed to create {}", args.out.display()))?,
    );
    let keys = partition::write_reduced(&mut out, intermediate, app.reduce)?;
    out.flush()?;
    info!(keys, out = %args.out.display(), "done");

    Ok(())
}

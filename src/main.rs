//! Worker executable: claims screening jobs and docks library slices.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

use rustdock_screen::engine::{Engine, EngineConfig};
use rustdock_screen::io::library::LigandLibrary;
use rustdock_screen::io::SliceCsv;
use rustdock_screen::job::{FsJobStore, JobStore};

/// Command-line arguments for the worker
#[derive(Parser, Debug)]
#[clap(
    name = "rustdock-screen",
    version = rustdock_screen::VERSION,
    about = "Distributed virtual-screening worker"
)]
struct Cli {
    /// Directory of JSON job documents acting as the queue
    #[clap(long, value_parser)]
    jobs_dir: PathBuf,

    /// Packed 64-bit little-endian ligand offsets
    #[clap(long, value_parser)]
    headers: PathBuf,

    /// Concatenated ligand records
    #[clap(long, value_parser)]
    ligands: PathBuf,

    /// Directory receiving one CSV per processed slice
    #[clap(long, value_parser)]
    output_dir: PathBuf,

    /// Worker threads; defaults to the machine's available parallelism
    #[clap(long)]
    threads: Option<usize>,

    /// Seed for the process RNG; random when omitted
    #[clap(long)]
    seed: Option<u64>,

    /// Seconds to sleep when the queue is empty
    #[clap(long, default_value_t = 3600)]
    idle_wait: u64,

    /// Seconds after which another worker may retake a claimed job
    #[clap(long, default_value_t = 3600)]
    claim_timeout: u64,

    /// Process at most one job, then exit
    #[clap(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let num_threads = cli.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let seed = cli.seed.unwrap_or_else(rand::random);
    info!("using random seed {seed}");

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("failed to create {}", cli.output_dir.display()))?;

    let mut engine = Engine::new(EngineConfig::default(), num_threads, seed)
        .context("failed to initialize engine")?;
    let mut store = FsJobStore::new(&cli.jobs_dir, cli.claim_timeout);

    loop {
        let job = match store.claim() {
            Ok(Some(job)) => job,
            Ok(None) => {
                if cli.once {
                    info!("queue is empty");
                    return Ok(());
                }
                info!("queue is empty, sleeping {} s", cli.idle_wait);
                std::thread::sleep(Duration::from_secs(cli.idle_wait));
                continue;
            }
            Err(e) => {
                // A transient queue failure is handled like an empty queue.
                warn!("queue unavailable: {e}, sleeping {} s", cli.idle_wait);
                std::thread::sleep(Duration::from_secs(cli.idle_wait));
                continue;
            }
        };

        info!("executing job {} slice {}", job.id, job.slice);

        let mut library = LigandLibrary::open(&cli.headers, &cli.ligands)
            .context("failed to open ligand library")?;
        let csv_path = cli
            .output_dir
            .join(format!("{}_{}.csv", job.id, job.slice));
        let mut csv = SliceCsv::create(&csv_path)
            .with_context(|| format!("failed to create {}", csv_path.display()))?;

        match engine.run_slice(&job, &mut library, &mut csv) {
            Ok(summary) => {
                csv.finish().context("failed to flush slice output")?;
                store
                    .complete(&job.id)
                    .with_context(|| format!("failed to complete job {}", job.id))?;
                info!(
                    "job {} slice {} finished: {} ligands emitted to {}",
                    job.id,
                    job.slice,
                    summary.emitted,
                    csv_path.display()
                );
            }
            Err(e) => {
                // Leave the claim to expire so another worker can retake the
                // slice, and exit cleanly.
                error!("job {} failed: {e}", job.id);
                return Err(e).context("slice execution failed");
            }
        }

        if cli.once {
            return Ok(());
        }
    }
}

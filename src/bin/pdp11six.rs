// Command-line front end: load an RK05 image, optionally resume from a
// snapshot, and run the machine against a real terminal until it halts or
// the operator interrupts it.

use clap::Parser;
use pdp11six::devices::StdioTerminal;
use pdp11six::error::{MachineError, MachineResult};
use pdp11six::processor::StepOutcome;
use pdp11six::snapshot;
use pdp11six::{Configuration, Machine};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pdp11six", about = "A PDP-11/40 core that boots Unix V6 from an RK05 image")]
struct Cli {
    /// RK05 disk image to boot from.
    disk_image: PathBuf,

    /// Resume from a previously saved snapshot instead of cold-booting.
    #[arg(long)]
    resume_from: Option<PathBuf>,

    /// Write a snapshot to this path when the machine halts.
    #[arg(long)]
    save_to: Option<PathBuf>,

    /// Stop after this many instructions even if the machine hasn't halted.
    /// Mainly useful for smoke-testing a boot image in CI.
    #[arg(long)]
    max_steps: Option<u64>,
}

fn main() -> MachineResult<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let rk05_image = std::fs::read(&cli.disk_image)?;
    if rk05_image.is_empty() {
        return Err(MachineError::DiskImageTooShort { needed: 512, actual: 0 });
    }

    let config = Configuration { rk05_image, terminal: Box::new(StdioTerminal) };
    let mut machine = Machine::new(config)?;

    if let Some(path) = &cli.resume_from {
        info!(path = %path.display(), "resuming from snapshot");
        snapshot::load_snapshot(&mut machine.cpu, path)?;
    }

    let mut steps = 0u64;
    loop {
        if let Some(max) = cli.max_steps {
            if steps >= max {
                info!(steps, "stopping after reaching the configured step limit");
                break;
            }
        }
        if machine.step() == StepOutcome::Halted {
            info!(steps, "machine halted");
            break;
        }
        steps += 1;
    }

    if let Some(path) = &cli.save_to {
        info!(path = %path.display(), "saving snapshot");
        snapshot::save_snapshot(&machine.cpu, path)?;
    }

    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use tokio::time::MissedTickBehavior;
use vigil::config::{self, Config, load_config, load_config_from_path};
use vigil::logging;
use vigil::system::collector::Collector;
use vigil::system::snapshot::SystemSnapshot;

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Samples host and per-process resource usage on a fixed interval"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sampling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many cycles (0 runs until interrupted)
    #[arg(long)]
    cycles: Option<u64>,

    /// Log JSON lines instead of plain text.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Print every snapshot to stdout as one JSON line.
    #[arg(long, default_value_t = false)]
    emit: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);

    logging::init(&config.logging).map_err(|e| eyre!("failed to set tracing subscriber: {e}"))?;

    if config.general.interval_ms == 0 {
        return Err(eyre!("--interval-ms must be greater than 0"));
    }

    let mut collector = match Collector::new(config.collector.process_detail) {
        Ok(collector) => collector,
        Err(e) => {
            tracing::error!(error = %e, "host initialization failed, not starting");
            return Err(e.into());
        }
    };
    tracing::info!(
        interval_ms = config.general.interval_ms,
        process_detail = collector.capability().can_read_process_detail,
        "monitoring started"
    );

    run(&mut collector, &config.general, cli.emit).await
}

async fn run(collector: &mut Collector, general: &config::GeneralConfig, emit: bool) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(general.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut completed = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!(cycles = completed, "interrupted, stopping");
                break;
            }
        }

        // Enumeration failures are logged by the collector; the cycle is
        // simply skipped.
        if let Ok(snapshot) = collector.sample() {
            log_summary(&snapshot);
            if emit {
                println!("{}", serde_json::to_string(&snapshot)?);
            }
        }

        completed += 1;
        if general.cycles != 0 && completed >= general.cycles {
            break;
        }
    }

    Ok(())
}

fn log_summary(snapshot: &SystemSnapshot) {
    let system = &snapshot.system;
    let zombies = snapshot.processes.iter().filter(|p| p.is_zombie).count();
    tracing::info!(
        processes = snapshot.processes.len(),
        zombies,
        cpu_user_permille = system.cpu.user_permille,
        cpu_system_permille = system.cpu.system_permille,
        cpu_wait_permille = system.cpu.wait_permille,
        used_memory_kib = system.memory.map(|m| m.used_memory_kib),
        used_swap_kib = system.memory.map(|m| m.used_swap_kib),
        load_1m = system.load_average[0],
        "cycle"
    );
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(interval) = cli.interval_ms {
        config.general.interval_ms = interval;
    }
    if let Some(cycles) = cli.cycles {
        config.general.cycles = cycles;
    }
    if cli.json_logs {
        config.logging.json = true;
    }

    config
}

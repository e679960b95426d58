use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{Level, info};

use wifi_lab_abstract::{ConfigOverride, ExperimentConfig, ScenarioFile};
use wifi_lab_simulator::{Experiment, ExperimentReport};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dense Wi-Fi throughput experiment")]
struct Args {
    /// Load an experiment description (and optional `[[runs]]` sweep) from TOML.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Number of wireless stations, one flow each.
    #[arg(long)]
    stations: Option<usize>,

    /// Sampling interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop time in milliseconds.
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Per-flow byte budget; 0 means unbounded.
    #[arg(long)]
    max_bytes: Option<u64>,

    #[arg(long)]
    loss_rate: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,

    /// Directory receiving one `<label> Average Throughput.txt` per run.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Write a JSON trace of every finished run.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.quiet);
    info!("wifi-lab-sim-cli starting…");

    let runs = match &args.scenario {
        Some(path) => {
            let scenario = load_scenario(path)?;
            info!("Loaded scenario '{}': {}", scenario.name, scenario.description);
            scenario.expand_runs()
        }
        None => vec![("default".to_string(), ExperimentConfig::default())],
    };

    let overrides = args.overrides();
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create output directory {}", args.out_dir.display()))?;

    let mut reports = Vec::with_capacity(runs.len());
    for (label, mut config) in runs {
        overrides.apply_to(&mut config);
        let report = run_one(&args.out_dir, &label, config)?;
        report.print_summary();
        reports.push(report);
    }

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &reports)?;
    }

    Ok(())
}

impl Args {
    /// Command-line values win over whatever the scenario file set.
    fn overrides(&self) -> ConfigOverride {
        ConfigOverride {
            stations: self.stations,
            sample_interval_ms: self.interval_ms,
            duration_ms: self.duration_ms,
            max_bytes: self.max_bytes,
            loss_rate: self.loss_rate,
            seed: self.seed,
            ..Default::default()
        }
    }
}

fn init_logging(quiet: bool) {
    if quiet {
        tracing_subscriber::fmt().with_max_level(Level::WARN).init();
    } else {
        tracing_subscriber::fmt::init();
    }
}

fn run_one(out_dir: &Path, label: &str, config: ExperimentConfig) -> Result<ExperimentReport> {
    let path = out_dir.join(format!("{label} Average Throughput.txt"));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create measurement file {}", path.display()))?;

    info!("Run '{}' writing samples to {}", label, path.display());
    let report = Experiment::new(config)
        .with_context(|| format!("Invalid configuration for run '{label}'"))?
        .with_label(label)
        .with_output(BufWriter::new(file))
        .run_to_completion()
        .with_context(|| format!("Run '{label}' failed"))?;
    Ok(report)
}

fn load_scenario(path: &Path) -> Result<ScenarioFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: ScenarioFile =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

fn write_trace(path: &Path, reports: &[ExperimentReport]) -> Result<()> {
    let data = serde_json::to_vec_pretty(reports).context("Failed to serialize experiment trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_scenario_parses_into_runs() {
        let scenario: ScenarioFile =
            toml::from_str(include_str!("../../../scenarios/rate-sweep.toml")).unwrap();
        let runs = scenario.expand_runs();

        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].0, "DSSS 1Mbps");
        assert_eq!(runs[0].1.wifi.data_rate_bps, 1_000_000);
        assert_eq!(runs[2].1.wifi.seed, 7);
        assert_eq!(runs[1].1.flows.len(), 2);
        for (_, config) in &runs {
            config.validate().unwrap();
        }
    }

    #[test]
    fn cli_flags_override_scenario_values() {
        let args = Args::parse_from(["wifi-lab-sim-cli", "--stations", "3", "--seed", "9"]);
        let mut config = ExperimentConfig::default();
        args.overrides().apply_to(&mut config);

        assert_eq!(config.stations, 3);
        assert_eq!(config.wifi.seed, 9);
        assert_eq!(config.duration_ms, ExperimentConfig::default().duration_ms);
    }
}

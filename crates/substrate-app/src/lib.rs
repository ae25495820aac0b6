//! Command-line plumbing for running substrate universes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use substrate_core::{Int, NullSink, SnapshotSink, TickSummary, Universe, UniverseConfig};
use substrate_storage::SnapshotPipeline;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "substrate",
    version,
    about = "Run a deterministic substrate universe for a fixed tick budget"
)]
pub struct Cli {
    /// Number of ticks to run.
    #[arg(long, conflicts_with = "until", required_unless_present = "until")]
    pub ticks: Option<u64>,
    /// Run every tick up to and including this one.
    #[arg(long)]
    pub until: Option<Int>,
    /// JSON file holding a universe configuration; flags below override it.
    #[arg(long, env = "SUBSTRATE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Lattice dimensionality.
    #[arg(long)]
    pub dimensions: Option<usize>,
    /// Worker threads (defaults to available parallelism).
    #[arg(long, env = "SUBSTRATE_WORKERS")]
    pub workers: Option<usize>,
    /// Momentum cost of the seed entity.
    #[arg(long)]
    pub seed_cost: Option<u64>,
    /// Export a snapshot every K ticks.
    #[arg(long, requires = "snapshot_path")]
    pub snapshot_every: Option<u64>,
    /// JSON-lines file receiving snapshots.
    #[arg(long, env = "SUBSTRATE_SNAPSHOT_PATH")]
    pub snapshot_path: Option<PathBuf>,
}

/// How far a run should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickBudget {
    Ticks(u64),
    Until(Int),
}

impl Cli {
    pub fn budget(&self) -> Result<TickBudget> {
        match (&self.ticks, &self.until) {
            (Some(ticks), None) => Ok(TickBudget::Ticks(*ticks)),
            (None, Some(until)) => Ok(TickBudget::Until(until.clone())),
            _ => bail!("exactly one of --ticks or --until is required"),
        }
    }

    /// Resolve the configuration: file (or defaults) first, then flag overrides.
    pub fn universe_config(&self) -> Result<UniverseConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => UniverseConfig::default(),
        };
        if let Some(dimensions) = self.dimensions {
            config.dimensions = dimensions;
        }
        if let Some(workers) = self.workers {
            config.worker_threads = Some(workers);
        }
        if let Some(seed_cost) = self.seed_cost {
            config.seed_cost = seed_cost;
        }
        if let Some(interval) = self.snapshot_every {
            config.snapshot_interval = interval;
        }
        config.validate().context("invalid universe configuration")?;
        if config.snapshot_interval > 0 && self.snapshot_path.is_none() {
            bail!(
                "snapshot_interval is {} but no --snapshot-path was given",
                config.snapshot_interval
            );
        }
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<UniverseConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

/// Build the universe described by `cli`, run its budget and return the last summary.
pub fn run(cli: &Cli) -> Result<Option<TickSummary>> {
    let config = cli.universe_config()?;
    let budget = cli.budget()?;
    let sink: Box<dyn SnapshotSink> = match &cli.snapshot_path {
        Some(path) if config.snapshot_interval > 0 => Box::new(
            SnapshotPipeline::new(path)
                .with_context(|| format!("failed to open snapshot file {}", path.display()))?,
        ),
        _ => Box::new(NullSink),
    };

    let mut universe = Universe::with_sink(config, sink).context("failed to create universe")?;
    match &budget {
        TickBudget::Ticks(ticks) => universe.run_ticks(*ticks),
        TickBudget::Until(last) => universe.run_until(last),
    }
    .with_context(|| format!("universe halted at tick {}", universe.tick()))?;
    Ok(universe.history().last().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("substrate").chain(args.iter().copied()))
            .expect("arguments")
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("universe.json");
        fs::write(&path, r#"{"dimensions": 3, "seed_cost": 9, "rigidity": 4}"#).expect("write");
        let cli = parse(&[
            "--ticks",
            "5",
            "--config",
            path.to_str().expect("utf8"),
            "--seed-cost",
            "2",
        ]);
        let config = cli.universe_config().expect("config");
        assert_eq!(config.dimensions, 3);
        assert_eq!(config.seed_cost, 2);
        assert_eq!(config.rigidity, 4);
        assert_eq!(config.history_capacity, UniverseConfig::default().history_capacity);
    }

    #[test]
    fn budget_requires_exactly_one_directive() {
        assert_eq!(parse(&["--ticks", "3"]).budget().expect("budget"), TickBudget::Ticks(3));
        assert_eq!(
            parse(&["--until", "100000000000000000000000"]).budget().expect("budget"),
            TickBudget::Until("100000000000000000000000".parse().expect("int"))
        );
        assert!(Cli::try_parse_from(["substrate"]).is_err());
        assert!(Cli::try_parse_from(["substrate", "--ticks", "1", "--until", "2"]).is_err());
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = parse(&["--ticks", "1", "--dimensions", "9"]);
        assert!(cli.universe_config().is_err());
    }

    #[test]
    fn snapshot_interval_requires_a_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("universe.json");
        fs::write(&path, r#"{"snapshot_interval": 10}"#).expect("write");
        let cli = parse(&["--ticks", "5", "--config", path.to_str().expect("utf8")]);
        let err = cli.universe_config().expect_err("no snapshot path");
        assert!(err.to_string().contains("--snapshot-path"));
        assert!(run(&cli).is_err());

        let snapshots = dir.path().join("out.jsonl");
        let cli = parse(&[
            "--ticks",
            "5",
            "--config",
            path.to_str().expect("utf8"),
            "--snapshot-path",
            snapshots.to_str().expect("utf8"),
        ]);
        assert_eq!(cli.universe_config().expect("config").snapshot_interval, 10);
    }

    #[test]
    fn run_reports_the_last_tick() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshots = dir.path().join("run.jsonl");
        let cli = parse(&[
            "--until",
            "6",
            "--workers",
            "2",
            "--snapshot-every",
            "3",
            "--snapshot-path",
            snapshots.to_str().expect("utf8"),
        ]);
        let summary = run(&cli).expect("run").expect("summary");
        assert_eq!(summary.tick, Int::from(6));
        assert_eq!(summary.population, 1);
        let records = substrate_storage::read_records(&snapshots).expect("records");
        assert_eq!(records.len(), 2);
    }
}

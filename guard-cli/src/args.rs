use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "guard", about = "Coordinates Istio control-plane upgrades across a cluster fleet")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit structured JSON logs instead of the default human-readable format
    #[arg(long, global = true, env = "GUARD_JSON_LOGS")]
    pub json_logs: bool,

    /// JSON file of cluster descriptors backing the in-memory registry for this invocation
    #[arg(long, global = true, env = "GUARD_FIXTURES", default_value = "clusters.json")]
    pub fixtures: String,

    /// Path to a config file overriding the default `~/.guard/config.json` lookup
    #[arg(long, global = true, env = "GUARD_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or dry-run) the upgrade pipeline for every cluster in a batch
    Run(RunArgs),
    /// Poll a batch's clusters until every one reaches a terminal status
    Monitor(MonitorArgs),
    /// Create an emergency rollback merge request for one cluster
    Rollback(RollbackArgs),
    /// List the clusters registered under a batch, or all clusters
    List(ListArgs),
    /// Validate a HelmRelease YAML file without touching any remote
    Validate(ValidateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Batch identifier to run; falls back to `default_batch_id` in the config file if omitted
    pub batch: Option<String>,

    /// Istio version to upgrade the batch's clusters to
    #[arg(long = "target-version")]
    pub target_version: String,

    /// Stop after opening the upgrade merge request, skipping reconciliation and validation
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of clusters to run concurrently
    #[arg(long = "max-concurrent", default_value_t = 5)]
    pub max_concurrent: usize,

    /// Soak period (minutes) between restart and metric validation
    #[arg(long = "soak-period", default_value_t = 5)]
    pub soak_period: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct MonitorArgs {
    /// Batch identifier to watch; falls back to `default_batch_id` in the config file if omitted
    pub batch: Option<String>,

    /// Seconds between re-reading the fixtures file
    #[arg(long = "poll-interval", default_value_t = 10)]
    pub poll_interval_sec: u64,

    /// Overall timeout in seconds before giving up on the batch settling
    #[arg(long = "timeout", default_value_t = 1800)]
    pub timeout_sec: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct RollbackArgs {
    /// Cluster identifier to roll back
    pub cluster: String,

    /// Istio version to roll back to
    #[arg(long = "to-version")]
    pub to_version: String,

    /// Human-readable reason recorded on the rollback merge request
    pub reason: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Restrict the listing to one batch; omit to list every registered cluster
    pub batch: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Path to a HelmRelease YAML file
    pub path: String,
}

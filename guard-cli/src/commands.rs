use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use guard_common::config::FileConfig;
use guard_core::providers::fakes::{FakeCloudProvider, FakeGitOpsProvider, FakeKubernetesProvider, FakeMetricsProvider};
use guard_core::providers::{Condition, NodeInfo};
use guard_core::{config_editor, BatchRunner, BatchRunnerConfig, DistributedLock, InMemoryDistributedLock, RollbackProducer, StateStore};
use guard_types::{BatchRunSummary, ClusterConfig, ClusterOutcome, ClusterStatus, ValidationThresholds};
use owo_colors::OwoColorize;

use crate::args::{ListArgs, MonitorArgs, RollbackArgs, RunArgs, ValidateArgs};
use crate::fixtures::load_state_store;

pub async fn run_batch(args: RunArgs, fixtures_path: &str, file_config: &FileConfig) -> Result<()> {
    let batch = resolve_batch(args.batch.clone(), file_config)?;
    let state_store = load_state_store(fixtures_path).await?;
    let clusters = state_store.query_by_batch(&batch).await?;
    if clusters.is_empty() {
        println!("{}", format!("no clusters registered under batch '{batch}'").yellow());
        return Ok(());
    }

    let kubernetes = Arc::new(demo_kubernetes_provider());
    let cloud = Arc::new(FakeCloudProvider::default());
    let gitops_provider = Arc::new(FakeGitOpsProvider::default());
    seed_gitops_provider(&gitops_provider, &clusters);
    let metrics = Arc::new(FakeMetricsProvider::default());
    let lock: Arc<dyn DistributedLock> = Arc::new(InMemoryDistributedLock::new());

    let config = BatchRunnerConfig {
        max_concurrent: args.max_concurrent,
        soak_period_minutes: args.soak_period,
        ..BatchRunnerConfig::default()
    };

    let runner = BatchRunner::standard(
        kubernetes,
        cloud,
        gitops_provider,
        metrics,
        state_store,
        lock,
        ValidationThresholds::default(),
        config,
    );

    let cancel = tokio_util::sync::CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    let shutdown = tokio::spawn(async move {
        guard_common::shutdown::shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    let outcomes = runner.run_batch_with_cancellation(&batch, &args.target_version, args.dry_run, cancel).await;
    shutdown.abort();

    print_outcomes(&outcomes);

    let summary = BatchRunSummary::from_outcomes(&outcomes);
    if summary.any_failed() {
        anyhow::bail!("batch '{batch}' finished with {} cluster(s) in a failed state", outcomes.len() - summary.succeeded());
    }
    Ok(())
}

pub async fn monitor_batch(args: MonitorArgs, fixtures_path: &str, file_config: &FileConfig) -> Result<()> {
    let batch = resolve_batch(args.batch.clone(), file_config)?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_sec);

    loop {
        let state_store = load_state_store(fixtures_path).await?;
        let clusters = state_store.query_by_batch(&batch).await?;
        if clusters.is_empty() {
            println!("{}", format!("no clusters registered under batch '{batch}'").yellow());
            return Ok(());
        }

        print_status_table(&clusters);
        if clusters.iter().all(|c| c.status.is_terminal()) {
            println!("{}", "batch reached a terminal state for every cluster".green());
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out after {}s waiting for batch '{batch}' to settle", args.timeout_sec);
        }
        tokio::time::sleep(Duration::from_secs(args.poll_interval_sec)).await;
    }
}

fn resolve_batch(explicit: Option<String>, config: &FileConfig) -> Result<String> {
    explicit
        .or_else(|| config.default_batch_id.clone())
        .context("no batch given and no default_batch_id set in the config file")
}

pub async fn rollback_cluster(args: RollbackArgs, fixtures_path: &str) -> Result<()> {
    let state_store = load_state_store(fixtures_path).await?;
    let cluster = state_store
        .get(&args.cluster)
        .await?
        .with_context(|| format!("cluster '{}' not found in '{fixtures_path}'", args.cluster))?;

    let gitops_provider = Arc::new(FakeGitOpsProvider::default());
    seed_gitops_provider(&gitops_provider, std::slice::from_ref(&cluster));
    let producer = RollbackProducer::new(gitops_provider);

    let mr = producer
        .create_rollback_mr_simple(&cluster, &args.to_version, &args.reason)
        .await
        .context("failed to create rollback merge request")?;

    println!("{}", "rollback merge request created:".bold());
    println!("  title:  {}", mr.title);
    println!("  branch: {}", mr.source_branch);
    println!("  url:    {}", mr.web_url);
    Ok(())
}

pub async fn list_clusters(args: ListArgs, fixtures_path: &str) -> Result<()> {
    let state_store = load_state_store(fixtures_path).await?;
    let clusters = match &args.batch {
        Some(batch) => state_store.query_by_batch(batch).await?,
        None => state_store.list_all().await?,
    };
    if clusters.is_empty() {
        println!("{}", "no clusters registered".yellow());
        return Ok(());
    }
    print_status_table(&clusters);
    Ok(())
}

pub async fn validate_config(args: ValidateArgs) -> Result<()> {
    let (ok, errors) = config_editor::validate_config(&args.path)?;
    if ok {
        let version = config_editor::get_current_version(&args.path)?;
        println!("{}", format!("'{}' is a valid HelmRelease at version {version}", args.path).green());
        Ok(())
    } else {
        println!("{}", format!("'{}' failed validation:", args.path).red());
        for error in &errors {
            println!("  - {error}");
        }
        anyhow::bail!("{} structural error(s) found in '{}'", errors.len(), args.path);
    }
}

fn demo_kubernetes_provider() -> FakeKubernetesProvider {
    let provider = FakeKubernetesProvider::default();
    provider.nodes.lock().unwrap().push(NodeInfo {
        name: "demo-node-1".to_string(),
        conditions: vec![Condition::ready_true()],
    });
    provider
}

fn seed_gitops_provider(provider: &FakeGitOpsProvider, clusters: &[ClusterConfig]) {
    let mut files = provider.files.lock().unwrap();
    for cluster in clusters {
        let key = (cluster.gitlab_repo.clone(), cluster.flux_config_path.clone(), "main".to_string());
        files.entry(key).or_insert_with(|| {
            format!(
                "apiVersion: helm.toolkit.fluxcd.io/v2\nkind: HelmRelease\nmetadata:\n  name: istiod\nspec:\n  chart:\n    spec:\n      version: \"{}\"\n",
                config_editor::strip_v_prefix(&cluster.current_istio_version),
            )
        });
    }
}

fn print_outcomes(outcomes: &[ClusterOutcome]) {
    println!("{}", "cluster upgrade results:".bold());
    for outcome in outcomes {
        let line = format!("  {:<24} {}", outcome.cluster_id, outcome.status);
        match outcome.status {
            ClusterStatus::Healthy | ClusterStatus::DryRunSuccess => println!("{}", line.green()),
            ClusterStatus::Error | ClusterStatus::PreCheckFailed => println!("{}", line.red()),
            _ => println!("{}", line.yellow()),
        }
        if let Some(error) = &outcome.error {
            println!("    {}", error.dimmed());
        }
    }
}

fn print_status_table(clusters: &[ClusterConfig]) {
    println!("{}", "batch status:".bold());
    for cluster in clusters {
        let line = format!("  {:<24} {}", cluster.cluster_id, cluster.status);
        match cluster.status {
            ClusterStatus::Healthy => println!("{}", line.green()),
            ClusterStatus::PreCheckFailed | ClusterStatus::Error => println!("{}", line.red()),
            _ => println!("{}", line.yellow()),
        }
    }
}

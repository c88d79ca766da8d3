//! Error taxonomy. Each capability gets its own `thiserror` enum so a
//! caller can match on the precise failure mode; [`GuardError`] is the
//! narrowing used at the per-cluster task boundary (§7 "escape paths").

use guard_types::InvalidFieldPath;

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("backend error reading/writing cluster '{cluster_id}': {message}")]
    Backend { cluster_id: String, message: String },
    #[error("cluster '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LockAcquisitionError {
    #[error("lock for '{resource_id}' is held by another owner")]
    Held { resource_id: String },
    #[error("timed out waiting {wait_timeout_sec}s for lock '{resource_id}'")]
    WaitTimeout {
        resource_id: String,
        wait_timeout_sec: u64,
    },
    #[error("owner/fencing-token mismatch releasing or extending lock '{resource_id}'")]
    OwnerMismatch { resource_id: String },
    #[error("backend error on lock '{resource_id}': {message}")]
    Backend { resource_id: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigUpdaterError {
    #[error("config file '{path}' is empty or not valid YAML: {message}")]
    InvalidYaml { path: String, message: String },
    #[error("config file '{path}' is missing required structural key '{key}'")]
    MissingStructuralKey { path: String, key: String },
    #[error("invalid field path: {0}")]
    InvalidPath(#[from] InvalidFieldPath),
    #[error("path '{path}' in '{file}': intermediate key '{segment}' is missing and create_missing is false")]
    MissingIntermediateKey {
        file: String,
        path: String,
        segment: String,
    },
    #[error("path '{path}' in '{file}': segment '{segment}' is not a mapping")]
    NonMappingSegment {
        file: String,
        path: String,
        segment: String,
    },
    #[error("failed to write backup of '{path}': {message}")]
    BackupIo { path: String, message: String },
    #[error("io error on '{path}': {message}")]
    Io { path: String, message: String },
    #[error("file '{0}' is not supported (not a HelmRelease YAML document)")]
    UnsupportedFile(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GitOpsProviderError {
    #[error("gitops host error for {repo}@{path}: {message}")]
    Remote {
        repo: String,
        path: String,
        message: String,
    },
    #[error("branch '{0}' already exists")]
    BranchExists(String),
    #[error(transparent)]
    ConfigUpdater(#[from] ConfigUpdaterError),
}

#[derive(Debug, thiserror::Error)]
#[error("partial failure: {} of {} groups failed", failed_keys.len(), successful_keys.len() + failed_keys.len())]
pub struct PartialFailureError {
    pub successful_items: std::collections::HashMap<String, guard_types::MergeRequestInfo>,
    pub failed_items: std::collections::HashMap<String, String>,
    pub errors: Vec<String>,
    pub successful_keys: Vec<String>,
    pub failed_keys: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsProviderError {
    #[error("metrics provider failed for metric '{metric}': {message}")]
    Query { metric: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum KubernetesProviderError {
    #[error("kubernetes API error: {0}")]
    Api(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CloudProviderError {
    #[error("cloud provider error: {0}")]
    Api(String),
}

/// Top-level error a per-cluster pipeline task can fail with; this is the
/// boundary past which every error becomes a `ClusterOutcome::errored`
/// record rather than propagating to sibling tasks.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
    #[error(transparent)]
    LockAcquisition(#[from] LockAcquisitionError),
    #[error(transparent)]
    ConfigUpdater(#[from] ConfigUpdaterError),
    #[error(transparent)]
    GitOpsProvider(#[from] GitOpsProviderError),
    #[error(transparent)]
    PartialFailure(#[from] PartialFailureError),
    #[error(transparent)]
    MetricsProvider(#[from] MetricsProviderError),
    #[error(transparent)]
    KubernetesProvider(#[from] KubernetesProviderError),
    #[error(transparent)]
    CloudProvider(#[from] CloudProviderError),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("precheck failed: {0}")]
    PreCheckFailed(String),
    #[error("{0}")]
    Other(String),
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable record produced by a pre-flight [`Check`](trait.Check.html)
/// (the trait itself lives in `guard-core`, which is the only crate that
/// needs to depend on the capability interfaces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            metrics: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            metrics: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

/// Immutable record produced by a post-upgrade
/// [`Validator`](trait.Validator.html).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub violations: Vec<String>,
    pub cluster_id: String,
}

impl ValidationResult {
    pub fn new(name: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: String::new(),
            metrics: HashMap::new(),
            timestamp: Utc::now(),
            violations: Vec::new(),
            cluster_id: cluster_id.into(),
        }
    }

    pub fn fail(name: impl Into<String>, cluster_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            metrics: HashMap::new(),
            timestamp: Utc::now(),
            violations: Vec::new(),
            cluster_id: cluster_id.into(),
        }
    }

    pub fn push_violation(&mut self, violation: impl Into<String>) {
        self.passed = false;
        self.violations.push(violation.into());
    }
}

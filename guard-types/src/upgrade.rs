use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

#[derive(Debug, thiserror::Error)]
#[error("invalid field path '{0}': must not contain consecutive dots, leading/trailing dots, or empty parts")]
pub struct InvalidFieldPath(pub String);

/// A single dotted-path update to apply to a config document.
///
/// `path` is validated against `^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$`
/// at construction time, not at every call site downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawFieldUpdate")]
pub struct FieldUpdate {
    path: String,
    pub value: Value,
    /// Supplemented from the original Python source's `create_missing`
    /// parameter: when `false` (the default), a missing intermediate key
    /// along `path` is a hard failure rather than silent creation.
    pub create_missing: bool,
}

impl FieldUpdate {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Result<Self, InvalidFieldPath> {
        let path = path.into();
        Self::validate_path(&path)?;
        Ok(Self {
            path,
            value: value.into(),
            create_missing: false,
        })
    }

    pub fn with_create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn validate_path(path: &str) -> Result<(), InvalidFieldPath> {
        if PATH_RE.is_match(path) {
            Ok(())
        } else {
            Err(InvalidFieldPath(path.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct RawFieldUpdate {
    path: String,
    value: Value,
    #[serde(default)]
    create_missing: bool,
}

impl TryFrom<RawFieldUpdate> for FieldUpdate {
    type Error = InvalidFieldPath;

    fn try_from(raw: RawFieldUpdate) -> Result<Self, Self::Error> {
        FieldUpdate::validate_path(&raw.path)?;
        Ok(FieldUpdate {
            path: raw.path,
            value: raw.value,
            create_missing: raw.create_missing,
        })
    }
}

/// Target version plus the set of field edits to make in order to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeSpec {
    pub version: String,
    pub updates: Vec<FieldUpdate>,
}

impl UpgradeSpec {
    pub fn new(version: impl Into<String>, updates: Vec<FieldUpdate>) -> Self {
        Self {
            version: version.into(),
            updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dotted_paths() {
        assert!(FieldUpdate::new("spec.chart.spec.version", "1.20.0").is_ok());
        assert!(FieldUpdate::new("a_b.c1.D", "x").is_ok());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(FieldUpdate::new("", "x").is_err());
        assert!(FieldUpdate::new(".leading", "x").is_err());
        assert!(FieldUpdate::new("trailing.", "x").is_err());
        assert!(FieldUpdate::new("a..b", "x").is_err());
        assert!(FieldUpdate::new("1starts.with.digit", "x").is_err());
    }
}

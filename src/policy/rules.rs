//! Policy file schema and compiled rule sets.
//!
//! ```yaml
//! policies:
//!   - name: night_bark
//!     description: Dog barking at night
//!     condition: "label == 'Bark' and confidence > 0.6 and is_night"
//!     actions: [record_evidence, alert_notify]
//!     cooldown_seconds: 120
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::expr::{ExprError, Expr};
use crate::domain::ActionTag;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Duplicate policy name: {0}")]
    DuplicateName(String),

    #[error("Policy '{name}' has an invalid condition: {source}")]
    Condition {
        name: String,
        #[source]
        source: ExprError,
    },

    #[error("Policy name must not be empty")]
    EmptyName,

    #[error("Policy '{name}' has an invalid cooldown_seconds: {value}")]
    Cooldown { name: String, value: f64 },
}

/// Raw policy file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: Vec<RuleEntry>,
}

/// One rule as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub condition: String,

    #[serde(default)]
    pub actions: Vec<ActionTag>,

    /// Fire even while privacy mode is active
    #[serde(default)]
    pub ignore_privacy: bool,

    /// Overrides the global alert cooldown for this rule
    #[serde(default)]
    pub cooldown_seconds: Option<f64>,
}

/// A rule with its condition compiled
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub name: String,
    pub description: Option<String>,
    pub condition_source: String,
    pub condition: Expr,
    pub actions: BTreeSet<ActionTag>,
    pub ignore_privacy: bool,
    pub cooldown: Option<Duration>,
}

impl PolicyRule {
    pub fn compile(entry: RuleEntry) -> Result<Self, PolicyError> {
        if entry.name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }

        let cooldown = match entry.cooldown_seconds {
            Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|_| PolicyError::Cooldown {
                name: entry.name.clone(),
                value: secs,
            })?),
            None => None,
        };

        let condition = Expr::compile(&entry.condition).map_err(|source| PolicyError::Condition {
            name: entry.name.clone(),
            source,
        })?;

        Ok(Self {
            name: entry.name,
            description: entry.description,
            condition_source: entry.condition,
            condition,
            actions: entry.actions.into_iter().collect(),
            ignore_privacy: entry.ignore_privacy,
            cooldown,
        })
    }
}

/// An immutable, fully compiled set of rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<PolicyRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PolicyError> {
        // An empty document is an empty rule set
        let file: PolicyFile = serde_yaml::from_str::<Option<PolicyFile>>(content)?.unwrap_or_default();
        Self::compile(file.policies)
    }

    pub fn compile(entries: Vec<RuleEntry>) -> Result<Self, PolicyError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(entries.len());

        for entry in entries {
            if !seen.insert(entry.name.clone()) {
                return Err(PolicyError::DuplicateName(entry.name));
            }
            rules.push(PolicyRule::compile(entry)?);
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

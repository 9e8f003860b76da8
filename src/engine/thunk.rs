// ABOUTME: Thunk descriptors for deferred units of work addressed to worker roles
// ABOUTME: Handles thunk construction, emission stamping, and the per-run emission log

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub type ThunkId = String;

fn new_thunk_id() -> ThunkId {
    uuid::Uuid::new_v4().to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThunkKind {
    Compute,
    Effect,
    Reduce,
    Orchestrate,
    Custom,
}

/// An immutable descriptor of one deferred unit of work.
///
/// Thunks are never modified after construction. Retrying work means emitting
/// a new thunk; emission itself produces a fresh copy stamped with a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thunk {
    #[serde(default = "new_thunk_id")]
    pub id: ThunkId,
    pub kind: ThunkKind,
    pub target_role: String,
    #[serde(default)]
    pub operation: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub dependencies: IndexSet<ThunkId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry_budget: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<ThunkId>,
}

/// Parameters for emitting a thunk that does not belong to a declared step.
#[derive(Debug, Clone, PartialEq)]
pub struct ThunkSpec {
    pub kind: ThunkKind,
    pub target_role: String,
    pub operation: HashMap<String, serde_json::Value>,
    pub dependencies: Vec<ThunkId>,
    pub priority: i32,
    pub timeout: Duration,
}

impl Thunk {
    pub fn new(kind: ThunkKind, target_role: impl Into<String>) -> Self {
        Self {
            id: new_thunk_id(),
            kind,
            target_role: target_role.into(),
            operation: HashMap::new(),
            dependencies: IndexSet::new(),
            priority: 0,
            timeout: default_timeout(),
            retry_budget: 0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            emitted_by: None,
            origin_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ThunkId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_operation(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.operation.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, thunk_id: impl Into<ThunkId>) -> Self {
        self.dependencies.insert(thunk_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a freshly stamped thunk from emission parameters.
    pub fn from_spec(spec: ThunkSpec, engine_id: &str) -> Self {
        Self {
            id: new_thunk_id(),
            kind: spec.kind,
            target_role: spec.target_role,
            operation: spec.operation,
            dependencies: spec.dependencies.into_iter().collect(),
            priority: spec.priority,
            timeout: spec.timeout,
            retry_budget: 0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            emitted_by: Some(engine_id.to_string()),
            origin_id: None,
        }
    }

    /// Produce the emitted form of a declared thunk.
    ///
    /// The copy gets a fresh id and emission time and records the declared id
    /// as its origin. Dependencies are carried as declared.
    pub fn stamp(&self, engine_id: &str) -> Self {
        Self {
            id: new_thunk_id(),
            created_at: Utc::now(),
            emitted_by: Some(engine_id.to_string()),
            origin_id: Some(self.id.clone()),
            ..self.clone()
        }
    }

    /// Key the dispatch layer routes on.
    pub fn dispatch_key(&self) -> (ThunkKind, &str) {
        (self.kind, &self.target_role)
    }
}

impl ThunkSpec {
    pub fn new(kind: ThunkKind, target_role: impl Into<String>) -> Self {
        Self {
            kind,
            target_role: target_role.into(),
            operation: HashMap::new(),
            dependencies: Vec::new(),
            priority: 0,
            timeout: default_timeout(),
        }
    }

    pub fn with_operation(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.operation.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, thunk_id: impl Into<ThunkId>) -> Self {
        self.dependencies.push(thunk_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Thunks emitted during one workflow run, in emission order.
#[derive(Debug, Default)]
pub struct EmissionLog {
    enabled: bool,
    thunks: Vec<Thunk>,
}

impl EmissionLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            thunks: Vec::new(),
        }
    }

    pub fn record(&mut self, thunks: impl IntoIterator<Item = Thunk>) {
        if self.enabled {
            self.thunks.extend(thunks);
        }
    }

    pub fn len(&self) -> usize {
        self.thunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }

    pub fn into_thunks(self) -> Vec<Thunk> {
        self.thunks
    }
}

impl std::fmt::Display for ThunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThunkKind::Compute => write!(f, "compute"),
            ThunkKind::Effect => write!(f, "effect"),
            ThunkKind::Reduce => write!(f, "reduce"),
            ThunkKind::Orchestrate => write!(f, "orchestrate"),
            ThunkKind::Custom => write!(f, "custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_keeps_descriptor_and_records_origin() {
        let declared = Thunk::new(ThunkKind::Compute, "calculator")
            .with_id("add")
            .with_operation("op", json!("add"))
            .with_dependency("load")
            .with_priority(5);

        let emitted = declared.stamp("engine-1");

        assert_ne!(emitted.id, declared.id);
        assert_eq!(emitted.origin_id.as_deref(), Some("add"));
        assert_eq!(emitted.emitted_by.as_deref(), Some("engine-1"));
        assert_eq!(emitted.operation, declared.operation);
        assert_eq!(emitted.priority, 5);
        assert!(emitted.dependencies.contains("load"));
        assert!(declared.emitted_by.is_none());
    }

    #[test]
    fn test_dependencies_are_an_ordered_set() {
        let thunk = Thunk::new(ThunkKind::Effect, "writer")
            .with_dependency("b")
            .with_dependency("a")
            .with_dependency("b");

        let deps: Vec<&str> = thunk.dependencies.iter().map(|d| d.as_str()).collect();
        assert_eq!(deps, vec!["b", "a"]);
    }

    #[test]
    fn test_disabled_emission_log_drops_thunks() {
        let mut log = EmissionLog::new(false);
        log.record(vec![Thunk::new(ThunkKind::Reduce, "reducer")]);
        assert!(log.is_empty());

        let mut log = EmissionLog::new(true);
        log.record(vec![Thunk::new(ThunkKind::Reduce, "reducer")]);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_thunk_yaml_defaults() {
        let yaml = r#"
id: t1
kind: orchestrate
target_role: scheduler
timeout: 30s
"#;
        let thunk: Thunk = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(thunk.kind, ThunkKind::Orchestrate);
        assert_eq!(thunk.timeout, Duration::from_secs(30));
        assert_eq!(thunk.priority, 0);
        assert!(thunk.dependencies.is_empty());
    }
}

// src/engine/context.rs

//! Per-submission context threaded through the dispatcher and workers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::dag::Dag;

/// Engine settings. Defaults match the local runner's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Failed (not killed) attempts a task may use before it fails.
    pub max_failed_attempts: u32,
    /// How often a blocked commit request re-checks for abort.
    pub commit_poll_interval: Duration,
    /// After this long in `STOPPING` a container is presumed lost.
    pub container_stop_timeout: Duration,
    /// Whether an idle container may run another attempt.
    pub container_reuse: bool,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 4,
            commit_poll_interval: Duration::from_millis(100),
            container_stop_timeout: Duration::from_secs(5),
            container_reuse: true,
            event_channel_capacity: 256,
        }
    }
}

/// Opaque secrets handed to workers of one submission.
#[derive(Clone, Default)]
pub struct Credentials {
    tokens: BTreeMap<String, Vec<u8>>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, alias: impl Into<String>, secret: impl Into<Vec<u8>>) {
        self.tokens.insert(alias.into(), secret.into());
    }

    pub fn get(&self, alias: &str) -> Option<&[u8]> {
        self.tokens.get(alias).map(Vec::as_slice)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret material.
        f.debug_struct("Credentials")
            .field("aliases", &self.tokens.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Everything that belongs to one DAG submission.
#[derive(Debug, Clone)]
pub struct DagContext {
    pub dag: Arc<Dag>,
    pub config: EngineConfig,
    pub credentials: Arc<Credentials>,
}

impl DagContext {
    pub fn new(dag: Dag, config: EngineConfig) -> Self {
        Self {
            dag: Arc::new(dag),
            config,
            credentials: Arc::new(Credentials::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_secrets() {
        let mut creds = Credentials::new();
        creds.add("hdfs", b"s3cr3t".to_vec());
        let printed = format!("{creds:?}");
        assert!(printed.contains("hdfs"));
        assert!(!printed.contains("s3cr3t"));
        assert_eq!(creds.get("hdfs"), Some(&b"s3cr3t"[..]));
    }
}

use crate::error::{Error, Result};
use std::env;

/// CPU/memory request and limit pair applied to every workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBudget {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            cpu_request: "100m".to_string(),
            cpu_limit: "1000m".to_string(),
            memory_request: "128Mi".to_string(),
            memory_limit: "512Mi".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Cluster API endpoint URL. When unset (together with the token) the
    /// client falls back to in-cluster / kubeconfig inference.
    pub cluster_endpoint: Option<String>,

    /// Bearer token for the cluster API
    pub cluster_token: Option<String>,

    /// Base64-encoded PEM CA bundle for the cluster endpoint
    pub cluster_ca_data: Option<String>,

    /// Cluster name used for context naming during credential exchange
    pub cluster_name: String,

    /// Namespace prefix for instance namespaces; janitor discovery goes by
    /// the ownership label, not this prefix
    pub namespace_prefix: String,

    /// Resource budget applied to every workload
    pub budget: ResourceBudget,

    /// Instance duration when the caller does not request one
    pub default_duration_minutes: i64,

    /// Ceiling on the instance duration regardless of what the caller asks for
    pub max_duration_minutes: i64,

    /// Janitor sweep interval
    pub sweep_interval_secs: u64,

    /// How long an instance may sit unprovisioned before the janitor
    /// considers it stuck
    pub stuck_threshold_minutes: i64,

    /// Enforce at most one live instance per candidate across all challenges
    pub single_instance_per_candidate: bool,

    /// Bind address for the HTTP surface
    pub bind_addr: String,
}

impl ManagerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            cluster_endpoint: env::var("CLUSTER_ENDPOINT").ok(),
            cluster_token: env::var("CLUSTER_TOKEN").ok(),
            cluster_ca_data: env::var("CLUSTER_CA_DATA").ok(),
            cluster_name: env::var("CLUSTER_NAME").unwrap_or_else(|_| "instancer".to_string()),
            namespace_prefix: env::var("NAMESPACE_PREFIX").unwrap_or_else(|_| "ci".to_string()),
            budget: ResourceBudget {
                cpu_request: env::var("WORKLOAD_CPU_REQUEST")
                    .unwrap_or_else(|_| "100m".to_string()),
                cpu_limit: env::var("WORKLOAD_CPU_LIMIT").unwrap_or_else(|_| "1000m".to_string()),
                memory_request: env::var("WORKLOAD_MEMORY_REQUEST")
                    .unwrap_or_else(|_| "128Mi".to_string()),
                memory_limit: env::var("WORKLOAD_MEMORY_LIMIT")
                    .unwrap_or_else(|_| "512Mi".to_string()),
            },
            default_duration_minutes: parse_env("DEFAULT_DURATION_MINUTES", 60)?,
            max_duration_minutes: parse_env("MAX_DURATION_MINUTES", 240)?,
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", 120)?,
            stuck_threshold_minutes: parse_env("STUCK_THRESHOLD_MINUTES", 15)?,
            single_instance_per_candidate: env::var("SINGLE_INSTANCE_PER_CANDIDATE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Fatal-at-startup validation; nothing here is retried.
    pub fn validate(&self) -> Result<()> {
        match (&self.cluster_endpoint, &self.cluster_token) {
            (Some(_), Some(_)) | (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "CLUSTER_ENDPOINT and CLUSTER_TOKEN must be set together".to_string(),
                ))
            }
        }

        if !valid_dns_prefix(&self.namespace_prefix) {
            return Err(Error::Config(format!(
                "namespace prefix {:?} is not a usable DNS label prefix",
                self.namespace_prefix
            )));
        }

        if self.default_duration_minutes <= 0 || self.max_duration_minutes <= 0 {
            return Err(Error::Config(
                "instance durations must be positive".to_string(),
            ));
        }
        if self.default_duration_minutes > self.max_duration_minutes {
            return Err(Error::Config(format!(
                "default duration {}m exceeds maximum {}m",
                self.default_duration_minutes, self.max_duration_minutes
            )));
        }

        if self.stuck_threshold_minutes <= 0 {
            return Err(Error::Config(
                "stuck threshold must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{} has invalid value {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// The prefix must leave room for the 17-character derived suffix inside the
/// 63-character DNS label limit.
fn valid_dns_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= 40
        && prefix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && prefix.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && !prefix.ends_with('-')
}

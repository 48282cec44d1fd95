//! Server configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use velo_rewrite::{DomainPolicy, RewriteError};
use velo_types::RewriteOptions;

/// A `from -> to` serving-domain mapping rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingRule {
    /// Serving domain. No wildcards.
    pub to: String,
    /// Source host patterns; `*` and `?` wildcards allowed.
    pub from: Vec<String>,
}

/// A shard rule for one serving domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardRule {
    /// Domain whose artifacts are sharded.
    pub domain: String,
    /// Shard name pattern with exactly one `%d`.
    pub pattern: String,
    /// Number of shards.
    pub count: u32,
}

/// Configuration for the Velo server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Listen address.
    pub listen: SocketAddr,
    /// Log level.
    pub log_level: String,

    /// Hosts whose resources may be rewritten, beyond same-origin.
    pub authorized_domains: Vec<String>,
    /// Serving-domain mappings.
    pub domain_mappings: Vec<MappingRule>,
    /// Shard rules.
    pub shards: Vec<ShardRule>,

    /// Fast-tier entry budget.
    pub cache1_max_entries: usize,
    /// Fast-tier byte budget.
    pub cache1_max_bytes: usize,
    /// Large-tier entry budget.
    pub cache2_max_entries: usize,
    /// Large-tier byte budget.
    pub cache2_max_bytes: usize,

    /// Rewrite tunables.
    pub options: RewriteOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".parse().expect("static addr"),
            log_level: "info".to_string(),
            authorized_domains: Vec::new(),
            domain_mappings: Vec::new(),
            shards: Vec::new(),
            cache1_max_entries: 1_000,
            cache1_max_bytes: 8 * 1024 * 1024,
            cache2_max_entries: 100_000,
            cache2_max_bytes: 512 * 1024 * 1024,
            options: RewriteOptions::default(),
        }
    }
}

impl Config {
    /// Loads YAML configuration from `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.options.validate()?;
        Ok(config)
    }

    /// Builds the domain policy the configuration describes.
    pub fn domain_policy(&self) -> Result<DomainPolicy, RewriteError> {
        let mut policy = DomainPolicy::new();
        for domain in &self.authorized_domains {
            policy.add_domain(domain);
        }
        for mapping in &self.domain_mappings {
            let from: Vec<&str> = mapping.from.iter().map(String::as_str).collect();
            policy.add_domain_mapping(&mapping.to, &from)?;
        }
        for shard in &self.shards {
            policy.shard_domain(&shard.domain, &shard.pattern, shard.count)?;
        }
        Ok(policy)
    }
}

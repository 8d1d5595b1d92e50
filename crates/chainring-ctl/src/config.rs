//! Daemon configuration from `CHAINRING_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chainring_index::NodeId;
use chainring_queue::{DEFAULT_MAX_HOLD, DEFAULT_MAX_WAIT};
use chainring_topology::{SubnetPool, TopologyConfig, DEFAULT_MAX_RETRY, DEFAULT_MIN_NODES};

use crate::error::{Error, Result};

/// Controller URL scheme selecting the in-process controller.
pub const MEMORY_SCHEME: &str = "memory://";

/// Controller node ID used by the in-process controller unless the URL
/// names one (`memory://<node id>`).
pub const MEMORY_CONTROLLER_ID: &str = "c0ffee0000";

/// Controller daemon configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory holding the queue database
    pub data_dir: PathBuf,
    /// Network controller API root
    pub controller_url: String,
    /// Controller API token
    pub auth_token: Option<String>,
    /// Message responder listen address
    pub api_addr: SocketAddr,
    /// Time between refresh cycles
    pub refresh_interval: Duration,
    /// Ring threshold
    pub min_nodes: usize,
    /// Failed cfg polls before a node is requeued
    pub max_hold: usize,
    /// Observations before an unannounced node is forgotten
    pub max_wait: usize,
    /// Retries for topology jobs
    pub max_retry: u32,
    /// Preferred chain heads: bootstrapped first, and as exit nodes while
    /// no chain exists
    pub exit_nodes: Vec<NodeId>,
    /// Address range for chain subnets
    pub subnet_pool: SubnetPool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chainring-data"),
            controller_url: "http://127.0.0.1:9993/".to_string(),
            auth_token: None,
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            refresh_interval: Duration::from_secs(60),
            min_nodes: DEFAULT_MIN_NODES,
            max_hold: DEFAULT_MAX_HOLD,
            max_wait: DEFAULT_MAX_WAIT,
            max_retry: DEFAULT_MAX_RETRY,
            exit_nodes: Vec::new(),
            subnet_pool: SubnetPool::default(),
        }
    }
}

fn parsed<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, v, e)))
    })
    .transpose()
}

impl ControllerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup. Unset keys keep their defaults; set keys
    /// that do not parse are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("CHAINRING_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = get("CHAINRING_CONTROLLER_URL") {
            config.controller_url = url;
        }
        config.auth_token = match (get("CHAINRING_AUTH_TOKEN"), get("CHAINRING_AUTH_TOKEN_FILE")) {
            (Some(token), _) => Some(token.trim().to_string()),
            (None, Some(path)) => {
                let token = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("CHAINRING_AUTH_TOKEN_FILE={}: {}", path, e)))?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };
        if let Some(addr) = parsed("CHAINRING_API_ADDR", get("CHAINRING_API_ADDR"))? {
            config.api_addr = addr;
        }
        if let Some(secs) = parsed::<u64>("CHAINRING_REFRESH_SECS", get("CHAINRING_REFRESH_SECS"))? {
            if secs == 0 {
                return Err(Error::Config("CHAINRING_REFRESH_SECS must be positive".into()));
            }
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parsed("CHAINRING_MIN_NODES", get("CHAINRING_MIN_NODES"))? {
            config.min_nodes = n;
        }
        if let Some(n) = parsed("CHAINRING_MAX_HOLD", get("CHAINRING_MAX_HOLD"))? {
            config.max_hold = n;
        }
        if let Some(n) = parsed("CHAINRING_MAX_WAIT", get("CHAINRING_MAX_WAIT"))? {
            config.max_wait = n;
        }
        if let Some(n) = parsed("CHAINRING_MAX_RETRY", get("CHAINRING_MAX_RETRY"))? {
            config.max_retry = n;
        }
        if let Some(list) = get("CHAINRING_EXIT_NODES") {
            config.exit_nodes = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    NodeId::parse(s)
                        .map_err(|e| Error::Config(format!("CHAINRING_EXIT_NODES entry {:?}: {}", s, e)))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(pool) = parsed("CHAINRING_SUBNET_POOL", get("CHAINRING_SUBNET_POOL"))? {
            config.subnet_pool = pool;
        }

        Ok(config)
    }

    /// Engine settings derived from this configuration.
    pub fn topology(&self) -> TopologyConfig {
        TopologyConfig {
            min_nodes: self.min_nodes,
            pool: self.subnet_pool,
        }
    }

    /// Controller node ID when the in-process controller is selected.
    pub fn memory_controller(&self) -> Option<Result<NodeId>> {
        let rest = self.controller_url.strip_prefix(MEMORY_SCHEME)?;
        let id = rest.trim_end_matches('/');
        let id = if id.is_empty() { MEMORY_CONTROLLER_ID } else { id };
        Some(NodeId::parse(id).map_err(|e| Error::Config(format!("CHAINRING_CONTROLLER_URL: {}", e))))
    }

    /// Where the queue database lives.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queues")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.min_nodes, 5);
        assert_eq!(config.max_hold, 3);
        assert_eq!(config.max_wait, 3);
        assert_eq!(config.max_retry, 2);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.subnet_pool.to_string(), "172.16.0.0/12");
        assert!(config.memory_controller().is_none());
        assert_eq!(config.queue_path(), PathBuf::from("./chainring-data/queues"));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("CHAINRING_MIN_NODES", "7"),
            ("CHAINRING_REFRESH_SECS", "5"),
            ("CHAINRING_API_ADDR", "127.0.0.1:9000"),
            ("CHAINRING_EXIT_NODES", "02beefdead, 03beefdead"),
            ("CHAINRING_SUBNET_POOL", "10.0.0.0/16"),
            ("CHAINRING_AUTH_TOKEN", " secret\n"),
            ("CHAINRING_CONTROLLER_URL", "memory://"),
        ])
        .unwrap();
        assert_eq!(config.min_nodes, 7);
        assert_eq!(config.topology().min_nodes, 7);
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.api_addr.port(), 9000);
        assert_eq!(config.exit_nodes.len(), 2);
        assert_eq!(config.subnet_pool.to_string(), "10.0.0.0/16");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(
            config.memory_controller().unwrap().unwrap().as_str(),
            MEMORY_CONTROLLER_ID
        );
    }

    #[test]
    fn token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authtoken.secret");
        std::fs::write(&path, "abc123\n").unwrap();
        let config = load(&[("CHAINRING_AUTH_TOKEN_FILE", path.to_str().unwrap())]).unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("abc123"));

        let missing = load(&[("CHAINRING_AUTH_TOKEN_FILE", "/nonexistent/token")]);
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn invalid_values_are_errors() {
        for (key, value) in [
            ("CHAINRING_MIN_NODES", "five"),
            ("CHAINRING_REFRESH_SECS", "0"),
            ("CHAINRING_API_ADDR", "nowhere"),
            ("CHAINRING_EXIT_NODES", "02beefdead,xyz"),
            ("CHAINRING_SUBNET_POOL", "10.0.0.0/31"),
            ("CHAINRING_CONTROLLER_URL", "memory://nothex"),
        ] {
            let result = load(&[(key, value)]).and_then(|c| match c.memory_controller() {
                Some(Err(e)) => Err(e),
                _ => Ok(c),
            });
            assert!(matches!(result, Err(Error::Config(_))), "{} accepted", key);
        }
    }
}

//! Centralized configuration for the record store.
//!
//! Constants for transport timing, endpoint paths and on-disk layout, plus the
//! runtime [`FifoPaths`] that the server and clients agree on.

use crate::{Result, StoreError};
use std::path::PathBuf;
use std::time::Duration;

/// Transport timing and endpoint defaults.
pub struct TransportConfig;

impl TransportConfig {
    pub const SERVER_FIFO: &'static str = "/tmp/employee_server_fifo";
    /// `{id}` is replaced with the numeric client id.
    pub const CLIENT_FIFO_TEMPLATE: &'static str = "/tmp/employee_client_{id}_fifo";
    pub const CLIENT_ID_PLACEHOLDER: &'static str = "{id}";

    /// How long a client waits for its reply.
    pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
    /// How long a writer waits for a reader to appear on a FIFO.
    pub const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OPEN_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Capacity of each in-memory channel.
    pub const MEMORY_CHANNEL_CAPACITY: usize = 64;
}

/// On-disk layout.
pub struct StoreConfig;

impl StoreConfig {
    pub const TEMP_SUFFIX: &'static str = ".tmp";
    pub const LOCK_SUFFIX: &'static str = ".lock";
    /// Visible bytes in a name; the wire field has one extra NUL.
    pub const NAME_MAX_LEN: usize = 9;
    pub const NAME_FIELD_WIDTH: usize = 10;
}

/// Filesystem endpoints of the FIFO transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPaths {
    pub server: PathBuf,
    pub client_template: String,
}

impl Default for FifoPaths {
    fn default() -> Self {
        Self {
            server: PathBuf::from(TransportConfig::SERVER_FIFO),
            client_template: TransportConfig::CLIENT_FIFO_TEMPLATE.to_string(),
        }
    }
}

impl FifoPaths {
    /// Build paths, checking that the client template can tell clients apart.
    pub fn new(server: impl Into<PathBuf>, client_template: impl Into<String>) -> Result<Self> {
        let client_template = client_template.into();
        if !client_template.contains(TransportConfig::CLIENT_ID_PLACEHOLDER) {
            return Err(StoreError::Config {
                message: format!(
                    "client path template '{}' must contain '{}'",
                    client_template,
                    TransportConfig::CLIENT_ID_PLACEHOLDER
                ),
            });
        }
        Ok(Self {
            server: server.into(),
            client_template,
        })
    }

    /// Paths rooted in `dir`, used by tests and per-instance deployments.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            server: dir.join("employee_server_fifo"),
            client_template: dir
                .join("employee_client_{id}_fifo")
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// The reply path for `client_id`.
    pub fn client(&self, client_id: i32) -> PathBuf {
        PathBuf::from(
            self.client_template
                .replace(TransportConfig::CLIENT_ID_PLACEHOLDER, &client_id.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_path_matches_template() {
        let paths = FifoPaths::default();
        assert_eq!(paths.client(7), PathBuf::from("/tmp/employee_client_7_fifo"));
        assert_eq!(paths.server, PathBuf::from("/tmp/employee_server_fifo"));
    }

    #[test]
    fn test_template_without_placeholder_is_rejected() {
        let result = FifoPaths::new("/tmp/server", "/tmp/client_fifo");
        assert!(matches!(result, Err(StoreError::Config { .. })));
    }

    #[test]
    fn test_in_dir_paths_are_distinct_per_client() {
        let paths = FifoPaths::in_dir("/var/run/empstore");
        assert_ne!(paths.client(1), paths.client(2));
        assert!(paths.client(12).ends_with("employee_client_12_fifo"));
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(TransportConfig::REPLY_TIMEOUT > TransportConfig::OPEN_POLL_INTERVAL);
        assert!(TransportConfig::OPEN_TIMEOUT > Duration::ZERO);
        assert_eq!(StoreConfig::NAME_FIELD_WIDTH, StoreConfig::NAME_MAX_LEN + 1);
    }
}

//! Configuration surface for a logical database handle.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::SqlConduitError;

/// Default pool size when `max_connections` is unspecified.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Process-wide default for the concurrency mode of newly constructed
/// handles. Read at construction time when a config leaves
/// `single_threaded` unset.
static DEFAULT_SINGLE_THREADED: AtomicBool = AtomicBool::new(false);

/// Set the process-wide default concurrency mode.
///
/// Intended to be called once at startup, before handles are constructed;
/// handles created earlier are unaffected.
pub fn set_default_single_threaded(value: bool) {
    DEFAULT_SINGLE_THREADED.store(value, Ordering::SeqCst);
}

/// Read the process-wide default concurrency mode.
#[must_use]
pub fn default_single_threaded() -> bool {
    DEFAULT_SINGLE_THREADED.load(Ordering::SeqCst)
}

/// Connection options for one logical database.
///
/// Every field is optional; unset fields fall back to defaults at the point
/// of use ([`DbConfig::effective_max_connections`],
/// [`DbConfig::effective_single_threaded`]). Options parsed from a URI and
/// options supplied programmatically are merged with [`DbConfig::merged_with`],
/// programmatic options winning per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database server host name.
    pub host: Option<String>,
    /// Database server port.
    pub port: Option<u16>,
    /// User name for authentication.
    pub user: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Database name (URI path with the leading slash stripped).
    pub database: Option<String>,
    /// Use the single-connection fast path instead of a pool.
    /// Unset means "use the process-wide default".
    pub single_threaded: Option<bool>,
    /// Pool size when running multi-threaded (default: 4).
    pub max_connections: Option<usize>,
}

impl DbConfig {
    /// Merge `self` with `overrides`, field by field; any field set in
    /// `overrides` wins.
    #[must_use]
    pub fn merged_with(self, overrides: DbConfig) -> DbConfig {
        DbConfig {
            host: overrides.host.or(self.host),
            port: overrides.port.or(self.port),
            user: overrides.user.or(self.user),
            password: overrides.password.or(self.password),
            database: overrides.database.or(self.database),
            single_threaded: overrides.single_threaded.or(self.single_threaded),
            max_connections: overrides.max_connections.or(self.max_connections),
        }
    }

    /// Pool size to use, falling back to [`DEFAULT_MAX_CONNECTIONS`].
    #[must_use]
    pub fn effective_max_connections(&self) -> usize {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1)
    }

    /// Concurrency mode to use, falling back to the process-wide default.
    #[must_use]
    pub fn effective_single_threaded(&self) -> bool {
        self.single_threaded.unwrap_or_else(default_single_threaded)
    }

    /// Compose a connection URL from this configuration. Pure formatting,
    /// no I/O: `scheme://[user[:password]@]host[:port]/database`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when no host is configured.
    pub fn connection_url(&self, scheme: &str) -> Result<String, SqlConduitError> {
        let host = self.host.as_deref().ok_or_else(|| {
            SqlConduitError::ConfigurationError("cannot build a URI without a host".to_string())
        })?;

        let mut url = format!("{scheme}://");
        if let Some(user) = &self.user {
            url.push_str(user);
            if let Some(password) = &self.password {
                url.push(':');
                url.push_str(password);
            }
            url.push('@');
        }
        url.push_str(host);
        if let Some(port) = self.port {
            url.push_str(&format!(":{port}"));
        }
        if let Some(database) = &self.database {
            url.push('/');
            url.push_str(database);
        }
        Ok(url)
    }
}

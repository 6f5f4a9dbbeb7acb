//! Connection and pool configuration.

use std::time::Duration;

use serde::Deserialize;

use super::charset::Charset;
use super::error::{FbError, FbResult};
use super::protocol::{DEFAULT_MAX_BUFFER_SIZE, SQL_DIALECT_V6};

pub const DEFAULT_PORT: u16 = 3050;
pub const DEFAULT_FETCH_SIZE: usize = 200;

// ============================================================================
// Connection Configuration
// ============================================================================

/// Firebird connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FbConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3050)
    pub port: u16,
    /// Database path or alias on the server
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub role: Option<String>,
    /// Attachment character set name (default: UTF8)
    pub charset: String,
    /// SQL dialect (default: 3)
    pub dialect: i32,
    /// Socket buffer size and blob segment size (default: 8192)
    pub packet_size: usize,
    /// Rows requested per fetch round trip (default: 200)
    pub fetch_size: usize,
    /// Request zlib wire compression
    pub compression: bool,
    /// Connect timeout in seconds
    pub connect_timeout: Option<u64>,
    /// Page size used by `create_database`
    pub page_size: Option<i32>,
    /// Forced writes flag used by `create_database`
    pub force_write: Option<bool>,
    pub process_name: Option<String>,
}

impl Default for FbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: "SYSDBA".to_string(),
            password: None,
            role: None,
            charset: "UTF8".to_string(),
            dialect: SQL_DIALECT_V6,
            packet_size: DEFAULT_MAX_BUFFER_SIZE as usize,
            fetch_size: DEFAULT_FETCH_SIZE,
            compression: false,
            connect_timeout: None,
            page_size: None,
            force_write: None,
            process_name: None,
        }
    }
}

impl FbConfig {
    /// Configuration for `database` on `host` with default settings.
    pub fn new(host: &str, database: &str) -> Self {
        Self {
            host: host.to_string(),
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn dialect(mut self, dialect: i32) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    pub fn fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = size;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = Some(secs);
        self
    }

    pub fn page_size(mut self, size: i32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn force_write(mut self, enabled: bool) -> Self {
        self.force_write = Some(enabled);
        self
    }

    /// Resolve the configured character set.
    pub fn resolve_charset(&self) -> FbResult<Charset> {
        Charset::from_name(&self.charset)
            .ok_or_else(|| FbError::Type(format!("unsupported charset: {}", self.charset)))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    /// Normalized connection string identifying interchangeable sessions.
    ///
    /// Host and charset compare case-insensitively; everything else verbatim.
    pub fn pool_key(&self) -> String {
        format!(
            "host={};port={};database={};user={};password={};role={};charset={};dialect={};packet_size={};compression={}",
            self.host.to_ascii_lowercase(),
            self.port,
            self.database,
            self.user,
            self.password.as_deref().unwrap_or(""),
            self.role.as_deref().unwrap_or(""),
            self.charset.to_ascii_uppercase(),
            self.dialect,
            self.packet_size,
            self.compression,
        )
    }
}

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FbPoolConfig {
    /// Idle sessions kept by a sweep regardless of age
    pub min_size: usize,
    /// Upper bound of checked-out sessions per key (`None`: unbounded)
    pub max_size: Option<usize>,
    /// Idle lifetime before a sweep evicts an entry (zero: never)
    pub lifetime: Duration,
    /// Period of the background sweep
    pub cleanup_interval: Duration,
}

impl Default for FbPoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: Some(100),
            lifetime: Duration::ZERO,
            cleanup_interval: Duration::from_secs(2),
        }
    }
}

impl FbPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_size(mut self, min: usize) -> Self {
        self.min_size = min;
        self
    }

    pub fn max_size(mut self, max: Option<usize>) -> Self {
        self.max_size = max;
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

//! Bootstrap configuration.
//!
//! Connection settings come from the environment (a `.env` file is honored
//! by the binary). Secret-store lookups happen outside this process; by the
//! time the ETL starts, the URLs are plain environment variables.

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::ConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{EtlError, Result};
use crate::keys::SurrogateKeys;

/// Connection settings for one MySQL database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    /// CA certificate for TLS; enables CA verification when set.
    pub ssl_ca: Option<PathBuf>,
}

impl DbConfig {
    pub fn connect_options(&self) -> Result<MySqlConnectOptions> {
        let options = MySqlConnectOptions::from_str(&self.url)
            .map_err(|e| EtlError::Config(format!("invalid database URL: {e}")))?;

        Ok(match &self.ssl_ca {
            Some(ca) => options.ssl_mode(MySqlSslMode::VerifyCa).ssl_ca(ca),
            None => options,
        })
    }

    /// Open a dedicated connection. `role` names the database in diagnostics.
    pub async fn connect(&self, role: &'static str) -> Result<MySqlConnection> {
        self.connect_options()?
            .connect()
            .await
            .map_err(|source| EtlError::Connection { role, source })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: DbConfig,
    /// Absent only when running against the in-memory warehouse.
    pub warehouse: Option<DbConfig>,
    pub surrogate_keys: SurrogateKeys,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let ssl_ca = non_empty("MYSQL_SSL_CA").map(PathBuf::from);

        let source_url = non_empty("SOURCE_DB_URL")
            .ok_or_else(|| EtlError::Config("SOURCE_DB_URL env var missing".to_string()))?;

        let surrogate_keys = match non_empty("SURROGATE_KEYS") {
            Some(value) => value.parse::<SurrogateKeys>().map_err(EtlError::Config)?,
            None => SurrogateKeys::default(),
        };

        Ok(Self {
            source: DbConfig {
                url: source_url,
                ssl_ca: ssl_ca.clone(),
            },
            warehouse: non_empty("WAREHOUSE_DB_URL").map(|url| DbConfig { url, ssl_ca }),
            surrogate_keys,
        })
    }
}

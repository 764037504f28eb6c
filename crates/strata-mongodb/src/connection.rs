//! MongoDB connection management with pool configuration and health checking

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Database,
};
use strata_common::{Result, StrataError};
use tracing::{info, instrument};

use crate::driver::{CollectionDriver, DatabaseDriver, MongoCollection};

/// Default connection string when `STRATA_MONGODB_URI` is unset
pub const DEFAULT_URI: &str = "mongodb://localhost:27017/strata";

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("strata".to_string()),
        }
    }
}

/// Connection string plus pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub uri: String,
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            pool: PoolConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create connection configuration from environment variables.
    ///
    /// - `STRATA_MONGODB_URI` -> connection string (must name a database)
    /// - `STRATA_MONGODB_APP_NAME` -> application name
    /// - `STRATA_MONGODB_MAX_POOL_SIZE` -> maximum pool size
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ConnectionConfig::default();

        if let Some(uri) = lookup("STRATA_MONGODB_URI") {
            config.uri = uri;
        }
        if let Some(app_name) = lookup("STRATA_MONGODB_APP_NAME") {
            config.pool.app_name = Some(app_name);
        }
        if let Some(max) = lookup("STRATA_MONGODB_MAX_POOL_SIZE") {
            let max = max.parse::<u32>().map_err(|e| {
                StrataError::Configuration(format!(
                    "STRATA_MONGODB_MAX_POOL_SIZE must be a positive integer, got '{}': {}",
                    max, e
                ))
            })?;
            config.pool.max_pool_size = Some(max);
        }

        Ok(config)
    }
}

/// MongoDB connection manager with pooling support
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
}

impl Connection {
    /// Create a new MongoDB connection with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect using a [`ConnectionConfig`]
    pub async fn from_config(config: ConnectionConfig) -> Result<Self> {
        Self::with_config(&config.uri, config.pool).await
    }

    /// Create a new MongoDB connection with custom pool configuration
    #[instrument(skip_all)]
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;

        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = config.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            StrataError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;

        let database_name = database.name().to_string();
        info!(database = %database_name, "Connected to MongoDB");

        Ok(Self {
            client,
            database,
            database_name,
        })
    }

    /// Get a reference to the database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get the database name
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(StrataError::Connection(format!("Ping failed: {}", e))),
        }
    }

    /// List all collection names in the current database
    pub async fn list_collection_names(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }
}

impl DatabaseDriver for Connection {
    fn collection(&self, name: &str) -> Arc<dyn CollectionDriver> {
        Arc::new(MongoCollection::new(
            self.client.clone(),
            self.database.clone(),
            name,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, Some(5));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.app_name, Some("strata".to_string()));
    }

    #[test]
    fn test_config_defaults_without_env() {
        let config = ConnectionConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(config.uri, DEFAULT_URI);
    }

    #[test]
    fn test_config_from_env_values() {
        let config = ConnectionConfig::from_lookup(lookup_from(&[
            ("STRATA_MONGODB_URI", "mongodb://db:27017/shop"),
            ("STRATA_MONGODB_APP_NAME", "orders-api"),
            ("STRATA_MONGODB_MAX_POOL_SIZE", "50"),
        ]))
        .unwrap();
        assert_eq!(config.uri, "mongodb://db:27017/shop");
        assert_eq!(config.pool.app_name, Some("orders-api".to_string()));
        assert_eq!(config.pool.max_pool_size, Some(50));
    }

    #[test]
    fn test_config_rejects_bad_pool_size() {
        let err = ConnectionConfig::from_lookup(lookup_from(&[(
            "STRATA_MONGODB_MAX_POOL_SIZE",
            "lots",
        )]))
        .unwrap_err();
        assert!(matches!(err, StrataError::Configuration(_)));
    }
}

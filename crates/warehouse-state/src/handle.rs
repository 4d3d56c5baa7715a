//! SurrealDB connection settings
//!
//! Supports in-memory, local (SurrealKV) and remote (WebSocket) endpoints
//! through the `any` engine.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::StorageResult;

/// Default on-disk location when no endpoint is configured.
pub const DEFAULT_LOCAL_PATH: &str = ".warehouse/db";

/// Configuration for a SurrealDB connection
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoint URL (e.g. "mem://", "surrealkv://.warehouse/db", "ws://127.0.0.1:8000")
    pub endpoint: String,
    /// Namespace (default: "warehouse")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Username and password, if the endpoint requires sign-in
    pub credentials: Option<(String, String)>,
    /// Whether the credentials belong to a root user
    pub is_root: bool,
}

impl StoreConfig {
    /// Create a configuration for the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: "warehouse".to_string(),
            database: "main".to_string(),
            credentials: None,
            is_root: false,
        }
    }

    /// Configuration for a throwaway in-memory database
    pub fn in_memory() -> Self {
        Self::new("mem://")
    }

    /// Configuration for local persistence under `path`
    pub fn local(path: &str) -> Self {
        Self::new(format!("surrealkv://{}", path))
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Sign in with a database (or root) user
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        is_root: bool,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - WAREHOUSE_DB_URL (optional, default: local persistence in `.warehouse/db`)
    /// - WAREHOUSE_DB_USER / WAREHOUSE_DB_PASS (optional, both or neither)
    /// - WAREHOUSE_DB_ROOT (optional, default: "false")
    /// - WAREHOUSE_DB_NAMESPACE (optional, default: "warehouse")
    /// - WAREHOUSE_DB_DATABASE (optional, default: "main")
    pub fn from_env() -> Self {
        let mut config = match std::env::var("WAREHOUSE_DB_URL") {
            Ok(url) => Self::new(url),
            Err(_) => Self::local(DEFAULT_LOCAL_PATH),
        };
        if let Ok(ns) = std::env::var("WAREHOUSE_DB_NAMESPACE") {
            config = config.with_namespace(ns);
        }
        if let Ok(db) = std::env::var("WAREHOUSE_DB_DATABASE") {
            config = config.with_database(db);
        }
        if let (Ok(user), Ok(pass)) = (
            std::env::var("WAREHOUSE_DB_USER"),
            std::env::var("WAREHOUSE_DB_PASS"),
        ) {
            let is_root = std::env::var("WAREHOUSE_DB_ROOT")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false);
            config = config.with_credentials(user, pass, is_root);
        }
        config
    }

    /// Connect, authenticate, select namespace/database and run migrations.
    #[instrument(skip(self), fields(endpoint = %self.endpoint, namespace = %self.namespace, database = %self.database))]
    pub async fn connect(&self) -> StorageResult<Surreal<Any>> {
        if let Some(path) = self.endpoint.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(&self.endpoint)
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to connect to {}: {}", self.endpoint, e))
            })?;

        if let Some((username, password)) = &self.credentials {
            if self.is_root {
                db.signin(Root { username, password })
                    .await
                    .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
            } else {
                db.signin(Database {
                    namespace: &self.namespace,
                    database: &self.database,
                    username,
                    password,
                })
                .await
                .map_err(|e| StorageError::Connection(format!("DB auth failed: {e}")))?;
            }
        }

        db.use_ns(&self.namespace)
            .use_db(&self.database)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("flag store connected");
        Ok(db)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::local(DEFAULT_LOCAL_PATH)
    }
}

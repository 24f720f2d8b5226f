// src/api/state.rs
use crate::auth::TokenStore;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::runner::JobStore;
use crate::sandbox::Sandbox;
use crate::api::handlers::ws::SessionHub;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sandbox: Arc<Sandbox>,
    pub jobs: JobStore,
    pub tokens: TokenStore,
    pub hub: SessionHub,
    pub db_pool: Option<Arc<SqlitePool>>,
}

impl AppState {
    pub fn new(config: AppConfig, db_pool: Option<SqlitePool>) -> Result<Self> {
        let sandbox = Sandbox::new(config.sandbox.clone())?;
        Ok(Self::with_sandbox(config, sandbox, db_pool))
    }

    pub fn with_sandbox(config: AppConfig, sandbox: Sandbox, db_pool: Option<SqlitePool>) -> Self {
        Self {
            tokens: TokenStore::new(config.auth.clone()),
            config: Arc::new(config),
            sandbox: Arc::new(sandbox),
            jobs: JobStore::new(),
            hub: SessionHub::new(),
            db_pool: db_pool.map(Arc::new),
        }
    }
}

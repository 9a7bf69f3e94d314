//! Application state shared across request handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use simalloc_ledger::{AllocationService, JsonFileStore, RecoveryReport};

use crate::api::auth::ApiToken;
use crate::config::Config;
use crate::results::ResultSink;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    service: Arc<AllocationService>,
    results: ResultSink,
    api_token: Option<ApiToken>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        service: Arc<AllocationService>,
        results: ResultSink,
        api_token: Option<ApiToken>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                service,
                results,
                api_token,
            }),
        }
    }

    /// Load the dataset, recover the ledger and build state from `config`.
    pub fn from_config(config: &Config) -> Result<(Self, RecoveryReport)> {
        if let Some(parent) = config
            .ledger_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create ledger directory {}", parent.display())
            })?;
        }
        std::fs::create_dir_all(&config.results_dir).with_context(|| {
            format!(
                "failed to create results directory {}",
                config.results_dir.display()
            )
        })?;

        let store = Arc::new(JsonFileStore::new(&config.ledger_path));
        let (service, report) =
            AllocationService::open(&config.dataset_path, store, config.error_policy)
                .context("failed to recover allocation ledger")?;

        let state = Self::new(
            Arc::new(service),
            ResultSink::new(&config.results_dir),
            config.api_token.as_deref().map(ApiToken::new),
        );
        Ok((state, report))
    }

    /// Get a reference to the allocation service.
    pub fn service(&self) -> &Arc<AllocationService> {
        &self.inner.service
    }

    pub fn results(&self) -> &ResultSink {
        &self.inner.results
    }

    /// The bearer token `/v1` routes require, if auth is enabled.
    pub fn api_token(&self) -> Option<&ApiToken> {
        self.inner.api_token.as_ref()
    }
}

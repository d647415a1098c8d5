//! Idempotent index provisioning with bounded readiness polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::error::{IndexError, Result};
use crate::vector_store::{IndexHandle, IndexSpec, VectorStore};

const DEFAULT_MAX_CHECKS: u32 = 30;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct IndexProvisioner {
    store: Arc<dyn VectorStore>,
    spec: IndexSpec,
    max_checks: u32,
    poll_interval: Duration,
    resolved: OnceCell<IndexHandle>,
}

impl IndexProvisioner {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, spec: IndexSpec) -> Self {
        Self {
            store,
            spec,
            max_checks: DEFAULT_MAX_CHECKS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            resolved: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_polling(mut self, max_checks: u32, interval: Duration) -> Self {
        self.max_checks = max_checks;
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Return the index handle, creating the index and waiting for it to
    /// become ready when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `IndexProvisioningTimeout` if the index is not ready after
    /// `max_checks` polls, or the store error of a failed describe/create.
    pub async fn ensure_index(&self) -> Result<IndexHandle> {
        if let Some(handle) = self.resolved.get() {
            return Ok(handle.clone());
        }
        let handle = self
            .resolved
            .get_or_try_init(|| self.describe_or_create())
            .await?;
        Ok(handle.clone())
    }

    /// Handle of the index if it already exists. Never creates.
    ///
    /// # Errors
    ///
    /// Returns the store error of a failed describe call.
    pub async fn existing_index(&self) -> Result<Option<IndexHandle>> {
        if let Some(handle) = self.resolved.get() {
            return Ok(Some(handle.clone()));
        }
        match self.store.describe_index(&self.spec.name).await? {
            Some(desc) => {
                let handle = desc.handle();
                let _ = self.resolved.set(handle.clone());
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    async fn describe_or_create(&self) -> Result<IndexHandle> {
        let name = &self.spec.name;
        if let Some(desc) = self.store.describe_index(name).await? {
            tracing::debug!(index = %name, "index already exists");
            return Ok(desc.handle());
        }

        tracing::info!(index = %name, dimension = self.spec.dimension, "creating index");
        match self.store.create_index(&self.spec).await {
            Ok(desc) if desc.ready => return Ok(desc.handle()),
            Ok(_) => {}
            // Created concurrently by another process.
            Err(IndexError::Provider(e)) if e.status() == Some(409) => {
                tracing::debug!(index = %name, "index creation raced, waiting for readiness");
            }
            Err(e) => return Err(e),
        }

        for check in 1..=self.max_checks {
            if let Some(desc) = self.store.describe_index(name).await?
                && desc.ready
            {
                tracing::info!(index = %name, checks = check, "index ready");
                return Ok(desc.handle());
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::error!(index = %name, checks = self.max_checks, "index never became ready");
        Err(IndexError::IndexProvisioningTimeout {
            index: name.clone(),
            attempts: self.max_checks,
        })
    }
}

//! Bounded remote calls.

use async_trait::async_trait;
use checklist_core::remote::{RemoteRow, RemoteSettings, RemoteStore, Result, Table, TransportError};
use std::future::Future;
use std::time::Duration;

/// Wraps a remote so every call fails with `Timeout` instead of hanging.
pub struct TimeoutRemote<R> {
    inner: R,
    timeout: Duration,
}

impl<R: RemoteStore> TimeoutRemote<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>> + Send) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl<R: RemoteStore> RemoteStore for TimeoutRemote<R> {
    async fn upsert(&self, owner: &str, table: Table, row: RemoteRow) -> Result<()> {
        self.bounded(self.inner.upsert(owner, table, row)).await
    }

    async fn delete(&self, owner: &str, table: Table, name: &str) -> Result<()> {
        self.bounded(self.inner.delete(owner, table, name)).await
    }

    async fn select_all(&self, owner: &str, table: Table) -> Result<Vec<RemoteRow>> {
        self.bounded(self.inner.select_all(owner, table)).await
    }

    async fn rename(&self, owner: &str, table: Table, old_name: &str, row: RemoteRow) -> Result<()> {
        self.bounded(self.inner.rename(owner, table, old_name, row)).await
    }

    async fn upsert_settings(&self, owner: &str, settings: RemoteSettings) -> Result<()> {
        self.bounded(self.inner.upsert_settings(owner, settings)).await
    }

    async fn select_settings(&self, owner: &str) -> Result<Option<RemoteSettings>> {
        self.bounded(self.inner.select_settings(owner)).await
    }
}

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    ListQuery, ListResult, NewRequestRow, RemoteStore, RowPatch, StoreError, TenantScope,
};
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::connectivity::Connectivity;
use crate::errors::{classify_store_error, AppError, ErrorKind, StoreOp};
use crate::model::{MaterialRequest, NewMaterialRequest, RequestId, RequestPatch, UserId};
use crate::observability::{OperationTimer, TrackerMetrics};

/// Typed, classified access to a [`RemoteStore`]
///
/// Every call checks connectivity first and fails fast with `NetworkOffline`
/// without touching the backend. Every write stamps `updated_at` from the
/// injected clock.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    metrics: Arc<TrackerMetrics>,
    timeout: Duration,
    strict_requester_lookup: bool,
}

impl StoreClient {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        metrics: Arc<TrackerMetrics>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            store,
            connectivity,
            clock,
            metrics,
            timeout: config.request_timeout(),
            strict_requester_lookup: config.strict_requester_lookup,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn list(&self, scope: &TenantScope, query: &ListQuery) -> Result<ListResult, AppError> {
        let mut result = self
            .call("list", StoreOp::Fetch, self.store.list(scope, query))
            .await?;
        self.resolve_requesters(scope, &mut result.rows).await?;
        Ok(result)
    }

    pub async fn get_by_id(
        &self,
        scope: &TenantScope,
        id: RequestId,
    ) -> Result<MaterialRequest, AppError> {
        let row = self
            .call("get_by_id", StoreOp::Fetch, self.store.get_by_id(scope, id))
            .await
            .map_err(|e| e.with_context("request.id", id))?;
        self.resolved(scope, row).await
    }

    pub async fn insert(
        &self,
        scope: &TenantScope,
        input: &NewMaterialRequest,
    ) -> Result<MaterialRequest, AppError> {
        input.validate().map_err(|v| AppError::validation(&v))?;
        let row = NewRequestRow::new(scope, input, self.clock.now());
        let created = self
            .call("insert", StoreOp::Insert, self.store.insert(scope, &row))
            .await?;
        self.resolved(scope, created).await
    }

    pub async fn update(
        &self,
        scope: &TenantScope,
        id: RequestId,
        patch: &RequestPatch,
    ) -> Result<MaterialRequest, AppError> {
        patch.validate().map_err(|v| AppError::validation(&v))?;
        let row_patch = RowPatch {
            fields: patch.clone(),
            updated_at: self.clock.now(),
        };
        let updated = self
            .call("update", StoreOp::Update, self.store.update(scope, id, &row_patch))
            .await
            .map_err(|e| e.with_context("request.id", id))?;
        self.resolved(scope, updated).await
    }

    pub async fn delete(&self, scope: &TenantScope, id: RequestId) -> Result<(), AppError> {
        self.call("delete", StoreOp::Delete, self.store.delete(scope, id))
            .await
            .map_err(|e| e.with_context("request.id", id))
    }

    /// Offline check, timeout, metrics and classification around one backend call
    async fn call<T, F>(&self, name: &'static str, op: StoreOp, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if !self.connectivity.is_online() {
            let err = AppError::offline(name);
            self.metrics.record_error(err.kind());
            return Err(err);
        }

        self.metrics.record_request();
        let timer = OperationTimer::new(name);
        let outcome = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };
        timer.finish(outcome.is_ok());

        outcome.map_err(|err| {
            let classified = classify_store_error(err, op);
            self.metrics.record_error(classified.kind());
            debug!(operation = name, error = %classified, "Store call failed");
            classified
        })
    }

    async fn resolved(
        &self,
        scope: &TenantScope,
        row: MaterialRequest,
    ) -> Result<MaterialRequest, AppError> {
        let mut rows = vec![row];
        self.resolve_requesters(scope, &mut rows).await?;
        // One row in, one row out
        rows.pop()
            .ok_or_else(|| AppError::new(ErrorKind::UnexpectedError, "resolved row vanished"))
    }

    /// Fills `requester_name` from a secondary profile lookup.
    ///
    /// Lookup failures leave names unresolved and log a warning, unless strict
    /// lookup is configured.
    async fn resolve_requesters(
        &self,
        scope: &TenantScope,
        rows: &mut [MaterialRequest],
    ) -> Result<(), AppError> {
        let ids: Vec<UserId> = rows
            .iter()
            .map(|row| row.requested_by)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let profiles = match self
            .call("profiles", StoreOp::Fetch, self.store.profiles(scope, ids))
            .await
        {
            Ok(profiles) => profiles,
            Err(err) if self.strict_requester_lookup => {
                return Err(AppError::new(
                    ErrorKind::DbFetchFailed,
                    format!("requester lookup failed: {}", err.message()),
                )
                .with_context("lookup", "profiles")
                .with_cause(err));
            }
            Err(err) => {
                warn!(error = %err, rows = rows.len(), "Requester lookup failed; names left unresolved");
                return Ok(());
            }
        };

        let names: HashMap<UserId, String> = profiles
            .into_iter()
            .filter_map(|p| p.full_name.map(|name| (p.id, name)))
            .collect();
        for row in rows.iter_mut() {
            row.requester_name = names.get(&row.requested_by).cloned();
        }
        Ok(())
    }
}

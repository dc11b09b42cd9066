//! Query cache and optimistic mutation coordinator
//!
//! Reads serve cached pages immediately and refresh stale ones in the
//! background. Writes apply their effect to every cached copy of the request
//! first, call the store, roll back on failure, and always invalidate on
//! settle so the server's version wins on the next read.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

use super::cache::{CacheEntry, DetailKey, ListKey, ListPage, QueryCache, TicketKey};
use super::resolver::{FilterInput, PageRequest, QueryDescriptor, Resolver, Sorting};
use super::retry::RetryPolicy;
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::connectivity::Connectivity;
use crate::errors::{classify_panic, AppError, ErrorKind};
use crate::model::{MaterialRequest, NewMaterialRequest, RequestId, RequestPatch, RequestStatus, UserId};
use crate::observability::{TrackerMetrics, TrackerStats};
use crate::session::{AuthEvent, SessionProvider};
use crate::store::{ListQuery, RemoteStore, StoreClient, TenantScope};
use crate::telemetry::{create_mutation_span, create_query_span, generate_correlation_id};
use crate::workflow::StatusWorkflow;

/// Outcome of a fetch whose result may have been overtaken
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// Written to the cache
    Current(T),
    /// Cancelled or invalidated while in flight; returned but not cached
    Superseded(T),
}

impl<T> Fetched<T> {
    pub fn into_inner(self) -> T {
        match self {
            Fetched::Current(value) | Fetched::Superseded(value) => value,
        }
    }

    pub fn is_current(&self) -> bool {
        matches!(self, Fetched::Current(_))
    }
}

enum OptimisticChange<'a> {
    Patch(&'a RequestPatch),
    Remove,
}

struct Inner {
    client: StoreClient,
    cache: QueryCache,
    session: Arc<dyn SessionProvider>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    metrics: Arc<TrackerMetrics>,
    resolver: Resolver,
    retry: RetryPolicy,
    stale_time: chrono::Duration,
    export_max_rows: usize,
    background: Mutex<JoinSet<()>>,
    in_flight: Mutex<HashSet<TicketKey>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    last_user: Mutex<Option<UserId>>,
}

/// Holds a background key in `in_flight` until dropped
struct InFlight {
    inner: Arc<Inner>,
    key: TicketKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

fn log_background_outcome(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            let classified = classify_panic(err.into_panic().as_ref());
            error!(error = %classified, "Background task panicked");
        }
    }
}

/// Cheaply clonable handle over the shared cache
#[derive(Clone)]
pub struct QueryCoordinator {
    inner: Arc<Inner>,
}

impl QueryCoordinator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        config: &TrackerConfig,
    ) -> Self {
        let metrics = Arc::new(TrackerMetrics::new());
        let client = StoreClient::new(
            store,
            connectivity.clone(),
            clock.clone(),
            metrics.clone(),
            &config.store,
        );
        let last_user = session.current().map(|s| s.user_id);

        Self {
            inner: Arc::new(Inner {
                client,
                cache: QueryCache::new(&config.cache),
                session,
                connectivity,
                clock,
                metrics,
                resolver: Resolver::new(&config.pagination),
                retry: RetryPolicy::from_config(&config.retry),
                stale_time: config.cache.stale_time(),
                export_max_rows: config.export.max_rows,
                background: Mutex::new(JoinSet::new()),
                in_flight: Mutex::new(HashSet::new()),
                listeners: Mutex::new(Vec::new()),
                last_user: Mutex::new(last_user),
            }),
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    pub fn stats(&self) -> TrackerStats {
        self.inner.metrics.get_stats()
    }

    pub fn metrics(&self) -> &TrackerMetrics {
        &self.inner.metrics
    }

    /// `Ok(None)` when signed in without a company
    pub fn read_scope(&self) -> Result<Option<TenantScope>, AppError> {
        let session = self
            .inner
            .session
            .current()
            .ok_or_else(|| AppError::new(ErrorKind::AuthUnauthorized, "no active session"))?;
        Ok(TenantScope::from_session(&session))
    }

    fn write_scope(&self, operation: &str) -> Result<TenantScope, AppError> {
        self.read_scope()?.ok_or_else(|| {
            AppError::new(
                ErrorKind::ValidationFailed,
                format!("{operation} requires a company on the user profile"),
            )
            .with_user_message("Join a company before creating or changing requests.")
            .with_context("operation", operation)
        })
    }

    fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        self.inner.clock.now() - fetched_at >= self.inner.stale_time
    }

    /// Resolves UI state and reads the page through the cache
    pub async fn list_requests(
        &self,
        filters: &FilterInput,
        page: PageRequest,
        sorting: Option<Sorting>,
    ) -> Result<ListPage, AppError> {
        let descriptor = self.inner.resolver.resolve(filters, page, sorting);
        self.query(descriptor).await.map(Fetched::into_inner)
    }

    /// Reads one page through the cache
    pub async fn query(&self, descriptor: QueryDescriptor) -> Result<Fetched<ListPage>, AppError> {
        let Some(scope) = self.read_scope()? else {
            debug!("Profile has no company; returning an empty page");
            return Ok(Fetched::Current(ListPage {
                rows: Vec::new(),
                meta: descriptor.page_meta(0),
            }));
        };
        let key = ListKey {
            company_id: scope.company_id(),
            descriptor,
        };
        let span = create_query_span(&key.descriptor.to_string());
        self.read_list(scope, key).instrument(span).await
    }

    async fn read_list(&self, scope: TenantScope, key: ListKey) -> Result<Fetched<ListPage>, AppError> {
        if let Some(entry) = self.inner.cache.list(&key).await {
            if !entry.invalidated {
                self.inner.metrics.record_cache_hit();
                if self.is_stale(entry.fetched_at) {
                    debug!("Serving stale page while refreshing");
                    self.spawn_refresh(scope, key.clone());
                } else {
                    debug!("Serving fresh page from cache");
                }
                return Ok(Fetched::Current(entry.data.clone()));
            }
        }

        self.inner.metrics.record_cache_miss();
        self.fetch_list(scope, &key, true).await
    }

    async fn fetch_list(
        &self,
        scope: TenantScope,
        key: &ListKey,
        prefetch_next: bool,
    ) -> Result<Fetched<ListPage>, AppError> {
        let ticket_key = TicketKey::List(key.clone());
        let ticket = self.inner.cache.ticket(&ticket_key);
        let query = ListQuery::page(&key.descriptor);

        let result = self
            .inner
            .retry
            .run("list", &self.inner.metrics, || self.inner.client.list(&scope, &query))
            .await?;
        let page = ListPage {
            meta: key.descriptor.page_meta(result.total_count),
            rows: result.rows,
        };

        if !self.inner.cache.is_current(&ticket_key, ticket) {
            self.inner.metrics.record_discarded_result();
            debug!("Discarding list result overtaken while in flight");
            return Ok(Fetched::Superseded(page));
        }

        self.inner
            .cache
            .put_list(key.clone(), page.clone(), self.inner.clock.now())
            .await;
        if prefetch_next && page.meta.has_next_page {
            self.spawn_prefetch(scope, key.descriptor.next_page());
        }
        Ok(Fetched::Current(page))
    }

    /// Reads one request through the detail cache
    pub async fn get_request(&self, id: RequestId) -> Result<MaterialRequest, AppError> {
        let Some(scope) = self.read_scope()? else {
            return Err(AppError::new(
                ErrorKind::DbNotFound,
                "profile has no company; no requests are visible",
            )
            .with_context("request.id", id));
        };
        let key = DetailKey {
            company_id: scope.company_id(),
            id,
        };
        let span = create_query_span(&format!("request:{id}"));
        async {
            if let Some(entry) = self.inner.cache.detail(&key).await {
                if !entry.invalidated {
                    self.inner.metrics.record_cache_hit();
                    if self.is_stale(entry.fetched_at) {
                        self.spawn_detail_refresh(scope, key);
                    }
                    return Ok(entry.data.clone());
                }
            }
            self.inner.metrics.record_cache_miss();
            self.fetch_detail(scope, key).await.map(Fetched::into_inner)
        }
        .instrument(span)
        .await
    }

    async fn fetch_detail(
        &self,
        scope: TenantScope,
        key: DetailKey,
    ) -> Result<Fetched<MaterialRequest>, AppError> {
        let ticket_key = TicketKey::Detail(key);
        let ticket = self.inner.cache.ticket(&ticket_key);
        let row = self
            .inner
            .retry
            .run("get_by_id", &self.inner.metrics, || {
                self.inner.client.get_by_id(&scope, key.id)
            })
            .await?;

        if !self.inner.cache.is_current(&ticket_key, ticket) {
            self.inner.metrics.record_discarded_result();
            return Ok(Fetched::Superseded(row));
        }
        self.inner
            .cache
            .put_detail(key, row.clone(), self.inner.clock.now())
            .await;
        Ok(Fetched::Current(row))
    }

    /// Cached page for a descriptor without fetching, invalidated or not
    pub async fn peek(&self, descriptor: &QueryDescriptor) -> Option<Arc<CacheEntry<ListPage>>> {
        let scope = self.read_scope().ok().flatten()?;
        self.inner
            .cache
            .list(&ListKey {
                company_id: scope.company_id(),
                descriptor: descriptor.clone(),
            })
            .await
    }

    pub async fn peek_request(&self, id: RequestId) -> Option<Arc<CacheEntry<MaterialRequest>>> {
        let scope = self.read_scope().ok().flatten()?;
        self.inner
            .cache
            .detail(&DetailKey {
                company_id: scope.company_id(),
                id,
            })
            .await
    }

    /// Runs `task` in the background unless one is already running for `key`
    fn spawn_once<F>(&self, key: TicketKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(key.clone()) {
                return;
            }
        }
        let guard = InFlight {
            inner: self.inner.clone(),
            key,
        };
        let wrapped = async move {
            // Released on completion and on panic
            let _guard = guard;
            task.await;
        };
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Some(joined) = background.try_join_next() {
            log_background_outcome(joined);
        }
        background.spawn(wrapped.in_current_span());
    }

    /// Background tasks not yet joined; finished ones are reaped on the next spawn
    pub fn background_tasks(&self) -> usize {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn spawn_refresh(&self, scope: TenantScope, key: ListKey) {
        let this = self.clone();
        self.spawn_once(TicketKey::List(key.clone()), async move {
            this.inner.metrics.record_background_refresh();
            if let Err(err) = this.fetch_list(scope, &key, true).await {
                warn!(error = %err, "Background refresh failed; keeping stale page");
            }
        });
    }

    fn spawn_detail_refresh(&self, scope: TenantScope, key: DetailKey) {
        let this = self.clone();
        self.spawn_once(TicketKey::Detail(key), async move {
            this.inner.metrics.record_background_refresh();
            if let Err(err) = this.fetch_detail(scope, key).await {
                warn!(error = %err, "Background refresh failed; keeping stale request");
            }
        });
    }

    fn spawn_prefetch(&self, scope: TenantScope, descriptor: QueryDescriptor) {
        let key = ListKey {
            company_id: scope.company_id(),
            descriptor,
        };
        let this = self.clone();
        self.spawn_once(TicketKey::List(key.clone()), async move {
            if let Some(entry) = this.inner.cache.list(&key).await {
                if !entry.invalidated && !this.is_stale(entry.fetched_at) {
                    return;
                }
            }
            this.inner.metrics.record_prefetch();
            debug!(next = %key.descriptor, "Prefetching next page");
            if let Err(err) = this.fetch_list(scope, &key, false).await {
                debug!(error = %err, "Prefetch failed");
            }
        });
    }

    /// Waits for background refreshes and prefetches, including ones they start
    pub async fn drain_background(&self) {
        loop {
            let mut tasks = std::mem::take(
                &mut *self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                log_background_outcome(joined);
            }
        }
    }

    /// Inserts a request. No optimistic insert; list pages are invalidated on success.
    pub async fn create_request(&self, input: NewMaterialRequest) -> Result<MaterialRequest, AppError> {
        let scope = self.write_scope("create")?;
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span("create", None, &correlation_id);

        async {
            let created = self.inner.client.insert(&scope, &input).await?;
            self.inner.cache.invalidate_lists(scope.company_id()).await;
            self.inner
                .cache
                .put_detail(
                    DetailKey {
                        company_id: scope.company_id(),
                        id: created.id,
                    },
                    created.clone(),
                    self.inner.clock.now(),
                )
                .await;
            info!(request.id = %created.id, "Material request created");
            Ok::<_, AppError>(created)
        }
        .instrument(span)
        .await
    }

    /// Edits fields. A status change in the patch is gated by the workflow.
    pub async fn update_request(
        &self,
        id: RequestId,
        patch: RequestPatch,
    ) -> Result<MaterialRequest, AppError> {
        let scope = self.write_scope("update")?;
        patch.validate().map_err(|v| AppError::validation(&v))?;
        if let Some(target) = patch.status {
            let current = self.current_status(&scope, id).await?;
            StatusWorkflow::request_transition(current, target)?;
        }

        let correlation_id = generate_correlation_id();
        let span = create_mutation_span("update", Some(id), &correlation_id);
        self.mutate(
            &scope,
            id,
            OptimisticChange::Patch(&patch),
            self.inner.client.update(&scope, id, &patch),
        )
        .instrument(span)
        .await
    }

    /// Moves a request through the workflow. Illegal moves never reach the store.
    pub async fn change_status(
        &self,
        id: RequestId,
        target: RequestStatus,
    ) -> Result<MaterialRequest, AppError> {
        let scope = self.write_scope("change_status")?;
        let current = self.current_status(&scope, id).await?;
        let transition = StatusWorkflow::request_transition(current, target)?;

        let correlation_id = generate_correlation_id();
        let span = create_mutation_span("change_status", Some(id), &correlation_id);
        let patch = RequestPatch::status(target);
        let updated = self
            .mutate(
                &scope,
                id,
                OptimisticChange::Patch(&patch),
                self.inner.client.update(&scope, id, &patch),
            )
            .instrument(span)
            .await?;
        info!(request.id = %id, from = %transition.from, to = %transition.to, "Status changed");
        Ok(updated)
    }

    /// Deletes a request. Only its requester may do so.
    pub async fn delete_request(&self, id: RequestId) -> Result<(), AppError> {
        let scope = self.write_scope("delete")?;
        if let Some(row) = self.inner.cache.find_row(scope.company_id(), id).await {
            if row.requested_by != scope.user_id() {
                return Err(AppError::new(
                    ErrorKind::DbPermissionDenied,
                    "only the original requester can delete a request",
                )
                .with_context("request.id", id));
            }
        }

        let correlation_id = generate_correlation_id();
        let span = create_mutation_span("delete", Some(id), &correlation_id);
        self.mutate(
            &scope,
            id,
            OptimisticChange::Remove,
            self.inner.client.delete(&scope, id),
        )
        .instrument(span)
        .await?;
        info!(request.id = %id, "Material request deleted");
        Ok(())
    }

    async fn current_status(&self, scope: &TenantScope, id: RequestId) -> Result<RequestStatus, AppError> {
        if let Some(row) = self.inner.cache.find_row(scope.company_id(), id).await {
            return Ok(row.status);
        }
        let key = DetailKey {
            company_id: scope.company_id(),
            id,
        };
        Ok(self.fetch_detail(*scope, key).await?.into_inner().status)
    }

    /// Snapshot, apply, call, roll back on failure, invalidate on settle
    async fn mutate<T, F>(
        &self,
        scope: &TenantScope,
        id: RequestId,
        change: OptimisticChange<'_>,
        call: F,
    ) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let company_id = scope.company_id();
        let cache = &self.inner.cache;

        cache.cancel_lists(company_id);
        let snapshot = cache.snapshot(company_id, id).await;
        match change {
            OptimisticChange::Patch(patch) => {
                let now = self.inner.clock.now();
                cache
                    .patch_row(&snapshot, id, |row| {
                        patch.apply_to(row);
                        row.updated_at = now;
                    })
                    .await;
            }
            OptimisticChange::Remove => cache.remove_row(&snapshot, id).await,
        }
        debug!(entries = snapshot.len(), "Applied optimistic change");

        let outcome = call.await;
        if let Err(err) = &outcome {
            cache.restore(snapshot).await;
            self.inner.metrics.record_rollback();
            warn!(error = %err, "Mutation failed; optimistic change rolled back");
        }

        cache.invalidate_lists(company_id).await;
        cache.invalidate_detail(DetailKey { company_id, id }).await;
        outcome
    }

    /// Filtered, sorted, fully resolved rows for export, capped at `export.max_rows`.
    /// Bypasses the cache.
    pub async fn export_requests(
        &self,
        filters: &FilterInput,
        sorting: Option<Sorting>,
    ) -> Result<Vec<MaterialRequest>, AppError> {
        let Some(scope) = self.read_scope()? else {
            return Ok(Vec::new());
        };
        let query = ListQuery::export(
            Resolver::normalize_filters(filters),
            sorting.unwrap_or_default(),
            self.inner.export_max_rows,
        );
        let result = self
            .inner
            .retry
            .run("export", &self.inner.metrics, || self.inner.client.list(&scope, &query))
            .await?;
        if result.total_count > result.rows.len() as u64 {
            warn!(
                total_count = result.total_count,
                exported = result.rows.len(),
                "Export truncated at the configured row cap"
            );
        }
        Ok(result.rows)
    }

    /// Clears the cache on sign-out or user switch and invalidates it on reconnect
    pub fn start_lifecycle_listeners(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut auth_events = self.inner.session.subscribe();
        let auth = tokio::spawn(async move {
            loop {
                let event = match auth_events.recv().await {
                    Ok(event) => Some(event),
                    // Missed events; assume the worst
                    Err(RecvError::Lagged(_)) => None,
                    Err(RecvError::Closed) => break,
                };
                let Some(coordinator) = upgrade(&weak) else { break };
                coordinator.on_auth_event(event).await;
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let mut online = self.inner.connectivity.subscribe();
        let connectivity = tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                let Some(coordinator) = upgrade(&weak) else { break };
                if is_online {
                    info!("Back online; invalidating cached queries");
                    coordinator.inner.cache.invalidate_all().await;
                }
            }
        });

        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([auth, connectivity]);
    }

    async fn on_auth_event(&self, event: Option<AuthEvent>) {
        let current_user = self.inner.session.current().map(|s| s.user_id);
        let previous = std::mem::replace(
            &mut *self
                .inner
                .last_user
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            current_user,
        );

        match event {
            Some(AuthEvent::SignedOut) => {
                info!("Signed out; clearing query cache");
            }
            Some(AuthEvent::SignedIn(user_id)) if previous != Some(user_id) => {
                info!(user.id = %user_id, "Different user signed in; clearing query cache");
            }
            Some(AuthEvent::SignedIn(_)) | Some(AuthEvent::TokenRefreshed) => return,
            None => {
                warn!("Auth events lagged; clearing query cache");
            }
        }
        self.inner.cache.clear().await;
        self.inner.metrics.record_cache_clear();
    }

    /// Stops lifecycle listeners and waits for background work
    pub async fn shutdown(&self) {
        let listeners = std::mem::take(
            &mut *self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener.abort();
        }
        self.drain_background().await;
        self.inner.metrics.log_stats();
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<QueryCoordinator> {
    weak.upgrade().map(|inner| QueryCoordinator { inner })
}

use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    ListQuery, ListResult, NewRequestRow, RemoteStore, RequesterProfile, RowPatch, StoreError,
    TenantScope,
};
use crate::clock::{Clock, SystemClock};
use crate::model::{MaterialRequest, RequestId, UserId};
use crate::query::resolver::SortColumn;

/// Backend call kinds, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    List,
    GetById,
    Insert,
    Update,
    Delete,
    Profiles,
}

impl StoreCall {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

/// Reference backend holding rows in memory.
///
/// Enforces the same rules the hosted store enforces with row-level security:
/// rows outside the caller's company are invisible, and only the original
/// requester may delete a row. Timestamps come from a separate server clock,
/// the way database triggers would set them.
pub struct InMemoryStore {
    rows: RwLock<BTreeMap<RequestId, MaterialRequest>>,
    profiles: RwLock<HashMap<UserId, RequesterProfile>>,
    server_clock: Arc<dyn Clock>,
    faults: Mutex<HashMap<StoreCall, VecDeque<StoreError>>>,
    latency: Mutex<Option<Duration>>,
    calls: [AtomicUsize; StoreCall::COUNT],
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    pub fn new(server_clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            profiles: RwLock::new(HashMap::new()),
            server_clock,
            faults: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            calls: Default::default(),
        }
    }

    /// Insert a row verbatim, bypassing scope checks
    pub async fn seed(&self, row: MaterialRequest) {
        self.rows.write().await.insert(row.id, row);
    }

    pub async fn add_profile(&self, id: UserId, full_name: impl Into<String>) {
        self.profiles.write().await.insert(
            id,
            RequesterProfile {
                id,
                full_name: Some(full_name.into()),
            },
        );
    }

    /// Raw stored row, bypassing scope checks
    pub async fn row(&self, id: RequestId) -> Option<MaterialRequest> {
        self.rows.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Queue a failure for the next call of the given kind
    pub fn fail_next(&self, call: StoreCall, error: StoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.entry(call).or_default().push_back(error);
        }
    }

    /// Delay every call, to exercise overlapping requests
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    pub fn calls(&self, call: StoreCall) -> usize {
        self.calls[call.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    async fn enter(&self, call: StoreCall) -> Result<(), StoreError> {
        self.calls[call.index()].fetch_add(1, Ordering::SeqCst);
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.get_mut(&call).and_then(VecDeque::pop_front));
        match fault {
            Some(err) => {
                debug!(?call, error = %err, "Injected store failure");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn compare(a: &MaterialRequest, b: &MaterialRequest, column: SortColumn) -> CmpOrdering {
    match column {
        SortColumn::MaterialName => a.material_name.cmp(&b.material_name),
        SortColumn::Quantity => a.quantity.total_cmp(&b.quantity),
        // Text columns on the server, so lexical order
        SortColumn::Status => a.status.as_str().cmp(b.status.as_str()),
        SortColumn::Priority => a.priority.as_str().cmp(b.priority.as_str()),
        SortColumn::RequestedAt => a.requested_at.cmp(&b.requested_at),
        SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
        SortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
}

fn matches(row: &MaterialRequest, query: &ListQuery) -> bool {
    let filters = &query.filters;
    filters.status().map_or(true, |s| row.status == s)
        && filters.priority().map_or(true, |p| row.priority == p)
        && filters
            .search()
            .map_or(true, |needle| row.material_name.to_lowercase().contains(needle))
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list(&self, scope: &TenantScope, query: &ListQuery) -> Result<ListResult, StoreError> {
        self.enter(StoreCall::List).await?;
        let rows = self.rows.read().await;
        let mut visible: Vec<&MaterialRequest> = rows
            .values()
            .filter(|row| row.company_id == scope.company_id())
            .filter(|row| matches(row, query))
            .collect();

        let sorting = query.sorting;
        visible.sort_by(|a, b| {
            let ord = compare(a, b, sorting.column);
            let ord = if sorting.ascending() { ord } else { ord.reverse() };
            ord.then_with(|| a.id.cmp(&b.id))
        });

        let total_count = visible.len() as u64;
        let rows = visible
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .map(|mut row| {
                row.requester_name = None;
                row
            })
            .collect();
        Ok(ListResult { rows, total_count })
    }

    async fn get_by_id(
        &self,
        scope: &TenantScope,
        id: RequestId,
    ) -> Result<MaterialRequest, StoreError> {
        self.enter(StoreCall::GetById).await?;
        self.rows
            .read()
            .await
            .get(&id)
            .filter(|row| row.company_id == scope.company_id())
            .cloned()
            .ok_or_else(StoreError::not_found)
    }

    async fn insert(
        &self,
        scope: &TenantScope,
        row: &NewRequestRow,
    ) -> Result<MaterialRequest, StoreError> {
        self.enter(StoreCall::Insert).await?;
        if row.company_id != scope.company_id() || row.requested_by != scope.user_id() {
            return Err(StoreError::permission_denied(
                "new row violates row-level security policy for table \"material_requests\"",
            ));
        }

        let now = self.server_clock.now();
        let created = MaterialRequest {
            id: RequestId::new(),
            company_id: row.company_id,
            project_id: row.project_id,
            material_name: row.material_name.clone(),
            quantity: row.quantity,
            unit: row.unit,
            status: row.status,
            priority: row.priority,
            requested_by: row.requested_by,
            requester_name: None,
            requested_at: row.requested_at,
            notes: row.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        self.rows.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        scope: &TenantScope,
        id: RequestId,
        patch: &RowPatch,
    ) -> Result<MaterialRequest, StoreError> {
        self.enter(StoreCall::Update).await?;
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&id)
            .filter(|row| row.company_id == scope.company_id())
            .ok_or_else(StoreError::not_found)?;
        patch.fields.apply_to(row);
        // Trigger-maintained; the client's stamp is overwritten
        row.updated_at = self.server_clock.now();
        Ok(row.clone())
    }

    async fn delete(&self, scope: &TenantScope, id: RequestId) -> Result<(), StoreError> {
        self.enter(StoreCall::Delete).await?;
        let mut rows = self.rows.write().await;
        let row = rows
            .get(&id)
            .filter(|row| row.company_id == scope.company_id())
            .ok_or_else(StoreError::not_found)?;
        if row.requested_by != scope.user_id() {
            return Err(StoreError::permission_denied(
                "permission denied: only the requester may delete this request",
            ));
        }
        rows.remove(&id);
        Ok(())
    }

    async fn profiles(
        &self,
        _scope: &TenantScope,
        ids: Vec<UserId>,
    ) -> Result<Vec<RequesterProfile>, StoreError> {
        self.enter(StoreCall::Profiles).await?;
        let profiles = self.profiles.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{CompanyId, NewMaterialRequest, Priority, RequestPatch, RequestStatus, Unit};
    use crate::query::resolver::{FilterInput, PageRequest, Resolver, SortDirection, Sorting};
    use crate::session::{Profile, Session};
    use chrono::{TimeZone, Utc};

    fn scope_for(company_id: CompanyId) -> TenantScope {
        let session = Session::new(
            Profile {
                id: UserId::new(),
                full_name: None,
                company_id: Some(company_id),
            },
            "t",
        );
        TenantScope::from_session(&session).unwrap()
    }

    async fn insert(store: &InMemoryStore, scope: &TenantScope, name: &str, qty: f64) -> MaterialRequest {
        let input = NewMaterialRequest::new(name, qty, Unit::Kg, Priority::Medium);
        let row = NewRequestRow::new(scope, &input, Utc::now());
        store.insert(scope, &row).await.unwrap()
    }

    fn query(filters: &FilterInput, page: usize, size: usize, sorting: Option<Sorting>) -> ListQuery {
        ListQuery::page(&Resolver::default().resolve(filters, PageRequest::new(page, size), sorting))
    }

    #[tokio::test]
    async fn test_list_is_scoped_filtered_sorted_and_counted() {
        let store = InMemoryStore::default();
        let scope = scope_for(CompanyId::new());
        let other = scope_for(CompanyId::new());

        for (name, qty) in [("Steel beam", 3.0), ("Cement", 40.0), ("steel mesh", 7.0)] {
            insert(&store, &scope, name, qty).await;
        }
        insert(&store, &other, "Steel rod", 1.0).await;

        let sorting = Sorting::new(SortColumn::Quantity, SortDirection::Asc);
        let result = store
            .list(&scope, &query(&FilterInput::search("STEEL"), 0, 10, Some(sorting)))
            .await
            .unwrap();
        assert_eq!(result.total_count, 2);
        let names: Vec<_> = result.rows.iter().map(|r| r.material_name.as_str()).collect();
        assert_eq!(names, vec!["Steel beam", "steel mesh"]);
    }

    #[tokio::test]
    async fn test_total_count_ignores_window() {
        let store = InMemoryStore::default();
        let scope = scope_for(CompanyId::new());
        for i in 0..12 {
            insert(&store, &scope, &format!("Item {i}"), 1.0 + i as f64).await;
        }
        let result = store
            .list(&scope, &query(&FilterInput::default(), 2, 5, None))
            .await
            .unwrap();
        assert_eq!(result.total_count, 12);
        assert_eq!(result.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_cross_tenant_rows_are_invisible() {
        let store = InMemoryStore::default();
        let owner = scope_for(CompanyId::new());
        let outsider = scope_for(CompanyId::new());
        let row = insert(&store, &owner, "Gravel", 2.0).await;

        assert!(store.get_by_id(&outsider, row.id).await.is_err());
        let patch = RowPatch {
            fields: RequestPatch::status(RequestStatus::Approved),
            updated_at: Utc::now(),
        };
        assert!(store.update(&outsider, row.id, &patch).await.is_err());
        assert_eq!(store.row(row.id).await.unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_only_requester_may_delete() {
        let store = InMemoryStore::default();
        let company = CompanyId::new();
        let requester = scope_for(company);
        let colleague = scope_for(company);
        let row = insert(&store, &requester, "Sand", 2.0).await;

        let err = store.delete(&colleague, row.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 403, .. }));
        store.delete(&requester, row.id).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_server_clock_owns_updated_at() {
        let server_time = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let store = InMemoryStore::new(Arc::new(ManualClock::new(server_time)));
        let scope = scope_for(CompanyId::new());
        let row = insert(&store, &scope, "Tiles", 2.0).await;

        let patch = RowPatch {
            fields: RequestPatch::status(RequestStatus::Approved),
            updated_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        };
        let updated = store.update(&scope, row.id, &patch).await.unwrap();
        assert_eq!(updated.updated_at, server_time);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_once() {
        let store = InMemoryStore::default();
        let scope = scope_for(CompanyId::new());
        store.fail_next(StoreCall::List, StoreError::Connection("reset".into()));

        let q = query(&FilterInput::default(), 0, 10, None);
        assert!(store.list(&scope, &q).await.is_err());
        assert!(store.list(&scope, &q).await.is_ok());
        assert_eq!(store.calls(StoreCall::List), 2);
    }
}

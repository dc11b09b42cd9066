//! Remote store seam
//!
//! [`RemoteStore`] is the raw backend contract: tenant-scoped list/detail reads,
//! single-row writes and profile lookups, failing with [`StoreError`].
//! [`StoreClient`] wraps a backend with the connectivity precondition, timeouts,
//! `updated_at` stamping, requester resolution and error classification.

pub mod client;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::{
    CompanyId, MaterialRequest, NewMaterialRequest, Priority, ProjectId, RequestId, RequestPatch,
    RequestStatus, Unit, UserId,
};
use crate::query::resolver::{Filters, QueryDescriptor, Sorting};
use crate::session::Session;

pub use client::StoreClient;
pub use memory::InMemoryStore;
pub use rest::RestStore;

/// Raw backend failures, before classification
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },

    #[error("auth failure ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed store payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn api(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        StoreError::Api {
            status,
            code: code.map(str::to_string),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn not_found() -> Self {
        Self::api(
            406,
            Some("PGRST116"),
            "JSON object requested, multiple (or no) rows returned",
        )
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::api(403, Some("42501"), message)
    }
}

/// Company plus acting user. Every store call takes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantScope {
    company_id: CompanyId,
    user_id: UserId,
}

impl TenantScope {
    /// `None` when the profile has no company yet
    pub fn from_session(session: &Session) -> Option<Self> {
        session.company_id().map(|company_id| Self {
            company_id,
            user_id: session.user_id,
        })
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

/// A filtered, sorted row window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filters: Filters,
    pub sorting: Sorting,
    pub offset: usize,
    pub limit: usize,
}

impl ListQuery {
    pub fn page(descriptor: &QueryDescriptor) -> Self {
        let (start, end) = descriptor.range();
        Self {
            filters: descriptor.filters().clone(),
            sorting: descriptor.sorting(),
            offset: start,
            limit: end + 1 - start,
        }
    }

    pub fn export(filters: Filters, sorting: Sorting, max_rows: usize) -> Self {
        Self {
            filters,
            sorting,
            offset: 0,
            limit: max_rows,
        }
    }

    /// Inclusive end of the window, as PostgREST ranges express it
    pub fn range_end(&self) -> usize {
        (self.offset + self.limit).saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListResult {
    pub rows: Vec<MaterialRequest>,
    /// Exact count over the whole filtered set, not just this window
    pub total_count: u64,
}

/// Row sent on insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequestRow {
    pub company_id: CompanyId,
    pub requested_by: UserId,
    pub material_name: String,
    pub quantity: f64,
    pub unit: Unit,
    pub priority: Priority,
    pub status: RequestStatus,
    pub notes: Option<String>,
    pub project_id: Option<ProjectId>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewRequestRow {
    pub fn new(scope: &TenantScope, input: &NewMaterialRequest, now: DateTime<Utc>) -> Self {
        Self {
            company_id: scope.company_id(),
            requested_by: scope.user_id(),
            material_name: input.material_name.trim().to_string(),
            quantity: input.quantity,
            unit: input.unit,
            priority: input.priority,
            status: RequestStatus::Pending,
            notes: input.notes.clone(),
            project_id: input.project_id,
            requested_at: now,
            updated_at: now,
        }
    }
}

/// Patch sent on update, always carrying a fresh `updated_at`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPatch {
    #[serde(flatten)]
    pub fields: RequestPatch,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub id: UserId,
    pub full_name: Option<String>,
}

/// Backend contract. Implementations must scope every call to `scope.company_id()`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list(&self, scope: &TenantScope, query: &ListQuery) -> Result<ListResult, StoreError>;

    async fn get_by_id(
        &self,
        scope: &TenantScope,
        id: RequestId,
    ) -> Result<MaterialRequest, StoreError>;

    async fn insert(
        &self,
        scope: &TenantScope,
        row: &NewRequestRow,
    ) -> Result<MaterialRequest, StoreError>;

    async fn update(
        &self,
        scope: &TenantScope,
        id: RequestId,
        patch: &RowPatch,
    ) -> Result<MaterialRequest, StoreError>;

    async fn delete(&self, scope: &TenantScope, id: RequestId) -> Result<(), StoreError>;

    /// Display names for the given users, in no particular order
    async fn profiles(
        &self,
        scope: &TenantScope,
        ids: Vec<UserId>,
    ) -> Result<Vec<RequesterProfile>, StoreError>;
}

use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::cache::{ListKey, ListPage, TicketKey};
use super::coordinator::{Fetched, QueryCoordinator};
use super::resolver::{FilterInput, PageRequest, QueryDescriptor, Sorting};
use crate::errors::AppError;

/// One consumer's current list interest.
///
/// Loading a different descriptor cancels interest in the previous one; a load
/// that was overtaken that way resolves to `Ok(None)` instead of stale data.
pub struct ListView {
    coordinator: QueryCoordinator,
    current: Mutex<Option<ListKey>>,
}

impl ListView {
    pub fn new(coordinator: QueryCoordinator) -> Self {
        Self {
            coordinator,
            current: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<QueryDescriptor> {
        self.lock().as_ref().map(|key| key.descriptor.clone())
    }

    pub async fn load(
        &self,
        filters: &FilterInput,
        page: PageRequest,
        sorting: Option<Sorting>,
    ) -> Result<Option<ListPage>, AppError> {
        let descriptor = self.coordinator.resolver().resolve(filters, page, sorting);
        self.load_descriptor(descriptor).await
    }

    pub async fn load_descriptor(
        &self,
        descriptor: QueryDescriptor,
    ) -> Result<Option<ListPage>, AppError> {
        let Some(scope) = self.coordinator.read_scope()? else {
            return self.coordinator.query(descriptor).await.map(|f| Some(f.into_inner()));
        };
        let key = ListKey {
            company_id: scope.company_id(),
            descriptor: descriptor.clone(),
        };

        let previous = self.lock().replace(key.clone());
        if let Some(previous) = previous.filter(|previous| *previous != key) {
            debug!(previous = %previous.descriptor, "Switching list interest");
            self.coordinator.cache().cancel(&TicketKey::List(previous));
        }

        match self.coordinator.query(descriptor).await? {
            Fetched::Current(page) => Ok(Some(page)),
            // Invalidated under us but still wanted: the data is good, just uncached
            Fetched::Superseded(page) if self.lock().as_ref() == Some(&key) => Ok(Some(page)),
            Fetched::Superseded(_) => Ok(None),
        }
    }

    /// Drops interest without starting another load
    pub fn clear(&self) {
        if let Some(previous) = self.lock().take() {
            self.coordinator.cache().cancel(&TicketKey::List(previous));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ListKey>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Query cache storage
//!
//! Two moka caches: list pages keyed by `(company, descriptor)` and single
//! requests keyed by `(company, id)`. Entries are immutable `Arc`s; every
//! change replaces the entry, so a snapshot is just the old `Arc`.
//!
//! Fetch tickets guard against late results: a fetch remembers the ticket it
//! started under, and the result is written only if the ticket is still
//! current. Invalidation, cancellation and mutations bump tickets.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::resolver::{PageMeta, QueryDescriptor};
use crate::config::CacheConfig;
use crate::model::{CompanyId, MaterialRequest, RequestId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub company_id: CompanyId,
    pub descriptor: QueryDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetailKey {
    pub company_id: CompanyId,
    pub id: RequestId,
}

/// One page of requests plus its pagination metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub rows: Vec<MaterialRequest>,
    pub meta: PageMeta,
}

impl ListPage {
    pub fn contains(&self, id: RequestId) -> bool {
        self.rows.iter().any(|row| row.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: DateTime<Utc>,
    /// Set by invalidation; the next read blocks on a refetch
    pub invalidated: bool,
}

impl<T: Clone> CacheEntry<T> {
    pub fn fresh(data: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            data,
            fetched_at,
            invalidated: false,
        }
    }

    fn invalidated(&self) -> Self {
        Self {
            data: self.data.clone(),
            fetched_at: self.fetched_at,
            invalidated: true,
        }
    }

    fn with_data(&self, data: T) -> Self {
        Self {
            data,
            fetched_at: self.fetched_at,
            invalidated: self.invalidated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TicketKey {
    List(ListKey),
    Detail(DetailKey),
}

/// Generation stamp a fetch must still hold when it completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    generation: u64,
}

#[derive(Debug, Default)]
struct TicketBook {
    epoch: u64,
    /// Generations are never reused, so a forgotten key cannot revive an old ticket
    last_generation: u64,
    generations: HashMap<TicketKey, u64>,
}

impl TicketBook {
    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn generation(&mut self, key: &TicketKey) -> u64 {
        if let Some(generation) = self.generations.get(key) {
            return *generation;
        }
        let generation = self.next_generation();
        self.generations.insert(key.clone(), generation);
        generation
    }

    fn bump(&mut self, key: &TicketKey) {
        let generation = self.next_generation();
        self.generations.insert(key.clone(), generation);
    }
}

type Tickets = Arc<Mutex<TicketBook>>;

/// Drops the ticket of an entry moka evicted so the book does not grow without bound
fn forget_on_eviction<K, V>(
    tickets: &Tickets,
    to_ticket: fn(&K) -> TicketKey,
) -> impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static
where
    K: Send + Sync + 'static,
{
    let tickets = tickets.clone();
    move |key, _, cause| {
        if cause.was_evicted() {
            tickets
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .generations
                .remove(&to_ticket(&key));
        }
    }
}

/// Entries that may hold one request, captured before an optimistic change
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    lists: Vec<(ListKey, Option<Arc<CacheEntry<ListPage>>>)>,
    detail: Option<(DetailKey, Option<Arc<CacheEntry<MaterialRequest>>>)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.lists.len() + usize::from(matches!(self.detail, Some((_, Some(_)))))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct QueryCache {
    lists: Cache<ListKey, Arc<CacheEntry<ListPage>>>,
    details: Cache<DetailKey, Arc<CacheEntry<MaterialRequest>>>,
    tickets: Tickets,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let tickets: Tickets = Arc::new(Mutex::new(TicketBook::default()));
        Self {
            lists: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_idle(config.gc_time())
                .eviction_listener(forget_on_eviction(&tickets, |key: &ListKey| {
                    TicketKey::List(key.clone())
                }))
                .build(),
            details: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_idle(config.gc_time())
                .eviction_listener(forget_on_eviction(&tickets, |key: &DetailKey| {
                    TicketKey::Detail(*key)
                }))
                .build(),
            tickets,
        }
    }

    pub async fn list(&self, key: &ListKey) -> Option<Arc<CacheEntry<ListPage>>> {
        self.lists.get(key).await
    }

    pub async fn detail(&self, key: &DetailKey) -> Option<Arc<CacheEntry<MaterialRequest>>> {
        self.details.get(key).await
    }

    pub async fn put_list(&self, key: ListKey, page: ListPage, fetched_at: DateTime<Utc>) {
        self.lists
            .insert(key, Arc::new(CacheEntry::fresh(page, fetched_at)))
            .await;
    }

    pub async fn put_detail(&self, key: DetailKey, row: MaterialRequest, fetched_at: DateTime<Utc>) {
        self.details
            .insert(key, Arc::new(CacheEntry::fresh(row, fetched_at)))
            .await;
    }

    /// Current ticket for `key`; hand it back to [`QueryCache::is_current`] on completion
    pub fn ticket(&self, key: &TicketKey) -> Ticket {
        let mut book = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        // Registered so namespace-wide cancellation can find it
        let generation = book.generation(key);
        Ticket {
            epoch: book.epoch,
            generation,
        }
    }

    pub fn is_current(&self, key: &TicketKey, ticket: Ticket) -> bool {
        self.ticket(key) == ticket
    }

    /// Makes every outstanding fetch of `key` stale
    pub fn cancel(&self, key: &TicketKey) {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bump(key);
    }

    /// Makes every outstanding fetch stale
    pub fn cancel_all(&self) {
        let mut book = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        book.epoch += 1;
        // Generations only matter within an epoch
        book.generations.clear();
    }

    /// Cancels in-flight list fetches for one company
    pub fn cancel_lists(&self, company_id: CompanyId) {
        let mut book = self.tickets.lock().unwrap_or_else(PoisonError::into_inner);
        let TicketBook {
            last_generation,
            generations,
            ..
        } = &mut *book;
        for (key, generation) in generations.iter_mut() {
            if matches!(key, TicketKey::List(list) if list.company_id == company_id) {
                *last_generation += 1;
                *generation = *last_generation;
            }
        }
    }

    /// Keys with a live fetch ticket
    pub fn tracked_tickets(&self) -> usize {
        self.tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generations
            .len()
    }

    fn list_keys(&self, company_id: CompanyId) -> Vec<ListKey> {
        self.lists
            .iter()
            .filter(|(key, _)| key.company_id == company_id)
            .map(|(key, _)| (*key).clone())
            .collect()
    }

    /// Marks every list page of the company invalidated and cancels their fetches
    pub async fn invalidate_lists(&self, company_id: CompanyId) {
        self.cancel_lists(company_id);
        let keys = self.list_keys(company_id);
        for key in &keys {
            if let Some(entry) = self.lists.get(key).await {
                self.lists
                    .insert(key.clone(), Arc::new(entry.invalidated()))
                    .await;
            }
        }
        debug!(company.id = %company_id, entries = keys.len(), "Invalidated list namespace");
    }

    pub async fn invalidate_detail(&self, key: DetailKey) {
        self.cancel(&TicketKey::Detail(key));
        if let Some(entry) = self.details.get(&key).await {
            self.details.insert(key, Arc::new(entry.invalidated())).await;
        }
    }

    /// Marks everything invalidated, keeping the data for stale display
    pub async fn invalidate_all(&self) {
        self.cancel_all();
        let lists: Vec<_> = self.lists.iter().collect();
        for (key, entry) in lists {
            self.lists
                .insert((*key).clone(), Arc::new(entry.invalidated()))
                .await;
        }
        let details: Vec<_> = self.details.iter().collect();
        for (key, entry) in details {
            self.details.insert(*key, Arc::new(entry.invalidated())).await;
        }
        debug!("Invalidated all cache entries");
    }

    /// Drops everything, for sign-out and user switches
    pub async fn clear(&self) {
        self.cancel_all();
        self.lists.invalidate_all();
        self.details.invalidate_all();
        self.lists.run_pending_tasks().await;
        self.details.run_pending_tasks().await;
        debug!("Cleared query cache");
    }

    /// Latest known copy of a request from entries that are still valid
    pub async fn find_row(&self, company_id: CompanyId, id: RequestId) -> Option<MaterialRequest> {
        if let Some(entry) = self.details.get(&DetailKey { company_id, id }).await {
            if !entry.invalidated {
                return Some(entry.data.clone());
            }
        }
        self.lists
            .iter()
            .filter(|(key, entry)| key.company_id == company_id && !entry.invalidated)
            .find_map(|(_, entry)| entry.data.rows.iter().find(|row| row.id == id).cloned())
    }

    /// Cancels fetches of every entry that may hold `id` and captures those entries
    pub async fn snapshot(&self, company_id: CompanyId, id: RequestId) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for key in self.list_keys(company_id) {
            if let Some(entry) = self.lists.get(&key).await {
                if entry.data.contains(id) {
                    self.cancel(&TicketKey::List(key.clone()));
                    snapshot.lists.push((key, Some(entry)));
                }
            }
        }

        let detail_key = DetailKey { company_id, id };
        self.cancel(&TicketKey::Detail(detail_key));
        let detail = self.details.get(&detail_key).await;
        snapshot.detail = Some((detail_key, detail));
        snapshot
    }

    /// Puts every captured entry back exactly as it was
    pub async fn restore(&self, snapshot: Snapshot) {
        for (key, entry) in snapshot.lists {
            match entry {
                Some(entry) => self.lists.insert(key, entry).await,
                None => self.lists.invalidate(&key).await,
            }
        }
        if let Some((key, entry)) = snapshot.detail {
            match entry {
                Some(entry) => self.details.insert(key, entry).await,
                None => self.details.invalidate(&key).await,
            }
        }
    }

    /// Applies `edit` to the request wherever the snapshot found it
    pub async fn patch_row<F>(&self, snapshot: &Snapshot, id: RequestId, edit: F)
    where
        F: Fn(&mut MaterialRequest),
    {
        for (key, entry) in &snapshot.lists {
            let Some(entry) = entry else { continue };
            let mut page = entry.data.clone();
            for row in page.rows.iter_mut().filter(|row| row.id == id) {
                edit(row);
            }
            self.lists
                .insert(key.clone(), Arc::new(entry.with_data(page)))
                .await;
        }
        if let Some((key, Some(entry))) = &snapshot.detail {
            let mut row = entry.data.clone();
            edit(&mut row);
            self.details.insert(*key, Arc::new(entry.with_data(row))).await;
        }
    }

    /// Removes the request from every captured page, recomputing page metadata
    pub async fn remove_row(&self, snapshot: &Snapshot, id: RequestId) {
        for (key, entry) in &snapshot.lists {
            let Some(entry) = entry else { continue };
            let mut page = entry.data.clone();
            let before = page.rows.len();
            page.rows.retain(|row| row.id != id);
            let removed = (before - page.rows.len()) as u64;
            page.meta = key
                .descriptor
                .page_meta(page.meta.total_count.saturating_sub(removed));
            self.lists
                .insert(key.clone(), Arc::new(entry.with_data(page)))
                .await;
        }
        if let Some((key, Some(_))) = &snapshot.detail {
            self.details.invalidate(key).await;
        }
    }
}

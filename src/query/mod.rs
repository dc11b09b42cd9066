// Client-side query layer: descriptors, cache, retries and the coordinator

pub mod cache;
pub mod coordinator;
pub mod resolver;
pub mod retry;
pub mod view;

pub use cache::{CacheEntry, ListPage, QueryCache};
pub use coordinator::{Fetched, QueryCoordinator};
pub use resolver::{
    Choice, FilterInput, Filters, PageMeta, PageRequest, QueryDescriptor, Resolver, SortColumn,
    SortDirection, Sorting,
};
pub use retry::RetryPolicy;
pub use view::ListView;

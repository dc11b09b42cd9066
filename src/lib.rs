// Material Tracker Library - construction material requests over a remote store
// This exposes the core components for embedding and integration tests

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod export;
pub mod model;
pub mod observability;
pub mod query;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use errors::{classify, classify_store_error, AppError, ErrorKind, Severity, StoreOp};
pub use export::{to_csv, ExportError};
pub use model::{
    CompanyId, MaterialRequest, NewMaterialRequest, Priority, ProjectId, RequestId, RequestPatch,
    RequestStatus, Unit, UserId,
};
pub use observability::{OperationTimer, TrackerMetrics, TrackerStats};
pub use query::{
    FilterInput, Fetched, ListPage, ListView, PageMeta, PageRequest, QueryCoordinator,
    QueryDescriptor, Resolver, SortColumn, SortDirection, Sorting,
};
pub use session::{AuthEvent, Profile, Session, SessionHandle, SessionProvider};
pub use store::{InMemoryStore, RemoteStore, RestStore, StoreError, TenantScope};
pub use telemetry::{init_telemetry, generate_correlation_id};
pub use workflow::{StatusTransition, StatusWorkflow, TransitionError};

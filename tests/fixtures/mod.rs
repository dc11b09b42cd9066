//! Shared fixtures: a seeded in-memory backend and a signed-in coordinator
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use material_tracker::{
    CompanyId, ConnectivityMonitor, InMemoryStore, ManualClock, MaterialRequest, Priority,
    Profile, QueryCoordinator, RequestId, RequestStatus, Session, SessionHandle, TrackerConfig,
    Unit, UserId,
};

pub const COMPANY: &str = "c0a80101-0000-4000-8000-000000000001";
pub const OTHER_COMPANY: &str = "c0a80101-0000-4000-8000-000000000002";
pub const ALICE: &str = "a1b2c3d4-0000-4000-8000-0000000000aa";
pub const BOB: &str = "b2c3d4e5-0000-4000-8000-0000000000bb";
pub const CEMENT: &str = "5b0f6c7e-2f4a-4c1e-9d7b-0a1e2f3c4d5e";
pub const REBAR: &str = "9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b";

pub fn company() -> CompanyId {
    COMPANY.parse().expect("fixture company id")
}

pub fn user(id: &str) -> UserId {
    id.parse().expect("fixture user id")
}

pub fn request_id(id: &str) -> RequestId {
    id.parse().expect("fixture request id")
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
}

/// Rows as the hosted store returns them
pub fn load_rows() -> Vec<MaterialRequest> {
    let json = include_str!("material_requests.json");
    serde_json::from_str(json).expect("Failed to parse material request fixture JSON")
}

pub fn session_for(user_id: &str, company_id: Option<CompanyId>, name: &str) -> Session {
    Session::new(
        Profile {
            id: user(user_id),
            full_name: Some(name.to_string()),
            company_id,
        },
        format!("token-{name}"),
    )
}

pub fn material_request(
    requested_by: UserId,
    name: &str,
    status: RequestStatus,
    requested_at: DateTime<Utc>,
) -> MaterialRequest {
    MaterialRequest {
        id: RequestId::new(),
        company_id: company(),
        project_id: None,
        material_name: name.to_string(),
        quantity: 10.0,
        unit: Unit::Kg,
        status,
        priority: Priority::Medium,
        requested_by,
        requester_name: None,
        requested_at,
        notes: None,
        created_at: requested_at,
        updated_at: requested_at,
    }
}

pub struct Harness {
    pub coordinator: QueryCoordinator,
    pub store: Arc<InMemoryStore>,
    pub session: Arc<SessionHandle>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub clock: Arc<ManualClock>,
    pub server_clock: Arc<ManualClock>,
}

impl Harness {
    /// Alice signed in to the fixture company, both fixture rows seeded
    pub async fn new() -> Self {
        Self::with_config(TrackerConfig::default()).await
    }

    pub async fn with_config(config: TrackerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        // Server timestamps always differ from locally stamped ones
        let server_clock = Arc::new(ManualClock::new(start() + Duration::seconds(5)));
        let store = Arc::new(InMemoryStore::new(server_clock.clone()));
        for row in load_rows() {
            store.seed(row).await;
        }
        store.add_profile(user(ALICE), "Alice Foreman").await;
        store.add_profile(user(BOB), "Bob Mason").await;

        let session = Arc::new(SessionHandle::signed_in(session_for(
            ALICE,
            Some(company()),
            "alice",
        )));
        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        let coordinator = QueryCoordinator::new(
            store.clone(),
            session.clone(),
            connectivity.clone(),
            clock.clone(),
            &config,
        );

        Self {
            coordinator,
            store,
            session,
            connectivity,
            clock,
            server_clock,
        }
    }

    pub async fn seed_many(&self, count: usize) {
        for i in 0..count {
            let at = start() - Duration::hours(i as i64 + 1);
            self.store
                .seed(material_request(
                    user(BOB),
                    &format!("Gravel lot {i:02}"),
                    RequestStatus::Pending,
                    at,
                ))
                .await;
        }
    }
}

/// Polls `check` while letting spawned listeners run
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    ListQuery, ListResult, NewRequestRow, RemoteStore, RequesterProfile, RowPatch, StoreError,
    TenantScope,
};
use crate::config::StoreConfig;
use crate::model::{MaterialRequest, RequestId, UserId};
use crate::session::SessionProvider;

const REQUESTS_TABLE: &str = "material_requests";
const PROFILES_TABLE: &str = "profiles";
/// Asks PostgREST for a single object; zero rows becomes a PGRST116 error
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// PostgREST-backed store with client-side rate limiting
pub struct RestStore {
    http: reqwest::Client,
    rest_url: String,
    api_key: Option<String>,
    session: Arc<dyn SessionProvider>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl RestStore {
    pub fn new(config: &StoreConfig, session: Arc<dyn SessionProvider>) -> Result<Self, StoreError> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            session,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    async fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.rate_limiter.until_ready().await;

        let mut builder = self
            .http
            .request(method, format!("{}/{}", self.rest_url, table));
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        let bearer = self
            .session
            .current()
            .map(|session| session.access_token)
            .or_else(|| self.api_key.clone());
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn scoped(
        &self,
        method: Method,
        scope: &TenantScope,
        id: Option<RequestId>,
    ) -> RequestBuilder {
        let mut builder = self
            .request(method, REQUESTS_TABLE)
            .await
            .query(&[("company_id", format!("eq.{}", scope.company_id()))]);
        if let Some(id) = id {
            builder = builder.query(&[("id", format!("eq.{id}"))]);
        }
        builder
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

async fn send(builder: RequestBuilder) -> Result<Response, StoreError> {
    let response = builder.send().await?;
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> StoreError {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return StoreError::Http(err),
    };

    match serde_json::from_str::<PostgrestErrorBody>(&body) {
        Ok(parsed) => StoreError::Api {
            status: status.as_u16(),
            code: parsed.code,
            message: parsed.message.unwrap_or_else(|| body.clone()),
            details: parsed.details,
            hint: parsed.hint,
        },
        Err(_) => StoreError::Api {
            status: status.as_u16(),
            code: None,
            message: if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            },
            details: None,
            hint: None,
        },
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Escapes LIKE wildcards so user text matches literally inside `ilike.*..*`
fn like_literal(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '%' | '_' => {
                escaped.push('\\');
                escaped.push(c);
            }
            // PostgREST rewrites every `*` to `%`, escaped or not
            '*' => escaped.push('_'),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Total from `Content-Range: 0-9/95` (or `*/0` for an empty window)
fn parse_total(header: Option<&HeaderValue>) -> Option<u64> {
    header?.to_str().ok()?.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn list(&self, scope: &TenantScope, query: &ListQuery) -> Result<ListResult, StoreError> {
        let mut params: Vec<(&str, String)> = vec![("select", "*".to_string())];
        if let Some(status) = query.filters.status() {
            params.push(("status", format!("eq.{status}")));
        }
        if let Some(priority) = query.filters.priority() {
            params.push(("priority", format!("eq.{priority}")));
        }
        if let Some(search) = query.filters.search() {
            params.push(("material_name", format!("ilike.*{}*", like_literal(search))));
        }
        let direction = if query.sorting.ascending() { "asc" } else { "desc" };
        params.push(("order", format!("{}.{direction}", query.sorting.column.as_str())));
        params.push(("offset", query.offset.to_string()));
        params.push(("limit", query.limit.to_string()));

        let builder = self
            .scoped(Method::GET, scope, None)
            .await
            .query(&params)
            .header("Prefer", "count=exact");
        let response = send(builder).await?;

        let total = parse_total(response.headers().get(CONTENT_RANGE));
        let rows: Vec<MaterialRequest> = decode(response).await?;
        let total_count = total.unwrap_or_else(|| {
            warn!("Store response lacked an exact count; estimating from the window");
            (query.offset + rows.len()) as u64
        });
        debug!(rows = rows.len(), total_count, "Listed material requests");
        Ok(ListResult { rows, total_count })
    }

    async fn get_by_id(
        &self,
        scope: &TenantScope,
        id: RequestId,
    ) -> Result<MaterialRequest, StoreError> {
        let builder = self
            .scoped(Method::GET, scope, Some(id))
            .await
            .query(&[("select", "*")])
            .header(ACCEPT, SINGLE_OBJECT);
        decode(send(builder).await?).await
    }

    async fn insert(
        &self,
        _scope: &TenantScope,
        row: &NewRequestRow,
    ) -> Result<MaterialRequest, StoreError> {
        let builder = self
            .request(Method::POST, REQUESTS_TABLE)
            .await
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(row);
        decode(send(builder).await?).await
    }

    async fn update(
        &self,
        scope: &TenantScope,
        id: RequestId,
        patch: &RowPatch,
    ) -> Result<MaterialRequest, StoreError> {
        let builder = self
            .scoped(Method::PATCH, scope, Some(id))
            .await
            .header("Prefer", "return=representation")
            .header(ACCEPT, SINGLE_OBJECT)
            .json(patch);
        decode(send(builder).await?).await
    }

    async fn delete(&self, scope: &TenantScope, id: RequestId) -> Result<(), StoreError> {
        let builder = self
            .scoped(Method::DELETE, scope, Some(id))
            .await
            .header("Prefer", "return=representation");
        let deleted: Vec<serde_json::Value> = decode(send(builder).await?).await?;
        // Row-level security hides rows the caller may not delete
        if deleted.is_empty() {
            return Err(StoreError::not_found());
        }
        Ok(())
    }

    async fn profiles(
        &self,
        scope: &TenantScope,
        ids: Vec<UserId>,
    ) -> Result<Vec<RequesterProfile>, StoreError> {
        let list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let builder = self
            .request(Method::GET, PROFILES_TABLE)
            .await
            .query(&[
                ("select", "id,full_name".to_string()),
                ("id", format!("in.({list})")),
                ("company_id", format!("eq.{}", scope.company_id())),
            ]);
        decode(send(builder).await?).await
    }
}

//! HTTP implementation of the `ApiClient` port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use studysync_core::error::ApiError;
use studysync_core::ports::{ApiClient, Page, PageRequest};
use studysync_core::store::{Database, Properties};
use tracing::debug;

const USER_AGENT: &str = concat!("studysync/", env!("CARGO_PKG_VERSION"));

/// Talks to the remote REST API. The bearer token is read from the store on
/// every request so `login` takes effect without rebuilding the client.
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    db: Arc<Database>,
}

impl HttpApiClient {
    pub fn new(base_url: &str, timeout: Duration, db: Arc<Database>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            db,
        })
    }

    fn url(&self, request: &PageRequest) -> Result<Url, ApiError> {
        if let Some(next) = &request.next_url {
            return Url::parse(next).map_err(|e| ApiError::Fatal(format!("next url: {e}")));
        }
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| ApiError::Fatal(format!("request url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(at) = request.updated_after {
                query.append_pair(
                    "updated_after",
                    &at.to_rfc3339_opts(SecondsFormat::Micros, true),
                );
            }
            if !request.ids.is_empty() {
                let ids = request
                    .ids
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                query.append_pair("ids", &ids);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn fetch(&self, request: &PageRequest) -> Result<Page, ApiError> {
        let token = self
            .db
            .with_conn(Properties::api_token)
            .map_err(|e| ApiError::Transient(format!("reading token: {e}")))?
            .ok_or_else(|| ApiError::Unauthorized("no api token configured".to_string()))?;
        let url = self.url(request)?;
        debug!(%url, "GET");

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, retry_after, &body));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Transient(format!("reading body: {e}")))?;
        decode_page(body)
    }
}

/// Map a non-success status onto the error taxonomy the runner acts on.
pub fn classify(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ApiError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(detail),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT => ApiError::Transient(detail),
        s if s.is_server_error() => ApiError::Transient(detail),
        _ => ApiError::Fatal(detail),
    }
}

/// `Retry-After` in delta seconds. HTTP dates are not used by the API.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// A collection becomes its `data` array plus `pages.next_url`; anything else
/// is a single record.
pub fn decode_page(body: Value) -> Result<Page, ApiError> {
    if body.get("object").and_then(Value::as_str) != Some("collection") {
        if !body.is_object() {
            return Err(ApiError::Fatal("response is not a json object".to_string()));
        }
        return Ok(Page::last(vec![body]));
    }
    let next = body
        .pointer("/pages/next_url")
        .and_then(Value::as_str)
        .map(str::to_string);
    let records = match body.get("data") {
        Some(Value::Array(records)) => records.clone(),
        _ => return Err(ApiError::Fatal("collection without data array".to_string())),
    };
    Ok(Page { records, next })
}

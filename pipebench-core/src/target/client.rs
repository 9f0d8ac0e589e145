use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pipebench_http::{HttpClient, HttpRequest, HttpResponse};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::types::{
    IconResponse, InitializeResponse, Livecomment, LivecommentRequest, Livestream, LoginRequest,
    RegisterRequest, ReservationRequest, Statistics, User,
};
use crate::failure::BenchError;

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// A failed API call. Rate limiting is kept apart from real failures
/// because it only feeds backpressure.
#[derive(Debug, Clone)]
pub enum ApiError {
    RateLimited,
    Failed(BenchError),
}

impl From<BenchError> for ApiError {
    fn from(err: BenchError) -> Self {
        Self::Failed(err)
    }
}

impl From<ApiError> for BenchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::RateLimited => BenchError::application("request was rate limited (429)"),
            ApiError::Failed(err) => err,
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// One user's view of the target: a shared connection pool plus this
/// user's session cookie.
#[derive(Debug, Clone)]
pub struct PipeClient {
    http: HttpClient,
    base_url: Arc<str>,
    request_timeout: Duration,
    cookie: Option<String>,
}

impl PipeClient {
    pub fn new(http: HttpClient, base_url: &str, request_timeout: Duration) -> Self {
        Self {
            http,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            request_timeout,
            cookie: None,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.cookie.is_some()
    }

    pub async fn initialize(&self, deadline: Instant) -> ApiResult<InitializeResponse> {
        let what = "POST /api/initialize";
        let req = json_post(&self.url("/api/initialize"), &serde_json::json!({}), what)?;
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_OK)?;
        decode(what, &res)
    }

    pub async fn register(&self, body: &RegisterRequest, deadline: Instant) -> ApiResult<User> {
        let what = "POST /api/register";
        let req = json_post(&self.url("/api/register"), body, what)?;
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_CREATED)?;
        decode(what, &res)
    }

    /// Logs in and keeps the session cookie for later calls.
    pub async fn login(&mut self, name: &str, password: &str, deadline: Instant) -> ApiResult<()> {
        let what = "POST /api/login";
        let body = LoginRequest {
            username: name.to_string(),
            password: password.to_string(),
        };
        let req = json_post(&self.url("/api/login"), &body, what)?;
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_OK)?;

        let cookie = res
            .header_values("set-cookie")
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .find(|v| v.contains('='))
            .ok_or_else(|| BenchError::critical(format!("{what}: no session cookie was set")))?;
        self.cookie = Some(cookie.to_string());
        Ok(())
    }

    pub async fn post_icon(&self, image: Bytes, deadline: Instant) -> ApiResult<IconResponse> {
        let what = "POST /api/icon";
        let req = HttpRequest::post(&self.url("/api/icon"), image)
            .with_header("content-type", "image/jpeg");
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_CREATED)?;
        decode(what, &res)
    }

    pub async fn user_icon(&self, name: &str, deadline: Instant) -> ApiResult<Bytes> {
        let what = "GET /api/user/{name}/icon";
        let req = HttpRequest::get(&self.url(&format!("/api/user/{name}/icon")));
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_OK)?;
        Ok(res.body)
    }

    pub async fn reserve_livestream(
        &self,
        body: &ReservationRequest,
        deadline: Instant,
    ) -> ApiResult<Livestream> {
        let what = "POST /api/livestream/reservation";
        let req = json_post(&self.url("/api/livestream/reservation"), body, what)?;
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_CREATED)?;
        decode(what, &res)
    }

    pub async fn search_livestreams(&self, deadline: Instant) -> ApiResult<Vec<Livestream>> {
        let what = "GET /api/livestream/search";
        let req = HttpRequest::get(&self.url("/api/livestream/search"));
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_OK)?;
        decode(what, &res)
    }

    pub async fn post_livecomment(
        &self,
        livestream: i64,
        body: &LivecommentRequest,
        deadline: Instant,
    ) -> ApiResult<Livecomment> {
        let what = "POST /api/livestream/{id}/livecomment";
        let url = self.url(&format!("/api/livestream/{livestream}/livecomment"));
        let req = json_post(&url, body, what)?;
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_CREATED)?;
        decode(what, &res)
    }

    pub async fn livestream_statistics(
        &self,
        livestream: i64,
        deadline: Instant,
    ) -> ApiResult<Statistics> {
        let what = "GET /api/livestream/{id}/statistics";
        let req = HttpRequest::get(&self.url(&format!("/api/livestream/{livestream}/statistics")));
        let res = self.send(what, req, deadline).await?;
        expect_status(what, &res, STATUS_OK)?;
        decode(what, &res)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends with the session cookie attached. A transient transport failure
    /// gets exactly one more attempt; every attempt is cut off at `deadline`.
    async fn send(
        &self,
        what: &str,
        req: HttpRequest,
        deadline: Instant,
    ) -> ApiResult<HttpResponse> {
        let req = match &self.cookie {
            Some(cookie) => req.with_header("cookie", cookie.clone()),
            None => req,
        };

        let mut retried = false;
        loop {
            let budget = self
                .request_timeout
                .min(deadline.saturating_duration_since(Instant::now()));
            if budget.is_zero() {
                let err = BenchError::timeout(format!("{what}: no time left before the deadline"));
                return Err(err.into());
            }

            match self.http.request(req.clone().with_timeout(budget)).await {
                Ok(res) if res.status == STATUS_TOO_MANY_REQUESTS => {
                    return Err(ApiError::RateLimited);
                }
                Ok(res) => return Ok(res),
                Err(err) if !retried && err.is_transient() => {
                    tracing::debug!(request = what, error = %err, "retrying after transient failure");
                    retried = true;
                }
                Err(err) => return Err(BenchError::from_http(what, &err).into()),
            }
        }
    }
}

fn json_post<T: Serialize>(url: &str, body: &T, what: &str) -> ApiResult<HttpRequest> {
    let encoded = serde_json::to_vec(body).map_err(|e| {
        BenchError::application(format!("{what}: failed to encode request")).with_cause(e)
    })?;
    Ok(HttpRequest::post(url, Bytes::from(encoded))
        .with_header("content-type", "application/json"))
}

fn expect_status(what: &str, res: &HttpResponse, expected: u16) -> ApiResult<()> {
    if res.status == expected {
        return Ok(());
    }
    Err(BenchError::application(format!(
        "{what}: unexpected status {} (expected {expected})",
        res.status
    ))
    .into())
}

/// A body that does not match the documented shape breaks the API contract.
fn decode<T: DeserializeOwned>(what: &str, res: &HttpResponse) -> ApiResult<T> {
    serde_json::from_slice(&res.body).map_err(|e| {
        BenchError::critical(format!("{what}: malformed response body"))
            .with_cause(e)
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::ErrorCategory;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::from(body.to_string()),
            headers: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn unexpected_status_is_an_application_error() {
        match expect_status("GET /x", &response(500, ""), STATUS_OK) {
            Err(ApiError::Failed(err)) => {
                assert_eq!(err.category(), ErrorCategory::Application);
                assert_eq!(err.message(), "GET /x: unexpected status 500 (expected 200)");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_body_is_critical() {
        match decode::<Statistics>("GET /stats", &response(200, "{\"total\": 1}")) {
            Err(ApiError::Failed(err)) => assert_eq!(err.category(), ErrorCategory::Critical),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_deadline_fails_without_sending() {
        let client = PipeClient::new(
            HttpClient::default(),
            "http://127.0.0.1:9",
            Duration::from_secs(1),
        );
        match client.search_livestreams(Instant::now()).await {
            Err(ApiError::Failed(err)) => assert_eq!(err.category(), ErrorCategory::Timeout),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

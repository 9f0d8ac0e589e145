use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub mod dns;
pub use dns::{DnsServer, Zone};

pub const PATH_INITIALIZE: &str = "/api/initialize";
pub const PATH_REGISTER: &str = "/api/register";
pub const PATH_LOGIN: &str = "/api/login";
pub const PATH_ICON: &str = "/api/icon";
pub const PATH_USER_ICON: &str = "/api/user/{name}/icon";
pub const PATH_RESERVATION: &str = "/api/livestream/reservation";
pub const PATH_SEARCH: &str = "/api/livestream/search";
pub const PATH_LIVECOMMENT: &str = "/api/livestream/{id}/livecomment";
pub const PATH_STATISTICS: &str = "/api/livestream/{id}/statistics";

pub const SESSION_COOKIE: &str = "pipe_session";
pub const DEFAULT_BASE_DOMAIN: &str = "u.isucon.dev";

/// Misbehaviour the fake target can be asked to exhibit.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Acknowledge tips without persisting them.
    pub drop_tips: bool,
    /// Delay added to every request.
    pub latency: Option<Duration>,
    /// Answer every live comment with 429.
    pub rate_limit_comments: bool,
    /// Register users without provisioning their subdomain.
    pub skip_dns_provisioning: bool,
}

#[derive(Debug, Clone)]
pub struct TestServerOptions {
    pub faults: Faults,
    pub base_domain: String,
    pub language: String,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            faults: Faults::default(),
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            language: "rust".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    tips_received: Arc<AtomicU64>,
    initialize_calls: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn tips_received(&self) -> u64 {
        self.tips_received.load(Ordering::Relaxed)
    }

    pub fn initialize_calls(&self) -> u64 {
        self.initialize_calls.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct User {
    id: i64,
    password: String,
    icon: Option<Bytes>,
}

#[derive(Debug)]
struct Livestream {
    id: i64,
    owner: String,
    title: String,
    total_tips: i64,
}

#[derive(Debug, Default)]
struct Store {
    users: HashMap<String, User>,
    sessions: HashMap<String, String>,
    livestreams: Vec<Livestream>,
    next_id: i64,
}

impl Store {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone)]
struct App {
    stats: TestServerStats,
    options: Arc<TestServerOptions>,
    store: Arc<Mutex<Store>>,
    zone: Zone,
}

impl App {
    async fn enter(&self) {
        self.stats.inc_requests_total();
        if let Some(latency) = self.options.faults.latency {
            sleep(latency).await;
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session_user(&self, headers: &HeaderMap) -> Option<String> {
        let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
        let token = cookies.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == SESSION_COOKIE).then(|| v.to_string())
        })?;
        self.store().sessions.get(&token).cloned()
    }
}

#[derive(Debug, Serialize)]
struct InitializeResponse {
    language: String,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    #[allow(dead_code)]
    display_name: String,
    #[allow(dead_code)]
    description: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct IconResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ReservationRequest {
    title: String,
    #[allow(dead_code)]
    description: String,
    start_at: i64,
    end_at: i64,
}

#[derive(Debug, Serialize)]
struct LivestreamResponse {
    id: i64,
    title: String,
    owner: UserName,
}

#[derive(Debug, Serialize)]
struct UserName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LivecommentRequest {
    comment: String,
    tip: i64,
}

#[derive(Debug, Serialize)]
struct LivecommentResponse {
    id: i64,
    comment: String,
    tip: i64,
}

#[derive(Debug, Serialize)]
struct StatisticsResponse {
    total_tips: i64,
}

fn status(code: StatusCode) -> Response {
    code.into_response()
}

async fn handle_initialize(State(app): State<App>) -> Response {
    app.enter().await;
    app.stats.initialize_calls.fetch_add(1, Ordering::Relaxed);
    *app.store() = Store::default();
    app.zone.clear();

    Json(InitializeResponse {
        language: app.options.language.clone(),
    })
    .into_response()
}

async fn handle_register(State(app): State<App>, Json(req): Json<RegisterRequest>) -> Response {
    app.enter().await;
    if req.name.is_empty() || req.password.is_empty() {
        return status(StatusCode::BAD_REQUEST);
    }

    let id = {
        let mut store = app.store();
        if store.users.contains_key(&req.name) {
            return status(StatusCode::BAD_REQUEST);
        }
        let id = store.next_id();
        store.users.insert(
            req.name.clone(),
            User {
                id,
                password: req.password,
                icon: None,
            },
        );
        id
    };

    if !app.options.faults.skip_dns_provisioning {
        app.zone.provision(&req.name);
    }

    (
        StatusCode::CREATED,
        Json(UserResponse { id, name: req.name }),
    )
        .into_response()
}

async fn handle_login(State(app): State<App>, Json(req): Json<LoginRequest>) -> Response {
    app.enter().await;

    let token = {
        let mut store = app.store();
        let ok = store
            .users
            .get(&req.username)
            .is_some_and(|u| u.password == req.password);
        if !ok {
            return status(StatusCode::UNAUTHORIZED);
        }
        let token = format!("{:016x}", store.next_id());
        store.sessions.insert(token.clone(), req.username.clone());
        token
    };

    let user_id = app
        .store()
        .users
        .get(&req.username)
        .map(|u| u.id)
        .unwrap_or_default();

    (
        [(
            header::SET_COOKIE,
            format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly"),
        )],
        Json(UserResponse {
            id: user_id,
            name: req.username,
        }),
    )
        .into_response()
}

async fn handle_icon(State(app): State<App>, headers: HeaderMap, body: Bytes) -> Response {
    app.enter().await;
    let Some(name) = app.session_user(&headers) else {
        return status(StatusCode::UNAUTHORIZED);
    };
    if body.is_empty() {
        return status(StatusCode::BAD_REQUEST);
    }

    let mut store = app.store();
    let id = store.next_id();
    match store.users.get_mut(&name) {
        Some(user) => user.icon = Some(body),
        None => return status(StatusCode::UNAUTHORIZED),
    }

    (StatusCode::CREATED, Json(IconResponse { id })).into_response()
}

async fn handle_user_icon(State(app): State<App>, Path(name): Path<String>) -> Response {
    app.enter().await;
    let icon = app.store().users.get(&name).and_then(|u| u.icon.clone());
    match icon {
        Some(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        None => status(StatusCode::NOT_FOUND),
    }
}

async fn handle_reservation(
    State(app): State<App>,
    headers: HeaderMap,
    Json(req): Json<ReservationRequest>,
) -> Response {
    app.enter().await;
    let Some(owner) = app.session_user(&headers) else {
        return status(StatusCode::UNAUTHORIZED);
    };
    if req.title.is_empty() || req.end_at <= req.start_at {
        return status(StatusCode::BAD_REQUEST);
    }

    let mut store = app.store();
    let id = store.next_id();
    store.livestreams.push(Livestream {
        id,
        owner: owner.clone(),
        title: req.title.clone(),
        total_tips: 0,
    });

    (
        StatusCode::CREATED,
        Json(LivestreamResponse {
            id,
            title: req.title,
            owner: UserName { name: owner },
        }),
    )
        .into_response()
}

async fn handle_search(State(app): State<App>) -> Response {
    app.enter().await;
    let store = app.store();
    let found: Vec<LivestreamResponse> = store
        .livestreams
        .iter()
        .rev()
        .take(50)
        .map(|l| LivestreamResponse {
            id: l.id,
            title: l.title.clone(),
            owner: UserName {
                name: l.owner.clone(),
            },
        })
        .collect();
    Json(found).into_response()
}

async fn handle_livecomment(
    State(app): State<App>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<LivecommentRequest>,
) -> Response {
    app.enter().await;
    if app.session_user(&headers).is_none() {
        return status(StatusCode::UNAUTHORIZED);
    }
    if app.options.faults.rate_limit_comments {
        return status(StatusCode::TOO_MANY_REQUESTS);
    }
    if req.tip < 0 {
        return status(StatusCode::BAD_REQUEST);
    }

    let mut store = app.store();
    let comment_id = store.next_id();
    let drop_tips = app.options.faults.drop_tips;
    let Some(stream) = store.livestreams.iter_mut().find(|l| l.id == id) else {
        return status(StatusCode::NOT_FOUND);
    };
    if !drop_tips {
        stream.total_tips += req.tip;
    }
    app.stats
        .tips_received
        .fetch_add(u64::try_from(req.tip).unwrap_or_default(), Ordering::Relaxed);

    (
        StatusCode::CREATED,
        Json(LivecommentResponse {
            id: comment_id,
            comment: req.comment,
            tip: req.tip,
        }),
    )
        .into_response()
}

async fn handle_statistics(
    State(app): State<App>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    app.enter().await;
    if app.session_user(&headers).is_none() {
        return status(StatusCode::UNAUTHORIZED);
    }
    let total = app
        .store()
        .livestreams
        .iter()
        .find(|l| l.id == id)
        .map(|l| l.total_tips);
    match total {
        Some(total_tips) => Json(StatisticsResponse { total_tips }).into_response(),
        None => status(StatusCode::NOT_FOUND),
    }
}

fn router(app: App) -> Router {
    Router::new()
        .route(PATH_INITIALIZE, post(handle_initialize))
        .route(PATH_REGISTER, post(handle_register))
        .route(PATH_LOGIN, post(handle_login))
        .route(PATH_ICON, post(handle_icon))
        .route(PATH_USER_ICON, get(handle_user_icon))
        .route(PATH_RESERVATION, post(handle_reservation))
        .route(PATH_SEARCH, get(handle_search))
        .route(PATH_LIVECOMMENT, post(handle_livecomment))
        .route(PATH_STATISTICS, get(handle_statistics))
        .with_state(app)
}

/// Fake target: the HTTP API plus an authoritative nameserver for
/// `<user>.<base_domain>`.
pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    dns: Option<DnsServer>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(TestServerOptions::default()).await
    }

    pub async fn start_with(options: TestServerOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let zone = Zone::new(&options.base_domain);
        let dns = DnsServer::start(zone.clone()).await?;

        let app = router(App {
            stats: stats.clone(),
            options: Arc::new(options),
            store: Arc::new(Mutex::new(Store::default())),
            zone,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            dns: Some(dns),
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Address of the nameserver answering for the base domain.
    pub fn dns_addr(&self) -> Option<SocketAddr> {
        self.dns.as_ref().map(DnsServer::addr)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        if let Some(dns) = self.dns.take() {
            dns.shutdown().await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}

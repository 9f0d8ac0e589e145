use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http_body_util::{BodyExt as _, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::Instant;

use super::{Error, HttpRequest, HttpResponse, Result};

const DEFAULT_USER_AGENT: &str = concat!("pipebench/", env!("CARGO_PKG_VERSION"));

/// Connection pool settings shared by every request a client sends.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// `None` leaves connecting bounded only by the request timeout.
    pub connect_timeout: Option<Duration>,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(5)),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 256,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Cheap to clone; clones share one pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pool: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    user_agent: HeaderValue,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl HttpClient {
    pub fn new(options: ClientOptions) -> Self {
        let mut tcp = HttpConnector::new();
        tcp.enforce_http(false);
        tcp.set_nodelay(true);
        tcp.set_connect_timeout(options.connect_timeout);

        let tls = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(tcp);

        let pool = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(options.pool_idle_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build(tls);

        let user_agent = HeaderValue::from_str(&options.user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT));

        Self { pool, user_agent }
    }

    /// Sends `req` and reads the whole body. Any status is a response; only
    /// transport trouble and the request timeout are errors.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let budget = req.timeout;
        let request = self.build(req)?;

        let started = Instant::now();
        let exchange = async {
            let (parts, body) = self.pool.request(request).await?.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, body))
        };
        let (parts, body) = match budget {
            Some(budget) => tokio::time::timeout(budget, exchange)
                .await
                .map_err(|_| Error::Timeout(budget))??,
            None => exchange.await?,
        };

        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            body,
            headers,
            elapsed: started.elapsed(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }

    fn build(&self, req: HttpRequest) -> Result<http::Request<Full<Bytes>>> {
        let url = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::UnsupportedScheme(req.url));
        }
        let uri: http::Uri = url
            .as_str()
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = http::Request::builder().method(req.method.clone()).uri(uri);
        if !req.has_header("user-agent") {
            builder = builder.header(USER_AGENT, self.user_agent.clone());
        }
        for (name, value) in &req.headers {
            let invalid = || Error::Header { name: name.clone() };
            let name_ok = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value_ok = HeaderValue::from_str(value).map_err(|_| invalid())?;
            builder = builder.header(name_ok, value_ok);
        }
        Ok(builder.body(Full::new(req.body))?)
    }
}

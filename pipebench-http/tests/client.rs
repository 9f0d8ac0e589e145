use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use pipebench_http::{HttpClient, HttpRequest};
use pipebench_testserver::{Faults, TestServer, TestServerOptions};

#[tokio::test]
async fn get_returns_status_and_body() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let client = HttpClient::default();

    let res = client
        .get(&format!("{}/api/livestream/search", server.base_url()))
        .await?;
    server.shutdown().await;

    anyhow::ensure!(res.is_success(), "status: {}", res.status);
    anyhow::ensure!(res.body_utf8() == Some("[]"), "body: {:?}", res.body_utf8());
    anyhow::ensure!(
        res.header("Content-Type")
            .is_some_and(|v| v.starts_with("application/json")),
        "headers: {:?}",
        res.headers
    );
    Ok(())
}

#[tokio::test]
async fn error_statuses_are_responses_not_errors() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let client = HttpClient::default();

    let req = HttpRequest::post(
        &format!("{}/api/login", server.base_url()),
        Bytes::from_static(br#"{"username":"nobody","password":"x"}"#),
    )
    .with_header("content-type", "application/json");
    let res = client.request(req).await?;
    server.shutdown().await;

    anyhow::ensure!(res.status == 401, "status: {}", res.status);
    anyhow::ensure!(!res.is_success());
    Ok(())
}

#[tokio::test]
async fn slow_responses_time_out() -> anyhow::Result<()> {
    let server = TestServer::start_with(TestServerOptions {
        faults: Faults {
            latency: Some(Duration::from_millis(500)),
            ..Faults::default()
        },
        ..TestServerOptions::default()
    })
    .await
    .context("start test server")?;
    let client = HttpClient::default();

    let req = HttpRequest::get(&format!("{}/api/livestream/search", server.base_url()))
        .with_timeout(Duration::from_millis(50));
    let result = client.request(req).await;
    server.shutdown().await;

    match result {
        Err(err) => anyhow::ensure!(err.is_timeout(), "unexpected error: {err}"),
        Ok(res) => anyhow::bail!("expected a timeout, got status {}", res.status),
    }
    Ok(())
}

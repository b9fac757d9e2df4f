// SPDX-License-Identifier: MIT
//! Retry-until-deadline HTTP polling for tests that wait on asynchronous exports.
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::containers::prefix_all_lines;
use crate::error::{Error, Result};

/// GET `url`, failing on anything but `200 OK`.
pub async fn http_get(client: &Client, url: &str) -> Result<String> {
    info!(%url, "getting url");
    let response = client.get(url).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(Error::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response.text().await?)
}

/// Poll `url` every `interval` until a body contains `stop` or `total` has elapsed.
///
/// Request failures are logged and retried. The last successful body is returned
/// either way (empty if none succeeded), so the caller asserts on what it got.
pub async fn poll_http_get(
    client: &Client,
    log_prefix: &str,
    url: &str,
    stop: &str,
    total: Duration,
    interval: Duration,
) -> String {
    let deadline = Instant::now() + total;
    let mut latest = String::new();
    loop {
        match http_get(client, url).await {
            Ok(body) => {
                info!("response:\n{}", prefix_all_lines(log_prefix, &body));
                latest = body;
            }
            Err(err) => warn!(%url, error = %err, "poll request failed"),
        }
        if latest.contains(stop) || Instant::now() >= deadline {
            return latest;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stops_once_body_contains_marker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let base = serve(Router::new().route(
            "/metrics",
            get(move || {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        "warming up".to_string()
                    } else {
                        "hello_total 1".to_string()
                    }
                }
            }),
        ))
        .await;

        let body = poll_http_get(
            &Client::new(),
            "METRICS",
            &format!("{base}/metrics"),
            "hello_total",
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(body, "hello_total 1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_body_at_deadline() {
        let base = serve(Router::new().route("/", get(|| async { "nothing yet" }))).await;
        let started = std::time::Instant::now();
        let body = poll_http_get(
            &Client::new(),
            "ROOT",
            &base,
            "never",
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(body, "nothing yet");
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unreachable_url_yields_empty_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let body = poll_http_get(
            &Client::new(),
            "DOWN",
            &format!("http://{addr}/"),
            "anything",
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let base = serve(Router::new().route(
            "/broken",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let err = http_get(&Client::new(), &format!("{base}/broken"))
            .await
            .expect_err("503");
        assert!(matches!(err, Error::Status { status: 503, .. }));
    }
}

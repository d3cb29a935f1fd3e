// src/tasks/readiness.rs

//! HTTP readiness probing of a freshly started service.

use std::time::Duration;

use reqwest::header::ACCEPT;
use tracing::{debug, trace};

/// Upper bound for a single probe request.
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// `http://localhost:<port><path>`, with a leading `/` ensured.
pub fn readiness_url(port: u16, path: &str) -> String {
    if path.starts_with('/') {
        format!("http://localhost:{port}{path}")
    } else {
        format!("http://localhost:{port}/{path}")
    }
}

/// Poll `url` every `poll` until it answers with a 2xx status or `timeout`
/// elapses. Returns whether the service became ready.
pub async fn wait_until_ready(url: &str, timeout: Duration, poll: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(PROBE_REQUEST_TIMEOUT.min(timeout.max(poll)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "could not build readiness client");
            return false;
        }
    };

    let probe_loop = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match client.get(url).header(ACCEPT, "text/html").send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url, attempt, "readiness probe succeeded");
                    return;
                }
                Ok(resp) => trace!(url, attempt, status = %resp.status(), "not ready yet"),
                Err(e) => trace!(url, attempt, error = %e, "not ready yet"),
            }
            tokio::time::sleep(poll).await;
        }
    };

    tokio::time::timeout(timeout, probe_loop).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_always_has_a_leading_slash() {
        assert_eq!(readiness_url(3000, "/"), "http://localhost:3000/");
        assert_eq!(readiness_url(8080, "health"), "http://localhost:8080/health");
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let ready = wait_until_ready(
            &readiness_url(port, "/"),
            Duration::from_millis(300),
            Duration::from_millis(50),
        )
        .await;
        assert!(!ready);
    }
}

#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Pre-submission probing of HTTP(S) download URLs.
//!
//! A probe issues a HEAD request with redirect following to learn the final
//! URL, the payload size, and a display filename before a task is admitted.
//! Origins that reject HEAD get one GET retry. Probes never mutate origin
//! state and are safe to repeat.

mod disposition;
mod guard;

pub use guard::{GuardError, check_submission_target};

use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response};
use tracing::warn;

/// Default total timeout for a probe request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect hop cap while probing.
pub const MAX_REDIRECTS: usize = 10;

/// Outcome of probing a URL.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    /// Whether the origin answered with a success status.
    pub ok: bool,
    /// URL after following redirects, when a response was obtained.
    pub final_url: Option<String>,
    /// Parsed `Content-Length`, when present and numeric.
    pub content_length: Option<u64>,
    /// Display filename from `Content-Disposition` or the URL path.
    pub filename: Option<String>,
    /// Raw `Content-Type` header value.
    pub content_type: Option<String>,
    /// Failure description when `ok` is false.
    pub error: Option<String>,
}

/// URL prober holding a configured HTTP client.
#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
}

impl Prober {
    /// Build a prober with the given total timeout.
    ///
    /// # Errors
    ///
    /// Returns the underlying client construction error when TLS setup
    /// fails.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }

    /// Probe a URL, falling back from HEAD to GET when the origin rejects
    /// HEAD.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let head = self.request(Method::HEAD, url).await;
        match head {
            Ok(result) if result.ok => result,
            // Some origins answer HEAD with 4xx/5xx or reset the
            // connection outright; retry once with GET.
            first_attempt => {
                let get = self.request(Method::GET, url).await;
                match get {
                    Ok(result) => result,
                    Err(error) => first_attempt.unwrap_or_else(|_| {
                        warn!(url, %error, "probe failed on both HEAD and GET");
                        ProbeResult {
                            error: Some(describe_transport_error(&error)),
                            ..ProbeResult::default()
                        }
                    }),
                }
            }
        }
    }

    async fn request(&self, method: Method, url: &str) -> reqwest::Result<ProbeResult> {
        let response = self.client.request(method, url).send().await?;
        Ok(Self::extract(&response))
    }

    fn extract(response: &Response) -> ProbeResult {
        let final_url = response.url().to_string();
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return ProbeResult {
                final_url: Some(final_url),
                error: Some(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown")
                )),
                ..ProbeResult::default()
            };
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };

        let content_length = header("content-length").and_then(|raw| raw.trim().parse().ok());
        let filename = header("content-disposition")
            .as_deref()
            .and_then(disposition::filename_from_disposition)
            .or_else(|| disposition::filename_from_url(&final_url));

        ProbeResult {
            ok: true,
            final_url: Some(final_url),
            content_length,
            filename,
            content_type: header("content-type"),
            error: None,
        }
    }
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timeout".to_string()
    } else if error.is_redirect() {
        "too many redirects".to_string()
    } else if error.is_connect() {
        "connection error".to_string()
    } else {
        format!("request failed: {error}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prober_builds_with_default_timeout() {
        let prober = Prober::new(DEFAULT_TIMEOUT);
        assert!(prober.is_ok());
    }

    #[test]
    fn default_probe_result_is_a_failure_without_detail() {
        let result = ProbeResult::default();
        assert!(!result.ok);
        assert!(result.final_url.is_none());
        assert!(result.error.is_none());
    }
}

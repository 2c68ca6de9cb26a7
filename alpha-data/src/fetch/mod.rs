use crate::{
    endpoint::EndpointSet,
    error::{AttemptError, AttemptFailure, FetchError},
};
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};

/// [`HttpTransport`] seam, `reqwest` implementation and request/response types.
pub mod transport;

pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Default per-attempt deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw body of the first successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub url: String,
    pub status: u16,
    pub body: Bytes,
}

/// Outcome of [`FailoverFetcher::fetch`]. Never partially valid.
pub type FetchResult = Result<Payload, FetchError>;

/// Browser-like header set the internal endpoints insist on.
///
/// `Content-Type` is left to the transport, which sets it only on requests with a body.
pub fn default_headers() -> Vec<(String, String)> {
    [
        (
            "User-Agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0.0.0 Safari/537.36",
        ),
        ("Accept", "application/json, text/plain, */*"),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Origin", "https://www.binance.com"),
        ("Referer", "https://www.binance.com/en/alpha"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

/// Walks an [`EndpointSet`] in order and returns the first 2xx response.
///
/// Attempts are sequential: a struggling upstream is never hit by a fan-out, and nothing after
/// the first success is contacted. Each attempt is bounded by `timeout`, a slow mirror is
/// abandoned and counted as a failed attempt.
#[derive(Clone)]
pub struct FailoverFetcher {
    transport: Arc<dyn HttpTransport>,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl std::fmt::Debug for FailoverFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverFetcher")
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FailoverFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            headers,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch(&self, endpoints: &EndpointSet) -> FetchResult {
        if endpoints.is_empty() {
            return Err(FetchError::NoEndpoints(endpoints.name.clone()));
        }

        let mut failures = Vec::with_capacity(endpoints.len());

        for attempt in &endpoints.attempts {
            let request = HttpRequest {
                method: attempt.method,
                url: attempt.url.clone(),
                query: attempt.query.clone(),
                headers: self.headers.clone(),
                body: attempt.body.clone(),
            };
            let url = request.full_url();
            let started = Instant::now();

            let outcome =
                match tokio::time::timeout(self.timeout, self.transport.send(request, self.timeout))
                    .await
                {
                    Ok(Ok(response)) if (200..300).contains(&response.status) => Ok(response),
                    Ok(Ok(response)) => Err(AttemptError::Rejected(response.status)),
                    Ok(Err(error)) => Err(error),
                    Err(_elapsed) => Err(AttemptError::Timeout(self.timeout)),
                };

            match outcome {
                Ok(response) => {
                    debug!(
                        endpoint = %endpoints.name,
                        method = %attempt.method,
                        %url,
                        status = response.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "attempt succeeded"
                    );
                    return Ok(Payload {
                        url,
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(error) => {
                    warn!(
                        endpoint = %endpoints.name,
                        method = %attempt.method,
                        %url,
                        %error,
                        "attempt failed, trying next endpoint"
                    );
                    failures.push(AttemptFailure {
                        method: attempt.method,
                        url,
                        error,
                    });
                }
            }
        }

        warn!(
            endpoint = %endpoints.name,
            attempts = failures.len(),
            "all endpoints exhausted"
        );

        Err(FetchError::AllEndpointsExhausted {
            endpoint_set: endpoints.name.clone(),
            attempts: failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        transport::mock::{MockRoute, MockTransport},
        *,
    };
    use crate::endpoint::{Attempt, Method};

    fn fetcher(transport: &MockTransport) -> FailoverFetcher {
        FailoverFetcher::new(
            Arc::new(transport.clone()),
            default_headers(),
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    fn mirrors() -> EndpointSet {
        EndpointSet::get_all(
            "ticker_24hr",
            ["https://a.test/ticker", "https://b.test/ticker", "https://c.test/ticker"],
        )
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        struct TestCase {
            transport: MockTransport,
            expected_url: &'static str,
            expected_contacted: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: first endpoint succeeds, nothing else contacted
                transport: MockTransport::default()
                    .ok("https://a.test", "[]")
                    .ok("https://b.test", "[]"),
                expected_url: "https://a.test/ticker",
                expected_contacted: vec!["https://a.test/ticker"],
            },
            TestCase {
                // TC1: non-2xx falls through to second endpoint
                transport: MockTransport::default()
                    .status("https://a.test", 451)
                    .ok("https://b.test", "[]")
                    .ok("https://c.test", "[]"),
                expected_url: "https://b.test/ticker",
                expected_contacted: vec!["https://a.test/ticker", "https://b.test/ticker"],
            },
            TestCase {
                // TC2: transport failures fall through to last endpoint
                transport: MockTransport::default()
                    .route("https://a.test", MockRoute::Fail("dns".to_string()))
                    .route("https://b.test", MockRoute::Fail("reset".to_string()))
                    .ok("https://c.test", "[]"),
                expected_url: "https://c.test/ticker",
                expected_contacted: vec![
                    "https://a.test/ticker",
                    "https://b.test/ticker",
                    "https://c.test/ticker",
                ],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = fetcher(&test.transport).fetch(&mirrors()).await;
            let payload = actual.unwrap_or_else(|error| panic!("TC{index} failed: {error}"));
            assert_eq!(payload.url, test.expected_url, "TC{} failed", index);
            assert_eq!(payload.body, Bytes::from_static(b"[]"), "TC{} failed", index);
            assert_eq!(
                test.transport.urls(),
                test.expected_contacted,
                "TC{} failed",
                index
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_endpoints_timeout_exhausts() {
        let transport = MockTransport::default()
            .route("https://a.test", MockRoute::Hang)
            .route("https://b.test", MockRoute::Hang)
            .route("https://c.test", MockRoute::Hang);

        let started = Instant::now();
        let actual = fetcher(&transport).fetch(&mirrors()).await;

        let (endpoint_set, attempts) = match actual {
            Err(FetchError::AllEndpointsExhausted {
                endpoint_set,
                attempts,
            }) => (endpoint_set, attempts),
            other => panic!("expected AllEndpointsExhausted, got {other:?}"),
        };

        assert_eq!(endpoint_set, "ticker_24hr");
        assert_eq!(attempts.len(), 3);
        assert!(
            attempts
                .iter()
                .all(|attempt| attempt.error == AttemptError::Timeout(DEFAULT_REQUEST_TIMEOUT))
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_REQUEST_TIMEOUT * 3);
        assert!(elapsed < DEFAULT_REQUEST_TIMEOUT * 3 + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_endpoint_set() {
        let transport = MockTransport::default();
        let actual = fetcher(&transport)
            .fetch(&EndpointSet::new("empty", vec![]))
            .await;

        assert_eq!(actual, Err(FetchError::NoEndpoints("empty".into())));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_post_then_get_fallback_carries_headers() {
        let transport = MockTransport::default().status("https://list.test", 405);
        let endpoints = EndpointSet::new(
            "product_list",
            vec![
                Attempt::post("https://list.test/products"),
                Attempt::get("https://list.test/products"),
            ],
        );

        let actual = fetcher(&transport).fetch(&endpoints).await;
        let requests = transport.requests();

        assert!(matches!(actual, Err(FetchError::AllEndpointsExhausted { .. })));
        assert_eq!(
            requests.iter().map(|request| request.method).collect::<Vec<_>>(),
            vec![Method::Post, Method::Get]
        );
        assert!(requests.iter().all(|request| {
            request.header("referer") == Some("https://www.binance.com/en/alpha")
                && request.header("user-agent").is_some()
                && request.header("content-type").is_none()
        }));
        assert_eq!(
            requests
                .iter()
                .map(|request| request.body.is_some())
                .collect::<Vec<_>>(),
            vec![true, false]
        );
    }
}

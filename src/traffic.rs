//! Verification that an ingress distributes traffic to all backends
//!
//! The balancing algorithm is treated as a black box: requests are sent
//! until every expected backend has answered at least once or the
//! iteration budget is spent.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use http::header::HOST;
use http::Uri;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::poll::{Clock, SystemClock};

/// Sends one request through the load balancer and returns the response body
pub trait TrafficProbe {
    fn send(&mut self) -> Result<String>;
}

impl<F> TrafficProbe for F
where
    F: FnMut() -> Result<String>,
{
    fn send(&mut self) -> Result<String> {
        self()
    }
}

/// HTTP GET through an ingress controller
///
/// The `Host` header can be overridden so that host based ingress rules
/// match while the request goes to a node port.
#[derive(Clone, Debug)]
pub struct IngressRequest {
    client: Client,
    url: Uri,
    host: Option<String>,
}

impl IngressRequest {
    /// Request timeout which bounds every call to [`TrafficProbe::send`]
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates an [`IngressRequest`] for the given URL.
    pub fn new(url: Uri) -> Result<IngressRequest> {
        IngressRequest::with_timeout(url, IngressRequest::DEFAULT_TIMEOUT)
    }

    /// Creates an [`IngressRequest`] whose calls time out after `timeout`.
    pub fn with_timeout(url: Uri, timeout: Duration) -> Result<IngressRequest> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("HTTP client could not be created")?;
        Ok(IngressRequest {
            client,
            url,
            host: None,
        })
    }

    /// Sends the given `Host` header with every request.
    pub fn host(mut self, host: &str) -> IngressRequest {
        self.host = Some(host.to_owned());
        self
    }

    /// Builds the URI `http://<address>:<port><path>`.
    pub fn node_port_uri(address: &str, port: u16, path: &str) -> Result<Uri> {
        Uri::builder()
            .scheme("http")
            .authority(format!("{}:{}", address, port).as_str())
            .path_and_query(path)
            .build()
            .with_context(|| format!("Invalid URI for {}:{}{}", address, port, path))
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }
}

impl TrafficProbe for IngressRequest {
    fn send(&mut self) -> Result<String> {
        let mut request = self.client.get(self.url.to_string());
        if let Some(host) = &self.host {
            request = request.header(HOST, host.as_str());
        }
        let response = request
            .send()
            .with_context(|| format!("GET {} failed", self.url))?
            .error_for_status()?;
        Ok(response.text()?)
    }
}

/// Result of a traffic distribution check
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationResult {
    /// Every expected backend answered.
    Covered {
        iterations: u32,
        observed: BTreeSet<String>,
    },
    /// The iteration budget was spent before every backend answered.
    Incomplete {
        iterations: u32,
        observed: BTreeSet<String>,
        missing: BTreeSet<String>,
    },
}

impl VerificationResult {
    pub fn is_covered(&self) -> bool {
        matches!(self, VerificationResult::Covered { .. })
    }

    pub fn iterations(&self) -> u32 {
        match self {
            VerificationResult::Covered { iterations, .. }
            | VerificationResult::Incomplete { iterations, .. } => *iterations,
        }
    }

    pub fn observed(&self) -> &BTreeSet<String> {
        match self {
            VerificationResult::Covered { observed, .. }
            | VerificationResult::Incomplete { observed, .. } => observed,
        }
    }

    /// Returns the backends which never answered.
    pub fn missing(&self) -> BTreeSet<String> {
        match self {
            VerificationResult::Covered { .. } => BTreeSet::new(),
            VerificationResult::Incomplete { missing, .. } => missing.clone(),
        }
    }

    /// Converts an incomplete result into an error.
    pub fn into_result(self, description: &str) -> Result<u32, TrafficError> {
        match self {
            VerificationResult::Covered { iterations, .. } => Ok(iterations),
            VerificationResult::Incomplete {
                iterations,
                missing,
                ..
            } => Err(TrafficError::Incomplete {
                description: description.to_owned(),
                iterations,
                missing: missing.into_iter().collect::<Vec<_>>().join(", "),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("{description}: backends [{missing}] did not answer within {iterations} requests")]
    Incomplete {
        description: String,
        iterations: u32,
        missing: String,
    },
}

/// Rule which finds the answering backend in a response body
///
/// A backend is named by `<anchor><name>`; with the default empty anchor any
/// occurrence of the name counts. If several names match, the longest wins so
/// that `managed-server10` is not taken for `managed-server1`. A body lacking
/// the required marker names no backend.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BackendExtractor {
    anchor: String,
    required: Option<String>,
}

impl BackendExtractor {
    /// Matches only names directly preceded by `anchor`.
    pub fn anchored(anchor: &str) -> BackendExtractor {
        BackendExtractor {
            anchor: anchor.to_owned(),
            required: None,
        }
    }

    /// Ignores bodies which do not contain `marker`.
    pub fn requiring(mut self, marker: &str) -> BackendExtractor {
        self.required = Some(marker.to_owned());
        self
    }

    pub fn identify<'a>(&self, body: &str, expected: &'a BTreeSet<String>) -> Option<&'a str> {
        if let Some(marker) = &self.required {
            if !body.contains(marker.as_str()) {
                return None;
            }
        }
        expected
            .iter()
            .filter(|backend| body.contains(&format!("{}{}", self.anchor, backend)))
            .max_by_key(|backend| backend.len())
            .map(String::as_str)
    }
}

/// Returns the expected backend named anywhere in `body`.
pub fn identify_backend<'a>(body: &str, expected: &'a BTreeSet<String>) -> Option<&'a str> {
    BackendExtractor::default().identify(body, expected)
}

/// Sends requests until all expected backends answered
#[derive(Clone, Debug)]
pub struct DistributionVerifier<C = SystemClock> {
    max_iterations: u32,
    pause: Duration,
    clock: C,
    extractor: BackendExtractor,
}

impl DistributionVerifier<SystemClock> {
    /// Creates a [`DistributionVerifier`] which sends at most
    /// `max_iterations` requests without pausing.
    pub fn new(max_iterations: u32) -> DistributionVerifier<SystemClock> {
        DistributionVerifier {
            max_iterations,
            pause: Duration::ZERO,
            clock: SystemClock,
            extractor: BackendExtractor::default(),
        }
    }
}

impl<C: Clock> DistributionVerifier<C> {
    /// Pauses between two requests on the given clock.
    pub fn with_pause<D: Clock>(self, pause: Duration, clock: D) -> DistributionVerifier<D> {
        DistributionVerifier {
            max_iterations: self.max_iterations,
            pause,
            clock,
            extractor: self.extractor,
        }
    }

    /// Identifies backends with the given rule instead of plain name matching.
    pub fn with_extractor(mut self, extractor: BackendExtractor) -> DistributionVerifier<C> {
        self.extractor = extractor;
        self
    }

    /// Runs the check against `probe`.
    pub fn verify<P>(&self, probe: &mut P, expected: &BTreeSet<String>) -> VerificationResult
    where
        P: TrafficProbe + ?Sized,
    {
        let mut observed = BTreeSet::new();
        let mut iterations = 0;

        if expected.is_empty() {
            return VerificationResult::Covered {
                iterations,
                observed,
            };
        }

        while iterations < self.max_iterations {
            if iterations > 0 && !self.pause.is_zero() {
                self.clock.sleep(self.pause);
            }
            iterations += 1;

            match probe.send() {
                Ok(body) => match self.extractor.identify(&body, expected) {
                    Some(backend) => {
                        debug!(iteration = iterations, backend, "Backend answered");
                        observed.insert(backend.to_owned());
                    }
                    None => debug!(
                        iteration = iterations,
                        "Response did not name an expected backend"
                    ),
                },
                Err(error) => warn!(iteration = iterations, "Request failed: {:#}", error),
            }

            if observed.len() == expected.len() {
                info!(
                    iterations,
                    "All backends [{}] answered",
                    join(&observed)
                );
                return VerificationResult::Covered {
                    iterations,
                    observed,
                };
            }
        }

        let missing: BTreeSet<String> = expected.difference(&observed).cloned().collect();
        warn!(
            iterations,
            "Backends [{}] did not answer, only [{}] did",
            join(&missing),
            join(&observed)
        );
        VerificationResult::Incomplete {
            iterations,
            observed,
            missing,
        }
    }
}

/// Sends at most `max_iterations` requests until every expected backend answered.
pub fn verify_distribution<P>(
    probe: &mut P,
    expected: &BTreeSet<String>,
    max_iterations: u32,
) -> VerificationResult
where
    P: TrafficProbe + ?Sized,
{
    DistributionVerifier::new(max_iterations).verify(probe, expected)
}

fn join(backends: &BTreeSet<String>) -> String {
    backends.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn longest_matching_backend_is_identified() {
        let expected = backends(&["managed-server1", "managed-server10"]);

        assert_eq!(
            identify_backend("served by managed-server10", &expected),
            Some("managed-server10")
        );
        assert_eq!(
            identify_backend("served by managed-server1.", &expected),
            Some("managed-server1")
        );
        assert_eq!(identify_backend("served by admin-server", &expected), None);
    }

    #[test]
    fn anchored_extractor_ignores_listed_members() {
        let expected = backends(&["managed-server1", "managed-server2"]);
        let extractor = BackendExtractor::anchored("ServerName:").requiring("Success:True");
        let answer = concat!(
            "ServerName:managed-server1\n",
            "Members:managed-server1,managed-server2\n",
            "Success:True"
        );
        let isolated = concat!(
            "ServerName:managed-server1\n",
            "Members:managed-server1\n",
            "Success:False"
        );

        assert_eq!(extractor.identify(answer, &expected), Some("managed-server1"));
        assert_eq!(extractor.identify(isolated, &expected), None);
    }

    #[test]
    fn empty_expectation_is_covered_without_requests() {
        let mut probe = || -> Result<String> { panic!("no request expected") };

        let result = verify_distribution(&mut probe, &BTreeSet::new(), 5);

        assert_eq!(result.iterations(), 0);
        assert!(result.is_covered());
    }

    #[test]
    fn zero_budget_reports_every_backend_missing() {
        let mut probe = || -> Result<String> { Ok(String::from("a")) };

        let result = verify_distribution(&mut probe, &backends(&["a"]), 0);

        assert_eq!(result.missing(), backends(&["a"]));
    }

    #[test]
    fn node_port_uri_is_built_from_its_parts() {
        let uri =
            IngressRequest::node_port_uri("localhost", 30305, "/sample-war/index.jsp").unwrap();

        assert_eq!(uri.to_string(), "http://localhost:30305/sample-war/index.jsp");
    }
}

mod util;

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use operator_integration_tests::prelude::*;
use operator_integration_tests::traffic::TrafficError;
use rstest::rstest;

use util::backend::FakeBackend;

fn backends(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Probe which answers with the given bodies in turn and counts its requests
struct ScriptedProbe {
    responses: Vec<Result<String>>,
    requests: usize,
}

impl ScriptedProbe {
    fn new(responses: Vec<Result<String>>) -> ScriptedProbe {
        ScriptedProbe {
            responses,
            requests: 0,
        }
    }

    fn answering(bodies: &[&str]) -> ScriptedProbe {
        ScriptedProbe::new(bodies.iter().map(|body| Ok(body.to_string())).collect())
    }
}

impl TrafficProbe for ScriptedProbe {
    fn send(&mut self) -> Result<String> {
        let index = self.requests % self.responses.len();
        self.requests += 1;
        match &self.responses[index] {
            Ok(body) => Ok(body.to_owned()),
            Err(error) => Err(anyhow!("{}", error)),
        }
    }
}

#[test]
fn verification_stops_as_soon_as_every_backend_answered() {
    let mut probe = ScriptedProbe::answering(&["A", "B", "A"]);

    let result = verify_distribution(&mut probe, &backends(&["A", "B"]), 3);

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(2);
    assert_eq!(probe.requests, 2);
}

#[test]
fn backends_which_never_answer_are_reported_missing() {
    let mut probe = ScriptedProbe::answering(&["A"]);

    let result = verify_distribution(&mut probe, &backends(&["A", "B", "C"]), 5);

    assert_that(&result).is_missing(&["B", "C"]);
    assert_that(&result).took_iterations(5);
    assert_eq!(result.observed(), &backends(&["A"]));
}

#[test]
fn failed_requests_count_as_iterations_without_a_backend() {
    let mut probe = ScriptedProbe::new(vec![
        Err(anyhow!("connection refused")),
        Ok(String::from("Server name: managed-server1")),
        Err(anyhow!("operation timed out")),
        Ok(String::from("Server name: managed-server2")),
    ]);

    let result = verify_distribution(
        &mut probe,
        &backends(&["managed-server1", "managed-server2"]),
        10,
    );

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(4);
}

#[rstest]
#[case(&["managed-server1", "managed-server2"], 2)]
#[case(&["managed-server1", "managed-server2", "managed-server3"], 3)]
#[case(&["managed-server1"], 1)]
fn round_robin_backends_are_covered_after_one_round(
    #[case] names: &[&str],
    #[case] expected_iterations: u32,
) {
    let bodies: Vec<String> = names
        .iter()
        .map(|name| format!("<html><body>Server name: {}</body></html>", name))
        .collect();
    let body_refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    let mut probe = ScriptedProbe::answering(&body_refs);

    let result = verify_distribution(&mut probe, &backends(names), 20);

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(expected_iterations);
}

#[test]
fn responses_naming_unexpected_servers_are_ignored() {
    let mut probe =
        ScriptedProbe::answering(&["admin-server", "503 no endpoints", "managed-server2"]);

    let result = verify_distribution(&mut probe, &backends(&["managed-server2"]), 4);

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(3);
}

const MEMBER_LISTINGS: [&str; 2] = [
    "ServerName:managed-server1\nMembers:managed-server1,managed-server2\nSuccess:True",
    "ServerName:managed-server2\nMembers:managed-server1,managed-server2\nSuccess:True",
];

#[test]
fn anchored_extractor_credits_only_the_answering_member() {
    let verifier = DistributionVerifier::new(20)
        .with_extractor(BackendExtractor::anchored("ServerName:").requiring("Success:True"));
    let mut probe = ScriptedProbe::answering(&MEMBER_LISTINGS);

    let result = verifier.verify(&mut probe, &backends(&["managed-server1", "managed-server2"]));

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(2);
}

#[test]
fn plain_name_matching_cannot_tell_members_apart_in_listings() {
    let mut probe = ScriptedProbe::answering(&MEMBER_LISTINGS);

    let result = verify_distribution(
        &mut probe,
        &backends(&["managed-server1", "managed-server2"]),
        20,
    );

    assert_that(&result).is_missing(&["managed-server1"]);
    assert_that(&result).took_iterations(20);
}

#[test]
fn members_which_do_not_see_their_cluster_are_not_counted() {
    let verifier = DistributionVerifier::new(4)
        .with_extractor(BackendExtractor::anchored("ServerName:").requiring("Success:True"));
    let mut probe = ScriptedProbe::answering(&[
        "ServerName:managed-server1\nMembers:managed-server1\nSuccess:False",
        "ServerName:managed-server2\nMembers:managed-server1,managed-server2\nSuccess:True",
    ]);

    let result = verifier.verify(&mut probe, &backends(&["managed-server1", "managed-server2"]));

    assert_that(&result).is_missing(&["managed-server1"]);
}

#[test]
fn incomplete_verification_converts_into_an_error() {
    let mut probe = ScriptedProbe::answering(&["managed-server1"]);

    let error = verify_distribution(
        &mut probe,
        &backends(&["managed-server1", "managed-server2"]),
        3,
    )
    .into_result("load balancing of domain1")
    .unwrap_err();

    let TrafficError::Incomplete {
        iterations,
        missing,
        ..
    } = &error;
    assert_eq!(*iterations, 3);
    assert_eq!(missing, "managed-server2");
    assert_eq!(
        error.to_string(),
        "load balancing of domain1: backends [managed-server2] did not answer within 3 requests"
    );
}

#[test]
fn pauses_between_requests_use_the_given_clock() {
    let clock = ManualClock::new();
    let verifier =
        DistributionVerifier::new(5).with_pause(Duration::from_millis(500), &clock);
    let mut probe = ScriptedProbe::answering(&["A", "B", "C"]);

    let result = verifier.verify(&mut probe, &backends(&["A", "B", "C"]));

    assert_that(&result).took_iterations(3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(500)]
    );
}

#[test]
fn ingress_request_reaches_every_backend_behind_the_host_rule() {
    let backend =
        FakeBackend::start("domain1.org", &["managed-server1", "managed-server2"]).unwrap();
    let url = IngressRequest::node_port_uri("127.0.0.1", backend.port(), "/sample-war/index.jsp")
        .unwrap();
    let mut request = IngressRequest::new(url).unwrap().host("domain1.org");

    let result = verify_distribution(
        &mut request,
        &backends(&["managed-server1", "managed-server2"]),
        50,
    );

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(2);
}

#[test]
fn ingress_request_tolerates_unavailable_backends() {
    let backend = FakeBackend::with_failures(
        "domain1.org",
        &["managed-server1", "managed-server2"],
        3,
    )
    .unwrap();
    let url = IngressRequest::node_port_uri("127.0.0.1", backend.port(), "/").unwrap();
    let mut request = IngressRequest::new(url).unwrap().host("domain1.org");

    let result = verify_distribution(
        &mut request,
        &backends(&["managed-server1", "managed-server2"]),
        10,
    );

    assert_that(&result).is_covered();
    assert_that(&result).took_iterations(5);
}

#[test]
fn ingress_request_without_matching_host_rule_reaches_no_backend() {
    let backend = FakeBackend::start("domain1.org", &["managed-server1"]).unwrap();
    let url = IngressRequest::node_port_uri("127.0.0.1", backend.port(), "/").unwrap();
    let mut request = IngressRequest::new(url).unwrap().host("domain2.org");

    let result = verify_distribution(&mut request, &backends(&["managed-server1"]), 3);

    assert_that(&result).is_missing(&["managed-server1"]);
}

#[test]
fn request_timeout_bounds_every_iteration() {
    let backend = FakeBackend::with_delay(
        "domain1.org",
        &["managed-server1"],
        Duration::from_secs(5),
    )
    .unwrap();
    let url = IngressRequest::node_port_uri("127.0.0.1", backend.port(), "/").unwrap();
    let mut request = IngressRequest::with_timeout(url, Duration::from_millis(200))
        .unwrap()
        .host("domain1.org");
    let start = Instant::now();

    let result = verify_distribution(&mut request, &backends(&["managed-server1"]), 3);

    assert_that(&result).is_missing(&["managed-server1"]);
    assert_that(&result).took_iterations(3);
    assert!(start.elapsed() < Duration::from_secs(3));
}

//! Integration tests for the domain operator and the ingress controllers
//! in front of its domains
//!
//! The cluster converges asynchronously, so every check is expressed as a
//! condition which a [`poll::Poller`] evaluates until it holds or a timeout
//! elapses. Load balancing is verified with a
//! [`traffic::DistributionVerifier`] which sends requests until every
//! backend answered.

pub mod assertions;
pub mod client;
pub mod conditions;
pub mod config;
pub mod deploy;
pub mod domain;
pub mod helm;
pub mod image;
pub mod ingress;
pub mod logging;
pub mod net;
pub mod operator;
pub mod poll;
pub mod prelude;
pub mod result;
pub mod scenario;
pub mod steps;
pub mod traffic;

pub use crate::assertions::*;
pub use crate::client::{from_value, from_yaml, TestKubeClient};
pub use crate::domain::{Domain, DomainTemplate};
pub use crate::ingress::ClusterPorts;
pub use crate::poll::{
    await_condition, ConditionError, ConditionResultExt, LastSeen, ManualClock, PollError,
    PollOutcome, Poller, RetryPolicy,
};
pub use crate::result::TestResult;
pub use crate::scenario::{Provisioned, ScenarioContext, Teardown};
pub use crate::traffic::{
    verify_distribution, BackendExtractor, DistributionVerifier, IngressRequest, TrafficProbe,
    VerificationResult,
};

pub use serde_json::json;
pub use spectral::prelude::*;

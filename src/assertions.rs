//! Additional assertions for [`spectral`]

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::time::Duration;

use spectral::{iter::ContainingIntoIterAssertions, vec::VecAssertions, AssertionFailure, Spec};

use crate::poll::PollOutcome;
use crate::traffic::VerificationResult;

/// Additional assertions for Vec
pub trait ExtendedVecAssertions<'s, T: 's> {
    fn contains_exactly_in_any_order<E: 's>(&mut self, expected_values_iter: &'s E)
    where
        E: IntoIterator<Item = &'s T> + Clone,
        E::IntoIter: ExactSizeIterator;
}

impl<'s, T: 's> ExtendedVecAssertions<'s, T> for Spec<'s, Vec<T>>
where
    T: PartialEq + Debug,
{
    /// Asserts that the subject vector contains exactly the provided values in any order.
    fn contains_exactly_in_any_order<E: 's>(&mut self, expected_values_iter: &'s E)
    where
        E: IntoIterator<Item = &'s T> + Clone,
        E::IntoIter: ExactSizeIterator,
    {
        self.has_length(expected_values_iter.clone().into_iter().len());
        self.contains_all_of(expected_values_iter);
    }
}

/// Assertions on the outcome of a poll
pub trait PollOutcomeAssertions {
    fn is_satisfied(&mut self);
    fn is_timed_out(&mut self);
    fn took(&mut self, elapsed: Duration);
    fn has_evaluations(&mut self, evaluations: u32);
}

impl<'s> PollOutcomeAssertions for Spec<'s, PollOutcome> {
    /// Asserts that the condition was satisfied.
    ///
    /// ```rust,ignore
    /// assert_that(&outcome).is_satisfied();
    /// ```
    fn is_satisfied(&mut self) {
        if !self.subject.is_satisfied() {
            AssertionFailure::from_spec(self)
                .with_expected(String::from("a satisfied condition"))
                .with_actual(format!("{:?}", self.subject))
                .fail();
        }
    }

    fn is_timed_out(&mut self) {
        if self.subject.is_satisfied() {
            AssertionFailure::from_spec(self)
                .with_expected(String::from("a timed out condition"))
                .with_actual(format!("{:?}", self.subject))
                .fail();
        }
    }

    fn took(&mut self, elapsed: Duration) {
        if self.subject.elapsed() != elapsed {
            AssertionFailure::from_spec(self)
                .with_expected(format!("elapsed time {:?}", elapsed))
                .with_actual(format!("elapsed time {:?}", self.subject.elapsed()))
                .fail();
        }
    }

    fn has_evaluations(&mut self, evaluations: u32) {
        if self.subject.evaluations() != evaluations {
            AssertionFailure::from_spec(self)
                .with_expected(format!("{} evaluations", evaluations))
                .with_actual(format!("{} evaluations", self.subject.evaluations()))
                .fail();
        }
    }
}

/// Assertions on the result of a traffic distribution check
pub trait VerificationResultAssertions {
    fn is_covered(&mut self);
    fn is_missing(&mut self, backends: &[&str]);
    fn took_iterations(&mut self, iterations: u32);
}

impl<'s> VerificationResultAssertions for Spec<'s, VerificationResult> {
    /// Asserts that every expected backend answered.
    fn is_covered(&mut self) {
        if !self.subject.is_covered() {
            AssertionFailure::from_spec(self)
                .with_expected(String::from("all backends to answer"))
                .with_actual(format!("missing backends {:?}", self.subject.missing()))
                .fail();
        }
    }

    /// Asserts that exactly the given backends never answered.
    fn is_missing(&mut self, backends: &[&str]) {
        let expected: BTreeSet<String> = backends.iter().map(|name| name.to_string()).collect();
        let missing = self.subject.missing();
        if missing != expected {
            AssertionFailure::from_spec(self)
                .with_expected(format!("missing backends {:?}", expected))
                .with_actual(format!("missing backends {:?}", missing))
                .fail();
        }
    }

    fn took_iterations(&mut self, iterations: u32) {
        if self.subject.iterations() != iterations {
            AssertionFailure::from_spec(self)
                .with_expected(format!("{} requests", iterations))
                .with_actual(format!("{} requests", self.subject.iterations()))
                .fail();
        }
    }
}

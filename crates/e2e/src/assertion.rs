//! Expectation capture
//!
//! Assertion routines report a failed comparison as [`Raised::Expectation`]
//! and anything else as [`Raised::Fault`]. [`capture`] runs a routine once
//! and turns the former into a value so matchers can format it, while
//! faults keep propagating as errors.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// What a failed comparison expected and what it received
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionFailure {
    /// Name of the primitive comparison that failed
    pub matcher: String,
    pub expected: Value,
    pub actual: Option<Value>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}", self.matcher, self.expected)?;
        match &self.actual {
            Some(actual) => write!(f, ", received {}", actual),
            None => Ok(()),
        }
    }
}

/// How an assertion routine stops early
#[derive(Debug)]
pub enum Raised {
    /// A comparison did not hold
    Expectation(AssertionFailure),
    /// The routine could not run to completion
    Fault(E2eError),
}

impl From<E2eError> for Raised {
    fn from(e: E2eError) -> Self {
        Raised::Fault(e)
    }
}

/// Outcome of one assertion routine
pub type Check = Result<(), Raised>;

/// Run `routine` exactly once.
///
/// Returns `Ok(None)` on success and `Ok(Some(failure))` when a comparison
/// failed. Faults are returned unchanged as `Err`.
pub async fn capture<F, Fut>(routine: F) -> E2eResult<Option<AssertionFailure>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Check>,
{
    match routine().await {
        Ok(()) => Ok(None),
        Err(Raised::Expectation(failure)) => {
            debug!("captured expectation failure: {}", failure);
            Ok(Some(failure))
        }
        Err(Raised::Fault(e)) => Err(e),
    }
}

fn fail(matcher: &str, expected: Value, actual: Value) -> Check {
    Err(Raised::Expectation(AssertionFailure {
        matcher: matcher.to_string(),
        expected,
        actual: Some(actual),
    }))
}

pub fn to_be_less_than_or_equal(actual: usize, expected: usize) -> Check {
    if actual <= expected {
        Ok(())
    } else {
        fail("to_be_less_than_or_equal", expected.into(), actual.into())
    }
}

pub fn to_be_greater_than_or_equal(actual: usize, expected: usize) -> Check {
    if actual >= expected {
        Ok(())
    } else {
        fail("to_be_greater_than_or_equal", expected.into(), actual.into())
    }
}

pub fn to_equal<T: Serialize + PartialEq>(actual: &T, expected: &T) -> Check {
    if actual == expected {
        return Ok(());
    }
    let expected = serde_json::to_value(expected).map_err(E2eError::from)?;
    let actual = serde_json::to_value(actual).map_err(E2eError::from)?;
    fail("to_equal", expected, actual)
}

pub fn to_contain(haystack: &str, needle: &str) -> Check {
    if haystack.contains(needle) {
        Ok(())
    } else {
        fail("to_contain", needle.into(), haystack.into())
    }
}

pub fn to_be_truthy(actual: bool) -> Check {
    if actual {
        Ok(())
    } else {
        fail("to_be_truthy", true.into(), actual.into())
    }
}

/// Lazily rendered diagnostic
pub type Message = Arc<dyn Fn() -> String + Send + Sync>;

/// Uniform result of any assertion
#[derive(Clone)]
pub struct AssertionOutcome {
    pub pass: bool,
    pub expected: Value,
    pub actual: Option<Value>,
    message: Message,
}

impl AssertionOutcome {
    pub fn new(
        pass: bool,
        expected: Value,
        actual: Option<Value>,
        message: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            pass,
            expected,
            actual,
            message: Arc::new(message),
        }
    }

    /// Render the diagnostic. Only called when a failure is reported.
    pub fn message(&self) -> String {
        (self.message)()
    }
}

impl fmt::Debug for AssertionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionOutcome")
            .field("pass", &self.pass)
            .field("expected", &self.expected)
            .field("actual", &self.actual)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_capture_success_is_none() {
        let result = capture(|| async { to_be_less_than_or_equal(3, 3) }).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_capture_returns_failure_payload() {
        let failure = capture(|| async { to_be_greater_than_or_equal(2, 5) })
            .await
            .unwrap()
            .expect("comparison should fail");
        assert_eq!(failure.matcher, "to_be_greater_than_or_equal");
        assert_eq!(failure.expected, Value::from(5));
        assert_eq!(failure.actual, Some(Value::from(2)));
    }

    #[tokio::test]
    async fn test_capture_propagates_faults() {
        let err = capture(|| async { Err(Raised::Fault(E2eError::Driver("detached".into()))) })
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::Driver(_)));
    }

    #[tokio::test]
    async fn test_question_mark_inside_routine_is_a_fault() {
        async fn broken() -> E2eResult<usize> {
            Err(E2eError::Timeout("rows".into()))
        }
        let err = capture(|| async {
            let n = broken().await?;
            to_be_less_than_or_equal(n, 1)
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_routine_runs_once() {
        let calls = AtomicUsize::new(0);
        let _ = capture(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            to_be_truthy(false)
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_is_lazy() {
        let rendered = Arc::new(AtomicUsize::new(0));
        let counter = rendered.clone();
        let outcome = AssertionOutcome::new(false, Value::from(1), None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "boom".to_string()
        });
        assert_eq!(rendered.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.message(), "boom");
        assert_eq!(rendered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_to_equal_reports_values() {
        match to_equal(&vec![1, 2], &vec![1, 3]) {
            Err(Raised::Expectation(f)) => {
                assert_eq!(f.expected, serde_json::json!([1, 3]));
                assert_eq!(f.actual, Some(serde_json::json!([1, 2])));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

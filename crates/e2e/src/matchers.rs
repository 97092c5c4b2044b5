//! Named cardinality matchers
//!
//! A [`MatcherRegistry`] is an explicit set of matchers handed to an
//! [`Expect`](crate::expect::Expect) context. The two built-in entries
//! compare how many elements a locator currently resolves to against a
//! threshold.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::assertion::{self, AssertionOutcome};
use crate::driver::Locator;
use crate::error::E2eResult;

pub const TO_HAVE_AT_MOST: &str = "to_have_at_most";
pub const TO_HAVE_AT_LEAST: &str = "to_have_at_least";

/// Placeholder printed when a failure carried no received value
pub const UNAVAILABLE: &str = "<unavailable>";

/// Invocation state passed to a matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct MatcherState {
    /// The call was negated with `.not()`
    pub is_not: bool,
}

/// Outcome of a named matcher
#[derive(Debug, Clone)]
pub struct MatcherResult {
    pub name: String,
    pub outcome: AssertionOutcome,
}

impl MatcherResult {
    pub fn pass(&self) -> bool {
        self.outcome.pass
    }

    /// The threshold the matcher was called with
    pub fn expected(&self) -> &Value {
        &self.outcome.expected
    }

    pub fn actual(&self) -> Option<&Value> {
        self.outcome.actual.as_ref()
    }

    pub fn message(&self) -> String {
        self.outcome.message()
    }
}

/// `expect(received).not.to_have_at_most(expected)`
pub fn matcher_hint(name: &str, is_not: bool, expected: &Value) -> String {
    let not = if is_not { ".not" } else { "" };
    format!("expect(received){}.{}({})", not, name, expected)
}

pub fn print_received(actual: Option<&Value>) -> String {
    actual
        .map(|v| v.to_string())
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

/// A matcher over the elements a locator resolves to
#[async_trait]
pub trait CountMatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        state: MatcherState,
        locator: &dyn Locator,
        threshold: usize,
    ) -> E2eResult<MatcherResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    AtMost,
    AtLeast,
}

/// Compares element count against a bound
#[derive(Debug, Clone)]
pub struct CardinalityMatcher {
    name: &'static str,
    bound: Bound,
}

impl CardinalityMatcher {
    /// Passes iff count ≤ threshold
    pub fn at_most() -> Self {
        Self {
            name: TO_HAVE_AT_MOST,
            bound: Bound::AtMost,
        }
    }

    /// Passes iff count ≥ threshold
    pub fn at_least() -> Self {
        Self {
            name: TO_HAVE_AT_LEAST,
            bound: Bound::AtLeast,
        }
    }
}

#[async_trait]
impl CountMatcher for CardinalityMatcher {
    fn name(&self) -> &str {
        self.name
    }

    async fn evaluate(
        &self,
        state: MatcherState,
        locator: &dyn Locator,
        threshold: usize,
    ) -> E2eResult<MatcherResult> {
        let bound = self.bound;
        let mut observed = None;
        let slot = &mut observed;
        let failure = assertion::capture(|| async move {
            let count = locator.count().await?;
            *slot = Some(Value::from(count));
            match bound {
                Bound::AtMost => assertion::to_be_less_than_or_equal(count, threshold),
                Bound::AtLeast => assertion::to_be_greater_than_or_equal(count, threshold),
            }
        })
        .await?;

        let expected = Value::from(threshold);
        let pass = failure.is_none();
        // A passing comparison carries no failure, so fall back to the count seen
        let actual = failure.and_then(|f| f.actual).or(observed);
        debug!(
            "{} {} on {}: received {}",
            self.name,
            threshold,
            locator.selector(),
            print_received(actual.as_ref())
        );

        let name = self.name;
        let message = {
            let expected = expected.clone();
            let actual = actual.clone();
            move || {
                if pass && !state.is_not {
                    return "Passed.".to_string();
                }
                format!(
                    "{}\n\nExpected: {}{}\nReceived: {}",
                    matcher_hint(name, state.is_not, &expected),
                    if state.is_not { "not " } else { "" },
                    expected,
                    print_received(actual.as_ref())
                )
            }
        };

        Ok(MatcherResult {
            name: name.to_string(),
            outcome: AssertionOutcome::new(pass, expected, actual, message),
        })
    }
}

/// Explicit set of named matchers
#[derive(Clone, Default)]
pub struct MatcherRegistry {
    matchers: BTreeMap<String, Arc<dyn CountMatcher>>,
}

impl MatcherRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the at-most and at-least matchers
    pub fn comparison() -> Self {
        let mut registry = Self::new();
        registry.register(CardinalityMatcher::at_most());
        registry.register(CardinalityMatcher::at_least());
        registry
    }

    /// Add a matcher, replacing any matcher with the same name
    pub fn register(&mut self, matcher: impl CountMatcher + 'static) -> &mut Self {
        self.matchers
            .insert(matcher.name().to_string(), Arc::new(matcher));
        self
    }

    /// Combine two registries. Entries in `other` win on name clashes.
    pub fn merge(mut self, other: MatcherRegistry) -> Self {
        self.matchers.extend(other.matchers);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CountMatcher>> {
        self.matchers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.matchers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.matchers.keys()).finish()
    }
}

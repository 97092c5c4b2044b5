//! Assertion context
//!
//! [`Expect`] is the entry point tests assert through. It owns a
//! [`MatcherRegistry`] for the custom cardinality matchers and provides a
//! few built-in matchers of its own. Every matcher, custom or built-in,
//! goes through the same negation and reporting path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::assertion::{self, AssertionOutcome};
use crate::config::HarnessConfig;
use crate::driver::{LocatorRef, Page, POLL_INTERVAL};
use crate::error::{E2eError, E2eResult};
use crate::matchers::{
    matcher_hint, print_received, MatcherRegistry, MatcherResult, MatcherState, TO_HAVE_AT_LEAST,
    TO_HAVE_AT_MOST,
};
use crate::visual::VisualTester;

/// Assertion context shared by one scenario
#[derive(Debug, Clone)]
pub struct Expect {
    registry: Arc<MatcherRegistry>,
    visual: Option<Arc<VisualTester>>,
    timeout: Duration,
}

impl Default for Expect {
    fn default() -> Self {
        Self::new(MatcherRegistry::comparison())
    }
}

impl Expect {
    pub fn new(registry: MatcherRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            visual: None,
            timeout: HarnessConfig::default().timeouts.visibility(),
        }
    }

    /// Context configured from `config`, with the comparison matchers
    /// plus `extra`. Creates the screenshot directories.
    pub fn from_config(config: &HarnessConfig, extra: MatcherRegistry) -> E2eResult<Self> {
        Ok(Self {
            registry: Arc::new(MatcherRegistry::comparison().merge(extra)),
            visual: Some(Arc::new(VisualTester::new(config.visual.clone())?)),
            timeout: config.timeouts.visibility(),
        })
    }

    pub fn with_visual(mut self, tester: VisualTester) -> Self {
        self.visual = Some(Arc::new(tester));
        self
    }

    /// Bound for auto-retrying built-in matchers
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &MatcherRegistry {
        &self.registry
    }

    /// `expect(locator)`
    pub fn that(&self, locator: LocatorRef) -> LocatorAssertions<'_> {
        LocatorAssertions {
            expect: self,
            locator,
            state: MatcherState::default(),
        }
    }

    /// `expect(page.url())`
    pub fn url<'p>(&self, page: &'p dyn Page) -> UrlAssertions<'p> {
        UrlAssertions {
            page,
            state: MatcherState::default(),
        }
    }
}

/// Turn a matcher result into the scenario outcome, honouring `.not()`
fn conclude(state: MatcherState, result: MatcherResult) -> E2eResult<()> {
    if result.pass() != state.is_not {
        return Ok(());
    }
    let message = result.message();
    warn!("{} failed", result.name);
    Err(E2eError::Expectation(message))
}

fn builtin_result(
    name: &'static str,
    state: MatcherState,
    expected: Value,
    failure: Option<assertion::AssertionFailure>,
    received: Option<Value>,
) -> MatcherResult {
    let pass = failure.is_none();
    let actual = failure.and_then(|f| f.actual).or(received);
    let message = {
        let expected = expected.clone();
        let actual = actual.clone();
        move || {
            format!(
                "{}\n\nExpected: {}{}\nReceived: {}",
                matcher_hint(name, state.is_not, &expected),
                if state.is_not { "not " } else { "" },
                expected,
                print_received(actual.as_ref())
            )
        }
    };
    MatcherResult {
        name: name.to_string(),
        outcome: AssertionOutcome::new(pass, expected, actual, message),
    }
}

/// Matchers over a locator
pub struct LocatorAssertions<'e> {
    expect: &'e Expect,
    locator: LocatorRef,
    state: MatcherState,
}

impl LocatorAssertions<'_> {
    /// Invert the next matcher
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.state.is_not = !self.state.is_not;
        self
    }

    /// Run a registered matcher by name
    pub async fn to_satisfy(&self, name: &str, threshold: usize) -> E2eResult<()> {
        let matcher = self
            .expect
            .registry
            .get(name)
            .ok_or_else(|| E2eError::UnknownMatcher(name.to_string()))?;
        let result = matcher
            .evaluate(self.state, self.locator.as_ref(), threshold)
            .await?;
        conclude(self.state, result)
    }

    pub async fn to_have_at_most(&self, threshold: usize) -> E2eResult<()> {
        self.to_satisfy(TO_HAVE_AT_MOST, threshold).await
    }

    pub async fn to_have_at_least(&self, threshold: usize) -> E2eResult<()> {
        self.to_satisfy(TO_HAVE_AT_LEAST, threshold).await
    }

    /// Retries until the count is (or, negated, is not) `expected`
    pub async fn to_have_count(&self, expected: usize) -> E2eResult<()> {
        self.retry(move || async move {
            let mut observed = None;
            let slot = &mut observed;
            let failure = assertion::capture(|| async move {
                let count = self.locator.count().await?;
                *slot = Some(Value::from(count));
                assertion::to_equal(&count, &expected)
            })
            .await?;
            Ok(builtin_result("to_have_count", self.state, expected.into(), failure, observed))
        })
        .await
    }

    pub async fn to_be_visible(&self) -> E2eResult<()> {
        self.retry(move || async move {
            let failure = assertion::capture(|| async move {
                assertion::to_be_truthy(self.locator.is_visible().await?)
            })
            .await?;
            Ok(builtin_result("to_be_visible", self.state, Value::Bool(true), failure, None))
        })
        .await
    }

    pub async fn to_contain_text(&self, text: &str) -> E2eResult<()> {
        self.retry(move || async move {
            let mut observed = None;
            let slot = &mut observed;
            let failure = assertion::capture(|| async move {
                let content = self.locator.text_content().await?.unwrap_or_default();
                *slot = Some(Value::from(content.clone()));
                assertion::to_contain(&content, text)
            })
            .await?;
            Ok(builtin_result("to_contain_text", self.state, text.into(), failure, observed))
        })
        .await
    }

    pub async fn to_have_class(&self, class: &str) -> E2eResult<()> {
        self.retry(move || async move {
            let mut observed = None;
            let slot = &mut observed;
            let failure = assertion::capture(|| async move {
                let classes = self.locator.get_attribute("class").await?.unwrap_or_default();
                let found = classes.split_whitespace().any(|c| c == class);
                *slot = Some(Value::from(classes));
                assertion::to_be_truthy(found)
            })
            .await?;
            Ok(builtin_result("to_have_class", self.state, class.into(), failure, observed))
        })
        .await
    }

    /// Compare the locator's screenshot with the baseline called `name`
    pub async fn to_match_screenshot(&self, name: &str) -> E2eResult<()> {
        let tester = self.expect.visual.as_ref().ok_or_else(|| {
            E2eError::InvalidConfig("screenshot matcher needs a VisualTester".to_string())
        })?;
        let png = self.locator.screenshot().await?;
        let diff = tester.compare(name, &png, None)?;

        let failure = (!diff.matches).then(|| assertion::AssertionFailure {
            matcher: "to_match_screenshot".to_string(),
            expected: Value::from(format!("<= {:.2}% changed", tester.config().threshold)),
            actual: Some(Value::from(format!("{:.2}% changed", diff.diff_percent))),
        });
        let result = builtin_result("to_match_screenshot", self.state, name.into(), failure, None);
        conclude(self.state, result)
    }

    /// Re-evaluate until the (possibly negated) matcher holds or time runs out
    async fn retry<F, Fut>(&self, mut evaluate: F) -> E2eResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = E2eResult<MatcherResult>>,
    {
        let start = Instant::now();
        loop {
            let result = evaluate().await?;
            if result.pass() != self.state.is_not || start.elapsed() >= self.expect.timeout {
                return conclude(self.state, result);
            }
            debug!("{} not yet satisfied on {}", result.name, self.locator.selector());
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Matchers over a page address
pub struct UrlAssertions<'p> {
    page: &'p dyn Page,
    state: MatcherState,
}

impl UrlAssertions<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.state.is_not = !self.state.is_not;
        self
    }

    pub async fn to_contain(&self, needle: &str) -> E2eResult<()> {
        let url = self.page.url();
        let haystack = url.as_str();
        let failure =
            assertion::capture(|| async move { assertion::to_contain(haystack, needle) }).await?;
        let result = builtin_result(
            "to_contain",
            self.state,
            needle.into(),
            failure,
            Some(url.clone().into()),
        );
        conclude(self.state, result)
    }
}

//! Assertion context over a live table

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tablecheck_e2e::assertion::AssertionOutcome;
use tablecheck_e2e::config::TimeoutConfig;
use tablecheck_e2e::driver::{Locator, LocatorRef, Page};
use tablecheck_e2e::matchers::{
    CardinalityMatcher, CountMatcher, MatcherResult, MatcherState, TO_HAVE_AT_LEAST,
    TO_HAVE_AT_MOST,
};
use tablecheck_e2e::sim::{SimContext, SimPage, TableFixture};
use tablecheck_e2e::visual::{VisualConfig, VisualTester};
use tablecheck_e2e::{
    logging, E2eError, E2eResult, Expect, HarnessConfig, MatcherRegistry, TableInteractor,
};
use tempfile::TempDir;
use test_case::test_case;

fn setup(rows: usize) -> (SimContext, SimPage, TableInteractor, Expect) {
    logging::init();
    let context = SimContext::new();
    let page = context.open_table("https://app.test/results", TableFixture::numbered(rows));
    let expect = Expect::default().with_timeout(Duration::from_millis(150));
    (context, page, TableInteractor::default(), expect)
}

fn data_rows(table: &TableInteractor, page: &SimPage) -> LocatorRef {
    table.get_rows(page, None)
}

/// Passes iff the count equals the threshold
struct Exactly;

#[async_trait]
impl CountMatcher for Exactly {
    fn name(&self) -> &str {
        "to_have_exactly"
    }

    async fn evaluate(
        &self,
        _state: MatcherState,
        locator: &dyn Locator,
        threshold: usize,
    ) -> E2eResult<MatcherResult> {
        let count = locator.count().await?;
        let message = move || format!("Expected: {}\nReceived: {}", threshold, count);
        Ok(MatcherResult {
            name: self.name().to_string(),
            outcome: AssertionOutcome::new(
                count == threshold,
                threshold.into(),
                Some(count.into()),
                message,
            ),
        })
    }
}

#[test_case(10, 10, true; "at most equal")]
#[test_case(10, 9, false; "at most below count")]
#[test_case(0, 0, true; "at most on empty table")]
#[tokio::test]
async fn at_most(rows: usize, bound: usize, holds: bool) {
    let (_context, page, table, expect) = setup(rows);
    let assertion = expect.that(data_rows(&table, &page));
    assert_eq!(assertion.to_have_at_most(bound).await.is_ok(), holds);
    let negated = expect.that(data_rows(&table, &page)).not();
    assert_eq!(negated.to_have_at_most(bound).await.is_ok(), !holds);
}

#[test_case(10, 10, true; "at least equal")]
#[test_case(10, 11, false; "at least above count")]
#[test_case(3, 0, true; "at least zero")]
#[tokio::test]
async fn at_least(rows: usize, bound: usize, holds: bool) {
    let (_context, page, table, expect) = setup(rows);
    let result = expect.that(data_rows(&table, &page)).to_have_at_least(bound).await;
    assert_eq!(result.is_ok(), holds);
}

#[tokio::test]
async fn failure_is_an_expectation_with_diagnostic() {
    let (_context, page, table, expect) = setup(12);
    let err = expect
        .that(data_rows(&table, &page))
        .to_have_at_most(4)
        .await
        .unwrap_err();

    assert!(err.is_expectation());
    let message = err.to_string();
    assert!(message.contains("expect(received).to_have_at_most(4)"), "{}", message);
    assert!(message.contains("Expected: 4"));
    assert!(message.contains("Received: 12"));
}

#[tokio::test]
async fn negated_failure_reports_observed_count() {
    let (_context, page, table, expect) = setup(12);
    let err = expect
        .that(data_rows(&table, &page))
        .not()
        .to_have_at_least(4)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains(".not.to_have_at_least(4)"), "{}", message);
    assert!(message.contains("Expected: not 4"));
    assert!(message.contains("Received: 12"));
}

#[tokio::test]
async fn registry_is_explicit() {
    let (_context, page, table, _) = setup(3);
    let mut only_at_most = MatcherRegistry::new();
    only_at_most.register(CardinalityMatcher::at_most());
    let expect = Expect::new(only_at_most);

    assert!(expect.registry().get(TO_HAVE_AT_MOST).is_some());
    expect
        .that(data_rows(&table, &page))
        .to_have_at_most(3)
        .await
        .unwrap();

    let err = expect
        .that(data_rows(&table, &page))
        .to_have_at_least(1)
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::UnknownMatcher(ref name) if name == "to_have_at_least"));
}

#[tokio::test]
async fn context_from_config_merges_extra_matchers() {
    let (_context, page, table, _) = setup(6);
    let dir = TempDir::new().unwrap();
    let config = HarnessConfig {
        timeouts: TimeoutConfig {
            visibility_ms: 120,
            ..TimeoutConfig::default()
        },
        visual: VisualConfig {
            auto_update: true,
            ..VisualConfig::rooted(dir.path())
        },
        ..HarnessConfig::default()
    };
    let mut extra = MatcherRegistry::new();
    extra.register(Exactly);

    let expect = Expect::from_config(&config, extra).unwrap();
    assert!(dir.path().join("baselines").is_dir());
    for name in [TO_HAVE_AT_MOST, TO_HAVE_AT_LEAST, "to_have_exactly"] {
        assert!(expect.registry().get(name).is_some(), "{} missing", name);
    }

    let rows = expect.that(data_rows(&table, &page));
    rows.to_satisfy("to_have_exactly", 6).await.unwrap();
    rows.to_have_at_least(6).await.unwrap();
    let err = rows.to_satisfy("to_have_exactly", 5).await.unwrap_err();
    assert!(err.to_string().contains("Received: 6"), "{}", err);
    let negated = expect.that(data_rows(&table, &page)).not();
    negated.to_satisfy("to_have_exactly", 5).await.unwrap();

    // Built-in retries are bounded by the configured visibility timeout
    let started = std::time::Instant::now();
    assert!(rows.to_have_count(7).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(2));

    let row = data_rows(&table, &page).nth(0);
    expect.that(row).to_match_screenshot("first-row").await.unwrap();
    assert!(dir.path().join("baselines").read_dir().unwrap().next().is_some());
}

#[tokio::test]
async fn fan_out_over_filtered_views() {
    let (_context, page, table, expect) = setup(40);
    let statuses = ["Passed", "Failed"];

    let checks = statuses.iter().map(|status| {
        let rows = table.get_rows(&page, Some((*status).into()));
        let expect = &expect;
        async move {
            expect.that(rows.clone()).to_have_at_least(20).await?;
            expect.that(rows).to_have_at_most(20).await
        }
    });
    try_join_all(checks).await.unwrap();
}

#[tokio::test]
async fn count_matcher_waits_for_the_table_to_settle() {
    let (_context, page, table, expect) = setup(30);
    let rows = data_rows(&table, &page);

    let settled = expect.that(rows.clone());
    let (checked, filtered) = tokio::join!(settled.to_have_count(10), async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        table.filter(&page, Some("row-01")).await
    });
    filtered.unwrap();
    checked.unwrap();

    let err = expect.that(rows).to_have_count(11).await.unwrap_err();
    assert!(err.to_string().contains("Received: 10"));
}

#[tokio::test]
async fn visibility_and_text_matchers() {
    let (_context, page, table, expect) = setup(5);
    let control = page.locator(&table.selectors().global_filter);

    expect.that(control.clone()).not().to_be_visible().await.unwrap();
    page.locator(&table.selectors().host).hover().await.unwrap();
    expect.that(control).to_be_visible().await.unwrap();

    let first = data_rows(&table, &page).nth(0);
    expect.that(first.clone()).to_contain_text("row-001").await.unwrap();
    expect.that(first.clone()).not().to_have_class("selected").await.unwrap();
    table.select(&page, "row-001").await.unwrap();
    expect.that(first).to_have_class("selected").await.unwrap();
}

#[tokio::test]
async fn screenshot_matcher_uses_baselines() {
    let (_context, page, table, expect) = setup(3);
    let dir = TempDir::new().unwrap();
    let config = VisualConfig {
        auto_update: true,
        ..VisualConfig::rooted(dir.path())
    };
    let expect = expect.with_visual(VisualTester::new(config).unwrap());
    let row = data_rows(&table, &page).nth(1);

    // First run records the baseline
    expect.that(row.clone()).to_match_screenshot("row-2").await.unwrap();
    expect.that(row.clone()).to_match_screenshot("row-2").await.unwrap();

    table.select(&page, "row-002").await.unwrap();
    let err = expect.that(row.clone()).to_match_screenshot("row-2").await.unwrap_err();
    assert!(err.is_expectation(), "{:?}", err);
    expect.that(row).not().to_match_screenshot("row-2").await.unwrap();
}

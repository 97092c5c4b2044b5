//! In-memory browser
//!
//! A deterministic implementation of the [`driver`](crate::driver) traits
//! that renders the virtualised table widget into an arena DOM. It follows
//! the browser rules the toolkit depends on:
//!
//! - locators re-resolve on every action, and single-element actions are strict
//! - actions need a visible target; the global filter only shows on hover
//! - row clicks replace the selection unless `Control` is held
//! - routed pages query `GetNextQuerySessionPage` while loading, and
//!   filtering queries it again
//! - responses and new pages are delivered to subscriptions registered
//!   before they happened; an unclaimed response waits for a later
//!   subscriber until a newer one from the same URL replaces it
//!
//! ```text
//!   SimContext ── routes ──► SimPage ── Dom + TableApp
//!       ▲                      │
//!       └── row link click ────┘ (opens a new SimPage)
//! ```

mod app;
mod dom;
mod page;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::info;

pub use app::{FixtureRow, MenuChoice, TableFixture, MENU_OPTIONS, MULTI_SELECT_KEY};
pub use page::{KeyEvent, SimPage};

use crate::driver::{BrowserContext, PageRef, PendingPage};
use crate::error::E2eError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a page gets when its URL contains `url_contains`
#[derive(Debug, Clone, Default)]
pub struct SimRoute {
    pub url_contains: String,
    pub fixture: Option<TableFixture>,
    /// Responses already received when the page opens: `(url, JSON body)`
    pub responses: Vec<(String, Value)>,
}

impl SimRoute {
    pub fn new(url_contains: impl Into<String>) -> Self {
        Self {
            url_contains: url_contains.into(),
            ..Self::default()
        }
    }

    pub fn table(mut self, fixture: TableFixture) -> Self {
        self.fixture = Some(fixture);
        self
    }

    pub fn response(mut self, url: impl Into<String>, body: Value) -> Self {
        self.responses.push((url.into(), body));
        self
    }
}

#[derive(Default)]
struct ContextState {
    pages: Vec<SimPage>,
    waiters: Vec<oneshot::Sender<PageRef>>,
    routes: Vec<SimRoute>,
}

pub(crate) struct ContextInner {
    state: Mutex<ContextState>,
    default_timeout: Duration,
}

impl ContextInner {
    /// Open a page, apply its route, and announce it to every subscriber
    pub(crate) fn open(
        inner: &Arc<ContextInner>,
        url: String,
        fixture: Option<TableFixture>,
    ) -> SimPage {
        let route = {
            let state = inner.state.lock();
            state
                .routes
                .iter()
                .find(|r| url.contains(&r.url_contains))
                .cloned()
        };
        let loading = route.is_some();
        let (fixture, responses) = match route {
            Some(route) => (fixture.or(route.fixture), route.responses),
            None => (fixture, Vec::new()),
        };

        info!("Opening page {}", url);
        let page = SimPage::new(Arc::downgrade(inner), url, fixture);
        for (url, body) in responses {
            page.respond_json(url, &body);
        }
        if loading {
            page.load();
        }

        let mut state = inner.state.lock();
        state.pages.push(page.clone());
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Arc::new(page.clone()));
        }
        page
    }
}

/// A simulated browser context
#[derive(Clone)]
pub struct SimContext {
    inner: Arc<ContextInner>,
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SimContext {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                state: Mutex::new(ContextState::default()),
                default_timeout,
            }),
        }
    }

    /// Register content for pages opened later
    pub fn route(&self, route: SimRoute) {
        self.inner.state.lock().routes.push(route);
    }

    pub fn open_page(&self, url: impl Into<String>) -> SimPage {
        ContextInner::open(&self.inner, url.into(), None)
    }

    /// Open an already loaded page showing `fixture`
    pub fn open_table(&self, url: impl Into<String>, fixture: TableFixture) -> SimPage {
        ContextInner::open(&self.inner, url.into(), Some(fixture))
    }

    /// Every page opened so far, in opening order
    pub fn pages(&self) -> Vec<SimPage> {
        self.inner.state.lock().pages.clone()
    }
}

impl BrowserContext for SimContext {
    fn wait_for_page(&self) -> PendingPage {
        let (tx, rx) = oneshot::channel();
        self.inner.state.lock().waiters.push(tx);
        rx.map(|r| r.map_err(|_| E2eError::Driver("browser context closed".to_string())))
            .boxed()
    }

    fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }
}

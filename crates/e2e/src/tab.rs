//! Tabs opened as a side effect of a UI action

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::driver::{BrowserContext, PageRef, Viewport};
use crate::error::{E2eError, E2eResult};

type Trigger<'a> = Box<dyn FnOnce() -> BoxFuture<'a, E2eResult<()>> + Send + 'a>;
type OnOpen<'a> = Box<dyn FnOnce(PageRef) -> BoxFuture<'a, E2eResult<()>> + Send + 'a>;

/// Progress of a single [`TabCoordinator::open`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Idle,
    Triggered,
    Opening,
    ViewportSet,
    Verified,
    Returned,
}

/// What to do around the tab-opening action
pub struct TabOptions<'a> {
    trigger: Trigger<'a>,
    on_open: Option<OnOpen<'a>>,
    viewport: Option<Viewport>,
}

impl<'a> TabOptions<'a> {
    /// `trigger` is the action expected to open exactly one new tab
    pub fn new<F, Fut>(trigger: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = E2eResult<()>> + Send + 'a,
    {
        Self {
            trigger: Box::new(move || trigger().boxed()),
            on_open: None,
            viewport: None,
        }
    }

    /// Verification run against the new tab before it is returned
    pub fn on_open<F, Fut>(mut self, on_open: F) -> Self
    where
        F: FnOnce(PageRef) -> Fut + Send + 'a,
        Fut: Future<Output = E2eResult<()>> + Send + 'a,
    {
        self.on_open = Some(Box::new(move |page| on_open(page).boxed()));
        self
    }

    /// Applied before `on_open` runs
    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }
}

impl fmt::Debug for TabOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabOptions")
            .field("on_open", &self.on_open.is_some())
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

/// A tab handed to the caller. Closing it is the caller's job.
#[derive(Clone)]
pub struct TabHandle {
    page: PageRef,
}

impl TabHandle {
    pub fn page(&self) -> &PageRef {
        &self.page
    }

    pub fn into_page(self) -> PageRef {
        self.page
    }

    pub async fn close(self) -> E2eResult<()> {
        debug!("Closing tab {}", self.page.url());
        self.page.close().await
    }
}

impl Deref for TabHandle {
    type Target = PageRef;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl fmt::Debug for TabHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabHandle").field("url", &self.page.url()).finish()
    }
}

/// Correlates a UI action with the tab it opens
#[derive(Clone)]
pub struct TabCoordinator {
    context: Arc<dyn BrowserContext>,
}

impl TabCoordinator {
    pub fn new(context: Arc<dyn BrowserContext>) -> Self {
        Self { context }
    }

    /// Run the trigger and return the tab it opened.
    ///
    /// The new-page subscription is taken before the trigger runs. The wait
    /// is bounded by the context's default timeout. A failing `on_open`
    /// aborts the call and leaves the tab open.
    pub async fn open(&self, options: TabOptions<'_>) -> E2eResult<TabHandle> {
        let TabOptions {
            trigger,
            on_open,
            viewport,
        } = options;
        let mut state = TabState::Idle;

        let pending = self.context.wait_for_page();
        trigger().await?;
        advance(&mut state, TabState::Triggered);

        let timeout = self.context.default_timeout();
        let page = tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| E2eError::Timeout(format!("new tab after {} ms", timeout.as_millis())))??;
        advance(&mut state, TabState::Opening);
        info!("Tab opened: {}", page.url());

        if let Some(viewport) = viewport {
            page.set_viewport_size(viewport).await?;
            advance(&mut state, TabState::ViewportSet);
        }

        if let Some(on_open) = on_open {
            on_open(page.clone()).await?;
            advance(&mut state, TabState::Verified);
        }

        advance(&mut state, TabState::Returned);
        Ok(TabHandle { page })
    }
}

fn advance(state: &mut TabState, next: TabState) {
    debug!("tab {:?} -> {:?}", state, next);
    *state = next;
}

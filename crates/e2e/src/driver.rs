//! Browser automation capability
//!
//! The toolkit never talks to a browser directly. Everything it needs from
//! the automation layer is expressed by the traits in this module: a
//! [`BrowserContext`] that can announce new tabs, a [`Page`] that hands out
//! lazy [`Locator`]s and network responses, and the locators themselves.
//! A locator is a query, not an element: every action re-resolves it
//! against the live DOM.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{E2eError, E2eResult};

/// Polling interval for state waits
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type LocatorRef = Arc<dyn Locator>;
pub type PageRef = Arc<dyn Page>;

/// A new-page subscription. Registered when created, resolved when the tab opens.
pub type PendingPage = BoxFuture<'static, E2eResult<PageRef>>;

/// A response subscription. Registered when created, resolved on the first match.
pub type PendingResponse = BoxFuture<'static, E2eResult<NetworkResponse>>;

/// Text filter applied to a locator (Playwright's `hasText`)
#[derive(Debug, Clone)]
pub enum TextMatch {
    /// Case-insensitive substring of the element's text content
    Contains(String),
    /// The element, or one of its descendants, has exactly this text
    Exact(String),
    /// Regular expression over the element's text content
    Pattern(Regex),
}

impl TextMatch {
    /// Match against an element's concatenated text content.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            TextMatch::Contains(needle) => normalize(text)
                .to_lowercase()
                .contains(&normalize(needle).to_lowercase()),
            TextMatch::Exact(expected) => normalize(text) == normalize(expected),
            TextMatch::Pattern(re) => re.is_match(text),
        }
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextMatch::Contains(s) => write!(f, "{:?}", s),
            TextMatch::Exact(s) => write!(f, "exact {:?}", s),
            TextMatch::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for TextMatch {
    fn from(s: &str) -> Self {
        TextMatch::Contains(s.to_string())
    }
}

impl From<String> for TextMatch {
    fn from(s: String) -> Self {
        TextMatch::Contains(s)
    }
}

impl From<Regex> for TextMatch {
    fn from(re: Regex) -> Self {
        TextMatch::Pattern(re)
    }
}

/// Collapse runs of whitespace and trim, as browsers do for `innerText`.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        };
        f.write_str(s)
    }
}

/// A completed network response as seen by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl NetworkResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Glob over response URLs. `**` crosses path segments, `*` does not.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    glob: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(glob: impl Into<String>) -> E2eResult<Self> {
        let glob = glob.into();
        let mut source = String::from("^");
        let mut chars = glob.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    source.push_str(".*");
                } else {
                    source.push_str("[^/]*");
                }
            } else {
                source.push_str(&regex::escape(&c.to_string()));
            }
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| E2eError::InvalidConfig(format!("bad URL glob {:?}: {}", glob, e)))?;
        Ok(Self { glob, regex })
    }

    pub fn matches(&self, url: &str) -> bool {
        // Query strings do not take part in matching
        let path = url.split('?').next().unwrap_or(url);
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glob)
    }
}

/// Lazy element query
#[async_trait]
pub trait Locator: Send + Sync {
    /// Human-readable description of the query
    fn selector(&self) -> String;

    /// Descendants of every match, selected by CSS
    fn locator(&self, selector: &str) -> LocatorRef;

    /// Narrow the matches to those whose text satisfies `has_text`
    fn filter(&self, has_text: TextMatch) -> LocatorRef;

    /// The `index`-th match (zero-based)
    fn nth(&self, index: usize) -> LocatorRef;

    async fn count(&self) -> E2eResult<usize>;

    /// One locator per current match, each pinned by position
    async fn all(&self) -> E2eResult<Vec<LocatorRef>> {
        let count = self.count().await?;
        Ok((0..count).map(|i| self.nth(i)).collect())
    }

    async fn click(&self, button: MouseButton) -> E2eResult<()>;

    async fn hover(&self) -> E2eResult<()>;

    async fn fill(&self, value: &str) -> E2eResult<()>;

    async fn clear(&self) -> E2eResult<()> {
        self.fill("").await
    }

    async fn text_content(&self) -> E2eResult<Option<String>>;

    async fn get_attribute(&self, name: &str) -> E2eResult<Option<String>>;

    async fn is_visible(&self) -> E2eResult<bool>;

    /// PNG bytes of the first match
    async fn screenshot(&self) -> E2eResult<Vec<u8>>;

    /// Poll until the query reaches `state` or `timeout` elapses.
    async fn wait_for(&self, state: WaitState, timeout: Duration) -> E2eResult<()> {
        let start = Instant::now();
        loop {
            let reached = match state {
                WaitState::Visible => self.is_visible().await?,
                WaitState::Hidden => !self.is_visible().await?,
                WaitState::Attached => self.count().await? > 0,
                WaitState::Detached => self.count().await? == 0,
            };
            if reached {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(E2eError::Timeout(format!(
                    "{} to be {} ({} ms)",
                    self.selector(),
                    state,
                    timeout.as_millis()
                )));
            }
            trace!("{} not yet {}", self.selector(), state);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl fmt::Debug for dyn Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self.selector())
    }
}

/// One browser tab
#[async_trait]
pub trait Page: Send + Sync {
    fn url(&self) -> String;

    fn locator(&self, selector: &str) -> LocatorRef;

    fn get_by_test_id(&self, test_id: &str) -> LocatorRef {
        self.locator(&format!("[data-testid=\"{}\"]", test_id))
    }

    async fn key_down(&self, key: &str) -> E2eResult<()>;

    async fn key_up(&self, key: &str) -> E2eResult<()>;

    async fn set_viewport_size(&self, viewport: Viewport) -> E2eResult<()>;

    fn viewport_size(&self) -> Option<Viewport>;

    /// Subscribe to the next response matching `pattern`.
    ///
    /// The subscription is registered before this returns, so a request
    /// issued between this call and awaiting the future is not missed.
    fn wait_for_response(&self, pattern: UrlPattern, timeout: Duration) -> PendingResponse;

    async fn close(&self) -> E2eResult<()>;

    fn is_closed(&self) -> bool;
}

impl fmt::Debug for dyn Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.url())
    }
}

/// Owner of a set of tabs
pub trait BrowserContext: Send + Sync {
    /// Subscribe to the next page opened in this context. Same
    /// registration guarantee as [`Page::wait_for_response`].
    fn wait_for_page(&self) -> PendingPage;

    /// Bound applied to waits that take no explicit timeout
    fn default_timeout(&self) -> Duration;
}

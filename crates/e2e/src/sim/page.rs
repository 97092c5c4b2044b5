//! Pages and locators backed by the arena DOM

use std::collections::{BTreeSet, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::app::{Effect, MenuChoice, TableApp, TableFixture, MULTI_SELECT_KEY};
use super::dom::{dedup, Dom, NodeId};
use super::ContextInner;
use crate::driver::{
    Locator, LocatorRef, MouseButton, NetworkResponse, Page, PendingResponse, TextMatch, UrlPattern,
    Viewport,
};
use crate::error::{E2eError, E2eResult};

const SCREENSHOT_WIDTH: u32 = 64;
const SCREENSHOT_HEIGHT: u32 = 16;

/// Unclaimed responses kept per page; the oldest are dropped past this
const BACKLOG_LIMIT: usize = 64;

/// Endpoint the table re-queries after its rows change
const QUERY_METHOD: &str = "API/v1/Internal.asmx/GetNextQuerySessionPage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Down(String),
    Up(String),
}

#[derive(Default)]
struct Network {
    waiters: Vec<(UrlPattern, oneshot::Sender<NetworkResponse>)>,
    backlog: VecDeque<NetworkResponse>,
}

impl Network {
    /// Oldest matching waiter gets the response. Otherwise it is kept, in
    /// arrival order, for a later subscriber.
    fn deliver(&mut self, response: NetworkResponse) {
        self.waiters.retain(|(_, tx)| !tx.is_closed());
        let unclaimed = match self.waiters.iter().position(|(p, _)| p.matches(&response.url)) {
            Some(pos) => {
                let (_, tx) = self.waiters.remove(pos);
                match tx.send(response) {
                    Ok(()) => return,
                    Err(unclaimed) => unclaimed,
                }
            }
            None => response,
        };
        if self.backlog.len() == BACKLOG_LIMIT {
            if let Some(dropped) = self.backlog.pop_front() {
                debug!("Backlog full, dropping response {}", dropped.url);
            }
        }
        self.backlog.push_back(unclaimed);
    }

    fn subscribe(&mut self, pattern: UrlPattern) -> oneshot::Receiver<NetworkResponse> {
        let (tx, rx) = oneshot::channel();
        let buffered = self.backlog.iter().position(|r| pattern.matches(&r.url));
        match buffered.and_then(|pos| self.backlog.remove(pos)) {
            Some(response) => {
                let _ = tx.send(response);
            }
            None => self.waiters.push((pattern, tx)),
        }
        rx
    }
}

struct PageState {
    url: String,
    dom: Dom,
    app: Option<TableApp>,
    held_keys: BTreeSet<String>,
    key_log: Vec<KeyEvent>,
    viewport: Option<Viewport>,
    closed: bool,
    network: Network,
}

impl PageState {
    fn origin(&self) -> &str {
        let after_scheme = self.url.find("://").map_or(0, |i| i + 3);
        match self.url[after_scheme..].find('/') {
            Some(i) => &self.url[..after_scheme + i],
            None => &self.url,
        }
    }

    fn emit_query(&mut self) {
        if let Some(app) = &self.app {
            let url = format!("{}/{}", self.origin(), QUERY_METHOD);
            let body = app.query_page().to_string();
            trace!("response {}", url);
            self.network.deliver(NetworkResponse::new(url, 200, body));
        }
    }

    /// Apply a table effect; returns the URL of a tab to open, if any
    fn settle(&mut self, effect: Effect) -> Option<String> {
        match effect {
            Effect::None => None,
            Effect::Requery => {
                self.emit_query();
                None
            }
            Effect::OpenTab(url) => Some(url),
        }
    }
}

pub(crate) struct PageCore {
    state: Mutex<PageState>,
    context: Weak<ContextInner>,
}

/// A simulated browser tab
#[derive(Clone)]
pub struct SimPage {
    core: Arc<PageCore>,
}

impl SimPage {
    pub(crate) fn new(
        context: Weak<ContextInner>,
        url: String,
        fixture: Option<TableFixture>,
    ) -> Self {
        let mut dom = Dom::new();
        let app = fixture.map(|f| TableApp::mount(&mut dom, f));
        let state = PageState {
            url,
            dom,
            app,
            held_keys: BTreeSet::new(),
            key_log: Vec::new(),
            viewport: None,
            closed: false,
            network: Network::default(),
        };

        Self {
            core: Arc::new(PageCore {
                state: Mutex::new(state),
                context,
            }),
        }
    }

    /// The table's first query, issued while the page loads
    pub(crate) fn load(&self) {
        self.core.state.lock().emit_query();
    }

    /// Queue a response as if the page had just received it
    pub fn respond(&self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) {
        self.core
            .state
            .lock()
            .network
            .deliver(NetworkResponse::new(url, status, body));
    }

    /// Queue a 200 response carrying `body` as JSON
    pub fn respond_json(&self, url: impl Into<String>, body: &serde_json::Value) {
        self.respond(url, 200, body.to_string());
    }

    pub fn key_log(&self) -> Vec<KeyEvent> {
        self.core.state.lock().key_log.clone()
    }

    pub fn held_keys(&self) -> Vec<String> {
        self.core.state.lock().held_keys.iter().cloned().collect()
    }

    /// Column menu options clicked so far
    pub fn menu_choices(&self) -> Vec<MenuChoice> {
        self.core
            .state
            .lock()
            .app
            .as_ref()
            .map(|app| app.choices().to_vec())
            .unwrap_or_default()
    }

    fn open_tab(&self, url: Option<String>) {
        if let (Some(url), Some(context)) = (url, self.core.context.upgrade()) {
            debug!("Row link opens {}", url);
            ContextInner::open(&context, url, None);
        }
    }
}

#[async_trait]
impl Page for SimPage {
    fn url(&self) -> String {
        self.core.state.lock().url.clone()
    }

    fn locator(&self, selector: &str) -> LocatorRef {
        Arc::new(SimLocator {
            core: self.core.clone(),
            steps: vec![Step::Css(selector.to_string())],
        })
    }

    async fn key_down(&self, key: &str) -> E2eResult<()> {
        let mut state = live(&self.core)?;
        state.held_keys.insert(key.to_string());
        state.key_log.push(KeyEvent::Down(key.to_string()));
        Ok(())
    }

    async fn key_up(&self, key: &str) -> E2eResult<()> {
        let mut state = live(&self.core)?;
        state.held_keys.remove(key);
        state.key_log.push(KeyEvent::Up(key.to_string()));
        Ok(())
    }

    async fn set_viewport_size(&self, viewport: Viewport) -> E2eResult<()> {
        live(&self.core)?.viewport = Some(viewport);
        Ok(())
    }

    fn viewport_size(&self) -> Option<Viewport> {
        self.core.state.lock().viewport
    }

    fn wait_for_response(&self, pattern: UrlPattern, timeout: Duration) -> PendingResponse {
        let glob = pattern.to_string();
        let rx = {
            let mut state = self.core.state.lock();
            if state.closed {
                let err = E2eError::Driver(format!("page closed before waiting for {}", glob));
                return futures::future::ready(Err(err)).boxed();
            }
            state.network.subscribe(pattern)
        };
        async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(E2eError::Driver(format!(
                    "page closed while waiting for {}",
                    glob
                ))),
                Err(_) => Err(E2eError::Timeout(format!(
                    "response {} ({} ms)",
                    glob,
                    timeout.as_millis()
                ))),
            }
        }
        .boxed()
    }

    async fn close(&self) -> E2eResult<()> {
        let mut state = self.core.state.lock();
        state.closed = true;
        state.network = Network::default();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }
}

fn live(core: &PageCore) -> E2eResult<parking_lot::MutexGuard<'_, PageState>> {
    let state = core.state.lock();
    if state.closed {
        return Err(E2eError::Driver("target page has been closed".to_string()));
    }
    Ok(state)
}

#[derive(Debug, Clone)]
enum Step {
    Css(String),
    Filter(TextMatch),
    Nth(usize),
}

#[derive(Clone)]
struct SimLocator {
    core: Arc<PageCore>,
    steps: Vec<Step>,
}

impl SimLocator {
    fn extend(&self, step: Step) -> LocatorRef {
        let mut steps = self.steps.clone();
        steps.push(step);
        Arc::new(SimLocator {
            core: self.core.clone(),
            steps,
        })
    }

    fn resolve(&self, state: &PageState) -> E2eResult<Vec<NodeId>> {
        let dom = &state.dom;
        let mut current = vec![dom.root()];
        for step in &self.steps {
            current = match step {
                Step::Css(selector) => {
                    let mut found = Vec::new();
                    for scope in &current {
                        found.extend(dom.query_all(*scope, selector)?);
                    }
                    dedup(found)
                }
                Step::Filter(TextMatch::Exact(text)) => current
                    .into_iter()
                    .filter(|n| dom.has_exact_text(*n, text))
                    .collect(),
                Step::Filter(m) => current
                    .into_iter()
                    .filter(|n| m.matches(&dom.text_content(*n)))
                    .collect(),
                Step::Nth(i) => current.get(*i).copied().into_iter().collect(),
            };
        }
        Ok(current)
    }

    /// The single element an action targets
    fn resolve_one(&self, state: &PageState) -> E2eResult<NodeId> {
        match self.resolve(state)?.as_slice() {
            [node] => Ok(*node),
            [] => Err(E2eError::resolution(self.selector(), "no element matches")),
            many => Err(E2eError::resolution(
                self.selector(),
                format!("strict mode violation: {} elements match", many.len()),
            )),
        }
    }

    /// Like `resolve_one`, but the element must also be visible
    fn resolve_actionable(&self, state: &PageState) -> E2eResult<NodeId> {
        let node = self.resolve_one(state)?;
        if !state.dom.is_visible(node) {
            return Err(E2eError::Timeout(format!("{} to be visible", self.selector())));
        }
        Ok(node)
    }

    fn page(&self) -> SimPage {
        SimPage {
            core: self.core.clone(),
        }
    }
}

#[async_trait]
impl Locator for SimLocator {
    fn selector(&self) -> String {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Css(s) => s.clone(),
                Step::Filter(m) => format!("has-text={}", m),
                Step::Nth(i) => format!("nth={}", i),
            })
            .collect::<Vec<_>>()
            .join(" >> ")
    }

    fn locator(&self, selector: &str) -> LocatorRef {
        self.extend(Step::Css(selector.to_string()))
    }

    fn filter(&self, has_text: TextMatch) -> LocatorRef {
        self.extend(Step::Filter(has_text))
    }

    fn nth(&self, index: usize) -> LocatorRef {
        self.extend(Step::Nth(index))
    }

    async fn count(&self) -> E2eResult<usize> {
        let state = live(&self.core)?;
        Ok(self.resolve(&state)?.len())
    }

    async fn click(&self, button: MouseButton) -> E2eResult<()> {
        let tab = {
            let mut state = live(&self.core)?;
            let node = self.resolve_actionable(&state)?;
            let extend = state.held_keys.contains(MULTI_SELECT_KEY);
            let PageState { dom, app, .. } = &mut *state;
            let effect = match app {
                Some(app) => app.click(dom, node, button, extend),
                None => Effect::None,
            };
            state.settle(effect)
        };
        self.page().open_tab(tab);
        Ok(())
    }

    async fn hover(&self) -> E2eResult<()> {
        let mut state = live(&self.core)?;
        let node = self.resolve_actionable(&state)?;
        let PageState { dom, app, .. } = &mut *state;
        if let Some(app) = app {
            app.hover(dom, node);
        }
        Ok(())
    }

    async fn fill(&self, value: &str) -> E2eResult<()> {
        let mut state = live(&self.core)?;
        let node = self.resolve_actionable(&state)?;
        let PageState { dom, app, .. } = &mut *state;
        let effect = match app {
            Some(app) => app.fill(dom, node, value)?,
            None if dom.tag(node) == "input" => {
                dom.set_attr(node, "value", value);
                Effect::None
            }
            None => return Err(E2eError::Driver(format!("cannot fill {}", self.selector()))),
        };
        state.settle(effect);
        Ok(())
    }

    async fn text_content(&self) -> E2eResult<Option<String>> {
        let state = live(&self.core)?;
        let node = self.resolve_one(&state)?;
        Ok(Some(state.dom.text_content(node)))
    }

    async fn get_attribute(&self, name: &str) -> E2eResult<Option<String>> {
        let state = live(&self.core)?;
        let node = self.resolve_one(&state)?;
        Ok(state.dom.attr(node, name))
    }

    async fn is_visible(&self) -> E2eResult<bool> {
        let state = live(&self.core)?;
        match self.resolve(&state)?.as_slice() {
            [] => Ok(false),
            [node] => Ok(state.dom.is_visible(*node)),
            _ => self.resolve_one(&state).map(|_| false),
        }
    }

    async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        let seed = {
            let state = live(&self.core)?;
            let node = self.resolve_actionable(&state)?;
            format!(
                "{}|{}",
                state.dom.attr(node, "class").unwrap_or_default(),
                state.dom.text_content(node)
            )
        };
        render_png(&seed)
    }
}

/// Deterministic image derived from an element's classes and text
fn render_png(seed: &str) -> E2eResult<Vec<u8>> {
    let digest = Sha256::digest(seed.as_bytes());
    let img = RgbaImage::from_fn(SCREENSHOT_WIDTH, SCREENSHOT_HEIGHT, |x, y| {
        let i = ((x / 8 + y / 8 * (SCREENSHOT_WIDTH / 8)) as usize * 3) % digest.len();
        Rgba([
            digest[i],
            digest[(i + 1) % digest.len()],
            digest[(i + 2) % digest.len()],
            255,
        ])
    });

    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)?;
    Ok(out)
}

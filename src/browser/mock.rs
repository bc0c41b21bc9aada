//! A scriptable in-memory browser for tests and offline dry runs.
//!
//! Provides the full [`BrowserSession`] surface without a real engine:
//! - `with_element()` registers elements addressable by any of their selectors
//! - `block_local_storage()` / `block_session_storage()` simulate security errors
//! - `disconnect()` turns every later call into a fatal driver fault
//! - `stall()` makes one kind of call hang, `auto_wait()` makes missing targets time out
//! - `actions()` returns the log of performed actions for assertions
//!
//! Clones share state, so a test can keep a handle while the engine owns the session.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::driver::{BrowserLauncher, BrowserSession};
use super::profile::{DATA_MARKER, NEEDLE_MARKER, SELECTORS_MARKER};
use super::types::{BrowserError, BrowserKind, BrowserResult, Cookie, PageSnapshot};

/// An element on the mock page
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    /// Every selector or hint this element answers to
    pub selectors: Vec<String>,
    /// Options offered if this is a `<select>`
    pub options: Vec<String>,
    /// Current value after fill/select
    pub value: Option<String>,
    /// URL the page moves to when this element is clicked
    pub navigates_to: Option<String>,
}

impl MockElement {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selectors: vec![selector.into()],
            ..Default::default()
        }
    }

    /// Make the element answer to another selector
    pub fn alias(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    /// Turn the element into a select with the given options
    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Clicking the element moves the page to `url`
    pub fn navigates_to(mut self, url: impl Into<String>) -> Self {
        self.navigates_to = Some(url.into());
        self
    }

    fn matches(&self, target: &str) -> bool {
        self.selectors.iter().any(|s| s == target)
    }
}

/// An action the mock performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    Goto(String),
    Click(String),
    Fill(String, String),
    Select(String, String),
    AddCookies(usize),
    Close,
}

/// Driver calls that can be made to hang
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MockCall {
    Goto,
    Evaluate,
    AddCookies,
    Cookies,
    CurrentUrl,
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    title: String,
    page_text: String,
    elements: Vec<MockElement>,
    /// Elements that appear once the URL contains the key
    deferred: Vec<(String, MockElement)>,
    actions: Vec<MockAction>,
    evaluations: Vec<String>,
    cookies: Vec<Cookie>,
    local_storage: BTreeMap<String, String>,
    session_storage: BTreeMap<String, String>,
    local_storage_blocked: bool,
    session_storage_blocked: bool,
    permissive: bool,
    disconnected: bool,
    fail_launch: bool,
    closed: bool,
    launches: Vec<BrowserKind>,
    action_delay: Option<Duration>,
    /// Missing targets wait this long and then time out, like an auto-waiting driver
    auto_wait: Option<Duration>,
    stalled: BTreeSet<MockCall>,
    screenshot: Option<Vec<u8>>,
}

/// In-memory browser implementing [`BrowserSession`] and [`BrowserLauncher`]
#[derive(Debug, Clone)]
pub struct MockBrowser {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    /// Create an empty browser sitting on `about:blank`
    pub fn new() -> Self {
        let state = MockState {
            url: "about:blank".to_string(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A browser that accepts every target and every script (used for dry runs)
    pub fn permissive() -> Self {
        let browser = Self::new();
        browser.lock().permissive = true;
        browser
    }

    pub fn with_element(self, element: MockElement) -> Self {
        self.lock().elements.push(element);
        self
    }

    /// Register an element that only appears once the page URL contains `url_fragment`
    pub fn with_element_on(self, url_fragment: impl Into<String>, element: MockElement) -> Self {
        self.lock().deferred.push((url_fragment.into(), element));
        self
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.lock().url = url.into();
        self
    }

    pub fn with_page_text(self, text: impl Into<String>) -> Self {
        self.lock().page_text = text.into();
        self
    }

    pub fn with_local_storage(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.lock().local_storage.insert(key.into(), value.into());
        self
    }

    pub fn with_session_storage(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.lock().session_storage.insert(key.into(), value.into());
        self
    }

    pub fn with_cookie(self, cookie: Cookie) -> Self {
        self.lock().cookies.push(cookie);
        self
    }

    pub fn with_screenshot(self, png: Vec<u8>) -> Self {
        self.lock().screenshot = Some(png);
        self
    }

    /// Delay every element action, for exercising timeouts
    pub fn with_action_delay(self, delay: Duration) -> Self {
        self.lock().action_delay = Some(delay);
        self
    }

    /// Make every `call` hang until the caller gives up
    pub fn stall(self, call: MockCall) -> Self {
        self.lock().stalled.insert(call);
        self
    }

    /// Wait `wait` on a missing target before reporting a timeout
    pub fn auto_wait(self, wait: Duration) -> Self {
        self.lock().auto_wait = Some(wait);
        self
    }

    /// Make localStorage access throw a SecurityError
    pub fn block_local_storage(self) -> Self {
        self.lock().local_storage_blocked = true;
        self
    }

    /// Make sessionStorage access throw a SecurityError
    pub fn block_session_storage(self) -> Self {
        self.lock().session_storage_blocked = true;
        self
    }

    /// Make the next `launch()` fail
    pub fn fail_launch(self) -> Self {
        self.lock().fail_launch = true;
        self
    }

    /// Simulate the browser process going away
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    pub fn add_element(&self, element: MockElement) {
        self.lock().elements.push(element);
    }

    pub fn actions(&self) -> Vec<MockAction> {
        self.lock().actions.clone()
    }

    /// Number of scripts evaluated so far
    pub fn evaluate_calls(&self) -> usize {
        self.lock().evaluations.len()
    }

    pub fn evaluations(&self) -> Vec<String> {
        self.lock().evaluations.clone()
    }

    pub fn local_storage(&self) -> BTreeMap<String, String> {
        self.lock().local_storage.clone()
    }

    pub fn session_storage(&self) -> BTreeMap<String, String> {
        self.lock().session_storage.clone()
    }

    pub fn stored_cookies(&self) -> Vec<Cookie> {
        self.lock().cookies.clone()
    }

    /// Current value of the first element answering to `selector`
    pub fn element_value(&self, selector: &str) -> Option<String> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.matches(selector))
            .and_then(|e| e.value.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn launches(&self) -> Vec<BrowserKind> {
        self.lock().launches.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned mock only happens after a panicking test; keep going with its state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_url(state: &mut MockState, url: &str) {
        state.url = url.to_string();
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.deferred)
            .into_iter()
            .partition(|(fragment, _)| url.contains(fragment.as_str()));
        state.deferred = pending;
        state.elements.extend(ready.into_iter().map(|(_, element)| element));
    }

    fn check_alive(state: &MockState) -> BrowserResult<()> {
        if state.disconnected {
            return Err(BrowserError::Disconnected("mock browser disconnected".to_string()));
        }
        if state.closed {
            return Err(BrowserError::Disconnected("page already closed".to_string()));
        }
        Ok(())
    }

    async fn stall_point(&self, call: MockCall) {
        let stalled = self.lock().stalled.contains(&call);
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    /// Auto-wait on a target that is not on the page
    async fn await_target(&self, target: &str, action: &str) -> BrowserResult<()> {
        let wait = {
            let state = self.lock();
            match state.auto_wait {
                Some(wait) if !state.permissive && !state.elements.iter().any(|e| e.matches(target)) => wait,
                _ => return Ok(()),
            }
        };
        tokio::time::sleep(wait).await;
        Err(BrowserError::Timeout {
            after: wait,
            action: format!("{} {}", action, target),
        })
    }

    async fn pace(&self) {
        let delay = self.lock().action_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn with_target<F>(&self, target: &str, action: MockAction, apply: F) -> BrowserResult<()>
    where
        F: FnOnce(&mut MockElement) -> BrowserResult<()>,
    {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        let permissive = state.permissive;
        let navigation = match state.elements.iter_mut().find(|e| e.matches(target)) {
            Some(element) => {
                apply(element)?;
                element.navigates_to.clone()
            }
            None if permissive => None,
            None => return Err(BrowserError::ElementNotFound(target.to_string())),
        };
        let is_click = matches!(action, MockAction::Click(_));
        state.actions.push(action);
        if let (true, Some(url)) = (is_click, navigation) {
            Self::set_url(&mut state, &url);
        }
        Ok(())
    }

    fn evaluate_storage(state: &mut MockState, script: &str, local: bool) -> BrowserResult<Value> {
        let (blocked, name) = if local {
            (state.local_storage_blocked, "localStorage")
        } else {
            (state.session_storage_blocked, "sessionStorage")
        };
        if blocked {
            return Err(BrowserError::Script(format!(
                "SecurityError: Failed to read the '{}' property from 'Window': Access is denied for this document.",
                name
            )));
        }
        let store = if local {
            &mut state.local_storage
        } else {
            &mut state.session_storage
        };
        if script.contains("setItem") {
            let data: BTreeMap<String, String> = extract_payload(script, DATA_MARKER)
                .ok_or_else(|| BrowserError::Script("malformed storage write".to_string()))?;
            let written = data.len();
            store.extend(data);
            return Ok(Value::from(written));
        }
        serde_json::to_value(&*store).map_err(|e| BrowserError::Script(e.to_string()))
    }
}

/// Pull the JSON literal following `marker` up to the end of its statement
fn extract_payload<T: serde::de::DeserializeOwned>(script: &str, marker: &str) -> Option<T> {
    let start = script.find(marker)? + marker.len();
    let rest = &script[start..];
    let end = rest.find(";\n")?;
    serde_json::from_str(&rest[..end]).ok()
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.stall_point(MockCall::Goto).await;
        self.pace().await;
        let mut state = self.lock();
        Self::check_alive(&state)?;
        Self::set_url(&mut state, url);
        state.actions.push(MockAction::Goto(url.to_string()));
        Ok(())
    }

    async fn click(&self, target: &str) -> BrowserResult<()> {
        self.pace().await;
        self.await_target(target, "click").await?;
        self.with_target(target, MockAction::Click(target.to_string()), |_| Ok(()))
    }

    async fn fill(&self, target: &str, value: &str) -> BrowserResult<()> {
        self.pace().await;
        self.await_target(target, "fill").await?;
        let action = MockAction::Fill(target.to_string(), value.to_string());
        self.with_target(target, action, |element| {
            element.value = Some(value.to_string());
            Ok(())
        })
    }

    async fn select(&self, target: &str, value: &str) -> BrowserResult<()> {
        self.pace().await;
        self.await_target(target, "select").await?;
        let action = MockAction::Select(target.to_string(), value.to_string());
        self.with_target(target, action, |element| {
            if !element.options.is_empty()
                && !element.options.iter().any(|o| o.eq_ignore_ascii_case(value))
            {
                return Err(BrowserError::Driver(format!("option '{}' not available", value)));
            }
            element.value = Some(value.to_string());
            Ok(())
        })
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<Value> {
        self.stall_point(MockCall::Evaluate).await;
        let mut state = self.lock();
        Self::check_alive(&state)?;
        state.evaluations.push(script.to_string());

        if script.contains("window.localStorage") {
            return Self::evaluate_storage(&mut state, script, true);
        }
        if script.contains("window.sessionStorage") {
            return Self::evaluate_storage(&mut state, script, false);
        }
        if let Some(needle) = extract_payload::<String>(script, NEEDLE_MARKER) {
            let found = state.page_text.to_lowercase().contains(&needle.to_lowercase());
            return Ok(Value::Bool(state.permissive || found));
        }
        if let Some(selectors) = extract_payload::<Vec<String>>(script, SELECTORS_MARKER) {
            let found = selectors
                .iter()
                .any(|s| state.elements.iter().any(|e| e.matches(s)));
            return Ok(Value::Bool(state.permissive || found));
        }
        Ok(if state.permissive { Value::Bool(true) } else { Value::Null })
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()> {
        self.stall_point(MockCall::AddCookies).await;
        let mut state = self.lock();
        Self::check_alive(&state)?;
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
            state.cookies.push(cookie.clone());
        }
        state.actions.push(MockAction::AddCookies(cookies.len()));
        Ok(())
    }

    async fn cookies(&self) -> BrowserResult<Vec<Cookie>> {
        self.stall_point(MockCall::Cookies).await;
        let state = self.lock();
        Self::check_alive(&state)?;
        Ok(state.cookies.clone())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        self.stall_point(MockCall::CurrentUrl).await;
        let state = self.lock();
        Self::check_alive(&state)?;
        Ok(state.url.clone())
    }

    async fn snapshot(&self) -> BrowserResult<PageSnapshot> {
        let state = self.lock();
        Self::check_alive(&state)?;
        let outline = state
            .elements
            .iter()
            .map(|e| format!("- {}", e.selectors.join(" | ")))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(PageSnapshot {
            url: state.url.clone(),
            title: state.title.clone(),
            outline,
            screenshot: state.screenshot.clone(),
        })
    }

    async fn close(&self) -> BrowserResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.actions.push(MockAction::Close);
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for MockBrowser {
    async fn launch(&self, kind: BrowserKind) -> BrowserResult<Box<dyn BrowserSession>> {
        let mut state = self.lock();
        if state.fail_launch {
            return Err(BrowserError::Driver(format!("failed to launch {}", kind)));
        }
        state.launches.push(kind);
        state.closed = false;
        drop(state);
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_actions_and_lookup() {
        let browser = MockBrowser::new()
            .with_element(MockElement::new("#email").alias("Email"))
            .with_element(MockElement::new("#region").options(["HONG KONG", "KOWLOON"]));

        browser.fill("Email", "a@b.c").await.unwrap();
        browser.select("#region", "hong kong").await.unwrap();
        assert_eq!(browser.element_value("#email").as_deref(), Some("a@b.c"));
        assert!(matches!(
            browser.click("#missing").await,
            Err(BrowserError::ElementNotFound(_))
        ));
        assert!(browser.select("#region", "MACAU").await.is_err());
        assert_eq!(browser.actions().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_click_navigation_reveals_elements() {
        let browser = MockBrowser::new()
            .with_element(MockElement::new("Pay now").navigates_to("https://pay.gateway.test/checkout"))
            .with_element_on("pay.gateway.test", MockElement::new("#card-number"));

        assert!(browser.fill("#card-number", "4111").await.is_err());
        browser.click("Pay now").await.unwrap();
        assert_eq!(browser.current_url().await.unwrap(), "https://pay.gateway.test/checkout");
        browser.fill("#card-number", "4111").await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_disconnect_is_fatal() {
        let browser = MockBrowser::new();
        browser.disconnect();
        let err = browser.goto("https://example.com").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_mock_storage_scripts() {
        let browser = MockBrowser::new().with_local_storage("theme", "dark");
        let value = browser
            .evaluate("(() => { const s = window.localStorage; return {}; })()")
            .await
            .unwrap();
        assert_eq!(value["theme"], "dark");

        let write = "(() => {\nconst data = {\"k\":\"v\"};\nconst s = window.sessionStorage; s.setItem(); })()";
        assert_eq!(browser.evaluate(write).await.unwrap(), Value::from(1));
        assert_eq!(browser.session_storage().get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn test_mock_launcher_shares_state() {
        let browser = MockBrowser::new();
        let session = browser.launch(BrowserKind::Firefox).await.unwrap();
        session.goto("https://example.com").await.unwrap();
        assert_eq!(browser.actions(), vec![MockAction::Goto("https://example.com".into())]);
        assert_eq!(browser.launches(), vec![BrowserKind::Firefox]);
    }
}

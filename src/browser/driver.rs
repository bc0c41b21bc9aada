//! Browser driver abstraction.
//!
//! The engine never speaks a driver wire protocol itself. Anything that can
//! navigate, act on elements, evaluate script and move cookies plugs in here:
//! - a CDP/WebDriver/Playwright bridge in production
//! - [`MockBrowser`](super::MockBrowser) for tests and dry runs

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use super::types::{BrowserError, BrowserKind, BrowserResult, Cookie, PageSnapshot};

/// One live page plus its browser context.
///
/// `target` arguments accept either a concrete selector (CSS, `text=`, XPath)
/// or a free-text hint; resolving hints is the driver's business.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> BrowserResult<()>;

    async fn click(&self, target: &str) -> BrowserResult<()>;

    async fn fill(&self, target: &str, value: &str) -> BrowserResult<()>;

    async fn select(&self, target: &str, value: &str) -> BrowserResult<()>;

    /// Evaluate a script in the page and return its JSON-serializable result
    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value>;

    /// Context-level cookie injection
    async fn add_cookies(&self, cookies: &[Cookie]) -> BrowserResult<()>;

    /// Context-level cookie export
    async fn cookies(&self) -> BrowserResult<Vec<Cookie>>;

    async fn current_url(&self) -> BrowserResult<String>;

    /// Capture what the action resolver needs to see of the page
    async fn snapshot(&self) -> BrowserResult<PageSnapshot>;

    /// Release the page and its context
    async fn close(&self) -> BrowserResult<()>;
}

/// Acquires a fresh browser session
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, kind: BrowserKind) -> BrowserResult<Box<dyn BrowserSession>>;
}

/// Await one driver call for at most `limit`; an overrun becomes [`BrowserError::Timeout`]
pub async fn bounded<T, F>(limit: Duration, action: &str, call: F) -> BrowserResult<T>
where
    F: Future<Output = BrowserResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout {
            after: limit,
            action: action.to_string(),
        }),
    }
}

//! Browser profile injection and export.
//!
//! Cookies travel through the context-level cookie API; web storage travels
//! through page-evaluated scripts. Each storage collection is handled on its
//! own so a security restriction on one never costs the other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::driver::{BrowserSession, bounded};
use super::types::{BrowserError, BrowserProfileData, BrowserResult, is_restricted_url};

// Scripts carry their JSON payload as `<marker><json>;\n` so drivers and
// doubles can recover it without a JS parser.
pub(crate) const DATA_MARKER: &str = "const data = ";
pub(crate) const NEEDLE_MARKER: &str = "const needle = ";
pub(crate) const SELECTORS_MARKER: &str = "const selectors = ";

/// Which web storage a script targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    Local,
    Session,
}

impl StorageArea {
    fn global(self) -> &'static str {
        match self {
            StorageArea::Local => "window.localStorage",
            StorageArea::Session => "window.sessionStorage",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StorageArea::Local => "localStorage",
            StorageArea::Session => "sessionStorage",
        }
    }
}

/// Outcome of injecting a profile into a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInjectionReport {
    pub cookies_added: usize,
    pub local_storage_written: usize,
    pub session_storage_written: usize,
    /// Non-fatal problems, one per skipped or failed collection
    pub warnings: Vec<String>,
}

/// Script reading every key of a storage area as a flat object
pub fn storage_read_script(area: StorageArea) -> String {
    format!(
        "(() => {{\nconst store = {};\nconst out = {{}};\nfor (let i = 0; i < store.length; i++) {{ const k = store.key(i); out[k] = store.getItem(k); }}\nreturn out;\n}})()",
        area.global()
    )
}

/// Script writing `entries` into a storage area, returning the number written
pub fn storage_write_script(area: StorageArea, entries: &BTreeMap<String, String>) -> BrowserResult<String> {
    let data = serde_json::to_string(entries).map_err(|e| BrowserError::Script(e.to_string()))?;
    Ok(format!(
        "(() => {{\n{}{};\nconst store = {};\nfor (const [k, v] of Object.entries(data)) store.setItem(k, v);\nreturn Object.keys(data).length;\n}})()",
        DATA_MARKER,
        data,
        area.global()
    ))
}

/// Script answering whether the page's visible text contains `text`
pub fn text_presence_script(text: &str) -> String {
    let needle = serde_json::Value::String(text.to_string()).to_string();
    format!(
        "(() => {{\n{}{};\nconst body = document.body ? document.body.innerText : '';\nreturn body.toLowerCase().includes(needle.toLowerCase());\n}})()",
        NEEDLE_MARKER, needle
    )
}

/// Script answering whether any of `selectors` matches an element
pub fn element_presence_script(selectors: &[String]) -> String {
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(() => {{\n{}{};\nreturn selectors.some(s => {{ try {{ return document.querySelector(s) !== null; }} catch (_) {{ return false; }} }});\n}})()",
        SELECTORS_MARKER, list
    )
}

/// Inject cookies and both storages into a session.
///
/// Storage needs a real origin: when the page sits on a restricted URL and a
/// base URL is known, the page navigates there first. Without one, storage
/// injection is skipped with a warning. Every driver call is bounded by
/// `limit`; only a fatal driver fault is returned as an error.
pub async fn inject_profile(
    session: &dyn BrowserSession,
    profile: &BrowserProfileData,
    base_url: Option<&str>,
    limit: Duration,
) -> BrowserResult<ProfileInjectionReport> {
    let mut report = ProfileInjectionReport::default();

    if !profile.cookies.is_empty() {
        match bounded(limit, "add cookies", session.add_cookies(&profile.cookies)).await {
            Ok(()) => report.cookies_added = profile.cookies.len(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Cookie injection failed");
                report.warnings.push(format!("cookies: {}", e));
            }
        }
    }

    if profile.local_storage.is_empty() && profile.session_storage.is_empty() {
        return Ok(report);
    }

    let mut url = match bounded(limit, "read URL", session.current_url()).await {
        Ok(url) => url,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "Could not read page URL; skipping storage injection");
            report.warnings.push(format!("storage injection skipped: {}", e));
            return Ok(report);
        }
    };
    if is_restricted_url(&url) {
        if let Some(base) = base_url {
            debug!(base_url = base, "Navigating to base URL before storage injection");
            match bounded(limit, "goto", session.goto(base)).await {
                Ok(()) => url = base.to_string(),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.warnings.push(format!("navigation to {} failed: {}", base, e)),
            }
        }
    }
    if is_restricted_url(&url) {
        report
            .warnings
            .push(format!("storage injection skipped: page is on restricted URL '{}'", url));
        return Ok(report);
    }

    for (area, entries) in [
        (StorageArea::Local, &profile.local_storage),
        (StorageArea::Session, &profile.session_storage),
    ] {
        if entries.is_empty() {
            continue;
        }
        let script = storage_write_script(area, entries)?;
        match bounded(limit, "write storage", session.evaluate(&script)).await {
            Ok(_) => match area {
                StorageArea::Local => report.local_storage_written = entries.len(),
                StorageArea::Session => report.session_storage_written = entries.len(),
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(storage = area.name(), error = %e, "Storage injection failed; continuing");
                report.warnings.push(format!("{}: {}", area.name(), e));
            }
        }
    }

    Ok(report)
}

/// Export cookies and both storages from a session.
///
/// On a restricted URL storage is not evaluated at all. A storage read that
/// fails for any non-fatal reason, including a call overrunning `limit`,
/// yields an empty collection.
pub async fn export_profile(session: &dyn BrowserSession, limit: Duration) -> BrowserResult<BrowserProfileData> {
    let cookies = match bounded(limit, "read cookies", session.cookies()).await {
        Ok(cookies) => cookies,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "Cookie export failed; exporting none");
            Vec::new()
        }
    };
    let url = match bounded(limit, "read URL", session.current_url()).await {
        Ok(url) => url,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "Could not read page URL; skipping storage export");
            return Ok(BrowserProfileData {
                cookies,
                ..Default::default()
            });
        }
    };

    if is_restricted_url(&url) {
        debug!(url = %url, "Skipping storage export on restricted URL");
        return Ok(BrowserProfileData {
            cookies,
            ..Default::default()
        });
    }

    let local_storage = read_storage(session, StorageArea::Local, limit).await?;
    let session_storage = read_storage(session, StorageArea::Session, limit).await?;

    Ok(BrowserProfileData {
        cookies,
        local_storage,
        session_storage,
    })
}

async fn read_storage(
    session: &dyn BrowserSession,
    area: StorageArea,
    limit: Duration,
) -> BrowserResult<BTreeMap<String, String>> {
    match bounded(limit, "read storage", session.evaluate(&storage_read_script(area))).await {
        Ok(value) => Ok(storage_from_value(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            if e.is_security_restriction() {
                warn!(storage = area.name(), "Storage read blocked by security policy; exporting as empty");
            } else {
                warn!(storage = area.name(), error = %e, "Storage read failed; exporting as empty");
            }
            Ok(BTreeMap::new())
        }
    }
}

/// Flatten a script result into string pairs, stringifying non-string values
fn storage_from_value(value: serde_json::Value) -> BTreeMap<String, String> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{Cookie, MockBrowser, MockCall};
    use pretty_assertions::assert_eq;

    const LIMIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_export_survives_local_storage_security_error() {
        let browser = MockBrowser::new()
            .with_url("https://shop.example.com/")
            .with_cookie(Cookie::new("sid", "abc", "shop.example.com"))
            .with_session_storage("cart", "3")
            .block_local_storage();

        let profile = export_profile(&browser, LIMIT).await.unwrap();
        assert_eq!(profile.cookies.len(), 1);
        assert!(profile.local_storage.is_empty());
        assert_eq!(profile.session_storage.get("cart").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_export_on_restricted_url_skips_evaluation() {
        let browser = MockBrowser::new()
            .with_url("about:blank")
            .with_cookie(Cookie::new("sid", "abc", "shop.example.com"))
            .with_local_storage("theme", "dark");

        let profile = export_profile(&browser, LIMIT).await.unwrap();
        assert_eq!(browser.evaluate_calls(), 0);
        assert_eq!(profile.cookies.len(), 1);
        assert!(profile.local_storage.is_empty());
        assert!(profile.session_storage.is_empty());
    }

    #[tokio::test]
    async fn test_inject_navigates_to_base_url_and_isolates_failures() {
        let browser = MockBrowser::new().block_session_storage();
        let mut profile = BrowserProfileData::default();
        profile.cookies.push(Cookie::new("sid", "abc", "shop.example.com"));
        profile.local_storage.insert("theme".into(), "dark".into());
        profile.session_storage.insert("cart".into(), "3".into());

        let report = inject_profile(&browser, &profile, Some("https://shop.example.com/"), LIMIT)
            .await
            .unwrap();

        assert_eq!(report.cookies_added, 1);
        assert_eq!(report.local_storage_written, 1);
        assert_eq!(report.session_storage_written, 0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(browser.local_storage().get("theme").map(String::as_str), Some("dark"));
    }

    #[tokio::test]
    async fn test_inject_without_base_url_skips_storage() {
        let browser = MockBrowser::new();
        let mut profile = BrowserProfileData::default();
        profile.local_storage.insert("theme".into(), "dark".into());

        let report = inject_profile(&browser, &profile, None, LIMIT).await.unwrap();
        assert_eq!(report.local_storage_written, 0);
        assert_eq!(browser.evaluate_calls(), 0);
        assert!(report.warnings[0].contains("restricted URL"));
    }

    #[tokio::test]
    async fn test_export_with_hung_storage_reads_is_bounded() {
        let browser = MockBrowser::new()
            .with_url("https://shop.example.com/")
            .with_cookie(Cookie::new("sid", "abc", "shop.example.com"))
            .stall(MockCall::Evaluate);

        let started = std::time::Instant::now();
        let profile = export_profile(&browser, Duration::from_millis(50)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(profile.cookies.len(), 1);
        assert!(profile.local_storage.is_empty());
        assert!(profile.session_storage.is_empty());
    }

    #[tokio::test]
    async fn test_export_with_hung_url_keeps_cookies() {
        let browser = MockBrowser::new()
            .with_cookie(Cookie::new("sid", "abc", "shop.example.com"))
            .stall(MockCall::CurrentUrl);

        let profile = export_profile(&browser, Duration::from_millis(50)).await.unwrap();
        assert_eq!(profile.cookies.len(), 1);
        assert_eq!(browser.evaluate_calls(), 0);
    }

    #[tokio::test]
    async fn test_inject_with_hung_calls_reports_warnings() {
        let browser = MockBrowser::new()
            .stall(MockCall::AddCookies)
            .stall(MockCall::Goto);
        let mut profile = BrowserProfileData::default();
        profile.cookies.push(Cookie::new("sid", "abc", "shop.example.com"));
        profile.local_storage.insert("theme".into(), "dark".into());

        let report = inject_profile(&browser, &profile, Some("https://shop.example.com/"), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(report.cookies_added, 0);
        assert_eq!(report.local_storage_written, 0);
        assert!(report.warnings[0].starts_with("cookies: timed out"));
        assert!(report.warnings.iter().any(|w| w.contains("restricted URL")));
    }

    #[test]
    fn test_storage_from_value_stringifies() {
        let map = storage_from_value(serde_json::json!({"a": "1", "b": 2}));
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("b").map(String::as_str), Some("2"));
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors reported by a browser driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrowserError {
    /// No element matched the selector or hint
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The action did not complete within its budget
    #[error("timed out after {after:?} during {action}")]
    Timeout { after: Duration, action: String },

    /// A page script threw
    #[error("script evaluation failed: {0}")]
    Script(String),

    /// A storage or frame access was blocked by browser security policy
    #[error("blocked by browser security policy: {0}")]
    SecurityRestricted(String),

    /// The browser or page is gone (crashed, closed, disconnected)
    #[error("browser disconnected: {0}")]
    Disconnected(String),

    /// Any other driver-specific failure
    #[error("driver error: {0}")]
    Driver(String),
}

impl BrowserError {
    /// Whether the session is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrowserError::Disconnected(_))
    }

    /// Whether this is a storage/security restriction rather than a real failure
    pub fn is_security_restriction(&self) -> bool {
        match self {
            BrowserError::SecurityRestricted(_) => true,
            BrowserError::Script(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("securityerror")
                    || msg.contains("access is denied")
                    || msg.contains("operation is insecure")
            }
            _ => false,
        }
    }
}

/// Browser engine to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl FromStr for BrowserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(format!("unknown browser '{}'. Use: chromium, firefox, webkit", other)),
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        };
        f.write_str(name)
    }
}

/// A browser cookie in the shape browser drivers exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Unix timestamp in seconds; `None` for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_cookie_path(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }
}

/// Persisted browser state: cookies plus both web storages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserProfileData {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
    #[serde(default)]
    pub session_storage: BTreeMap<String, String>,
}

impl BrowserProfileData {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty() && self.session_storage.is_empty()
    }
}

/// What the action resolver gets to see of the current page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Condensed accessibility/DOM outline of interactive elements
    pub outline: String,
    /// Optional PNG screenshot
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}

/// URL schemes whose pages never expose web storage
const RESTRICTED_SCHEMES: &[&str] = &[
    "about:",
    "chrome:",
    "chrome-extension:",
    "chrome-error:",
    "edge:",
    "devtools:",
    "view-source:",
    "data:",
];

/// Whether storage access on this URL is guaranteed to be refused
pub fn is_restricted_url(url: &str) -> bool {
    let url = url.trim().to_lowercase();
    url.is_empty() || RESTRICTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

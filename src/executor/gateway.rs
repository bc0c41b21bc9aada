//! Payment-gateway readiness gate.
//!
//! Payment pages often arrive through redirects or late-rendered iframes. The
//! gate polls for the gateway's URL or form elements before a sensitive step
//! runs, and remembers the confirmed page so later payment steps skip the wait.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::GatewayConfig;
use crate::browser::{BrowserResult, BrowserSession, bounded, element_presence_script};

/// What the gate observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    /// Confirmed earlier in this execution on the same host
    AlreadyConfirmed,
    Detected { waited: Duration },
    /// Bound elapsed without a sign of the gateway; the step proceeds anyway
    NotDetected { waited: Duration },
}

/// Per-execution gate state
#[derive(Debug, Clone)]
pub struct PaymentGate {
    config: GatewayConfig,
    call_timeout: Duration,
    confirmed_url: Option<String>,
}

impl PaymentGate {
    /// `call_timeout` bounds each driver call the gate makes while polling
    pub fn new(config: GatewayConfig, call_timeout: Duration) -> Self {
        Self {
            config,
            call_timeout,
            confirmed_url: None,
        }
    }

    pub fn confirmed_url(&self) -> Option<&str> {
        self.confirmed_url.as_deref()
    }

    /// Wait until the payment page is ready, bounded by the configured wait.
    ///
    /// A hung or failing driver call counts as "not seen yet"; only a fatal
    /// fault is returned as an error.
    pub async fn ensure_ready(&mut self, session: &dyn BrowserSession) -> BrowserResult<GateStatus> {
        let url = self.read_url(session).await?;
        if let Some(confirmed) = &self.confirmed_url {
            if same_host(confirmed, &url) {
                debug!(url = %url, "Payment gateway already confirmed");
                return Ok(GateStatus::AlreadyConfirmed);
            }
        }

        let started = Instant::now();
        let deadline = started + self.config.wait;
        let script = element_presence_script(&self.config.element_selectors);

        loop {
            let url = self.read_url(session).await?;
            if self.url_matches(&url) || self.form_present(session, &script).await? {
                let waited = started.elapsed();
                info!(url = %url, waited_ms = waited.as_millis() as u64, "Payment gateway ready");
                self.confirmed_url = Some(url);
                return Ok(GateStatus::Detected { waited });
            }
            if Instant::now() >= deadline {
                let waited = started.elapsed();
                warn!(url = %url, waited_ms = waited.as_millis() as u64, "Payment gateway not detected; proceeding");
                return Ok(GateStatus::NotDetected { waited });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    async fn read_url(&self, session: &dyn BrowserSession) -> BrowserResult<String> {
        match bounded(self.call_timeout, "read URL", session.current_url()).await {
            Ok(url) => Ok(url),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(error = %e, "Could not read page URL while waiting for gateway");
                Ok(String::new())
            }
        }
    }

    fn url_matches(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }
        let lower = url.to_lowercase();
        self.config.url_markers.iter().any(|m| lower.contains(&m.to_lowercase()))
    }

    async fn form_present(&self, session: &dyn BrowserSession, script: &str) -> BrowserResult<bool> {
        if self.config.element_selectors.is_empty() {
            return Ok(false);
        }
        match bounded(self.call_timeout, "gateway form check", session.evaluate(script)).await {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(error = %e, "Gateway form check failed; retrying");
                Ok(false)
            }
        }
    }
}

fn same_host(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str().is_some() && a.host_str() == b.host_str(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockBrowser, MockCall, MockElement};

    const CALL: Duration = Duration::from_millis(200);

    fn config(wait_ms: u64) -> GatewayConfig {
        GatewayConfig {
            url_markers: vec!["pay.gateway.test".into()],
            element_selectors: vec!["#card-number".into()],
            wait: Duration::from_millis(wait_ms),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_detects_by_url_then_skips() {
        let browser = MockBrowser::new().with_url("https://pay.gateway.test/session/1");
        let mut gate = PaymentGate::new(config(50), CALL);

        assert!(matches!(gate.ensure_ready(&browser).await.unwrap(), GateStatus::Detected { .. }));
        assert_eq!(gate.ensure_ready(&browser).await.unwrap(), GateStatus::AlreadyConfirmed);
    }

    #[tokio::test]
    async fn test_detects_by_element() {
        let browser = MockBrowser::new()
            .with_url("https://shop.example.com/checkout")
            .with_element(MockElement::new("#card-number"));
        let mut gate = PaymentGate::new(config(50), CALL);
        assert!(matches!(gate.ensure_ready(&browser).await.unwrap(), GateStatus::Detected { .. }));
        assert_eq!(gate.confirmed_url(), Some("https://shop.example.com/checkout"));
    }

    #[tokio::test]
    async fn test_bounded_wait_when_absent() {
        let browser = MockBrowser::new().with_url("https://shop.example.com/cart");
        let mut gate = PaymentGate::new(config(20), CALL);
        match gate.ensure_ready(&browser).await.unwrap() {
            GateStatus::NotDetected { waited } => assert!(waited >= Duration::from_millis(20)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gate.confirmed_url(), None);
    }

    #[tokio::test]
    async fn test_disconnect_is_fatal() {
        let browser = MockBrowser::new();
        browser.disconnect();
        let mut gate = PaymentGate::new(config(20), CALL);
        assert!(gate.ensure_ready(&browser).await.is_err());
    }

    #[tokio::test]
    async fn test_hung_driver_calls_stay_within_wait() {
        let browser = MockBrowser::new()
            .with_url("https://shop.example.com/checkout")
            .stall(MockCall::CurrentUrl)
            .stall(MockCall::Evaluate);
        let mut gate = PaymentGate::new(config(30), Duration::from_millis(20));

        let started = std::time::Instant::now();
        let status = gate.ensure_ready(&browser).await.unwrap();
        assert!(matches!(status, GateStatus::NotDetected { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(gate.confirmed_url(), None);
    }

    #[tokio::test]
    async fn test_hung_form_check_still_detects_by_url() {
        let browser = MockBrowser::new()
            .with_url("https://pay.gateway.test/session/7")
            .stall(MockCall::Evaluate);
        let mut gate = PaymentGate::new(config(30), Duration::from_millis(20));
        assert!(matches!(gate.ensure_ready(&browser).await.unwrap(), GateStatus::Detected { .. }));
    }

    #[test]
    fn test_same_host() {
        assert!(same_host("https://pay.x.com/a", "https://pay.x.com/b"));
        assert!(!same_host("https://pay.x.com/a", "https://shop.x.com/a"));
    }
}

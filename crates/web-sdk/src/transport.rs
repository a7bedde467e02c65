//! Beacon delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::types::DeliveryMethod;
use tracing::debug;

use crate::accounts::primary_account;
use crate::environment::BrowserEnvironment;
use crate::host::Host;

/// Bounded synchronous hold before a navigating click proceeds.
pub trait Delay: Send + Sync {
    fn hold(&self, duration: Duration);
}

/// Spins on the monotonic clock; never yields to the host.
pub struct BusyWait;

impl Delay for BusyWait {
    fn hold(&self, duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }
}

/// Returns immediately; for simulations and tests.
pub struct NoDelay;

impl Delay for NoDelay {
    fn hold(&self, _duration: Duration) {}
}

/// Markup for the document-write fallback.
pub fn image_markup(url: &str) -> String {
    format!("<img src=\"{url}\" width=1 height=1 border=0 alt=\"\">")
}

/// Result of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub method: DeliveryMethod,
    pub delayed: bool,
}

/// Fire-and-forget sender bound to one tracker instance.
#[derive(Clone)]
pub struct BeaconTransport {
    slot: String,
    delay: Arc<dyn Delay>,
    link_delay: Duration,
}

impl BeaconTransport {
    pub fn new(accounts: &str, delay: Arc<dyn Delay>, link_delay: Duration) -> Self {
        Self {
            slot: slot_name(accounts),
            delay,
            link_delay,
        }
    }

    /// Image slot name, `s_i_<primary account>`.
    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn set_accounts(&mut self, accounts: &str) {
        self.slot = slot_name(accounts);
    }

    /// Send `url`. `target` is the window target of the identified element
    /// behind a link beacon (empty when the element sets none); `None` when
    /// no element was identified.
    pub fn send(
        &self,
        host: &dyn Host,
        env: &BrowserEnvironment,
        url: &str,
        target: Option<&str>,
    ) -> Delivery {
        if !env.image_capable(host.supports_images()) {
            host.document_write(&image_markup(url));
            debug!(slot = %self.slot, "Beacon written into document");
            return Delivery {
                method: DeliveryMethod::DocumentWrite,
                delayed: false,
            };
        }

        host.load_image(&self.slot, url);
        let delayed = url.contains("&pe=") && navigates_same_window(target, &host.window_name());
        if delayed {
            self.delay.hold(self.link_delay);
        }
        debug!(slot = %self.slot, delayed, "Beacon image requested");
        Delivery {
            method: DeliveryMethod::Image,
            delayed,
        }
    }
}

fn slot_name(accounts: &str) -> String {
    format!("s_i_{}", primary_account(accounts))
}

/// Whether following a link with `target` replaces the current page.
fn navigates_same_window(target: Option<&str>, window_name: &str) -> bool {
    match target.map(str::trim) {
        None => false,
        Some("" | "_self" | "_top") => true,
        Some(t) => !window_name.is_empty() && t == window_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostRequest, Navigator, StaticHost};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDelay(AtomicUsize);

    impl Delay for CountingDelay {
        fn hold(&self, _duration: Duration) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn modern_env(host: &StaticHost) -> BrowserEnvironment {
        BrowserEnvironment::classify(&host.navigator(), None)
    }

    #[test]
    fn test_image_delivery_reuses_slot() {
        let host = StaticHost::new("http://www.example.com/").unwrap();
        let transport = BeaconTransport::new("acct1,acct2", Arc::new(NoDelay), Duration::from_millis(500));
        let env = modern_env(&host);
        let first = transport.send(&host, &env, "http://m/1", None);
        transport.send(&host, &env, "http://m/2", None);
        assert_eq!(first.method, DeliveryMethod::Image);
        assert_eq!(transport.slot(), "s_i_acct1");
        assert_eq!(host.image_src("s_i_acct1").as_deref(), Some("http://m/2"));
    }

    #[test]
    fn test_document_write_fallback() {
        let host = StaticHost::new("http://www.example.com/").unwrap().with_images(false);
        let transport = BeaconTransport::new("acct", Arc::new(NoDelay), Duration::from_millis(500));
        let delivery = transport.send(&host, &modern_env(&host), "http://m/1", None);
        assert_eq!(delivery.method, DeliveryMethod::DocumentWrite);
        assert_eq!(
            host.requests(),
            vec![HostRequest::DocumentWrite {
                markup: "<img src=\"http://m/1\" width=1 height=1 border=0 alt=\"\">".into()
            }]
        );
    }

    #[test]
    fn test_old_opera_falls_back() {
        let host = StaticHost::new("http://www.example.com/").unwrap();
        let env = BrowserEnvironment::classify(&Navigator::new("Opera/6.05", "Opera", "6.05 (Windows)"), None);
        let transport = BeaconTransport::new("acct", Arc::new(NoDelay), Duration::ZERO);
        assert_eq!(
            transport.send(&host, &env, "http://m/1", None).method,
            DeliveryMethod::DocumentWrite
        );
    }

    #[test]
    fn test_delay_only_for_same_window_links() {
        let host = StaticHost::new("http://www.example.com/").unwrap().with_window_name("main");
        let counter = Arc::new(CountingDelay::default());
        let transport = BeaconTransport::new("acct", counter.clone(), Duration::from_millis(500));
        let env = modern_env(&host);

        assert!(transport.send(&host, &env, "http://m/?&pe=lnk_e", Some("")).delayed);
        assert!(transport.send(&host, &env, "http://m/?&pe=lnk_e", Some("_top")).delayed);
        assert!(transport.send(&host, &env, "http://m/?&pe=lnk_e", Some("main")).delayed);
        assert!(!transport.send(&host, &env, "http://m/?&pe=lnk_e", Some("_blank")).delayed);
        assert!(!transport.send(&host, &env, "http://m/?&pe=lnk_o", None).delayed);
        assert!(!transport.send(&host, &env, "http://m/?&pageName=x", Some("")).delayed);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_busy_wait_is_bounded() {
        let start = Instant::now();
        BusyWait.hold(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}

//! Host page seam.
//!
//! Everything the tracker needs from the embedding page goes through the
//! [`Host`] trait. [`StaticHost`] is a complete in-memory implementation used
//! by the simulator and tests.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{BeaconError, BeaconResult};
use chrono::{DateTime, Duration, FixedOffset, Local, Offset, TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use url::Url;

use crate::cookies::{CookieJar, MemoryCookieJar};

/// Navigator strings used for browser classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigator {
    pub user_agent: String,
    pub app_name: String,
    pub app_version: String,
}

impl Navigator {
    pub fn new(
        user_agent: impl Into<String>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }

    /// Internet Explorer reporting `MSIE <version>`.
    pub fn internet_explorer(version: &str, mac: bool) -> Self {
        let platform = if mac { "Mac_PowerPC" } else { "Windows NT 5.1" };
        let compat = format!("4.0 (compatible; MSIE {version}; {platform})");
        Self::new(format!("Mozilla/{compat}"), "Microsoft Internet Explorer", compat)
    }

    pub fn gecko() -> Self {
        Self::new(
            "Mozilla/5.0 (Windows; U; Windows NT 5.1; en-US; rv:1.8.1) Gecko/20061010 Firefox/2.0",
            "Netscape",
            "5.0 (Windows; en-US)",
        )
    }

    pub fn netscape6() -> Self {
        Self::new(
            "Mozilla/5.0 (Windows; U; Win98; en-US; rv:0.9.4) Gecko/20011019 Netscape6/6.2",
            "Netscape",
            "5.0 (Windows; en-US)",
        )
    }

    pub fn opera() -> Self {
        Self::new(
            "Opera/9.10 (Windows NT 5.1; U; en)",
            "Opera",
            "9.10 (Windows NT 5.1; U; en)",
        )
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::gecko()
    }
}

/// Decomposed document location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLocation {
    pub href: String,
    /// Scheme with trailing colon, e.g. `https:`.
    pub protocol: String,
    /// Hostname plus `:port` when one is present.
    pub host: String,
    pub hostname: String,
    pub pathname: String,
    /// Query string including the leading `?`, or empty.
    pub search: String,
}

impl PageLocation {
    pub fn parse(href: &str) -> BeaconResult<Self> {
        let url = Url::parse(href)
            .map_err(|e| BeaconError::Config(format!("invalid page location '{href}': {e}")))?;
        Ok(Self::from_url(&url))
    }

    fn from_url(url: &Url) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        let host = match url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.clone(),
        };
        Self {
            href: url.to_string(),
            protocol: format!("{}:", url.scheme()),
            host,
            hostname,
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
        }
    }

    /// Resolve `reference` against this location.
    pub fn join(&self, reference: &str) -> Option<PageLocation> {
        let base = Url::parse(&self.href).ok()?;
        base.join(reference).ok().map(|url| Self::from_url(&url))
    }

    pub fn is_secure(&self) -> bool {
        self.protocol.to_ascii_lowercase().contains("https")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
            color_depth: 32,
            pixel_depth: 24,
        }
    }
}

/// Wall clock in the page's local offset.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let now = Local::now();
        now.with_timezone(now.offset())
    }
}

/// Settable clock for simulations.
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at the given UTC timestamp (milliseconds) in UTC.
    pub fn at_millis(ms: i64) -> Self {
        let start = Utc
            .timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start.with_timezone(&Utc.fix()))
    }

    pub fn set(&self, at: DateTime<FixedOffset>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock()
    }
}

/// The embedding page.
pub trait Host: Send + Sync {
    fn navigator(&self) -> Navigator;
    fn location(&self) -> PageLocation;
    fn referrer(&self) -> String;
    fn window_name(&self) -> String;
    fn clock(&self) -> Arc<dyn Clock>;
    /// Uniform sample in `[0, 1)`.
    fn random(&self) -> f64;
    fn cookie_jar(&self) -> Arc<dyn CookieJar>;

    /// The engine's `escape` of U+0100, if it can be computed.
    fn unicode_escape_probe(&self) -> Option<String>;
    fn screen(&self) -> Option<ScreenInfo>;
    /// Inner window size.
    fn viewport(&self) -> Option<(u32, u32)>;
    fn java_enabled(&self) -> bool;
    fn plugin_names(&self) -> Vec<String>;

    fn connection_type(&self) -> BeaconResult<String> {
        Err(BeaconError::Unsupported("connection type".into()))
    }

    fn is_home_page(&self, _url: &str) -> BeaconResult<bool> {
        Err(BeaconError::Unsupported("home page check".into()))
    }

    /// Whether the document exposes an image collection.
    fn supports_images(&self) -> bool;
    /// Point the named beacon image at `url`, creating it if needed.
    fn load_image(&self, slot: &str, url: &str);
    fn document_write(&self, markup: &str);
}

/// Outbound activity recorded by [`StaticHost`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    Image { slot: String, url: String },
    DocumentWrite { markup: String },
}

struct PageState {
    location: PageLocation,
    referrer: String,
}

/// In-memory host with deterministic randomness and a manual clock.
pub struct StaticHost {
    navigator: Navigator,
    page: Mutex<PageState>,
    window_name: String,
    clock: Arc<ManualClock>,
    rng: Mutex<StdRng>,
    jar: Arc<MemoryCookieJar>,
    escape_probe: Option<String>,
    screen: Option<ScreenInfo>,
    viewport: Option<(u32, u32)>,
    java: bool,
    plugins: Vec<String>,
    connection_type: Option<String>,
    home_page: Option<String>,
    images: bool,
    requests: Mutex<Vec<HostRequest>>,
    image_slots: Mutex<HashMap<String, String>>,
}

impl StaticHost {
    pub fn new(href: &str) -> BeaconResult<Self> {
        let location = PageLocation::parse(href)?;
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let jar = Arc::new(MemoryCookieJar::new(
            location.hostname.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        Ok(Self {
            navigator: Navigator::default(),
            page: Mutex::new(PageState {
                location,
                referrer: String::new(),
            }),
            window_name: String::new(),
            clock,
            rng: Mutex::new(StdRng::seed_from_u64(0x5eed)),
            jar,
            escape_probe: Some("%u0100".to_string()),
            screen: Some(ScreenInfo::default()),
            viewport: Some((1200, 800)),
            java: false,
            plugins: Vec::new(),
            connection_type: None,
            home_page: None,
            images: true,
            requests: Mutex::new(Vec::new()),
            image_slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_navigator(mut self, navigator: Navigator) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.page.lock().referrer = referrer.into();
        self
    }

    pub fn with_window_name(mut self, name: impl Into<String>) -> Self {
        self.window_name = name.into();
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_escape_probe(mut self, probe: Option<&str>) -> Self {
        self.escape_probe = probe.map(str::to_string);
        self
    }

    pub fn with_screen(mut self, screen: Option<ScreenInfo>) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_viewport(mut self, viewport: Option<(u32, u32)>) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_java(mut self, enabled: bool) -> Self {
        self.java = enabled;
        self
    }

    pub fn with_plugins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugins = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_connection_type(mut self, kind: impl Into<String>) -> Self {
        self.connection_type = Some(kind.into());
        self
    }

    /// Configure the browser home page used by `is_home_page`.
    pub fn with_home_page(mut self, url: impl Into<String>) -> Self {
        self.home_page = Some(url.into());
        self
    }

    pub fn with_images(mut self, supported: bool) -> Self {
        self.images = supported;
        self
    }

    pub fn manual_clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    pub fn jar(&self) -> Arc<MemoryCookieJar> {
        self.jar.clone()
    }

    /// Move to a new page: the old location becomes the referrer.
    pub fn navigate(&self, href: &str) -> BeaconResult<()> {
        let next = PageLocation::parse(href)?;
        let mut page = self.page.lock();
        page.referrer = std::mem::replace(&mut page.location, next).href;
        self.jar.set_hostname(&page.location.hostname);
        Ok(())
    }

    pub fn requests(&self) -> Vec<HostRequest> {
        self.requests.lock().clone()
    }

    /// URLs sent so far, in order, regardless of delivery method.
    pub fn beacon_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|req| match req {
                HostRequest::Image { url, .. } => url.clone(),
                HostRequest::DocumentWrite { markup } => markup
                    .split('"')
                    .nth(1)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect()
    }

    /// Current `src` of a beacon image slot.
    pub fn image_src(&self, slot: &str) -> Option<String> {
        self.image_slots.lock().get(slot).cloned()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

impl Host for StaticHost {
    fn navigator(&self) -> Navigator {
        self.navigator.clone()
    }

    fn location(&self) -> PageLocation {
        self.page.lock().location.clone()
    }

    fn referrer(&self) -> String {
        self.page.lock().referrer.clone()
    }

    fn window_name(&self) -> String {
        self.window_name.clone()
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn random(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn cookie_jar(&self) -> Arc<dyn CookieJar> {
        self.jar.clone()
    }

    fn unicode_escape_probe(&self) -> Option<String> {
        self.escape_probe.clone()
    }

    fn screen(&self) -> Option<ScreenInfo> {
        self.screen
    }

    fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    fn java_enabled(&self) -> bool {
        self.java
    }

    fn plugin_names(&self) -> Vec<String> {
        self.plugins.clone()
    }

    fn connection_type(&self) -> BeaconResult<String> {
        self.connection_type
            .clone()
            .ok_or_else(|| BeaconError::Unsupported("connection type".into()))
    }

    fn is_home_page(&self, url: &str) -> BeaconResult<bool> {
        match &self.home_page {
            Some(home) => Ok(home.eq_ignore_ascii_case(url)),
            None => Err(BeaconError::Unsupported("home page check".into())),
        }
    }

    fn supports_images(&self) -> bool {
        self.images
    }

    fn load_image(&self, slot: &str, url: &str) {
        self.image_slots
            .lock()
            .insert(slot.to_string(), url.to_string());
        self.requests.lock().push(HostRequest::Image {
            slot: slot.to_string(),
            url: url.to_string(),
        });
    }

    fn document_write(&self, markup: &str) {
        self.requests.lock().push(HostRequest::DocumentWrite {
            markup: markup.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_location_parts() {
        let loc = PageLocation::parse("https://www.example.com:8443/base/page.html?x=1#top").unwrap();
        assert_eq!(loc.protocol, "https:");
        assert_eq!(loc.host, "www.example.com:8443");
        assert_eq!(loc.hostname, "www.example.com");
        assert_eq!(loc.pathname, "/base/page.html");
        assert_eq!(loc.search, "?x=1");
        assert!(loc.is_secure());
    }

    #[test]
    fn test_page_location_join() {
        let loc = PageLocation::parse("https://example.com/base/").unwrap();
        let joined = loc.join("/path?q=1").unwrap();
        assert_eq!(joined.pathname, "/path");
        assert_eq!(joined.search, "?q=1");
        assert_eq!(loc.join("docs/a.pdf").unwrap().pathname, "/base/docs/a.pdf");
    }

    #[test]
    fn test_static_host_navigate_sets_referrer() {
        let host = StaticHost::new("http://www.example.com/one").unwrap();
        host.navigate("http://www.example.com/two").unwrap();
        assert_eq!(host.referrer(), "http://www.example.com/one");
        assert_eq!(host.location().pathname, "/two");
    }

    #[test]
    fn test_static_host_seeded_random_is_repeatable() {
        let a = StaticHost::new("http://a.example.com/").unwrap().with_seed(7);
        let b = StaticHost::new("http://a.example.com/").unwrap().with_seed(7);
        let first = a.random();
        assert_eq!(first, b.random());
        assert!((0.0..1.0).contains(&first));
    }

    #[test]
    fn test_capability_probes_default_to_unsupported() {
        let host = StaticHost::new("http://a.example.com/").unwrap();
        assert!(matches!(host.connection_type(), Err(BeaconError::Unsupported(_))));
        let host = host.with_connection_type("lan").with_home_page("http://a.example.com/");
        assert_eq!(host.connection_type().unwrap(), "lan");
        assert!(host.is_home_page("http://A.example.com/").unwrap());
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_millis(0);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now_utc().timestamp(), 90);
    }

    #[test]
    fn test_image_slot_keeps_last_src() {
        let host = StaticHost::new("http://a.example.com/").unwrap();
        host.load_image("s_i_acct", "http://m/1");
        host.load_image("s_i_acct", "http://m/2");
        assert_eq!(host.image_src("s_i_acct").as_deref(), Some("http://m/2"));
        assert_eq!(host.beacon_urls(), vec!["http://m/1", "http://m/2"]);
    }
}

//! Cookies: [`CookieJar`] backends and the tracker's [`CookieStore`].
//!
//! The store only ever does read-modify-write through the jar's
//! `document.cookie`-style string interface. An empty value is written as
//! [`EMPTY_SENTINEL`] so it can be told apart from an absent cookie, and a
//! write only counts when an immediate read returns the written value.

use std::sync::{Arc, OnceLock};

use beacon_core::CookieLifetime;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::encoding::Codec;
use crate::host::Clock;

/// Stored in place of an empty value.
pub const EMPTY_SENTINEL: &str = "[[B]]";

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const MAX_TTL_SECS: u64 = 100 * 365 * 86_400;

/// `document.cookie` semantics: reads return `name=value` pairs joined by
/// `"; "`, writes take a single assignment with attributes.
pub trait CookieJar: Send + Sync {
    fn cookie_string(&self) -> String;
    fn set_cookie(&self, raw: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
    domain: Option<String>,
    expires: Option<DateTime<Utc>>,
}

struct JarState {
    hostname: String,
    enabled: bool,
    cookies: Vec<StoredCookie>,
}

/// In-memory jar honouring expiry, domain matching and session end.
pub struct MemoryCookieJar {
    clock: Arc<dyn Clock>,
    state: Mutex<JarState>,
}

impl MemoryCookieJar {
    pub fn new(hostname: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(JarState {
                hostname: hostname.into().to_ascii_lowercase(),
                enabled: true,
                cookies: Vec::new(),
            }),
        }
    }

    pub fn set_hostname(&self, hostname: &str) {
        self.state.lock().hostname = hostname.to_ascii_lowercase();
    }

    /// Simulate a browser with cookies switched off: writes are dropped.
    pub fn disable(&self) {
        let mut state = self.state.lock();
        state.enabled = false;
        state.cookies.clear();
    }

    /// Drop every cookie without an expiry, as a browser restart would.
    pub fn end_session(&self) {
        self.state.lock().cookies.retain(|c| c.expires.is_some());
    }

    /// Raw stored value for `name`, bypassing the string interface.
    pub fn raw_value(&self, name: &str) -> Option<String> {
        let now = self.clock.now_utc();
        self.state
            .lock()
            .cookies
            .iter()
            .find(|c| c.name == name && c.expires.map_or(true, |at| at > now))
            .map(|c| c.value.clone())
    }

    /// Expiry of `name`; `None` for absent or session cookies.
    pub fn expiry(&self, name: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .cookies
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.expires)
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now_utc();
        self.state
            .lock()
            .cookies
            .iter()
            .filter(|c| c.expires.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_string(&self) -> String {
        let now = self.clock.now_utc();
        let state = self.state.lock();
        if !state.enabled {
            return String::new();
        }
        state
            .cookies
            .iter()
            .filter(|c| c.expires.map_or(true, |at| at > now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookie(&self, raw: &str) {
        let mut parts = raw.split(';');
        let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            return;
        };
        let mut cookie = StoredCookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            domain: None,
            expires: None,
        };
        for attr in parts {
            let Some((key, val)) = attr.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "expires" => {
                    cookie.expires = DateTime::parse_from_rfc2822(val.trim())
                        .ok()
                        .map(|at| at.with_timezone(&Utc));
                }
                "domain" => {
                    let domain = val.trim().trim_start_matches('.').to_ascii_lowercase();
                    if !domain.is_empty() {
                        cookie.domain = Some(domain);
                    }
                }
                _ => {}
            }
        }

        let now = self.clock.now_utc();
        let mut state = self.state.lock();
        if !state.enabled || cookie.name.is_empty() {
            return;
        }
        if let Some(domain) = &cookie.domain {
            let host = state.hostname.as_str();
            if host != domain && !host.ends_with(&format!(".{domain}")) {
                debug!(cookie = %cookie.name, domain = %domain, host = %host, "Cookie rejected for foreign domain");
                return;
            }
        }
        state
            .cookies
            .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
        if cookie.expires.map_or(true, |at| at > now) {
            state.cookies.push(cookie);
        }
    }
}

/// Cookie domain for `hostname`, keeping `periods` labels (at least 2).
/// IP literals and single-label hosts get host-only cookies (`""`).
pub fn resolve_domain(hostname: &str, periods: u32) -> String {
    if hostname.is_empty() || !hostname.contains('.') {
        return String::new();
    }
    if hostname.split('.').all(|label| label.chars().all(|c| c.is_ascii_digit())) {
        return String::new();
    }
    let mut remaining = periods.max(2);
    let mut cut = hostname.rfind('.');
    while let Some(idx) = cut {
        if remaining <= 1 {
            break;
        }
        cut = hostname[..idx].rfind('.');
        remaining -= 1;
    }
    match cut {
        Some(idx) if idx > 0 => hostname[idx..].to_string(),
        _ => hostname.to_string(),
    }
}

/// Tracker view of the cookie jar.
#[derive(Clone)]
pub struct CookieStore {
    jar: Arc<dyn CookieJar>,
    codec: Codec,
    lifetime: CookieLifetime,
    periods: u32,
    hostname: String,
    clock: Arc<dyn Clock>,
    domain: OnceLock<String>,
}

impl CookieStore {
    pub fn new(
        jar: Arc<dyn CookieJar>,
        codec: Codec,
        lifetime: CookieLifetime,
        periods: u32,
        hostname: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jar,
            codec,
            lifetime,
            periods,
            hostname: hostname.into(),
            clock,
            domain: OnceLock::new(),
        }
    }

    /// Resolved cookie domain, computed on first use.
    pub fn domain(&self) -> &str {
        self.domain
            .get_or_init(|| resolve_domain(&self.hostname, self.periods))
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decoded value of `key`, or `""` when absent.
    pub fn read(&self, key: &str) -> String {
        let needle = format!(" {}=", self.codec.ape(key));
        let all = format!(" {}", self.jar.cookie_string());
        let Some(start) = all.find(&needle) else {
            return String::new();
        };
        let rest = &all[start + needle.len()..];
        let raw = rest.split(';').next().unwrap_or_default();
        let value = self.codec.epa(raw);
        if value == EMPTY_SENTINEL {
            String::new()
        } else {
            value
        }
    }

    /// Write `value` under `key`. Returns whether the value reads back.
    pub fn write(&self, key: &str, value: &str, expires: Option<DateTime<Utc>>) -> bool {
        if key.is_empty() || self.lifetime == CookieLifetime::None {
            return false;
        }
        let now = self.clock.now_utc();
        let expires = match self.lifetime {
            CookieLifetime::Session => None,
            _ if value.is_empty() => Some(now - Duration::seconds(60)),
            CookieLifetime::Seconds(ttl) => {
                Some(now + Duration::seconds(ttl.min(MAX_TTL_SECS) as i64))
            }
            _ => expires,
        };

        let stored = if value.is_empty() { EMPTY_SENTINEL } else { value };
        let mut assignment = format!(
            "{}={}; path=/;",
            self.codec.ape(key),
            self.codec.ape(stored)
        );
        if let Some(at) = expires {
            assignment.push_str(&format!(" expires={};", at.format(EXPIRES_FORMAT)));
        }
        let domain = self.domain();
        if !domain.is_empty() {
            assignment.push_str(&format!(" domain={domain};"));
        }
        self.jar.set_cookie(&assignment);

        let ok = self.read(key) == value;
        if !ok {
            debug!(key = %key, "Cookie write did not read back");
        }
        ok
    }

    /// Remove `key` by writing an empty value.
    pub fn remove(&self, key: &str) -> bool {
        self.write(key, "", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualClock;

    fn setup(lifetime: CookieLifetime) -> (Arc<MemoryCookieJar>, Arc<ManualClock>, CookieStore) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let jar = Arc::new(MemoryCookieJar::new("www.shop.example.com", clock.clone()));
        let store = CookieStore::new(
            jar.clone(),
            Codec::default(),
            lifetime,
            2,
            "www.shop.example.com",
            clock.clone(),
        );
        (jar, clock, store)
    }

    #[test]
    fn test_resolve_domain() {
        assert_eq!(resolve_domain("a.b.example.com", 2), ".example.com");
        assert_eq!(resolve_domain("a.b.example.co.uk", 3), ".example.co.uk");
        assert_eq!(resolve_domain("example.com", 2), "example.com");
        assert_eq!(resolve_domain("example.com", 3), "example.com");
        assert_eq!(resolve_domain("a.b.example.com", 1), ".example.com");
        assert_eq!(resolve_domain("203.0.113.5", 2), "");
        assert_eq!(resolve_domain("localhost", 2), "");
    }

    #[test]
    fn test_write_then_read() {
        let (_, _, store) = setup(CookieLifetime::Default);
        assert!(store.write("s_campaign", "SPRING sale+1", None));
        assert_eq!(store.read("s_campaign"), "SPRING sale+1");
        assert_eq!(store.read("missing"), "");
    }

    #[test]
    fn test_empty_value_never_exposes_sentinel() {
        let (jar, _, store) = setup(CookieLifetime::Default);
        assert!(store.write("k", "v", None));
        assert!(store.write("k", "", None));
        assert_eq!(store.read("k"), "");
        assert_eq!(jar.raw_value("k"), None);
    }

    #[test]
    fn test_lifetime_none_refuses_writes() {
        let (jar, _, store) = setup(CookieLifetime::None);
        assert!(!store.write("k", "v", None));
        assert!(jar.is_empty());
    }

    #[test]
    fn test_session_lifetime_drops_expiry() {
        let (jar, clock, store) = setup(CookieLifetime::Session);
        let later = clock.now_utc() + Duration::days(30);
        assert!(store.write("k", "v", Some(later)));
        assert_eq!(jar.expiry("k"), None);
        jar.end_session();
        assert_eq!(store.read("k"), "");
    }

    #[test]
    fn test_fixed_ttl_overrides_requested_expiry() {
        let (jar, clock, store) = setup(CookieLifetime::Seconds(120));
        assert!(store.write("k", "v", Some(clock.now_utc() + Duration::days(30))));
        let expiry = jar.expiry("k").unwrap();
        assert_eq!((expiry - clock.now_utc()).num_seconds(), 120);
        clock.advance(Duration::seconds(121));
        assert_eq!(store.read("k"), "");
    }

    #[test]
    fn test_explicit_expiry_is_honoured() {
        let (jar, clock, store) = setup(CookieLifetime::Default);
        assert!(store.write("k", "v", Some(clock.now_utc() + Duration::days(1))));
        assert!(jar.expiry("k").is_some());
        clock.advance(Duration::days(2));
        assert_eq!(store.read("k"), "");
    }

    #[test]
    fn test_domain_is_scoped_and_cached() {
        let (jar, _, store) = setup(CookieLifetime::Default);
        assert_eq!(store.domain(), ".example.com");
        assert!(store.write("k", "v", None));
        jar.set_hostname("www.other.org");
        assert!(!store.write("k2", "v", None));
    }

    #[test]
    fn test_disabled_jar_fails_writes() {
        let (jar, _, store) = setup(CookieLifetime::Default);
        jar.disable();
        assert!(!store.write("s_cc", "true", None));
    }

    #[test]
    fn test_key_match_requires_full_name() {
        let (_, _, store) = setup(CookieLifetime::Default);
        assert!(store.write("xs_sq", "other", None));
        assert!(store.write("s_sq", "mine", None));
        assert_eq!(store.read("s_sq"), "mine");
    }
}

//! Beacon URL assembly.
//!
//! A beacon is `http[s]://<server>/b/ss/<accounts>/1/<version>/<session>?`
//! followed by the `[AQB]` marker, `&ndh=1`, the per-call dynamic block, the
//! per-instance static block and the `[AQE]` marker.

use beacon_core::types::LinkType;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike};
use tracing::debug;

use crate::cookies::CookieStore;
use crate::encoding::{truncate, Codec};
use crate::environment::BrowserEnvironment;
use crate::host::Host;
use crate::resolver::IdentifierKind;

const SESSION_BUCKET_MS: i64 = 10_800_000;
const SAMPLING_YEARS: i64 = 10;
const PLUGIN_LIMIT: usize = 30;
const PLUGIN_NAME_MAX_LEN: usize = 100;
const PAGE_ID_MAX_LEN: usize = 255;
const OBJECT_ID_MAX_LEN: usize = 100;

/// Cookie written to probe whether cookies work.
pub const COOKIE_PROBE: &str = "s_cc";

/// Capability parameters, computed once per tracker instance.
pub fn static_block(host: &dyn Host, env: &BrowserEnvironment, store: &CookieStore) -> String {
    let mut resolution = String::new();
    let mut depth = String::new();
    let mut java = "";
    let mut script_version = "1.0";
    let mut viewport = None;
    let mut home_page = "";
    let mut connection = String::new();
    let mut plugins = Vec::new();
    let cookies = if store.write(COOKIE_PROBE, "true", None) { "Y" } else { "N" };
    let screen = host.screen();

    if env.version >= 4.0 {
        if let Some(s) = screen {
            resolution = format!("{}x{}", s.width, s.height);
        }
    }

    let java_flag = || if host.java_enabled() { "Y" } else { "N" };
    if env.is_netscape() || env.is_opera() {
        if env.version >= 3.0 {
            script_version = "1.1";
            java = java_flag();
            if env.version >= 4.0 {
                script_version = "1.2";
                depth = screen.map(|s| s.pixel_depth.to_string()).unwrap_or_default();
                viewport = host.viewport();
                if env.version >= 4.06 {
                    script_version = "1.3";
                }
            }
        }
        plugins = host.plugin_names();
    } else if env.is_ie() && env.version >= 4.0 {
        java = java_flag();
        script_version = "1.2";
        depth = screen.map(|s| s.color_depth.to_string()).unwrap_or_default();
        if env.version >= 5.0 {
            viewport = host.viewport();
            script_version = "1.3";
            if !env.is_mac {
                match host.is_home_page(&host.location().href) {
                    Ok(true) => home_page = "Y",
                    Ok(false) => home_page = "N",
                    Err(e) => debug!(error = %e, "Home page probe unavailable"),
                }
                match host.connection_type() {
                    Ok(kind) => connection = kind,
                    Err(e) => debug!(error = %e, "Connection type probe unavailable"),
                }
            }
        }
    }

    let mut plugin_list = String::new();
    for name in plugins.iter().take(PLUGIN_LIMIT) {
        let entry = format!("{};", truncate(name, PLUGIN_NAME_MAX_LEN));
        if !plugin_list.contains(&entry) {
            plugin_list.push_str(&entry);
        }
    }

    let codec = store.codec();
    let mut out = String::new();
    push_param(&mut out, "s", &codec.ape(&resolution));
    push_param(&mut out, "c", &codec.ape(&depth));
    push_param(&mut out, "j", script_version);
    push_param(&mut out, "v", java);
    push_param(&mut out, "k", cookies);
    if let Some((w, h)) = viewport {
        push_param(&mut out, "bw", &w.to_string());
        push_param(&mut out, "bh", &h.to_string());
    }
    push_param(&mut out, "ct", &codec.ape(&connection));
    push_param(&mut out, "hp", home_page);
    push_param(&mut out, "p", &codec.ape(&plugin_list));
    out
}

fn push_param(out: &mut String, key: &str, value: &str) {
    if !value.is_empty() {
        out.push('&');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
}

/// `D/M/YYYY h:m:s weekday offset`, month zero-based, offset in minutes
/// behind UTC.
pub fn time_components(now: DateTime<FixedOffset>) -> String {
    let offset_minutes = -now.offset().local_minus_utc() / 60;
    format!(
        "{}/{}/{} {}:{}:{} {} {}",
        now.day(),
        now.month0(),
        now.year(),
        now.hour(),
        now.minute(),
        now.second(),
        now.weekday().num_days_from_sunday(),
        offset_minutes
    )
}

/// Random per-call sequence id.
pub fn sequence_id(random: f64) -> u64 {
    (random.clamp(0.0, 1.0) * 1e13).floor() as u64
}

/// Path segment correlating beacons within a three-hour window.
pub fn session_bucket(epoch_ms: i64, sequence: u64) -> String {
    format!("s{}{}", (epoch_ms / SESSION_BUCKET_MS).rem_euclid(10), sequence)
}

pub fn sampling_key(accounts: &str, group: Option<&str>) -> String {
    match group.filter(|g| !g.is_empty()) {
        Some(group) => format!("s_vsn_{accounts}_{group}"),
        None => format!("s_vsn_{accounts}"),
    }
}

/// Admission test for a persisted counter at `rate` percent.
pub fn sample_admits(counter: u64, rate: f64) -> bool {
    ((counter % 10_000) as f64) < rate * 100.0
}

/// Decide whether this visitor is sampled in. The first call persists
/// `sequence` as the visitor's counter; a failed write rejects.
pub fn sampling_gate(
    store: &CookieStore,
    accounts: &str,
    rate: Option<f64>,
    group: Option<&str>,
    sequence: u64,
) -> bool {
    let Some(rate) = rate else {
        return true;
    };
    let key = sampling_key(accounts, group);
    let mut counter = store.read(&key);
    if counter.is_empty() {
        let expires = store.clock().now_utc() + Duration::days(365 * SAMPLING_YEARS);
        if !store.write(&key, &sequence.to_string(), Some(expires)) {
            debug!(key = %key, "Sampling counter not persisted, rejecting");
            return false;
        }
        counter = sequence.to_string();
    }
    match counter.trim().parse::<u64>() {
        Ok(n) => sample_admits(n, rate),
        Err(_) => true,
    }
}

/// `&pe=lnk_<code>&pev1=<href>&pev2=<name>`.
pub fn link_params(codec: Codec, link_type: LinkType, href: &str, name: &str) -> String {
    let mut out = format!("&pe=lnk_{}", link_type.wire_code());
    if !href.is_empty() {
        out.push_str("&pev1=");
        out.push_str(&codec.ape(href));
    }
    if !name.is_empty() {
        out.push_str("&pev2=");
        out.push_str(&codec.ape(name));
    }
    out
}

/// Object-level click statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineStats {
    /// Page name, or the page URL when no name is set.
    pub page: String,
    pub page_is_name: bool,
    pub object_id: String,
    pub id_kind: IdentifierKind,
    pub object_type: String,
    pub source_index: Option<usize>,
}

impl InlineStats {
    /// `&pid=..&pidt=..&oid=..&oidt=..&ot=..&oi=..`, or `""` when the page,
    /// object id or type is missing.
    pub fn to_params(&self, codec: Codec) -> String {
        if self.page.is_empty() || self.object_id.is_empty() || self.object_type.is_empty() {
            return String::new();
        }
        let mut out = format!("&pid={}", codec.ape(&truncate(&self.page, PAGE_ID_MAX_LEN)));
        if self.page_is_name {
            out.push_str("&pidt=1");
        }
        out.push_str("&oid=");
        out.push_str(&codec.ape(&truncate(&self.object_id, OBJECT_ID_MAX_LEN)));
        if self.id_kind.code() != 0 {
            out.push_str(&format!("&oidt={}", self.id_kind.code()));
        }
        out.push_str("&ot=");
        out.push_str(&codec.ape(&self.object_type));
        if let Some(index) = self.source_index.filter(|i| *i != 0) {
            out.push_str(&format!("&oi={index}"));
        }
        out
    }
}

/// Where and how a beacon URL is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconTarget<'a> {
    pub secure: bool,
    pub server: &'a str,
    pub accounts: &'a str,
    pub code_version: &'a str,
    pub length_cap: Option<usize>,
}

/// Full beacon URL and whether it was cut to the length cap.
pub fn assemble_url(
    target: &BeaconTarget<'_>,
    session: &str,
    dynamic: &str,
    static_params: &str,
) -> (String, bool) {
    let url = format!(
        "http{}://{}/b/ss/{}/1/{}/{}?[AQB]&ndh=1{}{}&[AQE]",
        if target.secure { "s" } else { "" },
        target.server,
        target.accounts,
        target.code_version,
        session,
        dynamic,
        static_params
    );
    match target.length_cap {
        Some(cap) if url.chars().count() > cap => (truncate(&url, cap), true),
        _ => (url, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Navigator, StaticHost};
    use beacon_core::CookieLifetime;
    use chrono::TimeZone;

    fn store_for(host: &StaticHost) -> CookieStore {
        CookieStore::new(
            host.jar(),
            Codec::default(),
            CookieLifetime::Default,
            2,
            host.location().hostname,
            host.manual_clock(),
        )
    }

    #[test]
    fn test_time_components() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2007, 1, 26, 9, 5, 7).unwrap();
        assert_eq!(time_components(now), "26/0/2007 9:5:7 5 300");

        let east = FixedOffset::east_opt(3600).unwrap();
        let now = east.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(time_components(now), "1/11/2024 0:0:0 0 -60");
    }

    #[test]
    fn test_sequence_and_session() {
        assert_eq!(sequence_id(0.5), 5_000_000_000_000);
        assert_eq!(sequence_id(0.0), 0);
        assert_eq!(session_bucket(10_800_000 * 13 + 5, 42), "s342");
    }

    #[test]
    fn test_sample_admits_strict_boundary() {
        assert!(sample_admits(4999, 50.0));
        assert!(!sample_admits(5000, 50.0));
        assert!(sample_admits(123_4999, 50.0));
        assert!(!sample_admits(0, 0.0));
        assert!(sample_admits(9999, 100.0));
    }

    #[test]
    fn test_sampling_gate_persists_counter() {
        let host = StaticHost::new("http://www.example.com/").unwrap();
        let store = store_for(&host);
        assert!(sampling_gate(&store, "acct", Some(50.0), None, 1234));
        assert_eq!(store.read("s_vsn_acct"), "1234");
        // A later sequence id does not replace the stored counter.
        assert!(sampling_gate(&store, "acct", Some(50.0), None, 7777));
        assert_eq!(store.read("s_vsn_acct"), "1234");
        assert!(!sampling_gate(&store, "acct", Some(10.0), None, 1));
        assert!(store.read("s_vsn_acct_grp").is_empty());
        assert!(sampling_gate(&store, "acct", None, None, 9999));
    }

    #[test]
    fn test_sampling_gate_rejects_without_cookies() {
        let host = StaticHost::new("http://www.example.com/").unwrap();
        host.jar().disable();
        let store = store_for(&host);
        assert!(!sampling_gate(&store, "acct", Some(100.0), Some("grp"), 1));
    }

    #[test]
    fn test_static_block_for_ie6() {
        let host = StaticHost::new("http://www.example.com/")
            .unwrap()
            .with_navigator(Navigator::internet_explorer("6.0", false))
            .with_java(true)
            .with_connection_type("lan")
            .with_home_page("http://www.example.com/");
        let env = BrowserEnvironment::classify(&host.navigator(), Some("%u0100"));
        let store = store_for(&host);
        let block = static_block(&host, &env, &store);
        assert_eq!(
            block,
            "&s=1280x1024&c=32&j=1.3&v=Y&k=Y&bw=1200&bh=800&ct=lan&hp=Y"
        );
    }

    #[test]
    fn test_static_block_for_gecko_dedupes_plugins() {
        let host = StaticHost::new("http://www.example.com/")
            .unwrap()
            .with_plugins(["Flash", "QuickTime", "Flash"]);
        let env = BrowserEnvironment::classify(&host.navigator(), None);
        let store = store_for(&host);
        let block = static_block(&host, &env, &store);
        assert_eq!(
            block,
            "&s=1280x1024&c=24&j=1.3&v=N&k=Y&bw=1200&bh=800&p=Flash%3BQuickTime%3B"
        );
    }

    #[test]
    fn test_static_block_without_cookies() {
        let host = StaticHost::new("http://www.example.com/").unwrap();
        host.jar().disable();
        let env = BrowserEnvironment::classify(&Navigator::new("x", "Other", "2.0"), None);
        let store = store_for(&host);
        assert_eq!(static_block(&host, &env, &store), "&j=1.0&k=N");
    }

    #[test]
    fn test_link_params() {
        let codec = Codec::default();
        assert_eq!(
            link_params(codec, LinkType::Download, "http://x/a.pdf", ""),
            "&pe=lnk_d&pev1=http%3A//x/a.pdf"
        );
        assert_eq!(
            link_params(codec, LinkType::Custom, "", "Form Analysis"),
            "&pe=lnk_o&pev2=Form%20Analysis"
        );
    }

    #[test]
    fn test_inline_stats_params() {
        let stats = InlineStats {
            page: "Home".into(),
            page_is_name: true,
            object_id: "http://a/".into(),
            id_kind: IdentifierKind::Href,
            object_type: "A".into(),
            source_index: Some(12),
        };
        assert_eq!(
            stats.to_params(Codec::default()),
            "&pid=Home&pidt=1&oid=http%3A//a/&ot=A&oi=12"
        );
        let by_handler = InlineStats {
            page_is_name: false,
            id_kind: IdentifierKind::Handler,
            source_index: None,
            ..stats.clone()
        };
        assert_eq!(
            by_handler.to_params(Codec::default()),
            "&pid=Home&oid=http%3A//a/&oidt=2&ot=A"
        );
        let missing = InlineStats {
            object_id: String::new(),
            ..stats
        };
        assert_eq!(missing.to_params(Codec::default()), "");
    }

    #[test]
    fn test_assemble_url_and_cap() {
        let target = BeaconTarget {
            secure: true,
            server: "smetrics.example.com",
            accounts: "acct1,acct2",
            code_version: "H.8",
            length_cap: None,
        };
        let (url, truncated) = assemble_url(&target, "s1234", "&pageName=Home", "&j=1.3");
        assert_eq!(
            url,
            "https://smetrics.example.com/b/ss/acct1,acct2/1/H.8/s1234?[AQB]&ndh=1&pageName=Home&j=1.3&[AQE]"
        );
        assert!(!truncated);

        let capped = BeaconTarget {
            length_cap: Some(40),
            ..target
        };
        let (url, truncated) = assemble_url(&capped, "s1234", "&pageName=Home", "&j=1.3");
        assert_eq!(url.len(), 40);
        assert!(truncated);
        assert!(url.starts_with("https://smetrics.example.com/b/ss/"));
    }
}

//! Helper plugins for use inside a [`PluginHook`](crate::tracker::PluginHook).
//!
//! Each helper keeps its state in a first-party cookie through the tracker's
//! cookie store, so results are stable across page loads.

use chrono::{DateTime, Duration, Utc};

use crate::assembler::InlineStats;
use crate::deferred::store_deferred;
use crate::encoding::truncate;
use crate::resolver::IdentifierKind;
use crate::tracker::Tracker;
use crate::variables::Variable;

pub const LAST_VISIT_COOKIE: &str = "s_lastvisit";
pub const NEW_REPEAT_COOKIE: &str = "s_nr";

const MINUTE_MS: i64 = 60 * 1000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;
const VISIT_WINDOW_MS: i64 = 30 * MINUTE_MS;
/// `s_nr` values older than this were written with a shorter expiry and are
/// re-written once.
const NEW_REPEAT_LEGACY_CUTOFF_MS: i64 = 1_123_916_400_001;

/// Stopwatch step for [`Tracker::get_time_to_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Start,
    Stop,
}

impl Tracker {
    fn now_utc(&self) -> DateTime<Utc> {
        self.host.clock().now_utc()
    }

    fn days_from_now(&self, days: u32) -> Option<DateTime<Utc>> {
        (days > 0).then(|| self.now_utc() + Duration::days(i64::from(days)))
    }

    /// Values of the comma-separated query `keys`, joined by `delimiter`.
    /// Reads `url`, else the page URL variable, else the page location. A
    /// key present without `=` yields `True`.
    pub fn get_query_param(&self, keys: &str, delimiter: &str, url: Option<&str>) -> String {
        let source = match url {
            Some(u) => u.to_string(),
            None if !self.get(Variable::PageUrl).is_empty() => self.get(Variable::PageUrl).to_string(),
            None => self.host.location().href,
        };
        let Some((_, query)) = source.split_once('?') else {
            return String::new();
        };
        let codec = self.codec();
        let mut out = String::new();
        for key in keys.split(',').filter(|k| !k.is_empty()) {
            let found = query.split('&').filter(|p| !p.is_empty()).find_map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, "True"));
                name.eq_ignore_ascii_case(key)
                    .then(|| codec.epa(value))
                    .filter(|v| !v.is_empty())
            });
            if let Some(value) = found {
                if !out.is_empty() {
                    out.push_str(delimiter);
                }
                out.push_str(&value);
            }
        }
        out
    }

    /// `value` unless it equals what `cookie` already holds. Non-empty
    /// values are persisted, for `days` days or the session when zero.
    pub fn get_val_once(&self, value: &str, cookie: &str, days: u32) -> String {
        let previous = self.cookies.read(cookie);
        if !value.is_empty() {
            self.cookies.write(cookie, value, self.days_from_now(days));
        }
        if value == previous {
            String::new()
        } else {
            value.to_string()
        }
    }

    /// Persist a non-empty `value` and return whatever `cookie` holds.
    pub fn get_and_persist_value(&self, value: &str, cookie: &str, days: u32) -> String {
        if !value.is_empty() {
            self.cookies.write(cookie, value, self.days_from_now(days));
        }
        self.cookies.read(cookie)
    }

    /// Bucketed time since the previous visit. Empty within the same visit.
    pub fn get_days_since_last_visit(&self) -> String {
        let now = self.now_utc();
        let now_ms = now.timestamp_millis();
        let expires = Some(now + Duration::days(3 * 365));
        let stamp = now_ms.to_string();

        let Ok(last) = self.cookies.read(LAST_VISIT_COOKIE).parse::<i64>() else {
            self.cookies.write(LAST_VISIT_COOKIE, &stamp, expires);
            return "First page view or cookies not supported".into();
        };
        let elapsed = now_ms - last;
        if elapsed <= VISIT_WINDOW_MS {
            return String::new();
        }
        self.cookies.write(LAST_VISIT_COOKIE, &stamp, expires);
        let bucket = if elapsed > 30 * DAY_MS {
            "More than 30 days"
        } else if elapsed > 7 * DAY_MS {
            "More than 7 days"
        } else if elapsed > DAY_MS {
            "Less than 7 days"
        } else {
            "Less than 1 day"
        };
        bucket.into()
    }

    /// Start a stopwatch in `cookie`, or stop it and return the elapsed
    /// time rounded to a readable unit (`1.6 hours`, `10 seconds`).
    pub fn get_time_to_complete(&self, action: TimerAction, cookie: &str, days: u32) -> String {
        let now = self.now_utc();
        match action {
            TimerAction::Start => {
                self.cookies
                    .write(cookie, &now.timestamp_millis().to_string(), self.days_from_now(days));
                String::new()
            }
            TimerAction::Stop => {
                let started = self.cookies.read(cookie);
                if !self.cookies.write(cookie, "", Some(now)) {
                    return String::new();
                }
                let Ok(started) = started.parse::<i64>() else {
                    return String::new();
                };
                format_elapsed((now.timestamp_millis() - started) as f64 / 1000.0)
            }
        }
    }

    /// `New` for a first visit or within 30 minutes of it, else `Repeat`.
    pub fn get_new_repeat(&self) -> String {
        let now = self.now_utc();
        let now_ms = now.timestamp_millis();
        let stamp = now_ms.to_string();
        let raw = self.cookies.read(NEW_REPEAT_COOKIE);
        if raw.is_empty() {
            self.cookies.write(NEW_REPEAT_COOKIE, &stamp, Some(now + Duration::days(30)));
            return "New".into();
        }
        let first = raw.parse::<i64>().unwrap_or(0);
        if now_ms - first < VISIT_WINDOW_MS {
            self.cookies.write(NEW_REPEAT_COOKIE, &stamp, Some(now + Duration::days(30)));
            return "New".into();
        }
        if first < NEW_REPEAT_LEGACY_CUTOFF_MS {
            let expires = DateTime::<Utc>::from_timestamp_millis(first + 30 * DAY_MS);
            self.cookies.write(NEW_REPEAT_COOKIE, &stamp, expires);
        }
        "Repeat".into()
    }

    /// Whether this page starts a visit (no activity in `cookie` for 30
    /// minutes). Always `false` when cookies cannot be written.
    pub fn get_visit_start(&self, cookie: &str) -> bool {
        let mut start = self.cookies.read(cookie).is_empty();
        let expires = self.now_utc() + Duration::milliseconds(VISIT_WINDOW_MS);
        if !self.cookies.write(cookie, "1", Some(expires)) {
            self.cookies.write(cookie, "1", None);
        }
        if self.cookies.read(cookie).is_empty() {
            start = false;
        }
        start
    }

    /// Value stored by the previous call, replacing it with `value`. With
    /// `only_on_events`, runs only when one of those events is set.
    pub fn get_previous_value(&self, value: &str, cookie: &str, only_on_events: Option<&str>) -> String {
        if let Some(wanted) = only_on_events.filter(|e| !e.is_empty()) {
            let current = self.get(Variable::Events);
            let hit = wanted
                .split(',')
                .any(|w| current.split(',').any(|c| !c.is_empty() && c == w));
            if !hit {
                return String::new();
            }
        }
        let previous = self.cookies.read(cookie);
        let stored = if value.is_empty() { "no value" } else { value };
        let expires = self.now_utc() + Duration::milliseconds(VISIT_WINDOW_MS);
        self.cookies.write(cookie, stored, Some(expires));
        previous
    }

    /// Queue ClickMap statistics carried in the query string as
    /// `page~object`, so the next beacon reports the email link that led
    /// here. Returns whether anything was queued.
    pub fn set_click_map_email(&self, keys: &str, type_key: &str) -> bool {
        let carried = self.get_query_param(keys, "~", None);
        let Some((page, object)) = carried.split_once('~') else {
            return false;
        };
        let object_type = Some(self.get_query_param(type_key, "", None))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "A".into());
        let stats = InlineStats {
            page: page.to_string(),
            page_is_name: true,
            object_id: truncate(object, 100),
            id_kind: IdentifierKind::ObjectId,
            object_type,
            source_index: Some(1),
        };
        let params = stats.to_params(self.codec());
        !params.is_empty() && store_deferred(&self.cookies, self.accounts(), &params)
    }
}

/// Elapsed seconds in days or hours (fifths), minutes (halves) or seconds
/// (5-second steps).
pub fn format_elapsed(seconds: f64) -> String {
    // (unit seconds, name, steps per unit numerator, denominator)
    let (unit, name, num, den) = if seconds > 86_400.0 {
        (86_400.0, "days", 5.0, 1.0)
    } else if seconds > 3_600.0 {
        (3_600.0, "hours", 5.0, 1.0)
    } else if seconds > 60.0 {
        (60.0, "minutes", 2.0, 1.0)
    } else {
        (1.0, "seconds", 1.0, 5.0)
    };
    let value = (seconds * num / (unit * den)).round() * den / num;
    format!("{value} {name}")
}

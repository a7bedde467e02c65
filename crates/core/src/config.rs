use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::{BeaconError, BeaconResult};

/// Tracker configuration. Field names follow Rust conventions; the
/// camel-case page-author option names are accepted as aliases. Loaded from an optional TOML file and
/// environment variables with the prefix `BEACON__`.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Comma-separated collection account list; the first entry names the
    /// image slot and the sampling key.
    #[serde(default)]
    pub account: String,
    #[serde(default = "default_tracking_server", alias = "trackingServer")]
    pub tracking_server: String,
    #[serde(default = "default_tracking_server_secure", alias = "trackingServerSecure")]
    pub tracking_server_secure: String,
    #[serde(default = "default_code_version", alias = "codeVersion")]
    pub code_version: String,
    #[serde(default, alias = "charSet")]
    pub char_set: Option<String>,
    #[serde(default, alias = "visitorNamespace")]
    pub visitor_namespace: Option<String>,
    /// Hostname labels kept in the cookie domain; emitted as `cdp` when set.
    #[serde(default, alias = "cookieDomainPeriods")]
    pub cookie_domain_periods: Option<u32>,
    #[serde(default, alias = "cookieLifetime")]
    pub cookie_lifetime: CookieLifetime,

    #[serde(default, alias = "trackDownloadLinks")]
    pub track_download_links: bool,
    #[serde(default, alias = "trackExternalLinks")]
    pub track_external_links: bool,
    #[serde(default, alias = "trackInlineStats")]
    pub track_inline_stats: bool,
    #[serde(default = "default_download_file_types", alias = "linkDownloadFileTypes")]
    pub link_download_file_types: String,
    #[serde(default, alias = "linkInternalFilters")]
    pub link_internal_filters: String,
    #[serde(default, alias = "linkExternalFilters")]
    pub link_external_filters: String,
    #[serde(default, alias = "linkLeaveQueryString")]
    pub link_leave_query_string: bool,
    #[serde(default = "default_link_track_list", alias = "linkTrackVars")]
    pub link_track_vars: String,
    #[serde(default = "default_link_track_list", alias = "linkTrackEvents")]
    pub link_track_events: String,
    #[serde(default, alias = "linkNames")]
    pub link_names: String,

    #[serde(default, alias = "visitorSampling")]
    pub visitor_sampling: Option<f64>,
    #[serde(default, alias = "visitorSamplingGroup")]
    pub visitor_sampling_group: Option<String>,

    #[serde(default, alias = "dynamicAccountSelection")]
    pub dynamic_account_selection: bool,
    #[serde(default, alias = "dynamicAccountList")]
    pub dynamic_account_list: String,
    #[serde(default, alias = "dynamicAccountMatch")]
    pub dynamic_account_match: Option<String>,

    #[serde(default, alias = "usePlugins")]
    pub use_plugins: bool,
    /// Upper bound of the synchronous pause after a same-window link beacon.
    #[serde(default = "default_link_delay_ms", alias = "linkDelayMs")]
    pub link_delay_ms: u64,

    #[serde(default, alias = "formAnalysis")]
    pub form_analysis: FormAnalysisConfig,
}

/// Settings for form interaction tracking.
#[derive(Debug, Clone, Deserialize)]
pub struct FormAnalysisConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Report outcomes as events from `event_list` instead of outcome words.
    #[serde(default, alias = "useCommerce")]
    pub use_commerce: bool,
    /// Variable that receives the `form:outcome` description.
    #[serde(default, alias = "varUsed")]
    pub var_used: Option<String>,
    /// Abandon, success and error events, in that order.
    #[serde(default, alias = "eventList")]
    pub event_list: String,
    /// `true`: `form_list` is an include list. `false`: an exclude list.
    #[serde(default, alias = "trackFormList")]
    pub track_form_list: bool,
    #[serde(default, alias = "formList")]
    pub form_list: String,
    #[serde(default = "default_track_page_name", alias = "trackPageName")]
    pub track_page_name: bool,
}

/// Lifetime policy applied to every cookie the tracker writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookieLifetime {
    /// Use whatever expiry the caller asked for.
    #[default]
    Default,
    /// Never set an expiry.
    Session,
    /// Never write cookies.
    None,
    /// Expire every written cookie at now + seconds.
    Seconds(u64),
}

impl CookieLifetime {
    /// Value emitted on the wire (`cl`), if any.
    pub fn wire_value(&self) -> Option<String> {
        match self {
            CookieLifetime::Default => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CookieLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieLifetime::Default => Ok(()),
            CookieLifetime::Session => f.write_str("session"),
            CookieLifetime::None => f.write_str("none"),
            CookieLifetime::Seconds(secs) => write!(f, "{secs}"),
        }
    }
}

impl FromStr for CookieLifetime {
    type Err = BeaconError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(CookieLifetime::Default);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "SESSION" => Ok(CookieLifetime::Session),
            "NONE" => Ok(CookieLifetime::None),
            _ => trimmed
                .parse::<u64>()
                .map(|secs| {
                    if secs == 0 {
                        CookieLifetime::Default
                    } else {
                        CookieLifetime::Seconds(secs)
                    }
                })
                .map_err(|_| {
                    BeaconError::Config(format!(
                        "cookie lifetime must be 'session', 'none' or seconds, got '{trimmed}'"
                    ))
                }),
        }
    }
}

impl<'de> Deserialize<'de> for CookieLifetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(0) => Ok(CookieLifetime::Default),
            Raw::Seconds(secs) => Ok(CookieLifetime::Seconds(secs)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

// Default functions
fn default_tracking_server() -> String {
    "metrics.example.com".to_string()
}
fn default_tracking_server_secure() -> String {
    "smetrics.example.com".to_string()
}
fn default_code_version() -> String {
    "H.8".to_string()
}
fn default_download_file_types() -> String {
    "exe,zip,wav,mp3,mov,mpg,avi,wmv,doc,pdf,xls".to_string()
}
fn default_link_track_list() -> String {
    "None".to_string()
}
fn default_link_delay_ms() -> u64 {
    500
}
fn default_track_page_name() -> bool {
    true
}

impl Default for FormAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_commerce: false,
            var_used: None,
            event_list: String::new(),
            track_form_list: false,
            form_list: String::new(),
            track_page_name: default_track_page_name(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            tracking_server: default_tracking_server(),
            tracking_server_secure: default_tracking_server_secure(),
            code_version: default_code_version(),
            char_set: None,
            visitor_namespace: None,
            cookie_domain_periods: None,
            cookie_lifetime: CookieLifetime::Default,
            track_download_links: false,
            track_external_links: false,
            track_inline_stats: false,
            link_download_file_types: default_download_file_types(),
            link_internal_filters: String::new(),
            link_external_filters: String::new(),
            link_leave_query_string: false,
            link_track_vars: default_link_track_list(),
            link_track_events: default_link_track_list(),
            link_names: String::new(),
            visitor_sampling: None,
            visitor_sampling_group: None,
            dynamic_account_selection: false,
            dynamic_account_list: String::new(),
            dynamic_account_match: None,
            use_plugins: false,
            link_delay_ms: default_link_delay_ms(),
            form_analysis: FormAnalysisConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from an optional TOML file and `BEACON__*`
    /// environment variables (environment wins).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("BEACON")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Check option combinations that cannot be honoured at runtime.
    pub fn validate(&self) -> BeaconResult<()> {
        if let Some(rate) = self.visitor_sampling {
            if !(0.0..=100.0).contains(&rate) {
                return Err(BeaconError::Config(format!(
                    "visitor_sampling must be within 0..=100, got {rate}"
                )));
            }
        }
        if self.cookie_domain_periods == Some(0) {
            return Err(BeaconError::Config(
                "cookie_domain_periods must be positive".into(),
            ));
        }
        let fa = &self.form_analysis;
        if fa.enabled && !fa.use_commerce && fa.var_used.as_deref().unwrap_or("").is_empty() {
            return Err(BeaconError::Config(
                "form analysis needs var_used unless use_commerce is set".into(),
            ));
        }
        if fa.enabled && fa.use_commerce && fa.event_list.split(',').count() < 3 {
            return Err(BeaconError::Config(
                "form analysis event_list needs abandon, success and error events".into(),
            ));
        }
        Ok(())
    }

    /// Number of hostname labels used for the cookie domain (at least 2).
    pub fn domain_periods(&self) -> u32 {
        self.cookie_domain_periods.unwrap_or(2).max(2)
    }

    /// Active sampling rate, treating zero as "sampling disabled".
    pub fn sampling_rate(&self) -> Option<f64> {
        self.visitor_sampling.filter(|rate| *rate > 0.0)
    }
}

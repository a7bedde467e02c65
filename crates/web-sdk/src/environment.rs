//! Browser classification.
//!
//! Pure function of the navigator strings and the Unicode escape probe.
//! Computed once per tracker instance.

use serde::Serialize;

use crate::encoding::EscapeMode;
use crate::host::Navigator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    InternetExplorer,
    /// Netscape and Gecko-family browsers.
    Netscape,
    Opera,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserEnvironment {
    pub family: BrowserFamily,
    /// Approximate numeric version; 0 when unparseable.
    pub version: f64,
    pub is_mac: bool,
    /// User agent carries a `Netscape6/` token.
    pub is_netscape6: bool,
    #[serde(skip)]
    pub escape_mode: EscapeMode,
}

impl BrowserEnvironment {
    pub fn classify(navigator: &Navigator, escape_probe: Option<&str>) -> Self {
        let ua = navigator.user_agent.as_str();
        let app_version = navigator.app_version.as_str();
        let opera_at = ua.find("Opera ").filter(|idx| *idx > 0);
        let msie_at = app_version.find("MSIE ").filter(|idx| *idx > 0);
        let ns6_at = ua.find("Netscape6/");

        let family = if app_version.contains("Opera") || opera_at.is_some() {
            BrowserFamily::Opera
        } else {
            match navigator.app_name.as_str() {
                "Microsoft Internet Explorer" => BrowserFamily::InternetExplorer,
                "Netscape" => BrowserFamily::Netscape,
                "Opera" => BrowserFamily::Opera,
                _ => BrowserFamily::Other,
            }
        };

        let version = if let Some(idx) = opera_at {
            parse_float(&ua[idx + 6..])
        } else if let Some(idx) = msie_at {
            let rest = &app_version[idx + 5..];
            let major = parse_int(rest);
            if major > 3.0 {
                parse_float(rest)
            } else {
                major
            }
        } else if let Some(idx) = ns6_at.filter(|idx| *idx > 0) {
            parse_float(&ua[idx + 10..])
        } else {
            parse_float(app_version)
        };

        Self {
            family,
            version,
            is_mac: ua.contains("Mac"),
            is_netscape6: ns6_at.is_some(),
            escape_mode: EscapeMode::from_probe(escape_probe),
        }
    }

    pub fn is_ie(&self) -> bool {
        self.family == BrowserFamily::InternetExplorer
    }

    pub fn is_netscape(&self) -> bool {
        self.family == BrowserFamily::Netscape
    }

    pub fn is_opera(&self) -> bool {
        self.family == BrowserFamily::Opera
    }

    /// Beacons can be sent through an image object.
    pub fn image_capable(&self, document_has_images: bool) -> bool {
        document_has_images
            && self.version >= 3.0
            && (!self.is_opera() || self.version >= 7.0)
            && (!self.is_netscape6 || self.version >= 6.1)
    }

    /// Clicks can be captured with a single listener on the body.
    pub fn body_click_capture(&self) -> bool {
        self.version > 3.0 && (!self.is_ie() || !self.is_mac || self.version >= 5.0)
    }

    /// Maximum beacon URL length, if the browser imposes one.
    pub fn url_length_cap(&self) -> Option<usize> {
        if !self.is_ie() || self.is_mac {
            return None;
        }
        if self.version > 5.5 {
            Some(4095)
        } else {
            Some(2047)
        }
    }
}

/// Leading decimal number of `raw`, ignoring leading whitespace.
fn parse_float(raw: &str) -> f64 {
    let trimmed = raw.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (idx, ch) in trimmed.char_indices() {
        match ch {
            '0'..='9' => end = idx + 1,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

fn parse_int(raw: &str) -> f64 {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_internet_explorer() {
        let env = BrowserEnvironment::classify(&Navigator::internet_explorer("5.5", false), Some("%u0100"));
        assert_eq!(env.family, BrowserFamily::InternetExplorer);
        assert_eq!(env.version, 5.5);
        assert!(!env.is_mac);
        assert_eq!(env.escape_mode, EscapeMode::UnicodeUnits);
        assert_eq!(env.url_length_cap(), Some(2047));

        let ie6 = BrowserEnvironment::classify(&Navigator::internet_explorer("6.0", false), None);
        assert_eq!(ie6.url_length_cap(), Some(4095));

        let mac = BrowserEnvironment::classify(&Navigator::internet_explorer("5.23", true), None);
        assert!(mac.is_mac);
        assert_eq!(mac.url_length_cap(), None);
    }

    #[test]
    fn test_classify_netscape_family() {
        let env = BrowserEnvironment::classify(&Navigator::gecko(), Some("%C4%80"));
        assert_eq!(env.family, BrowserFamily::Netscape);
        assert_eq!(env.version, 5.0);
        assert_eq!(env.escape_mode, EscapeMode::Utf8Bytes);
        assert!(env.image_capable(true));

        let ns6 = BrowserEnvironment::classify(&Navigator::netscape6(), None);
        assert!(ns6.is_netscape6);
        assert_eq!(ns6.version, 6.2);
        assert!(ns6.image_capable(true));
    }

    #[test]
    fn test_classify_opera() {
        let env = BrowserEnvironment::classify(&Navigator::opera(), None);
        assert_eq!(env.family, BrowserFamily::Opera);
        assert_eq!(env.version, 9.1);

        let spoofing = Navigator::new(
            "Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.1) Opera 7.23 [en]",
            "Microsoft Internet Explorer",
            "4.0 (compatible; MSIE 6.0; Windows NT 5.1)",
        );
        let env = BrowserEnvironment::classify(&spoofing, None);
        assert_eq!(env.family, BrowserFamily::Opera);
        assert_eq!(env.version, 7.23);
        assert!(env.image_capable(true));
    }

    #[test]
    fn test_unparseable_version_is_zero() {
        let env = BrowserEnvironment::classify(&Navigator::new("bot", "Crawler", "n/a"), None);
        assert_eq!(env.family, BrowserFamily::Other);
        assert_eq!(env.version, 0.0);
        assert!(!env.image_capable(true));
        assert!(!env.body_click_capture());
    }

    #[test]
    fn test_body_click_capture_on_mac_ie() {
        let ie45 = BrowserEnvironment::classify(&Navigator::internet_explorer("4.5", true), None);
        assert!(!ie45.body_click_capture());
        let ie6 = BrowserEnvironment::classify(&Navigator::internet_explorer("6.0", false), None);
        assert!(ie6.body_click_capture());
    }

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float("4.06 [en]"), 4.06);
        assert_eq!(parse_float("  9.10 (Windows)"), 9.1);
        assert_eq!(parse_float("1.2.3"), 1.2);
        assert_eq!(parse_float("x"), 0.0);
        assert_eq!(parse_int("5.5"), 5.0);
    }
}

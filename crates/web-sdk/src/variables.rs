//! Tracked variables and their wire serialization.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use beacon_core::BeaconError;

use crate::encoding::{truncate, Codec, EscapeMode};

/// Number of slots in each numbered family.
pub const SLOT_COUNT: u8 = 50;

const HIER_MAX_LEN: usize = 255;

/// Leading names always eligible during link calls.
const CORE_COUNT: usize = 11;

const NAMED: [Variable; 22] = [
    Variable::Vmk,
    Variable::Ppu,
    Variable::CharSet,
    Variable::VisitorNamespace,
    Variable::CookieDomainPeriods,
    Variable::CookieLifetime,
    Variable::PageName,
    Variable::PageUrl,
    Variable::Referrer,
    Variable::CurrencyCode,
    Variable::PurchaseId,
    Variable::VariableProvider,
    Variable::Channel,
    Variable::Server,
    Variable::PageType,
    Variable::Campaign,
    Variable::State,
    Variable::Zip,
    Variable::Events,
    Variable::Products,
    Variable::LinkName,
    Variable::LinkType,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    Vmk,
    Ppu,
    CharSet,
    VisitorNamespace,
    CookieDomainPeriods,
    CookieLifetime,
    PageName,
    PageUrl,
    Referrer,
    CurrencyCode,
    PurchaseId,
    VariableProvider,
    Channel,
    Server,
    PageType,
    Campaign,
    State,
    Zip,
    Events,
    Products,
    LinkName,
    LinkType,
    Prop(u8),
    EVar(u8),
    Hier(u8),
}

impl Variable {
    /// Every variable in serialization order.
    pub fn ordered() -> impl Iterator<Item = Variable> {
        NAMED.into_iter().chain(
            (1..=SLOT_COUNT)
                .flat_map(|n| [Variable::Prop(n), Variable::EVar(n), Variable::Hier(n)]),
        )
    }

    pub fn name(&self) -> String {
        match self {
            Variable::Vmk => "vmk".into(),
            Variable::Ppu => "ppu".into(),
            Variable::CharSet => "charSet".into(),
            Variable::VisitorNamespace => "visitorNamespace".into(),
            Variable::CookieDomainPeriods => "cookieDomainPeriods".into(),
            Variable::CookieLifetime => "cookieLifetime".into(),
            Variable::PageName => "pageName".into(),
            Variable::PageUrl => "pageURL".into(),
            Variable::Referrer => "referrer".into(),
            Variable::CurrencyCode => "currencyCode".into(),
            Variable::PurchaseId => "purchaseID".into(),
            Variable::VariableProvider => "variableProvider".into(),
            Variable::Channel => "channel".into(),
            Variable::Server => "server".into(),
            Variable::PageType => "pageType".into(),
            Variable::Campaign => "campaign".into(),
            Variable::State => "state".into(),
            Variable::Zip => "zip".into(),
            Variable::Events => "events".into(),
            Variable::Products => "products".into(),
            Variable::LinkName => "linkName".into(),
            Variable::LinkType => "linkType".into(),
            Variable::Prop(n) => format!("prop{n}"),
            Variable::EVar(n) => format!("eVar{n}"),
            Variable::Hier(n) => format!("hier{n}"),
        }
    }

    /// Query parameter name.
    pub fn wire_code(&self) -> String {
        match self {
            Variable::PageUrl => "g".into(),
            Variable::Referrer => "r".into(),
            Variable::Vmk => "vmt".into(),
            Variable::CharSet => "ce".into(),
            Variable::VisitorNamespace => "ns".into(),
            Variable::CookieDomainPeriods => "cdp".into(),
            Variable::CookieLifetime => "cl".into(),
            Variable::VariableProvider => "vvp".into(),
            Variable::CurrencyCode => "cc".into(),
            Variable::Channel => "ch".into(),
            Variable::Campaign => "v0".into(),
            Variable::Prop(n) => format!("c{n}"),
            Variable::EVar(n) => format!("v{n}"),
            Variable::Hier(n) => format!("h{n}"),
            other => other.name(),
        }
    }

    pub fn max_len(&self) -> Option<usize> {
        match self {
            Variable::Hier(_) => Some(HIER_MAX_LEN),
            _ => None,
        }
    }

    /// Sent on link calls regardless of the link variable list.
    pub fn is_core(&self) -> bool {
        NAMED[..CORE_COUNT].contains(self)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Variable {
    type Err = BeaconError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let name = raw.trim();
        let name = name.strip_prefix("s_").unwrap_or(name);
        if let Some(named) = NAMED.iter().find(|v| v.name() == name) {
            return Ok(*named);
        }
        let slot = |prefix: &str| -> Option<u8> {
            name.strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=SLOT_COUNT).contains(n))
        };
        if let Some(n) = slot("prop") {
            return Ok(Variable::Prop(n));
        }
        if let Some(n) = slot("eVar") {
            return Ok(Variable::EVar(n));
        }
        if let Some(n) = slot("hier") {
            return Ok(Variable::Hier(n));
        }
        Err(BeaconError::Config(format!("unknown tracked variable '{raw}'")))
    }
}

/// Which variables a call may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope<'a> {
    PageView,
    /// Link or interaction call, filtered by the link variable and event
    /// lists.
    Interaction {
        track_vars: &'a str,
        track_events: &'a str,
    },
}

impl VarScope<'_> {
    fn admits(&self, var: Variable) -> bool {
        match self {
            VarScope::PageView => true,
            VarScope::Interaction { track_vars, .. } => {
                track_vars.trim().is_empty()
                    || var.is_core()
                    || list_contains(track_vars, &var.name())
            }
        }
    }
}

/// Current values of the tracked variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    values: HashMap<Variable, String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: Variable) -> &str {
        self.values.get(&var).map(String::as_str).unwrap_or_default()
    }

    pub fn set(&mut self, var: Variable, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.values.remove(&var);
        } else {
            self.values.insert(var, value);
        }
    }

    pub fn clear(&mut self, var: Variable) {
        self.values.remove(&var);
    }

    pub fn is_set(&self, var: Variable) -> bool {
        self.values.contains_key(&var)
    }

    /// `&code=value` pairs for every non-empty admitted variable, in order.
    pub fn serialize(&self, scope: VarScope<'_>, codec: Codec) -> String {
        let mut out = String::new();
        for var in Variable::ordered() {
            if matches!(var, Variable::LinkName | Variable::LinkType) || !scope.admits(var) {
                continue;
            }
            let mut value = self.get(var).to_string();
            if value.is_empty() {
                continue;
            }
            match var {
                Variable::CharSet if codec.mode() == EscapeMode::Utf8Bytes => {
                    value = "UTF-8".into();
                }
                Variable::Events => {
                    if let VarScope::Interaction { track_events, .. } = scope {
                        if !track_events.trim().is_empty() {
                            value = filter_events(&value, track_events);
                        }
                    }
                }
                _ => {}
            }
            if let Some(max) = var.max_len() {
                value = truncate(&value, max);
            }
            if value.is_empty() {
                continue;
            }
            out.push('&');
            out.push_str(&var.wire_code());
            out.push('=');
            out.push_str(&codec.ape(&value));
        }
        out
    }
}

/// Keep events whose base name (before `:`) appears in `filter`, preserving
/// the order of `events`.
pub fn filter_events(events: &str, filter: &str) -> String {
    events
        .split(',')
        .filter(|event| !event.is_empty() && list_contains(filter, event))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether a comma list names `item` (list entries may carry `s_`, `item`
/// may carry a `:` suffix).
pub fn list_contains(list: &str, item: &str) -> bool {
    let base = item.split(':').next().unwrap_or_default().trim();
    !base.is_empty()
        && list.split(',').any(|entry| {
            let entry = entry.trim();
            entry.strip_prefix("s_").unwrap_or(entry) == base
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_count() {
        let all: Vec<Variable> = Variable::ordered().collect();
        assert_eq!(all.len(), 22 + 150);
        assert_eq!(all[0], Variable::Vmk);
        assert_eq!(all[22], Variable::Prop(1));
        assert_eq!(all[23], Variable::EVar(1));
        assert_eq!(all[24], Variable::Hier(1));
        assert_eq!(*all.last().unwrap(), Variable::Hier(50));
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(Variable::PageUrl.wire_code(), "g");
        assert_eq!(Variable::Campaign.wire_code(), "v0");
        assert_eq!(Variable::Prop(7).wire_code(), "c7");
        assert_eq!(Variable::EVar(12).wire_code(), "v12");
        assert_eq!(Variable::Hier(3).wire_code(), "h3");
        assert_eq!(Variable::PageName.wire_code(), "pageName");
        assert_eq!(Variable::PurchaseId.wire_code(), "purchaseID");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("eVar7".parse::<Variable>().unwrap(), Variable::EVar(7));
        assert_eq!("s_campaign".parse::<Variable>().unwrap(), Variable::Campaign);
        assert_eq!("pageURL".parse::<Variable>().unwrap(), Variable::PageUrl);
        assert!("prop51".parse::<Variable>().is_err());
        assert!("prop0".parse::<Variable>().is_err());
        assert!("bogus".parse::<Variable>().is_err());
    }

    #[test]
    fn test_serialize_page_view() {
        let mut vars = VariableSet::new();
        vars.set(Variable::PageName, "Home Page");
        vars.set(Variable::Campaign, "SPRING");
        vars.set(Variable::Prop(2), "a+b");
        vars.set(Variable::LinkName, "ignored");
        let out = vars.serialize(VarScope::PageView, Codec::default());
        assert_eq!(out, "&pageName=Home%20Page&v0=SPRING&c2=a%2Bb");
    }

    #[test]
    fn test_serialize_caps_hier() {
        let mut vars = VariableSet::new();
        vars.set(Variable::Hier(1), "x".repeat(300));
        let out = vars.serialize(VarScope::PageView, Codec::default());
        assert_eq!(out.len(), "&h1=".len() + 255);
    }

    #[test]
    fn test_serialize_link_scope_filters_vars() {
        let mut vars = VariableSet::new();
        vars.set(Variable::PageName, "Home");
        vars.set(Variable::Campaign, "SPRING");
        vars.set(Variable::Prop(1), "p1");
        let scope = VarScope::Interaction {
            track_vars: "campaign",
            track_events: "None",
        };
        assert_eq!(vars.serialize(scope, Codec::default()), "&pageName=Home&v0=SPRING");

        let none = VarScope::Interaction {
            track_vars: "None",
            track_events: "None",
        };
        assert_eq!(vars.serialize(none, Codec::default()), "&pageName=Home");

        let all = VarScope::Interaction {
            track_vars: "",
            track_events: "",
        };
        assert_eq!(
            vars.serialize(all, Codec::default()),
            "&pageName=Home&v0=SPRING&c1=p1"
        );
    }

    #[test]
    fn test_serialize_link_scope_filters_events() {
        let mut vars = VariableSet::new();
        vars.set(Variable::Events, "event1,purchase:ord9,event3");
        let scope = VarScope::Interaction {
            track_vars: "events",
            track_events: "event3,purchase",
        };
        assert_eq!(
            vars.serialize(scope, Codec::default()),
            "&events=purchase%3Aord9%2Cevent3"
        );

        let none = VarScope::Interaction {
            track_vars: "events",
            track_events: "None",
        };
        assert_eq!(vars.serialize(none, Codec::default()), "");
    }

    #[test]
    fn test_char_set_forced_to_utf8() {
        let mut vars = VariableSet::new();
        vars.set(Variable::CharSet, "ISO-8859-1");
        let utf8 = Codec::new(EscapeMode::Utf8Bytes, true);
        assert_eq!(vars.serialize(VarScope::PageView, utf8), "&ce=UTF-8");
        assert_eq!(
            vars.serialize(VarScope::PageView, Codec::default()),
            "&ce=ISO-8859-1"
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a tracked link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Download,
    External,
    /// Any other explicitly tracked link or custom interaction.
    Custom,
}

impl LinkType {
    /// Short code used in `pe=lnk_<code>`.
    pub fn wire_code(&self) -> &'static str {
        match self {
            LinkType::Download => "d",
            LinkType::External => "e",
            LinkType::Custom => "o",
        }
    }

    /// Interpret a caller-supplied link type. `d`/`e` (any case) and the long
    /// names map to their classes; anything else non-empty is custom.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "d" | "download" => Some(LinkType::Download),
            "e" | "external" => Some(LinkType::External),
            _ => Some(LinkType::Custom),
        }
    }
}

/// Outcome reported for an instrumented form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormOutcome {
    Success,
    Error,
    Abandon,
}

impl FormOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FormOutcome::Success => "Success",
            FormOutcome::Error => "Error",
            FormOutcome::Abandon => "Abandon",
        }
    }

    /// Position of this outcome's event in the configured event list
    /// (abandon, success, error).
    pub fn event_index(&self) -> usize {
        match self {
            FormOutcome::Abandon => 0,
            FormOutcome::Success => 1,
            FormOutcome::Error => 2,
        }
    }
}

/// What caused a beacon to be sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BeaconKind {
    PageView,
    Link,
}

/// How a beacon left the page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Image,
    DocumentWrite,
}

/// A dispatched beacon, as reported on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconRecord {
    pub record_id: Uuid,
    pub instance: usize,
    pub accounts: String,
    pub kind: BeaconKind,
    pub delivery: DeliveryMethod,
    pub url: String,
    /// Whether the caller was held for the pre-navigation delay.
    pub delayed: bool,
    pub truncated: bool,
    pub timestamp: DateTime<Utc>,
}

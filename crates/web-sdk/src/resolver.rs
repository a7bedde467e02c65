//! Click target resolution and link classification.

use beacon_core::types::LinkType;
use beacon_core::{BeaconError, BeaconResult, TrackerConfig};
use serde::Serialize;

use crate::dom::{Document, Element, NodeId};
use crate::encoding::truncate;
use crate::host::PageLocation;

const IDENTIFIER_MAX_LEN: usize = 100;

/// How an object identifier was derived (`oidt` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// Link href or image src.
    Href,
    /// Page-assigned object id.
    ObjectId,
    /// Click handler source.
    Handler,
    /// Field value.
    Value,
}

impl IdentifierKind {
    pub fn code(&self) -> u8 {
        match self {
            IdentifierKind::Href => 0,
            IdentifierKind::ObjectId => 1,
            IdentifierKind::Handler => 2,
            IdentifierKind::Value => 3,
        }
    }
}

/// Upper-cased `type`, else tag name; `A` for bare hyperlinks.
pub fn object_type(el: &Element) -> String {
    if let Some(t) = el.input_type.as_deref().filter(|t| !t.is_empty()) {
        return t.to_ascii_uppercase();
    }
    if !el.tag.is_empty() {
        return el.tag.to_ascii_uppercase();
    }
    if el.href.is_some() {
        return "A".into();
    }
    String::new()
}

/// Identifier of `node`, computed once and cached on the document.
pub fn object_identifier(doc: &mut Document, node: NodeId) -> Option<(String, IdentifierKind)> {
    if let Some(cached) = doc.cached_identifier(node) {
        return Some(cached.clone());
    }
    let el = doc.get(node)?;
    let (raw, kind) = derive_identifier(el)?;
    let identifier = truncate(&raw, IDENTIFIER_MAX_LEN);
    doc.cache_identifier(node, identifier.clone(), kind);
    Some((identifier, kind))
}

fn derive_identifier(el: &Element) -> Option<(String, IdentifierKind)> {
    let t = object_type(el);
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(href) = non_empty(&el.href) {
        let scripted = el
            .protocol
            .as_deref()
            .map(|p| p.to_ascii_lowercase().contains("javascript"))
            .unwrap_or_else(|| href.trim_start().to_ascii_lowercase().starts_with("javascript:"));
        if (t == "A" || t == "AREA") && !scripted {
            return Some((href, IdentifierKind::Href));
        }
    }
    if let Some(handler) = non_empty(&el.click_handler) {
        let stripped: String = handler
            .chars()
            .filter(|c| !matches!(c, '\r' | '\n' | '\t' | ' '))
            .collect();
        return Some((stripped, IdentifierKind::Handler));
    }
    if let Some(value) = non_empty(&el.value) {
        if t == "INPUT" || t == "SUBMIT" {
            return Some((value, IdentifierKind::Value));
        }
    }
    if let Some(src) = non_empty(&el.src) {
        if t == "IMAGE" {
            return Some((src, IdentifierKind::Href));
        }
    }
    None
}

/// Walk from the clicked element towards the body until something
/// identifiable is found.
pub fn resolve_click_target(doc: &mut Document, start: NodeId) -> BeaconResult<NodeId> {
    let mut node = start;
    loop {
        let el = doc
            .get(node)
            .ok_or_else(|| BeaconError::Resolution(format!("unknown node {}", node.0)))?;
        let t = object_type(el);
        if object_identifier(doc, node).is_some() {
            break;
        }
        if t == "BODY" {
            return Err(BeaconError::Resolution("reached body without an identifier".into()));
        }
        node = doc
            .parent(node)
            .ok_or_else(|| BeaconError::Resolution("element is detached".into()))?;
    }

    let handler = doc
        .get(node)
        .and_then(|el| el.click_handler.as_deref())
        .unwrap_or_default();
    if handler.contains(".tl(") {
        return Err(BeaconError::Resolution(
            "element reports its own clicks".into(),
        ));
    }
    Ok(node)
}

/// Absolute href for a link. Relative hrefs are rebuilt from the element's
/// location parts, falling back to the page location.
pub fn normalize_href(el: &Element, page: &PageLocation) -> String {
    let Some(href) = el.href.as_deref().filter(|h| !h.is_empty()) else {
        return String::new();
    };
    if href.contains("http") || href.contains("file") {
        return href.to_string();
    }
    let joined = page.join(href);
    let part = |own: &Option<String>, derived: Option<&str>| -> Option<String> {
        own.as_deref()
            .filter(|s| !s.is_empty())
            .or(derived.filter(|s| !s.is_empty()))
            .map(str::to_string)
    };

    let protocol = part(&el.protocol, joined.as_ref().map(|j| j.protocol.as_str()))
        .unwrap_or_else(|| page.protocol.clone());
    let hostname = part(&el.hostname, joined.as_ref().map(|j| j.hostname.as_str()))
        .unwrap_or_else(|| page.hostname.clone());
    let pathname = part(&el.pathname, joined.as_ref().map(|j| j.pathname.as_str()))
        .unwrap_or_default();
    let search = part(&el.search, joined.as_ref().map(|j| j.search.as_str()))
        .map(|s| if s.starts_with('?') { s } else { format!("?{s}") })
        .unwrap_or_default();

    format!("{protocol}//{hostname}{pathname}{search}")
}

/// Drop everything from the first `?` unless `leave` is set.
pub fn strip_query(href: &str, leave: bool) -> &str {
    if leave {
        return href;
    }
    match href.find('?') {
        Some(idx) => &href[..idx],
        None => href,
    }
}

/// Link classification and friendly names from the tracker configuration.
pub struct LinkClassifier<'a> {
    config: &'a TrackerConfig,
    hostname: &'a str,
}

impl<'a> LinkClassifier<'a> {
    pub fn new(config: &'a TrackerConfig, hostname: &'a str) -> Self {
        Self { config, hostname }
    }

    /// Download when the extension matches, external when the href fails
    /// the internal filters, otherwise `None`.
    pub fn classify(&self, href: &str) -> Option<LinkType> {
        let href = href.to_ascii_lowercase();
        let path = strip_query(&href, false);

        if self.config.track_download_links
            && entries(&self.config.link_download_file_types)
                .any(|ext| path.ends_with(&format!(".{}", ext.to_ascii_lowercase())))
        {
            return Some(LinkType::Download);
        }

        if self.config.track_external_links {
            let internal = if self.config.link_internal_filters.trim().is_empty() {
                self.hostname
            } else {
                self.config.link_internal_filters.as_str()
            };
            let external = self.config.link_external_filters.as_str();
            let contains = |list: &str| entries(list).any(|f| href.contains(&f.to_ascii_lowercase()));

            let has_filters = !internal.trim().is_empty() || !external.trim().is_empty();
            let passes_external = external.trim().is_empty() || contains(external);
            let is_internal = !internal.trim().is_empty() && contains(internal);
            if has_filters && passes_external && !is_internal {
                return Some(LinkType::External);
            }
        }
        None
    }

    /// First configured `name=match` whose match occurs in the href.
    pub fn friendly_name(&self, href: &str) -> Option<String> {
        let href = href.to_ascii_lowercase();
        entries(&self.config.link_names).find_map(|entry| {
            let (name, pattern) = entry.split_once('=')?;
            let pattern = pattern.trim().to_ascii_lowercase();
            (!name.is_empty() && !pattern.is_empty() && href.contains(&pattern))
                .then(|| name.trim().to_string())
        })
    }
}

fn entries(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

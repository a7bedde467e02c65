//! Minimal document model with ordered handler chains.
//!
//! Each (target, event) pair owns a list of handlers invoked in order. The
//! tracker never replaces a page handler: it registers its own entries in
//! the same chain, and the last handler's return value controls the default
//! action.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::resolver::IdentifierKind;

/// Index of an element in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Upper-case tag name; empty for bare hyperlink objects.
    pub tag: String,
    /// Upper-case `type` attribute for form fields.
    pub input_type: Option<String>,
    pub name: Option<String>,
    pub href: Option<String>,
    pub protocol: Option<String>,
    pub hostname: Option<String>,
    pub pathname: Option<String>,
    pub search: Option<String>,
    pub target: Option<String>,
    pub value: Option<String>,
    pub src: Option<String>,
    /// Source text of an inline click handler.
    pub click_handler: Option<String>,
    pub source_index: Option<usize>,
    /// Set by [`Document::append`].
    pub parent: Option<NodeId>,
    /// Owning form, derived from the ancestor chain.
    pub form: Option<NodeId>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_uppercase(),
            ..Default::default()
        }
    }

    pub fn anchor(href: &str) -> Self {
        Self::new("A").with_href(href)
    }

    pub fn input(input_type: &str, name: &str) -> Self {
        Self::new("INPUT")
            .with_type(input_type)
            .with_name(name)
    }

    pub fn form(name: &str) -> Self {
        Self::new("FORM").with_name(name)
    }

    pub fn with_type(mut self, input_type: &str) -> Self {
        self.input_type = Some(input_type.to_ascii_uppercase());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_href(mut self, href: &str) -> Self {
        self.href = Some(href.to_string());
        if let Some((scheme, _)) = href.split_once(':') {
            if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphabetic()) {
                self.protocol = Some(format!("{}:", scheme.to_ascii_lowercase()));
            }
        }
        self
    }

    /// Explicit location parts, as a browser exposes them on anchors.
    pub fn with_location_parts(
        mut self,
        protocol: Option<&str>,
        hostname: Option<&str>,
        pathname: Option<&str>,
        search: Option<&str>,
    ) -> Self {
        self.protocol = protocol.map(str::to_string);
        self.hostname = hostname.map(str::to_string);
        self.pathname = pathname.map(str::to_string);
        self.search = search.map(str::to_string);
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn with_src(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }

    pub fn with_click_handler(mut self, source: &str) -> Self {
        self.click_handler = Some(source.to_string());
        self
    }

    pub fn with_source_index(mut self, index: usize) -> Self {
        self.source_index = Some(index);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventTarget {
    Window,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Load,
    Unload,
    Click,
    MouseDown,
    KeyDown,
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

/// A dispatched host event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomEvent {
    pub kind: EventKind,
    /// Element the event originated on, if any.
    pub target: Option<NodeId>,
    /// Element whose chain is currently running.
    pub current: EventTarget,
    pub button: MouseButton,
    pub key_code: Option<u32>,
}

impl DomEvent {
    pub fn window(kind: EventKind) -> Self {
        Self {
            kind,
            target: None,
            current: EventTarget::Window,
            button: MouseButton::Left,
            key_code: None,
        }
    }

    pub fn on(kind: EventKind, node: NodeId) -> Self {
        Self {
            kind,
            target: Some(node),
            current: EventTarget::Node(node),
            button: MouseButton::Left,
            key_code: None,
        }
    }
}

/// Tracker entry points that can sit in a handler chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerHook {
    /// Body-level click capture.
    BodyClick,
    /// Per-link click observer.
    LinkClick,
    /// Window load observer that instruments every link.
    LinkWrap,
    /// Window load observer that instruments forms.
    FormSetup,
    FormSubmit,
    FieldInteraction,
    FormUnload,
}

pub type NativeHandler = Arc<dyn Fn(&DomEvent) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Handler {
    /// Page-supplied handler.
    Native(NativeHandler),
    Tracker { instance: usize, hook: TrackerHook },
}

impl Handler {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&DomEvent) -> bool + Send + Sync + 'static,
    {
        Handler::Native(Arc::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Native(_) => f.write_str("Native"),
            Handler::Tracker { instance, hook } => f
                .debug_struct("Tracker")
                .field("instance", instance)
                .field("hook", hook)
                .finish(),
        }
    }
}

/// Element arena plus handler chains.
#[derive(Debug)]
pub struct Document {
    elements: Vec<Element>,
    body: NodeId,
    identifiers: HashMap<NodeId, (String, IdentifierKind)>,
    chains: HashMap<(EventTarget, EventKind), Vec<Handler>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            elements: vec![Element::new("BODY")],
            body: NodeId(0),
            identifiers: HashMap::new(),
            chains: HashMap::new(),
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Insert `element` under `parent`, returning its id.
    pub fn append(&mut self, parent: NodeId, mut element: Element) -> NodeId {
        let id = NodeId(self.elements.len());
        element.parent = Some(parent);
        if element.form.is_none() {
            element.form = self.enclosing_form(parent);
        }
        self.elements.push(element);
        id
    }

    /// Insert an element with no parent (detached from the body).
    pub fn append_detached(&mut self, element: Element) -> NodeId {
        let id = NodeId(self.elements.len());
        self.elements.push(Element {
            parent: None,
            ..element
        });
        id
    }

    fn enclosing_form(&self, start: NodeId) -> Option<NodeId> {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let el = self.get(id)?;
            if el.tag == "FORM" {
                return Some(id);
            }
            cursor = el.parent;
        }
        None
    }

    pub fn get(&self, id: NodeId) -> Option<&Element> {
        self.elements.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.elements.get_mut(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|el| el.parent)
    }

    /// Hyperlinks in document order.
    pub fn links(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| {
                self.get(*id)
                    .is_some_and(|el| el.href.is_some() && matches!(el.tag.as_str(), "A" | "AREA" | ""))
            })
            .collect()
    }

    pub fn forms(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.get(*id).is_some_and(|el| el.tag == "FORM"))
            .collect()
    }

    /// Typed fields belonging to `form`.
    pub fn form_elements(&self, form: NodeId) -> Vec<NodeId> {
        self.ids()
            .filter(|id| {
                self.get(*id)
                    .is_some_and(|el| el.form == Some(form) && el.input_type.is_some())
            })
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.ids()
            .find(|id| self.get(*id).and_then(|el| el.name.as_deref()) == Some(name))
    }

    fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.elements.len()).map(NodeId)
    }

    pub(crate) fn cached_identifier(&self, id: NodeId) -> Option<&(String, IdentifierKind)> {
        self.identifiers.get(&id)
    }

    pub(crate) fn cache_identifier(&mut self, id: NodeId, identifier: String, kind: IdentifierKind) {
        self.identifiers.insert(id, (identifier, kind));
    }

    /// Append to the end of a chain.
    pub fn add_listener(&mut self, target: EventTarget, kind: EventKind, handler: Handler) {
        self.chains.entry((target, kind)).or_default().push(handler);
    }

    /// Put a tracker observer in front of the existing chain.
    pub fn wrap(&mut self, target: EventTarget, kind: EventKind, handler: Handler) {
        self.chains.entry((target, kind)).or_default().insert(0, handler);
    }

    pub fn has_tracker_hook(
        &self,
        target: EventTarget,
        kind: EventKind,
        instance: usize,
        hook: TrackerHook,
    ) -> bool {
        self.chains.get(&(target, kind)).is_some_and(|chain| {
            chain.iter().any(|h| {
                matches!(h, Handler::Tracker { instance: i, hook: k } if *i == instance && *k == hook)
            })
        })
    }

    /// Snapshot of a chain, so handlers may mutate the document while it runs.
    pub fn handlers(&self, target: EventTarget, kind: EventKind) -> Vec<Handler> {
        self.chains.get(&(target, kind)).cloned().unwrap_or_default()
    }
}

//! Page session — owns the document, the tracker registry and the host, and
//! drives host events through the handler chains.

use std::sync::Arc;

use beacon_core::event_bus::{noop_sink, BeaconSink};
use beacon_core::{BeaconResult, TrackerConfig};
use tracing::{debug, info, warn};

use crate::accounts::{active_accounts, Acquired, SharedTracker, TrackerRegistry};
use crate::dom::{Document, DomEvent, EventKind, EventTarget, Handler, MouseButton, NodeId, TrackerHook};
use crate::host::Host;
use crate::tracker::Tracker;
use crate::transport::{BusyWait, Delay};

/// One loaded page and every tracker instance on it.
pub struct Page {
    host: Arc<dyn Host>,
    document: Document,
    registry: TrackerRegistry,
    sink: Arc<dyn BeaconSink>,
    delay: Arc<dyn Delay>,
}

impl Page {
    pub fn new(host: Arc<dyn Host>, document: Document) -> Self {
        Self {
            host,
            document,
            registry: TrackerRegistry::new(),
            sink: noop_sink(),
            delay: Arc::new(BusyWait),
        }
    }

    /// Attach a sink that observes every beacon.
    pub fn with_sink(mut self, sink: Arc<dyn BeaconSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    /// Tracker for `accounts` (the configured account when empty), matched
    /// after dynamic account selection. Reuses an instance reporting to the
    /// same accounts, clones one whose list contains them, or creates and
    /// instruments a new one.
    pub fn tracker(&mut self, accounts: &str, mut config: TrackerConfig) -> BeaconResult<SharedTracker> {
        config.validate()?;
        if !accounts.trim().is_empty() {
            config.account = accounts.trim().to_string();
        }
        let wanted = active_accounts(&config, &config.account, &self.host.location().hostname);
        let host = self.host.clone();
        let sink = self.sink.clone();
        let delay = self.delay.clone();
        let (shared, how) = self.registry.acquire(&wanted, move |index| {
            Tracker::new(index, config, host, sink, delay)
        });
        if how == Acquired::Created {
            self.instrument(&shared.lock());
        }
        Ok(shared)
    }

    fn instrument(&mut self, tracker: &Tracker) {
        let instance = tracker.instance();
        let doc = &mut self.document;
        let body = doc.body();
        if tracker.environment().body_click_capture() {
            doc.wrap(
                EventTarget::Node(body),
                EventKind::Click,
                Handler::Tracker {
                    instance,
                    hook: TrackerHook::BodyClick,
                },
            );
        } else {
            doc.wrap(
                EventTarget::Window,
                EventKind::Load,
                Handler::Tracker {
                    instance,
                    hook: TrackerHook::LinkWrap,
                },
            );
        }
        if tracker.config().form_analysis.enabled {
            doc.wrap(
                EventTarget::Window,
                EventKind::Load,
                Handler::Tracker {
                    instance,
                    hook: TrackerHook::FormSetup,
                },
            );
        }
        info!(
            instance,
            body_capture = tracker.environment().body_click_capture(),
            forms = tracker.config().form_analysis.enabled,
            "Tracker observers installed"
        );
    }

    /// Window load.
    pub fn load(&mut self) -> bool {
        self.dispatch(DomEvent::window(EventKind::Load))
    }

    /// Window unload.
    pub fn unload(&mut self) -> bool {
        self.dispatch(DomEvent::window(EventKind::Unload))
    }

    /// Click on `node`, bubbling up to the body. Returns whether the default
    /// action may proceed.
    pub fn click(&mut self, node: NodeId) -> bool {
        let mut allowed = true;
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            let event = DomEvent {
                current: EventTarget::Node(current),
                ..DomEvent::on(EventKind::Click, node)
            };
            allowed &= self.dispatch(event);
            cursor = self.document.parent(current);
        }
        allowed
    }

    pub fn mouse_down(&mut self, node: NodeId, button: MouseButton) -> bool {
        self.dispatch(DomEvent {
            button,
            ..DomEvent::on(EventKind::MouseDown, node)
        })
    }

    pub fn key_down(&mut self, node: NodeId, key_code: u32) -> bool {
        self.dispatch(DomEvent {
            key_code: Some(key_code),
            ..DomEvent::on(EventKind::KeyDown, node)
        })
    }

    /// Submit of `form`. Returns whether the submission proceeds.
    pub fn submit(&mut self, form: NodeId) -> bool {
        self.dispatch(DomEvent::on(EventKind::Submit, form))
    }

    /// Run the chain for `event.current`. The last handler's result wins; an
    /// empty chain allows the default action. Form submit hooks run after
    /// the chain and only when the submission proceeds.
    fn dispatch(&mut self, event: DomEvent) -> bool {
        let chain = self.document.handlers(event.current, event.kind);
        let mut result = true;
        let mut on_proceed = Vec::new();
        for handler in chain {
            result = match handler {
                Handler::Native(f) => f(&event),
                Handler::Tracker {
                    instance,
                    hook: TrackerHook::FormSubmit,
                } => {
                    on_proceed.push(instance);
                    true
                }
                Handler::Tracker { instance, hook } => {
                    self.run_tracker_hook(instance, hook, &event);
                    true
                }
            };
        }
        if result {
            for instance in on_proceed {
                self.run_tracker_hook(instance, TrackerHook::FormSubmit, &event);
            }
        } else if !on_proceed.is_empty() {
            debug!(current = ?event.current, "Submit vetoed, form outcome deferred");
        }
        result
    }

    fn run_tracker_hook(&mut self, instance: usize, hook: TrackerHook, event: &DomEvent) {
        let shared = match self.registry.get(instance) {
            Ok(shared) => shared,
            Err(e) => {
                warn!(error = %e, hook = ?hook, "Tracker hook without instance");
                return;
            }
        };
        let mut tracker = shared.lock();
        let doc = &mut self.document;
        match (hook, event.current) {
            (TrackerHook::BodyClick, _) => {
                if let Some(target) = event.target {
                    tracker.handle_body_click(doc, target);
                }
            }
            (TrackerHook::LinkClick, EventTarget::Node(link)) => {
                tracker.track_link_click(doc, link);
            }
            (TrackerHook::LinkWrap, _) => {
                let count = instrument_links(doc, instance);
                debug!(instance, links = count, "Links instrumented");
            }
            (TrackerHook::FormSetup, _) => {
                tracker.instrument_forms(doc);
            }
            (TrackerHook::FormSubmit, EventTarget::Node(form)) => {
                tracker.form_submit(doc, form);
            }
            (TrackerHook::FieldInteraction, _) => tracker.form_field_event(doc, event),
            (TrackerHook::FormUnload, _) => {
                tracker.form_unload();
            }
            (hook, current) => {
                debug!(instance, hook = ?hook, current = ?current, "Hook ignored for target");
            }
        }
    }
}

/// Put a click observer on every link that does not report itself.
pub fn instrument_links(doc: &mut Document, instance: usize) -> usize {
    let mut count = 0;
    for link in doc.links() {
        let self_reporting = doc
            .get(link)
            .and_then(|el| el.click_handler.as_deref())
            .is_some_and(|h| h.contains(".tl("));
        let target = EventTarget::Node(link);
        if self_reporting
            || doc.has_tracker_hook(target, EventKind::Click, instance, TrackerHook::LinkClick)
        {
            continue;
        }
        doc.wrap(
            target,
            EventKind::Click,
            Handler::Tracker {
                instance,
                hook: TrackerHook::LinkClick,
            },
        );
        count += 1;
    }
    count
}

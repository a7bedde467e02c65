//! Form interaction analysis.
//!
//! Each instrumented form moves through `Idle -> FieldTouched -> Submitting`
//! and back to `Idle`. A qualifying mousedown or keydown on a field records
//! the (form, field) pair; a submit of that form reports Success and a page
//! unload with a pair still pending reports Abandon. Callers may also report
//! Success or Error themselves. Every outcome is sent as a custom link named
//! `Form Analysis`.

use beacon_core::types::{BeaconRecord, FormOutcome, LinkType};
use beacon_core::FormAnalysisConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dom::{Document, DomEvent, EventKind, EventTarget, Handler, MouseButton, NodeId, TrackerHook};
use crate::tracker::{CallOptions, TrackedObject, Tracker};
use crate::variables::Variable;

/// Link name of every form outcome beacon.
pub const FORM_LINK_NAME: &str = "Form Analysis";

const KEY_TAB: u32 = 9;
const KEY_ENTER: u32 = 13;

const LEFT_CLICK_TYPES: [&str; 9] = [
    "BUTTON",
    "SUBMIT",
    "RESET",
    "IMAGE",
    "RADIO",
    "CHECKBOX",
    "SELECT-ONE",
    "SELECT-MULTIPLE",
    "FILE",
];
const RIGHT_CLICK_TYPES: [&str; 3] = ["TEXTAREA", "PASSWORD", "FILE"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FormState {
    Idle,
    FieldTouched { form: String, field: String },
    Submitting { form: String, field: String },
}

/// An outcome ready to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormEvent {
    pub outcome: FormOutcome,
    /// Page label supplied by the caller; derived when `None`.
    pub page: Option<String>,
    pub form: String,
    /// Last touched field, or the caller's reason.
    pub detail: String,
}

/// Whether an event on a field of `field_type` counts as an interaction.
pub fn qualifies(
    kind: EventKind,
    button: MouseButton,
    key_code: Option<u32>,
    field_type: &str,
) -> bool {
    let field_type = field_type.to_ascii_uppercase();
    match kind {
        EventKind::MouseDown if button == MouseButton::Right => {
            RIGHT_CLICK_TYPES.contains(&field_type.as_str())
        }
        EventKind::MouseDown => LEFT_CLICK_TYPES.contains(&field_type.as_str()),
        EventKind::KeyDown => !matches!(key_code, Some(KEY_TAB) | Some(KEY_ENTER)),
        _ => false,
    }
}

/// Per-tracker form state.
#[derive(Debug, Clone)]
pub struct FormAnalysis {
    config: FormAnalysisConfig,
    state: FormState,
}

impl FormAnalysis {
    pub fn new(config: FormAnalysisConfig) -> Self {
        Self {
            config,
            state: FormState::Idle,
        }
    }

    pub fn config(&self) -> &FormAnalysisConfig {
        &self.config
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    /// Include/exclude list check, case-insensitive. Unnamed forms are never
    /// tracked.
    pub fn tracks_form(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let listed = self
            .config
            .form_list
            .split(',')
            .any(|entry| entry.trim().eq_ignore_ascii_case(name));
        listed == self.config.track_form_list
    }

    /// Remember the most recently touched field, replacing any earlier pair.
    pub fn record_interaction(&mut self, form: &str, field: &str) {
        if !self.tracks_form(form) {
            return;
        }
        debug!(form = %form, field = %field, "Form field touched");
        self.state = FormState::FieldTouched {
            form: form.to_string(),
            field: field.to_string(),
        };
    }

    /// Submit of `form`. Yields Success when a field of that form was
    /// touched. The state is always cleared.
    pub fn on_submit(&mut self, form: &str) -> Option<FormEvent> {
        let state = std::mem::replace(&mut self.state, FormState::Idle);
        let FormState::FieldTouched { form: touched, field } = state else {
            return None;
        };
        if !touched.eq_ignore_ascii_case(form) {
            debug!(form = %form, pending = %touched, "Submit for another form, pending pair dropped");
            return None;
        }
        self.state = FormState::Submitting {
            form: touched.clone(),
            field: field.clone(),
        };
        Some(FormEvent {
            outcome: FormOutcome::Success,
            page: None,
            form: touched,
            detail: field,
        })
    }

    /// Page unload. Yields Abandon when a pair is pending.
    pub fn on_unload(&mut self) -> Option<FormEvent> {
        match std::mem::replace(&mut self.state, FormState::Idle) {
            FormState::FieldTouched { form, field } => Some(FormEvent {
                outcome: FormOutcome::Abandon,
                page: None,
                form,
                detail: field,
            }),
            _ => None,
        }
    }

    /// Return to `Idle` once an outcome has been reported.
    pub fn finish(&mut self) {
        self.state = FormState::Idle;
    }

    /// `[page:]form:Outcome[:(detail)]`, or `[page:]form[:(detail)]` in
    /// commerce mode. `page_name` is the tracker's page name and
    /// `host_path` the page host plus path.
    pub fn describe(&self, event: &FormEvent, page_name: &str, host_path: &str) -> String {
        let page = if page_name.is_empty() && self.config.track_page_name {
            host_path.to_string()
        } else {
            event
                .page
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| page_name.to_string())
        };

        let mut out = String::new();
        if self.config.track_page_name {
            out.push_str(&page);
            out.push(':');
        }
        out.push_str(&event.form);
        if !self.config.use_commerce {
            out.push(':');
            out.push_str(event.outcome.label());
        }
        if event.outcome != FormOutcome::Success {
            out.push_str(&format!(":({})", event.detail));
        }
        out
    }

    /// Configured commerce event for `outcome`.
    pub fn commerce_event(&self, outcome: FormOutcome) -> Option<String> {
        self.config
            .event_list
            .split(',')
            .nth(outcome.event_index())
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }

    /// Link variable list extended with what this outcome sets.
    pub fn extend_track_vars(&self, current: &str) -> String {
        let var = self.config.var_used.as_deref().unwrap_or_default();
        let mut added: Vec<&str> = Vec::new();
        if self.config.use_commerce {
            added.push("events");
        }
        if !var.is_empty() {
            added.push(var);
        }
        extend_list(current, &added.join(","))
    }

    /// Link event list extended with the configured commerce events.
    pub fn extend_track_events(&self, current: &str) -> String {
        if self.config.use_commerce {
            extend_list(current, &self.config.event_list)
        } else {
            current.to_string()
        }
    }
}

/// `None` is the "nothing" list; otherwise append.
fn extend_list(current: &str, added: &str) -> String {
    if added.is_empty() {
        return current.to_string();
    }
    if current.trim().eq_ignore_ascii_case("none") || current.trim().is_empty() {
        added.to_string()
    } else {
        format!("{current},{added}")
    }
}

impl Tracker {
    /// Report a caller-determined outcome. Anything but Success is reported
    /// as Error with `reason` as detail.
    pub fn send_form_event(
        &mut self,
        outcome: FormOutcome,
        page: Option<&str>,
        form: &str,
        reason: &str,
    ) -> Option<BeaconRecord> {
        if form.is_empty() {
            debug!(instance = self.instance(), "Form event without a form name ignored");
            return None;
        }
        let (outcome, detail) = match outcome {
            FormOutcome::Success => (FormOutcome::Success, FormOutcome::Success.label().to_string()),
            _ => (FormOutcome::Error, reason.to_string()),
        };
        self.report_form_event(FormEvent {
            outcome,
            page: page.map(str::to_string),
            form: form.to_string(),
            detail,
        })
    }

    /// Install submit, field and unload observers for every tracked form.
    /// Returns the number of forms instrumented.
    pub fn instrument_forms(&self, doc: &mut Document) -> usize {
        let instance = self.instance();
        let hook = |hook| Handler::Tracker { instance, hook };
        let mut count = 0;
        for form in doc.forms() {
            let name = doc
                .get(form)
                .and_then(|el| el.name.clone())
                .unwrap_or_default();
            if !self.forms.tracks_form(&name) {
                continue;
            }
            let target = EventTarget::Node(form);
            if !doc.has_tracker_hook(target, EventKind::Submit, instance, TrackerHook::FormSubmit) {
                doc.wrap(target, EventKind::Submit, hook(TrackerHook::FormSubmit));
            }
            for field in doc.form_elements(form) {
                let target = EventTarget::Node(field);
                for kind in [EventKind::MouseDown, EventKind::KeyDown] {
                    if !doc.has_tracker_hook(target, kind, instance, TrackerHook::FieldInteraction) {
                        doc.wrap(target, kind, hook(TrackerHook::FieldInteraction));
                    }
                }
            }
            count += 1;
        }
        if !doc.has_tracker_hook(EventTarget::Window, EventKind::Unload, instance, TrackerHook::FormUnload) {
            doc.wrap(EventTarget::Window, EventKind::Unload, hook(TrackerHook::FormUnload));
        }
        debug!(instance, forms = count, "Forms instrumented");
        count
    }

    /// Mousedown or keydown on an instrumented field.
    pub fn form_field_event(&mut self, doc: &Document, event: &DomEvent) {
        let EventTarget::Node(node) = event.current else {
            return;
        };
        let Some(field) = doc.get(node) else {
            return;
        };
        let field_type = field.input_type.as_deref().unwrap_or_default();
        if !qualifies(event.kind, event.button, event.key_code, field_type) {
            return;
        }
        let form_name = field
            .form
            .and_then(|f| doc.get(f))
            .and_then(|f| f.name.as_deref())
            .unwrap_or_default();
        let field_name = field.name.as_deref().unwrap_or_default();
        self.forms.record_interaction(form_name, field_name);
    }

    /// Submit of an instrumented form.
    pub fn form_submit(&mut self, doc: &Document, form: NodeId) -> Option<BeaconRecord> {
        let name = doc.get(form).and_then(|el| el.name.as_deref()).unwrap_or_default();
        let event = self.forms.on_submit(name)?;
        self.report_form_event(event)
    }

    /// Window unload.
    pub fn form_unload(&mut self) -> Option<BeaconRecord> {
        let event = self.forms.on_unload()?;
        self.report_form_event(event)
    }

    fn report_form_event(&mut self, event: FormEvent) -> Option<BeaconRecord> {
        let location = self.host.location();
        let host_path = format!("{}{}", location.host, location.pathname);
        let description = self
            .forms
            .describe(&event, self.get(Variable::PageName), &host_path);

        let target_var = match self.forms.config().var_used.as_deref().filter(|v| !v.is_empty()) {
            Some(name) => match name.parse::<Variable>() {
                Ok(var) => Some(var),
                Err(e) => {
                    warn!(instance = self.instance(), error = %e, "Form outcome not reported");
                    self.forms.finish();
                    return None;
                }
            },
            None => None,
        };

        let commerce = self.forms.config().use_commerce;
        let saved_events = self.get(Variable::Events).to_string();
        if commerce {
            let event_name = self.forms.commerce_event(event.outcome).unwrap_or_default();
            self.set(Variable::Events, event_name);
        }
        if let Some(var) = target_var {
            self.set(var, description.clone());
        }
        self.set(Variable::LinkType, LinkType::Custom.wire_code());
        self.set(Variable::LinkName, FORM_LINK_NAME);

        let options = CallOptions {
            run_plugins: false,
            track_vars: Some(self.forms.extend_track_vars(&self.config.link_track_vars)),
            track_events: Some(self.forms.extend_track_events(&self.config.link_track_events)),
        };
        let record = self.dispatch(Some(TrackedObject::default()), options);

        if let Some(var) = target_var {
            self.set(var, "");
        }
        if commerce {
            self.set(Variable::Events, saved_events);
        }
        self.forms.finish();
        info!(
            instance = self.instance(),
            form = %event.form,
            outcome = event.outcome.label(),
            description = %description,
            sent = record.is_some(),
            "Form outcome reported"
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(configure: impl FnOnce(&mut FormAnalysisConfig)) -> FormAnalysis {
        let mut config = FormAnalysisConfig {
            enabled: true,
            var_used: Some("prop10".into()),
            ..FormAnalysisConfig::default()
        };
        configure(&mut config);
        FormAnalysis::new(config)
    }

    #[test]
    fn test_qualifying_interactions() {
        assert!(qualifies(EventKind::MouseDown, MouseButton::Left, None, "checkbox"));
        assert!(qualifies(EventKind::MouseDown, MouseButton::Left, None, "SELECT-MULTIPLE"));
        assert!(!qualifies(EventKind::MouseDown, MouseButton::Left, None, "TEXT"));
        assert!(!qualifies(EventKind::MouseDown, MouseButton::Left, None, "SELECT"));
        assert!(qualifies(EventKind::MouseDown, MouseButton::Right, None, "PASSWORD"));
        assert!(!qualifies(EventKind::MouseDown, MouseButton::Right, None, "BUTTON"));
        assert!(qualifies(EventKind::KeyDown, MouseButton::Left, Some(65), "TEXT"));
        assert!(!qualifies(EventKind::KeyDown, MouseButton::Left, Some(9), "TEXT"));
        assert!(!qualifies(EventKind::KeyDown, MouseButton::Left, Some(13), "TEXT"));
        assert!(!qualifies(EventKind::Click, MouseButton::Left, None, "BUTTON"));
    }

    #[test]
    fn test_form_lists() {
        let exclude = analysis(|c| c.form_list = "Search, login".into());
        assert!(!exclude.tracks_form("search"));
        assert!(!exclude.tracks_form("LOGIN"));
        assert!(exclude.tracks_form("signup"));
        assert!(!exclude.tracks_form(""));

        let include = analysis(|c| {
            c.track_form_list = true;
            c.form_list = "signup".into();
        });
        assert!(include.tracks_form("SignUp"));
        assert!(!include.tracks_form("search"));
    }

    #[test]
    fn test_submit_without_interaction_is_silent() {
        let mut fa = analysis(|_| {});
        assert_eq!(fa.on_submit("signup"), None);
        assert_eq!(fa.on_unload(), None);
        assert_eq!(fa.state(), &FormState::Idle);
    }

    #[test]
    fn test_touch_then_submit_is_success() {
        let mut fa = analysis(|_| {});
        fa.record_interaction("signup", "email");
        let event = fa.on_submit("signup").unwrap();
        assert_eq!(event.outcome, FormOutcome::Success);
        assert_eq!(event.detail, "email");
        assert!(matches!(fa.state(), FormState::Submitting { .. }));
        fa.finish();
        assert_eq!(fa.on_unload(), None);
    }

    #[test]
    fn test_touch_then_unload_is_abandon() {
        let mut fa = analysis(|_| {});
        fa.record_interaction("signup", "email");
        fa.record_interaction("signup", "zip");
        let event = fa.on_unload().unwrap();
        assert_eq!(event.outcome, FormOutcome::Abandon);
        assert_eq!(event.detail, "zip");
        assert_eq!(fa.state(), &FormState::Idle);
    }

    #[test]
    fn test_submit_of_other_form_clears_pair() {
        let mut fa = analysis(|_| {});
        fa.record_interaction("signup", "email");
        assert_eq!(fa.on_submit("search"), None);
        assert_eq!(fa.on_unload(), None);
    }

    #[test]
    fn test_describe() {
        let fa = analysis(|_| {});
        let abandon = FormEvent {
            outcome: FormOutcome::Abandon,
            page: None,
            form: "signup".into(),
            detail: "email".into(),
        };
        assert_eq!(fa.describe(&abandon, "Home", "www.example.com/"), "Home:signup:Abandon:(email)");
        assert_eq!(
            fa.describe(&abandon, "", "www.example.com/join"),
            "www.example.com/join:signup:Abandon:(email)"
        );

        let success = FormEvent {
            outcome: FormOutcome::Success,
            ..abandon.clone()
        };
        assert_eq!(fa.describe(&success, "Home", "x"), "Home:signup:Success");

        let commerce = analysis(|c| {
            c.use_commerce = true;
            c.track_page_name = false;
        });
        assert_eq!(commerce.describe(&abandon, "Home", "x"), "signup:(email)");
    }

    #[test]
    fn test_commerce_lists() {
        let fa = analysis(|c| {
            c.use_commerce = true;
            c.event_list = "event1,event2,event3".into();
        });
        assert_eq!(fa.commerce_event(FormOutcome::Abandon).as_deref(), Some("event1"));
        assert_eq!(fa.commerce_event(FormOutcome::Error).as_deref(), Some("event3"));
        assert_eq!(fa.extend_track_vars("None"), "events,prop10");
        assert_eq!(fa.extend_track_vars("eVar1"), "eVar1,events,prop10");
        assert_eq!(fa.extend_track_events("None"), "event1,event2,event3");
        assert_eq!(fa.extend_track_events("purchase"), "purchase,event1,event2,event3");

        let plain = analysis(|_| {});
        assert_eq!(plain.extend_track_vars("None"), "prop10");
        assert_eq!(plain.extend_track_events("None"), "None");
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let mut fa = analysis(|_| {});
        assert_eq!(serde_json::to_value(fa.state()).unwrap(), serde_json::json!({ "state": "idle" }));
        fa.record_interaction("signup", "email");
        assert_eq!(
            serde_json::to_value(fa.state()).unwrap(),
            serde_json::json!({ "state": "field_touched", "form": "signup", "field": "email" })
        );
    }
}

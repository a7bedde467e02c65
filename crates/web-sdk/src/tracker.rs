//! Tracker instance: one per account list.
//!
//! A tracker owns the variable set, the cookie view and the transport for
//! its accounts. Every public entry point converts internal failures into
//! "no beacon" and a log line; nothing here can disturb the host page.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::event_bus::{make_record, BeaconSink};
use beacon_core::types::{BeaconKind, BeaconRecord, LinkType};
use beacon_core::{BeaconError, BeaconResult, TrackerConfig};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::accounts::active_accounts;
use crate::assembler::{
    assemble_url, link_params, sampling_gate, sequence_id, session_bucket, static_block,
    time_components, BeaconTarget, InlineStats,
};
use crate::cookies::CookieStore;
use crate::deferred::{read_deferred, store_deferred};
use crate::dom::{Document, NodeId};
use crate::encoding::{truncate, Codec};
use crate::environment::BrowserEnvironment;
use crate::forms::FormAnalysis;
use crate::host::Host;
use crate::resolver::{
    normalize_href, object_identifier, object_type, resolve_click_target, strip_query,
    IdentifierKind, LinkClassifier,
};
use crate::transport::{BeaconTransport, Delay};
use crate::variables::{VarScope, Variable, VariableSet};

const PAGE_FIELD_MAX_LEN: usize = 255;

/// Pre-collection hook, run before every beacon when plugins are enabled.
pub type PluginHook = Arc<dyn Fn(&mut Tracker) + Send + Sync>;

/// What a link call reports on.
pub enum LinkTarget<'a> {
    /// An element of the page document.
    Element(&'a mut Document, NodeId),
    /// A bare URL.
    Href(&'a str),
    /// No object; only the link name and type are reported.
    Custom,
}

/// The object behind an interaction.
#[derive(Debug, Default)]
pub(crate) struct TrackedObject {
    identifier: Option<(String, IdentifierKind)>,
    object_type: String,
    href: String,
    target: Option<String>,
    source_index: Option<usize>,
}

/// Per-call overrides.
#[derive(Debug)]
pub(crate) struct CallOptions {
    pub(crate) run_plugins: bool,
    pub(crate) track_vars: Option<String>,
    pub(crate) track_events: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            run_plugins: true,
            track_vars: None,
            track_events: None,
        }
    }
}

#[derive(Clone)]
pub struct Tracker {
    instance: usize,
    configured_accounts: String,
    accounts: String,
    pub(crate) config: TrackerConfig,
    pub(crate) host: Arc<dyn Host>,
    env: BrowserEnvironment,
    codec: Codec,
    pub(crate) cookies: CookieStore,
    vars: VariableSet,
    static_params: Option<String>,
    transport: BeaconTransport,
    pub(crate) forms: FormAnalysis,
    plugin_hook: Option<PluginHook>,
    sink: Arc<dyn BeaconSink>,
    object_id: Option<String>,
}

impl Tracker {
    pub fn new(
        instance: usize,
        config: TrackerConfig,
        host: Arc<dyn Host>,
        sink: Arc<dyn BeaconSink>,
        delay: Arc<dyn Delay>,
    ) -> Self {
        let probe = host.unicode_escape_probe();
        let env = BrowserEnvironment::classify(&host.navigator(), probe.as_deref());
        let char_set = config.char_set.as_deref().is_some_and(|c| !c.is_empty());
        let codec = Codec::new(env.escape_mode, char_set);
        let location = host.location();
        let cookies = CookieStore::new(
            host.cookie_jar(),
            codec,
            config.cookie_lifetime,
            config.domain_periods(),
            location.hostname,
            host.clock(),
        );
        let configured = config.account.trim().to_string();
        let transport = BeaconTransport::new(
            &configured,
            delay,
            Duration::from_millis(config.link_delay_ms),
        );

        let mut vars = VariableSet::new();
        if let Some(cs) = config.char_set.as_deref() {
            vars.set(Variable::CharSet, cs);
        }
        if let Some(ns) = config.visitor_namespace.as_deref() {
            vars.set(Variable::VisitorNamespace, ns);
        }
        if let Some(periods) = config.cookie_domain_periods {
            vars.set(Variable::CookieDomainPeriods, periods.to_string());
        }
        if let Some(lifetime) = config.cookie_lifetime.wire_value() {
            vars.set(Variable::CookieLifetime, lifetime);
        }

        let mut tracker = Self {
            instance,
            accounts: configured.clone(),
            configured_accounts: configured,
            forms: FormAnalysis::new(config.form_analysis.clone()),
            config,
            host,
            env,
            codec,
            cookies,
            vars,
            static_params: None,
            transport,
            plugin_hook: None,
            sink,
            object_id: None,
        };
        tracker.refresh_accounts();
        info!(
            instance,
            accounts = %tracker.accounts,
            family = ?tracker.env.family,
            version = tracker.env.version,
            "Tracker created"
        );
        tracker
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    /// Active account list after dynamic selection.
    pub fn accounts(&self) -> &str {
        &self.accounts
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn environment(&self) -> &BrowserEnvironment {
        &self.env
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    pub fn forms(&self) -> &FormAnalysis {
        &self.forms
    }

    pub fn image_slot(&self) -> &str {
        self.transport.slot()
    }

    pub fn get(&self, var: Variable) -> &str {
        self.vars.get(var)
    }

    pub fn set(&mut self, var: Variable, value: impl Into<String>) {
        self.vars.set(var, value);
    }

    /// Set a variable by its page-author name (`pageName`, `prop3`, ...).
    pub fn set_by_name(&mut self, name: &str, value: impl Into<String>) -> BeaconResult<()> {
        let var: Variable = name.parse()?;
        self.vars.set(var, value);
        Ok(())
    }

    pub fn variables(&self) -> &VariableSet {
        &self.vars
    }

    /// Object id reported instead of the derived identifier on the next call.
    pub fn set_object_id(&mut self, id: impl Into<String>) {
        self.object_id = Some(id.into()).filter(|s: &String| !s.is_empty());
    }

    pub fn set_plugin_hook(&mut self, hook: PluginHook) {
        self.plugin_hook = Some(hook);
    }

    pub fn set_plugin_fn<F>(&mut self, hook: F)
    where
        F: Fn(&mut Tracker) + Send + Sync + 'static,
    {
        self.plugin_hook = Some(Arc::new(hook));
    }

    /// Re-run dynamic account selection against the current host.
    pub fn refresh_accounts(&mut self) {
        let active = active_accounts(
            &self.config,
            &self.configured_accounts,
            &self.host.location().hostname,
        );
        if active != self.accounts {
            debug!(instance = self.instance, from = %self.accounts, to = %active, "Active accounts changed");
            self.transport.set_accounts(&active);
            self.accounts = active;
        }
    }

    /// Copy of this tracker reporting to `accounts` under a new index.
    pub fn clone_for(&self, instance: usize, accounts: &str) -> Tracker {
        let mut copy = self.clone();
        copy.instance = instance;
        copy.configured_accounts = accounts.to_string();
        copy.config.account = accounts.to_string();
        copy.accounts = accounts.to_string();
        copy.transport.set_accounts(accounts);
        copy.refresh_accounts();
        copy
    }

    /// Send a page view beacon.
    pub fn track_page_view(&mut self) -> Option<BeaconRecord> {
        self.dispatch(None, CallOptions::default())
    }

    /// Send a link beacon for `link`. `link_type` and `name` override the
    /// configured classification and friendly name.
    pub fn track_link(
        &mut self,
        link: LinkTarget<'_>,
        link_type: Option<LinkType>,
        name: Option<&str>,
    ) -> Option<BeaconRecord> {
        self.set_link_overrides(link_type, name);
        let object = match link {
            LinkTarget::Element(doc, node) => self.describe_element(doc, node),
            LinkTarget::Href(href) => TrackedObject {
                identifier: Some((truncate(href, 100), IdentifierKind::Href)),
                object_type: "A".into(),
                href: href.to_string(),
                target: None,
                source_index: None,
            },
            LinkTarget::Custom => TrackedObject::default(),
        };
        self.dispatch(Some(object), CallOptions::default())
    }

    /// Click observer installed on an individual link.
    pub fn track_link_click(&mut self, doc: &mut Document, node: NodeId) -> Option<BeaconRecord> {
        let object = self.describe_element(doc, node);
        self.dispatch(Some(object), CallOptions::default())
    }

    /// Body-level click capture: resolve the clicked element, then report it.
    pub fn handle_body_click(&mut self, doc: &mut Document, node: NodeId) -> Option<BeaconRecord> {
        match resolve_click_target(doc, node) {
            Ok(resolved) => {
                let object = self.describe_element(doc, resolved);
                self.dispatch(Some(object), CallOptions::default())
            }
            Err(e) => {
                debug!(instance = self.instance, error = %e, "Click not tracked");
                self.reset_call_state();
                None
            }
        }
    }

    fn set_link_overrides(&mut self, link_type: Option<LinkType>, name: Option<&str>) {
        if let Some(t) = link_type {
            self.vars.set(Variable::LinkType, t.wire_code());
        }
        if let Some(n) = name {
            self.vars.set(Variable::LinkName, n);
        }
    }

    fn describe_element(&self, doc: &mut Document, node: NodeId) -> TrackedObject {
        let identifier = object_identifier(doc, node);
        let Some(el) = doc.get(node) else {
            return TrackedObject::default();
        };
        TrackedObject {
            object_type: object_type(el),
            href: normalize_href(el, &self.host.location()),
            target: identifier
                .as_ref()
                .map(|_| el.target.clone().unwrap_or_default()),
            source_index: el.source_index,
            identifier,
        }
    }

    pub(crate) fn dispatch(
        &mut self,
        object: Option<TrackedObject>,
        options: CallOptions,
    ) -> Option<BeaconRecord> {
        let result = self.collect(object, &options);
        self.reset_call_state();
        match result {
            Ok(record) => record,
            Err(BeaconError::Resolution(reason)) => {
                debug!(instance = self.instance, reason = %reason, "Interaction not tracked");
                None
            }
            Err(e) => {
                warn!(instance = self.instance, error = %e, "Beacon dropped");
                None
            }
        }
    }

    fn collect(
        &mut self,
        object: Option<TrackedObject>,
        options: &CallOptions,
    ) -> BeaconResult<Option<BeaconRecord>> {
        let now = self.host.clock().now();
        let sequence = sequence_id(self.host.random());
        let session = session_bucket(now.timestamp_millis(), sequence);
        let time = time_components(now);

        self.refresh_accounts();
        if self.static_params.is_none() {
            self.static_params = Some(static_block(self.host.as_ref(), &self.env, &self.cookies));
        }
        if options.run_plugins && self.config.use_plugins {
            if let Err(e) = self.run_plugin_hook() {
                warn!(instance = self.instance, error = %e, "Plugin hook skipped");
            }
        }

        let location = self.host.location();
        let mut vars = self.vars.clone();
        if !vars.is_set(Variable::PageUrl) {
            vars.set(Variable::PageUrl, truncate(&location.href, PAGE_FIELD_MAX_LEN));
        }
        if !vars.is_set(Variable::Referrer) {
            vars.set(Variable::Referrer, truncate(&self.host.referrer(), PAGE_FIELD_MAX_LEN));
        }

        let mut track = true;
        let mut link_query = String::new();
        let mut inline_stats = String::new();
        let mut target = None;
        let is_link = object.is_some();

        if let Some(object) = object {
            target = object.target.clone();
            let href = strip_query(&object.href, self.config.link_leave_query_string).to_string();
            let classifier = LinkClassifier::new(&self.config, &location.hostname);
            let name = Some(vars.get(Variable::LinkName).to_string())
                .filter(|n| !n.is_empty())
                .or_else(|| classifier.friendly_name(&href))
                .unwrap_or_default();
            let link_type = LinkType::from_code(vars.get(Variable::LinkType))
                .or_else(|| classifier.classify(&href));

            match link_type {
                Some(t) if !href.is_empty() || !name.is_empty() => {
                    link_query = link_params(self.codec, t, &href, &name);
                }
                _ => track = false,
            }

            if self.config.track_inline_stats {
                inline_stats = self.inline_stats(&vars, &object).to_params(self.codec);
            }
        }

        if !track && inline_stats.is_empty() {
            return Ok(None);
        }

        let mut record = None;
        if track
            && sampling_gate(
                &self.cookies,
                &self.accounts,
                self.config.sampling_rate(),
                self.config.visitor_sampling_group.as_deref(),
                sequence,
            )
        {
            let track_vars = options
                .track_vars
                .as_deref()
                .unwrap_or(&self.config.link_track_vars);
            let track_events = options
                .track_events
                .as_deref()
                .unwrap_or(&self.config.link_track_events);
            let scope = if is_link {
                VarScope::Interaction {
                    track_vars,
                    track_events,
                }
            } else {
                VarScope::PageView
            };

            let mut dynamic = format!("&t={}", self.codec.ape(&time));
            dynamic.push_str(&vars.serialize(scope, self.codec));
            dynamic.push_str(&link_query);
            if inline_stats.is_empty() {
                dynamic.push_str(&read_deferred(&self.cookies, &self.accounts));
            } else {
                dynamic.push_str(&inline_stats);
            }

            let server = if location.is_secure() {
                &self.config.tracking_server_secure
            } else {
                &self.config.tracking_server
            };
            let beacon_target = BeaconTarget {
                secure: location.is_secure(),
                server,
                accounts: &self.accounts,
                code_version: &self.config.code_version,
                length_cap: self.env.url_length_cap(),
            };
            let static_params = self.static_params.as_deref().unwrap_or_default();
            let (url, truncated) = assemble_url(&beacon_target, &session, &dynamic, static_params);
            let delivery = self.transport.send(self.host.as_ref(), &self.env, &url, target.as_deref());

            let kind = if is_link { BeaconKind::Link } else { BeaconKind::PageView };
            let mut beacon = make_record(
                self.instance,
                self.accounts.clone(),
                kind,
                delivery.method,
                url,
                now.with_timezone(&Utc),
            );
            beacon.delayed = delivery.delayed;
            beacon.truncated = truncated;
            debug!(
                instance = self.instance,
                kind = ?kind,
                truncated,
                delayed = delivery.delayed,
                "Beacon sent"
            );
            self.sink.emit(beacon.clone());
            record = Some(beacon);
        } else if track {
            debug!(instance = self.instance, accounts = %self.accounts, "Visitor not sampled");
        }

        let queued = if track { "" } else { inline_stats.as_str() };
        if !store_deferred(&self.cookies, &self.accounts, queued) {
            debug!(instance = self.instance, "Deferred parameters not persisted");
        }
        Ok(record)
    }

    fn inline_stats(&self, vars: &VariableSet, object: &TrackedObject) -> InlineStats {
        let page_name = vars.get(Variable::PageName);
        let (page, page_is_name) = if page_name.is_empty() {
            (vars.get(Variable::PageUrl).to_string(), false)
        } else {
            (page_name.to_string(), true)
        };
        let (object_id, id_kind, source_index) = match &self.object_id {
            Some(id) => (id.clone(), IdentifierKind::ObjectId, Some(1)),
            None => {
                let (id, kind) = object
                    .identifier
                    .clone()
                    .unwrap_or((String::new(), IdentifierKind::Href));
                (id, kind, object.source_index)
            }
        };
        InlineStats {
            page,
            page_is_name,
            object_id,
            id_kind,
            object_type: object.object_type.clone(),
            source_index,
        }
    }

    fn run_plugin_hook(&mut self) -> BeaconResult<()> {
        let Some(hook) = self.plugin_hook.clone() else {
            return Ok(());
        };
        catch_unwind(AssertUnwindSafe(|| hook(self))).map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "hook panicked".to_string());
            BeaconError::Hook(message)
        })
    }

    fn reset_call_state(&mut self) {
        self.vars.clear(Variable::LinkName);
        self.vars.clear(Variable::LinkType);
        self.vars.clear(Variable::Ppu);
        self.object_id = None;
    }
}

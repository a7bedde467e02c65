//! Page-side beacon tracker — collects page variables, resolves clicked
//! elements, keeps visitor state in cookies and reports page views, link
//! clicks and form outcomes as image-request beacons.
//!
//! # Modules
//!
//! - [`session`] — Page session: document, tracker registry, event dispatch
//! - [`tracker`] — Tracker instance and beacon collection
//! - [`assembler`] — Beacon URL construction, sampling gate, inline stats
//! - [`transport`] — Image/document-write delivery and link delay
//! - [`variables`] — Tracking variables and their wire keys
//! - [`dom`] — Element arena and handler chains
//! - [`resolver`] — Click target resolution and link classification
//! - [`cookies`] — Cookie store over the host jar
//! - [`deferred`] — Cross-page deferred inline statistics
//! - [`forms`] — Form analysis state machine
//! - [`plugins`] — Visitor helper plugins (query params, once-values, timers)
//! - [`accounts`] — Dynamic account selection and instance registry
//! - [`environment`] — Browser classification
//! - [`encoding`] — URL escaping
//! - [`host`] — Host abstraction and an in-memory host

pub mod accounts;
pub mod assembler;
pub mod cookies;
pub mod deferred;
pub mod dom;
pub mod encoding;
pub mod environment;
pub mod forms;
pub mod host;
pub mod plugins;
pub mod resolver;
pub mod session;
pub mod tracker;
pub mod transport;
pub mod variables;

pub use accounts::{SharedTracker, TrackerRegistry};
pub use cookies::{CookieStore, MemoryCookieJar};
pub use dom::{Document, Element, EventKind, EventTarget, Handler, MouseButton, NodeId};
pub use environment::BrowserEnvironment;
pub use forms::{FormAnalysis, FormState};
pub use host::{Host, ManualClock, Navigator, StaticHost};
pub use plugins::{format_elapsed, TimerAction};
pub use session::Page;
pub use tracker::{LinkTarget, Tracker};
pub use transport::{BusyWait, Delay, NoDelay};
pub use variables::Variable;

//! OSC responder handles.
//!
//! An [`OscFunc`] is what user code holds: a callback registered for an
//! address on a [`Dispatcher`], with a small lifecycle:
//!
//! ```text
//! new -> enabled <-> disabled
//!  any state -> freed (terminal)
//! ```
//!
//! Enabled handles that are not permanent free themselves when the reset
//! signal ([`CmdPeriod`]) fires. Every handle that has not been freed is
//! listed by its [`ResponderRegistry`].

use crate::cmd_period::{CmdPeriod, SubscriptionId};
use crate::dispatch::{Dispatcher, ResponderId};
use crate::error::{Error, Result};
use crate::filter::{ArgMatcher, ResponderFn, SourceId, WrappedFunc};
use crate::source::{InboundMessage, MessageSource};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

static NEXT_RESPONDER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a responder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponderState {
    New,
    Enabled,
    Disabled,
    Freed,
}

struct HandleState {
    lifecycle: ResponderState,
    func: Option<ResponderFn>,
    permanent: bool,
    subscription: Option<SubscriptionId>,
}

struct ResponderInner {
    id: ResponderId,
    path: String,
    src_id: Option<SourceId>,
    recv_port: Option<u16>,
    arg_template: Option<Vec<ArgMatcher>>,
    dispatcher: Arc<Dispatcher>,
    cmd_period: Arc<CmdPeriod>,
    registry: Weak<RegistryInner>,
    state: Mutex<HandleState>,
}

/// A responder for one OSC address.
///
/// Cloning yields another handle to the same responder.
#[derive(Clone)]
pub struct OscFunc {
    inner: Arc<ResponderInner>,
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

impl OscFunc {
    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        self.inner.state.lock().unwrap()
    }

    pub fn id(&self) -> ResponderId {
        self.inner.id
    }

    /// The address this responder listens on, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn src_id(&self) -> Option<SourceId> {
        self.inner.src_id
    }

    pub fn recv_port(&self) -> Option<u16> {
        self.inner.recv_port
    }

    pub fn arg_template(&self) -> Option<&[ArgMatcher]> {
        self.inner.arg_template.as_deref()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Type key of the dispatcher this responder is registered with.
    pub fn type_key(&self) -> &'static str {
        self.inner.dispatcher.type_key()
    }

    pub fn state(&self) -> ResponderState {
        self.lock_state().lifecycle
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == ResponderState::Enabled
    }

    pub fn is_freed(&self) -> bool {
        self.state() == ResponderState::Freed
    }

    pub fn is_permanent(&self) -> bool {
        self.lock_state().permanent
    }

    fn wrapped(&self, func: Option<ResponderFn>) -> WrappedFunc {
        WrappedFunc::from_selectors(
            func,
            self.inner.src_id,
            self.inner.recv_port,
            self.inner.arg_template.as_deref(),
        )
    }

    fn subscribe_reset(&self) -> SubscriptionId {
        let weak = Arc::downgrade(&self.inner);
        self.inner.cmd_period.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                OscFunc { inner }.free();
            }
        })
    }

    /// Start receiving messages.
    ///
    /// No-op if already enabled. Fails with [`Error::UseAfterFree`] once the
    /// responder has been freed.
    pub fn enable(&self) -> Result<()> {
        let mut state = self.lock_state();
        match state.lifecycle {
            ResponderState::Freed => return Err(Error::UseAfterFree(self.to_string())),
            ResponderState::Enabled => return Ok(()),
            ResponderState::New | ResponderState::Disabled => {}
        }
        if !state.permanent {
            state.subscription = Some(self.subscribe_reset());
        }
        self.inner
            .dispatcher
            .add(self.inner.id, &self.inner.path, self.wrapped(state.func.clone()));
        state.lifecycle = ResponderState::Enabled;
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.insert(self.clone());
        }
        log::debug!("[RESPONDER] Enabled {}", self);
        Ok(())
    }

    /// Stop receiving messages. No-op unless enabled.
    pub fn disable(&self) {
        let mut state = self.lock_state();
        if state.lifecycle != ResponderState::Enabled {
            return;
        }
        self.unregister(&mut state);
        state.lifecycle = ResponderState::Disabled;
        log::debug!("[RESPONDER] Disabled {}", self);
    }

    fn unregister(&self, state: &mut HandleState) {
        if let Some(id) = state.subscription.take() {
            self.inner.cmd_period.unsubscribe(id);
        }
        self.inner.dispatcher.remove(self.inner.id);
    }

    /// Disable and forget this responder. Safe to call more than once.
    pub fn free(&self) {
        {
            let mut state = self.lock_state();
            match state.lifecycle {
                ResponderState::Freed => return,
                ResponderState::Enabled => self.unregister(&mut state),
                ResponderState::New | ResponderState::Disabled => {}
            }
            state.lifecycle = ResponderState::Freed;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self.inner.id);
        }
        log::debug!("[RESPONDER] Freed {}", self);
    }

    /// Make the responder fire once: the first accepted message frees it
    /// and is then passed to the callback.
    pub fn one_shot(&self) -> &Self {
        let weak = Arc::downgrade(&self.inner);
        let fired = AtomicBool::new(false);
        let original = self.lock_state().func.clone();
        let func: ResponderFn = Arc::new(move |msg: &InboundMessage| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                OscFunc { inner }.free();
            }
            if let Some(original) = &original {
                original(msg);
            }
        });
        self.replace_func(Some(func));
        self
    }

    /// Replace the callback. An enabled responder keeps its dispatch
    /// position.
    pub fn set_func<F>(&self, func: F) -> &Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.replace_func(Some(Arc::new(func)));
        self
    }

    /// Remove the callback, leaving the registration in place.
    pub fn clear(&self) -> &Self {
        self.replace_func(None);
        self
    }

    fn replace_func(&self, func: Option<ResponderFn>) {
        let mut state = self.lock_state();
        state.func = func;
        if state.lifecycle == ResponderState::Enabled {
            self.inner
                .dispatcher
                .update(self.inner.id, self.wrapped(state.func.clone()));
        }
    }

    /// Mark the responder as surviving the reset signal, or not.
    pub fn set_permanent(&self, permanent: bool) -> &Self {
        let mut state = self.lock_state();
        state.permanent = permanent;
        if state.lifecycle == ResponderState::Enabled {
            match (permanent, state.subscription) {
                (true, Some(id)) => {
                    self.inner.cmd_period.unsubscribe(id);
                    state.subscription = None;
                }
                (false, None) => state.subscription = Some(self.subscribe_reset()),
                _ => {}
            }
        }
        self
    }
}

impl PartialEq for OscFunc {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for OscFunc {}

impl fmt::Display for OscFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OSCFunc({}", self.inner.path)?;
        match &self.inner.src_id {
            Some(src) => write!(f, ", {}", src)?,
            None => write!(f, ", nil")?,
        }
        match self.inner.recv_port {
            Some(port) => write!(f, ", {}", port)?,
            None => write!(f, ", nil")?,
        }
        match &self.inner.arg_template {
            Some(template) => write!(f, ", {:?})", template),
            None => write!(f, ", nil)"),
        }
    }
}

impl fmt::Debug for OscFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OscFunc")
            .field("id", &self.inner.id)
            .field("path", &self.inner.path)
            .field("type_key", &self.type_key())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`OscFunc`], obtained from [`ResponderRegistry::builder`].
pub struct OscFuncBuilder<'a> {
    registry: &'a ResponderRegistry,
    path: String,
    func: ResponderFn,
    src_id: Option<SourceId>,
    recv_port: Option<u16>,
    arg_template: Option<Vec<ArgMatcher>>,
    dispatcher: Option<Arc<Dispatcher>>,
    permanent: bool,
}

impl<'a> OscFuncBuilder<'a> {
    /// Only accept messages from `src`.
    pub fn src_id(mut self, src: SourceId) -> Self {
        self.src_id = Some(src);
        self
    }

    /// Only accept messages received on `port`.
    pub fn recv_port(mut self, port: u16) -> Self {
        self.recv_port = Some(port);
        self
    }

    /// Only accept messages whose leading arguments fit `template`.
    pub fn arg_template(mut self, template: Vec<ArgMatcher>) -> Self {
        self.arg_template = Some(template);
        self
    }

    /// Register with a specific dispatcher.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Register with the registry's pattern-matching dispatcher.
    pub fn matching(mut self) -> Self {
        self.dispatcher = Some(self.registry.default_matching_dispatcher().clone());
        self
    }

    /// Survive the reset signal.
    pub fn permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    /// Create the responder and enable it.
    pub fn build(self) -> Result<OscFunc> {
        let registry = &self.registry.inner;
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| registry.default_dispatcher.clone());
        let func = OscFunc {
            inner: Arc::new(ResponderInner {
                id: NEXT_RESPONDER_ID.fetch_add(1, Ordering::Relaxed),
                path: normalize_path(&self.path),
                src_id: self.src_id,
                recv_port: self.recv_port,
                arg_template: self.arg_template,
                dispatcher,
                cmd_period: registry.cmd_period.clone(),
                registry: Arc::downgrade(registry),
                state: Mutex::new(HandleState {
                    lifecycle: ResponderState::New,
                    func: Some(self.func),
                    permanent: self.permanent,
                    subscription: None,
                }),
            }),
        };
        func.enable()?;
        Ok(func)
    }
}

struct RegistryInner {
    live: Mutex<BTreeMap<ResponderId, OscFunc>>,
    cmd_period: Arc<CmdPeriod>,
    default_dispatcher: Arc<Dispatcher>,
    default_matching_dispatcher: Arc<Dispatcher>,
}

impl RegistryInner {
    fn lock_live(&self) -> MutexGuard<'_, BTreeMap<ResponderId, OscFunc>> {
        self.live.lock().unwrap()
    }

    fn insert(&self, func: OscFunc) {
        self.lock_live().insert(func.id(), func);
    }

    fn remove(&self, id: ResponderId) {
        self.lock_live().remove(&id);
    }
}

/// Creates responders and keeps track of the live ones.
#[derive(Clone)]
pub struct ResponderRegistry {
    inner: Arc<RegistryInner>,
}

impl ResponderRegistry {
    /// Create a registry whose default dispatchers are fed by `source`.
    pub fn new(source: Arc<dyn MessageSource>, cmd_period: Arc<CmdPeriod>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                live: Mutex::new(BTreeMap::new()),
                cmd_period,
                default_dispatcher: Dispatcher::exact(source.clone()),
                default_matching_dispatcher: Dispatcher::pattern(source),
            }),
        }
    }

    /// Start building a responder for `path`.
    pub fn builder<F>(&self, path: &str, func: F) -> OscFuncBuilder<'_>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        OscFuncBuilder {
            registry: self,
            path: path.to_string(),
            func: Arc::new(func),
            src_id: None,
            recv_port: None,
            arg_template: None,
            dispatcher: None,
            permanent: false,
        }
    }

    /// Enabled responder on the exact dispatcher.
    pub fn osc_func<F>(&self, path: &str, func: F) -> Result<OscFunc>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.builder(path, func).build()
    }

    /// Enabled responder on the pattern dispatcher.
    pub fn matching<F>(&self, path: &str, func: F) -> Result<OscFunc>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.builder(path, func).matching().build()
    }

    pub fn cmd_period(&self) -> &Arc<CmdPeriod> {
        &self.inner.cmd_period
    }

    pub fn default_dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.default_dispatcher
    }

    pub fn default_matching_dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.default_matching_dispatcher
    }

    fn snapshot(&self) -> Vec<OscFunc> {
        self.inner.lock_live().values().cloned().collect()
    }

    fn grouped<P>(&self, keep: P) -> HashMap<&'static str, Vec<OscFunc>>
    where
        P: Fn(&OscFunc) -> bool,
    {
        let mut groups: HashMap<&'static str, Vec<OscFunc>> = HashMap::new();
        for func in self.snapshot().into_iter().filter(|f| keep(f)) {
            groups.entry(func.type_key()).or_default().push(func);
        }
        groups
    }

    /// Every live responder, grouped by dispatcher type key.
    pub fn all(&self) -> HashMap<&'static str, Vec<OscFunc>> {
        self.grouped(|_| true)
    }

    /// Enabled responders, grouped by dispatcher type key.
    pub fn all_enabled(&self) -> HashMap<&'static str, Vec<OscFunc>> {
        self.grouped(|f| f.state() == ResponderState::Enabled)
    }

    /// Disabled responders, grouped by dispatcher type key.
    pub fn all_disabled(&self) -> HashMap<&'static str, Vec<OscFunc>> {
        self.grouped(|f| f.state() == ResponderState::Disabled)
    }

    /// Number of live responders.
    pub fn live_count(&self) -> usize {
        self.inner.lock_live().len()
    }

    /// Free every live responder, permanent ones included.
    pub fn free_all(&self) {
        for func in self.snapshot() {
            func.free();
        }
    }
}

impl fmt::Debug for ResponderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponderRegistry")
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

//! Responder dispatch registries.
//!
//! A [`Dispatcher`] maps OSC addresses to the wrapped callbacks registered
//! for them. The exact strategy looks the inbound address up directly; the
//! pattern strategy treats the inbound address as an OSC pattern and tests
//! it against every registered address.
//!
//! A dispatcher is attached to its upstream [`MessageSource`] only while it
//! holds at least one registration.

use crate::filter::WrappedFunc;
use crate::matcher::AddressPattern;
use crate::source::{InboundMessage, MessageSource, RecvFunc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Identifies one registration within a dispatcher.
pub type ResponderId = u64;

/// How inbound addresses are looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchStrategy {
    /// Literal address lookup.
    Exact,
    /// Inbound address is a pattern, matched against every registered address.
    Pattern,
}

impl DispatchStrategy {
    /// Key used to group responders by dispatcher kind.
    pub fn type_key(&self) -> &'static str {
        match self {
            Self::Exact => "OSC unmatched",
            Self::Pattern => "OSC matched",
        }
    }
}

struct Registration {
    id: ResponderId,
    func: Arc<WrappedFunc>,
}

#[derive(Default)]
struct DispatcherState {
    /// Address -> registrations in registration order. Never holds empty lists.
    active: HashMap<String, Vec<Registration>>,
    /// Responder id -> the address it is registered under.
    keys: HashMap<ResponderId, String>,
    attached: bool,
}

/// Routes inbound messages to registered callbacks.
pub struct Dispatcher {
    strategy: DispatchStrategy,
    source: Arc<dyn MessageSource>,
    state: Mutex<DispatcherState>,
    self_ref: Weak<Dispatcher>,
}

impl Dispatcher {
    /// Create a dispatcher fed by `source`.
    pub fn new(strategy: DispatchStrategy, source: Arc<dyn MessageSource>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            strategy,
            source,
            state: Mutex::new(DispatcherState::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Exact-address dispatcher.
    pub fn exact(source: Arc<dyn MessageSource>) -> Arc<Self> {
        Self::new(DispatchStrategy::Exact, source)
    }

    /// Pattern-matching dispatcher.
    pub fn pattern(source: Arc<dyn MessageSource>) -> Arc<Self> {
        Self::new(DispatchStrategy::Pattern, source)
    }

    pub fn strategy(&self) -> DispatchStrategy {
        self.strategy
    }

    pub fn type_key(&self) -> &'static str {
        self.strategy.type_key()
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap()
    }

    fn as_recv_func(&self) -> Option<Arc<dyn RecvFunc>> {
        self.self_ref
            .upgrade()
            .map(|this| this as Arc<dyn RecvFunc>)
    }

    /// Register `func` for `id` under `address`.
    ///
    /// Registering an id that is already present moves it to `address`, at
    /// the end of that address's list.
    pub fn add(&self, id: ResponderId, address: &str, func: WrappedFunc) {
        let mut state = self.lock_state();
        Self::remove_locked(&mut state, id);
        state
            .active
            .entry(address.to_string())
            .or_default()
            .push(Registration {
                id,
                func: Arc::new(func),
            });
        state.keys.insert(id, address.to_string());
        log::debug!(
            "[DISPATCH] {} registered #{} on {}",
            self.type_key(),
            id,
            address
        );
        self.sync_attachment(&mut state);
    }

    /// Remove the registration for `id`. Returns false if it had none.
    pub fn remove(&self, id: ResponderId) -> bool {
        let mut state = self.lock_state();
        let removed = Self::remove_locked(&mut state, id);
        if removed {
            log::debug!("[DISPATCH] {} removed #{}", self.type_key(), id);
            self.sync_attachment(&mut state);
        }
        removed
    }

    /// Swap the callback of a live registration, keeping its position.
    /// Returns false if `id` is not registered.
    pub fn update(&self, id: ResponderId, func: WrappedFunc) -> bool {
        let mut state = self.lock_state();
        let Some(address) = state.keys.get(&id).cloned() else {
            return false;
        };
        let registration = state
            .active
            .get_mut(&address)
            .and_then(|regs| regs.iter_mut().find(|reg| reg.id == id));
        match registration {
            Some(reg) => {
                reg.func = Arc::new(func);
                true
            }
            None => false,
        }
    }

    /// Drop every registration and detach from the source.
    pub fn free(&self) {
        let mut state = self.lock_state();
        state.active.clear();
        state.keys.clear();
        self.sync_attachment(&mut state);
    }

    fn remove_locked(state: &mut DispatcherState, id: ResponderId) -> bool {
        let Some(address) = state.keys.remove(&id) else {
            return false;
        };
        if let Some(regs) = state.active.get_mut(&address) {
            regs.retain(|reg| reg.id != id);
            if regs.is_empty() {
                state.active.remove(&address);
            }
        }
        true
    }

    /// Attach on the empty -> non-empty transition, detach on the reverse.
    fn sync_attachment(&self, state: &mut DispatcherState) {
        let want = !state.active.is_empty();
        if want == state.attached {
            return;
        }
        let Some(func) = self.as_recv_func() else {
            return;
        };
        if want {
            self.source.attach(func);
            log::debug!("[DISPATCH] {} attached to source", self.type_key());
        } else {
            self.source.detach(&func);
            log::debug!("[DISPATCH] {} detached from source", self.type_key());
        }
        state.attached = want;
    }

    /// Check whether the dispatcher is attached to its source.
    pub fn is_attached(&self) -> bool {
        self.lock_state().attached
    }

    /// Registered addresses.
    pub fn addresses(&self) -> Vec<String> {
        self.lock_state().active.keys().cloned().collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.lock_state().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether `id` is registered.
    pub fn contains(&self, id: ResponderId) -> bool {
        self.lock_state().keys.contains_key(&id)
    }

    /// Route one message. Returns the number of callbacks that ran.
    ///
    /// The matching callbacks are collected first and run after the lock is
    /// released, so a callback may register, update or free responders
    /// (including itself) without affecting delivery of this message.
    pub fn dispatch(&self, msg: &InboundMessage) -> usize {
        let funcs: Vec<Arc<WrappedFunc>> = {
            let state = self.lock_state();
            match self.strategy {
                DispatchStrategy::Exact => state
                    .active
                    .get(msg.addr())
                    .map(|regs| regs.iter().map(|reg| reg.func.clone()).collect())
                    .unwrap_or_default(),
                DispatchStrategy::Pattern => {
                    let pattern = AddressPattern::new(msg.addr());
                    let mut matched: Vec<(&String, &Vec<Registration>)> = state
                        .active
                        .iter()
                        .filter(|(address, _)| pattern.matches(address))
                        .collect();
                    // Stable order across addresses.
                    matched.sort_by(|a, b| a.0.cmp(b.0));
                    matched
                        .into_iter()
                        .flat_map(|(_, regs)| regs.iter().map(|reg| reg.func.clone()))
                        .collect()
                }
            }
        };

        funcs.iter().filter(|func| func.call(msg)).count()
    }
}

impl RecvFunc for Dispatcher {
    fn receive(&self, msg: &InboundMessage) {
        self.dispatch(msg);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("strategy", &self.strategy)
            .field("registrations", &self.len())
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

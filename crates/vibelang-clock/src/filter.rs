//! Message filters applied in front of responder callbacks.
//!
//! A registration may restrict which messages reach its callback by sender,
//! by receive port, and by a positional argument template. The filters are
//! stacked in that order and evaluated as a logical AND, stopping at the
//! first one that rejects.

use crate::source::InboundMessage;
use rosc::OscType;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// User callback invoked for accepted messages.
pub type ResponderFn = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Predicate used as a template slot.
pub type ArgPredicate = Arc<dyn Fn(&OscType) -> bool + Send + Sync>;

/// Identifies a message sender. A `None` port accepts any sender port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl SourceId {
    /// Match one exact sender address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port: Some(port),
        }
    }

    /// Match every port on `ip`.
    pub fn any_port(ip: IpAddr) -> Self {
        Self { ip, port: None }
    }

    /// Check whether `sender` is this source.
    pub fn matches(&self, sender: &SocketAddr) -> bool {
        self.ip == sender.ip() && self.port.map_or(true, |port| port == sender.port())
    }
}

impl From<SocketAddr> for SourceId {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.ip, port),
            None => write!(f, "{}:*", self.ip),
        }
    }
}

/// One slot of an argument template.
#[derive(Clone)]
pub enum ArgMatcher {
    /// Accept anything, including a missing argument.
    Any,
    /// Accept an equal value. Numbers compare across OSC numeric types.
    Value(OscType),
    /// Accept values satisfying the predicate.
    Predicate(ArgPredicate),
}

impl ArgMatcher {
    /// Build a predicate slot.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&OscType) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Check the incoming argument at this slot's position.
    pub fn accepts(&self, arg: Option<&OscType>) -> bool {
        match (self, arg) {
            (Self::Any, _) => true,
            (_, None) => false,
            (Self::Value(expected), Some(arg)) => osc_values_equal(expected, arg),
            (Self::Predicate(pred), Some(arg)) => pred(arg),
        }
    }
}

impl From<OscType> for ArgMatcher {
    fn from(value: OscType) -> Self {
        Self::Value(value)
    }
}

impl From<i32> for ArgMatcher {
    fn from(value: i32) -> Self {
        Self::Value(OscType::Int(value))
    }
}

impl From<f32> for ArgMatcher {
    fn from(value: f32) -> Self {
        Self::Value(OscType::Float(value))
    }
}

impl From<&str> for ArgMatcher {
    fn from(value: &str) -> Self {
        Self::Value(OscType::String(value.to_string()))
    }
}

impl fmt::Debug for ArgMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

fn as_number(value: &OscType) -> Option<f64> {
    match value {
        OscType::Int(v) => Some(f64::from(*v)),
        OscType::Long(v) => Some(*v as f64),
        OscType::Float(v) => Some(f64::from(*v)),
        OscType::Double(v) => Some(*v),
        _ => None,
    }
}

/// Compare two OSC values. Numbers are compared by value regardless of their
/// wire type; everything else must be structurally equal.
pub fn osc_values_equal(a: &OscType, b: &OscType) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// A single filter layer.
#[derive(Clone, Debug)]
pub enum MessageFilter {
    /// Only messages from this sender.
    Source(SourceId),
    /// Only messages that arrived on this local port.
    RecvPort(u16),
    /// Only messages whose leading arguments fit the template.
    Args(Vec<ArgMatcher>),
}

impl MessageFilter {
    /// Check whether `msg` passes this filter.
    pub fn accepts(&self, msg: &InboundMessage) -> bool {
        match self {
            Self::Source(source) => source.matches(&msg.sender),
            Self::RecvPort(port) => msg.recv_port == *port,
            Self::Args(template) => template
                .iter()
                .enumerate()
                .all(|(i, slot)| slot.accepts(msg.args().get(i))),
        }
    }
}

/// A callback together with the filters guarding it.
#[derive(Clone)]
pub struct WrappedFunc {
    filters: Vec<MessageFilter>,
    func: Option<ResponderFn>,
}

impl WrappedFunc {
    /// Wrap `func` behind `filters`.
    pub fn new(func: Option<ResponderFn>, filters: Vec<MessageFilter>) -> Self {
        Self { filters, func }
    }

    /// Build the filter stack from the optional registration selectors.
    /// An empty template adds no filter.
    pub fn from_selectors(
        func: Option<ResponderFn>,
        src_id: Option<SourceId>,
        recv_port: Option<u16>,
        arg_template: Option<&[ArgMatcher]>,
    ) -> Self {
        let mut filters = Vec::new();
        if let Some(source) = src_id {
            filters.push(MessageFilter::Source(source));
        }
        if let Some(port) = recv_port {
            filters.push(MessageFilter::RecvPort(port));
        }
        if let Some(template) = arg_template.filter(|t| !t.is_empty()) {
            filters.push(MessageFilter::Args(template.to_vec()));
        }
        Self::new(func, filters)
    }

    /// The filter layers, outermost first.
    pub fn filters(&self) -> &[MessageFilter] {
        &self.filters
    }

    /// Check whether every filter accepts `msg`.
    pub fn accepts(&self, msg: &InboundMessage) -> bool {
        self.filters.iter().all(|filter| filter.accepts(msg))
    }

    /// Run the callback if every filter accepts. Returns whether it ran.
    pub fn call(&self, msg: &InboundMessage) -> bool {
        match &self.func {
            Some(func) if self.accepts(msg) => {
                func(msg);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for WrappedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedFunc")
            .field("filters", &self.filters)
            .field("has_func", &self.func.is_some())
            .finish()
    }
}

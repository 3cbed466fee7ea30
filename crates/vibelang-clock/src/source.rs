//! Inbound OSC message source.
//!
//! Transports (UDP/TCP sockets) live outside this crate. Whatever receives
//! datagrams hands them to an [`OscRouter`], which stamps them with elapsed
//! time and fans them out to every attached receive function - usually the
//! responder dispatchers.

use crate::clock::{osc_time_to_ntp, LogicalClock};
use crate::error::{Error, Result};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

/// OSC timetag meaning "immediately".
const IMMEDIATE_TIMETAG: u64 = 1;

/// A parsed message as delivered to receive functions.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Address and arguments.
    pub msg: OscMessage,
    /// Elapsed time the message is meant for (bundle time or arrival time).
    pub time: f64,
    /// Who sent it.
    pub sender: SocketAddr,
    /// Local port it arrived on.
    pub recv_port: u16,
}

impl InboundMessage {
    /// Create a message from its parts.
    pub fn new(msg: OscMessage, time: f64, sender: SocketAddr, recv_port: u16) -> Self {
        Self {
            msg,
            time,
            sender,
            recv_port,
        }
    }

    /// The OSC address.
    pub fn addr(&self) -> &str {
        &self.msg.addr
    }

    /// The message arguments.
    pub fn args(&self) -> &[OscType] {
        &self.msg.args
    }
}

/// Something that wants to see every inbound message.
pub trait RecvFunc: Send + Sync {
    fn receive(&self, msg: &InboundMessage);
}

impl<F> RecvFunc for F
where
    F: Fn(&InboundMessage) + Send + Sync,
{
    fn receive(&self, msg: &InboundMessage) {
        self(msg)
    }
}

/// Upstream source that receive functions attach to.
pub trait MessageSource: Send + Sync {
    /// Start delivering messages to `func`.
    fn attach(&self, func: Arc<dyn RecvFunc>);
    /// Stop delivering messages to `func`.
    fn detach(&self, func: &Arc<dyn RecvFunc>);
}

fn same_func(a: &Arc<dyn RecvFunc>, b: &Arc<dyn RecvFunc>) -> bool {
    // Data pointers only; vtable pointers are not unique.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Clone, Copy, Debug)]
struct TraceMode {
    hide_status: bool,
}

/// Fans inbound OSC out to attached receive functions.
pub struct OscRouter {
    clock: Arc<LogicalClock>,
    funcs: RwLock<Vec<Arc<dyn RecvFunc>>>,
    trace: Mutex<Option<TraceMode>>,
}

impl OscRouter {
    /// Create a router that converts bundle timetags with `clock`.
    pub fn new(clock: Arc<LogicalClock>) -> Self {
        Self {
            clock,
            funcs: RwLock::new(Vec::new()),
            trace: Mutex::new(None),
        }
    }

    /// Number of attached receive functions.
    pub fn attached_count(&self) -> usize {
        self.funcs.read().unwrap().len()
    }

    /// Deliver one message to every attached function.
    ///
    /// Functions run without any router lock held, so they may attach or
    /// detach while being called.
    pub fn receive(&self, msg: &InboundMessage) {
        self.trace_message(msg);
        let funcs: Vec<Arc<dyn RecvFunc>> = self.funcs.read().unwrap().clone();
        for func in funcs {
            func.receive(msg);
        }
    }

    /// Deliver a decoded packet. Bundles are flattened; their messages get
    /// the bundle time, plain messages get the current time.
    pub fn receive_packet(&self, packet: OscPacket, sender: SocketAddr, recv_port: u16) {
        let now = self.clock.elapsed_time();
        self.route_packet(packet, now, sender, recv_port);
    }

    /// Decode a raw datagram and deliver it.
    pub fn receive_datagram(&self, bytes: &[u8], sender: SocketAddr, recv_port: u16) -> Result<()> {
        let (_, packet) =
            rosc::decoder::decode_udp(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        self.receive_packet(packet, sender, recv_port);
        Ok(())
    }

    fn route_packet(&self, packet: OscPacket, time: f64, sender: SocketAddr, recv_port: u16) {
        match packet {
            OscPacket::Message(msg) => {
                self.receive(&InboundMessage::new(msg, time, sender, recv_port));
            }
            OscPacket::Bundle(bundle) => {
                let ntp = osc_time_to_ntp(bundle.timetag);
                let time = if ntp == IMMEDIATE_TIMETAG {
                    time
                } else {
                    self.clock.from_network_time(ntp)
                };
                for packet in bundle.content {
                    self.route_packet(packet, time, sender, recv_port);
                }
            }
        }
    }

    /// Turn message tracing on or off.
    ///
    /// While on, every inbound message is logged at info level.
    /// `hide_status` leaves out `/status.reply` messages.
    pub fn trace(&self, on: bool, hide_status: bool) {
        let mut trace = self.trace.lock().unwrap();
        *trace = on.then_some(TraceMode { hide_status });
    }

    /// Check whether tracing is on.
    pub fn is_tracing(&self) -> bool {
        self.trace.lock().unwrap().is_some()
    }

    fn trace_message(&self, msg: &InboundMessage) {
        let Some(mode) = *self.trace.lock().unwrap() else {
            return;
        };
        if mode.hide_status && msg.addr() == "/status.reply" {
            return;
        }
        log::info!(
            "[OSC] Message received:\n    time: {:.6}\n    address: {}\n    recv_port: {}\n    msg: {} {:?}",
            msg.time,
            msg.sender,
            msg.recv_port,
            msg.addr(),
            msg.args()
        );
    }
}

impl MessageSource for OscRouter {
    fn attach(&self, func: Arc<dyn RecvFunc>) {
        let mut funcs = self.funcs.write().unwrap();
        if !funcs.iter().any(|f| same_func(f, &func)) {
            funcs.push(func);
        }
    }

    fn detach(&self, func: &Arc<dyn RecvFunc>) {
        let mut funcs = self.funcs.write().unwrap();
        funcs.retain(|f| !same_func(f, func));
    }
}

impl std::fmt::Debug for OscRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OscRouter")
            .field("attached", &self.attached_count())
            .field("tracing", &self.is_tracing())
            .finish_non_exhaustive()
    }
}

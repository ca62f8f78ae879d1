//! Logging stand-in for the supervisor link.
//!
//! The real transport client (handshake, reconnection, event
//! subscriptions) lives outside this crate; it bridges inbound traffic
//! to the [`CommandRouter`](crate::rpc::CommandRouter) and implements
//! [`TransportLink`] for the outbound side. `LogLink` fills that slot
//! for bench runs: every emitted event lands in the log, and the
//! connected flag can be flipped to exercise the offline paths.

use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use serde_json::Value;

use crate::app::ports::TransportLink;

pub struct LogLink {
    connected: AtomicBool,
}

impl LogLink {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl TransportLink for LogLink {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, channel: &str, payload: &Value) {
        info!("emit {channel}: {payload}");
    }
}

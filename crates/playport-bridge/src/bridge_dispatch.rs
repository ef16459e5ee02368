use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bridge_command::{decode_bridge_command, route_bridge_command, CommandRoute};
use crate::bridge_envelope::{validate_frame_message, RawFrameMessage, SenderRef};
use crate::bridge_outbound::{BridgeOutbound, FramePort, HostEvent, OutboundEnvelope};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `BridgeIngressCounters` used across Playport components.
pub struct BridgeIngressCounters {
    pub accepted: u64,
    pub rejected: u64,
    pub ignored: u64,
}

/// Ingress and egress for one mounted frame.
pub struct FrameBridge {
    outbound: BridgeOutbound,
    counters: BridgeIngressCounters,
}

impl FrameBridge {
    pub fn new(port: Arc<dyn FramePort>) -> Self {
        Self {
            outbound: BridgeOutbound::new(port),
            counters: BridgeIngressCounters::default(),
        }
    }

    /// Validates and decodes one raw message. Rejected and unknown messages
    /// return `None` and leave everything but the counters untouched.
    pub fn receive(&mut self, raw: &RawFrameMessage) -> Option<CommandRoute> {
        let envelope = match validate_frame_message(raw) {
            Ok(envelope) => envelope,
            Err(rejection) => {
                self.counters.rejected = self.counters.rejected.saturating_add(1);
                tracing::debug!(
                    reason_code = rejection.code.as_str(),
                    detail = rejection.message.as_str(),
                    "frame message dropped"
                );
                return None;
            }
        };
        let Some(command) = decode_bridge_command(&envelope) else {
            self.counters.ignored = self.counters.ignored.saturating_add(1);
            tracing::debug!(
                method = envelope.method.as_str(),
                "frame command not recognized, ignoring"
            );
            return None;
        };

        self.outbound.latch_sender(&raw.sender);
        self.counters.accepted = self.counters.accepted.saturating_add(1);
        Some(route_bridge_command(command))
    }

    pub fn send(&self, envelope: &OutboundEnvelope) -> bool {
        self.outbound.send(envelope)
    }

    pub fn emit(&self, event: &HostEvent) -> bool {
        self.outbound.emit(event)
    }

    pub fn latched_sender(&self) -> Option<&SenderRef> {
        self.outbound.latch().get()
    }

    pub fn counters(&self) -> BridgeIngressCounters {
        self.counters
    }
}

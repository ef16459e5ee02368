//! Outbound envelopes addressed to the embedded frame.
//!
//! Replies reuse the command's wire type and wrap the result as
//! `[payload, errorOrNull]`. Delivery goes to the sender latched from the
//! first accepted inbound envelope; before that, outbound traffic is dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::bridge_command::BridgeMethod;
use crate::bridge_envelope::SenderRef;

pub const USER_CHANGED_EVENT_TYPE: &str = "userChanged";
pub const SIGNED_OUT_EVENT_TYPE: &str = "signedOut";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub method: String,
    pub data: Value,
}

impl OutboundEnvelope {
    pub fn ack(method: BridgeMethod, payload: Value, error: Option<Value>) -> Self {
        Self::wrapped(method.as_str(), payload, error)
    }

    pub fn wrapped(method: &str, payload: Value, error: Option<Value>) -> Self {
        Self {
            method: method.to_string(),
            data: json!([payload, error.unwrap_or(Value::Null)]),
        }
    }

    /// Payload slot of a `[payload, error]` reply.
    pub fn payload(&self) -> Option<&Value> {
        self.data.as_array().and_then(|slots| slots.first())
    }

    /// Error slot of a `[payload, error]` reply, `None` when it is null.
    pub fn error(&self) -> Option<&Value> {
        self.data
            .as_array()
            .and_then(|slots| slots.get(1))
            .filter(|value| !value.is_null())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Host-side changes the frame is told about.
pub enum HostEvent {
    UserChanged { user: Value },
    SignedOut,
}

impl HostEvent {
    pub fn to_envelope(&self) -> OutboundEnvelope {
        match self {
            Self::UserChanged { user } => {
                OutboundEnvelope::wrapped(USER_CHANGED_EVENT_TYPE, user.clone(), None)
            }
            Self::SignedOut => OutboundEnvelope::wrapped(SIGNED_OUT_EVENT_TYPE, Value::Null, None),
        }
    }
}

#[derive(Debug, Error)]
pub enum FramePortError {
    #[error("frame window is gone")]
    Detached,
    #[error("frame port failed: {0}")]
    Failed(String),
}

/// Transport used to post envelopes into the frame.
pub trait FramePort: Send + Sync {
    fn post(&self, target: &SenderRef, envelope: &OutboundEnvelope) -> Result<(), FramePortError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderLatch {
    sender: Option<SenderRef>,
}

impl SenderLatch {
    /// Latches `sender` unless one was latched already. Returns true on first latch.
    pub fn latch_once(&mut self, sender: &SenderRef) -> bool {
        if self.sender.is_some() {
            return false;
        }
        self.sender = Some(sender.clone());
        true
    }

    pub fn get(&self) -> Option<&SenderRef> {
        self.sender.as_ref()
    }
}

pub struct BridgeOutbound {
    latch: SenderLatch,
    port: Arc<dyn FramePort>,
}

impl BridgeOutbound {
    pub fn new(port: Arc<dyn FramePort>) -> Self {
        Self {
            latch: SenderLatch::default(),
            port,
        }
    }

    pub fn latch(&self) -> &SenderLatch {
        &self.latch
    }

    pub fn latch_sender(&mut self, sender: &SenderRef) -> bool {
        let latched = self.latch.latch_once(sender);
        if latched {
            tracing::debug!(sender = sender.as_str(), "frame sender latched");
        }
        latched
    }

    /// Posts to the latched sender. Returns whether the port accepted the envelope.
    pub fn send(&self, envelope: &OutboundEnvelope) -> bool {
        let Some(target) = self.latch.get() else {
            tracing::debug!(
                method = envelope.method.as_str(),
                "outbound envelope dropped: no frame sender latched"
            );
            return false;
        };
        match self.port.post(target, envelope) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(
                    method = envelope.method.as_str(),
                    %error,
                    "outbound envelope not delivered"
                );
                false
            }
        }
    }

    pub fn emit(&self, event: &HostEvent) -> bool {
        self.send(&event.to_envelope())
    }
}

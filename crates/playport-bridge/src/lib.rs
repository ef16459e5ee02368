//! Message protocol between the host page and an embedded game frame.
//!
//! Provides envelope validation, the closed command table and its routing,
//! outbound acknowledgements addressed to the latched frame sender, and the
//! capability handlers that adapt frame commands to host collaborators.
//!
//! ```rust
//! use std::sync::Arc;
//! use playport_bridge::{
//!     CommandRoute, FrameBridge, FramePort, FramePortError, OutboundEnvelope, RawFrameMessage,
//!     SenderRef, SessionCommand,
//! };
//!
//! struct NullPort;
//! impl FramePort for NullPort {
//!     fn post(&self, _: &SenderRef, _: &OutboundEnvelope) -> Result<(), FramePortError> {
//!         Ok(())
//!     }
//! }
//!
//! let mut bridge = FrameBridge::new(Arc::new(NullPort));
//! let route = bridge.receive(&RawFrameMessage {
//!     transport_type: "playport:message".to_string(),
//!     sender: SenderRef::new("frame-1"),
//!     body: r#"{"type":"toggleFullscreen","data":{}}"#.to_string(),
//! });
//! assert_eq!(route, Some(CommandRoute::Session(SessionCommand::ToggleFullscreen)));
//! ```

pub mod bridge_command;
pub mod bridge_dispatch;
pub mod bridge_envelope;
pub mod bridge_handlers;
pub mod bridge_outbound;

pub use bridge_command::*;
pub use bridge_dispatch::*;
pub use bridge_envelope::*;
pub use bridge_handlers::*;
pub use bridge_outbound::*;

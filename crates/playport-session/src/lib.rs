//! Session lifecycle for an embedded game frame.
//!
//! Holds the view state machine, engagement timers (auth nudge, back
//! confirmation and informer countdowns), the payment hand-off with provider
//! fallback, and the tokio driver that mounts a session against a frame bridge.

pub mod session_config;
pub mod session_countdown;
pub mod session_machine;
pub mod session_nudge;
pub mod session_payment;
pub mod session_payment_http;
pub mod session_runtime;
pub mod session_timer;

pub use session_config::*;
pub use session_countdown::*;
pub use session_machine::*;
pub use session_nudge::*;
pub use session_payment::*;
pub use session_payment_http::*;
pub use session_runtime::*;
pub use session_timer::*;

//! Media-stream gateway for KAI Assist.
//!
//! Accepts telephony media-stream WebSockets, opens one realtime model
//! connection per call, relays audio both ways, and drives the scripted
//! support conversation: knowledge lookups, barge-in, and a single
//! idempotent call termination that files a ticket.

pub mod call;
pub mod connection;
pub mod dispatch;
pub mod interruption;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod realtime;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
pub mod termination;
pub mod twiml;

pub use call::{CallSession, Outbound};
pub use registry::CallRegistry;
pub use server::{router, start_gateway};
pub use state::{CallContext, GatewayState};

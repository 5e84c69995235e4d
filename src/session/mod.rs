//! Connection and stream sessions
//!
//! Transport adapters drive one [`ConnectionMachine`] per connection with
//! [`TransportEvent`]s; the machine owns the [`Client`], its streams and their
//! inbound buffers, and talks to the shared subscriber registry.

pub mod client;
pub mod context;
pub mod event;
pub mod machine;
pub mod state;
pub mod stream;

pub use client::{Client, ClientLink, ClientRole};
pub use context::{SessionContext, SessionLimits};
pub use event::{Directive, ShutdownInitiator, TransportEvent};
pub use machine::ConnectionMachine;
pub use state::ConnectionPhase;
pub use stream::{StreamPhase, StreamState};

//! Wire protocol
//!
//! Messages are short `|`-delimited text lines. The [`buffer`] module assembles lines out
//! of the byte chunks a stream delivers, and [`message`] turns each line into a typed
//! request or response.

pub mod buffer;
pub mod constants;
pub mod message;

pub use buffer::{Frame, InboundBuffer};
pub use message::{Event, Publication, Request, Response};

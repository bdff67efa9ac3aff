//! Domain model module declarations.

pub mod event;
pub mod message;
pub mod port;

pub use event::{Event, EventKind};
pub use message::{Envelope, Message};
pub use port::{Port, PortKey, Properties};

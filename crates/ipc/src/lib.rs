//! Typed mailboxes, the deferred-event scheduler and response routing.

pub mod mailbox;
pub mod message;
pub mod routing;
pub mod scheduler;

pub use mailbox::{Mailbox, Mailboxes, SendError};
pub use message::{Body, Kind, Message};
pub use scheduler::DeferredScheduler;

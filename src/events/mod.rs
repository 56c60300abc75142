//! Typed event stream connecting a running loop to its observers.

pub mod stream;
pub mod types;

pub use stream::{DEFAULT_EVENT_CAPACITY, EventSender, EventStream, channel};
pub use types::{Event, event_types};

//! Event Bus
//!
//! Typed in-process publish/subscribe. Topics are a closed set, payloads a
//! closed enum, and each topic is backed by its own broadcast channel, so a
//! slow subscriber on one topic never delays another topic's delivery.

mod bus;

pub use bus::{Event, EventBus, Topic, DEFAULT_CHANNEL_CAPACITY};

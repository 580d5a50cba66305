#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Events
//!
//! The event-sourcing backbone of the MBFlow workflow engine:
//!
//! - [`Event`] / [`EventType`] — the immutable per-execution event stream
//! - [`EventStore`] — the append-only log contract, with
//!   [`InMemoryEventStore`] for tests and embedded use
//! - [`Observer`] / [`ObserverFanout`] — order-preserving, non-blocking
//!   lifecycle notification delivery

pub mod event;
pub mod fanout;
pub mod observer;
pub mod store;

pub use event::{Event, EventType};
pub use fanout::{CollectingObserver, ObserverFanout, TracingObserver};
pub use observer::{Notification, Observer, dispatch};
pub use store::{EventError, EventStore, InMemoryEventStore};

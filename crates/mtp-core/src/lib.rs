//! Core MTP/PTP engine: wire codec, device session state machine, capability
//! probe, quirks resolution, bulk transfer engine, transfer journal, and the
//! live object index + crawl scheduler.
//!
//! This crate has no USB backend of its own: callers provide a [`transport::Transport`]
//! implementation (a real libusb-backed one, or [`transport::VirtualTransport`] for tests).

pub mod actor;
pub mod codec;
pub mod error;
pub mod events;
pub mod index;
pub mod journal;
pub mod probe;
pub mod ptp;
pub mod quirks;
pub mod transfer;
pub mod transport;

pub use actor::{ActorState, DeviceActor, Registry};
pub use error::MtpError;
pub use events::EventBridge;
pub use journal::{InMemoryJournal, SqliteJournal, TransferJournal};
pub use probe::ProbeReceipt;
pub use quirks::{DevicePolicy, QuirksDb};
pub use transfer::TransferEngine;

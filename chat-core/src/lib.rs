//! # chat-core
//!
//! Pure client-side logic for veilchat (no I/O, instant tests).
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is passed in as `Instant` values rather than
//! read from a clock, so tests are deterministic.
//!
//! The actual I/O (network, timers) is performed by `chat-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dedup;
pub mod delivery;
pub mod expiry;
pub mod state;
pub mod typing;

pub use dedup::{DedupTracker, DEFAULT_DEDUP_CAPACITY};
pub use delivery::{DeliveryLedger, LedgerError, Transition};
pub use expiry::ExpiryQueue;
pub use state::{calculate_backoff, Action, ConnectionEvent, ConnectionState, Event};
pub use typing::{TypingDebouncer, TypingIndicators, TYPING_DEBOUNCE, TYPING_EXPIRY};

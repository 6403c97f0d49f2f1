//! Raw controller input.
//!
//! [`collector`] polls the gamepad through gilrs and feeds timestamped
//! [`event::RawInputEvent`]s into the router channel.
//!
//! ```text
//! Gamepad ──► Collector ──► mpsc ──► Event Router
//! ```

pub mod collector;
pub mod event;

pub use collector::{CollectorError, CollectorHandle, CollectorSettings};
pub use event::{ButtonTransition, RawInputEvent};

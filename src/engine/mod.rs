//! The input mapping and macro playback engine.
//!
//! One [`router::EventRouter`] per controller device drives the pipeline:
//!
//! ```text
//! RawInputEvent ──► Resolver ──► Curve ─────────► OutputSink
//!                      │
//!                      └──► Scheduler (macros) ─► OutputSink
//! ```
//!
//! [`resolver`] and [`curve`] are pure functions over the active profile
//! snapshot; [`scheduler`] owns all playback state; [`recorder`] captures
//! raw input into new macros.

pub mod curve;
pub mod recorder;
pub mod resolver;
pub mod router;
pub mod scheduler;

pub use recorder::MacroRecorder;
pub use resolver::{resolve, ResolvedAction};
pub use router::{RouterError, RouterHandle, DEFAULT_TICK_INTERVAL};
pub use scheduler::{MacroScheduler, SchedulerError};

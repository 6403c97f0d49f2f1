//! Profiles, macros and their storage.
//!
//! [`model`] holds the plain data types, [`store`] serves immutable
//! snapshots to running routers and broadcasts active-profile changes,
//! [`library`] persists everything as TOML under the user config
//! directory.

pub mod library;
pub mod model;
pub mod store;

pub use library::{LibraryAction, LibraryError, LibraryManager, ProfileLibrary};
pub use model::{
    AnalogSettings, AxisCode, AxisTuning, ButtonCode, Macro, MacroAction, MacroId, PlaybackPolicy,
    Profile, ProfileId,
};
pub use store::{ProfileStore, StoreError};

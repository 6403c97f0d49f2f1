//! Data model for profiles and macros.
//!
//! Mirrors what the persistence layer stores: named profiles bundling
//! button remaps, per-axis analog tuning and macro-trigger assignments,
//! plus macros as ordered lists of timed synthetic actions. The engine
//! only ever sees immutable snapshots of these types.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Logical button code, shared between physical input and synthetic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonCode {
    A,
    B,
    X,
    Y,
    LeftBumper,
    RightBumper,
    LeftTriggerButton,
    RightTriggerButton,
    Select,
    Start,
    Guide,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
}

/// Analog axis code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisCode {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
}

/// Identifier of a stored profile.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ProfileId(pub u64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile#{}", self.0)
    }
}

/// Identifier of a stored macro.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MacroId(pub u64);

impl fmt::Display for MacroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "macro#{}", self.0)
    }
}

/// What a released trigger button does to a macro that is still playing.
///
/// `PlayToCompletion` matches the behavior users know from the original
/// app: once triggered, the sequence always runs to its end. `HoldToPlay`
/// cancels the session as soon as the trigger is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackPolicy {
    #[default]
    PlayToCompletion,
    HoldToPlay,
}

/// Calibration parameters for a single analog axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTuning {
    /// Inner dead-zone as a fraction of full deflection (0.0-1.0).
    pub deadzone: f32,

    /// Exponent of the sensitivity curve applied to the normalized
    /// magnitude. 1.0 is linear; >1.0 flattens the center, <1.0 steepens it.
    pub curve_exponent: f32,

    /// Gain applied after the curve.
    pub sensitivity: f32,

    /// Negate the calibrated output.
    pub invert: bool,
}

impl Default for AxisTuning {
    fn default() -> Self {
        Self {
            deadzone: 0.1,
            curve_exponent: 1.0,
            sensitivity: 1.0,
            invert: false,
        }
    }
}

/// Per-axis analog calibration for one profile.
///
/// Axes without an explicit entry fall back to [`AxisTuning::default`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalogSettings {
    pub axes: HashMap<AxisCode, AxisTuning>,
}

impl AnalogSettings {
    pub fn tuning_for(&self, axis: AxisCode) -> AxisTuning {
        self.axes.get(&axis).copied().unwrap_or_default()
    }

    pub fn set_tuning(&mut self, axis: AxisCode, tuning: AxisTuning) {
        self.axes.insert(axis, tuning);
    }
}

/// A named bundle of button remaps, analog tuning and macro assignments.
///
/// At most one profile in a library carries the `active` flag; flipping it
/// goes through `ProfileStore::activate`, never through direct field writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,

    /// Physical button -> logical output button.
    pub button_mappings: HashMap<ButtonCode, ButtonCode>,

    pub analog_settings: AnalogSettings,

    /// Trigger button -> macro launched on press. Takes precedence over a
    /// `button_mappings` entry for the same physical button.
    pub macro_assignments: HashMap<ButtonCode, MacroId>,

    pub playback_policy: PlaybackPolicy,
}

impl Profile {
    pub fn new(id: ProfileId, name: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            active: false,
            created_at: now,
            updated_at: now,
            button_mappings: HashMap::new(),
            analog_settings: AnalogSettings::default(),
            macro_assignments: HashMap::new(),
            playback_policy: PlaybackPolicy::default(),
        }
    }

    /// Remap a physical button to a logical output button.
    pub fn map_button(&mut self, physical: ButtonCode, logical: ButtonCode) {
        self.button_mappings.insert(physical, logical);
        self.touch();
    }

    /// Assign a macro to a trigger button.
    pub fn assign_macro(&mut self, trigger: ButtonCode, macro_id: MacroId) {
        self.macro_assignments.insert(trigger, macro_id);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Local::now();
    }
}

/// One step of a macro sequence.
///
/// `delay_ms` is the gap before the action fires, counted from the end of
/// the previous action. `Hold` presses, keeps the button down for
/// `hold_ms`, then releases; nothing later in the sequence runs during the
/// hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacroAction {
    Press {
        button: ButtonCode,
        delay_ms: u64,
    },
    Release {
        button: ButtonCode,
        delay_ms: u64,
    },
    Hold {
        button: ButtonCode,
        hold_ms: u64,
        delay_ms: u64,
    },
    SetAxis {
        axis: AxisCode,
        value: f32,
        delay_ms: u64,
    },
    Wait {
        wait_ms: u64,
    },
}

impl MacroAction {
    /// Total time this action contributes to the sequence.
    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Press { delay_ms, .. }
            | Self::Release { delay_ms, .. }
            | Self::SetAxis { delay_ms, .. } => *delay_ms,
            Self::Hold {
                hold_ms, delay_ms, ..
            } => delay_ms + hold_ms,
            Self::Wait { wait_ms } => *wait_ms,
        }
    }
}

/// A named, ordered sequence of timed synthetic input actions.
///
/// `total_duration_ms` is a denormalized cache over the actions' timing
/// fields. Both stay private so the cache can only change together with
/// the sequence, through [`Macro::with_actions`] or [`Macro::set_actions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub id: MacroId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    actions: Vec<MacroAction>,
    total_duration_ms: u64,
}

impl Macro {
    pub fn new(id: MacroId, name: impl Into<String>) -> Self {
        Self::with_actions(id, name, String::new(), Vec::new())
    }

    pub fn with_actions(
        id: MacroId,
        name: impl Into<String>,
        description: impl Into<String>,
        actions: Vec<MacroAction>,
    ) -> Self {
        let now = Local::now();
        let total_duration_ms = Self::compute_duration(&actions);
        Self {
            id,
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
            actions,
            total_duration_ms,
        }
    }

    /// Replaces the action sequence and recomputes the duration cache in
    /// the same step.
    pub fn set_actions(&mut self, actions: Vec<MacroAction>) {
        self.total_duration_ms = Self::compute_duration(&actions);
        self.actions = actions;
        self.updated_at = Local::now();
    }

    pub fn actions(&self) -> &[MacroAction] {
        &self.actions
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether the stored cache matches the actions. Deserialized data is
    /// checked with this and repaired through [`Macro::set_actions`].
    pub fn duration_consistent(&self) -> bool {
        self.total_duration_ms == Self::compute_duration(&self.actions)
    }

    fn compute_duration(actions: &[MacroAction]) -> u64 {
        actions.iter().map(MacroAction::duration_ms).sum()
    }
}

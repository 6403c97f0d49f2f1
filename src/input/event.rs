//! Raw input event types produced by the collector.

use crate::profile::model::{AxisCode, ButtonCode};
use chrono::{DateTime, Local};

/// Edge of a physical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonTransition {
    Pressed,
    Released,
}

/// One raw controller event with a precise chrono timestamp.
///
/// Axis samples arrive per axis, already in the -1.0..=1.0 (sticks) or
/// 0.0..=1.0 (triggers) range gilrs reports; calibration happens later in
/// the curve transformer against the active profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawInputEvent {
    Button {
        button: ButtonCode,
        transition: ButtonTransition,
        timestamp: DateTime<Local>,
    },
    Axis {
        axis: AxisCode,
        value: f32,
        timestamp: DateTime<Local>,
    },
}

impl RawInputEvent {
    pub fn timestamp(&self) -> DateTime<Local> {
        match self {
            Self::Button { timestamp, .. } | Self::Axis { timestamp, .. } => *timestamp,
        }
    }
}

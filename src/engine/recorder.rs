//! Macro recorder: captures raw input into a replayable action sequence.
//!
//! Fed from the same raw event stream the router consumes. Each recorded
//! action carries the gap to the previous one, so playback through the
//! scheduler reproduces the original timing. Axis samples are gated by a
//! minimum delta, otherwise stick noise floods the sequence.

use crate::input::event::{ButtonTransition, RawInputEvent};
use crate::profile::model::{AxisCode, Macro, MacroAction, MacroId};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use tracing::{debug, info};

/// Minimum change between two recorded samples of the same axis.
pub const DEFAULT_AXIS_EPSILON: f32 = 0.05;

/// Records raw input events into an ordered, timed [`MacroAction`] list.
#[derive(Debug)]
pub struct MacroRecorder {
    started_at: DateTime<Local>,
    last_action_at: DateTime<Local>,
    actions: Vec<MacroAction>,
    last_axis_values: HashMap<AxisCode, f32>,
    axis_epsilon: f32,
}

impl MacroRecorder {
    pub fn start(now: DateTime<Local>) -> Self {
        info!("Macro recording started at {}", now.format("%H:%M:%S%.3f"));
        Self {
            started_at: now,
            last_action_at: now,
            actions: Vec::new(),
            last_axis_values: HashMap::new(),
            axis_epsilon: DEFAULT_AXIS_EPSILON,
        }
    }

    pub fn with_axis_epsilon(mut self, epsilon: f32) -> Self {
        self.axis_epsilon = epsilon.max(0.0);
        self
    }

    /// Appends the action for one raw event, if it records at all.
    pub fn record(&mut self, event: &RawInputEvent) {
        let timestamp = event.timestamp();
        let delay_ms = (timestamp - self.last_action_at).num_milliseconds().max(0) as u64;

        let action = match *event {
            RawInputEvent::Button {
                button, transition, ..
            } => match transition {
                ButtonTransition::Pressed => MacroAction::Press { button, delay_ms },
                ButtonTransition::Released => MacroAction::Release { button, delay_ms },
            },
            RawInputEvent::Axis { axis, value, .. } => {
                let last = self.last_axis_values.get(&axis).copied().unwrap_or(0.0);
                if (value - last).abs() < self.axis_epsilon {
                    return;
                }
                self.last_axis_values.insert(axis, value);
                MacroAction::SetAxis {
                    axis,
                    value,
                    delay_ms,
                }
            }
        };

        debug!("Recorded action {:?}", action);
        self.actions.push(action);
        self.last_action_at = timestamp;
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Finalizes the recording into a macro; the duration cache is
    /// recomputed by the constructor.
    pub fn finish(
        self,
        id: MacroId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Macro {
        let definition = Macro::with_actions(id, name, description, self.actions);
        info!(
            "Macro recording finished: {} actions, {}ms",
            definition.actions().len(),
            definition.total_duration_ms()
        );
        definition
    }
}

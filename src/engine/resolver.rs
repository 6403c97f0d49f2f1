//! Mapping resolver: raw input event -> resolved action.
//!
//! Pure lookup against the active profile snapshot; the router decides what
//! to do with the result. A button that is both remapped and assigned a
//! macro resolves as macro-trigger only, the remap entry is ignored.

use crate::input::event::{ButtonTransition, RawInputEvent};
use crate::profile::model::{AxisCode, ButtonCode, MacroId, Profile};

/// What the active profile says a raw event means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedAction {
    /// Forward the (possibly remapped) button edge unchanged.
    Passthrough {
        button: ButtonCode,
        transition: ButtonTransition,
    },

    /// The button is a macro trigger; press starts, release may cancel.
    MacroTrigger {
        macro_id: MacroId,
        trigger: ButtonCode,
        transition: ButtonTransition,
    },

    /// Axis sample, calibrated by the curve transformer before forwarding.
    AnalogPassthrough { axis: AxisCode, value: f32 },
}

/// Resolves one raw event against a profile snapshot.
pub fn resolve(event: &RawInputEvent, profile: &Profile) -> ResolvedAction {
    match *event {
        RawInputEvent::Button {
            button, transition, ..
        } => {
            if let Some(&macro_id) = profile.macro_assignments.get(&button) {
                return ResolvedAction::MacroTrigger {
                    macro_id,
                    trigger: button,
                    transition,
                };
            }

            let output = profile
                .button_mappings
                .get(&button)
                .copied()
                .unwrap_or(button);
            ResolvedAction::Passthrough {
                button: output,
                transition,
            }
        }
        RawInputEvent::Axis { axis, value, .. } => {
            ResolvedAction::AnalogPassthrough { axis, value }
        }
    }
}

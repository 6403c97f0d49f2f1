//! Curve transformer: raw analog samples -> calibrated output.
//!
//! Pure and deterministic. The pipeline per sample is inner dead-zone,
//! normalization of the remaining magnitude, sensitivity curve
//! (`magnitude^exponent`, sign preserved), gain, optional inversion, and a
//! final clamp to the valid output range. Monotonic for same-sign inputs
//! beyond the dead-zone, which is what makes stick response predictable.

use crate::profile::model::{AnalogSettings, AxisCode, AxisTuning};

/// Valid output range for calibrated samples.
pub const OUTPUT_MIN: f32 = -1.0;
pub const OUTPUT_MAX: f32 = 1.0;

/// Looks up the axis tuning in the profile settings and calibrates one
/// raw sample.
pub fn transform(axis: AxisCode, raw: f32, settings: &AnalogSettings) -> f32 {
    apply_tuning(raw, &settings.tuning_for(axis))
}

/// Calibrates one raw sample against a single axis tuning.
pub fn apply_tuning(raw: f32, tuning: &AxisTuning) -> f32 {
    // Degenerate tuning values are clamped rather than rejected; stored
    // profiles are user data and must never panic the input path.
    let deadzone = tuning.deadzone.clamp(0.0, 0.99);
    let exponent = tuning.curve_exponent.max(0.01);
    let sensitivity = tuning.sensitivity.max(0.0);

    let magnitude = raw.abs();
    if magnitude <= deadzone {
        return 0.0;
    }

    // Rescale the live range outside the dead-zone back to 0.0-1.0.
    let normalized = ((magnitude - deadzone) / (1.0 - deadzone)).min(1.0);

    let curved = normalized.powf(exponent) * sensitivity;
    let signed = curved.copysign(raw);
    let oriented = if tuning.invert { -signed } else { signed };

    oriented.clamp(OUTPUT_MIN, OUTPUT_MAX)
}

//! Channel drive-level conversions between normalized intensities and the
//! device-native encodings.
//!
//! The standard fixtures (Octa, Penta) drive each channel with a plain
//! 16-bit value. The Light Replicator instead takes a PWM/AM pair per
//! channel: a 6-bit amplitude-modulation value with a floor of 4, and a
//! 16-bit PWM value derived from it. The AM value is chosen first and the
//! PWM value computed against it; deriving PWM first produces visibly
//! different output on real hardware.

pub const PWM_BITS: u32 = 16;
pub const AM_BITS: u32 = 6;
/// AM values below this flicker on real hardware, so the firmware floor is 4.
pub const AM_FLOOR: u32 = 4;

pub const PWM_MAX: u32 = (1 << PWM_BITS) - 1;
pub const AM_MAX: u32 = (1 << AM_BITS) - 1;

/// `PWM_MAX * AM_MAX`, the divisor mapping a pair back to an intensity.
const INTENSITY_DIVISOR: f64 = (PWM_MAX * AM_MAX) as f64;

/// One Light Replicator channel encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmAm {
    pub pwm: u16,
    pub am: u8,
}

/// Encodes a fractional intensity as a PWM/AM pair.
///
/// Inputs outside `[0, 1]` are clamped. The quantization is asymmetric:
/// round AM to the nearest representable value, clamp it into
/// `[AM_FLOOR, AM_MAX]`, then pick the PWM value that compensates.
pub fn pwm_am_from_intensity(intensity: f64) -> PwmAm {
    let intensity = intensity.clamp(0.0, 1.0);
    let fam = AM_MAX as f64 * intensity;
    let am = (fam.round() as i64).clamp(AM_FLOOR as i64, AM_MAX as i64) as u32;
    let pwm = (fam * PWM_MAX as f64 / am as f64).round();
    PwmAm {
        pwm: pwm.clamp(0.0, PWM_MAX as f64) as u16,
        am: am as u8,
    }
}

/// Decodes a PWM/AM pair back to a fractional intensity.
pub fn intensity_from_pwm_am(pwm: u16, am: u8) -> f64 {
    pwm as f64 * am as f64 / INTENSITY_DIVISOR
}

/// Encodes a fractional intensity as a standard-fixture 16-bit value.
pub fn raw_from_intensity(intensity: f64) -> u16 {
    let raw = (intensity.clamp(0.0, 1.0) * PWM_MAX as f64).round();
    raw as u16
}

/// Decodes a standard-fixture 16-bit value to a fractional intensity.
pub fn intensity_from_raw(raw: u16) -> f64 {
    raw as f64 / PWM_MAX as f64
}

/// Decodes a `PS?` value list from a standard fixture.
pub fn decode_standard_levels(raw: &[u32]) -> Vec<f64> {
    raw.iter().map(|&v| v as f64 / PWM_MAX as f64).collect()
}

/// Decodes a `PS?` value list from a Light Replicator, where the values
/// alternate PWM, AM per channel. A trailing unpaired value is dropped.
pub fn decode_replicator_levels(raw: &[u32]) -> Vec<f64> {
    raw.chunks_exact(2)
        .map(|pair| pair[0] as f64 * pair[1] as f64 / INTENSITY_DIVISOR)
        .collect()
}

/// Encodes a vector of fractional intensities for a standard fixture.
pub fn encode_standard_levels(levels: &[f64]) -> Vec<u16> {
    levels.iter().map(|&x| raw_from_intensity(x)).collect()
}

/// Encodes a vector of fractional intensities for a Light Replicator.
pub fn encode_replicator_levels(levels: &[f64]) -> Vec<PwmAm> {
    levels.iter().map(|&x| pwm_am_from_intensity(x)).collect()
}

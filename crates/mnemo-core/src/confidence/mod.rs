//! Confidence and Heat Math
//!
//! Pure functions for every numeric policy in the engine. Network managers,
//! the scheduler and the consolidator call these instead of doing their own
//! arithmetic, so the clamp ranges below hold everywhere.
//!
//! | Function | Output range |
//! |---|---|
//! | [`reinforce`] | `[0, 1]` |
//! | [`challenge`] | `[0.01, 1]` |
//! | [`time_decay`] | `[floor, 1]` |
//! | [`exp_decay`], [`rate_decay`] | `>= 0` |
//! | [`weighted_merge`], [`evidence_confidence`] | `[0, 1]` |
//! | [`heat_score`], [`bump_heat`] | `[0, 2]` |
//!
//! All functions are total. NaN arguments are replaced with a neutral
//! value before clamping.

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default reinforcement strength
pub const DEFAULT_REINFORCE_STRENGTH: f64 = 0.2;

/// Largest reinforcement strength accepted
pub const MAX_REINFORCE_STRENGTH: f64 = 0.5;

/// Default challenge multiplier
pub const DEFAULT_CHALLENGE_STRENGTH: f64 = 0.7;

/// A challenged confidence never drops below this
pub const MIN_CHALLENGED_CONFIDENCE: f64 = 0.01;

/// Default linear decay per day
pub const DEFAULT_DECAY_RATE: f64 = 0.01;

/// Default floor for linear confidence decay
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.1;

/// Heat half-life in hours (one week)
pub const HEAT_HALF_LIFE_HOURS: f64 = 168.0;

/// Default weight of the old value in [`weighted_merge`]
pub const DEFAULT_OLD_WEIGHT: f64 = 0.7;

/// Default base for [`evidence_confidence`]
pub const DEFAULT_EVIDENCE_BASE: f64 = 0.5;

/// Upper bound of every heat score
pub const MAX_HEAT: f64 = 2.0;

/// Heat of a freshly stored memory
pub const INITIAL_HEAT: f64 = 1.0;

/// Strength added when an existing relationship is seen again
pub const RELATIONSHIP_STRENGTH_STEP: f64 = 0.1;

// ============================================================================
// HELPERS
// ============================================================================

#[inline]
fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_nan() { fallback } else { value }
}

/// Clamp to `[0, 1]`, mapping NaN to 0
#[inline]
pub fn clamp_unit(value: f64) -> f64 {
    finite_or(value, 0.0).clamp(0.0, 1.0)
}

/// Clamp to `[0, MAX_HEAT]`, mapping NaN to 0
#[inline]
pub fn clamp_heat(value: f64) -> f64 {
    finite_or(value, 0.0).clamp(0.0, MAX_HEAT)
}

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Move confidence toward 1.0 with diminishing returns.
///
/// `strength` is clamped to `[0, 0.5]`.
pub fn reinforce(confidence: f64, strength: f64) -> f64 {
    let c = clamp_unit(confidence);
    let s = finite_or(strength, 0.0).clamp(0.0, MAX_REINFORCE_STRENGTH);
    clamp_unit(c + (1.0 - c) * s)
}

/// Scale confidence down proportionally. Never reaches zero.
pub fn challenge(confidence: f64, strength: f64) -> f64 {
    let c = clamp_unit(confidence);
    let s = clamp_unit(finite_or(strength, 1.0));
    (c * s).clamp(MIN_CHALLENGED_CONFIDENCE, 1.0)
}

/// Linear decay that slows as confidence approaches 1.0.
///
/// `rate` is clamped to `[0, 0.1]` and `floor` to `[0, 0.5]`.
pub fn time_decay(confidence: f64, days: f64, rate: f64, floor: f64) -> f64 {
    let c = clamp_unit(confidence);
    let days = finite_or(days, 0.0).max(0.0);
    let rate = finite_or(rate, DEFAULT_DECAY_RATE).clamp(0.0, 0.1);
    let floor = finite_or(floor, DEFAULT_CONFIDENCE_FLOOR).clamp(0.0, 0.5);
    let decayed = c - days * rate * (1.0 - c);
    finite_or(decayed, floor).clamp(floor, 1.0)
}

/// Exponential decay used for heat, floored at zero.
///
/// `half_life_hours` is raised to at least one hour.
pub fn exp_decay(value: f64, hours: f64, half_life_hours: f64) -> f64 {
    let v = finite_or(value, 0.0).max(0.0);
    let hours = finite_or(hours, 0.0).max(0.0);
    let half_life = finite_or(half_life_hours, HEAT_HALF_LIFE_HOURS).max(1.0);
    finite_or(v * (-hours / half_life).exp(), 0.0).max(0.0)
}

/// Exponential decay by a per-day rate: `value * exp(-days * rate)`.
pub fn rate_decay(value: f64, days: f64, rate_per_day: f64) -> f64 {
    let v = finite_or(value, 0.0).max(0.0);
    let days = finite_or(days, 0.0).max(0.0);
    let rate = finite_or(rate_per_day, 0.0).clamp(0.0, 1.0);
    finite_or(v * (-days * rate).exp(), 0.0).max(0.0)
}

/// Blend an existing value with a new observation.
pub fn weighted_merge(old: f64, new: f64, old_weight: f64) -> f64 {
    let w = clamp_unit(finite_or(old_weight, DEFAULT_OLD_WEIGHT));
    clamp_unit(clamp_unit(old) * w + clamp_unit(new) * (1.0 - w))
}

/// Confidence implied by counts of supporting and contradicting evidence.
///
/// `base` is clamped to `[0.3, 0.7]`; with no evidence the base is returned.
pub fn evidence_confidence(supporting: usize, contradicting: usize, base: f64) -> f64 {
    let base = finite_or(base, DEFAULT_EVIDENCE_BASE).clamp(0.3, 0.7);
    let total = supporting + contradicting;
    if total == 0 {
        return base;
    }
    let ratio = (supporting as f64 - contradicting as f64) / total as f64;
    clamp_unit(base + ratio * (1.0 - base) * 0.5)
}

// ============================================================================
// HEAT
// ============================================================================

/// Blend of access frequency, recency and importance in `[0, 2]`.
///
/// `0.3 * ln(access_count + 1) / 5 + 0.5 * exp(-hours / 168) + 0.2 * importance`
pub fn heat_score(access_count: i64, hours_since_access: f64, importance: f64) -> f64 {
    let frequency = ((access_count.max(0) as f64) + 1.0).ln() / 5.0;
    let hours = finite_or(hours_since_access, f64::INFINITY).max(0.0);
    let recency = (-hours / HEAT_HALF_LIFE_HOURS).exp();
    let importance = clamp_heat(importance);
    clamp_heat(0.3 * frequency + 0.5 * recency + 0.2 * importance)
}

/// Add `amount` to a unit-range value such as relationship strength,
/// capped at 1.
pub fn bump_unit(value: f64, amount: f64) -> f64 {
    clamp_unit(clamp_unit(value) + finite_or(amount, 0.0))
}

/// Add `amount` to a heat score, capped at [`MAX_HEAT`].
pub fn bump_heat(heat: f64, amount: f64) -> f64 {
    clamp_heat(clamp_heat(heat) + finite_or(amount, 0.0))
}

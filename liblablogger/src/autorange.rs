use serde::{Deserialize, Serialize};

/// Preamplifier range code understood by the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeCode(pub i8);

impl std::fmt::Display for RangeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const RANGE_A: RangeCode = RangeCode(2);
pub const RANGE_B: RangeCode = RangeCode(4);
pub const RANGE_C: RangeCode = RangeCode(5);
pub const RANGE_D: RangeCode = RangeCode(6);
pub const RANGE_E: RangeCode = RangeCode(7);

/// Range every channel is set to while probing magnitudes
pub const PROBE_RANGE: RangeCode = RANGE_C;

/// Lower bound of each bucket, checked from the top. The bound itself belongs to the bucket.
pub const AUTORANGE_THRESHOLDS: [(f64, RangeCode); 4] = [
    (0.9, RANGE_A),
    (0.09, RANGE_B),
    (0.009, RANGE_C),
    (0.0009, RANGE_D),
];

/// Range used for anything below the last threshold
pub const AUTORANGE_FLOOR: RangeCode = RANGE_E;

/// Choose the range for a reading taken at [`PROBE_RANGE`]
pub fn range_for(reading: f64) -> RangeCode {
    let magnitude = reading.abs();
    AUTORANGE_THRESHOLDS
        .iter()
        .find(|(bound, _)| magnitude >= *bound)
        .map(|(_, range)| *range)
        .unwrap_or(AUTORANGE_FLOOR)
}

/// Parse a console key into a range code
pub fn range_from_key(key: char) -> Option<RangeCode> {
    [RANGE_A, RANGE_B, RANGE_C, RANGE_D, RANGE_E]
        .into_iter()
        .find(|range| key.to_digit(10) == Some(range.0 as u32))
}

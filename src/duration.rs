//! Durations, tuplet ratios, and time signatures expressed in ticks.

use serde::{Deserialize, Serialize};

/// Absolute or relative time position.
pub type Tick = i32;

/// Ticks per quarter note.
pub const DIVISION: Tick = 480;

/// Notated duration value. Declared longest first so that `<=` means
/// "at least as long as".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DurationType {
    Long,
    Breve,
    Whole,
    Half,
    Quarter,
    Eighth,
    D16th,
    D32nd,
    D64th,
    D128th,
    /// Full-measure rest; takes the length of the measure.
    Measure,
}

impl DurationType {
    /// Undotted length in ticks. `Measure` has no intrinsic length.
    pub fn ticks(self) -> Tick {
        match self {
            DurationType::Long => DIVISION * 16,
            DurationType::Breve => DIVISION * 8,
            DurationType::Whole => DIVISION * 4,
            DurationType::Half => DIVISION * 2,
            DurationType::Quarter => DIVISION,
            DurationType::Eighth => DIVISION / 2,
            DurationType::D16th => DIVISION / 4,
            DurationType::D32nd => DIVISION / 8,
            DurationType::D64th => DIVISION / 16,
            DurationType::D128th => DIVISION / 32,
            DurationType::Measure => 0,
        }
    }

    /// Number of flags/beams a stem of this value carries.
    pub fn hooks(self) -> u32 {
        match self {
            DurationType::Eighth => 1,
            DurationType::D16th => 2,
            DurationType::D32nd => 3,
            DurationType::D64th => 4,
            DurationType::D128th => 5,
            _ => 0,
        }
    }
}

/// A notated duration: value plus augmentation dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Duration {
    pub kind: DurationType,
    pub dots: u8,
}

impl Duration {
    pub fn new(kind: DurationType) -> Self {
        Self { kind, dots: 0 }
    }

    pub fn dotted(kind: DurationType, dots: u8) -> Self {
        Self { kind, dots }
    }

    /// Nominal length in ticks, ignoring tuplets.
    pub fn ticks(&self) -> Tick {
        let base = self.kind.ticks();
        let mut total = base;
        let mut add = base;
        for _ in 0..self.dots {
            add /= 2;
            total += add;
        }
        total
    }
}

/// Tuplet ratio: `actual` notes in the time of `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub actual: i32,
    pub normal: i32,
}

impl Ratio {
    pub fn new(actual: i32, normal: i32) -> Self {
        Self { actual, normal }
    }

    /// Scale a tick length by `normal / actual`.
    pub fn apply(&self, ticks: Tick) -> Tick {
        if self.actual <= 0 {
            return ticks;
        }
        ticks * self.normal / self.actual
    }
}

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSig {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
}

impl TimeSig {
    pub fn new(beats: i32, beat_type: i32) -> Self {
        Self { beats, beat_type }
    }

    /// Length of one measure in ticks.
    pub fn measure_ticks(&self) -> Tick {
        if self.beat_type <= 0 {
            return DIVISION * 4;
        }
        self.beats * DIVISION * 4 / self.beat_type
    }

    fn unit_ticks(&self) -> Tick {
        if self.beat_type <= 0 {
            DIVISION
        } else {
            DIVISION * 4 / self.beat_type
        }
    }

    pub fn is_compound(&self) -> bool {
        self.beat_type >= 8 && self.beats > 3 && self.beats % 3 == 0
    }

    /// Beat-grouping table: lengths (in denominator units) of the groups
    /// that auto-beams may not cross.
    pub fn beam_groups(&self) -> Vec<i32> {
        match (self.beats, self.beat_type) {
            (4, 4) => vec![2, 2],
            (2, 2) | (3, 2) | (4, 2) => vec![1; self.beats.max(1) as usize],
            (5, 8) => vec![3, 2],
            (7, 8) => vec![2, 2, 3],
            _ if self.is_compound() => vec![3; (self.beats / 3) as usize],
            _ => vec![1; self.beats.max(1) as usize],
        }
    }

    /// Group boundaries in ticks relative to the measure start, excluding 0
    /// and the measure end.
    pub fn beam_boundaries(&self) -> Vec<Tick> {
        let unit = self.unit_ticks();
        let mut out = Vec::new();
        let mut t = 0;
        let groups = self.beam_groups();
        for (i, g) in groups.iter().enumerate() {
            t += g * unit;
            if i + 1 < groups.len() {
                out.push(t);
            }
        }
        out
    }

    /// True if the span `[start, end)` (measure-relative ticks) has a group
    /// boundary strictly inside it.
    pub fn crosses_boundary(&self, start: Tick, end: Tick) -> bool {
        self.beam_boundaries().iter().any(|&b| start < b && b < end)
    }
}

impl Default for TimeSig {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_ticks() {
        assert_eq!(Duration::dotted(DurationType::Quarter, 1).ticks(), 720);
        assert_eq!(Duration::dotted(DurationType::Half, 2).ticks(), 1680);
        assert_eq!(Ratio::new(3, 2).apply(240), 160);
    }

    #[test]
    fn common_time_breaks_at_half_bar() {
        let ts = TimeSig::new(4, 4);
        assert_eq!(ts.beam_boundaries(), vec![960]);
        assert!(ts.crosses_boundary(720, 1200));
        assert!(!ts.crosses_boundary(0, 960));
    }

    #[test]
    fn compound_meter_groups_by_three() {
        let ts = TimeSig::new(6, 8);
        assert_eq!(ts.beam_boundaries(), vec![720]);
        assert_eq!(ts.measure_ticks(), 1440);
    }
}

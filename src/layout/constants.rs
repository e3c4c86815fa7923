//! Compiled-in style defaults. Lengths are in spatium units (sp) unless noted.

// ── Spatium & staff ─────────────────────────────────────────────────
pub(crate) const DEFAULT_SPATIUM: f64 = 5.0; // device units per spatium
pub(crate) const STAFF_LINES: i32 = 5;
pub(crate) const STAFF_HEIGHT: f64 = 4.0; // 5 lines, 4 spaces
pub(crate) const MIDDLE_LINE: i32 = 4; // half-space steps from the top line

// ── Measure spacing ─────────────────────────────────────────────────
pub(crate) const MIN_MEASURE_WIDTH: f64 = 5.0;
pub(crate) const MEASURE_SPACING: f64 = 1.2; // multiplier on the stretchable width
pub(crate) const MIN_NOTE_DISTANCE: f64 = 0.25;
pub(crate) const BARLINE_NOTE_DISTANCE: f64 = 1.2;
pub(crate) const NOTE_BARLINE_DISTANCE: f64 = 1.0;
pub(crate) const CLEF_KEY_DISTANCE: f64 = 1.0;
pub(crate) const KEY_TIME_DISTANCE: f64 = 1.0;
pub(crate) const HEADER_NOTE_DISTANCE: f64 = 1.75;
pub(crate) const MULTI_MEASURE_REST_WIDTH: f64 = 24.0;

// ── Chord internals ─────────────────────────────────────────────────
pub(crate) const ACCIDENTAL_DISTANCE: f64 = 0.22; // between stacked accidentals
pub(crate) const ACCIDENTAL_NOTE_DISTANCE: f64 = 0.22; // accidental to its head
pub(crate) const STEM_WIDTH: f64 = 0.13;
pub(crate) const DOT_NOTE_DISTANCE: f64 = 0.35;
pub(crate) const DOT_DISTANCE: f64 = 0.25;
pub(crate) const HOOK_WIDTH: f64 = 1.0;
pub(crate) const GRACE_MAG: f64 = 0.7;
pub(crate) const SMALL_CLEF_MAG: f64 = 0.8; // courtesy and mid-system clefs

// ── Vertical distances ──────────────────────────────────────────────
pub(crate) const STAFF_DISTANCE: f64 = 6.5;
pub(crate) const AKKOLADE_DISTANCE: f64 = 6.5; // staves of the same part
pub(crate) const SYSTEM_DISTANCE: f64 = 9.25;
pub(crate) const SYSTEM_FRAME_DISTANCE: f64 = 7.0;
pub(crate) const FRAME_SYSTEM_DISTANCE: f64 = 7.0;
pub(crate) const STAFF_UPPER_BORDER: f64 = 7.0;
pub(crate) const STAFF_LOWER_BORDER: f64 = 7.0;

// ── Fill limits & runs ──────────────────────────────────────────────
pub(crate) const PAGE_FILL_LIMIT: f64 = 0.7;
pub(crate) const LAST_SYSTEM_FILL_LIMIT: f64 = 0.3;
pub(crate) const MIN_EMPTY_MEASURES: usize = 2;

// ── System margins ──────────────────────────────────────────────────
pub(crate) const SYSTEM_LEFT_MARGIN: f64 = 0.0;
pub(crate) const FIRST_SYSTEM_INDENT: f64 = 5.0;

// ── Spring model ────────────────────────────────────────────────────
pub(crate) const STRETCH_LOG_FACTOR: f64 = 0.6;
pub(crate) const FALLBACK_STRETCH: f64 = 1.1; // used when a gap has no stretch
pub(crate) const RAGGED_REST_FACTOR: f64 = 0.5;

// ── Pages (device units) ────────────────────────────────────────────
pub(crate) const PAGE_SPREAD_GAP: f64 = 50.0; // between facing pages
pub(crate) const PAGE_GAP: f64 = 1.0;

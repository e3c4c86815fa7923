//! Style table: the named numeric and boolean parameters the layout reads.
//!
//! Every field has a compiled default, so a host can deserialize a partial
//! JSON object and override only what it cares about.

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};
use crate::layout::constants::*;

/// How pages are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Normal paged layout honoring page and line breaks.
    #[default]
    Page,
    /// Continuous layout: breaks are ignored and leftover page space is
    /// split evenly above and below the content.
    Float,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Style {
    /// Device units per spatium
    pub spatium: f64,

    // ── Horizontal spacing (sp) ──
    pub min_measure_width: f64,
    /// Multiplier applied to every measure's stretchable width
    pub measure_spacing: f64,
    pub min_note_distance: f64,
    pub barline_note_distance: f64,
    pub note_barline_distance: f64,
    pub clef_key_distance: f64,
    pub key_time_distance: f64,
    pub header_note_distance: f64,
    pub accidental_distance: f64,
    pub accidental_note_distance: f64,
    pub stem_width: f64,
    pub dot_note_distance: f64,
    pub dot_distance: f64,
    pub hook_width: f64,
    pub grace_mag: f64,
    pub multi_measure_rest_width: f64,

    // ── Vertical spacing (sp) ──
    pub staff_distance: f64,
    pub akkolade_distance: f64,
    pub system_distance: f64,
    pub system_frame_distance: f64,
    pub frame_system_distance: f64,
    pub staff_upper_border: f64,
    pub staff_lower_border: f64,

    // ── Fill ratios ──
    pub page_fill_limit: f64,
    pub last_system_fill_limit: f64,

    // ── Multi-measure rests & staff hiding ──
    pub min_empty_measures: usize,
    pub create_multi_measure_rests: bool,
    pub hide_empty_staves: bool,
    pub dont_hide_staves_in_first_system: bool,

    // ── Generated elements ──
    pub gen_clef: bool,
    pub gen_keysig: bool,
    pub gen_timesig: bool,
    pub gen_courtesy_timesig: bool,
    pub gen_courtesy_keysig: bool,
    pub gen_courtesy_clef: bool,

    // ── Fixed modes ──
    /// Measures per system; 0 disables
    pub fix_measure_numbers: usize,
    pub fix_measure_width: bool,
    /// Never stretch a system to the full line width
    pub ragged_right: bool,

    // ── Margins (sp) ──
    pub system_left_margin: f64,
    pub first_system_indent: f64,

    pub layout_mode: LayoutMode,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            spatium: DEFAULT_SPATIUM,
            min_measure_width: MIN_MEASURE_WIDTH,
            measure_spacing: MEASURE_SPACING,
            min_note_distance: MIN_NOTE_DISTANCE,
            barline_note_distance: BARLINE_NOTE_DISTANCE,
            note_barline_distance: NOTE_BARLINE_DISTANCE,
            clef_key_distance: CLEF_KEY_DISTANCE,
            key_time_distance: KEY_TIME_DISTANCE,
            header_note_distance: HEADER_NOTE_DISTANCE,
            accidental_distance: ACCIDENTAL_DISTANCE,
            accidental_note_distance: ACCIDENTAL_NOTE_DISTANCE,
            stem_width: STEM_WIDTH,
            dot_note_distance: DOT_NOTE_DISTANCE,
            dot_distance: DOT_DISTANCE,
            hook_width: HOOK_WIDTH,
            grace_mag: GRACE_MAG,
            multi_measure_rest_width: MULTI_MEASURE_REST_WIDTH,
            staff_distance: STAFF_DISTANCE,
            akkolade_distance: AKKOLADE_DISTANCE,
            system_distance: SYSTEM_DISTANCE,
            system_frame_distance: SYSTEM_FRAME_DISTANCE,
            frame_system_distance: FRAME_SYSTEM_DISTANCE,
            staff_upper_border: STAFF_UPPER_BORDER,
            staff_lower_border: STAFF_LOWER_BORDER,
            page_fill_limit: PAGE_FILL_LIMIT,
            last_system_fill_limit: LAST_SYSTEM_FILL_LIMIT,
            min_empty_measures: MIN_EMPTY_MEASURES,
            create_multi_measure_rests: false,
            hide_empty_staves: false,
            dont_hide_staves_in_first_system: true,
            gen_clef: true,
            gen_keysig: true,
            gen_timesig: false,
            gen_courtesy_timesig: true,
            gen_courtesy_keysig: true,
            gen_courtesy_clef: true,
            fix_measure_numbers: 0,
            fix_measure_width: false,
            ragged_right: false,
            system_left_margin: SYSTEM_LEFT_MARGIN,
            first_system_indent: FIRST_SYSTEM_INDENT,
            layout_mode: LayoutMode::Page,
        }
    }
}

impl Style {
    /// Parse a (possibly partial) JSON style table.
    pub fn from_json(json: &str) -> Result<Style> {
        serde_json::from_str(json).map_err(LayoutError::InvalidStyle)
    }

    /// Convert spatium units to device units.
    pub fn point(&self, sp: f64) -> f64 {
        sp * self.spatium
    }

    pub fn is_float(&self) -> bool {
        self.layout_mode == LayoutMode::Float
    }
}

//! scorelayout: page and system layout engine for a music notation editor.
//!
//! Takes a score (measures, staves, chords and rests), a style table and
//! two read-only collaborators (glyph metrics and page geometry) and
//! computes where everything goes: chord columns, beams, measure widths,
//! line breaks, page breaks. Header and courtesy clefs, keys and time
//! signatures generated as a side effect are reported through an edit
//! sink so the host can record them for undo.
//!
//! # Example
//! ```
//! use scorelayout::{layout_score, ClefType, Score, Staff, Style, TimeSig};
//!
//! let mut score = Score::new(vec![Staff::new(0, ClefType::Treble)]);
//! for _ in 0..8 {
//!     score.append_measure(TimeSig::new(4, 4));
//! }
//! let output = layout_score(&mut score, Style::default()).unwrap();
//! println!("Systems: {}", output.systems.len());
//! println!("Pages: {}", output.pages.len());
//! ```

pub mod arena;
pub mod duration;
pub mod error;
pub mod layout;
pub mod model;
pub mod services;
pub mod style;

pub use duration::*;
pub use error::{LayoutError, Result};
pub use layout::generated::{GeneratedElement, GeneratedElements, GeneratedKey, GeneratedKind};
pub use layout::geometry::*;
pub use layout::springs::{distribute_linear, justify, justify_gaps, solve_force, stretch_coefficient, Spring};
pub use layout::{RelayoutOutcome, ScoreLayouter};
pub use model::*;
pub use services::*;
pub use style::{LayoutMode, Style};

/// Lay out a score once with standard metrics on an A4 page, discarding the
/// generated-element edit commands.
pub fn layout_score(score: &mut Score, style: Style) -> Result<LayoutOutput> {
    let mut layouter = ScoreLayouter::with_style(style);
    layouter.layout(score, &mut NullSink)?;
    Ok(layouter.snapshot())
}

/// Encode a layout result as JSON for the host.
pub fn layout_to_json(output: &LayoutOutput) -> Result<String> {
    output.to_json()
}

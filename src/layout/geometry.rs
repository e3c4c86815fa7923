//! Computed layout: systems, pages, and the placements a renderer reads.
//!
//! Everything here is plain data, serializable to JSON, and owned by the
//! layouter behind a read-write lock so that readers see either the old
//! or the new result, never a half-built one.

use serde::Serialize;

use crate::duration::Tick;
use crate::error::{LayoutError, Result};
use crate::model::{BarLineType, SegmentKind, SpannerKind};

/// One column (segment) of a placed measure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnPlacement {
    pub tick: Tick,
    pub kind: SegmentKind,
    /// Anchor x relative to the measure's left edge
    pub x: f64,
}

/// A measure or horizontal frame placed in a system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurePlacement {
    /// Index in the score's measure list
    pub index: usize,
    /// Number of list entries this placement covers (a multi-measure rest
    /// covers its whole run)
    pub span: usize,
    pub is_frame: bool,
    pub tick: Tick,
    /// x relative to the system's left edge
    pub x: f64,
    pub width: f64,
    /// Minimum width at the time the system was built
    pub min_width: f64,
    pub header_width: f64,
    pub courtesy_width: f64,
    pub multi_measure: i32,
    pub columns: Vec<ColumnPlacement>,
    pub end_barline: BarLineType,
}

impl MeasurePlacement {
    pub fn covers(&self, index: usize) -> bool {
        self.index <= index && index < self.index + self.span
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SysStaff {
    pub visible: bool,
    /// Top line, relative to the system top
    pub y: f64,
    pub height: f64,
    /// Room content needs above the top line
    pub distance_up: f64,
    /// Room content needs below the bottom line
    pub distance_down: f64,
}

/// Vertical frame occupying a system of its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePlacement {
    pub index: usize,
    pub height: f64,
    pub top_gap: f64,
    pub bottom_gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct System {
    /// Page-relative position, set by page layout
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub left_margin: f64,
    pub staves: Vec<SysStaff>,
    pub measures: Vec<MeasurePlacement>,
    pub frame: Option<FramePlacement>,
    /// Continues the row of the previous system (after a horizontal frame)
    pub same_line: bool,
    /// Shows the full header as the first system of the score or a section
    pub first_in_section: bool,
    /// Ended by a line, page, or section break, or a fixed measure count
    pub forced_break: bool,
    pub page_break: bool,
    pub section_break: bool,
    /// May receive extra space when the page is filled
    pub add_stretch: bool,
    /// Not stretched to the full line width
    pub ragged: bool,
}

impl System {
    pub fn is_vbox(&self) -> bool {
        self.frame.is_some()
    }

    pub fn contains_measure(&self, index: usize) -> bool {
        self.measures.iter().any(|m| m.covers(index))
            || self.frame.as_ref().map_or(false, |f| f.index == index)
    }

    /// First and last measure-list index covered by the system.
    pub fn index_range(&self) -> Option<(usize, usize)> {
        if let Some(f) = &self.frame {
            return Some((f.index, f.index));
        }
        let first = self.measures.first()?;
        let last = self.measures.last()?;
        Some((first.index, last.index + last.span - 1))
    }

    pub fn distance_up(&self) -> f64 {
        self.staves.iter().find(|s| s.visible).map_or(0.0, |s| s.distance_up)
    }

    pub fn distance_down(&self) -> f64 {
        self.staves.iter().rev().find(|s| s.visible).map_or(0.0, |s| s.distance_down)
    }

    pub(crate) fn translate_y(&mut self, dy: f64) {
        self.y += dy;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub number: usize,
    /// Position in the page spread
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Indices into `LayoutOutput::systems`
    pub systems: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TiePlacement {
    pub track: usize,
    pub pitch: i32,
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub start_system: usize,
    pub end_system: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpannerPlacement {
    pub kind: SpannerKind,
    pub track: usize,
    pub tick: Tick,
    pub tick2: Tick,
    /// Systems the spanner passes through, in order
    pub systems: Vec<usize>,
}

/// Result of a layout pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayoutOutput {
    pub systems: Vec<System>,
    pub pages: Vec<Page>,
    pub ties: Vec<TiePlacement>,
    pub spanners: Vec<SpannerPlacement>,
}

impl LayoutOutput {
    /// System holding measure-list entry `index`.
    pub fn system_of_measure(&self, index: usize) -> Option<usize> {
        self.systems.iter().position(|s| s.contains_measure(index))
    }

    pub fn page_of_system(&self, system: usize) -> Option<usize> {
        self.pages.iter().position(|p| p.systems.contains(&system))
    }

    /// System containing `tick`, by measure start ticks.
    pub fn system_at_tick(&self, tick: Tick) -> Option<usize> {
        let mut found = None;
        for (i, sys) in self.systems.iter().enumerate() {
            if let Some(m) = sys.measures.iter().find(|m| !m.is_frame) {
                if m.tick <= tick {
                    found = Some(i);
                } else {
                    break;
                }
            }
        }
        found
    }

    /// Placement of measure-list entry `index`.
    pub fn measure(&self, index: usize) -> Option<&MeasurePlacement> {
        self.systems.iter().flat_map(|s| s.measures.iter()).find(|m| m.covers(index))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(LayoutError::Serialize)
    }
}

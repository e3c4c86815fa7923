//! Collaborator interfaces: glyph metrics, page geometry, and the edit sink
//! through which layout side effects reach the host's undo history.

use serde::{Deserialize, Serialize};

use crate::duration::DurationType;
use crate::layout::generated::{GeneratedElement, GeneratedKey};
use crate::model::{AccidentalKind, BarLineType, ClefType, HeadGroup, HeadType};

// ═══════════════════════════════════════════════════════════════════════
// Glyph metrics
// ═══════════════════════════════════════════════════════════════════════

/// Symbols whose extents the layout needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    NoteHead(HeadGroup, HeadType),
    Accidental(AccidentalKind),
    Clef(ClefType),
    TimeSigDigit,
    Rest(DurationType),
    Dot,
    Hook,
    BarLine(BarLineType),
}

/// Pure function of (symbol, magnification). Results are device units.
pub trait GlyphMetrics: Send + Sync {
    fn width(&self, sym: Symbol, mag: f64) -> f64;
    fn height(&self, sym: Symbol, mag: f64) -> f64;
}

/// Metrics proportional to the spatium, close to a common engraving font.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardMetrics {
    pub spatium: f64,
}

impl StandardMetrics {
    pub fn new(spatium: f64) -> Self {
        Self { spatium }
    }

    fn width_sp(sym: Symbol) -> f64 {
        match sym {
            Symbol::NoteHead(group, head) => match (group, head) {
                (HeadGroup::Normal, HeadType::Whole) => 1.67,
                (HeadGroup::Normal, HeadType::Breve) => 2.1,
                (HeadGroup::Normal, _) => 1.18,
                (HeadGroup::Cross, _) => 1.1,
                (HeadGroup::Diamond, _) => 1.2,
                (HeadGroup::Slash, _) => 2.0,
                (HeadGroup::Triangle, _) => 1.3,
            },
            Symbol::Accidental(kind) => match kind {
                AccidentalKind::Sharp => 1.0,
                AccidentalKind::Flat => 0.84,
                AccidentalKind::Natural => 0.67,
                AccidentalKind::DoubleSharp => 1.0,
                AccidentalKind::DoubleFlat => 1.64,
            },
            Symbol::Clef(kind) => match kind {
                ClefType::Treble | ClefType::Treble8vb => 2.68,
                ClefType::Bass => 2.76,
                ClefType::Alto | ClefType::Tenor => 2.6,
                ClefType::Percussion => 1.3,
                ClefType::Tab => 1.5,
            },
            Symbol::TimeSigDigit => 1.8,
            Symbol::Rest(kind) => match kind {
                DurationType::Long => 0.5,
                DurationType::Breve => 0.8,
                DurationType::Eighth => 1.0,
                DurationType::D16th => 1.2,
                DurationType::D32nd => 1.4,
                DurationType::D64th => 1.6,
                DurationType::D128th => 1.8,
                _ => 1.1,
            },
            Symbol::Dot => 0.4,
            Symbol::Hook => 1.0,
            Symbol::BarLine(kind) => match kind {
                BarLineType::Normal | BarLineType::Broken => 0.16,
                BarLineType::Double => 0.6,
                BarLineType::End => 0.8,
                BarLineType::StartRepeat | BarLineType::EndRepeat => 1.6,
                BarLineType::EndStartRepeat => 2.6,
            },
        }
    }

    fn height_sp(sym: Symbol) -> f64 {
        match sym {
            Symbol::Accidental(AccidentalKind::DoubleSharp) => 1.0,
            Symbol::Accidental(AccidentalKind::Flat | AccidentalKind::DoubleFlat) => 2.4,
            Symbol::Accidental(_) => 2.8,
            Symbol::Clef(ClefType::Treble | ClefType::Treble8vb) => 7.0,
            Symbol::Clef(_) => 3.0,
            Symbol::TimeSigDigit => 2.0,
            Symbol::Rest(_) => 2.5,
            Symbol::Hook => 3.0,
            Symbol::BarLine(_) => 4.0,
            Symbol::NoteHead(..) | Symbol::Dot => 1.0,
        }
    }
}

impl Default for StandardMetrics {
    fn default() -> Self {
        Self::new(crate::layout::constants::DEFAULT_SPATIUM)
    }
}

impl GlyphMetrics for StandardMetrics {
    fn width(&self, sym: Symbol, mag: f64) -> f64 {
        Self::width_sp(sym) * self.spatium * mag
    }

    fn height(&self, sym: Symbol, mag: f64) -> f64 {
        Self::height_sp(sym) * self.spatium * mag
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Page geometry
// ═══════════════════════════════════════════════════════════════════════

/// Page size and margins in device units.
pub trait PageGeometry: Send + Sync {
    fn width(&self) -> f64;
    fn height(&self) -> f64;
    fn left_margin(&self) -> f64;
    fn top_margin(&self) -> f64;
    fn bottom_margin(&self) -> f64;
    fn printable_width(&self) -> f64;

    /// Height available between top and bottom margins.
    fn usable_height(&self) -> f64 {
        self.height() - self.top_margin() - self.bottom_margin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageFormat {
    pub width: f64,
    pub height: f64,
    pub left_margin: f64,
    pub right_margin: f64,
    pub top_margin: f64,
    pub bottom_margin: f64,
}

impl Default for PageFormat {
    /// A4 in points with 15mm margins.
    fn default() -> Self {
        Self {
            width: 595.0,
            height: 842.0,
            left_margin: 42.5,
            right_margin: 42.5,
            top_margin: 42.5,
            bottom_margin: 42.5,
        }
    }
}

impl PageGeometry for PageFormat {
    fn width(&self) -> f64 {
        self.width
    }
    fn height(&self) -> f64 {
        self.height
    }
    fn left_margin(&self) -> f64 {
        self.left_margin
    }
    fn top_margin(&self) -> f64 {
        self.top_margin
    }
    fn bottom_margin(&self) -> f64 {
        self.bottom_margin
    }
    fn printable_width(&self) -> f64 {
        self.width - self.left_margin - self.right_margin
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Edit sink
// ═══════════════════════════════════════════════════════════════════════

/// A structural change made as a side effect of layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EditCommand {
    AddGenerated { key: GeneratedKey, element: GeneratedElement },
    RemoveGenerated { key: GeneratedKey, element: GeneratedElement },
    ChangeGenerated { key: GeneratedKey, from: GeneratedElement, to: GeneratedElement },
}

impl EditCommand {
    pub fn key(&self) -> GeneratedKey {
        match self {
            EditCommand::AddGenerated { key, .. }
            | EditCommand::RemoveGenerated { key, .. }
            | EditCommand::ChangeGenerated { key, .. } => *key,
        }
    }
}

/// Receiver for layout side effects; the host records them for undo.
pub trait EditSink {
    fn submit(&mut self, cmd: EditCommand);
}

impl EditSink for Vec<EditCommand> {
    fn submit(&mut self, cmd: EditCommand) {
        self.push(cmd);
    }
}

/// Sink that drops everything, for callers without undo history.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EditSink for NullSink {
    fn submit(&mut self, _cmd: EditCommand) {}
}

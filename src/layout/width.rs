//! Measure width estimation: the minimum stretchable width of each measure
//! and the per-column extents the justifier later spreads out.

use crate::duration::Tick;
use crate::model::*;
use crate::services::Symbol;

use super::LayoutContext;

// ═══════════════════════════════════════════════════════════════════════
// Spacing record
// ═══════════════════════════════════════════════════════════════════════

/// Horizontal extent of one segment around its anchor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnSpacing {
    pub(crate) seg: usize,
    pub(crate) tick: Tick,
    pub(crate) kind: SegmentKind,
    /// Space needed left of the anchor (accidentals, mirrored heads)
    pub(crate) left: f64,
    /// Space needed right of the anchor (heads, dots, hooks)
    pub(crate) right: f64,
}

/// Cached spacing of one measure, unscaled.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct MeasureSpacing {
    pub(crate) columns: Vec<ColumnSpacing>,
    /// Barline to the first anchor
    pub(crate) lead: f64,
    /// Minimum anchor distance after each column; the last one reaches the barline
    pub(crate) gaps: Vec<f64>,
    /// Duration covered by each gap. Zero marks a gap that never stretches.
    pub(crate) gap_ticks: Vec<Tick>,
}

impl MeasureSpacing {
    /// Raw content width before the measure multiplier.
    pub(crate) fn stretchable(&self) -> f64 {
        self.lead + self.gaps.iter().sum::<f64>()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Glyph helpers
// ═══════════════════════════════════════════════════════════════════════

/// Width of a key signature with `fifths` accidentals.
pub(crate) fn key_sig_width(ctx: &LayoutContext, fifths: i32, mag: f64) -> f64 {
    let kind = if fifths >= 0 { AccidentalKind::Sharp } else { AccidentalKind::Flat };
    fifths.unsigned_abs() as f64 * ctx.metrics.width(Symbol::Accidental(kind), mag)
}

/// Naturals needed to cancel `old` when the key changes to `new`.
pub(crate) fn cancellation_natural_count(old: i32, new: i32) -> u32 {
    if old == 0 {
        return 0;
    }
    let same_direction = (old > 0 && new > 0) || (old < 0 && new < 0);
    if same_direction {
        old.unsigned_abs().saturating_sub(new.unsigned_abs())
    } else {
        old.unsigned_abs()
    }
}

fn digits(n: i32) -> usize {
    n.unsigned_abs().to_string().len()
}

pub(crate) fn time_sig_width(ctx: &LayoutContext, sig: crate::duration::TimeSig, mag: f64) -> f64 {
    let n = digits(sig.beats).max(digits(sig.beat_type));
    n as f64 * ctx.metrics.width(Symbol::TimeSigDigit, mag)
}

pub(crate) fn clef_width(ctx: &LayoutContext, clef: ClefType, mag: f64) -> f64 {
    ctx.metrics.width(Symbol::Clef(clef), mag)
}

/// (left, right) extent of a chord or rest around its segment anchor.
fn chord_rest_extent(score: &Score, ctx: &LayoutContext, id: ChordRestId, dot_x: Option<f64>) -> (f64, f64) {
    let Some(cr) = score.chord_rest(id) else { return (0.0, 0.0) };
    let staff_mag = score.staves.get(cr.staff()).map_or(1.0, |s| s.mag);
    let mag = if cr.grace { staff_mag * ctx.style.grace_mag } else { staff_mag };
    let style = ctx.style;

    let (left, mut right) = match &cr.kind {
        ChordRestKind::Rest(_) => (0.0, ctx.metrics.width(Symbol::Rest(cr.duration.kind), mag)),
        ChordRestKind::Chord(chord) => {
            let mut left: f64 = 0.0;
            let mut right: f64 = 0.0;
            for note in chord.notes.iter().filter(|n| !n.hidden) {
                let head_type = match note.head_type {
                    HeadType::Auto => HeadType::for_duration(cr.duration.kind),
                    h => h,
                };
                let x = cr.x_offset + note.x;
                left = left.max(-x);
                right = right.max(x + ctx.metrics.width(Symbol::NoteHead(note.head_group, head_type), mag));
                if let Some(acc) = &note.accidental {
                    left = left.max(-(cr.x_offset + acc.x));
                }
            }
            (left, right)
        }
    };

    let dots = cr.duration.dots;
    if dots > 0 {
        let start = dot_x.unwrap_or(right).max(right);
        let per_dot = ctx.metrics.width(Symbol::Dot, mag) + style.point(style.dot_distance) * mag;
        right = start + style.point(style.dot_note_distance) * mag + per_dot * dots as f64;
    }
    if !cr.is_rest() && cr.up && cr.beam.is_none() && cr.duration.kind.hooks() > 0 {
        right += style.point(style.hook_width) * mag;
    }
    (left, right)
}

/// Combined extent of every element of a segment across all staves.
fn segment_extent(score: &Score, ctx: &LayoutContext, seg: &Segment) -> Option<(f64, f64)> {
    let mut extent: Option<(f64, f64)> = None;
    for (track, el) in seg.elements.iter().enumerate() {
        let Some(el) = el else { continue };
        let staff = track / VOICES;
        let mag = score.staves.get(staff).map_or(1.0, |s| s.mag);
        let (l, r) = match el {
            Element::ChordRest(id) => chord_rest_extent(score, ctx, *id, seg.dot_positions.get(staff).copied()),
            Element::Clef(c) => (0.0, clef_width(ctx, c.kind, mag)),
            Element::KeySig(k) => (0.0, key_sig_width(ctx, k.fifths, mag)),
            Element::TimeSig(t) => (0.0, time_sig_width(ctx, t.sig, mag)),
            Element::BarLine(b) => (0.0, ctx.metrics.width(Symbol::BarLine(*b), mag)),
        };
        extent = Some(match extent {
            Some((el, er)) => (el.max(l), er.max(r)),
            None => (l, r),
        });
    }
    extent
}

// ═══════════════════════════════════════════════════════════════════════
// Estimation
// ═══════════════════════════════════════════════════════════════════════

/// Padding between two adjacent columns.
fn column_padding(ctx: &LayoutContext, a: SegmentKind, b: SegmentKind) -> f64 {
    let style = ctx.style;
    let sp = match (a.is_chord_rest(), b.is_chord_rest()) {
        (true, true) | (true, false) => style.min_note_distance,
        (false, true) => style.header_note_distance,
        (false, false) => match (a, b) {
            (SegmentKind::Clef, SegmentKind::KeySig) => style.clef_key_distance,
            _ => style.key_time_distance,
        },
    };
    style.point(sp)
}

/// Compute the spacing record of one measure from its current column layout.
pub(crate) fn estimate_measure(score: &Score, ctx: &LayoutContext, mi: usize) -> MeasureSpacing {
    let Some(m) = score.measure(mi) else { return MeasureSpacing::default() };
    let style = ctx.style;

    let columns: Vec<ColumnSpacing> = m
        .segments
        .iter()
        .enumerate()
        .filter_map(|(si, seg)| {
            let (left, right) = segment_extent(score, ctx, seg)?;
            Some(ColumnSpacing { seg: si, tick: seg.tick, kind: seg.kind, left, right })
        })
        .collect();

    let Some(first) = columns.first() else {
        return MeasureSpacing::default();
    };
    let lead = style.point(style.barline_note_distance) + first.left;

    let mut gaps = Vec::with_capacity(columns.len());
    let mut gap_ticks = Vec::with_capacity(columns.len());
    for pair in columns.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        gaps.push(a.right + b.left + column_padding(ctx, a.kind, b.kind));
        let stretches = a.kind.is_chord_rest() && b.kind.is_chord_rest();
        gap_ticks.push(if stretches { (b.tick - a.tick).max(0) } else { 0 });
    }
    if let Some(last) = columns.last() {
        gaps.push(last.right + style.point(style.note_barline_distance));
        let ticks = if last.kind.is_chord_rest() { (m.end_tick() - last.tick).max(0) } else { 0 };
        gap_ticks.push(ticks);
    }

    MeasureSpacing { columns, lead, gaps, gap_ticks }
}

/// Minimum width of a measure as placed in a system, excluding header and
/// courtesy elements. Absorbed multi-measure-rest members take no space.
pub(crate) fn measure_min_width(ctx: &LayoutContext, m: &Measure) -> f64 {
    let style = ctx.style;
    let floor = style.point(style.min_measure_width);
    if m.multi_measure < 0 {
        return 0.0;
    }
    if m.multi_measure > 0 {
        return style.point(style.multi_measure_rest_width).max(floor);
    }
    let stretchable = m.spacing.as_ref().map_or(0.0, |s| s.stretchable());
    (stretchable * m.user_stretch * style.measure_spacing).max(floor)
}

/// Refresh the spacing record and minimum width of every measure in `range`.
pub(crate) fn update_widths(score: &mut Score, ctx: &LayoutContext, range: std::ops::Range<usize>) {
    for mi in range {
        if score.measure(mi).is_none() {
            continue;
        }
        let spacing = estimate_measure(score, ctx, mi);
        if let Some(m) = score.measure_mut(mi) {
            m.spacing = Some(spacing);
            m.min_width = measure_min_width(ctx, m);
            m.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::{Duration, DurationType, TimeSig};
    use crate::services::StandardMetrics;
    use crate::style::Style;

    fn ctx_parts() -> (Style, StandardMetrics) {
        let style = Style::default();
        let metrics = StandardMetrics::new(style.spatium);
        (style, metrics)
    }

    fn quarters(n: usize) -> Score {
        let mut score = Score::new(vec![Staff::new(0, ClefType::Treble)]);
        let m = score.append_measure(TimeSig::new(4, 4));
        for i in 0..n {
            let cr = ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(60, 4)]);
            score.add_chord_rest(m, 0, i as Tick * 480, cr).unwrap();
        }
        score
    }

    #[test]
    fn empty_measure_uses_floor() {
        let (style, metrics) = ctx_parts();
        let ctx = LayoutContext { style: &style, metrics: &metrics };
        let mut score = quarters(0);
        update_widths(&mut score, &ctx, 0..1);
        assert_eq!(score.measure(0).unwrap().min_width, style.point(style.min_measure_width));
    }

    #[test]
    fn more_notes_need_more_room() {
        let (style, metrics) = ctx_parts();
        let ctx = LayoutContext { style: &style, metrics: &metrics };
        let mut two = quarters(2);
        let mut four = quarters(4);
        update_widths(&mut two, &ctx, 0..1);
        update_widths(&mut four, &ctx, 0..1);
        assert!(four.measure(0).unwrap().min_width > two.measure(0).unwrap().min_width);

        let spacing = four.measure(0).unwrap().spacing.clone().unwrap();
        assert_eq!(spacing.gap_ticks, vec![480, 480, 480, 480]);
        assert!(!four.measure(0).unwrap().dirty);
    }

    #[test]
    fn user_stretch_scales_width() {
        let (style, metrics) = ctx_parts();
        let ctx = LayoutContext { style: &style, metrics: &metrics };
        let mut score = quarters(4);
        update_widths(&mut score, &ctx, 0..1);
        let base = score.measure(0).unwrap().min_width;
        score.measure_mut(0).unwrap().user_stretch = 2.0;
        update_widths(&mut score, &ctx, 0..1);
        assert!((score.measure(0).unwrap().min_width - base * 2.0).abs() < 1e-9);
    }

    #[test]
    fn multi_measure_rest_widths() {
        let (style, metrics) = ctx_parts();
        let ctx = LayoutContext { style: &style, metrics: &metrics };
        let mut m = Measure::new(0, TimeSig::new(4, 4));
        m.multi_measure = 4;
        assert_eq!(measure_min_width(&ctx, &m), style.point(style.multi_measure_rest_width));
        m.multi_measure = -1;
        assert_eq!(measure_min_width(&ctx, &m), 0.0);
    }

    #[test]
    fn naturals_cancel_removed_accidentals() {
        assert_eq!(cancellation_natural_count(3, 1), 2);
        assert_eq!(cancellation_natural_count(2, -1), 2);
        assert_eq!(cancellation_natural_count(0, 4), 0);
        assert_eq!(cancellation_natural_count(-2, -4), 0);
    }
}

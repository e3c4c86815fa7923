//! System building: greedy admission of measures into systems and systems
//! into rows, multi-measure-rest collapsing, and empty-staff hiding.

use log::debug;

use crate::error::{LayoutError, Result};
use crate::model::*;
use crate::style::Style;

use super::generated::{system_header, Generated, GeneratedPass};
use super::geometry::FramePlacement;
use super::width::measure_min_width;
use super::LayoutContext;

// ═══════════════════════════════════════════════════════════════════════
// Drafts
// ═══════════════════════════════════════════════════════════════════════

/// A measure or horizontal frame admitted to a system, before justification.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Member {
    pub(crate) index: usize,
    pub(crate) span: usize,
    /// Set for horizontal frames, which never stretch
    pub(crate) frame_width: Option<f64>,
    /// Content minimum without header or courtesy elements
    pub(crate) min_width: f64,
    pub(crate) header: f64,
    pub(crate) courtesy: f64,
    /// Share of the leftover line width
    pub(crate) weight: f64,
}

impl Member {
    pub(crate) fn total_min(&self) -> f64 {
        self.frame_width.unwrap_or(self.min_width + self.header + self.courtesy)
    }

    pub(crate) fn last_index(&self) -> usize {
        self.index + self.span - 1
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SystemDraft {
    pub(crate) members: Vec<Member>,
    pub(crate) frame: Option<FramePlacement>,
    pub(crate) first_in_section: bool,
    pub(crate) left_margin: f64,
    pub(crate) staves_visible: Vec<bool>,
    pub(crate) forced_break: bool,
    pub(crate) page_break: bool,
    pub(crate) section_break: bool,
    pub(crate) same_line: bool,
}

impl SystemDraft {
    pub(crate) fn min_width(&self) -> f64 {
        self.left_margin + self.members.iter().map(Member::total_min).sum::<f64>()
    }

    /// Last member that is a measure.
    pub(crate) fn last_measure(&self) -> Option<&Member> {
        self.members.iter().rev().find(|m| m.frame_width.is_none())
    }
}

/// Systems sharing one line of music.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Row {
    pub(crate) systems: Vec<SystemDraft>,
    /// Nothing follows this row
    pub(crate) last: bool,
}

impl Row {
    pub(crate) fn min_width(&self) -> f64 {
        self.systems.iter().map(SystemDraft::min_width).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════

pub(crate) struct SystemBuilder<'a, 'c> {
    score: &'a mut Score,
    ctx: &'a LayoutContext<'c>,
    generated: &'a mut GeneratedPass,
    cursor: usize,
    first_system: bool,
    built: usize,
}

impl<'a, 'c> SystemBuilder<'a, 'c> {
    /// Start building at measure-list entry `start`. `first_system` gives the
    /// first system the full header.
    pub(crate) fn new(
        score: &'a mut Score,
        ctx: &'a LayoutContext<'c>,
        generated: &'a mut GeneratedPass,
        start: usize,
        first_system: bool,
    ) -> Self {
        Self { score, ctx, generated, cursor: start, first_system, built: 0 }
    }

    /// Build every remaining row.
    pub(crate) fn build(mut self, row_width: f64) -> Result<Vec<Row>> {
        let float = self.ctx.style.is_float();
        let mut rows = Vec::new();
        while self.cursor < self.score.measures.len() {
            if let MeasureBase::Frame(f) = &self.score.measures[self.cursor] {
                if f.is_vertical() {
                    let draft = self.frame_system(self.cursor, f);
                    if f.breaks.section && !float {
                        self.first_system = true;
                    }
                    self.cursor += 1;
                    self.built += 1;
                    rows.push(Row { systems: vec![draft], last: false });
                    continue;
                }
            }
            let systems = self.layout_row(row_width)?;
            let ended_section = systems.last().map_or(false, |s| s.section_break);
            self.first_system = ended_section && !float;
            rows.push(Row { systems, last: false });
        }
        if let Some(last) = rows.last_mut() {
            last.last = true;
        }
        debug!("built {} rows, {} systems", rows.len(), self.built);
        Ok(rows)
    }

    fn frame_system(&self, index: usize, f: &Frame) -> SystemDraft {
        let style = self.ctx.style;
        SystemDraft {
            frame: Some(FramePlacement {
                index,
                height: style.point(f.height),
                top_gap: style.point(f.top_gap),
                bottom_gap: style.point(f.bottom_gap),
            }),
            first_in_section: self.first_system,
            forced_break: f.breaks.any(),
            page_break: f.breaks.page && !style.is_float(),
            section_break: f.breaks.section && !style.is_float(),
            ..SystemDraft::default()
        }
    }

    /// Systems continue on the same row after a horizontal frame.
    fn layout_row(&mut self, row_width: f64) -> Result<Vec<SystemDraft>> {
        let mut available = row_width;
        let mut row: Vec<SystemDraft> = Vec::new();
        loop {
            let (mut draft, continues) = self.layout_system(available)?;
            draft.same_line = !row.is_empty();
            available -= draft.min_width();
            row.push(draft);
            if !continues {
                break;
            }
        }
        Ok(row)
    }

    /// Admit measures until the next one would overflow `available` or a
    /// break forces a stop. Returns the draft and whether another system
    /// continues on the same row.
    fn layout_system(&mut self, available: f64) -> Result<(SystemDraft, bool)> {
        let style = self.ctx.style;
        let float = style.is_float();
        let mut left_margin = style.point(style.system_left_margin);
        if self.first_system {
            left_margin += style.point(style.first_system_indent);
        }
        let mut draft = SystemDraft {
            first_in_section: self.first_system,
            left_margin,
            ..SystemDraft::default()
        };
        let mut width = left_margin;
        let mut measure_count = 0;
        let mut continues = false;

        while self.cursor < self.score.measures.len() {
            let idx = self.cursor;
            let is_first = draft.members.is_empty();

            let frame = match &self.score.measures[idx] {
                MeasureBase::Frame(f) => Some(f.clone()),
                MeasureBase::Measure(_) => None,
            };
            let mut continues_after = false;
            let member = match frame {
                Some(f) if f.is_vertical() => break,
                Some(f) => {
                    let w = style.point(f.width);
                    continues_after = !float && !is_first && !(f.breaks.line || f.breaks.page);
                    Member { index: idx, span: 1, frame_width: Some(w), min_width: w, header: 0.0, courtesy: 0.0, weight: 0.0 }
                }
                None => self.measure_member(idx, is_first),
            };

            if !is_first && width + member.total_min() > available {
                break;
            }
            width += member.total_min();
            continues = continues_after;
            if member.frame_width.is_none() {
                measure_count += 1;
            }
            self.cursor = member.last_index() + 1;
            let breaks = self.score.measures[member.last_index()].breaks();
            draft.members.push(member);

            let hard_break = !float && (breaks.line || breaks.page || breaks.section);
            let fixed_count = style.fix_measure_numbers > 0 && measure_count >= style.fix_measure_numbers;
            let next_vertical = self.score.measures.get(self.cursor).map_or(false, MeasureBase::is_vertical_frame);
            if hard_break || fixed_count {
                draft.forced_break = true;
                draft.page_break = !float && breaks.page;
                draft.section_break = !float && breaks.section;
                continues = false;
                break;
            }
            if continues || next_vertical {
                break;
            }
        }

        if draft.members.is_empty() {
            return Err(LayoutError::EmptySystem(self.built));
        }
        if measure_count > 1 {
            self.purge_interior(&draft);
        }
        draft.staves_visible = staff_visibility(self.score, style, &draft);
        self.built += 1;
        Ok((draft, continues && self.cursor < self.score.measures.len()))
    }

    /// Member for the measure at `idx`; the first member of a system also
    /// claims the system header.
    fn measure_member(&mut self, idx: usize, is_first: bool) -> Member {
        let span = if self.ctx.style.create_multi_measure_rests {
            self.collapse_rests(idx)
        } else {
            if let Some(m) = self.score.measure_mut(idx) {
                m.multi_measure = 0;
            }
            1
        };
        let header = if is_first {
            system_header(self.score, self.ctx, idx, self.first_system)
        } else {
            Generated::default()
        };
        if is_first {
            for (key, el) in &header.elements {
                self.generated.claim(*key, *el);
            }
        }
        let ticks: i32 = (idx..idx + span).filter_map(|i| self.score.measure(i)).map(|m| m.ticks).sum();
        let (min_width, stretch) = self
            .score
            .measure(idx)
            .map_or((0.0, 1.0), |m| (measure_min_width(self.ctx, m), m.user_stretch));
        Member {
            index: idx,
            span,
            frame_width: None,
            min_width,
            header: header.width,
            courtesy: 0.0,
            weight: ticks as f64 * stretch,
        }
    }

    /// Collapse a run of empty measures starting at `idx` into one
    /// multi-measure rest. Returns how many list entries the member covers.
    fn collapse_rests(&mut self, idx: usize) -> usize {
        let min = self.ctx.style.min_empty_measures.max(1);
        let mut n = 0;
        let mut i = idx;
        while let Some(m) = self.score.measure(i) {
            if n > 0 && m.breaks_mm_rest() {
                break;
            }
            if !self.score.is_empty_measure(i) {
                break;
            }
            n += 1;
            i += 1;
            if m.breaks.any() {
                break;
            }
        }
        if n >= min {
            for (k, j) in (idx..idx + n).enumerate() {
                if let Some(m) = self.score.measure_mut(j) {
                    m.multi_measure = if k == 0 { n as i32 } else { -1 };
                }
            }
            debug!("measures {idx}..{} collapse into a rest of {n}", idx + n);
            n
        } else {
            if let Some(m) = self.score.measure_mut(idx) {
                m.multi_measure = 0;
            }
            1
        }
    }

    fn purge_interior(&mut self, draft: &SystemDraft) {
        let (Some(first), Some(last)) = (draft.members.first(), draft.members.last()) else { return };
        let first_tick = self.score.measure(first.index).map(|m| m.tick);
        let end_tick = (first.index..=last.last_index())
            .rev()
            .find_map(|i| self.score.measure(i))
            .map(|m| m.end_tick());
        let (Some(first_tick), Some(end_tick)) = (first_tick, end_tick) else { return };
        let purged = self.generated.purge_interior(first_tick, end_tick);
        if !purged.is_empty() {
            debug!("dropped {} generated elements inside system at tick {first_tick}", purged.len());
        }
    }
}

/// Staves shown in a system. With empty-staff hiding on, a staff whose
/// every measure in the system is a rest is hidden, except in the first
/// system when that is disabled.
pub(crate) fn staff_visibility(score: &Score, style: &Style, draft: &SystemDraft) -> Vec<bool> {
    let nstaves = score.nstaves();
    let may_hide =
        style.hide_empty_staves && nstaves > 1 && !(draft.first_in_section && style.dont_hide_staves_in_first_system);
    (0..nstaves)
        .map(|s| {
            let shown = score.staves[s].visible;
            if !may_hide {
                return shown;
            }
            let empty = draft
                .members
                .iter()
                .filter(|m| m.frame_width.is_none())
                .flat_map(|m| m.index..=m.last_index())
                .all(|i| score.is_measure_rest(i, s));
            shown && !empty
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::{Duration, DurationType, TimeSig};
    use crate::layout::generated::GeneratedElements;
    use crate::layout::width::update_widths;
    use crate::services::StandardMetrics;
    use crate::style::Style;

    fn score_with(n: usize, notes_in: &[usize]) -> Score {
        let mut score = Score::new(vec![Staff::new(0, ClefType::Treble)]);
        for i in 0..n {
            let m = score.append_measure(TimeSig::new(4, 4));
            let cr = if notes_in.contains(&i) {
                ChordRest::chord(Duration::new(DurationType::Whole), vec![Note::new(60, 4)])
            } else {
                ChordRest::measure_rest()
            };
            score.add_chord_rest(m, 0, 0, cr).unwrap();
        }
        score
    }

    fn build(score: &mut Score, style: &Style, width: f64) -> Vec<Row> {
        let metrics = StandardMetrics::new(style.spatium);
        let ctx = LayoutContext { style, metrics: &metrics };
        let n = score.measures.len();
        update_widths(score, &ctx, 0..n);
        let mut pass = GeneratedPass::new(&GeneratedElements::default());
        SystemBuilder::new(score, &ctx, &mut pass, 0, true).build(width).unwrap()
    }

    #[test]
    fn wide_measure_still_admitted_alone() {
        let mut score = score_with(2, &[0, 1]);
        let rows = build(&mut score, &Style::default(), 1.0);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.systems[0].members.len() == 1));
        assert!(rows[1].last);
    }

    #[test]
    fn fixed_measure_count() {
        let mut score = score_with(5, &[0, 1, 2, 3, 4]);
        let style = Style { fix_measure_numbers: 2, ..Style::default() };
        let rows = build(&mut score, &style, 10_000.0);
        let counts: Vec<usize> = rows.iter().map(|r| r.systems[0].members.len()).collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[test]
    fn line_break_ends_system() {
        let mut score = score_with(3, &[0, 1, 2]);
        score.measure_mut(0).unwrap().breaks.line = true;
        let rows = build(&mut score, &Style::default(), 10_000.0);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].systems[0].forced_break);
    }

    #[test]
    fn float_mode_ignores_breaks() {
        let mut score = score_with(3, &[0, 1, 2]);
        score.measure_mut(0).unwrap().breaks.line = true;
        let style = Style { layout_mode: crate::style::LayoutMode::Float, ..Style::default() };
        let rows = build(&mut score, &style, 10_000.0);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn empty_run_collapses() {
        let mut score = score_with(7, &[0, 6]);
        let style = Style { create_multi_measure_rests: true, ..Style::default() };
        let rows = build(&mut score, &style, 10_000.0);
        let members = &rows[0].systems[0].members;
        assert_eq!(members.iter().map(|m| m.span).collect::<Vec<_>>(), vec![1, 5, 1]);
        let mm: Vec<i32> = (0..7).map(|i| score.measure(i).unwrap().multi_measure).collect();
        assert_eq!(mm, vec![0, 5, -1, -1, -1, -1, 0]);
    }

    #[test]
    fn short_run_stays_expanded() {
        let mut score = score_with(5, &[0, 4]);
        let style = Style { create_multi_measure_rests: true, min_empty_measures: 4, ..Style::default() };
        let rows = build(&mut score, &style, 10_000.0);
        assert_eq!(rows[0].systems[0].members.len(), 5);
        assert!((0..5).all(|i| score.measure(i).unwrap().multi_measure == 0));
    }

    #[test]
    fn run_breaks_at_signature_change() {
        let mut score = score_with(6, &[]);
        score.measure_mut(3).unwrap().mm_rest_break = true;
        let style = Style { create_multi_measure_rests: true, ..Style::default() };
        let rows = build(&mut score, &style, 10_000.0);
        let spans: Vec<usize> = rows[0].systems[0].members.iter().map(|m| m.span).collect();
        assert_eq!(spans, vec![3, 3]);
    }

    #[test]
    fn empty_staff_hidden_after_first_system() {
        let mut score = Score::new(vec![Staff::new(0, ClefType::Treble), Staff::new(1, ClefType::Bass)]);
        for _ in 0..2 {
            let m = score.append_measure(TimeSig::new(4, 4));
            let cr = ChordRest::chord(Duration::new(DurationType::Whole), vec![Note::new(60, 4)]);
            score.add_chord_rest(m, 0, 0, cr).unwrap();
            score.add_chord_rest(m, VOICES, 0, ChordRest::measure_rest()).unwrap();
        }
        score.measure_mut(0).unwrap().breaks.line = true;
        let style = Style { hide_empty_staves: true, ..Style::default() };
        let rows = build(&mut score, &style, 10_000.0);
        assert_eq!(rows[0].systems[0].staves_visible, vec![true, true]);
        assert_eq!(rows[1].systems[0].staves_visible, vec![true, false]);
    }

    #[test]
    fn horizontal_frame_continues_row() {
        let mut score = score_with(2, &[0, 1]);
        score.measures.insert(1, MeasureBase::Frame(Frame::horizontal(10.0)));
        let rows = build(&mut score, &Style::default(), 10_000.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].systems.len(), 2);
        assert!(rows[0].systems[1].same_line);
    }

    #[test]
    fn vertical_frame_is_its_own_system() {
        let mut score = score_with(2, &[0, 1]);
        score.measures.insert(1, MeasureBase::Frame(Frame::vertical(20.0)));
        let rows = build(&mut score, &Style::default(), 10_000.0);
        assert_eq!(rows.len(), 3);
        assert!(rows[1].systems[0].frame.is_some());
    }
}

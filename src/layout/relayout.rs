//! Relayout after an edit confined to one measure.
//!
//! The fast path re-justifies the measure's system in place and only
//! re-runs page layout. Anything that could ripple into neighbouring
//! systems (a changed clef or key map, a beam crossing the barline, a
//! measure that no longer fits or now leaves room for the next one, a
//! staff appearing or disappearing) sends the caller to a full pass that
//! resumes at the edited system's row.

use std::collections::BTreeMap;

use log::debug;

use crate::duration::Tick;
use crate::model::*;
use crate::services::PageGeometry;

use super::generated::{GeneratedKey, GeneratedKind};
use super::geometry::{LayoutOutput, MeasurePlacement, System};
use super::springs::distribute_linear;
use super::systems::{staff_visibility, Member, Row, SystemDraft};
use super::width::{measure_min_width, update_widths};
use super::{beams, columns, justify, mark_rest_run_breaks, pages, rebuild_staff_maps, spanners, Anchor, LayoutContext};

const FIT_EPSILON: f64 = 1e-6;

/// Snapshot of everything a local edit must leave untouched for the fast
/// path to be valid.
#[derive(PartialEq)]
struct Ripple {
    maps: Vec<(BTreeMap<Tick, ClefType>, BTreeMap<Tick, i32>)>,
    rest_breaks: Vec<bool>,
}

impl Ripple {
    fn capture(score: &Score) -> Self {
        let maps = score.staves.iter().map(|s| (s.clef_map.clone(), s.key_map.clone())).collect();
        let rest_breaks = score
            .measures
            .iter()
            .map(|mb| mb.as_measure().map_or(false, |m| m.mm_rest_break))
            .collect();
        Self { maps, rest_breaks }
    }
}

/// Rebuild the draft a placed system came from, with fresh minimum widths.
fn redraft(score: &Score, ctx: &LayoutContext, sys: &System) -> SystemDraft {
    let members = sys
        .measures
        .iter()
        .map(|p: &MeasurePlacement| {
            if p.is_frame {
                return Member {
                    index: p.index,
                    span: 1,
                    frame_width: Some(p.width),
                    min_width: p.width,
                    header: 0.0,
                    courtesy: 0.0,
                    weight: 0.0,
                };
            }
            let ticks: i32 = (p.index..p.index + p.span).filter_map(|i| score.measure(i)).map(|m| m.ticks).sum();
            let (min_width, stretch) =
                score.measure(p.index).map_or((0.0, 1.0), |m| (measure_min_width(ctx, m), m.user_stretch));
            Member {
                index: p.index,
                span: p.span,
                frame_width: None,
                min_width,
                header: p.header_width,
                courtesy: p.courtesy_width,
                weight: ticks as f64 * stretch,
            }
        })
        .collect();
    SystemDraft {
        members,
        frame: None,
        first_in_section: sys.first_in_section,
        left_margin: sys.left_margin,
        staves_visible: sys.staves.iter().map(|s| s.visible).collect(),
        forced_break: sys.forced_break,
        page_break: sys.page_break,
        section_break: sys.section_break,
        same_line: sys.same_line,
    }
}

/// Re-justify the system holding `measure` without touching any other
/// system. Returns the system index and the new output, or `None` when a
/// full pass is needed.
pub(super) fn try_incremental(
    score: &mut Score,
    ctx: &LayoutContext,
    page: &dyn PageGeometry,
    current: &LayoutOutput,
    measure: usize,
) -> Option<(usize, LayoutOutput)> {
    let style = ctx.style;
    let si = current.system_of_measure(measure)?;
    let sys = &current.systems[si];
    let shares_row = sys.same_line || current.systems.get(si + 1).map_or(false, |n| n.same_line);
    if shares_row || sys.ragged || sys.is_vbox() {
        debug!("measure {measure}: system {si} cannot be re-justified alone");
        return None;
    }
    if style.create_multi_measure_rests
        && (score.is_empty_measure(measure) || sys.measures.iter().any(|m| m.multi_measure != 0))
    {
        debug!("measure {measure}: multi-measure rests may regroup");
        return None;
    }

    if let Some(m) = score.measure_mut(measure) {
        m.dirty = true;
    }
    let before = Ripple::capture(score);
    rebuild_staff_maps(score);
    mark_rest_run_breaks(score);
    if Ripple::capture(score) != before {
        debug!("measure {measure}: signature or rest-run change ripples forward");
        return None;
    }
    if beams::has_cross_measure_beam(score, measure) {
        return None;
    }
    beams::layout_beams(score);
    if beams::has_cross_measure_beam(score, measure) {
        debug!("measure {measure}: a beam now crosses the barline");
        return None;
    }
    columns::layout_measure_columns(score, ctx, measure);
    let neighbours = measure.saturating_sub(1)..(measure + 2).min(score.measures.len());
    update_widths(score, ctx, neighbours);

    let row_width = page.printable_width();
    let draft = redraft(score, ctx, sys);
    let min = draft.min_width();
    if min > row_width + FIT_EPSILON {
        debug!("measure {measure}: system {si} overflows ({min:.2} > {row_width:.2})");
        return None;
    }
    let row = Row { systems: vec![draft.clone()], last: si + 1 == current.systems.len() };
    if justify::is_ragged(ctx, &row, row_width) != sys.ragged {
        debug!("measure {measure}: system {si} changes between ragged and justified");
        return None;
    }
    if !sys.forced_break {
        let last = draft.members.last();
        let admitted = min - last.map_or(0.0, |m| m.courtesy);
        if let Some(next) = last.and_then(|m| score.measure(m.last_index() + 1)) {
            if admitted + measure_min_width(ctx, next) <= row_width {
                debug!("measure {measure}: the following measure would now fit on system {si}");
                return None;
            }
        }
    }
    if style.hide_empty_staves && staff_visibility(score, style, &draft) != draft.staves_visible {
        debug!("measure {measure}: staff visibility changes on system {si}");
        return None;
    }

    let widths = if style.fix_measure_width {
        sys.measures.iter().map(|p| p.width).collect()
    } else {
        member_widths(&draft, row_width)
    };
    let double_bar = draft.last_measure().map_or(false, |last| {
        let end = (last.index..=last.last_index())
            .rev()
            .find_map(|i| score.measure(i))
            .map(|m| m.end_tick());
        end.map_or(false, |tick| {
            (0..score.nstaves()).any(|staff| {
                score.generated.get(&GeneratedKey { tick, staff, kind: GeneratedKind::CourtesyKeySig }).is_some()
            })
        })
    });

    let mut placed = justify::place_system(score, ctx, &draft, &widths, double_bar);
    placed.ragged = sys.ragged;

    let mut out = current.clone();
    out.systems[si] = placed;
    out.pages = pages::layout_pages(&mut out.systems, style, page);
    out.ties = spanners::resolve_ties(score, &out);
    out.spanners = spanners::resolve_spanners(score, &out);
    if let Some(m) = score.measure_mut(measure) {
        m.dirty = false;
    }
    Some((si, out))
}

/// Member widths filling a line of `row_width`, frames kept at their own
/// width. Same arithmetic as a full pass so both give identical results.
fn member_widths(draft: &SystemDraft, row_width: f64) -> Vec<f64> {
    let measures: Vec<&Member> = draft.members.iter().filter(|m| m.frame_width.is_none()).collect();
    let mins: Vec<f64> = measures.iter().map(|m| m.total_min()).collect();
    let weights: Vec<f64> = measures.iter().map(|m| m.weight).collect();
    let rest = (row_width - draft.min_width()).max(0.0);
    let mut it = distribute_linear(&mins, &weights, mins.iter().sum::<f64>() + rest).into_iter();
    draft.members.iter().map(|m| m.frame_width.unwrap_or_else(|| it.next().unwrap_or(0.0))).collect()
}

/// Where a full pass resumes after an edit in `measure`: the start of the
/// row holding it, or the row before when the edit sits at the start of a
/// system (the previous system's courtesy elements depend on it).
pub(super) fn anchor_for(score: &Score, current: &LayoutOutput, measure: usize) -> Option<Anchor> {
    let mut si = current.system_of_measure(measure)?;
    let (first, _) = current.systems[si].index_range()?;
    if first == measure && si > 0 {
        si -= 1;
    }
    while si > 0 && current.systems[si].same_line {
        si -= 1;
    }
    let start = current.systems[si].index_range()?.0;
    let tick = match (start..score.measures.len()).find_map(|i| score.measure(i)) {
        Some(m) => m.tick,
        None => score.end_tick(),
    };
    Some(Anchor {
        system: si,
        measure: start,
        tick,
        first_system: current.systems[si].first_in_section,
        kept: current.systems[..si].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::SysStaff;

    fn placement(index: usize, x: f64, width: f64) -> MeasurePlacement {
        MeasurePlacement {
            index,
            span: 1,
            is_frame: false,
            tick: index as i32 * 1920,
            x,
            width,
            min_width: width,
            header_width: 0.0,
            courtesy_width: 0.0,
            multi_measure: 0,
            columns: Vec::new(),
            end_barline: BarLineType::Normal,
        }
    }

    fn system(indices: &[usize]) -> System {
        System {
            x: 0.0,
            y: 0.0,
            width: 500.0,
            height: 20.0,
            left_margin: 0.0,
            staves: vec![SysStaff { visible: true, y: 0.0, height: 20.0, distance_up: 0.0, distance_down: 0.0 }],
            measures: indices.iter().map(|&i| placement(i, 0.0, 100.0)).collect(),
            frame: None,
            same_line: false,
            first_in_section: false,
            forced_break: false,
            page_break: false,
            section_break: false,
            add_stretch: false,
            ragged: false,
        }
    }

    fn output() -> LayoutOutput {
        LayoutOutput { systems: vec![system(&[0, 1]), system(&[2, 3]), system(&[4])], ..LayoutOutput::default() }
    }

    fn score(n: usize) -> Score {
        let mut s = Score::new(vec![Staff::new(0, ClefType::Treble)]);
        for _ in 0..n {
            s.append_measure(crate::duration::TimeSig::new(4, 4));
        }
        s
    }

    #[test]
    fn anchor_is_the_edited_system() {
        let s = score(5);
        let a = anchor_for(&s, &output(), 3).expect("anchor");
        assert_eq!(a.system, 1);
        assert_eq!(a.measure, 2);
        assert_eq!(a.tick, 2 * 1920);
        assert_eq!(a.kept.len(), 1);
    }

    #[test]
    fn edit_at_system_start_anchors_one_system_earlier() {
        let s = score(5);
        let a = anchor_for(&s, &output(), 4).expect("anchor");
        assert_eq!(a.system, 1);
        assert_eq!(a.measure, 2);
    }

    #[test]
    fn first_measure_anchors_at_the_start() {
        let s = score(5);
        let a = anchor_for(&s, &output(), 0).expect("anchor");
        assert_eq!(a.system, 0);
        assert!(a.kept.is_empty());
    }

    #[test]
    fn unknown_measure_has_no_anchor() {
        let s = score(5);
        assert!(anchor_for(&s, &LayoutOutput::default(), 2).is_none());
    }

    #[test]
    fn member_widths_fill_the_system() {
        let draft = SystemDraft {
            members: vec![
                Member { index: 0, span: 1, frame_width: None, min_width: 50.0, header: 20.0, courtesy: 0.0, weight: 1920.0 },
                Member { index: 1, span: 1, frame_width: Some(30.0), min_width: 30.0, header: 0.0, courtesy: 0.0, weight: 0.0 },
                Member { index: 2, span: 1, frame_width: None, min_width: 50.0, header: 0.0, courtesy: 0.0, weight: 1920.0 },
            ],
            left_margin: 10.0,
            ..SystemDraft::default()
        };
        let widths = member_widths(&draft, 400.0);
        assert_eq!(widths[1], 30.0);
        let total: f64 = widths.iter().sum::<f64>() + 10.0;
        assert!((total - 400.0).abs() < 1e-9);
        assert_eq!(widths[0], 190.0);
        assert_eq!(widths[2], 170.0);
    }
}

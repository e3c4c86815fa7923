//! Turn built rows into placed systems: courtesy elements, end barlines,
//! measure widths across the line, column positions inside each measure,
//! and the vertical staff stack.

use crate::model::*;

use super::constants::{RAGGED_REST_FACTOR, STAFF_HEIGHT, STAFF_LINES};
use super::generated::{courtesy, GeneratedPass};
use super::geometry::{ColumnPlacement, MeasurePlacement, SysStaff, System};
use super::springs::{distribute_linear, justify_gaps};
use super::systems::{Member, Row, SystemDraft};
use super::LayoutContext;

// ═══════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════

/// Courtesy elements after the last measure of a row. Their width is
/// added to that measure only after the line breaks are chosen.
pub(crate) fn add_courtesy(score: &Score, ctx: &LayoutContext, generated: &mut GeneratedPass, row: &mut Row) -> bool {
    let Some(draft) = row.systems.last_mut() else { return false };
    let Some(last) = draft.members.iter_mut().rev().find(|m| m.frame_width.is_none()) else { return false };
    let c = courtesy(score, ctx, last.last_index());
    last.courtesy = c.width;
    for (key, el) in c.elements {
        generated.claim(key, el);
    }
    c.double_bar
}

/// Barline closing measure `mi`.
fn end_barline(score: &Score, mi: usize, double_bar: bool) -> BarLineType {
    let Some(m) = score.measure(mi) else { return BarLineType::Normal };
    let next_repeat = score.next_measure(mi).and_then(|ni| score.measure(ni)).map_or(false, |n| n.repeat_start);
    match (m.repeat_end, next_repeat) {
        (true, true) => BarLineType::EndStartRepeat,
        (true, false) => BarLineType::EndRepeat,
        (false, true) => BarLineType::StartRepeat,
        (false, false) if double_bar && matches!(m.end_barline, BarLineType::Normal | BarLineType::Broken) => {
            BarLineType::Double
        }
        _ => m.end_barline,
    }
}

/// True when the row should not be stretched to the full line width.
pub(crate) fn is_ragged(ctx: &LayoutContext, row: &Row, row_width: f64) -> bool {
    let style = ctx.style;
    style.ragged_right || (row.last && row_width > 0.0 && row.min_width() / row_width <= style.last_system_fill_limit)
}

/// Final member widths for a row, in row order.
fn row_widths(ctx: &LayoutContext, row: &Row, row_width: f64, ragged: bool) -> Vec<Vec<f64>> {
    let style = ctx.style;
    let members: Vec<&Member> = row.systems.iter().flat_map(|s| s.members.iter()).collect();
    let margins: f64 = row.systems.iter().map(|s| s.left_margin).sum();
    let frames: f64 = members.iter().filter_map(|m| m.frame_width).sum();
    let measures: Vec<&&Member> = members.iter().filter(|m| m.frame_width.is_none()).collect();

    let measure_widths: Vec<f64> = if style.fix_measure_width && !measures.is_empty() {
        let each = (row_width - margins - frames) / measures.len() as f64;
        vec![each; measures.len()]
    } else {
        let min_total = row.min_width();
        let mut rest = (row_width - min_total).max(0.0);
        if ragged {
            rest = if min_total > rest { rest * RAGGED_REST_FACTOR } else { min_total };
        }
        let mins: Vec<f64> = measures.iter().map(|m| m.total_min()).collect();
        let weights: Vec<f64> = measures.iter().map(|m| m.weight).collect();
        distribute_linear(&mins, &weights, mins.iter().sum::<f64>() + rest)
    };

    let mut it = measure_widths.into_iter();
    row.systems
        .iter()
        .map(|s| {
            s.members
                .iter()
                .map(|m| m.frame_width.unwrap_or_else(|| it.next().unwrap_or(0.0)))
                .collect()
        })
        .collect()
}

/// Place every system of a row. `double_bar` marks a courtesy key change
/// at the row's end.
pub(crate) fn place_row(score: &Score, ctx: &LayoutContext, row: &Row, row_width: f64, double_bar: bool) -> Vec<System> {
    if row.systems.len() == 1 && row.systems[0].frame.is_some() {
        return vec![frame_system(&row.systems[0], row_width)];
    }
    let ragged = is_ragged(ctx, row, row_width);
    let widths = row_widths(ctx, row, row_width, ragged);
    let mut x = 0.0;
    let nsystems = row.systems.len();
    row.systems
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (draft, widths))| {
            let closing_double = double_bar && i + 1 == nsystems;
            let mut sys = place_system(score, ctx, draft, &widths, closing_double);
            sys.x = x;
            sys.ragged = ragged;
            x += sys.width;
            sys
        })
        .collect()
}

fn frame_system(draft: &SystemDraft, row_width: f64) -> System {
    let height = draft.frame.as_ref().map_or(0.0, |f| f.height);
    System {
        x: 0.0,
        y: 0.0,
        width: row_width,
        height,
        left_margin: 0.0,
        staves: Vec::new(),
        measures: Vec::new(),
        frame: draft.frame.clone(),
        same_line: false,
        first_in_section: draft.first_in_section,
        forced_break: draft.forced_break,
        page_break: draft.page_break,
        section_break: draft.section_break,
        add_stretch: false,
        ragged: false,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Systems and measures
// ═══════════════════════════════════════════════════════════════════════

/// Place one system whose member widths are already decided.
pub(crate) fn place_system(
    score: &Score,
    ctx: &LayoutContext,
    draft: &SystemDraft,
    widths: &[f64],
    double_bar: bool,
) -> System {
    let mut x = draft.left_margin;
    let last_measure = draft.last_measure().map(|m| m.index);
    let measures: Vec<MeasurePlacement> = draft
        .members
        .iter()
        .zip(widths)
        .map(|(member, &width)| {
            let placement = place_member(score, member, x, width, double_bar && Some(member.index) == last_measure);
            x += width;
            placement
        })
        .collect();
    let (staves, height) = layout_staves(score, ctx, draft);
    System {
        x: 0.0,
        y: 0.0,
        width: x,
        height,
        left_margin: draft.left_margin,
        staves,
        measures,
        frame: None,
        same_line: draft.same_line,
        first_in_section: draft.first_in_section,
        forced_break: draft.forced_break,
        page_break: draft.page_break,
        section_break: draft.section_break,
        add_stretch: false,
        ragged: false,
    }
}

fn place_member(score: &Score, member: &Member, x: f64, width: f64, double_bar: bool) -> MeasurePlacement {
    let Some(m) = score.measure(member.index) else {
        return MeasurePlacement {
            index: member.index,
            span: member.span,
            is_frame: true,
            tick: 0,
            x,
            width,
            min_width: member.total_min(),
            header_width: 0.0,
            courtesy_width: 0.0,
            multi_measure: 0,
            columns: Vec::new(),
            end_barline: BarLineType::Normal,
        };
    };
    let content = (width - member.header - member.courtesy).max(0.0);
    MeasurePlacement {
        index: member.index,
        span: member.span,
        is_frame: false,
        tick: m.tick,
        x,
        width,
        min_width: member.total_min(),
        header_width: member.header,
        courtesy_width: member.courtesy,
        multi_measure: m.multi_measure,
        columns: place_columns(m, member.header, content),
        end_barline: end_barline(score, member.last_index(), double_bar),
    }
}

/// Column anchors of a measure whose content area is `content` wide and
/// starts after `header`.
pub(crate) fn place_columns(m: &Measure, header: f64, content: f64) -> Vec<ColumnPlacement> {
    if m.multi_measure != 0 {
        return Vec::new();
    }
    let Some(spacing) = m.spacing.as_ref() else { return Vec::new() };
    if spacing.columns.is_empty() {
        return Vec::new();
    }
    let gaps = justify_gaps(&spacing.gaps, &spacing.gap_ticks, content - spacing.lead);
    let mut x = header + spacing.lead;
    spacing
        .columns
        .iter()
        .zip(gaps)
        .map(|(col, gap)| {
            let placed = ColumnPlacement { tick: col.tick, kind: col.kind, x };
            x += gap;
            placed
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Vertical staff stack
// ═══════════════════════════════════════════════════════════════════════

/// Highest and lowest notated line on `staff` within the system.
fn line_extent(score: &Score, draft: &SystemDraft, staff: usize) -> Option<(i32, i32)> {
    let tracks = staff * VOICES..(staff + 1) * VOICES;
    let mut out: Option<(i32, i32)> = None;
    for member in draft.members.iter().filter(|m| m.frame_width.is_none()) {
        for mi in member.index..=member.last_index() {
            let Some(m) = score.measure(mi) else { continue };
            for seg in m.segments.iter().filter(|s| s.kind.is_chord_rest()) {
                for t in tracks.clone() {
                    let Some(range) = seg
                        .chord_rest(t)
                        .and_then(|id| score.chord_rest(id))
                        .and_then(|cr| cr.chord_ref())
                        .and_then(|c| c.line_range())
                    else {
                        continue;
                    };
                    out = Some(match out {
                        Some((top, bottom)) => (top.min(range.0), bottom.max(range.1)),
                        None => range,
                    });
                }
            }
        }
    }
    out
}

/// Stack the staves top to bottom. Hidden staves take no room. Returns
/// the staves and the system height (top of the first visible staff to
/// the bottom of the last).
pub(crate) fn layout_staves(score: &Score, ctx: &LayoutContext, draft: &SystemDraft) -> (Vec<SysStaff>, f64) {
    let style = ctx.style;
    let half_space = style.point(0.5);
    let bottom_line = (STAFF_LINES - 1) * 2;
    let mut staves = Vec::with_capacity(score.nstaves());
    let mut y = 0.0;
    let mut height = 0.0;
    let mut previous_part: Option<usize> = None;

    for (si, staff) in score.staves.iter().enumerate() {
        let visible = draft.staves_visible.get(si).copied().unwrap_or(staff.visible);
        if !visible {
            staves.push(SysStaff { visible, y, height: 0.0, distance_up: 0.0, distance_down: 0.0 });
            continue;
        }
        if let Some(part) = previous_part {
            let gap = if part == staff.part { style.akkolade_distance } else { style.staff_distance };
            y += style.point(gap);
        }
        let staff_height = style.point(STAFF_HEIGHT) * staff.mag;
        let (up, down) = match line_extent(score, draft, si) {
            Some((top, bottom)) => (
                (-top).max(0) as f64 * half_space * staff.mag,
                (bottom - bottom_line).max(0) as f64 * half_space * staff.mag,
            ),
            None => (0.0, 0.0),
        };
        staves.push(SysStaff {
            visible,
            y,
            height: staff_height,
            distance_up: up,
            distance_down: down,
        });
        y += staff_height;
        height = y;
        previous_part = Some(staff.part);
    }
    (staves, height)
}

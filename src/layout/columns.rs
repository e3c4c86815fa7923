//! Chord-column analysis: for all chords of one staff at one segment, decide
//! notehead mirroring, unison suppression, and accidental stacking.

use crate::duration::Tick;
use crate::model::*;
use crate::services::Symbol;

use super::LayoutContext;

// ═══════════════════════════════════════════════════════════════════════
// Column working set
// ═══════════════════════════════════════════════════════════════════════

/// One notehead of a column, with its inputs and computed results.
#[derive(Debug, Clone)]
pub(crate) struct ColumnNote {
    /// Index into the column's chord list
    pub(crate) chord: usize,
    /// Index within its chord
    pub(crate) note: usize,
    pub(crate) track: usize,
    pub(crate) line: i32,
    pub(crate) up: bool,
    pub(crate) staff_move: i32,
    pub(crate) ticks: Tick,
    pub(crate) head_group: HeadGroup,
    /// Resolved (never `Auto`)
    pub(crate) head_type: HeadType,
    pub(crate) head_width: f64,
    pub(crate) user_mirror: MirrorDirection,
    pub(crate) user_offset: bool,
    pub(crate) accidental: Option<AccidentalKind>,
    pub(crate) accidental_width: f64,

    pub(crate) x: f64,
    pub(crate) mirror: bool,
    pub(crate) hidden: bool,
    pub(crate) accidental_x: Option<f64>,
}

/// Distances used by the column pass, already in device units.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnParams {
    pub(crate) stem_width: f64,
    pub(crate) accidental_distance: f64,
    pub(crate) accidental_note_distance: f64,
}

/// Sort bottom to top. At equal lines an up-stem note from another voice
/// goes before a down-stem one.
pub(crate) fn sort_column(notes: &mut [ColumnNote]) {
    notes.sort_by(|a, b| b.line.cmp(&a.line).then(a.track.cmp(&b.track)));
    for i in 0..notes.len().saturating_sub(1) {
        let (a, b) = (&notes[i], &notes[i + 1]);
        if a.line == b.line && a.track != b.track && !a.up && b.up {
            notes.swap(i, i + 1);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Mirroring and unisons
// ═══════════════════════════════════════════════════════════════════════

/// Resolve a sorted column in place. `chord_x` receives each chord's
/// horizontal displacement. Returns the dot column position.
pub(crate) fn resolve_column(
    notes: &mut [ColumnNote],
    chord_x: &mut [f64],
    voices: usize,
    params: &ColumnParams,
) -> f64 {
    if notes.is_empty() {
        return 0.0;
    }
    chord_x.iter_mut().for_each(|x| *x = 0.0);

    // Up stems (or several voices) start from the bottom, down stems from the top.
    let order: Vec<usize> = if notes[0].up || voices > 1 {
        (0..notes.len()).collect()
    } else {
        (0..notes.len()).rev().collect()
    };

    let mut last_line = 1000;
    let mut is_left = notes[order[0]].up;
    let mut last_move = notes[order[0]].staff_move;
    let mut mirror = false;
    let mut last_head: Option<(HeadGroup, HeadType)> = None;
    let mut prev: Option<usize> = None;

    for &i in &order {
        let (line, up, staff_move) = (notes[i].line, notes[i].up, notes[i].staff_move);
        let head = (notes[i].head_group, notes[i].head_type);

        let conflict = (last_line - line).abs() < 2 && last_move == staff_move;
        let same_head = last_line == line && last_head == Some(head);
        if up != is_left || conflict {
            is_left = !is_left;
        }
        let nmirror = up != is_left && !same_head;
        notes[i].hidden = false;

        if let Some(p) = prev.filter(|_| conflict && nmirror == mirror) {
            if same_head {
                if !notes[i].user_offset && !notes[p].user_offset {
                    if notes[i].ticks > notes[p].ticks {
                        notes[p].hidden = true;
                    } else {
                        notes[i].hidden = true;
                    }
                }
            } else {
                let shift = notes[i].head_width - params.stem_width;
                if line > last_line || !up {
                    chord_x[notes[i].chord] = shift;
                } else {
                    chord_x[notes[p].chord] = shift;
                }
            }
        }

        mirror = match notes[i].user_mirror {
            MirrorDirection::Auto => nmirror,
            MirrorDirection::Left => !up,
            MirrorDirection::Right => up,
        };
        notes[i].mirror = mirror;

        last_move = staff_move;
        last_line = line;
        last_head = Some(head);
        prev = Some(i);
    }

    for n in notes.iter_mut() {
        let swing = n.head_width - params.stem_width;
        n.x = match (n.mirror, n.up) {
            (false, _) => 0.0,
            (true, true) => swing,
            (true, false) => -swing,
        };
    }

    stack_accidentals(notes, chord_x, params);

    notes
        .iter()
        .filter(|n| !n.hidden)
        .map(|n| chord_x[n.chord] + n.x + n.head_width)
        .fold(0.0, f64::max)
}

// ═══════════════════════════════════════════════════════════════════════
// Accidental stacking
// ═══════════════════════════════════════════════════════════════════════

fn overlap_steps(above: AccidentalKind) -> i32 {
    if above.is_flat_type() {
        4
    } else {
        5
    }
}

/// Place accidentals of visible notes, top to bottom, so that their x
/// never increases going down. Positions are relative to the column's
/// leftmost head.
fn stack_accidentals(notes: &mut [ColumnNote], chord_x: &[f64], params: &ColumnParams) {
    let acc: Vec<usize> = (0..notes.len())
        .rev()
        .filter(|&i| !notes[i].hidden && notes[i].accidental.is_some())
        .collect();
    for n in notes.iter_mut() {
        n.accidental_x = None;
    }
    if acc.is_empty() {
        return;
    }

    let pnd = params.accidental_note_distance;
    let pd = params.accidental_distance;
    let kind = |i: usize| notes[i].accidental.unwrap_or(AccidentalKind::Natural);
    let flush = |i: usize| -pnd - notes[i].accidental_width;

    let n = acc.len();
    let mut xs = vec![0.0; n];
    xs[0] = flush(acc[0]);

    // Bottom accidental against the top one.
    if n > 1 {
        let (top, bottom) = (acc[0], acc[n - 1]);
        let dist = (notes[top].line - notes[bottom].line).abs();
        let w = notes[bottom].accidental_width;
        xs[n - 1] = if dist > overlap_steps(kind(top)) {
            flush(bottom)
        } else if kind(top).is_flat_type() && kind(bottom).is_flat_type() && dist > 2 {
            xs[0] - w * 0.5
        } else {
            xs[0] - w
        };
    }

    for k in 1..n.saturating_sub(1) {
        let (above, cur, bottom) = (acc[k - 1], acc[k], acc[n - 1]);
        let w = notes[cur].accidental_width;
        let up_dist = (notes[above].line - notes[cur].line).abs();
        let down_dist = (notes[cur].line - notes[bottom].line).abs();

        let mut reference: Option<f64> = None;
        if up_dist <= overlap_steps(kind(above)) {
            reference = Some(if kind(above).is_flat_type() && kind(cur).is_flat_type() && up_dist > 2 {
                xs[k - 1] + w * 0.5
            } else {
                xs[k - 1]
            });
        }
        if down_dist <= overlap_steps(kind(cur)) {
            reference = Some(reference.map_or(xs[n - 1], |r| r.min(xs[n - 1])));
        }
        xs[k] = match reference {
            Some(r) => r - pd - w,
            None => flush(cur),
        };
        xs[k] = xs[k].min(xs[k - 1]);
    }
    if n > 1 {
        xs[n - 1] = xs[n - 1].min(xs[n - 2]);
    }

    let left = notes
        .iter()
        .filter(|n| !n.hidden)
        .map(|n| chord_x[n.chord] + n.x)
        .fold(f64::INFINITY, f64::min);
    let left = if left.is_finite() { left } else { 0.0 };
    for (k, &i) in acc.iter().enumerate() {
        notes[i].accidental_x = Some(left + xs[k]);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Score driver
// ═══════════════════════════════════════════════════════════════════════

/// Run the column pass for every chord/rest segment of a measure.
pub(crate) fn layout_measure_columns(score: &mut Score, ctx: &LayoutContext, measure: usize) {
    let nseg = score.measure(measure).map_or(0, |m| m.segments.len());
    for si in 0..nseg {
        layout_segment(score, ctx, measure, si);
    }
}

fn layout_segment(score: &mut Score, ctx: &LayoutContext, measure: usize, si: usize) {
    let nstaves = score.nstaves();
    let Some(seg) = score.measure(measure).and_then(|m| m.segments.get(si)) else { return };
    if !seg.kind.is_chord_rest() {
        return;
    }
    let tracks: Vec<Option<ChordRestId>> = (0..score.ntracks()).map(|t| seg.chord_rest(t)).collect();
    let params = ColumnParams {
        stem_width: ctx.style.point(ctx.style.stem_width),
        accidental_distance: ctx.style.point(ctx.style.accidental_distance),
        accidental_note_distance: ctx.style.point(ctx.style.accidental_note_distance),
    };

    let mut dots = vec![0.0; nstaves];
    for staff in 0..nstaves {
        if score.staves[staff].tablature {
            continue;
        }
        let chords: Vec<ChordRestId> = tracks[staff * VOICES..(staff + 1) * VOICES]
            .iter()
            .flatten()
            .copied()
            .filter(|&id| score.chord_rest(id).map_or(false, |c| !c.is_rest()))
            .collect();
        if chords.is_empty() {
            continue;
        }

        let mut notes = collect_notes(score, ctx, staff, &chords);
        sort_column(&mut notes);
        let mut chord_x = vec![0.0; chords.len()];
        dots[staff] = resolve_column(&mut notes, &mut chord_x, chords.len(), &params);

        for (ci, &id) in chords.iter().enumerate() {
            if let Some(cr) = score.chord_rest_mut(id) {
                cr.x_offset = chord_x[ci];
            }
        }
        for n in &notes {
            let Some(cr) = score.chord_rest_mut(chords[n.chord]) else { continue };
            let Some(note) = cr.chord_mut().and_then(|c| c.notes.get_mut(n.note)) else { continue };
            note.x = n.x;
            note.mirror = n.mirror;
            note.hidden = n.hidden;
            if let Some(acc) = note.accidental.as_mut() {
                acc.x = n.accidental_x.unwrap_or(0.0);
                acc.y = ctx.style.point(note.line as f64 * 0.5);
            }
        }
    }

    if let Some(seg) = score.measure_mut(measure).and_then(|m| m.segments.get_mut(si)) {
        seg.dot_positions = dots;
    }
}

fn collect_notes(score: &Score, ctx: &LayoutContext, staff: usize, chords: &[ChordRestId]) -> Vec<ColumnNote> {
    let staff_mag = score.staves[staff].mag;
    let mut out = Vec::new();
    for (ci, &id) in chords.iter().enumerate() {
        let Some(cr) = score.chord_rest(id) else { continue };
        let Some(chord) = cr.chord_ref() else { continue };
        let mag = if cr.grace { staff_mag * ctx.style.grace_mag } else { staff_mag };
        let ticks = score.actual_ticks(id);
        for (ni, note) in chord.notes.iter().enumerate() {
            let head_type = match note.head_type {
                HeadType::Auto => HeadType::for_duration(cr.duration.kind),
                h => h,
            };
            let accidental = note.accidental.map(|a| a.kind);
            out.push(ColumnNote {
                chord: ci,
                note: ni,
                track: cr.track,
                line: note.line,
                up: cr.up,
                staff_move: cr.staff_move,
                ticks,
                head_group: note.head_group,
                head_type,
                head_width: ctx.metrics.width(Symbol::NoteHead(note.head_group, head_type), mag),
                user_mirror: note.user_mirror,
                user_offset: note.has_user_offset(),
                accidental,
                accidental_width: accidental.map_or(0.0, |k| ctx.metrics.width(Symbol::Accidental(k), mag)),
                x: 0.0,
                mirror: false,
                hidden: false,
                accidental_x: None,
            });
        }
    }
    out
}

//! Tie and spanner endpoint resolution against the placed systems.
//!
//! A missing counterpart is not an error: the element is logged and left
//! out of the output.

use log::warn;

use crate::duration::Tick;
use crate::model::*;

use super::geometry::{LayoutOutput, SpannerPlacement, TiePlacement};

/// Non-grace chords and rests of one track, in time order.
fn track_chords(score: &Score, track: usize) -> Vec<ChordRestId> {
    score
        .measures
        .iter()
        .filter_map(MeasureBase::as_measure)
        .flat_map(|m| m.segments.iter())
        .filter(|s| s.kind == SegmentKind::ChordRest)
        .filter_map(|s| s.chord_rest(track))
        .collect()
}

/// Connect every forward tie to the next chord on its track holding the
/// same pitch.
pub(crate) fn resolve_ties(score: &Score, output: &LayoutOutput) -> Vec<TiePlacement> {
    let mut ties = Vec::new();
    for track in 0..score.ntracks() {
        let chords = track_chords(score, track);
        for (i, &id) in chords.iter().enumerate() {
            let Some(cr) = score.chord_rest(id) else { continue };
            let Some(chord) = cr.chord_ref() else { continue };
            for note in chord.notes.iter().filter(|n| n.tie_forward) {
                let end = chords
                    .get(i + 1)
                    .and_then(|&next| score.chord_rest(next))
                    .filter(|next| next.chord_ref().map_or(false, |c| c.notes.iter().any(|n| n.pitch == note.pitch)));
                let Some(end) = end else {
                    warn!("tie from tick {} pitch {} on track {track} has no end note", cr.tick, note.pitch);
                    continue;
                };
                let (Some(start_system), Some(end_system)) =
                    (output.system_at_tick(cr.tick), output.system_at_tick(end.tick))
                else {
                    warn!("tie at tick {} is outside the laid-out systems", cr.tick);
                    continue;
                };
                ties.push(TiePlacement {
                    track,
                    pitch: note.pitch,
                    start_tick: cr.tick,
                    end_tick: end.tick,
                    start_system,
                    end_system,
                });
            }
        }
    }
    ties
}

/// Tick of the last measure content covered by a spanner ending at `tick2`.
fn last_covered(score: &Score, tick: Tick, tick2: Tick) -> Option<Tick> {
    let end = if tick2 > tick { tick2 - 1 } else { tick2 };
    score.measure_index_at(end).map(|_| end)
}

/// Map every spanner onto the systems it passes through.
pub(crate) fn resolve_spanners(score: &Score, output: &LayoutOutput) -> Vec<SpannerPlacement> {
    let mut out = Vec::new();
    for sp in &score.spanners {
        if sp.tick2 < sp.tick || score.measure_index_at(sp.tick).is_none() {
            warn!("{:?} at tick {} has no start segment", sp.kind, sp.tick);
            continue;
        }
        let Some(end) = last_covered(score, sp.tick, sp.tick2) else {
            warn!("{:?} at tick {} has no end segment at {}", sp.kind, sp.tick, sp.tick2);
            continue;
        };
        let (Some(first), Some(last)) = (output.system_at_tick(sp.tick), output.system_at_tick(end)) else {
            warn!("{:?} at tick {} is outside the laid-out systems", sp.kind, sp.tick);
            continue;
        };
        out.push(SpannerPlacement {
            kind: sp.kind,
            track: sp.track,
            tick: sp.tick,
            tick2: sp.tick2,
            systems: (first..=last).filter(|&i| !output.systems[i].is_vbox()).collect(),
        });
    }
    out
}

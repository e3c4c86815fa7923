//! Auto-beaming and stem directions.
//!
//! Generated beams are discarded and rebuilt on every full pass. User beams
//! keep their membership; a user-beamed chord closes whatever auto beam is
//! open on its track.

use crate::duration::Tick;
use crate::model::*;

use super::constants::MIDDLE_LINE;

// ═══════════════════════════════════════════════════════════════════════
// Stems
// ═══════════════════════════════════════════════════════════════════════

/// Unbeamed stem direction of one chord.
fn chord_up(score: &Score, id: ChordRestId, multi_voice: bool) -> bool {
    let Some(cr) = score.chord_rest(id) else { return false };
    match cr.stem_direction {
        Direction::Up => return true,
        Direction::Down => return false,
        Direction::Auto => {}
    }
    if multi_voice {
        return cr.voice() % 2 == 0;
    }
    match cr.chord_ref().and_then(|c| c.line_range()) {
        Some((top, bottom)) => top + bottom > MIDDLE_LINE * 2,
        None => false,
    }
}

/// Give every chord its own stem direction.
pub(crate) fn compute_stems(score: &mut Score) {
    for mi in 0..score.measures.len() {
        let Some(m) = score.measure(mi) else { continue };
        let multi: Vec<bool> = (0..score.nstaves()).map(|s| score.has_voices(mi, s)).collect();
        let ids: Vec<ChordRestId> = m
            .segments
            .iter()
            .filter(|s| s.kind.is_chord_rest())
            .flat_map(|s| s.elements.iter())
            .filter_map(|e| match e {
                Some(Element::ChordRest(id)) => Some(*id),
                _ => None,
            })
            .collect();
        for id in ids {
            let staff = score.chord_rest(id).map_or(0, |c| c.staff());
            let up = chord_up(score, id, multi.get(staff).copied().unwrap_or(false));
            if let Some(cr) = score.chord_rest_mut(id) {
                cr.up = !cr.is_rest() && up;
            }
        }
    }
}

/// Common direction for a beam: a user direction on any member wins,
/// otherwise the members' note lines vote against the middle line.
fn layout_beam(score: &mut Score, beam: BeamId) {
    let Some(members) = score.beams.get(beam).map(|b| b.members.clone()) else { return };
    let mut forced = None;
    let mut sum = 0;
    let mut count = 0;
    for &id in &members {
        let Some(cr) = score.chord_rest(id) else { continue };
        match cr.stem_direction {
            Direction::Up => forced = forced.or(Some(true)),
            Direction::Down => forced = forced.or(Some(false)),
            Direction::Auto => {}
        }
        if let Some((top, bottom)) = cr.chord_ref().and_then(|c| c.line_range()) {
            sum += top + bottom;
            count += 1;
        }
    }
    let voice_up = members
        .first()
        .and_then(|&id| score.chord_rest(id))
        .map(|cr| (cr.voice() % 2 == 0, score.measure_index_at(cr.tick).map_or(false, |mi| score.has_voices(mi, cr.staff()))));
    let up = match (forced, voice_up) {
        (Some(up), _) => up,
        (None, Some((up, true))) => up,
        _ => count > 0 && sum > MIDDLE_LINE * 2 * count,
    };
    if let Some(b) = score.beams.get_mut(beam) {
        b.up = up;
    }
    for id in members {
        if let Some(cr) = score.chord_rest_mut(id) {
            cr.up = up;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Grouping
// ═══════════════════════════════════════════════════════════════════════

/// Drop every generated beam, detaching its members.
pub(crate) fn clear_generated_beams(score: &mut Score) {
    let generated: Vec<BeamId> = score
        .beams
        .iter()
        .filter(|(_, b)| b.generated)
        .map(|(id, _)| id)
        .collect();
    for bid in generated {
        if let Some(beam) = score.beams.remove(bid) {
            for id in beam.members {
                if let Some(cr) = score.chord_rest_mut(id) {
                    cr.beam = None;
                }
            }
        }
    }
}

/// A chord/rest occurrence on one track.
#[derive(Debug, Clone, Copy)]
struct Entry {
    measure: usize,
    seg: usize,
    grace: bool,
    id: ChordRestId,
}

fn track_entries(score: &Score, track: usize) -> Vec<Entry> {
    let mut out = Vec::new();
    for (mi, mb) in score.measures.iter().enumerate() {
        let Some(m) = mb.as_measure() else { continue };
        for (si, seg) in m.segments.iter().enumerate() {
            if !seg.kind.is_chord_rest() {
                continue;
            }
            if let Some(id) = seg.chord_rest(track) {
                out.push(Entry { measure: mi, seg: si, grace: seg.kind == SegmentKind::Grace, id });
            }
        }
    }
    out
}

/// Per-track grouping state.
struct Grouper<'a> {
    score: &'a mut Score,
    track: usize,
    candidate: Option<ChordRestId>,
    beam: Vec<ChordRestId>,
}

impl<'a> Grouper<'a> {
    fn flush(&mut self) {
        self.close_beam();
        self.candidate = None;
    }

    /// Materialize the open beam. A single member stays unbeamed.
    fn close_beam(&mut self) {
        let members = std::mem::take(&mut self.beam);
        if members.len() < 2 {
            return;
        }
        let bid = self.score.beams.insert(Beam {
            members: members.clone(),
            generated: true,
            track: self.track,
            up: false,
        });
        for id in members {
            if let Some(cr) = self.score.chord_rest_mut(id) {
                cr.beam = Some(bid);
            }
        }
        layout_beam(self.score, bid);
    }

    fn cr(&self, id: ChordRestId) -> Option<&ChordRest> {
        self.score.chord_rest(id)
    }

    fn end_tick(&self, id: ChordRestId) -> Tick {
        self.cr(id).map_or(0, |c| c.tick) + self.score.actual_ticks(id)
    }

    /// `prev` and `cr` straddle a beat-group boundary of the measure.
    fn crosses_beat(&self, measure: usize, prev: ChordRestId, cr: ChordRestId) -> bool {
        let Some(m) = self.score.measure(measure) else { return false };
        let (Some(a), Some(b)) = (self.cr(prev), self.cr(cr)) else { return false };
        if a.tick < m.tick {
            return false;
        }
        m.time_sig.crosses_boundary(a.tick - m.tick, self.end_tick(cr) - m.tick) && b.tick > a.tick
    }

    fn has_gap(&self, prev: ChordRestId, cr: ChordRestId) -> bool {
        self.end_tick(prev) < self.cr(cr).map_or(0, |c| c.tick)
    }

    fn same_tuplet(&self, a: ChordRestId, b: ChordRestId) -> bool {
        self.cr(a).map(|c| c.tuplet) == self.cr(b).map(|c| c.tuplet)
    }

    fn run(&mut self, entries: &[Entry]) {
        let mut measure: Option<usize> = None;
        let mut i = 0;
        while i < entries.len() {
            let e = entries[i];
            i += 1;
            let Some(cr) = self.cr(e.id) else { continue };
            let mode = cr.beam_mode;
            let hooks = cr.duration.kind.hooks();
            let is_rest = cr.is_rest();
            let user_beam = cr.beam.is_some();

            if measure != Some(e.measure) {
                if measure.is_some() && !mode.is_mid() {
                    self.flush();
                }
                measure = Some(e.measure);
            }

            if e.grace {
                let mut chain = vec![e.id];
                while let Some(next) = entries.get(i) {
                    let chained = next.grace
                        && next.measure == e.measure
                        && next.seg == entries[i - 1].seg + 1
                        && self.cr(next.id).map_or(false, |c| c.duration.kind.hooks() > 0 && !c.is_rest());
                    if !chained || hooks == 0 || is_rest {
                        break;
                    }
                    chain.push(next.id);
                    i += 1;
                }
                if chain.len() > 1 && !user_beam {
                    let open = std::mem::replace(&mut self.beam, chain);
                    self.close_beam();
                    self.beam = open;
                }
                continue;
            }

            if is_rest || hooks == 0 || mode == BeamMode::No || user_beam {
                self.flush();
                continue;
            }

            let mut consumed = false;
            if let Some(&last) = self.beam.last() {
                let end = mode == BeamMode::Begin
                    || (!mode.is_mid()
                        && (!self.same_tuplet(last, e.id)
                            || self.crosses_beat(e.measure, last, e.id)
                            || self.has_gap(last, e.id)));
                if end {
                    self.close_beam();
                } else {
                    self.beam.push(e.id);
                    consumed = true;
                }
            }
            if consumed {
                continue;
            }

            if self.score.is_last_in_tuplet(e.id) {
                if let Some(a1) = self.candidate.take() {
                    if mode.is_mid() || self.same_tuplet(a1, e.id) {
                        self.beam = vec![a1, e.id];
                        self.close_beam();
                    }
                }
                continue;
            }

            match self.candidate {
                None => self.candidate = Some(e.id),
                Some(a1) => {
                    let restart = !mode.is_mid()
                        && (mode == BeamMode::Begin
                            || self.crosses_beat(e.measure, a1, e.id)
                            || self.has_gap(a1, e.id)
                            || !self.same_tuplet(a1, e.id));
                    if restart {
                        self.candidate = Some(e.id);
                    } else {
                        self.beam = vec![a1, e.id];
                        self.candidate = None;
                    }
                }
            }
        }
        self.flush();
    }
}

/// Rebuild generated beams on every track and settle stem directions.
pub(crate) fn layout_beams(score: &mut Score) {
    clear_generated_beams(score);
    compute_stems(score);
    for track in 0..score.ntracks() {
        let entries = track_entries(score, track);
        let mut grouper = Grouper { score: &mut *score, track, candidate: None, beam: Vec::new() };
        grouper.run(&entries);
    }
    let user: Vec<BeamId> = score.beams.iter().filter(|(_, b)| !b.generated).map(|(id, _)| id).collect();
    for bid in user {
        layout_beam(score, bid);
    }
}

/// True if any beam continues across the start or end of the measure.
pub(crate) fn has_cross_measure_beam(score: &Score, measure: usize) -> bool {
    let Some(m) = score.measure(measure) else { return false };
    score.beams.iter().any(|(_, b)| {
        let ticks: Vec<Tick> = b.members.iter().filter_map(|&id| score.chord_rest(id)).map(|c| c.tick).collect();
        let inside = ticks.iter().any(|&t| t >= m.tick && t < m.end_tick());
        let outside = ticks.iter().any(|&t| t < m.tick || t >= m.end_tick());
        inside && outside
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::{Duration, DurationType, Ratio, TimeSig};

    fn eighth() -> ChordRest {
        ChordRest::chord(Duration::new(DurationType::Eighth), vec![Note::new(60, 5)])
    }

    fn score() -> Score {
        Score::new(vec![Staff::new(0, ClefType::Treble)])
    }

    fn beam_sizes(score: &Score) -> Vec<usize> {
        let mut v: Vec<(Tick, usize)> = score
            .beams
            .iter()
            .map(|(_, b)| (score.chord_rest(b.members[0]).unwrap().tick, b.members.len()))
            .collect();
        v.sort();
        v.into_iter().map(|(_, n)| n).collect()
    }

    #[test]
    fn common_time_eighths_beam_by_half_bar() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(4, 4));
        for i in 0..8 {
            s.add_chord_rest(m, 0, i * 240, eighth()).unwrap();
        }
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![4, 4]);
    }

    #[test]
    fn quarter_and_rest_terminate_beams() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(4, 4));
        s.add_chord_rest(m, 0, 0, eighth()).unwrap();
        s.add_chord_rest(m, 0, 240, ChordRest::rest(Duration::new(DurationType::Eighth))).unwrap();
        s.add_chord_rest(m, 0, 480, eighth()).unwrap();
        s.add_chord_rest(m, 0, 720, eighth()).unwrap();
        let q = ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(60, 5)]);
        s.add_chord_rest(m, 0, 960, q).unwrap();
        s.add_chord_rest(m, 0, 1440, eighth()).unwrap();
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![2]);
    }

    #[test]
    fn begin_mode_restarts() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(4, 4));
        s.add_chord_rest(m, 0, 0, eighth()).unwrap();
        s.add_chord_rest(m, 0, 240, eighth()).unwrap();
        s.add_chord_rest(m, 0, 480, eighth().with_beam_mode(BeamMode::Begin)).unwrap();
        s.add_chord_rest(m, 0, 720, eighth()).unwrap();
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![2, 2]);
    }

    #[test]
    fn no_mode_leaves_note_alone() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(4, 4));
        s.add_chord_rest(m, 0, 0, eighth()).unwrap();
        let lone = s.add_chord_rest(m, 0, 240, eighth().with_beam_mode(BeamMode::No)).unwrap();
        layout_beams(&mut s);
        assert!(s.beams.is_empty());
        assert!(s.chord_rest(lone).unwrap().beam.is_none());
    }

    #[test]
    fn triplet_closes_at_last_member() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(2, 4));
        let ids: Vec<_> = (0..3).map(|i| s.add_chord_rest(m, 0, i * 160, eighth()).unwrap()).collect();
        let after = s.add_chord_rest(m, 0, 480, eighth()).unwrap();
        s.add_chord_rest(m, 0, 720, eighth()).unwrap();
        s.create_tuplet(Ratio::new(3, 2), ids.iter().map(|&id| TupletMember::ChordRest(id)).collect())
            .unwrap();
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![3, 2]);
        let b0 = s.chord_rest(ids[0]).unwrap().beam;
        assert_eq!(s.chord_rest(ids[2]).unwrap().beam, b0);
        assert_ne!(s.chord_rest(after).unwrap().beam, b0);
    }

    #[test]
    fn measure_boundary_flushes_unless_mid() {
        let mut s = score();
        let m1 = s.append_measure(TimeSig::new(1, 4));
        let m2 = s.append_measure(TimeSig::new(1, 4));
        s.add_chord_rest(m1, 0, 0, eighth()).unwrap();
        s.add_chord_rest(m1, 0, 240, eighth()).unwrap();
        s.add_chord_rest(m2, 0, 0, eighth()).unwrap();
        s.add_chord_rest(m2, 0, 240, eighth()).unwrap();
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![2, 2]);

        let mut s = score();
        let m1 = s.append_measure(TimeSig::new(1, 4));
        let m2 = s.append_measure(TimeSig::new(1, 4));
        s.add_chord_rest(m1, 0, 0, eighth()).unwrap();
        s.add_chord_rest(m1, 0, 240, eighth()).unwrap();
        s.add_chord_rest(m2, 0, 0, eighth().with_beam_mode(BeamMode::Mid)).unwrap();
        s.add_chord_rest(m2, 0, 240, eighth()).unwrap();
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![4]);
        assert!(has_cross_measure_beam(&s, m2));
    }

    #[test]
    fn grace_notes_chain_into_their_own_beam() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(1, 4));
        let g = || ChordRest::chord(Duration::new(DurationType::D16th), vec![Note::new(62, 4)]).as_grace();
        s.add_chord_rest(m, 0, 0, g()).unwrap();
        s.add_chord_rest(m, 0, 0, g()).unwrap();
        s.add_chord_rest(m, 0, 0, ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(60, 5)]))
            .unwrap();
        layout_beams(&mut s);
        assert_eq!(beam_sizes(&s), vec![2]);
    }

    #[test]
    fn user_beam_survives_regeneration() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(4, 4));
        let a = s.add_chord_rest(m, 0, 720, eighth()).unwrap();
        let b = s.add_chord_rest(m, 0, 960, eighth()).unwrap();
        let user = s.create_beam(vec![a, b]).unwrap();
        layout_beams(&mut s);
        layout_beams(&mut s);
        assert_eq!(s.beams.len(), 1);
        assert_eq!(s.beams.get(user).map(|b| b.members.clone()), Some(vec![a, b]));
    }

    #[test]
    fn low_notes_stem_up() {
        let mut s = score();
        let m = s.append_measure(TimeSig::new(4, 4));
        let low = s
            .add_chord_rest(m, 0, 0, ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(60, 10)]))
            .unwrap();
        let high = s
            .add_chord_rest(m, 0, 480, ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(77, -1)]))
            .unwrap();
        layout_beams(&mut s);
        assert!(s.chord_rest(low).unwrap().up);
        assert!(!s.chord_rest(high).unwrap().up);
    }
}

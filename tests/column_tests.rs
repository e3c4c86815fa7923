//! Chord column tests: unison suppression, head-group offsets, and
//! accidental stacking, observed on the score after a full layout.

use pretty_assertions::assert_eq;
use scorelayout::*;

fn one_measure() -> (Score, usize) {
    let mut score = Score::new(vec![Staff::new(0, ClefType::Treble)]);
    let m = score.append_measure(TimeSig::new(4, 4));
    (score, m)
}

fn note_of(score: &Score, id: ChordRestId, index: usize) -> Note {
    score.chord_rest(id).and_then(|c| c.chord_ref()).map(|c| c.notes[index].clone()).expect("chord note")
}

#[test]
fn shorter_unison_note_is_hidden() {
    let (mut score, m) = one_measure();
    let half = ChordRest::chord(Duration::new(DurationType::Half), vec![Note::new(71, 4)]);
    let quarter = ChordRest::chord(
        Duration::new(DurationType::Quarter),
        vec![Note::new(71, 4).with_head_type(HeadType::Half)],
    );
    let h = score.add_chord_rest(m, 0, 0, half).unwrap();
    let q = score.add_chord_rest(m, 1, 0, quarter).unwrap();

    layout_score(&mut score, Style::default()).unwrap();

    assert!(!note_of(&score, h, 0).hidden, "half note stays visible");
    assert!(note_of(&score, q, 0).hidden, "quarter note is hidden");
}

#[test]
fn different_head_groups_shift_apart() {
    let (mut score, m) = one_measure();
    let normal = ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(71, 4)]);
    let cross = ChordRest::chord(
        Duration::new(DurationType::Quarter),
        vec![Note::new(71, 4).with_head_group(HeadGroup::Cross)],
    );
    let a = score.add_chord_rest(m, 0, 0, normal).unwrap();
    let b = score.add_chord_rest(m, 1, 0, cross).unwrap();

    layout_score(&mut score, Style::default()).unwrap();

    assert!(!note_of(&score, a, 0).hidden);
    assert!(!note_of(&score, b, 0).hidden);
    let style = Style::default();
    let metrics = StandardMetrics::new(style.spatium);
    let head = metrics.width(Symbol::NoteHead(HeadGroup::Cross, HeadType::for_duration(DurationType::Quarter)), 1.0);
    let shift = head - style.point(style.stem_width);
    let xa = score.chord_rest(a).unwrap().x_offset;
    let xb = score.chord_rest(b).unwrap().x_offset;
    assert!(shift > 0.0);
    assert!(((xb - xa) - shift).abs() < 1e-9, "down-stem chord shifted by {}, expected {shift}", xb - xa);
}

#[test]
fn stacked_accidentals_never_move_right_going_down() {
    let (mut score, m) = one_measure();
    let notes = vec![
        Note::new(77, 0).with_accidental(AccidentalKind::Sharp),
        Note::new(74, 2).with_accidental(AccidentalKind::Flat),
        Note::new(71, 4).with_accidental(AccidentalKind::Natural),
        Note::new(67, 6).with_accidental(AccidentalKind::Sharp),
    ];
    let id = score.add_chord_rest(m, 0, 0, ChordRest::chord(Duration::new(DurationType::Whole), notes)).unwrap();

    layout_score(&mut score, Style::default()).unwrap();

    let chord = score.chord_rest(id).and_then(|c| c.chord_ref()).unwrap();
    let mut by_line: Vec<&Note> = chord.notes.iter().collect();
    by_line.sort_by_key(|n| n.line);
    let xs: Vec<f64> = by_line.iter().map(|n| n.accidental.unwrap().x).collect();
    for pair in xs.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-9, "accidental x increased going down: {xs:?}");
    }
    assert!(xs.iter().all(|&x| x < 0.0), "accidentals sit left of the heads: {xs:?}");
}

#[test]
fn second_interval_mirrors_one_head() {
    let (mut score, m) = one_measure();
    let notes = vec![Note::new(72, 3), Note::new(71, 4)];
    let id = score.add_chord_rest(m, 0, 0, ChordRest::chord(Duration::new(DurationType::Quarter), notes)).unwrap();

    layout_score(&mut score, Style::default()).unwrap();

    let mirrored = score
        .chord_rest(id)
        .and_then(|c| c.chord_ref())
        .map(|c| c.notes.iter().filter(|n| n.mirror).count())
        .unwrap();
    assert_eq!(mirrored, 1);
}

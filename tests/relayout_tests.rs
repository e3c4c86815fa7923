//! Relayout tests: the in-place fast path and the anchored full pass.

use pretty_assertions::assert_eq;
use scorelayout::*;

/// Nine measures of quarters, three per system.
fn three_systems() -> (Score, Vec<Vec<ChordRestId>>) {
    let mut score = Score::new(vec![Staff::new(0, ClefType::Treble)]);
    let mut ids = Vec::new();
    for i in 0..9 {
        let m = score.append_measure(TimeSig::new(4, 4));
        ids.push(
            (0..4)
                .map(|k| {
                    let cr = ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(71, 4)]);
                    score.add_chord_rest(m, 0, k * 480, cr).unwrap()
                })
                .collect(),
        );
        if i % 3 == 2 {
            score.measure_mut(m).unwrap().breaks.line = true;
        }
    }
    (score, ids)
}

fn laid_out() -> (ScoreLayouter, Score, Vec<Vec<ChordRestId>>) {
    let (mut score, ids) = three_systems();
    let mut l = ScoreLayouter::default();
    l.layout(&mut score, &mut NullSink).unwrap();
    (l, score, ids)
}

#[test]
fn pitch_change_rejustifies_in_place() {
    let (mut l, mut score, ids) = laid_out();
    let before = l.snapshot();
    assert_eq!(before.systems.iter().map(|s| s.measures.len()).collect::<Vec<_>>(), vec![3, 3, 3]);

    let note = &mut score.chord_rest_mut(ids[1][2]).unwrap().chord_mut().unwrap().notes[0];
    note.pitch = 74;
    note.line = 2;
    let mut sink: Vec<EditCommand> = Vec::new();
    let outcome = l.relayout(&mut score, 1, &mut sink).unwrap();

    assert_eq!(outcome, RelayoutOutcome::Incremental { system: 0 });
    let after = l.snapshot();
    assert_eq!(after.systems.len(), 3);
    assert_eq!(after.systems[0].width, before.systems[0].width);
    assert_eq!(after.systems[1], before.systems[1]);
    assert_eq!(after.pages.len(), before.pages.len());
    assert!(sink.is_empty());
}

#[test]
fn fast_path_matches_a_full_pass() {
    let (mut l, mut score, ids) = laid_out();
    score.chord_rest_mut(ids[4][0]).unwrap().chord_mut().unwrap().notes[0].line = 3;
    l.relayout(&mut score, 4, &mut NullSink).unwrap();
    let incremental = l.snapshot();

    let mut full = ScoreLayouter::default();
    full.layout(&mut score, &mut NullSink).unwrap();
    assert_eq!(incremental, full.snapshot());
}

#[test]
fn key_change_mid_system_relayouts_from_that_system() {
    let (mut l, mut score, _) = laid_out();
    score.add_key_sig(4, 0, KeySig { fifths: 2, show_courtesy: true }).unwrap();
    let mut sink: Vec<EditCommand> = Vec::new();
    let outcome = l.relayout(&mut score, 4, &mut sink).unwrap();

    assert_eq!(outcome, RelayoutOutcome::Full { anchor: 1 });
    let header_keys: Vec<GeneratedKey> = sink
        .iter()
        .filter(|c| matches!(c, EditCommand::AddGenerated { .. }))
        .map(EditCommand::key)
        .filter(|k| k.kind == GeneratedKind::HeaderKeySig)
        .collect();
    assert_eq!(header_keys, vec![GeneratedKey { tick: 6 * 1920, staff: 0, kind: GeneratedKind::HeaderKeySig }]);
    assert!(l.snapshot().measure(6).unwrap().header_width > 0.0);
}

#[test]
fn key_change_at_system_start_reaches_back_for_the_courtesy() {
    let (mut l, mut score, _) = laid_out();
    score.add_key_sig(3, 0, KeySig { fifths: -3, show_courtesy: true }).unwrap();
    let mut sink: Vec<EditCommand> = Vec::new();
    let outcome = l.relayout(&mut score, 3, &mut sink).unwrap();

    assert_eq!(outcome, RelayoutOutcome::Full { anchor: 0 });
    assert!(sink.iter().any(|c| c.key() == GeneratedKey {
        tick: 3 * 1920,
        staff: 0,
        kind: GeneratedKind::CourtesyKeySig
    }));
    assert_eq!(l.snapshot().measure(2).unwrap().end_barline, BarLineType::Double);
}

#[test]
fn anchored_pass_matches_a_full_pass() {
    let (mut l, mut score, _) = laid_out();
    score.add_key_sig(7, 0, KeySig { fifths: 1, show_courtesy: true }).unwrap();
    l.relayout(&mut score, 7, &mut NullSink).unwrap();
    let anchored = l.snapshot();
    let generated = score.generated.clone();

    let mut full = ScoreLayouter::default();
    let mut fresh = score.clone();
    fresh.generated = GeneratedElements::default();
    full.layout(&mut fresh, &mut NullSink).unwrap();
    assert_eq!(anchored, full.snapshot());
    assert_eq!(generated, fresh.generated);
}

#[test]
fn overflowing_edit_falls_back() {
    let (mut l, mut score, _) = laid_out();
    for k in 0..16 {
        let cr = ChordRest::chord(
            Duration::new(DurationType::D16th),
            vec![Note::new(66, 5).with_accidental(AccidentalKind::Sharp)],
        );
        score.add_chord_rest(1, 1, k * 120, cr).unwrap();
    }
    for k in 0..4 {
        let cr = ChordRest::chord(
            Duration::new(DurationType::Quarter),
            vec![Note::new(71, 4), Note::new(72, 3).with_accidental(AccidentalKind::Flat)],
        );
        score.add_chord_rest(1, 2, k * 480 + 240, cr.clone()).unwrap();
        score.add_chord_rest(1, 3, k * 480 + 60, cr).unwrap();
    }
    let outcome = l.relayout(&mut score, 1, &mut NullSink).unwrap();
    let out = l.snapshot();
    match outcome {
        RelayoutOutcome::Incremental { system } => {
            let sys = &out.systems[system];
            let sum: f64 = sys.measures.iter().map(|m| m.width).sum::<f64>() + sys.left_margin;
            assert!((sum - sys.width).abs() < 1e-6);
        }
        RelayoutOutcome::Full { anchor } => assert_eq!(anchor, 0),
    }
    assert!(out.measure(1).unwrap().width + 1e-6 >= out.measure(1).unwrap().min_width);
}

#[test]
fn unknown_measure_is_rejected() {
    let (mut l, mut score, _) = laid_out();
    let result = l.relayout(&mut score, 42, &mut NullSink);
    assert!(matches!(result, Err(LayoutError::InvalidMeasure(42))));
}

#[test]
fn relayout_before_any_layout_runs_a_full_pass() {
    let (mut score, _) = three_systems();
    let mut l = ScoreLayouter::default();
    let outcome = l.relayout(&mut score, 2, &mut NullSink).unwrap();
    assert_eq!(outcome, RelayoutOutcome::Full { anchor: 0 });
    assert_eq!(l.snapshot().systems.len(), 3);
}

#[test]
fn readers_share_the_current_output() {
    let (l, _, _) = laid_out();
    let shared = l.shared();
    let guard = shared.read().unwrap();
    assert_eq!(guard.systems.len(), 3);
}

#[test]
fn shrinking_the_last_row_turns_it_ragged() {
    let mut score = Score::new(vec![Staff::new(0, ClefType::Treble)]);
    for i in 0..2 {
        let m = score.append_measure(TimeSig::new(4, 4));
        for k in 0..4 {
            let cr = ChordRest::chord(Duration::new(DurationType::Quarter), vec![Note::new(71, 4)]);
            score.add_chord_rest(m, 0, k * 480, cr).unwrap();
        }
        if i == 0 {
            score.measure_mut(m).unwrap().breaks.line = true;
        }
    }
    score.measure_mut(1).unwrap().user_stretch = 4.0;
    let mut l = ScoreLayouter::default();
    l.layout(&mut score, &mut NullSink).unwrap();
    assert!(!l.snapshot().systems[1].ragged);

    score.measure_mut(1).unwrap().user_stretch = 1.0;
    l.relayout(&mut score, 1, &mut NullSink).unwrap();
    let relaid = l.snapshot();

    let mut full = ScoreLayouter::default();
    full.layout(&mut score, &mut NullSink).unwrap();
    let fresh = full.snapshot();
    assert!(fresh.systems[1].ragged);
    assert_eq!(relaid.systems[1].width, fresh.systems[1].width);
    assert_eq!(relaid, fresh);
}

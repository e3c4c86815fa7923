//! Generated elements: system-header clefs and signatures, and courtesy
//! signatures at the end of a system.
//!
//! The layout never edits the score directly for these. Each pass builds
//! a fresh set keyed by (tick, staff, kind), and the difference to the
//! previous pass goes to the host as edit commands.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::Serialize;

use crate::duration::{Tick, TimeSig};
use crate::model::*;
use crate::services::{EditCommand, EditSink, Symbol};

use super::constants::SMALL_CLEF_MAG;
use super::width::{cancellation_natural_count, clef_width, key_sig_width, time_sig_width};
use super::LayoutContext;

// ═══════════════════════════════════════════════════════════════════════
// Keys and elements
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum GeneratedKind {
    HeaderClef,
    HeaderKeySig,
    HeaderTimeSig,
    CourtesyClef,
    CourtesyKeySig,
    CourtesyTimeSig,
}

impl GeneratedKind {
    pub fn is_courtesy(self) -> bool {
        matches!(self, GeneratedKind::CourtesyClef | GeneratedKind::CourtesyKeySig | GeneratedKind::CourtesyTimeSig)
    }
}

/// Identity of a generated element. Header elements sit at the first tick
/// of a system, courtesy elements at the tick right after its last measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GeneratedKey {
    pub tick: Tick,
    pub staff: usize,
    pub kind: GeneratedKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum GeneratedElement {
    Clef { clef: ClefType, small: bool },
    /// `naturals` cancel accidentals of the previous key
    KeySig { fifths: i32, naturals: u32 },
    TimeSig(TimeSig),
}

/// The generated elements currently in the score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedElements {
    map: BTreeMap<GeneratedKey, GeneratedElement>,
}

impl GeneratedElements {
    pub fn get(&self, key: &GeneratedKey) -> Option<&GeneratedElement> {
        self.map.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GeneratedKey, &GeneratedElement)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Elements of `kind` on any staff.
    pub fn of_kind(&self, kind: GeneratedKind) -> impl Iterator<Item = (&GeneratedKey, &GeneratedElement)> {
        self.map.iter().filter(move |(k, _)| k.kind == kind)
    }

    /// Submit the commands that turn `self` into `next`. Returns how many
    /// were sent.
    pub(crate) fn diff(&self, next: &GeneratedElements, sink: &mut dyn EditSink) -> usize {
        let mut sent = 0;
        for (key, old) in &self.map {
            match next.map.get(key) {
                None => {
                    sink.submit(EditCommand::RemoveGenerated { key: *key, element: *old });
                    sent += 1;
                }
                Some(new) if new != old => {
                    sink.submit(EditCommand::ChangeGenerated { key: *key, from: *old, to: *new });
                    sent += 1;
                }
                Some(_) => {}
            }
        }
        for (key, new) in &next.map {
            if !self.map.contains_key(key) {
                sink.submit(EditCommand::AddGenerated { key: *key, element: *new });
                sent += 1;
            }
        }
        sent
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Per-pass working set
// ═══════════════════════════════════════════════════════════════════════

/// Generated elements while a pass runs. Starts as a copy of the previous
/// pass; entries nobody claims again are dropped at the end.
#[derive(Debug, Clone)]
pub(crate) struct GeneratedPass {
    working: GeneratedElements,
    claimed: BTreeSet<GeneratedKey>,
}

impl GeneratedPass {
    pub(crate) fn new(previous: &GeneratedElements) -> Self {
        Self { working: previous.clone(), claimed: BTreeSet::new() }
    }

    pub(crate) fn claim(&mut self, key: GeneratedKey, element: GeneratedElement) {
        self.working.map.insert(key, element);
        self.claimed.insert(key);
    }

    /// Keep everything a relayout does not revisit: elements before
    /// `tick`, and courtesy elements ending the system just before it.
    pub(crate) fn keep_before(&mut self, tick: Tick) {
        let kept: Vec<GeneratedKey> = self
            .working
            .map
            .keys()
            .filter(|k| k.tick < tick || (k.tick == tick && k.kind.is_courtesy()))
            .copied()
            .collect();
        self.claimed.extend(kept);
    }

    /// Remove generated elements from the interior of a system spanning
    /// `[first, end)`. Returns the ticks that lost an element.
    pub(crate) fn purge_interior(&mut self, first: Tick, end: Tick) -> Vec<Tick> {
        let doomed: Vec<GeneratedKey> = self
            .working
            .map
            .keys()
            .filter(|k| k.tick > first && k.tick < end)
            .copied()
            .collect();
        for key in &doomed {
            self.working.map.remove(key);
            self.claimed.remove(key);
        }
        doomed.into_iter().map(|k| k.tick).collect()
    }

    pub(crate) fn finish(mut self) -> GeneratedElements {
        let claimed = self.claimed;
        self.working.map.retain(|k, _| claimed.contains(k));
        self.working
    }
}

// ═══════════════════════════════════════════════════════════════════════
// System header
// ═══════════════════════════════════════════════════════════════════════

/// Generated elements of one system boundary and the room they need.
#[derive(Debug, Clone, Default)]
pub(crate) struct Generated {
    pub(crate) width: f64,
    pub(crate) elements: Vec<(GeneratedKey, GeneratedElement)>,
    /// A key change is announced: the barline before it becomes double
    pub(crate) double_bar: bool,
}

fn user_element(m: &Measure, kind: SegmentKind, tick: Tick, staff: usize) -> Option<Element> {
    m.find_segment(kind, tick).and_then(|s| s.element(staff * VOICES)).copied()
}

fn element_width(ctx: &LayoutContext, el: &GeneratedElement, mag: f64) -> f64 {
    match el {
        GeneratedElement::Clef { clef, small } => {
            clef_width(ctx, *clef, if *small { mag * SMALL_CLEF_MAG } else { mag })
        }
        GeneratedElement::KeySig { fifths, naturals } => {
            key_sig_width(ctx, *fifths, mag)
                + *naturals as f64 * ctx.metrics.width(Symbol::Accidental(AccidentalKind::Natural), mag)
        }
        GeneratedElement::TimeSig(sig) => time_sig_width(ctx, *sig, mag),
    }
}

/// Width of a run of elements on one staff with the usual inter-element
/// distances.
fn run_width(ctx: &LayoutContext, run: &[GeneratedElement], mag: f64) -> f64 {
    let style = ctx.style;
    let mut width = 0.0;
    for (i, el) in run.iter().enumerate() {
        if i > 0 {
            width += match (run[i - 1], el) {
                (GeneratedElement::Clef { .. }, GeneratedElement::KeySig { .. }) => style.point(style.clef_key_distance),
                _ => style.point(style.key_time_distance),
            };
        }
        width += element_width(ctx, el, mag);
    }
    width
}

/// Clef, key and time signature a system starting at measure `mi` needs.
/// User elements at the same tick win over generated ones.
pub(crate) fn system_header(score: &Score, ctx: &LayoutContext, mi: usize, first_system: bool) -> Generated {
    let mut out = Generated::default();
    let Some(m) = score.measure(mi) else { return out };
    let style = ctx.style;
    let tick = m.tick;
    let first_measure = score.measures.iter().position(|mb| mb.as_measure().is_some()) == Some(mi);

    for (si, staff) in score.staves.iter().enumerate() {
        let mut run = Vec::new();
        if (first_system || style.gen_clef) && user_element(m, SegmentKind::Clef, tick, si).is_none() {
            let el = GeneratedElement::Clef { clef: staff.clef(tick), small: false };
            out.elements.push((GeneratedKey { tick, staff: si, kind: GeneratedKind::HeaderClef }, el));
            run.push(el);
        }
        let fifths = staff.key(tick);
        if !staff.tablature
            && fifths != 0
            && (first_system || style.gen_keysig)
            && user_element(m, SegmentKind::KeySig, tick, si).is_none()
        {
            let el = GeneratedElement::KeySig { fifths, naturals: 0 };
            out.elements.push((GeneratedKey { tick, staff: si, kind: GeneratedKind::HeaderKeySig }, el));
            run.push(el);
        }
        if (first_measure || style.gen_timesig) && user_element(m, SegmentKind::TimeSig, tick, si).is_none() {
            let el = GeneratedElement::TimeSig(m.time_sig);
            out.elements.push((GeneratedKey { tick, staff: si, kind: GeneratedKind::HeaderTimeSig }, el));
            run.push(el);
        }
        if !run.is_empty() {
            let w = run_width(ctx, &run, staff.mag) + style.point(style.header_note_distance);
            out.width = out.width.max(w);
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Courtesy elements
// ═══════════════════════════════════════════════════════════════════════

/// Courtesy signatures after measure `last`, the final measure of a system.
pub(crate) fn courtesy(score: &Score, ctx: &LayoutContext, last: usize) -> Generated {
    let mut out = Generated::default();
    let style = ctx.style;
    let Some(m) = score.measure(last) else { return out };
    let Some(nm) = score.next_measure(last).and_then(|ni| score.measure(ni)) else { return out };
    if m.breaks.section && !style.is_float() {
        return out;
    }
    let tick = m.end_tick();

    for (si, staff) in score.staves.iter().enumerate() {
        let mut run = Vec::new();

        if style.gen_courtesy_clef && !m.repeat_end {
            let (before, after) = (staff.clef(tick - 1), staff.clef(tick));
            let suppressed = matches!(
                user_element(nm, SegmentKind::Clef, tick, si),
                Some(Element::Clef(c)) if !c.show_courtesy
            );
            if before != after && !suppressed {
                let el = GeneratedElement::Clef { clef: after, small: true };
                out.elements.push((GeneratedKey { tick, staff: si, kind: GeneratedKind::CourtesyClef }, el));
                run.push(el);
            }
        }

        if style.gen_courtesy_keysig && !staff.tablature {
            let (before, after) = (staff.key(tick - 1), staff.key(tick));
            let suppressed = matches!(
                user_element(nm, SegmentKind::KeySig, tick, si),
                Some(Element::KeySig(k)) if !k.show_courtesy
            );
            if before != after && !suppressed {
                let el = GeneratedElement::KeySig { fifths: after, naturals: cancellation_natural_count(before, after) };
                out.elements.push((GeneratedKey { tick, staff: si, kind: GeneratedKind::CourtesyKeySig }, el));
                run.push(el);
                out.double_bar = true;
            }
        }

        if style.gen_courtesy_timesig {
            if let Some(Element::TimeSig(mark)) = user_element(nm, SegmentKind::TimeSig, tick, si) {
                if mark.show_courtesy {
                    let el = GeneratedElement::TimeSig(mark.sig);
                    out.elements.push((GeneratedKey { tick, staff: si, kind: GeneratedKind::CourtesyTimeSig }, el));
                    run.push(el);
                }
            }
        }

        if !run.is_empty() {
            let w = style.point(style.key_time_distance) + run_width(ctx, &run, staff.mag);
            out.width = out.width.max(w);
        }
    }
    if !out.elements.is_empty() {
        debug!("courtesy after measure {last}: {} element(s)", out.elements.len());
    }
    out
}

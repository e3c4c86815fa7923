//! Data model for a score as seen by the layout engine.
//!
//! The score is a linear list of measures and frames. Measures hold
//! segments (time slots) which hold at most one element per track. Timed
//! elements (chords and rests) live in an arena and are referenced from
//! segments by id; tuplets and beams own their member lists by id as well.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, Id};
use crate::duration::{Duration, DurationType, Ratio, Tick, TimeSig};
use crate::error::{LayoutError, Result};
use crate::layout::generated::GeneratedElements;
use crate::layout::width::MeasureSpacing;

/// Voices per staff. A track is `staff * VOICES + voice`.
pub const VOICES: usize = 4;

pub type ChordRestId = Id<ChordRest>;
pub type TupletId = Id<Tuplet>;
pub type BeamId = Id<Beam>;

// ═══════════════════════════════════════════════════════════════════════
// Small enums
// ═══════════════════════════════════════════════════════════════════════

/// User stem direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Auto,
    Up,
    Down,
}

/// User override for notehead placement relative to the stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MirrorDirection {
    #[default]
    Auto,
    Left,
    Right,
}

/// Explicit beaming instruction on a chord/rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BeamMode {
    #[default]
    Auto,
    /// Always start a new beam here.
    Begin,
    /// Continue the current beam, across barlines and tuplets if needed.
    Mid,
    /// Never beam.
    No,
}

impl BeamMode {
    pub fn is_mid(self) -> bool {
        self == BeamMode::Mid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HeadGroup {
    #[default]
    Normal,
    Cross,
    Diamond,
    Slash,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HeadType {
    /// Derived from the chord's duration.
    #[default]
    Auto,
    Breve,
    Whole,
    Half,
    Quarter,
}

impl HeadType {
    pub fn for_duration(kind: DurationType) -> HeadType {
        match kind {
            DurationType::Long | DurationType::Breve => HeadType::Breve,
            DurationType::Whole | DurationType::Measure => HeadType::Whole,
            DurationType::Half => HeadType::Half,
            _ => HeadType::Quarter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccidentalKind {
    Sharp,
    Flat,
    Natural,
    DoubleSharp,
    DoubleFlat,
}

impl AccidentalKind {
    /// Flat-shaped accidentals can partially tuck under the one above.
    pub fn is_flat_type(self) -> bool {
        matches!(self, AccidentalKind::Flat | AccidentalKind::DoubleFlat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClefType {
    Treble,
    Treble8vb,
    Bass,
    Alto,
    Tenor,
    Percussion,
    Tab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BarLineType {
    #[default]
    Normal,
    Broken,
    Double,
    End,
    StartRepeat,
    EndRepeat,
    EndStartRepeat,
}

// ═══════════════════════════════════════════════════════════════════════
// Notes, chords, rests
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accidental {
    pub kind: AccidentalKind,
    /// Position relative to the chord column origin (computed)
    pub x: f64,
    /// Vertical position relative to the staff top (computed)
    pub y: f64,
}

impl Accidental {
    pub fn new(kind: AccidentalKind) -> Self {
        Self { kind, x: 0.0, y: 0.0 }
    }
}

/// A single notehead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch
    pub pitch: i32,
    /// Notated line: 0 = top staff line, +1 per diatonic step downward
    pub line: i32,
    pub head_group: HeadGroup,
    pub head_type: HeadType,
    pub accidental: Option<Accidental>,
    /// Horizontal offset within the chord column (computed)
    pub x: f64,
    /// Head sits on the opposite side of the stem (computed)
    pub mirror: bool,
    /// Suppressed unison duplicate (computed)
    pub hidden: bool,
    pub user_mirror: MirrorDirection,
    /// Manual offset applied in the editor
    pub user_offset: (f64, f64),
    /// A tie starts at this note
    pub tie_forward: bool,
}

impl Note {
    pub fn new(pitch: i32, line: i32) -> Self {
        Self {
            pitch,
            line,
            head_group: HeadGroup::Normal,
            head_type: HeadType::Auto,
            accidental: None,
            x: 0.0,
            mirror: false,
            hidden: false,
            user_mirror: MirrorDirection::Auto,
            user_offset: (0.0, 0.0),
            tie_forward: false,
        }
    }

    pub fn with_accidental(mut self, kind: AccidentalKind) -> Self {
        self.accidental = Some(Accidental::new(kind));
        self
    }

    pub fn with_head_group(mut self, group: HeadGroup) -> Self {
        self.head_group = group;
        self
    }

    pub fn with_head_type(mut self, head: HeadType) -> Self {
        self.head_type = head;
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorDirection) -> Self {
        self.user_mirror = mirror;
        self
    }

    pub fn tied(mut self) -> Self {
        self.tie_forward = true;
        self
    }

    pub fn has_user_offset(&self) -> bool {
        self.user_offset.0 != 0.0 || self.user_offset.1 != 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub notes: Vec<Note>,
}

impl Chord {
    /// Topmost and bottommost notated lines.
    pub fn line_range(&self) -> Option<(i32, i32)> {
        let top = self.notes.iter().map(|n| n.line).min()?;
        let bottom = self.notes.iter().map(|n| n.line).max()?;
        Some((top, bottom))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    /// Rest fills the whole measure
    pub full_measure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChordRestKind {
    Chord(Chord),
    Rest(Rest),
}

/// A timed element at a segment/track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordRest {
    pub kind: ChordRestKind,
    pub duration: Duration,
    /// Absolute start tick (set when inserted)
    pub tick: Tick,
    /// Track (set when inserted)
    pub track: usize,
    pub grace: bool,
    pub tuplet: Option<TupletId>,
    pub beam: Option<BeamId>,
    pub beam_mode: BeamMode,
    pub stem_direction: Direction,
    /// Cross-staff move: -1 up one staff, +1 down one staff
    pub staff_move: i32,
    /// Computed stem direction
    pub up: bool,
    /// Computed horizontal displacement of the whole chord
    pub x_offset: f64,
}

impl ChordRest {
    pub fn chord(duration: Duration, notes: Vec<Note>) -> Self {
        Self::with_kind(ChordRestKind::Chord(Chord { notes }), duration)
    }

    pub fn rest(duration: Duration) -> Self {
        Self::with_kind(ChordRestKind::Rest(Rest { full_measure: false }), duration)
    }

    /// Whole-measure rest.
    pub fn measure_rest() -> Self {
        Self::with_kind(
            ChordRestKind::Rest(Rest { full_measure: true }),
            Duration::new(DurationType::Measure),
        )
    }

    fn with_kind(kind: ChordRestKind, duration: Duration) -> Self {
        Self {
            kind,
            duration,
            tick: 0,
            track: 0,
            grace: false,
            tuplet: None,
            beam: None,
            beam_mode: BeamMode::Auto,
            stem_direction: Direction::Auto,
            staff_move: 0,
            up: false,
            x_offset: 0.0,
        }
    }

    pub fn as_grace(mut self) -> Self {
        self.grace = true;
        self
    }

    pub fn with_beam_mode(mut self, mode: BeamMode) -> Self {
        self.beam_mode = mode;
        self
    }

    pub fn with_stem(mut self, direction: Direction) -> Self {
        self.stem_direction = direction;
        self
    }

    pub fn is_rest(&self) -> bool {
        matches!(self.kind, ChordRestKind::Rest(_))
    }

    pub fn chord_ref(&self) -> Option<&Chord> {
        match &self.kind {
            ChordRestKind::Chord(c) => Some(c),
            ChordRestKind::Rest(_) => None,
        }
    }

    pub fn chord_mut(&mut self) -> Option<&mut Chord> {
        match &mut self.kind {
            ChordRestKind::Chord(c) => Some(c),
            ChordRestKind::Rest(_) => None,
        }
    }

    pub fn voice(&self) -> usize {
        self.track % VOICES
    }

    pub fn staff(&self) -> usize {
        self.track / VOICES
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tuplets and beams
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TupletMember {
    ChordRest(ChordRestId),
    Tuplet(TupletId),
}

/// A tuplet owns an ordered, time-contiguous member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuplet {
    pub ratio: Ratio,
    pub members: Vec<TupletMember>,
    /// Enclosing tuplet for nested tuplets
    pub parent: Option<TupletId>,
}

/// A beam owns an ordered member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    pub members: Vec<ChordRestId>,
    /// Created by the auto-beamer (rebuilt every pass) rather than the user
    pub generated: bool,
    pub track: usize,
    /// Computed common stem direction
    pub up: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// Non-timed elements and segments
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clef {
    pub kind: ClefType,
    pub show_courtesy: bool,
}

/// Key signature: positive = sharps, negative = flats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeySig {
    pub fifths: i32,
    pub show_courtesy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSigMark {
    pub sig: TimeSig,
    pub show_courtesy: bool,
}

/// Closed set of element kinds a segment slot can hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Element {
    ChordRest(ChordRestId),
    Clef(Clef),
    KeySig(KeySig),
    TimeSig(TimeSigMark),
    BarLine(BarLineType),
}

/// Segment kinds, declared in their order at equal ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    Clef,
    KeySig,
    TimeSig,
    Grace,
    ChordRest,
    EndBarLine,
}

impl SegmentKind {
    pub fn is_chord_rest(self) -> bool {
        matches!(self, SegmentKind::Grace | SegmentKind::ChordRest)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub tick: Tick,
    /// One slot per track
    pub elements: Vec<Option<Element>>,
    /// Per staff: x of the augmentation-dot column (computed)
    #[serde(skip)]
    pub dot_positions: Vec<f64>,
}

impl Segment {
    pub fn new(kind: SegmentKind, tick: Tick, ntracks: usize) -> Self {
        Self { kind, tick, elements: vec![None; ntracks], dot_positions: Vec::new() }
    }

    pub fn element(&self, track: usize) -> Option<&Element> {
        self.elements.get(track).and_then(|e| e.as_ref())
    }

    pub fn chord_rest(&self, track: usize) -> Option<ChordRestId> {
        match self.element(track) {
            Some(Element::ChordRest(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.iter().all(|e| e.is_none())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Measures and frames
// ═══════════════════════════════════════════════════════════════════════

/// Explicit layout breaks attached to a measure or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutBreaks {
    pub line: bool,
    pub page: bool,
    pub section: bool,
}

impl LayoutBreaks {
    pub fn any(&self) -> bool {
        self.line || self.page || self.section
    }
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// Start tick
    pub tick: Tick,
    /// Length in ticks
    pub ticks: Tick,
    pub time_sig: TimeSig,
    /// Ordered by (tick, kind)
    pub segments: Vec<Segment>,
    /// User stretch multiplier
    pub user_stretch: f64,
    /// 0 = normal, >0 = first of a collapsed run of that length, -1 = absorbed
    pub multi_measure: i32,
    /// User-requested break of multi-measure rest runs
    pub break_mm_rest: bool,
    /// Computed run break (volta, special barline, signature change)
    pub mm_rest_break: bool,
    pub breaks: LayoutBreaks,
    pub end_barline: BarLineType,
    pub repeat_start: bool,
    pub repeat_end: bool,
    /// Content changed since the last width estimate
    pub dirty: bool,
    /// Minimum stretchable width from the last estimate
    pub min_width: f64,
    #[serde(skip)]
    pub(crate) spacing: Option<MeasureSpacing>,
}

impl Measure {
    pub fn new(tick: Tick, time_sig: TimeSig) -> Self {
        Self {
            tick,
            ticks: time_sig.measure_ticks(),
            time_sig,
            segments: Vec::new(),
            user_stretch: 1.0,
            multi_measure: 0,
            break_mm_rest: false,
            mm_rest_break: false,
            breaks: LayoutBreaks::default(),
            end_barline: BarLineType::Normal,
            repeat_start: false,
            repeat_end: false,
            dirty: true,
            min_width: 0.0,
            spacing: None,
        }
    }

    pub fn end_tick(&self) -> Tick {
        self.tick + self.ticks
    }

    pub fn breaks_mm_rest(&self) -> bool {
        self.break_mm_rest || self.mm_rest_break
    }

    pub fn find_segment(&self, kind: SegmentKind, tick: Tick) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind == kind && s.tick == tick)
    }

    /// Index of the segment with `kind` at `tick`, created if missing.
    /// Grace segments are always appended after existing graces at the tick
    /// unless one still has a free slot for `track`.
    fn segment_for(&mut self, kind: SegmentKind, tick: Tick, track: usize, ntracks: usize) -> usize {
        if let Some(i) = self.segments.iter().position(|s| {
            s.kind == kind && s.tick == tick && (kind != SegmentKind::Grace || s.element(track).is_none())
        }) {
            return i;
        }
        let pos = self
            .segments
            .iter()
            .position(|s| (s.tick, s.kind) > (tick, kind))
            .unwrap_or(self.segments.len());
        self.segments.insert(pos, Segment::new(kind, tick, ntracks));
        pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Vertical box: a system of its own
    Vertical,
    /// Text frame: a system of its own
    Text,
    /// Fretboard-diagram frame: a system of its own
    Fret,
    /// Horizontal box inside a system
    Horizontal,
}

/// Non-music frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    /// Width (horizontal frames)
    pub width: f64,
    /// Height (vertical frames)
    pub height: f64,
    pub top_gap: f64,
    pub bottom_gap: f64,
    pub breaks: LayoutBreaks,
}

impl Frame {
    pub fn vertical(height: f64) -> Self {
        Self {
            kind: FrameKind::Vertical,
            width: 0.0,
            height,
            top_gap: 0.0,
            bottom_gap: 0.0,
            breaks: LayoutBreaks::default(),
        }
    }

    pub fn horizontal(width: f64) -> Self {
        Self {
            kind: FrameKind::Horizontal,
            width,
            height: 0.0,
            top_gap: 0.0,
            bottom_gap: 0.0,
            breaks: LayoutBreaks::default(),
        }
    }

    pub fn is_vertical(&self) -> bool {
        self.kind != FrameKind::Horizontal
    }
}

/// Entry of the linear measure list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasureBase {
    Measure(Measure),
    Frame(Frame),
}

impl MeasureBase {
    pub fn as_measure(&self) -> Option<&Measure> {
        match self {
            MeasureBase::Measure(m) => Some(m),
            MeasureBase::Frame(_) => None,
        }
    }

    pub fn as_measure_mut(&mut self) -> Option<&mut Measure> {
        match self {
            MeasureBase::Measure(m) => Some(m),
            MeasureBase::Frame(_) => None,
        }
    }

    pub fn breaks(&self) -> LayoutBreaks {
        match self {
            MeasureBase::Measure(m) => m.breaks,
            MeasureBase::Frame(f) => f.breaks,
        }
    }

    pub fn is_vertical_frame(&self) -> bool {
        matches!(self, MeasureBase::Frame(f) if f.is_vertical())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Staves and spanners
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    /// Part (instrument) this staff belongs to
    pub part: usize,
    /// Magnification
    pub mag: f64,
    /// User visibility
    pub visible: bool,
    pub tablature: bool,
    /// Clef in effect before any clef element
    pub initial_clef: ClefType,
    /// Key in effect before any key signature element
    pub initial_key: i32,
    #[serde(skip)]
    pub(crate) clef_map: BTreeMap<Tick, ClefType>,
    #[serde(skip)]
    pub(crate) key_map: BTreeMap<Tick, i32>,
}

impl Staff {
    pub fn new(part: usize, clef: ClefType) -> Self {
        Self {
            part,
            mag: 1.0,
            visible: true,
            tablature: false,
            initial_clef: clef,
            initial_key: 0,
            clef_map: BTreeMap::new(),
            key_map: BTreeMap::new(),
        }
    }

    /// Clef in effect at `tick`.
    pub fn clef(&self, tick: Tick) -> ClefType {
        self.clef_map
            .range(..=tick)
            .next_back()
            .map_or(self.initial_clef, |(_, c)| *c)
    }

    /// Key (fifths) in effect at `tick`.
    pub fn key(&self, tick: Tick) -> i32 {
        self.key_map
            .range(..=tick)
            .next_back()
            .map_or(self.initial_key, |(_, k)| *k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpannerKind {
    Volta,
    Hairpin,
    Slur,
    Ottava,
    Pedal,
}

/// A line-spanning element anchored at two ticks of one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanner {
    pub kind: SpannerKind,
    pub track: usize,
    pub tick: Tick,
    pub tick2: Tick,
}

// ═══════════════════════════════════════════════════════════════════════
// Score
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub staves: Vec<Staff>,
    pub measures: Vec<MeasureBase>,
    pub chord_rests: Arena<ChordRest>,
    pub tuplets: Arena<Tuplet>,
    pub beams: Arena<Beam>,
    pub spanners: Vec<Spanner>,
    /// Generated header/courtesy elements as of the last pass
    #[serde(skip)]
    pub generated: GeneratedElements,
}

impl Score {
    pub fn new(staves: Vec<Staff>) -> Self {
        Self {
            staves,
            measures: Vec::new(),
            chord_rests: Arena::new(),
            tuplets: Arena::new(),
            beams: Arena::new(),
            spanners: Vec::new(),
            generated: GeneratedElements::default(),
        }
    }

    pub fn nstaves(&self) -> usize {
        self.staves.len()
    }

    pub fn ntracks(&self) -> usize {
        self.staves.len() * VOICES
    }

    /// Tick where the next appended measure starts.
    pub fn end_tick(&self) -> Tick {
        self.measures
            .iter()
            .rev()
            .find_map(|mb| mb.as_measure().map(|m| m.end_tick()))
            .unwrap_or(0)
    }

    /// Append an empty measure of full length.
    pub fn append_measure(&mut self, time_sig: TimeSig) -> usize {
        let m = Measure::new(self.end_tick(), time_sig);
        self.measures.push(MeasureBase::Measure(m));
        self.measures.len() - 1
    }

    /// Append a measure whose actual length differs from its time signature
    /// (pickup bars).
    pub fn append_irregular_measure(&mut self, time_sig: TimeSig, ticks: Tick) -> usize {
        let mut m = Measure::new(self.end_tick(), time_sig);
        m.ticks = ticks;
        self.measures.push(MeasureBase::Measure(m));
        self.measures.len() - 1
    }

    pub fn append_frame(&mut self, frame: Frame) -> usize {
        self.measures.push(MeasureBase::Frame(frame));
        self.measures.len() - 1
    }

    pub fn measure(&self, idx: usize) -> Option<&Measure> {
        self.measures.get(idx).and_then(|mb| mb.as_measure())
    }

    pub fn measure_mut(&mut self, idx: usize) -> Option<&mut Measure> {
        self.measures.get_mut(idx).and_then(|mb| mb.as_measure_mut())
    }

    /// Index of the measure containing `tick`.
    pub fn measure_index_at(&self, tick: Tick) -> Option<usize> {
        self.measures.iter().position(|mb| {
            mb.as_measure().map_or(false, |m| m.tick <= tick && tick < m.end_tick())
        })
    }

    /// Next measure (skipping frames) after `idx`.
    pub fn next_measure(&self, idx: usize) -> Option<usize> {
        (idx + 1..self.measures.len()).find(|&i| self.measure(i).is_some())
    }

    pub fn chord_rest(&self, id: ChordRestId) -> Option<&ChordRest> {
        self.chord_rests.get(id)
    }

    pub fn chord_rest_mut(&mut self, id: ChordRestId) -> Option<&mut ChordRest> {
        self.chord_rests.get_mut(id)
    }

    // ── Editing ─────────────────────────────────────────────────────

    fn check_track(&self, track: usize) -> Result<()> {
        if track >= self.ntracks() {
            return Err(LayoutError::InvalidTrack(track));
        }
        Ok(())
    }

    /// Insert a chord or rest at `offset` ticks into measure `measure`.
    pub fn add_chord_rest(
        &mut self,
        measure: usize,
        track: usize,
        offset: Tick,
        mut cr: ChordRest,
    ) -> Result<ChordRestId> {
        self.check_track(track)?;
        let ntracks = self.ntracks();
        let m = self.measure(measure).ok_or(LayoutError::InvalidMeasure(measure))?;
        let tick = m.tick + offset;
        cr.tick = tick;
        cr.track = track;
        let kind = if cr.grace { SegmentKind::Grace } else { SegmentKind::ChordRest };
        let id = self.chord_rests.insert(cr);

        let m = self.measure_mut(measure).ok_or(LayoutError::InvalidMeasure(measure))?;
        let si = m.segment_for(kind, tick, track, ntracks);
        let previous = m.segments[si].elements[track].replace(Element::ChordRest(id));
        m.dirty = true;
        if let Some(Element::ChordRest(old)) = previous {
            self.dispose_chord_rest(old);
        }
        Ok(id)
    }

    fn add_element(&mut self, measure: usize, track: usize, kind: SegmentKind, offset: Tick, el: Element) -> Result<()> {
        self.check_track(track)?;
        let ntracks = self.ntracks();
        let m = self.measure_mut(measure).ok_or(LayoutError::InvalidMeasure(measure))?;
        let tick = m.tick + offset;
        let si = m.segment_for(kind, tick, track, ntracks);
        m.segments[si].elements[track] = Some(el);
        m.dirty = true;
        Ok(())
    }

    /// Clef change on `staff` at `offset` into the measure.
    pub fn add_clef(&mut self, measure: usize, staff: usize, offset: Tick, clef: Clef) -> Result<()> {
        self.add_element(measure, staff * VOICES, SegmentKind::Clef, offset, Element::Clef(clef))
    }

    /// Key change on `staff` at the start of the measure.
    pub fn add_key_sig(&mut self, measure: usize, staff: usize, key: KeySig) -> Result<()> {
        self.add_element(measure, staff * VOICES, SegmentKind::KeySig, 0, Element::KeySig(key))
    }

    /// Time signature change on every staff at the start of the measure.
    pub fn add_time_sig(&mut self, measure: usize, mark: TimeSigMark) -> Result<()> {
        for staff in 0..self.nstaves() {
            self.add_element(measure, staff * VOICES, SegmentKind::TimeSig, 0, Element::TimeSig(mark))?;
        }
        if let Some(m) = self.measure_mut(measure) {
            m.time_sig = mark.sig;
        }
        Ok(())
    }

    /// Remove a chord/rest from its segment and from every group it belongs to.
    pub fn remove_chord_rest(&mut self, id: ChordRestId) -> Result<ChordRest> {
        let cr = self.chord_rests.get(id).ok_or(LayoutError::InvalidChordRest)?;
        let (tick, track) = (cr.tick, cr.track);
        if let Some(mi) = self.measure_index_at(tick) {
            if let Some(m) = self.measure_mut(mi) {
                for seg in m.segments.iter_mut().filter(|s| s.tick == tick) {
                    if seg.chord_rest(track) == Some(id) {
                        seg.elements[track] = None;
                    }
                }
                m.segments.retain(|s| !s.is_empty());
                m.dirty = true;
            }
        }
        self.dispose_chord_rest(id).ok_or(LayoutError::InvalidChordRest)
    }

    fn dispose_chord_rest(&mut self, id: ChordRestId) -> Option<ChordRest> {
        self.detach_from_beam(id);
        self.detach_from_tuplet(TupletMember::ChordRest(id));
        self.chord_rests.remove(id)
    }

    /// Group chord/rests (and nested tuplets) into a tuplet.
    pub fn create_tuplet(&mut self, ratio: Ratio, members: Vec<TupletMember>) -> Result<TupletId> {
        for m in &members {
            match *m {
                TupletMember::ChordRest(id) if !self.chord_rests.contains(id) => {
                    return Err(LayoutError::InvalidChordRest)
                }
                TupletMember::Tuplet(t) if !self.tuplets.contains(t) => {
                    return Err(LayoutError::Structure(format!("unknown tuplet {t:?}")))
                }
                _ => {}
            }
        }
        let id = self.tuplets.insert(Tuplet { ratio, members: members.clone(), parent: None });
        for m in members {
            match m {
                TupletMember::ChordRest(cr) => {
                    if let Some(c) = self.chord_rests.get_mut(cr) {
                        c.tuplet = Some(id);
                    }
                }
                TupletMember::Tuplet(t) => {
                    if let Some(inner) = self.tuplets.get_mut(t) {
                        inner.parent = Some(id);
                    }
                }
            }
        }
        Ok(id)
    }

    /// A user-forced beam.
    pub fn create_beam(&mut self, members: Vec<ChordRestId>) -> Result<BeamId> {
        let first = members.first().copied().ok_or(LayoutError::InvalidChordRest)?;
        let track = self.chord_rests.get(first).ok_or(LayoutError::InvalidChordRest)?.track;
        for &m in &members {
            if !self.chord_rests.contains(m) {
                return Err(LayoutError::InvalidChordRest);
            }
            self.detach_from_beam(m);
        }
        let id = self.beams.insert(Beam { members: members.clone(), generated: false, track, up: false });
        for m in members {
            if let Some(c) = self.chord_rests.get_mut(m) {
                c.beam = Some(id);
            }
        }
        Ok(id)
    }

    /// Drop a member from its tuplet. A tuplet whose member list becomes
    /// empty is disposed and removed from its own parent in turn.
    pub(crate) fn detach_from_tuplet(&mut self, member: TupletMember) {
        let owner = match member {
            TupletMember::ChordRest(id) => self.chord_rests.get_mut(id).and_then(|c| c.tuplet.take()),
            TupletMember::Tuplet(id) => self.tuplets.get_mut(id).and_then(|t| t.parent.take()),
        };
        let Some(tid) = owner else { return };
        let now_empty = match self.tuplets.get_mut(tid) {
            Some(t) => {
                t.members.retain(|m| *m != member);
                t.members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.detach_from_tuplet(TupletMember::Tuplet(tid));
            self.tuplets.remove(tid);
        }
    }

    /// Drop a chord/rest from its beam; an emptied beam is disposed.
    pub(crate) fn detach_from_beam(&mut self, id: ChordRestId) {
        let Some(bid) = self.chord_rests.get_mut(id).and_then(|c| c.beam.take()) else { return };
        let now_empty = match self.beams.get_mut(bid) {
            Some(b) => {
                b.members.retain(|m| *m != id);
                b.members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.beams.remove(bid);
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Played length of a chord/rest: nominal ticks scaled through every
    /// enclosing tuplet. Full-measure rests take their measure's length.
    pub fn actual_ticks(&self, id: ChordRestId) -> Tick {
        let Some(cr) = self.chord_rests.get(id) else { return 0 };
        if cr.duration.kind == DurationType::Measure {
            return self
                .measure_index_at(cr.tick)
                .and_then(|mi| self.measure(mi))
                .map_or(0, |m| m.ticks);
        }
        let mut ticks = cr.duration.ticks();
        let mut tuplet = cr.tuplet;
        let mut guard = 0;
        while let Some(tid) = tuplet {
            let Some(t) = self.tuplets.get(tid) else { break };
            ticks = t.ratio.apply(ticks);
            tuplet = t.parent;
            guard += 1;
            if guard > 16 {
                break;
            }
        }
        ticks
    }

    /// True if `id` is the last member of its (innermost) tuplet.
    pub fn is_last_in_tuplet(&self, id: ChordRestId) -> bool {
        let Some(tid) = self.chord_rests.get(id).and_then(|c| c.tuplet) else { return false };
        self.tuplets
            .get(tid)
            .and_then(|t| t.members.last())
            .map_or(false, |m| *m == TupletMember::ChordRest(id))
    }

    /// Measure has nothing but rests (or nothing) in every track.
    pub fn is_empty_measure(&self, idx: usize) -> bool {
        let Some(m) = self.measure(idx) else { return false };
        m.segments.iter().filter(|s| s.kind.is_chord_rest()).all(|s| {
            s.elements.iter().all(|e| match e {
                Some(Element::ChordRest(id)) => self.chord_rests.get(*id).map_or(true, |c| c.is_rest()),
                _ => true,
            })
        })
    }

    /// Every chord/rest of `staff` in the measure is a rest.
    pub fn is_measure_rest(&self, idx: usize, staff: usize) -> bool {
        let Some(m) = self.measure(idx) else { return false };
        let tracks = staff * VOICES..(staff + 1) * VOICES;
        m.segments.iter().filter(|s| s.kind.is_chord_rest()).all(|s| {
            tracks.clone().all(|t| match s.element(t) {
                Some(Element::ChordRest(id)) => self.chord_rests.get(*id).map_or(true, |c| c.is_rest()),
                _ => true,
            })
        })
    }

    /// More than the first voice holds chords/rests on `staff` in the measure.
    pub fn has_voices(&self, idx: usize, staff: usize) -> bool {
        let Some(m) = self.measure(idx) else { return false };
        let first = staff * VOICES;
        m.segments
            .iter()
            .filter(|s| s.kind.is_chord_rest())
            .any(|s| (first + 1..first + VOICES).any(|t| s.element(t).is_some()))
    }

    /// Verify the invariants the layout relies on.
    pub fn check_structure(&self) -> Result<()> {
        let ntracks = self.ntracks();
        let mut expected_tick: Option<Tick> = None;
        for (mi, mb) in self.measures.iter().enumerate() {
            let Some(m) = mb.as_measure() else { continue };
            if let Some(t) = expected_tick {
                if m.tick != t {
                    return Err(LayoutError::Structure(format!(
                        "measure {mi} starts at tick {} but previous measure ends at {t}",
                        m.tick
                    )));
                }
            }
            expected_tick = Some(m.end_tick());
            let mut prev: Option<(Tick, SegmentKind)> = None;
            for seg in &m.segments {
                if seg.elements.len() != ntracks {
                    return Err(LayoutError::Structure(format!(
                        "measure {mi}: segment at {} has {} slots, expected {ntracks}",
                        seg.tick,
                        seg.elements.len()
                    )));
                }
                if seg.tick < m.tick || seg.tick > m.end_tick() {
                    return Err(LayoutError::Structure(format!(
                        "measure {mi}: segment tick {} outside [{}, {}]",
                        seg.tick,
                        m.tick,
                        m.end_tick()
                    )));
                }
                let key = (seg.tick, seg.kind);
                if let Some(p) = prev {
                    let out_of_order = key < p || (key == p && seg.kind != SegmentKind::Grace);
                    if out_of_order {
                        return Err(LayoutError::Structure(format!(
                            "measure {mi}: segment {:?}@{} follows {:?}@{}",
                            seg.kind, seg.tick, p.1, p.0
                        )));
                    }
                }
                prev = Some(key);
                for el in seg.elements.iter().flatten() {
                    if let Element::ChordRest(id) = el {
                        if !self.chord_rests.contains(*id) {
                            return Err(LayoutError::Structure(format!(
                                "measure {mi}: segment at {} references a removed chord/rest",
                                seg.tick
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

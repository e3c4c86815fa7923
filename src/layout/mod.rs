//! Layout pipeline.
//!
//! A full pass runs, in order:
//! structure check, clef/key maps and rest-run breaks, stems and beams,
//! chord columns, measure widths, system building, courtesy elements and
//! justification, pages, tie/spanner resolution, and finally the diff of
//! generated elements sent to the host's edit sink.

pub(crate) mod beams;
pub(crate) mod columns;
pub(crate) mod constants;
pub mod generated;
pub mod geometry;
pub(crate) mod justify;
pub(crate) mod pages;
pub(crate) mod relayout;
pub(crate) mod spanners;
pub mod springs;
pub(crate) mod systems;
pub(crate) mod width;

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use log::{debug, error};

use crate::duration::Tick;
use crate::error::{LayoutError, Result};
use crate::model::*;
use crate::services::{EditSink, GlyphMetrics, PageFormat, PageGeometry, StandardMetrics};
use crate::style::Style;

use generated::GeneratedPass;
use geometry::{LayoutOutput, System};
use systems::SystemBuilder;

/// Read-only inputs shared by the stages of one pass.
pub(crate) struct LayoutContext<'a> {
    pub(crate) style: &'a Style,
    pub(crate) metrics: &'a dyn GlyphMetrics,
}

/// What a relayout request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayoutOutcome {
    /// Only the edited measure's system was re-justified.
    Incremental { system: usize },
    /// Systems from `anchor` on were rebuilt.
    Full { anchor: usize },
}

/// Where an anchored pass resumes.
struct Anchor {
    system: usize,
    measure: usize,
    tick: Tick,
    first_system: bool,
    kept: Vec<System>,
}

// ═══════════════════════════════════════════════════════════════════════
// Stage 1: staff maps and rest-run breaks
// ═══════════════════════════════════════════════════════════════════════

/// Rebuild every staff's clef and key maps from the user elements.
pub(crate) fn rebuild_staff_maps(score: &mut Score) {
    let nstaves = score.nstaves();
    let mut clefs = vec![Vec::new(); nstaves];
    let mut keys = vec![Vec::new(); nstaves];
    for m in score.measures.iter().filter_map(MeasureBase::as_measure) {
        for seg in &m.segments {
            for staff in 0..nstaves {
                match seg.element(staff * VOICES) {
                    Some(Element::Clef(c)) => clefs[staff].push((seg.tick, c.kind)),
                    Some(Element::KeySig(k)) => keys[staff].push((seg.tick, k.fifths)),
                    _ => {}
                }
            }
        }
    }
    for ((staff, clefs), keys) in score.staves.iter_mut().zip(clefs).zip(keys) {
        staff.clef_map = clefs.into_iter().collect();
        staff.key_map = keys.into_iter().collect();
    }
}

/// Decide which measures interrupt a run of empty measures.
pub(crate) fn mark_rest_run_breaks(score: &mut Score) {
    let mut prev: Option<(Tick, Tick, BarLineType, bool)> = None;
    let mut flags = Vec::with_capacity(score.measures.len());
    for mb in &score.measures {
        let Some(m) = mb.as_measure() else {
            flags.push(None);
            continue;
        };
        let volta_starts = score
            .spanners
            .iter()
            .any(|s| s.kind == SpannerKind::Volta && s.tick >= m.tick && s.tick < m.end_tick());
        let after_special = prev.map_or(false, |(ptick, pend, barline, repeat_end)| {
            let volta_ended = score
                .spanners
                .iter()
                .any(|s| s.kind == SpannerKind::Volta && s.tick2 > ptick && s.tick2 <= pend);
            volta_ended || repeat_end || !matches!(barline, BarLineType::Normal | BarLineType::Broken)
        });
        let signature_change = m.segments.iter().any(|s| {
            matches!(s.kind, SegmentKind::Clef | SegmentKind::KeySig | SegmentKind::TimeSig) && !s.is_empty()
        });
        flags.push(Some(volta_starts || after_special || signature_change || m.repeat_start));
        prev = Some((m.tick, m.end_tick(), m.end_barline, m.repeat_end));
    }
    for (mb, flag) in score.measures.iter_mut().zip(flags) {
        if let (Some(m), Some(flag)) = (mb.as_measure_mut(), flag) {
            m.mm_rest_break = flag;
        }
    }
}

/// Everything before system building: maps, beams, columns, widths.
pub(crate) fn prepare(score: &mut Score, ctx: &LayoutContext) {
    rebuild_staff_maps(score);
    mark_rest_run_breaks(score);
    beams::layout_beams(score);
    for mi in 0..score.measures.len() {
        columns::layout_measure_columns(score, ctx, mi);
    }
    let n = score.measures.len();
    width::update_widths(score, ctx, 0..n);
}

// ═══════════════════════════════════════════════════════════════════════
// Layouter
// ═══════════════════════════════════════════════════════════════════════

/// Owns the style, the collaborators, and the current layout result.
pub struct ScoreLayouter {
    style: Style,
    metrics: Box<dyn GlyphMetrics>,
    page: Box<dyn PageGeometry>,
    output: Arc<RwLock<LayoutOutput>>,
}

impl ScoreLayouter {
    pub fn new(style: Style, metrics: Box<dyn GlyphMetrics>, page: Box<dyn PageGeometry>) -> Self {
        Self { style, metrics, page, output: Arc::new(RwLock::new(LayoutOutput::default())) }
    }

    /// Standard metrics at the style's spatium on an A4 page.
    pub fn with_style(style: Style) -> Self {
        let metrics = StandardMetrics::new(style.spatium);
        Self::new(style, Box::new(metrics), Box::new(PageFormat::default()))
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    /// Handle for viewers. Readers block only while a pass holds the lock.
    pub fn shared(&self) -> Arc<RwLock<LayoutOutput>> {
        Arc::clone(&self.output)
    }

    /// Copy of the current result.
    pub fn snapshot(&self) -> LayoutOutput {
        match self.output.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock(&self) -> RwLockWriteGuard<'_, LayoutOutput> {
        self.output.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn context(&self) -> LayoutContext<'_> {
        LayoutContext { style: &self.style, metrics: self.metrics.as_ref() }
    }

    /// Full layout of the score.
    pub fn layout(&mut self, score: &mut Score, sink: &mut dyn EditSink) -> Result<()> {
        let mut guard = self.lock();
        let out = self.run_pass(score, None, sink)?;
        *guard = out;
        Ok(())
    }

    /// Bring the layout up to date after an edit inside `measure`. Tries to
    /// re-justify only that measure's system; falls back to a full pass
    /// resuming at that system.
    pub fn relayout(&mut self, score: &mut Score, measure: usize, sink: &mut dyn EditSink) -> Result<RelayoutOutcome> {
        if score.measure(measure).is_none() {
            return Err(LayoutError::InvalidMeasure(measure));
        }
        let mut guard = self.lock();
        if let Err(e) = score.check_structure() {
            error!("relayout of measure {measure} aborted: {e}");
            return Err(e);
        }

        let ctx = self.context();
        if let Some((system, out)) = relayout::try_incremental(score, &ctx, self.page.as_ref(), &guard, measure) {
            debug!("measure {measure}: re-justified system {system} in place");
            *guard = out;
            return Ok(RelayoutOutcome::Incremental { system });
        }

        let anchor = relayout::anchor_for(score, &guard, measure);
        let outcome = RelayoutOutcome::Full { anchor: anchor.as_ref().map_or(0, |a| a.system) };
        let out = self.run_pass(score, anchor, sink)?;
        debug!("measure {measure}: full relayout ({outcome:?})");
        *guard = out;
        Ok(outcome)
    }

    /// One pass, optionally resuming at `anchor` with the systems before it kept.
    fn run_pass(&self, score: &mut Score, anchor: Option<Anchor>, sink: &mut dyn EditSink) -> Result<LayoutOutput> {
        if let Err(e) = score.check_structure() {
            error!("layout aborted: {e}");
            return Err(e);
        }
        let ctx = self.context();
        let row_width = self.page.printable_width();
        prepare(score, &ctx);

        let mut pass = GeneratedPass::new(&score.generated);
        let (start, first_system, mut systems) = match anchor {
            Some(a) => {
                pass.keep_before(a.tick);
                (a.measure, a.first_system, a.kept)
            }
            None => (0, true, Vec::new()),
        };

        let rows = match SystemBuilder::new(score, &ctx, &mut pass, start, first_system).build(row_width) {
            Ok(rows) => rows,
            Err(e) => {
                error!("system building failed: {e}");
                return Err(e);
            }
        };
        for mut row in rows {
            let double_bar = justify::add_courtesy(score, &ctx, &mut pass, &mut row);
            systems.extend(justify::place_row(score, &ctx, &row, row_width, double_bar));
        }

        let pages = pages::layout_pages(&mut systems, &self.style, self.page.as_ref());
        let mut out = LayoutOutput { systems, pages, ties: Vec::new(), spanners: Vec::new() };
        out.ties = spanners::resolve_ties(score, &out);
        out.spanners = spanners::resolve_spanners(score, &out);

        let generated = pass.finish();
        let sent = score.generated.diff(&generated, sink);
        score.generated = generated;
        debug!(
            "layout: {} systems, {} pages, {} generated elements ({sent} changed)",
            out.systems.len(),
            out.pages.len(),
            score.generated.len()
        );
        Ok(out)
    }
}

impl Default for ScoreLayouter {
    fn default() -> Self {
        Self::with_style(Style::default())
    }
}

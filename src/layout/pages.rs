//! Page building: stack rows of systems vertically, break pages on
//! overflow or explicit page breaks, and spread leftover height.

use log::debug;

use crate::services::PageGeometry;
use crate::style::Style;

use super::constants::{PAGE_GAP, PAGE_SPREAD_GAP};
use super::geometry::{Page, System};

/// Consecutive systems sharing a line.
fn rows(systems: &[System]) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = Vec::new();
    for (i, sys) in systems.iter().enumerate() {
        match out.last_mut() {
            Some(row) if sys.same_line => row.push(i),
            _ => out.push(vec![i]),
        }
    }
    out
}

/// Page under construction.
struct PageState {
    systems: Vec<usize>,
    y: f64,
    gaps: usize,
    /// Bottom margin the last placed row asks for
    prev_dist: f64,
    prev_vbox: Option<f64>,
    last_row: Option<usize>,
}

impl PageState {
    fn new() -> Self {
        Self { systems: Vec::new(), y: 0.0, gaps: 0, prev_dist: 0.0, prev_vbox: None, last_row: None }
    }

    fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

/// Lay out all systems onto pages. System positions become page-relative.
pub(crate) fn layout_pages(systems: &mut [System], style: &Style, geometry: &dyn PageGeometry) -> Vec<Page> {
    let usable = geometry.usable_height();
    let mut pages: Vec<Page> = Vec::new();
    let mut state = PageState::new();
    for sys in systems.iter_mut() {
        sys.add_stretch = false;
    }

    for row in rows(systems) {
        let first = row[0];
        let last = row[row.len() - 1];
        let frame = systems[first].frame.clone();
        let height = row.iter().map(|&i| systems[i].height).fold(0.0, f64::max);
        let tm = row.iter().map(|&i| systems[i].distance_up()).fold(0.0, f64::max);
        let bm = row.iter().map(|&i| systems[i].distance_down()).fold(0.0, f64::max);

        let top_margin = |state: &PageState| -> f64 {
            let margin = match (&frame, state.prev_vbox) {
                (Some(f), _) if state.is_empty() => f.top_gap,
                (Some(f), Some(prev_bottom)) => f.top_gap + prev_bottom,
                (Some(f), None) => f.top_gap + style.point(style.system_frame_distance),
                (None, _) if state.is_empty() => tm.max(style.point(style.staff_upper_border)),
                (None, Some(prev_bottom)) => prev_bottom + style.point(style.frame_system_distance),
                (None, None) => tm.max(style.point(style.system_distance)),
            };
            margin.max(state.prev_dist)
        };
        let bottom_margin = match &frame {
            Some(f) => f.bottom_gap,
            None => bm.max(style.point(style.staff_lower_border)),
        };

        let mut tmargin = top_margin(&state);
        if !state.is_empty() && state.y + tmargin + height + bottom_margin > usable {
            let rest = usable - state.y - state.prev_dist;
            finish_page(systems, &mut pages, state, rest, style, geometry);
            state = PageState::new();
            tmargin = top_margin(&state);
        }

        if let Some(prev) = state.last_row {
            if frame.is_none() && state.prev_vbox.is_none() {
                systems[prev].add_stretch = true;
                state.gaps += 1;
            }
        }

        state.y += tmargin;
        let mut x = geometry.left_margin();
        for &i in &row {
            let sys = &mut systems[i];
            sys.y = geometry.top_margin() + state.y;
            sys.x = x;
            x += sys.width;
            state.systems.push(i);
        }
        state.y += height;
        state.prev_dist = bottom_margin;
        state.prev_vbox = frame.as_ref().map(|f| f.bottom_gap);
        state.last_row = Some(last);

        if systems[last].page_break {
            let rest = usable - state.y - state.prev_dist;
            finish_page(systems, &mut pages, state, rest, style, geometry);
            state = PageState::new();
        }
    }
    if !state.is_empty() {
        let rest = usable - state.y - state.prev_dist;
        finish_page(systems, &mut pages, state, rest, style, geometry);
    }
    debug!("{} systems on {} pages", systems.len(), pages.len());
    pages
}

/// Close a page: spread `rest` over the stretchable gaps when the page is
/// full enough, or center the content in float mode.
fn finish_page(
    systems: &mut [System],
    pages: &mut Vec<Page>,
    state: PageState,
    rest: f64,
    style: &Style,
    geometry: &dyn PageGeometry,
) {
    let usable = geometry.usable_height();
    if style.is_float() {
        for &i in &state.systems {
            systems[i].translate_y(rest * 0.5);
        }
    } else if state.gaps > 0 && rest <= usable * (1.0 - style.page_fill_limit) {
        let extra = rest / state.gaps as f64;
        let mut dy = 0.0;
        for &i in &state.systems {
            systems[i].translate_y(dy);
            if systems[i].add_stretch {
                dy += extra;
            }
        }
    }

    let number = pages.len();
    let x = match pages.last() {
        Some(prev) => prev.x + geometry.width() + if number % 2 == 1 { PAGE_SPREAD_GAP } else { PAGE_GAP },
        None => 0.0,
    };
    pages.push(Page {
        number,
        x,
        y: 0.0,
        width: geometry.width(),
        height: geometry.height(),
        systems: state.systems,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::{FramePlacement, SysStaff};
    use crate::services::PageFormat;

    fn system(height: f64) -> System {
        System {
            x: 0.0,
            y: 0.0,
            width: 500.0,
            height,
            left_margin: 0.0,
            staves: vec![SysStaff { visible: true, y: 0.0, height, distance_up: 0.0, distance_down: 0.0 }],
            measures: Vec::new(),
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

    fn page() -> PageFormat {
        PageFormat { height: 300.0, top_margin: 0.0, bottom_margin: 0.0, ..PageFormat::default() }
    }

    #[test]
    fn overflow_starts_new_page() {
        let style = Style::default();
        let mut systems = vec![system(80.0), system(80.0), system(80.0)];
        let pages = layout_pages(&mut systems, &style, &page());
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].systems, vec![0, 1]);
        assert_eq!(pages[1].systems, vec![2]);
        assert_eq!(pages[1].x, 595.0 + PAGE_SPREAD_GAP);
        assert_eq!(systems[2].y, 35.0);
    }

    #[test]
    fn full_page_spreads_rest_over_gaps() {
        let style = Style::default();
        let mut systems = vec![system(80.0), system(80.0), system(80.0)];
        layout_pages(&mut systems, &style, &page());
        // 35 + 80 + 46.25 + 80 leaves 300 - 241.25 - 35 = 23.75 for the one gap
        assert_eq!(systems[0].y, 35.0);
        assert_eq!(systems[1].y, 161.25 + 23.75);
        assert!(systems[0].add_stretch);
    }

    #[test]
    fn sparse_page_keeps_natural_spacing() {
        let style = Style::default();
        let mut systems = vec![system(20.0), system(20.0)];
        layout_pages(&mut systems, &style, &page());
        assert_eq!(systems[1].y, 35.0 + 20.0 + 46.25);
    }

    #[test]
    fn page_break_forces_new_page() {
        let style = Style::default();
        let mut systems = vec![system(20.0), system(20.0)];
        systems[0].page_break = true;
        let pages = layout_pages(&mut systems, &style, &page());
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn float_centers_content() {
        let style = Style { layout_mode: crate::style::LayoutMode::Float, ..Style::default() };
        let mut systems = vec![system(20.0)];
        layout_pages(&mut systems, &style, &page());
        // top border 35, rest = 300 - 55 - 35 = 210, half of it added
        assert_eq!(systems[0].y, 35.0 + 105.0);
    }

    #[test]
    fn frame_uses_its_own_gaps() {
        let style = Style::default();
        let mut frame = system(40.0);
        frame.staves.clear();
        frame.frame = Some(FramePlacement { index: 0, height: 40.0, top_gap: 10.0, bottom_gap: 5.0 });
        let mut systems = vec![frame, system(20.0)];
        layout_pages(&mut systems, &style, &page());
        assert_eq!(systems[0].y, 10.0);
        // bottom gap of the frame plus the frame-to-system distance
        assert_eq!(systems[1].y, 10.0 + 40.0 + 5.0 + 35.0);
    }
}

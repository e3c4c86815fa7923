//! Horizontal justification.
//!
//! Inside a measure the chord/rest gaps behave as springs whose stiffness
//! follows the logarithm of the duration they cover. Across a system, the
//! leftover line width is handed out to measures in proportion to their
//! duration.

use crate::duration::Tick;

use super::constants::{FALLBACK_STRETCH, STRETCH_LOG_FACTOR};

/// One gap: it resists compression below `min_width` and stretches with
/// compliance `stretch`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spring {
    pub index: usize,
    pub min_width: f64,
    pub stretch: f64,
}

impl Spring {
    pub fn new(index: usize, min_width: f64, stretch: f64) -> Self {
        let stretch = if stretch > 0.0 { stretch } else { FALLBACK_STRETCH };
        Self { index, min_width, stretch }
    }

    /// Force at which this spring starts to extend.
    pub fn pre_tension(&self) -> f64 {
        self.min_width / self.stretch
    }
}

/// Compliance of a gap covering `ticks` when the shortest gap covers
/// `min_ticks`: `1 + 0.6 * log2(ticks / min_ticks)`.
pub fn stretch_coefficient(ticks: Tick, min_ticks: Tick) -> f64 {
    if ticks <= 0 || min_ticks <= 0 {
        return 1.0;
    }
    1.0 + STRETCH_LOG_FACTOR * (ticks as f64 / min_ticks as f64).log2()
}

/// Smallest common force that stretches the springs to `target`.
///
/// Springs are engaged in order of increasing pre-tension; a spring still
/// at its minimum contributes its width but no compliance.
pub fn solve_force(springs: &[Spring], target: f64) -> f64 {
    let total: f64 = springs.iter().map(|s| s.min_width).sum();
    if springs.is_empty() || target <= total {
        return 0.0;
    }
    let mut sorted: Vec<&Spring> = springs.iter().collect();
    sorted.sort_by(|a, b| a.pre_tension().total_cmp(&b.pre_tension()));

    let mut rigid = total;
    let mut compliance = 0.0;
    let mut force = 0.0;
    for (i, spring) in sorted.iter().enumerate() {
        rigid -= spring.min_width;
        compliance += spring.stretch;
        force = (target - rigid) / compliance;
        match sorted.get(i + 1) {
            Some(next) if next.pre_tension() < force => continue,
            _ => break,
        }
    }
    force
}

/// Final width of every spring (input order) under the force that sums
/// them to `target`. Springs never shrink below their minimum.
pub fn justify(springs: &[Spring], target: f64) -> Vec<f64> {
    let force = solve_force(springs, target);
    springs.iter().map(|s| s.min_width.max(force * s.stretch)).collect()
}

/// Stretch gaps of minimum `widths` covering `ticks` to fill `target`.
/// Gaps with no duration keep their minimum.
pub fn justify_gaps(widths: &[f64], ticks: &[Tick], target: f64) -> Vec<f64> {
    let min_ticks = ticks.iter().copied().filter(|&t| t > 0).min().unwrap_or(0);
    let springs: Vec<Spring> = widths
        .iter()
        .zip(ticks)
        .enumerate()
        .filter(|(_, (_, &t))| t > 0)
        .map(|(i, (&w, &t))| Spring::new(i, w, stretch_coefficient(t, min_ticks)))
        .collect();
    let fixed: f64 = widths
        .iter()
        .zip(ticks)
        .filter(|(_, &t)| t <= 0)
        .map(|(w, _)| *w)
        .sum();

    let mut out = widths.to_vec();
    for (spring, width) in springs.iter().zip(justify(&springs, target - fixed)) {
        out[spring.index] = width;
    }
    out
}

/// Linear distribution across a system: each measure gets its minimum plus
/// a share of the leftover proportional to its weight. With no usable
/// weight the leftover is split evenly.
pub fn distribute_linear(mins: &[f64], weights: &[f64], target: f64) -> Vec<f64> {
    let rest = (target - mins.iter().sum::<f64>()).max(0.0);
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        let share = if mins.is_empty() { 0.0 } else { rest / mins.len() as f64 };
        return mins.iter().map(|m| m + share).collect();
    }
    mins.iter()
        .zip(weights)
        .map(|(m, w)| m + rest * w.max(0.0) / total)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn coefficient_grows_with_duration() {
        assert_eq!(stretch_coefficient(240, 240), 1.0);
        assert!(close(stretch_coefficient(480, 240), 1.6));
        assert!(close(stretch_coefficient(960, 240), 2.2));
        assert_eq!(stretch_coefficient(0, 240), 1.0);
    }

    #[test]
    fn equal_springs_share_evenly() {
        let widths = justify_gaps(&[10.0; 4], &[240; 4], 60.0);
        assert!(widths.iter().all(|w| close(*w, 15.0)));
    }

    #[test]
    fn stiff_spring_stays_at_minimum() {
        let springs = [Spring::new(0, 10.0, 1.0), Spring::new(1, 10.0, 2.2)];
        let widths = justify(&springs, 40.0);
        assert!(close(widths[0], 12.5));
        assert!(close(widths[1], 27.5));
    }

    #[test]
    fn compressed_target_keeps_minimums() {
        let widths = justify_gaps(&[10.0, 20.0], &[240, 480], 25.0);
        assert_eq!(widths, vec![10.0, 20.0]);
    }

    #[test]
    fn zero_tick_gaps_are_rigid() {
        let widths = justify_gaps(&[4.0, 10.0, 10.0], &[0, 240, 240], 44.0);
        assert_eq!(widths[0], 4.0);
        assert!(close(widths.iter().sum::<f64>(), 44.0));
    }

    #[test]
    fn zero_stretch_falls_back() {
        let s = Spring::new(0, 5.0, 0.0);
        assert_eq!(s.stretch, FALLBACK_STRETCH);
    }

    #[test]
    fn linear_distribution_conserves_width() {
        let widths = distribute_linear(&[30.0, 50.0, 20.0], &[1920.0, 960.0, 960.0], 180.0);
        assert!(close(widths.iter().sum::<f64>(), 180.0));
        assert!(close(widths[0], 70.0));
        assert!(close(widths[1], 70.0));
    }

    #[test]
    fn linear_distribution_without_weights_splits_evenly() {
        let widths = distribute_linear(&[10.0, 10.0], &[0.0, 0.0], 30.0);
        assert_eq!(widths, vec![15.0, 15.0]);
    }
}

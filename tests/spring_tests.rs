//! Spring model tests: gap justification inside a measure and linear
//! distribution across a system.

use pretty_assertions::assert_eq;
use scorelayout::{distribute_linear, justify, justify_gaps, solve_force, stretch_coefficient, Spring};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn equal_quarters_share_the_slack_evenly() {
    let widths = justify_gaps(&[10.0; 4], &[480; 4], 60.0);
    assert_eq!(widths, vec![15.0; 4]);
    assert!(close(widths.iter().sum::<f64>(), 60.0));
}

#[test]
fn shorter_gap_stretches_less() {
    // quarter then whole: coefficients 1.0 and 1 + 0.6 * log2(4) = 2.2
    assert!(close(stretch_coefficient(1920, 480), 2.2));
    let widths = justify_gaps(&[10.0, 10.0], &[480, 1920], 40.0);
    assert!(close(widths[0], 12.5), "quarter gap was {}", widths[0]);
    assert!(close(widths[1], 27.5), "whole gap was {}", widths[1]);
    assert!(widths[0] - 10.0 < 10.0, "quarter gap got at least the even share");
}

#[test]
fn target_below_minimum_keeps_minimum_widths() {
    let widths = justify_gaps(&[10.0, 12.0, 8.0], &[480, 480, 960], 20.0);
    assert_eq!(widths, vec![10.0, 12.0, 8.0]);
}

#[test]
fn zero_tick_gaps_stay_rigid() {
    let widths = justify_gaps(&[5.0, 10.0, 10.0], &[0, 480, 480], 45.0);
    assert_eq!(widths[0], 5.0);
    assert!(close(widths[1], 20.0));
    assert!(close(widths[2], 20.0));
}

#[test]
fn degenerate_stretch_falls_back() {
    let spring = Spring::new(0, 10.0, 0.0);
    assert!(spring.stretch > 0.0);
    let widths = justify(&[spring], 25.0);
    assert!(close(widths[0], 25.0));
    assert_eq!(solve_force(&[], 10.0), 0.0);
}

#[test]
fn wide_springs_engage_late() {
    // The 30-wide spring stays at its minimum until the force reaches 30.
    let springs = [Spring::new(0, 10.0, 1.0), Spring::new(1, 30.0, 1.0)];
    let widths = justify(&springs, 50.0);
    assert!(close(widths[0], 20.0));
    assert!(close(widths[1], 30.0));
}

#[test]
fn linear_distribution_conserves_width() {
    let mins = [40.0, 60.0, 50.0];
    let weights = [1920.0, 1920.0, 960.0];
    let widths = distribute_linear(&mins, &weights, 300.0);
    assert!(close(widths.iter().sum::<f64>(), 300.0));
    assert!(close(widths[0] - 40.0, 60.0));
    assert!(close(widths[2] - 50.0, 30.0));
}

#[test]
fn linear_distribution_without_weights_splits_evenly() {
    let widths = distribute_linear(&[10.0, 20.0], &[0.0, 0.0], 50.0);
    assert_eq!(widths, vec![20.0, 30.0]);
}

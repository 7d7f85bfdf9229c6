//! Segment planning.

use crate::engines::TimeWindow;

/// Slack below which a remainder is not worth its own segment.
const EPSILON_SECS: f64 = 1e-6;

/// A time-bounded slice of one job's input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Position in the merged output.
    pub index: usize,
    pub window: TimeWindow,
}

/// Divide `[start, end)` into consecutive, non-overlapping windows of
/// `window_secs`. The last window may be shorter.
pub fn plan_segments(start: f64, end: f64, window_secs: f64) -> Vec<Segment> {
    let span = end - start;
    if !span.is_finite() || span <= EPSILON_SECS || !window_secs.is_finite() || window_secs <= 0.0 {
        return Vec::new();
    }

    let count = ((span - EPSILON_SECS) / window_secs).floor() as usize + 1;
    (0..count)
        .map(|index| {
            let seg_start = start + index as f64 * window_secs;
            let seg_end = if index + 1 == count {
                end
            } else {
                start + (index + 1) as f64 * window_secs
            };
            Segment {
                index,
                window: TimeWindow::new(seg_start, seg_end),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn durations(segments: &[Segment]) -> Vec<f64> {
        segments.iter().map(|s| s.window.duration()).collect()
    }

    #[test]
    fn test_last_window_is_shorter() {
        let segments = plan_segments(0.0, 100.0, 30.0);
        assert_eq!(durations(&segments), vec![30.0, 30.0, 30.0, 10.0]);
        assert_eq!(segments[3].window.start, 90.0);
        assert_eq!(segments[3].window.end, 100.0);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let segments = plan_segments(0.0, 90.0, 30.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].window.end, 90.0);
    }

    #[test]
    fn test_windows_are_contiguous() {
        let segments = plan_segments(12.5, 250.0, 60.0);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].window.end, pair[1].window.start);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
        assert_eq!(segments.first().unwrap().window.start, 12.5);
        assert_eq!(segments.last().unwrap().window.end, 250.0);
    }

    #[test]
    fn test_short_input_is_one_segment() {
        assert_eq!(plan_segments(0.0, 5.0, 30.0).len(), 1);
    }

    #[test]
    fn test_degenerate_ranges() {
        assert!(plan_segments(10.0, 10.0, 30.0).is_empty());
        assert!(plan_segments(0.0, 10.0, 0.0).is_empty());
    }
}

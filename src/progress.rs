//! Rolling-window progress and ETA estimator (C7).

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

const WINDOW: Duration = Duration::from_secs(10 * 60);

/// A list of completed-milestone timestamps, pruned to the trailing
/// 10-minute window on every `save`.
pub struct Progress {
    timestamps: VecDeque<SystemTime>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    /// Record one completed milestone and evict anything older than the
    /// 10-minute window.
    pub fn save(&mut self) {
        let now = SystemTime::now();
        self.timestamps.push_back(now);
        while let Some(&front) = self.timestamps.front() {
            match now.duration_since(front) {
                Ok(age) if age > WINDOW => {
                    self.timestamps.pop_front();
                }
                _ => break,
            }
        }
    }

    /// `percentage = 100 * reached / max(reached, maxMilestones)`, `eta =
    /// (now - windowStart) / windowSize * remaining`, rendered as
    /// `H M S`-spaced components.
    pub fn to_progress_string(&self, max_milestones: u64) -> String {
        let reached = self.timestamps.len() as u64;
        let denominator = reached.max(max_milestones).max(1);
        let percentage = 100 * reached / denominator;

        let eta = self.eta_seconds(max_milestones);
        format!("{percentage}% ({reached}/{max_milestones}), ETA {}", format_duration(eta))
    }

    fn eta_seconds(&self, max_milestones: u64) -> u64 {
        let reached = self.timestamps.len() as u64;
        let remaining = max_milestones.saturating_sub(reached);
        if remaining == 0 {
            return 0;
        }
        let (Some(&window_start), Some(&window_end)) =
            (self.timestamps.front(), self.timestamps.back())
        else {
            return 0;
        };
        let window_size = window_end
            .duration_since(window_start)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        if window_size <= 0.0 || reached == 0 {
            return 0;
        }
        let elapsed = window_size / reached as f64;
        (elapsed * remaining as f64).trunc() as u64
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}H"));
    }
    if hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}M"));
    }
    parts.push(format!("{seconds}S"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_duration_components() {
        assert_eq!(format_duration(5), "5S");
        assert_eq!(format_duration(65), "1M 5S");
        assert_eq!(format_duration(3665), "1H 1M 5S");
    }

    #[test]
    fn percentage_caps_at_full_when_reached_exceeds_max() {
        let mut progress = Progress::new();
        for _ in 0..5 {
            progress.save();
        }
        let rendered = progress.to_progress_string(3);
        assert!(rendered.starts_with("100%"));
    }

    #[test]
    fn percentage_reflects_partial_progress() {
        let mut progress = Progress::new();
        progress.save();
        let rendered = progress.to_progress_string(4);
        assert!(rendered.starts_with("25%"));
    }
}

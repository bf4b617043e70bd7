use canopy_pipeline::{RunPhase, RunProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a progress bar for determinate progress
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n[{bar:40.cyan/blue}] {pos}/{len} ({percent}%) ETA: {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    pb.set_message(message.to_string());
    pb
}

/// Finish a progress bar with success message
pub fn finish_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✓ {}", message));
}

/// Finish a progress bar with error message
pub fn finish_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✗ {}", message));
}

/// One bar per pipeline phase, switched when the reported phase changes.
///
/// Phases counting scenes or polygons get a determinate bar, the others a
/// spinner. Nothing is drawn when `hidden`.
pub struct PhaseProgress {
    multi: MultiProgress,
    current: Option<(RunPhase, ProgressBar)>,
    hidden: bool,
}

impl PhaseProgress {
    pub fn new(hidden: bool) -> Self {
        Self { multi: MultiProgress::new(), current: None, hidden }
    }

    pub fn update(&mut self, progress: &RunProgress) {
        if self.hidden {
            return;
        }

        let switched = !matches!(&self.current, Some((phase, _)) if *phase == progress.phase);
        if switched {
            self.finish_current();
            let bar = if counts_items(progress.phase) {
                create_progress_bar(progress.total as u64, progress.phase.label())
            } else {
                create_spinner(progress.phase.label())
            };
            self.current = Some((progress.phase, self.multi.add(bar)));
        }

        if let Some((phase, bar)) = &self.current {
            if counts_items(*phase) {
                bar.set_length(progress.total as u64);
                bar.set_position(progress.current as u64);
                bar.set_message(format!("{}: {}", phase.label(), progress.message));
            } else {
                bar.set_message(format!("{}... {}", phase.label(), progress.message));
            }
        }
    }

    /// Close the last bar as completed
    pub fn finish(&mut self) {
        self.finish_current();
    }

    /// Close the last bar as failed
    pub fn abandon(&mut self) {
        if let Some((phase, bar)) = self.current.take() {
            finish_error(&bar, phase.label());
        }
    }

    fn finish_current(&mut self) {
        if let Some((phase, bar)) = self.current.take() {
            finish_success(&bar, phase.label());
        }
    }
}

fn counts_items(phase: RunPhase) -> bool {
    matches!(phase, RunPhase::ProcessingScenes | RunPhase::ZonalStatistics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_draws_nothing() {
        let mut progress = PhaseProgress::new(true);
        progress.update(&RunProgress::new(RunPhase::Planning, 0, 1, "Searching catalog"));
        assert!(progress.current.is_none());
        progress.finish();
    }

    #[test]
    fn test_phase_switch_replaces_bar() {
        let mut progress = PhaseProgress::new(false);
        progress.multi.set_draw_target(indicatif::ProgressDrawTarget::hidden());

        progress.update(&RunProgress::new(RunPhase::Planning, 0, 1, "Searching catalog"));
        progress.update(&RunProgress::new(RunPhase::ProcessingScenes, 1, 3, "S2A_1"));

        let (phase, bar) = progress.current.as_ref().unwrap();
        assert_eq!(*phase, RunPhase::ProcessingScenes);
        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 1);

        progress.abandon();
        assert!(progress.current.is_none());
    }
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{bright, bright_green, bright_yellow};

/// Progress tracking for the resolve, generate and write phases
pub struct PhaseProgress {
    pb: ProgressBar,
}

impl PhaseProgress {
    pub fn start_resolving(url_count: usize) -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright("Phases").underlined());
        let pb = create_spinner(
            bright_yellow(format!("Phase 1/3: Resolving pipelines for {url_count} URL(s)")).to_string(),
        );
        Self { pb }
    }

    pub fn finish_resolving_start_generating(self, pipeline_count: usize) -> Self {
        self.pb.finish_with_message(
            bright_green(format!("Phase 1/3: Found {pipeline_count} pipeline(s) ✓")).to_string(),
        );
        let pb = create_spinner(bright_yellow("Phase 2/3: Generating reports").to_string());
        Self { pb }
    }

    pub fn set_generating(&self, url: &str) {
        self.pb
            .set_message(bright_yellow(format!("Phase 2/3: Generating report for {url}")).to_string());
    }

    pub fn finish_generating_start_writing(self) -> Self {
        self.pb
            .finish_with_message(bright_green("Phase 2/3: Reports up to date ✓").to_string());
        let pb = create_spinner(bright_yellow("Phase 3/3: Writing output").to_string());
        Self { pb }
    }

    pub fn finish_writing(self) {
        self.pb
            .finish_with_message(bright_green("Phase 3/3: Output written ✓").to_string());
        eprintln!();
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

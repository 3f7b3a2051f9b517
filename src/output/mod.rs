mod exports;
mod progress;
mod styling;
mod summary;
mod tables;

pub use exports::export_reports;
pub use progress::PhaseProgress;
use styling::{dim, magenta_bold};
pub use summary::print_summary;

/// Prints the pipeline-report banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🧪 pipeline-report"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Jenkins pipeline failure and timing reports")
    );
}

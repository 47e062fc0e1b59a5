use std::io::Write;

use owo_colors::OwoColorize;
use pdf_parser_core::ParseStats;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print the end-of-run summary, then one line per failed input.
pub fn print_summary(w: &mut dyn Write, stats: &ParseStats, color: ColorMode) -> std::io::Result<()> {
    let processed = format!("processed {} file(s)", stats.processed);
    let failed = format!("({} failed)", stats.failed.len());
    if !color.enabled() {
        writeln!(w, "{processed} {failed}")?;
    } else if stats.failed.is_empty() {
        writeln!(w, "{} {}", processed.green(), failed.dimmed())?;
    } else {
        writeln!(w, "{} {}", processed.bold(), failed.red())?;
    }

    for path in &stats.failed {
        writeln!(w, "  {}", path.display())?;
    }
    Ok(())
}

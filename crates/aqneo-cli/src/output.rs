//! Terminal output formatting.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use aqneo_core::NodeKey;
use aqneo_graph::{SyncProgress, SyncReport};

const BAR_TEMPLATE: &str = "  {msg:<8} [{bar:30.cyan/blue}] {pos}/{len}";
const SPINNER_TEMPLATE: &str = "  {spinner} {msg}";

/// A bar over `total` payloads.
pub fn progress_bar(total: usize, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(label.to_string());
    bar
}

/// Spinner while the graph is traversed, then one bar per write phase.
pub struct SyncBar {
    bar: ProgressBar,
    discovered: usize,
}

impl SyncBar {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
            bar.set_style(style);
        }
        bar.set_message("Traversing records");
        Self { bar, discovered: 0 }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for SyncBar {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProgress for SyncBar {
    fn node_discovered(&mut self, key: &NodeKey) {
        self.discovered += 1;
        self.bar
            .set_message(format!("Traversing records: {} nodes ({key})", self.discovered));
        self.bar.tick();
    }

    fn phase(&mut self, name: &str, total: usize) {
        self.bar.finish_and_clear();
        self.bar = progress_bar(total, name);
    }

    fn item_written(&mut self) {
        self.bar.inc(1);
    }
}

pub fn print_sync_report(report: &SyncReport) {
    println!("\n{}", "Sync complete:".green().bold());
    println!("{}", "─".repeat(40));
    println!("  Nodes discovered:  {}", report.nodes);
    println!("  Edges discovered:  {}", report.edges);
    println!("  Payloads written:  {}", report.written.to_string().green());
    let failed = if report.failed > 0 {
        report.failed.to_string().red()
    } else {
        report.failed.to_string().normal()
    };
    println!("  Payloads failed:   {failed}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_bar_tracks_phases() {
        let mut progress = SyncBar::new();
        progress.node_discovered(&NodeKey::new("Sample", 1));
        progress.node_discovered(&NodeKey::new("Item", 2));
        assert_eq!(progress.discovered, 2);

        progress.phase("nodes", 3);
        progress.item_written();
        progress.item_written();
        assert_eq!(progress.bar.length(), Some(3));
        assert_eq!(progress.bar.position(), 2);
        progress.finish();
    }
}

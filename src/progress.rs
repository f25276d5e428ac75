//! Terminal progress for engine runs

use colored::Colorize;
use declarative::{NodeId, NodeReport, NodeStatus, Operation, ProgressCallback, RunSummary};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress bar over a run's tasks, printing one line per finished change
pub struct BarProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = ProgressBar::new(0);
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar, quiet }
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_node_start(&mut self, id: &NodeId, operation: Operation) {
        self.bar.set_message(format!("{operation} {id}"));
    }

    fn on_node_complete(&mut self, report: &NodeReport) {
        self.bar.inc(1);
        if self.quiet {
            return;
        }
        let operation = report.operation.unwrap_or(Operation::Same);
        let line = match &report.status {
            NodeStatus::Succeeded if !operation.is_change() => return,
            NodeStatus::Succeeded => format!("{} {} {}", "✓".green(), operation, report.id),
            NodeStatus::Failed { .. } => format!("{} {} {}", "✗".red(), operation, report.id),
            NodeStatus::Skipped { .. } => format!("{} skipped {}", "○".dimmed(), report.id),
        };
        self.bar.println(line);
    }

    fn on_run_complete(&mut self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

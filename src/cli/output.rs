//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the mediator CLI, plus
//! the human-readable rendering of a finished run and its audit.

use crate::types::{
    AuditSummary, FinalAnalysis, GroundingCheck, GroundingVerdict, QualityTier, RunQuality,
    UrlCheckResult, UrlOutcome,
};
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the mediator banner
    pub fn banner(&self) {
        if self.colored {
            println!(
                "\n   {} {}\n",
                "mediator".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            );
        } else {
            println!("\n   mediator v{}\n", env!("CARGO_PKG_VERSION"));
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a file creation message
    pub fn created(&self, file_type: &str, path: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "✓".green().bold(),
                file_type.dimmed(),
                path.bright_white()
            );
        } else {
            println!("  [CREATED] {} {}", file_type, path);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a subheader
    pub fn subheader(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.cyan().bold());
        } else {
            println!("\n  --- {} ---", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a list item
    pub fn list_item(&self, item: &str) {
        if self.colored {
            println!("    {} {}", "•".blue(), item);
        } else {
            println!("    - {}", item);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "💡".dimmed(), message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a table header row
    pub fn table_header(&self, columns: &[&str]) {
        let header: String = columns
            .iter()
            .map(|c| format!("{:<15}", c))
            .collect::<Vec<_>>()
            .join(" ");
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(columns.len() * 16).dimmed());
        } else {
            println!("    {}", header);
            println!("    {}", "-".repeat(columns.len() * 16));
        }
    }

    /// Print a table row
    pub fn table_row(&self, values: &[&str]) {
        let row: String = values
            .iter()
            .map(|v| format!("{:<15}", v))
            .collect::<Vec<_>>()
            .join(" ");
        println!("    {}", row);
    }

    /// Print newline
    pub fn newline(&self) {
        println!();
    }

    // ============= Run rendering =============

    pub fn analysis(&self, analysis: &FinalAnalysis) {
        self.header("Synthesis");
        for line in analysis.synthesis.lines().filter(|l| !l.trim().is_empty()) {
            println!("    {}", line);
        }

        if !analysis.recommendations.is_empty() {
            self.subheader("Recommendations");
            for rec in &analysis.recommendations {
                self.list_item(rec);
            }
        }

        if !analysis.priority_flags.is_empty() {
            self.subheader("Priority flags");
            for flag in &analysis.priority_flags {
                self.list_item(flag);
            }
        }

        if !analysis.conflicts.is_empty() {
            self.subheader("Conflicts");
            for conflict in &analysis.conflicts {
                self.list_item(&format!(
                    "[{:?}] {} ({}): {}",
                    conflict.severity,
                    conflict.topic,
                    conflict.agents.join(", "),
                    conflict.description
                ));
            }
        }

        if !analysis.conflict_resolutions.is_empty() {
            self.subheader("Resolutions");
            for resolution in &analysis.conflict_resolutions {
                self.kv(&resolution.topic, &resolution.verdict);
                self.list_item(&resolution.updated_recommendation);
            }
        }

        if !analysis.sources.is_empty() {
            self.subheader("Sources");
            for (i, source) in analysis.sources.iter().enumerate() {
                println!("    {:>3}. {}", i + 1, source.display_line());
            }
        }

        if !analysis.deactivated_disclaimer.is_empty() {
            self.newline();
            self.warning(&analysis.deactivated_disclaimer);
        }

        let telemetry = &analysis.telemetry;
        self.subheader("Run");
        self.kv("run id", &telemetry.run_id.to_string());
        self.kv(
            "agents",
            &format!(
                "{}/{} completed",
                telemetry.modules_completed, telemetry.modules_attempted
            ),
        );
        self.kv(
            "tokens",
            &format!(
                "{} in / {} out",
                telemetry.token_usage.total_input, telemetry.token_usage.total_output
            ),
        );
        self.kv("total", &format!("{} ms", telemetry.timings.total_ms));
        if telemetry.cancelled {
            self.warning("Run was cancelled; the record is partial");
        }
        if let Some(quality) = &analysis.quality {
            self.quality(quality);
        }
    }

    pub fn quality(&self, quality: &RunQuality) {
        let label = format!("{} ({:.2})", quality.tier, quality.score);
        match (self.colored, quality.tier) {
            (true, QualityTier::Good) => self.kv("quality", &label.green().to_string()),
            (true, QualityTier::Degraded) => self.kv("quality", &label.yellow().to_string()),
            (true, QualityTier::Poor) => self.kv("quality", &label.red().to_string()),
            (false, _) => self.kv("quality", &label),
        }
        for warning in &quality.warnings {
            self.warning(warning);
        }
    }

    pub fn audit(&self, audit: &AuditSummary) {
        self.header("Audit");
        self.layer("L1 prompt constraints", audit.layer1.passed, &audit.layer1.violations);
        self.layer("L2 citation integrity", audit.layer2.passed, &audit.layer2.violations);

        let l3 = &audit.layer3;
        let l3_line = format!(
            "L3 reachability: {} ok, {} bot-blocked, {} failed of {}",
            l3.ok, l3.bot_blocked, l3.failed, l3.total
        );
        if l3.failed == 0 {
            self.success(&l3_line);
        } else {
            self.warning(&l3_line);
            for result in l3.failures() {
                self.list_item(&url_line(result));
            }
        }

        if let Some(checks) = &audit.layer4 {
            self.info(&format!("L4 grounding: {}", grounding_tally(checks)));
            for check in checks
                .iter()
                .filter(|c| c.verdict == GroundingVerdict::Unsupported)
            {
                self.list_item(&format!("[{}] {}", check.citation, check.sentence));
            }
        }

        if let Some(checks) = &audit.layer5 {
            let clean = checks.iter().filter(|c| c.ok).count();
            self.info(&format!("L5 consistency: {}/{} agents clean", clean, checks.len()));
            for check in checks.iter().filter(|c| !c.ok) {
                match &check.error {
                    Some(error) => self.list_item(&format!("{}: check failed ({})", check.agent, error)),
                    None => {
                        for issue in &check.issues {
                            self.list_item(&format!("{}: {}", check.agent, issue));
                        }
                    }
                }
            }
        }
    }

    fn layer(&self, name: &str, passed: bool, violations: &[String]) {
        if passed {
            self.success(&format!("{}: passed", name));
        } else {
            self.warning(&format!("{}: {} violation(s)", name, violations.len()));
            for violation in violations {
                self.list_item(violation);
            }
        }
    }
}

/// `url (status or error)` for one probe result.
pub fn url_line(result: &UrlCheckResult) -> String {
    let detail = match (result.status, &result.error) {
        (Some(status), _) => status.to_string(),
        (None, Some(error)) => error.clone(),
        (None, None) => "no response".to_string(),
    };
    let outcome = match result.outcome {
        UrlOutcome::Ok => "ok",
        UrlOutcome::BotBlocked => "bot-blocked",
        UrlOutcome::Failed => "failed",
    };
    format!("{} ({}, {})", result.url, outcome, detail)
}

/// Verdict counts in a fixed order, zero counts omitted.
pub fn grounding_tally(checks: &[GroundingCheck]) -> String {
    if checks.is_empty() {
        return "nothing sampled".to_string();
    }
    let order = [
        (GroundingVerdict::Supported, "supported"),
        (GroundingVerdict::Partial, "partial"),
        (GroundingVerdict::Unsupported, "unsupported"),
        (GroundingVerdict::FetchFailed, "fetch failed"),
        (GroundingVerdict::Unknown, "unknown"),
    ];
    order
        .iter()
        .filter_map(|(verdict, label)| {
            let count = checks.iter().filter(|c| c.verdict == *verdict).count();
            (count > 0).then(|| format!("{} {}", count, label))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

//! Utilities module for logging, errors, and display helpers
//!
//! This module provides:
//! - Structured logging with tracing
//! - The error taxonomy shared by every pipeline stage
//! - Small formatting helpers for the CLI

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{PlantDoctorError, PredictionErrorKind, Result};
pub use logging::{init_logging, LogConfig, LogLevel};

/// Format a duration given in milliseconds
pub fn format_millis(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.0}µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.1}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// Format a probability as a percentage with a progress bar
pub fn format_progress_bar(progress: f64, width: usize) -> String {
    let progress = progress.clamp(0.0, 1.0);
    let filled = (progress * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        progress * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0.5), "500µs");
        assert_eq!(format_millis(12.34), "12.3ms");
        assert_eq!(format_millis(1500.0), "1.50s");
    }

    #[test]
    fn test_format_progress_bar() {
        let bar = format_progress_bar(0.5, 10);
        assert!(bar.contains("50.0%"));
        assert!(bar.contains("█████"));
    }

    #[test]
    fn test_format_progress_bar_clamps() {
        let bar = format_progress_bar(1.7, 4);
        assert!(bar.contains("100.0%"));
        assert!(!bar.contains('░'));
    }
}

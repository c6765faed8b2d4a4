//! Utilities module for logging, metrics, charts and helper functions
//!
//! - Structured logging with tracing
//! - Binary classification metrics (confusion matrix, ROC, AUC)
//! - SVG chart rendering for EDA, training curves and ROC
//! - Error handling types

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{HistoError, Result};
pub use logging::init_logging;
pub use metrics::{BinaryMetrics, ConfusionMatrix, RocCurve};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a count with thousands separators
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let len = digits.len();
    let mut result = String::with_capacity(len + len / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result
}

/// Render a fraction in [0, 1] as a text bar
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
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(220025), "220,025");
        assert_eq!(format_number(1000000), "1,000,000");
    }

    #[test]
    fn test_format_progress_bar_bounds() {
        assert!(format_progress_bar(0.5, 10).contains("50.0%"));
        assert!(format_progress_bar(1.7, 4).contains("100.0%"));
    }
}

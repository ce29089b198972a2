//! CLI command implementations

mod lifecycle;
mod manage;

pub use lifecycle::*;
pub use manage::*;

use chrono::{DateTime, Utc};
use devbox_core::{CoreError, LifecycleReport};
use std::time::Duration;

/// A `--since` / `--until` argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeArg {
    /// Unix seconds
    Absolute(i64),
    /// That long before now
    Relative(Duration),
}

impl TimeArg {
    /// Unix seconds, relative to `now` where needed
    pub fn resolve(self, now: DateTime<Utc>) -> i64 {
        match self {
            TimeArg::Absolute(ts) => ts,
            TimeArg::Relative(ago) => i64::try_from(ago.as_secs())
                .ok()
                .and_then(|ago| now.timestamp().checked_sub(ago))
                .map_or(0, |ts| ts.max(0)),
        }
    }
}

/// Parse unix seconds, RFC 3339, or a relative duration like `10m`
pub fn parse_time_arg(raw: &str) -> Result<TimeArg, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty time".to_string());
    }

    if let Ok(ts) = raw.parse::<i64>() {
        return Ok(TimeArg::Absolute(ts));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(TimeArg::Absolute(dt.timestamp()));
    }

    let invalid = || format!("'{}' is not a timestamp or duration (e.g. 30s, 10m, 2h, 1d)", raw);

    let split = raw.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    let (digits, unit) = raw.split_at(split);
    let scale: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = amount.checked_mul(scale).ok_or_else(invalid)?;
    Ok(TimeArg::Relative(Duration::from_secs(secs)))
}

/// Render an error for the terminal: the cause, any container output, then what to do
pub fn report_error(err: &anyhow::Error, verbose: bool) -> String {
    let mut out = format!("Error: {}", err);

    if let Some(core) = err.downcast_ref::<CoreError>() {
        let tail = core.log_tail();
        if !tail.is_empty() {
            out.push_str("\n\nLast container output:");
            for line in tail {
                out.push_str("\n  ");
                out.push_str(line);
            }
        }

        let steps = core.remediation();
        if !steps.is_empty() {
            out.push_str("\n\nTo fix:");
            for (i, step) in steps.iter().enumerate() {
                out.push_str(&format!("\n  {}. {}", i + 1, step));
            }
        }
    }

    if verbose {
        let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
        if !causes.is_empty() {
            out.push_str("\n\nCaused by:");
            for cause in causes {
                out.push_str("\n  ");
                out.push_str(&cause);
            }
        }
    }

    out
}

fn print_warnings(report: &LifecycleReport) {
    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devbox_core::{readiness::FailureReason, Step};

    #[test]
    fn test_parse_time_arg_forms() {
        assert_eq!(parse_time_arg("1700000000"), Ok(TimeArg::Absolute(1700000000)));
        assert_eq!(
            parse_time_arg("2023-11-14T22:13:20Z"),
            Ok(TimeArg::Absolute(1700000000))
        );
        assert_eq!(
            parse_time_arg("10m"),
            Ok(TimeArg::Relative(Duration::from_secs(600)))
        );
        assert_eq!(
            parse_time_arg("1d"),
            Ok(TimeArg::Relative(Duration::from_secs(86400)))
        );
    }

    #[test]
    fn test_parse_time_arg_rejects_garbage() {
        assert!(parse_time_arg("").is_err());
        assert!(parse_time_arg("garbage").is_err());
        assert!(parse_time_arg("10w").is_err());
        assert!(parse_time_arg("-5m").is_err());
    }

    #[test]
    fn test_relative_resolves_against_now() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(parse_time_arg("30s").unwrap().resolve(now), 1_699_999_970);
        assert_eq!(parse_time_arg("42").unwrap().resolve(now), 42);
    }

    #[test]
    fn test_parse_time_arg_rejects_overflowing_duration() {
        let err = parse_time_arg("300000000000000d").unwrap_err();
        assert!(err.contains("is not a timestamp or duration"));
        assert!(parse_time_arg("18446744073709551615s").is_ok());
    }

    #[test]
    fn test_relative_before_epoch_clamps_to_zero() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(TimeArg::Relative(Duration::from_secs(u64::MAX)).resolve(now), 0);
        assert_eq!(
            parse_time_arg("18446744073709551615s").unwrap().resolve(now),
            0
        );
        assert_eq!(parse_time_arg("100000d").unwrap().resolve(now), 0);
    }

    #[test]
    fn test_report_error_lists_tail_and_remediation() {
        let err: anyhow::Error = CoreError::at(
            Step::WaitingReady,
            CoreError::NotReady {
                reason: FailureReason::StreamClosed,
                tail: vec!["sshd: fatal".to_string()],
            },
        )
        .into();

        let text = report_error(&err, false);
        assert!(text.starts_with("Error: WaitingReady failed"));
        assert!(text.contains("  sshd: fatal"));
        assert!(text.contains("To fix:\n  1. Review the container output above"));
        assert!(!text.contains("Caused by"));
    }

    #[test]
    fn test_report_error_chain_only_when_verbose() {
        let err: anyhow::Error =
            CoreError::at(Step::Building, CoreError::BuildFailed("disk full".into())).into();
        assert!(report_error(&err, true).contains("Caused by:\n  Build failed: disk full"));
        assert!(!report_error(&err, false).contains("Caused by"));
    }

    #[test]
    fn test_report_error_plain_anyhow() {
        let err = anyhow::anyhow!("something odd");
        assert_eq!(report_error(&err, false), "Error: something odd");
    }
}

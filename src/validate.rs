use crate::error::{Diagnostic, ErrorCode, Severity};
use crate::expression::{Expression, ExpressionKind};
use chrono::{DateTime, Utc};

/// Outcome of [`validate`]: every rule violation found in one pass, split
/// into errors and warnings in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// Violations that make the expression unusable.
    pub errors: Vec<Diagnostic>,
    /// Suspicious but non-fatal findings.
    pub warnings: Vec<Diagnostic>,
}

impl Validation {
    /// `true` when no errors were found (warnings do not count).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate an expression string, collecting every diagnostic instead of
/// stopping at the first.
pub fn validate(input: &str) -> Validation {
    validate_at(input, Utc::now())
}

/// Same as [`validate`] with an explicit reference instant for relative
/// `@once` resolution.
pub fn validate_at(input: &str, reference: DateTime<Utc>) -> Validation {
    let mut diagnostics = Vec::new();
    let expression = Expression::parse_collect(input, reference, &mut diagnostics);

    if let Some(expression) = &expression {
        push_interval_warnings(expression, &mut diagnostics);
        push_tag_warnings(expression, &mut diagnostics);
    }

    let mut validation = Validation::default();
    for diagnostic in diagnostics {
        match diagnostic.severity() {
            Severity::Error => validation.errors.push(diagnostic),
            Severity::Warning => validation.warnings.push(diagnostic),
        }
    }
    validation
}

/// E022/E025 are computed only for `@every` — the one kind with a knowable
/// minimum interval.
fn push_interval_warnings(expression: &Expression, diagnostics: &mut Vec<Diagnostic>) {
    if expression.kind() != ExpressionKind::Interval {
        return;
    }
    let Some(interval) = expression.interval() else {
        return;
    };
    let interval_millis = interval.min().as_millis();
    let options = expression.options();

    if let Some(jitter) = options.jitter {
        if jitter.as_millis() * 2 > interval_millis {
            diagnostics.push(
                Diagnostic::new(
                    ErrorCode::JitterExceedsInterval,
                    "jitter exceeds half of the schedule interval",
                )
                .with_field("jitter")
                .with_value(jitter.to_string()),
            );
        }
    }
    if let Some(stagger) = options.stagger {
        if stagger.as_millis() > interval_millis {
            diagnostics.push(
                Diagnostic::new(
                    ErrorCode::StaggerExceedsInterval,
                    "stagger exceeds the schedule interval",
                )
                .with_field("stagger")
                .with_value(stagger.to_string()),
            );
        }
    }
}

fn push_tag_warnings(expression: &Expression, diagnostics: &mut Vec<Diagnostic>) {
    let Some(tags) = &expression.options().tags else {
        return;
    };
    let mut seen = std::collections::HashSet::new();
    for tag in tags {
        if !seen.insert(tag.as_str()) {
            diagnostics.push(
                Diagnostic::new(ErrorCode::DuplicateTag, "duplicate tag")
                    .with_field("tag")
                    .with_value(tag.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn reference() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn codes(validation: &Validation) -> (Vec<ErrorCode>, Vec<ErrorCode>) {
        (
            validation.errors.iter().map(|d| d.code).collect(),
            validation.warnings.iter().map(|d| d.code).collect(),
        )
    }

    #[test]
    fn valid_expression_has_no_diagnostics() {
        let validation = validate_at("TZ=UTC */5 * * * * {max:3,tag:a+b}", reference());
        assert!(validation.is_valid());
        assert!(validation.errors.is_empty());
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn collects_every_field_error() {
        let validation = validate_at("61 25 32 13 8", reference());
        let (errors, warnings) = codes(&validation);
        assert!(!validation.is_valid());
        assert_eq!(
            errors,
            vec![
                ErrorCode::MinuteOutOfRange,
                ErrorCode::HourOutOfRange,
                ErrorCode::DayOfMonthOutOfRange,
                ErrorCode::MonthOutOfRange,
                ErrorCode::DayOfWeekOutOfRange,
            ]
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn collects_option_and_timezone_errors_together() {
        let validation = validate_at(
            "TZ=Not/AZone * * * * * {maxx:1,max:0,window:0s}",
            reference(),
        );
        let (errors, _) = codes(&validation);
        assert_eq!(
            errors,
            vec![
                ErrorCode::UnknownTimezone,
                ErrorCode::UnknownOptionKey,
                ErrorCode::MaxNotPositive,
                ErrorCode::WindowNotPositive,
            ]
        );
    }

    #[rstest]
    #[case("@every 1m {jitter:40s}", ErrorCode::JitterExceedsInterval)]
    #[case("@every 1m {stagger:2m}", ErrorCode::StaggerExceedsInterval)]
    fn interval_warnings(#[case] input: &str, #[case] expected: ErrorCode) {
        let validation = validate_at(input, reference());
        assert!(validation.is_valid(), "warnings must not invalidate");
        let (_, warnings) = codes(&validation);
        assert_eq!(warnings, vec![expected], "input = {input}");
    }

    #[rstest]
    #[case("@every 1m {jitter:30s}")]
    #[case("@every 1m {stagger:1m}")]
    fn interval_warning_boundaries_pass(#[case] input: &str) {
        let validation = validate_at(input, reference());
        assert!(validation.warnings.is_empty(), "input = {input}");
    }

    #[test]
    fn jitter_warning_only_for_interval_kind() {
        // A cron schedule has no knowable minimum interval.
        let validation = validate_at("* * * * * {jitter:10m}", reference());
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn duplicate_tag_warns() {
        let validation = validate_at("@daily {tag:a+b+a}", reference());
        assert!(validation.is_valid());
        let (_, warnings) = codes(&validation);
        assert_eq!(warnings, vec![ErrorCode::DuplicateTag]);
    }

    #[test]
    fn range_interval_warning_uses_minimum() {
        let validation = validate_at("@every 1m-2h {jitter:31s}", reference());
        let (_, warnings) = codes(&validation);
        assert_eq!(warnings, vec![ErrorCode::JitterExceedsInterval]);
    }

    #[test]
    fn structural_error_alone() {
        let validation = validate_at("0 0 * * * trailing {max:1} junk", reference());
        assert!(!validation.is_valid());
        assert_eq!(validation.errors[0].code, ErrorCode::Structure);
    }
}

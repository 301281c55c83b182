use std::fmt::{self, Display};
use thiserror::Error;

/// Machine-readable code attached to every parse or validation diagnostic.
///
/// Codes `E0xx` are errors, `E022`/`E025`/`W001` are warnings; the split is
/// exposed through [`ErrorCode::severity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    /// E001: second field value out of range.
    SecondOutOfRange,
    /// E002: minute field value out of range.
    MinuteOutOfRange,
    /// E003: hour field value out of range.
    HourOutOfRange,
    /// E004: day-of-month field value out of range.
    DayOfMonthOutOfRange,
    /// E005: month field value out of range.
    MonthOutOfRange,
    /// E006: day-of-week field value out of range.
    DayOfWeekOutOfRange,
    /// E007: step value is zero or negative.
    StepNotPositive,
    /// E010: structural error — tokenizer failure, wrong field count or
    /// unknown alias.
    Structure,
    /// E011: unknown IANA timezone identifier.
    UnknownTimezone,
    /// E012: malformed `@once` datetime.
    MalformedOnceInstant,
    /// E013: malformed `@every` duration.
    MalformedEveryDuration,
    /// E014: `@every` range minimum is not below its maximum.
    EveryRangeOrder,
    /// E015: unknown option key.
    UnknownOptionKey,
    /// E016: option value does not match the key's expected type.
    OptionValueMismatch,
    /// E017: non-positive relative `@once` duration.
    OnceDurationNotPositive,
    /// E020: `from` is not before `until`.
    FromAfterUntil,
    /// E021: `max` is zero or negative.
    MaxNotPositive,
    /// E022: jitter exceeds half of the schedule interval (warning).
    JitterExceedsInterval,
    /// E023: window is zero or negative.
    WindowNotPositive,
    /// E024: stagger is zero or negative.
    StaggerNotPositive,
    /// E025: stagger exceeds the schedule interval (warning).
    StaggerExceedsInterval,
    /// W001: duplicate tag (warning).
    DuplicateTag,
}

/// Diagnostic severity derived from the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The expression cannot be used.
    Error,
    /// The expression is usable but suspicious.
    Warning,
}

impl ErrorCode {
    /// Stable textual form of the code (`"E004"`, `"W001"`, …).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecondOutOfRange => "E001",
            Self::MinuteOutOfRange => "E002",
            Self::HourOutOfRange => "E003",
            Self::DayOfMonthOutOfRange => "E004",
            Self::MonthOutOfRange => "E005",
            Self::DayOfWeekOutOfRange => "E006",
            Self::StepNotPositive => "E007",
            Self::Structure => "E010",
            Self::UnknownTimezone => "E011",
            Self::MalformedOnceInstant => "E012",
            Self::MalformedEveryDuration => "E013",
            Self::EveryRangeOrder => "E014",
            Self::UnknownOptionKey => "E015",
            Self::OptionValueMismatch => "E016",
            Self::OnceDurationNotPositive => "E017",
            Self::FromAfterUntil => "E020",
            Self::MaxNotPositive => "E021",
            Self::JitterExceedsInterval => "E022",
            Self::WindowNotPositive => "E023",
            Self::StaggerNotPositive => "E024",
            Self::StaggerExceedsInterval => "E025",
            Self::DuplicateTag => "W001",
        }
    }

    /// Whether the code reports an error or a warning.
    pub fn severity(&self) -> Severity {
        match self {
            Self::JitterExceedsInterval | Self::StaggerExceedsInterval | Self::DuplicateTag => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One coded rule violation found while parsing or validating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Field the violation belongs to (`"minute"`, `"until"`, …) when known.
    pub field: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// The offending input fragment, when known.
    pub value: Option<String>,
    /// 0-based token position within the schedule body, when known.
    pub position: Option<usize>,
}

impl Diagnostic {
    /// New diagnostic with just a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            field: None,
            message: message.into(),
            value: None,
            position: None,
        }
    }

    /// Attach the field name.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attach the offending value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach the 0-based token position.
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Severity shortcut.
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.code)?;
        if let Some(field) = &self.field {
            write!(f, "{field}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(value) = &self.value {
            write!(f, ": {value:?}")?;
        }
        Ok(())
    }
}

/// Crate specific Errors implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Expression string violates the grammar; carries the first diagnostic.
    #[error("invalid expression: {0}")]
    Parse(Diagnostic),
    /// A trigger with the same id is already registered.
    #[error("trigger id already registered: {0}")]
    DuplicateTrigger(String),
    /// Operation attempted on a disposed scheduler.
    #[error("scheduler is disposed")]
    Disposed,
    /// The tick was aborted by its cancellation token.
    #[error("tick cancelled")]
    Cancelled,
}

impl From<Diagnostic> for Error {
    fn from(diagnostic: Diagnostic) -> Self {
        Self::Parse(diagnostic)
    }
}

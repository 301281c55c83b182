use crate::error::{Diagnostic, ErrorCode};

/// Raw decomposition of an expression string, before any field parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawExpression<'a> {
    /// IANA id from a `TZ=` prefix, unvalidated.
    pub timezone: Option<&'a str>,
    /// The schedule body between the prefix and the options block.
    pub body: &'a str,
    /// Content of the `{…}` options block, braces stripped.
    pub options: Option<&'a str>,
}

/// What the body parses as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Cron,
    Alias,
    Interval,
    Once,
}

/// Split a trimmed input into `TZ=` prefix, body and `{options}` block.
pub(crate) fn split(input: &str) -> Result<RawExpression<'_>, Diagnostic> {
    let mut rest = input.trim();

    let timezone = if let Some(after) = rest.strip_prefix("TZ=") {
        let end = after
            .find(char::is_whitespace)
            .ok_or_else(|| structure("missing schedule after TZ= prefix", input))?;
        let zone = &after[..end];
        if zone.is_empty() {
            return Err(structure("empty timezone in TZ= prefix", input));
        }
        rest = after[end..].trim_start();
        Some(zone)
    } else {
        None
    };

    let (body, options) = match rest.rfind('}') {
        Some(close) => {
            let trailing = rest[close + 1..].trim();
            if !trailing.is_empty() {
                return Err(structure("unexpected text after options block", trailing));
            }
            let open = rest[..close]
                .rfind('{')
                .ok_or_else(|| structure("unmatched '}'", rest))?;
            (rest[..open].trim(), Some(&rest[open + 1..close]))
        }
        None => {
            if rest.contains('{') {
                return Err(structure("unmatched '{'", rest));
            }
            (rest, None)
        }
    };

    if body.is_empty() {
        return Err(structure("empty schedule body", input));
    }

    Ok(RawExpression {
        timezone,
        body,
        options,
    })
}

/// Classify the body without parsing it.
pub(crate) fn classify(body: &str) -> BodyKind {
    let lower_head = body.split_whitespace().next().unwrap_or("");
    if lower_head.eq_ignore_ascii_case("@every") {
        BodyKind::Interval
    } else if lower_head.eq_ignore_ascii_case("@once") {
        BodyKind::Once
    } else if body.starts_with('@') {
        BodyKind::Alias
    } else {
        BodyKind::Cron
    }
}

/// Expand a case-insensitive alias to its five-field cron body; returns the
/// canonical lowercase alias name alongside.
pub(crate) fn expand_alias(alias: &str) -> Option<(&'static str, &'static str)> {
    const TABLE: [(&str, &str); 7] = [
        ("@yearly", "0 0 1 1 *"),
        ("@annually", "0 0 1 1 *"),
        ("@monthly", "0 0 1 * *"),
        ("@weekly", "0 0 * * 0"),
        ("@daily", "0 0 * * *"),
        ("@midnight", "0 0 * * *"),
        ("@hourly", "0 * * * *"),
    ];
    TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(alias))
        .map(|&(name, body)| (name, body))
}

fn structure(message: &str, value: &str) -> Diagnostic {
    Diagnostic::new(ErrorCode::Structure, message).with_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn split_plain_body() {
        let raw = split("*/5 * * * *").unwrap();
        assert_eq!(raw.timezone, None);
        assert_eq!(raw.body, "*/5 * * * *");
        assert_eq!(raw.options, None);
    }

    #[test]
    fn split_with_timezone() {
        let raw = split("TZ=America/New_York 30 2 * * *").unwrap();
        assert_eq!(raw.timezone, Some("America/New_York"));
        assert_eq!(raw.body, "30 2 * * *");
    }

    #[test]
    fn split_with_options() {
        let raw = split("0 0 * * * {max:3,tag:a+b}").unwrap();
        assert_eq!(raw.body, "0 0 * * *");
        assert_eq!(raw.options, Some("max:3,tag:a+b"));
    }

    #[test]
    fn split_with_everything() {
        let raw = split("  TZ=UTC @daily {jitter:30s}  ").unwrap();
        assert_eq!(raw.timezone, Some("UTC"));
        assert_eq!(raw.body, "@daily");
        assert_eq!(raw.options, Some("jitter:30s"));
    }

    #[test]
    fn split_pairs_last_close_with_nearest_open() {
        let raw = split("0 0 * * * {until:2026-01-01}").unwrap();
        assert_eq!(raw.options, Some("until:2026-01-01"));
    }

    #[rstest]
    #[case("0 0 * * * {max:1} trailing")]
    #[case("0 0 * * * }")]
    #[case("0 0 * * * {max:1")]
    #[case("TZ=UTC")]
    #[case("TZ= 0 0 * * *")]
    #[case("")]
    #[case("   ")]
    #[case("{max:1}")]
    fn split_rejects(#[case] input: &str) {
        let diagnostic = split(input).unwrap_err();
        assert_eq!(diagnostic.code, ErrorCode::Structure, "input = {input:?}");
    }

    #[rstest]
    #[case("@every 30s", BodyKind::Interval)]
    #[case("@every", BodyKind::Interval)]
    #[case("@EVERY 1h", BodyKind::Interval)]
    #[case("@once 2026-01-01T00:00:00Z", BodyKind::Once)]
    #[case("@once +4h", BodyKind::Once)]
    #[case("@daily", BodyKind::Alias)]
    #[case("@Hourly", BodyKind::Alias)]
    #[case("@nonsense", BodyKind::Alias)]
    #[case("*/5 * * * *", BodyKind::Cron)]
    #[case("0 0 1 1 *", BodyKind::Cron)]
    fn classification(#[case] body: &str, #[case] expected: BodyKind) {
        assert_eq!(classify(body), expected, "body = {body}");
    }

    #[rstest]
    #[case("@yearly", "0 0 1 1 *")]
    #[case("@annually", "0 0 1 1 *")]
    #[case("@monthly", "0 0 1 * *")]
    #[case("@weekly", "0 0 * * 0")]
    #[case("@daily", "0 0 * * *")]
    #[case("@midnight", "0 0 * * *")]
    #[case("@hourly", "0 * * * *")]
    #[case("@DAILY", "0 0 * * *")]
    fn alias_expansion(#[case] alias: &str, #[case] body: &str) {
        let (_, expanded) = expand_alias(alias).unwrap();
        assert_eq!(expanded, body);
    }

    #[test]
    fn unknown_alias_is_none() {
        assert!(expand_alias("@fortnightly").is_none());
    }
}

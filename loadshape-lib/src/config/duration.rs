use std::time::Duration;

use serde::{Deserialize, de::Error};

/// Human-friendly time parser.
///
/// Some examples are "10s", "1m 30s", "1m30s" and "1m_30s".
pub fn parse_humantime_str(s: &str) -> Result<Duration, humantime::DurationError> {
    let s = s.trim();
    if s.contains('_') {
        humantime::parse_duration(&s.replace('_', " "))
    } else {
        humantime::parse_duration(s)
    }
}

pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_humantime_str(&s).map_err(D::Error::custom)
}

pub(super) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.as_deref()
        .map(parse_humantime_str)
        .transpose()
        .map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_humantime_str() {
        for (input, expected_output) in [
            ("10s", Some(Duration::from_secs(10))),
            (" 2s ", Some(Duration::from_secs(2))),
            ("500ms", Some(Duration::from_millis(500))),
            ("1m 30s", Some(Duration::from_secs(90))),
            ("1m_30s", Some(Duration::from_secs(90))),
            ("2h", Some(Duration::from_secs(7200))),
            ("", None),
            ("ten seconds", None),
            ("10", None),
        ] {
            match (parse_humantime_str(input), expected_output) {
                (Ok(d), Some(expected)) => assert_eq!(d, expected, "input: {input:?}"),
                (Err(_), None) => (),
                (result, expected) => {
                    panic!("unexpected result for {input:?}: {result:?} (expected {expected:?})")
                }
            }
        }
    }
}

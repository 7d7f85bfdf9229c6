//! Time expressions accepted by the split operation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Frame rate assumed for `HH:MM:SS:FF` timecodes.
const TIMECODE_FPS: f64 = 30.0;

static TIMECODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{1,2}):(\d{1,2}):(\d{1,2})$").expect("valid regex"));
static HMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)$").expect("valid regex"));
static MS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{1,2}(?:\.\d+)?)$").expect("valid regex"));

/// A point in time given either as seconds or as a textual timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Seconds(f64),
    Text(String),
}

impl TimeSpec {
    pub fn to_seconds(&self) -> Result<f64> {
        match self {
            TimeSpec::Seconds(s) if s.is_finite() => Ok(*s),
            TimeSpec::Seconds(s) => Err(Error::validation(format!("Invalid time value: {s}"))),
            TimeSpec::Text(t) => parse_time_to_seconds(t),
        }
    }
}

impl From<f64> for TimeSpec {
    fn from(value: f64) -> Self {
        TimeSpec::Seconds(value)
    }
}

impl From<&str> for TimeSpec {
    fn from(value: &str) -> Self {
        TimeSpec::Text(value.to_string())
    }
}

/// Parse a timestamp into seconds.
///
/// Accepted forms: plain seconds (`"90"`, `"12.5"`), `MM:SS`, `HH:MM:SS`,
/// `HH:MM:SS.mmm` and `HH:MM:SS:FF` where `FF` is a frame at 30 fps.
pub fn parse_time_to_seconds(value: &str) -> Result<f64> {
    let value = value.trim();
    let invalid = || Error::validation(format!("Invalid time format: {value:?}"));

    if value.is_empty() {
        return Err(invalid());
    }

    if let Ok(secs) = value.parse::<f64>() {
        return if secs.is_finite() { Ok(secs) } else { Err(invalid()) };
    }

    let num = |s: &str| s.parse::<f64>().map_err(|_| invalid());

    if let Some(caps) = TIMECODE_RE.captures(value) {
        let frames = num(&caps[4])?;
        if frames >= TIMECODE_FPS {
            return Err(invalid());
        }
        return Ok(num(&caps[1])? * 3600.0
            + num(&caps[2])? * 60.0
            + num(&caps[3])?
            + frames / TIMECODE_FPS);
    }

    if let Some(caps) = HMS_RE.captures(value) {
        return Ok(num(&caps[1])? * 3600.0 + num(&caps[2])? * 60.0 + num(&caps[3])?);
    }

    if let Some(caps) = MS_RE.captures(value) {
        return Ok(num(&caps[1])? * 60.0 + num(&caps[2])?);
    }

    Err(invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_plain_seconds() {
        assert!(approx(parse_time_to_seconds("90").unwrap(), 90.0));
        assert!(approx(parse_time_to_seconds(" 12.5 ").unwrap(), 12.5));
    }

    #[test]
    fn test_clock_forms() {
        assert!(approx(parse_time_to_seconds("01:30").unwrap(), 90.0));
        assert!(approx(parse_time_to_seconds("01:00:05").unwrap(), 3605.0));
        assert!(approx(parse_time_to_seconds("00:00:01.250").unwrap(), 1.25));
    }

    #[test]
    fn test_timecode_frames() {
        assert!(approx(parse_time_to_seconds("00:00:10:15").unwrap(), 10.5));
        assert!(parse_time_to_seconds("00:00:10:30").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_time_to_seconds("").is_err());
        assert!(parse_time_to_seconds("abc").is_err());
        assert!(parse_time_to_seconds("1:2:3:4:5").is_err());
        assert!(parse_time_to_seconds("NaN").is_err());
    }

    #[test]
    fn test_time_spec_deserializes_number_or_string() {
        let n: TimeSpec = serde_json::from_str("42").unwrap();
        let s: TimeSpec = serde_json::from_str("\"00:00:42\"").unwrap();
        assert!(approx(n.to_seconds().unwrap(), 42.0));
        assert!(approx(s.to_seconds().unwrap(), 42.0));
    }
}

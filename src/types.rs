use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Deserialize;

/// How long a runner may spend trying to claim its resources.
///
/// Written in config as `"none"` / `"unbounded"` or a duration such as
/// `"60s"`, `"250ms"`, `"2m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum AcquireTimeout {
    /// Keep retrying until the resources become available.
    Unbounded,
    /// Fail with a resource-acquisition timeout after this long.
    After(Duration),
}

impl AcquireTimeout {
    /// Deadline for an execution that started at `start`, if any.
    ///
    /// A limit too large to represent as an `Instant` has no deadline.
    pub fn deadline(self, start: Instant) -> Option<Instant> {
        match self {
            AcquireTimeout::Unbounded => None,
            AcquireTimeout::After(limit) => start.checked_add(limit),
        }
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            AcquireTimeout::Unbounded => None,
            AcquireTimeout::After(limit) => Some(limit),
        }
    }
}

impl Default for AcquireTimeout {
    fn default() -> Self {
        AcquireTimeout::After(Duration::from_secs(60))
    }
}

impl From<Duration> for AcquireTimeout {
    fn from(limit: Duration) -> Self {
        AcquireTimeout::After(limit)
    }
}

impl FromStr for AcquireTimeout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "unbounded" => Ok(AcquireTimeout::Unbounded),
            other => parse_duration(other).map(AcquireTimeout::After),
        }
    }
}

impl TryFrom<String> for AcquireTimeout {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for AcquireTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireTimeout::Unbounded => f.write_str("unbounded"),
            AcquireTimeout::After(limit) => write!(f, "{}ms", limit.as_millis()),
        }
    }
}

/// A `Duration` read from a human-friendly string (`"5ms"`, `"3s"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct HumanDuration(pub Duration);

impl TryFrom<String> for HumanDuration {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_duration(&value).map(HumanDuration)
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

/// Parse `<digits><unit>` where unit is one of `ms`, `s`, `m`, `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}

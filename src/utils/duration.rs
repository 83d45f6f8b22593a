//! Duration strings in the `1h30m`, `250ms`, `2.5s` style plus the
//! `infinity` keyword used by timeout settings.

use std::fmt;
use std::time::Duration;

/// Parse a sequence of `<number><unit>` pairs. Units: `ns`, `us`, `µs`, `ms`,
/// `s`, `m`, `h`. `"0"` is accepted on its own.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = input;

    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {input:?}: expected number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}: bad number"))?;
        rest = &rest[number_len..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(format!("invalid duration {input:?}: missing unit")),
            other => return Err(format!("invalid duration {input:?}: unknown unit {other:?}")),
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("invalid duration {input:?}: out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// A timeout knob: unset (proxy default), explicitly disabled, or a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    #[default]
    Default,
    Infinite,
    After(Duration),
}

impl Timeout {
    /// Parse `""` (default), `infinity`/`infinite` or a duration string.
    pub fn parse(input: &str) -> Result<Self, String> {
        match input.trim() {
            "" => Ok(Self::Default),
            "infinity" | "infinite" => Ok(Self::Infinite),
            other => parse_duration(other).map(Self::After),
        }
    }

    /// Envoy disables a timeout with an explicit zero.
    pub fn to_proto(self) -> Option<envoy_types::pb::google::protobuf::Duration> {
        match self {
            Self::Default => None,
            Self::Infinite => Some(proto_duration(Duration::ZERO)),
            Self::After(d) => Some(proto_duration(d)),
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Infinite => write!(f, "infinity"),
            Self::After(d) => write!(f, "{:?}", d),
        }
    }
}

/// Convert to the protobuf well-known duration.
pub fn proto_duration(d: Duration) -> envoy_types::pb::google::protobuf::Duration {
    envoy_types::pb::google::protobuf::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

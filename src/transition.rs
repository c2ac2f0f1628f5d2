//! Transition kinds.
//!
//! The same tag describes both "which crossing fired" and a group's initial
//! trigger policy. Values are encoded with the platform's numeric codes so the
//! persisted layout stays readable by other bridge implementations.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A geofence crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransitionKind {
    Enter,
    Exit,
    Dwell,
    Unknown,
}

impl TransitionKind {
    /// Every kind that can actually fire.
    pub const ALL: [Self; 3] = [Self::Enter, Self::Exit, Self::Dwell];

    /// Platform numeric code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Enter => 1,
            Self::Exit => 2,
            Self::Dwell => 4,
            Self::Unknown => -1,
        }
    }

    /// Parses a platform code; anything unrecognised becomes `Unknown`.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Enter,
            2 => Self::Exit,
            4 => Self::Dwell,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Dwell => "dwell",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl Serialize for TransitionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

struct TransitionKindVisitor;

impl<'de> Visitor<'de> for TransitionKindVisitor {
    type Value = TransitionKind;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a transition code (1, 2, 4) or its string form")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(TransitionKind::from_code(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(i64::try_from(v).map_or(TransitionKind::Unknown, TransitionKind::from_code))
    }

    // Bridges hand numbers over as doubles.
    #[allow(clippy::cast_possible_truncation)]
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v.fract() == 0.0 && v.is_finite() {
            Ok(TransitionKind::from_code(v as i64))
        } else {
            Ok(TransitionKind::Unknown)
        }
    }

    // JSON object keys arrive as strings.
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v.trim() {
            "ENTER" | "enter" => Ok(TransitionKind::Enter),
            "EXIT" | "exit" => Ok(TransitionKind::Exit),
            "DWELL" | "dwell" => Ok(TransitionKind::Dwell),
            other => other
                .parse::<i64>()
                .map(TransitionKind::from_code)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for TransitionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TransitionKindVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for kind in TransitionKind::ALL {
            assert_eq!(TransitionKind::from_code(kind.code()), kind);
        }
        assert_eq!(TransitionKind::from_code(3), TransitionKind::Unknown);
    }

    #[test]
    fn test_serializes_as_number_in_arrays() {
        let json = serde_json::to_string(&vec![TransitionKind::Enter, TransitionKind::Exit]).unwrap();
        assert_eq!(json, "[1,2]");
        let back: Vec<TransitionKind> = serde_json::from_str("[1.0, 4]").unwrap();
        assert_eq!(back, vec![TransitionKind::Enter, TransitionKind::Dwell]);
    }

    #[test]
    fn test_serializes_as_string_key_in_maps() {
        let mut map = BTreeMap::new();
        map.insert(TransitionKind::Exit, true);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"2":true}"#);
        let back: BTreeMap<TransitionKind, bool> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_accepts_names() {
        let kind: TransitionKind = serde_json::from_str(r#""ENTER""#).unwrap();
        assert_eq!(kind, TransitionKind::Enter);
        assert!(serde_json::from_str::<TransitionKind>(r#""sideways""#).is_err());
    }
}

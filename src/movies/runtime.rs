/// Movie running time in minutes, written as `"<n> mins"` on the wire
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid runtime format")]
pub struct RuntimeFormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runtime(pub i32);

impl Runtime {
    pub fn minutes(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

/// Exactly two space-separated parts, the second being `mins`
impl FromStr for Runtime {
    type Err = RuntimeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(' ').collect();
        if parts.len() != 2 || parts[1] != "mins" {
            return Err(RuntimeFormatError);
        }
        parts[0]
            .parse::<i32>()
            .map(Runtime)
            .map_err(|_| RuntimeFormatError)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct RuntimeVisitor;

impl<'de> de::Visitor<'de> for RuntimeVisitor {
    type Value = Runtime;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string such as \"102 mins\"")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Runtime, E> {
        v.parse().map_err(E::custom)
    }

    // bare numbers are rejected with the same error as bad strings
    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Runtime, E> {
        Err(E::custom(RuntimeFormatError))
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Runtime, E> {
        Err(E::custom(RuntimeFormatError))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Runtime, E> {
        Err(E::custom(RuntimeFormatError))
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RuntimeVisitor)
    }
}

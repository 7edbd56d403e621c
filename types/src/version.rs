use std::fmt;

use serde::{de, ser};

/// JSON-RPC protocol version.
///
/// Version 2.0 is what the link emits; 1.0 is tolerated on input.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Version {
    /// JSON-RPC 1.0
    V1_0,
    /// JSON-RPC 2.0
    V2_0,
}

impl Default for Version {
    fn default() -> Self {
        Version::V2_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::V1_0 => f.write_str("1.0"),
            Version::V2_0 => f.write_str("2.0"),
        }
    }
}

impl ser::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        match self {
            Version::V1_0 => serializer.serialize_str("1.0"),
            Version::V2_0 => serializer.serialize_str("2.0"),
        }
    }
}

impl<'a> de::Deserialize<'a> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: de::Deserializer<'a>,
    {
        deserializer.deserialize_identifier(VersionVisitor)
    }
}

struct VersionVisitor;
impl<'a> de::Visitor<'a> for VersionVisitor {
    type Value = Version;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match value {
            "1.0" => Ok(Version::V1_0),
            "2.0" => Ok(Version::V2_0),
            _ => Err(de::Error::custom("Invalid JSON-RPC protocol version")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_serialization() {
        assert_eq!(serde_json::to_string(&Version::V2_0).unwrap(), r#""2.0""#);
        assert_eq!(serde_json::to_string(&Version::V1_0).unwrap(), r#""1.0""#);

        let v: Version = serde_json::from_str(r#""2.0""#).unwrap();
        assert_eq!(v, Version::V2_0);
        let v: Version = serde_json::from_str(r#""1.0""#).unwrap();
        assert_eq!(v, Version::V1_0);
        assert!(serde_json::from_str::<Version>(r#""3.0""#).is_err());
    }
}

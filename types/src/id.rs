use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation id of a JSON-RPC call.
///
/// Everything this stack emits is numeric (32 bits, wrap is fine: an id only
/// has to be unique among the currently outstanding calls). String ids are
/// accepted on input because JSON-RPC 1.0 peers may produce them, but they
/// never match a pending call.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric id
    Num(u32),
    /// String id
    Str(String),
}

impl Id {
    /// If the `Id` is a number, returns the associated number. Returns None
    /// otherwise.
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Id::Num(id) => Some(*id),
            _ => None,
        }
    }

    /// If the `Id` is a string, returns the associated str. Returns None
    /// otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Id::Str(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Num(id) => write!(f, "{}", id),
            Id::Str(id) => f.write_str(id),
        }
    }
}

impl From<u32> for Id {
    fn from(id: u32) -> Self {
        Id::Num(id)
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Id::Str(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_serialization() {
        let cases = vec![
            (Id::Num(0), r#"0"#),
            (Id::Num(4294967295), r#"4294967295"#),
            (Id::Str("test".into()), r#""test""#),
        ];

        for (id, expect) in cases {
            assert_eq!(serde_json::to_string(&id).unwrap(), expect);
            assert_eq!(id, serde_json::from_str(expect).unwrap());
        }
    }
}

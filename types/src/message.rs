use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Id, Version};

/// The JSON-RPC message envelope.
///
/// A message is a *response* iff `id` is set and one of `result`/`error` is
/// set while `designator` and `params` are absent; anything else is a call
/// (a request when `id` is set, a notification otherwise).
///
/// The designator is the fully qualified method name,
/// `[callsign[.version]].method[@index]`; it is emitted under the wire name
/// `method` and the alias `designator` is accepted on input.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version; absent on JSON-RPC 1.0 peers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<Version>,
    /// Correlation id; absent on notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    /// Fully qualified method name.
    #[serde(rename = "method", alias = "designator", skip_serializing_if = "Option::is_none")]
    pub designator: Option<String>,
    /// Call parameters, opaque to the link.
    #[serde(rename = "params", skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Response error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).expect("`Message` is serializable");
        write!(f, "{}", json)
    }
}

impl Message {
    /// Creates a method call with the given id and designator.
    pub fn call(id: u32, designator: impl Into<String>, parameters: Option<Value>) -> Self {
        Message {
            jsonrpc: Some(Version::V2_0),
            id: Some(Id::Num(id)),
            designator: Some(designator.into()),
            parameters,
            result: None,
            error: None,
        }
    }

    /// Creates a notification (a call without an id).
    pub fn notification(designator: impl Into<String>, parameters: Option<Value>) -> Self {
        Message {
            jsonrpc: Some(Version::V2_0),
            id: None,
            designator: Some(designator.into()),
            parameters,
            result: None,
            error: None,
        }
    }

    /// Creates a success response for the given id.
    pub fn response(id: Id, result: Value) -> Self {
        Message {
            jsonrpc: Some(Version::V2_0),
            id: Some(id),
            designator: None,
            parameters: None,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failure response for the given id.
    pub fn failure(id: Id, error: Error) -> Self {
        Message {
            jsonrpc: Some(Version::V2_0),
            id: Some(id),
            designator: None,
            parameters: None,
            result: None,
            error: Some(error),
        }
    }

    /// True when this envelope is a response to an outstanding call.
    pub fn is_response(&self) -> bool {
        self.id.is_some()
            && (self.result.is_some() || self.error.is_some())
            && self.designator.is_none()
            && self.parameters.is_none()
    }

    /// True when this envelope is a notification (call without an id).
    pub fn is_notification(&self) -> bool {
        !self.is_response() && self.id.is_none()
    }

    /// The callsign part of the designator: every dotted segment before the
    /// method, minus a trailing numeric version segment.
    pub fn callsign(&self) -> Option<String> {
        let (callsign, _, _) = split_designator(self.designator.as_deref()?);
        if callsign.is_empty() {
            None
        } else {
            Some(callsign.to_string())
        }
    }

    /// The numeric version segment of the designator, if present.
    pub fn version(&self) -> Option<u8> {
        let (_, version, _) = split_designator(self.designator.as_deref()?);
        version
    }

    /// The method name: the last dotted segment, `@index` stripped.
    pub fn method(&self) -> Option<&str> {
        let (_, _, method) = split_designator(self.designator.as_deref()?);
        Some(match method.find('@') {
            Some(at) => &method[..at],
            None => method,
        })
    }

    /// The property index following `@`, if any.
    pub fn index(&self) -> Option<&str> {
        let (_, _, method) = split_designator(self.designator.as_deref()?);
        method.find('@').map(|at| &method[at + 1..])
    }

    /// The `callsign[.version]` prefix used to match inbound events against
    /// a link's local namespace. Empty when the designator is bare.
    pub fn namespace(&self) -> String {
        match self.designator.as_deref() {
            None => String::new(),
            Some(designator) => {
                let (callsign, version, _) = split_designator(designator);
                match version {
                    None => callsign.to_string(),
                    Some(version) if callsign.is_empty() => version.to_string(),
                    Some(version) => format!("{}.{}", callsign, version),
                }
            }
        }
    }
}

/// Splits a designator into (callsign, version, method-with-index).
fn split_designator(designator: &str) -> (&str, Option<u8>, &str) {
    let (prefix, method) = match designator.rfind('.') {
        Some(dot) => (&designator[..dot], &designator[dot + 1..]),
        None => ("", designator),
    };
    let (callsign, version) = match prefix.rfind('.') {
        Some(dot) => match prefix[dot + 1..].parse::<u8>() {
            Ok(version) => (&prefix[..dot], Some(version)),
            Err(_) => (prefix, None),
        },
        None => match prefix.parse::<u8>() {
            Ok(version) => ("", Some(version)),
            Err(_) => (prefix, None),
        },
    };
    (callsign, version, method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn classification() {
        let response: Message = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(response.is_response());
        assert!(!response.is_notification());

        let failure: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Unknown method"}}"#)
                .unwrap();
        assert!(failure.is_response());
        assert_eq!(failure.error.as_ref().unwrap().code, ErrorCode::METHOD_NOT_FOUND);

        let event: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"tmp1.statechange","params":{"state":"Activated"}}"#)
                .unwrap();
        assert!(!event.is_response());
        assert!(event.is_notification());

        let request: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"method":"tmp1.ping"}"#).unwrap();
        assert!(!request.is_response());
        assert!(!request.is_notification());
    }

    #[test]
    fn designator_split() {
        let msg = Message::call(1, "Foo.1.status", None);
        assert_eq!(msg.callsign(), Some("Foo".to_string()));
        assert_eq!(msg.version(), Some(1));
        assert_eq!(msg.method(), Some("status"));
        assert_eq!(msg.index(), None);
        assert_eq!(msg.namespace(), "Foo.1");

        let msg = Message::call(2, "Bar.Nested.2.value@3", None);
        assert_eq!(msg.callsign(), Some("Bar.Nested".to_string()));
        assert_eq!(msg.version(), Some(2));
        assert_eq!(msg.method(), Some("value"));
        assert_eq!(msg.index(), Some("3"));

        let msg = Message::notification("statechange", None);
        assert_eq!(msg.callsign(), None);
        assert_eq!(msg.version(), None);
        assert_eq!(msg.method(), Some("statechange"));
        assert_eq!(msg.namespace(), "");
    }

    #[test]
    fn designator_alias_accepted() {
        let msg: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"designator":"Foo.status"}"#).unwrap();
        assert_eq!(msg.designator.as_deref(), Some("Foo.status"));
        // but the wire name on output is `method`
        assert!(serde_json::to_string(&msg).unwrap().contains(r#""method":"Foo.status""#));
    }

    #[test]
    fn version_tolerance() {
        let msg: Message = serde_json::from_str(r#"{"id":1,"result":true}"#).unwrap();
        assert_eq!(msg.jsonrpc, None);
        assert!(msg.is_response());

        let msg: Message = serde_json::from_str(r#"{"jsonrpc":"1.0","id":1,"result":true}"#).unwrap();
        assert_eq!(msg.jsonrpc, Some(Version::V1_0));
    }
}

//! Wire frames of the DevTools protocol.
//!
//! Commands are `{id, method, params, sessionId?}`, responses are
//! `{id, result | error}` and events are `{method, params, sessionId?}`
//! with no id. A frame carrying an id is always a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use rein_core::{ReinError, Result};

/// An outgoing command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// An unsolicited notification from the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CdpEvent {
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
}

/// A decoded incoming frame.
#[derive(Debug)]
pub enum Incoming {
    Response { id: u64, outcome: Result<Value> },
    Event(CdpEvent),
}

/// Decode one text frame. Returns `None` for frames that are neither a
/// response nor an event.
pub fn decode(text: &str) -> Result<Option<Incoming>> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if let Some(id) = raw.id {
        let outcome = match raw.error {
            Some(err) => Err(ReinError::Protocol {
                code: err.code,
                message: err.message,
            }),
            None => Ok(raw.result.unwrap_or(Value::Null)),
        };
        return Ok(Some(Incoming::Response { id, outcome }));
    }

    Ok(raw.method.map(|method| {
        Incoming::Event(CdpEvent {
            method,
            params: raw.params.unwrap_or(Value::Null),
            session_id: raw.session_id,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_response() {
        let frame = decode(r#"{"id":4,"result":{"frameId":"F"}}"#).unwrap().unwrap();
        match frame {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, 4);
                assert_eq!(outcome.unwrap()["frameId"], "F");
            }
            Incoming::Event(_) => panic!("response decoded as event"),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let frame = decode(r#"{"id":9,"error":{"code":-32000,"message":"No node"}}"#)
            .unwrap()
            .unwrap();
        match frame {
            Incoming::Response { outcome, .. } => match outcome {
                Err(ReinError::Protocol { code, message }) => {
                    assert_eq!(code, -32000);
                    assert_eq!(message, "No node");
                }
                other => panic!("unexpected outcome: {other:?}"),
            },
            Incoming::Event(_) => panic!("response decoded as event"),
        }
    }

    #[test]
    fn test_decode_event_with_session() {
        let frame = decode(
            r#"{"method":"Page.lifecycleEvent","params":{"name":"load"},"sessionId":"S1"}"#,
        )
        .unwrap()
        .unwrap();
        match frame {
            Incoming::Event(ev) => {
                assert_eq!(ev.method, "Page.lifecycleEvent");
                assert_eq!(ev.session_id.as_deref(), Some("S1"));
                assert_eq!(ev.str_param("name"), Some("load"));
            }
            Incoming::Response { .. } => panic!("event decoded as response"),
        }
    }

    #[test]
    fn test_frame_with_id_and_method_is_response() {
        let frame = decode(r#"{"id":1,"method":"Weird.echo","result":{}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Incoming::Response { id: 1, .. }));
    }

    #[test]
    fn test_command_frame_omits_missing_session() {
        let params = json!({"url": "about:blank"});
        let frame = CommandFrame {
            id: 1,
            method: "Page.navigate",
            params: &params,
            session_id: None,
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(!text.contains("sessionId"));
    }
}

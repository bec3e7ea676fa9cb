use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CorrelationId, Result, RpcError};

/// Status code of a successful result.
pub const STATUS_SUCCESS: i64 = 0;

/// Status code used for every failure this crate produces.
pub const STATUS_FAILURE: i64 = -1;

/// Status text of a successful result.
pub const SUCCESS_TEXT: &str = "success";

/// Wire form of a timeout: whole milliseconds, rounded up so that a non-zero
/// duration never becomes zero, saturating at `u64::MAX`.
pub(crate) fn timeout_millis(timeout: Duration) -> u64 {
    // ---
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// A call issued to the remote handler table.
///
/// `id` and `timeout` may be left unset when handing the message to
/// [`Correlator::request`](crate::Correlator::request); both are filled in
/// before transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    // ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,

    /// Method name, looked up in the remote handler table.
    pub name: String,

    /// Argument list, normally a JSON array.
    #[serde(default)]
    pub data: Value,

    /// Deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl CallMessage {
    /// Create a call message without id or timeout.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            data,
            timeout: None,
        }
    }

    /// Use an explicit id instead of a generated one.
    pub fn with_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Override the correlator's default timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout_millis(timeout));
        self
    }
}

/// The outcome of a call, sent back by the peer that ran the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    // ---
    /// Id of the call being answered. Required on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,

    /// Method name echoed from the call.
    pub name: String,

    /// Returned value; `null` on failure.
    #[serde(default)]
    pub data: Value,

    /// [`STATUS_SUCCESS`] or an error code.
    pub code: i64,

    /// `"success"` or the error text.
    pub message: String,
}

impl ResultMessage {
    /// Successful result carrying the handler's return value.
    pub fn success(id: CorrelationId, name: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            data,
            code: STATUS_SUCCESS,
            message: SUCCESS_TEXT.to_string(),
        }
    }

    /// Failed result with code [`STATUS_FAILURE`] and a `null` payload.
    pub fn failure(id: CorrelationId, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            data: Value::Null,
            code: STATUS_FAILURE,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == STATUS_SUCCESS
    }

    /// Convert into the value a caller observes.
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(RpcError::Remote {
                code: self.code,
                message: self.message,
            })
        }
    }
}

/// Either shape, discriminated on the wire by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(CallMessage),
    Response(ResultMessage),
}

impl Message {
    /// Id carried by either shape.
    pub fn id(&self) -> Option<&CorrelationId> {
        match self {
            Message::Request(call) => call.id.as_ref(),
            Message::Response(result) => result.id.as_ref(),
        }
    }

    /// Method name carried by either shape.
    pub fn name(&self) -> &str {
        match self {
            Message::Request(call) => &call.name,
            Message::Response(result) => &result.name,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    /// Decode a message from an untyped JSON value.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Protocol` when the `type` discriminator is missing
    /// or unknown, or when the body does not match the announced shape.
    pub fn from_value(value: Value) -> Result<Self> {
        // ---
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => return Err(RpcError::Protocol(format!("bad request:{other}"))),
            None => return Err(RpcError::Protocol("bad request:undefined".into())),
        };

        match kind.as_str() {
            "request" | "response" => serde_json::from_value(value)
                .map_err(|err| RpcError::Protocol(format!("malformed {kind}: {err}"))),
            other => Err(RpcError::Protocol(format!("bad request:{other}"))),
        }
    }

    /// Decode a message from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Protocol` if the bytes are not JSON or do not
    /// describe a message (see [`Message::from_value`]).
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        // ---
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| RpcError::Protocol(format!("undecodable message: {err}")))?;
        Self::from_value(value)
    }

    /// Encode the message as JSON bytes.
    pub fn to_json(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

impl From<CallMessage> for Message {
    fn from(call: CallMessage) -> Self {
        Message::Request(call)
    }
}

impl From<ResultMessage> for Message {
    fn from(result: ResultMessage) -> Self {
        Message::Response(result)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_wire_shape() {
        // ---
        let call = CallMessage::new("echo", json!(["hi"]))
            .with_id("c-1")
            .with_timeout(Duration::from_millis(250));

        let value = serde_json::to_value(Message::from(call)).unwrap();
        assert_eq!(
            value,
            json!({"type": "request", "id": "c-1", "name": "echo", "data": ["hi"], "timeout": 250})
        );
    }

    #[test]
    fn test_timeout_millis_rounding() {
        // ---
        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_micros(500)), 1);
        assert_eq!(timeout_millis(Duration::from_micros(1500)), 2);
        assert_eq!(timeout_millis(Duration::from_millis(250)), 250);
        assert_eq!(timeout_millis(Duration::MAX), u64::MAX);

        let call = CallMessage::new("x", json!([])).with_timeout(Duration::from_micros(1));
        assert_eq!(call.timeout, Some(1));
    }

    #[test]
    fn test_result_wire_shape() {
        // ---
        let result = ResultMessage::failure("c-2".into(), "echo", "boom");
        let value = serde_json::to_value(Message::from(result)).unwrap();
        assert_eq!(
            value,
            json!({"type": "response", "id": "c-2", "name": "echo", "data": null, "code": -1, "message": "boom"})
        );
    }

    #[test]
    fn test_decode_response_without_data() {
        // ---
        let msg = Message::from_json(
            br#"{"type":"response","id":"x","name":"say","code":0,"message":"success"}"#,
        )
        .unwrap();

        match msg {
            Message::Response(result) => {
                assert!(result.is_success());
                assert_eq!(result.data, Value::Null);
                assert_eq!(result.id, Some(CorrelationId::from("x")));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_missing_type() {
        // ---
        let err = Message::from_value(json!({"id": "x", "name": "say"})).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref m) if m == "bad request:undefined"));
    }

    #[test]
    fn test_decode_unknown_type() {
        // ---
        let err = Message::from_value(json!({"type": "notify", "name": "say"})).unwrap_err();
        assert_eq!(err.to_string(), "bad request:notify");
    }

    #[test]
    fn test_decode_malformed_body() {
        // ---
        let err = Message::from_value(json!({"type": "response", "id": "x"})).unwrap_err();
        assert!(err.to_string().starts_with("malformed response"));
    }

    #[test]
    fn test_decode_garbage() {
        // ---
        let err = Message::from_json(b"not json").unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn test_into_result() {
        // ---
        let ok = ResultMessage::success("a".into(), "echo", json!("hi"));
        assert_eq!(ok.into_result().unwrap(), json!("hi"));

        let err = ResultMessage::failure("a".into(), "echo", "nope")
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "nope (-1)");
    }
}

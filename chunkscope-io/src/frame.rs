//! Response framing: a JSON header line, optionally followed by raw bytes.

use crate::protocol::ApiResponse;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// A decoded response: the header and the binary payload, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub header: ApiResponse,
    pub payload: Option<Bytes>,
}

impl ApiReply {
    #[must_use]
    pub fn new(header: ApiResponse, payload: Option<Bytes>) -> Self {
        Self { header, payload }
    }

    /// Payload bytes, empty when the response carried none.
    #[must_use]
    pub fn payload_or_empty(&self) -> Bytes {
        self.payload.clone().unwrap_or_default()
    }
}

/// Split a response body at the first newline.
#[must_use]
pub fn split_frame(body: &Bytes) -> (Bytes, Option<Bytes>) {
    match body.iter().position(|&b| b == b'\n') {
        Some(pos) => (body.slice(..pos), Some(body.slice(pos + 1..))),
        None => (body.clone(), None),
    }
}

/// Decode a framed response body.
///
/// # Errors
/// Returns an error if the header is not a valid response message.
pub fn decode_reply(body: &Bytes) -> Result<ApiReply> {
    let (header, payload) = split_frame(body);
    if header.is_empty() {
        return Err(Error::Protocol("empty response header".to_string()));
    }
    let header: ApiResponse = serde_json::from_slice(&header)?;
    Ok(ApiReply { header, payload })
}

/// Encode a response into the wire framing.
///
/// # Errors
/// Returns an error if the header cannot be serialized.
pub fn encode_reply(reply: &ApiReply) -> Result<Bytes> {
    let header = serde_json::to_vec(&reply.header)?;
    let payload_len = reply.payload.as_ref().map_or(0, Bytes::len);
    let mut out = BytesMut::with_capacity(header.len() + 1 + payload_len);
    out.put_slice(&header);
    if let Some(payload) = &reply.payload {
        out.put_u8(b'\n');
        out.put_slice(payload);
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_may_contain_newlines() {
        let body = Bytes::from_static(b"{\"type\":\"readFileResponse\"}\nab\ncd");
        let reply = decode_reply(&body).unwrap();
        assert_eq!(reply.header, ApiResponse::ReadFileResponse);
        assert_eq!(reply.payload.unwrap(), Bytes::from_static(b"ab\ncd"));
    }

    #[test]
    fn header_only_has_no_payload() {
        let body = Bytes::from(
            serde_json::to_vec(&json!({"type": "serviceQueryResponse", "result": {"ok": true}}))
                .unwrap(),
        );
        let reply = decode_reply(&body).unwrap();
        assert!(reply.payload.is_none());
        assert_eq!(reply.payload_or_empty().len(), 0);
    }

    #[test]
    fn encode_then_decode_keeps_binary_payload() {
        let reply = ApiReply::new(
            ApiResponse::ReadFileResponse,
            Some(Bytes::from(vec![0u8, 10, 255, 10])),
        );
        let decoded = decode_reply(&encode_reply(&reply).unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn garbage_header_is_rejected() {
        assert!(decode_reply(&Bytes::from_static(b"not json\n")).is_err());
        assert!(decode_reply(&Bytes::from_static(b"\npayload")).is_err());
    }
}

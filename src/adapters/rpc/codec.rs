//! Binary RPC frame codec.
//!
//! Every frame is a fixed 16-byte header followed by a body.
//!
//! # Header Format (16 bytes)
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!    /              |               |               |               |
//!   |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
//!   +---------------+---------------+---------------+---------------+
//!  0| Magic (0x08)  | Version       | Message type  | Status        |
//!   +---------------+---------------+---------------+---------------+
//!  4| Sequence                                                      |
//!   |                                                               |
//!   +---------------+---------------+---------------+---------------+
//! 12| Body length                                                   |
//!   +---------------+---------------+---------------+---------------+
//! ```
//!
//! All integers are big-endian. Message type is 0 for requests and 1 for
//! responses; status is 0 for success and 1 for error and is always 0 on
//! requests.
//!
//! # Body Format
//!
//! ```text
//! Request:  method length (u16) | method (UTF-8) | JSON payload
//! Response: JSON payload when status is 0, UTF-8 error message otherwise
//! ```

use super::{HEADER_SIZE, MAX_BODY_LEN, RPC_MAGIC, RPC_VERSION};
use crate::adapters::DecodeResult;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            other => Err(other),
        }
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcStatus {
    Ok = 0,
    Error = 1,
}

impl TryFrom<u8> for RpcStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(RpcStatus::Ok),
            1 => Ok(RpcStatus::Error),
            other => Err(other),
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub status: RpcStatus,
    pub seq: u64,
    pub body_len: u32,
}

impl FrameHeader {
    /// Parse a header from at least [`HEADER_SIZE`] bytes.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < HEADER_SIZE {
            return Err("header too short".to_string());
        }
        if data[0] != RPC_MAGIC {
            return Err(format!("invalid magic: 0x{:02x}", data[0]));
        }
        if data[1] != RPC_VERSION {
            return Err(format!("unsupported version: {}", data[1]));
        }
        let message_type = MessageType::try_from(data[2])
            .map_err(|t| format!("invalid message type: {}", t))?;
        let status =
            RpcStatus::try_from(data[3]).map_err(|s| format!("invalid status: {}", s))?;

        let mut rest = &data[4..HEADER_SIZE];
        let seq = rest.get_u64();
        let body_len = rest.get_u32();

        Ok(Self {
            message_type,
            status,
            seq,
            body_len,
        })
    }

    /// Append the encoded header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(RPC_MAGIC);
        dst.put_u8(RPC_VERSION);
        dst.put_u8(self.message_type as u8);
        dst.put_u8(self.status as u8);
        dst.put_u64(self.seq);
        dst.put_u32(self.body_len);
    }
}

/// Split one frame of the expected type off the front of `buf`.
///
/// Leaves `buf` untouched unless a complete frame is returned.
fn decode_frame(buf: &mut BytesMut, expected: MessageType) -> DecodeResult<(FrameHeader, Bytes)> {
    if buf.len() < HEADER_SIZE {
        // Reject a foreign first byte without waiting for a full header.
        if buf.first().is_some_and(|b| *b != RPC_MAGIC) {
            return DecodeResult::Invalid(format!("invalid magic: 0x{:02x}", buf[0]));
        }
        return DecodeResult::Incomplete;
    }

    let header = match FrameHeader::parse(&buf[..]) {
        Ok(h) => h,
        Err(e) => return DecodeResult::Invalid(e),
    };
    if header.message_type != expected {
        return DecodeResult::Invalid(format!(
            "unexpected message type {:?}",
            header.message_type
        ));
    }

    let body_len = header.body_len as usize;
    if body_len > MAX_BODY_LEN {
        return DecodeResult::Invalid(format!(
            "body length {} exceeds limit {}",
            body_len, MAX_BODY_LEN
        ));
    }

    let total = HEADER_SIZE + body_len;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return DecodeResult::Incomplete;
    }

    let mut frame = buf.split_to(total);
    frame.advance(HEADER_SIZE);
    DecodeResult::Complete((header, frame.freeze()))
}

/// A call from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub seq: u64,
    pub method: String,
    pub payload: Bytes,
}

impl RpcRequest {
    /// Create a request.
    pub fn new(seq: u64, method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            method: method.into(),
            payload: payload.into(),
        }
    }

    /// Decode one request from the front of `buf`.
    pub fn decode(buf: &mut BytesMut) -> DecodeResult<Self> {
        let (header, mut body) = match decode_frame(buf, MessageType::Request) {
            DecodeResult::Complete(frame) => frame,
            DecodeResult::Incomplete => return DecodeResult::Incomplete,
            DecodeResult::Invalid(e) => return DecodeResult::Invalid(e),
        };

        if body.len() < 2 {
            return DecodeResult::Invalid("missing method length".to_string());
        }
        let method_len = body.get_u16() as usize;
        if body.len() < method_len {
            return DecodeResult::Invalid(format!(
                "method length {} exceeds body",
                method_len
            ));
        }
        let method = body.split_to(method_len);
        let method = match std::str::from_utf8(&method) {
            Ok(m) => m.to_string(),
            Err(_) => return DecodeResult::Invalid("method is not valid UTF-8".to_string()),
        };

        DecodeResult::Complete(Self {
            seq: header.seq,
            method,
            payload: body,
        })
    }

    /// Append the encoded request to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), String> {
        let method_len = u16::try_from(self.method.len())
            .map_err(|_| format!("method name too long: {} bytes", self.method.len()))?;
        let body_len = 2 + self.method.len() + self.payload.len();
        if body_len > MAX_BODY_LEN {
            return Err(format!("request body too large: {} bytes", body_len));
        }

        FrameHeader {
            message_type: MessageType::Request,
            status: RpcStatus::Ok,
            seq: self.seq,
            body_len: body_len as u32,
        }
        .write(dst);
        dst.reserve(body_len);
        dst.put_u16(method_len);
        dst.put_slice(self.method.as_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// A reply from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub seq: u64,
    pub status: RpcStatus,
    pub body: Bytes,
}

impl RpcResponse {
    /// Successful reply carrying a JSON payload.
    pub fn ok(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            status: RpcStatus::Ok,
            body: payload.into(),
        }
    }

    /// Error reply carrying a message.
    pub fn error(seq: u64, message: impl Into<String>) -> Self {
        Self {
            seq,
            status: RpcStatus::Error,
            body: Bytes::from(message.into()),
        }
    }

    /// Check if this is an error reply.
    pub fn is_error(&self) -> bool {
        self.status == RpcStatus::Error
    }

    /// Error message of an error reply, lossily decoded.
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode one response from the front of `buf`.
    pub fn decode(buf: &mut BytesMut) -> DecodeResult<Self> {
        match decode_frame(buf, MessageType::Response) {
            DecodeResult::Complete((header, body)) => DecodeResult::Complete(Self {
                seq: header.seq,
                status: header.status,
                body,
            }),
            DecodeResult::Incomplete => DecodeResult::Incomplete,
            DecodeResult::Invalid(e) => DecodeResult::Invalid(e),
        }
    }

    /// Append the encoded response to `dst`.
    ///
    /// Bodies over the frame limit are replaced by an error reply.
    pub fn encode(&self, dst: &mut BytesMut) {
        if self.body.len() > MAX_BODY_LEN {
            let replacement = RpcResponse::error(self.seq, "reply exceeds frame limit");
            replacement.encode(dst);
            return;
        }
        FrameHeader {
            message_type: MessageType::Response,
            status: self.status,
            seq: self.seq,
            body_len: self.body.len() as u32,
        }
        .write(dst);
        dst.put_slice(&self.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_request(seq: u64, method: &str, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        RpcRequest::new(seq, method, payload.to_vec())
            .encode(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_header_layout() {
        let buf = encoded_request(0x0102, "Bitmap.Card", b"\"a\"");
        assert_eq!(buf[0], RPC_MAGIC);
        assert_eq!(buf[1], RPC_VERSION);
        assert_eq!(buf[2], MessageType::Request as u8);
        assert_eq!(buf[3], 0);
        assert_eq!(&buf[4..12], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        let body_len = 2 + "Bitmap.Card".len() + 3;
        assert_eq!(&buf[12..16], &(body_len as u32).to_be_bytes());
        assert_eq!(&buf[16..18], &("Bitmap.Card".len() as u16).to_be_bytes());
    }

    #[test]
    fn test_request_decode() {
        let mut buf = encoded_request(7, "Bitmap.Add", br#"{"name":"a","value":1}"#);
        match RpcRequest::decode(&mut buf) {
            DecodeResult::Complete(req) => {
                assert_eq!(req.seq, 7);
                assert_eq!(req.method, "Bitmap.Add");
                assert_eq!(&req.payload[..], br#"{"name":"a","value":1}"#);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frames_are_incomplete() {
        let full = encoded_request(1, "Bitmap.Card", b"\"a\"");
        for cut in [1, 8, HEADER_SIZE, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(
                matches!(RpcRequest::decode(&mut partial), DecodeResult::Incomplete),
                "cut at {}",
                cut
            );
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn test_pipelined_frames() {
        let mut buf = encoded_request(1, "Bitmap.Card", b"\"a\"");
        buf.extend_from_slice(&encoded_request(2, "Bitmap.Card", b"\"b\""));

        let mut seqs = Vec::new();
        while let DecodeResult::Complete(req) = RpcRequest::decode(&mut buf) {
            seqs.push(req.seq);
        }
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_invalid_frames() {
        let mut bad_magic = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert!(matches!(
            RpcRequest::decode(&mut bad_magic),
            DecodeResult::Invalid(_)
        ));

        let mut bad_version = encoded_request(1, "Bitmap.Card", b"\"a\"");
        bad_version[1] = 9;
        assert!(matches!(
            RpcRequest::decode(&mut bad_version),
            DecodeResult::Invalid(_)
        ));

        let mut oversized = BytesMut::new();
        FrameHeader {
            message_type: MessageType::Request,
            status: RpcStatus::Ok,
            seq: 1,
            body_len: (MAX_BODY_LEN + 1) as u32,
        }
        .write(&mut oversized);
        assert!(matches!(
            RpcRequest::decode(&mut oversized),
            DecodeResult::Invalid(_)
        ));

        let mut short_method = BytesMut::new();
        FrameHeader {
            message_type: MessageType::Request,
            status: RpcStatus::Ok,
            seq: 1,
            body_len: 3,
        }
        .write(&mut short_method);
        short_method.put_u16(10);
        short_method.put_u8(b'x');
        assert!(matches!(
            RpcRequest::decode(&mut short_method),
            DecodeResult::Invalid(_)
        ));
    }

    #[test]
    fn test_response_is_not_a_request() {
        let mut buf = BytesMut::new();
        RpcResponse::ok(3, &b"true"[..]).encode(&mut buf);
        assert!(matches!(
            RpcRequest::decode(&mut buf.clone()),
            DecodeResult::Invalid(_)
        ));
        match RpcResponse::decode(&mut buf) {
            DecodeResult::Complete(resp) => {
                assert_eq!(resp.seq, 3);
                assert!(!resp.is_error());
                assert_eq!(&resp.body[..], b"true");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_error_response() {
        let mut buf = BytesMut::new();
        RpcResponse::error(4, "UNKNOWN METHOD").encode(&mut buf);
        assert_eq!(buf[3], RpcStatus::Error as u8);
        match RpcResponse::decode(&mut buf) {
            DecodeResult::Complete(resp) => {
                assert!(resp.is_error());
                assert_eq!(resp.error_message(), "UNKNOWN METHOD");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

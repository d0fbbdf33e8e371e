//! 와이어 헤더 정의
//!
//! 모든 정수는 little-endian.
//! ```text
//! ┌───────────┬──────┬──────────────────────────────┐
//! │ signature │ kind │ sequence (Message)           │
//! │ 8 bytes   │ u16  │ 또는 verb (Request), 8 bytes │
//! └───────────┴──────┴──────────────────────────────┘
//! ```
//! Response 헤더는 signature + kind 만 가진다 (10 bytes).

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// 시그니처 크기 (바이트)
pub const SIGNATURE_SIZE: usize = 8;

/// signature + kind
pub const COMMON_HEADER_SIZE: usize = SIGNATURE_SIZE + 2;

/// Message 헤더 크기
pub const MESSAGE_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 8;

/// Request 헤더 크기
pub const REQUEST_HEADER_SIZE: usize = COMMON_HEADER_SIZE + SIGNATURE_SIZE;

/// Response 헤더 크기
pub const RESPONSE_HEADER_SIZE: usize = COMMON_HEADER_SIZE;

/// 8바이트 고정 시그니처
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// 정확히 8글자 ASCII 문자열로 시그니처 생성
    ///
    /// # Panics
    /// 길이가 8이 아니거나 ASCII가 아니면 panic.
    pub fn fixed(s: &str) -> Self {
        assert!(
            s.len() == SIGNATURE_SIZE && s.is_ascii(),
            "fixed signature must be exactly {} ascii chars, got {:?}",
            SIGNATURE_SIZE,
            s
        );
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(s.as_bytes());
        Self(sig)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if self.0.iter().all(|b| b.is_ascii_graphic()) => write!(f, "Signature({:?})", s),
            _ => write!(f, "Signature({:02x?})", self.0),
        }
    }
}

/// 프로토콜 시그니처 ("gobusgo!")
pub const MBUS_SIGNATURE: Signature = Signature(*b"gobusgo!");

/// 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameKind {
    /// 알 수 없거나 손상된 프레임
    Invalid = 0,

    /// 멀티캐스트 메시지
    Message = 1,

    /// 유니캐스트 요청
    Request = 2,

    /// 유니캐스트 응답
    Response = 3,
}

impl FrameKind {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// 헤더 고정 크기. Invalid는 공통 헤더 크기.
    pub fn header_size(self) -> usize {
        match self {
            FrameKind::Message => MESSAGE_HEADER_SIZE,
            FrameKind::Request => REQUEST_HEADER_SIZE,
            FrameKind::Response => RESPONSE_HEADER_SIZE,
            FrameKind::Invalid => COMMON_HEADER_SIZE,
        }
    }
}

impl From<u16> for FrameKind {
    /// 4 이상은 예약 값이므로 Invalid
    fn from(raw: u16) -> Self {
        match raw {
            1 => FrameKind::Message,
            2 => FrameKind::Request,
            3 => FrameKind::Response,
            _ => FrameKind::Invalid,
        }
    }
}

/// 종류별 후행 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBody {
    /// 첫 페이로드 바이트의 송신 스트림 내 오프셋
    Message { sequence: u64 },

    /// 불투명한 명령 코드
    Request { verb: Signature },

    Response,
}

impl HeaderBody {
    pub fn kind(&self) -> FrameKind {
        match self {
            HeaderBody::Message { .. } => FrameKind::Message,
            HeaderBody::Request { .. } => FrameKind::Request,
            HeaderBody::Response => FrameKind::Response,
        }
    }
}

/// mbus 헤더
///
/// `kind`는 `body`와 별도로 저장된다. 와이어에서 읽은 값 그대로이며,
/// 둘이 어긋난 헤더는 유효하지 않다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signature: Signature,
    pub kind: FrameKind,
    pub body: HeaderBody,
}

impl Header {
    fn with_body(body: HeaderBody) -> Self {
        Self {
            signature: MBUS_SIGNATURE,
            kind: body.kind(),
            body,
        }
    }

    /// Message 헤더 생성
    pub fn message(sequence: u64) -> Self {
        Self::with_body(HeaderBody::Message { sequence })
    }

    /// Request 헤더 생성
    pub fn request(verb: Signature) -> Self {
        Self::with_body(HeaderBody::Request { verb })
    }

    /// Response 헤더 생성
    pub fn response() -> Self {
        Self::with_body(HeaderBody::Response)
    }

    /// 시그니처가 맞고 kind가 body와 일치하는지
    pub fn is_valid(&self) -> bool {
        self.signature == MBUS_SIGNATURE && self.kind == self.body.kind()
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Message 헤더의 시퀀스
    pub fn sequence(&self) -> Option<u64> {
        match self.body {
            HeaderBody::Message { sequence } => Some(sequence),
            _ => None,
        }
    }

    /// Request 헤더의 verb
    pub fn verb(&self) -> Option<Signature> {
        match self.body {
            HeaderBody::Request { verb } => Some(verb),
            _ => None,
        }
    }

    /// 인코딩된 헤더 크기
    pub fn encoded_len(&self) -> usize {
        self.body.kind().header_size()
    }

    /// 버퍼 끝에 헤더를 직렬화
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::InvalidHeader);
        }

        buf.reserve(self.encoded_len());
        buf.put_slice(self.signature.as_bytes());
        buf.put_u16_le(self.kind.as_u16());
        match self.body {
            HeaderBody::Message { sequence } => buf.put_u64_le(sequence),
            HeaderBody::Request { verb } => buf.put_slice(verb.as_bytes()),
            HeaderBody::Response => {}
        }
        Ok(())
    }

    /// 헤더만 직렬화한 새 버퍼. 페이로드를 이어 붙일 수 있다.
    pub fn to_bytes(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// 헤더 + 페이로드로 와이어 프레임 생성
    pub fn frame(&self, payload: &[u8]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len() + payload.len());
        self.encode(&mut buf)?;
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// `expected` 종류의 헤더를 역직렬화하고 나머지(페이로드)를 반환
    pub fn decode(expected: FrameKind, bytes: &[u8]) -> Result<(Header, &[u8])> {
        if expected == FrameKind::Invalid || bytes.len() < expected.header_size() {
            return Err(Error::InvalidHeader);
        }

        let mut buf = bytes;
        let (signature, kind) = read_common(&mut buf).ok_or(Error::InvalidHeader)?;
        if signature != MBUS_SIGNATURE || kind != expected {
            return Err(Error::InvalidHeader);
        }

        let body = match expected {
            FrameKind::Message => HeaderBody::Message {
                sequence: buf.get_u64_le(),
            },
            FrameKind::Request => {
                let mut verb = [0u8; SIGNATURE_SIZE];
                buf.copy_to_slice(&mut verb);
                HeaderBody::Request {
                    verb: Signature(verb),
                }
            }
            FrameKind::Response => HeaderBody::Response,
            FrameKind::Invalid => return Err(Error::InvalidHeader),
        };

        Ok((
            Header {
                signature,
                kind,
                body,
            },
            buf,
        ))
    }

    /// 종류를 먼저 확인한 뒤 해당 종류로 역직렬화
    pub fn decode_any(bytes: &[u8]) -> Result<(Header, &[u8])> {
        Self::decode(peek_kind(bytes), bytes)
    }

    /// Message 프레임에서 시퀀스와 페이로드만 꺼낸다
    pub fn decode_message(bytes: &[u8]) -> Result<(u64, &[u8])> {
        let (header, payload) = Self::decode(FrameKind::Message, bytes)?;
        let sequence = header.sequence().ok_or(Error::InvalidHeader)?;
        Ok((sequence, payload))
    }
}

fn read_common(buf: &mut &[u8]) -> Option<(Signature, FrameKind)> {
    if buf.remaining() < COMMON_HEADER_SIZE {
        return None;
    }
    let mut sig = [0u8; SIGNATURE_SIZE];
    buf.copy_to_slice(&mut sig);
    let kind = FrameKind::from(buf.get_u16_le());
    Some((Signature(sig), kind))
}

/// 공통 헤더만 읽어서 프레임 종류 확인. 실패하면 Invalid (에러 없음).
///
/// 변형별 역직렬화 전에 패킷을 분류하는 용도.
pub fn peek_kind(bytes: &[u8]) -> FrameKind {
    let mut buf = bytes;
    match read_common(&mut buf) {
        Some((signature, kind)) if signature == MBUS_SIGNATURE => kind,
        _ => FrameKind::Invalid,
    }
}

/// Request 프레임 생성 (헤더 + 파라미터)
pub fn make_request(verb: Signature, parameters: &[u8]) -> Result<Bytes> {
    Header::request(verb).frame(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resend_verb() -> Signature {
        Signature::fixed("Resend..")
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let headers = [
            Header::message(23),
            Header::request(resend_verb()),
            Header::response(),
        ];

        for header in headers {
            assert!(header.is_valid());
            let bytes = header.to_bytes().unwrap();
            assert_eq!(bytes.len(), header.encoded_len());

            let (decoded, rest) = Header::decode(header.kind(), &bytes).unwrap();
            assert_eq!(decoded, header);
            assert!(decoded.is_valid());
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_message_wire_layout() {
        let bytes = Header::message(0x0102).frame(b"hi").unwrap();

        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 2);
        assert_eq!(&bytes[..8], b"gobusgo!");
        assert_eq!(&bytes[8..10], &[1, 0]);
        assert_eq!(&bytes[10..18], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[18..], b"hi");

        let (header, payload) = Header::decode(FrameKind::Message, &bytes).unwrap();
        assert_eq!(header.sequence(), Some(0x0102));
        assert_eq!(payload, b"hi");
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(Header::message(0).encoded_len(), 18);
        assert_eq!(Header::request(resend_verb()).encoded_len(), 18);
        assert_eq!(Header::response().encoded_len(), 10);
    }

    #[test]
    fn test_peek_kind() {
        let message = Header::message(7).frame(b"payload").unwrap();
        let request = make_request(resend_verb(), &[1, 2, 3]).unwrap();
        let response = Header::response().to_bytes().unwrap();

        assert_eq!(peek_kind(&message), FrameKind::Message);
        assert_eq!(peek_kind(&request), FrameKind::Request);
        assert_eq!(peek_kind(&response), FrameKind::Response);

        let mut corrupted = message.to_vec();
        corrupted[0] ^= 0xFF;
        assert_eq!(peek_kind(&corrupted), FrameKind::Invalid);

        assert_eq!(peek_kind(&message[..COMMON_HEADER_SIZE - 1]), FrameKind::Invalid);
        assert_eq!(peek_kind(&[]), FrameKind::Invalid);
    }

    #[test]
    fn test_reserved_kind_is_invalid() {
        let mut bytes = Header::response().to_bytes().unwrap().to_vec();
        bytes[8] = 4;
        assert_eq!(peek_kind(&bytes), FrameKind::Invalid);
        assert_eq!(FrameKind::from(99), FrameKind::Invalid);
    }

    #[test]
    fn test_corrupted_header_fails_encode() {
        let mut header = Header::message(23);
        header.signature = Signature([23, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!header.is_valid());
        assert!(matches!(header.to_bytes(), Err(Error::InvalidHeader)));

        header.signature = MBUS_SIGNATURE;
        header.kind = FrameKind::Invalid;
        assert!(!header.is_valid());
        assert!(matches!(header.to_bytes(), Err(Error::InvalidHeader)));

        header.kind = FrameKind::Request;
        assert!(!header.is_valid());
    }

    #[test]
    fn test_decode_rejects_other_kind() {
        let request = make_request(resend_verb(), b"").unwrap();

        assert!(Header::decode(FrameKind::Response, &request).is_err());
        assert!(Header::decode(FrameKind::Message, &request).is_err());
        assert!(Header::decode(FrameKind::Invalid, &request).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let bytes = Header::message(5).to_bytes().unwrap();
        let result = Header::decode(FrameKind::Message, &bytes[..MESSAGE_HEADER_SIZE - 1]);
        assert!(matches!(result, Err(Error::InvalidHeader)));
    }

    #[test]
    fn test_decode_any_dispatches() {
        let request = make_request(resend_verb(), b"params").unwrap();
        let (header, rest) = Header::decode_any(&request).unwrap();

        assert_eq!(header.kind(), FrameKind::Request);
        assert_eq!(header.verb(), Some(resend_verb()));
        assert_eq!(rest, b"params");

        assert!(Header::decode_any(b"not an mbus frame").is_err());
    }

    #[test]
    #[should_panic]
    fn test_fixed_signature_length() {
        Signature::fixed("short");
    }
}

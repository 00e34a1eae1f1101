//! 프로토콜 메시지 정의
//!
//! 모든 데이터그램은 한 바이트 명령 태그로 시작하고 CRC32 트레일러로 끝남
//!
//! ```text
//! | tag (1) | bincode body (fixint, little endian) | crc32 (4) |
//! ```
//!
//! 서버와 클라이언트는 같은 태그 공간을 공유하므로 요청은 [`Request`],
//! 응답은 [`Response`]로 읽는 쪽이 방향을 결정함

use std::path::{Component, Path};

use bincode::Options;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hash::Digest;
use crate::{Error, Result, MAX_DATAGRAM_SIZE, MAX_NAME_LEN, PACKET_PAYLOAD_SIZE};

/// 서버가 할당하는 파일 ID
pub type FileId = u32;

/// 파일 내 데이터 패킷 인덱스
pub type PacketIndex = u32;

/// CRC 트레일러 크기
const CRC_LEN: usize = 4;

/// 명령 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// 전송 시작 알림
    Start = b's',

    /// 데이터 패킷
    Data = b'i',

    /// 블록 다이제스트 확인
    CheckBlock = b'e',

    /// 전체 파일 다이제스트 확인
    CheckWhole = b'f',

    /// 전체 확인 결과 통보
    Confirm = b'c',
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b's' => Some(Tag::Start),
            b'i' => Some(Tag::Data),
            b'e' => Some(Tag::CheckBlock),
            b'f' => Some(Tag::CheckWhole),
            b'c' => Some(Tag::Confirm),
            _ => None,
        }
    }
}

/// 전송 시작 (클라이언트 → 서버)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub name: String,
    pub file_size: u32,
}

/// 전송 시작 응답 (서버 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponseMessage {
    pub name: String,
    pub file_id: FileId,
    /// 요청의 파일 크기 에코
    pub file_size: u32,
}

/// 데이터 패킷 (클라이언트 → 서버)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub file_id: FileId,
    pub index: PacketIndex,
    /// 최대 PACKET_PAYLOAD_SIZE 바이트
    pub payload: Bytes,
}

/// 데이터 패킷 확인 (서버 → 클라이언트)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAckMessage {
    pub file_id: FileId,
    pub index: PacketIndex,
}

/// 다이제스트 확인 요청
///
/// 블록 확인은 블록 시작 패킷 인덱스, 전체 확인은 항상 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckMessage {
    pub file_id: FileId,
    pub index: PacketIndex,
}

/// 다이제스트 확인 응답
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponseMessage {
    pub file_id: FileId,
    pub index: PacketIndex,
    pub digest: Digest,
}

/// 전체 확인 결과 통보, 응답은 같은 내용의 에코
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmMessage {
    pub name: String,
    pub success: bool,
}

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start(StartMessage),
    Data(DataMessage),
    CheckBlock(CheckMessage),
    CheckWhole(CheckMessage),
    Confirm(ConfirmMessage),
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Start(StartResponseMessage),
    DataAck(DataAckMessage),
    CheckBlock(CheckResponseMessage),
    CheckWhole(CheckResponseMessage),
    ConfirmAck(ConfirmMessage),
}

impl Request {
    pub fn tag(&self) -> Tag {
        match self {
            Request::Start(_) => Tag::Start,
            Request::Data(_) => Tag::Data,
            Request::CheckBlock(_) => Tag::CheckBlock,
            Request::CheckWhole(_) => Tag::CheckWhole,
            Request::Confirm(_) => Tag::Confirm,
        }
    }

    /// 로그/에러용 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Start(_) => "start",
            Request::Data(_) => "data",
            Request::CheckBlock(_) => "check-block",
            Request::CheckWhole(_) => "check-whole",
            Request::Confirm(_) => "confirm",
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Request::Start(msg) => {
                check_name(&msg.name)?;
                frame(Tag::Start, msg)
            }
            Request::Data(msg) => {
                check_payload(&msg.payload)?;
                frame(Tag::Data, msg)
            }
            Request::CheckBlock(msg) => frame(Tag::CheckBlock, msg),
            Request::CheckWhole(msg) => frame(Tag::CheckWhole, msg),
            Request::Confirm(msg) => {
                check_name(&msg.name)?;
                frame(Tag::Confirm, msg)
            }
        }
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (tag, body) = unframe(bytes)?;
        let request = match tag {
            Tag::Start => {
                let msg: StartMessage = decode_body(body)?;
                check_name(&msg.name)?;
                Request::Start(msg)
            }
            Tag::Data => {
                let msg: DataMessage = decode_body(body)?;
                check_payload(&msg.payload)?;
                Request::Data(msg)
            }
            Tag::CheckBlock => Request::CheckBlock(decode_body(body)?),
            Tag::CheckWhole => Request::CheckWhole(decode_body(body)?),
            Tag::Confirm => {
                let msg: ConfirmMessage = decode_body(body)?;
                check_name(&msg.name)?;
                Request::Confirm(msg)
            }
        };
        Ok(request)
    }

    /// 응답이 이 요청에 대한 것인지 확인
    ///
    /// 태그와 상관 필드(파일 ID/인덱스 또는 이름)가 모두 같아야 함.
    /// 채널이 중복/지연시킨 이전 요청의 응답은 여기서 걸러짐
    pub fn matches(&self, response: &Response) -> bool {
        match (self, response) {
            (Request::Start(req), Response::Start(resp)) => {
                req.name == resp.name && req.file_size == resp.file_size
            }
            (Request::Data(req), Response::DataAck(resp)) => {
                req.file_id == resp.file_id && req.index == resp.index
            }
            (Request::CheckBlock(req), Response::CheckBlock(resp))
            | (Request::CheckWhole(req), Response::CheckWhole(resp)) => {
                req.file_id == resp.file_id && req.index == resp.index
            }
            (Request::Confirm(req), Response::ConfirmAck(resp)) => {
                req.name == resp.name && req.success == resp.success
            }
            _ => false,
        }
    }
}

impl Response {
    pub fn tag(&self) -> Tag {
        match self {
            Response::Start(_) => Tag::Start,
            Response::DataAck(_) => Tag::Data,
            Response::CheckBlock(_) => Tag::CheckBlock,
            Response::CheckWhole(_) => Tag::CheckWhole,
            Response::ConfirmAck(_) => Tag::Confirm,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Response::Start(msg) => {
                check_name(&msg.name)?;
                frame(Tag::Start, msg)
            }
            Response::DataAck(msg) => frame(Tag::Data, msg),
            Response::CheckBlock(msg) => frame(Tag::CheckBlock, msg),
            Response::CheckWhole(msg) => frame(Tag::CheckWhole, msg),
            Response::ConfirmAck(msg) => {
                check_name(&msg.name)?;
                frame(Tag::Confirm, msg)
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (tag, body) = unframe(bytes)?;
        let response = match tag {
            Tag::Start => Response::Start(decode_body(body)?),
            Tag::Data => Response::DataAck(decode_body(body)?),
            Tag::CheckBlock => Response::CheckBlock(decode_body(body)?),
            Tag::CheckWhole => Response::CheckWhole(decode_body(body)?),
            Tag::Confirm => Response::ConfirmAck(decode_body(body)?),
        };
        Ok(response)
    }
}

/// 고정 폭 정수, 크기 제한, 뒤쪽 쓰레기 바이트 거부
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_DATAGRAM_SIZE as u64)
}

fn frame<T: Serialize>(tag: Tag, body: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(tag as u8);
    wire_options().serialize_into(&mut buf, body)?;

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(Error::PayloadTooLarge {
            len: buf.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(buf)
}

/// CRC 검증 후 (태그, 본문) 반환
fn unframe(bytes: &[u8]) -> Result<(Tag, &[u8])> {
    if bytes.len() < 1 + CRC_LEN {
        return Err(Error::Truncated { len: bytes.len() });
    }

    let (framed, trailer) = bytes.split_at(bytes.len() - CRC_LEN);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let got = crc32fast::hash(framed);
    if expected != got {
        return Err(Error::CrcMismatch { expected, got });
    }

    let tag = Tag::from_byte(framed[0]).ok_or(Error::UnknownTag(framed[0]))?;
    Ok((tag, &framed[1..]))
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(wire_options().deserialize(body)?)
}

fn check_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// 경로 구분자나 상위 디렉터리 참조가 없는 단일 파일 이름인지
///
/// 서버는 이 검사를 통과하지 못한 Start에 응답하지 않음
pub fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return false;
    }

    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn check_payload(payload: &[u8]) -> Result<()> {
    if payload.len() > PACKET_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: PACKET_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

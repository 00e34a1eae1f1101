//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// RFCP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("알 수 없는 명령 태그: {0:#04x}")]
    UnknownTag(u8),

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("잘린 데이터그램: {len} bytes")]
    Truncated { len: usize },

    #[error("파일 이름이 너무 김: {len} bytes (최대 {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("페이로드가 너무 큼: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("전송할 수 없는 파일 이름: {0:?}")]
    InvalidName(String),

    #[error("파일이 너무 큼: {len} bytes (최대 {max})")]
    FileTooLarge { len: u64, max: u64 },

    /// 재시도 예산을 모두 소진함 - 실행 전체에 치명적
    #[error("채널 사용 불가: {what} 요청이 {attempts}회 시도 후에도 응답 없음")]
    ChannelExhausted { what: &'static str, attempts: u32 },

    #[error("{what} 요청에 맞지 않는 응답")]
    UnexpectedResponse { what: &'static str },

    #[error("디렉터리가 아님: {0:?}")]
    NotADirectory(PathBuf),
}

impl Error {
    /// 배치 전체를 중단해야 하는 에러인지
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ChannelExhausted { .. })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

//! # RFCP (Reliable File Copy Protocol)
//!
//! 손실/중복/손상/순서 변경이 일어나는 데이터그램 채널과
//! 조용히 손상되는 저장소 위에서 디렉터리를 검증 복사하는 프로토콜
//!
//! ## 핵심 특징
//! - **Stop-and-wait 요청/응답**: 상관 필드로 지연된 중복 응답을 걸러냄
//! - **블록 확인**: 250 패킷마다 SHA-1 다이제스트 비교, 불일치 블록만 재전송
//! - **종단 간 확인**: 서버가 디스크에 쓴 사본을 다시 읽어 검증한 뒤 전체 다이제스트 응답
//! - **원자적 커밋**: 스테이징 파일을 클라이언트 확인 후에만 rename
//! - **장애 주입**: NastySocket / NastyStorage로 테스트와 CLI에서 재현

pub mod block;
pub mod config;
pub mod error;
pub mod hash;
pub mod link;
pub mod loader;
pub mod message;
pub mod nasty;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod storage;

pub use block::{FileLayout, ReassemblyBuffer};
pub use config::Config;
pub use error::{Error, Result};
pub use hash::Digest;
pub use link::{Datagram, Link};
pub use message::{Request, Response};
pub use receiver::Receiver;
pub use sender::{copy_directory, transfer_file, FileReport, RunSummary};
pub use stats::{ReceptionStats, TransferStats};
pub use storage::{DiskStorage, Storage};

/// 데이터 패킷 하나의 최대 페이로드 (바이트)
pub const PACKET_PAYLOAD_SIZE: usize = 500;

/// 블록 하나에 속한 데이터 패킷 수
pub const PACKETS_PER_BLOCK: usize = 250;

/// 파일 이름 최대 길이 (바이트)
pub const MAX_NAME_LEN: usize = 255;

/// 데이터그램 최대 크기 (수신 버퍼 크기)
pub const MAX_DATAGRAM_SIZE: usize = 1024;

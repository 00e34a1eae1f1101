//! 프로토콜 설정

use std::time::Duration;

use crate::MAX_DATAGRAM_SIZE;

/// RFCP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 응답 한 번 읽기 타임아웃 (밀리초)
    /// 적응형이 아닌 고정값
    pub read_timeout_ms: u64,

    /// 컨트롤 메시지 최대 전송 시도 횟수 (Start, Check, Confirm)
    pub control_attempts: u32,

    /// 데이터 패킷 최대 전송 시도 횟수
    pub data_attempts: u32,

    /// 한 번의 전송 시도 안에서 허용하는 불일치 응답 수
    /// 지연된 중복 응답이 끝없이 들어와도 다음 시도로 넘어가게 함
    pub stale_reads_per_attempt: u32,

    /// 로더: 같은 영역을 연속으로 몇 번 동일하게 읽어야 신뢰하는지
    pub loader_stable_reads: u32,

    /// 로더: 라운드당 전체 파일 재읽기 횟수
    pub loader_whole_reads: u32,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout_ms: 200,             // 200ms
            control_attempts: 10,
            data_attempts: 50,
            stale_reads_per_attempt: 16,
            loader_stable_reads: 5,
            loader_whole_reads: 5,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl Config {
    /// 루프백/테스트용 설정 (짧은 타임아웃)
    pub fn lossless() -> Self {
        Self {
            read_timeout_ms: 20,
            stale_reads_per_attempt: 8,
            loader_stable_reads: 2,
            loader_whole_reads: 2,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            read_timeout_ms: 500,
            control_attempts: 20,
            data_attempts: 80,
            stale_reads_per_attempt: 32,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

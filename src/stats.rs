//! 전송 통계

use std::time::{Duration, Instant};

/// 클라이언트 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 보낸 데이터그램 수 (재전송 포함)
    pub datagrams_sent: u64,

    /// 재전송 수 (첫 시도 제외)
    pub retransmissions: u64,

    /// 응답 대기 타임아웃 수
    pub timeouts: u64,

    /// 버린 응답 수 (불일치, 손상, 지연된 중복)
    pub stale_replies: u64,

    /// 확인된 데이터 패킷 수
    pub data_packets: u64,

    /// 페이로드 바이트 (재전송 포함)
    pub payload_bytes: u64,

    /// 블록 다이제스트 불일치로 다시 보낸 블록 수
    pub block_retries: u64,

    /// 전체 파일 전송 시도 수
    pub whole_attempts: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            datagrams_sent: 0,
            retransmissions: 0,
            timeouts: 0,
            stale_replies: 0,
            data_packets: 0,
            payload_bytes: 0,
            block_retries: 0,
            whole_attempts: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 페이로드 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.payload_bytes as f64 / elapsed
    }

    /// 타임아웃 비율 (손실 추정치)
    pub fn timeout_rate(&self) -> f64 {
        if self.datagrams_sent == 0 {
            return 0.0;
        }
        self.timeouts as f64 / self.datagrams_sent as f64
    }

    /// 다른 통계를 합산 (시작 시간은 더 이른 쪽)
    pub fn merge(&mut self, other: &TransferStats) {
        self.start_time = self.start_time.min(other.start_time);
        self.datagrams_sent += other.datagrams_sent;
        self.retransmissions += other.retransmissions;
        self.timeouts += other.timeouts;
        self.stale_replies += other.stale_replies;
        self.data_packets += other.data_packets;
        self.payload_bytes += other.payload_bytes;
        self.block_retries += other.block_retries;
        self.whole_attempts += other.whole_attempts;
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} | Retransmits: {} | Timeouts: {:.2}% | Stale: {} | Block retries: {} | Attempts: {} | Throughput: {:.2} KB/s",
            self.elapsed().as_secs_f64(),
            self.datagrams_sent,
            self.retransmissions,
            self.timeout_rate() * 100.0,
            self.stale_replies,
            self.block_retries,
            self.whole_attempts,
            self.throughput() / 1_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 서버 수신 통계
#[derive(Debug, Clone, Default)]
pub struct ReceptionStats {
    /// 처리한 요청 수
    pub requests: u64,

    /// 해석하지 못해 버린 데이터그램 수
    pub malformed: u64,

    /// 알 수 없는 파일 ID/이름을 가리킨 요청 수
    pub unknown_target: u64,

    /// 완료된 파일에 대해 무시한 요청 수
    pub after_done: u64,

    /// 스테이징 쓰기/검증 반복 수 (첫 시도 제외)
    pub staging_retries: u64,

    /// 커밋된 파일 수
    pub committed: u64,

    /// 실패 통보받은 전체 확인 수
    pub failed_confirms: u64,
}

impl ReceptionStats {
    pub fn summary(&self) -> String {
        format!(
            "Requests: {} | Malformed: {} | Unknown: {} | After done: {} | Staging retries: {} | Committed: {} | Failed confirms: {}",
            self.requests,
            self.malformed,
            self.unknown_target,
            self.after_done,
            self.staging_retries,
            self.committed,
            self.failed_confirms,
        )
    }
}

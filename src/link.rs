//! 신뢰성 있는 요청/응답 링크 (클라이언트측)
//!
//! - 요청 하나를 보내고 일치하는 응답이 올 때까지 대기
//! - 응답 읽기마다 고정 타임아웃, 메시지 종류별 고정 시도 횟수
//! - 태그와 상관 필드가 다른 응답은 지연된 중복으로 간주하고 버림

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::message::{Request, Response};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 데이터그램 채널
///
/// 전송은 조용히 유실/중복/순서 변경/손상될 수 있음
pub trait Datagram: Send + Sync {
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Datagram for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

impl<D: Datagram> Datagram for Arc<D> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// 한 번의 응답 읽기 결과
enum Reply {
    Matched(Response),
    Stale,
    TimedOut,
}

/// 서버와의 요청/응답 링크
pub struct Link<D> {
    socket: D,
    server_addr: SocketAddr,
    config: Config,
    buf: Vec<u8>,
    stats: TransferStats,
}

impl<D: Datagram> Link<D> {
    pub fn new(socket: D, server_addr: SocketAddr, config: Config) -> Self {
        Self {
            buf: vec![0u8; config.recv_buffer_size],
            socket,
            server_addr,
            config,
            stats: TransferStats::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.stats
    }

    /// 지금까지의 통계를 꺼내고 새로 시작
    pub fn take_stats(&mut self) -> TransferStats {
        std::mem::take(&mut self.stats)
    }

    /// 요청을 보내고 일치하는 응답을 반환
    ///
    /// 시도마다 요청을 다시 보냄. 타임아웃은 해당 시도를 끝내고,
    /// 불일치 응답이나 길이 0 읽기는 같은 시도 안에서 다시 읽음.
    /// 모든 시도가 소진되면 [`Error::ChannelExhausted`]
    pub async fn request(&mut self, request: &Request, attempts: u32) -> Result<Response> {
        let bytes = request.to_bytes()?;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.stats.retransmissions += 1;
            }

            if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                // ICMP unreachable 등도 일시적 장애로 취급
                warn!("전송 실패 ({} attempt {}): {}", request.kind(), attempt, e);
                tokio::time::sleep(self.config.read_timeout()).await;
                continue;
            }
            self.stats.datagrams_sent += 1;

            let mut stale = 0;
            while stale < self.config.stale_reads_per_attempt {
                match self.read_reply(request).await {
                    Reply::Matched(response) => return Ok(response),
                    Reply::TimedOut => break,
                    Reply::Stale => {
                        stale += 1;
                        self.stats.stale_replies += 1;
                    }
                }
            }

            trace!("{} attempt {}/{} without reply", request.kind(), attempt, attempts);
        }

        debug!("{} 요청 시도 소진: {}회", request.kind(), attempts);
        Err(Error::ChannelExhausted {
            what: request.kind(),
            attempts,
        })
    }

    async fn read_reply(&mut self, request: &Request) -> Reply {
        let timeout = self.config.read_timeout();

        let (len, from) =
            match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    debug!("수신 에러: {}", e);
                    self.stats.timeouts += 1;
                    tokio::time::sleep(timeout).await;
                    return Reply::TimedOut;
                }
                Err(_) => {
                    self.stats.timeouts += 1;
                    return Reply::TimedOut;
                }
            };

        if len == 0 {
            trace!("길이 0 응답, 다시 읽음");
            return Reply::Stale;
        }

        if from != self.server_addr {
            trace!("다른 주소의 응답 무시: {}", from);
            return Reply::Stale;
        }

        match Response::from_bytes(&self.buf[..len]) {
            Ok(response) if request.matches(&response) => Reply::Matched(response),
            Ok(response) => {
                trace!("불일치 응답 무시: {:?}", response.tag());
                Reply::Stale
            }
            Err(e) => {
                trace!("응답 해석 실패: {}", e);
                Reply::Stale
            }
        }
    }
}

//! 송신자 (클라이언트측)
//!
//! 파일 하나당 상태 머신:
//! `Announcing → Streaming → AwaitingWholeCheck → Confirming → Done`
//!
//! - 블록(250 패킷)마다 다이제스트 확인, 불일치하면 그 블록만 다시 보냄
//! - 전체 다이제스트 불일치면 실패 통보 후 처음부터 다시 전송
//! - 채널 시도 예산 소진([`Error::ChannelExhausted`])만 배치 전체를 중단시킴

use std::fmt;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::block::{Block, FileLayout};
use crate::hash::Digest;
use crate::link::{Datagram, Link};
use crate::loader::load_file;
use crate::message::{
    is_plain_file_name, CheckMessage, ConfirmMessage, DataMessage, FileId, Request, Response,
    StartMessage,
};
use crate::stats::TransferStats;
use crate::storage::Storage;
use crate::{Error, Result, PACKET_PAYLOAD_SIZE};

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Announcing,
    Streaming,
    AwaitingWholeCheck,
    Confirming,
    Done,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Announcing => "announcing",
            TransferState::Streaming => "streaming",
            TransferState::AwaitingWholeCheck => "awaiting-whole-check",
            TransferState::Confirming => "confirming",
            TransferState::Done => "done",
        };
        f.write_str(name)
    }
}

/// 파일 하나의 전송 결과
#[derive(Debug, Clone)]
pub struct FileReport {
    pub name: String,
    pub file_id: FileId,
    pub size: usize,

    /// 전체 파일 전송 시도 수 (1 = 첫 시도에 성공)
    pub attempts: u32,

    /// 원본 읽기 검증 라운드 수
    pub load_rounds: u32,

    pub stats: TransferStats,
}

/// 디렉터리 전송 결과
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<FileReport>,

    /// 로컬 에러로 건너뛴 파일
    pub skipped: Vec<String>,

    pub stats: TransferStats,
}

impl RunSummary {
    pub fn files_sent(&self) -> usize {
        self.reports.len()
    }

    pub fn whole_attempts(&self) -> u64 {
        self.reports.iter().map(|r| r.attempts as u64).sum()
    }
}

/// 파일 하나의 전송 진행 상태
///
/// 파일 내용과 전체 다이제스트는 전송 시작 전에 한 번만 계산함
pub struct FileSender<'a, D> {
    link: &'a mut Link<D>,
    name: String,
    content: Bytes,
    layout: FileLayout,
    whole: Digest,
    file_size: u32,
    state: TransferState,
    attempts: u32,
}

impl<'a, D: Datagram> FileSender<'a, D> {
    pub fn new(link: &'a mut Link<D>, name: impl Into<String>, content: Bytes) -> Result<Self> {
        let name = name.into();
        if !is_plain_file_name(&name) {
            return Err(Error::InvalidName(name));
        }

        let file_size = u32::try_from(content.len()).map_err(|_| Error::FileTooLarge {
            len: content.len() as u64,
            max: u32::MAX as u64,
        })?;

        Ok(Self {
            link,
            name,
            layout: FileLayout::new(content.len()),
            whole: Digest::of(&content),
            content,
            file_size,
            state: TransferState::Announcing,
            attempts: 0,
        })
    }

    /// 서버가 커밋할 때까지 전송
    pub async fn run(mut self) -> Result<(FileId, u32)> {
        loop {
            self.attempts += 1;
            self.link.stats_mut().whole_attempts += 1;

            self.transition(TransferState::Announcing);
            let file_id = self.announce().await?;

            self.transition(TransferState::Streaming);
            let layout = self.layout;
            for block in layout.blocks() {
                self.stream_block(file_id, &block).await?;
            }

            self.transition(TransferState::AwaitingWholeCheck);
            let remote = self.check_whole(file_id).await?;

            self.transition(TransferState::Confirming);
            if remote == self.whole {
                self.confirm(true).await?;
                self.transition(TransferState::Done);
                info!(
                    "File: {} end-to-end check succeeded, attempt {}",
                    self.name, self.attempts
                );
                return Ok((file_id, self.attempts));
            }

            warn!(
                "File: {} end-to-end check failed, attempt {} (local {}, remote {})",
                self.name, self.attempts, self.whole, remote
            );
            self.confirm(false).await?;
        }
    }

    fn transition(&mut self, next: TransferState) {
        debug!("File: {} {} -> {}", self.name, self.state, next);
        self.state = next;
    }

    async fn announce(&mut self) -> Result<FileId> {
        let request = Request::Start(StartMessage {
            name: self.name.clone(),
            file_size: self.file_size,
        });

        let attempts = self.link.config().control_attempts;
        match self.link.request(&request, attempts).await? {
            Response::Start(resp) => {
                info!(
                    "File: {} beginning transmission, attempt {} (id {}, {} bytes)",
                    self.name, self.attempts, resp.file_id, self.file_size
                );
                Ok(resp.file_id)
            }
            // matches()가 태그를 확인하므로 도달하지 않음
            other => Err(unexpected(&request, &other)),
        }
    }

    /// 블록을 보내고 서버 다이제스트가 일치할 때까지 반복
    async fn stream_block(&mut self, file_id: FileId, block: &Block) -> Result<()> {
        let expected = Digest::of(&self.content[block.bytes.clone()]);

        loop {
            for index in block.packets.clone() {
                self.send_packet(file_id, index).await?;
            }

            let request = Request::CheckBlock(CheckMessage {
                file_id,
                index: block.first_packet(),
            });
            let attempts = self.link.config().control_attempts;
            let remote = match self.link.request(&request, attempts).await? {
                Response::CheckBlock(resp) => resp.digest,
                other => return Err(unexpected(&request, &other)),
            };

            if remote == expected {
                debug!("File: {} block {} verified", self.name, block.number);
                return Ok(());
            }

            self.link.stats_mut().block_retries += 1;
            debug!(
                "File: {} block {} digest mismatch, resending packets {}..{}",
                self.name, block.number, block.packets.start, block.packets.end
            );
        }
    }

    async fn send_packet(&mut self, file_id: FileId, index: u32) -> Result<()> {
        let start = index as usize * PACKET_PAYLOAD_SIZE;
        let end = (start + PACKET_PAYLOAD_SIZE).min(self.content.len());
        let payload = self.content.slice(start..end);
        let len = payload.len() as u64;

        let request = Request::Data(DataMessage {
            file_id,
            index,
            payload,
        });
        let attempts = self.link.config().data_attempts;
        self.link.request(&request, attempts).await?;

        let stats = self.link.stats_mut();
        stats.data_packets += 1;
        stats.payload_bytes += len;
        Ok(())
    }

    async fn check_whole(&mut self, file_id: FileId) -> Result<Digest> {
        let request = Request::CheckWhole(CheckMessage { file_id, index: 0 });
        let attempts = self.link.config().control_attempts;
        match self.link.request(&request, attempts).await? {
            Response::CheckWhole(resp) => Ok(resp.digest),
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn confirm(&mut self, success: bool) -> Result<()> {
        let request = Request::Confirm(ConfirmMessage {
            name: self.name.clone(),
            success,
        });
        let attempts = self.link.config().control_attempts;
        self.link.request(&request, attempts).await?;
        Ok(())
    }
}

fn unexpected(request: &Request, response: &Response) -> Error {
    error!("{} 요청에 맞지 않는 응답: {:?}", request.kind(), response.tag());
    Error::UnexpectedResponse {
        what: request.kind(),
    }
}

/// 메모리의 파일 내용 하나를 전송
pub async fn transfer_file<D: Datagram>(
    link: &mut Link<D>,
    name: &str,
    content: Bytes,
) -> Result<FileReport> {
    let size = content.len();
    let (file_id, attempts) = FileSender::new(link, name, content)?.run().await?;

    Ok(FileReport {
        name: name.to_string(),
        file_id,
        size,
        attempts,
        load_rounds: 0,
        stats: link.take_stats(),
    })
}

/// 디렉터리의 일반 파일을 이름순으로 모두 전송
///
/// 파일별 로컬 에러는 기록 후 건너뜀, 치명적 에러만 즉시 반환
pub async fn copy_directory<D, S>(link: &mut Link<D>, storage: &S, dir: &Path) -> Result<RunSummary>
where
    D: Datagram,
    S: Storage + ?Sized,
{
    if !dir.is_dir() {
        return Err(Error::NotADirectory(dir.to_path_buf()));
    }

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => entries.push(name),
            Err(raw) => warn!("UTF-8이 아닌 파일 이름 건너뜀: {:?}", raw),
        }
    }
    entries.sort();

    info!("{} files to send from {:?}", entries.len(), dir);

    let mut summary = RunSummary::default();

    for name in entries {
        match send_one(link, storage, dir, &name).await {
            Ok(report) => {
                info!(
                    "File: {} delivered ({} bytes, {} attempt(s)) | {}",
                    report.name,
                    report.size,
                    report.attempts,
                    report.stats.summary()
                );
                summary.stats.merge(&report.stats);
                summary.reports.push(report);
            }
            Err(e) if e.is_fatal() => {
                error!("File: {} 채널 사용 불가, 중단: {}", name, e);
                return Err(e);
            }
            Err(e) => {
                warn!("File: {} skipped: {}", name, e);
                summary.skipped.push(name);
            }
        }
    }

    summary.stats.merge(&link.take_stats());
    Ok(summary)
}

async fn send_one<D, S>(link: &mut Link<D>, storage: &S, dir: &Path, name: &str) -> Result<FileReport>
where
    D: Datagram,
    S: Storage + ?Sized,
{
    // 서버가 거부할 이름은 읽기 전에 건너뜀
    if !is_plain_file_name(name) {
        return Err(Error::InvalidName(name.to_string()));
    }

    let loaded = load_file(storage, &dir.join(name), link.config())?;
    let mut report = transfer_file(link, name, loaded.content).await?;
    report.load_rounds = loaded.rounds;
    Ok(report)
}

//! 수신자 (서버측)
//!
//! - 파일 이름마다 수신 레코드 하나, ID는 실행 동안 고정
//! - 데이터 패킷을 위치 기반으로 재조립 버퍼에 기록
//! - 블록 확인은 메모리 버퍼만, 전체 확인은 스테이징 파일을 쓰고 다시 읽어 검증
//! - 클라이언트 확인 통보에 따라 커밋(rename) 또는 폐기
//!
//! 모든 상태는 단일 수신 루프에서만 변경되므로 잠금이 필요 없음

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::block::ReassemblyBuffer;
use crate::hash::Digest;
use crate::link::Datagram;
use crate::message::{
    is_plain_file_name, CheckMessage, CheckResponseMessage, ConfirmMessage, DataAckMessage,
    DataMessage, FileId, Request, Response, StartMessage, StartResponseMessage,
};
use crate::stats::ReceptionStats;
use crate::storage::{read_exact_at, Storage};
use crate::{Result, MAX_DATAGRAM_SIZE};

/// 스테이징 파일 접미사
pub const STAGING_SUFFIX: &str = ".tmp";

/// 파일 하나의 수신 상태
#[derive(Debug)]
pub struct ReceptionRecord {
    /// 파일 이름
    pub name: String,

    /// 마지막 Start가 알린 파일 크기
    pub declared_size: u32,

    /// 재조립 버퍼, 커밋 후에는 해제됨
    buffer: Option<ReassemblyBuffer>,

    /// 커밋 완료 (실행 동안 영구)
    pub done: bool,

    /// 디스크의 스테이징 파일이 버퍼와 같음을 확인함
    pub verified: bool,
}

impl ReceptionRecord {
    fn new(name: String) -> Self {
        Self {
            name,
            declared_size: 0,
            buffer: None,
            done: false,
            verified: false,
        }
    }

    pub fn buffer(&self) -> Option<&ReassemblyBuffer> {
        self.buffer.as_ref()
    }
}

/// 서버 수신 엔진
pub struct Receiver<S> {
    target_dir: PathBuf,
    storage: S,
    records: Vec<ReceptionRecord>,
    ids: HashMap<String, FileId>,
    stats: ReceptionStats,
}

impl<S: Storage> Receiver<S> {
    pub fn new(target_dir: impl Into<PathBuf>, storage: S) -> Self {
        Self {
            target_dir: target_dir.into(),
            storage,
            records: Vec::new(),
            ids: HashMap::new(),
            stats: ReceptionStats::default(),
        }
    }

    pub fn file_id(&self, name: &str) -> Option<FileId> {
        self.ids.get(name).copied()
    }

    pub fn record(&self, file_id: FileId) -> Option<&ReceptionRecord> {
        self.records.get(file_id as usize)
    }

    pub fn stats(&self) -> &ReceptionStats {
        &self.stats
    }

    pub fn final_path(&self, name: &str) -> PathBuf {
        self.target_dir.join(name)
    }

    pub fn staging_path(&self, name: &str) -> PathBuf {
        staging_path(&self.target_dir, name)
    }

    /// shutdown이 완료될 때까지 수신 루프 실행
    pub async fn serve<D, F>(&mut self, socket: &D, shutdown: F) -> Result<()>
    where
        D: Datagram,
        F: Future<Output = ()>,
    {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!("RFCP Receiver started on {}", socket.local_addr()?);
        info!("Target directory: {:?}", self.target_dir);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Receiver stopping: {}", self.stats.summary());
                    return Ok(());
                }
                result = socket.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                            continue;
                        }
                    };

                    if len == 0 {
                        continue;
                    }

                    if let Some(reply) = self.handle_datagram(&buf[..len]) {
                        if let Err(e) = socket.send_to(&reply, peer).await {
                            warn!("응답 전송 실패 ({}): {}", peer, e);
                        }
                    }
                }
            }
        }
    }

    /// 데이터그램 하나 처리, 보낼 응답 바이트 반환
    ///
    /// 해석할 수 없는 데이터그램은 조용히 무시
    pub fn handle_datagram(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        let request = match Request::from_bytes(bytes) {
            Ok(request) => request,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("데이터그램 무시: {}", e);
                return None;
            }
        };

        let response = match self.handle(request) {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(e) => {
                warn!("요청 처리 에러: {}", e);
                return None;
            }
        };

        match response.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("응답 직렬화 실패: {}", e);
                None
            }
        }
    }

    /// 요청 하나 처리
    pub fn handle(&mut self, request: Request) -> Result<Option<Response>> {
        self.stats.requests += 1;

        match request {
            Request::Start(msg) => Ok(self.on_start(msg)),
            Request::Data(msg) => Ok(self.on_data(msg)),
            Request::CheckBlock(msg) => Ok(self.on_check_block(msg)),
            Request::CheckWhole(msg) => self.on_check_whole(msg),
            Request::Confirm(msg) => self.on_confirm(msg),
        }
    }

    fn on_start(&mut self, msg: StartMessage) -> Option<Response> {
        if !is_plain_file_name(&msg.name) {
            warn!("허용되지 않는 파일 이름: {:?}", msg.name);
            self.stats.unknown_target += 1;
            return None;
        }

        let file_id = match self.ids.get(&msg.name) {
            Some(&id) => id,
            None => {
                let id = self.records.len() as FileId;
                info!("File: {} starting to receive file (id {})", msg.name, id);
                self.ids.insert(msg.name.clone(), id);
                self.records.push(ReceptionRecord::new(msg.name.clone()));
                id
            }
        };

        let record = &mut self.records[file_id as usize];
        if record.done {
            self.stats.after_done += 1;
        } else {
            // 크기가 바뀌면 버퍼를 새로 할당 (같은 이름의 다른 파일일 수 있음)
            if record.buffer.is_some() && record.declared_size != msg.file_size {
                warn!(
                    "File: {} size changed {} -> {}, resetting buffer",
                    record.name, record.declared_size, msg.file_size
                );
                record.buffer = None;
                record.verified = false;
            }

            if record.buffer.is_none() {
                record.declared_size = msg.file_size;
                record.buffer = Some(ReassemblyBuffer::new(msg.file_size as usize));
            }
        }

        Some(Response::Start(StartResponseMessage {
            name: msg.name,
            file_id,
            file_size: msg.file_size,
        }))
    }

    fn on_data(&mut self, msg: DataMessage) -> Option<Response> {
        let Some(record) = self.records.get_mut(msg.file_id as usize) else {
            self.stats.unknown_target += 1;
            return None;
        };

        if record.done {
            self.stats.after_done += 1;
        } else {
            let buffer = record.buffer.as_mut()?;
            match buffer.write_packet(msg.index, &msg.payload) {
                Some(true) => {
                    // 스테이징된 사본은 더 이상 버퍼와 같지 않음
                    record.verified = false;
                }
                Some(false) => {}
                None => {
                    debug!(
                        "File: {} packet {} outside declared size {}",
                        record.name, msg.index, record.declared_size
                    );
                    return None;
                }
            }
        }

        Some(Response::DataAck(DataAckMessage {
            file_id: msg.file_id,
            index: msg.index,
        }))
    }

    fn on_check_block(&mut self, msg: CheckMessage) -> Option<Response> {
        let Some(record) = self.records.get(msg.file_id as usize) else {
            self.stats.unknown_target += 1;
            return None;
        };

        if record.done {
            self.stats.after_done += 1;
            return None;
        }

        let digest = record.buffer.as_ref()?.check_digest(msg.index)?;
        debug!(
            "File: {} block at packet {} digest {}",
            record.name, msg.index, digest
        );

        Some(Response::CheckBlock(CheckResponseMessage {
            file_id: msg.file_id,
            index: msg.index,
            digest,
        }))
    }

    fn on_check_whole(&mut self, msg: CheckMessage) -> Result<Option<Response>> {
        let Self {
            target_dir,
            storage,
            records,
            stats,
            ..
        } = self;

        let Some(record) = records.get_mut(msg.file_id as usize) else {
            stats.unknown_target += 1;
            return Ok(None);
        };

        if record.done {
            stats.after_done += 1;
            return Ok(None);
        }

        let Some(buffer) = record.buffer.as_ref() else {
            return Ok(None);
        };

        if !record.verified {
            info!(
                "File: {} received ({} of {} packets), beginning end-to-end check",
                record.name,
                buffer.received_count(),
                buffer.layout().packet_count()
            );
            let retries = stage(&*storage, &staging_path(target_dir, &record.name), buffer)?;
            stats.staging_retries += retries;
            record.verified = true;
        }

        let digest = buffer.digest();
        debug!("File: {} whole digest {}", record.name, digest);

        Ok(Some(Response::CheckWhole(CheckResponseMessage {
            file_id: msg.file_id,
            index: msg.index,
            digest,
        })))
    }

    fn on_confirm(&mut self, msg: ConfirmMessage) -> Result<Option<Response>> {
        let Self {
            target_dir,
            storage,
            records,
            ids,
            stats,
        } = self;

        let ack = Response::ConfirmAck(msg.clone());

        let Some(&file_id) = ids.get(&msg.name) else {
            stats.unknown_target += 1;
            return Ok(Some(ack));
        };
        let record = &mut records[file_id as usize];

        if record.done {
            stats.after_done += 1;
            return Ok(Some(ack));
        }

        let staging = staging_path(target_dir, &record.name);

        if msg.success {
            let Some(buffer) = record.buffer.as_ref() else {
                return Ok(None);
            };

            // 지연된 실패 통보로 스테이징 파일이 지워졌을 수 있음
            if !record.verified {
                stats.staging_retries += stage(&*storage, &staging, buffer)?;
                record.verified = true;
            }

            storage.rename(&staging, &target_dir.join(&record.name))?;
            record.done = true;
            record.buffer = None;
            stats.committed += 1;
            info!("File: {} end-to-end check succeeded, committed", record.name);
        } else {
            record.verified = false;
            storage.remove(&staging)?;
            stats.failed_confirms += 1;
            info!("File: {} end-to-end check failed, awaiting resend", record.name);
        }

        Ok(Some(ack))
    }
}

fn staging_path(target_dir: &Path, name: &str) -> PathBuf {
    target_dir.join(format!("{}{}", name, STAGING_SUFFIX))
}

/// 버퍼를 스테이징 파일에 쓰고 다시 읽어 다이제스트가 같을 때까지 반복
///
/// 저장소 장애는 영구적이지 않다고 가정하므로 횟수 제한 없음.
/// 첫 시도 이후 반복 횟수 반환
fn stage<S: Storage + ?Sized>(storage: &S, path: &Path, buffer: &ReassemblyBuffer) -> Result<u64> {
    let expected = buffer.digest();
    let mut retries = 0;

    loop {
        storage.write_file(path, buffer.as_slice())?;

        let on_disk = storage.file_len(path)?;
        if on_disk == buffer.len() as u64 {
            let read_back = read_exact_at(storage, path, 0, buffer.len())?;
            if Digest::of(&read_back) == expected {
                break;
            }
        }

        retries += 1;
        debug!("{:?}: 스테이징 검증 실패, 재시도 {}", path, retries);
    }

    Ok(retries)
}

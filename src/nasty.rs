//! 장애 주입 래퍼
//!
//! - NastySocket: 전송 시 유실/중복/손상/순서 변경
//! - NastyStorage: 읽기/쓰기 호출마다 조용한 바이트 손상
//!
//! CLI의 network/file nastiness 레벨과 테스트 시나리오가 사용함

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::link::Datagram;
use crate::storage::Storage;

/// 장애 확률 (각 0.0 ~ 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaultProfile {
    /// 전송 유실
    pub drop: f64,

    /// 중복 전송
    pub duplicate: f64,

    /// 한 바이트 손상
    pub corrupt: f64,

    /// 다음 전송 뒤로 미룸 (순서 변경)
    pub delay: f64,
}

impl FaultProfile {
    pub const CLEAN: FaultProfile = FaultProfile {
        drop: 0.0,
        duplicate: 0.0,
        corrupt: 0.0,
        delay: 0.0,
    };

    /// 네트워크 nastiness 레벨 (0 = 정상, 4 이상 = 최대)
    pub fn network(level: u32) -> Self {
        let (drop, duplicate, corrupt, delay) = match level {
            0 => return Self::CLEAN,
            1 => (0.05, 0.02, 0.02, 0.02),
            2 => (0.10, 0.05, 0.05, 0.05),
            3 => (0.20, 0.10, 0.10, 0.10),
            _ => (0.30, 0.15, 0.15, 0.15),
        };
        Self {
            drop,
            duplicate,
            corrupt,
            delay,
        }
    }

    /// 파일 nastiness 레벨: 호출당 손상 확률만 사용
    pub fn file(level: u32) -> Self {
        let corrupt = match level {
            0 => return Self::CLEAN,
            1 => 0.01,
            2 => 0.05,
            3 => 0.10,
            _ => 0.20,
        };
        Self {
            corrupt,
            ..Self::CLEAN
        }
    }

    pub fn is_clean(&self) -> bool {
        *self == Self::CLEAN
    }
}

/// 주입된 장애 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounters {
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub delayed: u64,
}

struct SocketState {
    rng: StdRng,
    held: Option<(Vec<u8>, SocketAddr)>,
    counters: FaultCounters,
}

/// 장애 주입 데이터그램 소켓
pub struct NastySocket<D> {
    inner: D,
    profile: FaultProfile,
    state: Mutex<SocketState>,
}

impl<D: Datagram> NastySocket<D> {
    pub fn new(inner: D, profile: FaultProfile) -> Self {
        Self::with_rng(inner, profile, StdRng::from_entropy())
    }

    /// 재현 가능한 장애 순서 (테스트용)
    pub fn with_seed(inner: D, profile: FaultProfile, seed: u64) -> Self {
        Self::with_rng(inner, profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(inner: D, profile: FaultProfile, rng: StdRng) -> Self {
        Self {
            inner,
            profile,
            state: Mutex::new(SocketState {
                rng,
                held: None,
                counters: FaultCounters::default(),
            }),
        }
    }

    pub fn counters(&self) -> FaultCounters {
        self.state.lock().counters
    }

    /// 이번 전송에서 실제로 내보낼 데이터그램 결정
    fn plan(&self, buf: &[u8], target: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut state = self.state.lock();
        let held = state.held.take();
        let mut outgoing = Vec::with_capacity(3);

        if state.rng.gen_bool(self.profile.drop.clamp(0.0, 1.0)) {
            state.counters.dropped += 1;
            trace!("nasty: drop {} bytes", buf.len());
        } else {
            let mut bytes = buf.to_vec();

            if !bytes.is_empty() && state.rng.gen_bool(self.profile.corrupt.clamp(0.0, 1.0)) {
                let at = state.rng.gen_range(0..bytes.len());
                bytes[at] ^= state.rng.gen_range(1..=u8::MAX);
                state.counters.corrupted += 1;
            }

            if state.rng.gen_bool(self.profile.duplicate.clamp(0.0, 1.0)) {
                outgoing.push((bytes.clone(), target));
                state.counters.duplicated += 1;
            }

            if held.is_none() && state.rng.gen_bool(self.profile.delay.clamp(0.0, 1.0)) {
                state.held = Some((bytes, target));
                state.counters.delayed += 1;
            } else {
                outgoing.push((bytes, target));
            }
        }

        // 미뤄둔 데이터그램은 이번 전송 뒤에 나감
        if let Some(previous) = held {
            outgoing.push(previous);
        }
        outgoing
    }
}

impl<D: Datagram> Datagram for NastySocket<D> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let outgoing = self.plan(buf, target);
        for (bytes, addr) in outgoing {
            self.inner.send_to(&bytes, addr).await?;
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

struct StorageState {
    rng: StdRng,
    counters: FaultCounters,
}

/// 장애 주입 저장소
pub struct NastyStorage<S> {
    inner: S,
    corrupt: f64,
    state: Mutex<StorageState>,
}

impl<S: Storage> NastyStorage<S> {
    pub fn new(inner: S, profile: FaultProfile) -> Self {
        Self::with_rng(inner, profile, StdRng::from_entropy())
    }

    pub fn with_seed(inner: S, profile: FaultProfile, seed: u64) -> Self {
        Self::with_rng(inner, profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(inner: S, profile: FaultProfile, rng: StdRng) -> Self {
        Self {
            inner,
            corrupt: profile.corrupt.clamp(0.0, 1.0),
            state: Mutex::new(StorageState {
                rng,
                counters: FaultCounters::default(),
            }),
        }
    }

    pub fn counters(&self) -> FaultCounters {
        self.state.lock().counters
    }

    /// 확률적으로 한 바이트를 뒤집음, 손상했으면 true
    fn maybe_corrupt(&self, bytes: &mut [u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }

        let mut state = self.state.lock();
        if !state.rng.gen_bool(self.corrupt) {
            return false;
        }

        let at = state.rng.gen_range(0..bytes.len());
        bytes[at] ^= state.rng.gen_range(1..=u8::MAX);
        state.counters.corrupted += 1;
        true
    }
}

impl<S: Storage> Storage for NastyStorage<S> {
    fn file_len(&self, path: &Path) -> io::Result<u64> {
        self.inner.file_len(path)
    }

    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read_at(path, offset, buf)?;
        if self.maybe_corrupt(&mut buf[..n]) {
            trace!("nasty: corrupted read of {:?} at {}", path, offset);
        }
        Ok(n)
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut bytes = data.to_vec();
        if self.maybe_corrupt(&mut bytes) {
            trace!("nasty: corrupted write of {:?} at {}", path, offset);
        }
        self.inner.write_at(path, offset, &bytes)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut bytes = data.to_vec();
        if self.maybe_corrupt(&mut bytes) {
            trace!("nasty: corrupted write of {:?}", path);
        }
        self.inner.write_file(path, &bytes)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_exact_at, DiskStorage};
    use tokio::net::UdpSocket;

    #[test]
    fn test_levels_increase() {
        assert!(FaultProfile::network(0).is_clean());
        assert!(FaultProfile::file(0).is_clean());
        for level in 1..4 {
            assert!(FaultProfile::network(level).drop < FaultProfile::network(level + 1).drop);
            assert!(FaultProfile::file(level).corrupt < FaultProfile::file(level + 1).corrupt);
        }
        assert_eq!(FaultProfile::file(3).drop, 0.0);
    }

    #[tokio::test]
    async fn test_clean_socket_passes_through() {
        let a = NastySocket::new(UdpSocket::bind("127.0.0.1:0").await.unwrap(), FaultProfile::CLEAN);
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        a.send_to(b"ping", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
        assert_eq!(a.counters(), FaultCounters::default());
    }

    #[tokio::test]
    async fn test_drop_everything() {
        let profile = FaultProfile {
            drop: 1.0,
            ..FaultProfile::CLEAN
        };
        let a = NastySocket::with_seed(UdpSocket::bind("127.0.0.1:0").await.unwrap(), profile, 7);
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        for _ in 0..5 {
            a.send_to(b"lost", b.local_addr().unwrap()).await.unwrap();
        }
        assert_eq!(a.counters().dropped, 5);

        let mut buf = [0u8; 16];
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), b.recv_from(&mut buf)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_delay_reorders() {
        let profile = FaultProfile {
            delay: 1.0,
            ..FaultProfile::CLEAN
        };
        let a = NastySocket::with_seed(UdpSocket::bind("127.0.0.1:0").await.unwrap(), profile, 1);
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = b.local_addr().unwrap();

        a.send_to(b"first", target).await.unwrap();
        a.send_to(b"second", target).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
    }

    #[test]
    fn test_storage_corrupts_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        DiskStorage.write_file(&path, &[0u8; 64]).unwrap();

        let always = FaultProfile::file(4);
        let storage = NastyStorage::with_seed(
            DiskStorage,
            FaultProfile { corrupt: 1.0, ..always },
            3,
        );

        let read = read_exact_at(&storage, &path, 0, 64).unwrap();
        assert_ne!(read, vec![0u8; 64]);
        assert_eq!(storage.counters().corrupted, 1);

        // 디스크 내용 자체는 그대로
        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8; 64]);
    }
}

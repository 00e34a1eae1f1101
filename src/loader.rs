//! 원본 파일 로더 (클라이언트측)
//!
//! 저장소 읽기가 조용히 손상될 수 있으므로 한 번 읽은 결과를 믿지 않음.
//! 두 가지 분할(절반 단위, 전체)로 읽은 다이제스트가 일치하고,
//! 같은 영역을 연속으로 여러 번 읽어 같은 값이 나와야 내용을 채택함.
//!
//! 1바이트 파일은 절반 분할이 정의되지 않으므로 임시로 2바이트로 늘렸다가
//! 읽기가 끝나면 원래 바이트로 되돌리고 다시 읽어 확인함

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::hash::Digest;
use crate::storage::{read_exact_at, Storage};
use crate::{Config, Error, Result};

/// 1바이트 파일 임시 패딩 값
const PAD_BYTE: u8 = b'A';

/// 복원 중 I/O 에러를 재시도하는 최대 횟수
const RESTORE_ERROR_LIMIT: u32 = 16;

/// 로드 결과
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub content: Bytes,

    /// 두 분할이 일치할 때까지 걸린 라운드 수
    pub rounds: u32,
}

/// 원본 파일을 검증된 메모리 사본으로 읽기
pub fn load_file<S: Storage + ?Sized>(storage: &S, path: &Path, config: &Config) -> Result<LoadedFile> {
    let len = storage.file_len(path)?;
    if len > u32::MAX as u64 {
        return Err(Error::FileTooLarge {
            len,
            max: u32::MAX as u64,
        });
    }

    let size = len as usize;
    if size == 0 {
        return Ok(LoadedFile {
            content: Bytes::new(),
            rounds: 0,
        });
    }

    let (content, rounds) = if size == 1 {
        load_single_byte(storage, path, config)?
    } else {
        read_verified(storage, path, size, config)?
    };

    if rounds > 1 {
        debug!("{:?}: 읽기 검증 {} 라운드", path, rounds);
    }

    Ok(LoadedFile {
        content: Bytes::from(content),
        rounds,
    })
}

/// 1바이트 파일: 패딩 후 읽고, 읽기 성공 여부와 관계없이 원래 바이트로 복원
fn load_single_byte<S: Storage + ?Sized>(
    storage: &S,
    path: &Path,
    config: &Config,
) -> Result<(Vec<u8>, u32)> {
    // 패딩 전에 확보한 원래 바이트, 패딩 후 읽기가 실패해도 이 값으로 되돌림
    let original = stable_region(storage, path, 0, 1, config.loader_stable_reads)?[0];

    // 패딩 쓰기 자체가 실패해도 일부가 기록됐을 수 있으므로 복원은 항상 수행
    let verified = storage
        .write_at(path, 1, &[PAD_BYTE])
        .map_err(Error::from)
        .and_then(|()| read_verified(storage, path, 2, config));

    let byte = match &verified {
        Ok((content, _)) => content[0],
        Err(_) => original,
    };
    restore_single_byte(storage, path, byte)?;

    let (mut content, rounds) = verified?;
    content.truncate(1);
    Ok((content, rounds))
}

/// 절반 분할 결과와 전체 읽기 결과가 같은 다이제스트가 될 때까지 반복
fn read_verified<S: Storage + ?Sized>(
    storage: &S,
    path: &Path,
    len: usize,
    config: &Config,
) -> Result<(Vec<u8>, u32)> {
    let half = len.div_ceil(2);
    let mut rounds = 0;

    loop {
        rounds += 1;

        let mut assembled = Vec::with_capacity(len);
        let mut offset = 0;
        while offset < len {
            let region = half.min(len - offset);
            assembled.extend_from_slice(&stable_region(
                storage,
                path,
                offset,
                region,
                config.loader_stable_reads,
            )?);
            offset += region;
        }
        let expected = Digest::of(&assembled);

        for _ in 0..config.loader_whole_reads.max(1) {
            let whole = read_exact_at(storage, path, 0, len)?;
            if Digest::of(&whole) == expected {
                return Ok((whole, rounds));
            }
        }

        debug!("{:?}: 분할 읽기 불일치, 라운드 {} 재시도", path, rounds);
    }
}

/// 같은 영역을 `required`번 연속 동일하게 읽을 때까지 반복
fn stable_region<S: Storage + ?Sized>(
    storage: &S,
    path: &Path,
    offset: usize,
    len: usize,
    required: u32,
) -> Result<Vec<u8>> {
    let mut current = read_exact_at(storage, path, offset as u64, len)?;
    let mut digest = Digest::of(&current);
    let mut streak = 1;

    while streak < required {
        let again = read_exact_at(storage, path, offset as u64, len)?;
        let again_digest = Digest::of(&again);

        if again_digest == digest {
            streak += 1;
        } else {
            streak = 1;
            current = again;
            digest = again_digest;
        }
    }

    Ok(current)
}

fn check_restored<S: Storage + ?Sized>(storage: &S, path: &Path, byte: u8) -> std::io::Result<bool> {
    storage.write_file(path, &[byte])?;
    Ok(storage.file_len(path)? == 1 && read_exact_at(storage, path, 0, 1)?[0] == byte)
}

/// 패딩 제거: 원래 한 바이트로 되쓰고 다시 읽어 확인
fn restore_single_byte<S: Storage + ?Sized>(storage: &S, path: &Path, byte: u8) -> Result<()> {
    let mut attempts = 0;
    let mut errors = 0;

    loop {
        attempts += 1;
        match check_restored(storage, path, byte) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) if errors < RESTORE_ERROR_LIMIT => {
                errors += 1;
                warn!("{:?}: 1바이트 복원 에러, 재시도: {}", path, e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if attempts > 1 {
        warn!("{:?}: 1바이트 복원 {}회 시도", path, attempts);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nasty::{FaultProfile, NastyStorage};
    use crate::storage::DiskStorage;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// 패딩 쓰기 이후 첫 읽기를 한 번 실패시키는 저장소
    #[derive(Default)]
    struct FailReadAfterWrite {
        written: AtomicBool,
        failed: AtomicBool,
    }

    impl Storage for FailReadAfterWrite {
        fn file_len(&self, path: &Path) -> io::Result<u64> {
            DiskStorage.file_len(path)
        }

        fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            if self.written.load(Ordering::SeqCst) && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
            }
            DiskStorage.read_at(path, offset, buf)
        }

        fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> io::Result<()> {
            self.written.store(true, Ordering::SeqCst);
            DiskStorage.write_at(path, offset, data)
        }

        fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            DiskStorage.write_file(path, data)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            DiskStorage.rename(from, to)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            DiskStorage.remove(path)
        }
    }

    /// u32 범위를 넘는 길이를 보고하고 읽기는 허용하지 않는 저장소
    struct OversizedStorage;

    impl Storage for OversizedStorage {
        fn file_len(&self, _path: &Path) -> io::Result<u64> {
            Ok(u32::MAX as u64 + 1)
        }

        fn read_at(&self, _path: &Path, _offset: u64, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("oversized file must be rejected before reading");
        }

        fn write_at(&self, _path: &Path, _offset: u64, _data: &[u8]) -> io::Result<()> {
            panic!("oversized file must not be written");
        }

        fn write_file(&self, _path: &Path, _data: &[u8]) -> io::Result<()> {
            panic!("oversized file must not be written");
        }

        fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            Ok(())
        }

        fn remove(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    fn write(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_clean_file() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..10_007).map(|i| (i % 253) as u8).collect();
        let path = write(dir.path(), "data.bin", &content);

        let loaded = load_file(&DiskStorage, &path, &Config::default()).unwrap();
        assert_eq!(loaded.content.as_ref(), content.as_slice());
        assert_eq!(loaded.rounds, 1);
    }

    #[test]
    fn test_empty_file_is_trivial() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty", b"");

        let loaded = load_file(&DiskStorage, &path, &Config::default()).unwrap();
        assert!(loaded.content.is_empty());
        assert_eq!(loaded.rounds, 0);
    }

    #[test]
    fn test_single_byte_file_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "one", b"z");

        let loaded = load_file(&DiskStorage, &path, &Config::default()).unwrap();
        assert_eq!(loaded.content.as_ref(), b"z");
        assert_eq!(std::fs::read(&path).unwrap(), b"z");
    }

    #[test]
    fn test_load_through_corrupting_storage() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..4_321).map(|i| (i * 31 % 256) as u8).collect();
        let path = write(dir.path(), "flaky.bin", &content);

        let profile = FaultProfile {
            corrupt: 0.5,
            ..FaultProfile::CLEAN
        };
        let storage = NastyStorage::with_seed(DiskStorage, profile, 42);
        let loaded = load_file(&storage, &path, &Config::default()).unwrap();

        assert_eq!(loaded.content.as_ref(), content.as_slice());
        assert!(storage.counters().corrupted > 0);
    }

    #[test]
    fn test_single_byte_through_corrupting_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "one", &[0x7F]);

        let storage = NastyStorage::with_seed(DiskStorage, FaultProfile::file(4), 9);
        let loaded = load_file(&storage, &path, &Config::default()).unwrap();

        assert_eq!(loaded.content.as_ref(), &[0x7F]);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x7F]);
    }

    #[test]
    fn test_single_byte_restored_after_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "one", b"z");

        let storage = FailReadAfterWrite::default();
        let err = load_file(&storage, &path, &Config::default()).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert!(storage.failed.load(Ordering::SeqCst));
        assert_eq!(std::fs::read(&path).unwrap(), b"z");
    }

    #[test]
    fn test_oversized_file_rejected_before_reading() {
        let err = load_file(&OversizedStorage, Path::new("huge.bin"), &Config::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::FileTooLarge { len, max } if len == u32::MAX as u64 + 1 && max == u32::MAX as u64
        ));
    }
}

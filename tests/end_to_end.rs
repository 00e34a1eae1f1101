//! 루프백 UDP 위에서 서버 태스크와 클라이언트를 함께 돌리는 종단 간 테스트

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use rfcp::block::BLOCK_SIZE;
use rfcp::message::DataMessage;
use rfcp::nasty::{FaultProfile, NastySocket, NastyStorage};
use rfcp::{
    copy_directory, transfer_file, Config, Datagram, DiskStorage, Link, Receiver, ReceptionStats,
    Request, Storage,
};

struct Server {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<ReceptionStats>,
}

impl Server {
    async fn shutdown(self) -> ReceptionStats {
        let _ = self.stop.send(());
        self.handle.await.unwrap()
    }
}

async fn spawn_server<S, D>(target: &Path, socket: D, storage: S) -> Server
where
    S: Storage + 'static,
    D: Datagram + 'static,
{
    let addr = socket.local_addr().unwrap();
    let (stop, rx) = oneshot::channel::<()>();
    let mut receiver = Receiver::new(target, storage);

    let handle = tokio::spawn(async move {
        receiver
            .serve(&socket, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        receiver.stats().clone()
    });

    Server { addr, stop, handle }
}

async fn clean_server(target: &Path) -> Server {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    spawn_server(target, socket, DiskStorage).await
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn test_round_trip_sizes() {
    let target = tempfile::tempdir().unwrap();
    let server = clean_server(target.path()).await;
    let mut link = Link::new(client_socket().await, server.addr, Config::lossless());

    let sizes = [0usize, 1, 499, 500, 501, 1_300, 2 * BLOCK_SIZE + 123];
    for (i, &size) in sizes.iter().enumerate() {
        let name = format!("file-{}", size);
        let content = pattern(size, i as u8);

        let report = transfer_file(&mut link, &name, Bytes::from(content.clone()))
            .await
            .unwrap();
        assert_eq!(report.attempts, 1, "{}", name);
        assert_eq!(std::fs::read(target.path().join(&name)).unwrap(), content, "{}", name);
        assert!(!target.path().join(format!("{}.tmp", name)).exists());
    }

    let stats = server.shutdown().await;
    assert_eq!(stats.committed, sizes.len() as u64);
}

/// CheckWhole 직전에 한 번만 위조된 데이터 패킷을 끼워 넣는 소켓
///
/// 서버 버퍼가 블록 확인 이후에 손상되는 상황을 재현함.
/// 스테이징 파일 손상만으로는 전체 확인이 실패하지 않음: 서버가 다시 읽어 맞을 때까지
/// 다시 쓰므로 (receiver `test_staging_survives_corrupting_storage` 참고)
struct ForgeOnce {
    inner: UdpSocket,
    forged: AtomicBool,
}

impl Datagram for ForgeOnce {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if let Ok(Request::CheckWhole(check)) = Request::from_bytes(buf) {
            if !self.forged.swap(true, Ordering::SeqCst) {
                let forged = Request::Data(DataMessage {
                    file_id: check.file_id,
                    index: 0,
                    payload: Bytes::from_static(b"forged!"),
                });
                self.inner.send_to(&forged.to_bytes().unwrap(), target).await?;
            }
        }
        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[tokio::test]
async fn test_whole_file_retry_converges() {
    let target = tempfile::tempdir().unwrap();
    let server = clean_server(target.path()).await;

    let socket = ForgeOnce {
        inner: client_socket().await,
        forged: AtomicBool::new(false),
    };
    let mut link = Link::new(socket, server.addr, Config::lossless());

    let content = pattern(1_300, 5);
    let report = transfer_file(&mut link, "victim.bin", Bytes::from(content.clone()))
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert_eq!(report.stats.whole_attempts, 2);
    assert_eq!(std::fs::read(target.path().join("victim.bin")).unwrap(), content);

    let stats = server.shutdown().await;
    assert_eq!(stats.failed_confirms, 1);
    assert_eq!(stats.committed, 1);
}

#[tokio::test]
async fn test_reordered_and_duplicated_traffic() {
    let target = tempfile::tempdir().unwrap();

    let shuffle = FaultProfile {
        duplicate: 0.3,
        delay: 0.3,
        ..FaultProfile::CLEAN
    };
    let server_socket = NastySocket::with_seed(UdpSocket::bind("127.0.0.1:0").await.unwrap(), shuffle, 21);
    let server = spawn_server(target.path(), server_socket, DiskStorage).await;

    let socket = NastySocket::with_seed(client_socket().await, shuffle, 12);
    let mut link = Link::new(socket, server.addr, Config::lossless());

    let content = pattern(BLOCK_SIZE + 4_321, 77);
    let report = tokio::time::timeout(
        Duration::from_secs(60),
        transfer_file(&mut link, "shuffled.bin", Bytes::from(content.clone())),
    )
    .await
    .expect("transfer did not finish")
    .unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(std::fs::read(target.path().join("shuffled.bin")).unwrap(), content);
    server.shutdown().await;
}

#[tokio::test]
async fn test_directory_over_lossy_channel_and_flaky_storage() {
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();

    let files = [("empty", 0usize), ("one", 1), ("small", 1_300)];
    for (i, (name, size)) in files.iter().enumerate() {
        std::fs::write(source.path().join(name), pattern(*size, i as u8 + 1)).unwrap();
    }

    let flaky = FaultProfile {
        corrupt: 0.05,
        ..FaultProfile::CLEAN
    };
    let lossy = FaultProfile {
        drop: 0.10,
        ..FaultProfile::CLEAN
    };

    let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server = spawn_server(
        target.path(),
        server_socket,
        NastyStorage::with_seed(DiskStorage, flaky, 5),
    )
    .await;

    let socket = NastySocket::with_seed(client_socket().await, lossy, 10);
    let client_storage = NastyStorage::with_seed(DiskStorage, flaky, 6);
    let mut link = Link::new(socket, server.addr, Config::lossless());

    let summary = tokio::time::timeout(
        Duration::from_secs(60),
        copy_directory(&mut link, &client_storage, source.path()),
    )
    .await
    .expect("transfer did not finish")
    .unwrap();

    assert_eq!(summary.files_sent(), 3);
    assert!(summary.skipped.is_empty());
    assert!(summary.whole_attempts() >= 3);

    for (i, (name, size)) in files.iter().enumerate() {
        assert_eq!(
            std::fs::read(target.path().join(name)).unwrap(),
            pattern(*size, i as u8 + 1),
            "{}",
            name
        );
        // 원본도 그대로 (1바이트 파일 패딩 복원 포함)
        assert_eq!(
            std::fs::read(source.path().join(name)).unwrap(),
            pattern(*size, i as u8 + 1)
        );
    }

    let stats = server.shutdown().await;
    assert_eq!(stats.committed, 3);
}

#[tokio::test]
async fn test_resend_after_commit_is_ignored() {
    let target = tempfile::tempdir().unwrap();
    let server = clean_server(target.path()).await;
    let mut link = Link::new(client_socket().await, server.addr, Config::lossless());

    transfer_file(&mut link, "keep.txt", Bytes::from_static(b"first"))
        .await
        .unwrap();

    // 완료된 파일에 대한 재전송: Start/Data는 응답받지만 CheckBlock은 무응답
    let config = Config {
        control_attempts: 2,
        ..Config::lossless()
    };
    let mut link = Link::new(client_socket().await, server.addr, config);
    let err = transfer_file(&mut link, "keep.txt", Bytes::from_static(b"second"))
        .await
        .unwrap_err();
    assert!(err.is_fatal());

    assert_eq!(std::fs::read(target.path().join("keep.txt")).unwrap(), b"first");
    let stats = server.shutdown().await;
    assert_eq!(stats.committed, 1);
    assert!(stats.after_done > 0);
}

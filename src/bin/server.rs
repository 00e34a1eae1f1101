//! RFCP 서버 (수신자) - Reliable File Copy Protocol
//!
//! 클라이언트가 보낸 파일을 재조립하고, 디스크에 쓴 사본을 검증한 뒤
//! 클라이언트 확인 통보를 받으면 대상 디렉터리에 커밋
//!
//! 사용법:
//!   cargo run --release --bin rfcp-server -- <bind-addr> <network-fault> <file-fault> <target-dir>
//!
//! 예시:
//!   # 장애 주입 없이 수신
//!   cargo run --release --bin rfcp-server -- 0.0.0.0:9000 0 0 ./received
//!
//!   # 네트워크 레벨 2, 파일 레벨 1 장애 주입
//!   RUST_LOG=rfcp=debug cargo run --release --bin rfcp-server -- 0.0.0.0:9000 2 1 ./received

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use tokio::net::UdpSocket;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rfcp::nasty::{FaultProfile, NastySocket, NastyStorage};
use rfcp::storage::DiskStorage;
use rfcp::Receiver;

const USAGE: &str = "Usage: rfcp-server <bind-addr> <network-fault> <file-fault> <target-dir>";

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    network_fault: u32,
    file_fault: u32,
    target_dir: PathBuf,
}

fn parse_args() -> Result<ServerConfig, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!(
            r#"RFCP Server - Reliable File Copy Protocol 서버

{}

인자:
  <bind-addr>       UDP 바인드 주소 (예: 0.0.0.0:9000)
  <network-fault>   네트워크 장애 주입 레벨 (0 = 없음, 4 = 최대)
  <file-fault>      파일 장애 주입 레벨 (0 = 없음, 4 = 최대)
  <target-dir>      수신 파일을 저장할 디렉터리

환경 변수:
  RUST_LOG          로그 필터 (기본: info)"#,
            USAGE
        );
        std::process::exit(0);
    }

    if args.len() != 5 {
        return Err(format!("인자 개수가 잘못됨: {}개", args.len().saturating_sub(1)));
    }

    Ok(ServerConfig {
        bind_addr: args[1]
            .parse()
            .map_err(|e| format!("유효한 주소 필요 ({}): {}", args[1], e))?,
        network_fault: args[2]
            .parse()
            .map_err(|e| format!("유효한 숫자 필요 ({}): {}", args[2], e))?,
        file_fault: args[3]
            .parse()
            .map_err(|e| format!("유효한 숫자 필요 ({}): {}", args[3], e))?,
        target_dir: PathBuf::from(&args[4]),
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server_config = match parse_args() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{}\n{}", msg, USAGE);
            return Ok(ExitCode::from(1));
        }
    };

    if !server_config.target_dir.is_dir() {
        error!("Target is not a directory: {:?}", server_config.target_dir);
        return Ok(ExitCode::from(8));
    }

    let network = FaultProfile::network(server_config.network_fault);
    let file = FaultProfile::file(server_config.file_fault);

    info!("RFCP Server starting...");
    info!("Network fault level: {} ({:?})", server_config.network_fault, network);
    info!("File fault level: {} ({:?})", server_config.file_fault, file);

    let socket = NastySocket::new(UdpSocket::bind(server_config.bind_addr).await?, network);
    let storage = NastyStorage::new(DiskStorage, file);
    let mut receiver = Receiver::new(&server_config.target_dir, storage);

    receiver
        .serve(&socket, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Ctrl-C 핸들러 설치 실패: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let counters = socket.counters();
    info!(
        "Injected faults: dropped {} | duplicated {} | corrupted {} | delayed {}",
        counters.dropped, counters.duplicated, counters.corrupted, counters.delayed
    );

    Ok(ExitCode::SUCCESS)
}

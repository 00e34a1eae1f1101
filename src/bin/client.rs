//! RFCP 클라이언트 (송신자) - Reliable File Copy Protocol
//!
//! 원본 디렉터리의 모든 일반 파일을 서버로 전송하고 종단 간 검증
//!
//! 사용법:
//!   cargo run --release --bin rfcp-client -- <server-addr> <network-fault> <file-fault> <source-dir>
//!
//! 예시:
//!   # 로컬 서버로 전송
//!   cargo run --release --bin rfcp-client -- 127.0.0.1:9000 0 0 ./outgoing
//!
//!   # 장애 주입 + 상세 로그
//!   RUST_LOG=rfcp=debug cargo run --release --bin rfcp-client -- 127.0.0.1:9000 3 2 ./outgoing

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rfcp::link::Link;
use rfcp::nasty::{FaultProfile, NastySocket, NastyStorage};
use rfcp::sender::copy_directory;
use rfcp::storage::DiskStorage;
use rfcp::{Config, Error};

const USAGE: &str = "Usage: rfcp-client <server-addr> <network-fault> <file-fault> <source-dir>";

/// 클라이언트 설정
struct ClientConfig {
    server_addr: SocketAddr,
    network_fault: u32,
    file_fault: u32,
    source_dir: PathBuf,
}

fn parse_args() -> Result<ClientConfig, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!(
            r#"RFCP Client - Reliable File Copy Protocol 클라이언트

{}

인자:
  <server-addr>     서버 주소 (예: 127.0.0.1:9000)
  <network-fault>   네트워크 장애 주입 레벨 (0 = 없음, 4 = 최대)
  <file-fault>      파일 장애 주입 레벨 (0 = 없음, 4 = 최대)
  <source-dir>      보낼 파일이 있는 디렉터리

환경 변수:
  RUST_LOG          로그 필터 (기본: info)"#,
            USAGE
        );
        std::process::exit(0);
    }

    if args.len() != 5 {
        return Err(format!("인자 개수가 잘못됨: {}개", args.len().saturating_sub(1)));
    }

    Ok(ClientConfig {
        server_addr: args[1]
            .parse()
            .map_err(|e| format!("유효한 주소 필요 ({}): {}", args[1], e))?,
        network_fault: args[2]
            .parse()
            .map_err(|e| format!("유효한 숫자 필요 ({}): {}", args[2], e))?,
        file_fault: args[3]
            .parse()
            .map_err(|e| format!("유효한 숫자 필요 ({}): {}", args[3], e))?,
        source_dir: PathBuf::from(&args[4]),
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = match parse_args() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{}\n{}", msg, USAGE);
            return Ok(ExitCode::from(1));
        }
    };

    let network = FaultProfile::network(client_config.network_fault);
    let file = FaultProfile::file(client_config.file_fault);
    let config = if network.is_clean() {
        Config::default()
    } else {
        Config::unstable_network()
    };

    info!("RFCP Client starting...");
    info!("Server: {}", client_config.server_addr);
    info!("Source directory: {:?}", client_config.source_dir);
    info!("Network fault level: {} | File fault level: {}", client_config.network_fault, client_config.file_fault);
    info!(
        "Read timeout: {}ms | Control attempts: {} | Data attempts: {}",
        config.read_timeout_ms, config.control_attempts, config.data_attempts
    );

    let bind_addr: SocketAddr = if client_config.server_addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = NastySocket::new(UdpSocket::bind(bind_addr).await?, network);
    let storage = NastyStorage::new(DiskStorage, file);
    let mut link = Link::new(socket, client_config.server_addr, config);

    match copy_directory(&mut link, &storage, &client_config.source_dir).await {
        Ok(summary) => {
            info!(
                "Done: {} sent, {} skipped, {} whole-file attempts",
                summary.files_sent(),
                summary.skipped.len(),
                summary.whole_attempts()
            );
            info!("{}", summary.stats.summary());
            for name in &summary.skipped {
                warn!("Skipped: {}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::NotADirectory(path)) => {
            error!("Source is not a directory: {:?}", path);
            Ok(ExitCode::from(8))
        }
        Err(e) => {
            error!("Transfer aborted: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

//! 프로토콜 설정

use std::time::Duration;

use crate::{DEFAULT_QUEUE_DEPTH, DEFAULT_RECV_BUFFER_SIZE};

/// 송신 히스토리 보존 정책
///
/// `min_age` 이내에 보낸 프레임은 트래픽 양과 무관하게 항상 보존된다.
/// 그 이후에는 `max_bytes` 또는 `max_age` 중 하나라도 넘으면 가장 오래된 것부터 제거.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// 최소 보존 시간
    pub min_age: Duration,

    /// 최대 보존 시간
    pub max_age: Duration,

    /// 최대 보존 바이트 (시퀀스 간격 기준)
    pub max_bytes: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::from_secs(10),
            max_age: Duration::from_secs(20),
            max_bytes: 50 * 1000 * 1000, // 50MB
        }
    }
}

impl HistoryConfig {
    pub fn new(min_age: Duration, max_age: Duration, max_bytes: u64) -> Self {
        Self {
            min_age,
            max_age,
            max_bytes,
        }
    }
}

/// mbus 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 송신 히스토리 보존 정책
    pub history: HistoryConfig,

    /// 수신 큐 깊이 (intake -> sequencing)
    pub intake_queue_depth: usize,

    /// 전달 큐 깊이 (sequencing -> 애플리케이션)
    pub delivery_queue_depth: usize,

    /// 송신자 컨트롤 큐 깊이
    pub command_queue_depth: usize,

    /// 수신 버퍼 크기 (패킷 최대 크기)
    pub recv_buffer_size: usize,

    /// 이 시간 동안 패킷이 없는 피어는 테이블에서 제거
    /// None이면 제거하지 않음
    pub peer_idle_ttl: Option<Duration>,

    /// 유휴 피어 검사 주기
    pub peer_eviction_interval: Duration,

    /// intake 루프가 실행 플래그를 확인하는 간격
    pub intake_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            intake_queue_depth: DEFAULT_QUEUE_DEPTH,
            delivery_queue_depth: DEFAULT_QUEUE_DEPTH,
            command_queue_depth: DEFAULT_QUEUE_DEPTH,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            peer_idle_ttl: Some(Duration::from_secs(300)), // 5분
            peer_eviction_interval: Duration::from_secs(10),
            intake_poll_interval: Duration::from_millis(10),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 히스토리 정책만 바꾼 설정
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// 저사양 기기용 설정
    pub fn low_spec() -> Self {
        Self {
            history: HistoryConfig {
                min_age: Duration::from_secs(2),
                max_age: Duration::from_secs(5),
                max_bytes: 4 * 1000 * 1000, // 4MB
            },
            intake_queue_depth: 4,
            delivery_queue_depth: 4,
            command_queue_depth: 4,
            recv_buffer_size: 2048,
            peer_idle_ttl: Some(Duration::from_secs(60)),
            peer_eviction_interval: Duration::from_secs(5),
            intake_poll_interval: Duration::from_millis(20),
        }
    }

    /// 손실이 잦은 네트워크용 설정 (재전송 여유를 위해 히스토리를 길게 보존)
    pub fn long_retention() -> Self {
        Self {
            history: HistoryConfig {
                min_age: Duration::from_secs(30),
                max_age: Duration::from_secs(120),
                max_bytes: 256 * 1000 * 1000, // 256MB
            },
            intake_queue_depth: 64,
            delivery_queue_depth: 64,
            command_queue_depth: 32,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            peer_idle_ttl: Some(Duration::from_secs(900)),
            peer_eviction_interval: Duration::from_secs(30),
            intake_poll_interval: Duration::from_millis(10),
        }
    }
}

//! # mbus
//!
//! UDP 멀티캐스트 기반 메시지 버스 코어
//!
//! ## 핵심 특징
//! - **바이트 오프셋 시퀀스**: 시퀀스는 송신자 누적 스트림에서 페이로드 첫 바이트의 위치
//! - **고정 헤더**: Message / Request / Response 세 종류, little-endian
//! - **송신 히스토리**: 나이/크기 정책으로 보존하는 재전송용 프레임 저장소
//! - **피어별 순서 맞춤**: 중복 폐기, 순서가 어긋난 프레임 보류 후 연속 전달
//! - **백프레셔**: 고정 깊이 큐, 느린 소비자가 수신 경로 전체를 멈춤

pub mod config;
pub mod error;
pub mod fault;
pub mod header;
pub mod history;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod sequencer;
pub mod stats;

pub use config::{Config, HistoryConfig};
pub use error::{Error, Result};
pub use fault::{FaultAction, FaultPolicy, LogAndContinue, LogAndShutdown};
pub use header::{make_request, peek_kind, FrameKind, Header, HeaderBody, Signature, MBUS_SIGNATURE};
pub use history::History;
pub use packet::{bind_multicast, bind_unicast, Packet, Transport};
pub use receiver::{DeliveryReceiver, Receiver};
pub use sender::Sender;
pub use sequencer::{Disposition, PeerSnapshot, PeerState, PeerTable, SequencedFrame};
pub use stats::{ReceiverStats, SenderStats};

/// 기본 큐 깊이 (수신, 전달, 컨트롤)
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// 기본 수신 버퍼 크기 (바이트)
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 8192;

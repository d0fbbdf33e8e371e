//! 송신자 (퍼블리셔)
//!
//! - 페이로드마다 바이트 오프셋 시퀀스 부여
//! - 전송이 확인된 프레임만 히스토리에 기록
//! - 같은 전송 계층으로 들어오는 컨트롤 패킷(Request/Response) 분류

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::fault::{default_policy, FaultAction, FaultPolicy};
use crate::header::{peek_kind, FrameKind, Header};
use crate::history::History;
use crate::packet::{Intake, Packet, Transport};
use crate::stats::SenderStats;
use crate::{Config, Error, Result};

/// 송신자
pub struct Sender<T: Transport> {
    transport: Arc<T>,

    /// 멀티캐스트 그룹 주소
    destination: SocketAddr,

    /// 다음 페이로드의 시퀀스 (지금까지 전송한 페이로드 바이트 합)
    sent_to: u64,

    /// 전송한 프레임 히스토리. 쓰기는 `send`만.
    history: Arc<RwLock<History>>,

    stats: Arc<RwLock<SenderStats>>,

    /// 컨트롤 패킷을 보낸 원격지별 수
    command_peers: Arc<DashMap<SocketAddr, u64>>,

    /// 컨트롤 intake 실행 플래그
    running: Arc<AtomicBool>,

    policy: Arc<dyn FaultPolicy>,
}

impl<T: Transport> Sender<T> {
    /// 송신자 생성 및 컨트롤 경로 시작 (기본 장애 정책)
    pub fn start(transport: Arc<T>, destination: SocketAddr, config: Config) -> Self {
        Self::start_with_policy(transport, destination, config, default_policy())
    }

    /// 송신자 생성 및 컨트롤 경로 시작
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn start_with_policy(
        transport: Arc<T>,
        destination: SocketAddr,
        config: Config,
        policy: Arc<dyn FaultPolicy>,
    ) -> Self {
        let history = Arc::new(RwLock::new(History::new(config.history)));
        let stats = Arc::new(RwLock::new(SenderStats::new()));
        let command_peers = Arc::new(DashMap::new());
        let running = Arc::new(AtomicBool::new(true));

        let (cmd_tx, cmd_rx) = mpsc::channel::<Packet>(config.command_queue_depth);

        // 컨트롤 수신 태스크
        let intake = Intake {
            transport: transport.clone(),
            tx: cmd_tx,
            running: running.clone(),
            buffer_size: config.recv_buffer_size,
            poll_interval: config.intake_poll_interval,
            policy: policy.clone(),
            task: "sender-command-intake",
        };
        tokio::spawn(intake.run());

        // 컨트롤 처리 태스크
        let server = CommandServer {
            stats: stats.clone(),
            peers: command_peers.clone(),
        };
        tokio::spawn(server.run(cmd_rx));

        info!("mbus Sender started, destination: {}", destination);

        Self {
            transport,
            destination,
            sent_to: 0,
            history,
            stats,
            command_peers,
            running,
            policy,
        }
    }

    /// 페이로드 하나를 프레임으로 만들어 전송
    ///
    /// 전송이 확인된 후에만 히스토리에 기록하고 시퀀스를 진행한다.
    /// 실패하면 아무 상태도 바뀌지 않는다. 빈 페이로드는 `EmptyPayload`.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let sequence = self.sent_to;
        let frame = Header::message(sequence).frame(payload)?;

        let written = match self.transport.transmit(&frame, self.destination).await {
            Ok(written) => written,
            Err(e) => {
                self.stats.write().send_failures += 1;
                warn!("전송 실패: sequence={}, {}", sequence, e);
                return Err(e.into());
            }
        };

        if written != frame.len() {
            self.stats.write().send_failures += 1;
            return Err(Error::Truncated {
                written,
                expected: frame.len(),
            });
        }

        self.history.write().add(sequence, frame);
        self.sent_to += payload.len() as u64;

        {
            let mut stats = self.stats.write();
            stats.frames_sent += 1;
            stats.payload_bytes = self.sent_to;
            stats.wire_bytes += written as u64;
        }

        debug!("프레임 전송: sequence={}, {} bytes", sequence, payload.len());
        Ok(written)
    }

    /// 채널에서 페이로드를 받아 차례로 전송
    ///
    /// 채널이 닫히면 `Ok(())`. 빈 페이로드는 건너뛴다. 전송 실패는 장애 정책이
    /// 결정하며, `Continue`면 해당 페이로드를 버리고 계속한다.
    pub async fn pump(&mut self, mut payloads: mpsc::Receiver<Bytes>) -> Result<()> {
        while let Some(payload) = payloads.recv().await {
            if payload.is_empty() {
                debug!("빈 페이로드 건너뜀: sent_to={}", self.sent_to);
                continue;
            }
            if let Err(e) = self.send(&payload).await {
                match self.policy.on_fault("sender-pump", &e) {
                    FaultAction::Continue => continue,
                    FaultAction::Shutdown => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// 히스토리에서 전송했던 프레임 조회 (재전송용)
    pub fn recall(&self, sequence: u64) -> Option<Bytes> {
        self.history.read().recall(sequence)
    }

    /// 히스토리에 남아 있는 프레임 수
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// 다음 프레임의 시퀀스
    pub fn sent_to(&self) -> u64 {
        self.sent_to
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// 통계 반환
    pub fn get_stats(&self) -> SenderStats {
        self.stats.read().clone()
    }

    /// 컨트롤 패킷을 보낸 원격지와 패킷 수
    pub fn command_peers(&self) -> Vec<(SocketAddr, u64)> {
        self.command_peers
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// 컨트롤 경로 정지
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl<T: Transport> Drop for Sender<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 컨트롤 패킷 분류기
///
/// Request/Response 처리기는 아직 로그만 남긴다. 재전송 요청 처리가 붙을 자리.
struct CommandServer {
    stats: Arc<RwLock<SenderStats>>,
    peers: Arc<DashMap<SocketAddr, u64>>,
}

impl CommandServer {
    async fn run(self, mut commands: mpsc::Receiver<Packet>) {
        while let Some(packet) = commands.recv().await {
            self.dispatch(&packet);
        }
        debug!("sender-command 종료");
    }

    /// 종류를 확인해서 처리기로 넘기고, 확인된 종류를 반환
    fn dispatch(&self, packet: &Packet) -> FrameKind {
        let kind = peek_kind(&packet.data);
        match kind {
            FrameKind::Request => self.serve_request(packet),
            FrameKind::Response => self.serve_response(packet),
            FrameKind::Invalid => {
                info!("컨트롤 경로의 유효하지 않은 패킷 무시: {}", packet.remote);
                self.stats.write().commands_dropped += 1;
            }
            FrameKind::Message => {
                info!("컨트롤 경로에서 처리하지 않는 종류: {:?} from {}", kind, packet.remote);
                self.stats.write().commands_dropped += 1;
            }
        }
        kind
    }

    fn serve_request(&self, packet: &Packet) {
        *self.peers.entry(packet.remote).or_insert(0) += 1;
        self.stats.write().requests_received += 1;

        match Header::decode(FrameKind::Request, &packet.data) {
            Ok((header, parameters)) => info!(
                "Request 수신: {} verb={:?}, {} bytes",
                packet.remote,
                header.verb(),
                parameters.len()
            ),
            Err(e) => warn!("Request 헤더 해석 실패: {}: {}", packet.remote, e),
        }
    }

    fn serve_response(&self, packet: &Packet) {
        *self.peers.entry(packet.remote).or_insert(0) += 1;
        self.stats.write().responses_received += 1;
        info!("Response 수신: {}", packet.remote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{make_request, Signature};
    use std::io;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    /// 항상 실패하는 전송 계층
    struct BrokenTransport;

    impl Transport for BrokenTransport {
        async fn transmit(&self, _frame: &[u8], _destination: SocketAddr) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        async fn receive(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            std::future::pending().await
        }
    }

    async fn udp_pair() -> (Arc<UdpSocket>, UdpSocket) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let group = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (socket, group)
    }

    #[tokio::test]
    async fn test_send_assigns_byte_offsets() {
        let (socket, group) = udp_pair().await;
        let mut sender = Sender::start(socket, group.local_addr().unwrap(), Config::default());

        for payload in [&b"aaa"[..], b"bbb", b"ccccc"] {
            sender.send(payload).await.unwrap();
        }
        assert_eq!(sender.sent_to(), 11);
        assert_eq!(sender.history_len(), 3);

        let mut buf = [0u8; 64];
        let mut sequences = Vec::new();
        for _ in 0..3 {
            let (len, _) = group.recv_from(&mut buf).await.unwrap();
            let (header, payload) = Header::decode(FrameKind::Message, &buf[..len]).unwrap();
            sequences.push((header.sequence().unwrap(), payload.to_vec()));
        }
        assert_eq!(
            sequences,
            vec![(0, b"aaa".to_vec()), (3, b"bbb".to_vec()), (6, b"ccccc".to_vec())]
        );

        let recalled = sender.recall(3).unwrap();
        let (header, payload) = Header::decode(FrameKind::Message, &recalled).unwrap();
        assert_eq!(header.sequence(), Some(3));
        assert_eq!(payload, b"bbb");
        assert!(sender.recall(4).is_none());

        let stats = sender.get_stats();
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.payload_bytes, 11);
    }

    #[tokio::test]
    async fn test_history_policy_limits_recall() {
        let (socket, group) = udp_pair().await;
        let config = Config::default()
            .with_history(crate::HistoryConfig::new(Duration::ZERO, Duration::ZERO, 0));
        let mut sender = Sender::start(socket, group.local_addr().unwrap(), config);

        for payload in [&b"aaa"[..], b"bbb", b"ccccc"] {
            sender.send(payload).await.unwrap();
        }

        // 가장 최근 프레임만 남는다
        assert_eq!(sender.history_len(), 1);
        assert!(sender.recall(0).is_none());
        assert!(sender.recall(6).is_some());
    }

    #[tokio::test]
    async fn test_failed_send_records_nothing() {
        let destination: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut sender = Sender::start(Arc::new(BrokenTransport), destination, Config::default());

        let result = sender.send(b"lost").await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(sender.sent_to(), 0);
        assert_eq!(sender.history_len(), 0);
        assert!(sender.recall(0).is_none());
        assert_eq!(sender.get_stats().send_failures, 1);
    }

    #[tokio::test]
    async fn test_pump_respects_fault_policy() {
        let destination: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let policy: Arc<dyn FaultPolicy> = Arc::new(crate::fault::LogAndContinue);
        let mut sender = Sender::start_with_policy(
            Arc::new(BrokenTransport),
            destination,
            Config::default(),
            policy,
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"one")).await.unwrap();
        tx.send(Bytes::from_static(b"two")).await.unwrap();
        drop(tx);

        sender.pump(rx).await.unwrap();
        assert_eq!(sender.get_stats().send_failures, 2);

        let mut sender = Sender::start(Arc::new(BrokenTransport), destination, Config::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"one")).await.unwrap();
        assert!(sender.pump(rx).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected() {
        let (socket, group) = udp_pair().await;
        let mut sender = Sender::start(socket, group.local_addr().unwrap(), Config::default());

        assert!(matches!(sender.send(b"").await, Err(Error::EmptyPayload)));
        sender.send(b"x").await.unwrap();
        assert!(matches!(sender.send(b"").await, Err(Error::EmptyPayload)));

        assert_eq!(sender.sent_to(), 1);
        assert_eq!(sender.history_len(), 1);
        assert_eq!(sender.get_stats().frames_sent, 1);
        assert_eq!(sender.get_stats().send_failures, 0);

        // 그룹에는 "x" 하나만 도착한다
        let mut buf = [0u8; 64];
        let (len, _) = group.recv_from(&mut buf).await.unwrap();
        let (sequence, payload) = Header::decode_message(&buf[..len]).unwrap();
        assert_eq!((sequence, payload), (0, &b"x"[..]));
    }

    #[tokio::test]
    async fn test_pump_skips_empty_payloads() {
        let (socket, group) = udp_pair().await;
        let mut sender = Sender::start(socket, group.local_addr().unwrap(), Config::default());

        let (tx, rx) = mpsc::channel(4);
        for payload in [&b"ab"[..], b"", b"cde"] {
            tx.send(Bytes::from_static(payload)).await.unwrap();
        }
        drop(tx);

        sender.pump(rx).await.unwrap();
        assert_eq!(sender.sent_to(), 5);
        assert_eq!(sender.history_len(), 2);
        assert!(sender.recall(2).is_some());
    }

    #[test]
    fn test_command_dispatch() {
        let server = CommandServer {
            stats: Arc::new(RwLock::new(SenderStats::new())),
            peers: Arc::new(DashMap::new()),
        };
        let remote: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        let packet = |data: Bytes| Packet::new(data, remote);

        let request = make_request(Signature::fixed("Resend.."), &[0; 8]).unwrap();
        let response = Header::response().frame(b"").unwrap();
        let message = Header::message(0).frame(b"x").unwrap();

        assert_eq!(server.dispatch(&packet(request)), FrameKind::Request);
        assert_eq!(server.dispatch(&packet(response)), FrameKind::Response);
        assert_eq!(server.dispatch(&packet(message)), FrameKind::Message);
        assert_eq!(
            server.dispatch(&packet(Bytes::from_static(b"garbage"))),
            FrameKind::Invalid
        );

        let stats = server.stats.read().clone();
        assert_eq!(stats.requests_received, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.commands_dropped, 2);
        assert_eq!(*server.peers.get(&remote).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_command_path_over_udp() {
        let (socket, group) = udp_pair().await;
        let sender_addr = socket.local_addr().unwrap();
        let sender = Sender::start(socket, group.local_addr().unwrap(), Config::default());

        let control = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = make_request(Signature::fixed("Resend.."), b"").unwrap();
        control.send_to(&request, sender_addr).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while sender.get_stats().requests_received == 0 {
            assert!(tokio::time::Instant::now() < deadline, "request not served");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sender.command_peers(), vec![(control.local_addr().unwrap(), 1)]);
    }
}

//! 수신자 (구독자)
//!
//! - intake 태스크: 전송 계층 -> 수신 큐
//! - sequencing 태스크: 헤더 해석, 피어별 순서 맞춤, 전달 큐로 출력
//! - 전달 큐가 가득 차면 sequencing이 멈추고, 이어서 수신 큐가 차면 intake도 멈춘다

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::fault::{default_policy, FaultAction, FaultPolicy};
use crate::header::{peek_kind, FrameKind, Header};
use crate::packet::{Intake, Packet, Transport};
use crate::sequencer::{PeerSnapshot, PeerTable, SequencedFrame};
use crate::stats::ReceiverStats;
use crate::{Config, Error, Result};

/// 순서가 맞춰진 프레임 채널 수신기 타입
pub type DeliveryReceiver = mpsc::Receiver<SequencedFrame>;

/// 내부 명령
enum ReceiverCmd {
    PeerSnapshot(String, oneshot::Sender<Option<PeerSnapshot>>),
    Peers(oneshot::Sender<Vec<PeerSnapshot>>),
    Stop,
}

/// sequencing 태스크 상태 (단일 태스크에서만 접근)
struct Pipeline {
    peers: PeerTable,
    peer_idle_ttl: Option<Duration>,
    stats: ReceiverStats,
    delivery_tx: mpsc::Sender<SequencedFrame>,
    scratch: Vec<SequencedFrame>,
}

impl Pipeline {
    fn new(config: &Config, delivery_tx: mpsc::Sender<SequencedFrame>) -> Self {
        Self {
            peers: PeerTable::new(),
            peer_idle_ttl: config.peer_idle_ttl,
            stats: ReceiverStats::new(),
            delivery_tx,
            scratch: Vec::new(),
        }
    }

    /// 패킷 하나 처리. 전달 큐가 닫혔을 때만 에러.
    async fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        self.stats.packets_received += 1;

        // send_command와 같은 소켓이라 회신 컨트롤 패킷도 여기로 들어온다
        if let kind @ (FrameKind::Request | FrameKind::Response) = peek_kind(&packet.data) {
            debug!("컨트롤 패킷 무시: {:?} from {}", kind, packet.remote);
            self.stats.control_packets += 1;
            return Ok(());
        }

        let (sequence, header_len) = match Header::decode_message(&packet.data) {
            Ok((sequence, payload)) => (sequence, packet.data.len() - payload.len()),
            Err(e) => {
                debug!("유효하지 않은 패킷 폐기: {} ({})", packet.remote, e);
                self.stats.invalid_dropped += 1;
                return Ok(());
            }
        };
        let payload = packet.data.slice(header_len..);

        let state = self.peers.get_or_create(&packet.peer_id());
        let disposition = state.lock().observe(sequence, payload, &mut self.scratch);
        self.stats.record(disposition, &self.scratch);

        for frame in self.scratch.drain(..) {
            self.delivery_tx
                .send(frame)
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }

        Ok(())
    }

    fn evict_idle(&mut self) {
        if let Some(ttl) = self.peer_idle_ttl {
            let evicted = self.peers.evict_idle(ttl, Instant::now());
            self.stats.peers_evicted += evicted as u64;
        }
    }

    fn handle_cmd(&mut self, cmd: ReceiverCmd) -> bool {
        match cmd {
            ReceiverCmd::PeerSnapshot(peer, reply) => {
                let _ = reply.send(self.peers.snapshot(&peer));
            }
            ReceiverCmd::Peers(reply) => {
                let _ = reply.send(self.peers.snapshots());
            }
            ReceiverCmd::Stop => return false,
        }
        true
    }
}

/// 수신자 핸들 (외부에서 제어용)
///
/// 메시지 수신과 컨트롤 명령 전송에 같은 전송 계층을 쓴다. 이 소켓으로 돌아온
/// Request/Response 패킷은 순서 맞춤에 들어가지 않고 `control_packets`로만 센다.
pub struct Receiver<T: Transport> {
    transport: Arc<T>,
    cmd_tx: mpsc::Sender<ReceiverCmd>,
    stats: Arc<RwLock<ReceiverStats>>,
    running: Arc<AtomicBool>,
}

impl<T: Transport> Receiver<T> {
    /// 새 수신자 생성 및 시작 (기본 장애 정책)
    pub fn start(transport: Arc<T>, config: Config) -> (Self, DeliveryReceiver) {
        Self::start_with_policy(transport, config, default_policy())
    }

    /// 새 수신자 생성 및 시작
    ///
    /// tokio 런타임 안에서 호출해야 한다.
    pub fn start_with_policy(
        transport: Arc<T>,
        config: Config,
        policy: Arc<dyn FaultPolicy>,
    ) -> (Self, DeliveryReceiver) {
        // 채널 생성
        let (intake_tx, mut intake_rx) = mpsc::channel::<Packet>(config.intake_queue_depth);
        let (delivery_tx, delivery_rx) = mpsc::channel::<SequencedFrame>(config.delivery_queue_depth);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ReceiverCmd>(config.command_queue_depth);

        let stats = Arc::new(RwLock::new(ReceiverStats::new()));
        let running = Arc::new(AtomicBool::new(true));

        // 수신 태스크
        let intake = Intake {
            transport: transport.clone(),
            tx: intake_tx,
            running: running.clone(),
            buffer_size: config.recv_buffer_size,
            poll_interval: config.intake_poll_interval,
            policy: policy.clone(),
            task: "receiver-intake",
        };
        tokio::spawn(intake.run());

        // 메인 처리 태스크
        let mut pipeline = Pipeline::new(&config, delivery_tx);
        let stats_main = stats.clone();
        let running_main = running.clone();
        let eviction_interval = config.peer_eviction_interval;

        tokio::spawn(async move {
            let mut eviction = tokio::time::interval(eviction_interval);
            eviction.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    packet = intake_rx.recv() => {
                        let Some(packet) = packet else { break };
                        if let Err(e) = pipeline.handle_packet(packet).await {
                            if policy.on_fault("receiver-sequencing", &e) == FaultAction::Shutdown {
                                break;
                            }
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        if !pipeline.handle_cmd(cmd) {
                            break;
                        }
                    }
                    _ = eviction.tick() => {
                        pipeline.evict_idle();
                    }
                }

                // 통계 업데이트
                *stats_main.write().await = pipeline.stats.clone();
            }

            running_main.store(false, Ordering::SeqCst);
            debug!("receiver-sequencing 종료");
        });

        info!("mbus Receiver started");

        let receiver = Self {
            transport,
            cmd_tx,
            stats,
            running,
        };

        (receiver, delivery_rx)
    }

    /// 컨트롤 명령 전송 (예: 송신자에게 Request)
    ///
    /// 일부만 전송되면 `Truncated`.
    pub async fn send_command(&self, command: &[u8], addr: SocketAddr) -> Result<()> {
        let written = self.transport.transmit(command, addr).await?;
        if written != command.len() {
            return Err(Error::Truncated {
                written,
                expected: command.len(),
            });
        }
        Ok(())
    }

    /// 피어 상태 조회. sequencing 태스크에 질의한다.
    pub async fn peer_snapshot(&self, peer: &str) -> Result<Option<PeerSnapshot>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ReceiverCmd::PeerSnapshot(peer.to_string(), reply_tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// 모든 피어 상태 조회
    pub async fn peers(&self) -> Result<Vec<PeerSnapshot>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ReceiverCmd::Peers(reply_tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// 정지. 큐에 남은 프레임은 전달되지 않을 수 있다.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(ReceiverCmd::Stop).await;
    }

    /// 통계 반환
    pub async fn get_stats(&self) -> ReceiverStats {
        self.stats.read().await.clone()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl<T: Transport> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

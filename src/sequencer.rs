//! 피어별 시퀀서
//!
//! - 피어마다 어디까지 전달했는지(`delivered_to`) 추적
//! - 중복 프레임 폐기, 앞선 구간이 빠진 프레임은 보류 버퍼에 보관
//! - 빠진 구간이 채워지면 보류된 프레임을 한 번에 이어서 전달

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

/// 애플리케이션에 전달되는 순서가 맞춰진 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedFrame {
    /// 송신 피어 식별자 (주소 문자열)
    pub peer: Arc<str>,

    /// 페이로드 첫 바이트의 오프셋
    pub sequence: u64,

    pub payload: Bytes,
}

impl SequencedFrame {
    /// 피어 식별자가 소켓 주소면 파싱해서 반환 (컨트롤 명령 회신용)
    pub fn remote(&self) -> Option<SocketAddr> {
        self.peer.parse().ok()
    }
}

/// `observe` 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 순서대로 도착. `drained`는 함께 전달된 보류 프레임 수
    InOrder { drained: usize },

    /// 이 피어에서 처음 본 프레임 (스트림 중간 합류, 앞부분은 복구하지 않음)
    FirstSeen,

    /// 이미 전달한 구간, 또는 보류 중인 것보다 길지 않은 같은 오프셋 프레임
    Duplicate,

    /// 앞 구간이 빠져서 보류 (같은 오프셋의 더 짧은 보류 프레임은 교체)
    Held,

    /// 빈 페이로드. 스트림 바이트가 없어 재전송과 구별할 수 없으므로 버린다.
    Empty,
}

/// 피어 하나의 수신 상태
#[derive(Debug)]
pub struct PeerState {
    peer: Arc<str>,

    /// 관찰한 프레임 수 (중복 포함)
    frames_received: u64,

    /// 여기까지 전달 완료. 단조 증가.
    delivered_to: u64,

    /// 보류 버퍼: 오프셋 -> 페이로드
    holding: BTreeMap<u64, Bytes>,

    last_seen: Instant,
}

impl PeerState {
    pub fn new(peer: impl Into<Arc<str>>) -> Self {
        Self {
            peer: peer.into(),
            frames_received: 0,
            delivered_to: 0,
            holding: BTreeMap::new(),
            last_seen: Instant::now(),
        }
    }

    /// 프레임 하나를 관찰하고, 전달 가능한 프레임을 순서대로 `out`에 추가
    pub fn observe(
        &mut self,
        sequence: u64,
        payload: Bytes,
        out: &mut Vec<SequencedFrame>,
    ) -> Disposition {
        self.frames_received += 1;
        self.last_seen = Instant::now();

        if payload.is_empty() {
            trace!("빈 프레임 폐기: peer={}, sequence={}", self.peer, sequence);
            return Disposition::Empty;
        }

        if sequence == self.delivered_to {
            self.deliver(sequence, payload, out);
            let drained = self.drain_holding(out);
            return Disposition::InOrder { drained };
        }

        if self.delivered_to == 0 {
            debug!(
                "피어 {} 첫 프레임 sequence={}: 이전 구간 없이 합류",
                self.peer, sequence
            );
            self.deliver(sequence, payload, out);
            return Disposition::FirstSeen;
        }

        if sequence < self.delivered_to {
            trace!(
                "중복 프레임 폐기: peer={}, sequence={}, delivered_to={}",
                self.peer,
                sequence,
                self.delivered_to
            );
            return Disposition::Duplicate;
        }

        if let Some(held) = self.holding.get_mut(&sequence) {
            if payload.len() <= held.len() {
                trace!("이미 보류 중인 프레임: peer={}, sequence={}", self.peer, sequence);
                return Disposition::Duplicate;
            }
            *held = payload;
            return Disposition::Held;
        }

        debug!(
            "구간 누락: peer={}, missing={}..{}, 보류={}",
            self.peer,
            self.delivered_to,
            sequence,
            self.holding.len() + 1
        );
        self.holding.insert(sequence, payload);
        Disposition::Held
    }

    fn deliver(&mut self, sequence: u64, payload: Bytes, out: &mut Vec<SequencedFrame>) {
        self.delivered_to = sequence.saturating_add(payload.len() as u64);
        out.push(SequencedFrame {
            peer: self.peer.clone(),
            sequence,
            payload,
        });
    }

    /// `delivered_to`에 정확히 이어지는 보류 프레임을 계속 전달
    fn drain_holding(&mut self, out: &mut Vec<SequencedFrame>) -> usize {
        let mut drained = 0;
        while let Some(payload) = self.holding.remove(&self.delivered_to) {
            let sequence = self.delivered_to;
            self.deliver(sequence, payload, out);
            drained += 1;
        }

        // 전달 지점보다 앞에서 시작하는 보류 프레임은 더 이상 전달될 수 없다
        if matches!(self.holding.first_key_value(), Some((&first, _)) if first < self.delivered_to)
        {
            let stale = self.holding.len();
            self.holding = self.holding.split_off(&self.delivered_to);
            trace!(
                "겹치는 보류 프레임 {}개 제거: peer={}",
                stale - self.holding.len(),
                self.peer
            );
        }

        drained
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn delivered_to(&self) -> u64 {
        self.delivered_to
    }

    pub fn held_frames(&self) -> usize {
        self.holding.len()
    }

    pub fn held_bytes(&self) -> u64 {
        self.holding.values().map(|p| p.len() as u64).sum()
    }

    /// 첫 번째 누락 구간. 재전송 요청의 대상.
    pub fn missing_range(&self) -> Option<Range<u64>> {
        let (&first_held, _) = self.holding.first_key_value()?;
        Some(self.delivered_to..first_held)
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer: self.peer.to_string(),
            frames_received: self.frames_received,
            delivered_to: self.delivered_to,
            held_frames: self.held_frames(),
            held_bytes: self.held_bytes(),
            missing: self.missing_range(),
            idle: self.last_seen.elapsed(),
        }
    }
}

/// 외부 조회용 피어 상태 사본
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer: String,
    pub frames_received: u64,
    pub delivered_to: u64,
    pub held_frames: usize,
    pub held_bytes: u64,
    pub missing: Option<Range<u64>>,
    pub idle: Duration,
}

/// 피어 테이블
///
/// 첫 패킷을 받을 때 항목을 만든다. 조회는 읽기 잠금으로 먼저 시도하고
/// 없을 때만 쓰기 잠금을 잡는다.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<Arc<str>, Arc<Mutex<PeerState>>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 피어 상태 조회, 없으면 새로 생성
    pub fn get_or_create(&self, peer: &str) -> Arc<Mutex<PeerState>> {
        if let Some(state) = self.peers.read().get(peer) {
            return state.clone();
        }

        let mut peers = self.peers.write();
        if let Some(state) = peers.get(peer) {
            return state.clone();
        }

        let key: Arc<str> = Arc::from(peer);
        let state = Arc::new(Mutex::new(PeerState::new(key.clone())));
        peers.insert(key, state.clone());
        debug!("새 피어 등록: {} (총 {})", peer, peers.len());
        state
    }

    pub fn get(&self, peer: &str) -> Option<Arc<Mutex<PeerState>>> {
        self.peers.read().get(peer).cloned()
    }

    pub fn snapshot(&self, peer: &str) -> Option<PeerSnapshot> {
        self.get(peer).map(|state| state.lock().snapshot())
    }

    pub fn snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers
            .read()
            .values()
            .map(|state| state.lock().snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// `ttl` 이상 패킷이 없던 피어 제거. 제거한 수를 반환.
    pub fn evict_idle(&self, ttl: Duration, now: Instant) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|peer, state| {
            let idle = now.saturating_duration_since(state.lock().last_seen);
            if idle >= ttl {
                debug!("유휴 피어 제거: {} ({:?})", peer, idle);
                false
            } else {
                true
            }
        });
        before - peers.len()
    }
}

//! 송수신 통계

use std::time::{Duration, Instant};

use crate::sequencer::{Disposition, SequencedFrame};

/// 수신측 통계
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 수신한 패킷 수 (유효하지 않은 것 포함)
    pub packets_received: u64,

    /// 헤더가 유효하지 않아 버린 패킷 수
    pub invalid_dropped: u64,

    /// 같은 소켓으로 돌아온 컨트롤 패킷 (Request/Response) 수
    pub control_packets: u64,

    /// 애플리케이션에 전달한 프레임 수
    pub delivered_frames: u64,

    /// 애플리케이션에 전달한 페이로드 바이트
    pub delivered_bytes: u64,

    /// 중복으로 버린 프레임 수
    pub duplicates: u64,

    /// 빈 페이로드로 버린 프레임 수
    pub empty_dropped: u64,

    /// 보류 버퍼에 넣은 프레임 수
    pub held: u64,

    /// 보류 후 나중에 전달된 프레임 수
    pub drained: u64,

    /// 스트림 중간에 합류한 피어 수
    pub first_seen_joins: u64,

    /// 유휴로 제거된 피어 수
    pub peers_evicted: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            packets_received: 0,
            invalid_dropped: 0,
            control_packets: 0,
            delivered_frames: 0,
            delivered_bytes: 0,
            duplicates: 0,
            empty_dropped: 0,
            held: 0,
            drained: 0,
            first_seen_joins: 0,
            peers_evicted: 0,
        }
    }

    /// 시퀀서 처리 결과 기록
    pub fn record(&mut self, disposition: Disposition, delivered: &[SequencedFrame]) {
        match disposition {
            Disposition::InOrder { drained } => self.drained += drained as u64,
            Disposition::FirstSeen => self.first_seen_joins += 1,
            Disposition::Duplicate => self.duplicates += 1,
            Disposition::Held => self.held += 1,
            Disposition::Empty => self.empty_dropped += 1,
        }

        self.delivered_frames += delivered.len() as u64;
        self.delivered_bytes += delivered.iter().map(|f| f.payload.len() as u64).sum::<u64>();
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전달 처리율 (bytes/sec)
    pub fn delivered_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.delivered_bytes as f64 / elapsed
    }

    /// 중복률 (관찰한 메시지 프레임 대비)
    pub fn duplicate_rate(&self) -> f64 {
        let observed = self
            .packets_received
            .saturating_sub(self.invalid_dropped + self.control_packets);
        if observed == 0 {
            return 0.0;
        }
        self.duplicates as f64 / observed as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Packets: {} (invalid {}, control {}) | Delivered: {} frames, {} bytes | Dup: {:.2}% | Held: {} | Joins: {}",
            self.elapsed().as_secs_f64(),
            self.packets_received,
            self.invalid_dropped,
            self.control_packets,
            self.delivered_frames,
            self.delivered_bytes,
            self.duplicate_rate() * 100.0,
            self.held,
            self.first_seen_joins,
        )
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 송신측 통계
#[derive(Debug, Clone)]
pub struct SenderStats {
    pub start_time: Instant,

    /// 전송 성공한 프레임 수
    pub frames_sent: u64,

    /// 전송 성공한 페이로드 바이트 (= 현재 시퀀스)
    pub payload_bytes: u64,

    /// 헤더 포함 전송 바이트
    pub wire_bytes: u64,

    /// 전송 실패 수
    pub send_failures: u64,

    /// 컨트롤 경로로 받은 Request 수
    pub requests_received: u64,

    /// 컨트롤 경로로 받은 Response 수
    pub responses_received: u64,

    /// 컨트롤 경로에서 버린 패킷 수
    pub commands_dropped: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            payload_bytes: 0,
            wire_bytes: 0,
            send_failures: 0,
            requests_received: 0,
            responses_received: 0,
            commands_dropped: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.wire_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} | Payload: {} bytes | Throughput: {:.2} MB/s | Failures: {} | Requests: {}",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.payload_bytes,
            self.overall_throughput() / 1_000_000.0,
            self.send_failures,
            self.requests_received,
        )
    }
}

impl Default for SenderStats {
    fn default() -> Self {
        Self::new()
    }
}

//! 송신 히스토리
//!
//! 이미 보낸 프레임을 시퀀스(바이트 오프셋) 기준으로 보관한다.
//! 재전송 요청에 응답하기 위한 저장소이며, 나이/크기 정책으로 오래된 것부터 제거.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Instant;

use bytes::Bytes;
use tracing::trace;

use crate::config::HistoryConfig;

/// 히스토리 항목
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// 프레임 시퀀스
    pub sequence: u64,

    /// 전송된 그대로의 프레임 (헤더 + 페이로드)
    pub frame: Bytes,

    /// 전송 시각
    pub sent_at: Instant,
}

/// 송신 히스토리
#[derive(Debug)]
pub struct History {
    /// 시퀀스 오름차순, 중복 없음
    entries: BTreeMap<u64, HistoryEntry>,

    policy: HistoryConfig,
}

impl History {
    /// # Panics
    /// `min_age > max_age`이면 panic.
    pub fn new(policy: HistoryConfig) -> Self {
        assert!(
            policy.min_age <= policy.max_age,
            "history min_age ({:?}) must not exceed max_age ({:?})",
            policy.min_age,
            policy.max_age
        );

        Self {
            entries: BTreeMap::new(),
            policy,
        }
    }

    /// 프레임 추가 후 정책에 따라 제거
    ///
    /// # Panics
    /// `sequence`가 이전 최대 시퀀스 이하이면 panic (송신측 오프셋 관리가 깨진 것).
    pub fn add(&mut self, sequence: u64, frame: Bytes) {
        self.add_at(sequence, frame, Instant::now());
    }

    pub(crate) fn add_at(&mut self, sequence: u64, frame: Bytes, sent_at: Instant) {
        if let Some((&newest, _)) = self.entries.last_key_value() {
            assert!(
                sequence > newest,
                "history sequence must increase: {} after {}",
                sequence,
                newest
            );
        }

        self.entries.insert(
            sequence,
            HistoryEntry {
                sequence,
                frame,
                sent_at,
            },
        );

        self.purge_oldest();
    }

    /// 정확히 일치하는 시퀀스의 프레임. 추가된 적 없거나 이미 제거됐으면 None.
    pub fn recall(&self, sequence: u64) -> Option<Bytes> {
        self.entries.get(&sequence).map(|entry| entry.frame.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 보관 중인 가장 오래된 ~ 가장 최근 시퀀스
    ///
    /// 범위 안의 시퀀스라도 프레임 시작 오프셋이 아니면 `recall`은 None.
    pub fn retained_range(&self) -> Option<RangeInclusive<u64>> {
        let (&oldest, _) = self.entries.first_key_value()?;
        let (&newest, _) = self.entries.last_key_value()?;
        Some(oldest..=newest)
    }

    /// 가장 최근 항목은 항상 남긴다.
    /// 나이와 크기 모두 가장 최근 항목 기준의 상대값이다.
    fn purge_oldest(&mut self) {
        while self.entries.len() > 1 {
            let (Some(oldest), Some(newest)) =
                (self.entries.first_key_value(), self.entries.last_key_value())
            else {
                break;
            };
            let (oldest, newest) = (oldest.1, newest.1);

            let age = newest.sent_at.saturating_duration_since(oldest.sent_at);
            let span = newest.sequence - oldest.sequence;

            if age < self.policy.min_age {
                break;
            }
            if span < self.policy.max_bytes && age < self.policy.max_age {
                break;
            }

            let evicted = oldest.sequence;
            self.entries.remove(&evicted);
            trace!("히스토리 제거: sequence={}, span={}, age={:?}", evicted, span, age);
        }
    }
}

//! 전송 계층 장애 처리 정책
//!
//! 백그라운드 태스크에서 복구할 수 없는 에러가 나면 프로세스를 종료하지 않고
//! 호출자가 넘긴 정책에 결정을 맡긴다.

use std::sync::Arc;

use tracing::{error, warn};

use crate::Error;

/// 장애 후 태스크가 취할 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// 이번 작업만 건너뛰고 계속
    Continue,

    /// 해당 태스크 정상 종료
    Shutdown,
}

/// 장애 처리 정책
///
/// `task`는 장애가 난 태스크 이름 ("receiver-intake", "sender-pump" 등).
pub trait FaultPolicy: Send + Sync + 'static {
    fn on_fault(&self, task: &str, error: &Error) -> FaultAction;
}

impl<F> FaultPolicy for F
where
    F: Fn(&str, &Error) -> FaultAction + Send + Sync + 'static,
{
    fn on_fault(&self, task: &str, error: &Error) -> FaultAction {
        self(task, error)
    }
}

/// 로그 후 태스크 종료 (기본값)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndShutdown;

impl FaultPolicy for LogAndShutdown {
    fn on_fault(&self, task: &str, error: &Error) -> FaultAction {
        error!("{} 장애, 태스크 종료: {}", task, error);
        FaultAction::Shutdown
    }
}

/// 로그 후 계속
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndContinue;

impl FaultPolicy for LogAndContinue {
    fn on_fault(&self, task: &str, error: &Error) -> FaultAction {
        warn!("{} 장애, 계속 진행: {}", task, error);
        FaultAction::Continue
    }
}

pub(crate) fn default_policy() -> Arc<dyn FaultPolicy> {
    Arc::new(LogAndShutdown)
}

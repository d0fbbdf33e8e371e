//! 에러 타입 정의

use thiserror::Error;

/// mbus 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    /// 시그니처 불일치, 종류 불일치, 또는 고정 크기보다 짧은 버퍼
    #[error("유효하지 않은 mbus 헤더")]
    InvalidHeader,

    /// 컨트롤 패킷이 일부만 전송됨
    #[error("잘린 패킷: {written}/{expected} bytes 전송")]
    Truncated { written: usize, expected: usize },

    /// 전송 계층 에러 (변형 없이 전달)
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("채널 에러")]
    ChannelClosed,

    /// 스트림 바이트가 없는 페이로드. 오프셋이 다음 프레임과 겹친다.
    #[error("빈 페이로드는 전송할 수 없음")]
    EmptyPayload,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

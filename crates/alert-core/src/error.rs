//! 알림 엔진의 에러 타입.
//!
//! 구독, 구독 해제, 트리거 평가 전반에서 사용되는 에러를 정의합니다.
//! "후보 없음"은 에러가 아니라 빈 결과(`Ok`)로 표현됩니다.

use thiserror::Error;

/// 알림 엔진 에러.
#[derive(Debug, Error)]
pub enum AlertError {
    /// 필수 필드 누락 또는 잘못된 규칙 (변경 전에 거부됨)
    #[error("잘못된 알림 규칙: {0}")]
    InvalidRule(String),

    /// 백엔드 저장소와의 일시적 통신 실패
    #[error("저장소 사용 불가: {0}")]
    StoreUnavailable(String),

    /// 직렬화/역직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 인덱스 엔트리와 레코드가 서로 맞지 않음
    #[error("인덱스 불일치: {0}")]
    Inconsistent(String),

    /// 평가 마감 시간 초과
    #[error("평가 시간 초과: {0}")]
    DeadlineExceeded(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),
}

/// 알림 엔진 작업을 위한 Result 타입.
pub type AlertResult<T> = Result<T, AlertError>;

impl AlertError {
    /// 호출자가 재시도할 수 있는 에러인지 확인합니다.
    ///
    /// 엔진 내부에서는 재시도하지 않습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AlertError::StoreUnavailable(_) | AlertError::DeadlineExceeded(_)
        )
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        AlertError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AlertError {
    fn from(err: config::ConfigError) -> Self {
        AlertError::Config(err.to_string())
    }
}

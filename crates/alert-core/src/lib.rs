//! # Alert Core
//!
//! 가격 알림 엔진의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 알림 엔진 전반에서 사용되는 기본 타입을 제공합니다:
//! - 알림 규칙 및 인덱스 엔트리
//! - 가격 틱
//! - 에러 분류
//! - 설정 관리
//! - 로깅 인프라
//! - 테스트 가능한 시계 추상화

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;

//! 가격 알림 구독 및 트리거 엔진.
//!
//! 이 crate는 다음을 제공합니다:
//! - 가격 교차 후보 범위 계산과 메모리 가격 사다리
//! - 규칙 레코드 + 가격 인덱스 저장소 (메모리, Redis)
//! - Always 규칙용 쿨다운 게이트
//! - 틱 단위 트리거 평가기
//! - 구독/해제/발동 조회 레지스트리

pub mod cooldown;
pub mod evaluator;
pub mod index;
pub mod registry;
pub mod store;

pub use cooldown::{always_gate_key, once_claim_key, CooldownGate, MemoryCooldownGate};
pub use evaluator::{EvaluationReport, EvaluatorSettings, TriggerEvaluator};
pub use index::{plan_crossing, IndexQuery, IndexSlot, PriceLadder, PriceRange};
pub use registry::{AlertRegistry, ExactScanRegistry, IndexedRegistry};
pub use store::{AlertStore, MemoryAlertStore, RedisAlertStore};

//! 규칙 레코드 저장소와 가격 인덱스.
//!
//! - `memory`: 단일 프로세스용, 잠금으로 보호되는 소유 구조
//! - `redis`: 분산 환경용, Lua 스크립트로 레코드와 인덱스를 원자적으로 변경

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use alert_core::{AlertResult, AlertRule, IndexKey};

use crate::index::{IndexSlot, PriceRange};

pub use self::memory::MemoryAlertStore;
pub use self::redis::RedisAlertStore;

/// 레코드 저장소 + (종목, 방향)별 가격 인덱스.
///
/// 레코드와 인덱스 엔트리는 `put_rule` / `remove_rule` 안에서만 함께 변경되며,
/// 동시 조회자는 절반만 반영된 상태를 관찰할 수 없어야 합니다.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// 레코드를 쓰고 인덱스 엔트리를 삽입합니다.
    ///
    /// 같은 ID의 기존 규칙은 인덱스 엔트리까지 함께 대체됩니다.
    async fn put_rule(&self, rule: &AlertRule) -> AlertResult<()>;

    /// 레코드를 읽어 인덱스 엔트리를 찾아 제거하고 레코드를 삭제합니다.
    ///
    /// 규칙이 없으면 `Ok(None)`.
    async fn remove_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>>;

    /// 레코드 조회.
    async fn get_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>>;

    /// 마지막 발동 시각을 앞으로만 이동합니다.
    ///
    /// `expected`가 있으면 저장된 값이 같을 때만 갱신합니다 (CAS).
    /// 갱신했으면 `true`, 레코드가 없거나 조건이 맞지 않으면 `false`.
    async fn advance_last_triggered(
        &self,
        alert_id: &str,
        expected: Option<i64>,
        triggered_at: i64,
    ) -> AlertResult<bool>;

    /// 인덱스 범위를 `(가격, 멤버)` 오름차순으로 한 페이지 조회합니다.
    ///
    /// `after`는 직전 페이지의 마지막 항목이며, 그보다 뒤의 항목만 반환합니다.
    async fn scan_index(
        &self,
        key: &IndexKey,
        range: &PriceRange,
        after: Option<&IndexSlot>,
        limit: usize,
    ) -> AlertResult<Vec<IndexSlot>>;

    /// 인덱스 멤버를 일괄 제거합니다. 이미 없는 멤버는 무시합니다.
    ///
    /// 실제로 제거된 개수를 반환합니다.
    async fn remove_index_members(&self, key: &IndexKey, members: &[String]) -> AlertResult<usize>;
}

//! 알림 규칙 레지스트리.
//!
//! 두 가지 운영 방식을 같은 계약 뒤에 둡니다.
//!
//! | 구현 | 방식 | 특징 |
//! |------|------|------|
//! | [`ExactScanRegistry`] | 단일 프로세스, 전체 직렬화 | 모든 작업이 하나의 잠금 아래에서 실행, 규칙 수가 적을 때 |
//! | [`IndexedRegistry`] | 인덱스 + 외부 원자 저장소 | 평가는 잠금 없이 병렬 실행, 규칙 단위 원자성은 게이트와 저장소가 보장 |

pub mod exact;
pub mod indexed;

use async_trait::async_trait;
use rust_decimal::Decimal;

use alert_core::{AlertResult, AlertRule, PriceTick};

use crate::evaluator::EvaluationReport;

pub use self::exact::ExactScanRegistry;
pub use self::indexed::IndexedRegistry;

/// 알림 레지스트리 trait.
///
/// 가격 피드는 틱마다 `get_triggered_alerts`를 동기적으로 호출하고,
/// 발동한 규칙에 대한 후속 처리(알림, 주문)는 호출자가 담당합니다.
#[async_trait]
pub trait AlertRegistry: Send + Sync {
    /// 규칙을 등록합니다. 같은 ID의 기존 규칙은 대체됩니다.
    ///
    /// # Errors
    ///
    /// - `AlertError::InvalidRule`: 필수 필드 누락 (아무것도 변경하지 않음)
    /// - `AlertError::StoreUnavailable`: 저장소 통신 실패
    async fn subscribe(&self, rule: AlertRule) -> AlertResult<()>;

    /// 규칙을 제거합니다. 없는 규칙이면 아무 일도 하지 않고 성공합니다.
    async fn unsubscribe(&self, alert_id: &str) -> AlertResult<()>;

    /// 레코드를 조회합니다.
    ///
    /// 발동한 Once 규칙의 레코드는 감사 목적으로 계속 조회됩니다.
    async fn get_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>>;

    /// 틱을 평가하고 진단 카운터를 포함한 보고서를 반환합니다.
    async fn evaluate(&self, tick: &PriceTick) -> AlertResult<EvaluationReport>;

    /// 발동한 규칙 목록을 반환합니다 (순서 보장 없음).
    ///
    /// `last_price`가 없으면 양 방향을 현재가 기준으로 평가합니다.
    async fn get_triggered_alerts(
        &self,
        symbol: &str,
        current_price: Decimal,
        last_price: Option<Decimal>,
    ) -> AlertResult<Vec<AlertRule>> {
        let tick = PriceTick::new(symbol, current_price).with_last_opt(last_price);
        Ok(self.evaluate(&tick).await?.fired)
    }

    /// 레지스트리 이름 (로깅용).
    fn name(&self) -> &'static str;
}

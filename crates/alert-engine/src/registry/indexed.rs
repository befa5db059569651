//! 인덱스 기반 레지스트리.
//!
//! 구독/구독 해제는 저장소의 원자적 연산 하나로 위임하고,
//! 평가는 [`TriggerEvaluator`]가 잠금 없이 수행합니다.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use alert_core::{AlertResult, AlertRule, Clock, EngineConfig, PriceTick, SystemClock};

use super::AlertRegistry;
use crate::cooldown::{CooldownGate, MemoryCooldownGate};
use crate::evaluator::{EvaluationReport, EvaluatorSettings, TriggerEvaluator};
use crate::store::{AlertStore, MemoryAlertStore, RedisAlertStore};

/// 인덱스 기반 레지스트리.
pub struct IndexedRegistry {
    store: Arc<dyn AlertStore>,
    evaluator: TriggerEvaluator,
}

impl IndexedRegistry {
    pub fn new(
        store: Arc<dyn AlertStore>,
        gate: Arc<dyn CooldownGate>,
        clock: Arc<dyn Clock>,
        settings: EvaluatorSettings,
    ) -> Self {
        let evaluator = TriggerEvaluator::new(Arc::clone(&store), gate, clock, settings);
        Self { store, evaluator }
    }

    /// 메모리 저장소와 메모리 게이트로 구성합니다.
    pub fn in_memory(config: &EngineConfig, clock: Arc<dyn Clock>) -> AlertResult<Self> {
        let settings = EvaluatorSettings::from_config(config)?;
        let gate = Arc::new(MemoryCooldownGate::with_clock(Arc::clone(&clock)));
        Ok(Self::new(
            Arc::new(MemoryAlertStore::new()),
            gate,
            clock,
            settings,
        ))
    }

    /// Redis에 연결하여 저장소와 게이트를 모두 Redis로 구성합니다.
    pub async fn connect_redis(config: &EngineConfig) -> AlertResult<Self> {
        let settings = EvaluatorSettings::from_config(config)?;
        let store = Arc::new(RedisAlertStore::connect(&config.redis).await?);
        Ok(Self::new(
            store.clone(),
            store,
            Arc::new(SystemClock),
            settings,
        ))
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        self.evaluator.settings()
    }
}

#[async_trait]
impl AlertRegistry for IndexedRegistry {
    #[instrument(skip(self, rule), fields(alert_id = %rule.alert_id))]
    async fn subscribe(&self, rule: AlertRule) -> AlertResult<()> {
        let rule = rule.normalized();
        rule.validate()?;

        self.store.put_rule(&rule).await?;

        info!(
            symbol = %rule.symbol,
            direction = %rule.direction,
            price = %rule.price,
            frequency = %rule.frequency,
            "Alert subscribed"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unsubscribe(&self, alert_id: &str) -> AlertResult<()> {
        if let Some(rule) = self.store.remove_rule(alert_id).await? {
            info!(symbol = %rule.symbol, direction = %rule.direction, "Alert unsubscribed");
        }
        Ok(())
    }

    async fn get_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>> {
        self.store.get_rule(alert_id).await
    }

    async fn evaluate(&self, tick: &PriceTick) -> AlertResult<EvaluationReport> {
        self.evaluator.evaluate(tick).await
    }

    fn name(&self) -> &'static str {
        "indexed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::{AlertDirection, AlertFrequency, DetailMode, ManualClock};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn registry(config: &EngineConfig) -> IndexedRegistry {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        IndexedRegistry::in_memory(config, Arc::new(clock)).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_normalizes_symbol() {
        let registry = registry(&EngineConfig::default());
        let mut rule = AlertRule::new(
            "1",
            "user_1",
            "BTC_USDT",
            AlertDirection::High,
            dec!(50000),
            AlertFrequency::Once,
        );
        rule.symbol = " btc_usdt ".to_string();
        registry.subscribe(rule).await.unwrap();

        let stored = registry.get_rule("1").await.unwrap().unwrap();
        assert_eq!(stored.symbol, "BTC_USDT");

        let fired = registry
            .get_triggered_alerts("btc_usdt", dec!(50000), None)
            .await
            .unwrap();
        assert_eq!(fired.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_rule_leaves_store_untouched() {
        let registry = registry(&EngineConfig::default());
        let rule = AlertRule::new(
            "1",
            "user_1",
            "BTC_USDT",
            AlertDirection::High,
            dec!(0),
            AlertFrequency::Once,
        );

        let err = registry.subscribe(rule).await.unwrap_err();
        assert!(matches!(err, alert_core::AlertError::InvalidRule(_)));
        assert!(registry.get_rule("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hybrid_mode_returns_index_fields_for_once() {
        let config = EngineConfig {
            detail_mode: DetailMode::Hybrid,
            ..EngineConfig::default()
        };
        let registry = registry(&config);
        registry
            .subscribe(AlertRule::new(
                "9",
                "user_9",
                "ETH_USDT",
                AlertDirection::Low,
                dec!(2000),
                AlertFrequency::Once,
            ))
            .await
            .unwrap();

        let fired = registry
            .get_triggered_alerts("ETH_USDT", dec!(1990), Some(dec!(2010)))
            .await
            .unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alert_id, "9");
        assert_eq!(fired[0].price, dec!(2000));
        // 인덱스에 없는 필드는 비어 있음
        assert!(fired[0].user_id.is_empty());
    }

    #[tokio::test]
    async fn test_name() {
        let registry = registry(&EngineConfig::default());
        assert_eq!(registry.name(), "indexed");
        assert_eq!(registry.settings().page_size, 100);
    }
}

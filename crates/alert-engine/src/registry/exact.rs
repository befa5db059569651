//! 단일 프로세스용 전체 직렬화 레지스트리.
//!
//! 구독, 해제, 평가가 모두 하나의 잠금 아래에서 실행되므로
//! 평가 중 관찰되는 상태는 항상 일관됩니다. 규칙 수가 적은 배포나
//! 인덱스 기반 구현의 기준 동작 비교에 사용합니다.

use async_trait::async_trait;
use chrono::Timelike;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, Instrument};

use alert_core::{
    alert_span, AlertFrequency, AlertResult, AlertRule, Clock, EngineConfig, PriceTick,
};

use super::AlertRegistry;
use crate::cooldown::{always_gate_key, CooldownGate, MemoryCooldownGate};
use crate::evaluator::{EvaluationReport, EvaluatorSettings};
use crate::index::plan_crossing;

/// 등록된 규칙과 활성 여부.
#[derive(Debug, Clone)]
struct BookEntry {
    rule: AlertRule,
    /// Once 규칙은 발동 후 `false`가 되어 다시 후보가 되지 않음
    armed: bool,
}

/// 전체 직렬화 레지스트리.
pub struct ExactScanRegistry {
    book: Mutex<HashMap<String, BookEntry>>,
    gate: Arc<dyn CooldownGate>,
    clock: Arc<dyn Clock>,
    settings: EvaluatorSettings,
}

impl ExactScanRegistry {
    pub fn new(
        gate: Arc<dyn CooldownGate>,
        clock: Arc<dyn Clock>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            book: Mutex::new(HashMap::new()),
            gate,
            clock,
            settings,
        }
    }

    /// 설정과 시계로 구성합니다. 쿨다운 게이트는 같은 시계를 공유합니다.
    pub fn with_clock(config: &EngineConfig, clock: Arc<dyn Clock>) -> AlertResult<Self> {
        let settings = EvaluatorSettings::from_config(config)?;
        let gate = Arc::new(MemoryCooldownGate::with_clock(Arc::clone(&clock)));
        Ok(Self::new(gate, clock, settings))
    }

    /// 등록된 규칙 수 (발동한 Once 포함).
    pub async fn len(&self) -> usize {
        self.book.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.book.lock().await.is_empty()
    }

    async fn evaluate_locked(&self, tick: &PriceTick) -> AlertResult<EvaluationReport> {
        let mut report = EvaluationReport::default();

        let queries = plan_crossing(tick);
        if queries.is_empty() {
            return Ok(report);
        }

        let mut book = self.book.lock().await;
        let now = self.clock.now();
        let now_ts = now.timestamp();
        let local = now.with_timezone(&self.settings.tz);
        let today = local.date_naive();

        for query in &queries {
            report.pages += 1;
            for entry in book.values_mut() {
                let rule = &mut entry.rule;
                if !entry.armed
                    || rule.symbol != query.key.symbol
                    || rule.direction != query.key.direction
                    || !query.range.contains(rule.price)
                {
                    continue;
                }
                report.candidates += 1;

                if !rule.is_within_service_window(local.hour()) {
                    report.outside_window += 1;
                    continue;
                }

                match rule.frequency {
                    AlertFrequency::Always => {
                        if !self
                            .gate
                            .try_acquire(
                                &always_gate_key(&rule.alert_id),
                                self.settings.always_cooldown,
                            )
                            .await?
                        {
                            report.cooled_down += 1;
                            continue;
                        }
                    }
                    AlertFrequency::Once => {
                        entry.armed = false;
                        report.once_retired += 1;
                    }
                    AlertFrequency::Daily => {
                        if rule.triggered_on(today, &self.settings.tz)
                            || rule.last_triggered_at >= now_ts
                        {
                            report.already_fired_today += 1;
                            continue;
                        }
                    }
                }

                // 마지막 발동 시각은 앞으로만 이동
                if now_ts > rule.last_triggered_at {
                    rule.last_triggered_at = now_ts;
                }
                report.fired.push(rule.clone());
            }
        }

        debug!(
            price = %tick.current,
            candidates = report.candidates,
            fired = report.fired.len(),
            "Tick evaluated"
        );
        Ok(report)
    }
}

#[async_trait]
impl AlertRegistry for ExactScanRegistry {
    async fn subscribe(&self, rule: AlertRule) -> AlertResult<()> {
        let rule = rule.normalized();
        rule.validate()?;

        info!(
            alert_id = %rule.alert_id,
            symbol = %rule.symbol,
            direction = %rule.direction,
            price = %rule.price,
            frequency = %rule.frequency,
            "Alert subscribed"
        );
        self.book
            .lock()
            .await
            .insert(rule.alert_id.clone(), BookEntry { rule, armed: true });
        Ok(())
    }

    async fn unsubscribe(&self, alert_id: &str) -> AlertResult<()> {
        if self.book.lock().await.remove(alert_id).is_some() {
            info!(alert_id, "Alert unsubscribed");
        }
        Ok(())
    }

    async fn get_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>> {
        Ok(self
            .book
            .lock()
            .await
            .get(alert_id)
            .map(|entry| entry.rule.clone()))
    }

    async fn evaluate(&self, tick: &PriceTick) -> AlertResult<EvaluationReport> {
        self.evaluate_locked(tick)
            .instrument(alert_span!("evaluate_tick_exact", tick.symbol))
            .await
    }

    fn name(&self) -> &'static str {
        "exact_scan"
    }
}

//! 트리거 평가기.
//!
//! 틱 하나에 대해 후보 범위를 페이지 단위로 조회하고, 후보마다
//! 서비스 시간과 재발동 정책을 적용하여 발동한 규칙을 돌려줍니다.
//!
//! # 후보 처리 순서
//!
//! 1. 인덱스 페이로드에서 `{alert_id, frequency}` 복원
//! 2. 레코드가 필요하면 조회 (`DetailMode::Full`은 항상, `Hybrid`는 Daily만)
//! 3. 레코드가 있고 서비스 시간이 설정돼 있으면 현재 시(hour)로 걸러냄
//! 4. Always: 쿨다운 게이트 획득 실패 시 제외
//! 5. Once: 발동 후 인덱스 제거 대기열에 추가 (레코드는 유지)
//! 6. Daily: 같은 날 이미 발동했으면 제외, 아니면 CAS로 마지막 발동 시각 갱신
//!
//! 전체 스캔이 끝난 뒤 대기 중인 Once 엔트리를 인덱스별로 한 번에 제거합니다.
//!
//! 페이지는 마지막으로 본 `(가격, 멤버)` 뒤에서 이어 읽으므로 스캔 중
//! 다른 구독/해제가 있어도 기존 후보를 건너뛰지 않습니다. 같은 규칙이 한 틱에
//! 두 번 보이면 두 번째는 무시합니다.
//!
//! # 실패 의미
//!
//! 마감은 페이지 사이뿐 아니라 저장소/게이트 호출 하나하나에도 적용됩니다.
//! 저장소 오류나 마감 초과는 호출 전체를 에러로 끝냅니다. 이미 반영된
//! 쿨다운/Daily 갱신은 그대로 남고, Once 제거는 적용되지 않으므로
//! 재시도 시 Once 규칙은 다시 전달됩니다 (최소 한 번).

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use alert_core::{
    alert_span, AlertError, AlertFrequency, AlertResult, AlertRule, Clock, DetailMode,
    EngineConfig, IndexEntry, IndexKey, PriceTick,
};

use crate::cooldown::{always_gate_key, once_claim_key, CooldownGate};
use crate::index::{plan_crossing, IndexSlot};
use crate::store::AlertStore;

/// 평가기 설정.
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub page_size: usize,
    pub always_cooldown: Duration,
    pub timeout: Option<Duration>,
    pub detail_mode: DetailMode,
    pub tz: Tz,
    pub once_claim_ttl: Option<Duration>,
}

impl EvaluatorSettings {
    pub fn from_config(config: &EngineConfig) -> AlertResult<Self> {
        config.validate()?;
        Ok(Self {
            page_size: config.page_size,
            always_cooldown: config.always_cooldown(),
            timeout: config.evaluation_timeout(),
            detail_mode: config.detail_mode,
            tz: config.tz()?,
            once_claim_ttl: config.once_claim_ttl(),
        })
    }
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            always_cooldown: Duration::from_secs(60),
            timeout: Some(Duration::from_millis(3000)),
            detail_mode: DetailMode::Full,
            tz: chrono_tz::UTC,
            once_claim_ttl: None,
        }
    }
}

/// 평가 결과와 진단 카운터.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    /// 발동한 규칙 (순서 보장 없음)
    pub fired: Vec<AlertRule>,
    /// 조회된 후보 수
    pub candidates: usize,
    /// 조회한 페이지 수
    pub pages: usize,
    /// 쿨다운으로 제외된 Always 규칙
    pub cooled_down: usize,
    /// 서비스 시간 밖이라 제외된 규칙
    pub outside_window: usize,
    /// 오늘 이미 발동한 Daily 규칙
    pub already_fired_today: usize,
    /// 다른 평가기가 먼저 점유한 Once 규칙
    pub claimed_elsewhere: usize,
    /// 레코드와 맞지 않아 건너뛴 인덱스 엔트리
    pub inconsistent: usize,
    /// 인덱스에서 제거된 Once 엔트리
    pub once_retired: usize,
}

impl EvaluationReport {
    /// 발동한 규칙 ID 목록.
    pub fn fired_ids(&self) -> Vec<&str> {
        self.fired.iter().map(|rule| rule.alert_id.as_str()).collect()
    }
}

/// 한 틱 평가 동안 고정되는 시각 정보.
struct TickContext {
    tick_current: rust_decimal::Decimal,
    now: DateTime<Utc>,
    local: DateTime<Tz>,
    deadline: Option<Instant>,
}

impl TickContext {
    /// 마감까지 `call`을 기다립니다. 마감이 지나면 `DeadlineExceeded`.
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = AlertResult<T>>,
    ) -> AlertResult<T> {
        let Some(deadline) = self.deadline else {
            return call.await;
        };
        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, "Evaluation deadline exceeded during store call");
                Err(AlertError::DeadlineExceeded(format!(
                    "{} did not finish before the deadline",
                    operation
                )))
            }
        }
    }
}

/// 인덱스 기반 트리거 평가기.
pub struct TriggerEvaluator {
    store: Arc<dyn AlertStore>,
    gate: Arc<dyn CooldownGate>,
    clock: Arc<dyn Clock>,
    settings: EvaluatorSettings,
}

impl TriggerEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        gate: Arc<dyn CooldownGate>,
        clock: Arc<dyn Clock>,
        settings: EvaluatorSettings,
    ) -> Self {
        Self {
            store,
            gate,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// 틱 하나를 평가합니다.
    ///
    /// 후보가 없으면 빈 보고서를 `Ok`로 반환하며, 가격이 변하지 않은 틱은
    /// 인덱스에 접근하지 않습니다.
    pub async fn evaluate(&self, tick: &PriceTick) -> AlertResult<EvaluationReport> {
        self.evaluate_inner(tick)
            .instrument(alert_span!("evaluate_tick", tick.symbol))
            .await
    }

    async fn evaluate_inner(&self, tick: &PriceTick) -> AlertResult<EvaluationReport> {
        let mut report = EvaluationReport::default();

        let queries = plan_crossing(tick);
        if queries.is_empty() {
            debug!(price = %tick.current, "Price unchanged, skipping index scan");
            return Ok(report);
        }

        let deadline = self.settings.timeout.map(|timeout| Instant::now() + timeout);
        let now = self.clock.now();
        let ctx = TickContext {
            tick_current: tick.current,
            now,
            local: now.with_timezone(&self.settings.tz),
            deadline,
        };
        let page_size = self.settings.page_size;
        let mut retiring: HashMap<IndexKey, Vec<String>> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();

        for query in &queries {
            let mut cursor: Option<IndexSlot> = None;
            loop {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    warn!(
                        index = %query.key,
                        pages = report.pages,
                        "Evaluation deadline exceeded, aborting scan"
                    );
                    return Err(AlertError::DeadlineExceeded(format!(
                        "{} after {} pages",
                        query.key, report.pages
                    )));
                }

                let page = ctx
                    .bounded(
                        "scan_index",
                        self.store
                            .scan_index(&query.key, &query.range, cursor.as_ref(), page_size),
                    )
                    .await?;
                report.pages += 1;

                let fetched = page.len();
                cursor = page.last().cloned();
                for slot in page {
                    report.candidates += 1;
                    self.evaluate_candidate(
                        &query.key,
                        slot,
                        &ctx,
                        &mut report,
                        &mut retiring,
                        &mut seen,
                    )
                    .await?;
                }

                if fetched < page_size {
                    break;
                }
            }
        }

        for (key, members) in retiring {
            report.once_retired += ctx
                .bounded(
                    "remove_index_members",
                    self.store.remove_index_members(&key, &members),
                )
                .await?;
        }

        debug!(
            price = %tick.current,
            last = ?tick.last,
            fed_at = %tick.timestamp,
            candidates = report.candidates,
            fired = report.fired.len(),
            inconsistent = report.inconsistent,
            "Tick evaluated"
        );

        Ok(report)
    }

    async fn evaluate_candidate(
        &self,
        key: &IndexKey,
        slot: IndexSlot,
        ctx: &TickContext,
        report: &mut EvaluationReport,
        retiring: &mut HashMap<IndexKey, Vec<String>>,
        seen: &mut HashSet<String>,
    ) -> AlertResult<()> {
        let entry = match IndexEntry::decode(&slot.member) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index = %key, error = %e, "Skipping undecodable index entry");
                report.inconsistent += 1;
                return Ok(());
            }
        };
        if !seen.insert(entry.alert_id.clone()) {
            debug!(alert_id = %entry.alert_id, "Candidate already evaluated in this tick");
            return Ok(());
        }

        let needs_record = match self.settings.detail_mode {
            DetailMode::Full => true,
            DetailMode::Hybrid => entry.frequency.needs_record(),
        };

        let mut rule = if needs_record {
            match self.load_record(key, &entry, ctx).await? {
                Some(rule) => rule,
                None => {
                    report.inconsistent += 1;
                    return Ok(());
                }
            }
        } else {
            AlertRule::from_index(key, slot.price, &entry)
        };

        // 범위 경계는 f64로 비교되므로 Decimal 가격으로 다시 확인
        if !rule.direction.is_satisfied(rule.price, ctx.tick_current) {
            debug!(alert_id = %rule.alert_id, price = %rule.price, "Candidate not satisfied");
            return Ok(());
        }

        if needs_record && !rule.is_within_service_window(ctx.local.hour()) {
            debug!(alert_id = %rule.alert_id, hour = ctx.local.hour(), "Outside service window");
            report.outside_window += 1;
            return Ok(());
        }

        let now_ts = ctx.now.timestamp();
        match entry.frequency {
            AlertFrequency::Always => {
                let gate_key = always_gate_key(&entry.alert_id);
                let acquired = ctx
                    .bounded(
                        "try_acquire",
                        self.gate.try_acquire(&gate_key, self.settings.always_cooldown),
                    )
                    .await?;
                if !acquired {
                    debug!(alert_id = %entry.alert_id, "Cooling down");
                    report.cooled_down += 1;
                    return Ok(());
                }
                if needs_record
                    && ctx
                        .bounded(
                            "advance_last_triggered",
                            self.store.advance_last_triggered(&entry.alert_id, None, now_ts),
                        )
                        .await?
                {
                    rule.last_triggered_at = now_ts;
                }
            }
            AlertFrequency::Once => {
                retiring
                    .entry(key.clone())
                    .or_default()
                    .push(slot.member.clone());

                if let Some(ttl) = self.settings.once_claim_ttl {
                    let claim_key = once_claim_key(&entry.alert_id);
                    let claimed = ctx
                        .bounded("try_acquire", self.gate.try_acquire(&claim_key, ttl))
                        .await?;
                    if !claimed {
                        debug!(
                            alert_id = %entry.alert_id,
                            "Once rule claimed by another evaluator"
                        );
                        report.claimed_elsewhere += 1;
                        return Ok(());
                    }
                }
                if needs_record
                    && ctx
                        .bounded(
                            "advance_last_triggered",
                            self.store.advance_last_triggered(&entry.alert_id, None, now_ts),
                        )
                        .await?
                {
                    rule.last_triggered_at = now_ts;
                }
            }
            AlertFrequency::Daily => {
                let today = ctx.local.date_naive();
                // 시계가 뒤로 가도 마지막 발동 시각은 되돌리지 않음
                if rule.triggered_on(today, &self.settings.tz)
                    || rule.last_triggered_at >= now_ts
                {
                    debug!(alert_id = %entry.alert_id, %today, "Daily rule already fired today");
                    report.already_fired_today += 1;
                    return Ok(());
                }
                let advanced = ctx
                    .bounded(
                        "advance_last_triggered",
                        self.store.advance_last_triggered(
                            &entry.alert_id,
                            Some(rule.last_triggered_at),
                            now_ts,
                        ),
                    )
                    .await?;
                if !advanced {
                    // 다른 평가기가 먼저 기록함
                    report.already_fired_today += 1;
                    return Ok(());
                }
                rule.last_triggered_at = now_ts;
            }
        }

        debug!(alert_id = %rule.alert_id, frequency = %rule.frequency, "Alert fired");
        report.fired.push(rule);
        Ok(())
    }

    /// 후보의 레코드를 조회하고 인덱스와 일치하는지 확인합니다.
    async fn load_record(
        &self,
        key: &IndexKey,
        entry: &IndexEntry,
        ctx: &TickContext,
    ) -> AlertResult<Option<AlertRule>> {
        let record = ctx
            .bounded("get_rule", self.store.get_rule(&entry.alert_id))
            .await?;
        let Some(rule) = record else {
            warn!(index = %key, alert_id = %entry.alert_id, "Index entry without record");
            return Ok(None);
        };

        let matches_index = rule.symbol == key.symbol
            && rule.direction == key.direction
            && rule.frequency == entry.frequency;
        if !matches_index {
            warn!(
                index = %key,
                alert_id = %entry.alert_id,
                record_symbol = %rule.symbol,
                record_direction = %rule.direction,
                "Index entry does not match its record"
            );
            return Ok(None);
        }

        Ok(Some(rule))
    }
}

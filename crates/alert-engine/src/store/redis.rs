//! Redis 저장소 구현.
//!
//! 키 레이아웃 (`{prefix}` = `RedisConfig::key_prefix`):
//!
//! ```text
//! {prefix}:rule:{alert_id}             STRING  규칙 레코드 (JSON)
//! {prefix}:index:{symbol}:{direction}  ZSET    score = 기준 가격, member = "{code}:{alert_id}"
//! {prefix}:cooldown:{gate_key}         STRING  SET NX PX 로 잡는 쿨다운 게이트
//! ```
//!
//! 구독/구독 해제는 레코드와 인덱스 두 키를 건드리므로 Lua 스크립트 하나로 실행합니다.
//! 스크립트는 기존 레코드의 종목/방향으로 이전 인덱스 키를 계산하므로
//! Redis Cluster에서는 모든 키가 같은 슬롯에 있어야 합니다.
//!
//! ZSET score는 `f64`이므로 `f64`로 정확히 왕복하지 않는 가격은 구독 시 거부합니다.
//! 덕분에 인덱스에서 복원한 가격은 레코드 가격과 항상 같습니다.
//!
//! 연결은 `ConnectionManager`를 호출마다 복제해 사용하므로 평가기들이
//! 하나의 잠금을 두고 줄 서지 않습니다.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use alert_core::{AlertError, AlertResult, AlertRule, IndexKey, RedisConfig};

use super::AlertStore;
use crate::cooldown::CooldownGate;
use crate::index::{IndexSlot, PriceRange};

/// 레코드 쓰기 + 이전 인덱스 엔트리 제거 + 새 인덱스 엔트리 삽입.
///
/// KEYS[1] = 레코드 키, KEYS[2] = 새 인덱스 키
/// ARGV[1] = 레코드 JSON, ARGV[2] = 새 멤버, ARGV[3] = score, ARGV[4] = 인덱스 키 접두사
const SUBSCRIBE_SCRIPT: &str = r#"
local codes = { once = 'O', daily = 'D', always = 'A' }
local previous = redis.call('GET', KEYS[1])
if previous then
  local rule = cjson.decode(previous)
  local code = codes[rule['type']]
  if code then
    redis.call('ZREM', ARGV[4] .. rule['symbol'] .. ':' .. rule['direction'], code .. ':' .. rule['alert_id'])
  end
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 1
"#;

/// 레코드를 읽어 인덱스 엔트리를 제거하고 레코드를 삭제합니다. 삭제한 레코드를 반환.
///
/// KEYS[1] = 레코드 키, ARGV[1] = 인덱스 키 접두사
const UNSUBSCRIBE_SCRIPT: &str = r#"
local codes = { once = 'O', daily = 'D', always = 'A' }
local previous = redis.call('GET', KEYS[1])
if not previous then
  return false
end
local rule = cjson.decode(previous)
local code = codes[rule['type']]
if code then
  redis.call('ZREM', ARGV[1] .. rule['symbol'] .. ':' .. rule['direction'], code .. ':' .. rule['alert_id'])
end
redis.call('DEL', KEYS[1])
return previous
"#;

/// 저장된 값이 기대값과 같을 때만 교체합니다.
///
/// KEYS[1] = 레코드 키, ARGV[1] = 기대 JSON, ARGV[2] = 새 JSON
const COMPARE_AND_SET_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// 범위 안에서 커서 `(score, member)` 뒤의 항목을 최대 limit개 반환합니다.
///
/// KEYS[1] = 인덱스 키
/// ARGV[1] = 최소 score, ARGV[2] = 최대 score, ARGV[3] = limit,
/// ARGV[4] = 커서 score (없으면 빈 문자열), ARGV[5] = 커서 멤버
const SCAN_PAGE_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[3])
if ARGV[4] == '' then
  return redis.call('ZRANGEBYSCORE', key, ARGV[1], ARGV[2], 'WITHSCORES', 'LIMIT', 0, limit)
end
local cscore = tonumber(ARGV[4])
local cmember = ARGV[5]
local maxscore = math.huge
if ARGV[2] ~= '+inf' then
  maxscore = tonumber(ARGV[2])
end
local start
local held = redis.call('ZSCORE', key, cmember)
if held and tonumber(held) == cscore then
  start = redis.call('ZRANK', key, cmember) + 1
else
  start = redis.call('ZCOUNT', key, '-inf', '(' .. ARGV[4])
end
local out = {}
while true do
  local batch = redis.call('ZRANGE', key, start, start + limit - 1, 'WITHSCORES')
  if #batch == 0 then
    return out
  end
  for i = 1, #batch, 2 do
    local score = tonumber(batch[i + 1])
    if score > maxscore then
      return out
    end
    if score > cscore or (score == cscore and batch[i] > cmember) then
      out[#out + 1] = batch[i]
      out[#out + 1] = batch[i + 1]
      if #out >= limit * 2 then
        return out
      end
    end
  end
  start = start + limit
end
"#;

/// CAS 재시도 한도.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Redis 기반 알림 저장소.
#[derive(Clone)]
pub struct RedisAlertStore {
    connection: ConnectionManager,
    key_prefix: String,
    subscribe_script: Arc<Script>,
    unsubscribe_script: Arc<Script>,
    cas_script: Arc<Script>,
    scan_script: Arc<Script>,
}

fn store_error(err: redis::RedisError) -> AlertError {
    AlertError::StoreUnavailable(err.to_string())
}

impl RedisAlertStore {
    /// 새로운 Redis 연결을 생성합니다.
    pub async fn connect(config: &RedisConfig) -> AlertResult<Self> {
        info!("Connecting to Redis...");

        let client = Client::open(config.url.as_str()).map_err(store_error)?;
        let connection = ConnectionManager::new(client).await.map_err(store_error)?;

        info!(prefix = %config.key_prefix, "Redis connection established");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            subscribe_script: Arc::new(Script::new(SUBSCRIBE_SCRIPT)),
            unsubscribe_script: Arc::new(Script::new(UNSUBSCRIBE_SCRIPT)),
            cas_script: Arc::new(Script::new(COMPARE_AND_SET_SCRIPT)),
            scan_script: Arc::new(Script::new(SCAN_PAGE_SCRIPT)),
        })
    }

    /// Redis 상태를 확인합니다.
    pub async fn health_check(&self) -> AlertResult<bool> {
        let mut conn = self.connection.clone();
        let result: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(result == "PONG")
    }

    // =========================================================================
    // 키
    // =========================================================================

    fn rule_key(&self, alert_id: &str) -> String {
        format!("{}:rule:{}", self.key_prefix, alert_id)
    }

    fn index_key_prefix(&self) -> String {
        format!("{}:index:", self.key_prefix)
    }

    fn index_key(&self, key: &IndexKey) -> String {
        format!("{}{}:{}", self.index_key_prefix(), key.symbol, key.direction)
    }

    fn cooldown_key(&self, gate_key: &str) -> String {
        format!("{}:cooldown:{}", self.key_prefix, gate_key)
    }

    /// 가격을 score로 변환합니다 (범위 경계용, 근사 허용).
    fn score_of(price: Decimal) -> AlertResult<f64> {
        price
            .to_f64()
            .ok_or_else(|| AlertError::InvalidRule(format!("price {} has no f64 score", price)))
    }

    /// 저장할 규칙 가격의 score. 인덱스에서 같은 가격으로 복원되지 않으면 거부합니다.
    fn exact_score_of(price: Decimal) -> AlertResult<f64> {
        let score = Self::score_of(price)?;
        if Decimal::from_f64(score) != Some(price) {
            return Err(AlertError::InvalidRule(format!(
                "price {} cannot be stored exactly as an index score",
                price
            )));
        }
        Ok(score)
    }

    fn score_bound(bound: Option<Decimal>, unbounded: &str) -> AlertResult<String> {
        match bound {
            Some(price) => Ok(Self::score_of(price)?.to_string()),
            None => Ok(unbounded.to_string()),
        }
    }
}

#[async_trait]
impl AlertStore for RedisAlertStore {
    #[instrument(skip(self, rule), fields(alert_id = %rule.alert_id))]
    async fn put_rule(&self, rule: &AlertRule) -> AlertResult<()> {
        let json = serde_json::to_string(rule)?;
        let score = Self::exact_score_of(rule.price)?;

        let mut conn = self.connection.clone();
        let _: i64 = self
            .subscribe_script
            .key(self.rule_key(&rule.alert_id))
            .key(self.index_key(&rule.index_key()))
            .arg(json)
            .arg(rule.index_entry().encode())
            .arg(score)
            .arg(self.index_key_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>> {
        let mut conn = self.connection.clone();
        let removed: Option<String> = self
            .unsubscribe_script
            .key(self.rule_key(alert_id))
            .arg(self.index_key_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        match removed {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(self.rule_key(alert_id))
            .await
            .map_err(store_error)?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn advance_last_triggered(
        &self,
        alert_id: &str,
        expected: Option<i64>,
        triggered_at: i64,
    ) -> AlertResult<bool> {
        let key = self.rule_key(alert_id);
        let mut conn = self.connection.clone();

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let raw: Option<String> = conn.get(&key).await.map_err(store_error)?;
            let Some(raw) = raw else {
                return Ok(false);
            };

            let mut rule: AlertRule = serde_json::from_str(&raw)?;
            if expected.is_some_and(|expected| rule.last_triggered_at != expected) {
                return Ok(false);
            }
            if triggered_at <= rule.last_triggered_at {
                return Ok(false);
            }
            rule.last_triggered_at = triggered_at;
            let next = serde_json::to_string(&rule)?;

            let swapped: i64 = self
                .cas_script
                .key(&key)
                .arg(&raw)
                .arg(next)
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;

            if swapped == 1 {
                return Ok(true);
            }
            debug!(alert_id, attempt, "Record changed during update, retrying");
        }

        Err(AlertError::StoreUnavailable(format!(
            "record {} kept changing during last_triggered_at update",
            alert_id
        )))
    }

    async fn scan_index(
        &self,
        key: &IndexKey,
        range: &PriceRange,
        after: Option<&IndexSlot>,
        limit: usize,
    ) -> AlertResult<Vec<IndexSlot>> {
        let min = Self::score_bound(range.min, "-inf")?;
        let max = Self::score_bound(range.max, "+inf")?;
        let (cursor_score, cursor_member) = match after {
            Some(slot) => (Self::score_of(slot.price)?.to_string(), slot.member.clone()),
            None => (String::new(), String::new()),
        };

        let mut conn = self.connection.clone();
        let page: Vec<(String, f64)> = self
            .scan_script
            .key(self.index_key(key))
            .arg(min)
            .arg(max)
            .arg(limit)
            .arg(cursor_score)
            .arg(cursor_member)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        page.into_iter()
            .map(|(member, score)| {
                let price = Decimal::from_f64(score).ok_or_else(|| {
                    AlertError::Inconsistent(format!(
                        "index score {} for {} is not a price",
                        score, member
                    ))
                })?;
                Ok(IndexSlot { member, price })
            })
            .collect()
    }

    async fn remove_index_members(&self, key: &IndexKey, members: &[String]) -> AlertResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let removed: usize = conn
            .zrem(self.index_key(key), members)
            .await
            .map_err(store_error)?;

        Ok(removed)
    }
}

#[async_trait]
impl CooldownGate for RedisAlertStore {
    async fn try_acquire(&self, gate_key: &str, window: Duration) -> AlertResult<bool> {
        let key = self.cooldown_key(gate_key);
        let ttl_ms = window.as_millis().max(1) as u64;
        let mut conn = self.connection.clone();

        // 원자적 획득을 위해 SET NX PX 사용
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("armed")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(result.is_some())
    }
}

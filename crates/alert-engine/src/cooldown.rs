//! 쿨다운 게이트.
//!
//! "없으면 획득 + TTL" 의미의 규칙 단위 상호 배제입니다.
//! 같은 키로 경쟁하는 호출자들은 윈도우마다 최대 한 번만 `true`를 봅니다.
//! 해제 호출은 없으며 만료는 시간으로만 일어납니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use alert_core::{AlertResult, Clock, SystemClock};

/// Always 규칙의 쿨다운 키.
pub fn always_gate_key(alert_id: &str) -> String {
    format!("always:{}", alert_id)
}

/// Once 규칙의 발동 점유 키.
///
/// Always 키와 접두사가 다르므로 어떤 ID 조합도 같은 게이트를 공유하지 않습니다.
pub fn once_claim_key(alert_id: &str) -> String {
    format!("once:{}", alert_id)
}

/// 만료 항목 정리를 시작하는 게이트 수.
const PURGE_THRESHOLD: usize = 4096;

/// 쿨다운 게이트.
#[async_trait]
pub trait CooldownGate: Send + Sync {
    /// 게이트가 비어 있으면 `window` 동안 잠그고 `true`를 반환합니다.
    async fn try_acquire(&self, gate_key: &str, window: Duration) -> AlertResult<bool>;
}

/// 메모리 내 쿨다운 게이트.
#[derive(Debug)]
pub struct MemoryCooldownGate {
    expiries: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCooldownGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCooldownGate {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            expiries: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl CooldownGate for MemoryCooldownGate {
    async fn try_acquire(&self, gate_key: &str, window: Duration) -> AlertResult<bool> {
        let now = self.clock.now();
        let mut expiries = self.expiries.lock().await;

        if expiries.get(gate_key).is_some_and(|until| *until > now) {
            return Ok(false);
        }

        if expiries.len() >= PURGE_THRESHOLD {
            expiries.retain(|_, until| *until > now);
        }

        let until = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        expiries.insert(gate_key.to_string(), until);
        Ok(true)
    }
}

//! 메모리 내 저장소.
//!
//! 레코드 맵과 인덱스 사다리를 하나의 `RwLock` 아래에 두어
//! 구독/구독 해제가 단일 잠금 구간에서 끝나도록 합니다.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use alert_core::{AlertResult, AlertRule, IndexKey};

use super::AlertStore;
use crate::index::{IndexSlot, PriceLadder, PriceRange};

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, AlertRule>,
    indexes: HashMap<IndexKey, PriceLadder>,
}

impl MemoryState {
    fn unindex(&mut self, rule: &AlertRule) {
        let key = rule.index_key();
        if let Some(ladder) = self.indexes.get_mut(&key) {
            ladder.remove(&rule.index_entry().encode());
            if ladder.is_empty() {
                self.indexes.remove(&key);
            }
        }
    }
}

/// 메모리 내 알림 저장소.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    state: RwLock<MemoryState>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 레코드 수.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// 인덱스 엔트리 수 (모든 인덱스 합계).
    pub async fn index_len(&self) -> usize {
        self.state
            .read()
            .await
            .indexes
            .values()
            .map(PriceLadder::len)
            .sum()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn put_rule(&self, rule: &AlertRule) -> AlertResult<()> {
        let mut state = self.state.write().await;

        if let Some(previous) = state.records.remove(&rule.alert_id) {
            state.unindex(&previous);
        }

        state
            .indexes
            .entry(rule.index_key())
            .or_default()
            .insert(rule.index_entry().encode(), rule.price);
        state.records.insert(rule.alert_id.clone(), rule.clone());

        Ok(())
    }

    async fn remove_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>> {
        let mut state = self.state.write().await;

        let removed = state.records.remove(alert_id);
        if let Some(rule) = &removed {
            state.unindex(rule);
        }

        Ok(removed)
    }

    async fn get_rule(&self, alert_id: &str) -> AlertResult<Option<AlertRule>> {
        Ok(self.state.read().await.records.get(alert_id).cloned())
    }

    async fn advance_last_triggered(
        &self,
        alert_id: &str,
        expected: Option<i64>,
        triggered_at: i64,
    ) -> AlertResult<bool> {
        let mut state = self.state.write().await;

        let Some(rule) = state.records.get_mut(alert_id) else {
            return Ok(false);
        };
        if expected.is_some_and(|expected| rule.last_triggered_at != expected) {
            return Ok(false);
        }
        if triggered_at <= rule.last_triggered_at {
            return Ok(false);
        }

        rule.last_triggered_at = triggered_at;
        Ok(true)
    }

    async fn scan_index(
        &self,
        key: &IndexKey,
        range: &PriceRange,
        after: Option<&IndexSlot>,
        limit: usize,
    ) -> AlertResult<Vec<IndexSlot>> {
        let state = self.state.read().await;

        Ok(state
            .indexes
            .get(key)
            .map(|ladder| ladder.range(range, after, limit))
            .unwrap_or_default())
    }

    async fn remove_index_members(&self, key: &IndexKey, members: &[String]) -> AlertResult<usize> {
        let mut state = self.state.write().await;

        let Some(ladder) = state.indexes.get_mut(key) else {
            return Ok(0);
        };
        let removed = members.iter().filter(|member| ladder.remove(member)).count();
        if ladder.is_empty() {
            state.indexes.remove(key);
        }

        debug!(index = %key, removed, "Index members removed");
        Ok(removed)
    }
}

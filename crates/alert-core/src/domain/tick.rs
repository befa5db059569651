//! 가격 피드가 전달하는 틱.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::normalize_symbol;

/// 가격 틱.
///
/// `last`가 없으면 부트스트랩 모드로, 양 방향을 모두 현재가 기준으로 평가합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub current: Decimal,
    #[serde(default)]
    pub last: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: &str, current: Decimal) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            current,
            last: None,
            timestamp: Utc::now(),
        }
    }

    /// 직전 가격 설정.
    pub fn with_last(mut self, last: Decimal) -> Self {
        self.last = Some(last);
        self
    }

    /// 직전 가격 설정 (선택).
    pub fn with_last_opt(mut self, last: Option<Decimal>) -> Self {
        self.last = last;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

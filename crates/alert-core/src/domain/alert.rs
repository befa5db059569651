//! 가격 알림 규칙 정의.
//!
//! 사용자가 "BTC_USDT가 50000 이상으로 오르면 알림"과 같은 조건부 규칙을 등록합니다.
//!
//! # 사용 예시
//!
//! ```rust
//! use alert_core::{AlertDirection, AlertFrequency, AlertRule};
//! use rust_decimal::Decimal;
//!
//! let rule = AlertRule::new(
//!     "1",
//!     "user_42",
//!     "btc_usdt",
//!     AlertDirection::High,
//!     Decimal::from(50_000),
//!     AlertFrequency::Once,
//! )
//! .with_service_window(9, 18);
//!
//! assert_eq!(rule.symbol, "BTC_USDT");
//! assert!(rule.has_service_window());
//! ```

use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{IndexEntry, IndexKey};
use crate::error::{AlertError, AlertResult};

/// 알림 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertDirection {
    /// 가격이 기준가 이상으로 오르면 발동
    High,
    /// 가격이 기준가 이하로 내려가면 발동
    Low,
}

impl AlertDirection {
    /// 가격이 기준가를 충족하는지 확인.
    pub fn is_satisfied(&self, threshold: Decimal, price: Decimal) -> bool {
        match self {
            Self::High => price >= threshold,
            Self::Low => price <= threshold,
        }
    }

    /// 저장소 키에 쓰이는 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    /// 모든 방향.
    pub fn all() -> [AlertDirection; 2] {
        [AlertDirection::High, AlertDirection::Low]
    }
}

impl fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertDirection {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            _ => Err(AlertError::InvalidRule(format!("unknown direction: {}", s))),
        }
    }
}

/// 재발동 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertFrequency {
    /// 한 번 발동 후 인덱스에서 제거
    Once,
    /// 달력 날짜당 최대 한 번
    Daily,
    /// 쿨다운 윈도우당 최대 한 번
    Always,
}

impl AlertFrequency {
    /// 인덱스 페이로드에 쓰이는 한 글자 코드.
    pub fn code(&self) -> char {
        match self {
            Self::Once => 'O',
            Self::Daily => 'D',
            Self::Always => 'A',
        }
    }

    /// 코드에서 정책을 복원합니다.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'O' => Some(Self::Once),
            'D' => Some(Self::Daily),
            'A' => Some(Self::Always),
            _ => None,
        }
    }

    /// 인덱스 페이로드만으로는 판단할 수 없어 레코드 조회가 필요한지 여부.
    pub fn needs_record(&self) -> bool {
        matches!(self, Self::Daily)
    }
}

impl fmt::Display for AlertFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Daily => write!(f, "daily"),
            Self::Always => write!(f, "always"),
        }
    }
}

/// 알림 규칙.
///
/// 레코드 저장소에 보관되는 전체 상세 정보입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// 규칙 ID (호출자가 지정)
    pub alert_id: String,

    /// 사용자 ID
    #[serde(default)]
    pub user_id: String,

    /// 종목 (예: "BTC_USDT")
    pub symbol: String,

    /// 알림 방향
    pub direction: AlertDirection,

    /// 기준 가격 (인덱스 정렬 키)
    pub price: Decimal,

    /// 재발동 정책
    #[serde(rename = "type")]
    pub frequency: AlertFrequency,

    /// 서비스 시작 시각 (0~23)
    #[serde(default)]
    pub start_hour: u8,

    /// 서비스 종료 시각 (0~23, 미포함)
    #[serde(default)]
    pub end_hour: u8,

    /// 마지막 발동 시각 (unix 초, 0이면 발동 이력 없음)
    #[serde(default)]
    pub last_triggered_at: i64,

    /// 생성 시각 (unix 초)
    #[serde(default)]
    pub created_at: i64,
}

impl AlertRule {
    /// 새 알림 규칙 생성.
    pub fn new(
        alert_id: impl Into<String>,
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        direction: AlertDirection,
        price: Decimal,
        frequency: AlertFrequency,
    ) -> Self {
        Self {
            alert_id: alert_id.into(),
            user_id: user_id.into(),
            symbol: normalize_symbol(&symbol.into()),
            direction,
            price,
            frequency,
            start_hour: 0,
            end_hour: 0,
            last_triggered_at: 0,
            created_at: Utc::now().timestamp(),
        }
    }

    /// 인덱스 엔트리만으로 규칙을 구성합니다.
    ///
    /// 인덱스에 없는 필드(사용자, 서비스 시간, 발동 이력)는 비어 있습니다.
    pub fn from_index(key: &IndexKey, price: Decimal, entry: &IndexEntry) -> Self {
        Self {
            alert_id: entry.alert_id.clone(),
            user_id: String::new(),
            symbol: key.symbol.clone(),
            direction: key.direction,
            price,
            frequency: entry.frequency,
            start_hour: 0,
            end_hour: 0,
            last_triggered_at: 0,
            created_at: 0,
        }
    }

    /// 서비스 시간 설정.
    pub fn with_service_window(mut self, start_hour: u8, end_hour: u8) -> Self {
        self.start_hour = start_hour;
        self.end_hour = end_hour;
        self
    }

    /// 마지막 발동 시각 설정.
    pub fn with_last_triggered_at(mut self, last_triggered_at: i64) -> Self {
        self.last_triggered_at = last_triggered_at;
        self
    }

    /// 구독 전에 규칙을 검증합니다.
    pub fn validate(&self) -> AlertResult<()> {
        if self.alert_id.trim().is_empty() {
            return Err(AlertError::InvalidRule("alert_id is empty".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return Err(AlertError::InvalidRule(format!(
                "symbol is empty (alert_id={})",
                self.alert_id
            )));
        }
        if self.price <= Decimal::ZERO {
            return Err(AlertError::InvalidRule(format!(
                "price must be positive (alert_id={}, price={})",
                self.alert_id, self.price
            )));
        }
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(AlertError::InvalidRule(format!(
                "service hours must be within 0..=23 (alert_id={}, start={}, end={})",
                self.alert_id, self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }

    /// 종목을 정규화한 사본.
    pub fn normalized(mut self) -> Self {
        self.symbol = normalize_symbol(&self.symbol);
        self
    }

    /// 이 규칙이 속한 인덱스 키.
    pub fn index_key(&self) -> IndexKey {
        IndexKey::new(&self.symbol, self.direction)
    }

    /// 이 규칙의 인덱스 엔트리.
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry::new(&self.alert_id, self.frequency)
    }

    /// 시간 제한이 있는지 확인.
    pub fn has_service_window(&self) -> bool {
        self.start_hour != self.end_hour
    }

    /// 주어진 시(hour)가 서비스 시간 `[start, end)` 안에 있는지 확인.
    ///
    /// `start > end`이면 자정을 넘기는 구간(예: 22시~6시)으로 해석합니다.
    pub fn is_within_service_window(&self, hour: u32) -> bool {
        if !self.has_service_window() {
            return true;
        }
        let start = u32::from(self.start_hour);
        let end = u32::from(self.end_hour);
        if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// 주어진 날짜(해당 시간대 기준)에 이미 발동했는지 확인.
    pub fn triggered_on(&self, day: NaiveDate, tz: &Tz) -> bool {
        if self.last_triggered_at <= 0 {
            return false;
        }
        match tz.timestamp_opt(self.last_triggered_at, 0).single() {
            Some(at) => at.date_naive() == day,
            None => false,
        }
    }
}

/// 종목 이름 정규화 (공백 제거, 대문자).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

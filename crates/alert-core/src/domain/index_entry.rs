//! 가격 인덱스 엔트리.
//!
//! 인덱스는 (종목, 방향)마다 하나씩 존재하며, 정렬 키는 기준 가격입니다.
//! 페이로드는 Once/Always 판단에 필요한 `{alert_id, frequency}`만 담아
//! 핫 패스에서 레코드 조회를 피합니다.
//!
//! 인코딩 형식: `"{frequency_code}:{alert_id}"` (예: `"O:1"`).
//! 코드를 앞에 두므로 `alert_id`에 `:`가 포함되어도 복원할 수 있습니다.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{normalize_symbol, AlertDirection, AlertFrequency};
use crate::error::{AlertError, AlertResult};

/// 인덱스 식별자 (종목, 방향).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub symbol: String,
    pub direction: AlertDirection,
}

impl IndexKey {
    pub fn new(symbol: &str, direction: AlertDirection) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            direction,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.direction)
    }
}

/// 인덱스 페이로드.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub alert_id: String,
    pub frequency: AlertFrequency,
}

impl IndexEntry {
    pub fn new(alert_id: impl Into<String>, frequency: AlertFrequency) -> Self {
        Self {
            alert_id: alert_id.into(),
            frequency,
        }
    }

    /// 저장소 멤버 문자열로 인코딩합니다.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.frequency.code(), self.alert_id)
    }

    /// 저장소 멤버 문자열을 복원합니다.
    ///
    /// 형식이 맞지 않으면 `Inconsistent`를 반환합니다.
    pub fn decode(member: &str) -> AlertResult<Self> {
        let mut chars = member.chars();
        let frequency = chars
            .next()
            .and_then(AlertFrequency::from_code)
            .ok_or_else(|| AlertError::Inconsistent(format!("unknown index payload: {}", member)))?;

        let alert_id = match chars.as_str().strip_prefix(':') {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(AlertError::Inconsistent(format!(
                    "malformed index payload: {}",
                    member
                )))
            }
        };

        Ok(Self::new(alert_id, frequency))
    }
}

//! 가격 교차 인덱스.
//!
//! (종목, 방향)마다 기준 가격으로 정렬된 구조를 유지하고,
//! 가격 이동 방향에 따라 새로 교차했을 수 있는 후보 범위만 조회합니다.
//!
//! # 후보 범위 도출
//!
//! ```text
//! current > last  →  High 인덱스, price ∈ (-∞, current]
//! current < last  →  Low 인덱스,  price ∈ [current, +∞)
//! current == last →  후보 없음 (인덱스 접근 없음)
//! last 없음       →  High (-∞, current] + Low [current, +∞)
//! ```
//!
//! 직전 가격으로 이미 충족된 규칙은 이전 틱에서 처리되었다고 가정합니다
//! (Once 제거, Always 쿨다운, Daily 기록).

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use alert_core::{AlertDirection, IndexKey, PriceTick};

/// 가격 범위 (양 끝 포함, `None`은 무한).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceRange {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl PriceRange {
    /// (-∞, max]
    pub fn up_to(max: Decimal) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// [min, +∞)
    pub fn from(min: Decimal) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }

    fn bounds(&self) -> (Bound<Decimal>, Bound<Decimal>) {
        (
            self.min.map_or(Bound::Unbounded, Bound::Included),
            self.max.map_or(Bound::Unbounded, Bound::Included),
        )
    }
}

/// 하나의 인덱스에 대한 범위 조회.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub key: IndexKey,
    pub range: PriceRange,
}

impl IndexQuery {
    /// 현재가로 충족되는 방향별 범위.
    pub fn satisfied_by(symbol: &str, direction: AlertDirection, current: Decimal) -> Self {
        let range = match direction {
            AlertDirection::High => PriceRange::up_to(current),
            AlertDirection::Low => PriceRange::from(current),
        };
        Self {
            key: IndexKey::new(symbol, direction),
            range,
        }
    }
}

/// 틱에서 조회할 인덱스 범위 목록을 계산합니다.
///
/// 빈 목록이면 평가기는 인덱스에 접근하지 않습니다.
pub fn plan_crossing(tick: &PriceTick) -> Vec<IndexQuery> {
    match tick.last {
        Some(last) if tick.current > last => vec![IndexQuery::satisfied_by(
            &tick.symbol,
            AlertDirection::High,
            tick.current,
        )],
        Some(last) if tick.current < last => vec![IndexQuery::satisfied_by(
            &tick.symbol,
            AlertDirection::Low,
            tick.current,
        )],
        Some(_) => Vec::new(),
        None => AlertDirection::all()
            .into_iter()
            .map(|direction| IndexQuery::satisfied_by(&tick.symbol, direction, tick.current))
            .collect(),
    }
}

/// 인덱스 범위 조회 결과의 한 항목.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSlot {
    /// 인코딩된 페이로드
    pub member: String,
    /// 기준 가격
    pub price: Decimal,
}

/// 메모리 내 가격 사다리.
///
/// 가격 오름차순, 같은 가격 안에서는 멤버 문자열 순서로 정렬됩니다.
/// 멤버 → 가격 역방향 맵으로 멤버만으로도 제거할 수 있습니다.
#[derive(Debug, Default)]
pub struct PriceLadder {
    by_price: BTreeMap<Decimal, BTreeSet<String>>,
    prices: HashMap<String, Decimal>,
}

impl PriceLadder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 멤버를 삽입합니다. 이미 있으면 가격을 갱신합니다.
    pub fn insert(&mut self, member: String, price: Decimal) {
        self.remove(&member);
        self.by_price
            .entry(price)
            .or_default()
            .insert(member.clone());
        self.prices.insert(member, price);
    }

    /// 멤버를 제거합니다. 없으면 `false`.
    pub fn remove(&mut self, member: &str) -> bool {
        let Some(price) = self.prices.remove(member) else {
            return false;
        };
        if let Some(members) = self.by_price.get_mut(&price) {
            members.remove(member);
            if members.is_empty() {
                self.by_price.remove(&price);
            }
        }
        true
    }

    /// 범위 안의 항목을 오름차순으로 최대 `limit`개 반환합니다.
    ///
    /// `after`가 있으면 그 `(가격, 멤버)`보다 뒤에 있는 항목부터 시작하므로,
    /// 페이지 사이에 앞쪽 항목이 추가/제거되어도 이미 본 항목을 다시 돌려주거나
    /// 아직 보지 않은 항목을 건너뛰지 않습니다.
    pub fn range(
        &self,
        range: &PriceRange,
        after: Option<&IndexSlot>,
        limit: usize,
    ) -> Vec<IndexSlot> {
        let (mut lower, upper) = range.bounds();
        if let Some(cursor) = after {
            if !range.contains(cursor.price) {
                return Vec::new();
            }
            lower = Bound::Included(cursor.price);
        }

        self.by_price
            .range((lower, upper))
            .flat_map(|(price, members)| {
                let start = match after {
                    Some(cursor) if cursor.price == *price => {
                        Bound::Excluded(cursor.member.clone())
                    }
                    _ => Bound::Unbounded,
                };
                members
                    .range::<String, _>((start, Bound::Unbounded))
                    .map(move |member| IndexSlot {
                        member: member.clone(),
                        price: *price,
                    })
            })
            .take(limit)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plan_upward_move_scans_high_only() {
        let tick = PriceTick::new("BTC_USDT", dec!(51000)).with_last(dec!(49000));
        let plan = plan_crossing(&tick);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].key, IndexKey::new("BTC_USDT", AlertDirection::High));
        assert_eq!(plan[0].range, PriceRange::up_to(dec!(51000)));
    }

    #[test]
    fn test_plan_downward_move_scans_low_only() {
        let tick = PriceTick::new("btc_usdt", dec!(39000)).with_last(dec!(41000));
        let plan = plan_crossing(&tick);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].key, IndexKey::new("BTC_USDT", AlertDirection::Low));
        assert_eq!(plan[0].range, PriceRange::from(dec!(39000)));
    }

    #[test]
    fn test_plan_flat_tick_is_empty() {
        let tick = PriceTick::new("BTC_USDT", dec!(50000)).with_last(dec!(50000));
        assert!(plan_crossing(&tick).is_empty());
    }

    #[test]
    fn test_plan_bootstrap_scans_both_directions() {
        let tick = PriceTick::new("BTC_USDT", dec!(50000));
        let plan = plan_crossing(&tick);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].key.direction, AlertDirection::High);
        assert_eq!(plan[1].key.direction, AlertDirection::Low);
        assert_eq!(plan[1].range, PriceRange::from(dec!(50000)));
    }

    #[test]
    fn test_price_range_contains() {
        assert!(PriceRange::up_to(dec!(100)).contains(dec!(100)));
        assert!(!PriceRange::up_to(dec!(100)).contains(dec!(100.01)));
        assert!(PriceRange::from(dec!(100)).contains(dec!(100)));
        assert!(!PriceRange::from(dec!(100)).contains(dec!(99.99)));
    }

    #[test]
    fn test_ladder_range_is_sorted_and_paginated() {
        let mut ladder = PriceLadder::new();
        ladder.insert("O:c".to_string(), dec!(300));
        ladder.insert("O:a".to_string(), dec!(100));
        ladder.insert("A:b".to_string(), dec!(200));
        ladder.insert("A:d".to_string(), dec!(200));

        let all = ladder.range(&PriceRange::up_to(dec!(250)), None, 10);
        let members: Vec<_> = all.iter().map(|s| s.member.as_str()).collect();
        assert_eq!(members, vec!["O:a", "A:b", "A:d"]);

        let page = ladder.range(&PriceRange::up_to(dec!(1000)), Some(&all[0]), 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].member, "A:b");
        assert_eq!(page[1].member, "A:d");

        // 같은 가격 안에서 커서 다음 멤버부터 이어짐
        let next = ladder.range(&PriceRange::up_to(dec!(1000)), Some(&page[0]), 10);
        let members: Vec<_> = next.iter().map(|s| s.member.as_str()).collect();
        assert_eq!(members, vec!["A:d", "O:c"]);
    }

    #[test]
    fn test_ladder_reinsert_moves_member() {
        let mut ladder = PriceLadder::new();
        ladder.insert("O:1".to_string(), dec!(100));
        ladder.insert("O:1".to_string(), dec!(500));

        assert_eq!(ladder.len(), 1);
        assert!(ladder.range(&PriceRange::up_to(dec!(200)), None, 10).is_empty());
        assert_eq!(ladder.range(&PriceRange::from(dec!(400)), None, 10).len(), 1);

        assert!(ladder.remove("O:1"));
        assert!(!ladder.remove("O:1"));
        assert!(ladder.is_empty());
    }

    #[test]
    fn test_ladder_thundering_herd_pages() {
        let mut ladder = PriceLadder::new();
        for i in 0..250 {
            ladder.insert(format!("A:{:04}", i), dec!(50000));
        }

        let range = PriceRange::up_to(dec!(50000));
        let mut cursor: Option<IndexSlot> = None;
        let mut sizes = Vec::new();
        loop {
            let page = ladder.range(&range, cursor.as_ref(), 100);
            if page.is_empty() {
                break;
            }
            sizes.push(page.len());
            cursor = page.last().cloned();
        }
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_ladder_cursor_survives_changes_below_it() {
        let mut ladder = PriceLadder::new();
        ladder.insert("O:a".to_string(), dec!(100));
        ladder.insert("O:b".to_string(), dec!(101));
        let range = PriceRange::up_to(dec!(200));

        let first = ladder.range(&range, None, 1);
        assert_eq!(first[0].member, "O:a");

        // 커서 앞쪽에 추가되거나 커서 자신이 제거되어도 다음 페이지는 b
        ladder.insert("O:late".to_string(), dec!(50));
        ladder.remove("O:a");
        let second = ladder.range(&range, first.last(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].member, "O:b");
    }
}

//! 교차 평가 속성 테스트
//!
//! 임의의 규칙 집합과 틱에 대해 방향 조건과 종목 격리가 항상 성립하는지 확인합니다.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

use alert_core::{AlertDirection, AlertFrequency, AlertRule, EngineConfig, ManualClock};
use alert_engine::{AlertRegistry, ExactScanRegistry, IndexedRegistry};

const SYMBOLS: [&str; 2] = ["BTC_USDT", "ETH_USDT"];

#[derive(Debug, Clone)]
struct RuleSeed {
    symbol: usize,
    high: bool,
    price: u32,
    frequency: u8,
}

fn rule_seed() -> impl Strategy<Value = RuleSeed> {
    (0..SYMBOLS.len(), any::<bool>(), 1u32..1_000, 0u8..3).prop_map(
        |(symbol, high, price, frequency)| RuleSeed {
            symbol,
            high,
            price,
            frequency,
        },
    )
}

fn build_rules(seeds: &[RuleSeed]) -> Vec<AlertRule> {
    seeds
        .iter()
        .enumerate()
        .map(|(i, seed)| {
            let direction = if seed.high {
                AlertDirection::High
            } else {
                AlertDirection::Low
            };
            let frequency = match seed.frequency {
                0 => AlertFrequency::Once,
                1 => AlertFrequency::Daily,
                _ => AlertFrequency::Always,
            };
            AlertRule::new(
                format!("rule_{i}"),
                "user_1",
                SYMBOLS[seed.symbol],
                direction,
                Decimal::from(seed.price),
                frequency,
            )
        })
        .collect()
}

fn registries() -> Vec<Box<dyn AlertRegistry>> {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    let config = EngineConfig {
        page_size: 7,
        ..EngineConfig::default()
    };
    vec![
        Box::new(IndexedRegistry::in_memory(&config, Arc::new(clock.clone())).unwrap())
            as Box<dyn AlertRegistry>,
        Box::new(ExactScanRegistry::with_clock(&config, Arc::new(clock)).unwrap()),
    ]
}

proptest! {
    #[test]
    fn fired_rules_match_direction_and_symbol(
        seeds in prop::collection::vec(rule_seed(), 0..40),
        symbol in 0..SYMBOLS.len(),
        current in 1u32..1_000,
        last in prop::option::of(1u32..1_000),
    ) {
        let rules = build_rules(&seeds);
        let current = Decimal::from(current);
        let last = last.map(Decimal::from);
        let symbol = SYMBOLS[symbol];

        // 새 레지스트리에서는 쿨다운/발동 이력이 없으므로 후보 범위가 곧 발동 집합
        let expected: HashSet<String> = rules
            .iter()
            .filter(|rule| rule.symbol == symbol)
            .filter(|rule| rule.direction.is_satisfied(rule.price, current))
            .filter(|rule| match (last, rule.direction) {
                (None, _) => true,
                (Some(last), AlertDirection::High) => current > last,
                (Some(last), AlertDirection::Low) => current < last,
            })
            .map(|rule| rule.alert_id.clone())
            .collect();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        for registry in registries() {
            let fired = runtime.block_on(async {
                for rule in &rules {
                    registry.subscribe(rule.clone()).await.unwrap();
                }
                registry.get_triggered_alerts(symbol, current, last).await.unwrap()
            });

            for rule in &fired {
                prop_assert_eq!(rule.symbol.as_str(), symbol);
                prop_assert!(rule.direction.is_satisfied(rule.price, current));
            }

            let fired: HashSet<String> = fired.into_iter().map(|rule| rule.alert_id).collect();
            prop_assert_eq!(&fired, &expected, "{}", registry.name());
        }
    }
}

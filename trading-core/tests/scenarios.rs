//! Cross-module persistence scenarios (spec §6): round-tripping every
//! on-disk record type through `StrategyStore` exactly as the Order
//! Manager and Strategy Engine do across a restart.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal_macros::dec;

use trading_core::domain::market::MarketInfo;
use trading_core::domain::order::{OrderSide, OrderType, PendingOrder, PendingOrderStatus};
use trading_core::domain::state::{GridState, PositionBook, State, StateVariant};
use trading_core::domain::strategy::{OttConfig, Strategy, StrategyParameters, Symbol, Timeframe};
use trading_core::domain::trade::Trade;
use trading_core::persistence::StrategyStore;

fn grid_strategy(id: &str) -> Strategy {
    Strategy {
        id: id.to_string(),
        name: "btc grid".to_string(),
        symbol: Symbol::BtcUsdt,
        timeframe: Timeframe::H1,
        parameters: StrategyParameters::GridOtt {
            y: dec!(100),
            usdt_grid: dec!(50),
        },
        ott: Some(OttConfig {
            period: 20,
            opt: dec!(2.0),
        }),
        price_min: Some(dec!(10000)),
        price_max: Some(dec!(100000)),
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        extra: Default::default(),
    }
}

#[test]
fn strategies_json_round_trips_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = StrategyStore::new(dir.path());

    let strategies = vec![grid_strategy("g1"), grid_strategy("g2")];
    store.save_strategies(&strategies).unwrap();

    let loaded = store.load_strategies().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].id, "g1");
    assert_eq!(loaded[1].id, "g2");
}

#[test]
fn missing_strategies_file_loads_as_empty_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = StrategyStore::new(dir.path());
    let loaded = store.load_strategies().unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn state_round_trips_with_grid_variant_intact() {
    let dir = tempfile::tempdir().unwrap();
    let store = StrategyStore::new(dir.path());

    let mut state = State::new(
        "g1",
        Symbol::BtcUsdt,
        StateVariant::GridOtt(GridState {
            position: PositionBook::flat(dec!(10000)),
            gf: Some(dec!(30000)),
        }),
    );
    state.last_bar_timestamp = Some(Utc::now());
    store.save_state(&state).unwrap();

    let loaded = store.load_state("g1").unwrap().expect("state was just saved");
    assert_eq!(loaded.strategy_id, "g1");
    assert_eq!(loaded.variant.as_grid().unwrap().gf, Some(dec!(30000)));
    assert!(store.load_state("does-not-exist").unwrap().is_none());
}

#[test]
fn pending_orders_round_trip_as_a_map() {
    let dir = tempfile::tempdir().unwrap();
    let store = StrategyStore::new(dir.path());

    let mut orders = HashMap::new();
    let order = PendingOrder::new_pending_submit(
        "g1",
        OrderSide::Buy,
        dec!(0.01),
        Some(dec!(29900)),
        OrderType::Limit,
        Some("C1-1".to_string()),
        None,
    );
    let key = order.internal_id.clone();
    orders.insert(key.clone(), order);

    store.save_pending_orders("g1", &orders).unwrap();
    let loaded = store.load_pending_orders("g1").unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[&key].status, PendingOrderStatus::PendingSubmit);

    // A strategy with no WAL file yet loads as an empty map, never an error.
    let empty = store.load_pending_orders("never-traded").unwrap();
    assert!(empty.is_empty());
}

#[test]
fn trades_csv_appends_and_reads_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = StrategyStore::new(dir.path());

    let first = Trade::new("g1", OrderSide::Buy, dec!(30000), dec!(0.01), "o1");
    let mut second = Trade::new("g1", OrderSide::Sell, dec!(30500), dec!(0.01), "o2");
    second.cycle_info = Some("C1-1".to_string());

    store.append_trade(&first).unwrap();
    store.append_trade(&second).unwrap();

    let trades = store.read_trades("g1").unwrap();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].order_id, "o1");
    assert_eq!(trades[1].order_id, "o2");
    assert_eq!(trades[1].cycle_info.as_deref(), Some("C1-1"));
}

#[test]
fn position_limits_default_when_unconfigured() {
    let dir = tempfile::tempdir().unwrap();
    let store = StrategyStore::new(dir.path());
    let limits = store.load_position_limits().unwrap();
    assert_eq!(limits.max_position_usd, dec!(2000));
    assert_eq!(limits.min_position_usd, dec!(-1200));
}

#[test]
fn market_info_rounding_matches_exchange_minimums_end_to_end() {
    // A realistic Grid+OTT sizing step: compute notional, floor to step,
    // and confirm the exchange minimum gate behaves the way the order
    // manager expects before ever calling `create_limit_order`.
    let market = MarketInfo {
        tick_size: dec!(0.1),
        step_size: dec!(0.001),
        min_qty: dec!(0.001),
        min_notional: dec!(5),
        current_price: dec!(30000),
    };
    let target = market.round_price(dec!(29900.03));
    let quantity = market.floor_quantity(dec!(50) / target);
    assert!(market.meets_minimums(quantity, target));
}

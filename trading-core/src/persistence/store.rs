//! On-disk layout (spec §6): one directory per strategy under `root`.
//!
//! - `strategies.json`
//! - `{strategy_id}/state.json`
//! - `{strategy_id}/trades.csv`
//! - `{strategy_id}/pending_orders.json`
//! - `position_limits.json`

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::PendingOrder;
use crate::domain::state::State;
use crate::domain::strategy::Strategy;
use crate::domain::trade::{Trade, TRADES_CSV_HEADER};
use crate::errors::PersistenceError;

use super::atomic::atomic_write;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StrategiesFile {
    strategies: Vec<Strategy>,
    last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionLimits {
    pub max_position_usd: Decimal,
    pub min_position_usd: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Default for PositionLimits {
    fn default() -> Self {
        Self {
            max_position_usd: Decimal::from(2000),
            min_position_usd: Decimal::from(-1200),
            updated_at: Utc::now(),
        }
    }
}

/// Facade over the persisted layout. Every write goes through
/// `atomic_write`; every read tolerates a missing file by returning an
/// empty/default value (a strategy's first tick has no prior state).
pub struct StrategyStore {
    root: PathBuf,
}

impl StrategyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn strategy_dir(&self, strategy_id: &str) -> PathBuf {
        self.root.join(strategy_id)
    }

    pub fn load_strategies(&self) -> Result<Vec<Strategy>, PersistenceError> {
        let path = self.root.join("strategies.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: StrategiesFile =
            serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
                path: path.display().to_string(),
                source,
            })?;
        Ok(file.strategies)
    }

    pub fn save_strategies(&self, strategies: &[Strategy]) -> Result<(), PersistenceError> {
        let path = self.root.join("strategies.json");
        let file = StrategiesFile {
            strategies: strategies.to_vec(),
            last_update: Utc::now(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|source| PersistenceError::Serde {
                path: path.display().to_string(),
                source,
            })?;
        atomic_write(&path, &bytes)
    }

    pub fn load_state(&self, strategy_id: &str) -> Result<Option<State>, PersistenceError> {
        let path = self.strategy_dir(strategy_id).join("state.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let state: State =
            serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Some(state))
    }

    pub fn save_state(&self, state: &State) -> Result<(), PersistenceError> {
        let path = self.strategy_dir(&state.strategy_id).join("state.json");
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|source| PersistenceError::Serde {
                path: path.display().to_string(),
                source,
            })?;
        atomic_write(&path, &bytes)
    }

    /// Appends one row to `trades.csv`, writing the header first if the
    /// file doesn't yet exist. Trade rows are write-once (invariant 5); this
    /// is a plain append, not an atomic-rewrite, matching spec §9's note
    /// that "atomic row append via line-oriented writes is sufficient".
    pub fn append_trade(&self, trade: &Trade) -> Result<(), PersistenceError> {
        let dir = self.strategy_dir(&trade.strategy_id);
        fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join("trades.csv");
        let needs_header = !path.exists();

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer
                .write_record(TRADES_CSV_HEADER)
                .map_err(|source| PersistenceError::Csv {
                    path: path.display().to_string(),
                    source,
                })?;
        }

        writer
            .write_record(&[
                trade.timestamp.to_rfc3339(),
                trade.strategy_id.clone(),
                format!("{:?}", trade.side).to_lowercase(),
                trade.price.to_string(),
                trade.quantity.to_string(),
                trade.z.map(|z| z.to_string()).unwrap_or_default(),
                trade.notional.to_string(),
                trade.gf_before.map(|v| v.to_string()).unwrap_or_default(),
                trade.gf_after.map(|v| v.to_string()).unwrap_or_default(),
                trade
                    .commission
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                trade.order_id.clone(),
                trade
                    .limit_price
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                trade.cycle_info.clone().unwrap_or_default(),
            ])
            .map_err(|source| PersistenceError::Csv {
                path: path.display().to_string(),
                source,
            })?;
        writer.flush().map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Reads every row back out of `trades.csv` (spec §9: "implementers may
    /// layer a small in-memory index for range queries" — the Health
    /// Monitor's 24h scan just re-reads the file, which is sufficient at
    /// this engine's ~60s cadence and trade volume).
    pub fn read_trades(&self, strategy_id: &str) -> Result<Vec<Trade>, PersistenceError> {
        let path = self.strategy_dir(strategy_id).join("trades.csv");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|source| PersistenceError::Csv {
                path: path.display().to_string(),
                source,
            })?;

        let mut trades = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|source| PersistenceError::Csv {
                path: path.display().to_string(),
                source,
            })?;
            trades.push(parse_trade_row(&record, &path)?);
        }
        Ok(trades)
    }

    pub fn load_pending_orders(
        &self,
        strategy_id: &str,
    ) -> Result<HashMap<String, PendingOrder>, PersistenceError> {
        let path = self.strategy_dir(strategy_id).join("pending_orders.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let bytes = fs::read(&path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save_pending_orders(
        &self,
        strategy_id: &str,
        orders: &HashMap<String, PendingOrder>,
    ) -> Result<(), PersistenceError> {
        let path = self.strategy_dir(strategy_id).join("pending_orders.json");
        let bytes = serde_json::to_vec_pretty(orders).map_err(|source| PersistenceError::Serde {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write(&path, &bytes)
    }

    pub fn load_position_limits(&self) -> Result<PositionLimits, PersistenceError> {
        let path = self.root.join("position_limits.json");
        if !path.exists() {
            return Ok(PositionLimits::default());
        }
        let bytes = fs::read(&path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Serde {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save_position_limits(&self, limits: &PositionLimits) -> Result<(), PersistenceError> {
        let path = self.root.join("position_limits.json");
        let bytes = serde_json::to_vec_pretty(limits).map_err(|source| PersistenceError::Serde {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write(&path, &bytes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Parses one `trades.csv` row back into a `Trade`, in `TRADES_CSV_HEADER`
/// order.
fn parse_trade_row(record: &csv::StringRecord, path: &Path) -> Result<Trade, PersistenceError> {
    let field = |idx: usize| -> &str { record.get(idx).unwrap_or("") };
    let parse_err = |what: &str| PersistenceError::Csv {
        path: path.display().to_string(),
        source: csv::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("malformed trades.csv row: {what}"),
        )),
    };
    let parse_decimal = |s: &str| -> Option<Decimal> {
        if s.is_empty() {
            None
        } else {
            s.parse().ok()
        }
    };

    let timestamp = DateTime::parse_from_rfc3339(field(0))
        .map_err(|_| parse_err("timestamp"))?
        .with_timezone(&Utc);
    let side = match field(2) {
        "buy" => crate::domain::order::OrderSide::Buy,
        "sell" => crate::domain::order::OrderSide::Sell,
        _ => return Err(parse_err("side")),
    };
    let price = parse_decimal(field(3)).ok_or_else(|| parse_err("price"))?;
    let quantity = parse_decimal(field(4)).ok_or_else(|| parse_err("quantity"))?;
    let z = field(5).parse::<i64>().ok();
    let notional = parse_decimal(field(6)).unwrap_or(price * quantity);
    let gf_before = parse_decimal(field(7));
    let gf_after = parse_decimal(field(8));
    let commission = parse_decimal(field(9));
    let order_id = field(10).to_string();
    let limit_price = parse_decimal(field(11));
    let cycle_info = if field(12).is_empty() {
        None
    } else {
        Some(field(12).to_string())
    };

    Ok(Trade {
        timestamp,
        strategy_id: field(1).to_string(),
        side,
        price,
        quantity,
        notional,
        order_id,
        commission,
        limit_price,
        cycle_info,
        z,
        gf_before,
        gf_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderSide;
    use crate::domain::state::{GridState, PositionBook, StateVariant};
    use crate::domain::strategy::Symbol;
    use rust_decimal_macros::dec;

    fn store() -> (tempfile::TempDir, StrategyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StrategyStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn round_trips_state() {
        let (_dir, store) = store();
        let state = State::new(
            "s1",
            Symbol::BtcUsdt,
            StateVariant::GridOtt(GridState {
                position: PositionBook::flat(dec!(1000)),
                gf: Some(dec!(30000)),
            }),
        );
        store.save_state(&state).unwrap();
        let loaded = store.load_state("s1").unwrap().unwrap();
        assert_eq!(loaded.strategy_id, "s1");
        assert_eq!(
            loaded.variant.as_grid().unwrap().gf,
            Some(dec!(30000))
        );
    }

    #[test]
    fn missing_state_returns_none() {
        let (_dir, store) = store();
        assert!(store.load_state("nope").unwrap().is_none());
    }

    #[test]
    fn appends_trade_rows_with_single_header() {
        let (_dir, store) = store();
        let t1 = Trade::new("s1", OrderSide::Buy, dec!(100), dec!(1), "o1");
        let t2 = Trade::new("s1", OrderSide::Sell, dec!(110), dec!(1), "o2");
        store.append_trade(&t1).unwrap();
        store.append_trade(&t2).unwrap();
        let contents = fs::read_to_string(store.strategy_dir("s1").join("trades.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3); // header + 2 rows
        assert!(lines[0].starts_with("timestamp,"));
    }

    #[test]
    fn read_trades_round_trips_appended_rows() {
        let (_dir, store) = store();
        let mut t1 = Trade::new("s1", OrderSide::Buy, dec!(100), dec!(1), "o1");
        t1.z = Some(2);
        t1.gf_before = Some(dec!(30000));
        t1.gf_after = Some(dec!(29980));
        let t2 = Trade::new("s1", OrderSide::Sell, dec!(110), dec!(1), "o2");
        store.append_trade(&t1).unwrap();
        store.append_trade(&t2).unwrap();

        let loaded = store.read_trades("s1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].side, OrderSide::Buy);
        assert_eq!(loaded[0].price, dec!(100));
        assert_eq!(loaded[0].z, Some(2));
        assert_eq!(loaded[0].gf_after, Some(dec!(29980)));
        assert_eq!(loaded[1].side, OrderSide::Sell);
        assert_eq!(loaded[1].strategy_id, "s1");
    }

    #[test]
    fn read_trades_on_missing_file_is_empty() {
        let (_dir, store) = store();
        assert!(store.read_trades("nope").unwrap().is_empty());
    }

    #[test]
    fn position_limits_default_matches_spec() {
        let (_dir, store) = store();
        let limits = store.load_position_limits().unwrap();
        assert_eq!(limits.max_position_usd, dec!(2000));
        assert_eq!(limits.min_position_usd, dec!(-1200));
    }

    #[test]
    fn pending_orders_round_trip() {
        use crate::domain::order::{OrderType, PendingOrder};
        let (_dir, store) = store();
        let mut orders = HashMap::new();
        let order = PendingOrder::new_pending_submit(
            "s1",
            OrderSide::Buy,
            dec!(0.01),
            Some(dec!(30000)),
            OrderType::Limit,
            Some("G2".to_string()),
            None,
        );
        orders.insert(order.internal_id.clone(), order);
        store.save_pending_orders("s1", &orders).unwrap();
        let loaded = store.load_pending_orders("s1").unwrap();
        assert_eq!(loaded.len(), 1);
    }
}

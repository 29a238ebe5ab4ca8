use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::trading::position::Position;
use crate::trading::trade_record::{LogEntry, TradeRecord};

/// Shared record of trades, open positions and per-instrument log lines.
/// Every engine writes to the same ledger; each call is an independent write.
pub trait Ledger: Send + Sync {
    fn append_trade(&self, trade: &TradeRecord) -> Result<()>;
    fn upsert_position(&self, position: &Position) -> Result<()>;
    fn clear_position(&self, symbol: &str) -> Result<()>;
    fn append_log(&self, entry: &LogEntry) -> Result<()>;

    /// Newest first.
    fn trades(&self, symbol: Option<&str>) -> Result<Vec<TradeRecord>>;
    /// Sorted by symbol.
    fn positions(&self) -> Result<Vec<Position>>;
    /// Newest first, at most `limit` entries.
    fn logs(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<LogEntry>>;
}

fn matches_symbol(filter: Option<&str>, symbol: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => symbol == Some(f),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poison is ignored: every write is a single self-contained record.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct MemoryState {
    trades: Vec<TradeRecord>,
    positions: BTreeMap<String, Position>,
    logs: Vec<LogEntry>,
}

/// In-process ledger, mostly for dry runs and tests.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        lock(&self.state).trades.push(trade.clone());
        Ok(())
    }

    fn upsert_position(&self, position: &Position) -> Result<()> {
        lock(&self.state)
            .positions
            .insert(position.symbol().to_string(), position.clone());
        Ok(())
    }

    fn clear_position(&self, symbol: &str) -> Result<()> {
        lock(&self.state).positions.remove(symbol);
        Ok(())
    }

    fn append_log(&self, entry: &LogEntry) -> Result<()> {
        lock(&self.state).logs.push(entry.clone());
        Ok(())
    }

    fn trades(&self, symbol: Option<&str>) -> Result<Vec<TradeRecord>> {
        let state = lock(&self.state);
        Ok(state
            .trades
            .iter()
            .rev()
            .filter(|t| matches_symbol(symbol, Some(&t.symbol)))
            .cloned()
            .collect())
    }

    fn positions(&self) -> Result<Vec<Position>> {
        Ok(lock(&self.state).positions.values().cloned().collect())
    }

    fn logs(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        let state = lock(&self.state);
        Ok(state
            .logs
            .iter()
            .rev()
            .filter(|l| matches_symbol(symbol, l.symbol.as_deref()))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// File ledger: `trades.jsonl` and `logs.jsonl` are append-only JSON lines,
/// `positions.json` is rewritten as a whole snapshot on every change.
pub struct JsonlLedger {
    dir: PathBuf,
    positions: Mutex<BTreeMap<String, Position>>,
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    const TRADES: &'static str = "trades.jsonl";
    const LOGS: &'static str = "logs.jsonl";
    const POSITIONS: &'static str = "positions.json";

    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating ledger dir {}", dir.display()))?;

        let positions_path = dir.join(Self::POSITIONS);
        let positions = if positions_path.exists() {
            let content = fs::read_to_string(&positions_path)
                .with_context(|| format!("reading {}", positions_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", positions_path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            dir,
            positions: Mutex::new(positions),
            write_lock: Mutex::new(()),
        })
    }

    fn append_line<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)?;
        let _guard = lock(&self.write_lock);
        let path = self.dir.join(file);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    fn read_lines<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let _guard = lock(&self.write_lock);
        let reader = BufReader::new(File::open(&path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // Skip a torn last line rather than failing the whole read.
            if let Ok(v) = serde_json::from_str(&line) {
                out.push(v);
            }
        }
        Ok(out)
    }

    fn save_positions(&self, positions: &BTreeMap<String, Position>) -> Result<()> {
        let json = serde_json::to_string_pretty(positions)?;
        let _guard = lock(&self.write_lock);
        let path = self.dir.join(Self::POSITIONS);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl Ledger for JsonlLedger {
    fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.append_line(Self::TRADES, trade)
    }

    fn upsert_position(&self, position: &Position) -> Result<()> {
        let mut positions = lock(&self.positions);
        positions.insert(position.symbol().to_string(), position.clone());
        self.save_positions(&positions)
    }

    fn clear_position(&self, symbol: &str) -> Result<()> {
        let mut positions = lock(&self.positions);
        positions.remove(symbol);
        self.save_positions(&positions)
    }

    fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.append_line(Self::LOGS, entry)
    }

    fn trades(&self, symbol: Option<&str>) -> Result<Vec<TradeRecord>> {
        let mut trades: Vec<TradeRecord> = self.read_lines(Self::TRADES)?;
        trades.retain(|t| matches_symbol(symbol, Some(&t.symbol)));
        trades.reverse();
        Ok(trades)
    }

    fn positions(&self) -> Result<Vec<Position>> {
        Ok(lock(&self.positions).values().cloned().collect())
    }

    fn logs(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        let logs: Vec<LogEntry> = self.read_lines(Self::LOGS)?;
        Ok(logs
            .into_iter()
            .rev()
            .filter(|l| matches_symbol(symbol, l.symbol.as_deref()))
            .take(limit)
            .collect())
    }
}

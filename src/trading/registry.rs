use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{BotParams, StrategyConfig};
use crate::error::RegistryError;
use crate::exchange::ExchangeConnector;
use crate::trading::engine::{ExecutionEngine, StopSignal};
use crate::trading::ledger::Ledger;
use crate::trading::position::Position;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotStatus {
    pub symbol: String,
    pub running: bool,
    pub position: Position,
}

/// Control surface for one running engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BotHandle {
    symbol: String,
    stop: StopSignal,
    running: Arc<AtomicBool>,
    position: watch::Receiver<Position>,
}

impl BotHandle {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Requests a stop; the loop exits before its next tick.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// False once the engine's task has returned, for any reason.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> BotStatus {
        BotStatus {
            symbol: self.symbol.clone(),
            running: self.is_running(),
            position: self.position.borrow().clone(),
        }
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct BotEntry {
    handle: BotHandle,
    task: Option<JoinHandle<()>>,
}

/// Keyed collection of engines, one per symbol. Must be used from inside a
/// tokio runtime.
pub struct BotRegistry {
    connector: Arc<dyn ExchangeConnector>,
    ledger: Arc<dyn Ledger>,
    strategy: StrategyConfig,
    bots: Mutex<HashMap<String, BotEntry>>,
}

impl BotRegistry {
    pub fn new(
        connector: Arc<dyn ExchangeConnector>,
        ledger: Arc<dyn Ledger>,
        strategy: StrategyConfig,
    ) -> Self {
        Self {
            connector,
            ledger,
            strategy,
            bots: Mutex::new(HashMap::new()),
        }
    }

    fn bots(&self) -> MutexGuard<'_, HashMap<String, BotEntry>> {
        self.bots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Spawns an engine for `params.symbol`. A finished engine for the same
    /// symbol is replaced; a live one is an error.
    pub fn start(&self, mut params: BotParams) -> Result<BotHandle, RegistryError> {
        params.symbol = params.symbol.trim().to_uppercase();
        params.validate()?;
        self.strategy.validate()?;

        let mut bots = self.bots();
        if bots
            .get(&params.symbol)
            .is_some_and(|entry| entry.handle.is_running())
        {
            return Err(RegistryError::AlreadyRunning(params.symbol));
        }

        let symbol = params.symbol.clone();
        let market = self.connector.connect(&params);
        let engine =
            ExecutionEngine::new(params, &self.strategy, market, Arc::clone(&self.ledger));

        let handle = BotHandle {
            symbol: symbol.clone(),
            stop: engine.stop_signal(),
            running: Arc::new(AtomicBool::new(true)),
            position: engine.subscribe(),
        };

        let guard = RunningGuard(Arc::clone(&handle.running));
        let task_symbol = symbol.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = engine.run().await {
                warn!(symbol = %task_symbol, "engine exited: {}", e);
            }
        });

        info!(symbol = %symbol, "bot started");
        bots.insert(
            symbol,
            BotEntry {
                handle: handle.clone(),
                task: Some(task),
            },
        );
        Ok(handle)
    }

    /// Returns false when no engine is registered for `symbol`.
    pub fn stop(&self, symbol: &str) -> bool {
        match self.bots().get(&symbol.to_uppercase()) {
            Some(entry) => {
                entry.handle.stop();
                info!(symbol = %entry.handle.symbol(), "stop requested");
                true
            }
            None => false,
        }
    }

    pub fn status(&self, symbol: &str) -> Option<BotStatus> {
        self.bots()
            .get(&symbol.to_uppercase())
            .map(|entry| entry.handle.status())
    }

    /// All registered engines, sorted by symbol.
    pub fn list(&self) -> Vec<BotStatus> {
        let mut out: Vec<BotStatus> = self.bots().values().map(|e| e.handle.status()).collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    /// Stops every engine and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut bots = self.bots();
            bots.values_mut()
                .filter_map(|entry| {
                    entry.handle.stop();
                    entry.task.take()
                })
                .collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!("engine task failed to join: {}", e);
            }
        }
    }
}

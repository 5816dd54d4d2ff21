//! Wiring for a complete chiphouse instance
//!
//! Centralizes the setup shared by the CLI, the tools and the integration
//! tests: one ledger, one rate limiter, one alert log, and the settlement
//! coordinator and reconciler built on top of them.

use std::sync::Arc;
use tracing::info;

use crate::audit::AlertLog;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::errors::ChipResult;
use crate::games::{GameEngine, StandardGameEngine};
use crate::ledger::Ledger;
use crate::rate_limiter::{InMemoryRateLimiter, RateLimiter};
use crate::reconciler::Reconciler;
use crate::settlement::Settlement;

/// Everything a front end needs
pub struct ChipHouse {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub ledger: Arc<Ledger>,
    pub alerts: Arc<AlertLog>,
    pub settlement: Settlement,
    pub reconciler: Reconciler,
}

pub struct ChipHouseFactory {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    engine: Option<Arc<dyn GameEngine>>,
}

impl ChipHouseFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            engine: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the entropy-seeded game engine
    pub fn with_engine(mut self, engine: Arc<dyn GameEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> ChipResult<ChipHouse> {
        self.config.validate()?;

        let ledger = Arc::new(Ledger::open(&self.config, self.clock.clone())?);
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(InMemoryRateLimiter::new(&self.config.rate_limit, self.clock.clone()));
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(StandardGameEngine::from_entropy()));
        let alerts = Arc::new(AlertLog::new());

        let settlement =
            Settlement::new(ledger.clone(), limiter, engine, &self.config).with_alerts(alerts.clone());
        let reconciler = Reconciler::new(ledger.clone(), &self.config);

        info!(
            backend = ?self.config.storage.backend,
            min_bet = self.config.betting.min_bet,
            max_bet = self.config.betting.max_bet,
            "Chiphouse ready"
        );

        Ok(ChipHouse {
            config: self.config,
            clock: self.clock,
            ledger,
            alerts,
            settlement,
            reconciler,
        })
    }
}

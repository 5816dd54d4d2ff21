//! Game outcome engine: turns a stake and a request into a [`Resolution`]

use std::sync::Mutex;

use crate::games::random::{RandomSource, RngSource, ScriptedSource};
use crate::games::types::{GameRequest, Resolution};
use crate::games::{blackjack, coinflip, dice, roulette, slots};
use crate::ledger::types::Chips;

pub trait GameEngine: Send + Sync {
    /// Most the player can win on this wager
    fn max_payout(&self, stake: Chips, request: &GameRequest) -> Chips {
        request.max_multiplier().apply(stake)
    }

    /// Draw the outcome of one round
    fn resolve(&self, stake: Chips, request: &GameRequest) -> Resolution;
}

/// Engine over a shared random source
pub struct StandardGameEngine {
    rng: Mutex<Box<dyn RandomSource>>,
}

impl StandardGameEngine {
    pub fn new<R: RandomSource + 'static>(source: R) -> Self {
        Self {
            rng: Mutex::new(Box::new(source)),
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(RngSource::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(RngSource::seeded(seed))
    }

    pub fn scripted<I: IntoIterator<Item = u32>>(draws: I) -> Self {
        Self::new(ScriptedSource::new(draws))
    }
}

/// Play one round against `rng`
pub fn play(request: &GameRequest, rng: &mut dyn RandomSource) -> Resolution {
    match *request {
        GameRequest::CoinFlip { choice } => coinflip::play(choice, rng),
        GameRequest::Dice => dice::play(rng),
        GameRequest::Slots => slots::play(rng),
        GameRequest::Roulette { bet } => roulette::play(bet, rng),
        GameRequest::Blackjack => blackjack::play(rng),
    }
}

impl GameEngine for StandardGameEngine {
    fn resolve(&self, _stake: Chips, request: &GameRequest) -> Resolution {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        play(request, rng.as_mut())
    }
}

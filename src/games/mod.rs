//! Game outcome engine.
//!
//! Every game is a pure function of its request and a [`RandomSource`];
//! nothing here touches balances.

pub mod blackjack;
pub mod coinflip;
pub mod dice;
pub mod engine;
pub mod random;
pub mod roulette;
pub mod slots;
pub mod types;

pub use engine::{GameEngine, StandardGameEngine};
pub use random::{RandomSource, RngSource, ScriptedSource};
pub use types::*;

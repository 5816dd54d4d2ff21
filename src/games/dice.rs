//! Single six-sided die; 4 and up wins even money

use crate::games::random::RandomSource;
use crate::games::types::{GameDetail, Multiplier, Resolution};

pub const WINNING_ROLL: u8 = 4;

pub fn play(rng: &mut dyn RandomSource) -> Resolution {
    let roll = rng.draw_below(6) as u8 + 1;
    let detail = GameDetail::Dice { roll };
    if roll >= WINNING_ROLL {
        Resolution::win(Multiplier::EVEN, detail)
    } else {
        Resolution::loss(detail)
    }
}

//! Even-money coin flip

use crate::games::random::RandomSource;
use crate::games::types::{CoinSide, GameDetail, Multiplier, Resolution};

/// Draw 0 lands heads, 1 lands tails
pub fn play(choice: CoinSide, rng: &mut dyn RandomSource) -> Resolution {
    let landed = match rng.draw_below(2) {
        0 => CoinSide::Heads,
        _ => CoinSide::Tails,
    };
    let detail = GameDetail::CoinFlip { choice, landed };
    if landed == choice {
        Resolution::win(Multiplier::EVEN, detail)
    } else {
        Resolution::loss(detail)
    }
}

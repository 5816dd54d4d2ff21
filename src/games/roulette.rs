//! Single-zero roulette with colour and straight-up bets

use crate::games::random::RandomSource;
use crate::games::types::{GameDetail, Multiplier, Resolution, RouletteBet, RouletteColor};

/// Red numbers on the wheel; every other non-zero number is black.
const RED_NUMBERS: [u8; 18] = [1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36];

pub const COLOR_PAYOUT: Multiplier = Multiplier::whole(2);
pub const NUMBER_PAYOUT: Multiplier = Multiplier::whole(35);

pub fn color_of(number: u8) -> RouletteColor {
    if number == 0 {
        RouletteColor::Green
    } else if RED_NUMBERS.contains(&number) {
        RouletteColor::Red
    } else {
        RouletteColor::Black
    }
}

pub fn play(bet: RouletteBet, rng: &mut dyn RandomSource) -> Resolution {
    let number = rng.draw_below(37) as u8;
    let color = color_of(number);
    let detail = GameDetail::Roulette { bet, number, color };

    match bet {
        RouletteBet::Color(chosen) if chosen == color => Resolution::win(COLOR_PAYOUT, detail),
        RouletteBet::Number(chosen) if chosen == number => Resolution::win(NUMBER_PAYOUT, detail),
        _ => Resolution::loss(detail),
    }
}

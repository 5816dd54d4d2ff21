//! Three reels over six symbols; three of a kind pays 5x

use crate::games::random::RandomSource;
use crate::games::types::{GameDetail, Multiplier, Resolution, SlotSymbol};

pub const JACKPOT: Multiplier = Multiplier::whole(5);

fn spin(rng: &mut dyn RandomSource) -> SlotSymbol {
    let idx = rng.draw_below(SlotSymbol::ALL.len() as u32) as usize;
    SlotSymbol::ALL.get(idx).copied().unwrap_or(SlotSymbol::ALL[0])
}

pub fn play(rng: &mut dyn RandomSource) -> Resolution {
    let reels = [spin(rng), spin(rng), spin(rng)];
    let detail = GameDetail::Slots { reels };
    if reels[0] == reels[1] && reels[1] == reels[2] {
        Resolution::win(JACKPOT, detail)
    } else {
        Resolution::loss(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::random::{FixedSource, ScriptedSource};
    use crate::games::types::Outcome;

    #[test]
    fn test_three_of_a_kind_pays_five() {
        let mut rng = ScriptedSource::new([4, 4, 4]);
        let resolution = play(&mut rng);
        assert_eq!(resolution.outcome, Outcome::Win);
        assert_eq!(resolution.user_delta(20), 100);
        assert_eq!(resolution.detail, GameDetail::Slots { reels: [SlotSymbol::Diamond; 3] });
    }

    #[test]
    fn test_two_of_a_kind_loses() {
        let mut rng = ScriptedSource::new([5, 5, 0]);
        assert_eq!(play(&mut rng).user_delta(20), -20);
    }

    #[test]
    fn test_out_of_range_source_still_lands_on_a_symbol() {
        let mut rng = FixedSource(u32::MAX);
        let resolution = play(&mut rng);
        let symbol = SlotSymbol::ALL[(u32::MAX % SlotSymbol::ALL.len() as u32) as usize];
        assert_eq!(resolution.detail, GameDetail::Slots { reels: [symbol; 3] });
        assert_eq!(resolution.outcome, Outcome::Win);
    }
}

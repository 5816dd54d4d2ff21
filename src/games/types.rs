use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;
use crate::games::blackjack::Card;
use crate::ledger::types::Chips;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    CoinFlip,
    Dice,
    Slots,
    Roulette,
    Blackjack,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::CoinFlip => write!(f, "coinflip"),
            GameKind::Dice => write!(f, "dice"),
            GameKind::Slots => write!(f, "slots"),
            GameKind::Roulette => write!(f, "roulette"),
            GameKind::Blackjack => write!(f, "blackjack"),
        }
    }
}

/// Coin flip side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

impl FromStr for CoinSide {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h" | "heads" => Ok(CoinSide::Heads),
            "t" | "tails" => Ok(CoinSide::Tails),
            other => Err(EngineError::InvalidChoice(format!(
                "'{}' is not a coin side, use heads/tails or h/t",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouletteColor {
    Red,
    Black,
    Green,
}

impl fmt::Display for RouletteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouletteColor::Red => write!(f, "red"),
            RouletteColor::Black => write!(f, "black"),
            RouletteColor::Green => write!(f, "green"),
        }
    }
}

/// What a roulette wager is placed on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouletteBet {
    Color(RouletteColor),
    Number(u8),
}

impl fmt::Display for RouletteBet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouletteBet::Color(color) => write!(f, "{}", color),
            RouletteBet::Number(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for RouletteBet {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let choice = s.to_ascii_lowercase();
        match choice.as_str() {
            "red" => return Ok(RouletteBet::Color(RouletteColor::Red)),
            "black" => return Ok(RouletteBet::Color(RouletteColor::Black)),
            _ => {}
        }
        match choice.parse::<u8>() {
            Ok(n) if n <= 36 => Ok(RouletteBet::Number(n)),
            _ => Err(EngineError::InvalidChoice(format!(
                "'{}' is not a roulette bet, use red, black or a number 0-36",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotSymbol {
    Cherry,
    Lemon,
    Orange,
    Grape,
    Diamond,
    Seven,
}

impl SlotSymbol {
    pub const ALL: [SlotSymbol; 6] = [
        SlotSymbol::Cherry,
        SlotSymbol::Lemon,
        SlotSymbol::Orange,
        SlotSymbol::Grape,
        SlotSymbol::Diamond,
        SlotSymbol::Seven,
    ];
}

impl fmt::Display for SlotSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotSymbol::Cherry => "🍒",
            SlotSymbol::Lemon => "🍋",
            SlotSymbol::Orange => "🍊",
            SlotSymbol::Grape => "🍇",
            SlotSymbol::Diamond => "💎",
            SlotSymbol::Seven => "7️⃣",
        };
        f.write_str(s)
    }
}

/// A wager's game and the player's choice, already parsed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum GameRequest {
    #[serde(rename = "coinflip")]
    CoinFlip { choice: CoinSide },
    Dice,
    Slots,
    Roulette { bet: RouletteBet },
    Blackjack,
}

impl GameRequest {
    pub fn kind(&self) -> GameKind {
        match self {
            GameRequest::CoinFlip { .. } => GameKind::CoinFlip,
            GameRequest::Dice => GameKind::Dice,
            GameRequest::Slots => GameKind::Slots,
            GameRequest::Roulette { .. } => GameKind::Roulette,
            GameRequest::Blackjack => GameKind::Blackjack,
        }
    }

    /// Largest multiplier this wager can be paid at
    pub fn max_multiplier(&self) -> Multiplier {
        match self {
            GameRequest::CoinFlip { .. } | GameRequest::Dice => Multiplier::EVEN,
            GameRequest::Slots => crate::games::slots::JACKPOT,
            GameRequest::Roulette { bet: RouletteBet::Color(_) } => crate::games::roulette::COLOR_PAYOUT,
            GameRequest::Roulette { bet: RouletteBet::Number(_) } => crate::games::roulette::NUMBER_PAYOUT,
            GameRequest::Blackjack => crate::games::blackjack::NATURAL_PAYOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Push,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "win"),
            Outcome::Loss => write!(f, "loss"),
            Outcome::Push => write!(f, "push"),
        }
    }
}

/// Net payout ratio applied to the stake on a win
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Multiplier {
    pub numerator: i64,
    pub denominator: i64,
}

impl Multiplier {
    pub const ZERO: Multiplier = Multiplier::whole(0);
    pub const EVEN: Multiplier = Multiplier::whole(1);

    pub const fn new(numerator: i64, denominator: i64) -> Self {
        Self { numerator, denominator }
    }

    pub const fn whole(n: i64) -> Self {
        Self::new(n, 1)
    }

    /// `stake * ratio`, rounded down
    pub fn apply(&self, stake: Chips) -> Chips {
        if self.denominator == 0 {
            return 0;
        }
        let scaled = stake as i128 * self.numerator as i128;
        scaled.div_euclid(self.denominator as i128) as Chips
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}x", self.numerator)
        } else {
            write!(f, "{}/{}x", self.numerator, self.denominator)
        }
    }
}

/// What was drawn, per game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum GameDetail {
    #[serde(rename = "coinflip")]
    CoinFlip { choice: CoinSide, landed: CoinSide },
    Dice { roll: u8 },
    Slots { reels: [SlotSymbol; 3] },
    Roulette {
        bet: RouletteBet,
        number: u8,
        color: RouletteColor,
    },
    Blackjack {
        player: Vec<Card>,
        dealer: Vec<Card>,
        player_total: u8,
        dealer_total: u8,
        natural: bool,
    },
}

/// Outcome of one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Ratio paid on a win; zero otherwise
    pub multiplier: Multiplier,
    pub detail: GameDetail,
}

impl Resolution {
    pub fn win(multiplier: Multiplier, detail: GameDetail) -> Self {
        Self { outcome: Outcome::Win, multiplier, detail }
    }

    pub fn loss(detail: GameDetail) -> Self {
        Self { outcome: Outcome::Loss, multiplier: Multiplier::ZERO, detail }
    }

    pub fn push(detail: GameDetail) -> Self {
        Self { outcome: Outcome::Push, multiplier: Multiplier::ZERO, detail }
    }

    /// Signed change of the player's balance for `stake`
    pub fn user_delta(&self, stake: Chips) -> Chips {
        match self.outcome {
            Outcome::Win => self.multiplier.apply(stake),
            Outcome::Loss => -stake,
            Outcome::Push => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_parsing() {
        assert_eq!("H".parse::<CoinSide>().unwrap(), CoinSide::Heads);
        assert_eq!("tails".parse::<CoinSide>().unwrap(), CoinSide::Tails);
        assert!("edge".parse::<CoinSide>().is_err());

        assert_eq!("Red".parse::<RouletteBet>().unwrap(), RouletteBet::Color(RouletteColor::Red));
        assert_eq!("17".parse::<RouletteBet>().unwrap(), RouletteBet::Number(17));
        assert_eq!("0".parse::<RouletteBet>().unwrap(), RouletteBet::Number(0));
        assert!("37".parse::<RouletteBet>().is_err());
        assert!("green".parse::<RouletteBet>().is_err());
    }

    #[test]
    fn test_multiplier_floors() {
        assert_eq!(Multiplier::new(3, 2).apply(100), 150);
        assert_eq!(Multiplier::new(3, 2).apply(5), 7);
        assert_eq!(Multiplier::whole(35).apply(10), 350);
        assert_eq!(Multiplier::new(3, 2).to_string(), "3/2x");
    }

    #[test]
    fn test_max_multiplier_per_request() {
        let number = GameRequest::Roulette { bet: RouletteBet::Number(17) };
        assert_eq!(number.max_multiplier().apply(10), 350);
        assert_eq!(GameRequest::Slots.max_multiplier().apply(10), 50);
        assert_eq!(GameRequest::Blackjack.max_multiplier().apply(10), 15);
        assert_eq!(GameRequest::Dice.kind().to_string(), "dice");
    }

    #[test]
    fn test_user_delta_by_outcome() {
        let detail = GameDetail::Dice { roll: 5 };
        assert_eq!(Resolution::win(Multiplier::EVEN, detail.clone()).user_delta(40), 40);
        assert_eq!(Resolution::loss(detail.clone()).user_delta(40), -40);
        assert_eq!(Resolution::push(detail).user_delta(40), 0);
    }
}

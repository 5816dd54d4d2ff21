//! Single-round blackjack against a fixed-strategy dealer.
//!
//! Cards come off a fresh 52-card shoe: each draw removes the card at
//! `draw_below(cards_left)` from the shoe in its current order. Deal order is
//! player, dealer, player, dealer. A natural settles the round at once.
//! Otherwise the player draws to 17, then the dealer draws to 17 and stands
//! on any 17, soft ones included.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::games::random::RandomSource;
use crate::games::types::{GameDetail, Multiplier, Resolution};

/// A natural pays 3:2
pub const NATURAL_PAYOUT: Multiplier = Multiplier::new(3, 2);

const STAND_ON: u8 = 17;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];

    fn symbol(&self) -> char {
        match self {
            Suit::Clubs => '♣',
            Suit::Diamonds => '♦',
            Suit::Hearts => '♥',
            Suit::Spades => '♠',
        }
    }
}

/// Rank 1 is the ace, 11-13 are the face cards
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Card {
    pub rank: u8,
    pub suit: Suit,
}

impl Card {
    pub const fn new(rank: u8, suit: Suit) -> Self {
        Self { rank, suit }
    }

    pub fn is_ace(&self) -> bool {
        self.rank == 1
    }

    /// Face cards count 10, the ace counts 1 here
    fn hard_value(&self) -> u8 {
        self.rank.min(10)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            1 => write!(f, "A{}", self.suit.symbol()),
            11 => write!(f, "J{}", self.suit.symbol()),
            12 => write!(f, "Q{}", self.suit.symbol()),
            13 => write!(f, "K{}", self.suit.symbol()),
            n => write!(f, "{}{}", n, self.suit.symbol()),
        }
    }
}

/// Undealt cards, suit by suit, ace to king
#[derive(Debug, Clone)]
pub struct Shoe {
    cards: Vec<Card>,
}

impl Default for Shoe {
    fn default() -> Self {
        Self::new()
    }
}

impl Shoe {
    pub fn new() -> Self {
        let cards = Suit::ALL
            .iter()
            .flat_map(|&suit| (1..=13).map(move |rank| Card::new(rank, suit)))
            .collect();
        Self { cards }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn draw(&mut self, rng: &mut dyn RandomSource) -> Card {
        if self.cards.is_empty() {
            *self = Shoe::new();
        }
        let idx = rng.draw_below(self.cards.len() as u32) as usize;
        self.cards.remove(idx.min(self.cards.len() - 1))
    }

    fn position(&self, card: &Card) -> Option<usize> {
        self.cards.iter().position(|c| c == card)
    }
}

/// Best total of a hand and whether an ace still counts 11
pub fn hand_value(cards: &[Card]) -> (u8, bool) {
    let mut value: u16 = 0;
    let mut aces: u8 = 0;

    for card in cards {
        if card.is_ace() {
            aces += 1;
            value += 11;
        } else {
            value += card.hard_value() as u16;
        }
    }

    while value > 21 && aces > 0 {
        value -= 10;
        aces -= 1;
    }

    let is_soft = aces > 0 && value <= 21;
    (value.min(255) as u8, is_soft)
}

/// 21 with the first two cards
pub fn is_natural(cards: &[Card]) -> bool {
    cards.len() == 2 && hand_value(cards).0 == 21
}

fn total(cards: &[Card]) -> u8 {
    hand_value(cards).0
}

pub fn play(rng: &mut dyn RandomSource) -> Resolution {
    let mut shoe = Shoe::new();
    let mut player = Vec::with_capacity(6);
    let mut dealer = Vec::with_capacity(6);

    player.push(shoe.draw(rng));
    dealer.push(shoe.draw(rng));
    player.push(shoe.draw(rng));
    dealer.push(shoe.draw(rng));

    let player_natural = is_natural(&player);
    let dealer_natural = is_natural(&dealer);
    if player_natural || dealer_natural {
        let detail = detail(player, dealer, player_natural);
        return match (player_natural, dealer_natural) {
            (true, true) => Resolution::push(detail),
            (true, false) => Resolution::win(NATURAL_PAYOUT, detail),
            _ => Resolution::loss(detail),
        };
    }

    while total(&player) < STAND_ON {
        player.push(shoe.draw(rng));
    }
    if total(&player) > 21 {
        return Resolution::loss(detail(player, dealer, false));
    }

    while total(&dealer) < STAND_ON {
        dealer.push(shoe.draw(rng));
    }

    let (p, d) = (total(&player), total(&dealer));
    let detail = detail(player, dealer, false);
    if d > 21 || p > d {
        Resolution::win(Multiplier::EVEN, detail)
    } else if p < d {
        Resolution::loss(detail)
    } else {
        Resolution::push(detail)
    }
}

fn detail(player: Vec<Card>, dealer: Vec<Card>, natural: bool) -> GameDetail {
    GameDetail::Blackjack {
        player_total: total(&player),
        dealer_total: total(&dealer),
        player,
        dealer,
        natural,
    }
}

/// Draws that make [`play`] deal `cards` in order from a fresh shoe.
///
/// `None` if a card repeats.
pub fn deal_script(cards: &[Card]) -> Option<Vec<u32>> {
    let mut shoe = Shoe::new();
    let mut draws = Vec::with_capacity(cards.len());
    for card in cards {
        let idx = shoe.position(card)?;
        shoe.cards.remove(idx);
        draws.push(idx as u32);
    }
    Some(draws)
}

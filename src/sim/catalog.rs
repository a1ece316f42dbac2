//! Static content for the headless simulation: decks, challenges, centers
//! (jokers, consumables, vouchers) and poker hand scoring.

use super::{Card, CardSet, PlayingCard};

/// Starting deck and its modifiers.
#[derive(Debug, Clone, Copy)]
pub struct DeckDef {
    /// Deck name as sent by controllers.
    pub name: &'static str,
    /// Extra hands per round.
    pub hands: i32,
    /// Extra discards per round.
    pub discards: i32,
    /// Extra starting dollars.
    pub dollars: i64,
    /// Extra joker slots.
    pub joker_slots: i32,
}

const fn deck(name: &'static str, hands: i32, discards: i32, dollars: i64, joker_slots: i32) -> DeckDef {
    DeckDef { name, hands, discards, dollars, joker_slots }
}

/// Every known deck.
pub const DECKS: &[DeckDef] = &[
    deck("Red Deck", 0, 1, 0, 0),
    deck("Blue Deck", 1, 0, 0, 0),
    deck("Yellow Deck", 0, 0, 10, 0),
    deck("Green Deck", 0, 0, 0, 0),
    deck("Black Deck", -1, 0, 0, 1),
    deck("Magic Deck", 0, 0, 0, 0),
    deck("Nebula Deck", 0, 0, 0, 0),
    deck("Ghost Deck", 0, 0, 0, 0),
    deck("Abandoned Deck", 0, 0, 0, 0),
    deck("Checkered Deck", 0, 0, 0, 0),
    deck("Zodiac Deck", 0, 0, 0, 0),
    deck("Painted Deck", 0, 0, 0, 0),
    deck("Anaglyph Deck", 0, 0, 0, 0),
    deck("Plasma Deck", 0, 0, 0, 0),
    deck("Erratic Deck", 0, 0, 0, 0),
];

/// Look up a deck by name.
pub fn deck_by_name(name: &str) -> Option<&'static DeckDef> {
    DECKS.iter().find(|d| d.name == name)
}

/// Challenge run rules.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeDef {
    /// Challenge name.
    pub name: &'static str,
    /// Jokers owned at the start.
    pub jokers: &'static [&'static str],
    /// Starting dollars override.
    pub dollars: Option<i64>,
    /// Whether the shop may offer jokers.
    pub shop_jokers: bool,
}

/// Every known challenge.
pub const CHALLENGES: &[ChallengeDef] = &[
    ChallengeDef {
        name: "The Omelette",
        jokers: &["j_egg", "j_egg", "j_egg", "j_egg", "j_egg"],
        dollars: None,
        shop_jokers: false,
    },
    ChallengeDef {
        name: "Rich get Richer",
        jokers: &[],
        dollars: Some(100),
        shop_jokers: true,
    },
];

/// Look up a challenge by name.
pub fn challenge_by_name(name: &str) -> Option<&'static ChallengeDef> {
    CHALLENGES.iter().find(|c| c.name == name)
}

/// What a consumable or voucher does when used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Use {
    /// No use (jokers).
    None,
    /// Level up a poker hand.
    LevelUp(HandKind),
    /// Raise the rank of each target by one.
    Strength,
    /// Destroy each target.
    HangedMan,
    /// Double money, up to $20 gained.
    Hermit,
    /// Extra hand per round.
    ExtraHand,
    /// Extra discard per round.
    ExtraDiscard,
    /// Extra joker slot.
    ExtraJokerSlot,
    /// Extra consumable slot.
    ExtraConsumableSlot,
}

/// A purchasable center.
#[derive(Debug, Clone, Copy)]
pub struct CenterDef {
    /// Center key.
    pub key: &'static str,
    /// Display label.
    pub label: &'static str,
    /// Category.
    pub set: CardSet,
    /// Price.
    pub cost: u32,
    /// Hand cards targeted when used.
    pub max_targets: u8,
    /// Effect when used or redeemed.
    pub effect: Use,
}

const fn center(key: &'static str, label: &'static str, set: CardSet, cost: u32, max_targets: u8, effect: Use) -> CenterDef {
    CenterDef { key, label, set, cost, max_targets, effect }
}

/// Every known center.
pub const CENTERS: &[CenterDef] = &[
    center("j_joker", "Joker", CardSet::Joker, 2, 0, Use::None),
    center("j_greedy_joker", "Greedy Joker", CardSet::Joker, 5, 0, Use::None),
    center("j_banner", "Banner", CardSet::Joker, 5, 0, Use::None),
    center("j_egg", "Egg", CardSet::Joker, 4, 0, Use::None),
    center("c_pluto", "Pluto", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::HighCard)),
    center("c_mercury", "Mercury", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::Pair)),
    center("c_uranus", "Uranus", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::TwoPair)),
    center("c_venus", "Venus", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::ThreeOfAKind)),
    center("c_saturn", "Saturn", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::Straight)),
    center("c_jupiter", "Jupiter", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::Flush)),
    center("c_earth", "Earth", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::FullHouse)),
    center("c_mars", "Mars", CardSet::Planet, 3, 0, Use::LevelUp(HandKind::FourOfAKind)),
    center("c_strength", "Strength", CardSet::Tarot, 3, 2, Use::Strength),
    center("c_hanged_man", "The Hanged Man", CardSet::Tarot, 3, 2, Use::HangedMan),
    center("c_hermit", "The Hermit", CardSet::Tarot, 3, 0, Use::Hermit),
    center("v_grabber", "Grabber", CardSet::Voucher, 10, 0, Use::ExtraHand),
    center("v_wasteful", "Wasteful", CardSet::Voucher, 10, 0, Use::ExtraDiscard),
    center("v_antimatter", "Antimatter", CardSet::Voucher, 10, 0, Use::ExtraJokerSlot),
    center("v_crystal_ball", "Crystal Ball", CardSet::Voucher, 10, 0, Use::ExtraConsumableSlot),
];

/// Look up a center by key.
pub fn center_by_key(key: &str) -> Option<&'static CenterDef> {
    CENTERS.iter().find(|c| c.key == key)
}

/// Build a card from a center definition.
pub fn center_card(def: &CenterDef, sort_id: u64) -> Card {
    Card {
        sort_id,
        key: def.key.to_string(),
        label: def.label.to_string(),
        set: def.set,
        cost: def.cost,
        sell_cost: (def.cost / 2).max(1),
        debuff: false,
        face_down: false,
        playing: None,
        max_targets: def.max_targets,
    }
}

/// Build a playing card.
pub fn playing_card(card: PlayingCard, sort_id: u64) -> Card {
    Card {
        sort_id,
        key: card.key(),
        label: "Base Card".to_string(),
        set: CardSet::Default,
        cost: 1,
        sell_cost: 1,
        debuff: false,
        face_down: false,
        playing: Some(card),
        max_targets: 0,
    }
}

/// Poker hand categories, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandKind {
    /// No combination.
    HighCard,
    /// Two of a rank.
    Pair,
    /// Two pairs.
    TwoPair,
    /// Three of a rank.
    ThreeOfAKind,
    /// Five consecutive ranks.
    Straight,
    /// Five of a suit.
    Flush,
    /// Three plus two.
    FullHouse,
    /// Four of a rank.
    FourOfAKind,
    /// Straight and flush.
    StraightFlush,
}

impl HandKind {
    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            HandKind::HighCard => "High Card",
            HandKind::Pair => "Pair",
            HandKind::TwoPair => "Two Pair",
            HandKind::ThreeOfAKind => "Three of a Kind",
            HandKind::Straight => "Straight",
            HandKind::Flush => "Flush",
            HandKind::FullHouse => "Full House",
            HandKind::FourOfAKind => "Four of a Kind",
            HandKind::StraightFlush => "Straight Flush",
        }
    }

    /// Level 1 chips and mult.
    pub const fn base(self) -> (u64, u64) {
        match self {
            HandKind::HighCard => (5, 1),
            HandKind::Pair => (10, 2),
            HandKind::TwoPair => (20, 2),
            HandKind::ThreeOfAKind => (30, 3),
            HandKind::Straight => (30, 4),
            HandKind::Flush => (35, 4),
            HandKind::FullHouse => (40, 4),
            HandKind::FourOfAKind => (60, 7),
            HandKind::StraightFlush => (100, 8),
        }
    }

    /// Classify up to five played cards.
    pub fn classify(cards: &[PlayingCard]) -> HandKind {
        let mut counts = [0u8; 15];
        for card in cards {
            counts[usize::from(card.rank.min(14))] += 1;
        }
        let mut groups: Vec<u8> = counts.iter().copied().filter(|&n| n > 0).collect();
        groups.sort_unstable_by(|a, b| b.cmp(a));

        let five = cards.len() == 5;
        let flush = five && cards.iter().all(|c| c.suit == cards[0].suit);
        let straight = five && groups.len() == 5 && {
            let mut ranks: Vec<u8> = cards.iter().map(|c| c.rank).collect();
            ranks.sort_unstable();
            ranks[4] - ranks[0] == 4 || ranks == [2, 3, 4, 5, 14]
        };

        match (straight, flush, groups.as_slice()) {
            (true, true, _) => HandKind::StraightFlush,
            (_, _, [4, ..]) => HandKind::FourOfAKind,
            (_, _, [3, 2]) => HandKind::FullHouse,
            (_, true, _) => HandKind::Flush,
            (true, _, _) => HandKind::Straight,
            (_, _, [3, ..]) => HandKind::ThreeOfAKind,
            (_, _, [2, 2, ..]) => HandKind::TwoPair,
            (_, _, [2, ..]) => HandKind::Pair,
            _ => HandKind::HighCard,
        }
    }
}

/// Chips needed to beat a blind at an ante, scaled by blind (1x, 1.5x, 2x).
pub fn blind_target(ante: u32, blind: super::Blind) -> u64 {
    const BASE: [u64; 8] = [300, 800, 2_000, 5_000, 11_000, 20_000, 35_000, 50_000];
    let index = (ante.max(1) as usize - 1).min(BASE.len() - 1);
    let base = BASE[index];
    match blind {
        super::Blind::Small => base,
        super::Blind::Big => base * 3 / 2,
        super::Blind::Boss => base * 2,
    }
}

/// Dollars paid for beating a blind.
pub const fn blind_reward(blind: super::Blind) -> i64 {
    match blind {
        super::Blind::Small => 3,
        super::Blind::Big => 4,
        super::Blind::Boss => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Suit;

    fn cards(spec: &[(u8, Suit)]) -> Vec<PlayingCard> {
        spec.iter().map(|&(rank, suit)| PlayingCard { rank, suit }).collect()
    }

    #[test]
    fn test_classify_hands() {
        use Suit::*;
        assert_eq!(HandKind::classify(&cards(&[(14, Hearts)])), HandKind::HighCard);
        assert_eq!(HandKind::classify(&cards(&[(9, Hearts), (9, Clubs)])), HandKind::Pair);
        assert_eq!(
            HandKind::classify(&cards(&[(9, Hearts), (9, Clubs), (4, Spades), (4, Hearts)])),
            HandKind::TwoPair
        );
        assert_eq!(
            HandKind::classify(&cards(&[(2, Hearts), (3, Clubs), (4, Spades), (5, Hearts), (14, Clubs)])),
            HandKind::Straight
        );
        assert_eq!(
            HandKind::classify(&cards(&[(2, Hearts), (7, Hearts), (9, Hearts), (11, Hearts), (13, Hearts)])),
            HandKind::Flush
        );
        assert_eq!(
            HandKind::classify(&cards(&[(8, Hearts), (8, Clubs), (8, Spades), (3, Hearts), (3, Clubs)])),
            HandKind::FullHouse
        );
        assert_eq!(
            HandKind::classify(&cards(&[(6, Spades), (7, Spades), (8, Spades), (9, Spades), (10, Spades)])),
            HandKind::StraightFlush
        );
    }

    #[test]
    fn test_catalog_lookups() {
        assert!(deck_by_name("Red Deck").is_some());
        assert!(deck_by_name("Purple Deck").is_none());
        assert!(challenge_by_name("The Omelette").is_some());
        assert_eq!(center_by_key("c_strength").map(|c| c.max_targets), Some(2));
    }

    #[test]
    fn test_blind_targets_scale() {
        use crate::sim::Blind;
        assert_eq!(blind_target(1, Blind::Small), 300);
        assert_eq!(blind_target(1, Blind::Big), 450);
        assert_eq!(blind_target(1, Blind::Boss), 600);
        assert_eq!(blind_target(99, Blind::Small), 50_000);
    }
}

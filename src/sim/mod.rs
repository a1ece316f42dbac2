//! Simulation handle
//!
//! The engine never reaches into a simulation by field path. Everything it
//! needs (the current phase, the collections a command indexes into, the
//! length of the pending-effects queue, and one mutation entry point per
//! command) goes through the [`Simulation`] trait. Mutation entry points only
//! enqueue work: the simulation applies it over later ticks, which is why
//! responses are deferred through the completion scheduler.
//!
//! Collection positions at this boundary are [`SlotIndex`] values, which are
//! 1-based. The wire protocol is 0-based; conversion happens in exactly one
//! place (`service::args`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub mod catalog;
pub mod graph;
pub mod headless;
mod rng;

pub use headless::HeadlessSim;

use graph::Node;

/// Coarse lifecycle state of the simulation.
///
/// The discriminants are the codes the game itself uses and are what goes on
/// the wire as `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Player is choosing cards to play or discard.
    SelectingHand = 1,
    /// A hand was played and is being scored.
    HandPlayed = 2,
    /// Cards are being dealt into the hand.
    DrawToHand = 3,
    /// The run is lost.
    GameOver = 4,
    /// Between rounds, buying cards.
    Shop = 5,
    /// A tarot card is being applied.
    PlayTarot = 6,
    /// Choosing to play or skip the blind on deck.
    BlindSelect = 7,
    /// Round won, payout pending.
    RoundEval = 8,
    /// Tarot pack opened.
    TarotPack = 9,
    /// Planet pack opened.
    PlanetPack = 10,
    /// Main menu, no run active.
    Menu = 11,
    /// Tutorial overlay.
    Tutorial = 12,
    /// Splash screen.
    Splash = 13,
    /// Sandbox mode.
    Sandbox = 14,
    /// Spectral pack opened.
    SpectralPack = 15,
    /// Demo call-to-action screen.
    DemoCta = 16,
    /// Standard pack opened.
    StandardPack = 17,
    /// Buffoon pack opened.
    BuffoonPack = 18,
    /// Round setup before blind selection.
    NewRound = 19,
}

impl Phase {
    /// Every phase, in code order.
    pub const ALL: [Phase; 19] = [
        Phase::SelectingHand,
        Phase::HandPlayed,
        Phase::DrawToHand,
        Phase::GameOver,
        Phase::Shop,
        Phase::PlayTarot,
        Phase::BlindSelect,
        Phase::RoundEval,
        Phase::TarotPack,
        Phase::PlanetPack,
        Phase::Menu,
        Phase::Tutorial,
        Phase::Splash,
        Phase::Sandbox,
        Phase::SpectralPack,
        Phase::DemoCta,
        Phase::StandardPack,
        Phase::BuffoonPack,
        Phase::NewRound,
    ];

    /// Phases in which a run is active and stable enough to accept
    /// inventory commands.
    pub const IN_RUN: &'static [Phase] = &[
        Phase::BlindSelect,
        Phase::SelectingHand,
        Phase::RoundEval,
        Phase::Shop,
    ];

    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Option<Phase> {
        Phase::ALL.iter().copied().find(|phase| phase.code() == code)
    }

    /// Upper-case name as used by the game (`SELECTING_HAND`).
    pub const fn name(self) -> &'static str {
        match self {
            Phase::SelectingHand => "SELECTING_HAND",
            Phase::HandPlayed => "HAND_PLAYED",
            Phase::DrawToHand => "DRAW_TO_HAND",
            Phase::GameOver => "GAME_OVER",
            Phase::Shop => "SHOP",
            Phase::PlayTarot => "PLAY_TAROT",
            Phase::BlindSelect => "BLIND_SELECT",
            Phase::RoundEval => "ROUND_EVAL",
            Phase::TarotPack => "TAROT_PACK",
            Phase::PlanetPack => "PLANET_PACK",
            Phase::Menu => "MENU",
            Phase::Tutorial => "TUTORIAL",
            Phase::Splash => "SPLASH",
            Phase::Sandbox => "SANDBOX",
            Phase::SpectralPack => "SPECTRAL_PACK",
            Phase::DemoCta => "DEMO_CTA",
            Phase::StandardPack => "STANDARD_PACK",
            Phase::BuffoonPack => "BUFFOON_PACK",
            Phase::NewRound => "NEW_ROUND",
        }
    }

    /// Whether this is an in-between phase rather than a resting point for
    /// a run. Pack openings count as in-between.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Phase::HandPlayed
                | Phase::DrawToHand
                | Phase::NewRound
                | Phase::PlayTarot
                | Phase::Splash
                | Phase::TarotPack
                | Phase::PlanetPack
                | Phase::SpectralPack
                | Phase::StandardPack
                | Phase::BuffoonPack
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Phase::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown phase code {code}")))
    }
}

/// Which blind of the current ante is up next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Blind {
    /// First blind of the ante.
    Small,
    /// Second blind of the ante.
    Big,
    /// Final blind of the ante; cannot be skipped.
    Boss,
}

impl Blind {
    /// Display name used in snapshots.
    pub const fn name(self) -> &'static str {
        match self {
            Blind::Small => "Small",
            Blind::Big => "Big",
            Blind::Boss => "Boss",
        }
    }
}

/// 1-based position inside a simulation collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Slot addressed by a 0-based wire index.
    pub const fn from_wire(index: usize) -> Self {
        Self(index + 1)
    }

    /// Slot from a 1-based position; `None` for zero.
    pub const fn new(position: usize) -> Option<Self> {
        if position == 0 { None } else { Some(Self(position)) }
    }

    /// 1-based position.
    pub const fn get(self) -> usize {
        self.0
    }

    /// 0-based offset into a Rust slice.
    pub const fn offset(self) -> usize {
        self.0 - 1
    }
}

/// Card category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardSet {
    /// Playing card.
    Default,
    /// Joker.
    Joker,
    /// Tarot consumable.
    Tarot,
    /// Planet consumable.
    Planet,
    /// Spectral consumable.
    Spectral,
    /// Voucher.
    Voucher,
}

impl CardSet {
    /// Name used in `ability.set`.
    pub const fn name(self) -> &'static str {
        match self {
            CardSet::Default => "Default",
            CardSet::Joker => "Joker",
            CardSet::Tarot => "Tarot",
            CardSet::Planet => "Planet",
            CardSet::Spectral => "Spectral",
            CardSet::Voucher => "Voucher",
        }
    }

    /// Whether cards of this set go to the consumable area.
    pub const fn is_consumable(self) -> bool {
        matches!(self, CardSet::Tarot | CardSet::Planet | CardSet::Spectral)
    }
}

/// Playing card suit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    /// Hearts.
    Hearts,
    /// Diamonds.
    Diamonds,
    /// Clubs.
    Clubs,
    /// Spades.
    Spades,
}

impl Suit {
    /// All suits.
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];

    /// Single-letter prefix used in card keys.
    pub const fn letter(self) -> char {
        match self {
            Suit::Hearts => 'H',
            Suit::Diamonds => 'D',
            Suit::Clubs => 'C',
            Suit::Spades => 'S',
        }
    }

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Suit::Hearts => "Hearts",
            Suit::Diamonds => "Diamonds",
            Suit::Clubs => "Clubs",
            Suit::Spades => "Spades",
        }
    }
}

/// Rank and suit of a playing card. Ranks run 2..=14 (ace high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayingCard {
    /// Rank, 2..=14.
    pub rank: u8,
    /// Suit.
    pub suit: Suit,
}

impl PlayingCard {
    /// Rank symbol used in card keys (`2`..`9`, `T`, `J`, `Q`, `K`, `A`).
    pub fn rank_symbol(self) -> char {
        match self.rank {
            10 => 'T',
            11 => 'J',
            12 => 'Q',
            13 => 'K',
            14 => 'A',
            n => char::from(b'0' + n.clamp(2, 9)),
        }
    }

    /// Key such as `H_A`.
    pub fn key(self) -> String {
        format!("{}_{}", self.suit.letter(), self.rank_symbol())
    }

    /// Chips contributed when scored.
    pub fn chips(self) -> u64 {
        match self.rank {
            14 => 11,
            11..=13 => 10,
            n => u64::from(n),
        }
    }
}

/// A card in any area (hand, jokers, consumables, shop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Stable identity within a run.
    pub sort_id: u64,
    /// Card key (`H_A`) or center key (`j_joker`).
    pub key: String,
    /// Display label.
    pub label: String,
    /// Category.
    pub set: CardSet,
    /// Purchase price.
    pub cost: u32,
    /// Sale price.
    pub sell_cost: u32,
    /// Disabled by the current blind.
    pub debuff: bool,
    /// Face down.
    pub face_down: bool,
    /// Rank and suit for playing cards.
    pub playing: Option<PlayingCard>,
    /// Maximum number of hand cards a consumable targets (0 = none needed).
    pub max_targets: u8,
}

/// Read-only view of the shop.
#[derive(Debug, Clone, Copy)]
pub struct ShopView<'a> {
    /// Jokers and consumables for sale.
    pub cards: &'a [Card],
    /// Vouchers for sale.
    pub vouchers: &'a [Card],
    /// Price of the next reroll.
    pub reroll_cost: u32,
}

/// Round and economy counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundInfo {
    /// Current ante.
    pub ante: u32,
    /// Rounds played this run.
    pub round: u32,
    /// Blind up next (or being played).
    pub blind_on_deck: Option<Blind>,
    /// Hands remaining this round.
    pub hands_left: u32,
    /// Discards remaining this round.
    pub discards_left: u32,
    /// Hands played this run.
    pub hands_played: u32,
    /// Joker capacity.
    pub joker_slots: usize,
    /// Consumable capacity.
    pub consumable_slots: usize,
}

/// Parameters for starting a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSetup {
    /// Deck name (`Red Deck`).
    pub deck: String,
    /// Stake, 1..=8.
    pub stake: u8,
    /// Seed string; random when absent.
    pub seed: Option<String>,
    /// Challenge name.
    pub challenge: Option<String>,
}

/// Errors a simulation reports synchronously.
#[derive(Debug, Error)]
pub enum SimError {
    /// Save payload could not be decoded.
    #[error("invalid save payload: {0}")]
    InvalidSave(String),
}

/// Handle through which the engine reads and drives a simulation.
pub trait Simulation {
    /// Current phase.
    fn phase(&self) -> Phase;

    /// Number of effects still queued for processing.
    fn effect_queue_len(&self) -> usize;

    /// Cards in hand, in display order.
    fn hand(&self) -> &[Card];

    /// Owned jokers.
    fn jokers(&self) -> &[Card];

    /// Owned consumables.
    fn consumables(&self) -> &[Card];

    /// Shop contents.
    fn shop(&self) -> ShopView<'_>;

    /// Current money.
    fn dollars(&self) -> i64;

    /// Round counters.
    fn round(&self) -> RoundInfo;

    /// Root of the live state graph.
    fn state_graph(&self) -> Node;

    /// Whether a deck with this name exists.
    fn has_deck(&self, name: &str) -> bool;

    /// Whether a challenge with this name exists.
    fn has_challenge(&self, name: &str) -> bool;

    /// Serializable save of the active run, if any.
    fn save_state(&self) -> Option<Value>;

    /// Begin a new run from the menu.
    fn start_run(&mut self, setup: &RunSetup);

    /// Abandon whatever is happening and return to the menu.
    fn go_to_menu(&mut self);

    /// Play the blind on deck.
    fn select_blind(&mut self);

    /// Skip the blind on deck.
    fn skip_blind(&mut self);

    /// Play the given hand cards.
    fn play_hand(&mut self, cards: &[SlotIndex]);

    /// Discard the given hand cards.
    fn discard(&mut self, cards: &[SlotIndex]);

    /// Reorder the hand; `order[k]` is the card that ends up at position `k`.
    fn rearrange_hand(&mut self, order: &[SlotIndex]);

    /// Reorder jokers.
    fn rearrange_jokers(&mut self, order: &[SlotIndex]);

    /// Reorder consumables.
    fn rearrange_consumables(&mut self, order: &[SlotIndex]);

    /// Collect the round payout and open the shop.
    fn cash_out(&mut self);

    /// Leave the shop.
    fn next_round(&mut self);

    /// Buy a shop card.
    fn buy_card(&mut self, slot: SlotIndex);

    /// Reroll the shop.
    fn reroll_shop(&mut self);

    /// Redeem a shop voucher.
    fn redeem_voucher(&mut self, slot: SlotIndex);

    /// Buy a shop consumable and use it immediately.
    fn buy_and_use(&mut self, slot: SlotIndex);

    /// Sell a joker.
    fn sell_joker(&mut self, slot: SlotIndex);

    /// Use a consumable, optionally targeting hand cards.
    fn use_consumable(&mut self, slot: SlotIndex, targets: &[SlotIndex]);

    /// Sell a consumable.
    fn sell_consumable(&mut self, slot: SlotIndex);

    /// Restore a run saved by [`Simulation::save_state`]. The payload is
    /// decoded before anything changes; an error leaves the simulation as
    /// it was.
    fn load_state(&mut self, payload: &Value) -> Result<(), SimError>;
}

//! Headless reference simulation
//!
//! A deterministic stand-in for the real game, small enough to reason about in
//! tests and rich enough to behave like it from the engine's point of view:
//! every mutation only enqueues effects, effects are applied over later
//! [`HeadlessSim::step`] calls with per-effect delays, and the phase walks
//! through the same transient states the game does (`HAND_PLAYED`,
//! `DRAW_TO_HAND`, `NEW_ROUND`) before settling.
//!
//! The rule set is intentionally tiny: plain poker-hand scoring, four jokers,
//! a handful of planets and tarots, and four vouchers.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::catalog::{self, HandKind, Use};
use super::graph::{Node, TableRef};
use super::rng::{self, RunRng};
use super::{
    Blind, Card, CardSet, Phase, PlayingCard, RoundInfo, RunSetup, ShopView, SimError,
    Simulation, SlotIndex, Suit,
};

const HAND_SIZE: usize = 8;
const HANDS_PER_ROUND: u32 = 4;
const DISCARDS_PER_ROUND: u32 = 3;
const STARTING_DOLLARS: i64 = 4;
const JOKER_SLOTS: usize = 5;
const CONSUMABLE_SLOTS: usize = 2;
const SHOP_SLOTS: usize = 2;
const VOUCHER_SLOTS: usize = 1;
const BASE_REROLL_COST: u32 = 5;
const INTEREST_CAP: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Area {
    Hand,
    Jokers,
    Consumables,
}

#[derive(Debug)]
enum Step {
    BeginRun(RunSetup),
    EndRun,
    SetPhase(Phase),
    BeginRound,
    Draw,
    Score(Vec<Card>),
    Resolve,
    SkipBlind,
    Reorder(Area, Vec<SlotIndex>),
    PayOut,
    FillShop,
    AdvanceBlind,
    Buy(SlotIndex),
    Reroll,
    Redeem(SlotIndex),
    BuyAndUse(SlotIndex),
    SellJoker(SlotIndex),
    UseConsumable(SlotIndex, Vec<SlotIndex>),
    SellConsumable(SlotIndex),
    Restore(Box<Run>, Phase),
}

#[derive(Debug)]
struct Effect {
    delay: u32,
    step: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Run {
    seed: String,
    deck_name: String,
    stake: u8,
    challenge: Option<String>,
    rng: RunRng,
    draw_pile: Vec<Card>,
    discard_pile: Vec<Card>,
    hand: Vec<Card>,
    jokers: Vec<Card>,
    consumables: Vec<Card>,
    shop_cards: Vec<Card>,
    shop_vouchers: Vec<Card>,
    redeemed: Vec<String>,
    dollars: i64,
    ante: u32,
    round: u32,
    blind: Blind,
    hands_per_round: u32,
    discards_per_round: u32,
    hands_left: u32,
    discards_left: u32,
    hands_played: u32,
    skips: u32,
    chips: u64,
    hand_size: usize,
    joker_slots: usize,
    consumable_slots: usize,
    reroll_cost: u32,
    shop_jokers: bool,
    hand_levels: BTreeMap<String, u32>,
    last_hand: Option<String>,
    next_sort_id: u64,
}

impl Run {
    fn new(setup: &RunSetup, seed: String) -> Self {
        let deck = catalog::deck_by_name(&setup.deck);
        let challenge = setup.challenge.as_deref().and_then(catalog::challenge_by_name);

        let adjust = |base: u32, delta: i32| base.saturating_add_signed(delta);
        let hands_per_round = adjust(HANDS_PER_ROUND, deck.map_or(0, |d| d.hands));
        let discards_per_round = adjust(DISCARDS_PER_ROUND, deck.map_or(0, |d| d.discards));
        let joker_slots = JOKER_SLOTS.saturating_add_signed(deck.map_or(0, |d| d.joker_slots as isize));

        let mut run = Run {
            seed: seed.clone(),
            deck_name: setup.deck.clone(),
            stake: setup.stake,
            challenge: setup.challenge.clone(),
            rng: RunRng::from_seed_str(&seed),
            draw_pile: Vec::new(),
            discard_pile: Vec::new(),
            hand: Vec::new(),
            jokers: Vec::new(),
            consumables: Vec::new(),
            shop_cards: Vec::new(),
            shop_vouchers: Vec::new(),
            redeemed: Vec::new(),
            dollars: STARTING_DOLLARS + deck.map_or(0, |d| d.dollars),
            ante: 1,
            round: 0,
            blind: Blind::Small,
            hands_per_round,
            discards_per_round,
            hands_left: hands_per_round,
            discards_left: discards_per_round,
            hands_played: 0,
            skips: 0,
            chips: 0,
            hand_size: HAND_SIZE,
            joker_slots,
            consumable_slots: CONSUMABLE_SLOTS,
            reroll_cost: BASE_REROLL_COST,
            shop_jokers: true,
            hand_levels: BTreeMap::new(),
            last_hand: None,
            next_sort_id: 1,
        };

        for suit in Suit::ALL {
            for rank in 2..=14 {
                let card = catalog::playing_card(PlayingCard { rank, suit }, run.sort_id());
                run.draw_pile.push(card);
            }
        }
        run.rng.shuffle(&mut run.draw_pile);

        if let Some(challenge) = challenge {
            for key in challenge.jokers {
                if let Some(def) = catalog::center_by_key(key) {
                    let card = catalog::center_card(def, run.sort_id());
                    run.jokers.push(card);
                }
            }
            if let Some(dollars) = challenge.dollars {
                run.dollars = dollars;
            }
            run.shop_jokers = challenge.shop_jokers;
        }

        run
    }

    fn sort_id(&mut self) -> u64 {
        let id = self.next_sort_id;
        self.next_sort_id += 1;
        id
    }

    fn area_mut(&mut self, area: Area) -> &mut Vec<Card> {
        match area {
            Area::Hand => &mut self.hand,
            Area::Jokers => &mut self.jokers,
            Area::Consumables => &mut self.consumables,
        }
    }

    fn level(&self, kind: HandKind) -> u32 {
        self.hand_levels.get(kind.name()).copied().unwrap_or(1)
    }

    fn draw(&mut self) {
        while self.hand.len() < self.hand_size {
            match self.draw_pile.pop() {
                Some(card) => self.hand.push(card),
                None => break,
            }
        }
    }

    fn score(&mut self, played: Vec<Card>) {
        let cards: Vec<PlayingCard> = played.iter().filter_map(|c| c.playing).collect();
        let kind = HandKind::classify(&cards);
        let (base_chips, base_mult) = kind.base();
        let level = u64::from(self.level(kind).saturating_sub(1));

        let mut chips = base_chips + level * 10 + cards.iter().map(|c| c.chips()).sum::<u64>();
        let mut mult = base_mult + level;
        for joker in &self.jokers {
            match joker.key.as_str() {
                "j_joker" => mult += 4,
                "j_greedy_joker" => {
                    mult += 3 * cards.iter().filter(|c| c.suit == Suit::Diamonds).count() as u64;
                }
                "j_banner" => chips += 30 * u64::from(self.discards_left),
                _ => {}
            }
        }

        self.chips += chips * mult;
        self.hands_played += 1;
        self.hands_left = self.hands_left.saturating_sub(1);
        self.last_hand = Some(kind.name().to_string());
        self.discard_pile.extend(played);
    }

    fn fill_shop(&mut self) {
        let mut pool: Vec<&'static catalog::CenterDef> = catalog::CENTERS
            .iter()
            .filter(|c| match c.set {
                CardSet::Joker => self.shop_jokers,
                CardSet::Voucher => false,
                _ => true,
            })
            .collect();
        self.shop_cards.clear();
        for _ in 0..SHOP_SLOTS {
            if pool.is_empty() {
                break;
            }
            let def = pool.remove(self.rng.below(pool.len()));
            let card = catalog::center_card(def, self.sort_id());
            self.shop_cards.push(card);
        }
    }

    fn fill_vouchers(&mut self) {
        let available: Vec<&'static catalog::CenterDef> = catalog::CENTERS
            .iter()
            .filter(|c| c.set == CardSet::Voucher && !self.redeemed.iter().any(|k| k == c.key))
            .collect();
        self.shop_vouchers.clear();
        for _ in 0..VOUCHER_SLOTS {
            if let Some(def) = self.rng.pick(&available).copied() {
                let card = catalog::center_card(def, self.sort_id());
                self.shop_vouchers.push(card);
            }
        }
    }

    fn apply_use(&mut self, key: &str, targets: &[SlotIndex]) {
        let Some(def) = catalog::center_by_key(key) else {
            return;
        };
        match def.effect {
            Use::None => {}
            Use::LevelUp(kind) => {
                let level = self.level(kind) + 1;
                self.hand_levels.insert(kind.name().to_string(), level);
            }
            Use::Strength => {
                for slot in targets {
                    if let Some(card) = self.hand.get_mut(slot.offset()) {
                        if let Some(playing) = card.playing.as_mut() {
                            playing.rank = (playing.rank + 1).min(14);
                            card.key = playing.key();
                        }
                    }
                }
            }
            Use::HangedMan => {
                take_slots(&mut self.hand, targets);
            }
            Use::Hermit => self.dollars += self.dollars.clamp(0, 20),
            Use::ExtraHand => self.hands_per_round += 1,
            Use::ExtraDiscard => self.discards_per_round += 1,
            Use::ExtraJokerSlot => self.joker_slots += 1,
            Use::ExtraConsumableSlot => self.consumable_slots += 1,
        }
    }

    fn game_table(&self) -> TableRef {
        let levels = TableRef::new();
        for (name, level) in &self.hand_levels {
            levels.set(name.clone(), *level);
        }

        TableRef::from_pairs([
            ("blind_on_deck", Node::from(self.blind.name())),
            ("hands_played", self.hands_played.into()),
            (
                "current_round",
                TableRef::from_pairs([
                    ("hands_left", Node::from(self.hands_left)),
                    ("discards_left", self.discards_left.into()),
                    ("reroll_cost", self.reroll_cost.into()),
                ])
                .into(),
            ),
            (
                "round_resets",
                TableRef::from_pairs([
                    ("ante", Node::from(self.ante)),
                    ("hands", self.hands_per_round.into()),
                    ("discards", self.discards_per_round.into()),
                ])
                .into(),
            ),
            (
                "blind",
                TableRef::from_pairs([
                    ("name", Node::from(self.blind.name())),
                    ("chips", catalog::blind_target(self.ante, self.blind).into()),
                ])
                .into(),
            ),
            ("dollars", self.dollars.into()),
            ("round", self.round.into()),
            ("skips", self.skips.into()),
            ("chips", self.chips.into()),
            ("stake", u32::from(self.stake).into()),
            ("interest_cap", (INTEREST_CAP * 5).into()),
            ("max_jokers", self.joker_slots.into()),
            ("discount_percent", 0i64.into()),
            ("inflation", 0i64.into()),
            ("bankrupt_at", 0i64.into()),
            ("hand_levels", levels.into()),
            ("last_hand_played", self.last_hand.clone().into()),
            ("seeded", self.challenge.is_none().into()),
            (
                "pseudorandom",
                TableRef::from_pairs([("seed", Node::from(self.seed.clone()))]).into(),
            ),
            (
                "selected_back",
                TableRef::from_pairs([("name", Node::from(self.deck_name.clone()))]).into(),
            ),
            ("challenge", self.challenge.clone().into()),
            ("update", Node::Function("Game:update")),
        ])
    }
}

/// Remove the given slots from `cards`, returning the removed cards in
/// selection order. Out-of-range and repeated slots are ignored.
fn take_slots(cards: &mut Vec<Card>, slots: &[SlotIndex]) -> Vec<Card> {
    let picked: Vec<Card> = slots
        .iter()
        .filter_map(|slot| cards.get(slot.offset()).cloned())
        .collect();
    let mut offsets: Vec<usize> = slots
        .iter()
        .map(|slot| slot.offset())
        .filter(|&offset| offset < cards.len())
        .collect();
    offsets.sort_unstable();
    offsets.dedup();
    for offset in offsets.into_iter().rev() {
        cards.remove(offset);
    }
    picked
}

fn card_table(card: &Card, area: &TableRef) -> TableRef {
    let config = match card.set {
        CardSet::Default => TableRef::from_pairs([("card_key", Node::from(card.key.clone()))]),
        _ => TableRef::from_pairs([("center_key", Node::from(card.key.clone()))]),
    };
    let table = TableRef::from_pairs([
        ("label", Node::from(card.label.clone())),
        ("sort_id", card.sort_id.into()),
        ("cost", card.cost.into()),
        ("sell_cost", card.sell_cost.into()),
        ("debuff", card.debuff.into()),
        ("facing", Node::from(if card.face_down { "back" } else { "front" })),
        ("highlighted", false.into()),
        (
            "ability",
            TableRef::from_pairs([
                ("set", Node::from(card.set.name())),
                ("name", card.label.clone().into()),
            ])
            .into(),
        ),
        ("config", config.into()),
        ("area", area.downgrade()),
        ("click", Node::Function("Card:click")),
        ("hover", Node::Function("Card:hover")),
        (
            "T",
            TableRef::from_pairs([("x", Node::Float(0.0)), ("y", Node::Float(0.0))]).into(),
        ),
    ]);
    if let Some(playing) = card.playing {
        table.set(
            "base",
            TableRef::from_pairs([
                ("value", Node::from(playing.rank_symbol().to_string())),
                ("suit", playing.suit.name().into()),
                ("nominal", playing.chips().into()),
            ]),
        );
    }
    table
}

fn area_table(root: &TableRef, kind: &str, cards: &[Card], limit: usize) -> TableRef {
    let area = TableRef::new();
    let nodes = cards.iter().map(|card| card_table(card, &area).into()).collect::<Vec<Node>>();
    area.set("cards", nodes);
    area.set(
        "config",
        TableRef::from_pairs([
            ("card_count", Node::from(cards.len())),
            ("card_limit", limit.into()),
            ("type", kind.into()),
        ]),
    );
    area.set("parent", root.downgrade());
    area.set("states", TableRef::from_pairs([("visible", Node::Bool(true))]));
    area.set("align_cards", Node::Function("CardArea:align_cards"));
    area
}

/// Deterministic in-process simulation driven by [`HeadlessSim::step`].
#[derive(Debug)]
pub struct HeadlessSim {
    phase: Phase,
    run: Option<Run>,
    queue: VecDeque<Effect>,
    entropy: RunRng,
    ticks: u64,
}

impl Default for HeadlessSim {
    fn default() -> Self {
        Self::with_entropy(0)
    }
}

impl HeadlessSim {
    /// Simulation in the menu, with unseeded runs drawing from the clock.
    pub fn new() -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::with_entropy(nanos as u64)
    }

    /// Simulation in the menu whose unseeded runs are derived from `entropy`.
    pub fn with_entropy(entropy: u64) -> Self {
        Self {
            phase: Phase::Menu,
            run: None,
            queue: VecDeque::new(),
            entropy: RunRng::new(entropy),
            ticks: 0,
        }
    }

    /// Advance one tick: count down the front effect, applying it when due.
    pub fn step(&mut self) {
        self.ticks += 1;
        let Some(front) = self.queue.front_mut() else {
            return;
        };
        if front.delay > 0 {
            front.delay -= 1;
            return;
        }
        if let Some(effect) = self.queue.pop_front() {
            self.apply(effect.step);
        }
    }

    /// Step until the effect queue drains or `max_ticks` elapse. Returns the
    /// number of ticks taken.
    pub fn settle(&mut self, max_ticks: usize) -> usize {
        let mut taken = 0;
        while !self.queue.is_empty() && taken < max_ticks {
            self.step();
            taken += 1;
        }
        taken
    }

    /// Ticks stepped since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Override the run's money.
    pub fn set_dollars(&mut self, dollars: i64) {
        if let Some(run) = self.run.as_mut() {
            run.dollars = dollars;
        }
    }

    /// Override the discards remaining this round.
    pub fn set_discards_left(&mut self, discards: u32) {
        if let Some(run) = self.run.as_mut() {
            run.discards_left = discards;
        }
    }

    /// Drop cards from the end of the hand until it holds `len` cards.
    pub fn truncate_hand(&mut self, len: usize) {
        if let Some(run) = self.run.as_mut() {
            let removed = run.hand.split_off(len.min(run.hand.len()));
            run.draw_pile.extend(removed);
        }
    }

    /// Add a joker or consumable by center key, ignoring slot limits.
    /// Returns false for unknown keys or when no run is active.
    pub fn give_card(&mut self, key: &str) -> bool {
        let (Some(run), Some(def)) = (self.run.as_mut(), catalog::center_by_key(key)) else {
            return false;
        };
        let card = catalog::center_card(def, run.sort_id());
        match def.set {
            CardSet::Joker => run.jokers.push(card),
            set if set.is_consumable() => run.consumables.push(card),
            _ => return false,
        }
        true
    }

    /// Replace the shop's card slots with the given center keys.
    pub fn stock_shop(&mut self, keys: &[&str]) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.shop_cards.clear();
        for key in keys {
            if let Some(def) = catalog::center_by_key(key) {
                let card = catalog::center_card(def, run.sort_id());
                run.shop_cards.push(card);
            }
        }
    }

    fn push(&mut self, delay: u32, step: Step) {
        self.queue.push_back(Effect { delay, step });
    }

    fn apply(&mut self, step: Step) {
        tracing::trace!(?step, phase = %self.phase, "applying effect");
        match step {
            Step::BeginRun(setup) => {
                let seed = match &setup.seed {
                    Some(seed) => seed.clone(),
                    None => rng::seed_string(self.entropy.next_u64()),
                };
                self.run = Some(Run::new(&setup, seed));
            }
            Step::EndRun => self.run = None,
            Step::SetPhase(phase) => self.phase = phase,
            Step::Restore(run, phase) => {
                self.run = Some(*run);
                self.phase = phase;
            }
            step => {
                let Some(run) = self.run.as_mut() else {
                    tracing::warn!(?step, "effect dropped: no active run");
                    return;
                };
                let follow_up = Self::apply_to_run(run, step);
                for (delay, next) in follow_up {
                    self.push(delay, next);
                }
            }
        }
    }

    fn apply_to_run(run: &mut Run, step: Step) -> Vec<(u32, Step)> {
        match step {
            Step::BeginRound => {
                run.round += 1;
                run.hands_left = run.hands_per_round;
                run.discards_left = run.discards_per_round;
                run.chips = 0;
                let returned: Vec<Card> = run.discard_pile.drain(..).chain(run.hand.drain(..)).collect();
                run.draw_pile.extend(returned);
                run.rng.shuffle(&mut run.draw_pile);
            }
            Step::Draw => run.draw(),
            Step::Score(cards) => run.score(cards),
            Step::Resolve => {
                let target = catalog::blind_target(run.ante, run.blind);
                if run.chips >= target {
                    let hand: Vec<Card> = run.hand.drain(..).collect();
                    run.discard_pile.extend(hand);
                    return vec![(2, Step::SetPhase(Phase::RoundEval))];
                }
                if run.hands_left == 0 {
                    return vec![(2, Step::SetPhase(Phase::GameOver))];
                }
                return vec![(4, Step::Draw), (2, Step::SetPhase(Phase::SelectingHand))];
            }
            Step::SkipBlind => {
                run.skips += 1;
                run.blind = match run.blind {
                    Blind::Small => Blind::Big,
                    _ => Blind::Boss,
                };
            }
            Step::Reorder(area, order) => {
                let items = run.area_mut(area);
                let reordered: Vec<Card> = order
                    .iter()
                    .filter_map(|slot| items.get(slot.offset()).cloned())
                    .collect();
                if reordered.len() == items.len() {
                    *items = reordered;
                } else {
                    tracing::warn!(?area, "reorder ignored: order does not cover the area");
                }
            }
            Step::PayOut => {
                let interest = (run.dollars / 5).clamp(0, INTEREST_CAP);
                run.dollars += catalog::blind_reward(run.blind) + i64::from(run.hands_left) + interest;
                for joker in run.jokers.iter_mut().filter(|j| j.key == "j_egg") {
                    joker.sell_cost += 3;
                }
            }
            Step::FillShop => {
                run.reroll_cost = BASE_REROLL_COST;
                run.fill_shop();
                run.fill_vouchers();
            }
            Step::AdvanceBlind => {
                run.blind = match run.blind {
                    Blind::Small => Blind::Big,
                    Blind::Big => Blind::Boss,
                    Blind::Boss => {
                        run.ante += 1;
                        Blind::Small
                    }
                };
                run.shop_cards.clear();
                run.shop_vouchers.clear();
            }
            Step::Buy(slot) => {
                if let Some(card) = take_slots(&mut run.shop_cards, &[slot]).pop() {
                    run.dollars -= i64::from(card.cost);
                    if card.set == CardSet::Joker {
                        run.jokers.push(card);
                    } else {
                        run.consumables.push(card);
                    }
                }
            }
            Step::Reroll => {
                run.dollars -= i64::from(run.reroll_cost);
                run.reroll_cost += 1;
                run.fill_shop();
            }
            Step::Redeem(slot) => {
                if let Some(card) = take_slots(&mut run.shop_vouchers, &[slot]).pop() {
                    run.dollars -= i64::from(card.cost);
                    run.apply_use(&card.key, &[]);
                    run.redeemed.push(card.key);
                }
            }
            Step::BuyAndUse(slot) => {
                if let Some(card) = take_slots(&mut run.shop_cards, &[slot]).pop() {
                    run.dollars -= i64::from(card.cost);
                    run.apply_use(&card.key, &[]);
                }
            }
            Step::SellJoker(slot) => {
                if let Some(card) = take_slots(&mut run.jokers, &[slot]).pop() {
                    run.dollars += i64::from(card.sell_cost);
                }
            }
            Step::UseConsumable(slot, targets) => {
                if let Some(card) = take_slots(&mut run.consumables, &[slot]).pop() {
                    run.apply_use(&card.key, &targets);
                }
            }
            Step::SellConsumable(slot) => {
                if let Some(card) = take_slots(&mut run.consumables, &[slot]).pop() {
                    run.dollars += i64::from(card.sell_cost);
                }
            }
            Step::BeginRun(_) | Step::EndRun | Step::SetPhase(_) | Step::Restore(..) => {}
        }
        Vec::new()
    }
}

impl Simulation for HeadlessSim {
    fn phase(&self) -> Phase {
        self.phase
    }

    fn effect_queue_len(&self) -> usize {
        self.queue.len()
    }

    fn hand(&self) -> &[Card] {
        self.run.as_ref().map(|run| run.hand.as_slice()).unwrap_or_default()
    }

    fn jokers(&self) -> &[Card] {
        self.run.as_ref().map(|run| run.jokers.as_slice()).unwrap_or_default()
    }

    fn consumables(&self) -> &[Card] {
        self.run.as_ref().map(|run| run.consumables.as_slice()).unwrap_or_default()
    }

    fn shop(&self) -> ShopView<'_> {
        match &self.run {
            Some(run) => ShopView {
                cards: &run.shop_cards,
                vouchers: &run.shop_vouchers,
                reroll_cost: run.reroll_cost,
            },
            None => ShopView {
                cards: &[],
                vouchers: &[],
                reroll_cost: BASE_REROLL_COST,
            },
        }
    }

    fn dollars(&self) -> i64 {
        self.run.as_ref().map_or(0, |run| run.dollars)
    }

    fn round(&self) -> RoundInfo {
        let Some(run) = &self.run else {
            return RoundInfo::default();
        };
        RoundInfo {
            ante: run.ante,
            round: run.round,
            blind_on_deck: Some(run.blind),
            hands_left: run.hands_left,
            discards_left: run.discards_left,
            hands_played: run.hands_played,
            joker_slots: run.joker_slots,
            consumable_slots: run.consumable_slots,
        }
    }

    fn state_graph(&self) -> Node {
        let root = TableRef::new();
        root.set("ROOM", Node::Opaque("Room"));
        root.set("CANVAS", Node::Opaque("Canvas"));
        root.set("STATE_COMPLETE", self.queue.is_empty());

        if let Some(run) = &self.run {
            root.set("game", run.game_table());
            root.set("hand", area_table(&root, "hand", &run.hand, run.hand_size));
            root.set("jokers", area_table(&root, "joker", &run.jokers, run.joker_slots));
            root.set(
                "consumables",
                area_table(&root, "joker", &run.consumables, run.consumable_slots),
            );
            root.set(
                "deck",
                TableRef::from_pairs([(
                    "config",
                    Node::from(TableRef::from_pairs([(
                        "card_count",
                        Node::from(run.draw_pile.len()),
                    )])),
                )]),
            );
            if self.phase == Phase::Shop {
                root.set("shop_jokers", area_table(&root, "shop", &run.shop_cards, SHOP_SLOTS));
                root.set(
                    "shop_vouchers",
                    area_table(&root, "shop", &run.shop_vouchers, VOUCHER_SLOTS),
                );
            }
        }

        Node::Table(root)
    }

    fn has_deck(&self, name: &str) -> bool {
        catalog::deck_by_name(name).is_some()
    }

    fn has_challenge(&self, name: &str) -> bool {
        catalog::challenge_by_name(name).is_some()
    }

    fn save_state(&self) -> Option<Value> {
        let run = self.run.as_ref()?;
        let run = serde_json::to_value(run).ok()?;
        Some(json!({ "phase": self.phase, "run": run }))
    }

    fn start_run(&mut self, setup: &RunSetup) {
        self.queue.clear();
        self.push(6, Step::BeginRun(setup.clone()));
        self.push(4, Step::SetPhase(Phase::BlindSelect));
    }

    fn go_to_menu(&mut self) {
        self.queue.clear();
        self.push(4, Step::EndRun);
        self.push(4, Step::SetPhase(Phase::Menu));
    }

    fn select_blind(&mut self) {
        self.phase = Phase::NewRound;
        self.push(3, Step::BeginRound);
        self.push(2, Step::SetPhase(Phase::DrawToHand));
        self.push(6, Step::Draw);
        self.push(2, Step::SetPhase(Phase::SelectingHand));
    }

    fn skip_blind(&mut self) {
        self.push(4, Step::SkipBlind);
    }

    fn play_hand(&mut self, cards: &[SlotIndex]) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let played = take_slots(&mut run.hand, cards);
        self.phase = Phase::HandPlayed;
        self.push(8, Step::Score(played));
        self.push(4, Step::Resolve);
    }

    fn discard(&mut self, cards: &[SlotIndex]) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let discarded = take_slots(&mut run.hand, cards);
        run.discard_pile.extend(discarded);
        run.discards_left = run.discards_left.saturating_sub(1);
        self.phase = Phase::DrawToHand;
        self.push(5, Step::Draw);
        self.push(2, Step::SetPhase(Phase::SelectingHand));
    }

    fn rearrange_hand(&mut self, order: &[SlotIndex]) {
        self.push(2, Step::Reorder(Area::Hand, order.to_vec()));
    }

    fn rearrange_jokers(&mut self, order: &[SlotIndex]) {
        self.push(2, Step::Reorder(Area::Jokers, order.to_vec()));
    }

    fn rearrange_consumables(&mut self, order: &[SlotIndex]) {
        self.push(2, Step::Reorder(Area::Consumables, order.to_vec()));
    }

    fn cash_out(&mut self) {
        self.push(6, Step::PayOut);
        self.push(3, Step::FillShop);
        self.push(4, Step::SetPhase(Phase::Shop));
    }

    fn next_round(&mut self) {
        self.phase = Phase::NewRound;
        self.push(3, Step::AdvanceBlind);
        self.push(4, Step::SetPhase(Phase::BlindSelect));
    }

    fn buy_card(&mut self, slot: SlotIndex) {
        self.push(3, Step::Buy(slot));
    }

    fn reroll_shop(&mut self) {
        self.push(3, Step::Reroll);
    }

    fn redeem_voucher(&mut self, slot: SlotIndex) {
        self.push(4, Step::Redeem(slot));
    }

    fn buy_and_use(&mut self, slot: SlotIndex) {
        self.push(3, Step::BuyAndUse(slot));
    }

    fn sell_joker(&mut self, slot: SlotIndex) {
        self.push(3, Step::SellJoker(slot));
    }

    fn use_consumable(&mut self, slot: SlotIndex, targets: &[SlotIndex]) {
        self.push(4, Step::UseConsumable(slot, targets.to_vec()));
    }

    fn sell_consumable(&mut self, slot: SlotIndex) {
        self.push(3, Step::SellConsumable(slot));
    }

    fn load_state(&mut self, payload: &Value) -> Result<(), SimError> {
        let phase: Phase = payload
            .get("phase")
            .cloned()
            .ok_or_else(|| SimError::InvalidSave("missing phase".into()))
            .and_then(|v| serde_json::from_value(v).map_err(|e| SimError::InvalidSave(e.to_string())))?;
        let run: Run = payload
            .get("run")
            .cloned()
            .ok_or_else(|| SimError::InvalidSave("missing run".into()))
            .and_then(|v| serde_json::from_value(v).map_err(|e| SimError::InvalidSave(e.to_string())))?;

        self.queue.clear();
        self.phase = Phase::Splash;
        self.push(6, Step::Restore(Box::new(run), phase));
        Ok(())
    }
}

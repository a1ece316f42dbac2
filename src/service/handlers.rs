//! Command handlers
//!
//! By the time a handler runs, the registry has already checked the phase
//! and the presence and type of every declared argument. Handlers perform
//! the remaining semantic checks, all of them before touching the
//! simulation, and then either answer immediately or start the mutation and
//! return the [`Completion`] that decides when it is done.

use std::time::Duration;

use serde_json::{Value, json};

use crate::runtime::error::{ApiError, ErrorCode};
use crate::runtime::scheduler::Completion;
use crate::runtime::snapshot::Snapshotter;
use crate::runtime::storage::CheckpointStore;
use crate::sim::{Blind, CardSet, RunSetup, Simulation, SlotIndex};

use super::args::{self, Arguments};
use super::registry::{CommandKind, Handler};
use super::settle;

/// Valid stakes.
pub const STAKES: std::ops::RangeInclusive<i64> = 1..=8;

/// Number of cards a hand play or discard may use.
pub const CARDS_PER_ACTION: std::ops::RangeInclusive<usize> = 1..=5;

/// Engine resources a handler may use.
#[derive(Debug)]
pub struct Context<'a> {
    /// Builds immediate snapshots.
    pub snapshotter: &'a Snapshotter,
    /// Checkpoint storage.
    pub checkpoints: &'a CheckpointStore,
    /// Minimum settle duration for held completions.
    pub hold: Duration,
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Answer now with this value.
    Immediate(Value),
    /// The simulation was mutated; answer with a snapshot once this holds.
    Deferred(Completion),
}

/// Handler implementing `kind`.
pub fn handler_for<S: Simulation>(kind: CommandKind) -> Handler<S> {
    match kind {
        CommandKind::GetGameState => get_game_state::<S>,
        CommandKind::GoToMenu => go_to_menu::<S>,
        CommandKind::StartRun => start_run::<S>,
        CommandKind::SkipOrSelectBlind => skip_or_select_blind::<S>,
        CommandKind::PlayHandOrDiscard => play_hand_or_discard::<S>,
        CommandKind::RearrangeHand => rearrange_hand::<S>,
        CommandKind::RearrangeJokers => rearrange_jokers::<S>,
        CommandKind::RearrangeConsumables => rearrange_consumables::<S>,
        CommandKind::CashOut => cash_out::<S>,
        CommandKind::Shop => shop::<S>,
        CommandKind::SellJoker => sell_joker::<S>,
        CommandKind::UseConsumable => use_consumable::<S>,
        CommandKind::SellConsumable => sell_consumable::<S>,
        CommandKind::GetSaveInfo => get_save_info::<S>,
        CommandKind::SaveCheckpoint => save_checkpoint::<S>,
        CommandKind::LoadCheckpoint => load_checkpoint::<S>,
        CommandKind::ListCheckpoints => list_checkpoints::<S>,
        CommandKind::DeleteCheckpoint => delete_checkpoint::<S>,
    }
}

fn not_enough_dollars(dollars: i64, cost: u32) -> ApiError {
    ApiError::new(ErrorCode::InvalidAction, "Not enough dollars")
        .with("dollars", dollars)
        .with("cost", cost)
}

fn nothing_to(what: &str, verb: &str) -> ApiError {
    ApiError::new(
        ErrorCode::MissingGameObject,
        format!("No {what} available to {verb}"),
    )
    .with(&format!("{what}_available"), 0)
}

fn get_game_state<S: Simulation>(
    sim: &mut S,
    _args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    Ok(Outcome::Immediate(ctx.snapshotter.snapshot(&*sim)))
}

fn go_to_menu<S: Simulation>(
    sim: &mut S,
    _args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    sim.go_to_menu();
    Ok(Outcome::Deferred(settle::menu(ctx.hold)))
}

fn start_run<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    _ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let deck = args.str("deck")?;
    let stake = args.int("stake")?;
    let seed = args.opt_str("seed")?;
    let challenge = args.opt_str("challenge")?;

    if !sim.has_deck(deck) {
        return Err(
            ApiError::new(ErrorCode::ResourceNotFound, "Invalid deck name").with("deck", deck)
        );
    }
    if !STAKES.contains(&stake) {
        return Err(ApiError::new(ErrorCode::ParameterOutOfRange, "Invalid stake")
            .with("stake", stake)
            .with("valid_range", "1-8"));
    }
    if let Some(challenge) = challenge {
        if !sim.has_challenge(challenge) {
            return Err(
                ApiError::new(ErrorCode::ResourceNotFound, "Invalid challenge name")
                    .with("challenge", challenge),
            );
        }
    }

    let setup = RunSetup {
        deck: deck.to_string(),
        stake: stake as u8,
        seed: seed.filter(|s| !s.is_empty()).map(str::to_string),
        challenge: challenge.map(str::to_string),
    };
    tracing::info!(deck = %setup.deck, stake, seed = ?setup.seed, "starting run");
    sim.start_run(&setup);
    Ok(Outcome::Deferred(settle::run_started()))
}

fn skip_or_select_blind<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    _ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    match args.str("action")? {
        "select" => {
            sim.select_blind();
            Ok(Outcome::Deferred(settle::blind_selected()))
        }
        "skip" => {
            let on_deck = sim.round().blind_on_deck;
            if on_deck == Some(Blind::Boss) {
                return Err(ApiError::new(
                    ErrorCode::InvalidParameter,
                    "Cannot skip Boss blind. Use select instead",
                )
                .with("current_state", sim.phase().code()));
            }
            sim.skip_blind();
            Ok(Outcome::Deferred(settle::blind_skipped(on_deck)))
        }
        other => Err(ApiError::new(
            ErrorCode::InvalidAction,
            "Invalid action for skip_or_select_blind",
        )
        .with("action", other)),
    }
}

fn play_hand_or_discard<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let action = args.str("action")?;
    let discard = match action {
        "play_hand" => false,
        "discard" => true,
        other => {
            return Err(ApiError::new(
                ErrorCode::InvalidAction,
                "Invalid action for play_hand_or_discard",
            )
            .with("action", other));
        }
    };

    let cards = args.int_list("cards")?;
    if !CARDS_PER_ACTION.contains(&cards.len()) {
        return Err(
            ApiError::new(ErrorCode::ParameterOutOfRange, "Invalid number of cards")
                .with("cards_count", cards.len())
                .with("valid_range", "1-5"),
        );
    }

    let discards_left = sim.round().discards_left;
    if discard && discards_left == 0 {
        return Err(ApiError::new(
            ErrorCode::NoDiscardsLeft,
            "No discards left to perform discard",
        )
        .with("discards_left", discards_left));
    }

    let slots = args::resolve_cards(&cards, sim.hand().len())?;
    if discard {
        sim.discard(&slots);
    } else {
        sim.play_hand(&slots);
    }
    Ok(Outcome::Deferred(settle::hand_resolved(ctx.hold)))
}

fn rearrange_hand<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    _ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let order = args.int_list("cards")?;
    let len = sim.hand().len();
    if len == 0 {
        return Err(nothing_to("cards", "rearrange"));
    }
    let slots = args::resolve_permutation(&order, len, "cards", "Card")?;
    sim.rearrange_hand(&slots);
    Ok(Outcome::Deferred(settle::queue_drained()))
}

fn rearrange_jokers<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    _ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let order = args.int_list("jokers")?;
    let len = sim.jokers().len();
    if len == 0 {
        return Err(nothing_to("jokers", "rearrange"));
    }
    let slots = args::resolve_permutation(&order, len, "jokers", "Joker")?;
    sim.rearrange_jokers(&slots);
    Ok(Outcome::Deferred(settle::queue_drained()))
}

fn rearrange_consumables<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    _ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let order = args.int_list("consumables")?;
    let len = sim.consumables().len();
    if len == 0 {
        return Err(nothing_to("consumables", "rearrange"));
    }
    let slots = args::resolve_permutation(&order, len, "consumables", "Consumable")?;
    sim.rearrange_consumables(&slots);
    Ok(Outcome::Deferred(settle::queue_drained()))
}

fn cash_out<S: Simulation>(
    sim: &mut S,
    _args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    sim.cash_out();
    Ok(Outcome::Deferred(settle::shop_ready(ctx.hold)))
}

/// Shop slot chosen by `index`, with the facts the checks need copied out.
struct ShopPick {
    slot: SlotIndex,
    cost: u32,
    set: CardSet,
    max_targets: u8,
}

fn pick_shop_card<S: Simulation>(sim: &S, args: &Arguments<'_>, vouchers: bool) -> Result<ShopPick, ApiError> {
    let index = args
        .opt_int("index")?
        .ok_or_else(|| ApiError::missing_field("index"))?;
    let shop = sim.shop();
    let (items, label) = if vouchers {
        (shop.vouchers, "Voucher")
    } else {
        (shop.cards, "Card")
    };
    let slot = args::resolve_index(index, items.len(), label)?;
    let card = &items[slot.offset()];
    Ok(ShopPick {
        slot,
        cost: card.cost,
        set: card.set,
        max_targets: card.max_targets,
    })
}

fn check_affordable<S: Simulation>(sim: &S, cost: u32) -> Result<(), ApiError> {
    let dollars = sim.dollars();
    if dollars < i64::from(cost) {
        return Err(not_enough_dollars(dollars, cost));
    }
    Ok(())
}

fn shop<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    match args.str("action")? {
        "next_round" => {
            sim.next_round();
            Ok(Outcome::Deferred(settle::next_round()))
        }
        "buy_card" => {
            let pick = pick_shop_card(&*sim, args, false)?;
            check_affordable(&*sim, pick.cost)?;
            let round = sim.round();
            if pick.set == CardSet::Joker && sim.jokers().len() >= round.joker_slots {
                return Err(ApiError::new(ErrorCode::InvalidAction, "Joker slots are full")
                    .with("joker_slots", round.joker_slots));
            }
            if pick.set.is_consumable() && sim.consumables().len() >= round.consumable_slots {
                return Err(
                    ApiError::new(ErrorCode::InvalidAction, "Consumable slots are full")
                        .with("consumable_slots", round.consumable_slots),
                );
            }
            sim.buy_card(pick.slot);
            Ok(Outcome::Deferred(settle::shop_ready(ctx.hold)))
        }
        "reroll" => {
            check_affordable(&*sim, sim.shop().reroll_cost)?;
            sim.reroll_shop();
            Ok(Outcome::Deferred(settle::shop_ready(ctx.hold)))
        }
        "redeem_voucher" => {
            let pick = pick_shop_card(&*sim, args, true)?;
            check_affordable(&*sim, pick.cost)?;
            sim.redeem_voucher(pick.slot);
            Ok(Outcome::Deferred(settle::shop_ready(ctx.hold)))
        }
        "buy_and_use_card" => {
            let pick = pick_shop_card(&*sim, args, false)?;
            if !pick.set.is_consumable() {
                return Err(ApiError::new(
                    ErrorCode::InvalidAction,
                    "Only consumables can be bought and used",
                )
                .with("set", pick.set.name()));
            }
            if pick.max_targets > 0 {
                return Err(ApiError::new(
                    ErrorCode::InvalidAction,
                    "Card needs target cards and cannot be used from the shop",
                )
                .with("max_targets", pick.max_targets));
            }
            check_affordable(&*sim, pick.cost)?;
            sim.buy_and_use(pick.slot);
            Ok(Outcome::Deferred(settle::shop_ready(ctx.hold)))
        }
        other => Err(
            ApiError::new(ErrorCode::InvalidAction, "Invalid action for shop").with("action", other),
        ),
    }
}

fn sell_joker<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let index = args.int("index")?;
    let len = sim.jokers().len();
    if len == 0 {
        return Err(nothing_to("jokers", "sell"));
    }
    let slot = args::resolve_index(index, len, "Joker")?;
    sim.sell_joker(slot);
    Ok(Outcome::Deferred(settle::queue_drained_held(ctx.hold)))
}

fn use_consumable<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let index = args.int("index")?;
    let cards = args.opt_int_list("cards")?.unwrap_or_default();

    let consumables = sim.consumables();
    if consumables.is_empty() {
        return Err(nothing_to("consumables", "use"));
    }
    let slot = args::resolve_index(index, consumables.len(), "Consumable")?;
    let max_targets = usize::from(consumables[slot.offset()].max_targets);

    let targets = if max_targets == 0 {
        if !cards.is_empty() {
            return Err(ApiError::new(
                ErrorCode::InvalidParameter,
                "Consumable does not take target cards",
            )
            .with("cards_count", cards.len()));
        }
        Vec::new()
    } else {
        if cards.is_empty() || cards.len() > max_targets {
            return Err(ApiError::new(
                ErrorCode::InvalidParameter,
                "Invalid number of target cards",
            )
            .with("cards_count", cards.len())
            .with("max_targets", max_targets));
        }
        args::resolve_cards(&cards, sim.hand().len())?
    };

    sim.use_consumable(slot, &targets);
    Ok(Outcome::Deferred(settle::queue_drained_held(ctx.hold)))
}

fn sell_consumable<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let index = args.int("index")?;
    let len = sim.consumables().len();
    if len == 0 {
        return Err(nothing_to("consumables", "sell"));
    }
    let slot = args::resolve_index(index, len, "Consumable")?;
    sim.sell_consumable(slot);
    Ok(Outcome::Deferred(settle::queue_drained_held(ctx.hold)))
}

fn get_save_info<S: Simulation>(
    sim: &mut S,
    _args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let checkpoints = ctx.checkpoints.list()?;
    Ok(Outcome::Immediate(json!({
        "state": sim.phase().code(),
        "save_exists": sim.save_state().is_some(),
        "checkpoint_dir": ctx.checkpoints.dir().display().to_string(),
        "checkpoint_count": checkpoints.len(),
    })))
}

fn save_checkpoint<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let name = args.opt_str("name")?;
    let payload = sim
        .save_state()
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidAction, "No active run to checkpoint"))?;
    let info = ctx.checkpoints.save(name, payload)?;
    Ok(Outcome::Immediate(json!({
        "state": sim.phase().code(),
        "checkpoint": info,
    })))
}

fn load_checkpoint<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let name = args.str("name")?;
    let (_, payload) = ctx.checkpoints.load(name)?;
    sim.load_state(&payload).map_err(|err| {
        ApiError::new(ErrorCode::InvalidAction, err.to_string()).with("name", name)
    })?;
    tracing::info!(checkpoint = %name, "checkpoint loading");
    Ok(Outcome::Deferred(settle::restored()))
}

fn list_checkpoints<S: Simulation>(
    sim: &mut S,
    _args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let checkpoints = ctx.checkpoints.list()?;
    Ok(Outcome::Immediate(json!({
        "state": sim.phase().code(),
        "checkpoints": checkpoints,
    })))
}

fn delete_checkpoint<S: Simulation>(
    sim: &mut S,
    args: &Arguments<'_>,
    ctx: &mut Context<'_>,
) -> Result<Outcome, ApiError> {
    let name = args.str("name")?;
    ctx.checkpoints.delete(name)?;
    Ok(Outcome::Immediate(json!({
        "state": sim.phase().code(),
        "deleted": name,
    })))
}

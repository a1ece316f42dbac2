//! Command registry and validator
//!
//! Every command is described by a static [`CommandSpec`]: the phases it is
//! legal in, the message used when it is not, and the arguments it takes.
//! [`Registry::validate`] applies those checks in a fixed order (lookup,
//! phase, argument presence and types) so that handlers only ever see
//! well-formed input and only need the semantic checks specific to them.

use std::collections::HashMap;

use serde_json::Value;

use crate::runtime::error::{ApiError, ErrorCode};
use crate::sim::{Phase, Simulation};

use super::args::Arguments;
use super::envelope::json_type;
use super::handlers::{self, Context, Outcome};

/// Every command the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Snapshot the current state.
    GetGameState,
    /// Abandon the run and return to the menu.
    GoToMenu,
    /// Start a new run.
    StartRun,
    /// Play or skip the blind on deck.
    SkipOrSelectBlind,
    /// Play or discard hand cards.
    PlayHandOrDiscard,
    /// Reorder the hand.
    RearrangeHand,
    /// Reorder jokers.
    RearrangeJokers,
    /// Reorder consumables.
    RearrangeConsumables,
    /// Collect the round payout.
    CashOut,
    /// Shop actions.
    Shop,
    /// Sell a joker.
    SellJoker,
    /// Use a consumable.
    UseConsumable,
    /// Sell a consumable.
    SellConsumable,
    /// Describe save and checkpoint availability.
    GetSaveInfo,
    /// Save the run as a named checkpoint.
    SaveCheckpoint,
    /// Restore a checkpoint.
    LoadCheckpoint,
    /// List checkpoints.
    ListCheckpoints,
    /// Delete a checkpoint.
    DeleteCheckpoint,
}

impl CommandKind {
    /// Every command, in catalogue order.
    pub const ALL: [CommandKind; 18] = [
        CommandKind::GetGameState,
        CommandKind::GoToMenu,
        CommandKind::StartRun,
        CommandKind::SkipOrSelectBlind,
        CommandKind::PlayHandOrDiscard,
        CommandKind::RearrangeHand,
        CommandKind::RearrangeJokers,
        CommandKind::RearrangeConsumables,
        CommandKind::CashOut,
        CommandKind::Shop,
        CommandKind::SellJoker,
        CommandKind::UseConsumable,
        CommandKind::SellConsumable,
        CommandKind::GetSaveInfo,
        CommandKind::SaveCheckpoint,
        CommandKind::LoadCheckpoint,
        CommandKind::ListCheckpoints,
        CommandKind::DeleteCheckpoint,
    ];

    /// Wire name.
    pub const fn name(self) -> &'static str {
        match self {
            CommandKind::GetGameState => "get_game_state",
            CommandKind::GoToMenu => "go_to_menu",
            CommandKind::StartRun => "start_run",
            CommandKind::SkipOrSelectBlind => "skip_or_select_blind",
            CommandKind::PlayHandOrDiscard => "play_hand_or_discard",
            CommandKind::RearrangeHand => "rearrange_hand",
            CommandKind::RearrangeJokers => "rearrange_jokers",
            CommandKind::RearrangeConsumables => "rearrange_consumables",
            CommandKind::CashOut => "cash_out",
            CommandKind::Shop => "shop",
            CommandKind::SellJoker => "sell_joker",
            CommandKind::UseConsumable => "use_consumable",
            CommandKind::SellConsumable => "sell_consumable",
            CommandKind::GetSaveInfo => "get_save_info",
            CommandKind::SaveCheckpoint => "save_checkpoint",
            CommandKind::LoadCheckpoint => "load_checkpoint",
            CommandKind::ListCheckpoints => "list_checkpoints",
            CommandKind::DeleteCheckpoint => "delete_checkpoint",
        }
    }

    /// Look up a wire name.
    pub fn from_name(name: &str) -> Option<CommandKind> {
        CommandKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Whether dispatching this command aborts every pending completion.
    pub const fn is_reset(self) -> bool {
        matches!(self, CommandKind::GoToMenu)
    }

    /// Static description.
    pub fn spec(self) -> &'static CommandSpec {
        // COMMANDS is built in ALL order.
        &COMMANDS[self as usize]
    }
}

/// Expected JSON type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// String.
    Str,
    /// Integer.
    Int,
    /// Array of integers.
    IntList,
}

impl ArgKind {
    fn expected(self) -> &'static str {
        match self {
            ArgKind::Str => "string",
            ArgKind::Int => "integer",
            ArgKind::IntList => "array of integers",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ArgKind::Str => value.is_string(),
            ArgKind::Int => value.as_i64().is_some(),
            ArgKind::IntList => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| item.as_i64().is_some())),
        }
    }
}

/// One declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    /// Key in `arguments`.
    pub key: &'static str,
    /// Expected type.
    pub kind: ArgKind,
    /// Whether absence is an error.
    pub required: bool,
}

const fn req(key: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec { key, kind, required: true }
}

const fn opt(key: &'static str, kind: ArgKind) -> ArgSpec {
    ArgSpec { key, kind, required: false }
}

/// Static description of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Which command.
    pub kind: CommandKind,
    /// Phases the command is legal in; `None` means any.
    pub phases: Option<&'static [Phase]>,
    /// Declared arguments.
    pub args: &'static [ArgSpec],
    /// Message for an illegal phase.
    pub phase_error: &'static str,
    /// Whether the command changes the simulation (and is recorded in the run log).
    pub mutates: bool,
}

impl CommandSpec {
    /// Reject the command in phases it is not legal in.
    pub fn check_phase(&self, phase: Phase) -> Result<(), ApiError> {
        match self.phases {
            Some(phases) if !phases.contains(&phase) => {
                Err(ApiError::invalid_phase(self.phase_error, phase))
            }
            _ => Ok(()),
        }
    }

    /// Reject missing required arguments and mistyped declared ones.
    pub fn check_args(&self, args: &Arguments<'_>) -> Result<(), ApiError> {
        for spec in self.args {
            match args.get(spec.key) {
                None if spec.required => return Err(ApiError::missing_field(spec.key)),
                None => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(ApiError::wrong_type(spec.key, spec.kind.expected())
                        .with("received", json_type(value)));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

const NONE: &[ArgSpec] = &[];

/// The command table, in [`CommandKind::ALL`] order.
pub static COMMANDS: [CommandSpec; 18] = [
    CommandSpec {
        kind: CommandKind::GetGameState,
        phases: None,
        args: NONE,
        phase_error: "",
        mutates: false,
    },
    CommandSpec {
        kind: CommandKind::GoToMenu,
        phases: None,
        args: NONE,
        phase_error: "",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::StartRun,
        phases: Some(&[Phase::Menu]),
        args: &[
            req("deck", ArgKind::Str),
            req("stake", ArgKind::Int),
            opt("seed", ArgKind::Str),
            opt("challenge", ArgKind::Str),
        ],
        phase_error: "Cannot start run when not in menu",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::SkipOrSelectBlind,
        phases: Some(&[Phase::BlindSelect]),
        args: &[req("action", ArgKind::Str)],
        phase_error: "Cannot skip or select blind when not in blind selection",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::PlayHandOrDiscard,
        phases: Some(&[Phase::SelectingHand]),
        args: &[req("action", ArgKind::Str), req("cards", ArgKind::IntList)],
        phase_error: "Cannot play hand or discard when not selecting hand",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::RearrangeHand,
        phases: Some(&[Phase::SelectingHand]),
        args: &[req("cards", ArgKind::IntList)],
        phase_error: "Cannot rearrange hand when not selecting hand",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::RearrangeJokers,
        phases: Some(Phase::IN_RUN),
        args: &[req("jokers", ArgKind::IntList)],
        phase_error: "Cannot rearrange jokers when no run is in progress",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::RearrangeConsumables,
        phases: Some(Phase::IN_RUN),
        args: &[req("consumables", ArgKind::IntList)],
        phase_error: "Cannot rearrange consumables when no run is in progress",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::CashOut,
        phases: Some(&[Phase::RoundEval]),
        args: NONE,
        phase_error: "Cannot cash out when not in round evaluation",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::Shop,
        phases: Some(&[Phase::Shop]),
        args: &[req("action", ArgKind::Str), opt("index", ArgKind::Int)],
        phase_error: "Cannot select shop action when not in shop",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::SellJoker,
        phases: Some(Phase::IN_RUN),
        args: &[req("index", ArgKind::Int)],
        phase_error: "Cannot sell joker when no run is in progress",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::UseConsumable,
        phases: Some(Phase::IN_RUN),
        args: &[req("index", ArgKind::Int), opt("cards", ArgKind::IntList)],
        phase_error: "Cannot use consumable when no run is in progress",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::SellConsumable,
        phases: Some(Phase::IN_RUN),
        args: &[req("index", ArgKind::Int)],
        phase_error: "Cannot sell consumable when no run is in progress",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::GetSaveInfo,
        phases: None,
        args: NONE,
        phase_error: "",
        mutates: false,
    },
    CommandSpec {
        kind: CommandKind::SaveCheckpoint,
        phases: Some(Phase::IN_RUN),
        args: &[opt("name", ArgKind::Str)],
        phase_error: "Cannot save checkpoint when no run is in progress",
        mutates: false,
    },
    CommandSpec {
        kind: CommandKind::LoadCheckpoint,
        phases: None,
        args: &[req("name", ArgKind::Str)],
        phase_error: "",
        mutates: true,
    },
    CommandSpec {
        kind: CommandKind::ListCheckpoints,
        phases: None,
        args: NONE,
        phase_error: "",
        mutates: false,
    },
    CommandSpec {
        kind: CommandKind::DeleteCheckpoint,
        phases: None,
        args: &[req("name", ArgKind::Str)],
        phase_error: "",
        mutates: false,
    },
];

/// Handler signature: validated arguments in, outcome out.
pub type Handler<S> = fn(&mut S, &Arguments<'_>, &mut Context<'_>) -> Result<Outcome, ApiError>;

/// A command description bound to its handler.
pub struct Command<S> {
    /// Static description.
    pub spec: &'static CommandSpec,
    /// Implementation.
    pub handler: Handler<S>,
}

impl<S> Clone for Command<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Command<S> {}

impl<S> std::fmt::Debug for Command<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command").field("spec", &self.spec.kind).finish()
    }
}

/// Name-indexed command table for one simulation type.
#[derive(Debug)]
pub struct Registry<S> {
    commands: HashMap<&'static str, Command<S>>,
}

impl<S: Simulation> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Simulation> Registry<S> {
    /// Registry holding the full catalogue.
    pub fn new() -> Self {
        let commands = COMMANDS
            .iter()
            .map(|spec| {
                let command = Command {
                    spec,
                    handler: handlers::handler_for::<S>(spec.kind),
                };
                (spec.kind.name(), command)
            })
            .collect();
        Self { commands }
    }

    /// Find a command by wire name.
    pub fn lookup(&self, name: &str) -> Result<Command<S>, ApiError> {
        self.commands.get(name).copied().ok_or_else(|| {
            ApiError::new(ErrorCode::UnknownCommand, "Unknown function name").with("name", name)
        })
    }

    /// Look up, then check phase and arguments.
    pub fn validate(
        &self,
        name: &str,
        phase: Phase,
        args: &Arguments<'_>,
    ) -> Result<Command<S>, ApiError> {
        let command = self.lookup(name)?;
        command.spec.check_phase(phase)?;
        command.spec.check_args(args)?;
        Ok(command)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::HeadlessSim;
    use serde_json::{Map, json};

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_table_matches_kind_order() {
        for (i, kind) in CommandKind::ALL.iter().enumerate() {
            assert_eq!(COMMANDS[i].kind, *kind);
            assert_eq!(kind.spec().kind, *kind);
            assert_eq!(CommandKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(CommandKind::from_name("launch_rocket"), None);
    }

    #[test]
    fn test_unknown_command() {
        let registry: Registry<HeadlessSim> = Registry::new();
        assert_eq!(registry.len(), CommandKind::ALL.len());
        let err = registry.lookup("fly").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownCommand);
        assert_eq!(err.message, "Unknown function name");
    }

    #[test]
    fn test_phase_checked_before_arguments() {
        let registry: Registry<HeadlessSim> = Registry::new();
        let raw = Map::new();
        let err = registry
            .validate("cash_out", Phase::Shop, &Arguments::new(&raw))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPhase);
        assert_eq!(err.message, "Cannot cash out when not in round evaluation");
        assert_eq!(err.context.unwrap()["current_state"], 5);

        let err = registry
            .validate("start_run", Phase::BlindSelect, &Arguments::new(&raw))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPhase);
    }

    #[test]
    fn test_required_and_typed_arguments() {
        let registry: Registry<HeadlessSim> = Registry::new();

        let raw = args(json!({ "stake": 1 }));
        let err = registry
            .validate("start_run", Phase::Menu, &Arguments::new(&raw))
            .unwrap_err();
        assert_eq!(err.message, "Missing required field: deck");

        let raw = args(json!({ "deck": "Red Deck", "stake": "one" }));
        let err = registry
            .validate("start_run", Phase::Menu, &Arguments::new(&raw))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        assert_eq!(err.message, "Invalid parameter type");

        let raw = args(json!({ "deck": "Red Deck", "stake": 1, "seed": 7 }));
        assert!(registry.validate("start_run", Phase::Menu, &Arguments::new(&raw)).is_err());

        let raw = args(json!({ "deck": "Red Deck", "stake": 1, "seed": null }));
        assert!(registry.validate("start_run", Phase::Menu, &Arguments::new(&raw)).is_ok());
    }

    #[test]
    fn test_any_phase_commands() {
        let registry: Registry<HeadlessSim> = Registry::new();
        let raw = Map::new();
        for phase in Phase::ALL {
            assert!(registry.validate("get_game_state", phase, &Arguments::new(&raw)).is_ok());
            assert!(registry.validate("go_to_menu", phase, &Arguments::new(&raw)).is_ok());
        }
    }
}

mod common;

use common::{Harness, error_code};
use deckhand::runtime::error::JournalError;
use deckhand::runtime::journal;
use serde_json::json;

fn play_a_round(harness: &mut Harness) -> serde_json::Value {
    harness.start_round();
    let rejected = harness.request(
        "play_hand_or_discard",
        json!({ "action": "play_hand", "cards": [9, 10] }),
    );
    assert_eq!(error_code(&rejected), "E014");
    harness.request("get_game_state", json!({}));
    harness.request(
        "play_hand_or_discard",
        json!({ "action": "play_hand", "cards": [0, 2, 4] }),
    )
}

#[test]
fn completed_mutations_are_logged_and_chained() {
    let mut harness = Harness::new();
    let last = play_a_round(&mut harness);

    let path = harness.service.run_log_path().unwrap().to_path_buf();
    let entries = journal::read_log(&path).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.function.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["start_run", "skip_or_select_blind", "play_hand_or_discard"]
    );
    journal::verify_chain(&entries).unwrap();

    assert_eq!(entries[0].function.arguments["deck"], "Red Deck");
    assert_eq!(entries[0].state_before["state"], 11);
    assert_eq!(entries[2].state_after, last);
    for entry in &entries {
        assert!(entry.timestamp_after >= entry.timestamp_before);
    }
}

#[test]
fn overlapping_mutations_stay_chained() {
    let mut harness = Harness::with_config(|config| config.settle_delay_ms = 100);
    harness.start_run();
    harness.sim.give_card("j_egg");
    harness.sim.give_card("c_pluto");

    harness.send("sell_joker", json!({ "index": 0 }));
    harness.send("sell_consumable", json!({ "index": 0 }));
    let responses = harness.responses(2, 400);
    assert_eq!(responses.len(), 2);

    let path = harness.service.run_log_path().unwrap().to_path_buf();
    let entries = journal::read_log(&path).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.function.name.as_str()).collect();
    assert_eq!(names, vec!["start_run", "sell_joker", "sell_consumable"]);
    journal::verify_chain(&entries).unwrap();
    assert_eq!(entries[2].state_after, responses[1]);
}

#[test]
fn aborted_mutation_cuts_the_chain() {
    let mut harness = Harness::new();
    harness.start_run();
    harness.sim.give_card("j_joker");
    harness.sim.give_card("j_egg");

    harness.send("rearrange_jokers", json!({ "jokers": [1, 0] }));
    harness.send("go_to_menu", json!({}));
    let responses = harness.responses(2, 400);
    assert_eq!(error_code(&responses[0]), "E019");

    let path = harness.service.run_log_path().unwrap().to_path_buf();
    let entries = journal::read_log(&path).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.function.name.as_str()).collect();
    assert_eq!(names, vec!["start_run", "go_to_menu"]);
    // The aborted reordering left a gap the chain must show.
    match journal::verify_chain(&entries) {
        Err(JournalError::ChainBroken { index }) => assert_eq!(index, 1),
        other => panic!("expected chain break, got {other:?}"),
    }
}

#[test]
fn log_is_found_under_runs_dir() {
    let mut harness = Harness::new();
    harness.start_run();

    let runs = harness.temp.path().join("runs");
    let latest = journal::latest_log(&runs).unwrap().unwrap();
    assert_eq!(Some(latest.as_path()), harness.service.run_log_path());
}

#[test]
fn replaying_a_log_reproduces_the_run() {
    let mut recorded = Harness::new();
    let last = play_a_round(&mut recorded);
    let path = recorded.service.run_log_path().unwrap().to_path_buf();
    let steps = journal::read_steps(&path).unwrap();
    assert_eq!(steps.len(), 3);

    let mut replay = Harness::new();
    let mut state = serde_json::Value::Null;
    for call in steps {
        state = replay.request(&call.name, serde_json::Value::Object(call.arguments));
        assert!(state.get("error_code").is_none(), "{} failed: {state}", call.name);
    }
    assert_eq!(state["game"], last["game"]);
    assert_eq!(state["hand"], last["hand"]);
}

#[test]
fn logging_can_be_disabled() {
    let mut harness = Harness::with_config(|config| config.log_runs = false);
    harness.start_run();
    assert!(harness.service.run_log_path().is_none());
    assert!(
        journal::latest_log(&harness.temp.path().join("runs"))
            .unwrap()
            .is_none()
    );
}

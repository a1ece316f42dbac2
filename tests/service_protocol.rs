mod common;

use common::{Harness, error_code};
use deckhand::sim::{Phase, Simulation};
use serde_json::json;

#[test]
fn malformed_frames_get_envelope_errors() {
    let mut harness = Harness::new();

    harness.transport.push_frame("this is not json");
    harness.transport.push_frame(r#"{"arguments":{}}"#);
    harness.transport.push_frame(r#"{"name":"get_game_state"}"#);
    harness.transport.push_frame(r#"{"name":"get_game_state","arguments":[]}"#);
    harness.transport.push_frame(r#"{"name":"summon","arguments":{}}"#);

    let responses = harness.responses(5, 20);
    let codes: Vec<&str> = responses.iter().map(error_code).collect();
    assert_eq!(codes, vec!["E001", "E002", "E003", "E005", "E004"]);
    for response in &responses {
        assert_eq!(response["state"], 11);
        assert!(response["error"].is_string());
    }
}

#[test]
fn get_game_state_in_menu() {
    let mut harness = Harness::new();
    let state = harness.request("get_game_state", json!({}));
    assert_eq!(state["state"], 11);
    assert!(state.get("error_code").is_none());
}

#[test]
fn phase_gate_rejects_and_leaves_state_untouched() {
    let mut harness = Harness::new();
    let before = harness.request("get_game_state", json!({}));

    let response = harness.request(
        "play_hand_or_discard",
        json!({ "action": "play_hand", "cards": [0] }),
    );
    assert_eq!(error_code(&response), "E009");
    assert_eq!(response["state"], 11);
    assert_eq!(response["context"]["current_state"], 11);
    assert_eq!(
        response["error"],
        "Cannot play hand or discard when not selecting hand"
    );

    let after = harness.request("get_game_state", json!({}));
    assert_eq!(before, after);
}

#[test]
fn missing_and_mistyped_arguments() {
    let mut harness = Harness::new();

    let response = harness.request("start_run", json!({ "stake": 1 }));
    assert_eq!(error_code(&response), "E010");
    assert_eq!(response["context"]["field"], "deck");

    let response = harness.request("start_run", json!({ "deck": "Red Deck", "stake": "one" }));
    assert_eq!(error_code(&response), "E010");
    assert_eq!(response["context"]["field"], "stake");

    let response = harness.request("start_run", json!({ "deck": "Nope Deck", "stake": 1 }));
    assert_eq!(error_code(&response), "E013");
    assert_eq!(response["context"]["deck"], "Nope Deck");
}

#[test]
fn full_round_trip_play_hand() {
    let mut harness = Harness::new();
    let state = harness.start_round();
    assert_eq!(state["hand"]["cards"].as_array().unwrap().len(), 8);
    assert_eq!(state["game"]["current_round"]["discards_left"], 4);

    let state = harness.request(
        "play_hand_or_discard",
        json!({ "action": "play_hand", "cards": [0, 2, 4] }),
    );
    let phase = state["state"].as_u64().unwrap();
    assert!([1, 4, 8].contains(&phase), "unexpected phase {phase}");
    assert_eq!(state["game"]["hands_played"], 1);
    if phase == 1 {
        assert_eq!(state["hand"]["cards"].as_array().unwrap().len(), 8);
    }
}

#[test]
fn discard_with_none_left() {
    let mut harness = Harness::new();
    harness.start_round();
    harness.sim.set_discards_left(0);

    let response = harness.request(
        "play_hand_or_discard",
        json!({ "action": "discard", "cards": [0] }),
    );
    assert_eq!(error_code(&response), "E015");
    assert_eq!(response["context"]["discards_left"], 0);
}

#[test]
fn out_of_range_card_index() {
    let mut harness = Harness::new();
    harness.start_round();

    let response = harness.request(
        "play_hand_or_discard",
        json!({ "action": "play_hand", "cards": [10, 11, 12, 13, 14] }),
    );
    assert_eq!(error_code(&response), "E014");
    assert_eq!(response["context"]["hand_size"], 8);
}

#[test]
fn rearrange_hand_requires_full_permutation() {
    let mut harness = Harness::new();
    let state = harness.start_round();

    let response = harness.request("rearrange_hand", json!({ "cards": [0, 1, 2] }));
    assert_eq!(error_code(&response), "E011");
    assert_eq!(response["context"]["cards_count"], 3);
    assert_eq!(response["context"]["valid_range"], "8");

    let keys = |value: &serde_json::Value| -> Vec<String> {
        value["hand"]["cards"]
            .as_array()
            .unwrap()
            .iter()
            .map(|card| card["config"]["card_key"].as_str().unwrap().to_string())
            .collect()
    };
    let before = keys(&state);
    let reordered = harness.request("rearrange_hand", json!({ "cards": [7, 6, 5, 4, 3, 2, 1, 0] }));
    let mut expected = before.clone();
    expected.reverse();
    assert_eq!(keys(&reordered), expected);
}

/// Put the harness in SHOP by restoring the current run with its phase
/// swapped.
fn enter_shop(harness: &mut Harness) {
    harness.start_run();
    let mut save = harness.sim.save_state().unwrap();
    save["phase"] = json!(5);
    harness.sim.load_state(&save).unwrap();
    harness.sim.settle(100);
    assert_eq!(harness.sim.phase(), Phase::Shop);
}

#[test]
fn buying_without_money() {
    let mut harness = Harness::new();
    enter_shop(&mut harness);
    harness.sim.stock_shop(&["j_joker"]);
    harness.sim.set_dollars(0);

    let response = harness.request("shop", json!({ "action": "buy_card", "index": 0 }));
    assert_eq!(error_code(&response), "E016");
    assert_eq!(response["error"], "Not enough dollars");
    assert_eq!(response["context"]["dollars"], 0);
    assert_eq!(response["context"]["cost"], 2);
    assert_eq!(response["state"], 5);

    harness.sim.set_dollars(10);
    let state = harness.request("shop", json!({ "action": "buy_card", "index": 0 }));
    assert!(state.get("error_code").is_none(), "{state}");
    assert_eq!(state["game"]["dollars"], 8);
    assert_eq!(state["jokers"]["cards"][0]["config"]["center_key"], "j_joker");
}

#[test]
fn shop_gated_outside_shop() {
    let mut harness = Harness::new();
    harness.start_run();
    let response = harness.request("shop", json!({ "action": "reroll" }));
    assert_eq!(error_code(&response), "E009");
    assert_eq!(response["error"], "Cannot select shop action when not in shop");
}

#[test]
fn next_round_leaves_the_shop() {
    let mut harness = Harness::new();
    enter_shop(&mut harness);
    let state = harness.request("shop", json!({ "action": "next_round" }));
    assert_eq!(state["state"], 7);
    assert_eq!(state["game"]["blind_on_deck"], "Big");
}

#[test]
fn boss_blind_cannot_be_skipped() {
    let mut harness = Harness::new();
    harness.start_run();

    let state = harness.request("skip_or_select_blind", json!({ "action": "skip" }));
    assert_eq!(state["game"]["blind_on_deck"], "Big");
    let state = harness.request("skip_or_select_blind", json!({ "action": "skip" }));
    assert_eq!(state["game"]["blind_on_deck"], "Boss");

    let response = harness.request("skip_or_select_blind", json!({ "action": "skip" }));
    assert_eq!(error_code(&response), "E010");
    assert_eq!(response["error"], "Cannot skip Boss blind. Use select instead");
}

#[test]
fn inventory_commands_report_empty_collections() {
    let mut harness = Harness::new();
    harness.start_run();

    let response = harness.request("sell_joker", json!({ "index": 0 }));
    assert_eq!(error_code(&response), "E012");

    harness.sim.give_card("j_joker");
    let response = harness.request("sell_joker", json!({ "index": 3 }));
    assert_eq!(error_code(&response), "E011");
    assert_eq!(response["context"]["max_index"], 0);

    let state = harness.request("sell_joker", json!({ "index": 0 }));
    assert!(state.get("error_code").is_none());
    assert_eq!(state["jokers"]["cards"].as_array().map_or(0, Vec::len), 0);
}

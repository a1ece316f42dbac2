#![allow(dead_code)]

use std::time::{Duration, Instant};

use deckhand::runtime::RuntimeConfig;
use deckhand::service::transport::LoopbackTransport;
use deckhand::service::{Service, TickSummary};
use deckhand::sim::HeadlessSim;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Simulated frame length.
pub const FRAME: Duration = Duration::from_millis(16);

/// Engine wired to a headless simulation over an in-memory transport, with
/// a synthetic clock that advances one frame per tick.
pub struct Harness {
    pub temp: TempDir,
    pub service: Service<HeadlessSim>,
    pub sim: HeadlessSim,
    pub transport: LoopbackTransport,
    pub now: Instant,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut RuntimeConfig)) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let mut config = RuntimeConfig {
            root: temp.path().to_path_buf(),
            settle_delay_ms: 0,
            ..RuntimeConfig::default()
        };
        adjust(&mut config);
        let service = Service::new(&config).expect("service");
        let mut transport = LoopbackTransport::new();
        transport.connect();
        Self {
            temp,
            service,
            sim: HeadlessSim::with_entropy(7),
            transport,
            now: Instant::now(),
        }
    }

    /// One simulation frame followed by one engine tick.
    pub fn frame(&mut self) -> TickSummary {
        self.now += FRAME;
        self.sim.step();
        self.service.tick(&mut self.sim, &mut self.transport, self.now)
    }

    /// One engine tick while the simulation is frozen.
    pub fn idle(&mut self) -> TickSummary {
        self.now += FRAME;
        self.service.tick(&mut self.sim, &mut self.transport, self.now)
    }

    /// Queue a command without waiting.
    pub fn send(&mut self, name: &str, arguments: Value) {
        let line = json!({ "name": name, "arguments": arguments }).to_string();
        self.transport.push_frame(line);
    }

    /// Run frames until at least `count` responses arrived (or give up).
    pub fn responses(&mut self, count: usize, max_frames: usize) -> Vec<Value> {
        let mut out = Vec::new();
        for _ in 0..max_frames {
            self.frame();
            out.extend(
                self.transport
                    .take_sent()
                    .iter()
                    .map(|line| serde_json::from_str::<Value>(line).expect("response is JSON")),
            );
            if out.len() >= count {
                break;
            }
        }
        out
    }

    /// Send a command and count the frames until its response.
    pub fn request_timed(&mut self, name: &str, arguments: Value) -> (Value, usize) {
        self.send(name, arguments);
        for frames in 1..=2_000 {
            self.frame();
            if let Some(line) = self.transport.take_sent().first() {
                return (serde_json::from_str(line).expect("response is JSON"), frames);
            }
        }
        panic!("{name} never answered");
    }

    /// Send a command and wait for its single response.
    pub fn request(&mut self, name: &str, arguments: Value) -> Value {
        self.send(name, arguments);
        let mut responses = self.responses(1, 2_000);
        assert_eq!(responses.len(), 1, "{name} produced {responses:?}");
        responses.remove(0)
    }

    /// Menu -> blind selection with a fixed seed.
    pub fn start_run(&mut self) -> Value {
        let state = self.request(
            "start_run",
            json!({ "deck": "Red Deck", "stake": 1, "seed": "OOOO155" }),
        );
        assert_eq!(state["state"], 7, "start_run should land in BLIND_SELECT: {state}");
        state
    }

    /// Menu -> selecting hand.
    pub fn start_round(&mut self) -> Value {
        self.start_run();
        let state = self.request("skip_or_select_blind", json!({ "action": "select" }));
        assert_eq!(state["state"], 1, "select should land in SELECTING_HAND: {state}");
        state
    }
}

pub fn error_code(response: &Value) -> &str {
    response["error_code"].as_str().unwrap_or("")
}

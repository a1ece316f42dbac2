//! State snapshotter
//!
//! Turns the simulation's live [`Node`] graph into a JSON value that is safe
//! to put on the wire. The walk carries an explicit remaining-depth budget and
//! consults a fixed [`ExclusionSet`] for every table key, so it terminates on
//! any graph (including cyclic ones) and always selects the same fields for
//! the same state.
//!
//! Values without a data representation are replaced by tag strings rather
//! than failing the snapshot:
//!
//! | live value            | emitted                  |
//! |-----------------------|--------------------------|
//! | composite at depth 0  | `"MAX_DEPTH_REACHED"`    |
//! | callable              | `"<function>"`           |
//! | engine handle         | `"<userdata:KIND>"`      |
//! | NaN / infinity        | `"<nan>"`                |
//! | dangling back-ref     | `null`                   |

use std::collections::BTreeSet;

use serde_json::{Map, Number, Value};

use crate::sim::graph::{Node, TableRef};
use crate::sim::{Phase, Simulation};

/// Marker emitted in place of a composite value once the depth budget is spent.
pub const DEPTH_MARKER: &str = "MAX_DEPTH_REACHED";

/// Tag emitted for callables.
pub const FUNCTION_TAG: &str = "<function>";

/// Tag emitted for non-finite numbers.
pub const NON_FINITE_TAG: &str = "<nan>";

/// Root key carrying the phase code. Reserved: a graph field of the same
/// name is replaced.
pub const STATE_KEY: &str = "state";

/// Default depth budget.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Internal wiring fields skipped by default: UI back-references, transform
/// and layout state, input callbacks, and engine singletons.
pub const DEFAULT_EXCLUDED: &[&str] = &[
    "parent", "children", "area", "click", "hover", "states", "role", "alignment", "T", "VT",
    "ROOM", "CANVAS",
];

/// Set of table keys never descended into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet(BTreeSet<String>);

impl ExclusionSet {
    /// Empty set.
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Whether `key` is excluded.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    /// Excluded keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        DEFAULT_EXCLUDED.iter().copied().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Depth budget and exclusion set for a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Levels of composite nesting emitted below the root.
    pub max_depth: usize,
    /// Keys never emitted.
    pub excluded: ExclusionSet,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            excluded: ExclusionSet::default(),
        }
    }
}

/// Builds snapshots under a fixed policy.
#[derive(Debug, Clone, Default)]
pub struct Snapshotter {
    policy: SnapshotPolicy,
}

impl Snapshotter {
    /// Snapshotter with the given policy.
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy }
    }

    /// Active policy.
    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Project an arbitrary graph.
    pub fn capture(&self, root: &Node) -> Value {
        self.visit(root, self.policy.max_depth)
    }

    /// Snapshot of a simulation: its graph plus [`STATE_KEY`], the phase
    /// code.
    pub fn snapshot<S: Simulation + ?Sized>(&self, sim: &S) -> Value {
        stamp_phase(self.capture(&sim.state_graph()), sim.phase())
    }

    fn visit(&self, node: &Node, remaining: usize) -> Value {
        match node {
            Node::Nil => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::from(*i),
            Node::Float(x) => Number::from_f64(*x)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(NON_FINITE_TAG.to_string())),
            Node::Str(s) => Value::String(s.clone()),
            Node::Function(_) => Value::String(FUNCTION_TAG.to_string()),
            Node::Opaque(kind) => Value::String(format!("<userdata:{kind}>")),
            Node::List(items) => {
                if remaining == 0 {
                    return Value::String(DEPTH_MARKER.to_string());
                }
                Value::Array(items.iter().map(|item| self.visit(item, remaining - 1)).collect())
            }
            Node::Table(table) => self.visit_table(table, remaining),
            Node::Back(weak) => match weak.upgrade() {
                Some(table) => self.visit_table(&table, remaining),
                None => Value::Null,
            },
        }
    }

    fn visit_table(&self, table: &TableRef, remaining: usize) -> Value {
        if remaining == 0 {
            return Value::String(DEPTH_MARKER.to_string());
        }
        table.with_fields(|fields| {
            let map: Map<String, Value> = fields
                .iter()
                .filter(|(key, _)| !self.policy.excluded.contains(key))
                .map(|(key, value)| (key.clone(), self.visit(value, remaining - 1)))
                .collect();
            Value::Object(map)
        })
    }
}

fn stamp_phase(captured: Value, phase: Phase) -> Value {
    let state = Value::from(phase.code());
    match captured {
        Value::Object(mut map) => {
            if map.insert(STATE_KEY.to_string(), state).is_some() {
                tracing::debug!("graph field `{STATE_KEY}` replaced by phase code");
            }
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert(STATE_KEY.to_string(), state);
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn depth_of(value: &Value) -> usize {
        match value {
            Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
            Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
            _ => 0,
        }
    }

    #[test]
    fn test_snapshot_scalars_and_tags() {
        let root = TableRef::from_pairs([
            ("n", Node::Int(3)),
            ("x", Node::Float(1.5)),
            ("bad", Node::Float(f64::NAN)),
            ("s", Node::from("hi")),
            ("f", Node::Function("Card:click")),
            ("u", Node::Opaque("Sprite")),
            ("nil", Node::Nil),
        ]);
        let snapshot = Snapshotter::default().capture(&root.into());

        assert_eq!(
            snapshot,
            json!({
                "n": 3,
                "x": 1.5,
                "bad": NON_FINITE_TAG,
                "s": "hi",
                "f": FUNCTION_TAG,
                "u": "<userdata:Sprite>",
                "nil": null,
            })
        );
    }

    #[test]
    fn test_snapshot_excludes_fields() {
        let root = TableRef::new();
        let child = TableRef::from_pairs([("label", Node::from("Joker"))]);
        child.set("parent", root.downgrade());
        root.set("jokers", child);

        let snapshot = Snapshotter::default().capture(&Node::Table(root));
        assert_eq!(snapshot, json!({ "jokers": { "label": "Joker" } }));
    }

    #[test]
    fn test_snapshot_depth_marker() {
        let policy = SnapshotPolicy {
            max_depth: 2,
            excluded: ExclusionSet::none(),
        };
        let root = TableRef::from_pairs([(
            "a",
            Node::from(TableRef::from_pairs([(
                "b",
                Node::from(TableRef::from_pairs([("c", Node::Int(1))])),
            )])),
        )]);

        let snapshot = Snapshotter::new(policy).capture(&root.into());
        assert_eq!(snapshot, json!({ "a": { "b": DEPTH_MARKER } }));
    }

    #[test]
    fn test_snapshot_terminates_on_strong_cycle() {
        let a = TableRef::new();
        let b = TableRef::new();
        a.set("next", b.clone());
        b.set("next", a.clone());

        let policy = SnapshotPolicy {
            max_depth: 6,
            excluded: ExclusionSet::none(),
        };
        let snapshot = Snapshotter::new(policy).capture(&Node::Table(a.clone()));
        assert!(depth_of(&snapshot) <= 6);
        assert_eq!(
            snapshot.pointer("/next/next/next/next/next/next"),
            Some(&json!(DEPTH_MARKER))
        );

        // Break the cycle so the tables are freed.
        b.remove("next");
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let root = TableRef::from_pairs([("z", Node::Int(1)), ("a", Node::Int(2))]);
        let snapper = Snapshotter::default();
        let first = snapper.capture(&Node::Table(root.clone()));
        let second = snapper.capture(&Node::Table(root));
        assert_eq!(first, second);
        assert_eq!(serde_json::to_string(&first).unwrap(), r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn test_snapshot_of_simulation_carries_state() {
        let sim = crate::sim::HeadlessSim::with_entropy(0);
        let snapshot = Snapshotter::default().snapshot(&sim);
        assert_eq!(snapshot["state"], json!(11));
        assert!(snapshot.get("ROOM").is_none());
    }

    #[test]
    fn test_phase_code_replaces_graph_state_field() {
        let root = TableRef::from_pairs([("state", Node::from("graph")), ("dollars", Node::Int(4))]);
        let captured = Snapshotter::default().capture(&Node::Table(root));

        let snapshot = stamp_phase(captured, Phase::Shop);
        assert_eq!(snapshot, json!({ "dollars": 4, "state": 5 }));

        let snapshot = stamp_phase(json!([1, 2]), Phase::Menu);
        assert_eq!(snapshot, json!({ "state": 11, "value": [1, 2] }));
    }

    #[test]
    fn test_default_exclusions_listed() {
        let set = ExclusionSet::default();
        for key in DEFAULT_EXCLUDED {
            assert!(set.contains(key));
        }
        assert!(!set.contains("cards"));
    }

    proptest! {
        #[test]
        fn prop_cyclic_chain_is_bounded(len in 1usize..12, depth in 0usize..10) {
            let tables: Vec<TableRef> = (0..len).map(|_| TableRef::new()).collect();
            for (i, table) in tables.iter().enumerate() {
                table.set("id", i);
                table.set("next", tables[(i + 1) % len].clone());
                table.set("back", tables[(i + len - 1) % len].downgrade());
            }

            let policy = SnapshotPolicy { max_depth: depth, excluded: ExclusionSet::none() };
            let snapshot = Snapshotter::new(policy).capture(&Node::Table(tables[0].clone()));
            prop_assert!(depth_of(&snapshot) <= depth);

            for table in &tables {
                table.remove("next");
            }
        }
    }
}

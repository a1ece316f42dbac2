//! Live state graph exposed by a simulation
//!
//! A simulation's internal state is a web of shared, mutable tables: card
//! areas own their cards, cards point back at the area holding them, UI nodes
//! point at parents and children, and many fields hold callbacks or engine
//! handles that have no data representation. [`Node`] models that graph so the
//! snapshotter can walk it without knowing the simulation's concrete types.
//!
//! Tables are reference counted and may be shared between several parents.
//! Back-references should be stored as [`Node::Back`] (a weak pointer) so a
//! graph does not keep itself alive, but strong cycles are tolerated by every
//! reader in this crate.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Fields of a table, ordered by key.
pub type Fields = BTreeMap<String, Node>;

/// A value in the live state graph.
#[derive(Clone)]
pub enum Node {
    /// Absent value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number (may be non-finite).
    Float(f64),
    /// String.
    Str(String),
    /// Ordered sequence.
    List(Vec<Node>),
    /// Shared table.
    Table(TableRef),
    /// Weak back-reference to a table owned elsewhere.
    Back(WeakTable),
    /// Callable value, identified by name only.
    Function(&'static str),
    /// Engine handle with no data representation.
    Opaque(&'static str),
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Nil => write!(f, "nil"),
            Node::Bool(b) => write!(f, "{b}"),
            Node::Int(i) => write!(f, "{i}"),
            Node::Float(x) => write!(f, "{x}"),
            Node::Str(s) => write!(f, "{s:?}"),
            Node::List(items) => write!(f, "list[{}]", items.len()),
            Node::Table(table) => write!(f, "table[{}]", table.len()),
            Node::Back(_) => write!(f, "back-ref"),
            Node::Function(name) => write!(f, "function {name}"),
            Node::Opaque(kind) => write!(f, "userdata {kind}"),
        }
    }
}

/// Strong, shared handle to a table.
#[derive(Clone, Default)]
pub struct TableRef(Rc<RefCell<Fields>>);

impl TableRef {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from key/value pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Node)>,
    {
        let fields = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Rc::new(RefCell::new(fields)))
    }

    /// Insert or replace a field.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Node>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&self, key: &str) -> Option<Node> {
        self.0.borrow_mut().remove(key)
    }

    /// Clone a field out of the table.
    pub fn get(&self, key: &str) -> Option<Node> {
        self.0.borrow().get(key).cloned()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether the table has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Weak back-reference to this table.
    pub fn downgrade(&self) -> Node {
        Node::Back(WeakTable(Rc::downgrade(&self.0)))
    }

    /// Run `f` over the table's fields.
    pub fn with_fields<R>(&self, f: impl FnOnce(&Fields) -> R) -> R {
        f(&self.0.borrow())
    }

    /// Whether both handles point at the same table.
    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Weak handle to a table.
#[derive(Clone)]
pub struct WeakTable(Weak<RefCell<Fields>>);

impl WeakTable {
    /// Upgrade to a strong handle if the table is still alive.
    pub fn upgrade(&self) -> Option<TableRef> {
        self.0.upgrade().map(TableRef)
    }
}

impl From<bool> for Node {
    fn from(value: bool) -> Self {
        Node::Bool(value)
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Int(value)
    }
}

impl From<u32> for Node {
    fn from(value: u32) -> Self {
        Node::Int(i64::from(value))
    }
}

impl From<u64> for Node {
    fn from(value: u64) -> Self {
        Node::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Node {
    fn from(value: usize) -> Self {
        Node::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Node::Float(value)
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Node::Str(value.to_string())
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Node::Str(value)
    }
}

impl From<TableRef> for Node {
    fn from(value: TableRef) -> Self {
        Node::Table(value)
    }
}

impl From<Vec<Node>> for Node {
    fn from(value: Vec<Node>) -> Self {
        Node::List(value)
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or(Node::Nil, Into::into)
    }
}

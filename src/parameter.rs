//! Typed parameter register (the externally writable control surface).
//!
//! Every control a remote operator can touch is declared once as a
//! [`ParamSpec`]: a stable name, an initial value, a validity constraint and
//! the fallback value substituted when the constraint is violated. The
//! [`ParamStore`] holds the declared parameters behind per-slot locks so the
//! remote-access layer can read and write them while a dispatch is running.
//!
//! The store itself performs no validation beyond kind checking (an integer
//! parameter never silently becomes text); constraint enforcement happens in
//! the poll loop via [`crate::validation`], which is what makes a violated
//! value visible externally for at most one poll interval.
//!
//! # Example
//!
//! ```rust
//! use kitctl::parameter::{ParamSpec, ParamStore, Value};
//!
//! # fn main() -> kitctl::error::AppResult<()> {
//! let store = ParamStore::new(vec![
//!     ParamSpec::int("motor.steps", 200).with_choices(&[200, 400, 800]),
//!     ParamSpec::latch("motor.start"),
//! ])?;
//!
//! store.set("motor.steps", Value::Int(400))?;
//! assert_eq!(store.get("motor.steps")?, Value::Int(400));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{AppResult, KitError};

// =============================================================================
// Value
// =============================================================================

/// A parameter value: integer or free-form text.
///
/// Enumerated choices are integers with a [`Constraint::Choices`] constraint;
/// the only text parameter in the shipped catalogs is the streaming IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer value (counts, levels, latches).
    Int(i64),
    /// Free-form text value (IP address).
    Text(String),
}

impl Value {
    /// Kind name used in type-mismatch errors and declaration dumps.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

// =============================================================================
// Constraint
// =============================================================================

/// Validity constraint attached to a parameter declaration.
///
/// Constraints apply to integer parameters; text parameters are always
/// [`Constraint::Free`] and pass through the validator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Constraint {
    /// No constraint
    #[default]
    Free,

    /// Closed numeric range (both bounds inclusive)
    Range {
        /// Smallest permitted value.
        min: i64,
        /// Largest permitted value.
        max: i64,
    },

    /// Allowed discrete values
    Choices(Vec<i64>),
}

impl Constraint {
    /// Whether `value` satisfies the constraint.
    pub fn permits(&self, value: &Value) -> bool {
        match (self, value) {
            (Constraint::Free, _) => true,
            (Constraint::Range { min, max }, Value::Int(v)) => v >= min && v <= max,
            (Constraint::Choices(choices), Value::Int(v)) => choices.contains(v),
            // A text value can never satisfy a numeric constraint.
            (_, Value::Text(_)) => false,
        }
    }
}

// =============================================================================
// ParamSpec
// =============================================================================

/// A single parameter declaration.
///
/// Declarations are compiled in (no runtime configuration file) and built
/// with a fluent API:
///
/// ```rust
/// use kitctl::parameter::ParamSpec;
///
/// let speed = ParamSpec::int("motor.speed", 3)
///     .with_range(0, 3)
///     .with_fallback(0);
/// ```
///
/// The fallback defaults to the initial value; they differ only where the
/// hardware's safe value is not the power-on value (motor speed starts at
/// Quarter but falls back to Standby).
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    name: &'static str,
    initial: Value,
    fallback: Value,
    constraint: Constraint,
    latch: bool,
}

impl ParamSpec {
    /// Declare an integer parameter.
    pub fn int(name: &'static str, initial: i64) -> Self {
        Self {
            name,
            initial: Value::Int(initial),
            fallback: Value::Int(initial),
            constraint: Constraint::Free,
            latch: false,
        }
    }

    /// Declare a free-form text parameter.
    pub fn text(name: &'static str, initial: &str) -> Self {
        Self {
            name,
            initial: Value::Text(initial.to_string()),
            fallback: Value::Text(initial.to_string()),
            constraint: Constraint::Free,
            latch: false,
        }
    }

    /// Declare a command latch (integer, idle 0, unconstrained).
    pub fn latch(name: &'static str) -> Self {
        Self {
            name,
            initial: Value::Int(crate::command::IDLE),
            fallback: Value::Int(crate::command::IDLE),
            constraint: Constraint::Free,
            latch: true,
        }
    }

    /// Constrain to a closed numeric range.
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.constraint = Constraint::Range { min, max };
        self
    }

    /// Constrain to a discrete value set.
    pub fn with_choices(mut self, choices: &[i64]) -> Self {
        self.constraint = Constraint::Choices(choices.to_vec());
        self
    }

    /// Override the fallback substituted on a constraint violation.
    pub fn with_fallback(mut self, fallback: i64) -> Self {
        self.fallback = Value::Int(fallback);
        self
    }

    /// Parameter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared startup value.
    pub fn initial(&self) -> &Value {
        &self.initial
    }

    /// Value substituted when the constraint is violated.
    pub fn fallback(&self) -> &Value {
        &self.fallback
    }

    /// Declared constraint.
    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Whether this parameter is a one-shot command latch.
    pub fn is_latch(&self) -> bool {
        self.latch
    }
}

// =============================================================================
// ParamStore
// =============================================================================

struct Slot {
    spec: ParamSpec,
    value: RwLock<Value>,
}

/// Typed key-value register for the declared parameters.
///
/// The store is shared (`Arc`) between the poll loop and the remote-access
/// layer. Each slot has its own lock, so an external write never waits on a
/// running dispatch; a write lands between ticks and is observed by the next
/// snapshot. Every committed write bumps a watch generation counter, which is
/// how corrections and latch resets become observable to external readers.
pub struct ParamStore {
    slots: Vec<Slot>,
    index: HashMap<&'static str, usize>,
    generation: watch::Sender<u64>,
}

impl ParamStore {
    /// Build a store from parameter declarations.
    ///
    /// Fails with [`KitError::DuplicateParameter`] if two declarations share
    /// a name.
    pub fn new(specs: Vec<ParamSpec>) -> AppResult<Self> {
        let mut slots = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            if index.insert(spec.name(), slots.len()).is_some() {
                return Err(KitError::DuplicateParameter(spec.name().to_string()));
            }
            let value = RwLock::new(spec.initial().clone());
            slots.push(Slot { spec, value });
        }
        let (generation, _) = watch::channel(0);
        Ok(Self {
            slots,
            index,
            generation,
        })
    }

    fn slot(&self, name: &str) -> AppResult<&Slot> {
        self.index
            .get(name)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| KitError::UnknownParameter(name.to_string()))
    }

    /// Current value of a parameter.
    pub fn get(&self, name: &str) -> AppResult<Value> {
        let slot = self.slot(name)?;
        let guard = slot.value.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    /// Externally triggered write (the remote-access layer).
    pub fn set(&self, name: &str, value: Value) -> AppResult<()> {
        self.put(name, value, "external")
    }

    /// Loop-triggered write (validator correction or latch reset).
    pub fn set_internal(&self, name: &str, value: Value) -> AppResult<()> {
        self.put(name, value, "loop")
    }

    fn put(&self, name: &str, value: Value, origin: &'static str) -> AppResult<()> {
        let slot = self.slot(name)?;
        if slot.spec.initial().kind() != value.kind() {
            return Err(KitError::TypeMismatch {
                name: name.to_string(),
                expected: slot.spec.initial().kind(),
            });
        }
        tracing::trace!(target: "kitctl::store", %name, %value, origin, "parameter written");
        {
            let mut guard = slot.value.write().unwrap_or_else(PoisonError::into_inner);
            *guard = value;
        }
        self.generation.send_modify(|g| *g += 1);
        Ok(())
    }

    /// Copy of every parameter value, taken at the start of a poll tick.
    pub fn snapshot(&self) -> Snapshot {
        let mut values = HashMap::with_capacity(self.slots.len());
        for slot in &self.slots {
            let guard = slot.value.read().unwrap_or_else(PoisonError::into_inner);
            values.insert(slot.spec.name(), guard.clone());
        }
        Snapshot { values }
    }

    /// Iterate the declarations in declaration order.
    pub fn specs(&self) -> impl Iterator<Item = &ParamSpec> {
        self.slots.iter().map(|slot| &slot.spec)
    }

    /// Observe the write generation counter.
    ///
    /// The counter bumps on every committed write, external or internal, so
    /// a subscriber sees validator corrections and latch resets without
    /// polling individual names.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// JSON description of the declarations and their current values.
    ///
    /// Published at startup for diagnostics; the protocol adapter uses the
    /// same dump to mirror the parameter surface.
    pub fn declarations_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for slot in &self.slots {
            let current = slot.value.read().unwrap_or_else(PoisonError::into_inner);
            map.insert(
                slot.spec.name().to_string(),
                serde_json::json!({
                    "value": current.clone(),
                    "fallback": slot.spec.fallback(),
                    "constraint": slot.spec.constraint(),
                    "latch": slot.spec.is_latch(),
                }),
            );
        }
        serde_json::Value::Object(map)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable working copy of the parameter values for one poll tick.
///
/// Dispatch input is always a snapshot, never the live store: a command
/// dispatch reads the values the tick validated, and an external write
/// mid-dispatch is only observed by the next tick.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: HashMap<&'static str, Value>,
}

impl Snapshot {
    /// Raw value, if the name was declared.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Integer value; a missing or non-integer name reads as zero.
    pub fn int(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(Value::Int(v)) => *v,
            _ => 0,
        }
    }

    /// Text value; a missing or non-text name reads as empty.
    pub fn text(&self, name: &str) -> String {
        match self.values.get(name) {
            Some(Value::Text(v)) => v.clone(),
            _ => String::new(),
        }
    }

    /// Replace a working value (validator corrections).
    pub(crate) fn put(&mut self, name: &'static str, value: Value) {
        self.values.insert(name, value);
    }
}

// =============================================================================
// ParamSink
// =============================================================================

/// Write-only view of a remote parameter surface.
///
/// The proxy daemon pushes batched values through this seam; the concrete
/// implementation lives in the remote-access adapter. [`ParamStore`]
/// implements it too, which is how tests stand in for the remote target.
#[async_trait]
pub trait ParamSink: Send + Sync {
    /// Write one named value to the remote surface.
    async fn push(&self, name: &str, value: Value) -> anyhow::Result<()>;
}

#[async_trait]
impl ParamSink for ParamStore {
    async fn push(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.set(name, value)?;
        Ok(())
    }
}

/// Placeholder sink used until a protocol adapter is attached.
///
/// Accepts every push and logs it, so the proxy can run end-to-end against
/// mock hardware without a live upstream.
pub struct NullSink;

#[async_trait]
impl ParamSink for NullSink {
    async fn push(&self, name: &str, value: Value) -> anyhow::Result<()> {
        tracing::info!(target: "kitctl::upstream", %name, %value, "upstream push (no adapter attached)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

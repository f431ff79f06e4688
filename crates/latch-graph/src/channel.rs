use std::sync::Arc;

use latch_core::error::{GraphError, Result};
use serde_json::Value;

/// Built-in aggregation operators for `BinaryOperatorAggregate`.
#[derive(Clone)]
pub enum AggregateOp {
    /// Sum numeric values (f64). Non-numeric values count as zero.
    Sum,
    /// Keep the maximum numeric value.
    Max,
    /// Keep the minimum numeric value.
    Min,
    /// Custom reducer `(current, update) -> merged`.
    Custom(Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>),
}

impl std::fmt::Debug for AggregateOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateOp::Sum => write!(f, "Sum"),
            AggregateOp::Max => write!(f, "Max"),
            AggregateOp::Min => write!(f, "Min"),
            AggregateOp::Custom(_) => write!(f, "Custom(...)"),
        }
    }
}

/// Specification for creating a channel. Used by `CompiledStateGraph` to
/// create fresh channel instances for each invocation.
#[derive(Clone, Debug)]
pub enum ChannelSpec {
    /// A `LastValue` channel with the given default.
    LastValue { default: Value },
    /// An `AppendChannel`.
    Append,
    /// A `BinaryOperatorAggregate` channel with a default value and operator.
    BinaryOperator { default: Value, op: AggregateOp },
}

impl ChannelSpec {
    /// Create a fresh `Channel` instance from this spec.
    pub fn create(&self) -> Box<dyn Channel> {
        match self {
            ChannelSpec::LastValue { default } => Box::new(LastValue::new(default.clone())),
            ChannelSpec::Append => Box::new(AppendChannel::new()),
            ChannelSpec::BinaryOperator { default, op } => {
                Box::new(BinaryOperatorAggregate::new(default.clone(), op.clone()))
            }
        }
    }
}

/// A channel manages a single key in the graph state.
///
/// All writes a superstep produced for the key are handed to `update` in
/// one call, in frontier order.
pub trait Channel: Send + Sync {
    /// Apply one superstep's writes.
    ///
    /// Returns `Ok(true)` if the value changed, `Ok(false)` if unchanged.
    fn update(&mut self, values: Vec<Value>) -> Result<bool>;

    /// Get the current value of the channel.
    fn get(&self) -> &Value;

    /// Serializable form stored in checkpoints.
    fn checkpoint(&self) -> Value;

    /// Restore state from a checkpoint.
    fn restore(&mut self, data: Value);
}

/// A channel that keeps only the last value written.
///
/// More than one write in a single superstep is an error: there is no
/// ordering between concurrent writers that would make one of them "last".
pub struct LastValue {
    value: Value,
}

impl LastValue {
    pub fn new(default: Value) -> Self {
        Self { value: default }
    }
}

impl Channel for LastValue {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        let count = values.len();
        let mut values = values.into_iter();
        match (values.next(), count) {
            (None, _) => Ok(false),
            (Some(new_val), 1) => {
                if self.value == new_val {
                    Ok(false)
                } else {
                    self.value = new_val;
                    Ok(true)
                }
            }
            (Some(_), n) => Err(GraphError::Channel(format!(
                "LastValue channel received {n} values in a single step; expected at most 1"
            ))
            .into()),
        }
    }

    fn get(&self) -> &Value {
        &self.value
    }

    fn checkpoint(&self) -> Value {
        self.value.clone()
    }

    fn restore(&mut self, data: Value) {
        self.value = data;
    }
}

/// A channel that appends values to a JSON array.
///
/// Array writes are flattened, so `["a", "b"]` appends two items.
pub struct AppendChannel {
    items: Vec<Value>,
    /// Cached JSON array so `get()` can return `&Value`.
    cached: Value,
}

impl AppendChannel {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cached: Value::Array(Vec::new()),
        }
    }

    fn rebuild_cache(&mut self) {
        self.cached = Value::Array(self.items.clone());
    }
}

impl Default for AppendChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for AppendChannel {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        for value in values {
            match value {
                Value::Array(arr) => self.items.extend(arr),
                other => self.items.push(other),
            }
        }
        self.rebuild_cache();
        Ok(true)
    }

    fn get(&self) -> &Value {
        &self.cached
    }

    fn checkpoint(&self) -> Value {
        self.cached.clone()
    }

    fn restore(&mut self, data: Value) {
        self.items = match data {
            Value::Array(arr) => arr,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        self.rebuild_cache();
    }
}

// ---------------------------------------------------------------------------
// BinaryOperatorAggregate
// ---------------------------------------------------------------------------

/// A channel that folds every write into the current value with a reducer.
pub struct BinaryOperatorAggregate {
    value: Value,
    op: AggregateOp,
}

impl BinaryOperatorAggregate {
    pub fn new(default: Value, op: AggregateOp) -> Self {
        Self { value: default, op }
    }

    fn apply(&self, current: &Value, new_val: &Value) -> Value {
        match &self.op {
            AggregateOp::Sum => {
                let a = current.as_f64().unwrap_or(0.0);
                let b = new_val.as_f64().unwrap_or(0.0);
                serde_json::json!(a + b)
            }
            AggregateOp::Max => {
                let a = current.as_f64().unwrap_or(f64::NEG_INFINITY);
                let b = new_val.as_f64().unwrap_or(f64::NEG_INFINITY);
                serde_json::json!(a.max(b))
            }
            AggregateOp::Min => {
                let a = current.as_f64().unwrap_or(f64::INFINITY);
                let b = new_val.as_f64().unwrap_or(f64::INFINITY);
                serde_json::json!(a.min(b))
            }
            AggregateOp::Custom(f) => f(current, new_val),
        }
    }
}

impl Channel for BinaryOperatorAggregate {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let old = self.value.clone();
        for v in values {
            self.value = self.apply(&self.value, &v);
        }
        Ok(self.value != old)
    }

    fn get(&self) -> &Value {
        &self.value
    }

    fn checkpoint(&self) -> Value {
        self.value.clone()
    }

    fn restore(&mut self, data: Value) {
        self.value = data;
    }
}

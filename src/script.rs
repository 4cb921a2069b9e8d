//! Script Engine Interface
//!
//! The engine does not ship an expression language. Hosts inject a
//! [`ScriptEngine`] per workflow; it is never persisted and can be replaced
//! after a restore. Errors it returns are caught at the task boundary and
//! turn that task into ERROR.

use serde_json::Value;

use crate::error::ScriptError;
use crate::task::TaskData;

/// Evaluates guard expressions and runs task scripts against task data.
pub trait ScriptEngine: Send + Sync {
    /// Evaluates a side-effect-free expression, such as a gateway guard.
    fn evaluate(&self, expression: &str, data: &TaskData) -> Result<Value, ScriptError>;

    /// Runs a script and returns the task data it leaves behind.
    ///
    /// Implementations receive a read-only view; the engine only adopts
    /// the returned data if the script succeeds.
    fn execute(&self, script: &str, data: &TaskData) -> Result<TaskData, ScriptError>;
}

/// Interprets an evaluated guard as a boolean.
///
/// `null`, `false`, zero, and empty strings, arrays or objects are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

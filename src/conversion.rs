//! Host ⇄ engine value conversion.
//!
//! Used when a native module's default export is installed into the
//! engine, and available to callers through
//! [`JsContext::to_engine_value`] / [`JsContext::to_host_value`].

use serde_json::{Map, Number, Value};
use std::sync::Arc;

use crate::context::JsContext;
use crate::engine::ValueType;
use crate::error::{Error, Result};
use crate::value::JsValue;

/// Strategy for moving values across the host/engine boundary.
pub trait ValueConverter: Send + Sync {
    /// Build an engine value from a host value. Requires an active scope.
    fn to_engine_value(&self, context: &JsContext, value: &Value) -> Result<Arc<JsValue>>;

    /// Read an engine value back into a host value. Requires an active scope.
    fn to_host_value(&self, value: &JsValue) -> Result<Value>;
}

/// JSON-shaped conversion.
///
/// `undefined` reads back as `null`, non-finite numbers as `null`.
/// Functions and symbols are rejected. Nesting deeper than `max_depth`
/// (which includes cyclic structures) is an error.
#[derive(Debug, Clone)]
pub struct JsonConverter {
    pub max_depth: usize,
}

impl Default for JsonConverter {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

impl JsonConverter {
    fn engine_value(&self, context: &JsContext, value: &Value, depth: usize) -> Result<Arc<JsValue>> {
        if depth > self.max_depth {
            return Err(Error::Conversion(format!(
                "nesting deeper than {} levels",
                self.max_depth
            )));
        }

        match value {
            Value::Null => context.null(),
            Value::Bool(b) => context.boolean(*b),
            Value::Number(n) => {
                let n = n
                    .as_f64()
                    .ok_or_else(|| Error::Conversion(format!("number {n} out of range")))?;
                context.number(n)
            }
            Value::String(s) => context.string(s),
            Value::Array(items) => {
                let array = context.array(items.len() as u32)?;

                for (index, item) in items.iter().enumerate() {
                    let item = self.engine_value(context, item, depth + 1)?;
                    array.set_index(index as u32, &item)?;
                }

                Ok(array)
            }
            Value::Object(fields) => {
                let object = context.object()?;

                for (key, field) in fields {
                    let field = self.engine_value(context, field, depth + 1)?;
                    object.set(key, &field)?;
                }

                Ok(object)
            }
        }
    }

    fn host_value(&self, value: &JsValue, depth: usize) -> Result<Value> {
        if depth > self.max_depth {
            return Err(Error::Conversion(format!(
                "nesting deeper than {} levels",
                self.max_depth
            )));
        }

        match value.value_type() {
            ValueType::Undefined | ValueType::Null => Ok(Value::Null),
            ValueType::Boolean => Ok(Value::Bool(value.to_boolean()?)),
            ValueType::Number => Ok(Number::from_f64(value.to_number()?)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            ValueType::String => Ok(Value::String(value.to_rust_string()?)),
            ValueType::Array => {
                let length = value.array_length()?;
                let mut items = Vec::with_capacity(length as usize);

                for index in 0..length {
                    let item = value.get_index(index)?;
                    items.push(self.host_value(&item, depth + 1)?);
                }

                Ok(Value::Array(items))
            }
            ValueType::Object | ValueType::Error => {
                let mut fields = Map::new();

                for key in value.keys()? {
                    let field = value.get(&key)?;
                    fields.insert(key, self.host_value(&field, depth + 1)?);
                }

                Ok(Value::Object(fields))
            }
            other @ (ValueType::Function | ValueType::Symbol) => Err(Error::Conversion(format!(
                "{other} values have no host representation"
            ))),
        }
    }
}

impl ValueConverter for JsonConverter {
    fn to_engine_value(&self, context: &JsContext, value: &Value) -> Result<Arc<JsValue>> {
        self.engine_value(context, value, 0)
    }

    fn to_host_value(&self, value: &JsValue) -> Result<Value> {
        self.host_value(value, 0)
    }
}

//! Engine values.

use std::sync::Arc;

use crate::context::JsContext;
use crate::engine::{RawHandle, SharedEngine, ValueType};
use crate::error::{Error, Result};
use crate::gc::{Flyweight, FlyweightCore};
use crate::property::JsPropertyId;

/// Host wrapper for one engine value, tagged with its [`ValueType`].
///
/// Values are not owned by the host. When the engine reclaims an
/// unreachable value its wrapper is disposed, and later use fails with
/// `ObjectDisposed`. Every accessor requires an active scope on the
/// value's context.
pub struct JsValue {
    core: FlyweightCore,
    value_type: ValueType,
    context: Arc<JsContext>,
}

impl JsValue {
    pub(crate) fn create(context: &Arc<JsContext>, raw: RawHandle) -> Result<Arc<Self>> {
        let engine = context.engine().clone();
        let value_type = engine.value_type(raw)?;
        let core = FlyweightCore::new(engine, raw, context.runtime().deferred().clone())?;

        Ok(Arc::new(Self {
            core,
            value_type,
            context: Arc::clone(context),
        }))
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn context(&self) -> &Arc<JsContext> {
        &self.context
    }

    pub fn is_undefined(&self) -> bool {
        self.value_type == ValueType::Undefined
    }

    pub fn is_null(&self) -> bool {
        self.value_type == ValueType::Null
    }

    pub fn is_boolean(&self) -> bool {
        self.value_type == ValueType::Boolean
    }

    pub fn is_number(&self) -> bool {
        self.value_type == ValueType::Number
    }

    pub fn is_string(&self) -> bool {
        self.value_type == ValueType::String
    }

    pub fn is_symbol(&self) -> bool {
        self.value_type == ValueType::Symbol
    }

    pub fn is_object(&self) -> bool {
        self.value_type.is_object_like()
    }

    pub fn is_array(&self) -> bool {
        self.value_type == ValueType::Array
    }

    pub fn is_function(&self) -> bool {
        self.value_type == ValueType::Function
    }

    pub fn is_error(&self) -> bool {
        self.value_type == ValueType::Error
    }

    pub(crate) fn live(&self) -> Result<RawHandle> {
        self.core.live_handle::<Self>()
    }

    fn engine(&self) -> &SharedEngine {
        self.core.engine()
    }

    fn scoped(&self) -> Result<RawHandle> {
        let raw = self.live()?;
        self.context.require_scope()?;
        Ok(raw)
    }

    fn expect(&self, expected: &'static str, ok: bool) -> Result<RawHandle> {
        let raw = self.scoped()?;

        if !ok {
            return Err(Error::UnexpectedValueType {
                expected,
                found: self.value_type,
            });
        }

        Ok(raw)
    }

    fn expect_object(&self) -> Result<RawHandle> {
        self.expect("object", self.value_type.is_object_like())
    }

    /// Handle of `other`, which must live in the same context.
    fn argument(&self, other: &JsValue) -> Result<RawHandle> {
        if !Arc::ptr_eq(&self.context, &other.context) {
            return Err(Error::ContextMismatch);
        }
        other.live()
    }

    fn symbol_id(&self, symbol: &JsValue) -> Result<Arc<JsPropertyId>> {
        if !symbol.is_symbol() {
            return Err(Error::UnexpectedValueType {
                expected: "symbol",
                found: symbol.value_type,
            });
        }

        self.argument(symbol)?;
        self.context.runtime().symbol_property_id(symbol)
    }

    // ---- coercion -------------------------------------------------------

    pub fn to_number(&self) -> Result<f64> {
        let raw = self.scoped()?;
        self.context.check(self.engine().to_number(raw))
    }

    pub fn to_boolean(&self) -> Result<bool> {
        let raw = self.scoped()?;
        self.context.check(self.engine().to_boolean(raw))
    }

    /// String conversion, as script's `String(value)`.
    pub fn to_rust_string(&self) -> Result<String> {
        let raw = self.scoped()?;
        self.context.check(self.engine().to_string(raw))
    }

    pub fn strict_equals(&self, other: &JsValue) -> Result<bool> {
        let raw = self.scoped()?;
        let other = self.argument(other)?;
        self.context
            .check(self.engine().strict_equals(raw, other))
    }

    // ---- named properties -----------------------------------------------

    pub fn get(&self, name: &str) -> Result<Arc<JsValue>> {
        let raw = self.expect_object()?;
        let id = self.context.property_id(name)?;
        self.get_by_id(raw, &id)
    }

    pub fn set(&self, name: &str, value: &JsValue) -> Result<()> {
        let raw = self.expect_object()?;
        let id = self.context.property_id(name)?;
        self.set_by_id(raw, &id, value)
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        let raw = self.expect_object()?;
        let id = self.context.property_id(name)?;
        self.context
            .check(self.engine().has_property(raw, id.live()?))
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let raw = self.expect_object()?;
        let id = self.context.property_id(name)?;
        self.context
            .check(self.engine().delete_property(raw, id.live()?))
    }

    pub fn get_by_symbol(&self, symbol: &JsValue) -> Result<Arc<JsValue>> {
        let raw = self.expect_object()?;
        let id = self.symbol_id(symbol)?;
        self.get_by_id(raw, &id)
    }

    pub fn set_by_symbol(&self, symbol: &JsValue, value: &JsValue) -> Result<()> {
        let raw = self.expect_object()?;
        let id = self.symbol_id(symbol)?;
        self.set_by_id(raw, &id, value)
    }

    fn get_by_id(&self, raw: RawHandle, id: &JsPropertyId) -> Result<Arc<JsValue>> {
        let value = self
            .context
            .check(self.engine().get_property(raw, id.live()?))?;
        self.context.wrap(value)
    }

    fn set_by_id(&self, raw: RawHandle, id: &JsPropertyId, value: &JsValue) -> Result<()> {
        let value = self.argument(value)?;
        self.context
            .check(self.engine().set_property(raw, id.live()?, value))
    }

    /// Own enumerable string-keyed property names.
    pub fn keys(&self) -> Result<Vec<String>> {
        let raw = self.expect_object()?;
        self.context
            .check(self.engine().own_property_names(raw))
    }

    // ---- indexed properties ---------------------------------------------

    pub fn get_index(&self, index: u32) -> Result<Arc<JsValue>> {
        let raw = self.expect_object()?;
        let value = self
            .context
            .check(self.engine().get_indexed_property(raw, index))?;
        self.context.wrap(value)
    }

    pub fn set_index(&self, index: u32, value: &JsValue) -> Result<()> {
        let raw = self.expect_object()?;
        let value = self.argument(value)?;
        self.context
            .check(self.engine().set_indexed_property(raw, index, value))
    }

    pub fn has_index(&self, index: u32) -> Result<bool> {
        let raw = self.expect_object()?;
        self.context
            .check(self.engine().has_indexed_property(raw, index))
    }

    pub fn delete_index(&self, index: u32) -> Result<bool> {
        let raw = self.expect_object()?;
        self.context
            .check(self.engine().delete_indexed_property(raw, index))
    }

    /// The `length` of an array.
    pub fn array_length(&self) -> Result<u32> {
        self.expect("array", self.is_array())?;
        let length = self.get("length")?.to_number()?;

        if !(0.0..=u32::MAX as f64).contains(&length) || length.fract() != 0.0 {
            return Err(Error::Conversion(format!("invalid array length {length}")));
        }

        Ok(length as u32)
    }

    // ---- functions ------------------------------------------------------

    /// Call a function value. `this` defaults to `undefined`.
    pub fn call(&self, this: Option<&JsValue>, args: &[&JsValue]) -> Result<Arc<JsValue>> {
        let raw = self.expect("function", self.is_function())?;
        let engine = self.engine();

        let this = match this {
            Some(this) => self.argument(this)?,
            None => self.context.check(engine.undefined_value())?,
        };

        let args = args
            .iter()
            .map(|arg| self.argument(arg))
            .collect::<Result<Vec<_>>>()?;

        let result = self
            .context
            .check(engine.call_function(raw, this, &args))?;
        self.context.wrap(result)
    }

    /// Call a function value as a constructor.
    pub fn construct(&self, args: &[&JsValue]) -> Result<Arc<JsValue>> {
        let raw = self.expect("function", self.is_function())?;

        let args = args
            .iter()
            .map(|arg| self.argument(arg))
            .collect::<Result<Vec<_>>>()?;

        let result = self
            .context
            .check(self.engine().construct_object(raw, &args))?;
        self.context.wrap(result)
    }
}

impl Flyweight for JsValue {
    fn core(&self) -> &FlyweightCore {
        &self.core
    }
}

impl std::fmt::Debug for JsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsValue")
            .field("handle", &self.core.raw())
            .field("type", &self.value_type)
            .field("disposed", &self.core.is_disposed())
            .finish()
    }
}

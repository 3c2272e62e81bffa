//! Field codec - converts a single field value to and from a storage value
//!
//! Encoding order for a present value:
//! 1. A serializer registered for the field's declared type wins.
//! 2. Otherwise the type's natural form is used: text as-is, enum variants
//!    by their symbolic name, anything else through its textual rendering.
//!
//! New field types are supported by registering a [`TypeSerializer`];
//! the row mapper never changes.

use crate::value::{Value, ValueKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Upcast helper so field values can be handed to type-erased serializers.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Natural (serializer-less) form of a field value.
pub enum Natural<'a> {
    /// Written as-is
    Text(Cow<'a, str>),
    /// Written as the variant's symbolic name
    Enum(&'static str),
    /// Written through `Display`
    Display(&'a dyn fmt::Display),
}

/// A Rust type that can live in a persisted model field.
pub trait FieldType: AsAny + Send + Sync + 'static {
    fn natural(&self) -> Natural<'_>;

    /// Rebuild a value from what the store handed back.
    fn from_stored(value: &Value) -> std::result::Result<Self, String>
    where
        Self: Sized;

    /// Column type to declare when no serializer is registered.
    fn natural_kind() -> ValueKind
    where
        Self: Sized,
    {
        ValueKind::Text
    }
}

impl FieldType for String {
    fn natural(&self) -> Natural<'_> {
        Natural::Text(Cow::Borrowed(self))
    }

    fn from_stored(value: &Value) -> std::result::Result<Self, String> {
        value
            .to_text()
            .ok_or_else(|| format!("expected text, got {}", value.kind()))
    }
}

macro_rules! integer_field {
    ($($ty:ty),+) => {
        $(
            impl FieldType for $ty {
                fn natural(&self) -> Natural<'_> {
                    Natural::Display(self)
                }

                fn from_stored(value: &Value) -> std::result::Result<Self, String> {
                    let wide = value
                        .as_i64()
                        .ok_or_else(|| format!("expected integer, got {}", value.kind()))?;
                    <$ty>::try_from(wide).map_err(|e| e.to_string())
                }

                fn natural_kind() -> ValueKind {
                    ValueKind::Integer
                }
            }
        )+
    };
}

integer_field!(i64, i32, i16, u32, u16, u8);

impl FieldType for f64 {
    fn natural(&self) -> Natural<'_> {
        Natural::Display(self)
    }

    fn from_stored(value: &Value) -> std::result::Result<Self, String> {
        value
            .as_f64()
            .ok_or_else(|| format!("expected real, got {}", value.kind()))
    }

    fn natural_kind() -> ValueKind {
        ValueKind::Real
    }
}

impl FieldType for bool {
    fn natural(&self) -> Natural<'_> {
        Natural::Display(self)
    }

    fn from_stored(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Text(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Text(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => other
                .as_i64()
                .map(|i| i != 0)
                .ok_or_else(|| format!("expected boolean, got {}", other.kind())),
        }
    }

    fn natural_kind() -> ValueKind {
        ValueKind::Integer
    }
}

impl FieldType for PathBuf {
    fn natural(&self) -> Natural<'_> {
        Natural::Text(self.to_string_lossy())
    }

    fn from_stored(value: &Value) -> std::result::Result<Self, String> {
        String::from_stored(value).map(PathBuf::from)
    }
}

/// Signed milliseconds since the Unix epoch, `None` past the `i64` range.
fn epoch_millis(time: &SystemTime) -> Option<i64> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).ok(),
        Err(before) => i64::try_from(before.duration().as_millis()).ok().map(|m| -m),
    }
}

fn whole_millis(duration: &Duration) -> Option<i64> {
    i64::try_from(duration.as_millis()).ok()
}

// Without a serializer these are written as millisecond text, which the
// INTEGER column stores as a number and `from_stored` reads back.
// Out-of-range values saturate.
impl FieldType for SystemTime {
    fn natural(&self) -> Natural<'_> {
        let millis = epoch_millis(self).unwrap_or(if *self >= UNIX_EPOCH { i64::MAX } else { i64::MIN });
        Natural::Text(Cow::Owned(millis.to_string()))
    }

    fn from_stored(value: &Value) -> std::result::Result<Self, String> {
        SystemTimeSerializer.deserialize(value)
    }

    fn natural_kind() -> ValueKind {
        ValueKind::Integer
    }
}

impl FieldType for Duration {
    fn natural(&self) -> Natural<'_> {
        Natural::Text(Cow::Owned(whole_millis(self).unwrap_or(i64::MAX).to_string()))
    }

    fn from_stored(value: &Value) -> std::result::Result<Self, String> {
        DurationSerializer.deserialize(value)
    }

    fn natural_kind() -> ValueKind {
        ValueKind::Integer
    }
}

/// Implement [`FieldType`] for a fieldless enum, stored by variant name.
///
/// ```ignore
/// enum Priority { Low, High }
/// rowmap::enum_field!(Priority { Low, High });
/// ```
#[macro_export]
macro_rules! enum_field {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::codec::FieldType for $ty {
            fn natural(&self) -> $crate::codec::Natural<'_> {
                match self {
                    $($ty::$variant => $crate::codec::Natural::Enum(stringify!($variant)),)+
                }
            }

            fn from_stored(value: &$crate::Value) -> ::std::result::Result<Self, String> {
                match value.as_str() {
                    $(Some(stringify!($variant)) => Ok($ty::$variant),)+
                    _ => Err(format!("no {} variant named {}", stringify!($ty), value)),
                }
            }
        }
    };
}

/// Implement [`FieldType`] for a serde type, stored as JSON text.
#[macro_export]
macro_rules! json_field {
    ($ty:ty) => {
        impl $crate::codec::FieldType for $ty {
            fn natural(&self) -> $crate::codec::Natural<'_> {
                match $crate::__serde_json::to_string(self) {
                    Ok(json) => $crate::codec::Natural::Text(::std::borrow::Cow::Owned(json)),
                    Err(e) => {
                        $crate::__tracing::error!(
                            "Failed to serialize {} as JSON: {}",
                            ::std::any::type_name::<$ty>(),
                            e
                        );
                        $crate::codec::Natural::Text(::std::borrow::Cow::Borrowed(""))
                    }
                }
            }

            fn from_stored(value: &$crate::Value) -> ::std::result::Result<Self, String> {
                let text = value
                    .as_str()
                    .ok_or_else(|| format!("expected JSON text, got {}", value.kind()))?;
                $crate::__serde_json::from_str(text).map_err(|e| e.to_string())
            }
        }
    };
}

// ========== Serializers ==========

/// Pluggable conversion for one declared field type.
///
/// A serializer changes how an existing [`FieldType`] is stored; it does not
/// make a type persistable on its own. The field's type still needs a
/// `FieldType` impl (hand-written, or via [`enum_field!`](crate::enum_field)
/// or [`json_field!`](crate::json_field)) so the schema builder can accept it.
/// With a serializer registered, that impl's `natural`/`from_stored` are
/// only used when the registry in use lacks the serializer.
pub trait TypeSerializer: Send + Sync + 'static {
    type Target: 'static;

    /// Storage class `serialize` promises to return.
    fn serialized_kind(&self) -> ValueKind;

    fn serialize(&self, value: &Self::Target) -> Value;

    fn deserialize(&self, value: &Value) -> std::result::Result<Self::Target, String>;
}

trait ErasedSerializer: Send + Sync {
    fn target_name(&self) -> &'static str;
    fn serialized_kind(&self) -> ValueKind;
    fn serialize_any(&self, value: &dyn Any) -> Option<Value>;
    fn deserialize_any(&self, value: &Value) -> std::result::Result<Box<dyn Any>, String>;
}

impl<S: TypeSerializer> ErasedSerializer for S {
    fn target_name(&self) -> &'static str {
        std::any::type_name::<S::Target>()
    }

    fn serialized_kind(&self) -> ValueKind {
        TypeSerializer::serialized_kind(self)
    }

    fn serialize_any(&self, value: &dyn Any) -> Option<Value> {
        value.downcast_ref::<S::Target>().map(|v| self.serialize(v))
    }

    fn deserialize_any(&self, value: &Value) -> std::result::Result<Box<dyn Any>, String> {
        self.deserialize(value).map(|v| Box::new(v) as Box<dyn Any>)
    }
}

/// Serializers keyed by the declared field type.
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    serializers: HashMap<TypeId, Arc<dyn ErasedSerializer>>,
}

impl SerializerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in serializers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(BoolSerializer);
        registry.register(PathSerializer);
        registry.register(SystemTimeSerializer);
        registry.register(DurationSerializer);
        registry
    }

    /// Register a serializer, replacing any previous one for the same type
    pub fn register<S: TypeSerializer>(&mut self, serializer: S) {
        self.serializers
            .insert(TypeId::of::<S::Target>(), Arc::new(serializer));
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.serializers.contains_key(&type_id)
    }

    /// Declared output kind of the serializer for `type_id`, if any
    pub fn serialized_kind(&self, type_id: TypeId) -> Option<ValueKind> {
        self.serializers.get(&type_id).map(|s| s.serialized_kind())
    }

    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.serializers.values().map(|s| s.target_name()))
            .finish()
    }
}

/// Encodes and decodes field values through a [`SerializerRegistry`].
#[derive(Clone, Copy)]
pub struct FieldCodec<'a> {
    registry: &'a SerializerRegistry,
}

impl<'a> FieldCodec<'a> {
    pub fn new(registry: &'a SerializerRegistry) -> Self {
        Self { registry }
    }

    /// Convert a raw field value into a storage value.
    ///
    /// A serializer that returns a different storage class than it declared
    /// only produces a warning; its value is written anyway.
    pub fn encode(&self, raw: Option<&dyn FieldType>, declared: TypeId) -> Value {
        let Some(raw) = raw else {
            return Value::Null;
        };

        if let Some(serializer) = self.registry.serializers.get(&declared) {
            if let Some(value) = serializer.serialize_any(raw.as_any()) {
                let expected = serializer.serialized_kind();
                if !value.is_null() && value.kind() != expected {
                    tracing::warn!(
                        "TypeSerializer returned wrong type: expected a {} but got a {} (serializing {})",
                        expected,
                        value.kind(),
                        serializer.target_name()
                    );
                }
                return value;
            }
        }

        match raw.natural() {
            Natural::Text(text) => Value::Text(text.into_owned()),
            Natural::Enum(name) => Value::Text(name.to_string()),
            Natural::Display(display) => Value::Text(display.to_string()),
        }
    }

    /// Convert a stored value back into a field value; `NULL` yields `None`.
    pub fn decode<T: FieldType>(&self, value: &Value) -> std::result::Result<Option<T>, String> {
        if value.is_null() {
            return Ok(None);
        }

        if let Some(serializer) = self.registry.serializers.get(&TypeId::of::<T>()) {
            let any = serializer.deserialize_any(value)?;
            return any
                .downcast::<T>()
                .map(|v| Some(*v))
                .map_err(|_| format!("serializer for {} produced another type", serializer.target_name()));
        }

        T::from_stored(value).map(Some)
    }

    /// Storage class a field of type `T` is declared with.
    pub fn storage_kind<T: FieldType>(&self) -> ValueKind {
        self.registry
            .serialized_kind(TypeId::of::<T>())
            .unwrap_or_else(T::natural_kind)
    }
}

/// `bool` stored as `0` / `1`
pub struct BoolSerializer;

impl TypeSerializer for BoolSerializer {
    type Target = bool;

    fn serialized_kind(&self) -> ValueKind {
        ValueKind::Integer
    }

    fn serialize(&self, value: &bool) -> Value {
        Value::Integer(i64::from(*value))
    }

    fn deserialize(&self, value: &Value) -> std::result::Result<bool, String> {
        bool::from_stored(value)
    }
}

/// `PathBuf` stored as its (lossy) string form
pub struct PathSerializer;

impl TypeSerializer for PathSerializer {
    type Target = PathBuf;

    fn serialized_kind(&self) -> ValueKind {
        ValueKind::Text
    }

    fn serialize(&self, value: &PathBuf) -> Value {
        Value::Text(value.to_string_lossy().into_owned())
    }

    fn deserialize(&self, value: &Value) -> std::result::Result<PathBuf, String> {
        PathBuf::from_stored(value)
    }
}

/// `SystemTime` stored as milliseconds since the Unix epoch.
///
/// Precision below a millisecond is dropped, so `SystemTime::now()` loads
/// back truncated to the millisecond. Times beyond the `i64` millisecond
/// range are written as `NULL` with a warning.
pub struct SystemTimeSerializer;

impl TypeSerializer for SystemTimeSerializer {
    type Target = SystemTime;

    fn serialized_kind(&self) -> ValueKind {
        ValueKind::Integer
    }

    fn serialize(&self, value: &SystemTime) -> Value {
        match epoch_millis(value) {
            Some(millis) => Value::Integer(millis),
            None => {
                tracing::warn!("{:?} is outside the storable millisecond range, writing NULL", value);
                Value::Null
            }
        }
    }

    fn deserialize(&self, value: &Value) -> std::result::Result<SystemTime, String> {
        let millis = value
            .as_i64()
            .ok_or_else(|| format!("expected epoch millis, got {}", value.kind()))?;
        let offset = Duration::from_millis(millis.unsigned_abs());
        let time = if millis >= 0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        };
        time.ok_or_else(|| format!("{} ms is not representable as a SystemTime", millis))
    }
}

/// `Duration` stored as whole milliseconds. Longer than `i64::MAX` ms is
/// written as `NULL` with a warning.
pub struct DurationSerializer;

impl TypeSerializer for DurationSerializer {
    type Target = Duration;

    fn serialized_kind(&self) -> ValueKind {
        ValueKind::Integer
    }

    fn serialize(&self, value: &Duration) -> Value {
        match whole_millis(value) {
            Some(millis) => Value::Integer(millis),
            None => {
                tracing::warn!("{:?} is outside the storable millisecond range, writing NULL", value);
                Value::Null
            }
        }
    }

    fn deserialize(&self, value: &Value) -> std::result::Result<Duration, String> {
        let millis = value
            .as_i64()
            .filter(|m| *m >= 0)
            .ok_or_else(|| format!("expected non-negative millis, got {}", value))?;
        Ok(Duration::from_millis(millis as u64))
    }
}

/// Any serde type stored as JSON text
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypeSerializer for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    type Target = T;

    fn serialized_kind(&self) -> ValueKind {
        ValueKind::Text
    }

    fn serialize(&self, value: &T) -> Value {
        match serde_json::to_string(value) {
            Ok(json) => Value::Text(json),
            Err(e) => {
                tracing::error!("Failed to serialize {} as JSON: {}", std::any::type_name::<T>(), e);
                Value::Null
            }
        }
    }

    fn deserialize(&self, value: &Value) -> std::result::Result<T, String> {
        let text = value
            .as_str()
            .ok_or_else(|| format!("expected JSON text, got {}", value.kind()))?;
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

//! Bound parameters and the sources they are produced from.

use crate::value::{ToValue, Value, json_to_value};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Whether the value is sent to the server.
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// Whether the value is filled in from the server's response.
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InputOutput | Self::ReturnValue)
    }
}

/// A named value attached to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: Value,
    direction: ParameterDirection,
}

impl Parameter {
    /// Create an input parameter.
    pub fn new(name: impl Into<String>, value: impl ToValue) -> Self {
        Self {
            name: name.into(),
            value: value.to_value(),
            direction: ParameterDirection::Input,
        }
    }

    /// Create an output parameter with a `NULL` placeholder value.
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Null,
            direction: ParameterDirection::Output,
        }
    }

    /// Create an input/output parameter.
    pub fn input_output(name: impl Into<String>, value: impl ToValue) -> Self {
        Self::new(name, value).with_direction(ParameterDirection::InputOutput)
    }

    /// Create a return value parameter.
    pub fn return_value(name: impl Into<String>) -> Self {
        Self::output(name).with_direction(ParameterDirection::ReturnValue)
    }

    /// Override the direction.
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name without the placeholder prefix.
    pub fn logical_name(&self, prefix: char) -> &str {
        self.name.strip_prefix(prefix).unwrap_or(&self.name)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_value(&mut self, value: impl ToValue) {
        self.value = value.to_value();
    }

    pub fn set_direction(&mut self, direction: ParameterDirection) {
        self.direction = direction;
    }
}

// ─── Classification ─────────────────────────────────────────────────────────

/// The shape of a value about to be bound.
///
/// Strings and byte sequences are always `Scalar`; any other sequence is a
/// `List` that the binder expands into one placeholder per element.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl ParamValue {
    pub fn is_list(&self) -> bool {
        matches!(self, ParamValue::List(_))
    }
}

/// Conversion of a property value into a [`ParamValue`].
pub trait ToParam {
    fn to_param(&self) -> ParamValue;
}

macro_rules! impl_scalar_param {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToParam for $ty {
                fn to_param(&self) -> ParamValue {
                    ParamValue::Scalar(self.to_value())
                }
            }
        )*
    };
}

impl_scalar_param!(
    Value,
    bool,
    i8,
    i16,
    i32,
    i64,
    u16,
    u32,
    f32,
    f64,
    str,
    String,
    [u8],
    Vec<u8>,
    bytes::Bytes,
    uuid::Uuid,
    chrono::NaiveDateTime,
    chrono::DateTime<chrono::Utc>,
    chrono::DateTime<chrono::FixedOffset>,
    chrono::NaiveDate,
    chrono::NaiveTime,
);

#[cfg(feature = "rust_decimal")]
impl_scalar_param!(rust_decimal::Decimal);

impl<const N: usize> ToParam for [u8; N] {
    fn to_param(&self) -> ParamValue {
        ParamValue::Scalar(self.to_value())
    }
}

fn list<'a, T, I>(items: I) -> ParamValue
where
    T: ToValue + 'a,
    I: IntoIterator<Item = &'a T>,
{
    ParamValue::List(items.into_iter().map(ToValue::to_value).collect())
}

impl<T: ToValue> ToParam for [T] {
    fn to_param(&self) -> ParamValue {
        list(self)
    }
}

impl<T: ToValue, const N: usize> ToParam for [T; N] {
    fn to_param(&self) -> ParamValue {
        list(self)
    }
}

impl<T: ToValue> ToParam for Vec<T> {
    fn to_param(&self) -> ParamValue {
        list(self)
    }
}

impl<T: ToValue> ToParam for VecDeque<T> {
    fn to_param(&self) -> ParamValue {
        list(self)
    }
}

impl<T: ToValue, S> ToParam for HashSet<T, S> {
    fn to_param(&self) -> ParamValue {
        list(self)
    }
}

impl<T: ToValue> ToParam for BTreeSet<T> {
    fn to_param(&self) -> ParamValue {
        list(self)
    }
}

impl ToParam for serde_json::Value {
    fn to_param(&self) -> ParamValue {
        match self {
            serde_json::Value::Array(items) => {
                ParamValue::List(items.iter().map(json_to_value).collect())
            }
            other => ParamValue::Scalar(json_to_value(other)),
        }
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(&self) -> ParamValue {
        match self {
            Some(v) => v.to_param(),
            None => ParamValue::Scalar(Value::Null),
        }
    }
}

impl<T: ToParam + ?Sized> ToParam for &T {
    fn to_param(&self) -> ParamValue {
        (**self).to_param()
    }
}

// ─── Objects ────────────────────────────────────────────────────────────────

/// A value whose named properties become command parameters.
///
/// Usually derived with `#[derive(ToParams)]`, which yields the fields in
/// declaration order. [`NamedParams`], JSON objects and string-keyed maps
/// work as ad-hoc sources.
pub trait ToParams {
    /// The `(logical name, value)` pairs, in binding order.
    fn to_params(&self) -> Vec<(String, ParamValue)>;
}

impl ToParams for () {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        Vec::new()
    }
}

impl<T: ToParams> ToParams for Option<T> {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        self.as_ref().map(ToParams::to_params).unwrap_or_default()
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        (**self).to_params()
    }
}

impl<T: ToParams + ?Sized> ToParams for Box<T> {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        (**self).to_params()
    }
}

/// Object keys are used in insertion order; any other JSON value binds nothing.
impl ToParams for serde_json::Value {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        match self {
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.to_param()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl<V: ToParam> ToParams for BTreeMap<String, V> {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        self.iter().map(|(k, v)| (k.clone(), v.to_param())).collect()
    }
}

/// An ordered association list of named values.
///
/// # Example
///
/// ```ignore
/// let params = NamedParams::new().add("status", "active").add("ids", vec![1, 2, 3]);
/// // or
/// let params = pgmat::params! { status: "active", ids: vec![1, 2, 3] };
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    entries: Vec<(String, ParamValue)>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named value.
    pub fn add(mut self, name: impl Into<String>, value: impl ToParam) -> Self {
        self.push(name, value);
        self
    }

    /// Append a named value in place.
    pub fn push(&mut self, name: impl Into<String>, value: impl ToParam) -> &mut Self {
        self.entries.push((name.into(), value.to_param()));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ToParams for NamedParams {
    fn to_params(&self) -> Vec<(String, ParamValue)> {
        self.entries.clone()
    }
}

/// Build a [`NamedParams`] list from `name: value` pairs.
#[macro_export]
macro_rules! params {
    () => {
        $crate::NamedParams::new()
    };
    ($($name:ident : $value:expr),+ $(,)?) => {
        $crate::NamedParams::new()$(.add(stringify!($name), $value))+
    };
}

// ─── Sources ────────────────────────────────────────────────────────────────

/// Where a command's parameters come from.
pub enum ParamSource<'a> {
    /// No parameters.
    Empty,
    /// Properties of a borrowed object.
    Object(&'a (dyn ToParams + Sync)),
    /// Properties of an owned object.
    Owned(Box<dyn ToParams + Send + Sync + 'a>),
    /// Already-constructed parameters, bound as-is.
    Parameters(Vec<Parameter>),
}

impl ParamSource<'_> {
    pub fn is_empty(&self) -> bool {
        match self {
            ParamSource::Empty => true,
            ParamSource::Parameters(params) => params.is_empty(),
            ParamSource::Object(_) | ParamSource::Owned(_) => false,
        }
    }
}

impl std::fmt::Debug for ParamSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamSource::Empty => f.write_str("Empty"),
            ParamSource::Object(_) => f.debug_tuple("Object").field(&"<dyn ToParams>").finish(),
            ParamSource::Owned(_) => f.debug_tuple("Owned").field(&"<dyn ToParams>").finish(),
            ParamSource::Parameters(p) => f.debug_tuple("Parameters").field(p).finish(),
        }
    }
}

impl Default for ParamSource<'_> {
    fn default() -> Self {
        ParamSource::Empty
    }
}

impl From<()> for ParamSource<'_> {
    fn from(_: ()) -> Self {
        ParamSource::Empty
    }
}

impl<'a, T: ToParams + Sync> From<&'a T> for ParamSource<'a> {
    fn from(value: &'a T) -> Self {
        ParamSource::Object(value)
    }
}

impl<'a, T: ToParams + Sync> From<Option<&'a T>> for ParamSource<'a> {
    fn from(value: Option<&'a T>) -> Self {
        match value {
            Some(v) => ParamSource::Object(v),
            None => ParamSource::Empty,
        }
    }
}

impl From<NamedParams> for ParamSource<'_> {
    fn from(value: NamedParams) -> Self {
        ParamSource::Owned(Box::new(value))
    }
}

impl From<serde_json::Value> for ParamSource<'_> {
    fn from(value: serde_json::Value) -> Self {
        ParamSource::Owned(Box::new(value))
    }
}

impl From<Vec<Parameter>> for ParamSource<'_> {
    fn from(value: Vec<Parameter>) -> Self {
        ParamSource::Parameters(value)
    }
}

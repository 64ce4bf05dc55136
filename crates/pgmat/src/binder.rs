//! Parameter binding.
//!
//! The binder turns a [`ParamSource`] into named command parameters. Scalar
//! values become one parameter each. Lists are expanded: `ids = [10, 20]`
//! becomes `@ids_0, @ids_1`, and the first `@ids` placeholder in the command
//! text is rewritten to that list, which is what an `IN (@ids)` clause needs.

use crate::command::Command;
use crate::config::DEFAULT_PARAMETER_PREFIX;
use crate::param::{ParamSource, ParamValue, Parameter, ToParam, ToParams};
use crate::placeholder;
use crate::value::Value;

/// Result of classifying a value before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Enumerable,
}

/// Classify a value: sequences are `Enumerable`, while strings, byte
/// sequences and `None` are always `Scalar`.
pub fn classify<T: ToParam + ?Sized>(value: &T) -> ValueKind {
    match value.to_param() {
        ParamValue::Scalar(_) => ValueKind::Scalar,
        ParamValue::List(_) => ValueKind::Enumerable,
    }
}

/// Binds parameter sources onto commands using a fixed placeholder prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBinder {
    prefix: char,
}

impl Default for ParameterBinder {
    fn default() -> Self {
        Self::new(DEFAULT_PARAMETER_PREFIX)
    }
}

impl ParameterBinder {
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Bind a single value as `{prefix}{name}`.
    pub fn bind_scalar(&self, command: &mut Command, name: &str, value: Value) {
        command
            .parameters_mut()
            .push(Parameter::new(self.full_name(name), value));
    }

    /// Bind each element as `{prefix}{name}_{i}` and rewrite the first
    /// `{prefix}{name}` placeholder in the command text to the generated list.
    ///
    /// An empty sequence rewrites the placeholder to `NULL`, keeping
    /// `IN (...)` valid while matching nothing. Only the first occurrence is
    /// rewritten; SQL that repeats the placeholder must repeat the list by hand.
    pub fn bind_enumerable<I>(&self, command: &mut Command, name: &str, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut generated = Vec::new();
        for (i, value) in values.into_iter().enumerate() {
            let item_name = format!("{}{}_{}", self.prefix, name, i);
            command
                .parameters_mut()
                .push(Parameter::new(item_name.clone(), value));
            generated.push(item_name);
        }

        let replacement = if generated.is_empty() {
            "NULL".to_string()
        } else {
            generated.join(", ")
        };

        let placeholder_name = self.full_name(name);
        let rewritten = placeholder::replace_first(
            command.text(),
            self.prefix,
            &placeholder_name,
            &replacement,
        );
        match rewritten {
            Some(text) => command.set_text(text),
            None => tracing::trace!(
                target: "pgmat.bind",
                placeholder = %placeholder_name,
                "list placeholder not found in command text"
            ),
        }
    }

    /// Bind an already classified value.
    pub fn bind_value(&self, command: &mut Command, name: &str, value: ParamValue) {
        match value {
            ParamValue::Scalar(v) => self.bind_scalar(command, name, v),
            ParamValue::List(values) => self.bind_enumerable(command, name, values),
        }
    }

    /// Bind every property of `source` in its declared order. `None` binds
    /// nothing.
    pub fn bind_object(&self, command: &mut Command, source: Option<&dyn ToParams>) {
        let Some(source) = source else {
            return;
        };
        for (name, value) in source.to_params() {
            self.bind_value(command, &name, value);
        }
    }

    /// Attach explicit parameters unchanged, adding the prefix to names that
    /// lack it.
    pub fn bind_parameters<I>(&self, command: &mut Command, parameters: I)
    where
        I: IntoIterator<Item = Parameter>,
    {
        for mut parameter in parameters {
            if !parameter.name().starts_with(self.prefix) {
                let name = self.full_name(parameter.name());
                parameter.set_name(name);
            }
            command.parameters_mut().push(parameter);
        }
    }

    /// Bind any parameter source.
    pub fn bind_source(&self, command: &mut Command, source: ParamSource<'_>) {
        match source {
            ParamSource::Empty => {}
            ParamSource::Object(obj) => self.bind_object(command, Some(obj)),
            ParamSource::Owned(obj) => self.bind_object(command, Some(&*obj)),
            ParamSource::Parameters(params) => self.bind_parameters(command, params),
        }
        tracing::trace!(
            target: "pgmat.bind",
            param_count = command.parameters().len(),
            "parameters bound"
        );
    }
}

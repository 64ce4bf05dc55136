//! SQL fragment builders.
//!
//! [`WhereBuilder`] composes a `WHERE` clause from plain condition strings,
//! parenthesized groups and nested builders. It only assembles text: values
//! stay in named placeholders (`@status`) and are bound by the
//! [`ParameterBinder`](crate::ParameterBinder) when the command is created.

mod where_builder;

pub use where_builder::{IntoCondition, WhereBuilder};

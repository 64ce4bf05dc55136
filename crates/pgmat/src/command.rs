//! Executable commands: SQL text plus bound parameters.

use crate::config::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_PARAMETER_PREFIX};
use crate::error::{OrmError, OrmResult};
use crate::param::Parameter;
use crate::placeholder;
use crate::transaction::Transaction;
use crate::value::Value;
use std::time::Duration;

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Plain SQL with named placeholders.
    #[default]
    Text,
    /// The text is the name of a stored procedure / function; parameters
    /// become its arguments.
    StoredProcedure,
}

/// The ordered parameter list of a [`Command`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterCollection {
    items: Vec<Parameter>,
}

impl ParameterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parameter: Parameter) {
        self.items.push(parameter);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look a parameter up by its full (prefixed) name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.items.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.items.iter_mut().find(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Parameter> {
        self.items.iter_mut()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(Parameter::name).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl std::ops::Index<usize> for ParameterCollection {
    type Output = Parameter;

    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

impl<'a> IntoIterator for &'a ParameterCollection {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for ParameterCollection {
    type Item = Parameter;
    type IntoIter = std::vec::IntoIter<Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A populated, not-yet-executed command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    timeout: Duration,
    transaction: Option<Transaction>,
    parameters: ParameterCollection,
    prefix: char,
}

impl Command {
    /// Create a text command with default timeout and `@` placeholders.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            transaction: None,
            parameters: ParameterCollection::new(),
            prefix: DEFAULT_PARAMETER_PREFIX,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the command timeout. A zero duration is rejected.
    pub fn set_timeout(&mut self, timeout: Duration) -> OrmResult<()> {
        if timeout.is_zero() {
            return Err(OrmError::invalid_argument(
                "command timeout must be greater than zero",
            ));
        }
        self.timeout = timeout;
        Ok(())
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn set_transaction(&mut self, transaction: Option<Transaction>) {
        self.transaction = transaction;
    }

    /// The placeholder prefix used by this command's parameters.
    pub fn prefix(&self) -> char {
        self.prefix
    }

    pub fn set_prefix(&mut self, prefix: char) {
        self.prefix = prefix;
    }

    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Create a detached, unnamed input parameter.
    ///
    /// The parameter is not added to the command; name it and push it onto
    /// [`Command::parameters_mut`].
    pub fn create_parameter(&self) -> Parameter {
        Parameter::new(String::new(), Value::Null)
    }

    /// The command text with every known placeholder replaced by its display
    /// literal. For logs only.
    pub fn to_display_sql(&self) -> String {
        match self.kind {
            CommandKind::Text => placeholder::substitute(&self.text, self.prefix, |name| {
                self.parameters
                    .iter()
                    .find(|p| p.logical_name(self.prefix) == name)
                    .map(|p| p.value().to_display_literal())
            }),
            CommandKind::StoredProcedure => {
                let args: Vec<String> = self
                    .parameters
                    .iter()
                    .filter(|p| p.direction().is_input())
                    .map(|p| {
                        format!(
                            "{} => {}",
                            p.logical_name(self.prefix),
                            p.value().to_display_literal()
                        )
                    })
                    .collect();
                format!("{}({})", self.text, args.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cmd = Command::new("SELECT 1");
        assert_eq!(cmd.text(), "SELECT 1");
        assert_eq!(cmd.kind(), CommandKind::Text);
        assert_eq!(cmd.timeout(), DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(cmd.prefix(), '@');
        assert!(cmd.parameters().is_empty());
        assert!(cmd.transaction().is_none());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cmd = Command::new("SELECT 1");
        let err = cmd.set_timeout(Duration::ZERO).unwrap_err();
        assert!(matches!(err, OrmError::InvalidArgument(_)));
        assert_eq!(cmd.timeout(), DEFAULT_COMMAND_TIMEOUT);

        cmd.set_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(cmd.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn create_parameter_is_detached() {
        let cmd = Command::new("SELECT 1");
        let mut p = cmd.create_parameter();
        p.set_name("@x");
        p.set_value(5);
        assert!(cmd.parameters().is_empty());
        assert_eq!(p.value(), &Value::I32(5));
    }

    #[test]
    fn display_sql_renders_literals() {
        let mut cmd = Command::new("SELECT * FROM t WHERE name = @name AND active = @active");
        cmd.parameters_mut().push(Parameter::new("@name", "bob"));
        cmd.parameters_mut().push(Parameter::new("@active", true));
        assert_eq!(
            cmd.to_display_sql(),
            "SELECT * FROM t WHERE name = 'bob' AND active = 1"
        );
    }

    #[test]
    fn display_sql_for_procedures() {
        let mut cmd = Command::new("get_user");
        cmd.set_kind(CommandKind::StoredProcedure);
        cmd.parameters_mut().push(Parameter::new("@id", 7));
        cmd.parameters_mut().push(Parameter::output("@name"));
        assert_eq!(cmd.to_display_sql(), "get_user(id => 7)");
    }
}

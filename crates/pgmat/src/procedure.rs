//! Stored procedure descriptors and results.
//!
//! Postgres functions are called with named notation:
//! `SELECT * FROM get_user(id => $1)`. `OUT` and `INOUT` arguments come back
//! as columns of the result, so after execution the first row is copied into
//! the command's output parameters.

use crate::command::{Command, ParameterCollection};
use crate::error::{OrmError, OrmResult};
use crate::param::{Parameter, ParameterDirection};
use crate::row::DataTable;
use crate::value::{FromValue, ToValue, Value};

/// A callable database routine.
pub trait Procedure {
    /// Routine name, optionally schema-qualified.
    fn name(&self) -> &str;

    /// Arguments in declaration order, without placeholder prefix.
    fn parameters(&self) -> Vec<Parameter>;
}

/// An ad-hoc [`Procedure`] built argument by argument.
///
/// ```ignore
/// let proc = StoredProcedure::new("transfer")
///     .input("from_id", 1_i64)
///     .input("to_id", 2_i64)
///     .output("balance");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProcedure {
    name: String,
    parameters: Vec<Parameter>,
}

impl StoredProcedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, value: impl ToValue) -> Self {
        self.parameters.push(Parameter::new(name, value));
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::output(name));
        self
    }

    pub fn input_output(mut self, name: impl Into<String>, value: impl ToValue) -> Self {
        self.parameters.push(Parameter::input_output(name, value));
        self
    }

    pub fn return_value(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(Parameter::return_value(name));
        self
    }
}

impl Procedure for StoredProcedure {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Vec<Parameter> {
        self.parameters.clone()
    }
}

fn is_identifier(part: &str) -> bool {
    if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
        let inner = &part[1..part.len() - 1];
        return !inner.is_empty() && !inner.replace("\"\"", "").contains('"');
    }
    let mut chars = part.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

/// Routine names are spliced into SQL: accept `name`, `schema.name` and
/// double-quoted parts only.
pub(crate) fn validate_procedure_name(name: &str) -> OrmResult<()> {
    if !name.is_empty() && name.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(OrmError::invalid_argument(format!(
            "invalid procedure name '{name}'"
        )))
    }
}

/// Render the call statement for a procedure command.
///
/// Returns the SQL and, for each `$n`, the index of the parameter in the
/// command's collection.
pub(crate) fn call_sql(
    name: &str,
    prefix: char,
    parameters: &ParameterCollection,
) -> OrmResult<(String, Vec<usize>)> {
    validate_procedure_name(name)?;

    let mut args = Vec::new();
    let mut order = Vec::new();
    for (idx, param) in parameters.iter().enumerate() {
        if !param.direction().is_input() {
            continue;
        }
        let arg = param.logical_name(prefix);
        if !is_identifier(arg) {
            return Err(OrmError::invalid_argument(format!(
                "invalid argument name '{arg}' for procedure '{name}'"
            )));
        }
        order.push(idx);
        args.push(format!("{arg} => ${}", order.len()));
    }

    Ok((format!("SELECT * FROM {name}({})", args.join(", ")), order))
}

/// Copy output columns of the first row into the command's output parameters.
///
/// `OUT`/`INOUT` parameters read the column with their name. The return value
/// reads its own column when present, else the first column.
pub(crate) fn apply_outputs(command: &mut Command, table: &DataTable) {
    let prefix = command.prefix();
    let first = table.first();
    for param in command.parameters_mut().iter_mut() {
        if !param.direction().is_output() {
            continue;
        }
        let value = first.and_then(|row| {
            let by_name = row.ordinal(param.logical_name(prefix));
            let ordinal = match (param.direction(), by_name) {
                (_, Some(ordinal)) => Some(ordinal),
                (ParameterDirection::ReturnValue, None) if !row.is_empty() => Some(0),
                _ => None,
            };
            ordinal.and_then(|o| row.value(o).ok().cloned())
        });
        param.set_value(value.unwrap_or(Value::Null));
    }
}

/// Rows and output values produced by a procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureResult {
    table: DataTable,
    parameters: ParameterCollection,
    prefix: char,
}

impl ProcedureResult {
    pub(crate) fn new(table: DataTable, command: &Command) -> Self {
        Self {
            table,
            parameters: command.parameters().clone(),
            prefix: command.prefix(),
        }
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn into_table(self) -> DataTable {
        self.table
    }

    /// All parameters after execution, outputs filled in.
    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    /// Value of an output, in-out or return parameter, by name without prefix.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.direction().is_output() && p.logical_name(self.prefix) == name)
            .map(Parameter::value)
    }

    /// Typed value of an output parameter.
    pub fn get<T: FromValue>(&self, name: &str) -> OrmResult<T> {
        let value = self
            .output(name)
            .ok_or_else(|| OrmError::not_found(format!("output parameter '{name}'")))?;
        T::from_value(value).map_err(|e| OrmError::decode(name, e.to_string()))
    }

    /// The return value, if the procedure declared one.
    pub fn return_value(&self) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.direction() == ParameterDirection::ReturnValue)
            .map(Parameter::value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    fn proc_command() -> Command {
        let mut cmd = Command::new("transfer");
        cmd.set_kind(CommandKind::StoredProcedure);
        cmd.parameters_mut().push(Parameter::new("@from_id", 1_i64));
        cmd.parameters_mut().push(Parameter::output("@balance"));
        cmd.parameters_mut().push(Parameter::input_output("@note", "x"));
        cmd.parameters_mut().push(Parameter::return_value("@status"));
        cmd
    }

    #[test]
    fn call_sql_uses_named_notation_for_inputs() {
        let cmd = proc_command();
        let (sql, order) = call_sql(cmd.text(), '@', cmd.parameters()).unwrap();
        assert_eq!(sql, "SELECT * FROM transfer(from_id => $1, note => $2)");
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn call_sql_without_arguments() {
        let (sql, order) = call_sql("public.now_utc", '@', &ParameterCollection::new()).unwrap();
        assert_eq!(sql, "SELECT * FROM public.now_utc()");
        assert!(order.is_empty());
    }

    #[test]
    fn procedure_names_are_validated() {
        assert!(validate_procedure_name("get_user").is_ok());
        assert!(validate_procedure_name("app.\"Get User\"").is_ok());
        assert!(validate_procedure_name("").is_err());
        assert!(validate_procedure_name("x(); DROP TABLE t; --").is_err());
        assert!(validate_procedure_name("a..b").is_err());
    }

    #[test]
    fn outputs_are_read_from_first_row() {
        let mut cmd = proc_command();
        let table = DataTable::new(["Balance", "note", "result"])
            .with_row(vec![Value::I64(90), Value::Text("done".into()), Value::I32(0)])
            .unwrap();
        apply_outputs(&mut cmd, &table);

        let result = ProcedureResult::new(table, &cmd);
        assert_eq!(result.get::<i64>("balance").unwrap(), 90);
        assert_eq!(result.get::<String>("note").unwrap(), "done");
        assert_eq!(result.return_value(), Some(&Value::I64(90)));
        assert!(result.output("from_id").is_none());
        assert!(result.get::<i64>("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn outputs_are_null_without_rows() {
        let mut cmd = proc_command();
        let table = DataTable::new(["balance"]);
        apply_outputs(&mut cmd, &table);
        let result = ProcedureResult::new(table, &cmd);
        assert_eq!(result.output("balance"), Some(&Value::Null));
        assert_eq!(result.get::<Option<i64>>("balance").unwrap(), None);
    }

    #[test]
    fn stored_procedure_builder_keeps_order() {
        let p = StoredProcedure::new("f").input("a", 1).output("b").return_value("r");
        let dirs: Vec<_> = p.parameters().iter().map(Parameter::direction).collect();
        assert_eq!(
            dirs,
            vec![
                ParameterDirection::Input,
                ParameterDirection::Output,
                ParameterDirection::ReturnValue
            ]
        );
        assert_eq!(p.name(), "f");
    }
}

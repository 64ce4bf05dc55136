//! Transaction handles and the control statements behind them.
//!
//! A [`Transaction`] is a lightweight token for the transaction currently open
//! on a materializer's connection. Commands carry it so that a command built
//! for one transaction cannot run inside another.

use crate::error::{OrmError, OrmResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for transaction ids.
static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Handle to an open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
    isolation_level: IsolationLevel,
    read_only: bool,
}

impl Transaction {
    pub(crate) fn new(isolation_level: IsolationLevel, read_only: bool) -> Self {
        Self {
            id: TRANSACTION_COUNTER.fetch_add(1, Ordering::Relaxed),
            isolation_level,
            read_only,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn begin_sql(&self) -> String {
        let mut sql = format!("BEGIN ISOLATION LEVEL {}", self.isolation_level.as_sql());
        if self.read_only {
            sql.push_str(" READ ONLY");
        }
        sql
    }
}

pub(crate) const COMMIT_SQL: &str = "COMMIT";
pub(crate) const ROLLBACK_SQL: &str = "ROLLBACK";

/// Savepoint names are spliced into SQL, so they must be plain identifiers:
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn validate_savepoint_name(name: &str) -> OrmResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(OrmError::invalid_argument(format!(
            "invalid savepoint name '{name}'"
        )))
    }
}

pub(crate) fn savepoint_sql(name: &str) -> OrmResult<String> {
    validate_savepoint_name(name)?;
    Ok(format!("SAVEPOINT {name}"))
}

pub(crate) fn rollback_to_savepoint_sql(name: &str) -> OrmResult<String> {
    validate_savepoint_name(name)?;
    Ok(format!("ROLLBACK TO SAVEPOINT {name}"))
}

pub(crate) fn release_savepoint_sql(name: &str) -> OrmResult<String> {
    validate_savepoint_name(name)?;
    Ok(format!("RELEASE SAVEPOINT {name}"))
}

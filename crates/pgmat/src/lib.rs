//! # pgmat
//!
//! A lightweight PostgreSQL materializer for Rust.
//!
//! ## Features
//!
//! - **Named parameters**: write `@name` placeholders; values come from a
//!   `#[derive(ToParams)]` struct, a `params!` list or a JSON object
//! - **`IN` expansion**: a sequence bound to `@ids` becomes `@ids_0, @ids_1, ...`
//! - **WHERE composition**: [`WhereBuilder`] assembles AND/OR/NOT groups from
//!   plain condition strings
//! - **Typed mapping**: Row → Struct via the `FromRow` trait
//! - **Transactions**: isolation levels, read-only transactions and savepoints,
//!   with commands checked against the active transaction
//! - **Stored procedures**: named-argument calls with `OUT`/`INOUT` values
//!
//! ## Example
//!
//! ```ignore
//! use pgmat::prelude::*;
//!
//! #[derive(FromRow)]
//! struct User {
//!     id: i64,
//!     username: String,
//! }
//!
//! #[derive(ToParams)]
//! struct Filter {
//!     ids: Vec<i64>,
//!     status: String,
//! }
//!
//! let db = Materializer::connect("postgres://localhost/app").await?;
//!
//! let mut filter_sql = WhereBuilder::new();
//! filter_sql.where_("id IN (@ids)").and("status = @status");
//!
//! let users: Vec<User> = db
//!     .query_as(
//!         &format!("SELECT id, username FROM users {}", filter_sql.build()),
//!         &Filter { ids: vec![1, 2, 3], status: "active".into() },
//!     )
//!     .await?;
//! ```

pub mod binder;
pub mod builder;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod materializer;
pub mod param;
pub mod placeholder;
pub mod prelude;
pub mod procedure;
pub mod row;
pub mod transaction;
pub mod value;

pub use binder::{ParameterBinder, ValueKind, classify};
pub use builder::{IntoCondition, WhereBuilder};
pub use command::{Command, CommandKind, ParameterCollection};
pub use config::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_PARAMETER_PREFIX, MaterializerConfig};
pub use connection::{Connection, ConnectionState, PgConnection};
pub use error::{OrmError, OrmResult};
pub use materializer::Materializer;
pub use param::{
    NamedParams, ParamSource, ParamValue, Parameter, ParameterDirection, ToParam, ToParams,
};
pub use procedure::{Procedure, ProcedureResult, StoredProcedure};
pub use row::{DataReader, DataRow, DataTable, FromRow};
pub use transaction::{IsolationLevel, Transaction};
pub use value::{ConversionError, FromValue, ToValue, Value};

#[cfg(feature = "derive")]
pub use pgmat_derive::{FromRow, ToParams};

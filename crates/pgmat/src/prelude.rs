//! Convenient imports for typical `pgmat` usage.
//!
//! ```ignore
//! use pgmat::prelude::*;
//! ```

pub use crate::{
    CommandKind, FromRow, IsolationLevel, Materializer, MaterializerConfig, OrmError, OrmResult,
    PgConnection, StoredProcedure, ToParams, WhereBuilder, params,
};
pub use crate::{Connection, Procedure};

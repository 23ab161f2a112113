//! # SQL Text Handling
//!
//! Dialect-aware splitting of submitted SQL content into statements. The
//! statements are bound as a process variable when a database-change flow is
//! created.

pub mod splitter;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use splitter::{split_sql, SqlSplitter};

/// Dialect of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlDialect {
    #[default]
    MySql,
    Oracle,
    PostgreSql,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql => write!(f, "MYSQL"),
            Self::Oracle => write!(f, "ORACLE"),
            Self::PostgreSql => write!(f, "POSTGRE_SQL"),
        }
    }
}

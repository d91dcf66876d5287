use std::fmt::Debug;

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Errors returned by the closure-forest APIs.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error("closure-forest supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("failed to build closure statement: {0}")]
    Query(#[from] sea_orm::sea_query::error::Error),

    #[error("{0} is already registered in the hierarchy")]
    Duplicate(String),

    #[error("cannot place {node} under {parent}: {node} would become its own ancestor")]
    Cycle { node: String, parent: String },

    #[error("{0} already has a parent; reparent it instead")]
    AlreadyAttached(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("path cannot be empty")]
    EmptyPath,

    #[error("closure-forest invariant violation: {0}")]
    Invariant(String),
}

impl ForestError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    pub(crate) fn not_found(entity: &str, id: &impl Debug) -> Self {
        Self::NotFound(format!("{entity} {id:?}"))
    }

    pub(crate) fn duplicate(entity: &str, id: &impl Debug) -> Self {
        Self::Duplicate(format!("{entity} {id:?}"))
    }

    pub(crate) fn already_attached(entity: &str, id: &impl Debug) -> Self {
        Self::AlreadyAttached(format!("{entity} {id:?}"))
    }

    pub(crate) fn cycle(entity: &str, node: &impl Debug, parent: &impl Debug) -> Self {
        Self::Cycle {
            node: format!("{entity} {node:?}"),
            parent: format!("{entity} {parent:?}"),
        }
    }

    /// Maps constraint violations raised by the host table to `Validation`,
    /// everything else stays a database error.
    pub(crate) fn from_record_write(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail))
            | Some(SqlErr::ForeignKeyConstraintViolation(detail)) => Self::Validation(detail),
            _ => Self::Database(err),
        }
    }

    /// Replaces a unique violation on a hierarchy write with `Duplicate`.
    pub(crate) fn or_duplicate(self, entity: &str, id: &impl Debug) -> Self {
        match &self {
            Self::Database(err)
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
            {
                Self::duplicate(entity, id)
            }
            _ => self,
        }
    }

    /// True for the hierarchy-rule violations (as opposed to storage failures).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Duplicate(_) | Self::Cycle { .. } | Self::AlreadyAttached(_) | Self::EmptyPath
        )
    }
}

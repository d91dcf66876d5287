//! Closure-table forests for SeaORM entities.
//!
//! Every node gets a self row in the hierarchy table plus one row per proper
//! ancestor, so ancestor, descendant, root, leaf and path queries are plain
//! index lookups. There is no parent column: parenthood is the
//! `generations = 1` row. Structural changes (create, reparent, destroy) each
//! run in a single transaction. PostgreSQL and SQLite are supported.
//!
//! ```ignore
//! let forest = Forest::<tag::Model>::new();
//! let leaf = forest.find_or_create_by_path(&db, &["a", "b", "c"]).await?;
//! assert_eq!(forest.ancestry_path(&db, &leaf).await?, ["a", "b", "c"]);
//! ```

pub mod closure_store;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod record_store;
pub mod repository;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{
        AdvisoryLockStrategy, ForestConfig, ForestOptions, OrderStrategy, OrphanPolicy,
    };
    pub use crate::error::ForestError;
    pub use crate::repository::Forest;
    pub use crate::traits::ForestModel;
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}

pub use closure_forest_macros::ForestModel as ForestModelDerive;
#[doc(hidden)]
pub use closure_forest_macros::ForestModel;
pub use closure_store::{ClosureRow, ClosureStore};
pub use config::{
    AdvisoryLockKey, AdvisoryLockStrategy, ForestConfig, ForestOptions, OrderStrategy,
    OrphanPolicy,
};
pub use engine::HierarchyEngine;
pub use error::ForestError;
pub use record_store::RecordStore;
pub use repository::Forest;
pub use traits::ForestModel;

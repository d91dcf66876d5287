use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, Statement, TransactionTrait, Value,
};

use crate::config::AdvisoryLockStrategy;
use crate::error::ForestError;

/// A transaction wrapping one structural change.
///
/// On PostgreSQL a transaction-scoped advisory lock is taken right after
/// `BEGIN`, so it is released by the commit or rollback itself. Other backends
/// rely on the transaction alone. Dropping the guard without finishing it rolls
/// back.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
}

impl LockedTransaction {
    pub async fn acquire<C>(strategy: &AdvisoryLockStrategy, db: &C) -> Result<Self, ForestError>
    where
        C: TransactionTrait,
    {
        let txn = db.begin().await?;

        if txn.get_database_backend() == DbBackend::Postgres {
            if let Some(key) = strategy.key() {
                if let Err(err) = acquire_lock(&txn, key.as_str()).await {
                    let _ = txn.rollback().await;
                    return Err(err);
                }
            }
        }

        Ok(Self { txn })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), ForestError> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), ForestError> {
        self.txn.rollback().await?;
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`, and hand the result through.
    pub async fn finish<T>(self, result: Result<T, ForestError>) -> Result<T, ForestError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, "rolling back hierarchy change");
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ForestError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}

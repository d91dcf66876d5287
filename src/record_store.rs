//! Host-table access: the CRUD and filtered lookups the engine needs.

use std::collections::HashMap;
use std::marker::PhantomData;

use sea_orm::sea_query::{Expr, IntoCondition};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Select,
};

use crate::config::{ForestConfig, OrderStrategy};
use crate::error::ForestError;
use crate::traits::ForestModel;

pub struct RecordStore<M>
where
    M: ForestModel,
{
    config: &'static ForestConfig,
    _marker: PhantomData<M>,
}

impl<M> RecordStore<M>
where
    M: ForestModel,
{
    pub fn new(config: &'static ForestConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    /// Apply the configured order strategy, then the id as tie-break.
    pub fn ordered(&self, mut query: Select<M::Entity>) -> Select<M::Entity> {
        match self.config.order_strategy() {
            OrderStrategy::Insertion => {}
            OrderStrategy::Key => {
                query = query.order_by_asc(M::key_column());
            }
            OrderStrategy::NumericColumn { column } => {
                query = query.order_by_asc(Expr::cust(column.clone()));
            }
        }
        query.order_by_asc(M::id_column())
    }

    /// Insert a record. Blank keys and host constraint violations surface as
    /// [`ForestError::Validation`].
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        active: M::ActiveModel,
    ) -> Result<M, ForestError> {
        let model = active
            .insert(conn)
            .await
            .map_err(ForestError::from_record_write)?;
        if model.key().trim().is_empty() {
            return Err(ForestError::validation(format!(
                "{} {} must not be blank",
                self.config.entity_name(),
                self.config.key_column()
            )));
        }
        Ok(model)
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M>, ForestError> {
        let model = M::Entity::find()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .one(conn)
            .await?;
        Ok(model)
    }

    pub async fn require<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<M, ForestError> {
        self.find(conn, id)
            .await?
            .ok_or_else(|| ForestError::not_found(self.config.entity_name(), id))
    }

    pub async fn first_where<C, F>(&self, conn: &C, condition: F) -> Result<Option<M>, ForestError>
    where
        C: ConnectionTrait,
        F: IntoCondition,
    {
        let model = self
            .ordered(M::Entity::find().filter(condition))
            .one(conn)
            .await?;
        Ok(model)
    }

    pub async fn all_where<C, F>(&self, conn: &C, condition: F) -> Result<Vec<M>, ForestError>
    where
        C: ConnectionTrait,
        F: IntoCondition,
    {
        let models = self
            .ordered(M::Entity::find().filter(condition))
            .all(conn)
            .await?;
        Ok(models)
    }

    /// Records for `ids`, in configured order.
    pub async fn find_many<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[M::Id],
    ) -> Result<Vec<M>, ForestError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let values = ids.iter().map(M::id_to_value).collect::<Vec<_>>();
        self.all_where(conn, M::id_column().is_in(values)).await
    }

    /// Records for `ids`, in exactly the order given. A closure row pointing at
    /// a missing record is reported as an invariant violation.
    pub async fn find_in_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[M::Id],
    ) -> Result<Vec<M>, ForestError> {
        let mut by_id: HashMap<M::Id, M> = self
            .find_many(conn, ids)
            .await?
            .into_iter()
            .map(|model| (model.id(), model))
            .collect();

        ids.iter()
            .map(|id| {
                by_id.remove(id).ok_or_else(|| {
                    ForestError::invariant(format!(
                        "closure row references missing {} {id:?}",
                        self.config.entity_name()
                    ))
                })
            })
            .collect()
    }

    pub async fn delete<C: ConnectionTrait>(&self, conn: &C, id: &M::Id) -> Result<(), ForestError> {
        let result = M::Entity::delete_many()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ForestError::not_found(self.config.entity_name(), id));
        }
        Ok(())
    }

    pub async fn count<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ForestError> {
        Ok(M::Entity::find().count(conn).await?)
    }

    pub async fn all<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ForestError> {
        let models = self.ordered(M::Entity::find()).all(conn).await?;
        Ok(models)
    }
}

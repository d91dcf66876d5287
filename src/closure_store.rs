//! Persistence of `(ancestor, descendant, generations)` rows.
//!
//! The table and column names come from [`ForestConfig`], so statements are
//! built with sea-query against aliases rather than a generated entity.

use std::marker::PhantomData;

use sea_orm::sea_query::{
    Alias, Asterisk, Cond, DeleteStatement, Expr, Order, Query, SelectStatement, SimpleExpr,
};
use sea_orm::{ConnectionTrait, QueryResult, Value};
use serde::Serialize;

use crate::config::ForestConfig;
use crate::error::ForestError;
use crate::traits::ForestModel;

/// One reachability fact: `ancestor` reaches `descendant` in `generations` edges.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ClosureRow<I> {
    pub ancestor: I,
    pub descendant: I,
    pub generations: i32,
}

impl<I: PartialEq> ClosureRow<I> {
    pub fn new(ancestor: I, descendant: I, generations: i32) -> Self {
        Self {
            ancestor,
            descendant,
            generations,
        }
    }

    pub fn is_self_link(&self) -> bool {
        self.generations == 0 && self.ancestor == self.descendant
    }
}

pub struct ClosureStore<M>
where
    M: ForestModel,
{
    config: &'static ForestConfig,
    _marker: PhantomData<M>,
}

impl<M> ClosureStore<M>
where
    M: ForestModel,
{
    pub fn new(config: &'static ForestConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }

    fn table(&self) -> Alias {
        Alias::new(self.config.hierarchy_table())
    }

    fn ancestor(&self) -> Alias {
        Alias::new(self.config.ancestor_column())
    }

    fn descendant(&self) -> Alias {
        Alias::new(self.config.descendant_column())
    }

    fn generations(&self) -> Alias {
        Alias::new(self.config.generations_column())
    }

    fn value(id: &M::Id) -> Value {
        M::id_to_value(id)
    }

    fn values(ids: &[M::Id]) -> Vec<Value> {
        ids.iter().map(Self::value).collect()
    }

    fn select_rows(&self) -> SelectStatement {
        Query::select()
            .columns([self.ancestor(), self.descendant(), self.generations()])
            .from(self.table())
            .to_owned()
    }

    async fn fetch<C: ConnectionTrait>(
        &self,
        conn: &C,
        stmt: &SelectStatement,
    ) -> Result<Vec<ClosureRow<M::Id>>, ForestError> {
        let backend = conn.get_database_backend();
        let rows = conn.query_all(backend.build(stmt)).await?;
        rows.iter().map(|row| self.decode(row)).collect()
    }

    fn decode(&self, row: &QueryResult) -> Result<ClosureRow<M::Id>, ForestError> {
        Ok(ClosureRow {
            ancestor: row.try_get("", self.config.ancestor_column())?,
            descendant: row.try_get("", self.config.descendant_column())?,
            generations: row.try_get("", self.config.generations_column())?,
        })
    }

    async fn delete<C: ConnectionTrait>(
        &self,
        conn: &C,
        stmt: &DeleteStatement,
    ) -> Result<u64, ForestError> {
        let backend = conn.get_database_backend();
        let result = conn.execute(backend.build(stmt)).await?;
        Ok(result.rows_affected())
    }

    /// Bulk insert. Empty input is a no-op.
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: &[ClosureRow<M::Id>],
    ) -> Result<(), ForestError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut stmt = Query::insert();
        stmt.into_table(self.table())
            .columns([self.ancestor(), self.descendant(), self.generations()]);
        for row in rows {
            stmt.values([
                SimpleExpr::Value(Self::value(&row.ancestor)),
                SimpleExpr::Value(Self::value(&row.descendant)),
                SimpleExpr::Value(Value::from(row.generations)),
            ])?;
        }

        let backend = conn.get_database_backend();
        conn.execute(backend.build(&stmt)).await?;
        Ok(())
    }

    /// Insert `(id, id, 0)`. A primary-key conflict means another writer
    /// initialized the node first and is reported as `Duplicate`.
    pub async fn insert_self_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<(), ForestError> {
        self.insert(conn, &[ClosureRow::new(id.clone(), id.clone(), 0)])
            .await
            .map_err(|err| err.or_duplicate(self.config.entity_name(), id))
    }

    pub async fn has_self_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<bool, ForestError> {
        let stmt = self
            .select_rows()
            .and_where(Expr::col(self.ancestor()).eq(Self::value(id)))
            .and_where(Expr::col(self.descendant()).eq(Self::value(id)))
            .and_where(Expr::col(self.generations()).eq(0))
            .to_owned();
        Ok(!self.fetch(conn, &stmt).await?.is_empty())
    }

    /// Rows where `id` is the descendant, farthest ancestor first.
    pub async fn ancestors<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        include_self: bool,
    ) -> Result<Vec<ClosureRow<M::Id>>, ForestError> {
        let mut stmt = self
            .select_rows()
            .and_where(Expr::col(self.descendant()).eq(Self::value(id)))
            .order_by(self.generations(), Order::Desc)
            .to_owned();
        if !include_self {
            stmt.and_where(Expr::col(self.generations()).gt(0));
        }
        self.fetch(conn, &stmt).await
    }

    /// Rows where `id` is the ancestor, nearest generation first, ties by id.
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        include_self: bool,
    ) -> Result<Vec<ClosureRow<M::Id>>, ForestError> {
        let mut stmt = self
            .select_rows()
            .and_where(Expr::col(self.ancestor()).eq(Self::value(id)))
            .order_by(self.generations(), Order::Asc)
            .order_by(self.descendant(), Order::Asc)
            .to_owned();
        if !include_self {
            stmt.and_where(Expr::col(self.generations()).gt(0));
        }
        self.fetch(conn, &stmt).await
    }

    pub async fn child_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M::Id>, ForestError> {
        let stmt = self
            .select_rows()
            .and_where(Expr::col(self.ancestor()).eq(Self::value(id)))
            .and_where(Expr::col(self.generations()).eq(1))
            .order_by(self.descendant(), Order::Asc)
            .to_owned();
        let rows = self.fetch(conn, &stmt).await?;
        Ok(rows.into_iter().map(|row| row.descendant).collect())
    }

    pub async fn parent_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M::Id>, ForestError> {
        let stmt = self
            .select_rows()
            .and_where(Expr::col(self.descendant()).eq(Self::value(id)))
            .and_where(Expr::col(self.generations()).eq(1))
            .to_owned();
        let mut rows = self.fetch(conn, &stmt).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop().map(|row| row.ancestor)),
            n => Err(ForestError::invariant(format!(
                "{} {id:?} has {n} parent rows",
                self.config.entity_name()
            ))),
        }
    }

    /// Every row touching `id` on either side.
    pub async fn rows_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<ClosureRow<M::Id>>, ForestError> {
        let stmt = self
            .select_rows()
            .cond_where(
                Cond::any()
                    .add(Expr::col(self.ancestor()).eq(Self::value(id)))
                    .add(Expr::col(self.descendant()).eq(Self::value(id))),
            )
            .order_by(self.ancestor(), Order::Asc)
            .order_by(self.descendant(), Order::Asc)
            .to_owned();
        self.fetch(conn, &stmt).await
    }

    pub async fn all_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<Vec<ClosureRow<M::Id>>, ForestError> {
        let stmt = self
            .select_rows()
            .order_by(self.ancestor(), Order::Asc)
            .order_by(self.descendant(), Order::Asc)
            .to_owned();
        self.fetch(conn, &stmt).await
    }

    pub async fn count<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ForestError> {
        let stmt = Query::select()
            .expr_as(Expr::col(Asterisk).count(), Alias::new("row_count"))
            .from(self.table())
            .to_owned();
        let backend = conn.get_database_backend();
        let row = conn
            .query_one(backend.build(&stmt))
            .await?
            .ok_or_else(|| ForestError::invariant("COUNT(*) returned no row"))?;
        let count: i64 = row.try_get("", "row_count")?;
        Ok(count.max(0) as u64)
    }

    /// Delete every row whose ancestor or descendant is one of `ids`.
    pub async fn delete_touching<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[M::Id],
    ) -> Result<u64, ForestError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let stmt = Query::delete()
            .from_table(self.table())
            .cond_where(
                Cond::any()
                    .add(Expr::col(self.ancestor()).is_in(Self::values(ids)))
                    .add(Expr::col(self.descendant()).is_in(Self::values(ids))),
            )
            .to_owned();
        self.delete(conn, &stmt).await
    }

    /// Delete the rows linking any of `ancestors` to any of `descendants`.
    pub async fn delete_links<C: ConnectionTrait>(
        &self,
        conn: &C,
        ancestors: &[M::Id],
        descendants: &[M::Id],
    ) -> Result<u64, ForestError> {
        if ancestors.is_empty() || descendants.is_empty() {
            return Ok(0);
        }
        let stmt = Query::delete()
            .from_table(self.table())
            .cond_where(
                Cond::all()
                    .add(Expr::col(self.ancestor()).is_in(Self::values(ancestors)))
                    .add(Expr::col(self.descendant()).is_in(Self::values(descendants))),
            )
            .to_owned();
        self.delete(conn, &stmt).await
    }

    /// `SELECT descendant WHERE generations > 0`: every node that has a parent.
    pub fn attached_ids_query(&self) -> SelectStatement {
        Query::select()
            .column(self.descendant())
            .from(self.table())
            .and_where(Expr::col(self.generations()).gt(0))
            .to_owned()
    }

    /// `SELECT ancestor WHERE generations > 0`: every node that has a child.
    pub fn parent_ids_query(&self) -> SelectStatement {
        Query::select()
            .column(self.ancestor())
            .from(self.table())
            .and_where(Expr::col(self.generations()).gt(0))
            .to_owned()
    }

    /// `SELECT descendant WHERE ancestor = id AND generations = 1`.
    pub fn child_ids_query(&self, id: &M::Id) -> SelectStatement {
        Query::select()
            .column(self.descendant())
            .from(self.table())
            .and_where(Expr::col(self.ancestor()).eq(Self::value(id)))
            .and_where(Expr::col(self.generations()).eq(1))
            .to_owned()
    }
}

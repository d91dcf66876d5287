//! Closure-table maintenance.
//!
//! Every structural change runs inside one [`LockedTransaction`]: reads first,
//! then deletes, then inserts. Public mutators accept anything that can open a
//! transaction, so callers may pass a `DatabaseConnection` or their own
//! `DatabaseTransaction` (which nests as a savepoint). Read-only queries accept
//! any connection.

use std::collections::{HashMap, HashSet};

use sea_orm::sea_query::Condition;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, TransactionTrait};

use crate::closure_store::{ClosureRow, ClosureStore};
use crate::config::{ForestConfig, OrphanPolicy};
use crate::error::ForestError;
use crate::lock::LockedTransaction;
use crate::record_store::RecordStore;
use crate::traits::ForestModel;

pub struct HierarchyEngine<M>
where
    M: ForestModel,
{
    config: &'static ForestConfig,
    closure: ClosureStore<M>,
    records: RecordStore<M>,
}

impl<M> Default for HierarchyEngine<M>
where
    M: ForestModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> HierarchyEngine<M>
where
    M: ForestModel,
{
    pub fn new() -> Self {
        let config = M::forest_config();
        Self {
            config,
            closure: ClosureStore::new(config),
            records: RecordStore::new(config),
        }
    }

    pub fn config(&self) -> &'static ForestConfig {
        self.config
    }

    pub fn closure_store(&self) -> &ClosureStore<M> {
        &self.closure
    }

    pub fn record_store(&self) -> &RecordStore<M> {
        &self.records
    }

    pub(crate) fn ensure_supported(conn: &impl ConnectionTrait) -> Result<(), ForestError> {
        match conn.get_database_backend() {
            DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
            _ => Err(ForestError::UnsupportedBackend),
        }
    }

    async fn begin<C>(&self, db: &C) -> Result<LockedTransaction, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        Self::ensure_supported(db)?;
        LockedTransaction::acquire(self.config.advisory_lock_strategy(), db).await
    }

    fn entity(&self) -> &str {
        self.config.entity_name()
    }

    // ---- structural changes -------------------------------------------------

    /// Write the self row `(id, id, 0)` for a record created outside the engine.
    pub async fn initialize<C>(&self, db: &C, id: &M::Id) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let guard = self.begin(db).await?;
        let result: Result<(), ForestError> = async {
            self.records.require(guard.connection(), id).await?;
            self.initialize_on(guard.connection(), id).await
        }
        .await;
        guard.finish(result).await
    }

    /// Place the root `id` (and its subtree) under `parent_id`.
    pub async fn attach<C>(&self, db: &C, id: &M::Id, parent_id: &M::Id) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let guard = self.begin(db).await?;
        let result = self.attach_on(guard.connection(), id, parent_id).await;
        guard.finish(result).await
    }

    /// Move `id` with its subtree under `new_parent`, or make it a root.
    pub async fn reparent<C>(
        &self,
        db: &C,
        id: &M::Id,
        new_parent: Option<&M::Id>,
    ) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let guard = self.begin(db).await?;
        let result = self.reparent_on(guard.connection(), id, new_parent).await;
        guard.finish(result).await
    }

    /// Remove `id` (rows and record), handling its children per `policy`.
    pub async fn detach<C>(&self, db: &C, id: &M::Id, policy: OrphanPolicy) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let guard = self.begin(db).await?;
        let result = self.detach_on(guard.connection(), id, policy).await;
        guard.finish(result).await
    }

    /// Insert a record and link it under `parent_id` (or as a root) atomically.
    pub async fn create<C>(
        &self,
        db: &C,
        active: M::ActiveModel,
        parent_id: Option<&M::Id>,
    ) -> Result<M, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let guard = self.begin(db).await?;
        let result = self.create_on(guard.connection(), active, parent_id).await;
        guard.finish(result).await
    }

    pub async fn find_or_create_by_path<C, S>(&self, db: &C, keys: &[S]) -> Result<M, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
        S: AsRef<str>,
    {
        if keys.is_empty() {
            return Err(ForestError::EmptyPath);
        }

        let guard = self.begin(db).await?;
        let result = self.find_or_create_by_path_on(guard.connection(), keys).await;
        guard.finish(result).await
    }

    async fn initialize_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<(), ForestError> {
        if self.closure.has_self_link(conn, id).await? {
            return Err(ForestError::duplicate(self.entity(), id));
        }
        self.closure.insert_self_link(conn, id).await?;
        tracing::debug!(node = ?id, table = self.config.hierarchy_table(), "initialized node");
        Ok(())
    }

    async fn attach_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        parent_id: &M::Id,
    ) -> Result<(), ForestError> {
        self.records.require(conn, id).await?;
        self.records.require(conn, parent_id).await?;

        if !self.closure.ancestors(conn, id, false).await?.is_empty() {
            return Err(ForestError::already_attached(self.entity(), id));
        }
        self.link_subtree(conn, id, parent_id).await
    }

    async fn reparent_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        new_parent: Option<&M::Id>,
    ) -> Result<(), ForestError> {
        self.records.require(conn, id).await?;
        if let Some(parent_id) = new_parent {
            self.records.require(conn, parent_id).await?;
            self.ensure_acyclic(conn, id, parent_id).await?;
        }

        let stripped = self.strip_ancestry(conn, id).await?;
        tracing::debug!(
            node = ?id,
            parent = ?new_parent,
            stripped,
            table = self.config.hierarchy_table(),
            "reparenting node"
        );

        match new_parent {
            Some(parent_id) => self.link_subtree(conn, id, parent_id).await,
            None => Ok(()),
        }
    }

    async fn detach_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        policy: OrphanPolicy,
    ) -> Result<(), ForestError> {
        self.records.require(conn, id).await?;

        match policy {
            OrphanPolicy::Cascade => {
                let subtree: Vec<M::Id> = self
                    .closure
                    .descendants(conn, id, true)
                    .await?
                    .into_iter()
                    .map(|row| row.descendant)
                    .collect();
                // A node without a self row still owns its record.
                let subtree = if subtree.is_empty() {
                    vec![id.clone()]
                } else {
                    subtree
                };

                let removed = self.closure.delete_touching(conn, &subtree).await?;
                for victim in subtree.iter().rev() {
                    self.records.delete(conn, victim).await?;
                }
                tracing::debug!(
                    node = ?id,
                    ?policy,
                    records = subtree.len(),
                    rows = removed,
                    "destroyed subtree"
                );
            }
            OrphanPolicy::PromoteChildrenToRoot => {
                let children = self.closure.child_ids(conn, id).await?;
                for child in &children {
                    self.strip_ancestry(conn, child).await?;
                }

                let removed = self.closure.delete_touching(conn, &[id.clone()]).await?;
                self.records.delete(conn, id).await?;
                tracing::debug!(
                    node = ?id,
                    ?policy,
                    promoted = children.len(),
                    rows = removed,
                    "destroyed node"
                );
            }
        }
        Ok(())
    }

    async fn create_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        active: M::ActiveModel,
        parent_id: Option<&M::Id>,
    ) -> Result<M, ForestError> {
        if let Some(parent_id) = parent_id {
            self.records.require(conn, parent_id).await?;
        }

        let model = self.records.create(conn, active).await?;
        let id = model.id();
        self.initialize_on(conn, &id).await?;
        if let Some(parent_id) = parent_id {
            self.link_subtree(conn, &id, parent_id).await?;
        }
        Ok(model)
    }

    async fn find_or_create_by_path_on<C: ConnectionTrait, S: AsRef<str>>(
        &self,
        conn: &C,
        keys: &[S],
    ) -> Result<M, ForestError> {
        let mut cursor: Option<M::Id> = None;
        let mut current: Option<M> = None;

        for key in keys {
            let key = key.as_ref();
            let node = match self.find_child_by_key(conn, cursor.as_ref(), key).await? {
                Some(model) => model,
                None => {
                    let mut active = M::ActiveModel::default();
                    M::set_key(&mut active, key);
                    self.create_on(conn, active, cursor.as_ref()).await?
                }
            };
            cursor = Some(node.id());
            current = Some(node);
        }

        current.ok_or(ForestError::EmptyPath)
    }

    /// Refuse when `parent_id` is `id` itself or sits inside its subtree.
    async fn ensure_acyclic<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        parent_id: &M::Id,
    ) -> Result<(), ForestError> {
        if id == parent_id {
            return Err(ForestError::cycle(self.entity(), id, parent_id));
        }
        let inside = self
            .closure
            .descendants(conn, id, false)
            .await?
            .iter()
            .any(|row| &row.descendant == parent_id);
        if inside {
            return Err(ForestError::cycle(self.entity(), id, parent_id));
        }
        Ok(())
    }

    /// Copy the parent's ancestor chain onto every node of `id`'s subtree.
    ///
    /// For each `(A, parent, G)` and each `(id, X, H)` this inserts
    /// `(A, X, G + H + 1)`; for a leaf that is one row per ancestor of the
    /// parent plus `(parent, id, 1)`.
    async fn link_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        parent_id: &M::Id,
    ) -> Result<(), ForestError> {
        self.ensure_acyclic(conn, id, parent_id).await?;

        let chain = self.closure.ancestors(conn, parent_id, true).await?;
        if chain.is_empty() {
            return Err(ForestError::invariant(format!(
                "{} {parent_id:?} has no self row; initialize it first",
                self.entity()
            )));
        }
        let subtree = self.closure.descendants(conn, id, true).await?;
        if subtree.is_empty() {
            return Err(ForestError::invariant(format!(
                "{} {id:?} has no self row; initialize it first",
                self.entity()
            )));
        }

        let mut rows = Vec::with_capacity(chain.len() * subtree.len());
        for above in &chain {
            for below in &subtree {
                rows.push(ClosureRow::new(
                    above.ancestor.clone(),
                    below.descendant.clone(),
                    above.generations + below.generations + 1,
                ));
            }
        }
        self.closure.insert(conn, &rows).await?;

        tracing::debug!(
            node = ?id,
            parent = ?parent_id,
            rows = rows.len(),
            table = self.config.hierarchy_table(),
            "attached subtree"
        );
        Ok(())
    }

    /// Delete the rows tying `id`'s subtree to `id`'s proper ancestors. Returns
    /// the number of rows removed; `id` is a root afterwards.
    async fn strip_ancestry<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<u64, ForestError> {
        let ancestors: Vec<M::Id> = self
            .closure
            .ancestors(conn, id, false)
            .await?
            .into_iter()
            .map(|row| row.ancestor)
            .collect();
        if ancestors.is_empty() {
            return Ok(0);
        }

        let subtree: Vec<M::Id> = self
            .closure
            .descendants(conn, id, true)
            .await?
            .into_iter()
            .map(|row| row.descendant)
            .collect();
        self.closure.delete_links(conn, &ancestors, &subtree).await
    }

    // ---- queries --------------------------------------------------------------

    /// Nodes with no inherited rows.
    pub async fn roots<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ForestError> {
        Self::ensure_supported(conn)?;
        self.records
            .all_where(
                conn,
                M::id_column().not_in_subquery(self.closure.attached_ids_query()),
            )
            .await
    }

    /// Nodes that are nobody's ancestor.
    pub async fn leaves<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ForestError> {
        Self::ensure_supported(conn)?;
        self.records
            .all_where(
                conn,
                M::id_column().not_in_subquery(self.closure.parent_ids_query()),
            )
            .await
    }

    /// Proper ancestors, farthest (the root) first and the parent last.
    pub async fn ancestor_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M::Id>, ForestError> {
        Self::ensure_supported(conn)?;
        let rows = self.closure.ancestors(conn, id, false).await?;
        Ok(rows.into_iter().map(|row| row.ancestor).collect())
    }

    /// Proper descendants, breadth-first by generation, ties by id.
    pub async fn descendant_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M::Id>, ForestError> {
        Self::ensure_supported(conn)?;
        let rows = self.closure.descendants(conn, id, false).await?;
        Ok(rows.into_iter().map(|row| row.descendant).collect())
    }

    pub async fn parent_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Option<M::Id>, ForestError> {
        Self::ensure_supported(conn)?;
        self.closure.parent_id(conn, id).await
    }

    pub async fn child_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M::Id>, ForestError> {
        Self::ensure_supported(conn)?;
        self.closure.child_ids(conn, id).await
    }

    /// Number of edges between `id` and its root.
    pub async fn depth<C: ConnectionTrait>(&self, conn: &C, id: &M::Id) -> Result<usize, ForestError> {
        Ok(self.ancestor_ids(conn, id).await?.len())
    }

    /// Direct children, hydrated in configured order.
    pub async fn children<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M>, ForestError> {
        Self::ensure_supported(conn)?;
        self.records
            .all_where(
                conn,
                M::id_column().in_subquery(self.closure.child_ids_query(id)),
            )
            .await
    }

    /// Descendants hydrated generation by generation; within one generation
    /// the configured order applies.
    pub async fn descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M>, ForestError> {
        Self::ensure_supported(conn)?;
        self.hydrate_subtree(conn, id, false).await
    }

    /// `id` followed by its descendants.
    pub async fn self_and_descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M>, ForestError> {
        Self::ensure_supported(conn)?;
        self.records.require(conn, id).await?;
        self.hydrate_subtree(conn, id, true).await
    }

    async fn hydrate_subtree<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
        include_self: bool,
    ) -> Result<Vec<M>, ForestError> {
        let rows = self.closure.descendants(conn, id, include_self).await?;
        let generation: HashMap<M::Id, i32> = rows
            .into_iter()
            .map(|row| (row.descendant, row.generations))
            .collect();
        let ids: Vec<M::Id> = generation.keys().cloned().collect();

        let mut models = self.records.find_many(conn, &ids).await?;
        if models.len() != ids.len() {
            return Err(ForestError::invariant(format!(
                "subtree of {} {id:?} references missing records",
                self.entity()
            )));
        }
        models.sort_by_key(|model| generation.get(&model.id()).copied().unwrap_or(i32::MAX));
        Ok(models)
    }

    /// Root-to-node path, inclusive.
    pub async fn path_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<M>, ForestError> {
        let mut ids = self.ancestor_ids(conn, id).await?;
        ids.push(id.clone());
        self.records.find_in_order(conn, &ids).await
    }

    /// Walk `keys` from the roots down; `None` on the first missing segment.
    pub async fn find_by_path<C, S>(&self, conn: &C, keys: &[S]) -> Result<Option<M>, ForestError>
    where
        C: ConnectionTrait,
        S: AsRef<str>,
    {
        Self::ensure_supported(conn)?;

        let mut cursor: Option<M::Id> = None;
        let mut current: Option<M> = None;

        for key in keys {
            match self.find_child_by_key(conn, cursor.as_ref(), key.as_ref()).await? {
                Some(model) => {
                    cursor = Some(model.id());
                    current = Some(model);
                }
                None => return Ok(None),
            }
        }

        Ok(current)
    }

    /// First child of `parent_id` (or first root) whose key equals `key`, in
    /// configured order. Duplicate keys resolve to the earliest match.
    async fn find_child_by_key<C: ConnectionTrait>(
        &self,
        conn: &C,
        parent_id: Option<&M::Id>,
        key: &str,
    ) -> Result<Option<M>, ForestError> {
        let placement = match parent_id {
            Some(parent_id) => M::id_column().in_subquery(self.closure.child_ids_query(parent_id)),
            None => M::id_column().not_in_subquery(self.closure.attached_ids_query()),
        };
        let condition = Condition::all()
            .add(M::key_column().eq(key))
            .add(placement);
        self.records.first_where(conn, condition).await
    }

    // ---- inspection ------------------------------------------------------------

    pub async fn row_count<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, ForestError> {
        Self::ensure_supported(conn)?;
        self.closure.count(conn).await
    }

    pub async fn rows_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &M::Id,
    ) -> Result<Vec<ClosureRow<M::Id>>, ForestError> {
        Self::ensure_supported(conn)?;
        self.closure.rows_for(conn, id).await
    }

    /// Rebuild the expected relation from the `generations = 1` edges and
    /// compare it with what is stored.
    pub async fn verify<C: ConnectionTrait>(&self, conn: &C) -> Result<(), ForestError> {
        Self::ensure_supported(conn)?;

        let records: Vec<M::Id> = self
            .records
            .all(conn)
            .await?
            .iter()
            .map(|model| model.id())
            .collect();
        let stored = self.closure.all_rows(conn).await?;

        let initialized: HashSet<&M::Id> = stored
            .iter()
            .filter(|row| row.is_self_link())
            .map(|row| &row.descendant)
            .collect();
        if let Some(id) = records.iter().find(|id| !initialized.contains(id)) {
            return Err(ForestError::invariant(format!(
                "{} {id:?} has no self row",
                self.entity()
            )));
        }

        let mut parent_of: HashMap<M::Id, M::Id> = HashMap::new();
        for row in stored.iter().filter(|row| row.generations == 1) {
            if parent_of
                .insert(row.descendant.clone(), row.ancestor.clone())
                .is_some()
            {
                return Err(ForestError::invariant(format!(
                    "{} {:?} has more than one parent",
                    self.entity(),
                    row.descendant
                )));
            }
        }

        let mut expected: HashSet<ClosureRow<M::Id>> = HashSet::new();
        for id in &records {
            expected.insert(ClosureRow::new(id.clone(), id.clone(), 0));
            let mut cursor = id.clone();
            let mut generations = 0;
            while let Some(parent) = parent_of.get(&cursor) {
                generations += 1;
                if parent == id || generations as usize > records.len() {
                    return Err(ForestError::invariant(format!(
                        "{} {id:?} is its own ancestor",
                        self.entity()
                    )));
                }
                expected.insert(ClosureRow::new(parent.clone(), id.clone(), generations));
                cursor = parent.clone();
            }
        }

        let actual: HashSet<ClosureRow<M::Id>> = stored.into_iter().collect();
        if let Some(row) = actual.difference(&expected).next() {
            return Err(ForestError::invariant(format!("unexpected row {row:?}")));
        }
        if let Some(row) = expected.difference(&actual).next() {
            return Err(ForestError::invariant(format!("missing row {row:?}")));
        }
        Ok(())
    }
}

use sea_orm::{ActiveModelTrait, ConnectionTrait, TransactionTrait};

use crate::config::OrphanPolicy;
use crate::engine::HierarchyEngine;
use crate::error::ForestError;
use crate::traits::ForestModel;

/// Node-centric operations over models of one forest.
///
/// Every call delegates to the [`HierarchyEngine`]; this layer only turns
/// models into ids and ids back into models.
pub struct Forest<M>
where
    M: ForestModel,
{
    engine: HierarchyEngine<M>,
}

impl<M> Default for Forest<M>
where
    M: ForestModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Forest<M>
where
    M: ForestModel,
{
    pub fn new() -> Self {
        Self {
            engine: HierarchyEngine::new(),
        }
    }

    pub fn engine(&self) -> &HierarchyEngine<M> {
        &self.engine
    }

    /// Create a new root keyed by `key`.
    pub async fn create<C>(&self, db: &C, key: &str) -> Result<M, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let mut active = M::ActiveModel::default();
        M::set_key(&mut active, key);
        self.engine.create(db, active, None).await
    }

    /// Insert an arbitrary active model, optionally under `parent`.
    pub async fn create_with<C>(
        &self,
        db: &C,
        active: M::ActiveModel,
        parent: Option<&M>,
    ) -> Result<M, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let parent_id = parent.map(|parent| parent.id());
        self.engine.create(db, active, parent_id.as_ref()).await
    }

    /// Create a child of `parent` keyed by `key`.
    pub async fn create_child<C>(&self, db: &C, parent: &M, key: &str) -> Result<M, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let mut active = M::ActiveModel::default();
        M::set_key(&mut active, key);
        self.engine.create(db, active, Some(&parent.id())).await
    }

    /// Register a record that was inserted without going through the forest.
    pub async fn initialize<C>(&self, db: &C, model: &M) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        self.engine.initialize(db, &model.id()).await
    }

    /// Move `child` (with its subtree) under `parent`.
    pub async fn add_child<C>(&self, db: &C, parent: &M, child: &M) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        self.engine
            .reparent(db, &child.id(), Some(&parent.id()))
            .await
    }

    pub async fn set_parent<C>(&self, db: &C, model: &M, parent: Option<&M>) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let parent_id = parent.map(|parent| parent.id());
        self.engine
            .reparent(db, &model.id(), parent_id.as_ref())
            .await
    }

    pub async fn make_root<C>(&self, db: &C, model: &M) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        self.engine.reparent(db, &model.id(), None).await
    }

    /// Destroy `model` using the configured orphan policy.
    pub async fn destroy<C>(&self, db: &C, model: &M) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let policy = self.engine.config().orphan_policy();
        self.destroy_with(db, model, policy).await
    }

    pub async fn destroy_with<C>(
        &self,
        db: &C,
        model: &M,
        policy: OrphanPolicy,
    ) -> Result<(), ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        self.engine.detach(db, &model.id(), policy).await
    }

    pub async fn roots<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ForestError> {
        self.engine.roots(conn).await
    }

    pub async fn leaves<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<M>, ForestError> {
        self.engine.leaves(conn).await
    }

    pub async fn parent<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Option<M>, ForestError> {
        match self.engine.parent_id(conn, &model.id()).await? {
            Some(parent_id) => self.engine.record_store().find(conn, &parent_id).await,
            None => Ok(None),
        }
    }

    pub async fn children<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Vec<M>, ForestError> {
        self.engine.children(conn, &model.id()).await
    }

    /// Other children of the same parent; other roots for a root.
    pub async fn siblings<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Vec<M>, ForestError> {
        let id = model.id();
        let peers = match self.engine.parent_id(conn, &id).await? {
            Some(parent_id) => self.engine.children(conn, &parent_id).await?,
            None => self.engine.roots(conn).await?,
        };
        Ok(peers.into_iter().filter(|peer| peer.id() != id).collect())
    }

    /// The root of `model`'s tree (`model` itself for a root).
    pub async fn root<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<M, ForestError> {
        match self.engine.ancestor_ids(conn, &model.id()).await?.first() {
            Some(root_id) => self.engine.record_store().require(conn, root_id).await,
            None => Ok(model.clone()),
        }
    }

    /// Proper ancestors, root first.
    pub async fn ancestors<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Vec<M>, ForestError> {
        let ids = self.engine.ancestor_ids(conn, &model.id()).await?;
        self.engine.record_store().find_in_order(conn, &ids).await
    }

    pub async fn ancestor_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M::Id>, ForestError> {
        self.engine.ancestor_ids(conn, &model.id()).await
    }

    pub async fn descendant_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M::Id>, ForestError> {
        self.engine.descendant_ids(conn, &model.id()).await
    }

    pub async fn descendants<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Vec<M>, ForestError> {
        self.engine.descendants(conn, &model.id()).await
    }

    pub async fn self_and_descendants<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<M>, ForestError> {
        self.engine.self_and_descendants(conn, &model.id()).await
    }

    /// Models from the root down to `model`, inclusive.
    pub async fn path<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<Vec<M>, ForestError> {
        self.engine.path_of(conn, &model.id()).await
    }

    /// Keys from the root down to `model`, inclusive.
    pub async fn ancestry_path<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &M,
    ) -> Result<Vec<String>, ForestError> {
        let path = self.path(conn, model).await?;
        Ok(path.iter().map(|node| node.key().to_owned()).collect())
    }

    pub async fn depth<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<usize, ForestError> {
        self.engine.depth(conn, &model.id()).await
    }

    pub async fn is_root<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<bool, ForestError> {
        Ok(self.engine.parent_id(conn, &model.id()).await?.is_none())
    }

    pub async fn is_leaf<C: ConnectionTrait>(&self, conn: &C, model: &M) -> Result<bool, ForestError> {
        Ok(self.engine.child_ids(conn, &model.id()).await?.is_empty())
    }

    pub async fn find_by_path<C, S>(&self, conn: &C, keys: &[S]) -> Result<Option<M>, ForestError>
    where
        C: ConnectionTrait,
        S: AsRef<str>,
    {
        self.engine.find_by_path(conn, keys).await
    }

    pub async fn find_or_create_by_path<C, S>(&self, db: &C, keys: &[S]) -> Result<M, ForestError>
    where
        C: ConnectionTrait + TransactionTrait,
        S: AsRef<str>,
    {
        self.engine.find_or_create_by_path(db, keys).await
    }
}

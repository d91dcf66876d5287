use std::collections::BTreeSet;

use closure_forest::{Forest, ForestError, ForestModel, OrphanPolicy};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, TransactionTrait,
};
use tracing_subscriber::EnvFilter;

mod entity {
    pub mod tag {
        use closure_forest::ForestModelDerive as ForestModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ForestModel)]
        #[sea_orm(table_name = "tags")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub name: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod user {
        use closure_forest::ForestModelDerive as ForestModel;
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, ForestModel)]
        #[sea_orm(table_name = "users")]
        #[forest(key_field = "email", hierarchy_name = "ReferralHierarchy")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub email: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{tag, user};

const SCHEMA: &[&str] = &[
    "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
    "CREATE TABLE tag_hierarchies (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )",
    "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL UNIQUE)",
    "CREATE TABLE referral_hierarchies (
        ancestor_id INTEGER NOT NULL,
        descendant_id INTEGER NOT NULL,
        generations INTEGER NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )",
];

async fn setup_database() -> Result<DatabaseConnection, DbErr> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    // One pooled connection keeps the in-memory database alive for the test.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    for statement in SCHEMA {
        db.execute_unprepared(statement).await?;
    }
    Ok(db)
}

fn ids<M: ForestModel>(models: &[M]) -> Vec<M::Id> {
    models.iter().map(|model| model.id()).collect()
}

fn keys<M: ForestModel>(models: &[M]) -> Vec<String> {
    models.iter().map(|model| model.key().to_owned()).collect()
}

struct Chain {
    root: user::Model,
    mid: user::Model,
    leaf: user::Model,
}

async fn three_users(
    db: &DatabaseConnection,
    users: &Forest<user::Model>,
) -> Result<Chain, ForestError> {
    let root = users.create(db, "poppy@t.co").await?;
    let mid = users.create_child(db, &root, "matt@t.co").await?;
    let leaf = users.create_child(db, &mid, "james@t.co").await?;
    Ok(Chain { root, mid, leaf })
}

#[tokio::test]
async fn empty_database_has_no_roots_or_leaves() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();

    assert!(users.roots(&db).await?.is_empty());
    assert!(users.leaves(&db).await?.is_empty());
    Ok(())
}

#[test]
fn hierarchy_table_is_named_after_the_hierarchy() {
    assert_eq!(
        user::Model::forest_config().hierarchy_table(),
        "referral_hierarchies"
    );
    assert_eq!(user::Model::forest_config().key_column(), "email");
    assert_eq!(tag::Model::forest_config().entity_name(), "Tag");
    assert_eq!(tag::Model::forest_config().hierarchy_table(), "tag_hierarchies");
}

#[tokio::test]
async fn single_node_is_both_root_and_leaf() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();

    let only = users.create(&db, "me@domain.com").await?;

    assert_eq!(users.roots(&db).await?, vec![only.clone()]);
    assert_eq!(users.leaves(&db).await?, vec![only.clone()]);
    assert!(users.is_root(&db, &only).await?);
    assert!(users.is_leaf(&db, &only).await?);
    Ok(())
}

#[tokio::test]
async fn two_nodes_have_a_root_and_a_leaf() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();

    let root = users.create(&db, "first@t.co").await?;
    let leaf = users.create_child(&db, &root, "second@t.co").await?;

    assert_eq!(users.roots(&db).await?, vec![root.clone()]);
    assert_eq!(users.leaves(&db).await?, vec![leaf.clone()]);
    assert_eq!(users.parent(&db, &leaf).await?, Some(root.clone()));
    assert_eq!(users.children(&db, &root).await?, vec![leaf]);
    Ok(())
}

#[tokio::test]
async fn three_level_chain_queries() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();
    let Chain { root, mid, leaf } = three_users(&db, &users).await?;

    assert_eq!(users.roots(&db).await?, vec![root.clone()]);
    assert_eq!(users.leaves(&db).await?, vec![leaf.clone()]);
    assert_eq!(users.descendant_ids(&db, &root).await?, vec![mid.id, leaf.id]);
    assert_eq!(users.ancestor_ids(&db, &leaf).await?, vec![root.id, mid.id]);
    assert_eq!(users.depth(&db, &leaf).await?, 2);
    assert_eq!(users.root(&db, &leaf).await?, root);
    assert_eq!(users.engine().row_count(&db).await?, 6);
    users.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn destroying_a_leaf_leaves_the_root_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();
    let Chain { root, mid, leaf } = three_users(&db, &users).await?;

    users.destroy(&db, &leaf).await?;

    assert_eq!(users.roots(&db).await?, vec![root]);
    assert_eq!(users.leaves(&db).await?, vec![mid]);
    users.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn destroying_the_root_promotes_its_children() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();
    let Chain { root, mid, leaf } = three_users(&db, &users).await?;

    users.destroy(&db, &root).await?;

    assert!(users.engine().rows_for(&db, &root.id).await?.is_empty());
    assert_eq!(users.ancestry_path(&db, &mid).await?, vec!["matt@t.co"]);
    assert_eq!(
        users.ancestry_path(&db, &leaf).await?,
        vec!["matt@t.co", "james@t.co"]
    );
    let subtree: BTreeSet<i32> = ids(&users.self_and_descendants(&db, &mid).await?)
        .into_iter()
        .collect();
    assert_eq!(subtree, BTreeSet::from([mid.id, leaf.id]));
    assert_eq!(users.roots(&db).await?, vec![mid]);
    assert_eq!(users.leaves(&db).await?, vec![leaf]);
    users.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn promoting_children_drops_every_link_above_the_removed_node(
) -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    let top = tags.create(&db, "top").await?;
    let removed = tags.create_child(&db, &top, "removed").await?;
    let child = tags.create_child(&db, &removed, "child").await?;
    let grandchild = tags.create_child(&db, &child, "grandchild").await?;

    tags.destroy_with(&db, &removed, OrphanPolicy::PromoteChildrenToRoot)
        .await?;

    assert_eq!(tags.path(&db, &grandchild).await?, vec![child.clone(), grandchild.clone()]);
    assert_eq!(tags.descendant_ids(&db, &top).await?, Vec::<i32>::new());
    assert_eq!(tags.roots(&db).await?, vec![top.clone(), child]);
    assert_eq!(tags.leaves(&db).await?, vec![top, grandchild]);
    tags.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn cascade_destroys_the_whole_subtree() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    let other = tags.create(&db, "other").await?;
    let root = tags.create(&db, "root").await?;
    let mid = tags.create_child(&db, &root, "mid").await?;
    tags.create_child(&db, &mid, "leaf").await?;
    tags.create_child(&db, &root, "second").await?;

    tags.destroy_with(&db, &root, OrphanPolicy::Cascade).await?;

    assert_eq!(tags.engine().record_store().count(&db).await?, 1);
    assert_eq!(tags.engine().row_count(&db).await?, 1);
    assert_eq!(tags.roots(&db).await?, vec![other]);
    assert!(matches!(
        tags.destroy(&db, &mid).await,
        Err(ForestError::NotFound(_))
    ));
    tags.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn find_or_create_by_path_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();

    let c = users
        .find_or_create_by_path(&db, &["a@t.co", "b@t.co", "c@t.co"])
        .await?;
    let again = users
        .find_or_create_by_path(&db, &["a@t.co", "b@t.co", "c@t.co"])
        .await?;
    assert_eq!(c, again);
    assert_eq!(users.engine().record_store().count(&db).await?, 3);

    let b = users.parent(&db, &c).await?.expect("c has a parent");
    let a = users.root(&db, &c).await?;
    assert_eq!(a.email, "a@t.co");
    assert_eq!(b.email, "b@t.co");

    assert!(users.descendant_ids(&db, &c).await?.is_empty());
    assert_eq!(users.ancestor_ids(&db, &c).await?, vec![a.id, b.id]);
    assert_eq!(users.descendant_ids(&db, &a).await?, vec![b.id, c.id]);
    assert!(users.ancestor_ids(&db, &a).await?.is_empty());

    let found = users
        .find_by_path(&db, &["a@t.co", "b@t.co"])
        .await?
        .expect("path exists");
    assert_eq!(found, b);
    assert!(users
        .find_by_path(&db, &["a@t.co", "missing@t.co"])
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_keys_resolve_to_the_earliest_node() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    let first = tags.create(&db, "dup").await?;
    tags.create(&db, "dup").await?;

    let found = tags.find_or_create_by_path(&db, &["dup", "below"]).await?;
    assert_eq!(tags.parent(&db, &found).await?, Some(first));
    Ok(())
}

#[tokio::test]
async fn behaves_as_the_readme_describes() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    let grandparent = tags.create(&db, "Grandparent").await?;
    let parent = tags.create_child(&db, &grandparent, "Parent").await?;
    let child1 = tags.create(&db, "First Child").await?;
    tags.add_child(&db, &parent, &child1).await?;
    let child2 = tags.create(&db, "Second Child").await?;
    tags.add_child(&db, &parent, &child2).await?;

    assert_eq!(
        keys(&tags.self_and_descendants(&db, &grandparent).await?),
        vec!["Grandparent", "Parent", "First Child", "Second Child"]
    );
    assert_eq!(
        tags.ancestry_path(&db, &child1).await?,
        vec!["Grandparent", "Parent", "First Child"]
    );
    assert_eq!(tags.siblings(&db, &child1).await?, vec![child2]);

    let d = tags.find_or_create_by_path(&db, &["a", "b", "c", "d"]).await?;
    let h = tags.find_or_create_by_path(&db, &["e", "f", "g", "h"]).await?;
    let e = tags.root(&db, &h).await?;
    tags.add_child(&db, &d, &e).await?;

    assert_eq!(
        tags.ancestry_path(&db, &h).await?,
        vec!["a", "b", "c", "d", "e", "f", "g", "h"]
    );
    tags.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn reattaching_leaves_no_residue() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    let old_root = tags.create(&db, "old-root").await?;
    let old_parent = tags.create_child(&db, &old_root, "old-parent").await?;
    let new_root = tags.create(&db, "new-root").await?;
    let new_parent = tags.create_child(&db, &new_root, "new-parent").await?;

    let moved = tags.create_child(&db, &old_parent, "moved").await?;
    let moved_child = tags.create_child(&db, &moved, "moved-child").await?;

    tags.make_root(&db, &moved).await?;
    assert!(tags.is_root(&db, &moved).await?);
    assert!(tags.descendant_ids(&db, &old_root).await?.iter().all(|id| *id == old_parent.id));
    tags.add_child(&db, &new_parent, &moved).await?;

    let fresh = tags.create_child(&db, &new_parent, "fresh").await?;
    let fresh_child = tags.create_child(&db, &fresh, "fresh-child").await?;

    let ancestry = |rows: Vec<closure_forest::ClosureRow<i32>>, id: i32| {
        rows.into_iter()
            .filter(|row| row.descendant == id && row.generations > 0)
            .map(|row| (row.ancestor, row.generations))
            .collect::<BTreeSet<_>>()
    };
    let engine = tags.engine();
    assert_eq!(
        ancestry(engine.rows_for(&db, &moved.id).await?, moved.id),
        ancestry(engine.rows_for(&db, &fresh.id).await?, fresh.id)
    );
    let moved_child_ancestry = ancestry(engine.rows_for(&db, &moved_child.id).await?, moved_child.id);
    let fresh_child_ancestry = ancestry(engine.rows_for(&db, &fresh_child.id).await?, fresh_child.id);
    let strip = |set: BTreeSet<(i32, i32)>, own_parent: i32| {
        set.into_iter()
            .filter(|(ancestor, _)| *ancestor != own_parent)
            .collect::<BTreeSet<_>>()
    };
    assert_eq!(
        strip(moved_child_ancestry, moved.id),
        strip(fresh_child_ancestry, fresh.id)
    );

    assert_eq!(tags.depth(&db, &moved_child).await?, 3);
    engine.verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn initializing_twice_is_a_duplicate() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();
    let node = tags.create(&db, "once").await?;

    let before = tags.engine().row_count(&db).await?;
    assert!(matches!(
        tags.initialize(&db, &node).await,
        Err(ForestError::Duplicate(_))
    ));
    assert_eq!(tags.engine().row_count(&db).await?, before);
    Ok(())
}

#[tokio::test]
async fn initializing_a_missing_record_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();
    tags.create(&db, "present").await?;

    let before = tags.engine().row_count(&db).await?;
    assert!(matches!(
        tags.engine().initialize(&db, &4_242).await,
        Err(ForestError::NotFound(_))
    ));
    assert_eq!(tags.engine().row_count(&db).await?, before);
    tags.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn conflicting_self_rows_are_duplicates() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();
    let node = tags.create(&db, "raced").await?;

    assert!(matches!(
        tags.engine()
            .closure_store()
            .insert_self_link(&db, &node.id)
            .await,
        Err(ForestError::Duplicate(_))
    ));
    assert_eq!(tags.engine().row_count(&db).await?, 1);
    Ok(())
}

#[tokio::test]
async fn records_inserted_directly_can_be_initialized() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();
    let parent = tags.create(&db, "parent").await?;

    let outsider = tag::ActiveModel {
        name: ActiveValue::Set("outsider".to_owned()),
        ..Default::default()
    }
    .insert(&db)
    .await?;
    assert!(matches!(
        tags.engine().verify(&db).await,
        Err(ForestError::Invariant(detail)) if detail.contains("has no self row")
    ));

    tags.initialize(&db, &outsider).await?;
    tags.engine().attach(&db, &outsider.id, &parent.id).await?;

    assert_eq!(tags.children(&db, &parent).await?, vec![outsider]);
    tags.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn cycles_are_rejected_without_changes() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();
    let Chain { root, mid, leaf } = three_users(&db, &users).await?;

    let before = users.engine().row_count(&db).await?;
    assert!(matches!(
        users.add_child(&db, &leaf, &root).await,
        Err(ForestError::Cycle { .. })
    ));
    assert!(matches!(
        users.set_parent(&db, &mid, Some(&mid)).await,
        Err(ForestError::Cycle { .. })
    ));
    assert_eq!(users.engine().row_count(&db).await?, before);
    assert_eq!(users.roots(&db).await?, vec![root]);
    users.engine().verify(&db).await?;
    Ok(())
}

#[tokio::test]
async fn attach_requires_a_detached_existing_node() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let users = Forest::<user::Model>::new();
    let Chain { root, mid, .. } = three_users(&db, &users).await?;
    let other = users.create(&db, "other@t.co").await?;

    assert!(matches!(
        users.engine().attach(&db, &mid.id, &other.id).await,
        Err(ForestError::AlreadyAttached(_))
    ));
    assert!(matches!(
        users.engine().attach(&db, &9_999, &root.id).await,
        Err(ForestError::NotFound(_))
    ));
    assert!(matches!(
        users.engine().attach(&db, &other.id, &9_999).await,
        Err(ForestError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn blank_keys_fail_validation_and_roll_back() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    assert!(matches!(
        tags.create(&db, "   ").await,
        Err(ForestError::Validation(_))
    ));
    assert!(matches!(
        tags.find_or_create_by_path(&db, &["fine", ""]).await,
        Err(ForestError::Validation(_))
    ));
    assert_eq!(tags.engine().record_store().count(&db).await?, 0);
    assert_eq!(tags.engine().row_count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn host_transactions_wrap_structural_changes() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup_database().await?;
    let tags = Forest::<tag::Model>::new();

    let txn = db.begin().await?;
    let root = tags.create(&txn, "root").await?;
    tags.create_child(&txn, &root, "child").await?;
    txn.rollback().await?;

    assert!(tags.roots(&db).await?.is_empty());
    assert_eq!(tags.engine().row_count(&db).await?, 0);
    Ok(())
}

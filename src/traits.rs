use std::fmt::Debug;
use std::hash::Hash;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel,
    TryGetable, Value,
};

use crate::config::ForestConfig;

/// Trait implemented by SeaORM `Model` types that live in a closure-table forest.
///
/// Implementations are normally provided by `#[derive(ForestModel)]`. The model
/// carries no parent column: parenthood is read from the closure table.
pub trait ForestModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send;
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static + Into<Value> + TryGetable;

    fn forest_config() -> &'static ForestConfig;

    fn id(&self) -> Self::Id;

    /// Lookup key matched by path operations (a name, an email, ...).
    fn key(&self) -> &str;
    fn set_key(active: &mut Self::ActiveModel, key: &str);

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn key_column() -> <Self::Entity as EntityTrait>::Column;

    fn id_to_value(id: &Self::Id) -> Value {
        id.clone().into()
    }
}

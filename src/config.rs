use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Static configuration describing how a SeaORM model maps onto its
/// closure table.
#[derive(Clone, Debug)]
pub struct ForestConfig {
    entity_name: String,
    hierarchy_name: String,
    key_column: String,
    hierarchy_table: String,
    ancestor_column: String,
    descendant_column: String,
    generations_column: String,
    orphan_policy: OrphanPolicy,
    order_strategy: OrderStrategy,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl ForestConfig {
    /// Create a new configuration using the logical entity and hierarchy names.
    ///
    /// The hierarchy table defaults to the snake-cased, pluralised hierarchy
    /// name (`ReferralHierarchy` becomes `referral_hierarchies`).
    pub fn new(entity_name: impl Into<String>, hierarchy_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let hierarchy_name = hierarchy_name.into();

        let default_lock = AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(
            &entity_name,
            &hierarchy_name,
        ));
        let hierarchy_table = tableize(&hierarchy_name);

        Self {
            entity_name,
            hierarchy_name,
            key_column: "name".to_string(),
            hierarchy_table,
            ancestor_column: "ancestor_id".to_string(),
            descendant_column: "descendant_id".to_string(),
            generations_column: "generations".to_string(),
            orphan_policy: OrphanPolicy::default(),
            order_strategy: OrderStrategy::default(),
            advisory_lock_strategy: default_lock,
        }
    }

    /// Merge options produced by [`ForestOptions`].
    pub(crate) fn apply_options(mut self, options: ForestOptions) -> Self {
        if let Some(key_column) = options.key_column {
            self.key_column = key_column;
        }
        if let Some(hierarchy_table) = options.hierarchy_table {
            self.hierarchy_table = hierarchy_table;
        }
        if let Some(column) = options.ancestor_column {
            self.ancestor_column = column;
        }
        if let Some(column) = options.descendant_column {
            self.descendant_column = column;
        }
        if let Some(column) = options.generations_column {
            self.generations_column = column;
        }
        if let Some(policy) = options.orphan_policy {
            self.orphan_policy = policy;
        }
        if let Some(order_strategy) = options.order_strategy {
            self.order_strategy = order_strategy;
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Human-readable name of the node entity, used in error messages.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Logical name of the closure relation.
    pub fn hierarchy_name(&self) -> &str {
        &self.hierarchy_name
    }

    /// Column holding the lookup key used by path operations.
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Table backing the closure relation.
    pub fn hierarchy_table(&self) -> &str {
        &self.hierarchy_table
    }

    pub fn ancestor_column(&self) -> &str {
        &self.ancestor_column
    }

    pub fn descendant_column(&self) -> &str {
        &self.descendant_column
    }

    pub fn generations_column(&self) -> &str {
        &self.generations_column
    }

    /// What happens to the children of a destroyed node.
    pub fn orphan_policy(&self) -> OrphanPolicy {
        self.orphan_policy
    }

    /// Ordering applied to hydrated siblings, roots and leaves.
    pub fn order_strategy(&self) -> &OrderStrategy {
        &self.order_strategy
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style overrides consumed by the derive macro.
///
/// Also deserializable, so hosts can keep overrides in their own config files.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForestOptions {
    key_column: Option<String>,
    hierarchy_table: Option<String>,
    ancestor_column: Option<String>,
    descendant_column: Option<String>,
    generations_column: Option<String>,
    orphan_policy: Option<OrphanPolicy>,
    order_strategy: Option<OrderStrategy>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl ForestOptions {
    pub fn key_column(mut self, value: impl Into<String>) -> Self {
        self.key_column = Some(value.into());
        self
    }

    pub fn hierarchy_table(mut self, value: impl Into<String>) -> Self {
        self.hierarchy_table = Some(value.into());
        self
    }

    pub fn ancestor_column(mut self, value: impl Into<String>) -> Self {
        self.ancestor_column = Some(value.into());
        self
    }

    pub fn descendant_column(mut self, value: impl Into<String>) -> Self {
        self.descendant_column = Some(value.into());
        self
    }

    pub fn generations_column(mut self, value: impl Into<String>) -> Self {
        self.generations_column = Some(value.into());
        self
    }

    pub fn orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = Some(policy);
        self
    }

    pub fn order_strategy(mut self, strategy: OrderStrategy) -> Self {
        self.order_strategy = Some(strategy);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    /// Overlay these options on top of `other`, keeping values set here.
    pub fn merge(self, other: ForestOptions) -> Self {
        Self {
            key_column: self.key_column.or(other.key_column),
            hierarchy_table: self.hierarchy_table.or(other.hierarchy_table),
            ancestor_column: self.ancestor_column.or(other.ancestor_column),
            descendant_column: self.descendant_column.or(other.descendant_column),
            generations_column: self.generations_column.or(other.generations_column),
            orphan_policy: self.orphan_policy.or(other.orphan_policy),
            order_strategy: self.order_strategy.or(other.order_strategy),
            advisory_lock_strategy: self.advisory_lock_strategy.or(other.advisory_lock_strategy),
        }
    }

    pub fn apply(self, base: ForestConfig) -> ForestConfig {
        base.apply_options(self)
    }
}

/// What to do with the children of a node that is being destroyed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Destroy the whole subtree.
    Cascade,
    /// Detach each direct child, which becomes a root keeping its own subtree.
    #[default]
    PromoteChildrenToRoot,
}

/// Ordering used when hydrating sibling sets (roots, leaves, children).
///
/// The id column is always the final tie-break.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStrategy {
    /// Creation order, assuming ids grow monotonically.
    #[default]
    Insertion,
    /// Alphabetical by key column.
    Key,
    NumericColumn { column: String },
}

impl OrderStrategy {
    pub fn numeric_column(column: impl Into<String>) -> Self {
        Self::NumericColumn {
            column: column.into(),
        }
    }
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str, hierarchy: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        hasher.update(b"/");
        hasher.update(hierarchy.as_bytes());
        let crc = hasher.finalize();
        Self(format!("closure-forest::{entity}::{hierarchy}::{crc:x}"))
    }
}

/// How structural changes serialize against each other on PostgreSQL.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}

/// `ReferralHierarchy` -> `referral_hierarchies`.
fn tableize(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }

    if let Some(stem) = snake.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if snake.ends_with('s') || snake.ends_with('x') || snake.ends_with("ch") {
        return format!("{snake}es");
    }
    snake.push('s');
    snake
}

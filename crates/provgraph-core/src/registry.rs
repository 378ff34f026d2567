//! Type-tag to behavior resolution
//!
//! A type tag `category.subtype` is resolved in two steps: the category
//! segment picks one of the closed [`Category`] families, then the subtype is
//! looked up in a plugin table filled once at startup. Resolution is total:
//! every miss degrades to the family's base behavior and logs a warning.

use crate::types::{split_type_tag, Category};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Capability interface shared by every resolved behavior
pub trait Behavior: fmt::Debug + Send + Sync {
    /// Family this behavior belongs to
    fn category(&self) -> Category;

    /// Plugin name, `None` for a base behavior
    fn plugin(&self) -> Option<&str> {
        None
    }

    /// Attribute keys a node of this type is expected to carry
    fn required_attributes(&self) -> &[&'static str] {
        &[]
    }
}

/// Base behavior of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseBehavior {
    category: Category,
}

impl BaseBehavior {
    /// Base behavior for `category`
    #[must_use]
    pub const fn new(category: Category) -> Self {
        Self { category }
    }
}

impl Behavior for BaseBehavior {
    fn category(&self) -> Category {
        self.category
    }
}

/// Backing lookup used by the registry
pub trait PluginLookup: fmt::Debug + Send + Sync {
    /// Behavior registered for `(category, subtype)`, if any
    fn lookup(&self, category: Category, subtype: &str) -> Option<Arc<dyn Behavior>>;
}

/// In-memory plugin table keyed by `(category, subtype)`
#[derive(Debug, Default, Clone)]
pub struct PluginTable {
    plugins: HashMap<(Category, String), Arc<dyn Behavior>>,
}

impl PluginTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any previous entry for the key
    pub fn register(&mut self, category: Category, subtype: impl Into<String>, behavior: Arc<dyn Behavior>) {
        self.plugins.insert((category, subtype.into()), behavior);
    }

    /// Number of registered plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl PluginLookup for PluginTable {
    fn lookup(&self, category: Category, subtype: &str) -> Option<Arc<dyn Behavior>> {
        self.plugins.get(&(category, subtype.to_string())).cloned()
    }
}

/// Resolves type tags to behaviors; never fails
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    lookup: Arc<dyn PluginLookup>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new(Arc::new(PluginTable::new()))
    }
}

impl TypeRegistry {
    /// Registry backed by a custom plugin lookup
    #[must_use]
    pub fn new(lookup: Arc<dyn PluginLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve a type tag
    #[must_use]
    pub fn resolve(&self, type_tag: &str) -> Arc<dyn Behavior> {
        self.resolve_for(type_tag, None)
    }

    /// Resolve a type tag, naming `uuid` in any fallback warning
    #[must_use]
    pub fn resolve_for(&self, type_tag: &str, uuid: Option<Uuid>) -> Arc<dyn Behavior> {
        let (segment, subtype) = split_type_tag(type_tag);
        let Some(category) = Category::parse(segment) else {
            if !segment.is_empty() {
                tracing::warn!(
                    type_tag,
                    uuid = ?uuid,
                    category = segment,
                    "unknown category, using base node behavior"
                );
            }
            return Arc::new(BaseBehavior::new(Category::Node));
        };

        if let Some(plugin) = self.lookup.lookup(category, subtype) {
            return plugin;
        }
        tracing::warn!(
            type_tag,
            uuid = ?uuid,
            %category,
            subtype,
            "no plugin for subtype, using base {category} behavior"
        );
        Arc::new(BaseBehavior::new(category))
    }
}

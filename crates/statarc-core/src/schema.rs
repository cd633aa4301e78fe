//! Resource types and their stat descriptors.
//!
//! A type excluded by every selector is still parsed, so its wire layout (one
//! [`TypeCode`] per stat) is always kept; its names and descriptors are only
//! retained when something can select them.

use std::sync::Arc;

use serde::Serialize;

use crate::format::TypeCode;

/// Data that is kept only when a selector can use it.
#[derive(Debug, Clone, PartialEq)]
pub enum Retention<T> {
    Loaded(T),
    Unloaded,
}

impl<T> Retention<T> {
    pub fn as_loaded(&self) -> Option<&T> {
        match self {
            Retention::Loaded(v) => Some(v),
            Retention::Unloaded => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Retention::Loaded(_))
    }
}

/// Metadata for one measured quantity of a resource type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatDescriptor {
    pub name: String,
    /// Position of this stat within its type.
    pub offset: usize,
    pub type_code: TypeCode,
    pub is_counter: bool,
    pub is_larger_better: bool,
    pub units: String,
    pub description: String,
}

/// Names and descriptors of a retained resource type.
#[derive(Debug)]
pub struct TypeSchema {
    pub name: String,
    pub description: String,
    pub stats: Vec<Retention<Arc<StatDescriptor>>>,
}

/// A named category of monitored entity with a fixed list of stats.
#[derive(Debug)]
pub struct ResourceType {
    id: i32,
    layout: Vec<TypeCode>,
    schema: Retention<TypeSchema>,
}

impl ResourceType {
    /// Builds a type from its wire definition.
    ///
    /// With `load_type` false only the layout survives. Otherwise each stat is
    /// kept when `load_stat` accepts it.
    pub fn new(
        id: i32,
        name: String,
        description: String,
        stats: Vec<StatDescriptor>,
        load_type: bool,
        mut load_stat: impl FnMut(&StatDescriptor) -> bool,
    ) -> Self {
        let layout = stats.iter().map(|s| s.type_code).collect();
        let schema = if load_type {
            Retention::Loaded(TypeSchema {
                name,
                description,
                stats: stats
                    .into_iter()
                    .map(|s| {
                        if load_stat(&s) {
                            Retention::Loaded(Arc::new(s))
                        } else {
                            Retention::Unloaded
                        }
                    })
                    .collect(),
            })
        } else {
            Retention::Unloaded
        };
        Self { id, layout, schema }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Number of stats declared on the wire; fixed for the life of the type.
    pub fn stat_count(&self) -> usize {
        self.layout.len()
    }

    pub fn type_code(&self, offset: usize) -> Option<TypeCode> {
        self.layout.get(offset).copied()
    }

    pub fn is_loaded(&self) -> bool {
        self.schema.is_loaded()
    }

    pub fn schema(&self) -> Option<&TypeSchema> {
        self.schema.as_loaded()
    }

    /// Type name; `None` when the type was not retained.
    pub fn name(&self) -> Option<&str> {
        self.schema().map(|s| s.name.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.schema().map(|s| s.description.as_str())
    }

    /// Retained descriptor for the stat at `offset`.
    pub fn descriptor(&self, offset: usize) -> Option<&Arc<StatDescriptor>> {
        self.schema()?.stats.get(offset)?.as_loaded()
    }

    pub fn descriptor_by_name(&self, name: &str) -> Option<&Arc<StatDescriptor>> {
        self.schema()?
            .stats
            .iter()
            .filter_map(Retention::as_loaded)
            .find(|d| d.name == name)
    }

    /// Retained descriptors in offset order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<StatDescriptor>> {
        self.schema()
            .into_iter()
            .flat_map(|s| s.stats.iter().filter_map(Retention::as_loaded))
    }

    /// True when neither the type nor any of its stats is retained.
    pub fn is_fully_unloaded(&self) -> bool {
        match &self.schema {
            Retention::Unloaded => true,
            Retention::Loaded(s) => !s.stats.iter().any(Retention::is_loaded),
        }
    }
}

#[cfg(test)]
pub(crate) fn descriptor(name: &str, offset: usize, type_code: TypeCode, counter: bool) -> StatDescriptor {
    StatDescriptor {
        name: name.to_string(),
        offset,
        type_code,
        is_counter: counter,
        is_larger_better: counter,
        units: String::new(),
        description: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> Vec<StatDescriptor> {
        vec![
            descriptor("ops", 0, TypeCode::Long, true),
            descriptor("threads", 1, TypeCode::Int, false),
        ]
    }

    #[test]
    fn test_loaded_type() {
        let t = ResourceType::new(3, "VMStats".into(), "vm".into(), stats(), true, |_| true);
        assert_eq!(t.id(), 3);
        assert_eq!(t.name(), Some("VMStats"));
        assert_eq!(t.stat_count(), 2);
        assert_eq!(t.descriptor(1).unwrap().name, "threads");
        assert_eq!(t.descriptor_by_name("ops").unwrap().offset, 0);
        assert_eq!(t.descriptors().count(), 2);
        assert!(!t.is_fully_unloaded());
    }

    #[test]
    fn test_unloaded_type_keeps_layout() {
        let t = ResourceType::new(0, "VMStats".into(), "vm".into(), stats(), false, |_| true);
        assert!(!t.is_loaded());
        assert_eq!(t.name(), None);
        assert_eq!(t.stat_count(), 2);
        assert_eq!(t.type_code(1), Some(TypeCode::Int));
        assert!(t.descriptor(0).is_none());
        assert!(t.is_fully_unloaded());
    }

    #[test]
    fn test_partially_loaded_stats() {
        let t = ResourceType::new(0, "VMStats".into(), String::new(), stats(), true, |d| {
            d.name == "threads"
        });
        assert!(t.descriptor(0).is_none());
        assert!(t.descriptor(1).is_some());
        assert_eq!(t.descriptors().count(), 1);
    }
}

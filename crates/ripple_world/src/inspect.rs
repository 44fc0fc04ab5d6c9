//! Read-only views of a world for debugging and tooling dumps.
//!
//! Everything here is `Serialize` so a host can ship it to a devtools panel
//! as JSON. Component values appear as their `Debug` rendering; this is not
//! a persistence format.

use std::fmt;
use std::fmt::Write as _;

use ripple_component::{ComponentId, ComponentRegistry, ComponentStore, Entity};
use serde::Serialize;

use crate::system::{Matcher, RegisteredSystem};

/// One component as seen by [`EntityInspection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentView {
    pub id: ComponentId,
    pub tag: String,
    /// `Debug` rendering of the value.
    pub value: String,
}

/// Everything the world knows about one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInspection {
    pub entity: Entity,
    pub parent: Option<Entity>,
    pub children: Vec<Entity>,
    /// Nearest ancestor first.
    pub ancestors: Vec<Entity>,
    /// Ordered by tag id.
    pub components: Vec<ComponentView>,
}

impl EntityInspection {
    pub(crate) fn capture(store: &ComponentStore, entity: Entity) -> Option<Self> {
        if !store.contains(entity) {
            return None;
        }
        let registry = store.registry();
        let components = store
            .components(entity)
            .into_iter()
            .map(|(id, data)| ComponentView {
                id,
                tag: registry.name(id).to_string(),
                value: format!("{data:?}"),
            })
            .collect();
        Some(Self {
            entity,
            parent: store.parent(entity),
            children: store.children(entity).to_vec(),
            ancestors: store.ancestors(entity),
            components,
        })
    }
}

impl fmt::Display for EntityInspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        match self.parent {
            Some(parent) => write!(f, " (parent {parent})")?,
            None => f.write_str(" (root)")?,
        }
        if !self.children.is_empty() {
            write!(f, ", {} children", self.children.len())?;
        }
        for component in &self.components {
            write!(f, "\n  {} = {}", component.tag, component.value)?;
        }
        Ok(())
    }
}

/// Flavour of a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    Triggered,
    Query,
}

/// Description of a registered system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub kind: SystemKind,
    /// `kind(Tag)` for each trigger, e.g. `added(Position)`.
    pub triggers: Vec<String>,
    pub required: Vec<String>,
    pub excluded: Vec<String>,
    /// Entities a query system currently considers matching.
    pub members: usize,
}

impl SystemInfo {
    pub(crate) fn describe(system: &RegisteredSystem, registry: &ComponentRegistry) -> Self {
        let names = |ids: &[ComponentId]| -> Vec<String> {
            ids.iter().map(|id| registry.name(*id).to_string()).collect()
        };
        match &system.matcher {
            Matcher::Triggers { triggers, filter } => Self {
                name: system.name.clone(),
                kind: SystemKind::Triggered,
                triggers: triggers
                    .iter()
                    .map(|(id, kind)| format!("{kind}({})", registry.name(*id)))
                    .collect(),
                required: names(&filter.required),
                excluded: names(&filter.excluded),
                members: 0,
            },
            Matcher::Query { query, .. } => Self {
                name: system.name.clone(),
                kind: SystemKind::Query,
                triggers: Vec::new(),
                required: names(&query.required),
                excluded: names(&query.excluded),
                members: system.matcher.member_count(),
            },
        }
    }
}

/// Whole-world dump.
#[derive(Debug, Clone, Serialize)]
pub struct WorldSnapshot {
    /// Ascending by id.
    pub entities: Vec<EntityInspection>,
    /// Registration order.
    pub systems: Vec<SystemInfo>,
    /// Every defined tag, by id.
    pub components: Vec<String>,
    /// Mutations recorded but not yet flushed.
    pub pending_mutations: usize,
    pub subscribers: usize,
}

/// Multi-line description of `entities` for error messages: id, current
/// components, parent chain. Entities that no longer exist are marked.
pub(crate) fn report(store: &ComponentStore, entities: &[Entity]) -> String {
    let registry = store.registry();
    let mut out = String::new();
    for (i, &entity) in entities.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if !store.contains(entity) {
            let _ = write!(out, "  {entity} <removed>");
            continue;
        }
        let components: Vec<String> = store
            .components(entity)
            .into_iter()
            .map(|(id, data)| format!("{}={data:?}", registry.name(id)))
            .collect();
        let _ = write!(out, "  {entity} [{}]", components.join(", "));
        let ancestors = store.ancestors(entity);
        if ancestors.is_empty() {
            out.push_str(" root");
        } else {
            let chain: Vec<String> = ancestors.iter().map(ToString::to_string).collect();
            let _ = write!(out, " <- {}", chain.join(" <- "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use ripple_component::{ComponentData, InsertMode};

    use super::*;

    fn store() -> (ComponentStore, Entity, Entity) {
        let mut store = ComponentStore::new();
        let label = store.registry_mut().define("Label").unwrap();
        let root = store.create(None).unwrap();
        let child = store.create(Some(root)).unwrap();
        store
            .insert(child, label, ComponentData::new("ok"), InsertMode::Add)
            .unwrap();
        (store, root, child)
    }

    #[test]
    fn test_capture_entity() {
        let (store, root, child) = store();
        let view = EntityInspection::capture(&store, child).unwrap();
        assert_eq!(view.parent, Some(root));
        assert_eq!(view.ancestors, vec![root]);
        assert_eq!(view.components[0].tag, "Label");
        assert_eq!(view.components[0].value, "\"ok\"");
        assert_eq!(view.to_string(), "Entity(2) (parent Entity(1))\n  Label = \"ok\"");

        let root_view = EntityInspection::capture(&store, root).unwrap();
        assert_eq!(root_view.to_string(), "Entity(1) (root), 1 children");
        assert!(EntityInspection::capture(&store, Entity(99)).is_none());
    }

    #[test]
    fn test_report_lists_components_and_parents() {
        let (store, root, child) = store();
        let text = report(&store, &[child, root, Entity(42)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  Entity(2) [Label=\"ok\"] <- Entity(1)");
        assert_eq!(lines[1], "  Entity(1) [] root");
        assert_eq!(lines[2], "  Entity(42) <removed>");
    }
}

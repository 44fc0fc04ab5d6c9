//! A tiny retained-mode UI model on top of a ripple world.
//!
//! Every node carries an [`Offset`] relative to its parent. Two systems keep
//! the absolute [`Layout`] in sync: `layout` reacts to offset changes and
//! `propagate` pushes a changed layout one level down, so a move at depth `d`
//! settles in `d + 1` waves. A `mount` query tracks which nodes are visible.

use glam::Vec2;
use ripple_component::{Component, Entity};
use ripple_world::{Bundle, System, World, WorldError};

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
}

impl Component for Node {
    fn type_name() -> &'static str {
        "Node"
    }
}

/// Position relative to the parent node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset(pub Vec2);

impl Component for Offset {
    fn type_name() -> &'static str {
        "Offset"
    }
}

/// Absolute position, derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout(pub Vec2);

impl Component for Layout {
    fn type_name() -> &'static str {
        "Layout"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hidden;

impl Component for Hidden {
    fn type_name() -> &'static str {
        "Hidden"
    }
}

/// Marker maintained by the `mount` system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mounted;

impl Component for Mounted {
    fn type_name() -> &'static str {
        "Mounted"
    }
}

fn parent_origin(world: &World, entity: Entity) -> Vec2 {
    world
        .parent(entity)
        .and_then(|parent| world.get::<Layout>(parent))
        .map_or(Vec2::ZERO, |layout| layout.0)
}

/// Register the layout and mount systems.
pub fn install(world: &World) -> Result<(), WorldError> {
    world.register_system(
        System::triggered("layout")
            .on_added_or_replaced::<Offset>()
            .with::<Node>()
            .run(|world, entities| {
                for &entity in entities {
                    let Some(offset) = world.get::<Offset>(entity) else {
                        continue;
                    };
                    world.set(entity, Layout(parent_origin(world, entity) + offset.0))?;
                }
                Ok(())
            }),
    )?;

    world.register_system(
        System::triggered("propagate")
            .on_replaced::<Layout>()
            .run(|world, entities| {
                for &entity in entities {
                    let Some(layout) = world.get::<Layout>(entity) else {
                        continue;
                    };
                    for child in world.children(entity) {
                        if let Some(offset) = world.get::<Offset>(child) {
                            world.set(child, Layout(layout.0 + offset.0))?;
                        }
                    }
                }
                Ok(())
            }),
    )?;

    world.register_system(
        System::query("mount")
            .with::<Node>()
            .without::<Hidden>()
            .on_enter(|world, entities| {
                for &entity in entities {
                    world.add(entity, Mounted)?;
                }
                tracing::debug!(count = entities.len(), "nodes mounted");
                Ok(())
            })
            .on_exit(|world, entities| {
                for &entity in entities {
                    if world.exists(entity) {
                        world.remove::<Mounted>(entity)?;
                    }
                }
                tracing::debug!(count = entities.len(), "nodes unmounted");
                Ok(())
            }),
    )?;

    Ok(())
}

/// Build a tree of `count` nodes with the given branching factor, in one
/// batch. Returns the nodes in creation order; the first one is the root.
pub fn build_tree(world: &World, count: usize, branching: usize) -> Result<Vec<Entity>, WorldError> {
    let branching = branching.max(1);
    world.batch(|| -> Result<Vec<Entity>, WorldError> {
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            let parent = (i > 0).then(|| nodes[(i - 1) / branching]);
            let column = (i % branching) as f32;
            let node = world.create_entity_with(
                parent,
                Bundle::new()
                    .with(Node {
                        name: format!("node-{i}"),
                    })
                    .with(Offset(Vec2::new(column * 10.0, 20.0))),
            )?;
            nodes.push(node);
        }
        Ok(nodes)
    })?
}

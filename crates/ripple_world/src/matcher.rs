//! Per-wave evaluation of system matchers.

use std::collections::HashSet;

use ripple_component::{ComponentStore, Entity, Mutation};

use crate::system::{Matcher, Phase};

/// One drained batch of mutations.
#[derive(Debug)]
pub(crate) struct Wave {
    pub(crate) number: usize,
    mutations: Vec<Mutation>,
    /// Touched entities, deduplicated, in order of first appearance.
    entities: Vec<Entity>,
}

impl Wave {
    pub(crate) fn new(number: usize, mutations: Vec<Mutation>) -> Self {
        let mut seen = HashSet::with_capacity(mutations.len());
        let entities = mutations
            .iter()
            .map(|m| m.entity)
            .filter(|entity| seen.insert(*entity))
            .collect();
        Self {
            number,
            mutations,
            entities,
        }
    }

    pub(crate) fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub(crate) fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub(crate) fn len(&self) -> usize {
        self.mutations.len()
    }
}

/// A single handler invocation computed for a wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dispatch {
    pub(crate) phase: Phase,
    pub(crate) entities: Vec<Entity>,
}

impl Matcher {
    /// Compute the handler invocations for `wave` against the current store.
    ///
    /// Query membership is updated as a side effect, so a query matcher must
    /// be evaluated exactly once per wave.
    pub(crate) fn evaluate(&self, wave: &Wave, store: &ComponentStore) -> Vec<Dispatch> {
        match self {
            Matcher::Triggers { triggers, filter } => {
                let unfiltered = filter.required.is_empty() && filter.excluded.is_empty();
                let mut seen = HashSet::new();
                let mut hits = Vec::new();
                for mutation in wave.mutations() {
                    if seen.contains(&mutation.entity) {
                        continue;
                    }
                    let triggered = triggers.iter().any(|(component, kind)| {
                        *component == mutation.component && kind.accepts(mutation.kind)
                    });
                    if triggered && (unfiltered || filter.matches(store, mutation.entity)) {
                        seen.insert(mutation.entity);
                        hits.push(mutation.entity);
                    }
                }
                if hits.is_empty() {
                    Vec::new()
                } else {
                    vec![Dispatch {
                        phase: Phase::Run,
                        entities: hits,
                    }]
                }
            }
            Matcher::Query { query, members } => {
                let mut members = members.borrow_mut();
                let mut enter = Vec::new();
                let mut update = Vec::new();
                let mut exit = Vec::new();
                for &entity in wave.entities() {
                    let now = query.matches(store, entity);
                    match (members.contains(&entity), now) {
                        (false, true) => {
                            members.insert(entity);
                            enter.push(entity);
                        }
                        (true, true) => update.push(entity),
                        (true, false) => {
                            members.remove(&entity);
                            exit.push(entity);
                        }
                        (false, false) => {}
                    }
                }
                [
                    (Phase::Enter, enter),
                    (Phase::Update, update),
                    (Phase::Exit, exit),
                ]
                .into_iter()
                .filter(|(_, entities)| !entities.is_empty())
                .map(|(phase, entities)| Dispatch { phase, entities })
                .collect()
            }
        }
    }

    /// Number of entities a query currently considers matching. Always zero
    /// for triggered systems.
    pub(crate) fn member_count(&self) -> usize {
        match self {
            Matcher::Triggers { .. } => 0,
            Matcher::Query { members, .. } => members.borrow().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ripple_component::{
        ComponentData, ComponentId, InsertMode, MutationKind, QueryDescriptor,
    };

    use super::*;
    use crate::system::TriggerKind;

    struct Fixture {
        store: ComponentStore,
        a: ComponentId,
        b: ComponentId,
        c: ComponentId,
    }

    fn fixture() -> Fixture {
        let mut store = ComponentStore::new();
        let a = store.registry_mut().define("A").unwrap();
        let b = store.registry_mut().define("B").unwrap();
        let c = store.registry_mut().define("C").unwrap();
        Fixture { store, a, b, c }
    }

    fn put(store: &mut ComponentStore, entity: Entity, id: ComponentId) -> Mutation {
        let inserted = store
            .insert(entity, id, ComponentData::new(()), InsertMode::Set)
            .unwrap();
        Mutation::new(entity, id, inserted.kind)
    }

    #[test]
    fn test_wave_dedupes_in_first_appearance_order() {
        let a = ComponentId(0);
        let wave = Wave::new(
            0,
            vec![
                Mutation::new(Entity(3), a, MutationKind::Added),
                Mutation::new(Entity(1), a, MutationKind::Added),
                Mutation::new(Entity(3), a, MutationKind::Replaced),
            ],
        );
        assert_eq!(wave.entities(), &[Entity(3), Entity(1)]);
        assert_eq!(wave.len(), 3);
    }

    #[test]
    fn test_trigger_fires_once_per_entity() {
        let mut f = fixture();
        let e = f.store.create(None).unwrap();
        let m1 = put(&mut f.store, e, f.a);
        let m2 = put(&mut f.store, e, f.a);
        assert_eq!(m2.kind, MutationKind::Replaced);

        let matcher = Matcher::Triggers {
            triggers: vec![(f.a, TriggerKind::AddedOrReplaced)],
            filter: QueryDescriptor::new(),
        };
        let dispatches = matcher.evaluate(&Wave::new(0, vec![m1, m2]), &f.store);
        assert_eq!(
            dispatches,
            vec![Dispatch {
                phase: Phase::Run,
                entities: vec![e]
            }]
        );
    }

    #[test]
    fn test_trigger_filter_uses_current_state() {
        let mut f = fixture();
        let with_b = f.store.create(None).unwrap();
        let without_b = f.store.create(None).unwrap();
        let m1 = put(&mut f.store, with_b, f.a);
        put(&mut f.store, with_b, f.b);
        let m2 = put(&mut f.store, without_b, f.a);

        let matcher = Matcher::Triggers {
            triggers: vec![(f.a, TriggerKind::Added)],
            filter: QueryDescriptor::new().with(f.b),
        };
        let dispatches = matcher.evaluate(&Wave::new(0, vec![m1, m2]), &f.store);
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].entities, vec![with_b]);
    }

    #[test]
    fn test_removed_trigger_sees_destroyed_entities() {
        let mut f = fixture();
        let e = f.store.create(None).unwrap();
        put(&mut f.store, e, f.a);
        f.store.remove(e, f.a).unwrap();
        f.store.destroy(e).unwrap();

        let matcher = Matcher::Triggers {
            triggers: vec![(f.a, TriggerKind::Removed)],
            filter: QueryDescriptor::new(),
        };
        let wave = Wave::new(0, vec![Mutation::new(e, f.a, MutationKind::Removed)]);
        assert_eq!(matcher.evaluate(&wave, &f.store)[0].entities, vec![e]);
    }

    #[test]
    fn test_query_transitions() {
        let mut f = fixture();
        let e = f.store.create(None).unwrap();
        let matcher = Matcher::Query {
            query: QueryDescriptor::new().with(f.a).without(f.c),
            members: RefCell::new(HashSet::new()),
        };

        let m = put(&mut f.store, e, f.a);
        let d = matcher.evaluate(&Wave::new(0, vec![m]), &f.store);
        assert_eq!(d[0].phase, Phase::Enter);
        assert_eq!(matcher.member_count(), 1);

        let m = put(&mut f.store, e, f.b);
        let d = matcher.evaluate(&Wave::new(1, vec![m]), &f.store);
        assert_eq!(d[0].phase, Phase::Update);

        let m = put(&mut f.store, e, f.c);
        let d = matcher.evaluate(&Wave::new(2, vec![m]), &f.store);
        assert_eq!(d[0].phase, Phase::Exit);
        assert_eq!(matcher.member_count(), 0);

        // Still excluded: no transition at all.
        let m = put(&mut f.store, e, f.b);
        assert!(matcher.evaluate(&Wave::new(3, vec![m]), &f.store).is_empty());
    }

    #[test]
    fn test_query_phase_order_is_enter_update_exit() {
        let mut f = fixture();
        let stays = f.store.create(None).unwrap();
        let leaves = f.store.create(None).unwrap();
        let joins = f.store.create(None).unwrap();
        let matcher = Matcher::Query {
            query: QueryDescriptor::new().with(f.a),
            members: RefCell::new(HashSet::new()),
        };
        let seed = vec![put(&mut f.store, stays, f.a), put(&mut f.store, leaves, f.a)];
        matcher.evaluate(&Wave::new(0, seed), &f.store);

        f.store.remove(leaves, f.a).unwrap();
        let wave = vec![
            Mutation::new(leaves, f.a, MutationKind::Removed),
            put(&mut f.store, stays, f.b),
            put(&mut f.store, joins, f.a),
        ];
        let phases: Vec<_> = matcher
            .evaluate(&Wave::new(1, wave), &f.store)
            .into_iter()
            .map(|d| (d.phase, d.entities))
            .collect();
        assert_eq!(
            phases,
            vec![
                (Phase::Enter, vec![joins]),
                (Phase::Update, vec![stays]),
                (Phase::Exit, vec![leaves]),
            ]
        );
    }
}

//! Integration tests for strata-ecs

use std::sync::Arc;

use strata_ecs::prelude::*;

// ============================================================================
// Test Components
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Debug, PartialEq)]
struct Health {
    current: u32,
    max: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Allied {
    strength: u32,
}

#[derive(Clone, Debug, PartialEq)]
struct Faction {
    name: &'static str,
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_spawn_attach_query_roundtrip() {
    let mut world = World::new();

    for i in 0..3 {
        let entity = world.spawn_with(Position {
            x: i as f32,
            y: 0.0,
        });
        world
            .attach(entity, Health {
                current: 10 * (i + 1),
                max: 100,
            })
            .unwrap();
    }

    let query = world
        .query()
        .with_plain::<Position>()
        .with_plain::<Health>()
        .build();

    let mut total = 0;
    query.each(&world, |row| {
        total += row.get_at::<Health>(1).current;
    });
    assert_eq!(total, 60);
}

#[test]
fn test_recycled_slot_does_not_alias() {
    let mut world = World::new();

    let old = world.spawn_with(Health {
        current: 1,
        max: 1,
    });
    world.despawn(old).unwrap();

    // The slot is reused under a new generation.
    let new = world.spawn();
    assert_eq!(new.index(), old.index());
    assert_ne!(new, old);

    // The stale handle reaches nothing, the fresh one is clean.
    assert!(!world.is_live(old));
    assert!(matches!(
        world.get::<Health>(old),
        Err(WorldError::NotFound(_))
    ));
    assert!(!world.has::<Health>(new));
}

#[test]
fn test_stale_handle_operations_fail() {
    let mut world = World::new();

    let entity = world.spawn_with(Position { x: 0.0, y: 0.0 });
    world.despawn(entity).unwrap();

    assert!(world.get::<Position>(entity).is_err());
    assert!(world.attach(entity, Health { current: 1, max: 1 }).is_err());
    assert!(world.despawn(entity).is_err());
    assert!(!world.has::<Position>(entity));
    assert!(!world.has_matching(entity, Match::any::<Position>()));
}

#[test]
fn test_spawn_despawn_churn() {
    let mut world = World::new();

    let entities: Vec<Entity> = (0..200)
        .map(|i| {
            world.spawn_with(Position {
                x: i as f32,
                y: 0.0,
            })
        })
        .collect();

    for entity in entities.iter().step_by(2) {
        world.despawn(*entity).unwrap();
    }
    assert_eq!(world.live_count(), 100);

    for i in 0..50 {
        world.spawn_with(Position {
            x: -(i as f32),
            y: 0.0,
        });
    }
    assert_eq!(world.live_count(), 150);

    let query = world.query().with_plain::<Position>().build();
    assert_eq!(query.iter(&world).count(), 150);
}

// ============================================================================
// Relations
// ============================================================================

#[test]
fn test_relation_targets_are_listed() {
    let mut world = World::new();

    let first = world.spawn();
    let second = world.spawn();

    let entity = world.spawn();
    world
        .attach_relation(entity, first, Allied { strength: 1 })
        .unwrap();
    world
        .attach_relation(entity, second, Allied { strength: 2 })
        .unwrap();

    let mut targets = world.relations::<Allied>(entity).unwrap();
    targets.sort_unstable();

    let mut expected = vec![first, second];
    expected.sort_unstable();
    assert_eq!(targets, expected);

    assert_eq!(
        world.get_relation::<Allied>(entity, second).unwrap(),
        Allied { strength: 2 }
    );
}

#[test]
fn test_relation_distinct_from_plain() {
    let mut world = World::new();

    let other = world.spawn();
    let entity = world.spawn_with(Allied { strength: 10 });
    world
        .attach_relation(entity, other, Allied { strength: 20 })
        .unwrap();

    assert_eq!(world.get::<Allied>(entity).unwrap().strength, 10);
    assert_eq!(
        world.get_relation::<Allied>(entity, other).unwrap().strength,
        20
    );

    // Detaching one leaves the other.
    world.detach::<Allied>(entity).unwrap();
    assert!(!world.has::<Allied>(entity));
    assert!(world.has_relation::<Allied>(entity, other));
}

#[test]
fn test_despawn_target_removes_incoming_relations() {
    let mut world = World::new();

    let target = world.spawn();

    let watcher = world.spawn_with(Position { x: 1.0, y: 2.0 });
    world
        .attach_relation(watcher, target, Allied { strength: 5 })
        .unwrap();

    assert!(world.has_relation::<Allied>(watcher, target));

    world.despawn(target).unwrap();

    // The relation is gone; the rest of the row survived the move.
    assert!(!world.has_relation::<Allied>(watcher, target));
    assert!(world.relations::<Allied>(watcher).unwrap().is_empty());
    assert_eq!(
        world.get::<Position>(watcher).unwrap(),
        Position { x: 1.0, y: 2.0 }
    );

    let query = world.query().with_any_entity::<Allied>().build();
    assert_eq!(query.iter(&world).count(), 0);
}

#[test]
fn test_relation_to_live_target_only() {
    let mut world = World::new();

    let target = world.spawn();
    world.despawn(target).unwrap();

    let entity = world.spawn();
    assert!(matches!(
        world.attach_relation(entity, target, Allied { strength: 1 }),
        Err(WorldError::NotFound(_))
    ));
}

// ============================================================================
// Wildcard Matching
// ============================================================================

#[test]
fn test_wildcard_families() {
    let mut world = World::new();

    let other = world.spawn();
    let faction = Arc::new(Faction { name: "north" });

    let entity = world.spawn_with(Allied { strength: 1 });
    world
        .attach_relation(entity, other, Allied { strength: 2 })
        .unwrap();
    world.attach_link(entity, &faction).unwrap();

    assert!(world.has_matching(entity, Match::any::<Allied>()));
    assert!(world.has_matching(entity, Match::any_target::<Allied>()));
    assert!(world.has_matching(entity, Match::any_entity::<Allied>()));
    assert!(!world.has_matching(entity, Match::any_object::<Allied>()));

    assert!(world.has_matching(entity, Match::any_object::<Faction>()));
    assert!(!world.has_matching(entity, Match::plain::<Faction>()));
    assert!(!world.has_matching(entity, Match::any_entity::<Faction>()));
}

#[test]
fn test_cross_join_row_counts() {
    let mut world = World::new();

    let first = world.spawn();
    let second = world.spawn();

    let entity = world.spawn_with(Allied { strength: 10 });
    world
        .attach_relation(entity, first, Allied { strength: 1 })
        .unwrap();
    world
        .attach_relation(entity, second, Allied { strength: 2 })
        .unwrap();

    // One row per matched column.
    let any = world.query().with_any::<Allied>().build();
    assert_eq!(any.iter(&world).count(), 3);

    let entities = world.query().with_any_entity::<Allied>().build();
    assert_eq!(entities.iter(&world).count(), 2);

    // Two wildcard terms over the same two columns: full product.
    let product = world
        .query()
        .with_any_entity::<Allied>()
        .with_any_entity::<Allied>()
        .build();

    let mut pairs: Vec<(u32, u32)> = product
        .iter(&world)
        .map(|row| {
            (
                row.get_at::<Allied>(0).strength,
                row.get_at::<Allied>(1).strength,
            )
        })
        .collect();
    pairs.sort_unstable();
    assert_eq!(pairs, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
}

// ============================================================================
// Links
// ============================================================================

#[test]
fn test_shared_link_end_to_end() {
    let mut world = World::new();

    let faction = Arc::new(Faction { name: "east" });

    let a = world.spawn();
    let b = world.spawn();
    world.attach_link(a, &faction).unwrap();
    world.attach_link(b, &faction).unwrap();

    // Both rows reach the same allocation.
    let stored_a = world.get_link(a, &faction).unwrap();
    let stored_b = world.get_link(b, &faction).unwrap();
    assert!(Arc::ptr_eq(&stored_a, &stored_b));
    assert!(Arc::ptr_eq(&stored_a, &faction));

    // The link id round-trips through the registry.
    let query = world.query().with_any_object::<Faction>().build();
    let rows: Vec<_> = query.iter(&world).collect();
    assert_eq!(rows.len(), 2);

    let id = rows[0].link(0).unwrap();
    let resolved = strata_ecs::link::resolve::<Faction>(id).unwrap();
    assert!(Arc::ptr_eq(&resolved, &faction));

    // Detaching returns the handle and drops the key.
    let detached = world.detach_link(a, &faction).unwrap();
    assert!(Arc::ptr_eq(&detached, &faction));
    assert!(!world.has_link(a, &faction));
    assert!(world.has_link(b, &faction));
}

#[test]
fn test_equal_value_links_stay_distinct() {
    let mut world = World::new();

    let north_a = Arc::new(Faction { name: "north" });
    let north_b = Arc::new(Faction { name: "north" });
    assert_eq!(*north_a, *north_b);

    let entity = world.spawn();
    world.attach_link(entity, &north_a).unwrap();

    // Same value, different allocation: not the same link.
    assert!(world.has_link(entity, &north_a));
    assert!(!world.has_link(entity, &north_b));

    let query = world.query().with_link(&north_b).build();
    assert_eq!(query.iter(&world).count(), 0);
}

// ============================================================================
// Mixed Archetypes
// ============================================================================

#[test]
fn test_query_spans_archetypes() {
    let mut world = World::new();

    // Same fetch term satisfied by three different archetypes.
    let plain = world.spawn_with(Health {
        current: 1,
        max: 10,
    });

    let positioned = world.spawn_with(Health {
        current: 2,
        max: 10,
    });
    world
        .attach(positioned, Position { x: 0.0, y: 0.0 })
        .unwrap();

    let related = world.spawn_with(Health {
        current: 3,
        max: 10,
    });
    world
        .attach_relation(related, plain, Allied { strength: 1 })
        .unwrap();

    let query = world.query().with_plain::<Health>().build();

    let mut seen: Vec<u32> = query
        .iter(&world)
        .map(|row| row.get::<Health>().current)
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3]);

    let without = world
        .query()
        .with_plain::<Health>()
        .without(Match::any_entity::<Allied>())
        .build();
    assert_eq!(without.iter(&world).count(), 2);
}


use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use recruit_sync::feed::{ApplyOutcome, ChangeEnvelope, EntityKind, MirrorStore, RecordId};
use test_harness::{ids, insert, record, update};

const JOBS: EntityKind = EntityKind::Jobs;

#[test]
fn test_insert_update_insert_delete_sequence() {
    let mut store = MirrorStore::new(JOBS);

    store.apply(insert(JOBS, json!({"id": 1, "name": "A"})));
    store.apply(update(JOBS, json!({"id": 1, "name": "B"})));
    store.apply(insert(JOBS, json!({"id": 2, "name": "C"})));
    store.apply(ChangeEnvelope::delete(JOBS, 1u64));

    assert_eq!(store.snapshot(), vec![record(json!({"id": 2, "name": "C"}))]);
}

#[test]
fn test_double_insert_is_idempotent() {
    let mut store = MirrorStore::new(JOBS);
    let envelope = insert(JOBS, json!({"id": "j1", "title": "Backend"}));

    assert_eq!(store.apply(envelope.clone()), ApplyOutcome::Inserted);
    let once = store.snapshot();
    assert_eq!(store.apply(envelope), ApplyOutcome::Replaced);

    assert_eq!(store.snapshot(), once);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_insert_of_known_id_keeps_position() {
    let mut store = MirrorStore::with_snapshot(
        JOBS,
        vec![
            record(json!({"id": "a", "v": 1})),
            record(json!({"id": "b", "v": 1})),
            record(json!({"id": "c", "v": 1})),
        ],
    );

    store.apply(insert(JOBS, json!({"id": "b", "v": 2})));

    let snapshot = store.snapshot();
    assert_eq!(ids(&snapshot), vec!["a", "b", "c"]);
    assert_eq!(snapshot[1], record(json!({"id": "b", "v": 2})));
}

#[test]
fn test_new_inserts_are_prepended() {
    let mut store = MirrorStore::with_snapshot(JOBS, vec![record(json!({"id": "old"}))]);
    store.apply(insert(JOBS, json!({"id": "new1"})));
    store.apply(insert(JOBS, json!({"id": "new2"})));

    assert_eq!(ids(&store.snapshot()), vec!["new2", "new1", "old"]);
}

#[test]
fn test_update_merges_shallowly() {
    let mut store = MirrorStore::with_snapshot(
        EntityKind::Applications,
        vec![record(
            json!({"id": "app1", "status": "applied", "score": 40, "meta": {"a": 1}}),
        )],
    );

    let outcome = store.apply(update(
        EntityKind::Applications,
        json!({"id": "app1", "status": "interview", "meta": {"b": 2}}),
    ));

    assert_eq!(outcome, ApplyOutcome::Updated);
    assert_eq!(
        store.get(&RecordId::from("app1")),
        Some(&record(
            json!({"id": "app1", "status": "interview", "score": 40, "meta": {"b": 2}})
        ))
    );
}

#[test]
fn test_update_of_absent_id_changes_nothing() {
    let mut store = MirrorStore::with_snapshot(JOBS, vec![record(json!({"id": "a"}))]);
    let before = store.snapshot();

    assert_eq!(
        store.apply(update(JOBS, json!({"id": "ghost", "title": "x"}))),
        ApplyOutcome::Ignored
    );
    assert_eq!(store.snapshot(), before);
    assert!(!store.contains(&RecordId::from("ghost")));
}

#[test]
fn test_delete_of_absent_id_is_noop() {
    let mut store = MirrorStore::with_snapshot(JOBS, vec![record(json!({"id": "a"}))]);

    assert_eq!(
        store.apply(ChangeEnvelope::delete(JOBS, "zz")),
        ApplyOutcome::Ignored
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn test_other_entity_kind_is_ignored() {
    let mut store = MirrorStore::new(JOBS);
    let outcome = store.apply(insert(EntityKind::Interviews, json!({"id": "i1"})));

    assert_eq!(outcome, ApplyOutcome::Ignored);
    assert!(store.is_empty());
}

#[test]
fn test_replace_snapshot_drops_previous_contents() {
    let mut store = MirrorStore::with_snapshot(
        JOBS,
        vec![record(json!({"id": "a"})), record(json!({"id": "b"}))],
    );

    let kept = store.replace_snapshot(vec![
        record(json!({"id": "c"})),
        record(json!({"title": "no id"})),
        record(json!({"id": "c", "dup": true})),
    ]);

    assert_eq!(kept, 1);
    assert_eq!(store.snapshot(), vec![record(json!({"id": "c"}))]);
}

/// Random envelope sequences over a small id space keep the store consistent
/// with a set of live ids.
#[test]
fn test_random_sequences_keep_ids_unique() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let mut store = MirrorStore::new(JOBS);
        let mut live: HashSet<String> = HashSet::new();

        for step in 0..200 {
            let id = format!("r{}", rng.gen_range(0..8));
            match rng.gen_range(0..3) {
                0 => {
                    store.apply(insert(JOBS, json!({"id": id, "step": step})));
                    live.insert(id.clone());
                }
                1 => {
                    let outcome = store.apply(update(JOBS, json!({"id": id, "step": step})));
                    assert_eq!(outcome == ApplyOutcome::Updated, live.contains(&id));
                }
                _ => {
                    let outcome = store.apply(ChangeEnvelope::delete(JOBS, id.as_str()));
                    assert_eq!(outcome == ApplyOutcome::Deleted, live.remove(&id));
                }
            }

            let store_ids: Vec<String> = store.ids().iter().map(|i| i.to_string()).collect();
            let unique: HashSet<&String> = store_ids.iter().collect();
            assert_eq!(unique.len(), store_ids.len(), "duplicate id in store");
            assert_eq!(unique.len(), live.len());
            assert!(live.iter().all(|id| unique.contains(id)));
        }
    }
}

use drbd_model::OrderedMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KEY_SPACE: u32 = 400;

/// Neighbor lookups against a sorted vector.
fn reference_floor(keys: &[u32], key: u32) -> Option<u32> {
    keys.iter().rev().find(|&&k| k <= key).copied()
}

fn reference_ceiling(keys: &[u32], key: u32) -> Option<u32> {
    keys.iter().find(|&&k| k >= key).copied()
}

fn reference_greater(keys: &[u32], key: u32) -> Option<u32> {
    keys.iter().find(|&&k| k > key).copied()
}

fn reference_less(keys: &[u32], key: u32) -> Option<u32> {
    keys.iter().rev().find(|&&k| k < key).copied()
}

fn check_against_reference(map: &OrderedMap<u32, u64>, reference: &[u32], rng: &mut StdRng) {
    assert_eq!(map.len(), reference.len());
    let keys: Vec<u32> = map.keys().copied().collect();
    assert_eq!(keys, reference);
    let reversed: Vec<u32> = map.keys().rev().copied().collect();
    assert!(reversed.iter().rev().eq(reference.iter()));

    for _ in 0..16 {
        let probe = rng.gen_range(0..=KEY_SPACE);
        assert_eq!(map.floor(&probe).map(|(k, _)| *k), reference_floor(reference, probe));
        assert_eq!(map.ceiling(&probe).map(|(k, _)| *k), reference_ceiling(reference, probe));
        assert_eq!(map.greater(&probe).map(|(k, _)| *k), reference_greater(reference, probe));
        assert_eq!(map.less(&probe).map(|(k, _)| *k), reference_less(reference, probe));
    }
}

#[test]
fn random_operations_match_sorted_vector() {
    for seed in [1_u64, 7, 42, 2024] {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut map = OrderedMap::new();
        let mut reference: Vec<u32> = Vec::new();

        for step in 0..2_000_u64 {
            let key = rng.gen_range(0..KEY_SPACE);
            if rng.gen_bool(0.6) {
                let previous = map.insert(key, step);
                match reference.binary_search(&key) {
                    Ok(_) => assert!(previous.is_some()),
                    Err(pos) => {
                        assert!(previous.is_none());
                        reference.insert(pos, key);
                    }
                }
                assert_eq!(map.get(&key), Some(&step));
            } else {
                let removed = map.remove(&key);
                match reference.binary_search(&key) {
                    Ok(pos) => {
                        assert!(removed.is_some());
                        reference.remove(pos);
                    }
                    Err(_) => assert!(removed.is_none()),
                }
                assert!(!map.contains_key(&key));
            }
            if step % 100 == 0 {
                check_against_reference(&map, &reference, &mut rng);
            }
        }
        check_against_reference(&map, &reference, &mut rng);
    }
}

#[test]
fn node_walk_survives_removal_of_visited_nodes() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut map: OrderedMap<u32, u64> = (0..300).map(|key| (key, u64::from(key))).collect();

    let mut kept = Vec::new();
    let mut cursor = map.first_node();
    while let Some(id) = cursor {
        cursor = map.next_node(id);
        if rng.gen_bool(0.5) {
            let (key, value) = map.remove_node(id).expect("live node");
            assert_eq!(u64::from(key), value);
            assert!(map.node(id).is_none());
        } else {
            kept.push(map.node(id).map(|(key, _)| *key).expect("live node"));
        }
    }
    let keys: Vec<u32> = map.keys().copied().collect();
    assert_eq!(keys, kept);

    let mut backwards = Vec::new();
    let mut cursor = map.last_node();
    while let Some(id) = cursor {
        backwards.push(*map.node(id).expect("live node").0);
        cursor = map.prev_node(id);
    }
    backwards.reverse();
    assert_eq!(backwards, kept);
}

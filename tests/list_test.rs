use petek::{MaxFirst, SortedList};

#[test]
fn test_singleton() {
    let list: SortedList<u32, &str> = SortedList::new();
    list.insert(5, "a");
    assert_eq!(list.try_peek_top_key(), Some(5));
    assert_eq!(list.try_pop(), Some("a"));
    assert_eq!(list.try_pop(), None);
    assert_eq!(list.size(), 0);
}

#[test]
fn test_duplicate_keys() {
    let list: SortedList<u32, String> = SortedList::new();
    list.insert(3, "x".to_string());
    list.insert(3, "y".to_string());

    let mut values = vec![];
    for _ in 0..2 {
        let (key, value) = list.try_pop_entry().unwrap();
        assert_eq!(key, 3);
        values.push(value);
    }
    values.sort();
    assert_eq!(values, vec!["x", "y"]);
    assert_eq!(list.size(), 0);
}

#[test]
fn test_drain_is_key_ordered() {
    let list: SortedList<u32, u32> = SortedList::new();
    for key in [7, 2, 5, 9, 2] {
        list.insert(key, key * 10);
    }

    let mut keys = vec![];
    while let Some((key, value)) = list.try_pop_entry() {
        assert_eq!(value, key * 10);
        keys.push(key);
    }
    assert_eq!(keys, vec![2, 2, 5, 7, 9]);
    assert_eq!(list.size(), 0);
}

#[test]
fn test_drain_many_shuffled() {
    let list: SortedList<u64, u64> = SortedList::new();
    // 0..997 visited in a scrambled order via a multiplicative walk.
    let n = 997u64;
    let mut k = 1u64;
    for _ in 0..n {
        list.insert(k, k);
        k = (k * 5) % n;
    }
    assert_eq!(list.size(), n as usize);

    let mut prev = None;
    let mut count = 0;
    while let Some((key, _)) = list.try_pop_entry() {
        if let Some(p) = prev {
            assert!(p <= key, "pop order regressed: {} after {}", key, p);
        }
        prev = Some(key);
        count += 1;
    }
    assert_eq!(count, n);
}

#[test]
fn test_compare_try_pop_mismatch_updates_expected() {
    let list: SortedList<u32, u32> = SortedList::new();
    list.insert(4, 400);

    let mut expected = 3;
    assert_eq!(list.compare_try_pop(&mut expected), None);
    assert_eq!(expected, 4);
    // Nothing was removed.
    assert_eq!(list.size(), 1);
    assert_eq!(list.try_peek_top_key(), Some(4));
}

#[test]
fn test_compare_try_pop_match_removes_head() {
    let list: SortedList<u32, u32> = SortedList::new();
    list.insert(4, 400);

    let mut expected = 4;
    assert_eq!(list.compare_try_pop(&mut expected), Some(400));
    assert_eq!(expected, 4);
    assert_eq!(list.size(), 0);
}

#[test]
fn test_compare_try_pop_empty_leaves_expected_untouched() {
    let list: SortedList<u32, u32> = SortedList::new();
    let mut expected = 3;
    assert_eq!(list.compare_try_pop(&mut expected), None);
    // Empty surfaces as empty, not as a mismatch.
    assert_eq!(expected, 3);
    assert_eq!(list.size(), 0);
}

#[test]
fn test_compare_try_pop_walks_to_success() {
    let list: SortedList<u32, u32> = SortedList::new();
    list.insert(2, 20);
    list.insert(8, 80);

    let mut expected = 0;
    assert_eq!(list.compare_try_pop(&mut expected), None);
    assert_eq!(expected, 2);
    assert_eq!(list.compare_try_pop(&mut expected), Some(20));
    assert_eq!(list.compare_try_pop(&mut expected), None);
    assert_eq!(expected, 8);
    assert_eq!(list.compare_try_pop(&mut expected), Some(80));
    assert_eq!(list.size(), 0);
}

#[test]
fn test_peek_then_pop_is_consistent() {
    let list: SortedList<u32, u32> = SortedList::new();
    for key in [12, 4, 30] {
        list.insert(key, key);
    }
    let hint = list.try_peek_top_key().unwrap();
    let (popped, _) = list.try_pop_entry().unwrap();
    assert!(hint <= popped);
}

#[test]
fn test_peek_empty() {
    let list: SortedList<u32, u32> = SortedList::new();
    assert_eq!(list.try_peek_top_key(), None);
}

#[test]
fn test_size_tracks_inserts_and_pops() {
    let list: SortedList<u32, u32> = SortedList::new();
    for key in 0..10 {
        list.insert(key, key);
    }
    assert_eq!(list.size(), 10);
    for expected in (4..10).rev() {
        list.try_pop().unwrap();
        assert_eq!(list.size(), expected);
    }
}

#[test]
fn test_clear_then_reuse() {
    let mut list: SortedList<u32, u32> = SortedList::new();
    for key in 0..50 {
        list.insert(key, key);
    }
    list.clear();
    assert_eq!(list.size(), 0);
    assert_eq!(list.try_pop(), None);
    assert_eq!(list.try_peek_top_key(), None);

    list.insert(1, 10);
    list.insert(0, 0);
    assert_eq!(list.try_pop_entry(), Some((0, 0)));
    assert_eq!(list.try_pop_entry(), Some((1, 10)));
}

#[test]
fn test_max_first_order() {
    let list: SortedList<u32, u32, MaxFirst> = SortedList::new();
    for key in [7, 2, 5, 9, 2] {
        list.insert(key, key);
    }
    let mut keys = vec![];
    while let Some((key, _)) = list.try_pop_entry() {
        keys.push(key);
    }
    assert_eq!(keys, vec![9, 7, 5, 2, 2]);
}

#[test]
fn test_float_keys() {
    let list: SortedList<f64, u32> = SortedList::new();
    list.insert(2.5, 25);
    list.insert(-1.0, 10);
    list.insert(0.25, 2);

    assert_eq!(list.try_peek_top_key(), Some(-1.0));
    assert_eq!(list.try_pop(), Some(10));
    assert_eq!(list.try_pop(), Some(2));
    assert_eq!(list.try_pop(), Some(25));
}

#[test]
fn test_string_values_drop_cleanly() {
    let list: SortedList<u32, String> = SortedList::new();
    for key in 0..100 {
        list.insert(key % 7, format!("value-{}", key));
    }
    for _ in 0..40 {
        assert!(list.try_pop().is_some());
    }
    // The rest is released through drop.
    assert_eq!(list.size(), 60);
}

#[test]
fn test_pop_beyond_block_capacity() {
    // Push the pool through several growth steps.
    let list: SortedList<u32, u32> = SortedList::new();
    for round in 0..3 {
        for key in 0..500 {
            list.insert(key, round);
        }
        let mut count = 0;
        while list.try_pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 500);
        assert_eq!(list.size(), 0);
    }
}

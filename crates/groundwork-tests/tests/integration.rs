//! Cross-subsystem scenarios: containers, error state, logger, and clock
//! working against instrumented allocators.

use groundwork_core::allocator::AllocHandle;
use groundwork_core::error::ErrorKind;
use groundwork_core::types::{HashMap, StringMap, blob_eq, blob_hash};
use groundwork_core::{ClockKind, TimePoint};
use groundwork_tests::{CountingAllocator, FailingAllocator, crippled_raw_allocator, raw_heap_allocator};

#[test]
fn container_lifecycles_balance_their_allocations() {
    let (counting, counters) = CountingAllocator::new();
    let alloc = AllocHandle::custom(counting);

    {
        let mut map = StringMap::with_capacity(2, &alloc).unwrap();
        for i in 0..50 {
            map.set(&format!("key{i}"), &format!("value{i}")).unwrap();
        }
        for i in (0..50).step_by(2) {
            map.unset(&format!("key{i}")).unwrap();
        }
        map.fini().unwrap();
    }
    {
        let mut hash: HashMap<u32, u32> =
            HashMap::with_capacity(2, blob_hash::<u32>, blob_eq::<u32>, &alloc).unwrap();
        for i in 0..100 {
            hash.set(&i, &(i * 2)).unwrap();
        }
        hash.fini().unwrap();
    }

    assert!(counters.allocations() > 0);
    assert_eq!(counters.live(), 0, "container teardown leaked");
    assert_eq!(counters.allocations(), counters.deallocations());
}

#[test]
fn allocation_failure_reports_bad_alloc_and_sets_the_error_state() {
    // Enough budget to build the map, none for the fourth entry.
    let (failing, exhausted) = FailingAllocator::new(8);
    let alloc = AllocHandle::custom(failing);

    let mut map = StringMap::with_capacity(2, &alloc).unwrap();
    let mut result = Ok(());
    for i in 0..10 {
        result = map.set(&format!("key{i}"), &format!("value{i}"));
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(ErrorKind::BadAlloc));
    assert!(exhausted.load(std::sync::atomic::Ordering::SeqCst));
    assert!(groundwork_core::error_is_set());
    let formatted = groundwork_core::get_error_string();
    assert!(formatted.as_str().contains("string map"), "got: {}", formatted.as_str());

    // Entries stored before the failure are intact.
    assert_eq!(map.get("key0"), Some("value0"));
    groundwork_core::reset_error();
}

#[test]
fn raw_allocator_adapter_drives_containers() {
    let alloc = AllocHandle::from_raw(raw_heap_allocator());
    let mut map = StringMap::with_capacity(1, &alloc).unwrap();
    map.set("from", "foreign allocator").unwrap();
    assert_eq!(map.get("from"), Some("foreign allocator"));
    map.fini().unwrap();
}

#[test]
fn crippled_raw_allocator_is_rejected_up_front() {
    let alloc = AllocHandle::from_raw(crippled_raw_allocator());
    assert!(!alloc.is_valid());
    assert_eq!(
        StringMap::with_capacity(1, &alloc).err(),
        Some(ErrorKind::InvalidArgument)
    );
    groundwork_core::reset_error();
}

#[test]
fn chained_error_walks_up_a_call_stack() {
    groundwork_core::reset_error();

    fn leaf() -> groundwork_core::Result {
        groundwork_core::set_error_msg!("disk probe failed");
        Err(ErrorKind::Error)
    }

    fn middle() -> groundwork_core::Result {
        leaf().map_err(|err| {
            let current = groundwork_core::get_error_string();
            groundwork_core::set_error_msg!(current.as_str());
            err
        })
    }

    assert_eq!(middle(), Err(ErrorKind::Error));
    let formatted = groundwork_core::get_error_string();
    let occurrences = formatted.as_str().matches(", at ").count();
    assert_eq!(occurrences, 2, "got: {}", formatted.as_str());
    assert!(formatted.as_str().starts_with("disk probe failed, at "));
    groundwork_core::reset_error();
}

#[test]
fn ros_override_is_visible_across_threads() {
    let source = std::sync::Arc::new(groundwork_core::ClockSource::ros().unwrap());
    source.set_ros_time_override(5_000_000_000).unwrap();
    source.enable_ros_time_override().unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let source = source.clone();
        handles.push(std::thread::spawn(move || {
            source.now().unwrap().nanoseconds
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5_000_000_000);
    }
}

#[test]
fn duration_math_spans_sources() {
    let start = TimePoint {
        nanoseconds: groundwork_core::time::steady_time_now().unwrap(),
        clock_kind: ClockKind::Steady,
    };
    std::thread::sleep(std::time::Duration::from_millis(5));
    let finish = TimePoint {
        nanoseconds: groundwork_core::time::steady_time_now().unwrap(),
        clock_kind: ClockKind::Steady,
    };
    let elapsed = groundwork_core::time::difference_times(&start, &finish).unwrap();
    assert!(elapsed.nanoseconds >= 5_000_000);
    assert_eq!(elapsed.clock_kind, ClockKind::Steady);
}

#[test]
fn error_state_stays_thread_private_under_load() {
    let mut handles = Vec::new();
    for thread_index in 0..8 {
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                groundwork_core::reset_error();
                groundwork_core::error::set_error_state(
                    &format!("thread {thread_index} error {i}"),
                    "integration.rs",
                    i,
                );
                let state = groundwork_core::get_error_state().unwrap();
                assert_eq!(state.message(), format!("thread {thread_index} error {i}"));
            }
            groundwork_core::reset_error();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

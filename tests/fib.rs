use std::str::FromStr;
use std::time::{Duration, Instant};

use inetnum::addr::Prefix;

use fib_store::{Fib, FibConfig, FibError, IPv4, IPv6, PrefixId};

mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

fn p4(net: u32, len: u8) -> PrefixId<IPv4> {
    PrefixId::new(net.into(), len)
}

fn p4s(s: &str) -> PrefixId<IPv4> {
    PrefixId::try_from(Prefix::from_str(s).unwrap()).unwrap()
}

fn p6s(s: &str) -> PrefixId<IPv6> {
    PrefixId::try_from(Prefix::from_str(s).unwrap()).unwrap()
}

#[test]
fn simple_insert_find() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());

    // 121.155.218.0/24
    let pfx = p4(2040257024, 24);
    assert_eq!(pfx, p4s("121.155.218.0/24"));

    let (entry, created) = fib.get_or_insert_with(pfx, || 42).unwrap();
    assert!(created);
    assert_eq!(entry.prefix(), pfx);
    assert_eq!(*entry, 42);
    drop(entry);

    let found = fib.find(pfx).expect("failed to find node which was added");
    assert_eq!(*found, 42);
    assert_eq!(found.prefix(), pfx);
    drop(found);

    assert_eq!(fib.len(), 1);
    fib.consistency_check().unwrap();
}

#[test]
fn get_is_idempotent() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
    let pfx = p4s("10.10.0.0/16");

    let (first, created) = fib.get_or_insert_with(pfx, || 1).unwrap();
    assert!(created);
    drop(first);

    // The initialiser of the second call must never run.
    let (second, created) = fib.get_or_insert_with(pfx, || panic!("ran twice")).unwrap();
    assert!(!created);
    assert_eq!(*second, 1);
    drop(second);

    assert_eq!(fib.len(), 1);
}

#[test]
fn sequential_host_routes() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());

    for i in 0..10_000_u32 {
        let (_, created) = fib.get_or_insert_with(p4(i, 32), || i).unwrap();
        assert!(created);
    }
    assert_eq!(fib.len(), 10_000);

    for i in 0..10_000_u32 {
        let entry = fib.find(p4(i, 32)).expect("inserted entry not found");
        assert_eq!(*entry, i);
    }

    // The default order is 10, so 10k entries must have grown the table
    // a few times along the way.
    let stats = fib.stats();
    assert!(stats.rehashes >= 3, "expected growth, got {:?}", stats);
    assert!(stats.hash_size >= 8192);

    fib.consistency_check().unwrap();

    for i in 0..10_000_u32 {
        assert!(fib.remove_prefix(p4(i, 32)).unwrap());
    }
    assert_eq!(fib.len(), 0);

    for i in (0..10_000_u32).step_by(977) {
        assert!(fib.find(p4(i, 32)).is_none());
    }
    fib.consistency_check().unwrap();
}

#[test]
fn remove_is_exactly_once() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
    let pfx = p4s("203.0.113.0/24");
    drop(fib.get_or_insert_with(pfx, || 0).unwrap());

    // Two independent handles to the same entry: only one remove wins.
    let first = fib.find(pfx).unwrap();
    let second = fib.find(pfx).unwrap();
    assert!(fib.remove(first).unwrap());
    assert!(second.is_deleted());
    assert!(!fib.remove(second).unwrap());

    assert_eq!(fib.len(), 0);
    assert!(fib.find(pfx).is_none());
    assert!(!fib.remove_prefix(pfx).unwrap());
}

#[test]
fn reinsert_after_remove() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
    let pfx = p4s("198.51.100.0/24");

    for round in 0..100_u32 {
        let (entry, created) = fib.get_or_insert_with(pfx, || round).unwrap();
        assert!(created);
        assert_eq!(*entry, round);
        assert!(fib.remove(entry).unwrap());
    }
    assert!(fib.is_empty());
    fib.consistency_check().unwrap();
}

#[test]
fn longest_prefix_match_v4() {
    common::init();

    let fib: Fib<IPv4, &'static str> = Fib::new(FibConfig::default());
    drop(fib.get_or_insert_with(p4s("10.0.0.0/8"), || "eight").unwrap());
    drop(fib.get_or_insert_with(p4s("10.1.0.0/16"), || "sixteen").unwrap());
    drop(fib.get_or_insert_with(p4s("10.1.2.0/24"), || "twentyfour").unwrap());

    assert_eq!(fib.route(p4s("10.1.2.3/32")).as_deref(), Some(&"twentyfour"));
    assert_eq!(fib.route(p4s("10.1.2.0/24")).as_deref(), Some(&"twentyfour"));
    assert_eq!(fib.route(p4s("10.1.9.9/32")).as_deref(), Some(&"sixteen"));
    assert_eq!(fib.route(p4s("10.200.0.1/32")).as_deref(), Some(&"eight"));
    assert!(fib.route(p4s("11.0.0.1/32")).is_none());

    // A default route catches everything.
    drop(fib.get_or_insert_with(p4s("0.0.0.0/0"), || "default").unwrap());
    assert_eq!(fib.route(p4s("11.0.0.1/32")).as_deref(), Some(&"default"));
    assert_eq!(fib.route(p4s("10.1.2.3/32")).as_deref(), Some(&"twentyfour"));
}

#[test]
fn longest_prefix_match_v6() {
    common::init();

    let fib: Fib<IPv6, u8> = Fib::new(FibConfig::default());
    drop(fib.get_or_insert_with(p6s("2001:db8::/32"), || 32).unwrap());
    drop(fib.get_or_insert_with(p6s("2001:db8:cafe::/48"), || 48).unwrap());

    assert_eq!(fib.route(p6s("2001:db8:cafe::1/128")).as_deref(), Some(&48));
    assert_eq!(fib.route(p6s("2001:db8:beef::1/128")).as_deref(), Some(&32));
    assert!(fib.route(p6s("2001:db9::/32")).is_none());
}

#[test]
fn family_mismatch_is_rejected() {
    let v6 = Prefix::from_str("2001:db8::/32").unwrap();
    assert_eq!(
        PrefixId::<IPv4>::try_from(v6),
        Err(FibError::AddressFamilyMismatch)
    );
}

#[test]
fn oversized_prefix_length_is_rejected() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
    let bogus = p4(0xC0A8_0000, 33);
    assert_eq!(
        fib.get_or_insert_with(bogus, || 0).err(),
        Some(FibError::PrefixLengthInvalid)
    );
    assert_eq!(fib.len(), 0);
    assert!(fib.find(bogus).is_none());
}

#[test]
fn growth_from_small_table() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig {
        hash_order: 4,
        ..FibConfig::default()
    });
    assert_eq!(fib.stats().hash_size, 16);

    for i in 0..1000_u32 {
        drop(fib.get_or_insert_with(p4(i, 32), || i).unwrap());
    }

    let stats = fib.stats();
    assert!(stats.hash_size >= 512, "table did not grow: {:?}", stats);
    assert!(stats.entries_max >= stats.entries);

    for i in 0..1000_u32 {
        assert_eq!(*fib.find(p4(i, 32)).unwrap(), i);
    }
    fib.consistency_check().unwrap();
}

#[test]
fn reclaimer_frees_deleted_nodes() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig {
        reclaim_interval: Duration::from_millis(20),
        ..FibConfig::default()
    });

    for i in 0..1000_u32 {
        drop(fib.get_or_insert_with(p4(i, 32), || i).unwrap());
    }
    for i in 0..1000_u32 {
        assert!(fib.remove_prefix(p4(i, 32)).unwrap());
    }
    assert_eq!(fib.len(), 0);

    // With no live hazards, the next cycles should release everything.
    let deadline = Instant::now() + Duration::from_secs(10);
    while fib.stats().reclaimed < 1000 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let stats = fib.stats();
    assert_eq!(stats.reclaimed, 1000, "stuck: {:?}", stats);
    assert!(stats.reclaim_cycles > 0);
}

#[test]
fn drop_releases_outstanding_garbage() {
    common::init();

    // A long reclaim interval: the thread never gets to run a cycle, so
    // everything is released by the teardown path instead.
    let fib: Fib<IPv4, Vec<u32>> = Fib::new(FibConfig {
        reclaim_interval: Duration::from_secs(3600),
        ..FibConfig::default()
    });
    for i in 0..500_u32 {
        drop(fib.get_or_insert_with(p4(i, 32), || vec![i; 8]).unwrap());
    }
    for i in 0..250_u32 {
        assert!(fib.remove_prefix(p4(i, 32)).unwrap());
    }
    assert_eq!(fib.len(), 250);
    drop(fib);
}

#[test]
fn entry_outlives_deletion() {
    common::init();

    let fib: Fib<IPv4, String> = Fib::new(FibConfig {
        reclaim_interval: Duration::from_millis(10),
        ..FibConfig::default()
    });
    let pfx = p4s("198.18.0.0/15");
    drop(fib.get_or_insert_with(pfx, || "benchmarking".to_string()).unwrap());

    let held = fib.find(pfx).unwrap();
    assert!(fib.remove_prefix(pfx).unwrap());
    assert_eq!(fib.len(), 0);

    // The node is gone from the table but the guard keeps it alive, even
    // across reclaim cycles.
    std::thread::sleep(Duration::from_millis(50));
    assert!(held.is_deleted());
    assert_eq!(held.as_str(), "benchmarking");
    drop(held);
}

#[test]
fn entry_moves_between_threads() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
    let pfx = p4s("192.88.99.0/24");
    drop(fib.get_or_insert_with(pfx, || 6).unwrap());

    std::thread::scope(|scope| {
        let entry = fib.find(pfx).unwrap();
        scope
            .spawn(move || {
                assert_eq!(*entry, 6);
                assert_eq!(entry.prefix(), pfx);
            })
            .join()
            .unwrap();
    });
}

#[test]
fn stats_report_the_expected_shape() {
    common::init();

    let fib: Fib<IPv4, u32> = Fib::new(FibConfig::default());
    let stats = fib.stats();
    assert_eq!(stats.hash_size, 1024);
    assert_eq!(stats.hash_order, 10);
    assert_eq!(stats.entries_max, 2048);
    assert_eq!(stats.entries_min, 0);
    assert_eq!(stats.sentinels, 1);
    assert_eq!(stats.entries, 0);

    for i in 0..100_u32 {
        drop(fib.get_or_insert_with(p4(i, 32), || i).unwrap());
    }
    let stats = fib.stats();
    assert_eq!(stats.entries, 100);
    // Buckets populate lazily, one anchor per touched bucket.
    assert!(stats.sentinels > 1);
    assert!(!format!("{}", stats).is_empty());
}

#[test]
fn metadata_destructors_run_on_teardown() {
    common::init();

    let fib: Fib<IPv4, std::sync::Arc<()>> = Fib::new(FibConfig::default());
    let canary = std::sync::Arc::new(());
    let pfx = p4s("192.0.2.0/24");

    drop(fib.get_or_insert_with(pfx, || canary.clone()).unwrap());
    // The duplicate path must not leak the metadata it built in vain.
    drop(fib.get_or_insert_with(pfx, || canary.clone()).unwrap());
    assert_eq!(std::sync::Arc::strong_count(&canary), 2);

    drop(fib);
    assert_eq!(std::sync::Arc::strong_count(&canary), 1);
}

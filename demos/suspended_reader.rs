use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fib_store::{Fib, FibConfig, IPv4, PrefixId};

// A reader suspends its iterator in the middle of the table while a
// writer deletes and re-adds entries underneath it, with an aggressive
// reclaim interval to keep the background reclaimer busy.

fn main() {
    env_logger::init();

    let fib = Arc::new(Fib::<IPv4, u64>::new(FibConfig {
        reclaim_interval: Duration::from_millis(50),
        ..FibConfig::default()
    }));

    for i in 0..1024_u32 {
        let entry = fib
            .get_or_insert_with(PrefixId::new(i.into(), 32), || i as u64)
            .unwrap();
        drop(entry);
    }

    let writer = {
        let fib = Arc::clone(&fib);
        thread::spawn(move || {
            for round in 0..50_u64 {
                for i in (0..1024_u32).step_by(3) {
                    fib.remove_prefix(PrefixId::new(i.into(), 32)).unwrap();
                }
                for i in (0..1024_u32).step_by(3) {
                    let entry = fib
                        .get_or_insert_with(
                            PrefixId::new(i.into(), 32),
                            || round,
                        )
                        .unwrap();
                    drop(entry);
                }
            }
        })
    };

    let reader = {
        let fib = Arc::clone(&fib);
        thread::spawn(move || {
            for pass in 0..20 {
                let mut iter = fib.iter_suspendable();
                let mut seen = 0_usize;
                while let Some((_, _)) = iter.next() {
                    seen += 1;
                    if seen % 100 == 0 {
                        // Suspended: the row keeps our position alive no
                        // matter what the writer deletes.
                        thread::sleep(Duration::from_millis(2));
                    }
                }
                println!("pass {:2}: saw {} live entries", pass, seen);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();

    println!("\n{}", fib.stats());
    fib.consistency_check().unwrap();
    println!("list is consistent");
}

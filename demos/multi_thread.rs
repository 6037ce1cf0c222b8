use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use inetnum::addr::Prefix;

use fib_store::{Fib, FibConfig, IPv4, PrefixId};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let fib = Arc::new(Fib::<IPv4, u32>::new(FibConfig::default()));

    let _: Vec<_> = (0..8)
        .map(|tid: u32| {
            let fib = Arc::clone(&fib);

            thread::Builder::new()
                .name(tid.to_string())
                .spawn(move || {
                    for pfx in get_pfxs() {
                        let id = PrefixId::try_from(pfx).unwrap();
                        let (entry, created) =
                            fib.get_or_insert_with(id, || tid).unwrap();
                        println!(
                            "thread {} insert {}: {}",
                            tid,
                            pfx,
                            if created {
                                "created"
                            } else {
                                "already there"
                            }
                        );
                        drop(entry);
                    }
                })
                .unwrap()
        })
        .map(|t| t.join())
        .collect();

    println!("------ end of inserts\n");
    println!("{}", fib.stats());

    for dest in [
        "130.55.240.5/32",
        "130.55.240.77/32",
        "193.0.10.55/32",
        "8.8.8.8/32",
    ] {
        let id = PrefixId::try_from(Prefix::from_str(dest)?).unwrap();
        match fib.route(id) {
            Some(entry) => println!(
                "{} routes via {} (first inserted by thread {})",
                dest,
                Prefix::from(entry.prefix()),
                *entry
            ),
            None => println!("{} has no route", dest),
        }
    }

    println!("\n------ all prefixes in split order\n");
    fib.walk(|prefix, owner| {
        println!("{} (thread {})", Prefix::from(prefix), owner);
    });

    Ok(())
}

fn get_pfxs() -> Vec<Prefix> {
    [
        "0.0.0.0/0",
        "130.55.240.0/24",
        "130.55.240.0/25",
        "130.55.240.128/25",
        "130.55.240.0/26",
        "130.55.240.64/26",
        "130.55.240.128/26",
        "130.55.240.192/26",
        "130.55.240.3/32",
        "130.55.240.4/32",
        "130.55.240.5/32",
        "192.0.0.0/16",
        "192.0.0.0/23",
        "192.0.9.0/24",
        "192.0.10.0/23",
        "193.0.0.0/23",
        "193.0.9.0/24",
        "193.0.10.0/23",
        "193.0.10.0/24",
        "209.0.0.0/16",
        "100.0.12.0/24",
        "1.0.128.0/24",
    ]
    .iter()
    .map(|s| Prefix::from_str(s).unwrap())
    .collect()
}

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::Harness;
use gpu_interop::{ApiKind, PixelFormat, ShareDescriptor};
use texshare::texshare_registry::{ProcessIdentity, RegistryError, SenderRegistry};

const UPDATES: u32 = 5_000;
const READERS: u32 = 3;

/// Every published entry satisfies `handle == geometry_tag(width, height)`, so
/// a reader mixing two writes sees a mismatch.
fn geometry_tag(width: u32, height: u32) -> u64 {
    (u64::from(width) << 32) | u64::from(height)
}

fn geometry(step: u32) -> (u32, u32) {
    (1 + step % 97, 1 + step.wrapping_mul(7) % 89)
}

fn open(harness: &Harness, pid: u32) -> SenderRegistry {
    SenderRegistry::open_with(
        harness.config.registry.clone(),
        ProcessIdentity::with_probe(pid, harness.probe.clone()),
    )
    .unwrap()
}

#[test]
fn concurrent_lookups_never_see_a_torn_entry() {
    let harness = Harness::new("stress");
    let writer = open(&harness, 300);
    let (w, h) = geometry(0);
    writer
        .register(
            "stress",
            w,
            h,
            PixelFormat::Bgra8Unorm,
            ShareDescriptor {
                api: ApiKind::Host,
                handle: geometry_tag(w, h),
            },
        )
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..READERS)
            .map(|i| {
                let reader = open(&harness, 301 + i);
                let done = done.clone();
                scope.spawn(move || {
                    let mut observed = 0u64;
                    while !done.load(Ordering::Acquire) || observed == 0 {
                        match reader.lookup("stress") {
                            Ok(entry) => {
                                assert_eq!(
                                    entry.share.handle,
                                    geometry_tag(entry.width, entry.height),
                                    "torn entry {entry:?}"
                                );
                                observed += 1;
                            }
                            Err(RegistryError::SlotBusy(_)) => {}
                            Err(e) => panic!("lookup failed: {e}"),
                        }
                    }
                    observed
                })
            })
            .collect();

        for step in 1..=UPDATES {
            let (w, h) = geometry(step);
            let share = ShareDescriptor {
                api: ApiKind::Host,
                handle: geometry_tag(w, h),
            };
            loop {
                match writer.update("stress", w, h, PixelFormat::Bgra8Unorm, share) {
                    Ok(_) => break,
                    Err(RegistryError::SlotBusy(_)) => std::thread::yield_now(),
                    Err(e) => panic!("update failed: {e}"),
                }
            }
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
    });

    let entry = writer.lookup("stress").unwrap();
    assert_eq!((entry.width, entry.height), geometry(UPDATES));
}

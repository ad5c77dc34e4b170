#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gpu_interop::{ApiKind, HostBackend};
use parking_lot::Mutex;
use texshare::texshare_registry::{ProcessIdentity, ProcessProbe, SenderRegistry};
use texshare::{Config, Context, ReceiverSession, SenderSession};

/// Liveness probe whose dead set the test controls.
#[derive(Debug, Default)]
pub struct FakeProbe {
    dead: Mutex<HashSet<u32>>,
}

impl FakeProbe {
    pub fn kill(&self, pid: u32) {
        self.dead.lock().insert(pid);
    }
}

impl ProcessProbe for FakeProbe {
    fn is_alive(&self, pid: u32) -> bool {
        !self.dead.lock().contains(&pid)
    }
}

/// A registry segment private to one test, removed on drop.
pub struct Harness {
    pub config: Config,
    pub probe: Arc<FakeProbe>,
}

impl Harness {
    pub fn new(tag: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        texshare::logging::init_test_tracing();

        let mut config = Config::default();
        config.registry = config
            .registry
            .with_segment_name(format!("txs-{tag}-{}-{n}", std::process::id()));
        Self {
            config,
            probe: Arc::new(FakeProbe::default()),
        }
    }

    /// A context acting as process `pid`.
    pub fn context(&self, pid: u32) -> Context {
        let identity = ProcessIdentity::with_probe(pid, self.probe.clone());
        Context::with_identity(self.config.clone(), identity).unwrap()
    }

    pub fn sender(&self, context: &Context) -> SenderSession {
        context.sender(Box::new(HostBackend::new()))
    }

    pub fn receiver(&self, context: &Context, api: ApiKind) -> ReceiverSession {
        context.receiver(Box::new(HostBackend::new()), api)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = SenderRegistry::remove_segment(&self.config.registry.segment_name);
    }
}

/// A tightly packed frame filled with `value`.
pub fn frame_bytes(width: u32, height: u32, value: u8) -> Vec<u8> {
    vec![value; width as usize * height as usize * 4]
}

//! [`SenderRegistry`]: the shared directory of named senders.

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use gpu_interop::{ApiKind, PixelFormat, ShareDescriptor};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::layout::{self, Header, Record, ACTIVE_PAYLOAD_WORDS, ACTIVE_STAMP, RECORD_WORDS};
use crate::liveness::ProcessIdentity;
use crate::lock::{OsLock, SegmentGuard, SegmentLock};
use crate::seqlock::SeqCell;
use crate::shm::Segment;

/// A sender as seen through the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderEntry {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub share: ShareDescriptor,
    pub owner_pid: u32,
    /// Executable of the owning process, possibly truncated.
    pub host_path: String,
}

impl SenderEntry {
    fn from_record(record: Record) -> Result<Self> {
        let api = ApiKind::from_code(record.api).ok_or_else(|| {
            RegistryError::Incompatible(format!(
                "sender {:?} has unknown API code {}",
                record.name, record.api
            ))
        })?;
        Ok(Self {
            name: record.name,
            width: record.width,
            height: record.height,
            format: PixelFormat::from_code(record.format),
            share: ShareDescriptor {
                api,
                handle: record.handle,
            },
            owner_pid: record.owner_pid,
            host_path: record.host_path,
        })
    }

    fn to_record(&self) -> Record {
        Record {
            name: self.name.clone(),
            host_path: self.host_path.clone(),
            width: self.width,
            height: self.height,
            format: self.format.code(),
            api: self.share.api.code(),
            owner_pid: self.owner_pid,
            handle: self.share.handle,
        }
    }
}

/// Check a sender name: non-empty, at most [`layout::MAX_NAME_LEN`] bytes, no
/// NUL.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidName("empty name".into()));
    }
    if name.len() > layout::MAX_NAME_LEN {
        return Err(RegistryError::InvalidName(format!(
            "{} bytes (max {})",
            name.len(),
            layout::MAX_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(RegistryError::InvalidName("contains NUL".into()));
    }
    Ok(())
}

fn host_path() -> String {
    std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// What a slot must hold for a write to go ahead.
#[derive(Clone, Copy)]
enum Expect<'a> {
    Empty,
    Owned(&'a str, u32),
}

impl Expect<'_> {
    fn matches(&self, current: Option<&Record>) -> bool {
        match (self, current) {
            (Expect::Empty, None) => true,
            (Expect::Owned(name, pid), Some(r)) => r.name == *name && r.owner_pid == *pid,
            _ => false,
        }
    }
}

/// Process-wide directory of senders in a named shared-memory segment.
///
/// Lookups and owner updates are lock-free, guarded by per-slot sequence
/// stamps. Registration, removal, eviction and active-pointer changes take the
/// segment lock.
pub struct SenderRegistry {
    config: RegistryConfig,
    identity: ProcessIdentity,
    segment: Segment,
    lock: SegmentLock,
    max_senders: usize,
}

impl SenderRegistry {
    /// Open (or create) the directory as the calling process.
    pub fn open(config: RegistryConfig) -> Result<Self> {
        Self::open_with(config, ProcessIdentity::current())
    }

    /// Open the directory acting as `identity`.
    pub fn open_with(config: RegistryConfig, identity: ProcessIdentity) -> Result<Self> {
        config.validate()?;
        let lock = SegmentLock::open(
            &config.segment_name,
            Duration::from_millis(config.lock_timeout_ms),
        )?;

        let segment = {
            let _guard = lock.acquire()?;
            let segment = Segment::open_or_create(
                &config.segment_name,
                layout::segment_bytes(config.max_senders),
            )?;
            let words = segment.words();
            if words.len() < layout::HEADER_WORDS {
                return Err(RegistryError::Incompatible(format!(
                    "segment is only {} bytes",
                    segment.len()
                )));
            }
            let header = Header::read(words);
            if header.is_blank() {
                let max = (words.len() - layout::HEADER_WORDS) / layout::SLOT_WORDS;
                let header = Header::current(max.min(config.max_senders));
                header.write(words);
                debug!(
                    "initialised registry segment {:?} with {} slots",
                    config.segment_name, header.max_senders
                );
            }
            segment
        };

        let header = Header::read(segment.words());
        header.validate(segment.words().len())?;
        let max_senders = header.max_senders as usize;
        if max_senders != config.max_senders {
            debug!(
                "registry {:?} keeps its {max_senders} slots (configured {})",
                config.segment_name, config.max_senders
            );
        }

        Ok(Self {
            config,
            identity,
            segment,
            lock,
            max_senders,
        })
    }

    /// Remove a segment and its lock file. Processes that still have it open
    /// keep working on the old one.
    pub fn remove_segment(segment_name: &str) -> Result<()> {
        Segment::unlink(segment_name)?;
        OsLock::remove(segment_name)?;
        Ok(())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    /// Slot count of the segment, which may differ from the configured one.
    pub fn max_senders(&self) -> usize {
        self.max_senders
    }

    fn slot(&self, index: usize) -> SeqCell<'_> {
        let words: &[AtomicU64] = self.segment.words();
        let start = layout::slot_offset(index);
        SeqCell::new(&words[start], &words[start + 1..start + 1 + RECORD_WORDS])
    }

    fn active_cell(&self) -> SeqCell<'_> {
        let words = self.segment.words();
        SeqCell::new(
            &words[ACTIVE_STAMP],
            &words[ACTIVE_STAMP + 1..ACTIVE_STAMP + 1 + ACTIVE_PAYLOAD_WORDS],
        )
    }

    fn read_slot(&self, index: usize) -> Result<Option<Record>> {
        let mut words = [0u64; RECORD_WORDS];
        if !self.slot(index).read_into(&mut words) {
            return Err(RegistryError::SlotBusy(index));
        }
        layout::decode_record(&words)
            .map_err(|e| RegistryError::Incompatible(format!("slot {index}: {e}")))
    }

    /// Rewrite slot `index` as `record` (or clear it), provided it still
    /// holds what `expect` describes.
    fn write_slot(&self, index: usize, expect: Expect<'_>, record: Option<&Record>) -> Result<()> {
        let outcome = self.slot(index).write(|words| {
            let current = layout::decode_record(words).ok().flatten();
            if !expect.matches(current.as_ref()) {
                return Err(());
            }
            layout::encode_record(record, words);
            Ok(())
        });
        match outcome {
            None => Err(RegistryError::SlotBusy(index)),
            Some(Err(())) => Err(match expect {
                Expect::Empty => RegistryError::SlotBusy(index),
                Expect::Owned(name, _) => RegistryError::NotFound(name.to_string()),
            }),
            Some(Ok(())) => Ok(()),
        }
    }

    /// Every occupied slot, in storage order. Slots that fail to read are
    /// skipped with a warning.
    fn records(&self) -> Vec<(usize, Record)> {
        (0..self.max_senders)
            .filter_map(|index| match self.read_slot(index) {
                Ok(record) => record.map(|r| (index, r)),
                Err(e) => {
                    warn!("skipping registry slot {index}: {e}");
                    None
                }
            })
            .collect()
    }

    fn find(&self, name: &str) -> Result<Option<(usize, Record)>> {
        for index in 0..self.max_senders {
            if let Some(record) = self.read_slot(index)? {
                if record.name == name {
                    return Ok(Some((index, record)));
                }
            }
        }
        Ok(None)
    }

    fn is_live(&self, record: &Record) -> bool {
        self.identity.is_alive(record.owner_pid)
    }

    /// Clear a dead owner's slot. Caller holds the segment lock.
    ///
    /// The slot must still hold `record`'s name and owner: a reader may have
    /// found the record before a successor took the name.
    fn evict(&self, _guard: &SegmentGuard<'_>, index: usize, record: &Record) -> Result<()> {
        warn!(
            "evicting sender {:?}: owner process {} is gone",
            record.name, record.owner_pid
        );
        self.write_slot(index, Expect::Owned(&record.name, record.owner_pid), None)?;
        if self.read_active()?.as_deref() == Some(record.name.as_str()) {
            self.write_active("")?;
        }
        Ok(())
    }

    /// Add a sender owned by this handle's process.
    ///
    /// A name held by a dead owner is evicted and reused. If every slot is
    /// taken, dead-owner entries are evicted first; if none are, the call
    /// fails with [`RegistryError::Full`]. The new sender becomes active when
    /// no live sender is.
    pub fn register(
        &self,
        name: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        share: ShareDescriptor,
    ) -> Result<SenderEntry> {
        validate_name(name)?;
        let guard = self.lock.acquire()?;

        if let Some((index, existing)) = self.find(name)? {
            if self.is_live(&existing) {
                return Err(RegistryError::NameInUse(name.to_string()));
            }
            self.evict(&guard, index, &existing)?;
        }

        let records = self.records();
        let mut free = (0..self.max_senders).find(|i| records.iter().all(|(used, _)| used != i));
        if free.is_none() {
            for (index, record) in records.iter().filter(|(_, r)| !self.is_live(r)) {
                self.evict(&guard, *index, record)?;
                free.get_or_insert(*index);
            }
        }
        let index = free.ok_or(RegistryError::Full(self.max_senders))?;

        let entry = SenderEntry {
            name: name.to_string(),
            width,
            height,
            format,
            share,
            owner_pid: self.identity.pid,
            host_path: host_path(),
        };
        self.write_slot(index, Expect::Empty, Some(&entry.to_record()))?;

        if self.get_active()?.is_none() {
            self.write_active(name)?;
            debug!("sender {name:?} is now active");
        }
        info!(
            "registered sender {name:?} {width}x{height} {format} in slot {index} ({} handle {:#x})",
            share.api, share.handle
        );
        Ok(entry)
    }

    /// Replace an entry's geometry, format and share descriptor in one step.
    ///
    /// Only the owning process may update. Readers see either the old or the
    /// new entry.
    pub fn update(
        &self,
        name: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        share: ShareDescriptor,
    ) -> Result<SenderEntry> {
        let (index, current) = self
            .find(name)?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if current.owner_pid != self.identity.pid {
            return Err(RegistryError::NotOwner {
                name: name.to_string(),
                owner: current.owner_pid,
            });
        }
        let mut entry = SenderEntry::from_record(current)?;
        entry.width = width;
        entry.height = height;
        entry.format = format;
        entry.share = share;
        self.write_slot(
            index,
            Expect::Owned(name, self.identity.pid),
            Some(&entry.to_record()),
        )?;
        debug!("updated sender {name:?} to {width}x{height} {format}");
        Ok(entry)
    }

    /// Find a live sender. A dead owner's entry is evicted and reported as
    /// missing.
    pub fn lookup(&self, name: &str) -> Result<SenderEntry> {
        let (index, record) = self
            .find(name)?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if self.is_live(&record) {
            return SenderEntry::from_record(record);
        }
        match self.lock.acquire() {
            Ok(guard) => {
                if let Err(e) = self.evict(&guard, index, &record) {
                    debug!("eviction of {name:?} skipped: {e}");
                }
                // The name may have been registered again before the lock was
                // taken.
                if let Some((_, current)) = self.find(name)? {
                    if self.is_live(&current) {
                        return SenderEntry::from_record(current);
                    }
                }
            }
            Err(e) => debug!("eviction of {name:?} deferred: {e}"),
        }
        Err(RegistryError::NotFound(name.to_string()))
    }

    /// Remove a sender owned by this handle's process. Clears the active
    /// pointer if it named this sender.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let _guard = self.lock.acquire()?;
        let (index, record) = self
            .find(name)?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if record.owner_pid != self.identity.pid {
            return Err(RegistryError::NotOwner {
                name: name.to_string(),
                owner: record.owner_pid,
            });
        }
        self.write_slot(index, Expect::Owned(name, self.identity.pid), None)?;
        if self.read_active()?.as_deref() == Some(name) {
            self.write_active("")?;
        }
        info!("unregistered sender {name:?}");
        Ok(())
    }

    /// Names of live senders, in storage order.
    pub fn enumerate(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(_, r)| self.is_live(r))
            .map(|(_, r)| r.name)
            .collect()
    }

    pub fn sender_count(&self) -> usize {
        self.enumerate().len()
    }

    /// The `index`th name of [`enumerate`](Self::enumerate).
    pub fn sender_at(&self, index: usize) -> Option<String> {
        self.enumerate().into_iter().nth(index)
    }

    fn read_active(&self) -> Result<Option<String>> {
        let mut words = [0u64; ACTIVE_PAYLOAD_WORDS];
        if !self.active_cell().read_into(&mut words) {
            return Err(RegistryError::ActiveBusy);
        }
        let name = layout::decode_active(&words)
            .map_err(|e| RegistryError::Incompatible(format!("active pointer: {e}")))?;
        Ok((!name.is_empty()).then_some(name))
    }

    fn write_active(&self, name: &str) -> Result<()> {
        self.active_cell()
            .write::<_, ()>(|words| {
                layout::encode_active(name, words);
                Ok(())
            })
            .and_then(std::result::Result::ok)
            .ok_or(RegistryError::ActiveBusy)
    }

    /// The active sender's name. A pointer naming a missing or dead sender
    /// reads as no active sender.
    pub fn get_active(&self) -> Result<Option<String>> {
        let Some(name) = self.read_active()? else {
            return Ok(None);
        };
        match self.find(&name)? {
            Some((_, record)) if self.is_live(&record) => Ok(Some(name)),
            _ => {
                debug!("active pointer names missing sender {name:?}");
                Ok(None)
            }
        }
    }

    /// Point receivers without a sender name at `name`, which must be live.
    pub fn set_active(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let _guard = self.lock.acquire()?;
        match self.find(name)? {
            Some((_, record)) if self.is_live(&record) => {}
            _ => return Err(RegistryError::NotFound(name.to_string())),
        }
        self.write_active(name)?;
        info!("active sender set to {name:?}");
        Ok(())
    }

    pub fn clear_active(&self) -> Result<()> {
        let _guard = self.lock.acquire()?;
        self.write_active("")
    }

    /// Evict every entry whose owner is gone. Returns how many were removed.
    pub fn clean_stale(&self) -> Result<usize> {
        let guard = self.lock.acquire()?;
        let mut removed = 0;
        for (index, record) in self.records() {
            if !self.is_live(&record) {
                self.evict(&guard, index, &record)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::liveness::ProcessProbe;

    #[derive(Debug, Default)]
    struct FakeProbe {
        dead: Mutex<HashSet<u32>>,
    }

    impl ProcessProbe for FakeProbe {
        fn is_alive(&self, pid: u32) -> bool {
            !self.dead.lock().contains(&pid)
        }
    }

    struct TempSegment(String);

    impl TempSegment {
        fn new() -> Self {
            static NEXT: AtomicUsize = AtomicUsize::new(0);
            let n = NEXT.fetch_add(1, Ordering::Relaxed);
            let name = format!("txs-reg-{}-{n}", std::process::id());
            Self(name)
        }

        fn config(&self, max_senders: usize) -> RegistryConfig {
            RegistryConfig::default()
                .with_segment_name(&self.0)
                .with_max_senders(max_senders)
        }
    }

    impl Drop for TempSegment {
        fn drop(&mut self) {
            let _ = SenderRegistry::remove_segment(&self.0);
        }
    }

    fn share(handle: u64) -> ShareDescriptor {
        ShareDescriptor {
            api: ApiKind::Host,
            handle,
        }
    }

    fn open_as(temp: &TempSegment, pid: u32, probe: &Arc<FakeProbe>) -> SenderRegistry {
        SenderRegistry::open_with(
            temp.config(4),
            ProcessIdentity::with_probe(pid, probe.clone()),
        )
        .unwrap()
    }

    #[test]
    fn register_lookup_unregister() {
        let temp = TempSegment::new();
        let registry = SenderRegistry::open(temp.config(4)).unwrap();

        let entry = registry
            .register("cam", 640, 480, PixelFormat::Bgra8Unorm, share(7))
            .unwrap();
        assert_eq!(entry.owner_pid, std::process::id());
        assert_eq!(registry.lookup("cam").unwrap(), entry);
        assert_eq!(registry.enumerate(), vec!["cam".to_string()]);

        registry.unregister("cam").unwrap();
        assert!(matches!(
            registry.lookup("cam"),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.unregister("cam"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn names_are_case_sensitive() {
        let temp = TempSegment::new();
        let registry = SenderRegistry::open(temp.config(4)).unwrap();
        registry
            .register("Cam", 1, 1, PixelFormat::Bgra8Unorm, share(1))
            .unwrap();
        registry
            .register("cam", 1, 1, PixelFormat::Bgra8Unorm, share(2))
            .unwrap();
        assert_eq!(registry.sender_count(), 2);
    }

    #[test]
    fn invalid_names_are_refused() {
        let temp = TempSegment::new();
        let registry = SenderRegistry::open(temp.config(4)).unwrap();
        for bad in [String::new(), "x".repeat(257), "a\0b".to_string()] {
            assert!(matches!(
                registry.register(&bad, 1, 1, PixelFormat::Bgra8Unorm, share(1)),
                Err(RegistryError::InvalidName(_))
            ));
        }
        assert!(registry
            .register(&"x".repeat(256), 1, 1, PixelFormat::Bgra8Unorm, share(1))
            .is_ok());
    }

    #[test]
    fn full_table_evicts_dead_owners_first() {
        let temp = TempSegment::new();
        let probe = Arc::new(FakeProbe::default());
        let a = open_as(&temp, 1001, &probe);
        let b = open_as(&temp, 1002, &probe);

        for i in 0..4 {
            a.register(&format!("a{i}"), 1, 1, PixelFormat::Bgra8Unorm, share(i))
                .unwrap();
        }
        assert!(matches!(
            b.register("b", 1, 1, PixelFormat::Bgra8Unorm, share(9)),
            Err(RegistryError::Full(4))
        ));

        probe.dead.lock().insert(1001);
        b.register("b", 1, 1, PixelFormat::Bgra8Unorm, share(9))
            .unwrap();
        assert_eq!(b.enumerate(), vec!["b".to_string()]);
    }

    #[test]
    fn update_requires_ownership() {
        let temp = TempSegment::new();
        let probe = Arc::new(FakeProbe::default());
        let owner = open_as(&temp, 2001, &probe);
        let other = open_as(&temp, 2002, &probe);

        owner
            .register("feed", 10, 10, PixelFormat::Rgba8Unorm, share(1))
            .unwrap();
        assert!(matches!(
            other.update("feed", 20, 20, PixelFormat::Rgba8Unorm, share(2)),
            Err(RegistryError::NotOwner { owner: 2001, .. })
        ));
        assert!(matches!(
            other.unregister("feed"),
            Err(RegistryError::NotOwner { owner: 2001, .. })
        ));
        let updated = owner
            .update("feed", 20, 30, PixelFormat::Rgba16Float, share(2))
            .unwrap();
        assert_eq!(other.lookup("feed").unwrap(), updated);
    }

    #[test]
    fn dead_owner_lookup_evicts() {
        let temp = TempSegment::new();
        let probe = Arc::new(FakeProbe::default());
        let owner = open_as(&temp, 3001, &probe);
        let reader = open_as(&temp, 3002, &probe);

        owner
            .register("ghost", 1, 1, PixelFormat::Bgra8Unorm, share(1))
            .unwrap();
        probe.dead.lock().insert(3001);

        assert!(reader.enumerate().is_empty());
        assert!(matches!(
            reader.lookup("ghost"),
            Err(RegistryError::NotFound(_))
        ));
        probe.dead.lock().clear();
        // The slot was cleared, not just hidden.
        assert!(matches!(
            owner.lookup("ghost"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn clean_stale_counts_evictions() {
        let temp = TempSegment::new();
        let probe = Arc::new(FakeProbe::default());
        let a = open_as(&temp, 4001, &probe);
        let b = open_as(&temp, 4002, &probe);
        a.register("a1", 1, 1, PixelFormat::Bgra8Unorm, share(1))
            .unwrap();
        a.register("a2", 1, 1, PixelFormat::Bgra8Unorm, share(2))
            .unwrap();
        b.register("b1", 1, 1, PixelFormat::Bgra8Unorm, share(3))
            .unwrap();

        probe.dead.lock().insert(4001);
        assert_eq!(b.clean_stale().unwrap(), 2);
        assert_eq!(b.clean_stale().unwrap(), 0);
        assert_eq!(b.sender_at(0).as_deref(), Some("b1"));
        assert_eq!(b.sender_at(1), None);
    }

    #[test]
    fn first_sender_becomes_active_and_release_clears_it() {
        let temp = TempSegment::new();
        let registry = SenderRegistry::open(temp.config(4)).unwrap();
        assert_eq!(registry.get_active().unwrap(), None);

        registry
            .register("one", 1, 1, PixelFormat::Bgra8Unorm, share(1))
            .unwrap();
        registry
            .register("two", 1, 1, PixelFormat::Bgra8Unorm, share(2))
            .unwrap();
        assert_eq!(registry.get_active().unwrap().as_deref(), Some("one"));

        registry.set_active("two").unwrap();
        assert_eq!(registry.get_active().unwrap().as_deref(), Some("two"));

        registry.unregister("two").unwrap();
        assert_eq!(registry.get_active().unwrap(), None);

        assert!(matches!(
            registry.set_active("missing"),
            Err(RegistryError::NotFound(_))
        ));
        registry.set_active("one").unwrap();
        registry.clear_active().unwrap();
        assert_eq!(registry.get_active().unwrap(), None);
    }

    /// Reports `dead` as dead, registering `successor_name` through
    /// `successor` the first time it is asked. Lets a test run a registration
    /// between a reader's unlocked scan and its eviction.
    struct RegisterWhenProbed {
        dead: u32,
        successor_name: &'static str,
        successor: Mutex<Option<SenderRegistry>>,
    }

    impl std::fmt::Debug for RegisterWhenProbed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RegisterWhenProbed")
                .field("dead", &self.dead)
                .finish()
        }
    }

    impl ProcessProbe for RegisterWhenProbed {
        fn is_alive(&self, pid: u32) -> bool {
            if pid != self.dead {
                return true;
            }
            if let Some(successor) = self.successor.lock().take() {
                successor
                    .register(self.successor_name, 8, 8, PixelFormat::Bgra8Unorm, share(2))
                    .unwrap();
            }
            false
        }
    }

    #[test]
    fn late_eviction_spares_a_live_successor() {
        let temp = TempSegment::new();
        let probe = Arc::new(FakeProbe::default());
        let owner = open_as(&temp, 6001, &probe);
        owner
            .register("cam", 4, 4, PixelFormat::Bgra8Unorm, share(1))
            .unwrap();
        probe.dead.lock().insert(6001);

        let successor = open_as(&temp, 6002, &probe);
        let hook = Arc::new(RegisterWhenProbed {
            dead: 6001,
            successor_name: "cam",
            successor: Mutex::new(Some(successor)),
        });
        let reader =
            SenderRegistry::open_with(temp.config(4), ProcessIdentity::with_probe(6003, hook))
                .unwrap();

        let seen = reader.lookup("cam").unwrap();
        assert_eq!(seen.owner_pid, 6002);
        assert_eq!(seen.share.handle, 2);

        let observer = open_as(&temp, 6004, &probe);
        assert_eq!(observer.lookup("cam").unwrap(), seen);
        assert_eq!(observer.get_active().unwrap().as_deref(), Some("cam"));
    }

    #[test]
    fn dangling_active_pointer_reads_as_none() {
        let temp = TempSegment::new();
        let probe = Arc::new(FakeProbe::default());
        let owner = open_as(&temp, 5001, &probe);
        let reader = open_as(&temp, 5002, &probe);
        owner
            .register("solo", 1, 1, PixelFormat::Bgra8Unorm, share(1))
            .unwrap();
        assert_eq!(reader.get_active().unwrap().as_deref(), Some("solo"));

        probe.dead.lock().insert(5001);
        assert_eq!(reader.get_active().unwrap(), None);
    }

    #[test]
    fn existing_segment_keeps_its_slot_count() {
        let temp = TempSegment::new();
        let first = SenderRegistry::open(temp.config(3)).unwrap();
        let second = SenderRegistry::open(temp.config(8)).unwrap();
        assert_eq!(first.max_senders(), 3);
        assert_eq!(second.max_senders(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn foreign_segment_is_incompatible() {
        let temp = TempSegment::new();
        {
            let segment = Segment::open_or_create(&temp.0, layout::segment_bytes(2)).unwrap();
            let mut header = Header::current(2);
            header.version = 99;
            header.write(segment.words());
        }
        assert!(matches!(
            SenderRegistry::open(temp.config(2)),
            Err(RegistryError::Incompatible(_))
        ));
    }
}

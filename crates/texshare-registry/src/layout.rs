//! Word layout of the shared directory segment.
//!
//! ```text
//! word 0        magic | protocol version << 32
//! word 1        max_senders | slot_bytes << 32
//! word 2        active pointer stamp
//! word 3        active name length
//! words 4..36   active name (256 bytes)
//! words 36..40  reserved
//! then max_senders slots of SLOT_WORDS words:
//!   word 0        stamp
//!   word 1        occupied | name_len << 8 | path_len << 24
//!   word 2        width | height << 32
//!   word 3        format code | api code << 32
//!   word 4        owner pid
//!   word 5        share handle
//!   words 6..38   name (256 bytes)
//!   words 38..71  host path (260 bytes, padded)
//!   word 71       reserved
//! ```
//!
//! Strings are stored as little-endian bytes packed into words.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RegistryError, Result};

pub const MAGIC: u32 = u32::from_le_bytes(*b"TXSH");
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest sender name, in bytes.
pub const MAX_NAME_LEN: usize = 256;
/// Longest stored host executable path, in bytes. Longer paths are cut.
pub const MAX_HOST_PATH_LEN: usize = 260;

const NAME_WORDS: usize = MAX_NAME_LEN / 8;
const PATH_WORDS: usize = MAX_HOST_PATH_LEN.div_ceil(8);

pub const HEADER_WORDS: usize = 40;
const H_MAGIC: usize = 0;
const H_GEOMETRY: usize = 1;
/// Stamp word of the active pointer cell.
pub const ACTIVE_STAMP: usize = 2;
pub const ACTIVE_PAYLOAD_WORDS: usize = 1 + NAME_WORDS;

pub const RECORD_WORDS: usize = 5 + NAME_WORDS + PATH_WORDS;
pub const SLOT_WORDS: usize = 72;
pub const SLOT_BYTES: usize = SLOT_WORDS * 8;

const R_FLAGS: usize = 0;
const R_SIZE: usize = 1;
const R_KIND: usize = 2;
const R_OWNER: usize = 3;
const R_HANDLE: usize = 4;
const R_NAME: usize = 5;
const R_PATH: usize = R_NAME + NAME_WORDS;

const _: () = assert!(ACTIVE_STAMP + 1 + ACTIVE_PAYLOAD_WORDS <= HEADER_WORDS);
const _: () = assert!(1 + RECORD_WORDS <= SLOT_WORDS);

/// Size in bytes of a segment holding `max_senders` slots.
pub fn segment_bytes(max_senders: usize) -> usize {
    (HEADER_WORDS + max_senders * SLOT_WORDS) * 8
}

/// Word offset of slot `index`.
pub fn slot_offset(index: usize) -> usize {
    HEADER_WORDS + index * SLOT_WORDS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub max_senders: u32,
    pub slot_bytes: u32,
}

impl Header {
    pub fn current(max_senders: usize) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            max_senders: max_senders as u32,
            slot_bytes: SLOT_BYTES as u32,
        }
    }

    pub fn read(words: &[AtomicU64]) -> Self {
        let magic = words[H_MAGIC].load(Ordering::Acquire);
        let geometry = words[H_GEOMETRY].load(Ordering::Acquire);
        Self {
            magic: magic as u32,
            version: (magic >> 32) as u32,
            max_senders: geometry as u32,
            slot_bytes: (geometry >> 32) as u32,
        }
    }

    /// Stamp the header. The magic word is stored last so a reader that sees
    /// it also sees the geometry.
    pub fn write(&self, words: &[AtomicU64]) {
        words[H_GEOMETRY].store(
            self.max_senders as u64 | (self.slot_bytes as u64) << 32,
            Ordering::Release,
        );
        words[H_MAGIC].store(
            self.magic as u64 | (self.version as u64) << 32,
            Ordering::Release,
        );
    }

    pub fn is_blank(&self) -> bool {
        *self == Self {
            magic: 0,
            version: 0,
            max_senders: 0,
            slot_bytes: 0,
        }
    }

    /// Reject headers this build cannot interpret, given the number of words
    /// actually mapped.
    pub fn validate(&self, mapped_words: usize) -> Result<()> {
        if self.magic != MAGIC {
            return Err(RegistryError::Incompatible(format!(
                "bad magic {:#010x}",
                self.magic
            )));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(RegistryError::Incompatible(format!(
                "protocol version {} (expected {PROTOCOL_VERSION})",
                self.version
            )));
        }
        if self.slot_bytes as usize != SLOT_BYTES {
            return Err(RegistryError::Incompatible(format!(
                "slot size {} (expected {SLOT_BYTES})",
                self.slot_bytes
            )));
        }
        let needed = segment_bytes(self.max_senders as usize) / 8;
        if self.max_senders == 0 || mapped_words < needed {
            return Err(RegistryError::Incompatible(format!(
                "{} slots declared but only {mapped_words} words mapped",
                self.max_senders
            )));
        }
        Ok(())
    }
}

/// One sender as stored in a slot. Codes are kept raw here; the registry
/// turns them into typed values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub name: String,
    pub host_path: String,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub api: u32,
    pub owner_pid: u32,
    pub handle: u64,
}

fn pack(bytes: &[u8], out: &mut [u64]) {
    out.fill(0);
    for (word, chunk) in out.iter_mut().zip(bytes.chunks(8)) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        *word = u64::from_le_bytes(buf);
    }
}

fn unpack(words: &[u64], len: usize) -> std::result::Result<String, String> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    if len > bytes.len() {
        return Err(format!("string length {len} exceeds its field"));
    }
    bytes.truncate(len);
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Encode a slot payload; `None` clears the slot.
pub fn encode_record(record: Option<&Record>, out: &mut [u64]) {
    debug_assert_eq!(out.len(), RECORD_WORDS);
    out.fill(0);
    let Some(record) = record else {
        return;
    };
    let path = truncate_utf8(&record.host_path, MAX_HOST_PATH_LEN);
    out[R_FLAGS] = 1 | (record.name.len() as u64) << 8 | (path.len() as u64) << 24;
    out[R_SIZE] = record.width as u64 | (record.height as u64) << 32;
    out[R_KIND] = record.format as u64 | (record.api as u64) << 32;
    out[R_OWNER] = record.owner_pid as u64;
    out[R_HANDLE] = record.handle;
    pack(record.name.as_bytes(), &mut out[R_NAME..R_PATH]);
    pack(path.as_bytes(), &mut out[R_PATH..R_PATH + PATH_WORDS]);
}

/// Decode a slot payload. An unoccupied slot decodes to `None`.
pub fn decode_record(words: &[u64]) -> std::result::Result<Option<Record>, String> {
    let flags = words[R_FLAGS];
    if flags & 1 == 0 {
        return Ok(None);
    }
    let name_len = ((flags >> 8) & 0xffff) as usize;
    let path_len = ((flags >> 24) & 0xffff) as usize;
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(format!("name length {name_len}"));
    }
    if path_len > MAX_HOST_PATH_LEN {
        return Err(format!("host path length {path_len}"));
    }
    Ok(Some(Record {
        name: unpack(&words[R_NAME..R_PATH], name_len)?,
        host_path: unpack(&words[R_PATH..R_PATH + PATH_WORDS], path_len)?,
        width: words[R_SIZE] as u32,
        height: (words[R_SIZE] >> 32) as u32,
        format: words[R_KIND] as u32,
        api: (words[R_KIND] >> 32) as u32,
        owner_pid: words[R_OWNER] as u32,
        handle: words[R_HANDLE],
    }))
}

/// Encode the active pointer payload; an empty name clears it.
pub fn encode_active(name: &str, out: &mut [u64]) {
    debug_assert_eq!(out.len(), ACTIVE_PAYLOAD_WORDS);
    out[0] = name.len() as u64;
    pack(name.as_bytes(), &mut out[1..]);
}

pub fn decode_active(words: &[u64]) -> std::result::Result<String, String> {
    let len = words[0] as usize;
    if len > MAX_NAME_LEN {
        return Err(format!("active name length {len}"));
    }
    unpack(&words[1..], len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blank_words(n: usize) -> Vec<AtomicU64> {
        (0..n).map(|_| AtomicU64::new(0)).collect()
    }

    #[test]
    fn header_validation() {
        let words = blank_words(segment_bytes(4) / 8);
        assert!(Header::read(&words).is_blank());
        assert!(Header::read(&words).validate(words.len()).is_err());

        Header::current(4).write(&words);
        let header = Header::read(&words);
        assert_eq!(header, Header::current(4));
        assert!(header.validate(words.len()).is_ok());
        // Declares more slots than are mapped.
        assert!(Header::current(5).validate(words.len()).is_err());

        let mut old = Header::current(4);
        old.version = 0;
        assert!(matches!(
            old.validate(words.len()),
            Err(RegistryError::Incompatible(_))
        ));
    }

    #[test]
    fn empty_slot_decodes_to_none() {
        let words = [0u64; RECORD_WORDS];
        assert_eq!(decode_record(&words), Ok(None));
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let mut words = [0u64; RECORD_WORDS];
        words[R_FLAGS] = 1 | ((MAX_NAME_LEN as u64 + 1) << 8);
        assert!(decode_record(&words).is_err());

        let mut active = [0u64; ACTIVE_PAYLOAD_WORDS];
        active[0] = 999;
        assert!(decode_active(&active).is_err());
    }

    #[test]
    fn long_host_paths_are_cut_on_char_boundaries() {
        let path = "é".repeat(200);
        let record = Record {
            name: "x".into(),
            host_path: path,
            width: 1,
            height: 1,
            ..Record::default()
        };
        let mut words = [0u64; RECORD_WORDS];
        encode_record(Some(&record), &mut words);
        let decoded = decode_record(&words).unwrap().unwrap();
        assert_eq!(decoded.host_path.len(), MAX_HOST_PATH_LEN);
        assert!(decoded.host_path.chars().all(|c| c == 'é'));
    }

    proptest! {
        #[test]
        fn records_survive_encoding(
            name in "[a-zA-Z0-9 _.-]{1,64}",
            path in "[a-z/]{0,300}",
            width in 1u32..16384,
            height in 1u32..16384,
            format in any::<u32>(),
            api in 1u32..=5,
            owner_pid in any::<u32>(),
            handle in any::<u64>(),
        ) {
            let record = Record { name, host_path: path, width, height, format, api, owner_pid, handle };
            let mut words = [0u64; RECORD_WORDS];
            encode_record(Some(&record), &mut words);
            let decoded = decode_record(&words).unwrap().unwrap();
            prop_assert_eq!(&decoded.name, &record.name);
            prop_assert!(record.host_path.starts_with(&decoded.host_path));
            prop_assert_eq!((decoded.width, decoded.height), (width, height));
            prop_assert_eq!((decoded.format, decoded.api), (format, api));
            prop_assert_eq!((decoded.owner_pid, decoded.handle), (owner_pid, handle));
        }
    }
}

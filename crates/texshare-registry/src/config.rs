use serde::Deserialize;

use crate::error::{RegistryError, Result};

/// Longest segment name accepted. macOS limits POSIX shared memory names to
/// 31 bytes including the leading slash.
pub const MAX_SEGMENT_NAME_LEN: usize = 30;

/// Where the sender directory lives and how it behaves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name of the shared-memory segment. Also names the lock.
    pub segment_name: String,
    /// Slot count used when this process creates the segment. An existing
    /// segment keeps the count it was created with.
    pub max_senders: usize,
    /// How long directory mutations wait for the cross-process lock.
    pub lock_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            segment_name: "texshare-senders".to_string(),
            max_senders: 10,
            lock_timeout_ms: 250,
        }
    }
}

impl RegistryConfig {
    pub fn with_segment_name(mut self, name: impl Into<String>) -> Self {
        self.segment_name = name.into();
        self
    }

    pub fn with_max_senders(mut self, max_senders: usize) -> Self {
        self.max_senders = max_senders;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let name = &self.segment_name;
        let valid = !name.is_empty()
            && name.len() <= MAX_SEGMENT_NAME_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(RegistryError::InvalidSegmentName(name.clone()));
        }
        if self.max_senders == 0 || self.max_senders > u32::MAX as usize {
            return Err(RegistryError::Incompatible(format!(
                "cannot size a registry for {} senders",
                self.max_senders
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{ "max_senders": 4 }"#).unwrap();
        assert_eq!(config.max_senders, 4);
        assert_eq!(config.segment_name, "texshare-senders");
        assert_eq!(config.lock_timeout_ms, 250);
    }

    #[test]
    fn segment_names_are_restricted() {
        assert!(RegistryConfig::default().validate().is_ok());
        for bad in ["", "has space", "slash/name", "a-name-that-is-far-too-long-for-macos"] {
            let config = RegistryConfig::default().with_segment_name(bad);
            assert!(matches!(
                config.validate(),
                Err(RegistryError::InvalidSegmentName(_))
            ));
        }
    }

    #[test]
    fn zero_senders_is_rejected() {
        let config = RegistryConfig::default().with_max_senders(0);
        assert!(config.validate().is_err());
    }
}

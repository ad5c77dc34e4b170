use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Another live process owns a sender with this name.
    #[error("sender name {0:?} is already in use")]
    NameInUse(String),

    #[error("no sender named {0:?}")]
    NotFound(String),

    /// The segment was written by an incompatible protocol version, or is
    /// structurally damaged.
    #[error("incompatible registry segment: {0}")]
    Incompatible(String),

    #[error("invalid sender name: {0}")]
    InvalidName(String),

    #[error("invalid segment name {0:?}")]
    InvalidSegmentName(String),

    /// Every slot holds a live sender.
    #[error("registry is full ({0} senders)")]
    Full(usize),

    /// Only the owning process may update an entry.
    #[error("sender {name:?} is owned by process {owner}")]
    NotOwner { name: String, owner: u32 },

    /// A slot stayed mid-write for longer than a reader or writer is willing
    /// to wait.
    #[error("registry slot {0} is busy")]
    SlotBusy(usize),

    #[error("active sender pointer is busy")]
    ActiveBusy,

    #[error("timed out waiting for the registry lock")]
    LockTimeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

//! Transaction origin tags.
//!
//! Every transaction this crate opens carries one of these tags so that
//! observers and the undo manager can tell local edits, remote updates
//! and initial loads apart.

use yrs::Origin;

/// Edits made by the local user through the host.
pub const LOCAL_ORIGIN: &str = "drawsync:local";
/// Updates received from other peers.
pub const REMOTE_ORIGIN: &str = "drawsync:remote";
/// Seeding the replicated document from the host's initial pages.
pub const INIT_ORIGIN: &str = "drawsync:init";

/// Who caused a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionOrigin {
    Local,
    Remote,
    Init,
    Undo,
    Redo,
    /// No origin attached.
    #[default]
    Untagged,
    /// Tagged by someone else (including the undo manager itself).
    Other,
}

impl TransactionOrigin {
    pub fn classify(origin: Option<&Origin>) -> Self {
        let Some(origin) = origin else {
            return TransactionOrigin::Untagged;
        };
        let bytes: &[u8] = origin.as_ref();
        if bytes == LOCAL_ORIGIN.as_bytes() {
            TransactionOrigin::Local
        } else if bytes == REMOTE_ORIGIN.as_bytes() {
            TransactionOrigin::Remote
        } else if bytes == INIT_ORIGIN.as_bytes() {
            TransactionOrigin::Init
        } else {
            TransactionOrigin::Other
        }
    }

    /// Whether a patch from a transaction with this origin must be written
    /// back into the host. Local edits and the initial load already are.
    pub fn delivers_to_host(self) -> bool {
        !matches!(self, TransactionOrigin::Local | TransactionOrigin::Init)
    }
}

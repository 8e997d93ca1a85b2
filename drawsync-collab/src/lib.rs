//! # drawsync-collab: replicated binding for paged diagram documents
//!
//! Keeps a host page model in sync with a `yrs` document that any number
//! of peers edit concurrently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  handle_local_change   ┌─────────────────────┐
//! │  PageHost    │ ─────────────────────► │  DocumentBinding    │
//! │ (live pages) │ ◄───────────────────── │  snapshot, shadow,  │
//! └──────────────┘  apply_patches          │  suppression guard  │
//!                   (suppressed)           └─────────┬───────────┘
//!                                                    │ one txn per edit
//!                                                    ▼
//!                    ┌────────────────────────────────────────────┐
//!                    │ ReplicatedDocument (yrs Doc)               │
//!                    │   file / pageOrder / pages → cells, order  │
//!                    └──────┬──────────────────────────┬──────────┘
//!                           │ observe_deep             │ scope
//!                           ▼                          ▼
//!                    EventCollector              UndoAdapter
//!                           │                    (local origin only)
//!                           ▼
//!                    generate_patch ─► FilePatch
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: page/cell layout in the replicated doc, replicated `apply_patch`
//! - [`events`]: mutation event collection per transaction
//! - [`diff`]: patch generation against a [`Snapshot`]
//! - [`undo`]: undo adapter over the replicated undo manager
//! - [`binding`]: host collaborator trait and the sync control loop
//! - [`presence`]: ephemeral cursor/selection state (bincode messages)

pub mod binding;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod origin;
pub mod presence;
pub mod schema;
pub mod snapshot;
pub mod undo;

pub use binding::{BindingStats, DocumentBinding, LiveHost, PageHost, SuppressionFlag, SuppressionGuard};
pub use config::{BindingConfig, PresenceConfig};
pub use diff::generate_patch;
pub use error::CollabError;
pub use events::{EventBatch, EventCollector, EventTarget, MutationEvent};
pub use origin::{TransactionOrigin, INIT_ORIGIN, LOCAL_ORIGIN, REMOTE_ORIGIN};
pub use presence::{
    AwarenessMessage, CursorState, PeerState, PresenceError, PresenceRoom, SelectionState,
};
pub use schema::ReplicatedDocument;
pub use snapshot::Snapshot;
pub use undo::{ListenerId, UndoAdapter, UndoEvent, UndoEventKind, UndoHistory, UndoListener};

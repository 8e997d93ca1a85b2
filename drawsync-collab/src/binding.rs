//! Binding between a host page model and a replicated document.
//!
//! ```text
//!   host edit ──► handle_local_change ──► host.diff_pages(shadow, now)
//!                                                │
//!                        replica.apply_patch(.., LOCAL) ─┐
//!                                                        │ one transaction
//!   remote bytes ──► apply_remote_update(.., REMOTE) ────┤
//!   undo / redo ──► UndoManager ─────────────────────────┤
//!                                                        ▼
//!                                       EventCollector::drain ─► generate_patch
//!                                                        │
//!                       origin delivers to host? ── no ──┴── yes
//!                                                             │
//!                             SuppressionGuard + host.apply_patches
//! ```
//!
//! Each entry point opens at most one transaction and flushes right after
//! it, so one drained batch always belongs to one transaction.

use crate::config::BindingConfig;
use crate::diff::generate_patch;
use crate::error::CollabError;
use crate::events::EventCollector;
use crate::origin::{TransactionOrigin, INIT_ORIGIN, LOCAL_ORIGIN, REMOTE_ORIGIN};
use crate::schema::ReplicatedDocument;
use crate::snapshot::Snapshot;
use crate::undo::UndoAdapter;
use drawsync_core::{ApplyReport, CodecError, FileDocument, FilePatch, LiveModel, Page, PatchError};
use std::cell::Cell;
use std::rc::Rc;

// ───────────────────────────────────────────────────────────────────
// Host collaborator
// ───────────────────────────────────────────────────────────────────

/// The editor that owns the live page tree.
pub trait PageHost {
    /// Deep copy of the current pages.
    fn clone_pages(&self) -> Vec<Page>;

    /// Patch between two page-list snapshots.
    fn diff_pages(&self, previous: &[Page], current: &[Page]) -> Result<FilePatch, CodecError> {
        drawsync_core::diff_pages(previous, current)
    }

    /// Write patches into the live model.
    fn apply_patches(&mut self, patches: &[FilePatch]) -> Result<(), PatchError>;
}

/// A [`PageHost`] over a plain [`LiveModel`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveHost {
    model: LiveModel,
}

impl LiveHost {
    pub fn from_pages(pages: &[Page]) -> Self {
        Self {
            model: LiveModel::from_pages(pages),
        }
    }

    pub fn pages(&self) -> Vec<Page> {
        self.model.to_pages()
    }

    /// Edit the pages directly, as a user of the host would.
    pub fn edit(&mut self, f: impl FnOnce(&mut Vec<Page>)) {
        let mut pages = self.model.to_pages();
        f(&mut pages);
        self.model = LiveModel::from_pages(&pages);
    }
}

impl PageHost for LiveHost {
    fn clone_pages(&self) -> Vec<Page> {
        self.model.to_pages()
    }

    fn apply_patches(&mut self, patches: &[FilePatch]) -> Result<(), PatchError> {
        for patch in patches {
            self.model.apply(patch)?;
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────
// Re-entrancy suppression
// ───────────────────────────────────────────────────────────────────

/// Set while a patch is being written into the host. A host's change
/// listener checks it to ignore the notifications caused by that write.
#[derive(Debug, Clone, Default)]
pub struct SuppressionFlag(Rc<Cell<bool>>);

impl SuppressionFlag {
    pub fn is_active(&self) -> bool {
        self.0.get()
    }

    /// Raise the flag until the guard is dropped.
    pub fn engage(&self) -> SuppressionGuard {
        let previous = self.0.replace(true);
        SuppressionGuard {
            flag: self.clone(),
            previous,
        }
    }
}

/// Restores the flag's previous value on drop, including on early return.
#[must_use = "suppression ends when the guard is dropped"]
pub struct SuppressionGuard {
    flag: SuppressionFlag,
    previous: bool,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.flag.0.set(self.previous);
    }
}

// ───────────────────────────────────────────────────────────────────
// Binding
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingStats {
    /// Transactions flushed through the patch generator.
    pub transactions: u64,
    /// Local patches written into the replica.
    pub local_patches: u64,
    /// Patches written back into the host.
    pub delivered_patches: u64,
    /// Host notifications ignored while suppressed.
    pub suppressed_notifications: u64,
}

pub struct DocumentBinding {
    replica: ReplicatedDocument,
    snapshot: Snapshot,
    /// The host pages as of the last sync, for the tree diff.
    shadow: Vec<Page>,
    collector: EventCollector,
    undo: UndoAdapter,
    suppression: SuppressionFlag,
    config: BindingConfig,
    stats: BindingStats,
}

impl DocumentBinding {
    /// Bind `host` to `replica`.
    ///
    /// An empty replica is seeded from the host's pages (not undoable).
    /// A non-empty replica wins: the host is brought up to its state.
    pub fn new<H: PageHost>(
        replica: ReplicatedDocument,
        host: &mut H,
        config: BindingConfig,
    ) -> Result<Self, CollabError> {
        Self::with_suppression(replica, host, config, SuppressionFlag::default())
    }

    /// Like [`DocumentBinding::new`], with a flag the host already listens
    /// to. The flag is raised while the host is brought up to the replica.
    pub fn with_suppression<H: PageHost>(
        replica: ReplicatedDocument,
        host: &mut H,
        config: BindingConfig,
        suppression: SuppressionFlag,
    ) -> Result<Self, CollabError> {
        let pages = host.clone_pages();
        if replica.page_order().is_empty() {
            if !pages.is_empty() {
                replica.load(&FileDocument::new(pages.clone()), INIT_ORIGIN);
            }
        } else {
            let patch = host.diff_pages(&pages, &replica.pages())?;
            if !patch.is_empty() {
                log::debug!("bringing host up to replica state ({} ops)", patch.len());
                let _guard = suppression.engage();
                host.apply_patches(std::slice::from_ref(&patch))?;
            }
        }

        let collector = EventCollector::attach(&replica);
        let undo = UndoAdapter::new(&replica, &config);
        let mut snapshot = Snapshot::new();
        if config.prime_snapshot {
            generate_patch(&replica, &mut snapshot, &[])?;
        }

        Ok(Self {
            shadow: host.clone_pages(),
            replica,
            snapshot,
            collector,
            undo,
            suppression,
            config,
            stats: BindingStats::default(),
        })
    }

    /// The host reported a change: diff it and write it into the replica.
    /// Returns `None` when suppressed or when nothing changed.
    pub fn handle_local_change<H: PageHost>(
        &mut self,
        host: &mut H,
    ) -> Result<Option<ApplyReport>, CollabError> {
        if self.suppression.is_active() {
            self.stats.suppressed_notifications += 1;
            log::trace!("change notification during write-back ignored");
            return Ok(None);
        }
        let current = host.clone_pages();
        let patch = host.diff_pages(&self.shadow, &current)?;
        if patch.is_empty() {
            return Ok(None);
        }
        self.apply_local_patch(host, &patch).map(Some)
    }

    /// Write a patch the host already applied to itself into the replica.
    pub fn apply_local_patch<H: PageHost>(
        &mut self,
        host: &mut H,
        patch: &FilePatch,
    ) -> Result<ApplyReport, CollabError> {
        let report = self.replica.apply_patch(patch, LOCAL_ORIGIN)?;
        self.stats.local_patches += 1;
        if !report.is_clean() {
            log::warn!(
                "local patch applied with {} skipped and {} downgraded ops",
                report.skipped.len(),
                report.downgrades.len()
            );
        }
        self.flush(host, None)?;
        self.shadow = host.clone_pages();
        Ok(report)
    }

    /// Integrate an update from another peer and deliver the result.
    pub fn apply_remote_update<H: PageHost>(
        &mut self,
        host: &mut H,
        update: &[u8],
    ) -> Result<(), CollabError> {
        self.replica.apply_update(update, REMOTE_ORIGIN)?;
        self.flush(host, None)
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.replica.encode_state_vector()
    }

    pub fn encode_update_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, CollabError> {
        self.replica.encode_update_since(state_vector)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn undo<H: PageHost>(&mut self, host: &mut H) -> Result<bool, CollabError> {
        if !self.undo.undo() {
            return Ok(false);
        }
        self.flush(host, Some(TransactionOrigin::Undo))?;
        Ok(true)
    }

    pub fn redo<H: PageHost>(&mut self, host: &mut H) -> Result<bool, CollabError> {
        if !self.undo.redo() {
            return Ok(false);
        }
        self.flush(host, Some(TransactionOrigin::Redo))?;
        Ok(true)
    }

    /// Turn the pending transaction into a patch and deliver it if its
    /// origin calls for it. `hint` overrides the recorded origin for
    /// transactions opened by the undo manager.
    pub fn flush<H: PageHost>(
        &mut self,
        host: &mut H,
        hint: Option<TransactionOrigin>,
    ) -> Result<(), CollabError> {
        let Some(batch) = self.collector.drain() else {
            return Ok(());
        };
        let origin = hint.unwrap_or(batch.origin);
        let patch = generate_patch(&self.replica, &mut self.snapshot, &batch.events)?;
        self.undo.record(origin);
        self.stats.transactions += 1;
        log::debug!(
            "{origin:?} transaction: {} events, {} page ops",
            batch.events.len(),
            patch.len()
        );

        if patch.is_empty() || !origin.delivers_to_host() {
            return Ok(());
        }
        {
            let _guard = self.suppression.engage();
            host.apply_patches(std::slice::from_ref(&patch))?;
        }
        self.shadow = host.clone_pages();
        self.stats.delivered_patches += 1;
        Ok(())
    }

    pub fn replica(&self) -> &ReplicatedDocument {
        &self.replica
    }

    pub fn suppression(&self) -> SuppressionFlag {
        self.suppression.clone()
    }

    pub fn undo_adapter_mut(&mut self) -> &mut UndoAdapter {
        &mut self.undo
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn stats(&self) -> BindingStats {
        self.stats
    }
}

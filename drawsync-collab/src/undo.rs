//! Undo adapter: the replicated undo manager behind a host-style undo
//! interface.
//!
//! ```text
//!  host undo API                 UndoAdapter                 yrs
//!  ─────────────                 ───────────                 ───
//!  can_undo / can_redo  ───►  local depth mirror
//!  undo / redo          ───►  UndoManager::undo_blocking ──► scope: pages,
//!  add/remove_listener  ───►  (kind, listener) registry        pageOrder, file
//!                              ▲
//!  binding flush ── record(origin) (one call per transaction)
//! ```
//!
//! With `track_local_only`, only transactions tagged with the local origin
//! are captured, so undo never reverts another peer's edit. The depth
//! mirror counts those transactions itself instead of asking the manager.

use crate::config::BindingConfig;
use crate::origin::{TransactionOrigin, LOCAL_ORIGIN, REMOTE_ORIGIN};
use crate::schema::ReplicatedDocument;
use yrs::undo::{Options, UndoManager};

/// Undo-stack notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UndoEventKind {
    Add,
    Clear,
    Undo,
    Redo,
}

impl UndoEventKind {
    /// Parse a listener event name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "add" => Some(UndoEventKind::Add),
            "clear" => Some(UndoEventKind::Clear),
            "undo" => Some(UndoEventKind::Undo),
            "redo" => Some(UndoEventKind::Redo),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UndoEventKind::Add => "add",
            UndoEventKind::Clear => "clear",
            UndoEventKind::Undo => "undo",
            UndoEventKind::Redo => "redo",
        }
    }
}

/// Delivered to listeners after the stack changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoEvent {
    pub kind: UndoEventKind,
    pub undo_depth: usize,
    pub redo_depth: usize,
}

pub type UndoListener = Box<dyn FnMut(&UndoEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Host-facing view of the stack: `len` steps, of which the first
/// `index_of_next_add` are undoable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UndoHistory {
    pub len: usize,
    pub index_of_next_add: usize,
}

pub struct UndoAdapter {
    manager: UndoManager<()>,
    track_local_only: bool,
    undo_depth: usize,
    redo_depth: usize,
    listeners: Vec<(ListenerId, UndoEventKind, UndoListener)>,
    next_listener: u64,
}

impl UndoAdapter {
    pub fn new(replica: &ReplicatedDocument, config: &BindingConfig) -> Self {
        let mut options = Options::default();
        options.capture_timeout_millis = config.capture_timeout_millis;

        let mut manager =
            UndoManager::with_scope_and_options(replica.doc(), replica.pages_map(), options);
        manager.expand_scope(replica.page_order_array());
        manager.expand_scope(replica.file_map());
        manager.include_origin(LOCAL_ORIGIN);
        if !config.track_local_only {
            manager.include_origin(REMOTE_ORIGIN);
        }

        Self {
            manager,
            track_local_only: config.track_local_only,
            undo_depth: 0,
            redo_depth: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn can_undo(&self) -> bool {
        if self.track_local_only {
            self.undo_depth > 0
        } else {
            self.manager.can_undo()
        }
    }

    pub fn can_redo(&self) -> bool {
        if self.track_local_only {
            self.redo_depth > 0
        } else {
            self.manager.can_redo()
        }
    }

    /// Revert the most recent tracked transaction. Returns false (and does
    /// nothing) when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        if !self.manager.undo_blocking() {
            log::warn!("undo manager had nothing to undo, resetting depth mirror");
            self.reset_mirror();
            return false;
        }
        self.undo_depth = self.undo_depth.saturating_sub(1);
        self.redo_depth += 1;
        self.fire(UndoEventKind::Undo);
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        if !self.manager.redo_blocking() {
            log::warn!("undo manager had nothing to redo, resetting depth mirror");
            self.reset_mirror();
            return false;
        }
        self.redo_depth = self.redo_depth.saturating_sub(1);
        self.undo_depth += 1;
        self.fire(UndoEventKind::Redo);
        true
    }

    pub fn clear(&mut self) {
        self.manager.clear();
        self.reset_mirror();
        self.fire(UndoEventKind::Clear);
    }

    /// Account for a committed transaction. Called once per transaction
    /// with its origin; untracked origins are ignored.
    pub fn record(&mut self, origin: TransactionOrigin) {
        let tracked = match origin {
            TransactionOrigin::Local => true,
            TransactionOrigin::Remote => !self.track_local_only,
            _ => false,
        };
        if !tracked {
            return;
        }
        self.undo_depth += 1;
        self.redo_depth = 0;
        log::trace!("undo step recorded, depth {}", self.undo_depth);
        self.fire(UndoEventKind::Add);
    }

    /// Host notification that an edit happened. Steps are already grouped
    /// per transaction, so there is nothing to do.
    pub fn undoable_edit_happened(&mut self) {}

    pub fn history(&self) -> UndoHistory {
        UndoHistory {
            len: self.undo_depth + self.redo_depth,
            index_of_next_add: self.undo_depth,
        }
    }

    // ── Listeners ────────────────────────────────────────────────

    pub fn add_listener(&mut self, kind: UndoEventKind, listener: UndoListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, kind, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(candidate, _, _)| *candidate != id);
        self.listeners.len() != before
    }

    /// Take over `(event name, listener)` pairs registered on a previous
    /// undo manager. Unknown names are dropped. Returns how many were kept.
    pub fn migrate_listeners(&mut self, listeners: Vec<(String, UndoListener)>) -> usize {
        let mut kept = 0;
        for (name, listener) in listeners {
            match UndoEventKind::from_name(&name) {
                Some(kind) => {
                    self.add_listener(kind, listener);
                    kept += 1;
                }
                None => log::debug!("dropping undo listener for unknown event '{name}'"),
            }
        }
        kept
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn reset_mirror(&mut self) {
        self.undo_depth = 0;
        self.redo_depth = 0;
    }

    fn fire(&mut self, kind: UndoEventKind) {
        let event = UndoEvent {
            kind,
            undo_depth: self.undo_depth,
            redo_depth: self.redo_depth,
        };
        for (_, listens_to, listener) in &mut self.listeners {
            if *listens_to == kind {
                listener(&event);
            }
        }
    }
}

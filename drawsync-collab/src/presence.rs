//! Presence: ephemeral per-peer cursor, selection and identity state.
//!
//! Nothing here touches the replicated document. Messages are produced by
//! the local [`PresenceRoom`] and handed to whatever transport the
//! application uses; incoming messages update the remote peer table.
//!
//! ```text
//! local pointer move
//!       │
//!       ▼
//! PresenceRoom::update_local_cursor()   (throttled)
//!       │
//!       ▼
//! AwarenessMessage::Cursor { … } ──encode──► transport ──decode──►
//!                                                               │
//!                                   remote PresenceRoom::handle_message()
//!                                                               │
//!                                   remote_cursors_on_page(page) ─► renderer
//! ```

use crate::config::PresenceConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// State records
// ───────────────────────────────────────────────────────────────────

/// Pointer position in page coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub x: f64,
    pub y: f64,
    pub page_id: String,
}

/// A selection change: cell ids that became selected and deselected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionState {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub page_id: String,
}

/// What we know about one peer.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub user_id: Uuid,
    /// Free-form state published with `Join`, keyed by dotted path
    /// (`user.name`, `user.color`, ...).
    pub fields: BTreeMap<String, String>,
    pub cursor: Option<CursorState>,
    pub selection: Option<SelectionState>,
    last_update: Instant,
    last_timestamp: u64,
}

impl PeerState {
    pub fn new(user_id: Uuid, fields: BTreeMap<String, String>) -> Self {
        Self {
            user_id,
            fields,
            cursor: None,
            selection: None,
            last_update: Instant::now(),
            last_timestamp: 0,
        }
    }

    pub fn field(&self, path: &str) -> Option<&str> {
        self.fields.get(path).map(String::as_str)
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_update.elapsed() > timeout
    }

    /// Accept an update stamped `timestamp` unless it is older than the
    /// last one applied.
    fn accept(&mut self, timestamp: u64) -> bool {
        if timestamp < self.last_timestamp {
            return false;
        }
        self.last_timestamp = timestamp;
        self.last_update = Instant::now();
        true
    }

    fn touch(&mut self) {
        self.last_update = Instant::now();
    }
}

// ───────────────────────────────────────────────────────────────────
// Wire protocol messages
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AwarenessMessage {
    /// Announce (or re-announce) a peer with its state fields.
    Join {
        user_id: Uuid,
        fields: BTreeMap<String, String>,
    },
    Leave {
        user_id: Uuid,
    },
    Cursor {
        user_id: Uuid,
        cursor: CursorState,
        /// Per-sender monotonic counter.
        timestamp: u64,
    },
    Selection {
        user_id: Uuid,
        selection: SelectionState,
        timestamp: u64,
    },
}

impl AwarenessMessage {
    pub fn encode(&self) -> Result<Vec<u8>, PresenceError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| PresenceError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PresenceError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| PresenceError::Decode(e.to_string()))?;
        Ok(msg)
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            AwarenessMessage::Join { user_id, .. } => *user_id,
            AwarenessMessage::Leave { user_id } => *user_id,
            AwarenessMessage::Cursor { user_id, .. } => *user_id,
            AwarenessMessage::Selection { user_id, .. } => *user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    /// Only the local peer's state can be written.
    ReadOnlyPeer(Uuid),
    Encode(String),
    Decode(String),
}

impl fmt::Display for PresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceError::ReadOnlyPeer(id) => write!(f, "state of peer {id} is read-only"),
            PresenceError::Encode(msg) => write!(f, "presence encode error: {msg}"),
            PresenceError::Decode(msg) => write!(f, "presence decode error: {msg}"),
        }
    }
}

impl std::error::Error for PresenceError {}

// ───────────────────────────────────────────────────────────────────
// Presence room
// ───────────────────────────────────────────────────────────────────

/// The local peer plus every remote peer seen in a document room.
pub struct PresenceRoom {
    local: PeerState,
    peers: HashMap<Uuid, PeerState>,
    config: PresenceConfig,
    last_cursor_broadcast: Option<Instant>,
    timestamp_counter: u64,
}

impl PresenceRoom {
    pub fn new(local_user_id: Uuid, fields: BTreeMap<String, String>, config: PresenceConfig) -> Self {
        Self {
            local: PeerState::new(local_user_id, fields),
            peers: HashMap::new(),
            config,
            last_cursor_broadcast: None,
            timestamp_counter: 0,
        }
    }

    /// Apply a message received from the transport.
    ///
    /// A message claiming to come from the local peer is rejected: remote
    /// code cannot write local state.
    pub fn handle_message(&mut self, msg: &AwarenessMessage) -> Result<(), PresenceError> {
        let user_id = msg.user_id();
        if user_id == self.local.user_id {
            return Err(PresenceError::ReadOnlyPeer(user_id));
        }

        match msg {
            AwarenessMessage::Join { fields, .. } => {
                let peer = self
                    .peers
                    .entry(user_id)
                    .or_insert_with(|| PeerState::new(user_id, BTreeMap::new()));
                peer.fields = fields.clone();
                peer.touch();
            }
            AwarenessMessage::Leave { .. } => {
                self.peers.remove(&user_id);
            }
            AwarenessMessage::Cursor { cursor, timestamp, .. } => {
                // A cursor can arrive before the peer's join when we
                // connected late.
                let peer = self.peer_or_placeholder(user_id);
                if peer.accept(*timestamp) {
                    peer.cursor = Some(cursor.clone());
                }
            }
            AwarenessMessage::Selection { selection, timestamp, .. } => {
                let peer = self.peer_or_placeholder(user_id);
                if peer.accept(*timestamp) {
                    peer.selection = Some(selection.clone());
                }
            }
        }
        Ok(())
    }

    fn peer_or_placeholder(&mut self, user_id: Uuid) -> &mut PeerState {
        self.peers.entry(user_id).or_insert_with(|| {
            log::debug!("presence from unknown peer {user_id}, adding placeholder");
            PeerState::new(user_id, BTreeMap::new())
        })
    }

    /// Move the local cursor. Returns a message unless throttled.
    pub fn update_local_cursor(&mut self, cursor: CursorState) -> Option<AwarenessMessage> {
        self.local.cursor = Some(cursor);
        let throttled = self
            .last_cursor_broadcast
            .is_some_and(|last| last.elapsed() < self.config.cursor_throttle);
        if throttled {
            return None;
        }
        self.force_cursor_broadcast()
    }

    /// Broadcast the local cursor regardless of throttling.
    pub fn force_cursor_broadcast(&mut self) -> Option<AwarenessMessage> {
        let cursor = self.local.cursor.clone()?;
        self.last_cursor_broadcast = Some(Instant::now());
        Some(AwarenessMessage::Cursor {
            user_id: self.local.user_id,
            cursor,
            timestamp: self.next_timestamp(),
        })
    }

    pub fn update_local_selection(&mut self, selection: SelectionState) -> AwarenessMessage {
        self.local.selection = Some(selection.clone());
        AwarenessMessage::Selection {
            user_id: self.local.user_id,
            selection,
            timestamp: self.next_timestamp(),
        }
    }

    /// Write one of a peer's state fields. Only the local peer is writable.
    pub fn set_field(
        &mut self,
        user_id: Uuid,
        path: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<AwarenessMessage, PresenceError> {
        if user_id != self.local.user_id {
            return Err(PresenceError::ReadOnlyPeer(user_id));
        }
        self.local.fields.insert(path.into(), value.into());
        Ok(self.join_message())
    }

    pub fn join_message(&self) -> AwarenessMessage {
        AwarenessMessage::Join {
            user_id: self.local.user_id,
            fields: self.local.fields.clone(),
        }
    }

    pub fn leave_message(&self) -> AwarenessMessage {
        AwarenessMessage::Leave {
            user_id: self.local.user_id,
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        self.timestamp_counter += 1;
        self.timestamp_counter
    }

    // ── Reading ──────────────────────────────────────────────────

    pub fn local_user_id(&self) -> Uuid {
        self.local.user_id
    }

    pub fn local_state(&self) -> &PeerState {
        &self.local
    }

    pub fn peer(&self, user_id: &Uuid) -> Option<&PeerState> {
        self.peers.get(user_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerState> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Remote peers with a cursor, split into those on `page_id` and those
    /// elsewhere.
    pub fn remote_cursors_on_page(&self, page_id: &str) -> (Vec<&PeerState>, Vec<&PeerState>) {
        self.peers
            .values()
            .filter(|peer| peer.cursor.is_some())
            .partition(|peer| {
                peer.cursor
                    .as_ref()
                    .is_some_and(|cursor| cursor.page_id == page_id)
            })
    }

    /// Drop peers silent for longer than the idle timeout.
    pub fn cleanup_idle_peers(&mut self) -> Vec<Uuid> {
        let timeout = self.config.idle_timeout;
        let stale: Vec<Uuid> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_idle(timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.peers.remove(id);
        }
        stale
    }

    /// Display name under the configured key, or a short placeholder.
    pub fn display_name_of(&self, user_id: &Uuid) -> String {
        self.state_of(user_id)
            .and_then(|peer| peer.field(&self.config.user_name_key))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Peer-{}", &user_id.simple().to_string()[..8]))
    }

    /// Color under the configured key, or one derived from the id.
    pub fn color_of(&self, user_id: &Uuid) -> String {
        self.state_of(user_id)
            .and_then(|peer| peer.field(&self.config.user_color_key))
            .map(str::to_string)
            .unwrap_or_else(|| color_from_uuid(*user_id))
    }

    fn state_of(&self, user_id: &Uuid) -> Option<&PeerState> {
        if *user_id == self.local.user_id {
            Some(&self.local)
        } else {
            self.peers.get(user_id)
        }
    }
}

/// Stable, saturated `#rrggbb` color for an id.
fn color_from_uuid(id: Uuid) -> String {
    let hue = ((id.as_u128() % 360) as f32) / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fields(name: &str) -> BTreeMap<String, String> {
        [("user.name".to_string(), name.to_string())].into()
    }

    fn cursor(x: f64, page: &str) -> CursorState {
        CursorState {
            x,
            y: 0.0,
            page_id: page.into(),
        }
    }

    fn room() -> PresenceRoom {
        PresenceRoom::new(Uuid::new_v4(), fields("local"), PresenceConfig::default())
    }

    #[test]
    fn test_message_encode_decode() {
        let msg = AwarenessMessage::Selection {
            user_id: Uuid::new_v4(),
            selection: SelectionState {
                added: vec!["3".into()],
                removed: vec!["2".into()],
                page_id: "p".into(),
            },
            timestamp: 7,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(AwarenessMessage::decode(&bytes).unwrap(), msg);
        assert!(matches!(
            AwarenessMessage::decode(&[0xff]),
            Err(PresenceError::Decode(_))
        ));
    }

    #[test]
    fn test_join_then_leave() {
        let mut room = room();
        let peer = Uuid::new_v4();
        room.handle_message(&AwarenessMessage::Join { user_id: peer, fields: fields("ada") })
            .unwrap();
        assert_eq!(room.peer_count(), 1);
        assert_eq!(room.display_name_of(&peer), "ada");

        room.handle_message(&AwarenessMessage::Leave { user_id: peer }).unwrap();
        assert_eq!(room.peer_count(), 0);
    }

    #[test]
    fn test_local_state_is_not_writable_remotely() {
        let mut room = room();
        let local = room.local_user_id();
        let forged = AwarenessMessage::Join { user_id: local, fields: fields("mallory") };
        assert_eq!(room.handle_message(&forged), Err(PresenceError::ReadOnlyPeer(local)));
        assert_eq!(room.display_name_of(&local), "local");

        let other = Uuid::new_v4();
        assert!(room.set_field(other, "user.name", "x").is_err());
        let msg = room.set_field(local, "user.color", "#ff0000").unwrap();
        assert!(matches!(msg, AwarenessMessage::Join { .. }));
        assert_eq!(room.color_of(&local), "#ff0000");
    }

    #[test]
    fn test_cursor_from_unknown_peer_creates_placeholder() {
        let mut room = room();
        let peer = Uuid::new_v4();
        room.handle_message(&AwarenessMessage::Cursor {
            user_id: peer,
            cursor: cursor(1.0, "p"),
            timestamp: 1,
        })
        .unwrap();
        assert_eq!(room.peer(&peer).and_then(|p| p.cursor.clone()), Some(cursor(1.0, "p")));
        assert!(room.display_name_of(&peer).starts_with("Peer-"));
        assert!(room.color_of(&peer).starts_with('#'));
    }

    #[test]
    fn test_stale_cursor_rejected() {
        let mut room = room();
        let peer = Uuid::new_v4();
        for (x, timestamp) in [(5.0, 5), (3.0, 3)] {
            room.handle_message(&AwarenessMessage::Cursor {
                user_id: peer,
                cursor: cursor(x, "p"),
                timestamp,
            })
            .unwrap();
        }
        assert_eq!(room.peer(&peer).unwrap().cursor.as_ref().unwrap().x, 5.0);
    }

    #[test]
    fn test_cursor_throttle() {
        let config = PresenceConfig {
            cursor_throttle: Duration::from_millis(50),
            ..PresenceConfig::default()
        };
        let mut room = PresenceRoom::new(Uuid::new_v4(), BTreeMap::new(), config);

        assert!(room.update_local_cursor(cursor(0.0, "p")).is_some());
        assert!(room.update_local_cursor(cursor(1.0, "p")).is_none());

        thread::sleep(Duration::from_millis(60));
        let Some(AwarenessMessage::Cursor { cursor: sent, timestamp, .. }) =
            room.update_local_cursor(cursor(2.0, "p"))
        else {
            panic!("expected cursor broadcast");
        };
        assert_eq!(sent.x, 2.0);
        assert_eq!(timestamp, 2);
    }

    #[test]
    fn test_force_broadcast_needs_a_cursor() {
        let mut room = room();
        assert!(room.force_cursor_broadcast().is_none());
        room.update_local_cursor(cursor(0.0, "p"));
        assert!(room.force_cursor_broadcast().is_some());
    }

    #[test]
    fn test_partition_by_page() {
        let mut room = room();
        let here = Uuid::new_v4();
        let there = Uuid::new_v4();
        let idle = Uuid::new_v4();
        for (peer, page) in [(here, "p1"), (there, "p2")] {
            room.handle_message(&AwarenessMessage::Cursor {
                user_id: peer,
                cursor: cursor(0.0, page),
                timestamp: 1,
            })
            .unwrap();
        }
        room.handle_message(&AwarenessMessage::Join { user_id: idle, fields: BTreeMap::new() })
            .unwrap();

        let (on_page, elsewhere) = room.remote_cursors_on_page("p1");
        assert_eq!(on_page.iter().map(|p| p.user_id).collect::<Vec<_>>(), vec![here]);
        assert_eq!(elsewhere.iter().map(|p| p.user_id).collect::<Vec<_>>(), vec![there]);
    }

    #[test]
    fn test_cleanup_idle_peers() {
        let config = PresenceConfig {
            idle_timeout: Duration::from_millis(20),
            ..PresenceConfig::default()
        };
        let mut room = PresenceRoom::new(Uuid::new_v4(), BTreeMap::new(), config);
        let peer = Uuid::new_v4();
        room.handle_message(&AwarenessMessage::Join { user_id: peer, fields: BTreeMap::new() })
            .unwrap();

        assert!(room.cleanup_idle_peers().is_empty());
        thread::sleep(Duration::from_millis(40));
        assert_eq!(room.cleanup_idle_peers(), vec![peer]);
        assert_eq!(room.peer_count(), 0);
    }

    #[test]
    fn test_color_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(color_from_uuid(id), color_from_uuid(id));
        assert_eq!(color_from_uuid(id).len(), 7);
    }
}

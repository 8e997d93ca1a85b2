//! Undo through a binding while another peer edits concurrently.

use drawsync_collab::{
    BindingConfig, DocumentBinding, LiveHost, ReplicatedDocument, UndoEvent, UndoEventKind,
    UndoListener, REMOTE_ORIGIN,
};
use drawsync_core::{Page, Shape};
use std::cell::RefCell;
use std::rc::Rc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pages() -> Vec<Page> {
    vec![
        Page::new("a", "A")
            .with_shape(Shape::new("0"))
            .with_shape(Shape::new("1").with("parent", "0")),
        Page::new("b", "B"),
    ]
}

struct Peer {
    binding: DocumentBinding,
    host: LiveHost,
}

impl Peer {
    fn first(config: BindingConfig) -> Self {
        let mut host = LiveHost::from_pages(&pages());
        let binding =
            DocumentBinding::new(ReplicatedDocument::with_client_id(1), &mut host, config).unwrap();
        Self { binding, host }
    }

    fn join(other: &Peer, client_id: u64, config: BindingConfig) -> Self {
        let replica = ReplicatedDocument::with_client_id(client_id);
        replica
            .apply_update(&other.binding.replica().encode_state_as_update(), REMOTE_ORIGIN)
            .unwrap();
        let mut host = LiveHost::default();
        let binding = DocumentBinding::new(replica, &mut host, config).unwrap();
        Self { binding, host }
    }

    fn edit(&mut self, f: impl FnOnce(&mut Vec<Page>)) {
        self.host.edit(f);
        self.binding.handle_local_change(&mut self.host).unwrap();
    }

    fn receive_from(&mut self, other: &Peer) {
        let update = other
            .binding
            .encode_update_since(&self.binding.encode_state_vector())
            .unwrap();
        self.binding
            .apply_remote_update(&mut self.host, &update)
            .unwrap();
    }
}

#[test]
fn test_undo_reverts_only_the_local_insert() {
    init_logger();
    let mut first = Peer::first(BindingConfig::default());
    let mut second = Peer::join(&first, 2, BindingConfig::default());

    first.edit(|pages| pages[0].shapes.push(Shape::new("mine").with("parent", "1")));
    second.edit(|pages| pages[1].name = "Theirs".into());
    first.receive_from(&second);

    assert!(first.binding.undo(&mut first.host).unwrap());

    let pages = first.host.pages();
    assert_eq!(pages[0].shape_ids(), vec!["0", "1"]);
    assert_eq!(pages[1].name, "Theirs");
    assert!(!first.binding.can_undo());

    second.receive_from(&first);
    assert_eq!(second.host.pages(), first.host.pages());
}

#[test]
fn test_remote_edit_alone_is_not_undoable() {
    init_logger();
    let mut first = Peer::first(BindingConfig::default());
    let mut second = Peer::join(&first, 2, BindingConfig::default());

    second.edit(|pages| {
        pages.remove(1);
    });
    first.receive_from(&second);

    assert_eq!(first.host.pages().len(), 1);
    assert!(!first.binding.can_undo());
    assert!(!first.binding.undo(&mut first.host).unwrap());
    assert_eq!(first.host.pages().len(), 1);
}

#[test]
fn test_redo_after_concurrent_edit() {
    init_logger();
    let mut first = Peer::first(BindingConfig::default());
    let mut second = Peer::join(&first, 2, BindingConfig::default());

    first.edit(|pages| pages[1].name = "Local".into());
    first.binding.undo(&mut first.host).unwrap();
    assert_eq!(first.host.pages()[1].name, "B");

    second.edit(|pages| pages[0].shapes.push(Shape::new("remote")));
    first.receive_from(&second);

    assert!(first.binding.redo(&mut first.host).unwrap());
    let pages = first.host.pages();
    assert_eq!(pages[1].name, "Local");
    assert_eq!(pages[0].shape_ids(), vec!["0", "1", "remote"]);
    assert_eq!(pages, first.binding.replica().pages());
}

#[test]
fn test_each_local_edit_is_one_step() {
    init_logger();
    let mut first = Peer::first(BindingConfig::default());

    first.edit(|pages| pages[0].name = "One".into());
    first.edit(|pages| pages[0].name = "Two".into());
    assert_eq!(first.binding.undo_adapter_mut().history().len, 2);

    first.binding.undo(&mut first.host).unwrap();
    assert_eq!(first.host.pages()[0].name, "One");
    first.binding.undo(&mut first.host).unwrap();
    assert_eq!(first.host.pages()[0].name, "A");

    let history = first.binding.undo_adapter_mut().history();
    assert_eq!((history.len, history.index_of_next_add), (2, 0));
}

#[test]
fn test_listeners_observe_binding_activity() {
    init_logger();
    let mut first = Peer::first(BindingConfig::default());
    let events = Rc::new(RefCell::new(Vec::new()));

    let migrated: Vec<(String, UndoListener)> = ["Add", "Undo", "Redo", "Clear", "change"]
        .into_iter()
        .map(|name| {
            let sink = Rc::clone(&events);
            let listener: UndoListener = Box::new(move |event: &UndoEvent| sink.borrow_mut().push(event.kind));
            (name.to_string(), listener)
        })
        .collect();
    assert_eq!(first.binding.undo_adapter_mut().migrate_listeners(migrated), 4);

    first.edit(|pages| pages[0].name = "X".into());
    first.binding.undo(&mut first.host).unwrap();
    first.binding.redo(&mut first.host).unwrap();
    first.binding.undo_adapter_mut().clear();

    assert_eq!(
        *events.borrow(),
        vec![
            UndoEventKind::Add,
            UndoEventKind::Undo,
            UndoEventKind::Redo,
            UndoEventKind::Clear
        ]
    );
    assert!(!first.binding.can_undo());
}

#[test]
fn test_tracking_remote_edits_when_configured() {
    init_logger();
    let config = BindingConfig {
        track_local_only: false,
        ..BindingConfig::default()
    };
    let mut first = Peer::first(config.clone());
    let mut second = Peer::join(&first, 2, config);

    second.edit(|pages| pages[1].name = "Remote".into());
    first.receive_from(&second);
    assert!(first.binding.can_undo());

    assert!(first.binding.undo(&mut first.host).unwrap());
    assert_eq!(first.host.pages()[1].name, "B");
}

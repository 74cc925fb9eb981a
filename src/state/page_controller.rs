use crate::history::{HistoryCommand, KeyChord, MutationHistory, Notifier, UndoRedoMediator};
use crate::listener::{ChangeCallback, ChangeSubscription, ChangeTransport};
use crate::models::WorkspaceTree;
use crate::navigation::{DisplayIdentity, Navigator};
use crate::tree::{BoardStore, SyncError, SynchronizedTree, TreeSynchronizer};
use crate::util::{Scheduler, Spawner};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) const APP_NAME: &str = "OCTO";

/// Overlay width and the strip on the right reserved for other UI.
pub(crate) const FILTER_OVERLAY_WIDTH: f64 = 420.0;
pub(crate) const FILTER_OVERLAY_MARGIN: f64 = 100.0;

/// Bursts of change notifications within this window cause one resync.
pub(crate) const CHANGE_COALESCE_MS: u32 = 100;

/// Title and favicon side effects of the displayed board.
pub(crate) trait DocumentChrome {
    fn set_title(&self, title: &str);
    fn set_favicon(&self, icon: Option<&str>);
}

pub(crate) struct PageServices {
    pub store: Rc<dyn BoardStore>,
    pub history: Rc<dyn MutationHistory>,
    pub notifier: Rc<dyn Notifier>,
    pub navigator: Rc<dyn Navigator>,
    pub chrome: Rc<dyn DocumentChrome>,
    pub transport: Rc<dyn ChangeTransport>,
    pub spawner: Spawner,
    pub scheduler: Scheduler,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Where the filter overlay was requested: the trigger's box and the body's box at click time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct FilterAnchor {
    pub anchor: Rect,
    pub body: Rect,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct FilterPlacement {
    pub page_x: f64,
    pub page_y: f64,
}

impl FilterAnchor {
    /// Bottom-left of the anchor, clamped so the overlay never covers the right margin.
    pub fn placement(&self) -> FilterPlacement {
        let max_x = self.body.right - FILTER_OVERLAY_WIDTH - FILTER_OVERLAY_MARGIN;
        FilterPlacement {
            page_x: max_x.min(self.anchor.left - self.body.left),
            page_y: self.anchor.bottom - self.body.top,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PagePhase {
    Uninitialized,
    /// Mounted without a board; only the workspace listing is shown.
    Idle,
    Attaching,
    Synced,
    Closed,
}

#[derive(Clone, Debug)]
pub(crate) enum BoardSnapshot {
    NoBoard,
    Board(Rc<SynchronizedTree>),
}

impl BoardSnapshot {
    pub fn tree(&self) -> Option<&Rc<SynchronizedTree>> {
        match self {
            BoardSnapshot::NoBoard => None,
            BoardSnapshot::Board(tree) => Some(tree),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChromeProjection {
    pub title: String,
    pub icon: Option<String>,
}

impl ChromeProjection {
    pub fn of(board: &BoardSnapshot) -> Self {
        match board {
            BoardSnapshot::NoBoard => Self {
                title: APP_NAME.to_string(),
                icon: None,
            },
            BoardSnapshot::Board(tree) => Self {
                title: format!(
                    "{} - {} | {}",
                    APP_NAME,
                    tree.board().title,
                    tree.active_view().title
                ),
                icon: tree.board().icon.clone(),
            },
        }
    }
}

/// What the page renders. A new generation means something changed, even when
/// the tree itself is the same value.
#[derive(Clone, Debug)]
pub(crate) struct PageSnapshot {
    pub generation: u64,
    pub phase: PagePhase,
    pub identity: DisplayIdentity,
    pub workspace: Rc<WorkspaceTree>,
    pub board: BoardSnapshot,
    pub filter: Option<FilterAnchor>,
    pub sync_error: Option<String>,
    pub syncing: bool,
}

struct PageState {
    phase: PagePhase,
    identity: DisplayIdentity,
    workspace: Rc<WorkspaceTree>,
    board: BoardSnapshot,
    filter: Option<FilterAnchor>,
    sync_error: Option<String>,
    generation: u64,

    next_seq: u64,
    committed_seq: u64,
    workspace_seq: u64,
    in_flight: usize,
    resync_scheduled: bool,

    applied_chrome: Option<ChromeProjection>,
}

struct PageInner {
    spawner: Spawner,
    scheduler: Scheduler,
    navigator: Rc<dyn Navigator>,
    chrome: Rc<dyn DocumentChrome>,
    subscription: ChangeSubscription,
    synchronizer: TreeSynchronizer,
    mediator: UndoRedoMediator,
    state: RefCell<PageState>,
    render_hook: RefCell<Option<Rc<dyn Fn(u64)>>>,
    key_detach: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// Orchestrates navigation, change subscription, tree sync and undo/redo for one board page.
#[derive(Clone)]
pub(crate) struct PageController {
    inner: Rc<PageInner>,
}

impl PageController {
    pub fn new(services: PageServices) -> Self {
        let identity = DisplayIdentity::from_query(&services.navigator.current_search());
        log::info!("board page: {:?}", identity);

        Self {
            inner: Rc::new(PageInner {
                subscription: ChangeSubscription::new(
                    services.transport,
                    services.scheduler.clone(),
                ),
                synchronizer: TreeSynchronizer::new(services.store),
                mediator: UndoRedoMediator::new(services.history, services.notifier),
                spawner: services.spawner,
                scheduler: services.scheduler,
                navigator: services.navigator,
                chrome: services.chrome,
                state: RefCell::new(PageState {
                    phase: PagePhase::Uninitialized,
                    identity,
                    workspace: Rc::new(WorkspaceTree::default()),
                    board: BoardSnapshot::NoBoard,
                    filter: None,
                    sync_error: None,
                    generation: 0,
                    next_seq: 0,
                    committed_seq: 0,
                    workspace_seq: 0,
                    in_flight: 0,
                    resync_scheduled: false,
                    applied_chrome: None,
                }),
                render_hook: RefCell::new(None),
                key_detach: RefCell::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<PageInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Called with the new generation after every observable change.
    pub fn set_render_hook(&self, hook: impl Fn(u64) + 'static) {
        *self.inner.render_hook.borrow_mut() = Some(Rc::new(hook));
    }

    pub fn snapshot(&self) -> PageSnapshot {
        let s = self.inner.state.borrow();
        PageSnapshot {
            generation: s.generation,
            phase: s.phase,
            identity: s.identity.clone(),
            workspace: s.workspace.clone(),
            board: s.board.clone(),
            filter: s.filter,
            sync_error: s.sync_error.clone(),
            syncing: s.in_flight > 0,
        }
    }

    pub fn subscription(&self) -> &ChangeSubscription {
        &self.inner.subscription
    }

    fn is_closed(&self) -> bool {
        self.inner.state.borrow().phase == PagePhase::Closed
    }

    fn bump(&self) {
        let generation = {
            let mut s = self.inner.state.borrow_mut();
            s.generation += 1;
            s.generation
        };
        let hook = self.inner.render_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(generation);
        }
    }

    fn spawn_sync(&self) {
        let this = self.clone();
        let fut: LocalBoxFuture<'static, ()> = Box::pin(async move { this.sync().await });
        (self.inner.spawner)(fut);
    }

    /// Manual refresh; same path as a change notification without the coalescing delay.
    pub fn sync_now(&self) {
        if !self.is_closed() {
            self.spawn_sync();
        }
    }

    /// `key_detach` removes the page's keyboard listener on unmount.
    pub fn mount(&self, key_detach: Option<Box<dyn FnOnce()>>) {
        let identity = {
            let s = self.inner.state.borrow();
            if s.phase != PagePhase::Uninitialized {
                return;
            }
            s.identity.clone()
        };
        *self.inner.key_detach.borrow_mut() = key_detach;

        match identity {
            DisplayIdentity::BoardSelected { board_id, view_id } => {
                self.attach_to_board(&board_id, view_id);
            }
            DisplayIdentity::NoBoardSelected => {
                self.inner.state.borrow_mut().phase = PagePhase::Idle;
                self.spawn_sync();
                self.bump();
            }
        }
    }

    pub fn unmount(&self) {
        {
            let mut s = self.inner.state.borrow_mut();
            if s.phase == PagePhase::Closed {
                return;
            }
            s.phase = PagePhase::Closed;
            s.filter = None;
            log::info!("board page unmount: {:?}", s.identity.board_id());
        }

        self.inner.subscription.close();
        if let Some(detach) = self.inner.key_detach.borrow_mut().take() {
            detach();
        }
    }

    fn attach_to_board(&self, board_id: &str, view_id: Option<String>) {
        log::info!("attach to board {board_id}");

        let sub = &self.inner.subscription;
        let scoped = if sub.is_open() {
            sub.rescope(sub.scope(), [board_id.to_string()])
        } else {
            sub.open([board_id.to_string()], self.change_callback())
        };
        if let Err(e) = scoped {
            log::error!("listener scope for {board_id} not applied: {e}");
        }

        {
            let mut s = self.inner.state.borrow_mut();
            s.identity = DisplayIdentity::BoardSelected {
                board_id: board_id.to_string(),
                view_id,
            };
            s.phase = PagePhase::Attaching;
        }
        self.spawn_sync();
        self.bump();
    }

    fn change_callback(&self) -> ChangeCallback {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move |block_id: &str| {
            if let Some(page) = Self::from_weak(&weak) {
                page.on_block_changed(block_id);
            }
        })
    }

    fn on_block_changed(&self, block_id: &str) {
        {
            let mut s = self.inner.state.borrow_mut();
            if s.phase == PagePhase::Closed || s.resync_scheduled {
                return;
            }
            s.resync_scheduled = true;
        }
        log::debug!("block changed: {block_id}");

        let weak = Rc::downgrade(&self.inner);
        (self.inner.scheduler)(
            CHANGE_COALESCE_MS,
            Box::new(move || {
                if let Some(page) = Self::from_weak(&weak) {
                    page.inner.state.borrow_mut().resync_scheduled = false;
                    if !page.is_closed() {
                        page.spawn_sync();
                    }
                }
            }),
        );
    }

    /// Re-syncs the workspace listing and, when a board is selected, the board tree.
    ///
    /// Results older than the last committed sync, aimed at a board that is no longer
    /// selected, or arriving after unmount are dropped.
    pub async fn sync(&self) {
        let (seq, target) = {
            let mut s = self.inner.state.borrow_mut();
            if s.phase == PagePhase::Closed {
                return;
            }
            s.next_seq += 1;
            s.in_flight += 1;
            (s.next_seq, s.identity.clone())
        };
        log::debug!("sync #{seq} start: {:?}", target.board_id());

        let workspace = self.inner.synchronizer.sync_workspace().await;
        self.commit_workspace(seq, workspace);

        if let DisplayIdentity::BoardSelected { board_id, view_id } = &target {
            let result = self
                .inner
                .synchronizer
                .sync(board_id, view_id.as_deref())
                .await;
            self.commit_board(seq, board_id, result);
        }

        let closed = {
            let mut s = self.inner.state.borrow_mut();
            s.in_flight = s.in_flight.saturating_sub(1);
            s.phase == PagePhase::Closed
        };
        if !closed {
            self.apply_chrome();
            self.bump();
        }
    }

    fn commit_workspace(
        &self,
        seq: u64,
        result: Result<WorkspaceTree, SyncError>,
    ) {
        let mut s = self.inner.state.borrow_mut();
        if s.phase == PagePhase::Closed || seq < s.workspace_seq {
            return;
        }
        match result {
            Ok(workspace) => {
                s.workspace_seq = seq;
                s.workspace = Rc::new(workspace);
                if s.identity.board_id().is_none() {
                    s.sync_error = None;
                }
            }
            Err(e) => {
                log::warn!("workspace sync #{seq} failed: {e}");
                s.sync_error = Some(e.to_string());
            }
        }
    }

    fn commit_board(
        &self,
        seq: u64,
        board_id: &str,
        result: Result<SynchronizedTree, SyncError>,
    ) {
        let mut s = self.inner.state.borrow_mut();
        if s.phase == PagePhase::Closed {
            return;
        }
        if seq < s.committed_seq || s.identity.board_id() != Some(board_id) {
            log::debug!("sync #{seq} for {board_id} discarded as stale");
            return;
        }
        s.committed_seq = seq;

        match result {
            Ok(tree) => {
                log::info!(
                    "sync #{seq} complete: {} ({})",
                    tree.board().id,
                    tree.board().title
                );
                // Carry the search text across resyncs of the same board.
                let tree = match s.board.tree() {
                    Some(prev) if prev.board().id == tree.board().id => {
                        let text = prev.search_text().map(str::to_string);
                        tree.with_search_text(text)
                    }
                    _ => tree,
                };
                // The view may have been switched while this sync was in flight.
                let tree = match s.identity.view_id() {
                    Some(view_id) if view_id != tree.active_view().id => {
                        tree.with_active_view(view_id)
                    }
                    _ => tree,
                };
                s.identity = DisplayIdentity::BoardSelected {
                    board_id: board_id.to_string(),
                    view_id: Some(tree.active_view().id.clone()),
                };
                s.board = BoardSnapshot::Board(Rc::new(tree));
                s.sync_error = None;
                s.phase = PagePhase::Synced;
            }
            Err(e) => {
                // Keep the last good tree; the page shows a banner instead.
                log::warn!("sync #{seq} for {board_id} failed: {e}");
                s.sync_error = Some(e.to_string());
                s.phase = match s.board {
                    BoardSnapshot::Board(_) => PagePhase::Synced,
                    BoardSnapshot::NoBoard => PagePhase::Idle,
                };
            }
        }
    }

    /// Recomputes title and favicon from the displayed board and active view.
    fn apply_chrome(&self) {
        let (next, prev) = {
            let s = self.inner.state.borrow();
            (ChromeProjection::of(&s.board), s.applied_chrome.clone())
        };
        if prev.as_ref() == Some(&next) {
            return;
        }

        if prev.as_ref().map(|p| &p.title) != Some(&next.title) {
            self.inner.chrome.set_title(&next.title);
        }
        if prev.as_ref().map(|p| &p.icon) != Some(&next.icon) {
            self.inner.chrome.set_favicon(next.icon.as_deref());
        }
        self.inner.state.borrow_mut().applied_chrome = Some(next);
    }

    pub fn show_board(&self, board_id: &str) {
        if self.is_closed() {
            return;
        }
        if self.inner.state.borrow().identity.board_id() == Some(board_id) {
            return;
        }

        self.inner.navigator.push(&DisplayIdentity::board(board_id));
        self.attach_to_board(board_id, None);
    }

    /// `board_id` defaults to the current board.
    pub fn show_view(&self, view_id: &str, board_id: Option<&str>) {
        if self.is_closed() {
            return;
        }

        let current = self.inner.state.borrow().identity.board_id().map(str::to_string);
        let Some(board_id) = board_id.map(str::to_string).or(current.clone()) else {
            log::warn!("show_view({view_id}) without a board");
            return;
        };

        if current.as_deref() != Some(board_id.as_str()) {
            self.attach_to_board(&board_id, Some(view_id.to_string()));
            self.inner
                .navigator
                .push(&DisplayIdentity::board_view(&board_id, view_id));
            return;
        }

        let resolved = {
            let mut s = self.inner.state.borrow_mut();
            let next = match s.board.tree() {
                Some(tree) if tree.board().id == board_id => {
                    Some(tree.with_active_view(view_id))
                }
                _ => None,
            };
            match next {
                Some(tree) => {
                    let resolved = tree.active_view().id.clone();
                    s.board = BoardSnapshot::Board(Rc::new(tree));
                    s.identity = DisplayIdentity::board_view(&board_id, &resolved);
                    Some(resolved)
                }
                None => {
                    // Tree for this board still loading; the pending sync picks the view up.
                    s.identity = DisplayIdentity::board_view(&board_id, view_id);
                    None
                }
            }
        };

        let pushed = resolved.as_deref().unwrap_or(view_id);
        self.inner
            .navigator
            .push(&DisplayIdentity::board_view(&board_id, pushed));
        if resolved.is_none() {
            self.spawn_sync();
        }
        self.apply_chrome();
        self.bump();
    }

    pub fn show_filter(&self, anchor: Option<FilterAnchor>) {
        if self.is_closed() {
            return;
        }
        self.inner.state.borrow_mut().filter = anchor;
        self.bump();
    }

    /// Always re-renders, even when the text did not change.
    pub fn set_search_text(&self, text: Option<String>) {
        if self.is_closed() {
            return;
        }
        {
            let mut s = self.inner.state.borrow_mut();
            if let Some(tree) = s.board.tree() {
                let next = tree.with_search_text(text);
                s.board = BoardSnapshot::Board(Rc::new(next));
            }
        }
        self.bump();
    }

    /// Returns whether the key was an undo/redo chord.
    pub fn handle_key(&self, chord: &KeyChord) -> bool {
        if self.is_closed() {
            return false;
        }
        let Some(cmd) = chord.command() else {
            return false;
        };
        self.perform_history(cmd);
        true
    }

    pub fn perform_history(&self, cmd: HistoryCommand) {
        let mediator = self.inner.mediator.clone();
        let fut: LocalBoxFuture<'static, ()> = Box::pin(async move {
            let _ = mediator.perform(cmd).await;
        });
        (self.inner.spawner)(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{SubscriptionState, TransportSignal};
    use crate::testing::Harness;
    use std::collections::BTreeSet;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn body_chord(key: &str, shift: bool) -> KeyChord {
        KeyChord {
            key: key.to_string(),
            shift,
            ctrl: true,
            target_is_body: true,
            ..KeyChord::default()
        }
    }

    fn update_frame(block_id: &str) -> TransportSignal {
        TransportSignal::Message(format!(
            r#"{{"action":"UPDATE_BLOCK","blockId":"{block_id}"}}"#
        ))
    }

    #[test]
    fn test_mount_with_board_attaches_and_syncs() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1", "v2"]);
        let page = h.page();

        page.mount(None);
        assert_eq!(page.snapshot().phase, PagePhase::Attaching);
        assert_eq!(page.subscription().scope(), set(&["b1"]));

        h.run();
        let snap = page.snapshot();
        assert_eq!(snap.phase, PagePhase::Synced);
        let tree = snap.board.tree().expect("tree");
        assert_eq!(tree.active_view().id, "v1");
        assert_eq!(snap.identity, DisplayIdentity::board_view("b1", "v1"));
        assert_eq!(h.store.workspace_fetches(), 1);
    }

    #[test]
    fn test_mount_without_board_is_idle_and_syncs_workspace() {
        let h = Harness::new("");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();

        page.mount(None);
        h.run();

        let snap = page.snapshot();
        assert_eq!(snap.phase, PagePhase::Idle);
        assert!(snap.board.tree().is_none());
        assert_eq!(snap.workspace.boards.len(), 1);
        assert_eq!(h.store.workspace_fetches(), 1);
        assert_eq!(page.subscription().state(), SubscriptionState::Closed);
        assert!(snap.generation > 0);
    }

    #[test]
    fn test_mount_honors_view_from_url() {
        let h = Harness::new("?id=b1&v=v2");
        h.store.put_board("b1", "Roadmap", &["v1", "v2"]);
        let page = h.page();

        page.mount(None);
        h.run();
        let snap = page.snapshot();
        assert_eq!(snap.board.tree().expect("tree").active_view().id, "v2");
    }

    #[test]
    fn test_board_switch_round_trip_leaves_single_scope() {
        let h = Harness::new("?id=A");
        h.store.put_board("A", "Alpha", &["a1"]);
        h.store.put_board("B", "Beta", &["b1"]);
        let page = h.page();
        page.mount(None);
        h.transport.signal(TransportSignal::Connected);
        h.run();

        page.show_board("B");
        h.run();
        page.show_board("A");
        h.run();

        assert_eq!(page.subscription().scope(), set(&["A"]));
        assert_eq!(h.transport.connect_count(), 1);
        assert_eq!(
            page.snapshot().board.tree().expect("tree").board().id,
            "A"
        );
    }

    #[test]
    fn test_show_current_board_is_noop() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        page.mount(None);
        h.run();

        let fetches = h.store.board_fetches();
        page.show_board("b1");
        h.run();
        assert!(h.navigator.entries().is_empty());
        assert_eq!(h.store.board_fetches(), fetches);
    }

    #[test]
    fn test_push_board_then_view_yields_two_history_entries() {
        let h = Harness::new("");
        h.store.put_board("b1", "Roadmap", &["v1", "v2"]);
        let page = h.page();
        page.mount(None);
        h.run();

        page.show_board("b1");
        h.run();
        page.show_view("v2", Some("b1"));
        h.run();

        let entries = h.navigator.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], "?id=b1");
        assert!(entries[1].contains("id=b1"));
        assert!(entries[1].contains("v=v2"));
        assert_eq!(
            page.snapshot().board.tree().expect("tree").active_view().id,
            "v2"
        );
    }

    #[test]
    fn test_view_switch_within_board_does_not_resync() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1", "v2"]);
        let page = h.page();
        page.mount(None);
        h.run();

        let fetches = h.store.board_fetches();
        page.show_view("v2", None);
        h.run();
        assert_eq!(h.store.board_fetches(), fetches);
        assert_eq!(page.snapshot().phase, PagePhase::Synced);
        assert_eq!(page.snapshot().identity.view_id(), Some("v2"));
    }

    #[test]
    fn test_unknown_view_falls_back_to_first() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1", "v2"]);
        let page = h.page();
        page.mount(None);
        h.run();

        page.show_view("ghost", None);
        let snap = page.snapshot();
        assert_eq!(snap.board.tree().expect("tree").active_view().id, "v1");
        assert_eq!(
            h.navigator.entries().last().map(String::as_str),
            Some("?id=b1&v=v1")
        );
    }

    #[test]
    fn test_view_on_other_board_attaches() {
        let h = Harness::new("?id=A");
        h.store.put_board("A", "Alpha", &["a1"]);
        h.store.put_board("B", "Beta", &["b1", "b2"]);
        let page = h.page();
        page.mount(None);
        h.run();

        page.show_view("b2", Some("B"));
        h.run();
        let snap = page.snapshot();
        assert_eq!(snap.board.tree().expect("tree").board().id, "B");
        assert_eq!(snap.board.tree().expect("tree").active_view().id, "b2");
        assert_eq!(page.subscription().scope(), set(&["B"]));
    }

    #[test]
    fn test_change_notification_triggers_one_coalesced_resync() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        page.mount(None);
        h.transport.signal(TransportSignal::Connected);
        h.run();
        let fetches = h.store.board_fetches();

        h.store.rename_board("b1", "Renamed");
        h.transport.signal(update_frame("b1"));
        h.transport.signal(update_frame("c9"));
        assert_eq!(h.scheduler.pending_delays(), vec![CHANGE_COALESCE_MS]);
        h.scheduler.run_all();
        h.run();

        assert_eq!(h.store.board_fetches(), fetches + 1);
        let snap = page.snapshot();
        assert_eq!(snap.board.tree().expect("tree").board().title, "Renamed");
        assert_eq!(h.chrome.titles().last().map(String::as_str), Some("OCTO - Renamed | v1"));
    }

    #[test]
    fn test_stale_sync_result_is_discarded() {
        let h = Harness::new("?id=A");
        h.store.put_board("A", "Alpha", &["a1"]);
        h.store.put_board("B", "Beta", &["b1"]);
        let page = h.page();
        page.mount(None);
        h.run();

        h.store.set_gated(true);
        page.show_board("B");
        h.run();
        page.show_board("A");
        h.run();

        // The newer sync (A) lands first; the older one (B) must not overwrite it.
        h.store.release("A");
        h.run();
        h.store.release("B");
        h.run();

        let snap = page.snapshot();
        assert_eq!(snap.board.tree().expect("tree").board().id, "A");
        assert_eq!(snap.identity.board_id(), Some("A"));
    }

    #[test]
    fn test_view_switch_during_resync_is_kept() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1", "v2"]);
        let page = h.page();
        page.mount(None);
        h.run();

        h.store.set_gated(true);
        page.sync_now();
        h.run();
        page.show_view("v2", None);
        h.store.release("b1");
        h.run();

        let snap = page.snapshot();
        assert_eq!(snap.board.tree().expect("tree").active_view().id, "v2");
        assert_eq!(snap.identity, DisplayIdentity::board_view("b1", "v2"));
        assert_eq!(
            h.navigator.entries().last().map(String::as_str),
            Some("?id=b1&v=v2")
        );
        assert_eq!(
            h.chrome.titles().last().map(String::as_str),
            Some("OCTO - Roadmap | v2")
        );
    }

    #[test]
    fn test_fetch_failure_keeps_last_good_tree() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        page.mount(None);
        h.run();

        h.store.fail_board("b1");
        page.sync_now();
        h.run();

        let snap = page.snapshot();
        assert_eq!(snap.phase, PagePhase::Synced);
        assert_eq!(snap.board.tree().expect("tree").board().title, "Roadmap");
        assert!(snap.sync_error.is_some());

        h.store.heal_board("b1");
        page.sync_now();
        h.run();
        assert!(page.snapshot().sync_error.is_none());
    }

    #[test]
    fn test_empty_board_surfaces_error() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Empty", &[]);
        let page = h.page();
        page.mount(None);
        h.run();

        let snap = page.snapshot();
        assert_eq!(snap.phase, PagePhase::Idle);
        assert!(snap.board.tree().is_none());
        assert!(snap
            .sync_error
            .as_deref()
            .is_some_and(|e| e.contains("no views")));
    }

    #[test]
    fn test_search_text_always_rerenders() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        let renders = Rc::new(RefCell::new(0u32));
        let r2 = renders.clone();
        page.set_render_hook(move |_| *r2.borrow_mut() += 1);
        page.mount(None);
        h.run();

        let before = *renders.borrow();
        page.set_search_text(Some("docs".to_string()));
        page.set_search_text(Some("docs".to_string()));
        assert_eq!(*renders.borrow(), before + 2);
        assert_eq!(
            page.snapshot().board.tree().expect("tree").search_text(),
            Some("docs")
        );
    }

    #[test]
    fn test_search_text_survives_resync() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        page.mount(None);
        h.run();

        page.set_search_text(Some("docs".to_string()));
        page.sync_now();
        h.run();
        assert_eq!(
            page.snapshot().board.tree().expect("tree").search_text(),
            Some("docs")
        );
    }

    #[test]
    fn test_chrome_follows_board_and_view() {
        let h = Harness::new("?id=b1");
        h.store.put_board_with_icon("b1", "Roadmap", "🚀", &["v1", "v2"]);
        let page = h.page();
        page.mount(None);
        h.run();

        assert_eq!(h.chrome.titles(), vec!["OCTO - Roadmap | v1".to_string()]);
        assert_eq!(h.chrome.icons(), vec![Some("🚀".to_string())]);

        page.show_view("v2", None);
        assert_eq!(
            h.chrome.titles().last().map(String::as_str),
            Some("OCTO - Roadmap | v2")
        );
        // Icon unchanged; not re-applied.
        assert_eq!(h.chrome.icons().len(), 1);
    }

    #[test]
    fn test_chrome_projection_without_board() {
        let p = ChromeProjection::of(&BoardSnapshot::NoBoard);
        assert_eq!(p.title, "OCTO");
        assert_eq!(p.icon, None);
    }

    #[test]
    fn test_undo_chord_runs_mediator() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        h.history.set_descriptions(Some("Edit title"), Some("Edit title"));
        let page = h.page();
        page.mount(None);
        h.run();

        assert!(page.handle_key(&body_chord("z", false)));
        assert!(page.handle_key(&body_chord("Z", true)));
        h.run();

        assert_eq!(h.history.undo_count(), 1);
        assert_eq!(h.history.redo_count(), 1);
        assert_eq!(
            h.notifier.messages(),
            vec!["Undo Edit title".to_string(), "Redo Edit title".to_string()]
        );
    }

    #[test]
    fn test_chord_from_input_is_ignored() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        page.mount(None);
        h.run();

        let mut chord = body_chord("z", false);
        chord.target_is_body = false;
        assert!(!page.handle_key(&chord));
        h.run();
        assert_eq!(h.history.undo_count(), 0);
        assert!(h.notifier.messages().is_empty());
    }

    #[test]
    fn test_unmount_closes_once_and_ignores_late_events() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        let detached = Rc::new(RefCell::new(0u32));
        let d2 = detached.clone();
        page.mount(Some(Box::new(move || *d2.borrow_mut() += 1)));
        h.transport.signal(TransportSignal::Connected);
        h.run();
        let fetches = h.store.board_fetches();
        let generation = page.snapshot().generation;

        page.unmount();
        page.unmount();
        assert_eq!(h.transport.disconnect_count(), 1);
        assert_eq!(*detached.borrow(), 1);
        assert_eq!(page.snapshot().phase, PagePhase::Closed);

        h.transport.signal(update_frame("b1"));
        h.scheduler.run_all();
        h.run();
        assert_eq!(h.store.board_fetches(), fetches);
        assert_eq!(page.snapshot().generation, generation);
        assert!(!page.handle_key(&body_chord("z", false)));
    }

    #[test]
    fn test_in_flight_sync_after_unmount_is_noop() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        h.store.set_gated(true);
        let page = h.page();
        page.mount(None);
        h.run();

        page.unmount();
        h.store.release("b1");
        h.run();

        let snap = page.snapshot();
        assert!(snap.board.tree().is_none());
        assert!(h.chrome.titles().is_empty());
    }

    #[test]
    fn test_filter_anchor_placement_and_clear() {
        let h = Harness::new("?id=b1");
        h.store.put_board("b1", "Roadmap", &["v1"]);
        let page = h.page();
        page.mount(None);
        h.run();

        let anchor = FilterAnchor {
            anchor: Rect {
                left: 900.0,
                top: 40.0,
                right: 960.0,
                bottom: 60.0,
            },
            body: Rect {
                left: 0.0,
                top: 0.0,
                right: 1200.0,
                bottom: 800.0,
            },
        };
        page.show_filter(Some(anchor));
        let placement = page.snapshot().filter.expect("anchor").placement();
        assert_eq!(placement.page_x, 1200.0 - 420.0 - 100.0);
        assert_eq!(placement.page_y, 60.0);

        page.show_filter(None);
        assert!(page.snapshot().filter.is_none());
    }

    #[test]
    fn test_filter_placement_unclamped_near_left() {
        let anchor = FilterAnchor {
            anchor: Rect {
                left: 120.0,
                top: 10.0,
                right: 180.0,
                bottom: 30.0,
            },
            body: Rect {
                left: 20.0,
                top: 5.0,
                right: 1400.0,
                bottom: 900.0,
            },
        };
        let p = anchor.placement();
        assert_eq!(p.page_x, 100.0);
        assert_eq!(p.page_y, 25.0);
    }
}

//! In-memory stand-ins for the page's collaborators.

use crate::api::{ApiError, ApiErrorKind, ApiResult};
use crate::history::{HistoryError, MutationHistory, NotifyError, Notifier};
use crate::listener::{ChangeTransport, SignalHandler, TransportSignal};
use crate::models::{Block, WorkspaceTree};
use crate::navigation::{DisplayIdentity, Navigator};
use crate::state::page_controller::{DocumentChrome, PageController, PageServices};
use crate::tree::BoardStore;
use crate::util::{Scheduler, Spawner};
use async_trait::async_trait;
use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

pub(crate) fn board_blocks(board_id: &str, title: &str, view_ids: &[&str]) -> Vec<Block> {
    let mut blocks = vec![block(board_id, "", "board", title)];
    blocks.extend(view_ids.iter().map(|v| block(v, board_id, "view", v)));
    blocks
}

fn block(id: &str, parent_id: &str, kind: &str, title: &str) -> Block {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "parentId": parent_id,
        "type": kind,
        "title": title,
    }))
    .expect("test block")
}

#[derive(Default)]
pub(crate) struct FakeStore {
    boards: RefCell<Vec<(String, Vec<Block>)>>,
    failing: RefCell<HashSet<String>>,
    gated: Cell<bool>,
    gates: RefCell<Vec<(String, oneshot::Sender<()>)>>,
    board_fetches: Cell<u32>,
    workspace_fetches: Cell<u32>,
}

impl FakeStore {
    pub fn put_board(&self, board_id: &str, title: &str, view_ids: &[&str]) {
        let blocks = board_blocks(board_id, title, view_ids);
        let mut boards = self.boards.borrow_mut();
        boards.retain(|(id, _)| id != board_id);
        boards.push((board_id.to_string(), blocks));
    }

    pub fn put_board_with_icon(&self, board_id: &str, title: &str, icon: &str, view_ids: &[&str]) {
        self.put_board(board_id, title, view_ids);
        self.edit_board(board_id, |b| b.icon = Some(icon.to_string()));
    }

    pub fn rename_board(&self, board_id: &str, title: &str) {
        self.edit_board(board_id, |b| b.title = title.to_string());
    }

    fn edit_board(&self, board_id: &str, f: impl FnOnce(&mut Block)) {
        let mut boards = self.boards.borrow_mut();
        let board = boards
            .iter_mut()
            .find(|(id, _)| id == board_id)
            .and_then(|(_, blocks)| blocks.iter_mut().find(|b| b.id == board_id));
        if let Some(board) = board {
            f(board);
        }
    }

    pub fn fail_board(&self, board_id: &str) {
        self.failing.borrow_mut().insert(board_id.to_string());
    }

    pub fn heal_board(&self, board_id: &str) {
        self.failing.borrow_mut().remove(board_id);
    }

    /// While gated, board fetches wait for `release`.
    pub fn set_gated(&self, gated: bool) {
        self.gated.set(gated);
    }

    pub fn release(&self, board_id: &str) {
        let mut gates = self.gates.borrow_mut();
        let (open, keep): (Vec<_>, Vec<_>) = gates.drain(..).partition(|(id, _)| id == board_id);
        *gates = keep;
        for (_, tx) in open {
            let _ = tx.send(());
        }
    }

    pub fn board_fetches(&self) -> u32 {
        self.board_fetches.get()
    }

    pub fn workspace_fetches(&self) -> u32 {
        self.workspace_fetches.get()
    }
}

#[async_trait(?Send)]
impl BoardStore for FakeStore {
    async fn fetch_workspace(&self) -> ApiResult<WorkspaceTree> {
        self.workspace_fetches.set(self.workspace_fetches.get() + 1);
        let blocks: Vec<Block> = self
            .boards
            .borrow()
            .iter()
            .flat_map(|(_, blocks)| blocks.iter().cloned())
            .collect();
        Ok(WorkspaceTree::from_blocks(&blocks))
    }

    async fn fetch_board_subtree(&self, board_id: &str) -> ApiResult<Vec<Block>> {
        self.board_fetches.set(self.board_fetches.get() + 1);

        if self.gated.get() {
            let (tx, rx) = oneshot::channel();
            self.gates.borrow_mut().push((board_id.to_string(), tx));
            let _ = rx.await;
        }

        if self.failing.borrow().contains(board_id) {
            return Err(ApiError {
                kind: ApiErrorKind::Network,
                message: "connection refused".to_string(),
            });
        }

        self.boards
            .borrow()
            .iter()
            .find(|(id, _)| id == board_id)
            .map(|(_, blocks)| blocks.clone())
            .ok_or_else(|| ApiError {
                kind: ApiErrorKind::NotFound,
                message: format!("Not found: {board_id}"),
            })
    }
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    handler: RefCell<Option<SignalHandler>>,
    sent: RefCell<Vec<String>>,
    connects: Cell<u32>,
    disconnects: Cell<u32>,
}

impl FakeTransport {
    /// Delivers a signal to the most recent connection.
    pub fn signal(&self, signal: TransportSignal) {
        let handler = self.handler.borrow().clone();
        if let Some(handler) = handler {
            handler(signal);
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.get()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.get()
    }
}

impl ChangeTransport for FakeTransport {
    fn connect(&self, on_signal: SignalHandler) {
        self.connects.set(self.connects.get() + 1);
        *self.handler.borrow_mut() = Some(on_signal);
    }

    fn send(&self, frame: String) {
        self.sent.borrow_mut().push(frame);
    }

    fn disconnect(&self) {
        self.disconnects.set(self.disconnects.get() + 1);
    }
}

type Pending = Vec<(u32, Box<dyn FnOnce()>)>;

/// Timers that only fire when the test says so.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    pending: Rc<RefCell<Pending>>,
}

impl ManualScheduler {
    pub fn as_scheduler(&self) -> Scheduler {
        let pending = self.pending.clone();
        Rc::new(move |delay, f| pending.borrow_mut().push((delay, f)))
    }

    pub fn pending_delays(&self) -> Vec<u32> {
        self.pending.borrow().iter().map(|(d, _)| *d).collect()
    }

    /// Fires everything currently pending; timers scheduled meanwhile stay pending.
    pub fn run_all(&self) {
        let due: Pending = self.pending.borrow_mut().drain(..).collect();
        for (_, f) in due {
            f();
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeHistory {
    descriptions: RefCell<(Option<String>, Option<String>)>,
    reject: RefCell<Option<String>>,
    undos: Cell<u32>,
    redos: Cell<u32>,
}

impl FakeHistory {
    pub fn set_descriptions(&self, undo: Option<&str>, redo: Option<&str>) {
        *self.descriptions.borrow_mut() = (undo.map(str::to_string), redo.map(str::to_string));
    }

    pub fn reject_next(&self, reason: &str) {
        *self.reject.borrow_mut() = Some(reason.to_string());
    }

    pub fn undo_count(&self) -> u32 {
        self.undos.get()
    }

    pub fn redo_count(&self) -> u32 {
        self.redos.get()
    }

    fn apply(&self, counter: &Cell<u32>) -> Result<(), HistoryError> {
        if let Some(reason) = self.reject.borrow_mut().take() {
            return Err(HistoryError::Rejected(reason));
        }
        counter.set(counter.get() + 1);
        Ok(())
    }
}

#[async_trait(?Send)]
impl MutationHistory for FakeHistory {
    async fn undo(&self) -> Result<(), HistoryError> {
        self.apply(&self.undos)
    }

    async fn redo(&self) -> Result<(), HistoryError> {
        self.apply(&self.redos)
    }

    async fn undo_description(&self) -> Option<String> {
        self.descriptions.borrow().0.clone()
    }

    async fn redo_description(&self) -> Option<String> {
        self.descriptions.borrow().1.clone()
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: RefCell<Vec<String>>,
    unavailable: Cell<bool>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }
}

impl Notifier for RecordingNotifier {
    fn flash(&self, message: &str) -> Result<(), NotifyError> {
        if self.unavailable.get() {
            return Err(NotifyError::NoSurface);
        }
        self.messages.borrow_mut().push(message.to_string());
        Ok(())
    }
}

/// History entries are recorded as query strings.
pub(crate) struct RecordingNavigator {
    search: String,
    entries: RefCell<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new(search: &str) -> Self {
        Self {
            search: search.to_string(),
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_search(&self) -> String {
        self.search.clone()
    }

    fn push(&self, identity: &DisplayIdentity) {
        self.entries.borrow_mut().push(identity.to_query());
    }
}

#[derive(Default)]
pub(crate) struct RecordingChrome {
    titles: RefCell<Vec<String>>,
    icons: RefCell<Vec<Option<String>>>,
}

impl RecordingChrome {
    pub fn titles(&self) -> Vec<String> {
        self.titles.borrow().clone()
    }

    pub fn icons(&self) -> Vec<Option<String>> {
        self.icons.borrow().clone()
    }
}

impl DocumentChrome for RecordingChrome {
    fn set_title(&self, title: &str) {
        self.titles.borrow_mut().push(title.to_string());
    }

    fn set_favicon(&self, icon: Option<&str>) {
        self.icons.borrow_mut().push(icon.map(str::to_string));
    }
}

pub(crate) struct Harness {
    pub store: Rc<FakeStore>,
    pub history: Rc<FakeHistory>,
    pub notifier: Rc<RecordingNotifier>,
    pub navigator: Rc<RecordingNavigator>,
    pub chrome: Rc<RecordingChrome>,
    pub transport: Rc<FakeTransport>,
    pub scheduler: Rc<ManualScheduler>,
    pool: RefCell<LocalPool>,
}

impl Harness {
    pub fn new(search: &str) -> Self {
        Self {
            store: Rc::new(FakeStore::default()),
            history: Rc::new(FakeHistory::default()),
            notifier: Rc::new(RecordingNotifier::default()),
            navigator: Rc::new(RecordingNavigator::new(search)),
            chrome: Rc::new(RecordingChrome::default()),
            transport: Rc::new(FakeTransport::default()),
            scheduler: Rc::new(ManualScheduler::default()),
            pool: RefCell::new(LocalPool::new()),
        }
    }

    pub fn page(&self) -> PageController {
        let spawner = self.pool.borrow().spawner();
        let spawn: Spawner = Rc::new(move |fut: LocalBoxFuture<'static, ()>| {
            spawner.spawn_local(fut).expect("local pool accepts tasks");
        });

        PageController::new(PageServices {
            store: self.store.clone(),
            history: self.history.clone(),
            notifier: self.notifier.clone(),
            navigator: self.navigator.clone(),
            chrome: self.chrome.clone(),
            transport: self.transport.clone(),
            spawner: spawn,
            scheduler: self.scheduler.as_scheduler(),
        })
    }

    /// Drives spawned tasks until none can make progress.
    pub fn run(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }
}

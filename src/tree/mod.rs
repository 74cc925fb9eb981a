use crate::api::{ApiError, ApiErrorKind, ApiResult};
use crate::models::{Block, Board, BoardView, Card, WorkspaceTree};
use async_trait::async_trait;
use std::rc::Rc;

/// Read side of the backend as seen by the board page.
#[async_trait(?Send)]
pub(crate) trait BoardStore {
    async fn fetch_workspace(&self) -> ApiResult<WorkspaceTree>;

    /// Board block plus its views and cards, in backend order.
    async fn fetch_board_subtree(&self, board_id: &str) -> ApiResult<Vec<Block>>;
}

#[derive(Clone, Debug, thiserror::Error)]
pub(crate) enum SyncError {
    #[error("Board {board_id} has no views")]
    EmptyBoard { board_id: String },

    #[error("Board {board_id} not found")]
    BoardNotFound { board_id: String },

    #[error(transparent)]
    Fetch(#[from] ApiError),
}

/// Immutable snapshot of one board.
///
/// Never patched in place: view switches and search changes build a new value so
/// board, views and active view always agree with each other.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SynchronizedTree {
    board: Board,
    views: Vec<BoardView>,
    cards: Vec<Card>,
    active: usize,
    search_text: Option<String>,
}

impl SynchronizedTree {
    pub fn assemble(
        board_id: &str,
        blocks: &[Block],
        view_id: Option<&str>,
    ) -> Result<Self, SyncError> {
        let board = blocks
            .iter()
            .filter(|b| b.id == board_id)
            .find_map(Board::from_block)
            .ok_or_else(|| SyncError::BoardNotFound {
                board_id: board_id.to_string(),
            })?;

        let views: Vec<BoardView> = blocks
            .iter()
            .filter_map(BoardView::from_block)
            .filter(|v| v.board_id == board_id)
            .collect();
        if views.is_empty() {
            return Err(SyncError::EmptyBoard {
                board_id: board_id.to_string(),
            });
        }

        let cards = blocks
            .iter()
            .filter_map(Card::from_block)
            .filter(|c| c.board_id == board_id)
            .collect();

        let active = resolve_active(&views, view_id);
        Ok(Self {
            board,
            views,
            cards,
            active,
            search_text: None,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn views(&self) -> &[BoardView] {
        &self.views
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn active_view(&self) -> &BoardView {
        // `assemble` rejects boards without views and `active` is always resolved in range.
        &self.views[self.active]
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search_text.as_deref()
    }

    /// Falls back to the first view when `view_id` is unknown.
    pub fn with_active_view(&self, view_id: &str) -> Self {
        Self {
            active: resolve_active(&self.views, Some(view_id)),
            ..self.clone()
        }
    }

    pub fn with_search_text(&self, text: Option<String>) -> Self {
        Self {
            search_text: text.filter(|t| !t.trim().is_empty()),
            ..self.clone()
        }
    }

    /// Cards whose title contains the search text, case-insensitively.
    pub fn visible_cards(&self) -> Vec<&Card> {
        match &self.search_text {
            None => self.cards.iter().collect(),
            Some(text) => {
                let needle = text.trim().to_lowercase();
                self.cards
                    .iter()
                    .filter(|c| c.title.to_lowercase().contains(&needle))
                    .collect()
            }
        }
    }
}

fn resolve_active(views: &[BoardView], view_id: Option<&str>) -> usize {
    view_id
        .and_then(|id| views.iter().position(|v| v.id == id))
        .unwrap_or(0)
}

/// Rebuilds board snapshots and the workspace listing from the store.
#[derive(Clone)]
pub(crate) struct TreeSynchronizer {
    store: Rc<dyn BoardStore>,
}

impl TreeSynchronizer {
    pub fn new(store: Rc<dyn BoardStore>) -> Self {
        Self { store }
    }

    pub async fn sync(
        &self,
        board_id: &str,
        view_id: Option<&str>,
    ) -> Result<SynchronizedTree, SyncError> {
        let blocks = self
            .store
            .fetch_board_subtree(board_id)
            .await
            .map_err(|e| match e.kind {
                ApiErrorKind::NotFound => SyncError::BoardNotFound {
                    board_id: board_id.to_string(),
                },
                _ => SyncError::Fetch(e),
            })?;
        SynchronizedTree::assemble(board_id, &blocks, view_id)
    }

    pub async fn sync_workspace(&self) -> Result<WorkspaceTree, SyncError> {
        Ok(self.store.fetch_workspace().await?)
    }
}

use serde::{Deserialize, Serialize};

/// Block type discriminator as sent by the backend (`"type"` field).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BlockKind {
    Board,
    View,
    Card,
    #[serde(other)]
    Other,
}

/// Raw content block.
///
/// Boards, views and cards all travel as blocks; `parent_id` links a view or card
/// to its board. Unknown fields are ignored so backend additions do not break parsing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Block {
    pub id: String,

    #[serde(default)]
    pub parent_id: String,

    #[serde(rename = "type")]
    pub kind: BlockKind,

    #[serde(default)]
    pub title: String,

    /// Emoji icon; boards and cards only.
    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub create_at: i64,

    #[serde(default)]
    pub update_at: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Board {
    pub id: String,
    pub title: String,
    pub icon: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BoardView {
    pub id: String,
    pub board_id: String,
    pub title: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Card {
    pub id: String,
    pub board_id: String,
    pub title: String,
    pub icon: Option<String>,
}

impl Board {
    pub fn from_block(block: &Block) -> Option<Self> {
        (block.kind == BlockKind::Board).then(|| Self {
            id: block.id.clone(),
            title: block.title.clone(),
            icon: block.icon.clone().filter(|s| !s.trim().is_empty()),
        })
    }
}

impl BoardView {
    pub fn from_block(block: &Block) -> Option<Self> {
        (block.kind == BlockKind::View).then(|| Self {
            id: block.id.clone(),
            board_id: block.parent_id.clone(),
            title: block.title.clone(),
        })
    }
}

impl Card {
    pub fn from_block(block: &Block) -> Option<Self> {
        (block.kind == BlockKind::Card).then(|| Self {
            id: block.id.clone(),
            board_id: block.parent_id.clone(),
            title: block.title.clone(),
            icon: block.icon.clone().filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Workspace-level listing: every board visible to the session plus their views.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct WorkspaceTree {
    pub boards: Vec<Board>,
    pub views: Vec<BoardView>,
}

impl WorkspaceTree {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self {
            boards: blocks.iter().filter_map(Board::from_block).collect(),
            views: blocks.iter().filter_map(BoardView::from_block).collect(),
        }
    }

    pub fn views_of<'a>(&'a self, board_id: &'a str) -> impl Iterator<Item = &'a BoardView> + 'a {
        self.views.iter().filter(move |v| v.board_id == board_id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecentBoard {
    pub id: String,
    pub title: String,
    pub last_opened_ms: i64,
}

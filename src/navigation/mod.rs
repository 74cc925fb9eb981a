use wasm_bindgen::JsValue;

pub(crate) const BOARD_PARAM: &str = "id";
pub(crate) const VIEW_PARAM: &str = "v";

/// Which board/view the page shows. A view is always scoped to a board.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum DisplayIdentity {
    #[default]
    NoBoardSelected,
    BoardSelected {
        board_id: String,
        view_id: Option<String>,
    },
}

impl DisplayIdentity {
    pub fn board(board_id: impl Into<String>) -> Self {
        DisplayIdentity::BoardSelected {
            board_id: board_id.into(),
            view_id: None,
        }
    }

    pub fn board_view(board_id: impl Into<String>, view_id: impl Into<String>) -> Self {
        DisplayIdentity::BoardSelected {
            board_id: board_id.into(),
            view_id: Some(view_id.into()),
        }
    }

    pub fn board_id(&self) -> Option<&str> {
        match self {
            DisplayIdentity::NoBoardSelected => None,
            DisplayIdentity::BoardSelected { board_id, .. } => Some(board_id),
        }
    }

    pub fn view_id(&self) -> Option<&str> {
        match self {
            DisplayIdentity::NoBoardSelected => None,
            DisplayIdentity::BoardSelected { view_id, .. } => view_id.as_deref(),
        }
    }

    /// Parses `?id=..&v=..`. Empty values count as absent; a view without a board is dropped.
    pub fn from_query(search: &str) -> Self {
        let mut board_id = None;
        let mut view_id = None;

        for (k, v) in parse_query_pairs(search) {
            if v.is_empty() {
                continue;
            }
            // First occurrence wins, like `URLSearchParams.get`.
            if k == BOARD_PARAM && board_id.is_none() {
                board_id = Some(v);
            } else if k == VIEW_PARAM && view_id.is_none() {
                view_id = Some(v);
            }
        }

        match board_id {
            Some(board_id) => DisplayIdentity::BoardSelected { board_id, view_id },
            None => DisplayIdentity::NoBoardSelected,
        }
    }

    /// `?id=..` with `&v=..` only when a view is set; empty string when no board is selected.
    pub fn to_query(&self) -> String {
        match self {
            DisplayIdentity::NoBoardSelected => String::new(),
            DisplayIdentity::BoardSelected { board_id, view_id } => {
                let mut q = format!("?{}={}", BOARD_PARAM, urlencoding::encode(board_id));
                if let Some(view_id) = view_id {
                    q.push_str(&format!("&{}={}", VIEW_PARAM, urlencoding::encode(view_id)));
                }
                q
            }
        }
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

pub(crate) fn parse_query_pairs(search: &str) -> Vec<(String, String)> {
    search
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// Address-bar access for the page. Pushing never reloads the document.
pub(crate) trait Navigator {
    fn current_search(&self) -> String;
    fn push(&self, identity: &DisplayIdentity);
}

pub(crate) struct BrowserHistory;

impl Navigator for BrowserHistory {
    fn current_search(&self) -> String {
        web_sys::window()
            .and_then(|w| w.location().search().ok())
            .unwrap_or_default()
    }

    fn push(&self, identity: &DisplayIdentity) {
        let Some(win) = web_sys::window() else {
            return;
        };
        let loc = win.location();
        let new_url = format!(
            "{}//{}{}{}",
            loc.protocol().unwrap_or_default(),
            loc.host().unwrap_or_default(),
            loc.pathname().unwrap_or_default(),
            identity.to_query()
        );

        let state = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&state, &"path".into(), &JsValue::from_str(&new_url));

        match win.history() {
            Ok(history) => {
                if history
                    .push_state_with_url(&state, "", Some(&new_url))
                    .is_err()
                {
                    log::warn!("history.pushState failed for {new_url}");
                }
            }
            Err(_) => log::warn!("history unavailable"),
        }
    }
}

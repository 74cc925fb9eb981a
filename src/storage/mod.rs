use crate::models::RecentBoard;
use crate::util::now_ms;
use serde::{Deserialize, Serialize};

pub(crate) const TOKEN_KEY: &str = "octo_token";
pub(crate) const RECENT_BOARDS_KEY: &str = "octo_recent_boards";

pub(crate) const RECENT_BOARDS_MAX: usize = 10;

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

pub(crate) fn load_json_from_storage<T: for<'de> Deserialize<'de>>(key: &str) -> Option<T> {
    let json = local_storage()?.get_item(key).ok().flatten()?;
    serde_json::from_str(&json).ok()
}

pub(crate) fn save_json_to_storage<T: Serialize>(key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Some(storage) = local_storage() {
                if storage.set_item(key, &json).is_err() {
                    log::warn!("localStorage write failed for {key}");
                }
            }
        }
        Err(e) => log::warn!("cannot serialize {key}: {e}"),
    }
}

/// Moves `item` to the front, dropping any entry with the same key and anything past `max`.
pub(crate) fn upsert_lru_by_key<T: Clone>(
    mut items: Vec<T>,
    item: T,
    same_key: impl Fn(&T, &T) -> bool,
    max: usize,
) -> Vec<T> {
    items.retain(|x| !same_key(x, &item));
    items.insert(0, item);
    items.truncate(max);
    items
}

pub(crate) fn load_recent_boards() -> Vec<RecentBoard> {
    load_json_from_storage::<Vec<RecentBoard>>(RECENT_BOARDS_KEY).unwrap_or_default()
}

/// Records a board visit and returns the updated list.
pub(crate) fn write_recent_board(id: &str, title: &str) -> Vec<RecentBoard> {
    if id.trim().is_empty() {
        return load_recent_boards();
    }

    let item = RecentBoard {
        id: id.to_string(),
        title: title.to_string(),
        last_opened_ms: now_ms(),
    };

    let next = upsert_lru_by_key(
        load_recent_boards(),
        item,
        |a, b| a.id == b.id,
        RECENT_BOARDS_MAX,
    );
    save_json_to_storage(RECENT_BOARDS_KEY, &next);
    next
}

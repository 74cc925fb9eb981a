pub(crate) mod page_controller;

use crate::api::ApiClient;
use crate::history::{NotifyError, Notifier};
use crate::models::RecentBoard;
use crate::storage::load_recent_boards;
use crate::util::set_timeout;
use leptos::prelude::*;

pub(crate) const FLASH_DISMISS_MS: u32 = 2000;

/// Single-slot, auto-dismissing notification shown at the bottom of the page.
///
/// A newer message replaces the current one; each message only dismisses itself.
#[derive(Clone, Copy)]
pub(crate) struct FlashState {
    pub message: RwSignal<Option<String>>,
    seq: RwSignal<u64>,
}

impl FlashState {
    pub fn new() -> Self {
        Self {
            message: RwSignal::new(None),
            seq: RwSignal::new(0),
        }
    }

    pub fn dismiss(&self) {
        let _ = self.message.try_set(None);
    }
}

impl Default for FlashState {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for FlashState {
    fn flash(&self, message: &str) -> Result<(), NotifyError> {
        if web_sys::window().is_none() {
            return Err(NotifyError::NoSurface);
        }

        let Some(seq) = self.seq.try_update(|s| {
            *s += 1;
            *s
        }) else {
            return Err(NotifyError::NoSurface);
        };
        if self.message.try_set(Some(message.to_string())).is_some() {
            // `try_set` hands the value back when the signal is already disposed.
            return Err(NotifyError::NoSurface);
        }

        let this = *self;
        set_timeout(
            FLASH_DISMISS_MS,
            Box::new(move || {
                if this.seq.try_get_untracked() == Some(seq) {
                    this.dismiss();
                }
            }),
        );
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub api_client: RwSignal<ApiClient>,
    pub flash: FlashState,

    /// Most recently opened boards, newest first.
    pub recent_boards: RwSignal<Vec<RecentBoard>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            api_client: RwSignal::new(ApiClient::load_from_storage()),
            flash: FlashState::new(),
            recent_boards: RwSignal::new(load_recent_boards()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub(crate) struct AppContext(pub AppState);

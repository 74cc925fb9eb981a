use async_trait::async_trait;
use std::rc::Rc;
use wasm_bindgen::JsValue;

/// Shared undo/redo log. The page never inspects its contents.
#[async_trait(?Send)]
pub(crate) trait MutationHistory {
    async fn undo(&self) -> Result<(), HistoryError>;
    async fn redo(&self) -> Result<(), HistoryError>;
    async fn undo_description(&self) -> Option<String>;
    async fn redo_description(&self) -> Option<String>;
}

/// Transient, auto-dismissing user notification.
pub(crate) trait Notifier {
    fn flash(&self, message: &str) -> Result<(), NotifyError>;
}

#[derive(Clone, Debug, thiserror::Error)]
pub(crate) enum HistoryError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Fetch(crate::api::ApiError),
}

#[derive(Clone, Debug, thiserror::Error)]
pub(crate) enum NotifyError {
    #[error("no notification surface available")]
    NoSurface,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HistoryCommand {
    Undo,
    Redo,
}

impl HistoryCommand {
    pub fn label(self) -> &'static str {
        match self {
            HistoryCommand::Undo => "Undo",
            HistoryCommand::Redo => "Redo",
        }
    }
}

/// The parts of a `keydown` the undo/redo chords care about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct KeyChord {
    pub key: String,
    pub shift: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub alt: bool,

    /// The event was dispatched on `document.body`, i.e. no input or editable has focus.
    pub target_is_body: bool,
}

impl KeyChord {
    pub fn from_event(ev: &web_sys::KeyboardEvent) -> Self {
        let body: Option<JsValue> = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.body())
            .map(JsValue::from);
        let target: Option<JsValue> = ev.target().map(JsValue::from);
        let target_is_body = matches!((body, target), (Some(b), Some(t)) if b == t);

        Self {
            key: ev.key(),
            shift: ev.shift_key(),
            ctrl: ev.ctrl_key(),
            meta: ev.meta_key(),
            alt: ev.alt_key(),
            target_is_body,
        }
    }

    /// Primary modifier is Ctrl or Cmd; Alt disqualifies both chords.
    pub fn command(&self) -> Option<HistoryCommand> {
        if !self.target_is_body {
            return None;
        }
        if !(self.ctrl || self.meta) || self.alt {
            return None;
        }
        if !self.key.eq_ignore_ascii_case("z") {
            return None;
        }

        Some(if self.shift {
            HistoryCommand::Redo
        } else {
            HistoryCommand::Undo
        })
    }
}

/// `"Undo {description}"`, `"Undo"`, `"Undo {description} failed"`, `"Undo failed"`; same for redo.
pub(crate) fn flash_text(cmd: HistoryCommand, description: Option<&str>, succeeded: bool) -> String {
    let description = description.map(str::trim).filter(|d| !d.is_empty());
    let mut text = match description {
        Some(d) => format!("{} {}", cmd.label(), d),
        None => cmd.label().to_string(),
    };
    if !succeeded {
        text.push_str(" failed");
    }
    text
}

#[derive(Clone)]
pub(crate) struct UndoRedoMediator {
    history: Rc<dyn MutationHistory>,
    notifier: Rc<dyn Notifier>,
}

impl UndoRedoMediator {
    pub fn new(history: Rc<dyn MutationHistory>, notifier: Rc<dyn Notifier>) -> Self {
        Self { history, notifier }
    }

    /// Applies the command, then flashes the outcome.
    ///
    /// The resulting mutation reaches the page through the change subscription; no resync here.
    pub async fn perform(&self, cmd: HistoryCommand) -> Result<(), HistoryError> {
        log::info!("{}", cmd.label());

        let (description, result) = match cmd {
            HistoryCommand::Undo => {
                let d = self.history.undo_description().await;
                (d, self.history.undo().await)
            }
            HistoryCommand::Redo => {
                let d = self.history.redo_description().await;
                (d, self.history.redo().await)
            }
        };

        if let Err(e) = &result {
            log::warn!("{} failed: {}", cmd.label(), e);
        }

        let text = flash_text(cmd, description.as_deref(), result.is_ok());
        if let Err(e) = self.notifier.flash(&text) {
            log::debug!("flash \"{text}\" dropped: {e}");
        }

        result
    }
}

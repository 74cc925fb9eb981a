use crate::history::{HistoryError, MutationHistory};
use crate::models::{Block, WorkspaceTree};
use crate::storage::TOKEN_KEY;
use crate::tree::BoardStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ApiErrorKind {
    Unauthorized,
    NotFound,
    Network,
    Http,
    Parse,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub(crate) struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    fn network(e: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            message: e.to_string(),
        }
    }

    fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            message: e.to_string(),
        }
    }

    fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            message: "Unauthorized".to_string(),
        }
    }

    fn not_found(path: &str) -> Self {
        Self {
            kind: ApiErrorKind::NotFound,
            message: format!("Not found: {path}"),
        }
    }

    fn http(status: reqwest::StatusCode, body: String, ctx: &str) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            message: format!("{ctx} ({status}): {body}"),
        }
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const CHANGE_LISTENER_PATH: &str = "/ws/onchange";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct EnvConfig {
    pub api_url: String,
    pub ws_url: String,
}

impl EnvConfig {
    pub fn new() -> Self {
        let mut api_url = DEFAULT_API_URL.to_string();
        let mut ws_url = None;

        // Both `window.ENV.API_URL` and the lowercase `api_url` are accepted.
        if let Some(window) = web_sys::window() {
            if let Some(env) = window.get("ENV") {
                if !env.is_undefined() && env.is_object() {
                    let read = |key: &str| {
                        js_sys::Reflect::get(&env, &key.into())
                            .ok()
                            .and_then(|v| v.as_string())
                    };

                    if let Some(url) = read("API_URL").or_else(|| read("api_url")) {
                        api_url = url;
                    }
                    ws_url = read("WS_URL").or_else(|| read("ws_url"));
                }
            }
        }

        Self::from_urls(api_url, ws_url)
    }

    pub fn from_urls(api_url: String, ws_url: Option<String>) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_url = ws_url.unwrap_or_else(|| derive_ws_url(&api_url));
        Self { api_url, ws_url }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `http(s)://host` -> `ws(s)://host/ws/onchange`.
pub(crate) fn derive_ws_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}{CHANGE_LISTENER_PATH}")
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryDescriptions {
    #[serde(default)]
    pub undo_description: Option<String>,
    #[serde(default)]
    pub redo_description: Option<String>,
}

#[derive(Clone)]
pub(crate) struct ApiClient {
    pub(crate) base_url: String,
    pub(crate) token: Option<String>,
}

impl ApiClient {
    #[cfg(test)]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            token: None,
        }
    }

    pub fn load_from_storage() -> Self {
        let base_url = EnvConfig::new().api_url;
        let token = leptos::web_sys::window()
            .and_then(|w| w.local_storage().ok().flatten())
            .and_then(|s| s.get_item(TOKEN_KEY).ok().flatten());

        Self { base_url, token }
    }

    pub fn clear_storage() {
        if let Some(storage) =
            leptos::web_sys::window().and_then(|w| w.local_storage().ok().flatten())
        {
            let _ = storage.remove_item(TOKEN_KEY);
        }
    }

    fn get_auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    fn with_auth_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(header) = self.get_auth_header() {
            req = req.header("Authorization", header);
        }
        req
    }

    async fn read_response<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
        path: &str,
    ) -> ApiResult<T> {
        let status = res.status();
        if status.is_success() {
            return res.json().await.map_err(ApiError::parse);
        }

        match status.as_u16() {
            401 => {
                // Expired sessions must log in again; a stale token only produces more 401s.
                Self::clear_storage();
                Err(ApiError::unauthorized())
            }
            404 => Err(ApiError::not_found(path)),
            _ => {
                let body = res.text().await.unwrap_or_default();
                Err(ApiError::http(status, body, "Request failed"))
            }
        }
    }

    async fn get_api<T: serde::de::DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let client = reqwest::Client::new();
        let req = self.with_auth_headers(client.get(format!("{}{}", self.base_url, path)));
        let res = req.send().await.map_err(ApiError::network)?;
        Self::read_response(res, path).await
    }

    async fn post_api<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        let client = reqwest::Client::new();
        let req = self
            .with_auth_headers(client.post(format!("{}{}", self.base_url, path)))
            .json(body);
        let res = req.send().await.map_err(ApiError::network)?;
        Self::read_response(res, path).await
    }

    /// Accepts both a bare block array and `{"blocks": [...]}`.
    pub(crate) fn parse_block_list_response(data: serde_json::Value) -> ApiResult<Vec<Block>> {
        let list = match data {
            serde_json::Value::Array(_) => data,
            serde_json::Value::Object(mut map) => map
                .remove("blocks")
                .unwrap_or(serde_json::Value::Array(vec![])),
            serde_json::Value::Null => serde_json::Value::Array(vec![]),
            other => return Err(ApiError::parse(format!("unexpected block list: {other}"))),
        };
        serde_json::from_value(list).map_err(ApiError::parse)
    }

    pub async fn get_blocks_of_type(&self, kind: &str) -> ApiResult<Vec<Block>> {
        let path = format!("/api/v1/blocks?type={}", urlencoding::encode(kind));
        let data: serde_json::Value = self.get_api(&path).await?;
        Self::parse_block_list_response(data)
    }

    pub async fn get_subtree(&self, block_id: &str) -> ApiResult<Vec<Block>> {
        let path = format!("/api/v1/blocks/{}/subtree?l=2", urlencoding::encode(block_id));
        let data: serde_json::Value = self.get_api(&path).await?;
        Self::parse_block_list_response(data)
    }

    pub async fn get_history(&self) -> ApiResult<HistoryDescriptions> {
        self.get_api("/api/v1/history").await
    }

    async fn post_history(&self, action: &str) -> Result<(), HistoryError> {
        let path = format!("/api/v1/history/{action}");
        let data: serde_json::Value = self
            .post_api(&path, &serde_json::json!({}))
            .await
            .map_err(HistoryError::Fetch)?;

        // The backend answers `{"applied": false, "reason": "..."}` when there is nothing to apply.
        if data.get("applied").and_then(|v| v.as_bool()) == Some(false) {
            let reason = data
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("nothing to apply")
                .to_string();
            return Err(HistoryError::Rejected(reason));
        }
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

#[async_trait(?Send)]
impl BoardStore for ApiClient {
    async fn fetch_workspace(&self) -> ApiResult<WorkspaceTree> {
        let mut blocks = self.get_blocks_of_type("board").await?;
        blocks.extend(self.get_blocks_of_type("view").await?);
        Ok(WorkspaceTree::from_blocks(&blocks))
    }

    async fn fetch_board_subtree(&self, board_id: &str) -> ApiResult<Vec<Block>> {
        self.get_subtree(board_id).await
    }
}

#[async_trait(?Send)]
impl MutationHistory for ApiClient {
    async fn undo(&self) -> Result<(), HistoryError> {
        self.post_history("undo").await
    }

    async fn redo(&self) -> Result<(), HistoryError> {
        self.post_history("redo").await
    }

    async fn undo_description(&self) -> Option<String> {
        self.get_history().await.ok()?.undo_description
    }

    async fn redo_description(&self) -> Option<String> {
        self.get_history().await.ok()?.redo_description
    }
}

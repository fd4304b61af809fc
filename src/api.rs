//! REST boundary.
//!
//! [`BoardApi`] is the typed request/response contract the sync layer talks
//! to; [`HttpBoardApi`] is its `reqwest` implementation. Success envelopes are
//! unwrapped here so callers only ever see domain types or an [`ApiError`].

use agentboard_common::{
    ApiErrorEnvelope, ApiResponse, CustomFieldValue, CustomFieldValueSet, PaginatedResponse,
    ReactionSummary, ReactionTarget, Status, Task, TaskCreate, TaskMove, TaskUpdate, ToggleResult,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::errors::{ApiError, ErrorCode};

/// Largest page the task listing endpoint serves.
const TASK_PAGE_SIZE: u32 = 100;

#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn list_statuses(&self, project_id: Uuid) -> Result<Vec<Status>, ApiError>;

    /// Every task on the board, across all pages.
    async fn list_tasks(&self, project_id: Uuid, board_id: Uuid) -> Result<Vec<Task>, ApiError>;

    async fn get_task(&self, project_id: Uuid, board_id: Uuid, task_id: Uuid)
    -> Result<Task, ApiError>;

    async fn create_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        body: &TaskCreate,
    ) -> Result<Task, ApiError>;

    async fn update_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        body: &TaskUpdate,
    ) -> Result<Task, ApiError>;

    async fn delete_task(&self, project_id: Uuid, board_id: Uuid, task_id: Uuid)
    -> Result<(), ApiError>;

    async fn move_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        body: &TaskMove,
    ) -> Result<Task, ApiError>;

    async fn toggle_reaction(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        target: &ReactionTarget,
        emoji: &str,
    ) -> Result<ToggleResult, ApiError>;

    async fn get_reactions(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        target: &ReactionTarget,
    ) -> Result<ReactionSummary, ApiError>;

    async fn set_field_value(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        value: &CustomFieldValueSet,
    ) -> Result<CustomFieldValue, ApiError>;

    async fn clear_field_value(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        field_id: Uuid,
    ) -> Result<(), ApiError>;
}

/// Bearer-authenticated client for `<api_url>/api/v1`.
#[derive(Clone)]
pub struct HttpBoardApi {
    client: reqwest::Client,
    base: String,
    credential: String,
}

impl HttpBoardApi {
    pub fn new(api_url: &Url, credential: impl Into<String>) -> Self {
        let root = api_url.as_str().trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/api/v1", root),
            credential: credential.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn board_url(&self, project_id: Uuid, board_id: Uuid) -> String {
        format!("{}/projects/{}/boards/{}", self.base, project_id, board_id)
    }

    fn task_url(&self, project_id: Uuid, board_id: Uuid, task_id: Uuid) -> String {
        format!("{}/tasks/{}", self.board_url(project_id, board_id), task_id)
    }

    fn reactions_url(&self, project_id: Uuid, board_id: Uuid, target: &ReactionTarget) -> String {
        match target {
            ReactionTarget::Task(task_id) => {
                format!("{}/reactions", self.task_url(project_id, board_id, *task_id))
            }
            ReactionTarget::Comment {
                task_id,
                comment_id,
            } => format!(
                "{}/comments/{}/reactions",
                self.task_url(project_id, board_id, *task_id),
                comment_id
            ),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let envelope: ApiResponse<T> = self.fetch_raw(request).await?;
        Ok(envelope.data)
    }

    async fn fetch_raw<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let resp = request.bearer_auth(&self.credential).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn fetch_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
        let resp = request.bearer_auth(&self.credential).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.bytes().await?;
        Err(error_from_response(status, &body))
    }
}

/// Parse a non-2xx body as the error envelope, or synthesize one from the
/// HTTP status when the body is not an envelope.
pub fn error_from_response(status: StatusCode, body: &[u8]) -> ApiError {
    match serde_json::from_slice::<ApiErrorEnvelope>(body) {
        Ok(envelope) => ApiError::from_body(envelope.error),
        Err(_) => ApiError::Api {
            code: ErrorCode::Unknown,
            message: status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string()),
            details: None,
        },
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn list_statuses(&self, project_id: Uuid) -> Result<Vec<Status>, ApiError> {
        let url = format!("{}/projects/{}/statuses", self.base, project_id);
        self.fetch(self.client.get(url)).await
    }

    async fn list_tasks(&self, project_id: Uuid, board_id: Uuid) -> Result<Vec<Task>, ApiError> {
        let url = format!("{}/tasks", self.board_url(project_id, board_id));
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let resp: PaginatedResponse<Task> = self
                .fetch_raw(self.client.get(&url).query(&[
                    ("page", page.to_string()),
                    ("per_page", TASK_PAGE_SIZE.to_string()),
                ]))
                .await?;
            let count = resp.data.len();
            all.extend(resp.data);
            if count < TASK_PAGE_SIZE as usize || page >= resp.pagination.total_pages {
                break;
            }
            page += 1;
        }
        tracing::debug!(%board_id, count = all.len(), "Fetched board tasks");
        Ok(all)
    }

    async fn get_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
    ) -> Result<Task, ApiError> {
        self.fetch(self.client.get(self.task_url(project_id, board_id, task_id)))
            .await
    }

    async fn create_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        body: &TaskCreate,
    ) -> Result<Task, ApiError> {
        let url = format!("{}/tasks", self.board_url(project_id, board_id));
        self.fetch(self.client.post(url).json(body)).await
    }

    async fn update_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        body: &TaskUpdate,
    ) -> Result<Task, ApiError> {
        let url = self.task_url(project_id, board_id, task_id);
        self.fetch(self.client.patch(url).json(body)).await
    }

    async fn delete_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
    ) -> Result<(), ApiError> {
        let url = self.task_url(project_id, board_id, task_id);
        self.fetch_empty(self.client.delete(url)).await
    }

    async fn move_task(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        body: &TaskMove,
    ) -> Result<Task, ApiError> {
        let url = format!("{}/move", self.task_url(project_id, board_id, task_id));
        self.fetch(self.client.post(url).json(body)).await
    }

    async fn toggle_reaction(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        target: &ReactionTarget,
        emoji: &str,
    ) -> Result<ToggleResult, ApiError> {
        let url = format!("{}/toggle", self.reactions_url(project_id, board_id, target));
        let body = serde_json::json!({ "emoji": emoji });
        self.fetch(self.client.post(url).json(&body)).await
    }

    async fn get_reactions(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        target: &ReactionTarget,
    ) -> Result<ReactionSummary, ApiError> {
        let url = self.reactions_url(project_id, board_id, target);
        self.fetch(self.client.get(url)).await
    }

    async fn set_field_value(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        value: &CustomFieldValueSet,
    ) -> Result<CustomFieldValue, ApiError> {
        let url = format!(
            "{}/field-values/{}",
            self.task_url(project_id, board_id, task_id),
            value.field_definition_id
        );
        self.fetch(self.client.put(url).json(value)).await
    }

    async fn clear_field_value(
        &self,
        project_id: Uuid,
        board_id: Uuid,
        task_id: Uuid,
        field_id: Uuid,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/field-values/{}",
            self.task_url(project_id, board_id, task_id),
            field_id
        );
        self.fetch_empty(self.client.delete(url)).await
    }
}

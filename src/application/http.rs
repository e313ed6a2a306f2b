use crate::application::commands::{
    AppState, HeatmapResponse, ImportOptions, ImportReport, TaskExportFilter,
    complete_timer_impl, create_focus_session_impl, create_task_impl, delete_task_impl,
    export_sessions_csv_impl, export_tasks_csv_impl, get_daily_completion_impl,
    get_difficulty_breakdown_impl, get_heatmap_impl, get_overall_stats_impl, get_setting_impl,
    get_timer_impl, get_today_snapshot_impl, get_topic_focus_impl, import_tasks_csv_impl,
    list_focus_sessions_impl, list_overdue_tasks_impl, list_settings_impl,
    list_tasks_for_date_impl, list_tasks_impl, list_today_tasks_impl, pause_timer_impl,
    reset_timer_impl, set_setting_impl, set_timer_lengths_impl, start_timer_impl,
    tick_timer_impl, update_task_impl,
};
use crate::domain::analytics::DailyCompletion;
use crate::domain::models::{FocusSession, NewFocusSession, NewTask, Setting, Task, TaskPatch};
use crate::domain::timer::TimerSnapshot;
use crate::infrastructure::error::InfraError;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

type SharedState = Arc<AppState>;
type ApiResult<T> = Result<T, ApiError>;

/// JSON error body `{ "error": message }` with the mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn status_for(error: &InfraError) -> StatusCode {
    match error {
        InfraError::Validation(_) => StatusCode::BAD_REQUEST,
        InfraError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(
    state: &AppState,
    command: &str,
    result: Result<T, InfraError>,
) -> ApiResult<Json<T>> {
    result.map(Json).map_err(|error| ApiError {
        status: status_for(&error),
        message: state.command_error(command, &error),
    })
}

fn body<T>(
    state: &AppState,
    command: &str,
    payload: Result<Json<T>, JsonRejection>,
) -> ApiResult<T> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        let error = InfraError::Validation(rejection.body_text());
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: state.command_error(command, &error),
        }
    })
}

fn query<T>(
    state: &AppState,
    command: &str,
    params: Result<Query<T>, QueryRejection>,
) -> ApiResult<T> {
    params.map(|Query(value)| value).map_err(|rejection| {
        let error = InfraError::Validation(rejection.body_text());
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: state.command_error(command, &error),
        }
    })
}

/// An empty body deserializes to `T::default()`.
fn optional_body<T: DeserializeOwned + Default>(
    state: &AppState,
    command: &str,
    bytes: &Bytes,
) -> ApiResult<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|error| {
        let error = InfraError::Validation(format!("invalid JSON body: {error}"));
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: state.command_error(command, &error),
        }
    })
}

fn csv_download(filename: &str, content: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        content,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTimerRequest {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerLengthsRequest {
    session_length: Option<i64>,
    break_length: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DailyQuery {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct HeatmapQuery {
    year: Option<i32>,
    metric: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/today", get(list_today_tasks))
        .route("/api/tasks/overdue", get(list_overdue_tasks))
        .route("/api/tasks/date/{date}", get(list_tasks_for_date))
        .route("/api/tasks/{id}", put(update_task).delete(delete_task))
        .route(
            "/api/focus-sessions",
            get(list_focus_sessions).post(create_focus_session),
        )
        .route("/api/settings", get(list_settings).post(set_setting))
        .route("/api/settings/{key}", get(get_setting))
        .route("/api/timer", get(get_timer))
        .route("/api/timer/start", post(start_timer))
        .route("/api/timer/pause", post(pause_timer))
        .route("/api/timer/reset", post(reset_timer))
        .route("/api/timer/tick", post(tick_timer))
        .route("/api/timer/complete", post(complete_timer))
        .route("/api/timer/lengths", put(set_timer_lengths))
        .route("/api/analytics/stats", get(overall_stats))
        .route("/api/analytics/daily", get(daily_completion))
        .route("/api/analytics/topics", get(topic_focus))
        .route("/api/analytics/today", get(today_snapshot))
        .route("/api/analytics/difficulty", get(difficulty_breakdown))
        .route("/api/analytics/heatmap", get(heatmap))
        .route("/api/export/tasks.csv", get(export_tasks))
        .route("/api/export/sessions.csv", get(export_sessions))
        .route("/api/import/csv", post(import_tasks))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: SharedState, shutdown: F) -> Result<(), InfraError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;
    tracing::info!("listening on http://{address}/api");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_tasks(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "list_tasks", list_tasks_impl(&state))
}

async fn list_today_tasks(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "list_today_tasks", list_today_tasks_impl(&state))
}

async fn list_overdue_tasks(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "list_overdue_tasks", list_overdue_tasks_impl(&state))
}

async fn list_tasks_for_date(
    State(state): State<SharedState>,
    Path(date): Path<String>,
) -> impl IntoResponse {
    respond(&state, "list_tasks_for_date", list_tasks_for_date_impl(&state, date))
}

async fn create_task(
    State(state): State<SharedState>,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let payload = body(&state, "create_task", payload)?;
    let created = respond(&state, "create_task", create_task_impl(&state, payload))?;
    Ok((StatusCode::CREATED, created))
}

async fn update_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let patch = body(&state, "update_task", payload)?;
    respond(&state, "update_task", update_task_impl(&state, task_id, patch))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> ApiResult<StatusCode> {
    respond(&state, "delete_task", delete_task_impl(&state, task_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_focus_sessions(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "list_focus_sessions", list_focus_sessions_impl(&state))
}

async fn create_focus_session(
    State(state): State<SharedState>,
    payload: Result<Json<NewFocusSession>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FocusSession>)> {
    let payload = body(&state, "create_focus_session", payload)?;
    let created = respond(
        &state,
        "create_focus_session",
        create_focus_session_impl(&state, payload),
    )?;
    Ok((StatusCode::CREATED, created))
}

async fn list_settings(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "list_settings", list_settings_impl(&state))
}

async fn get_setting(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    respond(&state, "get_setting", get_setting_impl(&state, key))
}

async fn set_setting(
    State(state): State<SharedState>,
    payload: Result<Json<Setting>, JsonRejection>,
) -> ApiResult<Json<Setting>> {
    let setting = body(&state, "set_setting", payload)?;
    respond(&state, "set_setting", set_setting_impl(&state, setting))
}

async fn get_timer(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "get_timer", get_timer_impl(&state))
}

async fn start_timer(
    State(state): State<SharedState>,
    payload: Bytes,
) -> ApiResult<Json<TimerSnapshot>> {
    let request: StartTimerRequest = optional_body(&state, "start_timer", &payload)?;
    respond(&state, "start_timer", start_timer_impl(&state, request.task_id))
}

async fn pause_timer(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "pause_timer", pause_timer_impl(&state))
}

async fn reset_timer(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "reset_timer", reset_timer_impl(&state))
}

async fn tick_timer(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "tick_timer", tick_timer_impl(&state))
}

async fn complete_timer(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "complete_timer", complete_timer_impl(&state))
}

async fn set_timer_lengths(
    State(state): State<SharedState>,
    payload: Result<Json<TimerLengthsRequest>, JsonRejection>,
) -> ApiResult<Json<TimerSnapshot>> {
    let request = body(&state, "set_timer_lengths", payload)?;
    respond(
        &state,
        "set_timer_lengths",
        set_timer_lengths_impl(&state, request.session_length, request.break_length),
    )
}

async fn overall_stats(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "overall_stats", get_overall_stats_impl(&state))
}

async fn daily_completion(
    State(state): State<SharedState>,
    params: Result<Query<DailyQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<DailyCompletion>>> {
    let params = query(&state, "daily_completion", params)?;
    respond(
        &state,
        "daily_completion",
        get_daily_completion_impl(&state, params.days),
    )
}

async fn topic_focus(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "topic_focus", get_topic_focus_impl(&state))
}

async fn today_snapshot(State(state): State<SharedState>) -> impl IntoResponse {
    respond(&state, "today_snapshot", get_today_snapshot_impl(&state))
}

async fn difficulty_breakdown(State(state): State<SharedState>) -> impl IntoResponse {
    respond(
        &state,
        "difficulty_breakdown",
        get_difficulty_breakdown_impl(&state),
    )
}

async fn heatmap(
    State(state): State<SharedState>,
    params: Result<Query<HeatmapQuery>, QueryRejection>,
) -> ApiResult<Json<HeatmapResponse>> {
    let params = query(&state, "heatmap", params)?;
    respond(
        &state,
        "heatmap",
        get_heatmap_impl(&state, params.year, params.metric),
    )
}

async fn export_tasks(
    State(state): State<SharedState>,
    params: Result<Query<TaskExportFilter>, QueryRejection>,
) -> ApiResult<Response> {
    let filter = query(&state, "export_tasks", params)?;
    let Json(content) = respond(&state, "export_tasks", export_tasks_csv_impl(&state, filter))?;
    Ok(csv_download("tasks.csv", content))
}

async fn export_sessions(State(state): State<SharedState>) -> ApiResult<Response> {
    let Json(content) = respond(&state, "export_sessions", export_sessions_csv_impl(&state))?;
    Ok(csv_download("sessions.csv", content))
}

async fn import_tasks(
    State(state): State<SharedState>,
    params: Result<Query<ImportOptions>, QueryRejection>,
    payload: String,
) -> ApiResult<Json<ImportReport>> {
    let options = query(&state, "import_tasks", params)?;
    respond(
        &state,
        "import_tasks",
        import_tasks_csv_impl(&state, &payload, options),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::tests::TempWorkspace;
    use serde_json::Value;

    struct TestServer {
        base_url: String,
        client: reqwest::Client,
        _workspace: TempWorkspace,
    }

    impl TestServer {
        async fn start() -> Self {
            let workspace = TempWorkspace::new();
            let state = workspace.app_state();
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
            let address = listener.local_addr().expect("local addr");
            tokio::spawn(async move {
                axum::serve(listener, router(state)).await.expect("serve router");
            });
            Self {
                base_url: format!("http://{address}"),
                client: reqwest::Client::new(),
                _workspace: workspace,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let server = TestServer::start().await;
        let response = server
            .client
            .get(server.url("/api/health"))
            .send()
            .await
            .expect("send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn task_crud_maps_statuses() {
        let server = TestServer::start().await;

        let created = server
            .client
            .post(server.url("/api/tasks"))
            .json(&json!({ "title": "Vectors", "topic": "Physics", "date": "2024-01-15" }))
            .send()
            .await
            .expect("create task");
        assert_eq!(created.status(), reqwest::StatusCode::CREATED);
        let task: Task = created.json().await.expect("task body");
        assert_eq!(task.time.as_deref(), Some("09:00"));

        let updated = server
            .client
            .put(server.url(&format!("/api/tasks/{}", task.id)))
            .json(&json!({ "isDone": true, "progress": 100 }))
            .send()
            .await
            .expect("update task");
        assert_eq!(updated.status(), reqwest::StatusCode::OK);
        let body: Value = updated.json().await.expect("updated body");
        assert_eq!(body["isDone"], true);

        let by_date: Vec<Task> = server
            .client
            .get(server.url("/api/tasks/date/2024-01-15"))
            .send()
            .await
            .expect("list by date")
            .json()
            .await
            .expect("tasks body");
        assert_eq!(by_date.len(), 1);

        let deleted = server
            .client
            .delete(server.url(&format!("/api/tasks/{}", task.id)))
            .send()
            .await
            .expect("delete task");
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);

        let missing = server
            .client
            .delete(server.url(&format!("/api/tasks/{}", task.id)))
            .send()
            .await
            .expect("delete again");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = missing.json().await.expect("error body");
        assert!(body["error"].as_str().unwrap_or_default().contains("task not found"));
    }

    #[tokio::test]
    async fn invalid_payloads_are_bad_requests() {
        let server = TestServer::start().await;

        let missing_topic = server
            .client
            .post(server.url("/api/tasks"))
            .json(&json!({ "title": "Vectors", "date": "2024-01-15" }))
            .send()
            .await
            .expect("create task");
        assert_eq!(missing_topic.status(), reqwest::StatusCode::BAD_REQUEST);

        let malformed = server
            .client
            .post(server.url("/api/tasks"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .expect("create task");
        assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = malformed.json().await.expect("error body");
        assert!(body["error"].is_string());

        let zero_length = server
            .client
            .put(server.url("/api/timer/lengths"))
            .json(&json!({ "sessionLength": 0 }))
            .send()
            .await
            .expect("set lengths");
        assert_eq!(zero_length.status(), reqwest::StatusCode::BAD_REQUEST);

        let bad_days = server
            .client
            .get(server.url("/api/analytics/daily?days=abc"))
            .send()
            .await
            .expect("daily");
        assert_eq!(bad_days.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn timer_endpoints_drive_the_engine() {
        let server = TestServer::start().await;

        let started: Value = server
            .client
            .post(server.url("/api/timer/start"))
            .send()
            .await
            .expect("start")
            .json()
            .await
            .expect("snapshot");
        assert_eq!(started["phase"], "running");
        assert_eq!(started["remainingSeconds"], 1500);

        let ticked: Value = server
            .client
            .post(server.url("/api/timer/tick"))
            .send()
            .await
            .expect("tick")
            .json()
            .await
            .expect("snapshot");
        assert_eq!(ticked["remainingSeconds"], 1499);

        let completed: Value = server
            .client
            .post(server.url("/api/timer/complete"))
            .send()
            .await
            .expect("complete")
            .json()
            .await
            .expect("snapshot");
        assert_eq!(completed["phase"], "idle");
        assert_eq!(completed["sessionsCompleted"], 1);

        let sessions: Vec<Value> = server
            .client
            .get(server.url("/api/focus-sessions"))
            .send()
            .await
            .expect("sessions")
            .json()
            .await
            .expect("sessions body");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["taskId"], Value::Null);

        let missing_task = server
            .client
            .post(server.url("/api/timer/start"))
            .json(&json!({ "taskId": "nope" }))
            .send()
            .await
            .expect("start for missing task");
        assert_eq!(missing_task.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn settings_endpoints_upsert_and_fetch() {
        let server = TestServer::start().await;

        let missing = server
            .client
            .get(server.url("/api/settings/theme"))
            .send()
            .await
            .expect("get missing");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let saved = server
            .client
            .post(server.url("/api/settings"))
            .json(&json!({ "key": "theme", "value": "dark" }))
            .send()
            .await
            .expect("save setting");
        assert_eq!(saved.status(), reqwest::StatusCode::OK);

        let fetched: Setting = server
            .client
            .get(server.url("/api/settings/theme"))
            .send()
            .await
            .expect("get setting")
            .json()
            .await
            .expect("setting body");
        assert_eq!(fetched.value, "dark");
    }

    #[tokio::test]
    async fn csv_import_then_export() {
        let server = TestServer::start().await;

        let report: Value = server
            .client
            .post(server.url("/api/import/csv?autoComplete=true&defaultDifficulty=hard"))
            .body("Date,Title,Topic\n2024-01-15,Essay,English\n,Broken,English\n")
            .send()
            .await
            .expect("import")
            .json()
            .await
            .expect("report body");
        assert_eq!(report["imported"], 1);
        assert_eq!(report["skipped"], 0);
        assert_eq!(report["errors"][0]["line"], 3);

        let export = server
            .client
            .get(server.url("/api/export/tasks.csv?includePending=false"))
            .send()
            .await
            .expect("export");
        assert_eq!(export.status(), reqwest::StatusCode::OK);
        assert!(
            export
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.starts_with("text/csv"))
        );
        let content = export.text().await.expect("csv body");
        assert!(content.contains("2024-01-15,Essay,English,09:00,1,100,hard,0,0"));
    }

    #[tokio::test]
    async fn heatmap_rejects_unknown_metric() {
        let server = TestServer::start().await;
        let response = server
            .client
            .get(server.url("/api/analytics/heatmap?year=2024&metric=mood"))
            .send()
            .await
            .expect("heatmap");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let ok: Value = server
            .client
            .get(server.url("/api/analytics/heatmap?year=2024&metric=focus"))
            .send()
            .await
            .expect("heatmap")
            .json()
            .await
            .expect("heatmap body");
        assert_eq!(ok["cells"].as_array().map(Vec::len), Some(366));
        assert_eq!(ok["metric"], "focus");
    }
}

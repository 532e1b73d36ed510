//! Palette (canvas document) endpoints
//!
//! Reads return the document with its version in an `ETag` header. Writes
//! accept an optional `If-Match` precondition: a stale or unparsable token
//! is answered with 409, a missing one (or `*`) writes unconditionally.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{CanvasDoc, NodeCreate, NodePatch, PaletteCreate, PalettePatch, VersionToken};
use crate::pagination::PageQuery;
use crate::services::{PaletteSummary, SnapshotInfo, SnapshotRef};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct PaletteListResponse {
    pub items: Vec<PaletteSummary>,
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    pub items: Vec<SnapshotInfo>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub snapshot: SnapshotInfo,
}

/// POST /api/palettes/:id/restore body; one of the two is required
#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    pub ts: Option<String>,
    /// Snapshot locator, `<palette_id>/<ts>`
    pub path: Option<String>,
}

/// Expected version from `If-Match`
///
/// `None` when the header is absent or `*`.
fn if_match(headers: &HeaderMap) -> ApiResult<Option<VersionToken>> {
    let Some(value) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("If-Match is not valid text".to_string()))?
        .trim();
    if raw == "*" {
        return Ok(None);
    }
    // A token this store never issued cannot match the current version
    raw.parse::<VersionToken>().map(Some).map_err(|_| {
        ApiError::Conflict(format!(
            "version conflict: If-Match {} does not match the current version",
            raw
        ))
    })
}

fn with_etag<T: Serialize>(status: StatusCode, version: VersionToken, body: T) -> Response {
    (status, [(header::ETAG, version.to_etag())], Json(body)).into_response()
}

/// POST /api/palettes
pub async fn create_palette(
    State(state): State<AppState>,
    body: Option<Json<PaletteCreate>>,
) -> ApiResult<Response> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let created = state.palettes.create(request).await?;
    Ok(with_etag(StatusCode::CREATED, created.version, created.value))
}

/// GET /api/palettes
pub async fn list_palettes(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<PaletteListResponse>> {
    let page = query.page();
    let (items, total) = state.palettes.list(page).await?;
    Ok(Json(PaletteListResponse {
        items,
        limit: page.limit,
        offset: page.offset,
        total,
    }))
}

/// GET /api/palettes/:id
pub async fn get_palette(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let stored = state.palettes.read(&id).await?;
    Ok(with_etag(StatusCode::OK, stored.version, stored.value))
}

/// PATCH /api/palettes/:id
pub async fn patch_palette(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<PalettePatch>,
) -> ApiResult<Response> {
    let expected = if_match(&headers)?;
    let written = state.palettes.patch(&id, patch, expected).await?;
    Ok(with_etag(StatusCode::OK, written.version, written.value))
}

/// PUT /api/palettes/:id - replace the whole document
pub async fn replace_palette(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> ApiResult<Response> {
    let expected = if_match(&headers)?;
    let object = body
        .as_object_mut()
        .ok_or_else(|| ApiError::BadRequest("palette body must be a JSON object".to_string()))?;
    object.insert("id".to_string(), Value::String(id.clone()));
    let doc: CanvasDoc = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid palette document: {}", e)))?;

    let written = state.palettes.replace(&id, doc, expected).await?;
    Ok(with_etag(StatusCode::OK, written.version, written.value))
}

/// DELETE /api/palettes/:id
pub async fn delete_palette(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.palettes.delete(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/palettes/:id/nodes
pub async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<NodeCreate>,
) -> ApiResult<Response> {
    let expected = if_match(&headers)?;
    let written = state.palettes.add_node(&id, request, expected).await?;
    Ok(with_etag(StatusCode::CREATED, written.version, written.value))
}

/// PATCH /api/palettes/:id/nodes/:node_id
pub async fn patch_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<NodePatch>,
) -> ApiResult<Response> {
    let expected = if_match(&headers)?;
    let written = state
        .palettes
        .patch_node(&id, &node_id, patch, expected)
        .await?;
    Ok(with_etag(StatusCode::OK, written.version, written.value))
}

/// DELETE /api/palettes/:id/nodes/:node_id
pub async fn delete_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let expected = if_match(&headers)?;
    let written = state.palettes.remove_node(&id, &node_id, expected).await?;
    Ok(with_etag(StatusCode::OK, written.version, written.value))
}

/// POST /api/palettes/:id/snapshot
pub async fn snapshot_palette(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SnapshotResponse>> {
    let snapshot = state.palettes.snapshot(&id).await?;
    Ok(Json(SnapshotResponse { snapshot }))
}

/// GET /api/palettes/:id/snapshots
pub async fn list_snapshots(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<SnapshotListResponse>> {
    let page = query.page();
    let items = state.palettes.list_snapshots(&id, page).await?;
    Ok(Json(SnapshotListResponse {
        items,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// POST /api/palettes/:id/restore
pub async fn restore_palette(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<RestoreRequest>>,
) -> ApiResult<Response> {
    let expected = if_match(&headers)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let snapshot = match (request.path, request.ts) {
        (Some(locator), _) => SnapshotRef::Locator(locator),
        (None, Some(ts)) => SnapshotRef::Ts(ts),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "restore needs either ts or path".to_string(),
            ))
        }
    };

    let restored = state.palettes.restore(&id, snapshot, expected).await?;
    Ok(with_etag(StatusCode::OK, restored.version, restored.value))
}

/// Build palette routes
pub fn palette_routes() -> Router<AppState> {
    Router::new()
        .route("/api/palettes", post(create_palette).get(list_palettes))
        .route(
            "/api/palettes/:id",
            get(get_palette)
                .patch(patch_palette)
                .put(replace_palette)
                .delete(delete_palette),
        )
        .route("/api/palettes/:id/nodes", post(add_node))
        .route(
            "/api/palettes/:id/nodes/:node_id",
            patch(patch_node).delete(delete_node),
        )
        .route("/api/palettes/:id/snapshot", post(snapshot_palette))
        .route("/api/palettes/:id/snapshots", get(list_snapshots))
        .route("/api/palettes/:id/restore", post(restore_palette))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(header::IF_MATCH, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn test_if_match_forms() {
        assert_eq!(if_match(&HeaderMap::new()).unwrap(), None);
        assert_eq!(if_match(&headers("*")).unwrap(), None);
        assert_eq!(if_match(&headers("\"3\"")).unwrap(), Some(VersionToken(3)));
        assert_eq!(if_match(&headers("W/\"4\"")).unwrap(), Some(VersionToken(4)));
    }

    #[test]
    fn test_bogus_if_match_is_conflict() {
        assert!(matches!(
            if_match(&headers("bogus-stale-etag")),
            Err(ApiError::Conflict(_))
        ));
    }
}

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::info;

use crate::{
    auth::ApiKeyAuth,
    errors::{AppError, ErrorBody, NextcloudError},
    models::{
        DeleteReceipt, DirectoryListingResponse, FileContent, FolderReceipt, PathQuery,
        PathRequest, ReadFileResponse, RemoteStream, SaveAndShareResponse, SaveFileRequest,
        ShareFolderRequest, ShareLink, TransferReceipt, TransferRequest, UploadReceipt,
    },
    services::nextcloud::with_retry,
    AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/save_file", post(save_file))
        .route("/read_file", get(read_file))
        .route("/alter_file", put(alter_file))
        .route("/list_directory", get(list_directory))
        .route("/move_item", post(move_item))
        .route("/copy_item", post(copy_item))
        .route("/create_folder", post(create_folder))
        .route("/share_folder", post(share_folder))
        .route("/delete_file", delete(delete_file))
        .route("/delete_folder", delete(delete_folder))
        .route("/download_file", get(download_file))
        .route("/download_folder", get(download_folder))
}

#[utoipa::path(
    post,
    path = "/save_file",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = SaveFileRequest,
    responses(
        (status = 200, description = "File saved and shared", body = SaveAndShareResponse),
        (status = 400, description = "Invalid path or content", body = ErrorBody),
        (status = 401, description = "Missing bearer token"),
        (status = 403, description = "Invalid bearer token"),
        (status = 503, description = "Upload failed, or uploaded but not shared (see `uploaded`)", body = SaveAndShareResponse)
    )
)]
pub async fn save_file(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<SaveFileRequest>,
) -> Result<Response, NextcloudError> {
    let content = FileContent::decode(&request.content, request.is_base64)?;
    let report = state.nextcloud.save_and_share(&request.path, content).await?;

    // Uploaded but not shared is reported with the share step's status
    let status = report
        .share_error()
        .map(|e| e.status_code())
        .unwrap_or(StatusCode::OK);
    Ok((status, Json(SaveAndShareResponse::from(&report))).into_response())
}

#[utoipa::path(
    get,
    path = "/read_file",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    params(PathQuery),
    responses(
        (status = 200, description = "File content, base64-encoded", body = ReadFileResponse),
        (status = 404, description = "File not found", body = ErrorBody)
    )
)]
pub async fn read_file(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Query(query): Query<PathQuery>,
) -> Result<Json<ReadFileResponse>, NextcloudError> {
    let download = with_retry(&state.config.retry, "read_file", || {
        state.nextcloud.read_file(&query.path)
    })
    .await?;

    Ok(Json(ReadFileResponse {
        content: STANDARD.encode(&download.content),
        mime_type: download.mime_type,
    }))
}

#[utoipa::path(
    put,
    path = "/alter_file",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = SaveFileRequest,
    responses(
        (status = 200, description = "File overwritten", body = UploadReceipt),
        (status = 400, description = "Invalid path or content", body = ErrorBody)
    )
)]
pub async fn alter_file(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<SaveFileRequest>,
) -> Result<Json<UploadReceipt>, NextcloudError> {
    let content = FileContent::decode(&request.content, request.is_base64)?;
    let receipt = state.nextcloud.alter_file(&request.path, content).await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    get,
    path = "/list_directory",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    params(PathQuery),
    responses(
        (status = 200, description = "Directory contents in server order", body = DirectoryListingResponse),
        (status = 404, description = "Directory not found", body = ErrorBody),
        (status = 502, description = "Malformed listing from the server", body = ErrorBody)
    )
)]
pub async fn list_directory(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Query(query): Query<PathQuery>,
) -> Result<Json<DirectoryListingResponse>, NextcloudError> {
    let items = with_retry(&state.config.retry, "list_directory", || {
        state.nextcloud.list_directory(&query.path)
    })
    .await?;
    Ok(Json(DirectoryListingResponse { items }))
}

#[utoipa::path(
    post,
    path = "/move_item",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Item moved or renamed", body = TransferReceipt),
        (status = 409, description = "Destination exists", body = ErrorBody)
    )
)]
pub async fn move_item(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferReceipt>, NextcloudError> {
    let receipt = state
        .nextcloud
        .move_item(&request.source_path, &request.destination_path, request.overwrite)
        .await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    post,
    path = "/copy_item",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Item copied", body = TransferReceipt),
        (status = 409, description = "Destination exists", body = ErrorBody)
    )
)]
pub async fn copy_item(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferReceipt>, NextcloudError> {
    let receipt = state
        .nextcloud
        .copy_item(&request.source_path, &request.destination_path, request.overwrite)
        .await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    post,
    path = "/create_folder",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = PathRequest,
    responses(
        (status = 200, description = "Folder exists (created now or before)", body = FolderReceipt)
    )
)]
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<PathRequest>,
) -> Result<Json<FolderReceipt>, NextcloudError> {
    let receipt = with_retry(&state.config.retry, "create_folder", || {
        state.nextcloud.create_folder(&request.path)
    })
    .await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    post,
    path = "/share_folder",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = ShareFolderRequest,
    responses(
        (status = 200, description = "Public link created", body = ShareLink),
        (status = 404, description = "Folder not found", body = ErrorBody)
    )
)]
pub async fn share_folder(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<ShareFolderRequest>,
) -> Result<Json<ShareLink>, NextcloudError> {
    let link = state
        .nextcloud
        .share_folder(&request.path, request.permissions)
        .await?;
    Ok(Json(link))
}

#[utoipa::path(
    delete,
    path = "/delete_file",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = PathRequest,
    responses(
        (status = 200, description = "File is gone (deleted now or already absent)", body = DeleteReceipt)
    )
)]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<PathRequest>,
) -> Result<Json<DeleteReceipt>, NextcloudError> {
    let receipt = with_retry(&state.config.retry, "delete_file", || {
        state.nextcloud.delete_file(&request.path)
    })
    .await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    delete,
    path = "/delete_folder",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    request_body = PathRequest,
    responses(
        (status = 200, description = "Folder is gone (deleted now or already absent)", body = DeleteReceipt)
    )
)]
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Json(request): Json<PathRequest>,
) -> Result<Json<DeleteReceipt>, NextcloudError> {
    let receipt = with_retry(&state.config.retry, "delete_folder", || {
        state.nextcloud.delete_folder(&request.path)
    })
    .await?;
    Ok(Json(receipt))
}

#[utoipa::path(
    get,
    path = "/download_file",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    params(PathQuery),
    responses(
        (status = 200, description = "Raw file content, streamed"),
        (status = 404, description = "File not found", body = ErrorBody)
    )
)]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Query(query): Query<PathQuery>,
) -> Result<Response, NextcloudError> {
    let remote = state.nextcloud.download_file(&query.path).await?;
    let filename = attachment_name(&query.path, "download");
    Ok(stream_response(remote, &filename))
}

#[utoipa::path(
    get,
    path = "/download_folder",
    tag = "files",
    security(
        ("bearer_auth" = [])
    ),
    params(PathQuery),
    responses(
        (status = 200, description = "Zip archive of the folder, streamed", content_type = "application/zip"),
        (status = 404, description = "Folder not found", body = ErrorBody)
    )
)]
pub async fn download_folder(
    State(state): State<Arc<AppState>>,
    _auth: ApiKeyAuth,
    Query(query): Query<PathQuery>,
) -> Result<Response, NextcloudError> {
    let remote = state.nextcloud.download_folder_as_zip(&query.path).await?;
    let filename = format!("{}.zip", attachment_name(&query.path, "files"));
    info!("📦 Streaming {} to client", filename);
    Ok(stream_response(remote, &filename))
}

fn stream_response(remote: RemoteStream, filename: &str) -> Response {
    let content_length = remote.content_length;
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, remote.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(remote.stream),
    )
        .into_response();

    if let Some(length) = content_length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    response
}

/// Header-safe file name from the last segment of a caller path
fn attachment_name(path: &str, fallback: &str) -> String {
    let last = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(fallback);
    last.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

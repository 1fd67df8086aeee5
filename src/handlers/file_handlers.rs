//! HTTP handlers for the file API.
//!
//! File ids on the wire are the object key in URL-safe base64 without
//! padding, so nested keys fit in a single path segment. Uploads are read
//! into memory up to `max_upload_bytes` before they reach the service.

use crate::{
    errors::AppError,
    models::file::File,
    services::{file_service::CreateFile, object_store::ByteStream},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// A file as presented to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileView {
    pub id: String,
    pub name: String,
    pub path: String,
    pub user: u64,
    pub file_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub download_url: String,
}

impl FileView {
    /// `None` for the empty sentinel file.
    pub fn from_file(file: File, state: &AppState) -> Option<Self> {
        if file.is_empty() {
            return None;
        }
        Some(Self {
            id: encode_id(&file.id),
            download_url: state.download_url(&file.id),
            name: file.name,
            path: file.path,
            user: file.user,
            file_type: file.content_type,
            size: file.size,
            created_at: file.created_at,
            updated_at: file.updated_at,
        })
    }
}

pub fn encode_id(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

pub fn decode_id(id: &str) -> Result<String, AppError> {
    URL_SAFE_NO_PAD
        .decode(id)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("invalid id"))
}

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    pub user: u64,
    pub path_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveFileReq {
    pub user: u64,
    pub new_path: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// GET `/files?user=&path_prefix=`
pub async fn list_files(
    State(state): State<AppState>,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<Vec<FileView>>, AppError> {
    let prefix = q.path_prefix.unwrap_or_default();
    let files = state
        .files
        .get_by_user(q.user, &prefix, &state.request_token())
        .await?;

    let views = files
        .into_iter()
        .filter_map(|file| FileView::from_file(file, &state))
        .collect();
    Ok(Json(views))
}

/// GET `/files/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileView>, AppError> {
    let key = decode_id(&id)?;
    let file = state.files.get(&key, &state.request_token()).await?;
    FileView::from_file(file, &state)
        .map(Json)
        .ok_or_else(|| AppError::not_found("not found"))
}

/// POST `/files` with multipart fields `user`, `path`, `overwrite` and `file`.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut user = None;
    let mut path = String::new();
    let mut overwrite = false;
    let mut upload = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("user") => {
                let raw = field.text().await?;
                let parsed = raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| AppError::bad_request("invalid user"))?;
                user = Some(parsed);
            }
            Some("path") => path = field.text().await?,
            Some("overwrite") => overwrite = parse_flag(&field.text().await?)?,
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file part has no file name"))?;
                let content_type = field
                    .content_type()
                    .filter(|ct| !ct.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&name)
                            .first_or_octet_stream()
                            .essence_str()
                            .to_string()
                    });

                let mut data = BytesMut::new();
                while let Some(chunk) = field.chunk().await? {
                    if (data.len() + chunk.len()) as u64 > state.max_upload_bytes {
                        return Err(AppError::bad_request(format!(
                            "max file size is {} bytes",
                            state.max_upload_bytes
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }
                upload = Some((name, content_type, data.freeze()));
            }
            _ => {}
        }
    }

    let user = user.ok_or_else(|| AppError::bad_request("missing field `user`"))?;
    let (name, content_type, data) =
        upload.ok_or_else(|| AppError::bad_request("missing field `file`"))?;
    if path.contains("..") {
        return Err(AppError::bad_request("path cannot contain '..'"));
    }
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(AppError::bad_request("invalid file name"));
    }

    let req = CreateFile {
        user,
        size: data.len() as u64,
        name,
        path,
        content_type,
        overwrite,
    };
    let body: ByteStream = stream::iter(vec![Ok(data)]).boxed();
    let file = state
        .files
        .create(req, body, &state.request_token())
        .await?;
    info!("uploaded {} ({} bytes)", file.id, file.size);

    let view = FileView::from_file(file, &state)
        .ok_or_else(|| AppError::unavailable("service unavailable"))?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// DELETE `/files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let key = decode_id(&id)?;
    state.files.delete(&key, &state.request_token()).await?;
    Ok(Json(json!({ "deleted": true })))
}

/// POST `/files/{id}/move`
pub async fn move_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MoveFileReq>,
) -> Result<Json<FileView>, AppError> {
    let key = decode_id(&id)?;
    if req.new_path.contains("..") {
        return Err(AppError::bad_request("path cannot contain '..'"));
    }

    let file = state
        .files
        .move_file(
            req.user,
            &key,
            &req.new_path,
            req.overwrite,
            &state.request_token(),
        )
        .await?;
    FileView::from_file(file, &state)
        .map(Json)
        .ok_or_else(|| AppError::unavailable("service unavailable"))
}

/// GET `/files/tree`
pub async fn file_tree() -> AppError {
    AppError::not_yet_supported()
}

/// GET `/objects/{bucket}/{*key}`: stream a publicly readable object.
pub async fn download_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if bucket != state.files.bucket() {
        return Err(AppError::not_found("not found"));
    }

    let (head, body) = state.files.download(&key, &state.request_token()).await?;

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    set_download_headers(headers, head.content_type.as_deref(), head.content_length);
    if let Some(modified) = head.last_modified {
        let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&http_date) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    Ok(response)
}

fn set_download_headers(headers: &mut HeaderMap, content_type: Option<&str>, length: u64) {
    let content_type = content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
}

fn parse_flag(raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" => Ok(false),
        "true" | "1" => Ok(true),
        _ => Err(AppError::bad_request("invalid overwrite flag")),
    }
}

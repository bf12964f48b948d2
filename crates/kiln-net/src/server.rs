//! The axum fetch server exposing a [`LocalStore`] to peers.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kiln_store::{LocalStore, Store, StoreError};
use kiln_types::{
    AcquireMode, PathType, RegisteredSealProof, SectorFileType, SectorId, SectorRef, StorageId,
};
use tracing::{debug, error};

use crate::DIRECTORY_HEADER;

type AppState = Arc<LocalStore>;

/// Build the fetch router over a local store. Mount it at the base path
/// the store advertises in its URLs (conventionally `/remote`).
pub fn fetch_router(store: Arc<LocalStore>) -> Router {
    Router::new()
        .route("/remote/stat/{storage_id}", get(remote_stat))
        .route(
            "/remote/{file_type}/{sector}",
            get(remote_get_sector).delete(remote_remove_sector),
        )
        .route("/remote/{file_type}/{sector}/{*entry}", get(remote_get_entry))
        .with_state(store)
}

fn bad_request(message: impl Into<String>) -> Response {
    let message: String = message.into();
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "fetch handler failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn parse_target(file_type: &str, sector: &str) -> Result<(SectorFileType, SectorId), Response> {
    let file_type: SectorFileType = file_type.parse().map_err(|_| {
        bad_request(format!("unknown file type: {file_type}"))
    })?;
    let sector: SectorId = sector
        .parse()
        .map_err(|_| bad_request(format!("invalid sector name: {sector}")))?;
    Ok((file_type, sector))
}

/// Resolve the local path of an artifact through the store.
async fn resolve_artifact(
    store: &LocalStore,
    file_type: SectorFileType,
    sector: SectorId,
) -> Result<PathBuf, Response> {
    // The proof type only sizes allocations; nothing is allocated here.
    let sector_ref = SectorRef {
        id: sector,
        proof_type: RegisteredSealProof::StackedDrg2KiBV1_1,
    };
    let response = store
        .acquire_sector(
            sector_ref,
            file_type,
            SectorFileType::NONE,
            PathType::Storage,
            AcquireMode::Move,
        )
        .await
        .map_err(internal_error)?;

    match response.paths.get(file_type) {
        Some(path) => Ok(path.clone()),
        None => Err(StatusCode::NOT_FOUND.into_response()),
    }
}

/// `GET /remote/stat/{storage_id}`
async fn remote_stat(
    State(store): State<AppState>,
    Path(storage_id): Path<String>,
) -> Response {
    match store.get_fs_stat(&StorageId::from(storage_id)).await {
        Ok(stat) => Json(stat).into_response(),
        Err(StoreError::NotFoundStorage(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

/// `GET /remote/{file_type}/{sector}`
///
/// Flat artifacts are returned as bytes; directory artifacts as a JSON
/// listing of relative entries, flagged by the directory header.
async fn remote_get_sector(
    State(store): State<AppState>,
    Path((file_type, sector)): Path<(String, String)>,
) -> Response {
    let (file_type, sector) = match parse_target(&file_type, &sector) {
        Ok(target) => target,
        Err(response) => return response,
    };

    let path = match resolve_artifact(&store, file_type, sector).await {
        Ok(path) => path,
        Err(response) => return response,
    };

    debug!(%sector, %file_type, path = %path.display(), "serving artifact");
    if path.is_dir() {
        match list_dir(&path) {
            Ok(entries) => {
                ([(DIRECTORY_HEADER, "1")], Json(entries)).into_response()
            }
            Err(e) => internal_error(e),
        }
    } else {
        serve_file(&path).await
    }
}

/// `GET /remote/{file_type}/{sector}/{entry}` — one file inside a
/// directory artifact.
async fn remote_get_entry(
    State(store): State<AppState>,
    Path((file_type, sector, entry)): Path<(String, String, String)>,
) -> Response {
    let (file_type, sector) = match parse_target(&file_type, &sector) {
        Ok(target) => target,
        Err(response) => return response,
    };
    if entry.starts_with('/')
        || FsPath::new(&entry)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return bad_request("entry escapes artifact directory");
    }

    let path = match resolve_artifact(&store, file_type, sector).await {
        Ok(path) => path,
        Err(response) => return response,
    };

    serve_file(&path.join(&entry)).await
}

/// `DELETE /remote/{file_type}/{sector}`
async fn remote_remove_sector(
    State(store): State<AppState>,
    Path((file_type, sector)): Path<(String, String)>,
) -> Response {
    let (file_type, sector) = match parse_target(&file_type, &sector) {
        Ok(target) => target,
        Err(response) => return response,
    };

    match store.remove(sector, file_type).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => internal_error(e),
    }
}

async fn serve_file(path: &FsPath) -> Response {
    match tokio::fs::read(path).await {
        Ok(contents) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from(contents),
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// Relative paths of every file under `dir`.
fn list_dir(dir: &FsPath) -> Result<Vec<String>, std::io::Error> {
    fn walk(
        root: &FsPath,
        dir: &FsPath,
        out: &mut Vec<String>,
    ) -> Result<(), std::io::Error> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    walk(dir, dir, &mut entries)?;
    entries.sort();
    Ok(entries)
}

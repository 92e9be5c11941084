use axum::{routing::get, Json, Router};
use std::sync::Arc;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    errors::{ErrorBody, ErrorKind},
    models::{
        DeleteReceipt, DirectoryEntry, DirectoryListingResponse, FolderReceipt, PathRequest,
        ReadFileResponse, SaveAndShareResponse, SaveFileRequest, ShareFolderRequest, ShareLink,
        SharePermission, TransferReceipt, TransferRequest, UploadReceipt,
    },
    AppState,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::files::save_file,
        crate::routes::files::read_file,
        crate::routes::files::alter_file,
        crate::routes::files::list_directory,
        crate::routes::files::move_item,
        crate::routes::files::copy_item,
        crate::routes::files::create_folder,
        crate::routes::files::share_folder,
        crate::routes::files::delete_file,
        crate::routes::files::delete_folder,
        crate::routes::files::download_file,
        crate::routes::files::download_folder,
    ),
    components(
        schemas(
            SaveFileRequest, PathRequest, ShareFolderRequest, TransferRequest,
            ReadFileResponse, DirectoryListingResponse, DirectoryEntry, ShareLink,
            SharePermission, UploadReceipt, FolderReceipt, DeleteReceipt, TransferReceipt,
            SaveAndShareResponse, ErrorBody, ErrorKind
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "files", description = "File and folder operations inside the usage folder"),
    ),
    info(
        title = "Nextcloud Share API",
        version = "0.1.0",
        description = "Save, read, organize and publicly share files on a Nextcloud instance"
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_openapi_router() -> Router<Arc<AppState>> {
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_file_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/save_file",
            "/read_file",
            "/alter_file",
            "/list_directory",
            "/move_item",
            "/copy_item",
            "/create_folder",
            "/share_folder",
            "/delete_file",
            "/delete_folder",
            "/download_file",
            "/download_folder",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[test]
    fn test_bearer_scheme_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}

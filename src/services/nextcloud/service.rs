use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::{header, Method, Response};
use tracing::{debug, error, info, warn};

use crate::errors::{NextcloudError, OperationResult};
use crate::models::{
    DeleteReceipt, DirectoryEntry, FileContent, FileDownload, FolderReceipt, RemoteStream,
    SaveAndShareReport, ShareLink, SharePermission, SharePhase, TransferReceipt, UploadReceipt,
};
use crate::webdav_xml_parser::{parse_multistatus, DavResource};

use super::config::NextcloudConfig;
use super::connection::{
    check_response, dav_method, Depth, DownloadTarget, NextcloudConnection, TransferMethod,
};
use super::paths::{PathResolver, RemotePath};
use super::share::{parse_share_response, CreateShareRequest};
use super::status::{Disposition, RemoteCall};

/// Runs each logical file operation as a short sequence of remote calls.
///
/// Holds no state across calls besides the shared connection pool, so
/// clones can be used from concurrent request handlers.
#[derive(Clone)]
pub struct NextcloudService {
    connection: Arc<NextcloudConnection>,
    resolver: PathResolver,
}

impl NextcloudService {
    /// Opens the connection pool for `config`
    pub fn new(config: NextcloudConfig) -> anyhow::Result<Self> {
        let resolver = PathResolver::new(config.usage_folder.as_deref())?;
        let connection = NextcloudConnection::open(config)?;
        Ok(Self {
            connection: Arc::new(connection),
            resolver,
        })
    }

    /// Releases the connection pool once the last clone is gone
    pub fn close(self) {
        match Arc::try_unwrap(self.connection) {
            Ok(connection) => connection.close(),
            Err(shared) => warn!(
                "Nextcloud connection still shared by {} handle(s); pool is released when they drop",
                Arc::strong_count(&shared) - 1
            ),
        }
    }

    pub fn config(&self) -> &NextcloudConfig {
        self.connection.config()
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Uploads a file and then creates a public read-only link for it.
    ///
    /// Upload failures are returned as errors. Once the upload succeeded the
    /// result is always a report, with the share phase possibly failed; the
    /// uploaded file is never rolled back.
    pub async fn save_and_share(&self, path: &str, content: FileContent) -> OperationResult<SaveAndShareReport> {
        let remote_path = self.resolver.resolve_item("path", path)?;
        info!("💾 Saving and sharing {} ({} bytes)", remote_path, content.len());

        self.ensure_parents(&remote_path).await;
        let upload = self.upload(&remote_path, &content).await.map_err(|e| {
            error!("❌ Upload of {} failed: {}", remote_path, e);
            e
        })?;

        let share = match self.create_share(&remote_path, SharePermission::ReadOnly).await {
            Ok(link) => {
                info!("✅ Saved and shared {} at {}", remote_path, link.url);
                SharePhase::Shared(link)
            }
            Err(e) => {
                warn!("⚠️ {} was uploaded but sharing failed: {}", remote_path, e);
                SharePhase::Failed(e)
            }
        };

        Ok(SaveAndShareReport { upload, share })
    }

    /// Reads a whole file into memory
    pub async fn read_file(&self, path: &str) -> OperationResult<FileDownload> {
        let remote_path = self.resolver.resolve_item("path", path)?;
        debug!("⬇️ Reading file: {}", remote_path);

        let response = self
            .connection
            .webdav_request(Method::GET, &remote_path, None, &[])
            .await?;
        let (_, response) = check_response(RemoteCall::Download, response).await?;

        let mime_type = content_type(&response).unwrap_or_else(|| "application/octet-stream".to_string());
        let content = response.bytes().await?;
        debug!("✅ Read {} bytes from {}", content.len(), remote_path);

        Ok(FileDownload { content, mime_type })
    }

    /// Overwrites (or creates) a file. No existence check is made.
    pub async fn alter_file(&self, path: &str, content: FileContent) -> OperationResult<UploadReceipt> {
        let remote_path = self.resolver.resolve_item("path", path)?;
        info!("✏️ Altering file {} ({} bytes)", remote_path, content.len());
        self.upload(&remote_path, &content).await
    }

    /// Lists the direct children of a folder in server order
    pub async fn list_directory(&self, path: &str) -> OperationResult<Vec<DirectoryEntry>> {
        let remote_path = self.resolver.resolve("path", path)?;
        debug!("📁 Listing directory: {}", remote_path);

        let response = self.connection.webdav_propfind(&remote_path, Depth::One).await?;
        let (_, response) = check_response(RemoteCall::Propfind, response).await?;
        let body = response.text().await?;
        let resources = parse_multistatus(&body)?;

        let root_path = self.webdav_root_path();
        let mut skipped_self = false;
        let mut entries = Vec::with_capacity(resources.len());
        for resource in resources {
            let entry = entry_from_resource(&root_path, resource)?;
            if !skipped_self && entry.path == remote_path {
                skipped_self = true;
                continue;
            }
            entries.push(entry);
        }

        debug!("📊 {} entries in {}", entries.len(), remote_path);
        Ok(entries)
    }

    /// Creates a folder; an existing folder counts as success
    pub async fn create_folder(&self, path: &str) -> OperationResult<FolderReceipt> {
        let remote_path = self.resolver.resolve_item("path", path)?;
        let disposition = self.mkcol(&remote_path).await?;
        let created = disposition == Disposition::Applied;
        info!(
            "📁 Folder {} {}",
            remote_path,
            if created { "created" } else { "already existed" }
        );
        Ok(FolderReceipt { path: remote_path, created })
    }

    pub async fn move_item(&self, source: &str, destination: &str, overwrite: bool) -> OperationResult<TransferReceipt> {
        self.transfer(TransferMethod::Move, source, destination, overwrite).await
    }

    pub async fn copy_item(&self, source: &str, destination: &str, overwrite: bool) -> OperationResult<TransferReceipt> {
        self.transfer(TransferMethod::Copy, source, destination, overwrite).await
    }

    /// Creates a public link for a folder (or any existing item)
    pub async fn share_folder(&self, path: &str, permission: SharePermission) -> OperationResult<ShareLink> {
        let remote_path = self.resolver.resolve("path", path)?;
        if remote_path.is_root() {
            // Nextcloud refuses to share the account root.
            return Err(NextcloudError::validation("path", "root"));
        }
        info!("🔗 Sharing {} ({:?})", remote_path, permission);
        self.create_share(&remote_path, permission).await
    }

    pub async fn delete_file(&self, path: &str) -> OperationResult<DeleteReceipt> {
        self.delete_path(path).await
    }

    pub async fn delete_folder(&self, path: &str) -> OperationResult<DeleteReceipt> {
        self.delete_path(path).await
    }

    /// Streams a single file without buffering it
    pub async fn download_file(&self, path: &str) -> OperationResult<RemoteStream> {
        let remote_path = self.resolver.resolve_item("path", path)?;
        debug!("⬇️ Streaming file: {}", remote_path);

        let response = self
            .connection
            .stream_download(&DownloadTarget::File(remote_path))
            .await?;
        let (_, response) = check_response(RemoteCall::Download, response).await?;
        Ok(into_remote_stream(response, "application/octet-stream"))
    }

    /// Streams a folder as a zip archive built by the server
    pub async fn download_folder_as_zip(&self, path: &str) -> OperationResult<RemoteStream> {
        let remote_path = self.resolver.resolve("path", path)?;
        info!("🗜️ Downloading {} as zip", remote_path);

        let response = self
            .connection
            .stream_download(&DownloadTarget::FolderZip(remote_path))
            .await?;
        let (_, response) = check_response(RemoteCall::ZipDownload, response).await?;

        match content_type(&response) {
            Some(ct) if ct.starts_with("application/zip") => Ok(into_remote_stream(response, "application/zip")),
            other => Err(NextcloudError::protocol(format!(
                "Expected application/zip, but received {}",
                other.unwrap_or_else(|| "no content type".to_string())
            ))),
        }
    }

    async fn transfer(
        &self,
        method: TransferMethod,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> OperationResult<TransferReceipt> {
        let source = self.resolver.resolve_item("source_path", source)?;
        let destination = self.resolver.resolve_item("destination_path", destination)?;
        if source == destination {
            return Err(NextcloudError::validation("destination_path", "same_as_source"));
        }
        if destination.starts_with(&source) {
            return Err(NextcloudError::validation("destination_path", "inside_source"));
        }

        info!("🔀 {:?} {} -> {} (overwrite: {})", method, source, destination, overwrite);
        let response = self
            .connection
            .webdav_move_or_copy(method, &source, &destination, overwrite)
            .await?;
        let (_, response) = check_response(RemoteCall::MoveOrCopy, response).await?;

        // 201 = new resource, 204 = existing destination replaced
        let overwritten = response.status().as_u16() == 204;
        Ok(TransferReceipt { source, destination, overwritten })
    }

    async fn delete_path(&self, path: &str) -> OperationResult<DeleteReceipt> {
        let remote_path = self.resolver.resolve_item("path", path)?;
        let response = self
            .connection
            .webdav_request(Method::DELETE, &remote_path, None, &[])
            .await?;
        let (disposition, _) = check_response(RemoteCall::Delete, response).await?;

        let existed = disposition == Disposition::Applied;
        info!(
            "🗑️ {} {}",
            remote_path,
            if existed { "deleted" } else { "was already absent" }
        );
        Ok(DeleteReceipt { path: remote_path, existed })
    }

    async fn mkcol(&self, path: &RemotePath) -> OperationResult<Disposition> {
        let response = self
            .connection
            .webdav_request(dav_method("MKCOL")?, path, None, &[])
            .await?;
        let (disposition, _) = check_response(RemoteCall::CreateCollection, response).await?;
        Ok(disposition)
    }

    /// Best-effort creation of every ancestor folder. Failures are left for
    /// the following upload to report.
    async fn ensure_parents(&self, path: &RemotePath) {
        for ancestor in path.ancestors() {
            if let Err(e) = self.mkcol(&ancestor).await {
                warn!("Could not ensure folder {} exists: {}", ancestor, e);
            }
        }
    }

    async fn upload(&self, path: &RemotePath, content: &FileContent) -> OperationResult<UploadReceipt> {
        let mime = mime_guess::from_path(path.name()).first_or_octet_stream();
        let response = self
            .connection
            .webdav_request(
                Method::PUT,
                path,
                Some(content.bytes.clone()),
                &[("Content-Type", mime.essence_str())],
            )
            .await?;
        let (_, response) = check_response(RemoteCall::Upload, response).await?;

        let created = response.status().as_u16() == 201;
        debug!("⬆️ Uploaded {} bytes to {} (created: {})", content.len(), path, created);
        Ok(UploadReceipt {
            path: path.clone(),
            bytes_written: content.len() as u64,
            created,
        })
    }

    async fn create_share(&self, path: &RemotePath, permission: SharePermission) -> OperationResult<ShareLink> {
        let request = CreateShareRequest::public_link(path, permission);
        let response = self
            .connection
            .ocs_share_request(Method::POST, Some(&request))
            .await?;
        let (_, response) = check_response(RemoteCall::ShareCreate, response).await?;
        let body = response.text().await?;
        parse_share_response(&body, path, permission)
    }

    /// Decoded path prefix that PROPFIND hrefs start with
    fn webdav_root_path(&self) -> String {
        let root = self.config().webdav_root_path();
        urlencoding::decode(&root)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(root)
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn into_remote_stream(response: Response, default_content_type: &str) -> RemoteStream {
    RemoteStream {
        content_type: content_type(&response).unwrap_or_else(|| default_content_type.to_string()),
        content_length: response.content_length(),
        stream: response
            .bytes_stream()
            .map(|chunk| chunk.map_err(NextcloudError::from))
            .boxed(),
    }
}

/// Converts one multistatus resource into a listing row. `root_path` is the
/// decoded WebDAV root, e.g. "/remote.php/dav/files/alice".
fn entry_from_resource(root_path: &str, resource: DavResource) -> OperationResult<DirectoryEntry> {
    let href = strip_origin(&resource.href);
    let relative = href
        .strip_prefix(root_path)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .ok_or_else(|| NextcloudError::protocol(format!("unexpected href in listing: {}", resource.href)))?;
    let path = RemotePath::from_server(relative);

    let name = resource
        .display_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| path.name().to_string());

    Ok(DirectoryEntry {
        name,
        path,
        is_directory: resource.is_collection,
        size: resource.content_length,
        last_modified: resource.last_modified,
        etag: resource.etag,
        mime_type: resource.content_type,
    })
}

/// Some servers send absolute hrefs; keep only the path
fn strip_origin(href: &str) -> &str {
    if let Some(rest) = href
        .strip_prefix("https://")
        .or_else(|| href.strip_prefix("http://"))
    {
        return rest.find('/').map(|idx| &rest[idx..]).unwrap_or("/");
    }
    href
}

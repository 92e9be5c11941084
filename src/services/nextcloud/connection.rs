use anyhow::Result;
use bytes::Bytes;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::NextcloudError;
use crate::webdav_xml_parser::parse_error_message;

use super::config::NextcloudConfig;
use super::paths::RemotePath;
use super::status::{self, Disposition, RemoteCall};

const USER_AGENT: &str = concat!("nextcloud-share/", env!("CARGO_PKG_VERSION"));

/// Longest remote error text carried into an error message
const MAX_REMOTE_MESSAGE: usize = 512;

/// PROPFIND depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    fn header_value(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Move,
    Copy,
}

impl TransferMethod {
    fn verb(&self) -> &'static str {
        match self {
            TransferMethod::Move => "MOVE",
            TransferMethod::Copy => "COPY",
        }
    }
}

/// What a streaming download should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    File(RemotePath),
    /// Folder packed into a zip archive by the server
    FolderZip(RemotePath),
}

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns" xmlns:nc="http://nextcloud.org/ns">
  <d:prop>
    <d:displayname/>
    <d:getcontenttype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// Pooled HTTP client bound to one Nextcloud account.
///
/// Issues exactly one remote call per method invocation and never retries.
pub struct NextcloudConnection {
    client: Client,
    config: NextcloudConfig,
}

impl NextcloudConnection {
    /// Validates the configuration and builds the connection pool
    pub fn open(config: NextcloudConfig) -> Result<Self> {
        config.validate()?;
        // The total deadline is set per request so streamed bodies are only
        // bounded by the idle read timeout.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()?;

        info!(
            "🔌 Opened Nextcloud connection pool for {} (user: {})",
            config.instance_url, config.username
        );

        Ok(Self { client, config })
    }

    /// Releases the connection pool
    pub fn close(self) {
        info!("🔌 Closing Nextcloud connection pool for {}", self.config.instance_url);
        drop(self.client);
    }

    pub fn config(&self) -> &NextcloudConfig {
        &self.config
    }

    /// Fully qualified WebDAV URL for a path
    pub fn url_for_path(&self, path: &RemotePath) -> String {
        let base_url = self.config.webdav_root_url();
        if path.is_root() {
            base_url
        } else {
            format!("{}/{}", base_url, path.to_url_path())
        }
    }

    fn authenticated(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
    }

    /// Plain WebDAV call (GET, PUT, MKCOL, DELETE)
    pub async fn webdav_request(
        &self,
        method: Method,
        path: &RemotePath,
        body: Option<Bytes>,
        headers: &[(&str, &str)],
    ) -> Result<Response, NextcloudError> {
        let request = self
            .webdav_builder(method, path, body, headers)
            .timeout(self.config.timeout());

        Ok(request.send().await?)
    }

    fn webdav_builder(
        &self,
        method: Method,
        path: &RemotePath,
        body: Option<Bytes>,
        headers: &[(&str, &str)],
    ) -> RequestBuilder {
        let url = self.url_for_path(path);
        debug!("➡️ {} {}", method, url);

        let mut request = self.authenticated(method, &url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        request
    }

    /// MOVE or COPY with an absolute Destination URL
    pub async fn webdav_move_or_copy(
        &self,
        method: TransferMethod,
        source: &RemotePath,
        destination: &RemotePath,
        overwrite: bool,
    ) -> Result<Response, NextcloudError> {
        let url = self.url_for_path(source);
        let destination_url = self.url_for_path(destination);
        debug!("➡️ {} {} -> {}", method.verb(), url, destination_url);

        let response = self
            .authenticated(dav_method(method.verb())?, &url)
            .header("Destination", destination_url)
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .timeout(self.config.timeout())
            .send()
            .await?;

        Ok(response)
    }

    pub async fn webdav_propfind(&self, path: &RemotePath, depth: Depth) -> Result<Response, NextcloudError> {
        let url = self.url_for_path(path);
        debug!("➡️ PROPFIND {} (depth {})", url, depth.header_value());

        let response = self
            .authenticated(dav_method("PROPFIND")?, &url)
            .header("Depth", depth.header_value())
            .header(header::CONTENT_TYPE, "application/xml")
            .body(PROPFIND_BODY)
            .timeout(self.config.timeout())
            .send()
            .await?;

        Ok(response)
    }

    /// Call against the OCS share API
    pub async fn ocs_share_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        body: Option<&T>,
    ) -> Result<Response, NextcloudError> {
        let url = self.config.ocs_shares_url();
        debug!("➡️ {} {}", method, url);

        let mut request = self
            .authenticated(method, &url)
            .query(&[("format", "json")])
            .header("OCS-APIRequest", "true")
            .header(header::ACCEPT, "application/json")
            .timeout(self.config.timeout());
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Starts a download whose body is left unread for the caller to stream.
    /// No total deadline applies; a stalled body fails on the read timeout.
    pub async fn stream_download(&self, target: &DownloadTarget) -> Result<Response, NextcloudError> {
        let request = match target {
            DownloadTarget::File(path) => self.webdav_builder(Method::GET, path, None, &[]),
            DownloadTarget::FolderZip(path) => {
                self.webdav_builder(Method::GET, path, None, &[("Accept", "application/zip")])
            }
        };

        Ok(request.send().await?)
    }
}

/// Checks a response against the statuses accepted for `call`. On failure
/// the body is read for the remote's message and the response is consumed.
pub async fn check_response(call: RemoteCall, response: Response) -> Result<(Disposition, Response), NextcloudError> {
    let status = response.status().as_u16();
    if let Some(disposition) = status::accepts(call, status) {
        return Ok((disposition, response));
    }

    let body = response.text().await.unwrap_or_default();
    Err(status::failure(status, remote_message(&body)))
}

/// Best human-readable explanation in an error body
pub fn remote_message(body: &str) -> String {
    if let Some(message) = parse_error_message(body) {
        return message;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.pointer("/ocs/meta/message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_REMOTE_MESSAGE) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

pub(crate) fn dav_method(name: &'static str) -> Result<Method, NextcloudError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| NextcloudError::protocol(format!("invalid method {}: {}", name, e)))
}

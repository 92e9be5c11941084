//! Test utilities: an in-memory Nextcloud served by wiremock and a router
//! wired against it.
//!
//! `FakeNextcloud` answers WebDAV (PUT, GET, MKCOL, DELETE, MOVE, COPY,
//! PROPFIND) and the OCS share endpoint from a shared tree, so multi-step
//! scenarios can be checked end to end. Tests that need a specific wire
//! response mount their own mock on the same server with a higher priority.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use wiremock::{matchers::any, Mock, MockServer, Respond, ResponseTemplate};

use crate::{
    config::Config,
    services::nextcloud::{NextcloudConfig, NextcloudService, RetryConfig},
    AppState,
};

pub const TEST_API_KEY: &str = "test-api-key";
pub const TEST_USERNAME: &str = "alice";
pub const TEST_PASSWORD: &str = "secret";
pub const TEST_USAGE_FOLDER: &str = "Agent Files";

const LAST_MODIFIED: &str = "Mon, 15 Jan 2024 10:30:00 GMT";
const SHARES_PATH: &str = "/ocs/v2.php/apps/files_sharing/api/v1/shares";

#[derive(Debug, Clone)]
struct StoredFile {
    content: Vec<u8>,
    content_type: String,
    etag: u64,
}

#[derive(Debug, Default)]
struct Storage {
    files: BTreeMap<String, StoredFile>,
    folders: BTreeSet<String>,
    share_failure: Option<u16>,
    counter: u64,
}

impl Storage {
    fn folder_exists(&self, key: &str) -> bool {
        key.is_empty() || self.folders.contains(key)
    }

    fn exists(&self, key: &str) -> bool {
        self.files.contains_key(key) || self.folder_exists(key)
    }

    fn parent_exists(&self, key: &str) -> bool {
        self.folder_exists(parent_of(key))
    }

    fn remove_tree(&mut self, key: &str) {
        let nested = format!("{}/", key);
        self.files.retain(|k, _| k != key && !k.starts_with(&nested));
        self.folders.retain(|k| k != key && !k.starts_with(&nested));
    }

    fn copy_tree(&mut self, from: &str, to: &str) {
        let nested = format!("{}/", from);
        let rename = |k: &str| format!("{}{}", to, &k[from.len()..]);

        let files: Vec<(String, StoredFile)> = self
            .files
            .iter()
            .filter(|(k, _)| k.as_str() == from || k.starts_with(&nested))
            .map(|(k, f)| (rename(k.as_str()), f.clone()))
            .collect();
        let folders: Vec<String> = self
            .folders
            .iter()
            .filter(|k| k.as_str() == from || k.starts_with(&nested))
            .map(|k| rename(k.as_str()))
            .collect();

        self.files.extend(files);
        self.folders.extend(folders);
    }

    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

/// In-memory Nextcloud account reachable through a wiremock server
#[derive(Clone)]
pub struct FakeNextcloud {
    storage: Arc<Mutex<Storage>>,
    root: String,
    authorization: String,
}

impl FakeNextcloud {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            storage: Arc::new(Mutex::new(Storage::default())),
            root: format!("/remote.php/dav/files/{}", urlencoding::encode(username)),
            authorization: format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            ),
        }
    }

    /// Adds a folder and all its ancestors. Paths are account-relative.
    pub fn add_folder(&self, path: &str) {
        let mut storage = self.storage.lock().unwrap();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            storage.folders.insert(current.clone());
        }
    }

    /// Adds a file, creating its parent folders
    pub fn add_file(&self, path: &str, content: &[u8]) {
        let key = path.trim_matches('/').to_string();
        self.add_folder(parent_of(&key));
        let mut storage = self.storage.lock().unwrap();
        let etag = storage.next_id();
        storage.files.insert(
            key.clone(),
            StoredFile {
                content: content.to_vec(),
                content_type: guess_content_type(&key),
                etag,
            },
        );
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let storage = self.storage.lock().unwrap();
        storage
            .files
            .get(path.trim_matches('/'))
            .map(|f| f.content.clone())
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.storage
            .lock()
            .unwrap()
            .folder_exists(path.trim_matches('/'))
    }

    /// Makes every share creation fail with the given HTTP status
    pub fn fail_shares_with(&self, status: u16) {
        self.storage.lock().unwrap().share_failure = Some(status);
    }

    fn key_for(&self, url_path: &str) -> Option<String> {
        let rest = url_path.strip_prefix(&self.root)?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        let decoded = urlencoding::decode(rest).ok()?;
        Some(decoded.trim_matches('/').to_string())
    }

    fn handle_webdav(&self, request: &wiremock::Request, key: String) -> ResponseTemplate {
        let mut storage = self.storage.lock().unwrap();
        match request.method.as_str() {
            "PUT" => {
                if storage.folder_exists(&key) {
                    return dav_error(405, "A collection exists at this path");
                }
                if !storage.parent_exists(&key) {
                    return dav_error(409, "Parent folder does not exist");
                }
                let created = !storage.files.contains_key(&key);
                let content_type = header_value(request, "content-type")
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let etag = storage.next_id();
                storage.files.insert(
                    key,
                    StoredFile {
                        content: request.body.clone(),
                        content_type,
                        etag,
                    },
                );
                ResponseTemplate::new(if created { 201 } else { 204 })
            }
            "GET" => {
                if let Some(file) = storage.files.get(&key) {
                    return ResponseTemplate::new(200)
                        .set_body_raw(file.content.clone(), &file.content_type);
                }
                if storage.folder_exists(&key) {
                    let wants_zip = header_value(request, "accept")
                        .map_or(false, |accept| accept.contains("application/zip"));
                    return if wants_zip {
                        ResponseTemplate::new(200).set_body_raw(empty_zip(), "application/zip")
                    } else {
                        ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html")
                    };
                }
                dav_error(404, &format!("File with name {} could not be located", key))
            }
            "MKCOL" => {
                if storage.exists(&key) {
                    return dav_error(405, "The resource you tried to create already exists");
                }
                if !storage.parent_exists(&key) {
                    return dav_error(409, "Parent node does not exist");
                }
                storage.folders.insert(key);
                ResponseTemplate::new(201)
            }
            "DELETE" => {
                if key.is_empty() || !storage.exists(&key) {
                    return dav_error(404, &format!("File with name {} could not be located", key));
                }
                storage.remove_tree(&key);
                ResponseTemplate::new(204)
            }
            "MOVE" | "COPY" => {
                let destination = header_value(request, "destination")
                    .and_then(|d| url::Url::parse(&d).ok())
                    .and_then(|d| self.key_for(d.path()));
                let Some(destination) = destination else {
                    return dav_error(400, "Destination header is missing or invalid");
                };
                if key.is_empty() || !storage.exists(&key) {
                    return dav_error(404, &format!("File with name {} could not be located", key));
                }
                let overwrite = header_value(request, "overwrite").map_or(true, |v| v != "F");
                let replaced = storage.exists(&destination);
                if replaced && !overwrite {
                    return dav_error(412, "Destination already exists and Overwrite is false");
                }
                if !storage.parent_exists(&destination) {
                    return dav_error(409, "Destination parent does not exist");
                }
                if replaced {
                    storage.remove_tree(&destination);
                }
                storage.copy_tree(&key, &destination);
                if request.method.as_str() == "MOVE" {
                    storage.remove_tree(&key);
                }
                ResponseTemplate::new(if replaced { 204 } else { 201 })
            }
            "PROPFIND" => {
                if !storage.folder_exists(&key) && !storage.files.contains_key(&key) {
                    return dav_error(404, &format!("File with name {} could not be located", key));
                }
                let depth_one = header_value(request, "depth").as_deref() == Some("1");
                ResponseTemplate::new(207).set_body_raw(
                    self.multistatus(&storage, &key, depth_one),
                    "application/xml; charset=utf-8",
                )
            }
            _ => ResponseTemplate::new(501),
        }
    }

    fn handle_share(&self, request: &wiremock::Request) -> ResponseTemplate {
        let mut storage = self.storage.lock().unwrap();
        if let Some(status) = storage.share_failure {
            return ResponseTemplate::new(status).set_body_string("Internal Server Error");
        }
        if request.method.as_str() != "POST" {
            return ResponseTemplate::new(405);
        }

        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let path = body["path"].as_str().unwrap_or_default().to_string();
        let permissions = body["permissions"].as_u64().unwrap_or(1);
        let key = path.trim_matches('/').to_string();
        if key.is_empty() || !storage.exists(&key) {
            return ResponseTemplate::new(404).set_body_json(json!({
                "ocs": {
                    "meta": {"status": "failure", "statuscode": 404, "message": "Wrong path, file/folder does not exist"},
                    "data": []
                }
            }));
        }

        let id = storage.next_id();
        ResponseTemplate::new(200).set_body_json(json!({
            "ocs": {
                "meta": {"status": "ok", "statuscode": 200, "message": "OK"},
                "data": {
                    "id": id.to_string(),
                    "share_type": 3,
                    "path": path,
                    "permissions": permissions,
                    "url": format!("https://cloud.example.com/s/share{}", id)
                }
            }
        }))
    }

    fn multistatus(&self, storage: &Storage, key: &str, depth_one: bool) -> String {
        let mut responses = Vec::new();
        match storage.files.get(key) {
            Some(file) => responses.push(self.file_response(key, file)),
            None => responses.push(self.folder_response(key)),
        }

        if depth_one && storage.folder_exists(key) {
            let is_child = |candidate: &str| !candidate.is_empty() && parent_of(candidate) == key;
            for folder in storage.folders.iter().filter(|f| is_child(f.as_str())) {
                responses.push(self.folder_response(folder));
            }
            for (path, file) in storage.files.iter().filter(|(f, _)| is_child(f.as_str())) {
                responses.push(self.file_response(path, file));
            }
        }

        format!(
            r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns" xmlns:oc="http://owncloud.org/ns" xmlns:nc="http://nextcloud.org/ns">{}</d:multistatus>"#,
            responses.join("")
        )
    }

    fn href(&self, key: &str, collection: bool) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        let mut href = self.root.clone();
        for segment in encoded {
            href.push('/');
            href.push_str(&segment);
        }
        if collection {
            href.push('/');
        }
        href
    }

    fn folder_response(&self, key: &str) -> String {
        format!(
            r#"<d:response><d:href>{}</d:href><d:propstat><d:prop><d:getlastmodified>{}</d:getlastmodified><d:resourcetype><d:collection/></d:resourcetype></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat><d:propstat><d:prop><d:getcontentlength/><d:getcontenttype/></d:prop><d:status>HTTP/1.1 404 Not Found</d:status></d:propstat></d:response>"#,
            self.href(key, true),
            LAST_MODIFIED
        )
    }

    fn file_response(&self, key: &str, file: &StoredFile) -> String {
        format!(
            r#"<d:response><d:href>{}</d:href><d:propstat><d:prop><d:getlastmodified>{}</d:getlastmodified><d:getcontentlength>{}</d:getcontentlength><d:resourcetype/><d:getetag>"{}"</d:getetag><d:getcontenttype>{}</d:getcontenttype></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"#,
            self.href(key, false),
            LAST_MODIFIED,
            file.content.len(),
            file.etag,
            file.content_type
        )
    }
}

impl Respond for FakeNextcloud {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        if header_value(request, "authorization").as_deref() != Some(self.authorization.as_str()) {
            return dav_error(401, "No public access to this resource.");
        }

        let path = request.url.path();
        if path == SHARES_PATH {
            return self.handle_share(request);
        }
        match self.key_for(path) {
            Some(key) => self.handle_webdav(request, key),
            None => ResponseTemplate::new(404),
        }
    }
}

fn parent_of(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn header_value(request: &wiremock::Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn dav_error(status: u16, message: &str) -> ResponseTemplate {
    let body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:error xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns">
  <s:exception>Sabre\DAV\Exception</s:exception>
  <s:message>{}</s:message>
</d:error>"#,
        message
    );
    ResponseTemplate::new(status).set_body_raw(body, "application/xml; charset=utf-8")
}

/// End-of-central-directory record of an archive with no entries
fn empty_zip() -> Vec<u8> {
    let mut zip = vec![0x50, 0x4b, 0x05, 0x06];
    zip.extend_from_slice(&[0u8; 18]);
    zip
}

/// Knobs for a test context
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    usage_folder: Option<String>,
    password: String,
    retry: RetryConfig,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self {
            usage_folder: Some(TEST_USAGE_FOLDER.to_string()),
            password: TEST_PASSWORD.to_string(),
            retry: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            },
        }
    }
}

impl TestConfigBuilder {
    pub fn without_usage_folder(mut self) -> Self {
        self.usage_folder = None;
        self
    }

    /// Password the service sends; the fake still expects `TEST_PASSWORD`
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn build(self, instance_url: String) -> Config {
        let mut nextcloud = NextcloudConfig::new(
            instance_url,
            TEST_USERNAME.to_string(),
            self.password,
            self.usage_folder,
        );
        nextcloud.timeout_seconds = 5;
        nextcloud.connect_timeout_seconds = 2;

        Config {
            server_address: "127.0.0.1:0".to_string(),
            api_key: TEST_API_KEY.to_string(),
            nextcloud,
            retry: self.retry,
        }
    }
}

/// Router and service talking to a fresh fake Nextcloud
pub struct TestContext {
    pub server: MockServer,
    pub fake: FakeNextcloud,
    pub state: Arc<AppState>,
    pub app: Router,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(TestConfigBuilder::default()).await
    }

    pub async fn with_config(config_builder: TestConfigBuilder) -> Self {
        let server = MockServer::start().await;
        let fake = FakeNextcloud::new(TEST_USERNAME, TEST_PASSWORD);
        if let Some(folder) = &config_builder.usage_folder {
            fake.add_folder(folder);
        }
        Mock::given(any())
            .respond_with(fake.clone())
            .with_priority(10)
            .mount(&server)
            .await;

        let config = config_builder.build(server.uri());
        let nextcloud = NextcloudService::new(config.nextcloud.clone())
            .expect("Failed to open Nextcloud service");
        let state = Arc::new(AppState { config, nextcloud });
        let app = crate::routes::api_router().with_state(state.clone());

        Self {
            server,
            fake,
            state,
            app,
        }
    }

    pub fn service(&self) -> &NextcloudService {
        &self.state.nextcloud
    }

    /// Every request the fake server has seen so far
    pub async fn remote_requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Sends a request through the router and collects the whole response
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        (status, headers, body)
    }

    /// Sends an authorized request and parses the JSON response
    pub async fn send_json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = authorized_request(method, uri, body);
        let (status, _, bytes) = self.send(request).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

/// Request carrying the test bearer token
pub fn authorized_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TEST_API_KEY));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("Failed to build request"),
        None => builder.body(Body::empty()).expect("Failed to build request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree_renames_nested_entries() {
        let mut storage = Storage::default();
        storage.folders.insert("a".to_string());
        storage.folders.insert("a/b".to_string());
        storage.files.insert(
            "a/b/c.txt".to_string(),
            StoredFile {
                content: b"x".to_vec(),
                content_type: "text/plain".to_string(),
                etag: 1,
            },
        );
        storage.folders.insert("ab".to_string());

        storage.copy_tree("a", "z");
        assert!(storage.folders.contains("z/b"));
        assert!(storage.files.contains_key("z/b/c.txt"));
        assert!(!storage.folders.contains("zb"));

        storage.remove_tree("a");
        assert!(!storage.files.contains_key("a/b/c.txt"));
        assert!(storage.folders.contains("ab"));
    }

    #[test]
    fn test_key_for_decodes_and_scopes_to_account() {
        let fake = FakeNextcloud::new("alice", "secret");
        assert_eq!(
            fake.key_for("/remote.php/dav/files/alice/Agent%20Files/a.txt"),
            Some("Agent Files/a.txt".to_string())
        );
        assert_eq!(fake.key_for("/remote.php/dav/files/alice"), Some(String::new()));
        assert_eq!(fake.key_for("/remote.php/dav/files/alicex/a"), None);
    }
}

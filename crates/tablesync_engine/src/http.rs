//! REST transport implementation.
//!
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, ureq, a scripted client in tests). Message
//! bodies are JSON; attachment batches use multipart encoding.

use crate::error::{SyncError, SyncResult};
use crate::multipart;
use crate::transport::{AttachmentFile, ManifestOutcome, ManifestScope, Synchronizer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tablesync_protocol::{
    AlterRowsRequest, AlterRowsResponse, ChangeSetPage, FileManifestDocument, TableDefinition,
    TableResource,
};

/// Protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2";

/// Header carrying the protocol revision in both directions.
pub const VERSION_HEADER: &str = "X-TableSync-Version";

/// One outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: &'static str,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

/// One inbound HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client abstraction.
///
/// Implementations must NOT follow redirects: a redirect is how captive
/// portals and misconfigured proxies answer, and the synchronizer treats
/// it as talking to the wrong server.
pub trait HttpClient: Send + Sync {
    /// Executes a request and returns the raw response.
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// REST-based synchronizer.
pub struct RestSynchronizer<C: HttpClient> {
    base_url: String,
    client: C,
    access_token: Option<String>,
}

impl<C: HttpClient> RestSynchronizer<C> {
    /// Creates a synchronizer against the given base URL.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client,
            access_token: None,
        }
    }

    /// Sets a bearer token sent with every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send(
        &self,
        method: &'static str,
        path: &str,
        mut headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> SyncResult<HttpResponse> {
        headers.push((VERSION_HEADER.to_string(), PROTOCOL_VERSION.to_string()));
        if let Some(token) = &self.access_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        let request = HttpRequest {
            method,
            url: format!("{}{path}", self.base_url),
            headers,
            body,
        };
        let response = self
            .client
            .execute(request)
            .map_err(SyncError::transport_retryable)?;

        // A redirect means an intermediary answered in the server's place.
        if (300..400).contains(&response.status) {
            return Err(SyncError::IncompatibleServer(format!(
                "request was redirected (status {})",
                response.status
            )));
        }
        match response.header(VERSION_HEADER) {
            Some(v) if v == PROTOCOL_VERSION => {}
            Some(v) => {
                return Err(SyncError::IncompatibleServer(format!(
                    "server speaks protocol revision {v}, client speaks {PROTOCOL_VERSION}"
                )))
            }
            None => {
                return Err(SyncError::IncompatibleServer(
                    "response carries no protocol revision header".into(),
                ))
            }
        }
        match response.status {
            200..=299 | 304 => Ok(response),
            401 | 403 => Err(SyncError::AuthenticationFailed(format!(
                "status {}",
                response.status
            ))),
            500..=599 => Err(SyncError::ServerError(format!(
                "status {}",
                response.status
            ))),
            status => Err(SyncError::Protocol(format!("unexpected status {status}"))),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let response = self.send("GET", path, Vec::new(), Vec::new())?;
        decode_json(&response.body)
    }

    fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        body: &B,
    ) -> SyncResult<T> {
        let encoded = serde_json::to_vec(body)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let response = self.send(method, path, headers, encoded)?;
        decode_json(&response.body)
    }

    fn manifest_path(scope: &ManifestScope) -> String {
        match scope {
            ManifestScope::App => "/manifest/app".to_string(),
            ManifestScope::Table(table_id) => format!("/manifest/table/{table_id}"),
        }
    }

    fn file_path(scope: &ManifestScope, relative_path: &str) -> String {
        match scope {
            ManifestScope::App => format!("/files/app/{relative_path}"),
            ManifestScope::Table(table_id) => format!("/files/table/{table_id}/{relative_path}"),
        }
    }
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> SyncResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
}

impl<C: HttpClient> Synchronizer for RestSynchronizer<C> {
    fn list_tables(&self) -> SyncResult<Vec<TableResource>> {
        self.get_json("/tables")
    }

    fn get_table_definition(&self, table_id: &str) -> SyncResult<TableDefinition> {
        self.get_json(&format!("/tables/{table_id}"))
    }

    fn create_table(&self, definition: &TableDefinition) -> SyncResult<TableResource> {
        self.send_json("PUT", &format!("/tables/{}", definition.table_id), definition)
    }

    fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        self.send("DELETE", &format!("/tables/{table_id}"), Vec::new(), Vec::new())?;
        Ok(())
    }

    fn get_manifest(
        &self,
        scope: &ManifestScope,
        cached_etag: Option<&str>,
    ) -> SyncResult<ManifestOutcome> {
        let mut headers = Vec::new();
        if let Some(etag) = cached_etag {
            headers.push(("If-None-Match".to_string(), etag.to_string()));
        }
        let response = self.send("GET", &Self::manifest_path(scope), headers, Vec::new())?;
        if response.status == 304 {
            return Ok(ManifestOutcome::NotModified);
        }
        Ok(ManifestOutcome::Changed(decode_json(&response.body)?))
    }

    fn download_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
    ) -> SyncResult<Vec<u8>> {
        let response = self.send(
            "GET",
            &Self::file_path(scope, relative_path),
            Vec::new(),
            Vec::new(),
        )?;
        Ok(response.body)
    }

    fn upload_config_file(
        &self,
        scope: &ManifestScope,
        relative_path: &str,
        content: &[u8],
    ) -> SyncResult<()> {
        let headers = vec![(
            "Content-Type".to_string(),
            "application/octet-stream".to_string(),
        )];
        self.send(
            "POST",
            &Self::file_path(scope, relative_path),
            headers,
            content.to_vec(),
        )?;
        Ok(())
    }

    fn delete_config_file(&self, scope: &ManifestScope, relative_path: &str) -> SyncResult<()> {
        self.send(
            "DELETE",
            &Self::file_path(scope, relative_path),
            Vec::new(),
            Vec::new(),
        )?;
        Ok(())
    }

    fn get_changes(
        &self,
        table_id: &str,
        data_etag: Option<&str>,
        cursor: Option<&str>,
    ) -> SyncResult<ChangeSetPage> {
        let mut path = format!("/tables/{table_id}/changes");
        let mut sep = '?';
        if let Some(etag) = data_etag {
            path.push_str(&format!("{sep}dataETag={etag}"));
            sep = '&';
        }
        if let Some(cursor) = cursor {
            path.push_str(&format!("{sep}cursor={cursor}"));
        }
        self.get_json(&path)
    }

    fn alter_rows(
        &self,
        table_id: &str,
        request: &AlterRowsRequest,
    ) -> SyncResult<AlterRowsResponse> {
        self.send_json("PUT", &format!("/tables/{table_id}/rows"), request)
    }

    fn get_attachment_manifest(
        &self,
        table_id: &str,
        row_id: &str,
    ) -> SyncResult<FileManifestDocument> {
        self.get_json(&format!("/tables/{table_id}/attachments/{row_id}/manifest"))
    }

    fn download_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        relative_paths: &[String],
    ) -> SyncResult<Vec<AttachmentFile>> {
        let body = serde_json::to_vec(relative_paths)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let response = self.send(
            "POST",
            &format!("/tables/{table_id}/attachments/{row_id}/download"),
            headers,
            body,
        )?;
        let content_type = response
            .header("Content-Type")
            .ok_or_else(|| SyncError::Protocol("batch response has no content type".into()))?;
        let boundary = content_type
            .split("boundary=")
            .nth(1)
            .ok_or_else(|| SyncError::Protocol("batch response has no boundary".into()))?
            .to_string();
        multipart::decode_batch(&boundary, &response.body)
    }

    fn upload_attachments(
        &self,
        table_id: &str,
        row_id: &str,
        files: &[AttachmentFile],
    ) -> SyncResult<()> {
        let boundary = multipart::make_boundary();
        let body = multipart::encode_batch(&boundary, files);
        let headers = vec![("Content-Type".to_string(), multipart::content_type(&boundary))];
        self.send(
            "POST",
            &format!("/tables/{table_id}/attachments/{row_id}/upload"),
            headers,
            body,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for ScriptedClient {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err("no scripted response".into());
            }
            Ok(responses.remove(0))
        }
    }

    fn versioned(status: u16, body: &[u8]) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![(VERSION_HEADER.to_string(), PROTOCOL_VERSION.to_string())],
            body: body.to_vec(),
        }
    }

    #[test]
    fn redirect_is_incompatible_server() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 302,
            headers: vec![("Location".to_string(), "http://portal".to_string())],
            body: Vec::new(),
        }]);
        let sync = RestSynchronizer::new("https://srv/tablesync/default", client);
        let err = sync.list_tables().unwrap_err();
        assert!(matches!(err, SyncError::IncompatibleServer(_)));
    }

    #[test]
    fn missing_version_header_is_incompatible_server() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"[]".to_vec(),
        }]);
        let sync = RestSynchronizer::new("https://srv", client);
        let err = sync.list_tables().unwrap_err();
        assert!(matches!(err, SyncError::IncompatibleServer(_)));
    }

    #[test]
    fn wrong_version_is_incompatible_server() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 200,
            headers: vec![(VERSION_HEADER.to_string(), "1".to_string())],
            body: b"[]".to_vec(),
        }]);
        let sync = RestSynchronizer::new("https://srv", client);
        let err = sync.list_tables().unwrap_err();
        assert!(matches!(err, SyncError::IncompatibleServer(_)));
    }

    #[test]
    fn unauthorized_maps_to_authentication_failed() {
        let client = ScriptedClient::new(vec![versioned(401, b"")]);
        let sync = RestSynchronizer::new("https://srv", client);
        let err = sync.list_tables().unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    }

    #[test]
    fn server_error_is_retryable() {
        let client = ScriptedClient::new(vec![versioned(503, b"")]);
        let sync = RestSynchronizer::new("https://srv", client);
        let err = sync.list_tables().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn manifest_not_modified_short_circuits() {
        let client = ScriptedClient::new(vec![versioned(304, b"")]);
        let sync = RestSynchronizer::new("https://srv", client);
        let outcome = sync
            .get_manifest(&ManifestScope::App, Some("m1"))
            .unwrap();
        assert!(matches!(outcome, ManifestOutcome::NotModified));
    }

    #[test]
    fn manifest_request_carries_if_none_match_and_version() {
        let client = ScriptedClient::new(vec![versioned(304, b"")]);
        let sync = RestSynchronizer::new("https://srv/", client);
        sync.get_manifest(&ManifestScope::Table("t".into()), Some("m1"))
            .unwrap();
        let requests = sync.client.requests.lock();
        let request = &requests[0];
        assert_eq!(request.url, "https://srv/manifest/table/t");
        assert!(request
            .headers
            .iter()
            .any(|(n, v)| n == "If-None-Match" && v == "m1"));
        assert!(request
            .headers
            .iter()
            .any(|(n, v)| n == VERSION_HEADER && v == PROTOCOL_VERSION));
    }

    #[test]
    fn bearer_token_is_attached() {
        let client = ScriptedClient::new(vec![versioned(200, b"[]")]);
        let sync = RestSynchronizer::new("https://srv", client).with_access_token("tok");
        sync.list_tables().unwrap();
        let requests = sync.client.requests.lock();
        assert!(requests[0]
            .headers
            .iter()
            .any(|(n, v)| n == "Authorization" && v == "Bearer tok"));
    }

    #[test]
    fn attachment_download_decodes_multipart() {
        let files = vec![AttachmentFile {
            relative_path: "photo.jpg".into(),
            content: b"jpeg".to_vec(),
        }];
        let boundary = "b1";
        let mut response = versioned(200, &multipart::encode_batch(boundary, &files));
        response.headers.push((
            "Content-Type".to_string(),
            multipart::content_type(boundary),
        ));
        let client = ScriptedClient::new(vec![response]);
        let sync = RestSynchronizer::new("https://srv", client);
        let decoded = sync
            .download_attachments("t", "r1", &["photo.jpg".to_string()])
            .unwrap();
        assert_eq!(decoded, files);
    }
}

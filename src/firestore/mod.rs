/// Firestore Document Store
///
/// `DocumentStore` backed by the Firestore v1 REST API. Every read runs
/// inside a server-side read-write transaction; writes are buffered locally
/// and sent in a single `commit`, which Firestore applies atomically or not
/// at all.

pub mod auth;
pub mod codec;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde_json::{json, Value as Json};
use tracing::{debug, info};
use crate::config::FirestoreSettings;
use crate::document::{Document, DocumentUpdate, Value};
use crate::metrics;
use crate::path::{CollectionPath, DocumentPath};
use crate::store::{DocumentStore, StoreError, Transaction};
use crate::telemetry::truncate_id;
use self::auth::{CredentialsError, ServiceAccountKey, TokenProvider};
use self::codec::ResourceNames;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const EMULATOR_HOST_ENV: &str = "FIRESTORE_EMULATOR_HOST";
pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";

/// Pick the project id: explicit value, then the key file, then the
/// environment.
pub fn resolve_project_id(explicit: Option<&str>, key: Option<&ServiceAccountKey>) -> Option<String> {
    explicit
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(|| key.and_then(|k| k.project_id.clone()).filter(|p| !p.is_empty()))
        .or_else(|| std::env::var(PROJECT_ENV).ok().filter(|p| !p.is_empty()))
}

/// Emulator host from the environment, if any.
pub fn emulator_host_from_env() -> Option<String> {
    std::env::var(EMULATOR_HOST_ENV)
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

struct Client {
    http: reqwest::Client,
    base_url: String,
    names: ResourceNames,
    tokens: TokenProvider,
}

#[derive(Clone)]
pub struct FirestoreStore {
    client: Arc<Client>,
}

impl FirestoreStore {
    /// Store authenticated with a service account key.
    pub fn with_service_account(
        project_id: &str,
        settings: &FirestoreSettings,
        key: ServiceAccountKey,
    ) -> Result<Self, CredentialsError> {
        let http = build_http(settings.request_timeout_secs, true);
        let tokens = TokenProvider::service_account(key, http.clone())?;
        Ok(Self::build(project_id, settings, DEFAULT_BASE_URL.to_string(), http, tokens))
    }

    /// Store talking to a local emulator (`host:port`).
    pub fn with_emulator(project_id: &str, settings: &FirestoreSettings, host: &str) -> Self {
        // Emulators run on a local host; system proxies do not apply
        let http = build_http(settings.request_timeout_secs, false);
        let tokens = TokenProvider::emulator(http.clone());
        Self::build(project_id, settings, format!("http://{}/v1", host), http, tokens)
    }

    fn build(
        project_id: &str,
        settings: &FirestoreSettings,
        base_url: String,
        http: reqwest::Client,
        tokens: TokenProvider,
    ) -> Self {
        let names = ResourceNames::new(project_id, &settings.database_id);
        info!(database = %names.database(), base_url = %base_url, "Firestore store configured");
        Self {
            client: Arc::new(Client {
                http,
                base_url,
                names,
                tokens,
            }),
        }
    }

    pub fn names(&self) -> &ResourceNames {
        &self.client.names
    }
}

fn build_http(timeout_secs: u64, use_proxy: bool) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("rewardtools/", env!("CARGO_PKG_VERSION")));
    if !use_proxy {
        builder = builder.no_proxy();
    }
    builder
        .build()
        // Only fails if the TLS backend cannot initialize
        .unwrap_or_else(|_| reqwest::Client::new())
}

impl Client {
    /// URL of a resource below the database. Each segment is
    /// percent-encoded on its own; document ids may contain `?`, `#` or `%`.
    fn url<I, S>(&self, segments: I) -> Result<Url, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::InvalidArgument(format!("bad base url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidArgument(format!("base url cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(self.names.database_segments())
            .extend(segments);
        Ok(url)
    }

    /// Send with auth and return the status plus raw body.
    async fn send_raw(&self, request: RequestBuilder) -> Result<(StatusCode, String), StoreError> {
        let token = self.tokens.bearer().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Send, record metrics, and decode a successful JSON body.
    async fn call(&self, op: &'static str, request: RequestBuilder) -> Result<Json, StoreError> {
        let timer = metrics::Timer::new();
        let result = self.send_raw(request).await.and_then(|(status, body)| {
            if status.is_success() {
                serde_json::from_str(&body)
                    .map_err(|e| StoreError::Decode(format!("{} response: {}", op, e)))
            } else {
                let (code, message) = codec::parse_rpc_status(status.as_u16(), &body);
                Err(codec::status_error(&code, message))
            }
        });
        metrics::record_store_request(op, result.is_ok(), timer.elapsed_secs());
        result
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    type Tx = FirestoreTransaction;

    async fn begin(&self) -> Result<FirestoreTransaction, StoreError> {
        let client = &self.client;
        let url = client.url(["documents:beginTransaction"])?;
        let body = json!({ "options": { "readWrite": {} } });

        let response = client.call("begin", client.http.post(url).json(&body)).await?;
        let id = response
            .get("transaction")
            .and_then(Json::as_str)
            .ok_or_else(|| StoreError::Decode("beginTransaction returned no transaction".to_string()))?
            .to_string();

        debug!(transaction = %truncate_id(&id, 16), "Transaction started");
        Ok(FirestoreTransaction {
            client: self.client.clone(),
            id,
            writes: Vec::new(),
        })
    }
}

enum StagedWrite {
    Update(DocumentPath, DocumentUpdate),
    Delete(DocumentPath),
}

pub struct FirestoreTransaction {
    client: Arc<Client>,
    id: String,
    writes: Vec<StagedWrite>,
}

#[async_trait]
impl Transaction for FirestoreTransaction {
    async fn get(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        // batchGet reports a missing document as `missing`; a plain GET
        // answers 404 for both a missing document and a missing database.
        let client = &self.client;
        let url = client.url(["documents:batchGet"])?;
        let body = json!({
            "documents": [client.names.document(path)],
            "transaction": self.id,
        });

        let response = client.call("get", client.http.post(url).json(&body)).await?;
        let doc = codec::decode_batch_get(&response, &client.names)?;

        debug!(path = %path, found = doc.is_some(), "Read document");
        Ok(doc)
    }

    async fn query_equal(
        &mut self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let client = &self.client;
        let url = client.url(client.names.query_segments(collection))?;
        let body = json!({
            "structuredQuery": codec::encode_equality_query(collection, field, value, &client.names),
            "transaction": self.id,
        });

        let response = client.call("query", client.http.post(url).json(&body)).await?;
        let docs = codec::decode_query_results(&response, &client.names)?;

        debug!(collection = %collection, field = field, matches = docs.len(), "Ran equality query");
        Ok(docs)
    }

    fn update(&mut self, path: &DocumentPath, update: DocumentUpdate) {
        self.writes.push(StagedWrite::Update(path.clone(), update));
    }

    fn delete(&mut self, path: &DocumentPath) {
        self.writes.push(StagedWrite::Delete(path.clone()));
    }

    fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        let client = &self.client;
        let writes: Vec<Json> = self
            .writes
            .iter()
            .map(|write| match write {
                StagedWrite::Update(path, update) => codec::encode_update_write(path, update, &client.names),
                StagedWrite::Delete(path) => codec::encode_delete_write(path, &client.names),
            })
            .collect();

        let url = client.url(["documents:commit"])?;
        let body = json!({ "writes": writes, "transaction": self.id });

        let result = client.call("commit", client.http.post(url).json(&body)).await;
        match result {
            Ok(response) => {
                info!(
                    writes = self.writes.len(),
                    commit_time = response.get("commitTime").and_then(Json::as_str).unwrap_or(""),
                    "Transaction committed"
                );
                Ok(())
            }
            // An update whose `exists` precondition fails comes back as NOT_FOUND
            Err(StoreError::NotFound(message)) => Err(StoreError::PreconditionFailed(message)),
            Err(e) => Err(e),
        }
    }

    async fn rollback(self) -> Result<(), StoreError> {
        let client = &self.client;
        let url = client.url(["documents:rollback"])?;
        let body = json!({ "transaction": self.id });

        client.call("rollback", client.http.post(url).json(&body)).await?;
        debug!(transaction = %truncate_id(&self.id, 16), discarded = self.writes.len(), "Transaction rolled back");
        Ok(())
    }
}

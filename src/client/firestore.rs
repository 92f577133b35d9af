//! Firestore backend over the REST API.
//!
//! Documents are addressed as
//! `projects/{project}/databases/{database}/documents/{collection}/{id}`.
//! Upsert transactions use `beginTransaction`/`commit`; a commit that loses
//! to a concurrent writer comes back `ABORTED` and the body is re-run. Init
//! batches use `batchWrite`, which applies writes independently.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{DocumentClient, RetryPolicy, TxBody, TxDecision, TxOutcome, WriteOp, WriteResults};
use crate::document::{Fields, FIELD_NAMESPACE};
use crate::error::{ClientError, Error, Result};

const PRODUCTION_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

/// Connection parameters for [`FirestoreClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreOptions {
    pub database: String,
    /// `host:port` of a Firestore emulator; plain HTTP is used when set.
    pub emulator_host: Option<String>,
    /// OAuth2 bearer token. Emulator connections default to `owner`.
    pub access_token: Option<String>,
}

impl Default for FirestoreOptions {
    fn default() -> Self {
        Self {
            database: "(default)".to_string(),
            emulator_host: None,
            access_token: None,
        }
    }
}

pub struct FirestoreClient {
    http: reqwest::Client,
    endpoint: String,
    database_path: String,
    token: Option<String>,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct RestDocument {
    name: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct QueryResponseItem {
    document: Option<RestDocument>,
}

#[derive(Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

#[derive(Deserialize, Default)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct BatchWriteResponse {
    #[serde(default)]
    status: Vec<RpcStatus>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

impl FirestoreClient {
    pub fn new(project_id: &str, options: FirestoreOptions) -> std::result::Result<Self, ClientError> {
        if project_id.is_empty() {
            return Err(ClientError::Codec("project ID is required".to_string()));
        }
        let (endpoint, token) = match &options.emulator_host {
            Some(host) => (
                format!("http://{}/v1", host),
                options.access_token.clone().or_else(|| Some("owner".to_string())),
            ),
            None => (PRODUCTION_ENDPOINT.to_string(), options.access_token.clone()),
        };
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            endpoint,
            database_path: format!("projects/{}/databases/{}", project_id, options.database),
            token,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> std::result::Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    /// Full resource name of a document. The id is used verbatim, as it is
    /// in request URLs once the server decodes the path.
    fn document_name(&self, collection: &str, id: &str) -> std::result::Result<String, ClientError> {
        Ok(format!(
            "{}/documents/{}/{}",
            self.database_path,
            collection,
            valid_document_id(id)?
        ))
    }

    /// URL for `path` relative to the endpoint; each `/`-separated part of
    /// `path` becomes one percent-encoded segment, then `extra` segments follow.
    fn url(&self, path: &str, extra: &[&str]) -> std::result::Result<Url, ClientError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ClientError::Codec(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Codec(format!("endpoint {} cannot be a base", self.endpoint)))?
            .extend(path.split('/'))
            .extend(extra);
        Ok(url)
    }

    fn fetch_url(&self, collection: &str, id: &str) -> std::result::Result<Url, ClientError> {
        self.url(&self.database_path, &["documents", collection, valid_document_id(id)?])
    }

    fn rpc_url(&self, method: &str) -> std::result::Result<Url, ClientError> {
        self.url(&format!("{}/documents:{}", self.database_path, method), &[])
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> std::result::Result<reqwest::Response, ClientError> {
        self.ensure_open()?;
        let mut request = self.http.request(method, url);
        if let Some(ref t) = self.token {
            request = request.bearer_auth(t);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        Ok(request.send().await?)
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) if envelope.error.status == "ABORTED" => {
                ClientError::Conflict(envelope.error.message)
            }
            Ok(envelope) => ClientError::Status {
                code: envelope.error.status,
                message: envelope.error.message,
            },
            Err(_) => ClientError::Status {
                code: status.to_string(),
                message: text,
            },
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> std::result::Result<T, ClientError> {
        let response = self.send(Method::POST, self.rpc_url(method)?, Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch(
        &self,
        collection: &str,
        id: &str,
        transaction: Option<&str>,
    ) -> std::result::Result<Option<Fields>, ClientError> {
        let mut url = self.fetch_url(collection, id)?;
        if let Some(t) = transaction {
            url.query_pairs_mut().append_pair("transaction", t);
        }
        let response = self.send(Method::GET, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let doc: RestDocument = response.json().await?;
        Ok(Some(decode_fields(&doc.fields)?))
    }

    async fn run_query(
        &self,
        collection: &str,
        namespace: &str,
        ids_only: bool,
    ) -> std::result::Result<Vec<(String, Fields)>, ClientError> {
        let mut query = json!({
            "from": [{ "collectionId": collection }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": FIELD_NAMESPACE },
                    "op": "EQUAL",
                    "value": { "stringValue": namespace },
                }
            },
        });
        if ids_only {
            query["select"] = json!({ "fields": [{ "fieldPath": "__name__" }] });
        }
        let items: Vec<QueryResponseItem> =
            self.call("runQuery", json!({ "structuredQuery": query })).await?;

        items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|doc| -> std::result::Result<(String, Fields), ClientError> {
                Ok((document_id(&doc.name).to_string(), decode_fields(&doc.fields)?))
            })
            .collect()
    }

    fn write_json(&self, collection: &str, op: &WriteOp) -> std::result::Result<Value, ClientError> {
        Ok(match op {
            WriteOp::Set { id, fields } => json!({
                "update": {
                    "name": self.document_name(collection, id)?,
                    "fields": encode_fields(fields),
                }
            }),
            WriteOp::Delete { id } => json!({ "delete": self.document_name(collection, id)? }),
        })
    }

    async fn attempt(
        &self,
        collection: &str,
        id: &str,
        previous: Option<&str>,
        body: &TxBody<'_>,
    ) -> Result<(String, std::result::Result<TxOutcome, ClientError>)> {
        let op = || format!("update {id}");
        valid_document_id(id).map_err(|e| Error::client(op(), e))?;
        let mut read_write = json!({});
        if let Some(p) = previous {
            read_write["retryTransaction"] = json!(p);
        }
        let begun: BeginTransactionResponse = self
            .call("beginTransaction", json!({ "options": { "readWrite": read_write } }))
            .await
            .map_err(|e| Error::client(op(), e))?;
        let transaction = begun.transaction;

        let current = self
            .fetch(collection, id, Some(&transaction))
            .await
            .map_err(|e| Error::client(op(), e))?;

        let decision = match body(current.as_ref()) {
            Ok(decision) => decision,
            Err(e) => {
                self.rollback(&transaction).await.map_err(|e| Error::client(op(), e))?;
                return Err(e);
            }
        };

        let outcome = match decision {
            TxDecision::Abort => self
                .rollback(&transaction)
                .await
                .map(|_| TxOutcome::Aborted),
            TxDecision::Write(fields) => {
                let write = self
                    .write_json(collection, &WriteOp::Set { id: id.to_string(), fields })
                    .map_err(|e| Error::client(op(), e))?;
                self.call::<Value>("commit", json!({ "writes": [write], "transaction": transaction }))
                    .await
                    .map(|_| TxOutcome::Committed)
            }
        };
        Ok((transaction, outcome))
    }

    async fn rollback(&self, transaction: &str) -> std::result::Result<(), ClientError> {
        self.call::<Value>("rollback", json!({ "transaction": transaction }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl DocumentClient for FirestoreClient {
    fn backend_name(&self) -> &'static str {
        "Firestore"
    }

    async fn get(&self, collection: &str, id: &str) -> std::result::Result<Option<Fields>, ClientError> {
        self.fetch(collection, id, None).await
    }

    async fn list_ids(
        &self,
        collection: &str,
        namespace: &str,
    ) -> std::result::Result<Vec<String>, ClientError> {
        Ok(self
            .run_query(collection, namespace, true)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    async fn query(
        &self,
        collection: &str,
        namespace: &str,
    ) -> std::result::Result<Vec<(String, Fields)>, ClientError> {
        self.run_query(collection, namespace, false).await
    }

    async fn transact(
        &self,
        collection: &str,
        id: &str,
        policy: RetryPolicy,
        body: &TxBody<'_>,
    ) -> Result<TxOutcome> {
        let attempts = policy.max_attempts.max(1);
        let mut previous: Option<String> = None;
        for _ in 0..attempts {
            let (transaction, outcome) = self.attempt(collection, id, previous.as_deref(), body).await?;
            match outcome {
                Ok(outcome) => return Ok(outcome),
                Err(ClientError::Conflict(_)) => previous = Some(transaction),
                Err(e) => return Err(Error::client(format!("update {id}"), e)),
            }
        }
        Err(Error::TransactionContention {
            id: id.to_string(),
            attempts,
        })
    }

    async fn write_batch(
        &self,
        collection: &str,
        ops: &[WriteOp],
    ) -> std::result::Result<WriteResults, ClientError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let writes = ops
            .iter()
            .map(|op| self.write_json(collection, op))
            .collect::<std::result::Result<Vec<Value>, _>>()?;
        let response: BatchWriteResponse = self.call("batchWrite", json!({ "writes": writes })).await?;

        Ok((0..ops.len())
            .map(|i| match response.status.get(i) {
                Some(s) if s.code != 0 => Err(ClientError::Status {
                    code: s.code.to_string(),
                    message: s.message.clone(),
                }),
                _ => Ok(()),
            })
            .collect())
    }

    async fn close(&self) -> std::result::Result<(), ClientError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Firestore document ids may not contain `/`, be `.` or `..`, or match
/// `__.*__`. Such ids would resolve to a different path in a URL than in a
/// resource name, so they are refused up front.
fn valid_document_id(id: &str) -> std::result::Result<&str, ClientError> {
    let reserved = id.len() >= 4 && id.starts_with("__") && id.ends_with("__");
    if id.is_empty() || id.contains('/') || id == "." || id == ".." || reserved {
        return Err(ClientError::Codec(format!("invalid document id {:?}", id)));
    }
    Ok(id)
}

/// Last path segment of a document resource name.
fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Converts a plain field map into Firestore's typed value representation.
pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "integerValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n.as_f64() }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Converts Firestore typed values back into a plain field map.
pub fn decode_fields(fields: &serde_json::Map<String, Value>) -> std::result::Result<Fields, ClientError> {
    fields
        .iter()
        .map(|(k, v)| -> std::result::Result<(String, Value), ClientError> {
            Ok((k.clone(), decode_value(v)?))
        })
        .collect()
}

fn decode_value(value: &Value) -> std::result::Result<Value, ClientError> {
    let invalid = || ClientError::Codec(format!("unsupported Firestore value: {}", value));
    let (tag, inner) = value
        .as_object()
        .and_then(|m| m.iter().next())
        .ok_or_else(invalid)?;

    Ok(match tag.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().ok_or_else(invalid)?),
        "integerValue" => {
            let n = match inner {
                Value::String(s) => s.parse::<i64>().map_err(|_| invalid())?,
                other => other.as_i64().ok_or_else(invalid)?,
            };
            json!(n)
        }
        "doubleValue" => json!(inner.as_f64().ok_or_else(invalid)?),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => {
            Value::String(inner.as_str().ok_or_else(invalid)?.to_string())
        }
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .map(decode_value)
                        .collect::<std::result::Result<Vec<_>, _>>()
                })
                .transpose()?
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(match inner.get("fields").and_then(Value::as_object) {
            Some(map) => decode_fields(map)?,
            None => Fields::new(),
        }),
        _ => return Err(invalid()),
    })
}

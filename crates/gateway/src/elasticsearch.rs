use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use reindexer_core::{AliasAction, AliasOp, Checkpoint, Document, DocumentFailure};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use url::Url;

use crate::{
    api::{ClusterGateway, CreateIndexOutcome, DeleteIndexOutcome},
    error::GatewayError,
    mapping::mapping_matches,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POINT_IN_TIME_KEEP_ALIVE: &str = "5m";
/// Unique within a point in time; appended to every sort so that pages never
/// split documents sharing a sort value.
const TIEBREAKER_SORT: &str = "_shard_doc";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    /// Optional field to page the source in. Documents are always ordered by
    /// their shard position too, so the field need not be unique.
    pub sort_field: Option<String>,
}

impl GatewayConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: None,
            password: None,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sort_field: None,
        }
    }
}

/// [`ClusterGateway`] over the Elasticsearch REST API.
///
/// Source indices are paged inside a point in time, opened on the first read
/// of an index and closed once a read comes back short.
#[derive(Debug, Clone)]
pub struct ElasticsearchGateway {
    client: Client,
    base_url: String,
    config: GatewayConfig,
    points_in_time: Arc<Mutex<HashMap<String, String>>>,
}

impl ElasticsearchGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let base_url = config.url.as_str().trim_end_matches('/').to_owned();
        info!(url = %base_url, sort_field = ?config.sort_field, "elasticsearch gateway ready");
        Ok(Self {
            client,
            base_url,
            config,
            points_in_time: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn points_in_time(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, GatewayError> {
        self.points_in_time
            .lock()
            .map_err(|_| GatewayError::Custom("point in time registry poisoned".to_owned()))
    }

    async fn point_in_time(&self, index: &str) -> Result<String, GatewayError> {
        let cached = self.points_in_time()?.get(index).cloned();
        if let Some(id) = cached {
            return Ok(id);
        }

        let response = self
            .request(
                Method::POST,
                &format!("{index}/_pit?keep_alive={POINT_IN_TIME_KEEP_ALIVE}"),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::IndexNotFound(index.to_owned()));
        }
        let body = expect_success(response, "open point in time").await?;
        let opened: PointInTime = serde_json::from_str(&body)?;
        debug!(index, "point in time opened");
        self.points_in_time()?
            .insert(index.to_owned(), opened.id.clone());
        Ok(opened.id)
    }

    fn forget_point_in_time(&self, index: &str) -> Option<String> {
        self.points_in_time()
            .ok()
            .and_then(|mut points| points.remove(index))
    }

    /// Frees the point in time early. Failing to do so only costs the
    /// cluster the keep-alive.
    async fn close_point_in_time(&self, index: &str) {
        let Some(id) = self.forget_point_in_time(index) else {
            return;
        };
        match self
            .request(Method::DELETE, "_pit")
            .json(&json!({ "id": id }))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(index, "point in time closed")
            }
            Ok(response) => debug!(index, status = %response.status(), "point in time left to expire"),
            Err(error) => debug!(index, %error, "point in time left to expire"),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match (&self.config.api_key, &self.config.username) {
            (Some(api_key), _) => builder.header(header::AUTHORIZATION, format!("ApiKey {api_key}")),
            (None, Some(username)) => builder.basic_auth(username, self.config.password.as_ref()),
            (None, None) => builder,
        }
    }

    async fn fetch_mapping(&self, index: &str) -> Result<Value, GatewayError> {
        let response = self
            .request(Method::GET, &format!("{index}/_mapping"))
            .send()
            .await?;
        let body = expect_success(response, "get mapping").await?;
        let parsed: Value = serde_json::from_str(&body)?;
        parsed
            .get(index)
            .and_then(|entry| entry.get("mappings"))
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("no mappings for index `{index}`")))
    }
}

#[async_trait::async_trait]
impl ClusterGateway for ElasticsearchGateway {
    async fn create_index(
        &self,
        name: &str,
        mapping: &Value,
    ) -> Result<CreateIndexOutcome, GatewayError> {
        let response = self
            .request(Method::PUT, name)
            .json(&json!({ "mappings": mapping }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            info!(index = name, "index created");
            return Ok(CreateIndexOutcome::Created);
        }

        let body = response.text().await?;
        match error_type(&body).as_deref() {
            Some("resource_already_exists_exception") => {
                let live = self.fetch_mapping(name).await?;
                if mapping_matches(mapping, &live) {
                    info!(index = name, "index already exists with a matching mapping");
                    Ok(CreateIndexOutcome::AlreadyExists)
                } else {
                    Err(GatewayError::MappingConflict {
                        index: name.to_owned(),
                        detail: format!("existing mapping differs from requested one: {live}"),
                    })
                }
            }
            Some("mapper_parsing_exception" | "illegal_argument_exception") => {
                Err(GatewayError::MappingConflict {
                    index: name.to_owned(),
                    detail: error_reason(&body).unwrap_or(body),
                })
            }
            _ => Err(status_error("create index", status, body)),
        }
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), GatewayError> {
        let response = self
            .request(Method::POST, "_aliases")
            .json(&alias_request_body(actions))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            debug!(actions = actions.len(), "alias actions applied");
            return Ok(());
        }

        let body = response.text().await?;
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Err(GatewayError::AliasRejected(
                error_reason(&body).unwrap_or(body),
            ));
        }
        Err(status_error("update aliases", status, body))
    }

    async fn delete_index(&self, name: &str) -> Result<DeleteIndexOutcome, GatewayError> {
        let response = self.request(Method::DELETE, name).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(DeleteIndexOutcome::Deleted);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteIndexOutcome::NotFound);
        }
        let body = response.text().await?;
        Err(status_error("delete index", status, body))
    }

    async fn read_page(
        &self,
        index: &str,
        after: Option<&Checkpoint>,
        limit: usize,
    ) -> Result<Vec<Document>, GatewayError> {
        let point_in_time = self.point_in_time(index).await?;
        let response = self
            .request(Method::POST, "_search")
            .json(&search_request_body(
                self.config.sort_field.as_deref(),
                &point_in_time,
                after,
                limit,
            ))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // expired point in time; the next attempt opens a fresh one
            self.forget_point_in_time(index);
            let body = response.text().await?;
            return Err(GatewayError::Unavailable(format!(
                "point in time for `{index}` is gone: {}",
                error_reason(&body).unwrap_or(body)
            )));
        }
        let body = expect_success(response, "search").await?;
        let parsed: SearchResponse = serde_json::from_str(&body)?;
        if let Some(renewed) = &parsed.pit_id {
            self.points_in_time()?
                .insert(index.to_owned(), renewed.clone());
        }

        let documents = parsed
            .hits
            .hits
            .into_iter()
            .map(SearchHit::into_document)
            .collect::<Result<Vec<_>, _>>()?;
        if documents.len() < limit {
            self.close_point_in_time(index).await;
        }
        Ok(documents)
    }

    async fn write_page(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<Vec<DocumentFailure>, GatewayError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .request(Method::POST, "_bulk")
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_request_body(index, documents)?)
            .send()
            .await?;
        let body = expect_success(response, "bulk").await?;
        let parsed: Value = serde_json::from_str(&body)?;
        parse_bulk_response(&parsed, documents.len())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>, GatewayError> {
        let response = self
            .request(Method::GET, &format!("_alias/{alias}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = expect_success(response, "get alias").await?;
        let parsed: Map<String, Value> = serde_json::from_str(&body)?;
        let mut indices: Vec<String> = parsed.into_iter().map(|(index, _)| index).collect();
        indices.sort();
        Ok(indices)
    }
}

async fn expect_success(response: Response, operation: &'static str) -> Result<String, GatewayError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(status_error(operation, status, body))
    }
}

fn status_error(operation: &'static str, status: StatusCode, body: String) -> GatewayError {
    GatewayError::Status {
        operation,
        status: status.as_u16(),
        body,
    }
}

fn error_field(body: &str, field: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|error| error.get(field))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn error_type(body: &str) -> Option<String> {
    error_field(body, "type")
}

fn error_reason(body: &str) -> Option<String> {
    error_field(body, "reason")
}

fn alias_request_body(actions: &[AliasAction]) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|action| match action.op {
            AliasOp::Add => json!({
                "add": { "index": action.index, "alias": action.alias }
            }),
            // must_exist=false keeps a replayed cutover idempotent
            AliasOp::Remove => json!({
                "remove": { "index": action.index, "alias": action.alias, "must_exist": false }
            }),
        })
        .collect();
    json!({ "actions": actions })
}

/// The checkpoint is the full sort array of the last document read, so it
/// carries the tiebreaker along with the sort field value.
fn search_request_body(
    sort_field: Option<&str>,
    point_in_time: &str,
    after: Option<&Checkpoint>,
    limit: usize,
) -> Value {
    let mut sort = Vec::with_capacity(2);
    if let Some(field) = sort_field {
        sort.push(json!({ field: "asc" }));
    }
    sort.push(json!({ TIEBREAKER_SORT: "asc" }));

    let mut body = json!({
        "size": limit,
        "query": { "match_all": {} },
        "sort": sort,
        "pit": { "id": point_in_time, "keep_alive": POINT_IN_TIME_KEEP_ALIVE },
        "track_total_hits": false,
    });
    if let (Some(checkpoint), Some(object)) = (after, body.as_object_mut()) {
        object.insert("search_after".to_owned(), checkpoint.as_value().clone());
    }
    body
}

fn bulk_request_body(index: &str, documents: &[Document]) -> Result<String, GatewayError> {
    let mut body = String::new();
    for document in documents {
        let action = json!({ "index": { "_index": index, "_id": document.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&document.source)?);
        body.push('\n');
    }
    Ok(body)
}

/// Extracts per-document failures from a `_bulk` response.
///
/// A response in which every document was throttled (429) is surfaced as a
/// transient error so the whole batch is retried.
fn parse_bulk_response(
    response: &Value,
    expected_items: usize,
) -> Result<Vec<DocumentFailure>, GatewayError> {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::InvalidResponse("bulk response without items".to_owned()))?;
    if items.len() != expected_items {
        return Err(GatewayError::InvalidResponse(format!(
            "bulk response has {} items for {expected_items} documents",
            items.len()
        )));
    }

    let mut failures = Vec::new();
    let mut throttled = 0usize;
    for item in items {
        let Some(result) = item.as_object().and_then(|object| object.values().next()) else {
            return Err(GatewayError::InvalidResponse(format!(
                "malformed bulk item: {item}"
            )));
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        if (200..300).contains(&status) {
            continue;
        }
        if status == 429 {
            throttled += 1;
        }
        let id = result
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let reason = match result.get("error") {
            Some(error) => format!(
                "{}: {}",
                error.get("type").and_then(Value::as_str).unwrap_or("error"),
                error.get("reason").and_then(Value::as_str).unwrap_or_default()
            ),
            None => format!("status {status}"),
        };
        failures.push(DocumentFailure { id, reason });
    }

    if expected_items > 0 && throttled == expected_items {
        return Err(GatewayError::Unavailable(format!(
            "bulk request fully rejected by the cluster ({throttled} items throttled)"
        )));
    }
    Ok(failures)
}

#[derive(Debug, Deserialize)]
struct PointInTime {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pit_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    sort: Option<Value>,
}

impl SearchHit {
    fn into_document(self) -> Result<Document, GatewayError> {
        let sort = self.sort.ok_or_else(|| {
            GatewayError::InvalidResponse(format!("search hit `{}` has no sort values", self.id))
        })?;
        Ok(Document {
            id: self.id,
            source: self.source,
            sort_key: Checkpoint::new(sort),
        })
    }
}

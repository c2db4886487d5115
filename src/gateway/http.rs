use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::core::{IndexSnapshot, MigrateError, Result, TaskId, TaskProgress};
use crate::gateway::{ReindexRequest, SearchGateway};

/// `[connection]` 配置段
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

/// 基于 Elasticsearch REST API 的阻塞网关
pub struct HttpGateway {
    client: Client,
    base_url: String,
    auth: Option<(String, Option<String>)>,
    marker_field: String,
}

impl HttpGateway {
    pub fn new(connection: &Connection, marker_field: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(connection.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: connection.url.trim_end_matches('/').to_string(),
            auth: connection
                .username
                .clone()
                .map(|user| (user, connection.password.clone())),
            marker_field: marker_field.to_string(),
        })
    }

    pub fn marker_field(&self) -> &str {
        &self.marker_field
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user, pass.as_deref()),
            None => builder,
        }
    }

    fn head(&self, path: &str) -> Result<bool> {
        let resp = self.authed(self.client.head(self.url(path))).send()?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(MigrateError::Status {
                status: s.as_u16(),
                body: String::new(),
            }),
        }
    }

    fn send_json(&self, builder: RequestBuilder) -> Result<Value> {
        let resp = self.authed(builder).send()?;
        json_body(resp)
    }

    fn expect_ack(&self, op: &'static str, index: &str, body: Value) -> Result<()> {
        if body.get("acknowledged").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(MigrateError::NotAcknowledged {
                op,
                index: index.to_string(),
            })
        }
    }
}

fn json_body(resp: Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(MigrateError::Status {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<Value>().map_err(MigrateError::invalid_response)
}

fn as_count(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
}

/// `meta.cas` -> source["meta"]["cas"]
fn dotted<'v>(source: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(source, |v, key| v.get(key))
}

/// ES 6 的 `hits.total` 是数字，7+ 是 `{ "value": N }`
fn hits_total(body: &Value) -> u64 {
    let total = &body["hits"]["total"];
    as_count(total)
        .or_else(|| as_count(&total["value"]))
        .unwrap_or(0)
}

impl SearchGateway for HttpGateway {
    fn alias_exists(&self, name: &str) -> Result<bool> {
        self.head(&format!("_alias/{}", name))
    }

    fn index_exists(&self, name: &str) -> Result<bool> {
        self.head(name)
    }

    fn resolve_alias_target(&self, alias: &str) -> Result<String> {
        let body = self.send_json(self.client.get(self.url(&format!("_alias/{}", alias))))?;
        let targets = body
            .as_object()
            .ok_or_else(|| MigrateError::invalid_response("alias lookup is not an object"))?;

        let mut names = targets.keys();
        match (names.next(), names.next()) {
            (Some(name), None) => Ok(name.clone()),
            (None, _) => Err(MigrateError::IndexNotFound(alias.to_string())),
            (Some(_), Some(_)) => Err(MigrateError::invalid_response(format!(
                "alias `{}` is bound to {} indices",
                alias,
                targets.len()
            ))),
        }
    }

    fn create_index(&self, name: &str, body: &Value) -> Result<()> {
        let resp = self.send_json(self.client.put(self.url(name)).json(body))?;
        self.expect_ack("create index", name, resp)
    }

    fn swap_alias(&self, alias: &str, add_to: &str, remove_from: Option<&str>) -> Result<()> {
        let mut actions = Vec::with_capacity(2);
        if let Some(old) = remove_from {
            actions.push(json!({ "remove_index": { "index": old } }));
        }
        actions.push(json!({ "add": { "index": add_to, "alias": alias } }));

        let resp = self.send_json(
            self.client
                .post(self.url("_aliases"))
                .json(&json!({ "actions": actions })),
        )?;
        self.expect_ack("update aliases", add_to, resp)
    }

    fn delete_index(&self, name: &str) -> Result<()> {
        let resp = self.send_json(self.client.delete(self.url(name)))?;
        self.expect_ack("delete index", name, resp)
    }

    fn set_setting(&self, name: &str, key: &str, value: Value) -> Result<()> {
        let body = json!({ "index": { key: value } });
        let resp = self.send_json(
            self.client
                .put(self.url(&format!("{}/_settings", name)))
                .json(&body),
        )?;
        self.expect_ack("update settings", name, resp)
    }

    fn snapshot(&self, name: &str) -> Result<IndexSnapshot> {
        let query = json!({
            "size": 1,
            "track_total_hits": true,
            "sort": [{ self.marker_field.as_str(): { "order": "desc" } }],
        });
        let resp = self
            .authed(
                self.client
                    .post(self.url(&format!("{}/_search", name)))
                    .json(&query),
            )
            .send()?;

        // 新索引没有文档时 marker 字段尚未映射，排序会得到 400
        if resp.status() == StatusCode::BAD_REQUEST {
            tracing::debug!("Snapshot of {} rejected with 400, treating as empty", name);
            return Ok(IndexSnapshot::empty(name));
        }
        let body = json_body(resp)?;

        let top = &body["hits"]["hits"][0];
        let last_marker = dotted(&top["_source"], &self.marker_field)
            .and_then(as_count)
            .or_else(|| as_count(&top["sort"][0]))
            .unwrap_or(0);

        Ok(IndexSnapshot {
            name: name.to_string(),
            total_documents: hits_total(&body),
            last_marker,
        })
    }

    fn start_reindex(&self, request: &ReindexRequest<'_>) -> Result<TaskId> {
        let marker = self.marker_field.as_str();
        let mut body = json!({
            "conflicts": "abort",
            "source": {
                "index": request.source,
                "query": { "range": { marker: { "gte": request.since_marker } } },
                "sort": [{ marker: "asc" }],
            },
            "dest": { "index": request.dest },
        });
        if let Some(script) = request.script {
            body["script"] = script.clone();
        }

        let resp = self.send_json(
            self.client
                .post(self.url("_reindex?wait_for_completion=false"))
                .json(&body),
        )?;

        resp.get("task")
            .and_then(Value::as_str)
            .map(|id| TaskId(id.to_string()))
            .ok_or_else(|| MigrateError::invalid_response("no 'task' field in result"))
    }

    fn task_status(&self, task: &TaskId) -> Result<TaskProgress> {
        let resp = self
            .authed(self.client.get(self.url(&format!("_tasks/{}", task))))
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(MigrateError::TaskNotFound(task.clone()));
        }
        let body = json_body(resp)?;

        let status = &body["task"]["status"];
        let field = |key: &str| as_count(&status[key]).unwrap_or(0);

        Ok(TaskProgress {
            completed: body["completed"].as_bool().unwrap_or(false),
            total: field("total"),
            processed: field("created") + field("updated") + field("deleted"),
        })
    }

    fn raw_document_count(&self, name: &str) -> Result<u64> {
        let body = self.send_json(
            self.client
                .get(self.url(&format!("{}/_stats/docs", name))),
        )?;
        as_count(&body["indices"][name]["total"]["docs"]["count"]).ok_or_else(|| {
            MigrateError::invalid_response(format!("no docs count for `{}` in stats", name))
        })
    }
}

//! Graph database sessions
//!
//! The watchdog only needs two things from the database: run a
//! parameterised statement and get the rows back. [`GraphSession`] captures
//! that; [`SessionProvider`] hands out a session the first time one is
//! needed. The production implementation talks to Neo4j through its HTTP
//! transactional endpoint (`POST /db/{database}/tx/commit`), one
//! auto-committed transaction per statement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::config::ConnectionParams;
use crate::error::{ConnectionError, QueryError};

/// One result row, keyed by column name
pub type Record = Map<String, Value>;

/// A Cypher statement with its parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    #[serde(rename = "statement")]
    pub text: String,
    pub parameters: Map<String, Value>,
}

impl Statement {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Map::new(),
        }
    }

    /// Bind a parameter (`$key` in the statement text)
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A live, reusable session
#[async_trait]
pub trait GraphSession: Send + Sync {
    /// Run a statement and collect every returned row.
    async fn run(&self, statement: &Statement) -> Result<Vec<Record>, QueryError>;
}

/// Hands out sessions on demand
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Establish a session, verifying that the server answers.
    async fn connect(&self) -> Result<Arc<dyn GraphSession>, ConnectionError>;
}

/// Request timeout applied to the connectivity probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ERROR_BODY: usize = 512;

/// Session provider backed by the Neo4j HTTP API
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    params: ConnectionParams,
}

impl HttpSessionProvider {
    #[must_use]
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    fn build_session(&self) -> Result<HttpSession, ConnectionError> {
        let commit_url = commit_endpoint(&self.params.endpoint, &self.params.database)?;
        let client = Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .https_only(self.params.encrypted)
            .build()
            .map_err(|err| ConnectionError::Client(err.to_string()))?;
        Ok(HttpSession {
            client,
            commit_url,
            username: self.params.username.clone(),
            password: self.params.password.clone(),
        })
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn connect(&self) -> Result<Arc<dyn GraphSession>, ConnectionError> {
        let session = self.build_session()?;
        let endpoint = session.commit_url.to_string();

        match tokio::time::timeout(PROBE_TIMEOUT, session.run(&Statement::new("RETURN 1"))).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(QueryError::Status { status, .. }))
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::FORBIDDEN.as_u16() =>
            {
                return Err(ConnectionError::Unauthorized(self.params.username.clone()));
            }
            Ok(Err(err)) => {
                return Err(ConnectionError::Unreachable {
                    url: endpoint,
                    reason: err.to_string(),
                });
            }
            Err(_) => return Err(ConnectionError::Timeout(PROBE_TIMEOUT)),
        }

        info!(endpoint = %endpoint, user = %self.params.username, "Neo4j session established");
        Ok(Arc::new(session))
    }
}

/// Session over the Neo4j HTTP transactional endpoint
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    commit_url: Url,
    username: String,
    password: String,
}

#[async_trait]
impl GraphSession for HttpSession {
    async fn run(&self, statement: &Statement) -> Result<Vec<Record>, QueryError> {
        debug!(statement = %statement.text, "running statement");
        let response = self
            .client
            .post(self.commit_url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json;charset=UTF-8")
            .header(CONTENT_TYPE, "application/json")
            .json(&CommitRequest::single(statement))
            .send()
            .await
            .map_err(|err| QueryError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| QueryError::Transport(err.to_string()))?;

        if !status.is_success() {
            return Err(QueryError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        decode_response(&body)
    }
}

/// Resolve `{endpoint}/db/{database}/tx/commit`, keeping any path prefix
pub fn commit_endpoint(endpoint: &Url, database: &str) -> Result<Url, ConnectionError> {
    let mut base = endpoint.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("db/{database}/tx/commit"))
        .map_err(|err| ConnectionError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: err.to_string(),
        })
}

/// Body of a commit request
#[derive(Debug, Serialize)]
pub struct CommitRequest<'a> {
    pub statements: Vec<&'a Statement>,
}

impl<'a> CommitRequest<'a> {
    #[must_use]
    pub fn single(statement: &'a Statement) -> Self {
        Self {
            statements: vec![statement],
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Decode a commit response into records, surfacing server-side errors
pub fn decode_response(body: &str) -> Result<Vec<Record>, QueryError> {
    let response: CommitResponse =
        serde_json::from_str(body).map_err(|err| QueryError::Decode(err.to_string()))?;

    if let Some(error) = response.errors.into_iter().next() {
        return Err(QueryError::Server {
            code: error.code,
            message: error.message,
        });
    }

    let Some(result) = response.results.into_iter().next() else {
        return Ok(Vec::new());
    };

    result
        .data
        .into_iter()
        .map(|data| {
            if data.row.len() != result.columns.len() {
                return Err(QueryError::Decode(format!(
                    "row has {} values for {} columns",
                    data.row.len(),
                    result.columns.len()
                )));
            }
            Ok(result.columns.iter().cloned().zip(data.row).collect())
        })
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_binds_parameters() {
        let stmt = Statement::new("CALL demeter.groupTags($application)").param("application", "AppA");
        assert_eq!(stmt.parameters.get("application"), Some(&Value::from("AppA")));
    }

    #[test]
    fn request_body_wraps_single_statement() {
        let stmt = Statement::new("RETURN $x").param("x", 1);
        let body = serde_json::to_value(CommitRequest::single(&stmt)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "statements": [{ "statement": "RETURN $x", "parameters": { "x": 1 } }]
            })
        );
    }

    #[test]
    fn commit_endpoint_appends_database_path() {
        let url = Url::parse("http://localhost:7474").unwrap();
        let commit = commit_endpoint(&url, "neo4j").unwrap();
        assert_eq!(commit.as_str(), "http://localhost:7474/db/neo4j/tx/commit");
    }

    #[test]
    fn commit_endpoint_keeps_path_prefix() {
        let url = Url::parse("https://proxy.internal/graph").unwrap();
        let commit = commit_endpoint(&url, "imaging").unwrap();
        assert_eq!(
            commit.as_str(),
            "https://proxy.internal/graph/db/imaging/tx/commit"
        );
    }

    #[test]
    fn decode_zips_columns_and_rows() {
        let body = r#"{
            "results": [{
                "columns": ["application", "numTags"],
                "data": [
                    {"row": [["AppA"], 3], "meta": [null, null]},
                    {"row": [["AppB", "AppC"], 1], "meta": [null, null]}
                ]
            }],
            "errors": []
        }"#;
        let records = decode_response(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["application"], serde_json::json!(["AppA"]));
        assert_eq!(records[0]["numTags"], serde_json::json!(3));
        assert_eq!(records[1]["application"], serde_json::json!(["AppB", "AppC"]));
    }

    #[test]
    fn decode_empty_results() {
        let records = decode_response(r#"{"results": [], "errors": []}"#).unwrap();
        assert!(records.is_empty());

        let records =
            decode_response(r#"{"results": [{"columns": ["a"], "data": []}], "errors": []}"#)
                .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn decode_surfaces_server_error() {
        let body = r#"{
            "results": [],
            "errors": [{
                "code": "Neo.ClientError.Procedure.ProcedureNotFound",
                "message": "There is no procedure with the name `demeter.groupTags` registered"
            }]
        }"#;
        match decode_response(body).unwrap_err() {
            QueryError::Server { code, message } => {
                assert_eq!(code, "Neo.ClientError.Procedure.ProcedureNotFound");
                assert!(message.contains("demeter.groupTags"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_response("<html>502</html>"),
            Err(QueryError::Decode(_))
        ));
    }

    #[test]
    fn decode_rejects_short_row() {
        let body = r#"{"results": [{"columns": ["a", "b"], "data": [{"row": [1]}]}], "errors": []}"#;
        assert!(matches!(decode_response(body), Err(QueryError::Decode(_))));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}

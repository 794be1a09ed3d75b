//! Shared test infrastructure for demeter-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::MockGraph;
//! ```

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use demeter_core::error::{ConnectionError, QueryError};
use demeter_core::graph::{GraphSession, Record, SessionProvider, Statement};

/// Build one discovery row
pub fn tag_row(applications: &[&str], num_tags: i64) -> Record {
    serde_json::json!({ "application": applications, "numTags": num_tags })
        .as_object()
        .cloned()
        .expect("row is an object")
}

#[derive(Default)]
struct State {
    rows: Vec<Record>,
    scan_failures: usize,
    failing: HashSet<String>,
    scans: usize,
    invocations: Vec<String>,
    call_delay: Option<Duration>,
}

/// In-memory graph: scripted scan rows, per-application grouping failures
#[derive(Clone, Default)]
pub struct MockGraph {
    state: Arc<Mutex<State>>,
}

impl MockGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, rows: Vec<Record>) -> Self {
        self.state.lock().unwrap().rows = rows;
        self
    }

    /// Make every grouping call take `delay` before answering
    pub fn with_call_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().call_delay = Some(delay);
        self
    }

    pub fn set_rows(&self, rows: Vec<Record>) {
        self.state.lock().unwrap().rows = rows;
    }

    /// Make grouping fail for `application` until [`MockGraph::heal`]
    pub fn fail(&self, application: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(application.to_string());
    }

    pub fn heal(&self, application: &str) {
        self.state.lock().unwrap().failing.remove(application);
    }

    /// Fail the next `n` scans
    pub fn fail_scans(&self, n: usize) {
        self.state.lock().unwrap().scan_failures = n;
    }

    pub fn invocations(&self) -> Vec<String> {
        self.state.lock().unwrap().invocations.clone()
    }

    pub fn invocations_of(&self, application: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|name| name.as_str() == application)
            .count()
    }

    pub fn scans(&self) -> usize {
        self.state.lock().unwrap().scans
    }
}

#[async_trait]
impl GraphSession for MockGraph {
    async fn run(&self, statement: &Statement) -> Result<Vec<Record>, QueryError> {
        let (result, delay) = {
            let mut state = self.state.lock().unwrap();
            if statement.text.starts_with("MATCH") {
                state.scans += 1;
                if state.scan_failures > 0 {
                    state.scan_failures -= 1;
                    return Err(QueryError::Transport("connection reset".to_string()));
                }
                return Ok(state.rows.clone());
            }

            let application = statement
                .parameters
                .get("application")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            state.invocations.push(application.clone());
            let result = if state.failing.contains(&application) {
                Err(QueryError::Server {
                    code: "Neo.ClientError.Procedure.ProcedureCallFailed".to_string(),
                    message: format!("Failed to invoke procedure for {application}"),
                })
            } else {
                Ok(Vec::new())
            };
            (result, state.call_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Provider that fails a scripted number of times before handing out the graph
pub struct MockProvider {
    graph: MockGraph,
    failures: Mutex<VecDeque<ConnectionError>>,
    connects: AtomicUsize,
}

impl MockProvider {
    pub fn new(graph: MockGraph) -> Arc<Self> {
        Arc::new(Self {
            graph,
            failures: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(graph: MockGraph, failures: usize) -> Arc<Self> {
        let queue = (0..failures)
            .map(|_| ConnectionError::Unreachable {
                url: "http://localhost:7474/db/neo4j/tx/commit".to_string(),
                reason: "connection refused".to_string(),
            })
            .collect();
        Arc::new(Self {
            graph,
            failures: Mutex::new(queue),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    async fn connect(&self) -> Result<Arc<dyn GraphSession>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Arc::new(self.graph.clone()))
    }
}

/// Log sink shared between a test subscriber and the assertions
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every captured line, parsed as a JSON event
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        let bytes = self.buffer.lock().unwrap().clone();
        String::from_utf8(bytes)
            .expect("logs are utf-8")
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("log line is JSON"))
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

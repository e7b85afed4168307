//! Scenario definitions and execution results.

use crate::assertion::AssertionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A top-level named test unit; the unit of reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Format version declared by the file.
    #[serde(default)]
    pub version: Option<String>,
    /// Scenario name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags for filtering scenarios from the command line.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Environment bindings, seeded into the global scope.
    #[serde(default)]
    pub env: HashMap<String, Value>,
    /// Initial local bindings.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Named data sources, loaded into the local scope at entry.
    #[serde(default)]
    pub data: BTreeMap<String, DataSource>,
    #[serde(default)]
    pub config: ScenarioConfig,
    /// Hook group run before the main stages; any failure aborts.
    #[serde(default)]
    pub before: Option<TestGroup>,
    #[serde(default)]
    pub setup: Vec<Step>,
    /// Legacy flat step list.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Named test groups.
    #[serde(default)]
    pub tests: BTreeMap<String, TestGroup>,
    #[serde(default)]
    pub teardown: Vec<Step>,
    /// Hook group run last.
    #[serde(default)]
    pub after: Option<TestGroup>,
}

/// Per-scenario execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub http: HttpSettings,
    /// Run test groups concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// Maximum number of groups running at once under `parallel`
    /// (0 = unbounded).
    #[serde(default)]
    pub concurrency: usize,
    /// Request timeout in seconds for every step of the scenario.
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
    /// Retry count applied to steps without their own policy.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Stop the scenario on the first failing setup or legacy step.
    #[serde(default)]
    pub fail_fast: bool,
    /// Named environment from the engine configuration.
    #[serde(default)]
    pub environment: Option<String>,
}

/// Transport overrides for one scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
    #[serde(default, rename = "followRedirects")]
    pub follow_redirects: Option<bool>,
    #[serde(default, rename = "verifySSL")]
    pub verify_ssl: Option<bool>,
}

/// A named, independently schedulable bundle of steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestGroup {
    #[serde(default)]
    pub name: Option<String>,
    /// Bindings added to the local scope when the group starts.
    #[serde(default)]
    pub env: HashMap<String, Value>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, rename = "continueOnFail")]
    pub continue_on_fail: bool,
    pub steps: Vec<Step>,
    #[serde(default, rename = "dataDriven", alias = "data_driven")]
    pub data_driven: Option<DataDriven>,
}

/// Reference to a variable holding a list of records to iterate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDriven {
    /// Variable holding the records.
    pub source: String,
    /// Name each record is bound under.
    pub variable: String,
}

/// Where a scenario data set comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub kind: DataSourceKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    Inline,
    Csv,
    Json,
}

/// One request-plus-verification unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Legacy step type; `http` when omitted.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Structured HTTP descriptor.
    #[serde(default)]
    pub http: Option<HttpStep>,
    /// Legacy request descriptor.
    #[serde(default)]
    pub request: Option<Request>,
    #[serde(default)]
    pub capture: BTreeMap<String, Capture>,
    /// Shorthand checks: check type to expected value.
    #[serde(default)]
    pub check: BTreeMap<String, Value>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    /// Step-scoped bindings. On legacy steps, string values of the form
    /// `json:<path>` or `header:<name>` are extracted from the response.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Single-variable truthiness check, e.g. `{{user_id}}`.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Request timeout in seconds.
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
    #[serde(default, rename = "dataDriven", alias = "data_driven")]
    pub data_driven: Option<DataDriven>,
}

impl Step {
    /// Legacy step type, defaulting to `http`.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("http")
    }

    /// A step with no request descriptor only binds variables.
    pub fn is_bind_only(&self) -> bool {
        self.http.is_none()
            && self
                .request
                .as_ref()
                .map_or(true, |request| request.url.is_empty())
    }
}

/// Structured HTTP request descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpStep {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// JSON payload; implies `Content-Type: application/json`.
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Checks merged over the step-level `check` map.
    #[serde(default)]
    pub check: BTreeMap<String, Value>,
}

/// Legacy request descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `basic`, `bearer` or `api_key`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Extra settings; `header` names the api_key header.
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

/// A named rule for extracting a value from a response. Exactly one of
/// the three fields is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capture {
    #[serde(default)]
    pub jsonpath: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

/// Explicit assertion definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assertion {
    /// status, header, body, json_path, regex, response_time, size,
    /// json_schema.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
    /// Extraction failure passes instead of failing.
    #[serde(default)]
    pub optional: bool,
}

/// Retry policy for transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Linear,
    Exponential,
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Scenario {
    /// Deserialize a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Deserialize a scenario from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the scenario to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Outcome of a scenario or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
}

/// Result of running a single scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    /// Merged variable snapshot at completion.
    pub variables: HashMap<String, Value>,
}

/// Result of running a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    /// Test group that produced this step, if any.
    pub group: Option<String>,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub request: Option<RequestInfo>,
    pub response: Option<ResponseInfo>,
    pub assertions: Vec<AssertionResult>,
    pub error: Option<String>,
    pub variables: HashMap<String, Value>,
}

/// Request as it was sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Response summary kept for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub duration_ms: u64,
    pub size: u64,
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

impl ScenarioResult {
    pub(crate) fn begin(name: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            status: Status::Passed,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            steps: Vec::new(),
            error: None,
            variables: HashMap::new(),
        }
    }

    pub(crate) fn finish(&mut self, variables: HashMap<String, Value>) {
        self.finished_at = Utc::now();
        self.duration_ms = elapsed_ms(self.started_at, self.finished_at);
        self.variables = variables;
    }

    /// Record a fatal error; the first one wins.
    pub(crate) fn fail(&mut self, error: String) {
        self.status = Status::Failed;
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Passed
    }
}

impl StepResult {
    pub(crate) fn begin(name: &str, group: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            group: group.map(str::to_string),
            status: Status::Passed,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            request: None,
            response: None,
            assertions: Vec::new(),
            error: None,
            variables: HashMap::new(),
        }
    }

    pub(crate) fn finish(mut self, variables: HashMap<String, Value>) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms = elapsed_ms(self.started_at, self.finished_at);
        self.variables = variables;
        self
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = Status::Failed;
        self.error = Some(error.into());
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }
}

//! Scenario execution.
//!
//! A scenario runs its stages in a fixed order: setup, the `before` hook,
//! legacy steps or test groups, teardown, then the `after` hook. Each
//! scenario gets its own [`VariableContext`] cloned from the engine's;
//! parallel groups and data-driven iterations clone again so nothing they
//! bind leaks into a sibling.

use crate::assertion::{checks_to_assertions, AssertionEngine, AssertionResult};
use crate::config::{EngineConfig, EnvironmentConfig};
use crate::context::{Scope, VariableContext};
use crate::data::DataLoader;
use crate::extract::{apply_captures, extract_variables, is_extractor};
use crate::loader::LoadedScenario;
use crate::model::{
    AuthConfig, Backoff, RequestInfo, ResponseInfo, Scenario, ScenarioResult, Status, Step,
    StepResult, TestGroup,
};
use crate::report::Reporter;
use crate::template::{has_placeholder, sole_placeholder};
use crate::transport::{
    execute_with_retry, HttpTransport, RequestBody, ResolvedRequest, Response, RetryPolicy,
    Transport,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Drives scenarios through a [`Transport`].
///
/// Cloning is cheap; every clone shares configuration, transport and the
/// seeded base context.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    transport: Arc<dyn Transport>,
    data_loader: DataLoader,
    context: Arc<VariableContext>,
}

/// Request defaults resolved once per scenario.
#[derive(Debug, Clone)]
struct RequestSettings {
    base_url: Option<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
    verify_ssl: bool,
    follow_redirects: bool,
    retry: RetryPolicy,
}

/// Steps and failure produced by one test group.
#[derive(Debug, Default)]
struct GroupOutcome {
    name: String,
    steps: Vec<StepResult>,
    error: Option<String>,
}

impl Engine {
    /// Engine backed by the reqwest transport.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let mut context = VariableContext::new();
        context.add_builtins();
        for (key, value) in &config.global.variables {
            context.set(Scope::Global, key.clone(), value.clone());
        }

        Self {
            config: Arc::new(config),
            transport,
            data_loader: DataLoader::default(),
            context: Arc::new(context),
        }
    }

    /// Resolve relative data source paths against `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_loader = DataLoader::new(dir);
        self
    }

    /// Run every scenario, feeding results to `reporter`. Returns `true`
    /// when all scenarios passed.
    pub async fn run(
        &self,
        scenarios: &[LoadedScenario],
        reporter: &mut dyn Reporter,
    ) -> anyhow::Result<bool> {
        reporter.start();
        let mut success = true;
        for (idx, loaded) in scenarios.iter().enumerate() {
            info!(
                "Test {}/{}: {}",
                idx + 1,
                scenarios.len(),
                loaded.scenario.name
            );
            let engine = self.clone().with_data_dir(loaded.base_dir());
            let result = engine.run_scenario(&loaded.scenario).await;
            success &= result.is_success();
            reporter.add_scenario_result(&result);
        }
        reporter.finish()?;
        Ok(success)
    }

    /// Execute one scenario to completion.
    #[instrument(skip(self, scenario), fields(name = %scenario.name))]
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        info!("Starting test scenario: {}", scenario.name);
        let mut result = ScenarioResult::begin(&scenario.name);
        let mut ctx = VariableContext::clone(&self.context);
        let config = &scenario.config;

        for (key, value) in &scenario.env {
            ctx.set(Scope::Global, key.clone(), value.clone());
        }
        for (key, value) in &scenario.variables {
            ctx.set(Scope::Local, key.clone(), value.clone());
        }

        let environment = match config.environment.as_deref() {
            Some(name) => {
                let env = self.config.environment(name);
                if env.is_none() {
                    warn!(environment = name, "unknown environment, using globals");
                }
                env
            }
            None => None,
        };
        if let Some(env) = environment {
            for (key, value) in &env.variables {
                ctx.set(Scope::Local, key.clone(), value.clone());
            }
        }
        let settings = Arc::new(self.settings(scenario, environment));

        for (name, source) in &scenario.data {
            match self.data_loader.load(source) {
                Ok(records) => ctx.set(Scope::Local, name.clone(), records),
                Err(e) => {
                    error!(source = %name, "failed to load data source: {:#}", e);
                    result.fail(format!("Failed to load data source '{name}': {e:#}"));
                    return self.finish(result, &ctx);
                }
            }
        }

        for step in &scenario.setup {
            let failed = self
                .run_into(step, &mut ctx, &settings, None, &mut result.steps)
                .await;
            if failed && config.fail_fast {
                result.fail(format!("Setup step '{}' failed", step.name));
                return self.finish(result, &ctx);
            }
        }

        if let Some(before) = scenario.before.as_ref().filter(|g| !g.skip) {
            bind_group_env(before, &mut ctx);
            for step in &before.steps {
                let failed = self
                    .run_into(step, &mut ctx, &settings, Some("before"), &mut result.steps)
                    .await;
                if failed {
                    result.fail(format!("Before hook step '{}' failed", step.name));
                    return self.finish(result, &ctx);
                }
            }
        }

        let mut halted = false;
        for step in &scenario.steps {
            let failed = self
                .run_into(step, &mut ctx, &settings, None, &mut result.steps)
                .await;
            if failed && config.fail_fast {
                info!("Stopping scenario due to step failure");
                result.fail(format!("Step '{}' failed", step.name));
                halted = true;
                break;
            }
        }

        if !halted && !scenario.tests.is_empty() {
            let outcomes = if config.parallel {
                self.run_groups_parallel(&scenario.tests, &ctx, &settings, config.concurrency)
                    .await
            } else {
                let mut outcomes = Vec::new();
                for (name, group) in &scenario.tests {
                    outcomes.push(self.run_group(name, group, &mut ctx, &settings).await);
                }
                outcomes
            };

            let mut errors = Vec::new();
            for outcome in outcomes {
                result.steps.extend(outcome.steps);
                errors.extend(outcome.error);
            }
            if !errors.is_empty() {
                result.fail(errors.join("; "));
            }
        }

        for step in &scenario.teardown {
            self.run_into(step, &mut ctx, &settings, None, &mut result.steps)
                .await;
        }

        if let Some(after) = scenario.after.as_ref().filter(|g| !g.skip) {
            bind_group_env(after, &mut ctx);
            for step in &after.steps {
                self.run_into(step, &mut ctx, &settings, Some("after"), &mut result.steps)
                    .await;
            }
        }

        self.finish(result, &ctx)
    }

    fn finish(&self, mut result: ScenarioResult, ctx: &VariableContext) -> ScenarioResult {
        let failed = result
            .steps
            .iter()
            .find(|s| s.is_failed())
            .map(|s| format!("Step '{}' failed", s.name));
        if let Some(message) = failed {
            result.fail(message);
        }
        result.finish(ctx.get_all());
        info!(
            "Test scenario finished: {} ({} ms) - Success: {}",
            result.name,
            result.duration_ms,
            result.is_success()
        );
        result
    }

    fn settings(&self, scenario: &Scenario, env: Option<&EnvironmentConfig>) -> RequestSettings {
        let defaults = &self.config.defaults;
        let mut base_url = self.config.global.base_url.clone();
        let mut headers = self.config.global.headers.clone();
        if let Some(env) = env {
            if let Some(url) = env.base_url.as_ref().filter(|url| !url.is_empty()) {
                base_url = Some(url.clone());
            }
            for (name, value) in &env.headers {
                set_header(&mut headers, name, value.clone());
            }
        }

        let http = &scenario.config.http;
        let timeout_secs = http
            .timeout_secs
            .or(scenario.config.timeout_secs)
            .unwrap_or(defaults.http_timeout_secs);

        RequestSettings {
            base_url,
            headers,
            timeout: Duration::from_secs(timeout_secs),
            verify_ssl: http.verify_ssl.unwrap_or(defaults.verify_ssl),
            follow_redirects: http.follow_redirects.unwrap_or(defaults.follow_redirects),
            retry: RetryPolicy {
                retries: scenario.config.retries.unwrap_or(defaults.max_retries),
                delay: Duration::from_millis(defaults.retry_delay_ms),
                backoff: Backoff::Linear,
            },
        }
    }

    /// Fan groups out as independent tasks, each on its own clone of the
    /// scenario context. Outcomes are merged once every task is done.
    async fn run_groups_parallel(
        &self,
        groups: &BTreeMap<String, TestGroup>,
        ctx: &VariableContext,
        settings: &Arc<RequestSettings>,
        concurrency: usize,
    ) -> Vec<GroupOutcome> {
        let semaphore = (concurrency > 0).then(|| Arc::new(Semaphore::new(concurrency)));
        let mut tasks = JoinSet::new();

        for (name, group) in groups {
            let engine = self.clone();
            let name = name.clone();
            let group = group.clone();
            let mut group_ctx = ctx.clone();
            let settings = Arc::clone(settings);
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                engine.run_group(&name, &group, &mut group_ctx, &settings).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("test group task failed: {}", e);
                    outcomes.push(GroupOutcome {
                        error: Some(format!("test group task failed: {e}")),
                        ..Default::default()
                    });
                }
            }
        }
        outcomes.sort_by(|a, b| a.name.cmp(&b.name));
        outcomes
    }

    #[instrument(skip_all, fields(group = %name))]
    async fn run_group(
        &self,
        name: &str,
        group: &TestGroup,
        ctx: &mut VariableContext,
        settings: &RequestSettings,
    ) -> GroupOutcome {
        let mut outcome = GroupOutcome {
            name: name.to_string(),
            ..Default::default()
        };
        if group.skip {
            warn!("Skipping test group: {}", name);
            return outcome;
        }
        info!("Running test group: {}", name);
        bind_group_env(group, ctx);

        let Some(data_driven) = &group.data_driven else {
            for step in &group.steps {
                let failed = self
                    .run_into(step, ctx, settings, Some(name), &mut outcome.steps)
                    .await;
                if failed && !group.continue_on_fail {
                    outcome.error = Some(format!("Test '{name}' step '{}' failed", step.name));
                    break;
                }
            }
            return outcome;
        };

        let records = match data_records(ctx, &data_driven.source) {
            Ok(records) => records,
            Err(message) => {
                outcome.error = Some(format!("{message} for test group '{name}'"));
                return outcome;
            }
        };

        for (i, record) in records.into_iter().enumerate() {
            let mut iteration = ctx.clone();
            iteration.set(Scope::Local, data_driven.variable.clone(), record);

            for step in &group.steps {
                let mut results = Vec::new();
                let failed = self
                    .run_into(step, &mut iteration, settings, Some(name), &mut results)
                    .await;
                outcome.steps.extend(results.into_iter().map(|mut r| {
                    r.name = format!("{} (data {})", r.name, i + 1);
                    r
                }));
                if failed && !group.continue_on_fail {
                    outcome.error = Some(format!(
                        "Test '{name}' step '{}' failed on data item {}",
                        step.name,
                        i + 1
                    ));
                    return outcome;
                }
            }
        }
        outcome
    }

    /// Run `step` (once, or once per record when data-driven), append its
    /// results to `out` and report whether any of them failed.
    async fn run_into(
        &self,
        step: &Step,
        ctx: &mut VariableContext,
        settings: &RequestSettings,
        group: Option<&str>,
        out: &mut Vec<StepResult>,
    ) -> bool {
        let results = match &step.data_driven {
            Some(data_driven) => {
                let records = match data_records(ctx, &data_driven.source) {
                    Ok(records) => records,
                    Err(message) => {
                        let mut result = StepResult::begin(&step.name, group);
                        result.fail(format!("{message} for step '{}'", step.name));
                        out.push(result.finish(ctx.get_all()));
                        return true;
                    }
                };

                let mut results = Vec::new();
                for (i, record) in records.into_iter().enumerate() {
                    let mut iteration = ctx.clone();
                    iteration.set(Scope::Local, data_driven.variable.clone(), record);
                    let mut result = self.execute_step(step, &mut iteration, settings, group).await;
                    result.name = format!("{} (data {})", step.name, i + 1);
                    let failed = result.is_failed();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                results
            }
            None => vec![self.execute_step(step, ctx, settings, group).await],
        };

        let failed = results.iter().any(StepResult::is_failed);
        out.extend(results);
        failed
    }

    #[instrument(skip_all, fields(step = %step.name))]
    async fn execute_step(
        &self,
        step: &Step,
        ctx: &mut VariableContext,
        settings: &RequestSettings,
        group: Option<&str>,
    ) -> StepResult {
        info!("Running step: {}", step.name);
        let mut result = StepResult::begin(&step.name, group);

        ctx.clear_step();
        let legacy = step.http.is_none();
        for (key, value) in &step.variables {
            // Extraction specs are bound from the response, never as text.
            if legacy && value.as_str().is_some_and(is_extractor) {
                continue;
            }
            let value = ctx.interpolate_value(value);
            ctx.set(Scope::Step, key.clone(), value);
        }

        if let Some(condition) = &step.condition {
            if !condition_holds(ctx, condition) {
                info!("Skipping step '{}': condition {} is falsy", step.name, condition);
                result.status = Status::Skipped;
                return result.finish(ctx.get_all());
            }
        }

        if step.http.is_none() && step.kind() != "http" {
            result.fail(format!("Unsupported step type: {}", step.kind()));
            return result.finish(ctx.get_all());
        }

        let Some(request) = self.resolve_request(step, ctx, settings) else {
            let keys: Vec<String> = step.variables.keys().cloned().collect();
            ctx.promote_step(&keys);
            debug!("Step '{}' only binds variables", step.name);
            return result.finish(ctx.get_all());
        };

        result.request = Some(RequestInfo {
            method: request.method.clone(),
            url: request
                .full_url()
                .map(|url| url.to_string())
                .unwrap_or_else(|_| request.url.clone()),
            headers: request.headers.clone(),
            body: request.body.as_ref().map(RequestBody::to_text),
        });

        let policy = step.retry.as_ref().map_or(settings.retry, RetryPolicy::from);
        let response = match execute_with_retry(self.transport.as_ref(), &request, policy).await {
            Ok(response) => response,
            Err(e) => {
                error!("Request for step '{}' failed: {}", step.name, e);
                result.fail(format!("HTTP request failed: {e}"));
                return result.finish(ctx.get_all());
            }
        };
        result.response = Some(response_info(&response));

        let bound = apply_captures(&step.capture, &response, ctx);
        ctx.promote_step(&bound);
        if legacy {
            let bound = extract_variables(&step.variables, &response, ctx);
            ctx.promote_step(&bound);
        }

        let mut checks = step.check.clone();
        if let Some(http) = &step.http {
            checks.extend(http.check.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let mut assertions = checks_to_assertions(&checks);
        assertions.extend(step.assertions.iter().cloned());

        if !assertions.is_empty() {
            result.assertions = match AssertionEngine::new(ctx).run_assertions(&assertions, &response) {
                Ok(results) => results,
                Err(e) => vec![AssertionResult::failure(format!("Assertion engine error: {e}"))],
            };
            let failures: Vec<&str> = result
                .assertions
                .iter()
                .filter(|a| !a.passed)
                .map(|a| a.message.as_str())
                .collect();
            if !failures.is_empty() {
                let message = failures.join("; ");
                result.fail(message);
            }
        }

        result.finish(ctx.get_all())
    }

    /// Interpolate the step's request descriptor. `None` for steps that
    /// only bind variables.
    fn resolve_request(
        &self,
        step: &Step,
        ctx: &VariableContext,
        settings: &RequestSettings,
    ) -> Option<ResolvedRequest> {
        if step.is_bind_only() {
            return None;
        }

        let empty = HashMap::new();
        let (method, url, headers, query, body, json, auth, cookies) = match (&step.http, &step.request) {
            (Some(http), _) => (
                http.method.as_deref(),
                &http.url,
                &http.headers,
                &http.query,
                http.body.as_ref(),
                http.json.as_ref(),
                http.auth.as_ref(),
                &empty,
            ),
            (None, Some(request)) => (
                request.method.as_deref(),
                &request.url,
                &request.headers,
                &request.query,
                request.body.as_ref(),
                None,
                request.auth.as_ref(),
                &request.cookies,
            ),
            (None, None) => return None,
        };

        let mut merged = settings.headers.clone();
        for (name, value) in headers {
            set_header(&mut merged, name, value.clone());
        }
        let mut headers = ctx.interpolate_map(&merged);

        let body = match (json, body) {
            (Some(json), _) => {
                if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("Content-Type".to_string(), "application/json".to_string());
                }
                Some(RequestBody::Json(ctx.interpolate_value(json)))
            }
            (None, Some(body)) => Some(match ctx.interpolate_value(body) {
                Value::String(text) => RequestBody::Text(text),
                other => RequestBody::Json(other),
            }),
            (None, None) => None,
        };

        Some(ResolvedRequest {
            method: method.unwrap_or("GET").to_ascii_uppercase(),
            url: ctx.interpolate_str(url),
            base_url: settings.base_url.clone(),
            headers,
            query: ctx.interpolate_map(query).into_iter().collect(),
            body,
            auth: auth.map(|auth| interpolate_auth(ctx, auth)),
            cookies: ctx.interpolate_map(cookies).into_iter().collect(),
            timeout: step
                .timeout_secs
                .map_or(settings.timeout, Duration::from_secs),
            verify_ssl: settings.verify_ssl,
            follow_redirects: settings.follow_redirects,
        })
    }
}

fn bind_group_env(group: &TestGroup, ctx: &mut VariableContext) {
    for (key, value) in &group.env {
        ctx.set(Scope::Local, key.clone(), value.clone());
    }
}

/// Insert a header, replacing any existing one that differs only in case.
fn set_header(headers: &mut HashMap<String, String>, name: &str, value: String) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}

fn interpolate_auth(ctx: &VariableContext, auth: &AuthConfig) -> AuthConfig {
    AuthConfig {
        kind: auth.kind.clone(),
        username: auth.username.as_deref().map(|s| ctx.interpolate_str(s)),
        password: auth.password.as_deref().map(|s| ctx.interpolate_str(s)),
        token: auth.token.as_deref().map(|s| ctx.interpolate_str(s)),
        config: auth
            .config
            .iter()
            .map(|(k, v)| (k.clone(), ctx.interpolate_value(v)))
            .collect(),
    }
}

fn response_info(response: &Response) -> ResponseInfo {
    ResponseInfo {
        status: response.status,
        headers: response.header_summary(),
        body: Some(response.body_text.clone()),
        duration_ms: u64::try_from(response.elapsed.as_millis()).unwrap_or(u64::MAX),
        size: response.size,
    }
}

/// The records held by `source`: an array of objects.
fn data_records(ctx: &VariableContext, source: &str) -> Result<Vec<Value>, String> {
    match ctx.get(source) {
        None => Err(format!("Data source '{source}' not found")),
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => Ok(items.clone()),
        Some(_) => Err(format!("Data source '{source}' is not a valid data array")),
    }
}

/// Falsy: null, `false`, the empty string and the strings `false` and
/// `null`. Everything else is truthy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty() || s == "false" || s == "null")
        }
        _ => true,
    }
}

/// Evaluate a step condition. A lone placeholder is looked up so typed
/// values keep their truthiness; anything else is interpolated and the
/// text judged. Unresolved placeholders are falsy.
fn condition_holds(ctx: &VariableContext, condition: &str) -> bool {
    if let Some(name) = sole_placeholder(condition) {
        return ctx.get_nested(name).is_some_and(|value| is_truthy(&value));
    }
    if !has_placeholder(condition) {
        if let Some(value) = ctx.get_nested(condition.trim()) {
            return is_truthy(&value);
        }
    }

    let text = ctx.interpolate_str(condition);
    !has_placeholder(&text) && is_truthy(&Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::report::MemoryReporter;
    use crate::validator::validate_scenario;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves canned responses keyed by URL path and records requests.
    #[derive(Default)]
    struct Scripted {
        routes: HashMap<String, Response>,
        requests: Mutex<Vec<ResolvedRequest>>,
    }

    impl Scripted {
        fn route(mut self, path: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(path.to_string(), Response::from_text(status, body));
            self
        }

        fn paths(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.full_url().unwrap().path().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn execute(&self, request: &ResolvedRequest) -> Result<Response, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let url = request.full_url()?;
            self.routes
                .get(url.path())
                .cloned()
                .ok_or_else(|| TransportError::InvalidUrl {
                    url: url.to_string(),
                    source: url::ParseError::EmptyHost,
                })
        }
    }

    fn engine(transport: &Arc<Scripted>) -> Engine {
        let mut config = EngineConfig::default();
        config.global.base_url = Some("http://mock".into());
        config
            .global
            .headers
            .insert("Accept".into(), "application/json".into());
        Engine::with_transport(config, transport.clone())
    }

    fn scenario(yaml: &str) -> Scenario {
        let mut scenario = Scenario::from_yaml(yaml).unwrap();
        validate_scenario(&mut scenario).unwrap();
        scenario
    }

    fn statuses(result: &ScenarioResult) -> Vec<(String, Status)> {
        result
            .steps
            .iter()
            .map(|s| (s.name.clone(), s.status))
            .collect()
    }

    #[test]
    fn test_truthiness() {
        let mut ctx = VariableContext::new();
        ctx.set(Scope::Local, "id", json!(123));
        ctx.set(Scope::Local, "zero", json!(0));
        ctx.set(Scope::Local, "off", json!(false));
        ctx.set(Scope::Local, "empty", json!(""));
        ctx.set(Scope::Local, "word", json!("false"));
        ctx.set(Scope::Local, "user", json!({"active": true}));

        assert!(condition_holds(&ctx, "{{id}}"));
        assert!(condition_holds(&ctx, "${{ zero }}"));
        assert!(condition_holds(&ctx, "{{user.active}}"));
        assert!(condition_holds(&ctx, "id"));
        assert!(!condition_holds(&ctx, "{{off}}"));
        assert!(!condition_holds(&ctx, "{{empty}}"));
        assert!(!condition_holds(&ctx, "{{word}}"));
        assert!(!condition_holds(&ctx, "{{missing}}"));
        assert!(!condition_holds(&ctx, "x{{missing}}"));
        assert!(condition_holds(&ctx, "id is {{id}}"));
    }

    #[tokio::test]
    async fn test_capture_feeds_condition_and_check() {
        let transport = Arc::new(
            Scripted::default()
                .route("/user", 200, r#"{"user":{"id":123}}"#)
                .route("/users/123", 200, r#"{"id":123,"name":"ann"}"#),
        );
        let scenario = scenario(
            r#"
name: capture chain
steps:
  - name: fetch user
    http:
      url: /user
    capture:
      uid:
        jsonpath: user.id
  - name: use user
    condition: "{{uid}}"
    http:
      url: /users/{{uid}}
      check:
        status: 200
        json:id: "{{uid}}"
    check:
      json:name: ann
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(transport.paths(), vec!["/user", "/users/123"]);
        assert_eq!(result.steps[1].assertions.len(), 3);
        assert_eq!(result.variables["uid"], json!(123));
    }

    #[tokio::test]
    async fn test_falsy_condition_skips_step() {
        let transport = Arc::new(Scripted::default().route("/a", 200, "{}"));
        let scenario = scenario(
            r#"
name: skip
steps:
  - name: skipped
    condition: "{{missing}}"
    http:
      url: /a
  - name: runs
    http:
      url: /a
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success());
        assert_eq!(
            statuses(&result),
            vec![
                ("skipped".to_string(), Status::Skipped),
                ("runs".to_string(), Status::Passed)
            ]
        );
        assert_eq!(transport.paths().len(), 1);
    }

    #[tokio::test]
    async fn test_group_stops_without_continue_on_fail() {
        let transport = Arc::new(
            Scripted::default()
                .route("/fail", 500, "{}")
                .route("/ok", 200, "{}"),
        );
        let scenario = scenario(
            r#"
name: groups
tests:
  strict:
    steps:
      - name: first
        http:
          url: /fail
          check:
            status: 200
      - name: second
        http:
          url: /ok
  lenient:
    continueOnFail: true
    steps:
      - name: first
        http:
          url: /fail
          check:
            status: 200
      - name: second
        http:
          url: /ok
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert_eq!(result.status, Status::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Test 'strict' step 'first' failed")
        );

        let strict: Vec<_> = result
            .steps
            .iter()
            .filter(|s| s.group.as_deref() == Some("strict"))
            .collect();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].error.as_deref(), Some("expected 200 but got 500"));

        let lenient = result
            .steps
            .iter()
            .filter(|s| s.group.as_deref() == Some("lenient"))
            .count();
        assert_eq!(lenient, 2);
    }

    #[tokio::test]
    async fn test_parallel_groups_do_not_share_variables() {
        let transport = Arc::new(
            Scripted::default()
                .route("/a", 200, r#"{"value":"from-a"}"#)
                .route("/b", 200, r#"{"value":"from-b"}"#),
        );
        let scenario = scenario(
            r#"
name: parallel
variables:
  shared: root
config:
  parallel: true
  concurrency: 1
tests:
  alpha:
    steps:
      - name: call a
        http:
          url: /a
        capture:
          alpha_value:
            jsonpath: value
  beta:
    steps:
      - name: call b
        http:
          url: /b
        capture:
          beta_value:
            jsonpath: value
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success());
        assert_eq!(result.steps.len(), 2);

        let alpha = &result.steps[0];
        let beta = &result.steps[1];
        assert_eq!(alpha.group.as_deref(), Some("alpha"));
        assert_eq!(alpha.variables["alpha_value"], json!("from-a"));
        assert!(!alpha.variables.contains_key("beta_value"));
        assert_eq!(beta.variables["beta_value"], json!("from-b"));
        assert!(!beta.variables.contains_key("alpha_value"));
        assert_eq!(beta.variables["shared"], json!("root"));
        assert!(!result.variables.contains_key("alpha_value"));
    }

    #[tokio::test]
    async fn test_sequential_groups_share_context() {
        let transport = Arc::new(
            Scripted::default()
                .route("/token", 200, r#"{"token":"t-1"}"#)
                .route("/me", 200, "{}"),
        );
        let scenario = scenario(
            r#"
name: sequential
tests:
  a_login:
    steps:
      - name: login
        http:
          url: /token
        capture:
          token:
            jsonpath: token
  b_profile:
    steps:
      - name: profile
        http:
          url: /me
          headers:
            Authorization: Bearer {{token}}
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success());
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[1].headers["Authorization"], "Bearer t-1");
        assert_eq!(result.variables["token"], json!("t-1"));
    }

    #[tokio::test]
    async fn test_before_hook_failure_aborts() {
        let transport = Arc::new(Scripted::default().route("/ok", 200, "{}"));
        let scenario = scenario(
            r#"
name: hooks
before:
  steps:
    - name: broken
      http:
        url: /nowhere
steps:
  - name: main
    http:
      url: /ok
teardown:
  - name: cleanup
    http:
      url: /ok
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert_eq!(result.status, Status::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("Before hook step 'broken' failed")
        );
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("HTTP request failed"));
        assert!(result.steps[0].assertions.is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_setup_and_steps() {
        let transport = Arc::new(
            Scripted::default()
                .route("/bad", 400, "{}")
                .route("/ok", 200, "{}"),
        );
        let setup_failure = scenario(
            r#"
name: setup
config:
  fail_fast: true
setup:
  - name: prepare
    http:
      url: /bad
      check:
        status: 200
steps:
  - name: main
    http:
      url: /ok
"#,
        );
        let result = engine(&transport).run_scenario(&setup_failure).await;
        assert_eq!(result.error.as_deref(), Some("Setup step 'prepare' failed"));
        assert_eq!(result.steps.len(), 1);

        let step_failure = scenario(
            r#"
name: steps
config:
  fail_fast: true
steps:
  - name: first
    http:
      url: /bad
      check:
        status: 200
  - name: second
    http:
      url: /ok
tests:
  group:
    steps:
      - name: grouped
        http:
          url: /ok
teardown:
  - name: cleanup
    http:
      url: /ok
"#,
        );
        let result = engine(&transport).run_scenario(&step_failure).await;
        assert_eq!(result.error.as_deref(), Some("Step 'first' failed"));
        let names: Vec<_> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "cleanup"]);
    }

    #[tokio::test]
    async fn test_failures_without_fail_fast_continue() {
        let transport = Arc::new(
            Scripted::default()
                .route("/bad", 400, "{}")
                .route("/ok", 200, "{}"),
        );
        let scenario = scenario(
            r#"
name: lenient
steps:
  - name: first
    http:
      url: /bad
      check:
        status: 200
  - name: second
    http:
      url: /ok
"#,
        );
        let result = engine(&transport).run_scenario(&scenario).await;
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.error.as_deref(), Some("Step 'first' failed"));
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].status, Status::Passed);
    }

    #[tokio::test]
    async fn test_data_driven_group_iterates_records() {
        let transport = Arc::new(
            Scripted::default()
                .route("/users/1", 200, r#"{"name":"ann"}"#)
                .route("/users/2", 404, "{}"),
        );
        let scenario = scenario(
            r#"
name: data
data:
  users:
    type: inline
    data:
      - id: 1
        name: ann
      - id: 2
        name: bob
tests:
  lookup:
    dataDriven:
      source: users
      variable: user
    steps:
      - name: get user
        http:
          url: /users/{{user.id}}
          check:
            status: 200
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert_eq!(
            statuses(&result),
            vec![
                ("get user (data 1)".to_string(), Status::Passed),
                ("get user (data 2)".to_string(), Status::Failed)
            ]
        );
        assert_eq!(
            result.error.as_deref(),
            Some("Test 'lookup' step 'get user' failed on data item 2")
        );
        assert!(!result.variables.contains_key("user"));
    }

    #[tokio::test]
    async fn test_data_driven_step_stops_at_first_failure() {
        let transport = Arc::new(
            Scripted::default()
                .route("/items/a", 200, "{}")
                .route("/items/b", 500, "{}")
                .route("/items/c", 200, "{}"),
        );
        let scenario = scenario(
            r#"
name: data step
variables:
  items:
    - key: a
    - key: b
    - key: c
steps:
  - name: item
    dataDriven:
      source: items
      variable: item
    http:
      url: /items/{{item.key}}
      check:
        status: 200
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        let names: Vec<_> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["item (data 1)", "item (data 2)"]);
        assert_eq!(transport.paths(), vec!["/items/a", "/items/b"]);
    }

    #[tokio::test]
    async fn test_missing_data_source_fails_group() {
        let transport = Arc::new(Scripted::default());
        let scenario = scenario(
            r#"
name: no data
tests:
  g:
    dataDriven:
      source: nothing
      variable: row
    steps:
      - name: s
        http:
          url: /x
"#,
        );
        let result = engine(&transport).run_scenario(&scenario).await;
        assert_eq!(
            result.error.as_deref(),
            Some("Data source 'nothing' not found for test group 'g'")
        );
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn test_data_source_load_failure_fails_scenario() {
        let transport = Arc::new(Scripted::default());
        let scenario = scenario(
            r#"
name: bad data
data:
  rows:
    type: csv
    path: does-not-exist.csv
steps:
  - name: s
    http:
      url: /x
"#,
        );
        let result = engine(&transport).run_scenario(&scenario).await;
        assert_eq!(result.status, Status::Failed);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .starts_with("Failed to load data source 'rows'"));
        assert!(transport.paths().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_group_and_bind_only_step() {
        let transport = Arc::new(Scripted::default().route("/items/42", 200, "{}"));
        let scenario = scenario(
            r#"
name: misc
steps:
  - name: bind
    variables:
      item_id: 42
  - name: use
    http:
      url: /items/{{item_id}}
tests:
  ignored:
    skip: true
    steps:
      - name: never
        http:
          url: /never
"#,
        );
        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success());
        assert_eq!(result.steps.len(), 2);
        assert_eq!(transport.paths(), vec!["/items/42"]);
    }

    #[tokio::test]
    async fn test_legacy_step_assertions_and_extraction() {
        let transport = Arc::new(
            Scripted::default()
                .route("/login", 200, r#"{"access_token":"tok","user":{"id":7}}"#)
                .route("/orders", 200, "[]"),
        );
        let scenario = scenario(
            r#"
name: legacy
steps:
  - name: login
    request:
      method: post
      url: /login
      body:
        user: "{{username}}"
    variables:
      token: "json:access_token"
      uid: "json:user.id"
    assertions:
      - type: json_path
        field: user.id
        operator: gt
        value: 5
      - type: json_path
        field: user.email
        value: x
        optional: true
  - name: orders
    type: http
    request:
      url: /orders
      auth:
        type: bearer
        token: "{{token}}"
      cookies:
        session: "{{uid}}"
    assertions:
      - type: body
        value: "[]"
  - name: rpc
    type: grpc
"#,
        );

        let mut config = EngineConfig::default();
        config.global.base_url = Some("http://mock".into());
        config
            .global
            .variables
            .insert("username".into(), json!("ann"));
        let engine = Engine::with_transport(config, transport.clone());

        let result = engine.run_scenario(&scenario).await;
        assert_eq!(
            statuses(&result),
            vec![
                ("login".to_string(), Status::Passed),
                ("orders".to_string(), Status::Passed),
                ("rpc".to_string(), Status::Failed)
            ]
        );
        assert_eq!(
            result.steps[2].error.as_deref(),
            Some("Unsupported step type: grpc")
        );

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].body, Some(RequestBody::Json(json!({"user": "ann"}))));
        let auth = requests[1].auth.as_ref().unwrap();
        assert_eq!(auth.token.as_deref(), Some("tok"));
        assert_eq!(requests[1].cookies["session"], "7");
    }

    #[tokio::test]
    async fn test_request_resolution_headers_and_json() {
        let transport = Arc::new(Scripted::default().route("/items", 201, "{}"));
        let scenario = scenario(
            r#"
name: resolve
variables:
  name: widget
config:
  timeout: 5
steps:
  - name: create
    timeout: 2
    http:
      method: post
      url: /items
      headers:
        accept: text/plain
      query:
        tag: "{{name}}"
      json:
        name: "{{name}}"
        count: 3
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success());

        let requests = transport.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.headers.get("accept").map(String::as_str), Some("text/plain"));
        assert!(!request.headers.contains_key("Accept"));
        assert_eq!(request.headers["Content-Type"], "application/json");
        assert_eq!(request.query["tag"], "widget");
        assert_eq!(
            request.body,
            Some(RequestBody::Json(json!({"name": "widget", "count": 3})))
        );
        assert_eq!(request.timeout, Duration::from_secs(2));

        let info = result.steps[0].request.as_ref().unwrap();
        assert_eq!(info.url, "http://mock/items?tag=widget");
        assert_eq!(result.steps[0].response.as_ref().unwrap().status, 201);
    }

    #[tokio::test]
    async fn test_environment_overrides() {
        let transport = Arc::new(Scripted::default().route("/ping", 200, "{}"));
        let mut config = EngineConfig::default();
        config.global.base_url = Some("http://mock".into());
        config.environments.insert(
            "staging".into(),
            EnvironmentConfig {
                base_url: Some("http://staging".into()),
                headers: HashMap::from([("X-Env".to_string(), "staging".to_string())]),
                variables: HashMap::from([("region".to_string(), json!("eu"))]),
            },
        );
        let engine = Engine::with_transport(config, transport.clone());

        let scenario = scenario(
            r#"
name: env
config:
  environment: staging
steps:
  - name: ping
    http:
      url: /ping
      query:
        region: "{{region}}"
"#,
        );
        let result = engine.run_scenario(&scenario).await;
        assert!(result.is_success());
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].base_url.as_deref(), Some("http://staging"));
        assert_eq!(requests[0].headers["X-Env"], "staging");
        assert_eq!(requests[0].query["region"], "eu");
    }

    #[tokio::test]
    async fn test_run_reports_every_scenario() {
        let transport = Arc::new(Scripted::default().route("/ok", 200, "{}"));
        let ok = scenario("name: ok\nsteps:\n  - name: s\n    http:\n      url: /ok\n");
        let bad = scenario("name: bad\nsteps:\n  - name: s\n    http:\n      url: /missing\n");
        let loaded: Vec<LoadedScenario> = [ok, bad]
            .into_iter()
            .map(|scenario| LoadedScenario {
                path: PathBuf::from("scenario.yaml"),
                scenario,
            })
            .collect();

        let mut reporter = MemoryReporter::new();
        let success = engine(&transport).run(&loaded, &mut reporter).await.unwrap();
        assert!(!success);
        assert_eq!(reporter.report.summary.total, 2);
        assert_eq!(reporter.report.summary.failed, 1);
        assert_eq!((reporter.started, reporter.finished), (1, 1));
    }

    #[tokio::test]
    async fn test_failed_legacy_extraction_leaves_variable_unbound() {
        let transport = Arc::new(
            Scripted::default()
                .route("/profile", 200, r#"{"name":"ann"}"#)
                .route("/echo", 200, "{}"),
        );
        let scenario = scenario(
            r#"
name: legacy extraction
steps:
  - name: profile
    request:
      url: /profile
    variables:
      token: "json:missing"
      trace: "header:X-Trace"
      name: "json:name"
      label: plain
  - name: echo
    request:
      url: /echo
      headers:
        Authorization: "Bearer {{token}}"
"#,
        );

        let result = engine(&transport).run_scenario(&scenario).await;
        assert!(result.is_success(), "{:?}", result.error);

        let profile = &result.steps[0].variables;
        assert!(!profile.contains_key("token"));
        assert!(!profile.contains_key("trace"));
        assert_eq!(profile["name"], json!("ann"));
        assert_eq!(profile["label"], json!("plain"));
        assert!(!result.variables.contains_key("token"));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[1].headers["Authorization"], "Bearer {{token}}");
    }
}

use serde::Serialize;
use serde_yaml::Value;
use tracing::warn;

/// What kind of document was normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// A workflow file: top-level `jobs` map.
    Workflow,
    /// An action metadata file with `runs.using: composite`.
    CompositeAction,
    /// An action metadata file that runs a node/docker entrypoint. Leaf.
    PackagedAction,
}

/// Declared permission surface, at workflow or job level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Permissions {
    /// No `permissions:` block present.
    Unspecified,
    WriteAll,
    ReadAll,
    /// Explicit scope map in declaration order, e.g. `[("contents", "read")]`.
    Scoped(Vec<(String, String)>),
}

impl Permissions {
    pub fn is_specified(&self) -> bool {
        !matches!(self, Permissions::Unspecified)
    }

    /// Scopes granted `write`, empty unless `Scoped`.
    pub fn write_scopes(&self) -> Vec<&str> {
        match self {
            Permissions::Scoped(scopes) => scopes
                .iter()
                .filter(|(_, level)| level == "write")
                .map(|(scope, _)| scope.as_str())
                .collect(),
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedStep {
    pub name: Option<String>,
    /// Raw `uses:` text, unparsed. Local (`./`) and `docker://` references
    /// are kept here but excluded from `component_refs`.
    pub uses: Option<String>,
    pub run: Option<String>,
    /// `with: ref:` input, kept for checkout-of-untrusted-head detection.
    pub with_ref: Option<String>,
    pub env_keys: Vec<String>,
    pub continue_on_error: bool,
    /// 1-based line of the step's `uses:`/`run:` key in the source, when it
    /// could be recovered.
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedJob {
    pub id: String,
    /// `runs-on` labels, flattened.
    pub runs_on: Vec<String>,
    pub permissions: Permissions,
    /// Job-level `uses:` (reusable workflow call).
    pub uses: Option<String>,
    pub secrets_inherit: bool,
    pub continue_on_error: bool,
    /// Matrix axis names, empty when no strategy matrix is declared.
    pub matrix_keys: Vec<String>,
    pub steps: Vec<NormalizedStep>,
}

/// Normalized intermediate form shared by every rule check.
///
/// Produced by [`normalize_document`]; deterministic for identical input
/// bytes (jobs and steps keep their declaration order).
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedDefinition {
    pub kind: DefinitionKind,
    pub name: Option<String>,
    /// Trigger event names (`on:`), declaration order.
    pub triggers: Vec<String>,
    pub permissions: Permissions,
    /// Declared input names (workflow_call/workflow_dispatch inputs, or
    /// composite action inputs).
    pub inputs: Vec<String>,
    pub jobs: Vec<NormalizedJob>,
}

impl NormalizedDefinition {
    /// All third-party component references (step-level and job-level
    /// `uses:`), with source line where known, in discovery order.
    /// Local `./` and `docker://` references are filtered out.
    pub fn component_refs(&self) -> Vec<(String, Option<usize>)> {
        let mut refs = Vec::new();
        for job in &self.jobs {
            if let Some(uses) = &job.uses {
                if is_third_party(uses) {
                    refs.push((uses.clone(), None));
                }
            }
            for step in &job.steps {
                if let Some(uses) = &step.uses {
                    if is_third_party(uses) {
                        refs.push((uses.clone(), step.line));
                    }
                }
            }
        }
        refs
    }

    pub fn has_trigger(&self, event: &str) -> bool {
        self.triggers.iter().any(|t| t == event)
    }
}

pub fn is_third_party(uses: &str) -> bool {
    !uses.starts_with("./") && !uses.starts_with("docker://")
}

/// Convert a workflow or action-metadata YAML document into the normalized
/// shape. Fails on structurally invalid YAML or on documents that are
/// neither workflows nor action metadata; callers record that as a
/// `malformed_definition` issue rather than aborting the run.
pub fn normalize_document(raw: &str) -> anyhow::Result<NormalizedDefinition> {
    let doc: Value = serde_yaml::from_str(raw)?;
    let Value::Mapping(root) = &doc else {
        anyhow::bail!("document root is not a mapping");
    };

    let name = root
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(jobs) = root.get("jobs") {
        return normalize_workflow(raw, root, name, jobs);
    }
    if let Some(runs) = root.get("runs") {
        return normalize_action(raw, root, name, runs);
    }
    anyhow::bail!("document has neither 'jobs' nor 'runs'");
}

fn normalize_workflow(
    raw: &str,
    root: &serde_yaml::Mapping,
    name: Option<String>,
    jobs: &Value,
) -> anyhow::Result<NormalizedDefinition> {
    let Value::Mapping(jobs) = jobs else {
        anyhow::bail!("'jobs' is not a mapping");
    };

    // `on` is a keyword, so YAML 1.1 parsers may have turned it into `true`.
    let on = root
        .get("on")
        .or_else(|| root.get(Value::Bool(true)));
    let triggers = parse_triggers(on);
    let inputs = parse_workflow_inputs(on);
    let permissions = parse_permissions(root.get("permissions"));

    let mut locator = LineLocator::new(raw);
    let mut normalized_jobs = Vec::new();
    for (job_key, job_value) in jobs {
        let Some(job_id) = job_key.as_str() else {
            continue;
        };
        match normalize_job(job_id, job_value, &mut locator) {
            Ok(job) => normalized_jobs.push(job),
            Err(e) => {
                warn!(job = %job_id, error = %e, "failed to normalize job");
            }
        }
    }

    Ok(NormalizedDefinition {
        kind: DefinitionKind::Workflow,
        name,
        triggers,
        permissions,
        inputs,
        jobs: normalized_jobs,
    })
}

fn normalize_job(
    job_id: &str,
    job_value: &Value,
    locator: &mut LineLocator<'_>,
) -> anyhow::Result<NormalizedJob> {
    let Value::Mapping(job) = job_value else {
        anyhow::bail!("job is not a mapping");
    };

    let runs_on = match job.get("runs-on") {
        Some(Value::String(label)) => vec![label.clone()],
        Some(Value::Sequence(labels)) => labels
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => vec![],
    };

    let uses = job
        .get("uses")
        .and_then(Value::as_str)
        .map(str::to_string);

    let secrets_inherit = matches!(
        job.get("secrets"),
        Some(Value::String(s)) if s == "inherit"
    );

    let continue_on_error = job
        .get("continue-on-error")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let matrix_keys = job
        .get("strategy")
        .and_then(|s| s.get("matrix"))
        .and_then(Value::as_mapping)
        .map(|m| {
            m.keys()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut steps = Vec::new();
    if let Some(Value::Sequence(step_values)) = job.get("steps") {
        for step_value in step_values {
            if let Some(step) = normalize_step(step_value, locator) {
                steps.push(step);
            }
        }
    }

    Ok(NormalizedJob {
        id: job_id.to_string(),
        runs_on,
        permissions: parse_permissions(job.get("permissions")),
        uses,
        secrets_inherit,
        continue_on_error,
        matrix_keys,
        steps,
    })
}

fn normalize_step(step_value: &Value, locator: &mut LineLocator<'_>) -> Option<NormalizedStep> {
    let step = step_value.as_mapping()?;

    let uses = step
        .get("uses")
        .and_then(Value::as_str)
        .map(str::to_string);
    let run = step
        .get("run")
        .and_then(Value::as_str)
        .map(str::to_string);

    let line = uses
        .as_deref()
        .and_then(|u| locator.find("uses", u))
        .or_else(|| run.as_deref().and_then(|r| locator.find("run", r)));

    Some(NormalizedStep {
        name: step
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        uses,
        run,
        with_ref: step
            .get("with")
            .and_then(|w| w.get("ref"))
            .and_then(Value::as_str)
            .map(str::to_string),
        env_keys: step
            .get("env")
            .and_then(Value::as_mapping)
            .map(|m| {
                m.keys()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        continue_on_error: step
            .get("continue-on-error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        line,
    })
}

fn normalize_action(
    raw: &str,
    root: &serde_yaml::Mapping,
    name: Option<String>,
    runs: &Value,
) -> anyhow::Result<NormalizedDefinition> {
    let using = runs
        .get("using")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let inputs = root
        .get("inputs")
        .and_then(Value::as_mapping)
        .map(|m| {
            m.keys()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if using != "composite" {
        return Ok(NormalizedDefinition {
            kind: DefinitionKind::PackagedAction,
            name,
            triggers: vec![],
            permissions: Permissions::Unspecified,
            inputs,
            jobs: vec![],
        });
    }

    // Composite steps are modelled as a single synthetic job so every rule
    // sees the same job/step shape for workflows and composites.
    let mut locator = LineLocator::new(raw);
    let mut steps = Vec::new();
    if let Some(Value::Sequence(step_values)) = runs.get("steps") {
        for step_value in step_values {
            if let Some(step) = normalize_step(step_value, &mut locator) {
                steps.push(step);
            }
        }
    }

    Ok(NormalizedDefinition {
        kind: DefinitionKind::CompositeAction,
        name,
        triggers: vec![],
        permissions: Permissions::Unspecified,
        inputs,
        jobs: vec![NormalizedJob {
            id: "composite".to_string(),
            runs_on: vec![],
            permissions: Permissions::Unspecified,
            uses: None,
            secrets_inherit: false,
            continue_on_error: false,
            matrix_keys: vec![],
            steps,
        }],
    })
}

fn parse_triggers(on: Option<&Value>) -> Vec<String> {
    match on {
        Some(Value::String(event)) => vec![event.clone()],
        Some(Value::Sequence(events)) => events
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::Mapping(events)) => events
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => vec![],
    }
}

fn parse_workflow_inputs(on: Option<&Value>) -> Vec<String> {
    let Some(Value::Mapping(events)) = on else {
        return vec![];
    };
    let mut inputs = Vec::new();
    for event in ["workflow_call", "workflow_dispatch"] {
        if let Some(decl) = events
            .get(event)
            .and_then(|v| v.get("inputs"))
            .and_then(Value::as_mapping)
        {
            inputs.extend(decl.keys().filter_map(Value::as_str).map(str::to_string));
        }
    }
    inputs
}

fn parse_permissions(value: Option<&Value>) -> Permissions {
    match value {
        None => Permissions::Unspecified,
        Some(Value::String(s)) if s == "write-all" => Permissions::WriteAll,
        Some(Value::String(s)) if s == "read-all" => Permissions::ReadAll,
        Some(Value::Mapping(scopes)) => Permissions::Scoped(
            scopes
                .iter()
                .filter_map(|(k, v)| {
                    Some((k.as_str()?.to_string(), v.as_str().unwrap_or("").to_string()))
                })
                .collect(),
        ),
        // `permissions: {}` parses as an empty mapping above; anything else
        // unexpected is treated as an explicit-but-empty declaration.
        Some(_) => Permissions::Scoped(vec![]),
    }
}

/// Best-effort recovery of 1-based source lines for step keys. serde_yaml
/// does not expose positions, so we scan forward through the raw text for
/// the first line containing `<key>:` and the value's first line.
struct LineLocator<'a> {
    lines: Vec<&'a str>,
    cursor: usize,
}

impl<'a> LineLocator<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            lines: raw.lines().collect(),
            cursor: 0,
        }
    }

    fn find(&mut self, key: &str, value: &str) -> Option<usize> {
        let needle = format!("{key}:");
        let first_value_line = value.lines().next().unwrap_or(value).trim();
        for (offset, line) in self.lines[self.cursor..].iter().enumerate() {
            let trimmed = line.trim_start().trim_start_matches("- ");
            if trimmed.starts_with(&needle)
                && (first_value_line.is_empty() || line.contains(first_value_line) || trimmed == needle)
            {
                let idx = self.cursor + offset;
                self.cursor = idx + 1;
                return Some(idx + 1);
            }
        }
        None
    }
}

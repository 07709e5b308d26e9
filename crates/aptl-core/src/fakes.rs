//! In-memory fakes for the orchestration seams (testing only).
//!
//! Provides `ScriptedExecutor`, `FakeRuntime`, `FakeKeyProvisioner`, and
//! `FakeCertProvisioner`, which satisfy the trait contracts without touching
//! processes or the container runtime, and record every call for assertions.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::certs::{CertProvisioner, CertResult, CERTS_SUBDIR};
use crate::error::{LabError, Result};
use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};
use crate::result::LabResult;
use crate::runtime::{LabStatus, RuntimeClient, UnitDescriptor};
use crate::ssh::{KeyProvisioner, SshKeyResult, KEY_NAME};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

type Handler = Arc<dyn Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync>;

#[derive(Clone)]
enum Response {
    Output(CommandOutput),
    Error(String),
    Handler(Handler),
}

struct Rule {
    prefix: Vec<String>,
    responses: VecDeque<Response>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        let argv = spec.argv();
        self.prefix.len() <= argv.len() && self.prefix.iter().zip(&argv).all(|(p, a)| p == a)
    }

    /// Pop the next queued response; the last one repeats forever.
    fn next(&mut self) -> Response {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or(Response::Output(CommandOutput::default()))
        } else {
            self.responses
                .front()
                .cloned()
                .unwrap_or(Response::Output(CommandOutput::default()))
        }
    }
}

/// Executor that answers from scripted rules keyed by argv prefix.
///
/// Rules registered later take precedence. Unmatched commands succeed with
/// empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, prefix: &[&str], responses: Vec<Response>) {
        lock(&self.rules).push(Rule {
            prefix: prefix.iter().map(|p| p.to_string()).collect(),
            responses: responses.into(),
        });
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn respond(&self, prefix: &[&str], output: CommandOutput) {
        self.push(prefix, vec![Response::Output(output)]);
    }

    /// Answer with exit code 0 and the given stdout.
    pub fn respond_ok(&self, prefix: &[&str], stdout: &str) {
        self.respond(
            prefix,
            CommandOutput {
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    /// Answer with exit code 1 and the given stderr.
    pub fn respond_fail(&self, prefix: &[&str], stderr: &str) {
        self.respond(
            prefix,
            CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Fail to run the command at all (as if the tool were missing).
    pub fn respond_err(&self, prefix: &[&str], message: &str) {
        self.push(prefix, vec![Response::Error(message.to_string())]);
    }

    /// Answer successive calls with successive outputs; the last repeats.
    pub fn respond_seq(&self, prefix: &[&str], outputs: Vec<CommandOutput>) {
        self.push(prefix, outputs.into_iter().map(Response::Output).collect());
    }

    /// Compute the answer with `handler`, which may also cause side effects.
    pub fn respond_with<F>(&self, prefix: &[&str], handler: F)
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        self.push(prefix, vec![Response::Handler(Arc::new(handler))]);
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.calls).clone()
    }

    /// Number of commands run whose argv starts with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|spec| {
                let argv = spec.argv();
                prefix.len() <= argv.len() && prefix.iter().zip(&argv).all(|(p, a)| p == a)
            })
            .count()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        lock(&self.calls).push(spec.clone());

        let response = {
            let mut rules = lock(&self.rules);
            rules
                .iter_mut()
                .rev()
                .find(|rule| rule.matches(spec))
                .map(Rule::next)
        };

        match response {
            None => Ok(CommandOutput::default()),
            Some(Response::Output(out)) => Ok(out),
            Some(Response::Error(message)) => Err(LabError::tool(&spec.program, message)),
            Some(Response::Handler(handler)) => handler(spec),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// Runtime client that records calls and answers from scripted state.
#[derive(Default)]
pub struct FakeRuntime {
    start_result: Mutex<Option<LabResult>>,
    status: Mutex<LabStatus>,
    units: Mutex<HashMap<String, VecDeque<Result<UnitDescriptor>>>>,
    failing_images: Mutex<Vec<String>>,
    starts: Mutex<Vec<Vec<String>>>,
    stops: Mutex<Vec<(Vec<String>, bool)>>,
    pulls: Mutex<Vec<String>>,
    inspects: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` return a failure with `error`.
    pub fn fail_start(&self, error: &str) {
        *lock(&self.start_result) = Some(LabResult::failed(error));
    }

    pub fn set_status(&self, status: LabStatus) {
        *lock(&self.status) = status;
    }

    /// Script successive `inspect_unit` answers for `name`; the last repeats.
    pub fn script_unit(&self, name: &str, answers: Vec<Result<UnitDescriptor>>) {
        lock(&self.units).insert(name.to_string(), answers.into());
    }

    /// Shorthand for a unit that always reports the given state and health.
    pub fn add_unit(&self, name: &str, state: &str, health: Option<&str>) {
        self.script_unit(
            name,
            vec![Ok(UnitDescriptor {
                name: name.to_string(),
                state: state.to_string(),
                health: health.map(str::to_string),
            })],
        );
    }

    pub fn fail_pull(&self, image: &str) {
        lock(&self.failing_images).push(image.to_string());
    }

    pub fn starts(&self) -> Vec<Vec<String>> {
        lock(&self.starts).clone()
    }

    pub fn stops(&self) -> Vec<(Vec<String>, bool)> {
        lock(&self.stops).clone()
    }

    pub fn pulls(&self) -> Vec<String> {
        lock(&self.pulls).clone()
    }

    pub fn inspect_count(&self, name: &str) -> usize {
        lock(&self.inspects).iter().filter(|n| *n == name).count()
    }
}

fn clone_answer(answer: &Result<UnitDescriptor>) -> Result<UnitDescriptor> {
    match answer {
        Ok(unit) => Ok(unit.clone()),
        Err(LabError::NotFound(name)) => Err(LabError::NotFound(name.clone())),
        Err(other) => Err(LabError::tool("runtime", other.to_string())),
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn start(&self, profiles: &[String]) -> LabResult {
        lock(&self.starts).push(profiles.to_vec());
        lock(&self.start_result)
            .clone()
            .unwrap_or_else(|| LabResult::ok("Lab started"))
    }

    async fn stop(&self, profiles: &[String], remove_volumes: bool) -> LabResult {
        lock(&self.stops).push((profiles.to_vec(), remove_volumes));
        LabResult::ok("Lab stopped")
    }

    async fn status(&self) -> LabStatus {
        lock(&self.status).clone()
    }

    async fn inspect_unit(&self, name: &str) -> Result<UnitDescriptor> {
        lock(&self.inspects).push(name.to_string());
        let mut units = lock(&self.units);
        let Some(answers) = units.get_mut(name) else {
            return Err(LabError::NotFound(name.to_string()));
        };
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().map(clone_answer)
        };
        answer.unwrap_or_else(|| Err(LabError::NotFound(name.to_string())))
    }

    async fn pull_image(&self, image: &str) -> LabResult {
        lock(&self.pulls).push(image.to_string());
        if lock(&self.failing_images).iter().any(|i| i == image) {
            LabResult::failed(format!("pull access denied for {image}"))
        } else {
            LabResult::ok(format!("Pulled {image}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Provisioner fakes
// ---------------------------------------------------------------------------

/// Key provisioner that counts calls and generates only on the first one.
#[derive(Default)]
pub struct FakeKeyProvisioner {
    calls: Mutex<usize>,
    failure: Mutex<Option<String>>,
}

impl FakeKeyProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: &str) -> Self {
        let fake = Self::default();
        *lock(&fake.failure) = Some(error.to_string());
        fake
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl KeyProvisioner for FakeKeyProvisioner {
    async fn ensure(&self, _keys_dir: &Path, host_ssh_dir: &Path) -> Result<SshKeyResult> {
        let mut calls = lock(&self.calls);
        *calls += 1;
        if let Some(error) = lock(&self.failure).clone() {
            return Err(LabError::tool("ssh-keygen", error));
        }
        Ok(SshKeyResult {
            generated: *calls == 1,
            key_path: host_ssh_dir.join(KEY_NAME),
        })
    }
}

/// Certificate provisioner that counts calls and can be told to fail.
#[derive(Default)]
pub struct FakeCertProvisioner {
    calls: Mutex<usize>,
    failure: Mutex<Option<String>>,
}

impl FakeCertProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: &str) -> Self {
        let fake = Self::default();
        *lock(&fake.failure) = Some(error.to_string());
        fake
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl CertProvisioner for FakeCertProvisioner {
    async fn ensure(&self, project_dir: &Path) -> Result<CertResult> {
        let mut calls = lock(&self.calls);
        *calls += 1;
        if let Some(error) = lock(&self.failure).clone() {
            return Err(LabError::tool("certificate generator", error));
        }
        let certs_dir: PathBuf = project_dir.join(CERTS_SUBDIR);
        Ok(CertResult {
            generated: *calls == 1,
            certs_dir,
        })
    }
}

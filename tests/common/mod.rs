//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use infragraph::config::{ConfigParser, Manifest};
use infragraph::error::{ProviderError, ProviderResult};
use infragraph::executor::{ExecutorConfig, RetryConfig};
use infragraph::model::Attributes;
use infragraph::provider::{ProviderApi, Provisioned};
use infragraph::reconciler::Reconciler;
use infragraph::state::StateStore;

/// One provider call, identified by the resource's `label` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Update(String),
    Delete(String),
}

impl Call {
    pub fn label(&self) -> &str {
        match self {
            Self::Create(label) | Self::Update(label) | Self::Delete(label) => label,
        }
    }
}

#[derive(Default)]
struct Script {
    next_id: u64,
    failures: HashMap<String, VecDeque<ProviderError>>,
    hanging: HashSet<String>,
    calls: Vec<Call>,
    /// provider id -> label
    live: BTreeMap<String, String>,
}

/// In-memory provider with scripted failures and call tracking.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The next calls for `label` fail with `errors`, in order.
    pub fn fail(&self, label: &str, errors: impl IntoIterator<Item = ProviderError>) {
        self.script()
            .failures
            .entry(label.to_string())
            .or_default()
            .extend(errors);
    }

    /// Calls for `label` never answer.
    pub fn hang(&self, label: &str) {
        self.script().hanging.insert(label.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    pub fn calls_for(&self, label: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|c| c.label() == label)
            .count()
    }

    /// Position of `call` in the call log.
    pub fn position(&self, call: &Call) -> usize {
        self.script()
            .calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{call:?} was never made"))
    }

    /// Labels of resources that currently exist.
    pub fn live(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.script().live.values().cloned().collect();
        labels.sort();
        labels
    }

    /// Highest number of calls in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    async fn answer(&self, call: Call) -> ProviderResult<()> {
        let label = call.label().to_string();
        let (failure, hanging) = {
            let mut script = self.script();
            script.calls.push(call);
            let failure = script
                .failures
                .get_mut(&label)
                .and_then(VecDeque::pop_front);
            (failure, script.hanging.contains(&label))
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        failure.map_or(Ok(()), Err)
    }
}

fn label_of(resource_type: &str, attributes: &Attributes) -> String {
    attributes
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or(resource_type)
        .to_string()
}

#[async_trait]
impl ProviderApi for ScriptedProvider {
    async fn create_resource(
        &self,
        resource_type: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Provisioned> {
        let label = label_of(resource_type, attributes);
        self.answer(Call::Create(label.clone())).await?;

        let mut script = self.script();
        script.next_id += 1;
        let provider_id = format!("{resource_type}-{}", script.next_id);
        script.live.insert(provider_id.clone(), label.clone());

        let mut outputs = Attributes::new();
        outputs.insert(
            String::from("endpoint"),
            Value::String(format!("{label}.internal")),
        );
        Ok(Provisioned {
            provider_id,
            outputs,
        })
    }

    async fn update_resource(
        &self,
        resource_type: &str,
        _provider_id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        self.answer(Call::Update(label_of(resource_type, attributes)))
            .await?;
        Ok(Attributes::new())
    }

    async fn delete_resource(&self, _resource_type: &str, provider_id: &str) -> ProviderResult<()> {
        let label = self
            .script()
            .live
            .get(provider_id)
            .cloned()
            .unwrap_or_else(|| provider_id.to_string());
        self.answer(Call::Delete(label)).await?;
        self.script().live.remove(provider_id);
        Ok(())
    }
}

/// A network, a subnet on it, and two servers on the subnet.
pub const STACK: &str = r#"
project:
  name: arena
  environment: test

types:
  network: {}
  subnet:
    force_new: [cidr]
  server:
    force_new: [image]

resources:
  - type: network
    name: main
    attributes:
      label: network.main
      cidr: 10.0.0.0/16

  - type: subnet
    name: a
    attributes:
      label: subnet.a
      cidr: 10.0.1.0/24
      network_id: "${network.main.id}"

  - type: server
    name: web
    attributes:
      label: server.web
      image: web:1
      subnet_id: "${subnet.a.id}"

  - type: server
    name: db
    attributes:
      label: server.db
      image: db:1
      subnet_id: "${subnet.a.id}"
"#;

pub fn manifest(yaml: &str) -> Manifest {
    ConfigParser::new().parse_yaml(yaml, None).unwrap()
}

/// Executor tuning with near-zero retry delays.
pub fn fast_config(concurrency: usize) -> ExecutorConfig {
    ExecutorConfig {
        concurrency,
        retry: RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
        action_timeout: Duration::from_secs(5),
    }
}

pub fn reconciler(
    yaml: &str,
    provider: &Arc<ScriptedProvider>,
    store: Arc<dyn StateStore>,
) -> Reconciler {
    let api: Arc<dyn ProviderApi> = provider.clone();
    Reconciler::from_manifest(&manifest(yaml), &api, store)
        .unwrap()
        .with_config(fast_config(4))
}

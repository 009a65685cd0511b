//! Fake workers and inspectors for driving the wall without real processes

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use camwall::error::{DisplayError, DisplayResult};
use camwall::traits::{CodecInspector, Worker, WorkerLauncher};
use camwall::types::{ExitInfo, OutputTarget, PipelineSpec, StopOutcome, WorkerRole};

/// Scripted behaviour of one live worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Exit with `code` after `after`
    Exit { after: Duration, code: i32 },
    /// Run until terminated
    Run,
    /// Ignore SIGTERM; stopping it needs a kill
    Stubborn,
}

impl Behaviour {
    pub fn crash() -> Self {
        Behaviour::Exit {
            after: Duration::from_millis(300),
            code: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct Live {
    id: Uuid,
    source: String,
    role: WorkerRole,
    output: OutputTarget,
}

#[derive(Default)]
struct Ledger {
    scripts: HashMap<String, VecDeque<Behaviour>>,
    fallback: HashMap<String, Behaviour>,
    specs: Vec<PipelineSpec>,
    terminated: Vec<(String, WorkerRole)>,
    live: Vec<Live>,
    overlaps: Vec<String>,
}

/// Records every launch and keeps track of which outputs are occupied
#[derive(Clone, Default)]
pub struct RecordingLauncher {
    ledger: Arc<Mutex<Ledger>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, source: &str, behaviours: impl IntoIterator<Item = Behaviour>) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.scripts.entry(source.to_string()).or_default().extend(behaviours);
    }

    pub fn always(&self, source: &str, behaviour: Behaviour) {
        self.ledger.lock().unwrap().fallback.insert(source.to_string(), behaviour);
    }

    /// Every spec launched for `source`, oldest first
    pub fn specs(&self, source: &str) -> Vec<PipelineSpec> {
        let ledger = self.ledger.lock().unwrap();
        ledger.specs.iter().filter(|s| s.source == source).cloned().collect()
    }

    pub fn last_live_spec(&self, source: &str) -> Option<PipelineSpec> {
        self.specs(source).into_iter().rev().find(|s| s.role == WorkerRole::Live)
    }

    pub fn live_launches(&self, source: &str) -> usize {
        self.specs(source).iter().filter(|s| s.role == WorkerRole::Live).count()
    }

    pub fn was_terminated(&self, source: &str) -> bool {
        let ledger = self.ledger.lock().unwrap();
        ledger.terminated.iter().any(|(s, _)| s == source)
    }

    /// Sources whose worker started while another worker held the same output
    pub fn overlaps(&self) -> Vec<String> {
        self.ledger.lock().unwrap().overlaps.clone()
    }

    /// Sources with a running live worker
    pub fn live_sources(&self) -> Vec<String> {
        let ledger = self.ledger.lock().unwrap();
        let mut sources: Vec<String> = ledger
            .live
            .iter()
            .filter(|l| l.role == WorkerRole::Live)
            .map(|l| l.source.clone())
            .collect();
        sources.sort();
        sources
    }

    pub fn running_workers(&self) -> usize {
        self.ledger.lock().unwrap().live.len()
    }
}

impl WorkerLauncher for RecordingLauncher {
    fn launch(&self, spec: &PipelineSpec) -> DisplayResult<Box<dyn Worker>> {
        let mut ledger = self.ledger.lock().unwrap();
        let behaviour = match spec.role {
            WorkerRole::Placeholder => Behaviour::Run,
            _ => {
                let next = ledger.scripts.get_mut(&spec.source).and_then(VecDeque::pop_front);
                next.unwrap_or_else(|| ledger.fallback.get(&spec.source).copied().unwrap_or(Behaviour::Run))
            }
        };

        ledger.specs.push(spec.clone());
        if ledger.live.iter().any(|l| l.output == spec.output) {
            ledger.overlaps.push(spec.source.clone());
        }

        let id = Uuid::new_v4();
        ledger.live.push(Live {
            id,
            source: spec.source.clone(),
            role: spec.role,
            output: spec.output.clone(),
        });

        let exit_at = match behaviour {
            Behaviour::Exit { after, code } => Some((Instant::now() + after, code)),
            _ => None,
        };

        Ok(Box::new(RecordedWorker {
            id,
            source: spec.source.clone(),
            role: spec.role,
            behaviour,
            exit_at,
            ledger: self.ledger.clone(),
        }))
    }
}

struct RecordedWorker {
    id: Uuid,
    source: String,
    role: WorkerRole,
    behaviour: Behaviour,
    exit_at: Option<(Instant, i32)>,
    ledger: Arc<Mutex<Ledger>>,
}

impl RecordedWorker {
    fn forget(&self) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.live.retain(|l| l.id != self.id);
        }
    }
}

impl Drop for RecordedWorker {
    fn drop(&mut self) {
        self.forget();
    }
}

#[async_trait]
impl Worker for RecordedWorker {
    fn id(&self) -> Uuid {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> DisplayResult<ExitInfo> {
        match self.exit_at {
            Some((deadline, code)) => {
                tokio::time::sleep_until(deadline).await;
                self.forget();
                Ok(ExitInfo::code(code))
            }
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, grace: Duration) -> StopOutcome {
        self.ledger
            .lock()
            .unwrap()
            .terminated
            .push((self.source.clone(), self.role));

        let outcome = if self.behaviour == Behaviour::Stubborn {
            tokio::time::sleep(grace).await;
            StopOutcome::Forced
        } else {
            StopOutcome::Clean
        };
        self.forget();
        outcome
    }
}

/// Inspector answering from a fixed codec table keyed by URL
#[derive(Clone, Default)]
pub struct TableInspector {
    codecs: Arc<Mutex<HashMap<String, String>>>,
    hang: Arc<Mutex<Vec<String>>>,
}

impl TableInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codec(&self, url: &str, codec: &str) -> &Self {
        self.codecs.lock().unwrap().insert(url.to_string(), codec.to_string());
        self
    }

    /// Never answer for `url`
    pub fn hang(&self, url: &str) -> &Self {
        self.hang.lock().unwrap().push(url.to_string());
        self
    }
}

#[async_trait]
impl CodecInspector for TableInspector {
    async fn inspect(&self, url: &str, _timeout: Duration) -> DisplayResult<String> {
        let hangs = self.hang.lock().unwrap().iter().any(|u| u == url);
        if hangs {
            std::future::pending::<()>().await;
        }

        let codec = self.codecs.lock().unwrap().get(url).cloned();
        match codec {
            Some(codec) => Ok(format!(
                r#"{{"streams": [{{"codec_name": "{codec}", "width": 1920, "height": 1080}}]}}"#
            )),
            None => Err(DisplayError::probe(url, "Connection refused")),
        }
    }
}

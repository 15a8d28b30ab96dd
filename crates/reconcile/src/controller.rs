//! Reconcile entry points and the kube runtime wiring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use converge_apply::{Persister, DEFAULT_FIELD_MANAGER};
use converge_core::{Clock, ConvergeError, ResourceKey, Result, SystemClock};
use converge_kubehub::ResourceStore;
use converge_readiness::ReadinessRegistry;
use converge_store::BackoffTable;
use futures::StreamExt;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject},
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        watcher,
    },
    Client,
};
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use crate::{owner_gvk, owner_key, Context, Hooks, Owner, PhaseSequencer, ReconcileCtx, SequenceOutcome, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    RequeueAfter(Duration),
}

/// Runs one reconcile of an owner: load, build the resource set, sequence the
/// phases, write status.
pub struct Reconciler<K> {
    ctx: Arc<Context<K>>,
    sequencer: PhaseSequencer<K>,
    status: StatusReporter,
    backoff: BackoffTable,
}

pub struct ReconcilerBuilder<K> {
    store: Arc<dyn ResourceStore>,
    hooks: Hooks<K>,
    readiness: ReadinessRegistry,
    clock: Arc<dyn Clock>,
    field_manager: String,
    immutable_kinds: Option<Vec<String>>,
    sequencer: Option<PhaseSequencer<K>>,
    backoff: BackoffTable,
}

impl<K: Owner> ReconcilerBuilder<K> {
    pub fn readiness(mut self, readiness: ReadinessRegistry) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    pub fn immutable_kinds(mut self, kinds: Vec<String>) -> Self {
        self.immutable_kinds = Some(kinds);
        self
    }

    pub fn phases(mut self, sequencer: PhaseSequencer<K>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn backoff(mut self, backoff: BackoffTable) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Reconciler<K> {
        let mut persister = Persister::new(self.store.clone()).with_field_manager(self.field_manager.clone());
        if let Some(kinds) = self.immutable_kinds {
            persister = persister.with_immutable_kinds(kinds);
        }
        let ctx = Context {
            store: self.store.clone(),
            persister,
            readiness: self.readiness,
            hooks: self.hooks,
            clock: self.clock,
        };
        Reconciler {
            ctx: Arc::new(ctx),
            sequencer: self.sequencer.unwrap_or_else(PhaseSequencer::standard),
            status: StatusReporter::new(self.store, self.field_manager),
            backoff: self.backoff,
        }
    }
}

impl<K: Owner> Reconciler<K> {
    pub fn builder(store: Arc<dyn ResourceStore>, hooks: Hooks<K>) -> ReconcilerBuilder<K> {
        ReconcilerBuilder {
            store,
            hooks,
            readiness: ReadinessRegistry::with_defaults(),
            clock: Arc::new(SystemClock),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            immutable_kinds: None,
            sequencer: None,
            backoff: BackoffTable::default(),
        }
    }

    pub fn context(&self) -> &Arc<Context<K>> {
        &self.ctx
    }

    pub fn backoff(&self) -> &BackoffTable {
        &self.backoff
    }

    /// Reconcile the owner identified by `key`. An owner that no longer exists
    /// ends the reconcile quietly.
    #[instrument(skip_all, fields(owner = %key))]
    pub async fn reconcile_key(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let Some(raw) = self.ctx.store.get(key).await? else {
            debug!("owner not found");
            self.backoff.reset(&key.to_string());
            return Ok(ReconcileOutcome::Done);
        };
        let owner: K = serde_json::from_value(raw.clone())?;
        let mut rc = ReconcileCtx::new(owner, self.ctx.clone())?;
        let before = rc.status.clone();

        self.populate(&mut rc).await?;
        let outcome = self.sequencer.run(&mut rc).await;
        let written = self.status.flush(key, &raw, &before, &rc.status).await;

        match outcome {
            SequenceOutcome::Complete => {
                written?;
                Ok(ReconcileOutcome::Done)
            }
            SequenceOutcome::Requeue { phase, after } => {
                written?;
                debug!(phase, after_ms = after.as_millis() as u64, "requeue");
                Ok(ReconcileOutcome::RequeueAfter(after))
            }
            SequenceOutcome::Failed { phase, error, .. } => {
                if let Err(e) = written {
                    warn!(error = %e, "status write failed");
                }
                warn!(phase, error = %error, "phase failed");
                Err(error)
            }
        }
    }

    /// Fill the resource set from the generator, passing each descriptor
    /// through the mutate hook.
    async fn populate(&self, rc: &mut ReconcileCtx<K>) -> Result<()> {
        let generated = self.ctx.hooks.generator.generate(&rc.owner).map_err(|e| match e {
            ConvergeError::Generator(_) => e,
            other => ConvergeError::Generator(other.to_string()),
        })?;
        for desired in generated {
            let mutation = self.ctx.hooks.mutate.mutate(&rc.owner, desired).await?;
            if mutation.skip {
                continue;
            }
            rc.resources.extend(mutation.replacements);
        }
        debug!(resources = rc.resources.len(), "resource set built");
        Ok(())
    }
}

pub async fn reconcile<K: Owner>(owner: Arc<K>, reconciler: Arc<Reconciler<K>>) -> Result<Action> {
    let key = owner_key(owner.as_ref());
    let t0 = Instant::now();
    counter!("reconcile_total", 1u64);
    let result = reconciler.reconcile_key(&key).await;
    histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    let outcome = result?;
    reconciler.backoff.reset(&key.to_string());
    Ok(match outcome {
        ReconcileOutcome::Done => Action::await_change(),
        ReconcileOutcome::RequeueAfter(after) => Action::requeue(after),
    })
}

pub fn error_policy<K: Owner>(owner: Arc<K>, error: &ConvergeError, reconciler: Arc<Reconciler<K>>) -> Action {
    let key = owner_key(owner.as_ref()).to_string();
    let delay = reconciler.backoff.next_delay(&key);
    counter!("reconcile_err", 1u64);
    warn!(owner = %key, error = %error, delay_ms = delay.as_millis() as u64, "reconcile failed; backing off");
    Action::requeue(delay)
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum reconciles in flight; one per owner at a time regardless.
    pub workers: u16,
    /// Child kinds whose changes should retrigger their owner.
    pub owns: Vec<ApiResource>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { workers: 4, owns: Vec::new() }
    }
}

/// Watch owners of kind `K` and reconcile them until a shutdown signal arrives.
pub async fn run<K: Owner>(client: Client, reconciler: Arc<Reconciler<K>>, opts: RunOptions) {
    let api = Api::<K>::all(client.clone());
    let mut controller = Controller::new(api, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(opts.workers));
    for ar in opts.owns {
        let children = Api::<DynamicObject>::all_with(client.clone(), &ar);
        controller = controller.owns_with(children, ar, watcher::Config::default());
    }
    info!(kind = %owner_gvk::<K>(), workers = opts.workers, "controller starting");
    controller
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(owner = %obj, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;
    info!("controller terminated");
}

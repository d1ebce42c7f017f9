// agents/consumer.rs - Builder that consumes delivered materials

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{decode_state, encode_state};
use crate::actor::{Actor, ActorContext, ActorError, ActorHooks};
use crate::lifecycle::{ActorLifecycleState, LifecycleError};
use crate::message::{topics, Message, Payload, BROADCAST};
use crate::resources::{Bom, Holdings, Materials, ResourceCoordinator};
use crate::strategy::{BuildSite, BuildingStrategy, StrategyRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    WaitingForMaterials,
    ReadyToBuild,
}

struct BuildJob {
    site: BuildSite,
    strategy: Arc<dyn BuildingStrategy>,
    bom: Bom,
    collected: Holdings,
    attempts: u32,
    status: JobStatus,
}

impl BuildJob {
    fn new(site: BuildSite, strategy: Arc<dyn BuildingStrategy>) -> Self {
        let bom = strategy.bom();
        Self {
            site,
            strategy,
            bom,
            collected: Holdings::new(),
            attempts: 0,
            status: JobStatus::WaitingForMaterials,
        }
    }
}

/// Checkpoint form of a job: the strategy is stored by key only
#[derive(Debug, Serialize, Deserialize)]
struct SavedJob {
    site: BuildSite,
    strategy_key: String,
    #[serde(default)]
    collected: Holdings,
    #[serde(default)]
    attempts: u32,
    status: JobStatus,
}

#[derive(Default)]
struct ConsumerState {
    template: Option<String>,
    sites: Vec<BuildSite>,
    jobs: VecDeque<BuildJob>,
    completed: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SavedState {
    template: Option<String>,
    sites: Vec<BuildSite>,
    jobs: Vec<SavedJob>,
    completed: u64,
}

/// State shared by the loop, the bus callbacks and the checkpoint hooks
struct Shared {
    name: String,
    supplier: String,
    coordinator: ResourceCoordinator,
    blueprints: StrategyRegistry<dyn BuildingStrategy>,
    state: Mutex<ConsumerState>,
}

impl Shared {
    fn on_map(&self, msg: &Message) {
        // Scans stream partial results before the complete map
        if msg.payload().get("status").and_then(Value::as_str) == Some("partial") {
            debug!(actor = %self.name, source = msg.source(), "Partial map skipped");
            return;
        }
        let sites = match msg.payload().get("flat_spots") {
            Some(spots) => serde_json::from_value::<Vec<BuildSite>>(spots.clone()),
            None => {
                warn!(actor = %self.name, source = msg.source(), "Map without flat_spots");
                return;
            }
        };
        match sites {
            Ok(sites) if sites.is_empty() => {
                warn!(actor = %self.name, source = msg.source(), "No flat spots received");
            }
            Ok(sites) => {
                info!(actor = %self.name, source = msg.source(), sites = sites.len(), "Build sites stored");
                self.state.lock().sites = sites;
            }
            Err(e) => {
                warn!(actor = %self.name, source = msg.source(), error = %e, "Malformed flat_spots");
            }
        }
    }

    fn on_plan_set(&self, msg: &Message) {
        let Some(template) = msg.payload().get("template").and_then(Value::as_str) else {
            warn!(actor = %self.name, source = msg.source(), "Plan request without template");
            return;
        };
        let template = template.to_lowercase();
        if self.blueprints.contains(&template) {
            info!(actor = %self.name, %template, "Template selected");
            self.state.lock().template = Some(template);
        } else {
            let known: Vec<&str> = self.blueprints.keys().collect();
            warn!(actor = %self.name, %template, ?known, "Unknown template");
        }
    }

    fn on_bom_request(&self, msg: &Message, ctx: &ActorContext) -> anyhow::Result<()> {
        let template = self.state.lock().template.clone();
        let Some(template) = template else {
            warn!(actor = %self.name, source = msg.source(), "BOM requested with no template selected");
            return Ok(());
        };
        let strategy = self.blueprints.resolve(&template)?;

        let report = ctx
            .message(topics::BUILDER_BOM_REPORT, msg.source())
            .with_payload_value(json!({
                "template": template,
                "bom": strategy.bom().to_value(),
            }))?;
        ctx.publish(report)?;
        Ok(())
    }

    /// Create or re-plan the job for the first known site and ask for its materials
    fn on_build(&self, msg: &Message, ctx: &ActorContext) -> anyhow::Result<()> {
        let (template, site) = {
            let state = self.state.lock();
            (state.template.clone(), state.sites.first().copied())
        };
        let Some(template) = template else {
            warn!(actor = %self.name, source = msg.source(), "Build requested with no template selected");
            return Ok(());
        };
        let Some(site) = site else {
            warn!(actor = %self.name, source = msg.source(), "Build requested before any site is known");
            return Ok(());
        };
        let strategy = self.blueprints.resolve(&template)?;
        let bom = strategy.bom();

        {
            let mut state = self.state.lock();
            match state.jobs.iter_mut().find(|job| job.site == site) {
                Some(job) => {
                    info!(actor = %self.name, %site, %template, "Re-planning existing build");
                    *job = BuildJob::new(site, strategy);
                }
                None => {
                    info!(actor = %self.name, %site, %template, required = %bom, "Build job created");
                    state.jobs.push_back(BuildJob::new(site, strategy));
                }
            }
        }

        let request = ctx
            .message(topics::REQUIREMENTS, &self.supplier)
            .with_payload_value(json!({ "requirements": bom.to_value() }))?;
        ctx.publish(request)?;
        Ok(())
    }

    /// Credit a delivery to the oldest job still waiting for materials
    fn on_inventory(&self, msg: &Message) {
        let delivered = match msg.payload().get("inventory").map(Materials::from_value) {
            Some(Ok(delivered)) => delivered,
            Some(Err(e)) => {
                warn!(actor = %self.name, source = msg.source(), error = %e, "Malformed inventory");
                return;
            }
            None => {
                warn!(actor = %self.name, source = msg.source(), "Inventory without materials");
                return;
            }
        };

        let mut state = self.state.lock();
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::WaitingForMaterials)
        else {
            warn!(actor = %self.name, source = msg.source(), "Inventory received with no job waiting");
            return;
        };

        job.collected.merge(&delivered);
        if self.coordinator.is_satisfied(&job.bom, &job.collected) {
            info!(actor = %self.name, site = %job.site, collected = %job.collected, "All materials collected");
            job.status = JobStatus::ReadyToBuild;
            return;
        }

        job.attempts += 1;
        let max_attempts = self.coordinator.policy().max_attempts;
        if job.attempts >= max_attempts {
            self.coordinator
                .inject_fallback(&self.name, &job.bom, &mut job.collected);
            job.status = JobStatus::ReadyToBuild;
            return;
        }

        info!(
            actor = %self.name,
            site = %job.site,
            attempt = job.attempts,
            max_attempts,
            collected = %job.collected,
            required = %job.bom,
            "Still missing materials"
        );
    }

    fn encode(&self) -> SavedState {
        let state = self.state.lock();
        SavedState {
            template: state.template.clone(),
            sites: state.sites.clone(),
            jobs: state
                .jobs
                .iter()
                .map(|job| SavedJob {
                    site: job.site,
                    strategy_key: job.strategy.key().to_string(),
                    collected: job.collected.clone(),
                    attempts: job.attempts,
                    status: job.status,
                })
                .collect(),
            completed: state.completed,
        }
    }

    fn restore(&self, saved: SavedState) {
        let mut jobs = VecDeque::with_capacity(saved.jobs.len());
        for job in saved.jobs {
            match self.blueprints.resolve(&job.strategy_key) {
                Ok(strategy) => jobs.push_back(BuildJob {
                    site: job.site,
                    bom: strategy.bom(),
                    strategy,
                    collected: job.collected,
                    attempts: job.attempts,
                    status: job.status,
                }),
                Err(e) => {
                    warn!(actor = %self.name, site = %job.site, error = %e, "Dropping checkpointed job");
                }
            }
        }

        let template = saved
            .template
            .filter(|key| self.blueprints.contains(key));

        let mut state = self.state.lock();
        state.template = template;
        state.sites = saved.sites;
        state.jobs = jobs;
        state.completed = saved.completed;
    }
}

struct ConsumerHooks(Arc<Shared>);

impl ActorHooks for ConsumerHooks {
    fn encode_checkpoint(&self) -> Payload {
        encode_state(&self.0.name, &self.0.encode())
    }

    fn decode_checkpoint(&self, data: &Payload) -> Result<(), ActorError> {
        let saved: SavedState = decode_state(data)?;
        self.0.restore(saved);
        Ok(())
    }

    fn status_fields(&self) -> Payload {
        let state = self.0.state.lock();
        let mut fields = Payload::new();
        fields.insert("template".into(), json!(state.template));
        fields.insert("sites".into(), Value::from(state.sites.len()));
        fields.insert("pending_builds".into(), Value::from(state.jobs.len()));
        fields.insert("completed".into(), Value::from(state.completed));
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerDecision {
    Idle,
    Wait,
    Build,
}

/// Builds structures from materials supplied by producers
pub struct BuildConsumer {
    shared: Arc<Shared>,
}

impl BuildConsumer {
    /// `supplier` receives the requirements; [`BROADCAST`] reaches every producer
    pub fn new(
        name: impl Into<String>,
        supplier: impl Into<String>,
        coordinator: ResourceCoordinator,
        blueprints: StrategyRegistry<dyn BuildingStrategy>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                supplier: supplier.into(),
                coordinator,
                blueprints,
                state: Mutex::new(ConsumerState::default()),
            }),
        }
    }

    pub fn supplier(&self) -> &str {
        &self.shared.supplier
    }

    /// Preselect a template; unknown keys are ignored
    pub fn with_template(self, template: impl Into<String>) -> Self {
        let template = template.into();
        if !self.shared.blueprints.contains(&template) {
            warn!(actor = %self.shared.name, %template, "Unknown template");
            return self;
        }
        self.shared.state.lock().template = Some(template);
        self
    }

    pub fn template(&self) -> Option<String> {
        self.shared.state.lock().template.clone()
    }

    pub fn sites(&self) -> Vec<BuildSite> {
        self.shared.state.lock().sites.clone()
    }

    pub fn pending_builds(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }

    pub fn completed(&self) -> u64 {
        self.shared.state.lock().completed
    }

    /// Attempt count and status of the job at `site`
    pub fn job_progress(&self, site: BuildSite) -> Option<(u32, JobStatus)> {
        self.shared
            .state
            .lock()
            .jobs
            .iter()
            .find(|job| job.site == site)
            .map(|job| (job.attempts, job.status))
    }

    /// Build the oldest ready job and announce it
    async fn build(&self, ctx: &ActorContext) -> Result<(), ActorError> {
        let next = {
            let state = self.shared.state.lock();
            state
                .jobs
                .iter()
                .find(|job| job.status == JobStatus::ReadyToBuild)
                .map(|job| (job.site, job.strategy.clone()))
        };
        let Some((site, strategy)) = next else {
            return Ok(());
        };

        let report = strategy.execute(site, ctx).await?;

        {
            let mut state = self.shared.state.lock();
            if let Some(index) = state.jobs.iter().position(|job| job.site == site) {
                state.jobs.remove(index);
            }
            state.sites.retain(|known| *known != site);
            state.completed += 1;
        }

        let mut payload = Payload::new();
        payload.insert("template".into(), Value::from(report.template.as_str()));
        payload.insert("site".into(), json!(report.site));
        ctx.publish(ctx.message(topics::BUILD_COMPLETED, BROADCAST).with_payload(payload))?;

        info!(
            actor = ctx.name(),
            template = %report.template,
            site = %report.site,
            layers = report.layers,
            "Build completed"
        );
        Ok(())
    }
}

/// Run a WAITING/RUNNING command, tolerating a concurrent pause or stop
fn settle(ctx: &ActorContext, result: Result<bool, LifecycleError>) -> Result<(), ActorError> {
    match result {
        Ok(_) => Ok(()),
        Err(LifecycleError::InvalidTransition { command, from }) => {
            debug!(actor = ctx.name(), command, %from, "Lifecycle command skipped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Actor for BuildConsumer {
    type Decision = ConsumerDecision;

    fn name(&self) -> &str {
        &self.shared.name
    }

    fn hooks(&self) -> Arc<dyn ActorHooks> {
        Arc::new(ConsumerHooks(self.shared.clone()))
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        let shared = self.shared.clone();
        ctx.subscribe(topics::MAP, move |msg| {
            let shared = shared.clone();
            async move {
                shared.on_map(&msg);
                Ok(())
            }
        });

        let shared = self.shared.clone();
        ctx.subscribe(topics::INVENTORY, move |msg| {
            let shared = shared.clone();
            async move {
                if msg.is_addressed_to(&shared.name) {
                    shared.on_inventory(&msg);
                }
                Ok(())
            }
        });

        for topic in [
            topics::BUILDER_PLAN_SET,
            topics::BUILDER_BUILD,
            topics::BUILDER_BOM_REQUEST,
        ] {
            let shared = self.shared.clone();
            let ctx_for_reply = ctx.clone();
            ctx.subscribe(topic, move |msg| {
                let shared = shared.clone();
                let ctx = ctx_for_reply.clone();
                async move {
                    if !msg.is_addressed_to(&shared.name) {
                        return Ok(());
                    }
                    match msg.kind() {
                        topics::BUILDER_PLAN_SET => {
                            shared.on_plan_set(&msg);
                            Ok(())
                        }
                        topics::BUILDER_BUILD => shared.on_build(&msg, &ctx),
                        topics::BUILDER_BOM_REQUEST => shared.on_bom_request(&msg, &ctx),
                        _ => Ok(()),
                    }
                }
            });
        }
        Ok(())
    }

    async fn decide(&mut self, _ctx: &ActorContext) -> Result<ConsumerDecision, ActorError> {
        let state = self.shared.state.lock();
        let decision = if state
            .jobs
            .iter()
            .any(|job| job.status == JobStatus::ReadyToBuild)
        {
            ConsumerDecision::Build
        } else if state.jobs.is_empty() {
            ConsumerDecision::Idle
        } else {
            ConsumerDecision::Wait
        };
        Ok(decision)
    }

    async fn act(&mut self, decision: ConsumerDecision, ctx: &ActorContext) -> Result<(), ActorError> {
        let waiting = ctx.state() == ActorLifecycleState::Waiting;
        match decision {
            ConsumerDecision::Wait if !waiting => {
                settle(ctx, ctx.lifecycle().wait("waiting for materials"))
            }
            ConsumerDecision::Wait => Ok(()),
            ConsumerDecision::Idle if waiting => {
                settle(ctx, ctx.lifecycle().ready("no outstanding builds"))
            }
            ConsumerDecision::Idle => Ok(()),
            ConsumerDecision::Build => {
                if waiting {
                    settle(ctx, ctx.lifecycle().ready("materials collected"))?;
                }
                self.build(ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorRuntime, RuntimeConfig};
    use crate::bus::{BusConfig, MessageBus};
    use crate::persistence::PersistenceManager;
    use crate::resources::{ConversionTable, FulfillmentPolicy};
    use crate::strategy::{standard_blueprints, Blueprint};
    use std::time::Duration;

    const SITE: BuildSite = BuildSite::new(10, 20, 64);

    fn fast() -> RuntimeConfig {
        RuntimeConfig {
            poll_interval: Duration::from_millis(5),
            cycle_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn coordinator(max_attempts: u32) -> ResourceCoordinator {
        ResourceCoordinator::new(
            Arc::new(ConversionTable::standard()),
            FulfillmentPolicy {
                max_attempts,
                attempt_delay: Duration::from_millis(1),
            },
        )
    }

    fn blueprints() -> StrategyRegistry<dyn BuildingStrategy> {
        let mut registry = standard_blueprints();
        registry.register("shed", || {
            Arc::new(
                Blueprint::new("shed", [("WOOD_PLANKS", 40)].into_iter().collect(), 2)
                    .with_layer_delay(Duration::from_millis(1)),
            )
        });
        registry
    }

    fn consumer(max_attempts: u32) -> BuildConsumer {
        BuildConsumer::new("builder", "miner", coordinator(max_attempts), blueprints())
            .with_template("shed")
    }

    fn command(kind: &str, payload: Value) -> Message {
        Message::new(kind, "operator", "builder")
            .with_payload_value(payload)
            .unwrap()
    }

    fn inventory(materials: Value) -> Message {
        Message::new(topics::INVENTORY, "miner", "builder")
            .with_payload_value(json!({ "inventory": materials }))
            .unwrap()
    }

    async fn started(consumer: BuildConsumer, bus: &Arc<MessageBus>) -> crate::actor::ActorHandle<BuildConsumer> {
        let handle = ActorRuntime::new(consumer, bus.clone(), PersistenceManager::in_memory(), fast()).spawn();
        assert!(handle.wait_for(ActorLifecycleState::Running, Duration::from_secs(2)).await);
        handle
    }

    #[tokio::test]
    async fn test_build_publishes_requirements_then_builds() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let handle = started(consumer(10), &bus).await;

        bus.publish(command(topics::MAP, json!({ "flat_spots": [[10, 20, 64]] }))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        bus.publish(command(topics::BUILDER_BUILD, json!({}))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);

        let requests = bus.history_of(topics::REQUIREMENTS);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target(), "miner");
        assert_eq!(requests[0].payload()["requirements"], json!({ "WOOD_PLANKS": 40 }));

        assert!(handle.wait_for(ActorLifecycleState::Waiting, Duration::from_secs(2)).await);

        // 10 WOOD converts to the 40 planks the shed needs
        bus.publish(inventory(json!({ "WOOD": 10 }))).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.history_of(topics::BUILD_COMPLETED).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let completed = bus.history_of(topics::BUILD_COMPLETED);
        assert_eq!(completed[0].payload()["template"], json!("shed"));
        assert_eq!(completed[0].payload()["site"], json!([10, 20, 64]));
        assert!(handle.wait_for(ActorLifecycleState::Running, Duration::from_secs(2)).await);

        handle.stop("done").await.unwrap();
        let exit = handle.join().await.unwrap();
        assert_eq!(exit.runtime.actor().completed(), 1);
        assert_eq!(exit.runtime.actor().pending_builds(), 0);
        assert!(exit.runtime.actor().sites().is_empty());
    }

    #[test]
    fn test_partial_maps_do_not_replace_sites() {
        let consumer = BuildConsumer::new("builder", BROADCAST, coordinator(10), blueprints());
        assert_eq!(consumer.supplier(), "all");
        let shared = consumer.shared.clone();

        shared.on_map(&command(topics::MAP, json!({ "flat_spots": [[10, 20, 64]], "status": "complete" })));
        shared.on_map(&command(topics::MAP, json!({ "flat_spots": [[1, 1, 64]], "status": "partial" })));
        assert_eq!(consumer.sites(), vec![SITE]);
    }

    #[test]
    fn test_attempt_bound_triggers_fallback() {
        let consumer = consumer(3);
        let shared = consumer.shared.clone();
        shared.state.lock().jobs.push_back(BuildJob::new(
            SITE,
            blueprints().resolve("shed").unwrap(),
        ));

        shared.on_inventory(&inventory(json!({ "WOOD_PLANKS": 1 })));
        shared.on_inventory(&inventory(json!({ "WOOD_PLANKS": 1 })));
        assert_eq!(consumer.job_progress(SITE), Some((2, JobStatus::WaitingForMaterials)));

        shared.on_inventory(&inventory(json!({ "WOOD_PLANKS": 1 })));
        assert_eq!(consumer.job_progress(SITE), Some((3, JobStatus::ReadyToBuild)));

        let state = shared.state.lock();
        assert_eq!(state.jobs[0].collected.get("WOOD_PLANKS"), 40);
    }

    #[tokio::test]
    async fn test_replanning_resets_the_job() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let consumer = consumer(10);
        let shared = consumer.shared.clone();
        let handle = started(consumer, &bus).await;

        bus.publish(command(topics::MAP, json!({ "flat_spots": [[10, 20, 64], [0, 0, 70]] }))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        bus.publish(command(topics::BUILDER_BUILD, json!({}))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        bus.publish(inventory(json!({ "WOOD_PLANKS": 8 }))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        {
            let state = shared.state.lock();
            assert_eq!(state.jobs[0].attempts, 1);
        }

        bus.publish(command(topics::BUILDER_PLAN_SET, json!({ "template": "StoneTower" }))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        bus.publish(command(topics::BUILDER_BUILD, json!({}))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);

        {
            let state = shared.state.lock();
            assert_eq!(state.jobs.len(), 1);
            assert_eq!(state.jobs[0].site, SITE);
            assert_eq!(state.jobs[0].strategy.key(), "stonetower");
            assert_eq!(state.jobs[0].attempts, 0);
            assert!(state.jobs[0].collected.is_empty());
        }

        let requests = bus.history_of(topics::REQUIREMENTS);
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].payload()["requirements"],
            json!({ "STONE": 80, "TORCH": 4 })
        );

        handle.stop("done").await.unwrap();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_answers_bom_requests() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()).unwrap());
        let handle = started(consumer(10), &bus).await;

        bus.publish(command(topics::BUILDER_BOM_REQUEST, json!({}))).unwrap();
        bus.publish(command(topics::BUILDER_PLAN_SET, json!({ "template": "castle" }))).unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);

        let reports = bus.history_of(topics::BUILDER_BOM_REPORT);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].target(), "operator");
        assert_eq!(reports[0].payload()["template"], json!("shed"));
        assert_eq!(reports[0].payload()["bom"], json!({ "WOOD_PLANKS": 40 }));

        handle.stop("done").await.unwrap();
        let exit = handle.join().await.unwrap();
        assert_eq!(exit.runtime.actor().template().as_deref(), Some("shed"));
    }

    #[test]
    fn test_checkpoint_keeps_known_strategies_only() {
        let consumer = consumer(10);
        {
            let mut state = consumer.shared.state.lock();
            state.sites = vec![SITE];
            state.jobs.push_back(BuildJob::new(SITE, blueprints().resolve("shed").unwrap()));
        }
        let mut data = consumer.hooks().encode_checkpoint();
        assert_eq!(data["jobs"][0]["strategy_key"], json!("shed"));

        // Append a job whose blueprint no longer exists
        if let Some(Value::Array(jobs)) = data.get_mut("jobs") {
            jobs.push(json!({
                "site": [1, 2, 3],
                "strategy_key": "pyramid",
                "status": "waiting_for_materials",
            }));
        }

        let restored = BuildConsumer::new("builder", "miner", coordinator(10), blueprints());
        restored.hooks().decode_checkpoint(&data).unwrap();
        assert_eq!(restored.pending_builds(), 1);
        assert_eq!(restored.sites(), vec![SITE]);
        assert_eq!(restored.template().as_deref(), Some("shed"));
        assert_eq!(
            restored.job_progress(SITE),
            Some((0, JobStatus::WaitingForMaterials))
        );
    }
}

// agents/producer.rs - Material producer

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{decode_state, encode_state};
use crate::actor::{Actor, ActorContext, ActorError, ActorHooks};
use crate::locks::{LockError, Sector};
use crate::message::{topics, Message, Payload};
use crate::resources::{
    Bom, FulfillmentError, Gatherer, Holdings, Materials, ResourceCoordinator, ResourceError,
    Shortfall,
};
use crate::strategy::MiningStrategy;

/// A queued `requirements.v1` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRequest {
    pub requester: String,
    pub requirements: Bom,
}

impl MaterialRequest {
    pub fn from_message(msg: &Message) -> Result<Self, ResourceError> {
        let requirements = msg
            .payload()
            .get("requirements")
            .ok_or(ResourceError::MissingField("requirements"))?;
        Ok(Self {
            requester: msg.source().to_string(),
            requirements: Materials::from_value(requirements)?,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ProducerState {
    holdings: Holdings,
    queue: VecDeque<MaterialRequest>,
    delivered: u64,
}

struct ProducerHooks {
    name: String,
    mining: String,
    state: Arc<Mutex<ProducerState>>,
}

impl ActorHooks for ProducerHooks {
    fn encode_checkpoint(&self) -> Payload {
        encode_state(&self.name, &*self.state.lock())
    }

    fn decode_checkpoint(&self, data: &Payload) -> Result<(), ActorError> {
        let restored: ProducerState = decode_state(data)?;
        debug!(
            actor = %self.name,
            queued = restored.queue.len(),
            holdings = %restored.holdings,
            "Producer state restored"
        );
        *self.state.lock() = restored;
        Ok(())
    }

    fn status_fields(&self) -> Payload {
        let state = self.state.lock();
        let mut fields = Payload::new();
        fields.insert("holdings".into(), state.holdings.to_value());
        fields.insert("queued".into(), Value::from(state.queue.len()));
        fields.insert("delivered".into(), Value::from(state.delivered));
        fields.insert("mining".into(), Value::from(self.mining.as_str()));
        fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProducerDecision {
    Idle,
    Fulfill(MaterialRequest),
}

/// Mines inside a locked sector until a request is covered, then delivers it
pub struct ResourceProducer {
    name: String,
    home: (i64, i64),
    coordinator: ResourceCoordinator,
    mining: Arc<dyn MiningStrategy>,
    state: Arc<Mutex<ProducerState>>,
}

impl ResourceProducer {
    pub fn new(
        name: impl Into<String>,
        coordinator: ResourceCoordinator,
        mining: Arc<dyn MiningStrategy>,
    ) -> Self {
        Self {
            name: name.into(),
            home: (0, 0),
            coordinator,
            mining,
            state: Arc::new(Mutex::new(ProducerState::default())),
        }
    }

    /// Block position whose sector is claimed while mining
    pub fn with_home(mut self, x: i64, z: i64) -> Self {
        self.home = (x, z);
        self
    }

    pub fn home(&self) -> (i64, i64) {
        self.home
    }

    pub fn holdings(&self) -> Holdings {
        self.state.lock().holdings.clone()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    fn enqueue(state: &Mutex<ProducerState>, actor: &str, msg: &Message) {
        match MaterialRequest::from_message(msg) {
            Ok(request) if request.requirements.is_empty() => {
                debug!(actor, source = msg.source(), "Empty requirements ignored");
            }
            Ok(request) => {
                info!(
                    actor,
                    source = msg.source(),
                    requirements = %request.requirements,
                    "Requirements queued"
                );
                state.lock().queue.push_back(request);
            }
            Err(e) => {
                warn!(actor, topic = msg.kind(), source = msg.source(), error = %e, "Unusable requirements");
            }
        }
    }

    async fn fulfill(&self, request: MaterialRequest, ctx: &ActorContext) -> Result<(), ActorError> {
        let preferred = ctx.locks().sector_at(self.home.0, self.home.1);
        let guard = match ctx.locks().acquire(preferred) {
            Ok(guard) => guard,
            Err(e @ LockError::Exhausted { .. }) => {
                info!(actor = ctx.name(), error = %e, "No free sector, retrying next cycle");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut holdings = self.holdings();
        let mut gatherer = SectorMiner {
            strategy: self.mining.as_ref(),
            sector: guard.sector(),
            ctx,
            state: &self.state,
        };
        let result = self
            .coordinator
            .fulfill(
                ctx.name(),
                &request.requirements,
                &mut holdings,
                &mut gatherer,
                &ctx.cancel_token(),
            )
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(FulfillmentError::Cancelled) => {
                // Keep what was gathered before the run was cut short
                self.state.lock().holdings = holdings;
                return Err(ActorError::Cancelled);
            }
        };

        let mut remaining = holdings.clone();
        if let Err(shortfall) = self.coordinator.deduct(&request.requirements, &mut remaining) {
            self.state.lock().holdings = holdings;
            return Err(anyhow::anyhow!("satisfied bill could not be deducted: {shortfall}").into());
        }
        guard.release();

        let mut payload = Payload::new();
        payload.insert("inventory".into(), request.requirements.to_value());
        let delivery = ctx.message(topics::INVENTORY, &request.requester).with_payload(payload);
        if let Err(e) = ctx.publish(delivery) {
            // Nothing left the producer, so the materials stay held
            self.state.lock().holdings = holdings;
            return Err(e);
        }

        {
            let mut state = self.state.lock();
            state.holdings = remaining;
            if state.queue.front() == Some(&request) {
                state.queue.pop_front();
            }
            state.delivered += 1;
        }

        info!(
            actor = ctx.name(),
            requester = %request.requester,
            delivered = %request.requirements,
            attempts = outcome.attempts,
            fallback = outcome.used_fallback(),
            "Requirements delivered"
        );
        Ok(())
    }
}

/// Runs the mining strategy inside the claimed sector
struct SectorMiner<'a> {
    strategy: &'a dyn MiningStrategy,
    sector: Sector,
    ctx: &'a ActorContext,
    state: &'a Mutex<ProducerState>,
}

#[async_trait]
impl<'a> Gatherer for SectorMiner<'a> {
    async fn gather(&mut self, shortfall: &Shortfall, attempt: u32) -> anyhow::Result<Holdings> {
        debug!(
            actor = self.ctx.name(),
            sector = %self.sector,
            strategy = self.strategy.key(),
            attempt,
            "Gathering"
        );
        Ok(self.strategy.mine(self.sector, shortfall, self.ctx).await?)
    }

    /// Mirror in-flight holdings so a checkpoint taken mid-run keeps them
    fn record_progress(&mut self, holdings: &Holdings) {
        self.state.lock().holdings = holdings.clone();
    }
}

#[async_trait]
impl Actor for ResourceProducer {
    type Decision = ProducerDecision;

    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> Arc<dyn ActorHooks> {
        Arc::new(ProducerHooks {
            name: self.name.clone(),
            mining: self.mining.key().to_string(),
            state: self.state.clone(),
        })
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        let state = self.state.clone();
        let name = self.name.clone();
        ctx.subscribe(topics::REQUIREMENTS, move |msg| {
            let state = state.clone();
            let name = name.clone();
            async move {
                if msg.is_addressed_to(&name) && msg.source() != name {
                    ResourceProducer::enqueue(&state, &name, &msg);
                }
                Ok(())
            }
        });
        Ok(())
    }

    async fn decide(&mut self, _ctx: &ActorContext) -> Result<ProducerDecision, ActorError> {
        let next = self.state.lock().queue.front().cloned();
        Ok(match next {
            Some(request) => ProducerDecision::Fulfill(request),
            None => ProducerDecision::Idle,
        })
    }

    async fn act(&mut self, decision: ProducerDecision, ctx: &ActorContext) -> Result<(), ActorError> {
        match decision {
            ProducerDecision::Idle => Ok(()),
            ProducerDecision::Fulfill(request) => self.fulfill(request, ctx).await,
        }
    }

    async fn on_error(&mut self, error: &ActorError, ctx: &ActorContext) {
        warn!(
            actor = ctx.name(),
            queued = self.queued(),
            error = %error,
            "Producer faulted with requests outstanding"
        );
    }
}

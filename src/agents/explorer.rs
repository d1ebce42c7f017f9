// agents/explorer.rs - Terrain explorer

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{decode_state, encode_state};
use crate::actor::{Actor, ActorContext, ActorError, ActorHooks};
use crate::message::{topics, Message, Payload, BROADCAST};
use crate::strategy::{ExplorationStrategy, ScanArea, DEFAULT_SCAN_RANGE};

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct ExplorerState {
    scan_range: u32,
    /// Column to scan around; `None` means the explorer's home
    scan_target: Option<(i64, i64)>,
    scan_queue: VecDeque<(i64, i64)>,
    /// A scan of `scan_target` was requested and has not finished
    pending: bool,
    scans_completed: u64,

    #[serde(skip)]
    scanning: bool,
    #[serde(skip)]
    interrupt: CancellationToken,
}

impl Default for ExplorerState {
    fn default() -> Self {
        Self {
            scan_range: DEFAULT_SCAN_RANGE,
            scan_target: None,
            scan_queue: VecDeque::new(),
            pending: false,
            scans_completed: 0,
            scanning: false,
            interrupt: CancellationToken::new(),
        }
    }
}

impl ExplorerState {
    fn busy(&self) -> bool {
        self.scanning || self.pending
    }

    /// Make `target` the next scan, with its own interrupt token
    fn request(&mut self, target: Option<(i64, i64)>) {
        self.scan_target = target;
        self.pending = true;
        self.interrupt = CancellationToken::new();
    }

    fn set_range(&mut self, actor: &str, payload: &Payload) {
        let Some(range) = payload.get("range") else {
            return;
        };
        match range.as_u64().and_then(|r| u32::try_from(r).ok()) {
            Some(range) if range > 0 => {
                info!(actor, range, "Scan range set");
                self.scan_range = range;
            }
            _ => warn!(actor, %range, "Invalid scan range ignored"),
        }
    }
}

/// `(x, z)` of a start request, if both are given
fn requested_target(payload: &Payload) -> Option<(i64, i64)> {
    let x = payload.get("x").and_then(Value::as_i64)?;
    let z = payload.get("z").and_then(Value::as_i64)?;
    Some((x, z))
}

fn flag(payload: &Payload, key: &str) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(false)
}

struct ExplorerHooks {
    name: String,
    exploration: String,
    state: Arc<Mutex<ExplorerState>>,
}

impl ActorHooks for ExplorerHooks {
    fn encode_checkpoint(&self) -> Payload {
        encode_state(&self.name, &*self.state.lock())
    }

    fn decode_checkpoint(&self, data: &Payload) -> Result<(), ActorError> {
        let restored: ExplorerState = decode_state(data)?;
        debug!(
            actor = %self.name,
            range = restored.scan_range,
            queued = restored.scan_queue.len(),
            pending = restored.pending,
            "Explorer state restored"
        );
        *self.state.lock() = restored;
        Ok(())
    }

    fn status_fields(&self) -> Payload {
        let state = self.state.lock();
        let mut fields = Payload::new();
        fields.insert("scan_range".into(), Value::from(state.scan_range));
        let target = match state.scan_target {
            Some((x, z)) => Value::from(vec![x, z]),
            None => Value::from("home"),
        };
        fields.insert("target".into(), target);
        fields.insert("queue_len".into(), Value::from(state.scan_queue.len()));
        fields.insert("is_scanning".into(), Value::from(state.scanning));
        fields.insert("scans_completed".into(), Value::from(state.scans_completed));
        fields.insert("exploration".into(), Value::from(self.exploration.as_str()));
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerDecision {
    Idle,
    Scan(ScanArea),
}

/// Scans terrain on request and publishes the flat spots it finds as `map.v1`
///
/// Start requests that arrive during a scan are queued unless they carry both
/// `interrupt` and `confirm`, which abandons the running scan for the new
/// target.
pub struct Explorer {
    name: String,
    home: (i64, i64),
    exploration: Arc<dyn ExplorationStrategy>,
    state: Arc<Mutex<ExplorerState>>,
}

impl Explorer {
    pub fn new(name: impl Into<String>, exploration: Arc<dyn ExplorationStrategy>) -> Self {
        Self {
            name: name.into(),
            home: (0, 0),
            exploration,
            state: Arc::new(Mutex::new(ExplorerState::default())),
        }
    }

    /// Column scanned when a start request names no target
    pub fn with_home(mut self, x: i64, z: i64) -> Self {
        self.home = (x, z);
        self
    }

    pub fn with_scan_range(self, range: u32) -> Self {
        self.state.lock().scan_range = range.max(1);
        self
    }

    pub fn scan_range(&self) -> u32 {
        self.state.lock().scan_range
    }

    pub fn queued(&self) -> usize {
        self.state.lock().scan_queue.len()
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn scans_completed(&self) -> u64 {
        self.state.lock().scans_completed
    }

    fn on_start_scan(state: &Mutex<ExplorerState>, actor: &str, msg: &Message) {
        let payload = msg.payload();
        let target = requested_target(payload);
        let mut state = state.lock();
        state.set_range(actor, payload);

        if !state.busy() {
            info!(actor, source = msg.source(), ?target, "Scan requested");
            state.request(target);
            return;
        }

        if flag(payload, "interrupt") {
            if flag(payload, "confirm") {
                info!(actor, source = msg.source(), ?target, "Interrupting current scan");
                state.interrupt.cancel();
                state.request(target);
                return;
            }
            warn!(actor, source = msg.source(), "Interrupt requested without confirm, queuing instead");
        }

        match target {
            Some(target) => {
                info!(actor, ?target, queued = state.scan_queue.len() + 1, "Scan in progress, target queued");
                state.scan_queue.push_back(target);
            }
            None => warn!(actor, source = msg.source(), "Scan in progress and no target to queue"),
        }
    }

    fn on_stop_scan(state: &Mutex<ExplorerState>, actor: &str) {
        let mut state = state.lock();
        let dropped = state.scan_queue.len();
        state.scan_queue.clear();
        state.pending = false;
        state.interrupt.cancel();
        info!(actor, dropped, "Scan stop acknowledged");
    }

    fn handle_control(state: &Mutex<ExplorerState>, actor: &str, msg: &Message) {
        match msg.kind() {
            topics::EXPLORER_START | topics::WORKFLOW_RUN => Self::on_start_scan(state, actor, msg),
            topics::EXPLORER_STOP => Self::on_stop_scan(state, actor),
            topics::EXPLORER_CONFIG => state.lock().set_range(actor, msg.payload()),
            other => debug!(actor, topic = other, "Unhandled explorer control"),
        }
    }

    async fn run_scan(&self, area: ScanArea, ctx: &ActorContext) -> Result<(), ActorError> {
        let interrupt = {
            let mut state = self.state.lock();
            state.scanning = true;
            state.interrupt.clone()
        };

        let result = self.exploration.scan(area, ctx, &interrupt).await;

        let report = {
            let mut state = self.state.lock();
            state.scanning = false;
            match result {
                Ok(Some(report)) => {
                    // A confirmed interrupt that raced the last batch still gets its scan
                    if !interrupt.is_cancelled() {
                        state.pending = false;
                    }
                    state.scans_completed += 1;
                    report
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    state.pending = false;
                    error!(actor = ctx.name(), strategy = self.exploration.key(), error = %e, "Scan failed");
                    return Ok(());
                }
            }
        };

        if report.flat_spots.is_empty() {
            warn!(actor = ctx.name(), center = %report.center, "No flat spots found");
            return Ok(());
        }
        info!(
            actor = ctx.name(),
            center = %report.center,
            spots = report.flat_spots.len(),
            "Publishing map"
        );
        ctx.publish(
            ctx.message(topics::MAP, BROADCAST)
                .with_payload(report.to_payload("complete")),
        )?;
        Ok(())
    }
}

#[async_trait]
impl Actor for Explorer {
    type Decision = ExplorerDecision;

    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> Arc<dyn ActorHooks> {
        Arc::new(ExplorerHooks {
            name: self.name.clone(),
            exploration: self.exploration.key().to_string(),
            state: self.state.clone(),
        })
    }

    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        for topic in [
            topics::EXPLORER_START,
            topics::EXPLORER_STOP,
            topics::EXPLORER_CONFIG,
            topics::WORKFLOW_RUN,
        ] {
            let state = self.state.clone();
            let name = self.name.clone();
            ctx.subscribe(topic, move |msg| {
                let state = state.clone();
                let name = name.clone();
                async move {
                    if msg.is_addressed_to(&name) {
                        Explorer::handle_control(&state, &name, &msg);
                    }
                    Ok(())
                }
            });
        }
        Ok(())
    }

    async fn decide(&mut self, _ctx: &ActorContext) -> Result<ExplorerDecision, ActorError> {
        let mut state = self.state.lock();
        if !state.pending {
            let Some(next) = state.scan_queue.pop_front() else {
                return Ok(ExplorerDecision::Idle);
            };
            debug!(actor = %self.name, target = ?next, "Processing queued scan");
            state.request(Some(next));
        }
        let (x, z) = state.scan_target.unwrap_or(self.home);
        Ok(ExplorerDecision::Scan(ScanArea::new(x, z, state.scan_range)))
    }

    async fn act(&mut self, decision: ExplorerDecision, ctx: &ActorContext) -> Result<(), ActorError> {
        match decision {
            ExplorerDecision::Idle => Ok(()),
            ExplorerDecision::Scan(area) => self.run_scan(area, ctx).await,
        }
    }
}

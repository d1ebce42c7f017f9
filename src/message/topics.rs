// message/topics.rs - Topic catalog

/// Material requirements published by a consumer
pub const REQUIREMENTS: &str = "requirements.v1";

/// Materials delivered by a producer
pub const INVENTORY: &str = "inventory.v1";

pub const LOCK_ACQUIRE: &str = "lock.acquire";
pub const LOCK_RELEASE: &str = "lock.release";

/// Emitted on every lifecycle transition
pub const STATE_CHANGE: &str = "agent.state_change.v1";

pub const CONTROL_PAUSE: &str = "control.agent.pause";
pub const CONTROL_RESUME: &str = "control.agent.resume";
pub const CONTROL_STOP: &str = "control.agent.stop";
pub const STATUS_REQUEST: &str = "control.agent.status.request";
pub const STATUS_REPORT: &str = "control.agent.status.report";

/// Build sites discovered by exploration
pub const MAP: &str = "map.v1";

pub const EXPLORER_START: &str = "control.explorerbot.start";
pub const EXPLORER_STOP: &str = "control.explorerbot.stop";
pub const EXPLORER_CONFIG: &str = "control.explorerbot.config";

/// Starts a full scan-and-build run; the explorer treats it as a start
pub const WORKFLOW_RUN: &str = "control.workflow.run";

pub const BUILDER_PLAN_SET: &str = "control.builder.plan.set";
pub const BUILDER_BUILD: &str = "control.builder.build";
pub const BUILDER_BOM_REQUEST: &str = "control.builder.bom.request";
pub const BUILDER_BOM_REPORT: &str = "control.builder.bom.report";

pub const BUILD_COMPLETED: &str = "build.completed.v1";

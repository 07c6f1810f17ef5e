pub mod lifecycle;

pub use lifecycle::{
    Health, HealthReason, HealthStatus, HealthTracker, KeepaliveAction, LinkEvent,
    SupervisorState, Transition, keepalive_action, transition,
};

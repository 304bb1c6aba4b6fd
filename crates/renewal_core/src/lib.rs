pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod ports;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{ActionDispatcher, DispatcherConfig, StepEffects};
pub use domain::{
    Action, ActionResult, ConversationTurn, Decision, Event, EventType, RenewalSession,
    SessionContext, SessionStatus, StepOutcome, SubmissionPackage, SweepSummary, TurnRole,
};
pub use engine::{EngineConfig, EngineError, EventInput, StartOutcome, StartRequest, WorkflowEngine};
pub use ports::{
    AppendOutcome, CreateOutcome, DecisionOracle, DeliveryReceipt, DocumentValidationService,
    EventLog, HrSyncService, MessagingService, PortError, PortResult, ReferenceDataService,
    SessionStore, ValidationReport,
};
pub use scheduler::{ReminderScheduler, SchedulerConfig};

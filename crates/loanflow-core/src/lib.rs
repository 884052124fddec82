//! Multi-step loan application flow.
//!
//! A [`StepSequencer`] walks the applicant through a fixed number of steps,
//! accumulating answers in an [`ApplicationAggregate`]. Every step is written
//! through the persistence gateway before the flow moves on. The
//! [`SessionBinder`] starts applicants as guests and later binds a verified
//! identity, adopting whatever application id the service assigns.

pub mod aggregate;
pub mod analytics;
pub mod config;
pub mod error;
pub mod flow;
pub mod sequencer;
pub mod service;
pub mod session;
pub mod validate;
pub mod view;

pub use aggregate::ApplicationAggregate;
pub use analytics::{AnalyticsSink, ChannelAnalytics, FlowEvent, TracingAnalytics};
pub use config::{ConfigError, FlowConfig};
pub use error::{FlowError, IdentityBindError, PersistFailure, ValidationError};
pub use flow::{LoanFlow, LoanFlowBuilder};
pub use sequencer::{AdvanceOutcome, StepSequencer};
pub use service::ApplicationService;
pub use session::{BoundIdentity, IdentityProof, SessionBinder};
pub use validate::{AcceptAll, PayloadValidator, RequiredFields};
pub use view::{StepView, ViewState, bind_view};

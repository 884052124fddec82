use std::sync::Arc;

use loanflow_gateway::{Connectivity, PersistenceGateway, RequestPolicy, Transport};
use loanflow_store::{DynStore, open_preferred};
use loanflow_types::ApplicationRecord;
use serde_json::Value;
use tracing::info;

use crate::analytics::{AnalyticsSink, TracingAnalytics};
use crate::config::FlowConfig;
use crate::error::{FlowError, ValidationError};
use crate::sequencer::{AdvanceOutcome, StepSequencer};
use crate::service::ApplicationService;
use crate::session::{BoundIdentity, IdentityProof, SessionBinder};
use crate::validate::{AcceptAll, PayloadValidator};
use crate::view::ViewState;

/// One applicant's loan application flow: session, steps and persistence.
pub struct LoanFlow {
    config: FlowConfig,
    service: ApplicationService,
    binder: Arc<SessionBinder>,
    sequencer: StepSequencer,
}

pub struct LoanFlowBuilder {
    config: FlowConfig,
    primary: Option<Arc<dyn Transport>>,
    fallback: Option<Arc<dyn Transport>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    store: Option<DynStore>,
    validator: Arc<dyn PayloadValidator>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl LoanFlowBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.primary = Some(transport);
        self
    }

    /// Only consulted when the effective policy allows fallback.
    pub fn fallback_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.fallback = Some(transport);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn store(mut self, store: DynStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn build(self) -> Result<LoanFlow, FlowError> {
        let config = self.config;
        let policy = config.effective_policy();

        let primary = match self.primary {
            Some(transport) => transport,
            None => default_transport(&config, false)?,
        };
        let mut gateway = PersistenceGateway::new(primary);
        if policy.allow_fallback_transport {
            let fallback = match self.fallback {
                Some(transport) => transport,
                None => default_transport(&config, true)?,
            };
            gateway = gateway.with_fallback(fallback);
        }
        if let Some(connectivity) = self.connectivity {
            gateway = gateway.with_connectivity(connectivity);
        }

        let store = self.store.unwrap_or_else(|| {
            open_preferred(
                config.store_dir.as_deref(),
                config.capabilities.has_persistent_storage,
            )
        });
        let service = ApplicationService::new(gateway, policy);
        let binder = Arc::new(
            SessionBinder::new(store, service.clone()).with_analytics(Arc::clone(&self.analytics)),
        );
        let sequencer = StepSequencer::with_hooks(
            config.total_steps,
            Arc::clone(&binder),
            service.clone(),
            self.validator,
            self.analytics,
        )?;

        info!(
            base_url = %config.base_url,
            total_steps = config.total_steps,
            timeout_ms = policy.timeout_ms,
            max_attempts = policy.max_attempts,
            fallback = policy.allow_fallback_transport,
            degraded_storage = binder.is_degraded(),
            "loan flow ready"
        );
        Ok(LoanFlow {
            config,
            service,
            binder,
            sequencer,
        })
    }
}

#[cfg(feature = "transport-http")]
fn default_transport(
    config: &FlowConfig,
    fallback: bool,
) -> Result<Arc<dyn Transport>, FlowError> {
    use loanflow_gateway::HttpTransport;

    let built = if fallback {
        HttpTransport::fallback(&config.base_url)
    } else {
        HttpTransport::primary(&config.base_url)
    };
    built
        .map(|transport| Arc::new(transport) as Arc<dyn Transport>)
        .map_err(|err| FlowError::Configuration(err.to_string()))
}

#[cfg(not(feature = "transport-http"))]
fn default_transport(
    _config: &FlowConfig,
    fallback: bool,
) -> Result<Arc<dyn Transport>, FlowError> {
    Err(FlowError::Configuration(format!(
        "no {} transport configured and HTTP support is disabled",
        if fallback { "fallback" } else { "primary" }
    )))
}

impl LoanFlow {
    pub fn builder(config: FlowConfig) -> LoanFlowBuilder {
        LoanFlowBuilder {
            config,
            primary: None,
            fallback: None,
            connectivity: None,
            store: None,
            validator: Arc::new(AcceptAll),
            analytics: Arc::new(TracingAnalytics),
        }
    }

    /// Builds a flow using the HTTP transports and the configured store.
    pub fn connect(config: FlowConfig) -> Result<Self, FlowError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionBinder {
        &self.binder
    }

    pub fn sequencer(&self) -> &StepSequencer {
        &self.sequencer
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        self.service.gateway()
    }

    /// Request policy in effect after environment adjustments.
    pub fn policy(&self) -> RequestPolicy {
        *self.service.policy()
    }

    /// Ensures a session and application exist. A restored application is
    /// resynced from the service so the flow resumes where it left off.
    pub async fn start(&self) -> Result<ViewState, FlowError> {
        self.binder.ensure_session();
        let restored = self.binder.application_id().is_some();
        let application_id = self.binder.ensure_application().await?;
        if restored {
            info!(%application_id, "resuming stored application");
            return self.resync().await;
        }
        Ok(self.sequencer.view_state())
    }

    /// Reloads progress and fields from the service, e.g. after a merge conflict.
    pub async fn resync(&self) -> Result<ViewState, FlowError> {
        let session = self.binder.ensure_session();
        let application_id = self
            .binder
            .application_id()
            .ok_or(ValidationError::NoApplication)?;
        let view = self
            .service
            .fetch_application(&session.session_id, &application_id)
            .await?;
        self.sequencer.resume(&view)?;
        Ok(self.sequencer.view_state())
    }

    pub async fn submit(&self, payload: Value) -> Result<AdvanceOutcome, FlowError> {
        self.sequencer.request_advance(payload).await
    }

    pub async fn bind_identity(&self, proof: IdentityProof) -> Result<BoundIdentity, FlowError> {
        Ok(self.binder.bind_identity(proof).await?)
    }

    /// Client-side view of the application, once one exists.
    pub fn record(&self) -> Option<ApplicationRecord> {
        let identity = self.binder.identity()?;
        let id = self.binder.application_id()?;
        let (created_at, updated_at) = self.binder.application_timestamps()?;
        Some(ApplicationRecord {
            id,
            owner_kind: identity.owner_kind(),
            session_id: identity.session_id,
            current_step: self.sequencer.current_step(),
            max_step_reached: self.sequencer.max_step_reached(),
            fields: (*self.sequencer.aggregate().snapshot()).clone(),
            created_at,
            updated_at,
        })
    }

    /// Abandons any pending write. The flow stays usable.
    pub fn teardown(&self) {
        self.sequencer.teardown();
    }
}

impl Drop for LoanFlow {
    fn drop(&mut self) {
        self.sequencer.teardown();
    }
}

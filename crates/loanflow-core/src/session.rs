//! Guest session and identity binding.
//!
//! The binder owns the session id, the current application id and, once
//! verified, the user id. All three live behind one lock so readers never see
//! a mixed old/new identity after a bind remaps the application id.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use loanflow_store::{Durability, DynStore, JsonStoreExt};
use loanflow_types::wire::VerifyRequest;
use loanflow_types::{OwnerKind, SessionIdentity, now_wallclock_ms};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{AnalyticsSink, FlowEvent, TracingAnalytics, dispatch};
use crate::error::{FlowError, IdentityBindError};
use crate::service::ApplicationService;

pub const SESSION_KEY: &str = "session";
pub const APPLICATION_KEY: &str = "application";

/// Phone and one-time code proving who the applicant is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityProof {
    pub phone: String,
    pub code: String,
}

impl IdentityProof {
    pub fn new(phone: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            code: code.into(),
        }
    }
}

/// Result of a successful [`SessionBinder::bind_identity`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundIdentity {
    pub user_id: String,
    pub application_id: String,
    pub previous_application_id: String,
}

impl BoundIdentity {
    pub fn remapped(&self) -> bool {
        self.application_id != self.previous_application_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredApplication {
    application_id: String,
    created_at: u64,
    updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
}

#[derive(Debug, Default)]
struct BinderState {
    identity: Option<SessionIdentity>,
    application: Option<StoredApplication>,
}

pub struct SessionBinder {
    store: DynStore,
    service: ApplicationService,
    analytics: Arc<dyn AnalyticsSink>,
    state: RwLock<BinderState>,
}

impl std::fmt::Debug for SessionBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBinder")
            .field("durability", &self.store.durability())
            .field("identity", &self.identity())
            .field("application_id", &self.application_id())
            .finish()
    }
}

impl SessionBinder {
    pub fn new(store: DynStore, service: ApplicationService) -> Self {
        Self {
            store,
            service,
            analytics: Arc::new(TracingAnalytics),
            state: RwLock::new(BinderState::default()),
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Session state will not outlive this process.
    pub fn is_degraded(&self) -> bool {
        self.store.durability() == Durability::PageLifetime
    }

    /// Returns the session, restoring it from the store or minting a new one.
    ///
    /// Storage failures degrade to an in-memory session; they are never
    /// surfaced to the caller.
    pub fn ensure_session(&self) -> SessionIdentity {
        if let Some(identity) = self.read().identity.clone() {
            return identity;
        }
        let mut state = self.write();
        if let Some(identity) = state.identity.clone() {
            return identity;
        }

        let identity = match self.store.get_json::<SessionIdentity>(SESSION_KEY) {
            Ok(Some(identity)) => {
                debug!(session_id = %identity.session_id, "restored session");
                identity
            }
            Ok(None) => self.mint_session(),
            Err(err) => {
                warn!(error = %err, "stored session unreadable; starting a new one");
                self.mint_session()
            }
        };
        if state.application.is_none() {
            state.application = match self.store.get_json::<StoredApplication>(APPLICATION_KEY) {
                Ok(app) => app,
                Err(err) => {
                    warn!(error = %err, "stored application unreadable; ignoring it");
                    None
                }
            };
        }
        state.identity = Some(identity.clone());
        identity
    }

    fn mint_session(&self) -> SessionIdentity {
        let identity = SessionIdentity::guest(Uuid::new_v4().to_string());
        if self.is_degraded() {
            warn!(session_id = %identity.session_id, "session storage is page-lifetime only");
        }
        self.persist(SESSION_KEY, &identity);
        info!(session_id = %identity.session_id, "started guest session");
        identity
    }

    /// Returns the application id, creating a guest application if needed.
    pub async fn ensure_application(&self) -> Result<String, FlowError> {
        let identity = self.ensure_session();
        if let Some(id) = self.application_id() {
            return Ok(id);
        }

        let created = self.service.create_guest(&identity.session_id).await?;
        let now = now_wallclock_ms();
        let mut state = self.write();
        // A concurrent call may have won while we were awaiting.
        if let Some(app) = &state.application {
            return Ok(app.application_id.clone());
        }
        if created.session_id != identity.session_id {
            debug!(
                local = %identity.session_id,
                remote = %created.session_id,
                "service assigned a different session id"
            );
            let adopted = SessionIdentity {
                session_id: created.session_id.clone(),
                user_id: identity.user_id.clone(),
            };
            self.persist(SESSION_KEY, &adopted);
            state.identity = Some(adopted);
        }
        let app = StoredApplication {
            application_id: created.application_id.clone(),
            created_at: now,
            updated_at: now,
            phone: None,
        };
        self.persist(APPLICATION_KEY, &app);
        state.application = Some(app);
        info!(application_id = %created.application_id, "created guest application");
        Ok(created.application_id)
    }

    /// Verifies `proof` and merges the guest application into the user.
    ///
    /// On success the session becomes user-owned and the application id the
    /// service returned replaces the old one atomically. On any failure the
    /// session is left exactly as it was.
    pub async fn bind_identity(
        &self,
        proof: IdentityProof,
    ) -> Result<BoundIdentity, IdentityBindError> {
        let identity = self.ensure_session();
        let previous = self
            .application_id()
            .ok_or(IdentityBindError::NoApplication)?;

        let request = VerifyRequest {
            phone: proof.phone.clone(),
            code: proof.code,
            application_id: previous.clone(),
        };
        let response = match self.service.verify(&identity.session_id, &request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(application_id = %previous, error = %err, "identity verification failed");
                return Err(err);
            }
        };
        let user = match (response.success, response.user) {
            (true, Some(user)) => user,
            _ => {
                warn!(application_id = %previous, "identity verification rejected");
                return Err(IdentityBindError::Rejected);
            }
        };
        let application_id = response.application_id.unwrap_or_else(|| previous.clone());

        {
            let mut state = self.write();
            let mut bound = state.identity.clone().unwrap_or(identity);
            bound.user_id = Some(user.id.clone());
            let created_at = state
                .application
                .as_ref()
                .map(|app| app.created_at)
                .unwrap_or_else(now_wallclock_ms);
            let app = StoredApplication {
                application_id: application_id.clone(),
                created_at,
                updated_at: now_wallclock_ms(),
                phone: Some(proof.phone),
            };
            self.persist(SESSION_KEY, &bound);
            self.persist(APPLICATION_KEY, &app);
            state.identity = Some(bound);
            state.application = Some(app);
        }

        let bound = BoundIdentity {
            user_id: user.id,
            application_id,
            previous_application_id: previous,
        };
        info!(
            user_id = %bound.user_id,
            application_id = %bound.application_id,
            remapped = bound.remapped(),
            "identity bound"
        );
        dispatch(
            self.analytics.as_ref(),
            FlowEvent::IdentityBound {
                application_id: bound.application_id.clone(),
                user_id: bound.user_id.clone(),
            },
        );
        Ok(bound)
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.read().identity.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.read().identity.as_ref().map(|i| i.session_id.clone())
    }

    pub fn application_id(&self) -> Option<String> {
        self.read()
            .application
            .as_ref()
            .map(|app| app.application_id.clone())
    }

    pub fn owner_kind(&self) -> OwnerKind {
        self.read()
            .identity
            .as_ref()
            .map(SessionIdentity::owner_kind)
            .unwrap_or_default()
    }

    /// Phone captured by the last successful bind.
    pub fn phone(&self) -> Option<String> {
        self.read().application.as_ref().and_then(|app| app.phone.clone())
    }

    pub(crate) fn application_timestamps(&self) -> Option<(u64, u64)> {
        self.read()
            .application
            .as_ref()
            .map(|app| (app.created_at, app.updated_at))
    }

    pub(crate) fn touch(&self) {
        let mut state = self.write();
        if let Some(app) = state.application.as_mut() {
            app.updated_at = now_wallclock_ms();
            let app = app.clone();
            self.persist(APPLICATION_KEY, &app);
        }
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(err) = self.store.put_json(key, value) {
            warn!(key, error = %err, "session store write failed; keeping state in memory");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BinderState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BinderState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

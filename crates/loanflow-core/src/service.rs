//! Typed client for the remote application service.
//!
//! Every call goes through the [`PersistenceGateway`] under one shared
//! [`RequestPolicy`] and carries the session header.

use loanflow_gateway::{
    AbortSignal, Execution, GatewayRequest, PersistenceGateway, RequestPolicy, TransportError,
};
use loanflow_types::StepSubmission;
use loanflow_types::wire::{
    self, ApplicationView, GuestApplicationCreated, IDEMPOTENCY_HEADER, SESSION_HEADER,
    StepUpdate, VerifyRequest, VerifyResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{FlowError, IdentityBindError};

#[derive(Clone, Debug)]
pub struct ApplicationService {
    gateway: PersistenceGateway,
    policy: RequestPolicy,
}

impl ApplicationService {
    pub fn new(gateway: PersistenceGateway, policy: RequestPolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    pub async fn create_guest(
        &self,
        session_id: &str,
    ) -> Result<GuestApplicationCreated, FlowError> {
        let request = GatewayRequest::post(wire::GUEST_APPLICATION_PATH)
            .with_header(SESSION_HEADER, session_id)
            .with_json(json!({}));
        self.fetch_json(&request).await
    }

    pub async fn fetch_application(
        &self,
        session_id: &str,
        application_id: &str,
    ) -> Result<ApplicationView, FlowError> {
        let request = GatewayRequest::get(wire::application_path(application_id))
            .with_header(SESSION_HEADER, session_id);
        self.fetch_json(&request).await
    }

    /// Writes one step. `application_id` is resolved again before every
    /// attempt, so a retry after an identity bind targets the new id. The raw
    /// execution is returned so the caller can classify the outcome and count
    /// attempts.
    pub async fn put_step<F>(
        &self,
        session_id: &str,
        application_id: F,
        submission: &StepSubmission,
        update: &StepUpdate,
        abort: &AbortSignal,
    ) -> Execution
    where
        F: Fn() -> String + Send + Sync,
    {
        let body = match to_body(update) {
            Ok(body) => body,
            Err(err) => {
                return Execution {
                    outcome: Err(err),
                    attempts: Vec::new(),
                };
            }
        };
        let build = || {
            let application_id = application_id();
            GatewayRequest::put(wire::step_path(&application_id))
                .with_header(SESSION_HEADER, session_id)
                .with_header(IDEMPOTENCY_HEADER, submission.idempotency_key(&application_id))
                .with_json(body.clone())
        };
        self.gateway.run_with(build, &self.policy, Some(abort)).await
    }

    pub async fn verify(
        &self,
        session_id: &str,
        body: &VerifyRequest,
    ) -> Result<VerifyResponse, IdentityBindError> {
        let request = GatewayRequest::post(wire::VERIFY_PATH)
            .with_header(SESSION_HEADER, session_id)
            .with_json(to_body(body)?);
        let response = self.gateway.execute(&request, &self.policy).await?;
        Ok(response.json()?)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &GatewayRequest,
    ) -> Result<T, FlowError> {
        let response = self
            .gateway
            .execute(request, &self.policy)
            .await
            .map_err(|source| FlowError::Request {
                path: request.path.clone(),
                source,
            })?;
        response.json().map_err(|source| FlowError::Decode {
            path: request.path.clone(),
            source,
        })
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value).map_err(|err| TransportError::InvalidRequest(err.to_string()))
}

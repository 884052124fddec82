//! Resilient request execution against the application service.
//!
//! One logical request runs through [`PersistenceGateway::execute`]: a bounded
//! number of attempts, each with its own deadline, exponential backoff between
//! attempts, an optional fallback transport for environment-level failures and
//! a fail-fast path when the environment reports no connectivity.

pub mod abort;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod transport;

#[cfg(feature = "transport-http")]
pub mod http;

#[cfg(any(feature = "test-fixtures", test))]
pub mod mock;

pub use abort::{AbortController, AbortSignal};
pub use error::{DecodeError, FailureKind, TransportError, TransportFailure, is_retryable_status};
pub use gateway::{AttemptLog, Execution, GatewayResponse, PersistenceGateway};
pub use policy::RequestPolicy;
pub use transport::{
    AssumeOnline, Connectivity, ConnectivityFlag, GatewayRequest, HttpMethod, RawResponse,
    Transport,
};

#[cfg(feature = "transport-http")]
pub use http::{HttpTransport, TransportBuildError};

//! The transport boundary: one inbound config request and the handle used to
//! answer it.

use crate::checksums::ClientChecksums;
use crate::errors::{ResolveError, ValidationError};
use crate::payload::ConfigResponse;
use crate::types::{ConfigKey, Generation, PlatformVersion};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub type ResponseResult = Result<ConfigResponse, ResolveError>;

/// One-shot handle producing the terminal response of a request.
///
/// Consuming the handle is the only way to answer, so a request can be
/// answered at most once.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<ResponseResult>,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<ResponseResult>) {
        let (tx, rx) = oneshot::channel();
        (Responder { tx }, rx)
    }

    /// Delivers the response. Returns false if the receiving side is gone.
    pub fn respond(self, result: ResponseResult) -> bool {
        self.tx.send(result).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What the client asks for, as handed over by a transport adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestParams {
    pub key: ConfigKey,
    pub client_hostname: String,
    pub version: Option<PlatformVersion>,
    pub checksums: ClientChecksums,
    pub generation: Generation,
    pub timeout: Duration,
}

/// A config request in flight.
///
/// Owned by exactly one party at a time: a worker, a parked-request queue, or
/// the expiry path. The disconnect token is cancelled by the transport when
/// the peer goes away.
#[derive(Debug)]
pub struct ConfigRequest {
    params: RequestParams,
    parked_once: bool,
    responder: Responder,
    disconnect: CancellationToken,
}

impl ConfigRequest {
    pub fn new(params: RequestParams, responder: Responder, disconnect: CancellationToken) -> Self {
        ConfigRequest {
            params,
            parked_once: false,
            responder,
            disconnect,
        }
    }

    /// Builds a request together with the receiving end of its responder and
    /// the token the transport cancels on disconnect.
    pub fn with_channel(
        params: RequestParams,
    ) -> (Self, oneshot::Receiver<ResponseResult>, CancellationToken) {
        let (responder, rx) = Responder::channel();
        let token = CancellationToken::new();
        (ConfigRequest::new(params, responder, token.clone()), rx, token)
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    pub fn key(&self) -> &ConfigKey {
        &self.params.key
    }

    pub fn parked_once(&self) -> bool {
        self.parked_once
    }

    pub(crate) fn mark_parked(&mut self) {
        self.parked_once = true;
    }

    pub(crate) fn clamp_timeout(&mut self, max: Duration) {
        self.params.timeout = self.params.timeout.min(max);
    }

    pub fn disconnect_token(&self) -> &CancellationToken {
        &self.disconnect
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnect.is_cancelled() || self.responder.is_closed()
    }

    pub fn respond(self, result: ResponseResult) -> bool {
        self.responder.respond(result)
    }

    /// Structural checks done before a request is admitted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let key = &self.params.key;
        if key.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if key.namespace.is_empty() {
            return Err(ValidationError::EmptyNamespace);
        }
        if key.config_id.is_empty() || key.config_id.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidConfigId(key.config_id.clone()));
        }
        if self.params.client_hostname.is_empty() {
            return Err(ValidationError::EmptyHostname);
        }
        self.params.checksums.validate()
    }
}

//! HTTP adapter for the long-poll endpoint.
//!
//! Each HTTP request becomes one [`ConfigRequest`]. The handler future waits
//! on the responder; if the client goes away hyper drops that future, which
//! cancels the request's disconnect token.

use crate::LongPollError;
use crate::coordinator::RequestCoordinator;
use crate::protocol::{CONFIG_PATH, WireError, WireRequest, WireResponse, status_for};
use crate::request::ConfigRequest;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::make_json_response;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub struct LongPollService {
    coordinator: Arc<RequestCoordinator>,
}

impl LongPollService {
    pub fn new(coordinator: Arc<RequestCoordinator>) -> Self {
        LongPollService { coordinator }
    }
}

impl Service<Request<Incoming>> for LongPollService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = LongPollError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let coordinator = self.coordinator.clone();
        Box::pin(async move { Ok(handle(&coordinator, req).await) })
    }
}

pub async fn handle<B>(
    coordinator: &RequestCoordinator,
    req: Request<B>,
) -> Response<BoxBody<Bytes, Infallible>>
where
    B: Body,
    B::Error: Display,
{
    if req.uri().path() != CONFIG_PATH {
        return error_response(StatusCode::NOT_FOUND, "not_found", "no such endpoint");
    }
    if req.method() != Method::POST {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("{CONFIG_PATH} only accepts POST"),
        );
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("failed to read request body: {e}"),
            );
        }
    };

    let wire: WireRequest = match serde_json::from_slice(&body) {
        Ok(wire) => wire,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("malformed request: {e}"),
            );
        }
    };

    let (request, rx, token) = ConfigRequest::with_channel(wire.into());
    // Cancels the token if this future is dropped before the answer arrives
    let disconnect = token.drop_guard();
    coordinator.submit(request);
    let result = rx.await;
    disconnect.disarm();

    match result {
        Ok(Ok(response)) => make_json_response(StatusCode::OK, &WireResponse::from(&response)),
        Ok(Err(e)) => make_json_response(status_for(&e), &WireError::from(&e)),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "request was dropped without a response",
        ),
    }
}

fn error_response(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, Infallible>> {
    make_json_response(status, &WireError::new(status, error, message))
}

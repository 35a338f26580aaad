use crate::http::{make_error_response, make_json_response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health`, `/ready` and `/status` on the admin listener.
///
/// `is_ready` is evaluated per request. `status` produces the JSON body of
/// `/status` and is expected to be cheap and non-blocking.
pub struct AdminService<F, S, E> {
    is_ready: F,
    status: S,
    _error: PhantomData<fn() -> E>,
}

impl<F, S, E> AdminService<F, S, E>
where
    F: Fn() -> bool,
    S: Fn() -> serde_json::Value,
{
    pub fn new(is_ready: F, status: S) -> Self {
        Self {
            is_ready,
            status,
            _error: PhantomData,
        }
    }
}

impl<F, S, E> Service<Request<Incoming>> for AdminService<F, S, E>
where
    F: Fn() -> bool,
    S: Fn() -> serde_json::Value,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = route(req.uri().path(), &self.is_ready, &self.status);
        Box::pin(async move { Ok(res) })
    }
}

fn route(
    path: &str,
    is_ready: impl Fn() -> bool,
    status: impl Fn() -> serde_json::Value,
) -> Response<BoxBody<Bytes, Infallible>> {
    let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

    match path {
        "/health" => Response::new(ok_body()),
        "/ready" => match is_ready() {
            true => Response::new(ok_body()),
            false => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        "/status" => make_json_response(StatusCode::OK, &status()),
        _ => make_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> serde_json::Value {
        serde_json::json!({"parked": 3})
    }

    #[tokio::test]
    async fn test_routes() {
        assert_eq!(route("/health", || false, status).status(), StatusCode::OK);
        assert_eq!(route("/ready", || true, status).status(), StatusCode::OK);
        assert_eq!(
            route("/ready", || false, status).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            route("/unknown", || true, status).status(),
            StatusCode::NOT_FOUND
        );

        let response = route("/status", || true, status);
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["parked"], 3);
    }
}

//! Protocol multiplexer for the shared listener.
//!
//! A single socket serves both the binary gRPC surface and the textual REST
//! surface. Each request is classified once: HTTP/2 framing combined with an
//! `application/grpc` content type selects the gRPC engine, everything else
//! falls through to the REST engine, which answers unclassifiable requests
//! with a well-formed HTTP error instead of hanging the connection.

use std::convert::Infallible;
use std::task::{ready, Context, Poll};

use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use futures::FutureExt;
use http::{header::CONTENT_TYPE, Request, Version};
use tower::Service;
use tracing::debug;

/// Steers each inbound request to the REST or gRPC engine.
pub struct MultiplexService<Rest, Grpc> {
    rest: Rest,
    rest_ready: bool,
    grpc: Grpc,
    grpc_ready: bool,
}

impl<Rest, Grpc> MultiplexService<Rest, Grpc> {
    /// Wrap the two protocol engines behind one service.
    pub const fn new(rest: Rest, grpc: Grpc) -> Self {
        Self {
            rest,
            rest_ready: false,
            grpc,
            grpc_ready: false,
        }
    }
}

impl<Rest, Grpc> Clone for MultiplexService<Rest, Grpc>
where
    Rest: Clone,
    Grpc: Clone,
{
    fn clone(&self) -> Self {
        Self {
            rest: self.rest.clone(),
            grpc: self.grpc.clone(),
            // Readiness is not cloneable state.
            rest_ready: false,
            grpc_ready: false,
        }
    }
}

/// Decision rule: version-2 framing plus the binary RPC content type.
fn is_grpc_request<B>(req: &Request<B>) -> bool {
    req.version() == Version::HTTP_2
        && req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/grpc"))
}

impl<Rest, Grpc, ReqBody> Service<Request<ReqBody>> for MultiplexService<Rest, Grpc>
where
    Rest: Service<Request<ReqBody>, Error = Infallible>,
    Rest::Response: IntoResponse,
    Rest::Future: Send + 'static,
    Grpc: Service<Request<ReqBody>, Error = Infallible>,
    Grpc::Response: IntoResponse,
    Grpc::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Drive both inner services to readiness so either can take the call.
        loop {
            match (self.rest_ready, self.grpc_ready) {
                (true, true) => return Poll::Ready(Ok(())),
                (false, _) => {
                    ready!(self.rest.poll_ready(cx))?;
                    self.rest_ready = true;
                }
                (_, false) => {
                    ready!(self.grpc.poll_ready(cx))?;
                    self.grpc_ready = true;
                }
            }
        }
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        assert!(
            self.rest_ready && self.grpc_ready,
            "poll_ready must be called first"
        );
        self.rest_ready = false;
        self.grpc_ready = false;

        if is_grpc_request(&req) {
            debug!(method = %req.method(), uri = %req.uri(), "dispatching request to grpc engine");
            self.grpc
                .call(req)
                .map(|result| result.map(IntoResponse::into_response))
                .boxed()
        } else {
            debug!(method = %req.method(), uri = %req.uri(), "dispatching request to rest engine");
            self.rest
                .call(req)
                .map(|result| result.map(IntoResponse::into_response))
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::any;
    use axum::Router;
    use tower::ServiceExt;

    fn mux() -> MultiplexService<Router, Router> {
        let rest = Router::new().route("/probe", any(|| async { "rest" }));
        let grpc = Router::new().fallback(|| async { "grpc" });
        MultiplexService::new(rest, grpc)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("read body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn http2_grpc_content_type_routes_to_grpc() {
        let req = Request::builder()
            .version(Version::HTTP_2)
            .method("POST")
            .uri("/deployer.v1.Worker/SendDeployFile")
            .header(CONTENT_TYPE, "application/grpc")
            .body(Body::empty())
            .expect("request");

        let response = mux().oneshot(req).await.expect("response");
        assert_eq!(body_text(response).await, "grpc");
    }

    #[tokio::test]
    async fn http2_without_grpc_content_type_routes_to_rest() {
        let req = Request::builder()
            .version(Version::HTTP_2)
            .method("POST")
            .uri("/probe")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::empty())
            .expect("request");

        let response = mux().oneshot(req).await.expect("response");
        assert_eq!(body_text(response).await, "rest");
    }

    #[tokio::test]
    async fn http1_grpc_content_type_routes_to_rest() {
        // gRPC requires version-2 framing; content type alone is not enough.
        let req = Request::builder()
            .version(Version::HTTP_11)
            .method("POST")
            .uri("/probe")
            .header(CONTENT_TYPE, "application/grpc")
            .body(Body::empty())
            .expect("request");

        let response = mux().oneshot(req).await.expect("response");
        assert_eq!(body_text(response).await, "rest");
    }

    #[tokio::test]
    async fn unclassifiable_request_gets_a_well_formed_response() {
        let service = MultiplexService::new(
            Router::new().route("/probe", any(|| async { "rest" })),
            Router::new().route("/grpc-only", any(|| async { "grpc" })),
        );
        let req = Request::builder()
            .method("GET")
            .uri("/no/such/route")
            .body(Body::empty())
            .expect("request");

        let response = service.oneshot(req).await.expect("response");
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }
}

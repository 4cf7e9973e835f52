// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;

use crate::proxy::Forwarder;

/// tower adapter around the forwarder. One clone per connection so the peer
/// address can travel with each request.
#[derive(Clone)]
pub struct RequestHandler {
    forwarder: Arc<Forwarder>,
    peer: Option<SocketAddr>,
}

impl RequestHandler {
    pub fn new(forwarder: Arc<Forwarder>) -> Self {
        Self {
            forwarder,
            peer: None,
        }
    }

    pub fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            forwarder: self.forwarder.clone(),
            peer: Some(peer),
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let forwarder = self.forwarder.clone();
        let peer = self.peer;
        Box::pin(async move { Ok(forwarder.handle(req, peer).await) })
    }
}

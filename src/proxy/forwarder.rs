// ────────────────────────────────
// src/proxy/forwarder.rs
// Request path: readiness gate → admission → selection → proxy copy.
// ────────────────────────────────

use crate::admission::AdmissionController;
use crate::load_balancer::Router;
use crate::metrics::{MetricsCollector, Timer};
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Request, Response, StatusCode, Uri, Version};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};
use url::Url;

const REQUEST_ID: &str = "x-request-id";
const FORWARDED_FOR: &str = "x-forwarded-for";

// Connection-scoped headers that must not be passed through a proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

pub struct Forwarder {
    router: Arc<Router>,
    admission: Arc<dyn AdmissionController>,
    client: HttpClient,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Forwarder {
    pub fn new(
        router: Arc<Router>,
        admission: Arc<dyn AdmissionController>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder().build(HttpsConnector::new());

        Self {
            router,
            admission,
            client,
            metrics,
        }
    }

    /// Handles one inbound request. Every failure is turned into a response;
    /// nothing here is fatal.
    pub async fn handle(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Response<Body> {
        let timer = Timer::new();
        let method = req.method().clone();
        let request_id = req
            .headers()
            .get(REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %method,
            path = %req.uri().path(),
        );

        let response = match self.forward(req, client_addr, &request_id).instrument(span).await {
            Ok(response) => response,
            Err(err) => err.into(),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_response(method.as_str(), response.status().as_u16(), timer.elapsed());
        }
        response
    }

    async fn forward(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
        request_id: &str,
    ) -> Result<Response<Body>, ProxyError> {
        if !self.router.is_ready() {
            return Err(ProxyError::NotReady);
        }

        let key = routing_key(&req, client_addr);
        if let Err(err) = self.admission.allow(&key).await {
            warn!(key = %key, policy = self.admission.name(), %err, "Request not admitted");
            if let Some(metrics) = &self.metrics {
                metrics.record_admission_denied();
            }
            return Err(ProxyError::RateLimited(key));
        }

        let Some(endpoint) = self.router.select_endpoint().await else {
            if let Some(metrics) = &self.metrics {
                metrics.record_no_healthy_endpoint();
            }
            return Err(ProxyError::NoHealthyEndpoints);
        };

        endpoint.record_request();
        let address = endpoint.address();
        if let Some(metrics) = &self.metrics {
            metrics.record_forward(&address);
        }

        let destination = endpoint
            .destination()
            .map_err(|e| ProxyError::InvalidDestination(address.clone(), e.to_string()))?;
        let (uri, authority) = rewrite_uri(&destination, req.uri())
            .map_err(|reason| ProxyError::InvalidDestination(address.clone(), reason))?;

        *req.uri_mut() = uri;
        // The outbound pool speaks HTTP/1 only, whatever the client used.
        *req.version_mut() = Version::HTTP_11;
        prepare_headers(req.headers_mut(), &authority, client_addr, request_id)
            .map_err(|reason| ProxyError::InvalidDestination(address.clone(), reason))?;

        tracing::debug!(endpoint = %address, uri = %req.uri(), "Forwarding request");

        let mut response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::Backend(address.clone(), e.to_string()))?;

        strip_hop_by_hop(response.headers_mut());
        Ok(response)
    }
}

/// Admission key: client IP, else the `Host` header, else empty.
fn routing_key(req: &Request<Body>, client_addr: Option<SocketAddr>) -> String {
    if let Some(addr) = client_addr {
        return addr.ip().to_string();
    }
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Points the original path and query at `destination`. Returns the new URI
/// and the authority to send as `Host`.
fn rewrite_uri(destination: &Url, original: &Uri) -> Result<(Uri, String), String> {
    let host = destination
        .host_str()
        .ok_or_else(|| format!("{destination} has no host"))?;
    let authority = match destination.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let base_path = destination.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri = format!(
        "{}://{}{}{}",
        destination.scheme(),
        authority,
        base_path,
        path_and_query
    )
    .parse::<Uri>()
    .map_err(|e| e.to_string())?;

    Ok((uri, authority))
}

fn prepare_headers(
    headers: &mut HeaderMap,
    authority: &str,
    client_addr: Option<SocketAddr>,
    request_id: &str,
) -> Result<(), String> {
    strip_hop_by_hop(headers);

    let host = HeaderValue::from_str(authority).map_err(|e| e.to_string())?;
    headers.insert(header::HOST, host);

    if !headers.contains_key(REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert(REQUEST_ID, value);
        }
    }

    if let Some(addr) = client_addr {
        let client_ip = addr.ip().to_string();
        let forwarded = match headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {client_ip}"),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(FORWARDED_FOR, value);
        }
    }

    Ok(())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Load balancer is not ready yet")]
    NotReady,

    #[error("Too many requests from {0:?}")]
    RateLimited(String),

    #[error("No healthy endpoints available")]
    NoHealthyEndpoints,

    #[error("Cannot resolve destination {0}: {1}")]
    InvalidDestination(String, String),

    #[error("Backend {0} error: {1}")]
    Backend(String, String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NotReady | ProxyError::NoHealthyEndpoints => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::InvalidDestination(..) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Backend(..) => StatusCode::BAD_GATEWAY,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match &err {
            ProxyError::NotReady => "Load Balancer is not ready yet",
            ProxyError::RateLimited(_) => "Too many requests",
            ProxyError::NoHealthyEndpoints => "No healthy servers available",
            ProxyError::InvalidDestination(..) => "Internal server error",
            ProxyError::Backend(..) => "Bad gateway",
        };
        match &err {
            ProxyError::InvalidDestination(..) | ProxyError::Backend(..) => {
                tracing::error!(%err, "Forwarding failed");
            }
            _ => tracing::debug!(%err, "Request rejected"),
        }

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AllowAll, DenyAll};
    use crate::config::EndpointAddr;
    use crate::health::{ProbeClient, ProbeOutcome};
    use crate::proxy::Endpoint;
    use chrono::Utc;
    use std::time::Duration;

    fn endpoint(addr: EndpointAddr) -> Arc<Endpoint> {
        let client = ProbeClient::new(Duration::from_secs(1)).unwrap();
        Arc::new(Endpoint::new(addr, "/health", client))
    }

    async fn ready_router(endpoints: Vec<Arc<Endpoint>>, healthy: bool) -> Arc<Router> {
        let router = Router::new(endpoints).unwrap();
        for index in 0..router.len() {
            let outcome = ProbeOutcome {
                healthy,
                started_at: Utc::now(),
            };
            router.record_probe(index, outcome).await;
        }
        router.mark_ready();
        Arc::new(router)
    }

    fn client() -> Option<SocketAddr> {
        Some("10.1.2.3:50000".parse().unwrap())
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(header::HOST, "lb.example")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_not_ready_rejects() {
        let addr: EndpointAddr = "localhost:8081".parse().unwrap();
        let router = Arc::new(Router::new(vec![endpoint(addr)]).unwrap());
        let forwarder = Forwarder::new(router.clone(), Arc::new(AllowAll), None);

        let response = forwarder.handle(get("/"), client()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "Load Balancer is not ready yet");
        assert_eq!(router.endpoints()[0].stats().requests, 0);
    }

    #[tokio::test]
    async fn test_denied_requests_never_reach_router() {
        let addr: EndpointAddr = "localhost:8081".parse().unwrap();
        let router = ready_router(vec![endpoint(addr)], true).await;
        let forwarder = Forwarder::new(router.clone(), Arc::new(DenyAll), None);

        for _ in 0..5 {
            let response = forwarder.handle(get("/"), client()).await;
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
        assert_eq!(router.endpoints()[0].stats().requests, 0);
        assert_eq!(router.cursor(), 0);
    }

    #[tokio::test]
    async fn test_no_healthy_endpoint() {
        let addr: EndpointAddr = "localhost:8081".parse().unwrap();
        let router = ready_router(vec![endpoint(addr)], false).await;
        let forwarder = Forwarder::new(router.clone(), Arc::new(AllowAll), None);

        let response = forwarder.handle(get("/"), client()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "No healthy servers available");
        assert_eq!(router.endpoints()[0].stats().requests, 0);
    }

    #[tokio::test]
    async fn test_malformed_address_is_internal_error() {
        let addr = EndpointAddr {
            scheme: "http".to_string(),
            host: "bad host".to_string(),
            port: 80,
        };
        let router = ready_router(vec![endpoint(addr)], true).await;
        let forwarder = Forwarder::new(router.clone(), Arc::new(AllowAll), None);

        let response = forwarder.handle(get("/"), client()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(router.endpoints()[0].stats().requests, 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let addr: EndpointAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let router = ready_router(vec![endpoint(addr)], true).await;
        let forwarder = Forwarder::new(router, Arc::new(AllowAll), None);

        let response = forwarder.handle(get("/"), client()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_forwards_path_query_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let host_port = server.host_with_port();
        let mock = server
            .mock("POST", mockito::Matcher::Regex("^/items/7".to_string()))
            .match_query(mockito::Matcher::UrlEncoded(
                "verbose".to_string(),
                "true".to_string(),
            ))
            .match_header("host", host_port.as_str())
            .match_header("x-forwarded-for", "192.168.0.9, 10.1.2.3")
            .match_header("x-custom", "kept")
            .match_header("x-request-id", "req-123")
            .match_header("keep-alive", mockito::Matcher::Missing)
            .match_body("payload")
            .with_status(201)
            .with_header("x-backend", "one")
            .with_body("created")
            .create_async()
            .await;

        let addr: EndpointAddr = host_port.parse().unwrap();
        let router = ready_router(vec![endpoint(addr)], true).await;
        let forwarder = Forwarder::new(router.clone(), Arc::new(AllowAll), None);

        let req = Request::builder()
            .method("POST")
            .uri("/items/7?verbose=true")
            .header(header::HOST, "lb.example")
            .header("x-custom", "kept")
            .header("x-request-id", "req-123")
            .header("x-forwarded-for", "192.168.0.9")
            .header("keep-alive", "timeout=5")
            .body(Body::from("payload"))
            .unwrap();

        let response = forwarder.handle(req, client()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-backend").unwrap(), "one");
        assert_eq!(body_text(response).await, "created");

        mock.assert_async().await;
        assert_eq!(router.endpoints()[0].stats().requests, 1);
    }

    #[tokio::test]
    async fn test_http2_request_forwarded_as_http11() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/h2")
            .with_status(200)
            .with_body("downgraded")
            .create_async()
            .await;

        let addr: EndpointAddr = server.host_with_port().parse().unwrap();
        let router = ready_router(vec![endpoint(addr)], true).await;
        let forwarder = Forwarder::new(router, Arc::new(AllowAll), None);

        let req = Request::builder()
            .version(Version::HTTP_2)
            .uri("/h2")
            .body(Body::empty())
            .unwrap();

        let response = forwarder.handle(req, client()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "downgraded");
        mock.assert_async().await;
    }

    #[test]
    fn test_routing_key_falls_back_to_host() {
        let req = get("/");
        assert_eq!(routing_key(&req, client()), "10.1.2.3");
        assert_eq!(routing_key(&req, None), "lb.example");

        let bare = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(routing_key(&bare, None), "");
    }

    #[test]
    fn test_strip_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("x-keep", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-trace").is_none());
        assert!(headers.get("x-keep").is_some());
    }
}

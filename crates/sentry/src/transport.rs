use std::collections::BTreeMap;

use poem::{http::header, Addr, Request};
use sentry::{
    protocol::{self, Context, Map, Url, Value},
    Scope,
};

/// Which protocol served the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// A gRPC call (`content-type: application/grpc*`).
    Grpc,
    /// Any other HTTP request.
    Http,
}

/// A read-only view of the transport fields of an inbound request.
///
/// Recorded into a hub's scope so that events captured while the request is
/// in flight carry the request context.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Grpc {
        /// Address of the serving endpoint, e.g. `grpc://127.0.0.1:8080`.
        endpoint: String,
        /// Full method path, e.g. `/helloworld.Greeter/SayHello`.
        operation: String,
        /// First UTF-8 value of every request header.
        headers: BTreeMap<String, String>,
    },
    Http(protocol::Request),
}

impl Transport {
    /// Snapshots the transport of `req`.
    pub fn from_request(req: &Request) -> Self {
        Self::with_snapshot(req, snapshot(req))
    }

    pub(crate) fn with_snapshot(req: &Request, snapshot: protocol::Request) -> Self {
        if !is_grpc(req) {
            return Transport::Http(snapshot);
        }

        Transport::Grpc {
            endpoint: grpc_endpoint(req.local_addr()),
            operation: req.uri().path().to_string(),
            headers: headers(req),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Grpc { .. } => TransportKind::Grpc,
            Transport::Http(_) => TransportKind::Http,
        }
    }

    /// Records the transport fields into `scope`.
    ///
    /// gRPC sets the `gRPC` and `Headers` contexts. HTTP attaches the raw
    /// request to every event that does not carry one yet.
    pub fn apply_to_scope(&self, scope: &mut Scope) {
        match self {
            Transport::Grpc {
                endpoint,
                operation,
                headers,
            } => {
                let mut grpc = Map::new();
                grpc.insert("endpoint".to_string(), Value::from(endpoint.as_str()));
                grpc.insert("operation".to_string(), Value::from(operation.as_str()));
                scope.set_context("gRPC", Context::Other(grpc));

                let headers = headers
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
                    .collect();
                scope.set_context("Headers", Context::Other(headers));
            }
            Transport::Http(request) => {
                let request = request.clone();
                scope.add_event_processor(move |mut event| {
                    if event.request.is_none() {
                        event.request = Some(request.clone());
                    }
                    Some(event)
                });
            }
        }
    }
}

/// `grpc://<addr>` for socket listeners, the address' own form otherwise.
fn grpc_endpoint(addr: &Addr) -> String {
    match addr.as_socket_addr() {
        Some(addr) => format!("grpc://{addr}"),
        None => addr.to_string(),
    }
}

fn is_grpc(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/grpc"))
}

fn headers(req: &Request) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for name in req.headers().keys() {
        if let Some(value) = req.headers().get(name).and_then(|v| v.to_str().ok()) {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    headers
}

/// Converts the request line and headers of `req` into the Sentry request
/// interface.
pub(crate) fn snapshot(req: &Request) -> protocol::Request {
    let uri = req.uri();
    let host = uri.authority().map(|authority| authority.as_str()).or_else(|| {
        req.headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
    });
    let url = host.and_then(|host| {
        format!("{}://{}{}", req.scheme(), host, uri.path())
            .parse::<Url>()
            .ok()
    });

    protocol::Request {
        url,
        method: Some(req.method().to_string()),
        query_string: uri.query().map(ToString::to_string),
        headers: headers(req),
        ..Default::default()
    }
}

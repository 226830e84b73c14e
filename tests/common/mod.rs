#![allow(dead_code)]

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request as seen by a test handler: method, path and the full body.
pub struct Seen {
    pub method: String,
    pub path: String,
    pub headers: hyper::HeaderMap,
    pub body: Vec<u8>,
}

/// Serve `handler` on an ephemeral localhost port until the test runtime
/// shuts down. Returns the base URL.
pub async fn serve<F>(handler: F) -> String
where
    F: Fn(Seen) -> Response<Body> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let make = make_service_fn(move |_| {
        let handler = handler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let handler = handler.clone();
                async move {
                    let (parts, body) = req.into_parts();
                    let body = hyper::body::to_bytes(body).await.unwrap_or_default().to_vec();
                    let seen = Seen {
                        method: parts.method.to_string(),
                        path: parts
                            .uri
                            .path_and_query()
                            .map(|p| p.as_str().to_string())
                            .unwrap_or_default(),
                        headers: parts.headers,
                        body,
                    };
                    Ok::<_, Infallible>(handler(seen))
                }
            }))
        }
    });

    let bind: SocketAddr = ([127, 0, 0, 1], 0).into();
    let server = Server::bind(&bind).serve(make);
    let addr = server.local_addr();
    tokio::spawn(server);
    format!("http://{addr}")
}

pub fn respond(status: u16, body: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

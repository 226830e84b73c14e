//! Request construction shared by the smoke prober, drift fetch and A/B
//! comparator: same URL joining, body synthesis and header layering.

use crate::openapi::{build_url, Endpoint};
use crate::synth;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use std::collections::HashMap;

/// Merge header layers in order; later layers replace earlier keys
/// (names compare case-insensitively).
pub fn merge_headers(layers: &[&HashMap<String, String>]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for layer in layers {
        for (k, v) in layer.iter() {
            let name = HeaderName::from_bytes(k.as_bytes())
                .with_context(|| format!("invalid header name {k:?}"))?;
            let value =
                HeaderValue::from_str(v).with_context(|| format!("invalid value for header {k}"))?;
            map.insert(name, value);
        }
    }
    Ok(map)
}

/// Build the request for `endpoint` against `base_url`. Mutating methods
/// get a synthesized JSON body when the operation declares one.
pub fn endpoint_request(
    client: &Client,
    base_url: &str,
    endpoint: &Endpoint,
    header_layers: &[&HashMap<String, String>],
) -> Result<RequestBuilder> {
    let url = build_url(base_url, &endpoint.path)?;
    let method = Method::from_bytes(endpoint.method.as_bytes())
        .with_context(|| format!("invalid HTTP method {:?}", endpoint.method))?;

    let mut builder = client.request(method, url);
    if endpoint.is_mutating() {
        if let Some(body) = synth::example_body_bytes(&endpoint.operation) {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body);
        }
    }
    Ok(builder.headers(merge_headers(header_layers)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::Operation;

    #[test]
    fn later_layers_win() {
        let base: HashMap<String, String> =
            [("X-Env".to_string(), "dev".to_string())].into_iter().collect();
        let auth: HashMap<String, String> =
            [("x-env".to_string(), "override".to_string())].into_iter().collect();
        let map = merge_headers(&[&base, &auth]).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["x-env"], "override");
    }

    #[test]
    fn bad_header_is_an_error() {
        let bad: HashMap<String, String> =
            [("bad header".to_string(), "v".to_string())].into_iter().collect();
        assert!(merge_headers(&[&bad]).is_err());
    }

    #[test]
    fn builds_get_without_body() {
        let client = Client::new();
        let ep = Endpoint::new("/users", "get", Operation::default());
        let req = endpoint_request(&client, "http://localhost:9/api", &ep, &[])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.url().as_str(), "http://localhost:9/api/users");
        assert!(req.body().is_none());
    }
}

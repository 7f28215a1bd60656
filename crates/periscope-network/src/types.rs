//! Wire types of the network inspector and its persisted state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request or response ids as sent by the client.
pub type RequestId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    /// Body as sent by the client, usually base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: RequestId,
    #[serde(default)]
    pub timestamp: i64,
    pub status: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Served by a mock route rather than the network.
    #[serde(default)]
    pub is_mock: bool,
}

impl Response {
    /// Client (4xx) and server (5xx) errors.
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// Everything the network inspector keeps per connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub requests: BTreeMap<RequestId, Request>,
    pub responses: BTreeMap<RequestId, Response>,
}

impl NetworkState {
    /// Copy of this state with `request` added or replaced.
    pub fn with_request(&self, request: Request) -> Self {
        let mut next = self.clone();
        next.requests.insert(request.id.clone(), request);
        next
    }

    /// Copy of this state with `response` added or replaced.
    pub fn with_response(&self, response: Response) -> Self {
        let mut next = self.clone();
        next.responses.insert(response.id.clone(), response);
        next
    }

    pub fn failed_responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.values().filter(|r| r.is_failure())
    }

    pub fn url_of(&self, id: &str) -> Option<&str> {
        self.requests
            .get(id)
            .map(|r| r.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_client_json() {
        let response: Response = serde_json::from_str(
            r#"{"id":"r1","timestamp":1591000000000,"status":404,"reason":"Not Found",
                "headers":[{"key":"Content-Type","value":"text/html"}],"isMock":true}"#,
        )
        .unwrap();
        assert_eq!(response.status, 404);
        assert!(response.is_mock);
        assert!(response.is_failure());
        assert_eq!(response.headers[0].key, "Content-Type");
        assert!(response.data.is_none());
    }

    #[test]
    fn test_with_request_leaves_original_untouched() {
        let state = NetworkState::default();
        let next = state.with_request(Request {
            id: "r1".into(),
            timestamp: 0,
            method: "GET".into(),
            url: "http://x".into(),
            headers: Vec::new(),
            data: None,
        });
        assert!(state.requests.is_empty());
        assert_eq!(next.url_of("r1"), Some("http://x"));
    }

    #[test]
    fn test_url_of_empty_url_is_missing() {
        let state = NetworkState::default().with_request(Request {
            id: "r1".into(),
            timestamp: 0,
            method: "GET".into(),
            url: String::new(),
            headers: Vec::new(),
            data: None,
        });
        assert_eq!(state.url_of("r1"), None);
        assert_eq!(state.url_of("r2"), None);
    }

    #[test]
    fn test_failed_responses() {
        let response = |id: &str, status| Response {
            id: id.into(),
            timestamp: 0,
            status,
            reason: String::new(),
            headers: Vec::new(),
            data: None,
            is_mock: false,
        };
        let state = NetworkState::default()
            .with_response(response("a", 200))
            .with_response(response("b", 399))
            .with_response(response("c", 400))
            .with_response(response("d", 503));
        let ids: Vec<&str> = state.failed_responses().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }
}

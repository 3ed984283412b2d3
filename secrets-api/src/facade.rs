//! Request classification shared by the secret and proxy routes.
//!
//! Whatever the mode, every request ends with one observation: method,
//! response status (or none), outcome label and elapsed time. The same
//! observation is written to the metrics recorder, the request span and the
//! log.

use std::time::{Duration, Instant};

use axum::http::{Method, Uri};

use crate::telemetry::Recorder;

/// Classified result of one application request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Value resolved and status below 400.
    Success,
    /// A status of 400 or above with no fetch failure: a rejected request or
    /// an upstream error response.
    StatusError,
    /// The cache, loader or payload decoding failed.
    FetchError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::StatusError => "status_error",
            Outcome::FetchError => "fetch_error",
        }
    }

    pub fn classify(status: Option<u16>, fetch_failed: bool) -> Self {
        if fetch_failed {
            Outcome::FetchError
        } else if status.is_some_and(|s| s >= 400) {
            Outcome::StatusError
        } else {
            Outcome::Success
        }
    }
}

/// Client address as the trace attribute wants it: the ip without the port.
pub fn request_ip(remote: Option<std::net::SocketAddr>) -> String {
    remote.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Timing and identity of a request, finished once the response is known.
#[derive(Debug)]
pub struct RequestObservation {
    method: Method,
    uri: String,
    request_ip: String,
    request_id: String,
    started: Instant,
}

impl RequestObservation {
    pub fn start(method: &Method, uri: &Uri, request_ip: String, request_id: String) -> Self {
        Self {
            method: method.clone(),
            uri: uri.to_string(),
            request_ip,
            request_id,
            started: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Classify, record and log the request.
    ///
    /// `fetch_error` carries the message of a cache or loader failure; client
    /// errors pass `None` with their 4xx status.
    pub fn finish(
        self,
        recorder: &dyn Recorder,
        key: Option<&str>,
        status: Option<u16>,
        fetch_error: Option<&str>,
    ) -> Outcome {
        let elapsed = self.started.elapsed();
        let outcome = Outcome::classify(status, fetch_error.is_some());
        recorder.record_request(self.method.as_str(), status, outcome, elapsed);
        self.annotate_span(outcome, elapsed, fetch_error);

        let key = key.unwrap_or_default();
        let elapsed_ms = elapsed.as_millis() as u64;
        match fetch_error {
            Some(error) => tracing::error!(
                request_id = %self.request_id,
                request_ip = %self.request_ip,
                method = %self.method,
                uri = %self.uri,
                key,
                elapsed_ms,
                response_error = %error,
                "Request failed"
            ),
            None => tracing::debug!(
                request_id = %self.request_id,
                request_ip = %self.request_ip,
                method = %self.method,
                uri = %self.uri,
                key,
                status,
                outcome = outcome.as_str(),
                elapsed_ms,
                "Request served"
            ),
        }
        outcome
    }

    fn annotate_span(&self, outcome: Outcome, elapsed: Duration, fetch_error: Option<&str>) {
        let span = tracing::Span::current();
        span.record("method", self.method.as_str());
        span.record("uri", self.uri.as_str());
        span.record("request_ip", self.request_ip.as_str());
        span.record("outcome", outcome.as_str());
        span.record("elapsed", tracing::field::debug(elapsed));
        if let Some(error) = fetch_error {
            span.record("response_error", error);
        }
    }
}

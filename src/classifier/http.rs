//! Classifier backed by an HTTP inference sidecar.
//!
//! `POST {endpoint}/classify` with `{"sample_rate", "samples"}` returns
//! `{"scores": [...]}`. `GET {endpoint}/health` must succeed at startup.
//!
//! The pipeline thread is synchronous, so requests are driven to completion on
//! the runtime handle captured at construction. Each request is bounded by the
//! timeout given at `connect`; a late answer counts as a failed inference.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use super::{Classifier, ClassifierError};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    sample_rate: u32,
    samples: &'a [f32],
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    scores: Vec<f32>,
}

pub struct HttpClassifier {
    endpoint: String,
    sample_rate: u32,
    frame_len: usize,
    request_timeout: Duration,
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpClassifier {
    /// Connect to the sidecar and verify it is healthy.
    ///
    /// Must be called from within a tokio runtime. `request_timeout` bounds
    /// every `classify` call.
    pub async fn connect(
        endpoint: &str,
        sample_rate: u32,
        frame_len: usize,
        request_timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ClassifierError::Unreachable(e.to_string()))?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let health_url = format!("{}/health", endpoint);

        let response = client
            .get(&health_url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClassifierError::Unreachable(format!("{}: {}", health_url, e)))?;

        if !response.status().is_success() {
            return Err(ClassifierError::Unreachable(format!(
                "{} returned {}",
                health_url,
                response.status()
            )));
        }

        tracing::info!("Classifier ready at {} (timeout {:?})", endpoint, request_timeout);

        Ok(Self {
            endpoint,
            sample_rate,
            frame_len,
            request_timeout,
            client,
            runtime: Handle::current(),
        })
    }

    async fn request(&self, frame: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        let url = format!("{}/classify", self.endpoint);

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&ClassifyRequest {
                sample_rate: self.sample_rate,
                samples: frame,
            })
            .send()
            .await
            .map_err(|e| self.inference_error(e))?;

        if !response.status().is_success() {
            return Err(ClassifierError::Inference(format!(
                "sidecar returned {}",
                response.status()
            )));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| self.inference_error(e))?;

        Ok(body.scores)
    }

    fn inference_error(&self, e: reqwest::Error) -> ClassifierError {
        if e.is_timeout() {
            ClassifierError::Inference(format!("no answer within {:?}", self.request_timeout))
        } else {
            ClassifierError::Inference(format!("request failed: {}", e))
        }
    }
}

impl Classifier for HttpClassifier {
    fn classify(&mut self, frame: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if frame.len() != self.frame_len {
            return Err(ClassifierError::FrameSize {
                expected: self.frame_len,
                actual: frame.len(),
            });
        }
        self.runtime.block_on(self.request(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    /// Answers `/health` at once and sits on every other request
    fn stalling_sidecar() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                std::thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    let n = stream.read(&mut buf).unwrap_or(0);
                    if buf[..n].starts_with(b"GET /health") {
                        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
                    } else {
                        std::thread::sleep(Duration::from_secs(30));
                    }
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_slow_sidecar_fails_within_timeout() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let endpoint = stalling_sidecar();
        let timeout = Duration::from_millis(200);

        let mut classifier = runtime
            .block_on(HttpClassifier::connect(&endpoint, 16_000, 4, timeout))
            .unwrap();

        let started = Instant::now();
        let result = classifier.classify(&[0.0; 4]);
        let elapsed = started.elapsed();

        match result {
            Err(ClassifierError::Inference(msg)) => assert!(msg.contains("no answer"), "{}", msg),
            other => panic!("expected inference failure, got {:?}", other.map(|s| s.len())),
        }
        assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    }

    #[test]
    fn test_wrong_frame_size_is_rejected_before_request() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let endpoint = stalling_sidecar();
        let mut classifier = runtime
            .block_on(HttpClassifier::connect(&endpoint, 16_000, 4, Duration::from_secs(1)))
            .unwrap();

        assert!(matches!(
            classifier.classify(&[0.0; 3]),
            Err(ClassifierError::FrameSize { expected: 4, actual: 3 })
        ));
    }
}

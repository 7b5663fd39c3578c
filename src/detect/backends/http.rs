//! HTTP classifier backend.
//!
//! Talks to an external detection server: the frame is JPEG-encoded and posted
//! as `multipart/form-data` to `{url}/detect` together with the confidence
//! threshold and the `box` output format. The server answers with a list of
//! `[class_name, [x1, y1, x2, y2], confidence]` tuples. Some servers print the
//! list as a Python literal instead, with single-quoted strings and tuples;
//! those are rewritten to JSON before parsing.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::detect::backend::DetectorBackend;
use crate::detect::error::DetectError;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

const BOUNDARY: &str = "----assembly-guide-frame-boundary";
const USER_AGENT: &str = "assembly-guide/0.3";

/// Transport tuning for HTTP backends.
#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Extra attempts after the first failed one.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_backoff: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Backend served by an external HTTP detection server.
///
/// Starting and stopping the server process is outside this crate, so
/// `start`/`stop` only log.
pub struct HttpBackend {
    name: String,
    endpoint: String,
    agent: ureq::Agent,
    settings: HttpSettings,
}

impl HttpBackend {
    pub fn new(name: &str, base_url: &str, settings: HttpSettings) -> Result<Self> {
        let parsed =
            Url::parse(base_url).with_context(|| format!("invalid url for backend {}", name))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "backend {} url must be http or https, got {}",
                name,
                parsed.scheme()
            ));
        }
        let endpoint = format!("{}/detect", base_url.trim_end_matches('/'));
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build();
        Ok(Self {
            name: name.to_string(),
            endpoint,
            agent,
            settings,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn unreachable(&self, reason: impl Into<String>) -> DetectError {
        DetectError::BackendUnreachable {
            backend: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn post_once(&self, body: &[u8]) -> Result<String, DetectError> {
        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", &content_type)
            .send_bytes(body)
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => self.unreachable(format!("http status {}", code)),
                other => self.unreachable(other.to_string()),
            })?;
        response
            .into_string()
            .map_err(|err| self.unreachable(format!("read response: {}", err)))
    }
}

impl DetectorBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), DetectError> {
        log::debug!("backend {} started at {}", self.name, self.endpoint);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DetectError> {
        log::debug!("backend {} stopped", self.name);
        Ok(())
    }

    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<RawDetection>, DetectError> {
        let jpeg = frame
            .encode_jpeg()
            .map_err(|err| DetectError::FrameEncoding {
                backend: self.name.clone(),
                reason: err.to_string(),
            })?;
        let body = multipart_body(confidence, &jpeg);

        let mut delay = self.settings.retry_backoff;
        let mut attempt = 0;
        let text = loop {
            match self.post_once(&body) {
                Ok(text) => break text,
                Err(err) if attempt < self.settings.retries => {
                    attempt += 1;
                    log::warn!(
                        "backend {} request failed ({}); retry {}/{} in {:?}",
                        self.name,
                        err,
                        attempt,
                        self.settings.retries,
                        delay
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        };

        parse_detections(&text).map_err(|err| DetectError::MalformedResponse {
            backend: self.name.clone(),
            reason: err.to_string(),
        })
    }
}

fn multipart_body(confidence: f32, jpeg: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(jpeg.len() + 512);
    for (field, value) in [("confidence", confidence.to_string()), ("format", "box".to_string())] {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, field, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"media\"; filename=\"frame.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
            BOUNDARY
        )
        .as_bytes(),
    );
    body.extend_from_slice(jpeg);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Parse a detection server response.
pub fn parse_detections(text: &str) -> Result<Vec<RawDetection>> {
    let text = text.trim();
    match serde_json::from_str(text) {
        Ok(detections) => Ok(detections),
        Err(strict_err) => {
            let json = python_literal_to_json(text)
                .with_context(|| format!("unparseable detection list: {}", strict_err))?;
            serde_json::from_str(&json)
                .map_err(|_| anyhow!("unparseable detection list: {}", strict_err))
        }
    }
}

/// Rewrite a Python literal (quoted with `'` or `"`, tuples in parentheses)
/// as JSON. Quote characters inside strings are kept as text.
fn python_literal_to_json(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '(' => out.push('['),
            ')' => out.push(']'),
            '\'' | '"' => {
                out.push('"');
                loop {
                    match chars.next().ok_or_else(|| anyhow!("unterminated string"))? {
                        quote if quote == c => break,
                        '\\' => match chars.next().ok_or_else(|| anyhow!("unterminated escape"))? {
                            '\'' => out.push('\''),
                            'x' => {
                                let hex: String = chars.by_ref().take(2).collect();
                                if hex.len() != 2 || !hex.chars().all(|h| h.is_ascii_hexdigit()) {
                                    return Err(anyhow!("bad \\x escape"));
                                }
                                out.push_str("\\u00");
                                out.push_str(&hex);
                            }
                            other => {
                                out.push('\\');
                                out.push(other);
                            }
                        },
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

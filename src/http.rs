//! Blocking HTTP plumbing shared by the remote clients.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::StatusCode;

/// Sends the request built by `build`, retrying rate limits, server errors and
/// transport failures up to `max_retries` attempts in total.
///
/// The final response is returned even when its status is not a success, so
/// callers can give meaning to statuses such as 404.
pub fn send_with_retry<F>(label: &str, max_retries: usize, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let max_retries = max_retries.max(1);
    let mut attempt = 0usize;
    loop {
        match build().send() {
            Ok(resp) => {
                let status = resp.status();
                if !status.is_success() && should_retry(status) && attempt + 1 < max_retries {
                    attempt += 1;
                    tracing::debug!(%status, attempt, "{label} will be retried");
                    thread::sleep(retry_backoff(attempt));
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if is_retryable_error(&err) && attempt + 1 < max_retries {
                    attempt += 1;
                    tracing::debug!(error = %err, attempt, "{label} will be retried");
                    thread::sleep(retry_backoff(attempt));
                    continue;
                }
                return Err(err).with_context(|| format!("{label} request failed"));
            }
        }
    }
}

/// Turns a non-success response into an error carrying its body.
pub fn ensure_success(label: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    anyhow::bail!("{label} failed ({status}): {body}");
}

pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Loopback HTTP server that answers with scripted responses.

    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use reqwest::StatusCode;

    /// One request as the server saw it.
    #[derive(Debug, Clone, Default)]
    pub struct RecordedRequest {
        pub method: String,
        pub path: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl RecordedRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        }
    }

    pub struct StubServer {
        addr: SocketAddr,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl StubServer {
        /// Serves one connection per `(status, body)` pair, in order.
        pub fn start(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
            let addr = listener.local_addr().expect("stub server address");
            let requests = Arc::new(Mutex::new(Vec::new()));
            let recorded = Arc::clone(&requests);
            thread::spawn(move || {
                for (status, body) in responses {
                    let Ok((stream, _)) = listener.accept() else {
                        return;
                    };
                    let request = read_request(&stream);
                    recorded.lock().unwrap().push(request);
                    write_response(&stream, status, &body);
                }
            });
            Self { addr, requests }
        }

        pub fn url(&self) -> String {
            format!("http://{}", self.addr)
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn read_request(stream: &TcpStream) -> RecordedRequest {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).expect("request line");
        let mut parts = line.split_whitespace();
        let mut request = RecordedRequest {
            method: parts.next().unwrap_or_default().to_string(),
            path: parts.next().unwrap_or_default().to_string(),
            ..RecordedRequest::default()
        };

        let mut content_length = 0usize;
        loop {
            line.clear();
            reader.read_line(&mut line).expect("header line");
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((key, value)) = header.split_once(':') {
                let value = value.trim().to_string();
                if key.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().unwrap_or(0);
                }
                request.headers.push((key.to_string(), value));
            }
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("request body");
        request.body = String::from_utf8_lossy(&body).into_owned();
        request
    }

    fn write_response(mut stream: &TcpStream, status: u16, body: &str) {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown");
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    }
}

//! Shared helpers for integration tests: fixtures and a scripted HTTP endpoint.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread::JoinHandle;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).expect("fixture exists")
}

/// One request as seen by the stub.
#[derive(Debug, Clone)]
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
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP endpoint answering a fixed list of responses, one per connection.
pub struct StubServer {
    pub addr: SocketAddr,
    handle: JoinHandle<Vec<RecordedRequest>>,
}

impl StubServer {
    /// Serve `responses` in order, e.g. `"HTTP/1.1 404 Not Found\r\n\r\n"`.
    /// `Content-Length: 0` and `Connection: close` are added to each.
    pub fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");

        let handle = std::thread::spawn(move || {
            let mut recorded = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                recorded.push(read_request(&mut stream));

                let (status_line, extra_headers) = response
                    .split_once("\r\n")
                    .unwrap_or((response.as_str(), ""));
                let reply = format!(
                    "{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n{}",
                    if extra_headers.is_empty() { "\r\n" } else { extra_headers }
                );
                stream.write_all(reply.as_bytes()).expect("write response");
                stream.flush().expect("flush response");
            }
            recorded
        });

        Self { addr, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn url_with_auth(&self, userinfo: &str, path: &str) -> String {
        format!("http://{userinfo}@{}{}", self.addr, path)
    }

    /// Serve a single bare status line such as `"HTTP/1.1 200 OK"`.
    pub fn status(status_line: &str) -> Self {
        Self::start(vec![status_line.to_string()])
    }

    /// Wait for every scripted response to be served.
    pub fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().expect("stub thread")
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> RecordedRequest {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("header line");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).expect("request body");

    RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8(body).expect("form body is ASCII"),
    }
}

/// Address nobody listens on.
pub fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}/inbox")
}

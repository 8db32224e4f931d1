use crate::service::DetectionService;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, TrySendError};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Connection worker threads. Inference is still serialized by the detector.
    pub workers: usize,
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            workers: 4,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, let in-flight requests finish and join every thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: DetectionService,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: DetectionService) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let workers = self.cfg.workers.max(1);
        let (tx, rx) = crossbeam_channel::bounded::<TcpStream>(workers * 4);
        let mut pool = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = rx.clone();
            let service = self.service.clone();
            let max_body = self.cfg.max_body_bytes;
            let worker = std::thread::Builder::new()
                .name(format!("api-worker-{}", id))
                .spawn(move || run_worker(rx, service, max_body))
                .context("failed to spawn api worker")?;
            pool.push(worker);
        }
        drop(rx);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, tx, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
            // the accept loop owned the only sender, so workers drain and exit
            for worker in pool {
                if worker.join().is_err() {
                    log::error!("api worker panicked");
                }
            }
        });

        log::info!(
            "detection api listening on {} ({} workers, detector {})",
            addr,
            workers,
            self.service.detector().name()
        );
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    tx: crossbeam_channel::Sender<TcpStream>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    log::warn!("detection api: dropping connection: {}", err);
                    continue;
                }
                match tx.try_send(stream) {
                    Ok(()) => {}
                    Err(TrySendError::Full(mut stream)) => {
                        log::warn!("detection api: all workers busy, rejecting connection");
                        let _ = write_error(&mut stream, 503, "server busy");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(anyhow!("all api workers exited"));
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn run_worker(rx: Receiver<TcpStream>, service: DetectionService, max_body: usize) {
    for stream in rx.iter() {
        if let Err(err) = handle_connection(stream, &service, max_body) {
            log::warn!("detection api request failed: {}", err);
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    service: &DetectionService,
    max_body: usize,
) -> Result<()> {
    let request = match read_request(&mut stream, max_body) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            return write_error(&mut stream, 413, "request body too large");
        }
        Err(RequestError::Malformed(msg)) => {
            return write_error(&mut stream, 400, &msg);
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };
    log::debug!("{} {}", request.method, request.path);

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", &[]);
    }

    match (request.path.as_str(), request.method.as_str()) {
        ("/detect", "POST") => handle_detect(&mut stream, service, &request.body),
        ("/health", "GET") => {
            let body = serde_json::json!({
                "status": "ok",
                "detector": service.detector().name(),
            });
            write_json_response(&mut stream, 200, &body)
        }
        ("/detect", _) | ("/health", _) => write_error(&mut stream, 405, "method not allowed"),
        _ => write_error(&mut stream, 404, "not found"),
    }
}

fn handle_detect(stream: &mut TcpStream, service: &DetectionService, body: &[u8]) -> Result<()> {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| service.handle(body)));
    match outcome {
        Ok(Ok(response)) => {
            log::info!("detect: {} people", response.people_count);
            let body = serde_json::to_value(&response)?;
            write_json_response(stream, 200, &body)
        }
        Ok(Err(err)) => {
            let status = err.status_code();
            if status >= 500 {
                log::error!("detect failed: {}", err);
            } else {
                log::warn!("detect rejected: {}", err);
            }
            write_error(stream, status, &err.to_string())
        }
        Err(_) => {
            log::error!("detect handler panicked");
            write_error(stream, 500, "internal error")
        }
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

fn malformed(msg: &str) -> RequestError {
    RequestError::Malformed(msg.to_string())
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(malformed("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(malformed("incomplete request"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| malformed("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| malformed("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| malformed("invalid content-length"))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(RequestError::TooLarge);
    }

    let mut body = data.split_off(header_end + 4);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..])?;
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    write_json_response(stream, status, &serde_json::json!({ "error": message }))
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

//! Minimal HTTP/1.1 JSON API over `InventoryService`.
//!
//! One accept loop on a dedicated thread, one request per connection. Routing is
//! a pure function from request to response so it can be tested without sockets.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::service::{InventoryService, LogOutcome};

const MAX_REQUEST_BYTES: usize = 16 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
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
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("inventory api: server thread panicked");
            }
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: InventoryService,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: InventoryService) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = self.service;
        let join = std::thread::Builder::new()
            .name("inventory-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, service, shutdown_thread) {
                    log::error!("inventory api stopped: {}", err);
                }
            })?;
        log::info!("inventory api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, service: InventoryService, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &service) {
                    log::warn!("inventory api request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, service: &InventoryService) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_response(&mut stream, &HttpResponse::error(403, "forbidden"))?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_response(&mut stream, &HttpResponse::error(400, "bad_request"))?;
            return Err(err);
        }
    };
    let response = route(service, &request);
    log::debug!(
        "inventory api: {} {} -> {}",
        request.method,
        request.path,
        response.status
    );
    write_response(&mut stream, &response)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, error: &str) -> Self {
        Self {
            status,
            body: json!({ "success": false, "error": error }),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        log::error!("inventory api: {:#}", err);
        Self::error(500, "internal_error")
    }
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, raw_path: &str, body: &[u8]) -> Self {
        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (raw_path, HashMap::new()),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query,
            body: body.to_vec(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddItemBody {
    #[serde(alias = "item_name")]
    name: String,
    category: Option<String>,
    qty: Option<u32>,
}

/// Dispatch one request.
pub fn route(service: &InventoryService, request: &HttpRequest) -> HttpResponse {
    let method = request.method.as_str();
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match segments.as_slice() {
        [] => only(method, "GET", || {
            HttpResponse::ok(json!({ "status": "Shelfscan API Online" }))
        }),
        ["health"] => only(method, "GET", || HttpResponse::ok(json!({ "status": "ok" }))),
        ["status"] => only(method, "GET", || to_response(Ok(service.status()))),
        ["objects"] => only(method, "GET", || {
            to_response(Ok(service.list_stable(service.min_seen_count())))
        }),
        ["log", id] => only(method, "POST", || match id.parse::<u64>() {
            Ok(id) => log_track(service, id),
            Err(_) => HttpResponse::error(400, "invalid_track_id"),
        }),
        ["inventory"] => only(method, "GET", || to_response(service.list_inventory())),
        ["inventory", "add"] => only(method, "POST", || add_item(service, &request.body)),
        ["inventory", "clear"] => only(method, "POST", || match service.clear_inventory() {
            Ok(()) => HttpResponse::ok(json!({ "success": true, "message": "Inventory cleared" })),
            Err(err) => HttpResponse::internal(err),
        }),
        ["inventory", "delete"] => only(method, "DELETE", || {
            let Some(name) = request.query.get("item_name") else {
                return HttpResponse::error(400, "missing_item_name");
            };
            match service.delete_by_name(name) {
                Ok(success) => HttpResponse::ok(json!({ "success": success })),
                Err(err) => HttpResponse::internal(err),
            }
        }),
        ["inventory", id] => only(method, "DELETE", || match id.parse::<u64>() {
            Ok(id) => delete_by_id(service, id),
            Err(_) => HttpResponse::error(400, "invalid_item_id"),
        }),
        _ => HttpResponse::error(404, "not_found"),
    }
}

fn only(method: &str, allowed: &str, handler: impl FnOnce() -> HttpResponse) -> HttpResponse {
    if method == allowed {
        handler()
    } else {
        HttpResponse::error(405, "method_not_allowed")
    }
}

fn to_response<T: serde::Serialize>(result: Result<T>) -> HttpResponse {
    match result.and_then(|value| serde_json::to_value(value).map_err(Into::into)) {
        Ok(body) => HttpResponse::ok(body),
        Err(err) => HttpResponse::internal(err),
    }
}

fn log_track(service: &InventoryService, id: u64) -> HttpResponse {
    match service.log_track(id) {
        Ok(LogOutcome::Logged(item)) => HttpResponse::ok(json!({ "success": true, "item": item })),
        Ok(LogOutcome::AlreadyLogged) => HttpResponse::error(409, "already_logged"),
        Ok(LogOutcome::NotFound) => HttpResponse::error(404, "track_not_found"),
        Err(err) => HttpResponse::internal(err),
    }
}

fn add_item(service: &InventoryService, body: &[u8]) -> HttpResponse {
    let parsed: AddItemBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::debug!("inventory api: invalid add body: {}", err);
            return HttpResponse::error(400, "invalid_body");
        }
    };
    if parsed.name.trim().is_empty() || parsed.qty == Some(0) {
        return HttpResponse::error(400, "invalid_item");
    }
    to_response(service.add_item(&parsed.name, parsed.category.as_deref(), parsed.qty))
}

fn delete_by_id(service: &InventoryService, id: u64) -> HttpResponse {
    match service.delete_by_id(id) {
        Ok(true) => HttpResponse::ok(json!({
            "success": true,
            "message": format!("Item with ID {} deleted.", id),
        })),
        Ok(false) => HttpResponse {
            status: 404,
            body: json!({
                "success": false,
                "message": format!("Item with ID {} not found.", id),
            }),
        },
        Err(err) => HttpResponse::internal(err),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed before headers"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = match headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    let body_start = header_end + 4;
    let body_end = match body_start.checked_add(content_length) {
        Some(end) if end <= MAX_REQUEST_BYTES => end,
        _ => return Err(anyhow!("request too large")),
    };
    while data.len() < body_end {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body"));
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = &data[body_start..body_end];
    Ok(HttpRequest::new(method, raw_path, body))
}

fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let body = serde_json::to_vec(&response.body)?;
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::storage::InventoryStore;
    use crate::track::TrackRegistry;

    fn service() -> (Arc<TrackRegistry>, InventoryService) {
        let registry = Arc::new(TrackRegistry::new());
        let store = Arc::new(InventoryStore::in_memory());
        (registry.clone(), InventoryService::new(registry, store).with_min_seen_count(2))
    }

    fn call(service: &InventoryService, method: &str, path: &str, body: &str) -> HttpResponse {
        route(service, &HttpRequest::new(method, path, body.as_bytes()))
    }

    #[test]
    fn log_route_maps_outcomes_to_status_codes() {
        let (registry, service) = service();
        registry.update(7, "Milk", 0.8, BoundingBox::new(0.0, 0.0, 10.0, 10.0));

        let first = call(&service, "POST", "/log/7", "");
        assert_eq!(first.status, 200);
        assert_eq!(first.body["success"], true);
        assert_eq!(first.body["item"]["name"], "Milk");
        assert_eq!(first.body["item"]["qty"], 1);

        let second = call(&service, "POST", "/log/7", "");
        assert_eq!(second.status, 409);
        assert_eq!(second.body["success"], false);

        assert_eq!(call(&service, "POST", "/log/8", "").status, 404);
        assert_eq!(call(&service, "POST", "/log/abc", "").status, 400);
        assert_eq!(call(&service, "GET", "/log/7", "").status, 405);
    }

    #[test]
    fn objects_lists_only_stable_tracks() {
        let (registry, service) = service();
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        registry.update(1, "Banana", 0.9, bbox);
        registry.update(1, "Banana", 0.9, bbox);
        registry.update(2, "Orange", 0.9, bbox);

        let response = call(&service, "GET", "/objects", "");
        assert_eq!(response.status, 200);
        let objects = response.body.as_array().expect("array");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["id"], 1);
        assert_eq!(objects[0]["box"], json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(objects[0]["logged"], false);
    }

    #[test]
    fn inventory_routes_add_delete_and_clear() {
        let (_, service) = service();

        let added = call(
            &service,
            "POST",
            "/inventory/add",
            r#"{"name":"Peanut Butter","category":"pantry","qty":2}"#,
        );
        assert_eq!(added.status, 200);
        assert_eq!(added.body["qty"], 2);
        let id = added.body["id"].as_u64().expect("id");

        assert_eq!(call(&service, "POST", "/inventory/add", "{}").status, 400);
        let zero = call(&service, "POST", "/inventory/add", r#"{"name":"x","qty":0}"#);
        assert_eq!(zero.status, 400);

        let deleted = call(&service, "DELETE", "/inventory/delete?item_name=peanut+butter", "");
        assert_eq!(deleted.body["success"], true);
        let deleted = call(&service, "DELETE", "/inventory/delete?item_name=peanut%20butter", "");
        assert_eq!(deleted.body["success"], false);

        assert_eq!(call(&service, "DELETE", &format!("/inventory/{}", id), "").status, 404);

        call(&service, "POST", "/inventory/add", r#"{"name":"Rice"}"#);
        let cleared = call(&service, "POST", "/inventory/clear", "");
        assert_eq!(cleared.status, 200);
        assert_eq!(call(&service, "GET", "/inventory", "").body, json!([]));
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let (_, service) = service();
        assert_eq!(call(&service, "GET", "/video_feed", "").status, 404);
        assert_eq!(call(&service, "GET", "/", "").status, 200);
        assert_eq!(call(&service, "GET", "/health", "").body["status"], "ok");
    }

    #[test]
    fn query_values_are_form_decoded() {
        let request = HttpRequest::new(
            "DELETE",
            "/inventory/delete?item_name=caf%C3%A9+au+lait&&=x",
            b"",
        );
        assert_eq!(request.path, "/inventory/delete");
        assert_eq!(request.query.get("item_name").map(String::as_str), Some("café au lait"));
        assert_eq!(request.query.len(), 1);
    }
}

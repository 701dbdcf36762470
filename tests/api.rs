use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use shelfscan::{
    api::{ApiConfig, ApiServer},
    BoundingBox, InventoryService, InventoryStore, TrackRegistry,
};

fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let body = body.unwrap_or("");
    let raw = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
        method = method,
        path = path,
        len = body.len(),
        body = body
    );
    stream.write_all(raw.as_bytes()).expect("write request");

    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    let (head, payload) = response.split_once("\r\n\r\n").expect("header terminator");
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let json = serde_json::from_str(payload).expect("json body");
    (status, json)
}

#[test]
fn api_serves_the_log_and_inventory_flow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = Arc::new(TrackRegistry::new());
    let store = Arc::new(InventoryStore::open(dir.path().join("inventory_db.json"), false));
    let service = InventoryService::new(registry.clone(), store).with_min_seen_count(3);

    let bbox = BoundingBox::new(100.0, 100.0, 160.0, 160.0);
    for _ in 0..3 {
        registry.update(12, "Banana", 0.9, bbox);
    }
    registry.update(13, "Milk", 0.9, bbox);

    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        service,
    )
    .spawn()
    .expect("spawn api");
    let addr = handle.addr;

    let (status, body) = request(addr, "GET", "/health", None);
    assert_eq!((status, body["status"].as_str()), (200, Some("ok")));

    let (status, objects) = request(addr, "GET", "/objects", None);
    assert_eq!(status, 200);
    let objects = objects.as_array().expect("array");
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0]["id"], 12);

    let (status, body) = request(addr, "POST", "/log/12", None);
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["item"]["name"], "Banana");
    assert!(body["item"]["pose"]["z"].is_number());

    let (status, body) = request(addr, "POST", "/log/12", None);
    assert_eq!(status, 409);
    assert_eq!(body["success"], false);

    let (status, _) = request(addr, "POST", "/log/999", None);
    assert_eq!(status, 404);

    let (status, added) = request(
        addr,
        "POST",
        "/inventory/add",
        Some(r#"{"name":"banana","category":"grocery","qty":4}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(added["qty"], 5);

    let (status, inventory) = request(addr, "GET", "/inventory", None);
    assert_eq!(status, 200);
    assert_eq!(inventory.as_array().map(Vec::len), Some(1));

    let (status, status_body) = request(addr, "GET", "/status", None);
    assert_eq!(status, 200);
    assert_eq!(status_body["live_tracks"], 2);
    assert_eq!(status_body["stable_tracks"], 1);

    let (status, body) = request(addr, "DELETE", "/inventory/delete?item_name=BANANA", None);
    assert_eq!((status, body["success"].as_bool()), (200, Some(true)));

    let (status, _) = request(addr, "DELETE", "/inventory/1", None);
    assert_eq!(status, 404);

    let (status, _) = request(addr, "POST", "/inventory/clear", None);
    assert_eq!(status, 200);
    let (_, inventory) = request(addr, "GET", "/inventory", None);
    assert_eq!(inventory, serde_json::json!([]));

    let (status, _) = request(addr, "PUT", "/inventory", None);
    assert_eq!(status, 405);

    handle.stop().expect("stop api");
}

#[test]
fn api_rejects_unparseable_bodies() {
    let registry = Arc::new(TrackRegistry::new());
    let store = Arc::new(InventoryStore::in_memory());
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        InventoryService::new(registry, store),
    )
    .spawn()
    .expect("spawn api");

    let (status, body) = request(handle.addr, "POST", "/inventory/add", Some("not json"));
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    handle.stop().expect("stop api");
}

#[test]
fn oversized_content_length_is_rejected_and_server_keeps_serving() {
    let registry = Arc::new(TrackRegistry::new());
    let store = Arc::new(InventoryStore::in_memory());
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        InventoryService::new(registry, store),
    )
    .spawn()
    .expect("spawn api");

    for length in [u64::MAX.to_string(), (usize::MAX - 2).to_string(), "20000".to_string()] {
        let mut stream = TcpStream::connect(handle.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        let raw = format!(
            "POST /inventory/add HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
            length
        );
        stream.write_all(raw.as_bytes()).expect("write request");
        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read response");
        assert!(
            response.starts_with("HTTP/1.1 400"),
            "unexpected response for length {}: {}",
            length,
            response
        );
    }

    let (status, body) = request(handle.addr, "GET", "/health", None);
    assert_eq!((status, body["status"].as_str()), (200, Some("ok")));

    handle.stop().expect("stop api");
}

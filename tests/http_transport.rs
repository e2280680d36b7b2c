//! Drives the HTTP transport against a minimal in-process generation service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fieldsync_lib::{
    ChangeCallback, Document, GenerationRequest, SyncConfig, SyncFacade, WatchConfig,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Answer,
    Reject,
}

#[derive(Default)]
struct ServiceState {
    queued: Vec<String>,
    bodies: Vec<Value>,
}

struct FakeService {
    endpoint: String,
    state: Arc<Mutex<ServiceState>>,
}

impl FakeService {
    async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServiceState::default()));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handle(socket, mode, Arc::clone(&shared)));
            }
        });

        Self {
            endpoint: format!("http://{addr}/generate"),
            state,
        }
    }

    fn bodies(&self) -> Vec<Value> {
        self.state.lock().unwrap().bodies.clone()
    }
}

async fn handle(socket: TcpStream, mode: Mode, state: Arc<Mutex<ServiceState>>) {
    let mut reader = BufReader::new(socket);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
            return;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }
    let mut socket = reader.into_inner();

    if request_line.starts_with("POST /generate") {
        let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let (status, reply) = match mode {
            Mode::Answer => {
                let mut state = state.lock().unwrap();
                if let Some(id) = json["elementid"].as_str() {
                    state.queued.push(id.to_string());
                }
                state.bodies.push(json);
                ("200 OK", r#"{"ok": true, "queued": true}"#)
            }
            Mode::Reject => ("500 Internal Server Error", r#"{"error": "model offline"}"#),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
            reply.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
        return;
    }

    if request_line.starts_with("GET /stream") {
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.write_all(b"event: status\ndata: connected\n\n").await;
        loop {
            let ready: Vec<String> = std::mem::take(&mut state.lock().unwrap().queued);
            let mut chunk = String::new();
            for id in ready {
                chunk.push_str("event: result\n");
                chunk.push_str(&format!(
                    "data: {}\n\n",
                    serde_json::json!({ "elementid": id, "output": format!("Acme for {id}") })
                ));
            }
            chunk.push_str("event: ping\ndata: ping 0\n\n");
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    let _ = socket
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await;
}

fn config(dir: &TempDir, endpoint: &str) -> SyncConfig {
    SyncConfig {
        generate_endpoint: Some(endpoint.to_string()),
        data_path: dir.path().join("content.json"),
        request_timeout: Duration::from_secs(5),
        watch: WatchConfig {
            idle_interval: Duration::from_secs(60),
            active_interval: Duration::from_secs(60),
            quiet_period: Duration::from_secs(60),
        },
        ..SyncConfig::default()
    }
}

fn ignore_changes() -> ChangeCallback {
    Arc::new(|_: &Document| {})
}

#[tokio::test]
async fn generation_round_trips_over_http() {
    let service = FakeService::start(Mode::Answer).await;
    let dir = TempDir::new().unwrap();
    let facade = SyncFacade::from_config(&config(&dir, &service.endpoint), ignore_changes()).unwrap();

    let record = facade
        .request_generation(GenerationRequest::new("hero", "title", "title"))
        .await
        .unwrap();
    assert_eq!(record.value, "Acme for hero_custom_title");
    assert!(record.generated);

    let bodies = service.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["field"], "title");
    assert_eq!(bodies[0]["business_description"], "Modern web application");
    assert!(bodies[0]["prompt"].as_str().unwrap().len() > 10);

    let stored = facade.read_document().await.unwrap();
    assert_eq!(stored.get("hero", "title"), Some(&record));
}

#[tokio::test]
async fn non_2xx_submission_stores_fallback() {
    let service = FakeService::start(Mode::Reject).await;
    let dir = TempDir::new().unwrap();
    let facade = SyncFacade::from_config(&config(&dir, &service.endpoint), ignore_changes()).unwrap();

    let record = facade
        .request_generation(GenerationRequest::new("hero", "title", "title"))
        .await
        .unwrap();
    assert_eq!(record.value, "Your Amazing Title Here");
    assert!(record.generated);
    assert!(!facade.correlator().is_streaming());
}

#[tokio::test]
async fn unreachable_service_stores_fallback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = TempDir::new().unwrap();
    let endpoint = format!("http://{addr}/generate");
    let facade = SyncFacade::from_config(&config(&dir, &endpoint), ignore_changes()).unwrap();

    let record = facade
        .request_generation(GenerationRequest::new("hero", "navbarButtonText", "text"))
        .await
        .unwrap();
    assert_eq!(record.value, "Login");
}

#[tokio::test]
async fn concurrent_fields_share_one_stream() {
    let service = FakeService::start(Mode::Answer).await;
    let dir = TempDir::new().unwrap();
    let facade = SyncFacade::from_config(&config(&dir, &service.endpoint), ignore_changes()).unwrap();

    let results = facade
        .request_generations(vec![
            GenerationRequest::new("hero", "title", "title"),
            GenerationRequest::new("hero", "description", "description"),
            GenerationRequest::new("navbar", "navbarBrand", "navbarBrand"),
        ])
        .await;

    let values: Vec<String> = results.into_iter().map(|r| r.unwrap().value).collect();
    assert_eq!(
        values,
        vec![
            "Acme for hero_custom_title",
            "Acme for hero_custom_description",
            "Acme for navbar_custom_navbarBrand",
        ]
    );
    assert_eq!(facade.read_document().await.unwrap().record_count(), 3);
}

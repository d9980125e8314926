use anyhow::Result;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use caption_relay::{
    CaptureResult, HealthMonitor, HealthProbe, HttpHealthProbe, HttpTransport,
    HttpTransportConfig, ManualClock, RetryPolicy, RetryingTransport, Transport,
    WorkerState,
};
use caption_relay::{EncodeOptions, Frame};

struct Recorded {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serves one scripted reply per connection, then exits.
fn stub_server(replies: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
    let base = format!("http://{}", listener.local_addr().expect("local addr"));
    let handle = std::thread::spawn(move || {
        let mut recorded = Vec::new();
        for (status, body) in replies {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            let mut headers = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("header line");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((key, value)) = line.split_once(':') {
                    headers.push((key.trim().to_string(), value.trim().to_string()));
                }
            }
            let length = headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.parse::<usize>().ok())
                .unwrap_or(0);
            let mut request_body = vec![0u8; length];
            reader.read_exact(&mut request_body).expect("request body");

            let mut stream = stream;
            let response = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).expect("write response");
            stream.flush().expect("flush response");

            recorded.push(Recorded {
                request_line: request_line.trim_end().to_string(),
                headers,
                body: request_body,
            });
        }
        recorded
    });
    (base, handle)
}

fn frame() -> Frame {
    let pixels = vec![96u8; 64 * 48 * 3];
    Frame::encode(pixels, 64, 48, EncodeOptions::default(), Instant::now()).expect("encode frame")
}

fn transport(base: &str, prompt: Option<&str>) -> HttpTransport {
    HttpTransport::new(HttpTransportConfig {
        caption_url: format!("{}/caption", base),
        prompt: prompt.map(str::to_string),
        timeout: Duration::from_secs(5),
        ..HttpTransportConfig::default()
    })
    .expect("build transport")
}

#[test]
fn uploads_multipart_jpeg_and_parses_caption() -> Result<()> {
    let (base, server) = stub_server(vec![(
        200,
        r#"{"success": true, "caption": "a grey square", "processing_time": 0.25}"#,
    )]);
    let frame = frame();

    let result = transport(&base, Some("describe")).submit(&frame)?;
    assert_eq!(
        result,
        CaptureResult::Success {
            caption: "a grey square".to_string(),
            processing_time_ms: Some(250),
        }
    );

    let requests = server.join().expect("server thread");
    let request = &requests[0];
    assert!(request.request_line.starts_with("POST /caption?prompt=describe"));
    let content_type = request.header("content-type").expect("content type");
    assert!(content_type.starts_with("multipart/form-data; boundary="));

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains(r#"name="file"; filename="frame.jpg""#));
    assert!(body.contains("Content-Type: image/jpeg"));
    assert!(request
        .body
        .windows(frame.byte_len())
        .any(|window| window == frame.jpeg()));
    Ok(())
}

#[test]
fn maps_service_statuses() -> Result<()> {
    let (base, server) = stub_server(vec![
        (503, r#"{"detail": "Model not ready"}"#),
        (429, r#"{"detail": "quota"}"#),
        (500, r#"{"detail": "Error processing image: boom"}"#),
    ]);
    let frame = frame();
    let mut transport = transport(&base, None);

    assert_eq!(
        transport.submit(&frame)?,
        CaptureResult::Deferred {
            reason: "Model not ready".to_string()
        }
    );
    assert_eq!(transport.submit(&frame)?, CaptureResult::BudgetExceeded);
    let err = transport.submit(&frame).unwrap_err();
    assert!(err.to_string().contains("HTTP 500"));

    let requests = server.join().expect("server thread");
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].request_line, "POST /caption HTTP/1.1");
    Ok(())
}

#[test]
fn retrying_wrapper_recovers_from_server_errors() {
    let (base, server) = stub_server(vec![
        (502, "bad gateway"),
        (500, r#"{"detail": "worker crashed"}"#),
        (200, r#"{"caption": "third time lucky", "status": "success"}"#),
    ]);
    let clock = Arc::new(ManualClock::new());
    let mut wrapper = RetryingTransport::new(
        Box::new(transport(&base, None)),
        RetryPolicy::new(3, Duration::from_millis(1_000)),
        clock.clone(),
    );

    let report = wrapper.submit(&frame());

    assert_eq!(report.attempts, 3);
    assert_eq!(report.retries.len(), 2);
    assert!(report.retries[1].error.contains("worker crashed"));
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
    );
    assert!(report.result.is_success());
    assert_eq!(server.join().expect("server thread").len(), 3);
}

#[test]
fn unreachable_endpoint_is_an_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let mut transport = transport(&format!("http://127.0.0.1:{}", port), None);
    assert!(transport.submit(&frame()).is_err());
}

#[test]
fn health_probe_reads_worker_status() -> Result<()> {
    let (base, server) = stub_server(vec![
        (
            200,
            r#"{"status": "healthy", "model_loaded": true, "device": "cuda", "model_name": "Salesforce/blip-image-captioning-base", "gpu_memory_gb": 1.5}"#,
        ),
        (200, r#"{"status": "loading", "model_loaded": false}"#),
    ]);
    let probe = HttpHealthProbe::new(&format!("{}/health", base), Duration::from_secs(5))?;
    let mut monitor = HealthMonitor::new(Box::new(probe), Duration::from_secs(30));

    let snapshot = monitor.poll_now();
    assert_eq!(monitor.snapshot(), snapshot);
    assert!(snapshot.available);
    assert_eq!(snapshot.worker_state, WorkerState::Running);
    assert_eq!(snapshot.device.as_deref(), Some("cuda"));
    assert_eq!(snapshot.gpu_memory_gb, Some(1.5));

    assert_eq!(monitor.poll_now().worker_state, WorkerState::Starting);
    assert_eq!(monitor.polls(), 2);

    let requests = server.join().expect("server thread");
    assert_eq!(requests[0].request_line, "GET /health HTTP/1.1");
    Ok(())
}

#[test]
fn health_probe_rejects_non_http_urls() {
    assert!(HttpHealthProbe::new("ftp://127.0.0.1/health", Duration::from_secs(1)).is_err());
    let probe: Result<Box<dyn HealthProbe>> =
        HttpHealthProbe::new("http://127.0.0.1:1/health", Duration::from_millis(200))
            .map(|probe| Box::new(probe) as Box<dyn HealthProbe>);
    assert!(probe.is_ok());
}

use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;

use image::{Rgb, RgbImage};
use people_counter::api::{ApiConfig, ApiHandle, ApiServer};
use people_counter::codec;
use people_counter::detect::{BoundingBox, StubBackend};
use people_counter::{CountError, Detection, DetectionService, DetectorBackend, Frame, SharedDetector};

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn send(api: &TestApi, request: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.write_all(request.as_bytes())?;
    read_response(&mut stream)
}

fn post_detect(api: &TestApi, body: &str) -> Result<(String, String)> {
    let request = format!(
        "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    send(api, &request)
}

fn image_body(width: u32, height: u32) -> String {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 180, 20]));
    let jpeg = codec::encode_jpeg(&Frame::from_rgb_image(image), 90).expect("encode jpeg");
    serde_json::json!({ "image": codec::encode_base64(&jpeg) }).to_string()
}

/// Pixels that vary per position so the JPEG stays large.
fn noisy_image_body(width: u32, height: u32) -> String {
    let image = RgbImage::from_fn(width, height, |x, y| {
        let v = x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y);
        Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    });
    let jpeg = codec::encode_jpeg(&Frame::from_rgb_image(image), 95).expect("encode jpeg");
    serde_json::json!({ "image": codec::encode_base64(&jpeg) }).to_string()
}

/// Panics on its first inference, then reports one person per call.
struct CrashesOnce {
    crashed: bool,
}

impl DetectorBackend for CrashesOnce {
    fn name(&self) -> &'static str {
        "crashes-once"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, CountError> {
        if !self.crashed {
            self.crashed = true;
            panic!("accelerator fault");
        }
        let w = frame.width() as f32;
        let h = frame.height() as f32;
        Ok(vec![Detection::new(
            0,
            0.9,
            BoundingBox::new(w / 2.0, h / 2.0, w / 4.0, h / 4.0),
        )])
    }
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new<B: DetectorBackend + 'static>(backend: B) -> Result<Self> {
        Self::with_config(
            backend,
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
                workers: 2,
                ..ApiConfig::default()
            },
        )
    }

    fn with_config<B: DetectorBackend + 'static>(backend: B, api_config: ApiConfig) -> Result<Self> {
        let detector = SharedDetector::initialize(backend)?;
        let api_handle = ApiServer::new(api_config, DetectionService::new(detector)).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_endpoint_reports_ok() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;
    let (headers, body) = send(&api, "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("200 OK"));
    assert!(body.contains(r#""status":"ok""#));
    Ok(())
}

#[test]
fn empty_scene_returns_zero_and_a_jpeg_of_the_same_size() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;
    let (headers, body) = post_detect(&api, &image_body(40, 30))?;
    assert!(headers.contains("200 OK"));

    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["people_count"], 0);
    let encoded = value["processed_image"].as_str().expect("processed_image string");
    let jpeg = codec::decode_base64(encoded)?;
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let frame = codec::decode_image(&jpeg)?;
    assert_eq!((frame.width(), frame.height()), (40, 30));
    Ok(())
}

#[test]
fn people_in_frame_are_counted() -> Result<()> {
    let api = TestApi::new(StubBackend::with_people(3))?;
    let (headers, body) = post_detect(&api, &image_body(90, 60))?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["people_count"], 3);
    Ok(())
}

#[test]
fn missing_image_is_400_with_error_message() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;
    let (headers, body) = post_detect(&api, r#"{"picture": "abc"}"#)?;
    assert!(headers.contains("400 Bad Request"));
    let value: Value = serde_json::from_str(&body)?;
    let error = value["error"].as_str().unwrap_or_default();
    assert!(!error.is_empty());
    assert_eq!(error, "No image data provided");
    Ok(())
}

#[test]
fn undecodable_image_is_400() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;
    let (headers, body) = post_detect(&api, r#"{"image": "bm90IGFuIGltYWdl"}"#)?;
    assert!(headers.contains("400 Bad Request"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["error"], "Failed to decode image");
    Ok(())
}

#[test]
fn inference_failure_is_500() -> Result<()> {
    let api = TestApi::new(StubBackend::failing("accelerator lost"))?;
    let (headers, body) = post_detect(&api, &image_body(8, 8))?;
    assert!(headers.contains("500 Internal Server Error"));
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["error"].as_str().unwrap_or_default().contains("accelerator lost"));
    Ok(())
}

#[test]
fn unknown_path_is_404_and_wrong_method_is_405() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;
    let (headers, _) = send(&api, "GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = send(&api, "GET /detect HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn every_response_carries_cors_headers() -> Result<()> {
    let api = TestApi::new(StubBackend::new())?;
    let (headers, body) = send(
        &api,
        "OPTIONS /detect HTTP/1.1\r\nHost: localhost\r\nOrigin: http://example.test\r\n\r\n",
    )?;
    assert!(headers.contains("204 No Content"));
    assert!(body.is_empty());
    assert!(headers.contains("Access-Control-Allow-Origin: *"));

    let (headers, _) = post_detect(&api, "{}")?;
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    Ok(())
}

#[test]
fn oversized_body_is_413() -> Result<()> {
    let api = TestApi::with_config(
        StubBackend::new(),
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            workers: 1,
            max_body_bytes: 64,
        },
    )?;
    let (headers, _) = send(
        &api,
        "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4096\r\n\r\n",
    )?;
    assert!(headers.contains("413 Payload Too Large"));
    Ok(())
}

#[test]
fn concurrent_requests_share_one_detector() -> Result<()> {
    let backend = StubBackend::with_people(1);
    let calls = backend.call_counter();
    let api = TestApi::new(backend)?;
    let addr = api.handle().addr;
    let body = image_body(16, 16);

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let body = body.clone();
            std::thread::spawn(move || -> Result<String> {
                let mut stream = TcpStream::connect(addr)?;
                let request = format!(
                    "POST /detect HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(request.as_bytes())?;
                Ok(read_response(&mut stream)?.0)
            })
        })
        .collect();
    for thread in threads {
        let headers = thread.join().expect("client thread")?;
        assert!(headers.contains("200 OK"));
    }
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    Ok(())
}

#[test]
fn backend_panic_is_500_and_server_keeps_serving() -> Result<()> {
    let api = TestApi::new(CrashesOnce { crashed: false })?;

    let (headers, body) = post_detect(&api, &image_body(16, 16))?;
    assert!(headers.contains("500 Internal Server Error"));
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["error"].as_str().unwrap_or_default().contains("accelerator fault"));

    for _ in 0..2 {
        let (headers, body) = post_detect(&api, &image_body(16, 16))?;
        assert!(headers.contains("200 OK"));
        let value: Value = serde_json::from_str(&body)?;
        assert_eq!(value["people_count"], 1);
    }
    Ok(())
}

#[test]
fn multi_kilobyte_body_is_read_in_full() -> Result<()> {
    let api = TestApi::new(StubBackend::with_people(2))?;
    let body = noisy_image_body(256, 192);
    assert!(body.len() > 4 * 4096, "body is only {} bytes", body.len());

    let (headers, response) = post_detect(&api, &body)?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&response)?;
    assert_eq!(value["people_count"], 2);
    let encoded = value["processed_image"].as_str().expect("processed_image string");
    let frame = codec::decode_image(&codec::decode_base64(encoded)?)?;
    assert_eq!((frame.width(), frame.height()), (256, 192));
    Ok(())
}

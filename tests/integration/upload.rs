use rocket::http::{ContentType, Header, Status};

use crate::common::{test_client, token_for};

const BOUNDARY: &str = "roomcast-test-boundary";

fn multipart_body(filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_content_type() -> ContentType {
    ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY))
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

#[test]
fn upload_text_file_happy_path() {
    let client = test_client();
    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .header(bearer(&token_for(42, "alice")))
        .body(multipart_body("note.txt", "text/plain", b"hello"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["file_name"], "note.txt");
    assert_eq!(body["file_size"], 5);
    assert_eq!(body["mime_type"], "text/plain");
    assert_eq!(body["message_type"], "file");

    let url = body["file_url"].as_str().unwrap();
    assert!(url.starts_with("/files/"), "{url}");
    assert!(url.ends_with("-note.txt"), "{url}");
}

#[test]
fn image_mime_yields_image_message_type() {
    let client = test_client();
    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .header(bearer(&token_for(42, "alice")))
        .body(multipart_body("cat.png", "image/png", b"\x89PNG fake"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message_type"], "image");
    assert_eq!(body["mime_type"], "image/png");
}

#[test]
fn upload_requires_a_token() {
    let client = test_client();
    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .body(multipart_body("note.txt", "text/plain", b"hello"))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn upload_rejects_a_bad_token() {
    let client = test_client();
    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .header(bearer("not-a-real-token"))
        .body(multipart_body("note.txt", "text/plain", b"hello"))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "Invalid token");
}

#[test]
fn upload_rejects_disallowed_mime_types() {
    let client = test_client();
    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .header(bearer(&token_for(42, "alice")))
        .body(multipart_body("evil.exe", "application/x-msdownload", b"MZ"))
        .dispatch();
    assert_eq!(res.status(), Status::UnsupportedMediaType);
}

#[test]
fn upload_rejects_empty_files() {
    let client = test_client();
    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .header(bearer(&token_for(42, "alice")))
        .body(multipart_body("empty.txt", "text/plain", b""))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn uploads_are_rate_limited_per_ip() {
    let client = test_client();
    let token = token_for(42, "alice");

    // the default allowance is 10 per minute
    for _ in 0..10 {
        let res = client
            .post("/upload")
            .header(multipart_content_type())
            .header(bearer(&token))
            .body(multipart_body("note.txt", "text/plain", b"hello"))
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
    }

    let res = client
        .post("/upload")
        .header(multipart_content_type())
        .header(bearer(&token))
        .body(multipart_body("note.txt", "text/plain", b"hello"))
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);

    // the 429 carries the standard rate limit headers
    assert_eq!(res.headers().get_one("X-RateLimit-Limit").unwrap(), "10");
    assert_eq!(res.headers().get_one("X-RateLimit-Remaining").unwrap(), "0");
    let reset: u64 = res
        .headers()
        .get_one("X-RateLimit-Reset")
        .unwrap()
        .parse()
        .unwrap();
    assert!(reset >= 1);
    let retry_after: u64 = res
        .headers()
        .get_one("Retry-After")
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["retry_after_secs"].as_u64().unwrap() >= 1);
}

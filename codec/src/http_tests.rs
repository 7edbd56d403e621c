//! End-to-end exercises of the HTTP serializer/deserializer pair.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::body::Body;
use crate::deserialize::{BodyProvider, Deserializer, NoBody};
use crate::header::{
    Authorization, CacheControl, CaseMode, Connection, ContentType, Encoding, TransferEncoding, Verb,
};
use crate::request::Request;
use crate::response::Response;
use crate::serialize::{Element, Serializer};

struct AttachText;

impl BodyProvider<Request> for AttachText {
    fn link_body(&mut self, element: &mut Request) {
        element.body = Some(Body::text(""));
    }
}

impl BodyProvider<Response> for AttachText {
    fn link_body(&mut self, element: &mut Response) {
        element.body = Some(Body::text(""));
    }
}

fn serialize<T: Element>(element: T, cap: usize) -> Vec<u8> {
    let mut serializer = Serializer::new();
    serializer.submit(element).map_err(|_| ()).unwrap();
    let mut wire = Vec::new();
    let mut buffer = vec![0u8; cap];
    loop {
        let written = serializer.serialize(&mut buffer);
        if written == 0 {
            break;
        }
        wire.extend_from_slice(&buffer[..written]);
    }
    assert!(serializer.finished().is_some());
    wire
}

fn parse_one<T: Element>(wire: &[u8], chunk: usize, provider: &mut dyn BodyProvider<T>) -> T {
    let mut deserializer = Deserializer::new();
    let mut completed = Vec::new();
    for piece in wire.chunks(chunk) {
        completed.extend(deserializer.consume(piece, provider));
    }
    assert_eq!(completed.len(), 1, "exactly one message expected");
    completed.remove(0)
}

#[test]
fn request_rendering_is_exact() {
    let mut request = Request::get("/a");
    request.host = Some("h".to_string());
    request.connection = Some(Connection::KeepAlive);
    request.body = Some(Body::text("hello"));

    assert_eq!(
        serialize(request, 4096),
        b"GET /a HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello".to_vec()
    );
}

#[test]
fn uppercase_mode_renders_names_only() {
    let mut request = Request::get("/");
    request.host = Some("Example".to_string());
    request.mode = CaseMode::Uppercase;

    let wire = serialize(request, 4096);
    let text = String::from_utf8(wire).unwrap();
    assert!(text.contains("HOST: Example\r\n"), "{}", text);
}

#[test]
fn request_roundtrip_componentwise() {
    let mut request = Request::post("/api/v1");
    request.query = Some("limit=5".to_string());
    request.fragment = Some("top".to_string());
    request.host = Some("example:8080".to_string());
    request.origin = Some("http://example".to_string());
    request.accept = Some("application/json".to_string());
    request.accept_encoding = Some(Encoding::Gzip);
    request.user_agent = Some("framewire/0.1".to_string());
    request.content_type = Some(ContentType::with_charset("application/json", "utf-8"));
    request.authorization = Some(Authorization::bearer("tok.en"));
    request.range = Some("bytes=0-99".to_string());
    request.body = Some(Body::text(r#"{"probe":true}"#));

    let wire = serialize(request, 4096);
    for chunk in &[1usize, 3, 7, 4096] {
        let parsed: Request = parse_one(&wire, *chunk, &mut AttachText);
        assert_eq!(parsed.verb, Verb::Post);
        assert_eq!(parsed.path, "/api/v1");
        assert_eq!(parsed.query.as_deref(), Some("limit=5"));
        assert_eq!(parsed.fragment.as_deref(), Some("top"));
        assert_eq!(parsed.host.as_deref(), Some("example:8080"));
        assert_eq!(parsed.origin.as_deref(), Some("http://example"));
        assert_eq!(parsed.accept.as_deref(), Some("application/json"));
        assert_eq!(parsed.accept_encoding, Some(Encoding::Gzip));
        assert_eq!(parsed.user_agent.as_deref(), Some("framewire/0.1"));
        assert_eq!(
            parsed.content_type,
            Some(ContentType::with_charset("application/json", "utf-8"))
        );
        assert_eq!(parsed.content_length, Some(14));
        assert_eq!(parsed.authorization, Some(Authorization::bearer("tok.en")));
        assert_eq!(parsed.range.as_deref(), Some("bytes=0-99"));
        assert_eq!(parsed.body.unwrap().as_text().unwrap(), r#"{"probe":true}"#);
    }
}

#[test]
fn response_roundtrip_componentwise() {
    let mut response = Response::status(200);
    response.server = Some("framewire".to_string());
    response.etag = Some("\"v1\"".to_string());
    response.cache_control = Some(CacheControl::NoCache);
    response.body = Some(Body::text("payload"));

    let wire = serialize(response, 4096);
    let parsed: Response = parse_one(&wire, 2, &mut AttachText);
    assert_eq!(parsed.code, 200);
    assert_eq!(parsed.message, "OK");
    assert_eq!(parsed.server.as_deref(), Some("framewire"));
    assert_eq!(parsed.etag.as_deref(), Some("\"v1\""));
    assert_eq!(parsed.cache_control, Some(CacheControl::NoCache));
    assert_eq!(parsed.content_length, Some(7));
    assert_eq!(parsed.body.unwrap().as_text().unwrap(), "payload");
}

#[test]
fn serializer_respects_tiny_buffers() {
    let mut request = Request::get("/resume");
    request.host = Some("example".to_string());
    request.body = Some(Body::text("0123456789"));
    let big = serialize(request, 4096);

    let mut request = Request::get("/resume");
    request.host = Some("example".to_string());
    request.body = Some(Body::text("0123456789"));
    let small = serialize(request, 7);

    assert_eq!(big, small);
}

#[test]
fn chunked_roundtrip() {
    let mut request = Request::put("/upload");
    request.transfer_encoding = Some(TransferEncoding::Chunked);
    request.body = Some(Body::text("chunked transfer body"));

    let wire = serialize(request, 4096);
    let text = String::from_utf8_lossy(&wire);
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    assert!(!text.contains("Content-Length"), "chunked excludes Content-Length");
    assert!(text.ends_with("0\r\n\r\n"));

    let parsed: Request = parse_one(&wire, 5, &mut AttachText);
    assert_eq!(parsed.transfer_encoding, Some(TransferEncoding::Chunked));
    assert_eq!(parsed.body.unwrap().as_text().unwrap(), "chunked transfer body");
}

#[test]
fn chunk_framing_is_transparent() {
    // Hand-built chunks of sizes [3, 5, 1]: the parser must surface the
    // concatenation and swallow the framing.
    let wire = b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n5\r\ndefgh\r\n1\r\ni\r\n0\r\n\r\n";
    let parsed: Request = parse_one(wire, 4, &mut AttachText);
    assert_eq!(parsed.body.unwrap().as_text().unwrap(), "abcdefghi");
}

#[test]
fn gzip_content_encoding_inflates_to_body() {
    let payload = br#"{"event":"statechange","data":[1,2,3,4,5,6,7,8]}"#;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut head = format!(
        "POST /gz HTTP/1.1\r\nContent-Length: {}\r\nContent-Encoding: gzip\r\n\r\n",
        compressed.len()
    )
    .into_bytes();
    head.extend_from_slice(&compressed);

    let parsed: Request = parse_one(&head, 3, &mut AttachText);
    assert_eq!(parsed.body.unwrap().as_text().unwrap().as_bytes(), &payload[..]);
}

#[test]
fn gzip_over_three_chunks() {
    let payload = br#"{"jsonrpc":"2.0","method":"tmp1.statechange","params":{"state":"Activated"}}"#;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    let compressed = encoder.finish().unwrap();

    let third = compressed.len() / 3;
    let mut wire = b"POST /gz HTTP/1.1\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for piece in &[
        &compressed[..third],
        &compressed[third..2 * third],
        &compressed[2 * third..],
    ] {
        wire.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        wire.extend_from_slice(piece);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");

    let parsed: Request = parse_one(&wire, 7, &mut AttachText);
    assert_eq!(parsed.body.unwrap().as_text().unwrap().as_bytes(), &payload[..]);
}

#[test]
fn corrupt_gzip_drops_the_message() {
    let wire =
        b"POST /bad HTTP/1.1\r\nContent-Length: 8\r\nContent-Encoding: gzip\r\n\r\nnot-gzip\
          GET /ok HTTP/1.1\r\nHost: next\r\n\r\n";
    let mut deserializer: Deserializer<Request> = Deserializer::new();
    let completed = deserializer.consume(wire, &mut AttachText);
    assert_eq!(completed.len(), 1, "only the healthy follow-up survives");
    assert_eq!(completed[0].host.as_deref(), Some("next"));
}

#[test]
fn head_response_has_no_body() {
    let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n";
    let mut deserializer: Deserializer<Response> = Deserializer::new();
    deserializer.suppress_next_body();
    let completed = deserializer.consume(wire, &mut AttachText);
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].code, 200);
    assert!(completed[0].body.is_none());
    assert_eq!(completed[1].code, 204);
}

#[test]
fn malformed_start_line_recovers() {
    let wire = b"complete garbage here\r\nGET /fine HTTP/1.1\r\nHost: ok\r\n\r\n";
    let parsed: Request = parse_one(wire, 4096, &mut NoBody);
    assert_eq!(parsed.verb, Verb::Get);
    assert_eq!(parsed.path, "/fine");
    assert_eq!(parsed.host.as_deref(), Some("ok"));
}

#[test]
fn pipelined_messages_in_one_read() {
    let wire = b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n";
    let mut deserializer: Deserializer<Request> = Deserializer::new();
    let completed = deserializer.consume(wire, &mut NoBody);
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].path, "/one");
    assert_eq!(completed[1].path, "/two");
}

#[test]
fn unknown_headers_are_skipped() {
    let wire = b"GET / HTTP/1.1\r\nX-Custom: whatever\r\nHost: kept\r\n\r\n";
    let parsed: Request = parse_one(wire, 4096, &mut NoBody);
    assert_eq!(parsed.host.as_deref(), Some("kept"));
}

#[test]
fn signed_body_signature_survives_the_wire() {
    let mut request = Request::post("/signed");
    request.body = Some(Body::signed(Body::text("attested content"), b"shared-key"));
    let outbound_hmac = {
        let wire = serialize(request, 4096);

        struct AttachSigned;
        impl BodyProvider<Request> for AttachSigned {
            fn link_body(&mut self, element: &mut Request) {
                element.body = Some(Body::signed(Body::text(""), b"shared-key"));
            }
        }
        let parsed: Request = parse_one(&wire, 3, &mut AttachSigned);
        parsed.body.unwrap().content_hmac().unwrap()
    };

    let mut reference = Body::signed(Body::text("attested content"), b"shared-key");
    reference.begin_serialize();
    let mut sink = [0u8; 64];
    while reference.emit(&mut sink) > 0 {}
    assert_eq!(outbound_hmac, reference.content_hmac().unwrap());
}

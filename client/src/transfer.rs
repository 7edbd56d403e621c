//! Single-shot HTTP transfers over a [`WebLink`]: PUT a file up, GET a file
//! down, optionally with an HMAC-signed body and a `Content-HMAC` check.

use std::io;
use std::path::{Path, PathBuf};

use futures::channel::oneshot;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tokio::net::TcpStream;

use framewire_codec::body::Body;
use framewire_codec::deserialize::BodyProvider;
use framewire_codec::header::{ContentHmac, ContentType};
use framewire_codec::{Request, Response, Url};

use crate::weblink::{LinkHandler, WebLink};

#[derive(Debug, Error)]
pub enum TransferError {
    /// No usable host in the URL, or the submit queue rejected the request.
    #[error("Transfer endpoint unavailable")]
    Unavailable,
    /// The peer answered with a non-success status.
    #[error("Transfer failed with status {0}")]
    Failed(u16),
    /// The signed download did not match its `Content-HMAC` header.
    #[error("Body signature mismatch")]
    SignatureMismatch,
    /// The connection went down before the response arrived.
    #[error("Connection closed mid-transfer")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Streams `source` to the URL with a PUT.
pub async fn upload(url: &Url, source: impl Into<PathBuf>) -> Result<Response, TransferError> {
    let mut request = request_for(url, framewire_codec::header::Verb::Put);
    request.content_type = Some(ContentType::new("application/octet-stream"));
    request.body = Some(Body::file(source.into()));
    finish(exchange(url, request, None).await?)
}

/// Streams `source` with a PUT, the body signed and the signature announced
/// in `Content-HMAC`.
pub async fn upload_signed(url: &Url, source: impl Into<PathBuf>, key: &[u8]) -> Result<Response, TransferError> {
    let source = source.into();
    let mut request = request_for(url, framewire_codec::header::Verb::Put);
    request.content_type = Some(ContentType::new("application/octet-stream"));
    request.content_hmac = Some(ContentHmac::sha256(hmac_of(&source, key)?));
    request.body = Some(Body::signed(Body::file(source), key));
    finish(exchange(url, request, None).await?)
}

/// GETs the URL into `destination`.
pub async fn download(url: &Url, destination: impl Into<PathBuf>) -> Result<Response, TransferError> {
    let request = request_for(url, framewire_codec::header::Verb::Get);
    let attach = Body::file(destination.into());
    finish(exchange(url, request, Some(attach)).await?)
}

/// GETs the URL into `destination` and verifies the streamed bytes against
/// the response's `Content-HMAC`.
pub async fn download_signed(
    url: &Url,
    destination: impl Into<PathBuf>,
    key: &[u8],
) -> Result<Response, TransferError> {
    let request = request_for(url, framewire_codec::header::Verb::Get);
    let attach = Body::signed(Body::file(destination.into()), key);
    let response = finish(exchange(url, request, Some(attach)).await?)?;

    let computed = response.body.as_ref().and_then(Body::content_hmac);
    match (&response.content_hmac, computed) {
        (Some(announced), Some(computed)) if *announced == computed => Ok(response),
        _ => Err(TransferError::SignatureMismatch),
    }
}

fn request_for(url: &Url, verb: framewire_codec::header::Verb) -> Request {
    let mut request = Request::new(
        verb,
        match url.path() {
            Some(path) => format!("/{}", path),
            None => "/".to_string(),
        },
    );
    request.query = url.query().map(str::to_string);
    request.host = url.host().map(str::to_string);
    request
}

fn finish(response: Response) -> Result<Response, TransferError> {
    match response.code {
        200 | 201 | 204 => Ok(response),
        failed => Err(TransferError::Failed(failed)),
    }
}

async fn exchange(url: &Url, request: Request, attach: Option<Body>) -> Result<Response, TransferError> {
    let host = url.host().ok_or(TransferError::Unavailable)?.to_string();
    let port = url.port().unwrap_or(80);
    let stream = TcpStream::connect((host.as_str(), port)).await?;

    let (reply_tx, reply_rx) = oneshot::channel();
    let handler = Exchange {
        reply: Some(reply_tx),
        attach,
    };
    let link: WebLink<Request> = WebLink::open(stream, handler, 4);
    if !link.submit(request) {
        return Err(TransferError::Unavailable);
    }

    reply_rx.await.map_err(|_| TransferError::Closed)?
}

/// Owner of the one-request pump: hands the attached body to the response
/// and resolves the waiting caller.
struct Exchange {
    reply: Option<oneshot::Sender<Result<Response, TransferError>>>,
    attach: Option<Body>,
}

impl BodyProvider<Response> for Exchange {
    fn link_body(&mut self, element: &mut Response) {
        element.body = self.attach.take();
    }
}

impl LinkHandler<Request, Response> for Exchange {
    fn received(&mut self, element: Response) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(element));
        }
    }

    fn sent(&mut self, _element: Request) {}

    fn state_change(&mut self, opened: bool) {
        if !opened {
            if let Some(reply) = self.reply.take() {
                let _ = reply.send(Err(TransferError::Closed));
            }
        }
    }
}

fn hmac_of(path: &Path, key: &[u8]) -> Result<String, TransferError> {
    let data = std::fs::read(path)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length; qed");
    mac.update(&data);
    Ok(base64::encode(mac.finalize().into_bytes()))
}

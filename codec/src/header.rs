//! Typed header values shared by [`Request`](crate::Request) and
//! [`Response`](crate::Response).
//!
//! Parsing is tolerant: every value type folds unrecognised input to its
//! `Unknown` variant instead of failing, so one bad header never poisons a
//! message. Rendering is exact and is what the round-trip tests pin down.

use std::fmt;
use std::str::FromStr;

/// Case used for emitted header *names*; values are never touched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CaseMode {
    /// Canonical mixed case (`Content-Length`).
    Raw,
    /// Upper case (`CONTENT-LENGTH`).
    Uppercase,
}

impl Default for CaseMode {
    fn default() -> Self {
        CaseMode::Raw
    }
}

/// HTTP request verb.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
    MSearch,
    Notify,
    Unknown,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Options => "OPTIONS",
            Verb::Trace => "TRACE",
            Verb::Connect => "CONNECT",
            Verb::Patch => "PATCH",
            Verb::MSearch => "M-SEARCH",
            Verb::Notify => "NOTIFY",
            Verb::Unknown => "UNKNOWN",
        }
    }

    fn bit(&self) -> u16 {
        match self {
            Verb::Get => 0x0001,
            Verb::Head => 0x0002,
            Verb::Post => 0x0004,
            Verb::Put => 0x0008,
            Verb::Delete => 0x0010,
            Verb::Options => 0x0020,
            Verb::Trace => 0x0040,
            Verb::Connect => 0x0080,
            Verb::Patch => 0x0100,
            Verb::MSearch => 0x0200,
            Verb::Notify => 0x0400,
            Verb::Unknown => 0x8000,
        }
    }

    const ALL: [Verb; 11] = [
        Verb::Get,
        Verb::Head,
        Verb::Post,
        Verb::Put,
        Verb::Delete,
        Verb::Options,
        Verb::Trace,
        Verb::Connect,
        Verb::Patch,
        Verb::MSearch,
        Verb::Notify,
    ];
}

impl FromStr for Verb {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        Ok(match text.to_ascii_uppercase().as_str() {
            "GET" => Verb::Get,
            "HEAD" => Verb::Head,
            "POST" => Verb::Post,
            "PUT" => Verb::Put,
            "DELETE" => Verb::Delete,
            "OPTIONS" => Verb::Options,
            "TRACE" => Verb::Trace,
            "CONNECT" => Verb::Connect,
            "PATCH" => Verb::Patch,
            "M-SEARCH" => Verb::MSearch,
            "NOTIFY" => Verb::Notify,
            _ => Verb::Unknown,
        })
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verb bitmask carried by the `Allow` response header.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VerbSet(u16);

impl VerbSet {
    pub fn new() -> Self {
        VerbSet(0)
    }

    pub fn with(mut self, verb: Verb) -> Self {
        self.0 |= verb.bit();
        self
    }

    pub fn contains(&self, verb: Verb) -> bool {
        (self.0 & verb.bit()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for VerbSet {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        let mut set = VerbSet::new();
        for token in text.split(',') {
            if let Ok(verb) = token.trim().parse::<Verb>() {
                if verb != Verb::Unknown {
                    set = set.with(verb);
                }
            }
        }
        Ok(set)
    }
}

impl fmt::Display for VerbSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for verb in Verb::ALL.iter() {
            if self.contains(*verb) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(verb.as_str())?;
                first = false;
            }
        }
        Ok(())
    }
}

/// `Connection` header value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Connection {
    Close,
    KeepAlive,
    Upgrade,
    Unknown,
}

impl Connection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Connection::Close => "close",
            Connection::KeepAlive => "keep-alive",
            Connection::Upgrade => "upgrade",
            Connection::Unknown => "unknown",
        }
    }
}

impl FromStr for Connection {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        let folded = text.to_ascii_lowercase();
        Ok(match folded.as_str() {
            "close" => Connection::Close,
            "keep-alive" => Connection::KeepAlive,
            "upgrade" => Connection::Upgrade,
            // `Connection: keep-alive, Upgrade` style lists still upgrade
            _ if folded.split(',').any(|token| token.trim() == "upgrade") => Connection::Upgrade,
            _ => Connection::Unknown,
        })
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Upgrade` header value; only websocket is meaningful here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Upgrade {
    WebSocket,
    Unknown,
}

impl Upgrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upgrade::WebSocket => "websocket",
            Upgrade::Unknown => "unknown",
        }
    }
}

impl FromStr for Upgrade {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        Ok(match text.to_ascii_lowercase().as_str() {
            "websocket" => Upgrade::WebSocket,
            _ => Upgrade::Unknown,
        })
    }
}

impl fmt::Display for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content/Accept encoding; gzip is the only compression in play.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Encoding {
    Identity,
    Gzip,
    Unknown,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Unknown => "unknown",
        }
    }
}

impl FromStr for Encoding {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        let folded = text.to_ascii_lowercase();
        Ok(match folded.as_str() {
            "identity" => Encoding::Identity,
            "gzip" => Encoding::Gzip,
            // Accept-Encoding lists: pick gzip when offered
            _ if folded.split(',').any(|token| token.trim() == "gzip") => Encoding::Gzip,
            _ => Encoding::Unknown,
        })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Transfer-Encoding` header value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferEncoding {
    Chunked,
    Unknown,
}

impl TransferEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEncoding::Chunked => "chunked",
            TransferEncoding::Unknown => "unknown",
        }
    }
}

impl FromStr for TransferEncoding {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        Ok(match text.to_ascii_lowercase().as_str() {
            "chunked" => TransferEncoding::Chunked,
            _ => TransferEncoding::Unknown,
        })
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Content-Type` with its optional charset parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContentType {
    pub mime: String,
    pub charset: Option<String>,
}

impl ContentType {
    pub fn new(mime: impl Into<String>) -> Self {
        ContentType {
            mime: mime.into(),
            charset: None,
        }
    }

    pub fn with_charset(mime: impl Into<String>, charset: impl Into<String>) -> Self {
        ContentType {
            mime: mime.into(),
            charset: Some(charset.into()),
        }
    }
}

impl FromStr for ContentType {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        match text.find(';') {
            None => Ok(ContentType::new(text.trim())),
            Some(semi) => {
                let mime = text[..semi].trim().to_string();
                let charset = text[semi + 1..]
                    .split(';')
                    .filter_map(|parameter| {
                        let parameter = parameter.trim();
                        let eq = parameter.find('=')?;
                        if parameter[..eq].trim().eq_ignore_ascii_case("charset") {
                            Some(parameter[eq + 1..].trim().to_string())
                        } else {
                            None
                        }
                    })
                    .next();
                Ok(ContentType { mime, charset })
            }
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime)?;
        if let Some(charset) = &self.charset {
            write!(f, "; charset={}", charset)?;
        }
        Ok(())
    }
}

/// `Authorization` header: scheme plus opaque token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Authorization {
    pub scheme: AuthScheme,
    pub token: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthScheme {
    Bearer,
    Basic,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Bearer => "Bearer",
            AuthScheme::Basic => "Basic",
        }
    }
}

impl Authorization {
    pub fn bearer(token: impl Into<String>) -> Self {
        Authorization {
            scheme: AuthScheme::Bearer,
            token: token.into(),
        }
    }

    pub fn basic(token: impl Into<String>) -> Self {
        Authorization {
            scheme: AuthScheme::Basic,
            token: token.into(),
        }
    }
}

impl FromStr for Authorization {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        let text = text.trim();
        let space = text.find(' ').ok_or(())?;
        let scheme = match text[..space].to_ascii_lowercase().as_str() {
            "bearer" => AuthScheme::Bearer,
            "basic" => AuthScheme::Basic,
            _ => return Err(()),
        };
        Ok(Authorization {
            scheme,
            token: text[space + 1..].trim_start().to_string(),
        })
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.scheme.as_str(), self.token)
    }
}

/// Hash algorithm named in a `Content-HMAC` header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }
}

/// `Content-HMAC` header: algorithm plus base64 digest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContentHmac {
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

impl ContentHmac {
    pub fn sha256(digest: impl Into<String>) -> Self {
        ContentHmac {
            algorithm: HashAlgorithm::Sha256,
            digest: digest.into(),
        }
    }
}

impl FromStr for ContentHmac {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        let text = text.trim();
        let space = text.find(' ').ok_or(())?;
        let algorithm = match text[..space].to_ascii_uppercase().as_str() {
            "SHA1" => HashAlgorithm::Sha1,
            "SHA256" => HashAlgorithm::Sha256,
            "SHA512" => HashAlgorithm::Sha512,
            _ => return Err(()),
        };
        Ok(ContentHmac {
            algorithm,
            digest: text[space + 1..].trim_start().to_string(),
        })
    }
}

impl fmt::Display for ContentHmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm.as_str(), self.digest)
    }
}

/// `Cache-Control` response directive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CacheControl {
    NoCache,
    NoStore,
    Public,
    Private,
    MaxAge(u32),
    Unknown,
}

impl FromStr for CacheControl {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        let folded = text.trim().to_ascii_lowercase();
        Ok(match folded.as_str() {
            "no-cache" => CacheControl::NoCache,
            "no-store" => CacheControl::NoStore,
            "public" => CacheControl::Public,
            "private" => CacheControl::Private,
            directive => match directive.strip_prefix("max-age=") {
                Some(seconds) => match seconds.trim().parse() {
                    Ok(seconds) => CacheControl::MaxAge(seconds),
                    Err(_) => CacheControl::Unknown,
                },
                None => CacheControl::Unknown,
            },
        })
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheControl::NoCache => f.write_str("no-cache"),
            CacheControl::NoStore => f.write_str("no-store"),
            CacheControl::Public => f.write_str("public"),
            CacheControl::Private => f.write_str("private"),
            CacheControl::MaxAge(seconds) => write!(f, "max-age={}", seconds),
            CacheControl::Unknown => f.write_str("unknown"),
        }
    }
}

/// `Sec-WebSocket-Protocol` carries an ordered list, comma-joined on the
/// wire.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Protocols(pub Vec<String>);

impl Protocols {
    pub fn single(protocol: impl Into<String>) -> Self {
        Protocols(vec![protocol.into()])
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for Protocols {
    type Err = ();

    fn from_str(text: &str) -> Result<Self, ()> {
        Ok(Protocols(
            text.split(',')
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
                .collect(),
        ))
    }
}

impl fmt::Display for Protocols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs() {
        assert_eq!("get".parse::<Verb>().unwrap(), Verb::Get);
        assert_eq!("M-SEARCH".parse::<Verb>().unwrap(), Verb::MSearch);
        assert_eq!("BREW".parse::<Verb>().unwrap(), Verb::Unknown);

        let allow = VerbSet::new().with(Verb::Get).with(Verb::Post);
        assert_eq!(allow.to_string(), "GET, POST");
        assert_eq!("GET, POST".parse::<VerbSet>().unwrap(), allow);
    }

    #[test]
    fn connection_keyword_scan() {
        assert_eq!("Upgrade".parse::<Connection>().unwrap(), Connection::Upgrade);
        assert_eq!("keep-alive, Upgrade".parse::<Connection>().unwrap(), Connection::Upgrade);
        assert_eq!("close".parse::<Connection>().unwrap(), Connection::Close);
        assert_eq!("pipeline".parse::<Connection>().unwrap(), Connection::Unknown);
    }

    #[test]
    fn content_type_charset() {
        let parsed: ContentType = "application/json; charset=utf-8".parse().unwrap();
        assert_eq!(parsed, ContentType::with_charset("application/json", "utf-8"));
        assert_eq!(parsed.to_string(), "application/json; charset=utf-8");
        let bare: ContentType = "text/html".parse().unwrap();
        assert_eq!(bare.charset, None);
    }

    #[test]
    fn authorization_and_hmac() {
        let auth: Authorization = "Bearer abc.def".parse().unwrap();
        assert_eq!(auth.scheme, AuthScheme::Bearer);
        assert_eq!(auth.to_string(), "Bearer abc.def");

        let hmac: ContentHmac = "SHA256 q83vEjRW".parse().unwrap();
        assert_eq!(hmac.algorithm, HashAlgorithm::Sha256);
        assert_eq!(hmac.to_string(), "SHA256 q83vEjRW");
    }

    #[test]
    fn cache_control_directives() {
        assert_eq!("no-cache".parse::<CacheControl>().unwrap(), CacheControl::NoCache);
        assert_eq!("Public".parse::<CacheControl>().unwrap(), CacheControl::Public);
        assert_eq!("max-age=3600".parse::<CacheControl>().unwrap(), CacheControl::MaxAge(3600));
        assert_eq!("s-maxage=60".parse::<CacheControl>().unwrap(), CacheControl::Unknown);
        assert_eq!(CacheControl::MaxAge(3600).to_string(), "max-age=3600");
        assert_eq!(CacheControl::NoStore.to_string(), "no-store");
    }

    #[test]
    fn protocol_lists() {
        let list: Protocols = "json, notification".parse().unwrap();
        assert_eq!(list.first(), Some("json"));
        assert_eq!(list.to_string(), "json, notification");
    }
}

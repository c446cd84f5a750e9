//! Client handshake: request construction and response verification.

use std::{
    fmt,
    io::{Read, Write},
    result::Result as StdResult,
};

use data_encoding::BASE64;
use httparse::Status;
use log::*;
use url::Url;

use super::{
    derive_accept_key,
    machine::{HandshakeMachine, RoundResult, StageResult, TryParse},
    Headers, MAX_HEADERS,
};
use crate::{
    error::{Error, ProtocolError, Result, UrlError},
    protocol::{Connection, ConnectionState, SessionConfig},
};

/// Client request: the URL to upgrade, plus an optional subprotocol that
/// is echoed into `Sec-WebSocket-Protocol` (no negotiation happens).
#[derive(Debug, Clone)]
pub struct Request {
    /// The `ws://` URL to connect to.
    pub url: Url,
    /// Value for the `Sec-WebSocket-Protocol` request header.
    pub subprotocol: Option<String>,
}

impl Request {
    /// The GET target: path plus query.
    fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_owned(),
        }
    }

    /// The `Host:` value.
    fn host(&self) -> Result<String> {
        let host = self.url.host_str().ok_or(Error::Url(UrlError::NoHostName))?;
        if host.is_empty() {
            return Err(Error::Url(UrlError::EmptyHostName));
        }
        Ok(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        })
    }

    /// Format the upgrade request around the given nonce.
    fn format(&self, key: &str) -> Result<Vec<u8>> {
        let mut req = format!(
            "GET {target} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {key}\r\n",
            target = self.target(),
            host = self.host()?,
        );
        if let Some(subprotocol) = &self.subprotocol {
            req.push_str(&format!("Sec-WebSocket-Protocol: {subprotocol}\r\n"));
        }
        req.push_str("\r\n");
        Ok(req.into_bytes())
    }
}

/// Generate a random nonce for the `Sec-WebSocket-Key` header.
pub fn generate_key() -> String {
    // a base64-encoded (see Section 4 of [RFC4648]) value that, when
    // decoded, is 16 bytes in length (RFC 6455)
    let r: [u8; 16] = rand::random();
    BASE64.encode(&r)
}

/// Client handshake in progress.
///
/// Dropping it cancels the connect; nothing of the session survives.
#[derive(Debug)]
pub struct ClientHandshake<Stream> {
    machine: HandshakeMachine<Stream>,
    verify: VerifyData,
    config: Option<SessionConfig>,
}

impl<Stream: Read + Write> ClientHandshake<Stream> {
    /// Initiate a WebSocket handshake over the given stream.
    pub fn start(
        stream: Stream,
        request: Request,
        config: Option<SessionConfig>,
    ) -> Result<Self> {
        let key = generate_key();
        let req = request.format(&key)?;
        let accept_key = derive_accept_key(key.as_bytes());
        debug!("client handshake initiated for {}", request.url);
        Ok(ClientHandshake {
            machine: HandshakeMachine::start_write(stream, req),
            verify: VerifyData { accept_key },
            config,
        })
    }

    /// Drive the handshake to completion, parking on `WouldBlock`.
    pub fn handshake(mut self) -> StdResult<Connection<Stream>, HandshakeError<Stream>> {
        loop {
            match self.machine.single_round::<Response>()? {
                RoundResult::WouldBlock(machine) => {
                    return Err(HandshakeError::Interrupted(MidHandshake(ClientHandshake {
                        machine,
                        ..self
                    })))
                }
                RoundResult::Incomplete(machine) => self.machine = machine,
                RoundResult::StageFinished(StageResult::DoneWriting(stream)) => {
                    self.machine = HandshakeMachine::start_read(stream);
                }
                RoundResult::StageFinished(StageResult::DoneReading { result, stream, tail }) => {
                    self.verify.verify_response(&result)?;
                    debug!("client handshake done");
                    return Ok(Connection::from_partially_read(stream, tail, self.config));
                }
            }
        }
    }
}

/// A handshake that parked on a `WouldBlock`. Call
/// [`handshake`](Self::handshake) again when the transport is ready.
#[derive(Debug)]
pub struct MidHandshake<Stream>(ClientHandshake<Stream>);

impl<Stream: Read + Write> MidHandshake<Stream> {
    /// Resume the handshake.
    pub fn handshake(self) -> StdResult<Connection<Stream>, HandshakeError<Stream>> {
        self.0.handshake()
    }

    /// Lifecycle state of a parked handshake.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::Connecting
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Stream {
        self.0.machine.get_ref()
    }
}

/// Result of a handshake round trip.
pub enum HandshakeError<Stream> {
    /// The handshake failed; the connection stays down.
    Failure(Error),
    /// The handshake would block and was parked.
    Interrupted(MidHandshake<Stream>),
}

impl<Stream> fmt::Debug for HandshakeError<Stream> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandshakeError::Failure(e) => f.debug_tuple("Failure").field(e).finish(),
            HandshakeError::Interrupted(_) => write!(f, "Interrupted(..)"),
        }
    }
}

impl<Stream> fmt::Display for HandshakeError<Stream> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandshakeError::Failure(e) => write!(f, "handshake failed: {e}"),
            HandshakeError::Interrupted(_) => write!(f, "handshake interrupted, try again"),
        }
    }
}

impl<Stream> std::error::Error for HandshakeError<Stream> {}

impl<Stream> From<Error> for HandshakeError<Stream> {
    fn from(err: Error) -> Self {
        HandshakeError::Failure(err)
    }
}

/// What the response is checked against.
#[derive(Debug)]
struct VerifyData {
    /// The accept key this client's nonce demands.
    accept_key: String,
}

impl VerifyData {
    pub fn verify_response(&self, response: &Response) -> Result<()> {
        // 1. If the status code received from the server is not 101, the
        // client handles the response per HTTP [RFC2616] procedures.
        // (RFC 6455)
        if response.code != 101 {
            return Err(Error::Http(response.code));
        }
        // 2. If the response lacks an |Upgrade| header field or the
        // |Upgrade| header field contains a value that is not an ASCII
        // case-insensitive match for the value "websocket", the client
        // MUST _Fail the WebSocket Connection_. (RFC 6455)
        if !response.headers.header_is_ignore_case("Upgrade", "websocket") {
            return Err(Error::Protocol(ProtocolError::MissingUpgradeHeader));
        }
        // 3. If the response lacks a |Connection| header field or the
        // |Connection| header field doesn't contain a token that is an
        // ASCII case-insensitive match for the value "Upgrade", the client
        // MUST _Fail the WebSocket Connection_. (RFC 6455)
        if !response.headers.header_contains_token("Connection", "upgrade") {
            return Err(Error::Protocol(ProtocolError::MissingConnectionHeader));
        }
        // 4. If the response lacks a |Sec-WebSocket-Accept| header field
        // or the |Sec-WebSocket-Accept| contains a value other than the
        // base64-encoded SHA-1 of the concatenation of the
        // |Sec-WebSocket-Key| with "258EAFA5-E914-47DA-95CA-C5AB0DC85B11",
        // the client MUST _Fail the WebSocket Connection_. (RFC 6455)
        if !response.headers.header_is("Sec-WebSocket-Accept", &self.accept_key) {
            return Err(Error::Protocol(ProtocolError::AcceptKeyMismatch));
        }
        Ok(())
    }
}

/// Server response to the upgrade request.
#[derive(Debug)]
pub struct Response {
    code: u16,
    headers: Headers,
}

impl Response {
    /// The HTTP status code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

impl TryParse for Response {
    fn try_parse(data: &[u8]) -> Result<Option<(usize, Self)>> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut storage);
        match parsed.parse(data)? {
            Status::Partial => Ok(None),
            Status::Complete(size) => {
                if parsed.version.expect("Bug: no HTTP version") < 1 {
                    return Err(Error::Protocol(ProtocolError::WrongHttpVersion));
                }
                let response = Response {
                    code: parsed.code.expect("Bug: no HTTP response code"),
                    headers: Headers::from_httparse(parsed.headers)?,
                };
                Ok(Some((size, response)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{generate_key, Request, Response, TryParse, VerifyData};
    use crate::error::{Error, ProtocolError};

    #[test]
    fn random_keys() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1, k2);
        assert_eq!(k1.len(), 24);
        assert_eq!(k2.len(), 24);
        assert!(k1.ends_with("=="));
        assert!(k1[..22].find('=').is_none());
    }

    #[test]
    fn request_formatting() {
        let request = Request { url: "ws://localhost/getCaseCount".parse().unwrap(), subprotocol: None };
        let bytes = request.format("A70tsIbeMZUbJHh5BWFw6Q==").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("GET /getCaseCount HTTP/1.1\r\n"));
        assert!(text.contains("Host: localhost\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: A70tsIbeMZUbJHh5BWFw6Q==\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_formatting_with_port_query_and_subprotocol() {
        let request = Request {
            url: "ws://localhost:9001/runCase?case=1".parse().unwrap(),
            subprotocol: Some("graphql-ws".into()),
        };
        let text = String::from_utf8(request.format("key").unwrap()).unwrap();
        assert!(text.starts_with("GET /runCase?case=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: localhost:9001\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: graphql-ws\r\n"));
    }

    fn parse_full(raw: &[u8]) -> Response {
        let (size, response) = Response::try_parse(raw).unwrap().unwrap();
        assert_eq!(size, raw.len());
        response
    }

    fn accepted_response(accept: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn response_parsing() {
        let response = parse_full(b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n");
        assert_eq!(response.code(), 200);
        assert_eq!(response.headers().find_first("Content-Type"), Some(&b"text/html"[..]));
    }

    #[test]
    fn partial_response_is_incomplete() {
        assert!(Response::try_parse(b"HTTP/1.1 101 Switching Protocols\r\n").unwrap().is_none());
    }

    #[test]
    fn verification_accepts_rfc_example() {
        // Sec-WebSocket-Key from RFC 6455 section 1.2.
        let verify =
            VerifyData { accept_key: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".into() };
        let response = parse_full(&accepted_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        verify.verify_response(&response).unwrap();
    }

    #[test]
    fn verification_rejects_wrong_status() {
        let verify = VerifyData { accept_key: "x".into() };
        let response = parse_full(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        assert!(matches!(verify.verify_response(&response), Err(Error::Http(400))));
    }

    #[test]
    fn verification_rejects_wrong_accept_key() {
        let verify = VerifyData { accept_key: "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=".into() };
        let response = parse_full(&accepted_response("bm90IHRoZSByaWdodCBrZXk="));
        assert!(matches!(
            verify.verify_response(&response),
            Err(Error::Protocol(ProtocolError::AcceptKeyMismatch))
        ));
    }

    #[test]
    fn verification_rejects_missing_upgrade() {
        let verify = VerifyData { accept_key: "k".into() };
        let response = parse_full(
            b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: k\r\n\r\n",
        );
        assert!(matches!(
            verify.verify_response(&response),
            Err(Error::Protocol(ProtocolError::MissingUpgradeHeader))
        ));
    }

    #[test]
    fn verification_accepts_connection_token_list() {
        let verify = VerifyData { accept_key: "k".into() };
        let response = parse_full(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: WebSocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Accept: k\r\n\r\n",
        );
        verify.verify_response(&response).unwrap();
    }
}

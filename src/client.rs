//! Methods to connect to a WebSocket server as a client.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    result::Result as StdResult,
};

use log::*;
use url::Url;

use crate::{
    error::{Error, Result, UrlError},
    handshake::client::{ClientHandshake, HandshakeError, Request},
    protocol::{Connection, SessionConfig},
};

/// Connect to the given WebSocket URL in blocking mode.
///
/// Only `ws://` URLs are accepted; TLS belongs to the transport layer and
/// a `wss://` URL fails with [`UrlError::TlsFeatureNotEnabled`]. The
/// underlying TCP socket gets a read timeout equal to the ping interval so
/// that [`Connection::read`] wakes up often enough to drive keepalive.
///
/// If you bring your own transport (a proxy tunnel, an in-memory pipe, a
/// unix socket), use [`client`] instead.
pub fn connect(url: Url) -> Result<Connection<TcpStream>> {
    connect_with_config(url, None)
}

/// [`connect`] with an explicit session configuration.
pub fn connect_with_config(
    url: Url,
    config: Option<SessionConfig>,
) -> Result<Connection<TcpStream>> {
    check_scheme(&url)?;
    let addrs = url
        .socket_addrs(|| None)
        .map_err(|_| Error::Url(UrlError::UnableToConnect(url.to_string())))?;
    let stream = connect_to_some(&addrs, &url)?;

    let connection = client_with_config(url, stream, config).map_err(|e| match e {
        HandshakeError::Failure(f) => f,
        HandshakeError::Interrupted(_) => panic!("Bug: blocking handshake not blocked"),
    })?;

    let ping_interval = connection.config().ping_interval;
    connection.get_ref().set_read_timeout(Some(ping_interval))?;
    Ok(connection)
}

fn connect_to_some(addrs: &[SocketAddr], url: &Url) -> Result<TcpStream> {
    for addr in addrs {
        debug!("trying to contact {url} at {addr}...");
        if let Ok(stream) = TcpStream::connect(addr) {
            return Ok(stream);
        }
    }
    Err(Error::Url(UrlError::UnableToConnect(url.to_string())))
}

/// Only `ws://` maps to the plain byte transports this crate drives.
fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "ws" => Ok(()),
        "wss" => Err(Error::Url(UrlError::TlsFeatureNotEnabled)),
        _ => Err(Error::Url(UrlError::UnsupportedUrlScheme)),
    }
}

/// Do the client handshake over the given stream.
///
/// Any stream supporting `Read + Write` will do: plain TCP, a tunnel, a
/// test double. Non-blocking streams park the handshake with
/// [`HandshakeError::Interrupted`]; resume it when the stream is ready.
pub fn client<Stream: Read + Write>(
    url: Url,
    stream: Stream,
) -> StdResult<Connection<Stream>, HandshakeError<Stream>> {
    client_with_config(url, stream, None)
}

/// [`client`] with an explicit session configuration.
pub fn client_with_config<Stream: Read + Write>(
    url: Url,
    stream: Stream,
    config: Option<SessionConfig>,
) -> StdResult<Connection<Stream>, HandshakeError<Stream>> {
    let request = Request { url, subprotocol: None };
    ClientHandshake::start(stream, request, config)?.handshake()
}

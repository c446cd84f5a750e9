//! Lightweight client-side WebSockets (RFC 6455) for Rust.
//!
//! The crate splits along the protocol's own seams: a bit-accurate frame
//! codec ([`protocol::frame`]), the opening handshake ([`handshake`]) and
//! a per-connection state machine ([`protocol`]) that reassembles
//! fragments, answers pings, runs keepalive and walks the closing
//! handshake. Everything runs over any `Read + Write` byte stream.
//!
//! ```no_run
//! use grommet::{connect, Message};
//!
//! let mut socket = connect("ws://localhost:3012/socket".parse().unwrap())
//!     .expect("can't connect");
//!
//! socket.send_text("Hello, WebSocket!").unwrap();
//! for message in socket.messages() {
//!     match message {
//!         Ok(Message::Text(text)) => println!("received: {text}"),
//!         Ok(other) => println!("received: {other}"),
//!         Err(e) => panic!("connection failed: {e}"),
//!     }
//! }
//! ```
#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub mod buffer;
pub mod client;
pub mod error;
pub mod handshake;
pub mod protocol;

pub use crate::{
    client::{client, connect, connect_with_config},
    error::{Error, Result},
    protocol::{
        frame::{coding::CloseCode, CloseFrame},
        Connection, ConnectionState, Message, Messages, SessionConfig,
    },
};

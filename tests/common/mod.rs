//! Scripted in-process server for integration tests.
//!
//! The server accepts connections on 127.0.0.1, answers the handshake and
//! hands each accepted socket to the test, which then reads queries and writes
//! replies by hand.

#![allow(dead_code)]

use std::time::Duration;

use reql_client::handshake::{MAGIC_V0_3, PROTOCOL_JSON};
use reql_client::protocol::{build_frame, Header, HEADER_SIZE};
use reql_client::{Connection, ConnectOptions};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const STEP: Duration = Duration::from_secs(5);

pub struct FakeServer {
    port: u16,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl FakeServer {
    /// Server that accepts every handshake.
    pub async fn start() -> Self {
        Self::with_handshake_reply("SUCCESS").await
    }

    /// Server that answers every handshake with `reply`.
    pub async fn with_handshake_reply(reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let key = read_handshake(&mut stream).await;
                let mut bytes = reply.as_bytes().to_vec();
                bytes.push(0);
                stream.write_all(&bytes).await.unwrap();
                if tx.send(ServerConn { stream, key }).is_err() {
                    break;
                }
            }
        });

        Self { port, accepted }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> ConnectOptions {
        Connection::builder().host("127.0.0.1").port(self.port)
    }

    /// Open a client connection and return it with the server side of the socket.
    pub async fn connect(&mut self) -> (Connection, ServerConn) {
        let options = self.options();
        self.connect_with(options).await
    }

    pub async fn connect_with(&mut self, options: ConnectOptions) -> (Connection, ServerConn) {
        let conn = options.connect().await.unwrap();
        let server = self.accept().await;
        (conn, server)
    }

    /// Next socket that completed the handshake.
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(STEP, self.accepted.recv())
            .await
            .expect("no connection accepted")
            .expect("accept loop ended")
    }
}

async fn read_handshake(stream: &mut TcpStream) -> String {
    let magic = stream.read_u32_le().await.unwrap();
    assert_eq!(magic, MAGIC_V0_3);
    let len = stream.read_u32_le().await.unwrap() as usize;
    let mut key = vec![0u8; len];
    stream.read_exact(&mut key).await.unwrap();
    let protocol = stream.read_u32_le().await.unwrap();
    assert_eq!(protocol, PROTOCOL_JSON);
    String::from_utf8(key).unwrap()
}

/// Server side of one accepted socket.
pub struct ServerConn {
    stream: TcpStream,
    pub key: String,
}

impl ServerConn {
    /// Read one query frame: its token and decoded JSON body.
    pub async fn read_query(&mut self) -> (i64, Value) {
        tokio::time::timeout(STEP, self.read_frame())
            .await
            .expect("no query received")
    }

    /// True if no query arrives within `wait`.
    pub async fn is_silent_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.read_frame()).await.is_err()
    }

    async fn read_frame(&mut self) -> (i64, Value) {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await.unwrap();
        let header = Header::decode(&header).unwrap();
        let mut payload = vec![0u8; header.payload_length as usize];
        self.stream.read_exact(&mut payload).await.unwrap();
        (header.token, serde_json::from_slice(&payload).unwrap())
    }

    /// Send `body` as the response to `token`.
    pub async fn reply(&mut self, token: i64, body: Value) {
        let payload = serde_json::to_vec(&body).unwrap();
        self.reply_raw(token, &payload).await;
    }

    pub async fn reply_raw(&mut self, token: i64, payload: &[u8]) {
        let frame = build_frame(&Header::new(token, payload.len() as u32), payload);
        self.stream.write_all(&frame).await.unwrap();
    }
}

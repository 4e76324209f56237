//! Scripted in-process backend for driving a `Connection` over `tokio::io::duplex`.
#![allow(dead_code)]

use std::future::Future;

use actor_postgres::Credential;
use actor_postgres::tokio::Connection;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const IDLE: u8 = b'I';
pub const IN_TRANSACTION: u8 = b'T';
pub const FAILED: u8 = b'E';

/// Server end of a duplex pipe, speaking the backend side of the protocol.
pub struct MockServer {
    stream: DuplexStream,
}

/// A client connection wired to a fresh mock server.
pub fn pair() -> (Connection, MockServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (
        Connection::with_stream(client, None),
        MockServer { stream: server },
    )
}

/// Spawn `script` on the server end and authenticate with the trust method.
///
/// The script must start with [`MockServer::handshake_trust`].
pub async fn connect_with<F, Fut>(script: F) -> (Connection, JoinHandle<()>)
where
    F: FnOnce(MockServer) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (conn, server) = pair();
    let handle = tokio::spawn(script(server));
    conn.authenticate("postgres", Some("postgres"), Credential::Trust)
        .await
        .unwrap();
    (conn, handle)
}

impl MockServer {
    /// Read the StartupMessage and return its parameters.
    pub async fn read_startup(&mut self) -> Vec<(String, String)> {
        let len = self.stream.read_i32().await.unwrap() as usize;
        let mut body = vec![0; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        assert_eq!(&body[..4], &196608_i32.to_be_bytes());

        let mut parts = body[4..].split(|&b| b == 0).map(|part| {
            String::from_utf8(part.to_vec()).unwrap()
        });
        let mut params = Vec::new();
        loop {
            let name = parts.next().unwrap();
            if name.is_empty() {
                break;
            }
            params.push((name, parts.next().unwrap()));
        }
        params
    }

    pub async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let tag = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap() as usize;
        let mut body = vec![0; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    /// Read the next frontend frame, which must carry `tag`, and return its body.
    pub async fn expect(&mut self, tag: u8) -> Vec<u8> {
        let (actual, body) = self.read_frame().await;
        assert_eq!(
            actual as char, tag as char,
            "unexpected frontend message"
        );
        body
    }

    pub async fn send(&mut self, frames: &[Vec<u8>]) {
        self.stream.write_all(&frames.concat()).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Startup followed by AuthenticationOk, session parameters, key data and ReadyForQuery.
    pub async fn handshake_trust(&mut self) {
        self.read_startup().await;
        self.send(&[
            auth_ok(),
            parameter_status("server_version", "16.4"),
            parameter_status("client_encoding", "UTF8"),
            backend_key(4242, 7),
            ready(IDLE),
        ])
        .await;
    }

    /// Simple Query; returns the SQL text.
    pub async fn expect_query(&mut self) -> String {
        cstr(&self.expect(b'Q').await)
    }

    /// Parse + Flush answered with ParseComplete; returns the SQL text.
    pub async fn serve_parse(&mut self) -> String {
        let body = self.expect(b'P').await;
        self.expect(b'H').await;
        self.send(&[parse_complete()]).await;
        let query_start = body.iter().position(|&b| b == 0).unwrap() + 1;
        cstr(&body[query_start..])
    }

    /// Bind + Flush answered with BindComplete; returns the text parameters.
    pub async fn serve_bind(&mut self) -> Vec<Option<String>> {
        let body = self.expect(b'B').await;
        self.expect(b'H').await;
        self.send(&[bind_complete()]).await;
        bind_params(&body)
    }

    /// Describe(portal) + Flush answered with RowDescription, or NoData when `columns` is empty.
    pub async fn serve_describe(&mut self, columns: &[&str]) {
        self.expect(b'D').await;
        self.expect(b'H').await;
        if columns.is_empty() {
            self.send(&[no_data()]).await;
        } else {
            self.send(&[row_description(columns)]).await;
        }
    }

    /// Execute + Flush answered with `rows` and CommandComplete(`tag`).
    pub async fn serve_execute(&mut self, rows: &[&[Option<&str>]], tag: &str) {
        self.expect(b'E').await;
        self.expect(b'H').await;
        let mut frames: Vec<Vec<u8>> = rows.iter().map(|row| data_row(row)).collect();
        frames.push(command_complete(tag));
        self.send(&frames).await;
    }

    /// Close(portal) + Flush, then Sync, ending the implicit transaction.
    pub async fn serve_portal_cleanup(&mut self) {
        let body = self.expect(b'C').await;
        assert_eq!(body[0], b'P');
        self.expect(b'H').await;
        self.send(&[close_complete()]).await;
        self.expect(b'S').await;
        self.send(&[ready(IDLE)]).await;
    }

    /// Close(statement) + Flush answered with CloseComplete.
    pub async fn serve_close_statement(&mut self) {
        let body = self.expect(b'C').await;
        assert_eq!(body[0], b'S');
        self.expect(b'H').await;
        self.send(&[close_complete()]).await;
    }

    /// Sync + Flush from a recovery, answered with ReadyForQuery(`status`).
    pub async fn serve_recover(&mut self, status: u8) {
        self.expect(b'S').await;
        self.expect(b'H').await;
        self.send(&[ready(status)]).await;
    }

    /// Simple Query answered with CommandComplete(`tag`) and ReadyForQuery(`status`).
    pub async fn serve_command(&mut self, sql: &str, tag: &str, status: u8) {
        assert_eq!(self.expect_query().await, sql);
        self.send(&[command_complete(tag), ready(status)]).await;
    }

    pub async fn expect_terminate(&mut self) {
        self.expect(b'X').await;
    }
}

fn cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap();
    String::from_utf8(bytes[..end].to_vec()).unwrap()
}

fn bind_params(body: &[u8]) -> Vec<Option<String>> {
    // portal\0 statement\0 i16 formats... i16 count, (i32 len, bytes)*
    let mut pos = 0;
    for _ in 0..2 {
        pos += body[pos..].iter().position(|&b| b == 0).unwrap() + 1;
    }
    let read_i16 = |pos: usize| i16::from_be_bytes([body[pos], body[pos + 1]]);
    let formats = read_i16(pos) as usize;
    pos += 2 + formats * 2;
    let count = read_i16(pos) as usize;
    pos += 2;

    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let len = i32::from_be_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]);
        pos += 4;
        if len < 0 {
            params.push(None);
        } else {
            let len = len as usize;
            params.push(Some(String::from_utf8(body[pos..pos + len].to_vec()).unwrap()));
            pos += len;
        }
    }
    params
}

pub fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn authentication(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut body = code.to_be_bytes().to_vec();
    body.extend_from_slice(extra);
    frame(b'R', &body)
}

pub fn auth_ok() -> Vec<u8> {
    authentication(0, &[])
}

pub fn ready(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

pub fn parse_complete() -> Vec<u8> {
    frame(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    frame(b'2', &[])
}

pub fn close_complete() -> Vec<u8> {
    frame(b'3', &[])
}

pub fn no_data() -> Vec<u8> {
    frame(b'n', &[])
}

pub fn empty_query() -> Vec<u8> {
    frame(b'I', &[])
}

/// RowDescription with text columns of type `text`.
pub fn row_description(columns: &[&str]) -> Vec<u8> {
    let mut body = (columns.len() as i16).to_be_bytes().to_vec();
    for name in columns {
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        body.extend_from_slice(&0_i16.to_be_bytes()); // column id
        body.extend_from_slice(&25_u32.to_be_bytes()); // text
        body.extend_from_slice(&(-1_i16).to_be_bytes());
        body.extend_from_slice(&(-1_i32).to_be_bytes());
        body.extend_from_slice(&0_i16.to_be_bytes());
    }
    frame(b'T', &body)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            Some(value) => {
                body.extend_from_slice(&(value.len() as i32).to_be_bytes());
                body.extend_from_slice(value.as_bytes());
            }
            None => body.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    frame(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = tag.as_bytes().to_vec();
    body.push(0);
    frame(b'C', &body)
}

fn fields(tag: u8, severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        body.push(field);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    frame(tag, &body)
}

pub fn error_response(code: &str, message: &str) -> Vec<u8> {
    fields(b'E', "ERROR", code, message)
}

pub fn notice_response(message: &str) -> Vec<u8> {
    fields(b'N', "NOTICE", "00000", message)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for part in [name, value] {
        body.extend_from_slice(part.as_bytes());
        body.push(0);
    }
    frame(b'S', &body)
}

pub fn backend_key(process_id: i32, secret_key: i32) -> Vec<u8> {
    let mut body = process_id.to_be_bytes().to_vec();
    body.extend_from_slice(&secret_key.to_be_bytes());
    frame(b'K', &body)
}

pub fn notification(process_id: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = process_id.to_be_bytes().to_vec();
    for part in [channel, payload] {
        body.extend_from_slice(part.as_bytes());
        body.push(0);
    }
    frame(b'A', &body)
}

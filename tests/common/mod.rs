//! In-process mock server speaking enough of the Postgres v3 protocol for
//! the integration tests: trust or cleartext-password startup, the simple
//! query protocol and both COPY directions.

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const SSL_REQUEST_CODE: i32 = 80_877_103;

/// What the server answers for one statement
#[derive(Debug, Clone)]
pub enum Step {
    /// RowDescription + DataRows + `SELECT n`
    Rows {
        columns: Vec<&'static str>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// CommandComplete with the given tag
    Command(&'static str),
    /// ErrorResponse; later steps are skipped
    Error(&'static str),
    /// EmptyQueryResponse
    Empty,
    /// CopyOutResponse + CopyData chunks + CopyDone + `COPY n`
    CopyOut(Vec<&'static str>),
    /// CopyInResponse, then consume CopyData until CopyDone or CopyFail
    CopyIn,
}

impl Step {
    /// Single-column row set
    pub fn column(name: &'static str, values: &[&str]) -> Self {
        Step::Rows {
            columns: vec![name],
            rows: values.iter().map(|v| vec![Some(v.to_string())]).collect(),
        }
    }
}

/// Everything the server observed
#[derive(Debug, Default)]
pub struct Recorded {
    pub queries: Vec<String>,
    pub copy_data: Vec<u8>,
    pub copy_failures: Vec<String>,
    pub startup_params: Vec<(String, String)>,
    pub terminated: usize,
}

type Handler = Arc<dyn Fn(&str) -> Vec<Step> + Send + Sync>;

/// Mock server bound to an ephemeral localhost port
pub struct MockServer {
    port: u16,
    recorded: Arc<Mutex<Recorded>>,
    accept_loop: JoinHandle<()>,
}

impl MockServer {
    /// Trust-auth server answering queries with `handler`
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Vec<Step> + Send + Sync + 'static,
    {
        Self::start_with_password(None, handler).await
    }

    /// Server that requests a cleartext password when `password` is set
    pub async fn start_with_password<F>(password: Option<&'static str>, handler: F) -> Self
    where
        F: Fn(&str) -> Vec<Step> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let handler: Handler = Arc::new(handler);

        let shared = Arc::clone(&recorded);
        let accept_loop = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve(socket, password, handler, recorded).await;
                });
            }
        });

        Self {
            port,
            recorded,
            accept_loop,
        }
    }

    /// key=value DSN pointing at this server
    pub fn dsn(&self) -> String {
        format!(
            "host=127.0.0.1 port={} dbname=test user=tester connect_timeout=5",
            self.port
        )
    }

    /// Same DSN with a password
    pub fn dsn_with_password(&self, password: &str) -> String {
        format!("{} password={}", self.dsn(), password)
    }

    /// Snapshot access to what the server saw
    pub fn recorded<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&self.recorded.lock().expect("recorded lock"))
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<String> {
        self.recorded(|r| r.queries.clone())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Handler shared by most tests
pub fn default_handler(query: &str) -> Vec<Step> {
    match query {
        "SELECT 1" => vec![Step::column("?column?", &["1"])],
        "SELECT version(), (SELECT COUNT(*) FROM pg_settings WHERE name LIKE 'rds%')" => {
            vec![Step::Rows {
                columns: vec!["version", "count"],
                rows: vec![vec![
                    Some("PostgreSQL 14.9 (Debian 14.9-1.pgdg120+1) on x86_64-pc-linux-gnu".into()),
                    Some("0".into()),
                ]],
            }]
        }
        "" => vec![Step::Empty],
        q if q.starts_with("CREATE") || q.starts_with("SET") => vec![Step::Command("OK")],
        q if q.starts_with("SELEC ") => vec![Step::Error("syntax error at or near \"SELEC\"")],
        _ => vec![Step::Error("unexpected statement")],
    }
}

async fn serve(
    mut socket: TcpStream,
    password: Option<&'static str>,
    handler: Handler,
    recorded: Arc<Mutex<Recorded>>,
) -> std::io::Result<()> {
    // startup, answering an SSLRequest with 'N'
    let startup = loop {
        let len = socket.read_i32().await? as usize;
        let mut body = vec![0u8; len - 4];
        socket.read_exact(&mut body).await?;
        if body[..4] == SSL_REQUEST_CODE.to_be_bytes() {
            socket.write_all(b"N").await?;
            continue;
        }
        break body;
    };
    recorded.lock().expect("lock").startup_params = startup_params(&startup[4..]);

    if let Some(expected) = password {
        socket.write_all(&message(b'R', &3i32.to_be_bytes())).await?;
        let (tag, body) = read_message(&mut socket).await?;
        if tag != b'p' || body.strip_suffix(b"\0") != Some(expected.as_bytes()) {
            let err = error_fields("FATAL", "28P01", "password authentication failed for user \"tester\"");
            socket.write_all(&err).await?;
            return Ok(());
        }
    }

    let mut hello = message(b'R', &0i32.to_be_bytes());
    hello.extend(message(b'S', b"server_version\x0014.9\0"));
    hello.extend(message(b'K', &[0, 0, 0x30, 0x39, 0, 0, 0, 1]));
    hello.extend(ready());
    socket.write_all(&hello).await?;

    loop {
        let (tag, body) = match read_message(&mut socket).await {
            Ok(msg) => msg,
            Err(_) => return Ok(()),
        };
        match tag {
            b'Q' => {
                let query = String::from_utf8_lossy(body.strip_suffix(b"\0").unwrap_or(&body))
                    .into_owned();
                recorded.lock().expect("lock").queries.push(query.clone());

                for step in handler(&query) {
                    if !run_step(&mut socket, step, &recorded).await? {
                        break;
                    }
                }
                socket.write_all(&ready()).await?;
            }
            b'X' => {
                recorded.lock().expect("lock").terminated += 1;
                return Ok(());
            }
            // CopyData/CopyDone/CopyFail outside of COPY are ignored, as Postgres does
            _ => {}
        }
    }
}

/// Write one step; returns `false` when the statement failed
async fn run_step(
    socket: &mut TcpStream,
    step: Step,
    recorded: &Arc<Mutex<Recorded>>,
) -> std::io::Result<bool> {
    match step {
        Step::Rows { columns, rows } => {
            let mut out = row_description(&columns);
            for row in &rows {
                out.extend(data_row(row));
            }
            out.extend(command_complete(&format!("SELECT {}", rows.len())));
            socket.write_all(&out).await?;
        }
        Step::Command(tag) => socket.write_all(&command_complete(tag)).await?,
        Step::Empty => socket.write_all(&message(b'I', b"")).await?,
        Step::Error(text) => {
            socket.write_all(&error_fields("ERROR", "42601", text)).await?;
            return Ok(false);
        }
        Step::CopyOut(chunks) => {
            let mut out = message(b'H', &[0, 0, 1, 0, 0]);
            for chunk in &chunks {
                out.extend(message(b'd', chunk.as_bytes()));
            }
            out.extend(message(b'c', b""));
            out.extend(command_complete(&format!("COPY {}", chunks.len())));
            socket.write_all(&out).await?;
        }
        Step::CopyIn => {
            socket.write_all(&message(b'G', &[0, 0, 1, 0, 0])).await?;
            let mut received = Vec::new();
            loop {
                let (tag, body) = read_message(socket).await?;
                match tag {
                    b'd' => received.extend_from_slice(&body),
                    b'c' => {
                        let rows = received.iter().filter(|b| **b == b'\n').count();
                        recorded.lock().expect("lock").copy_data.extend(received);
                        socket
                            .write_all(&command_complete(&format!("COPY {}", rows)))
                            .await?;
                        return Ok(true);
                    }
                    b'f' => {
                        let reason = String::from_utf8_lossy(body.strip_suffix(b"\0").unwrap_or(&body))
                            .into_owned();
                        let text = format!("COPY from stdin failed: {}", reason);
                        recorded.lock().expect("lock").copy_failures.push(reason);
                        socket
                            .write_all(&error_fields("ERROR", "57014", &text))
                            .await?;
                        return Ok(false);
                    }
                    other => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("unexpected message 0x{:02X} during COPY IN", other),
                        ));
                    }
                }
            }
        }
    }
    Ok(true)
}

async fn read_message(socket: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let tag = socket.read_u8().await?;
    let len = socket.read_i32().await? as usize;
    let mut body = vec![0u8; len - 4];
    socket.read_exact(&mut body).await?;
    Ok((tag, body))
}

fn startup_params(body: &[u8]) -> Vec<(String, String)> {
    let parts: Vec<String> = body
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    parts
        .chunks(2)
        .filter(|pair| pair.len() == 2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(body.len() + 5);
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf.to_vec()
}

fn ready() -> Vec<u8> {
    message(b'Z', b"I")
}

fn command_complete(tag: &str) -> Vec<u8> {
    message(b'C', format!("{}\0", tag).as_bytes())
}

fn error_fields(severity: &str, code: &str, text: &str) -> Vec<u8> {
    message(
        b'E',
        format!("S{}\0C{}\0M{}\0\0", severity, code, text).as_bytes(),
    )
}

fn row_description(columns: &[&str]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_i16(columns.len() as i16);
    for name in columns {
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        body.put_i32(0);
        body.put_i16(0);
        body.put_u32(25);
        body.put_i16(-1);
        body.put_i32(-1);
        body.put_i16(0);
    }
    message(b'T', &body)
}

fn data_row(values: &[Option<String>]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(v) => {
                body.put_i32(v.len() as i32);
                body.put_slice(v.as_bytes());
            }
            None => body.put_i32(-1),
        }
    }
    message(b'D', &body)
}

/// Route `tracing` output to the test harness; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

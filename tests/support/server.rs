#![allow(dead_code)]
//! A scripted origin for wire-level tests. It speaks just enough HTTP/1.1 to
//! exercise the client: it records every request it parses, counts accepted
//! connections, and answers from a caller-supplied script.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime;
use tokio::sync::oneshot;

/// One request as the origin parsed it.
#[derive(Debug, Clone)]
pub struct Received {
    /// Index of the connection that carried it (0-based, accept order).
    pub conn: usize,
    /// Position on that connection (0-based).
    pub seq: usize,
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A canned answer.
pub struct Reply {
    bytes: Vec<u8>,
    close: bool,
    delay: Option<Duration>,
}

impl Reply {
    pub fn status(code: u16, reason: &str, headers: &[(&str, &str)], body: &[u8]) -> Reply {
        let mut text = format!("HTTP/1.1 {code} {reason}\r\n");
        for (name, value) in headers {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
        text.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        let mut bytes = text.into_bytes();
        bytes.extend_from_slice(body);
        Reply {
            bytes,
            close: false,
            delay: None,
        }
    }

    pub fn ok(body: &[u8]) -> Reply {
        Reply::status(200, "OK", &[], body)
    }

    /// A fully hand-written response, e.g. chunked encoding.
    pub fn raw(bytes: Vec<u8>) -> Reply {
        Reply {
            bytes,
            close: false,
            delay: None,
        }
    }

    /// Drop the connection after answering.
    pub fn close(mut self) -> Reply {
        self.close = true;
        self
    }

    /// Stall before answering, to trip client timeouts.
    pub fn delayed(mut self, delay: Duration) -> Reply {
        self.delay = Some(delay);
        self
    }
}

pub struct Server {
    addr: SocketAddr,
    opens: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Received>>>,
    shutdown: Option<oneshot::Sender<()>>,
    panic_rx: std_mpsc::Receiver<()>,
}

impl Server {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connections accepted so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every request parsed so far, in arrival order.
    pub fn requests(&self) -> Vec<Received> {
        self.requests.lock().unwrap().clone()
    }

    /// `"METHOD path"` per request, in arrival order.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if !thread::panicking() {
            self.panic_rx
                .recv_timeout(Duration::from_secs(3))
                .expect("test server should not panic");
        }
    }
}

/// Start an origin answering every request through `respond`.
pub fn scripted<F>(respond: F) -> Server
where
    F: Fn(&Received) -> Reply + Send + Sync + 'static,
{
    let test_name = thread::current().name().unwrap_or("<unknown>").to_string();
    let respond = Arc::new(respond);
    let opens = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    // Own runtime in its own thread, so client and origin never share a
    // reactor.
    let rt = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("new rt");
    let listener = rt.block_on(async {
        TcpListener::bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap()
    });
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let (panic_tx, panic_rx) = std_mpsc::channel();

    let thread_opens = opens.clone();
    let thread_requests = requests.clone();
    thread::Builder::new()
        .name(format!("test({test_name})-support-server"))
        .spawn(move || {
            rt.block_on(async {
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        accepted = listener.accept() => {
                            let Ok((stream, _)) = accepted else { break };
                            let conn = thread_opens.fetch_add(1, Ordering::SeqCst);
                            tokio::spawn(serve(
                                stream,
                                conn,
                                thread_requests.clone(),
                                respond.clone(),
                            ));
                        }
                    }
                }
            });
            let _ = panic_tx.send(());
        })
        .expect("server thread");

    Server {
        addr,
        opens,
        requests,
        shutdown: Some(shutdown_tx),
        panic_rx,
    }
}

async fn serve<F>(
    mut stream: TcpStream,
    conn: usize,
    requests: Arc<Mutex<Vec<Received>>>,
    respond: Arc<F>,
) where
    F: Fn(&Received) -> Reply + Send + Sync + 'static,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut seq = 0usize;
    loop {
        let Some(received) = read_request(&mut stream, &mut buf, conn, seq).await else {
            return;
        };
        requests.lock().unwrap().push(received.clone());
        let reply = respond.as_ref()(&received);
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if stream.write_all(&reply.bytes).await.is_err() {
            return;
        }
        if reply.close {
            return;
        }
        seq += 1;
    }
}

async fn read_request(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    conn: usize,
    seq: usize,
) -> Option<Received> {
    loop {
        if let Some(end) = find_blank_line(buf) {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let mut lines = head.split("\r\n");
            let mut request_line = lines.next().unwrap_or("").split_whitespace();
            let method = request_line.next().unwrap_or("").to_owned();
            let path = request_line.next().unwrap_or("").to_owned();
            let headers: Vec<(String, String)> = lines
                .filter_map(|line| {
                    line.split_once(':')
                        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                })
                .collect();
            let content_length = headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.parse::<usize>().ok())
                .unwrap_or(0);

            let body_start = end + 4;
            while buf.len() < body_start + content_length {
                if !read_more(stream, buf).await {
                    return None;
                }
            }
            let body =
                String::from_utf8_lossy(&buf[body_start..body_start + content_length]).into_owned();
            buf.drain(..body_start + content_length);
            return Some(Received {
                conn,
                seq,
                method,
                path,
                headers,
                body,
            });
        }
        if !read_more(stream, buf).await {
            return None;
        }
    }
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 4096];
    match stream.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

//! Minimal RFC 6455 WebSocket client
//!
//! Just enough of the protocol to carry a CDP session: the HTTP upgrade
//! handshake, masked client frames, and a reader that reassembles frames
//! from a rolling buffer. Text messages and the final close are delivered on
//! an unbounded channel of [`WsEvent`]s.
//!
//! Frame layout:
//! ```text
//! byte 0   FIN | RSV1-3 | opcode(4)
//! byte 1   MASK | len(7)          len 126 -> 16-bit length follows
//!                                 len 127 -> 64-bit length follows
//! [mask key: 4 bytes]  payload
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::common::{lock, BestEffort, Error, Result};

/// Largest frame payload we accept from the server
const MAX_PAYLOAD: u64 = 256 * 1024 * 1024;

/// Limit on the size of the handshake response headers
const MAX_HANDSHAKE: usize = 16 * 1024;

/// Normal closure status code
const CLOSE_NORMAL: u16 = 1000;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcodes; ignored on receipt
    Reserved(u8),
}

impl Opcode {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(bits) => bits & 0x0F,
        }
    }
}

/// One decoded frame (payload already unmasked)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// XOR `payload` with the 4-byte mask key; applying it twice restores the input
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Build a final, masked client frame
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 14);
    frame.push(0x80 | opcode.bits());

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(&mask);
    let start = frame.len();
    frame.extend_from_slice(payload);
    apply_mask(&mut frame[start..], mask);
    frame
}

/// Decode the frame at the start of `buffer`
///
/// Returns `Ok(None)` until the whole frame has arrived, otherwise the
/// frame and the number of bytes it occupied. Fails only for lengths
/// beyond [`MAX_PAYLOAD`], after which the stream cannot be resynchronized.
pub fn decode_frame(buffer: &[u8]) -> Result<Option<(Frame, usize)>> {
    if buffer.len() < 2 {
        return Ok(None);
    }

    let fin = buffer[0] & 0x80 != 0;
    let opcode = Opcode::from_bits(buffer[0] & 0x0F);
    let masked = buffer[1] & 0x80 != 0;

    let mut pos = 2;
    let len = match buffer[1] & 0x7F {
        126 => {
            let Some(bytes) = buffer.get(2..4) else {
                return Ok(None);
            };
            pos += 2;
            u16::from_be_bytes([bytes[0], bytes[1]]) as u64
        }
        127 => {
            let Some(bytes) = buffer.get(2..10) else {
                return Ok(None);
            };
            pos += 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            u64::from_be_bytes(raw)
        }
        short => short as u64,
    };

    if len > MAX_PAYLOAD {
        return Err(Error::WebSocketProtocol(format!(
            "frame payload of {} bytes exceeds limit",
            len
        )));
    }

    let mask = if masked {
        let Some(bytes) = buffer.get(pos..pos + 4) else {
            return Ok(None);
        };
        pos += 4;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    let end = pos + len as usize;
    if buffer.len() < end {
        return Ok(None);
    }

    let mut payload = buffer[pos..end].to_vec();
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        end,
    )))
}

/// Notification from the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A complete text message
    Message(String),
    /// The connection ended; carries the error if it did not close cleanly
    Closed(Option<String>),
}

pub type WsEventReceiver = mpsc::UnboundedReceiver<WsEvent>;

/// Fresh random bytes for keys and masks
fn random_bytes() -> [u8; 16] {
    *uuid::Uuid::new_v4().as_bytes()
}

fn random_mask() -> [u8; 4] {
    let bytes = random_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Write half shared by the client handle and the reader's control replies
struct Shared {
    writer: tokio::sync::Mutex<BoxedWriter>,
    close_sent: AtomicBool,
}

impl Shared {
    async fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(opcode, payload, random_mask());
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send our close frame at most once
    async fn send_close(&self, code: u16) -> Result<()> {
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.write_frame(Opcode::Close, &code.to_be_bytes()).await
    }
}

/// Client end of a WebSocket connection
pub struct WebSocketClient {
    shared: Arc<Shared>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketClient {
    /// Open a TCP connection to a `ws://` URL and complete the handshake
    pub async fn connect(url: &str, timeout: Duration) -> Result<(Self, WsEventReceiver)> {
        let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e))?;
        if parsed.scheme() != "ws" {
            return Err(Error::invalid_url(url, "only ws:// URLs are supported"));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::invalid_url(url, "missing host"))?;
        let port = parsed.port_or_known_default().unwrap_or(80);

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::connection_failed(url, "connect timed out"))?
            .map_err(|e| Error::connection_failed(url, e))?;

        tokio::time::timeout(timeout, Self::connect_stream(stream, &parsed))
            .await
            .map_err(|_| Error::Handshake(format!("no response from {} within {:?}", url, timeout)))?
    }

    /// Perform the handshake over an already-open stream
    pub async fn connect_stream<S>(mut stream: S, url: &Url) -> Result<(Self, WsEventReceiver)>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let leftover = handshake(&mut stream, url).await?;
        tracing::debug!(%url, pipelined = leftover.len(), "WebSocket handshake complete");

        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            close_sent: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(reader, leftover, shared.clone(), tx));

        Ok((
            Self {
                shared,
                reader_task: Mutex::new(Some(reader_task)),
            },
            rx,
        ))
    }

    /// Send a text message
    pub async fn send(&self, text: &str) -> Result<()> {
        if self.shared.close_sent.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed("WebSocket is closing".to_string()));
        }
        self.shared.write_frame(Opcode::Text, text.as_bytes()).await
    }

    /// Start the closing handshake
    ///
    /// The reader keeps running until the server answers (or drops the
    /// connection) and then reports [`WsEvent::Closed`].
    pub async fn close(&self) -> Result<()> {
        self.shared.send_close(CLOSE_NORMAL).await?;
        self.shared.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
    }
}

/// Send the upgrade request and wait for `101`; returns bytes read past the headers
async fn handshake<S>(stream: &mut S, url: &Url) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let host = url.host_str().unwrap_or("localhost");
    let host_header = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    let key = base64::engine::general_purpose::STANDARD.encode(random_bytes());

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = response.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if response.len() > MAX_HANDSHAKE {
            return Err(Error::Handshake("response headers too large".to_string()));
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Handshake(
                "connection closed during handshake".to_string(),
            ));
        }
        response.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&response[..header_end]);
    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if status != Some("101") {
        return Err(Error::Handshake(format!(
            "expected 101 Switching Protocols, got '{}'",
            status_line
        )));
    }

    Ok(response.split_off(header_end))
}

/// Fragmented message being reassembled
struct Fragments {
    opcode: Opcode,
    data: Vec<u8>,
}

enum Flow {
    Continue,
    Stop,
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    mut buffer: Vec<u8>,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<WsEvent>,
) {
    let mut fragments: Option<Fragments> = None;
    let mut chunk = vec![0u8; 8192];

    let outcome = 'outer: loop {
        loop {
            match decode_frame(&buffer) {
                Ok(Some((frame, used))) => {
                    buffer.drain(..used);
                    if let Flow::Stop = handle_frame(frame, &mut fragments, &shared, &tx).await {
                        break 'outer None;
                    }
                }
                Ok(None) => break,
                Err(e) => break 'outer Some(e.to_string()),
            }
        }

        match reader.read(&mut chunk).await {
            Ok(0) => {
                if shared.close_sent.load(Ordering::SeqCst) {
                    break None;
                }
                break Some("connection closed without a close frame".to_string());
            }
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => break Some(e.to_string()),
        }
    };

    match &outcome {
        Some(error) => tracing::warn!(%error, "WebSocket connection lost"),
        None => tracing::debug!("WebSocket closed"),
    }
    let _ = tx.send(WsEvent::Closed(outcome));
}

async fn handle_frame(
    frame: Frame,
    fragments: &mut Option<Fragments>,
    shared: &Shared,
    tx: &mpsc::UnboundedSender<WsEvent>,
) -> Flow {
    match frame.opcode {
        Opcode::Text | Opcode::Binary if !frame.fin => {
            *fragments = Some(Fragments {
                opcode: frame.opcode,
                data: frame.payload,
            });
        }
        Opcode::Text => deliver(frame.payload, tx),
        Opcode::Binary => {
            tracing::debug!(len = frame.payload.len(), "Ignoring binary WebSocket message");
        }
        Opcode::Continuation => {
            let Some(partial) = fragments.as_mut() else {
                tracing::warn!("Continuation frame without a message in progress");
                return Flow::Continue;
            };
            partial.data.extend_from_slice(&frame.payload);
            if frame.fin {
                if let Some(done) = fragments.take() {
                    if done.opcode == Opcode::Text {
                        deliver(done.data, tx);
                    }
                }
            }
        }
        Opcode::Ping => {
            shared
                .write_frame(Opcode::Pong, &frame.payload)
                .await
                .best_effort("pong");
        }
        Opcode::Pong => {}
        Opcode::Close => {
            let code = frame
                .payload
                .get(..2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .unwrap_or(CLOSE_NORMAL);
            tracing::debug!(code, "Server closed WebSocket");
            shared.send_close(code).await.best_effort("close echo");
            return Flow::Stop;
        }
        Opcode::Reserved(bits) => {
            tracing::debug!(opcode = bits, "Ignoring frame with reserved opcode");
        }
    }
    Flow::Continue
}

fn deliver(payload: Vec<u8>, tx: &mpsc::UnboundedSender<WsEvent>) {
    match String::from_utf8(payload) {
        Ok(text) => {
            let _ = tx.send(WsEvent::Message(text));
        }
        Err(e) => tracing::warn!(error = %e, "Dropping text frame with invalid UTF-8"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// Server-side (unmasked) frame
    fn server_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![(if fin { 0x80 } else { 0 }) | opcode.bits()];
        assert!(payload.len() < 126);
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_length_encodings_at_boundaries() {
        for (len, header_len, marker) in [
            (0usize, 2usize, 0u8),
            (125, 2, 125),
            (126, 4, 126),
            (65535, 4, 126),
            (65536, 10, 127),
        ] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = encode_frame(Opcode::Text, &payload, MASK);

            assert_eq!(frame[0], 0x81);
            assert_eq!(frame[1] & 0x7F, marker, "length marker for {}", len);
            assert_eq!(frame.len(), header_len + 4 + len);

            let (decoded, used) = decode_frame(&frame).unwrap().unwrap();
            assert_eq!(used, frame.len());
            assert!(decoded.fin);
            assert_eq!(decoded.payload, payload, "payload of {} bytes", len);
        }
    }

    #[test]
    fn test_payload_is_masked_on_the_wire() {
        let frame = encode_frame(Opcode::Text, b"Hello", MASK);
        assert_eq!(&frame[2..6], &MASK);
        assert_ne!(&frame[6..], b"Hello");

        let mut body = frame[6..].to_vec();
        apply_mask(&mut body, MASK);
        assert_eq!(body, b"Hello");
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let frame = encode_frame(Opcode::Text, &[7u8; 300], MASK);
        for cut in [0, 1, 3, 7, frame.len() - 1] {
            assert!(decode_frame(&frame[..cut]).unwrap().is_none(), "cut at {}", cut);
        }
        assert!(decode_frame(&frame).unwrap().is_some());
    }

    #[test]
    fn test_decode_two_frames_in_one_buffer() {
        let mut data = server_frame(Opcode::Text, true, b"one");
        data.extend(server_frame(Opcode::Text, true, b"two"));

        let (first, used) = decode_frame(&data).unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        let (second, _) = decode_frame(&data[used..]).unwrap().unwrap();
        assert_eq!(second.payload, b"two");
    }

    #[test]
    fn test_oversized_length_is_an_error() {
        let mut frame = vec![0x81, 127];
        frame.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(Error::WebSocketProtocol(_))
        ));
    }

    #[test]
    fn test_reserved_opcode_decodes() {
        let frame = server_frame(Opcode::Reserved(0x3), true, b"x");
        let (decoded, _) = decode_frame(&frame).unwrap().unwrap();
        assert_eq!(decoded.opcode, Opcode::Reserved(0x3));
    }

    /// Read the client's upgrade request from the server end
    async fn read_request(server: &mut DuplexStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 256];
        while !request.ends_with(b"\r\n\r\n") {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0);
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(request).unwrap()
    }

    async fn read_client_frame(server: &mut DuplexStream, pending: &mut Vec<u8>) -> Frame {
        let mut buf = [0u8; 1024];
        loop {
            if let Some((frame, used)) = decode_frame(pending).unwrap() {
                pending.drain(..used);
                return frame;
            }
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0);
            pending.extend_from_slice(&buf[..n]);
        }
    }

    fn test_url() -> Url {
        Url::parse("ws://127.0.0.1:9229/abc-123").unwrap()
    }

    #[tokio::test]
    async fn test_handshake_keeps_pipelined_frame() {
        let (client_io, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert!(request.starts_with("GET /abc-123 HTTP/1.1\r\n"));
            assert!(request.contains("Upgrade: websocket\r\n"));
            assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
            assert!(request.contains("Sec-WebSocket-Key: "));

            // Response and first frame in a single write
            let mut reply = b"HTTP/1.1 101 Switching Protocols\r\n\
                Upgrade: websocket\r\nConnection: Upgrade\r\n\r\n"
                .to_vec();
            reply.extend(server_frame(Opcode::Text, true, b"{\"early\":true}"));
            server.write_all(&reply).await.unwrap();
            server
        });

        let (_client, mut rx) = WebSocketClient::connect_stream(client_io, &test_url())
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(WsEvent::Message("{\"early\":true}".to_string()))
        );
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_101_status_fails() {
        let (client_io, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            server
        });

        let err = WebSocketClient::connect_stream(client_io, &test_url())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Handshake(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_fragments_ping_and_close() {
        let (client_io, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
                .await
                .unwrap();

            let mut pending = Vec::new();

            // Client message arrives masked
            let frame = read_client_frame(&mut server, &mut pending).await;
            assert_eq!(frame.opcode, Opcode::Text);
            assert_eq!(frame.payload, b"hello");

            // Ping in the middle of a fragmented message, delivered byte by byte
            let mut script = server_frame(Opcode::Text, false, b"hel");
            script.extend(server_frame(Opcode::Ping, true, b"p"));
            script.extend(server_frame(Opcode::Continuation, true, b"lo"));
            for byte in script {
                server.write_all(&[byte]).await.unwrap();
            }

            let pong = read_client_frame(&mut server, &mut pending).await;
            assert_eq!(pong.opcode, Opcode::Pong);
            assert_eq!(pong.payload, b"p");

            server
                .write_all(&server_frame(Opcode::Close, true, &1000u16.to_be_bytes()))
                .await
                .unwrap();
            let echo = read_client_frame(&mut server, &mut pending).await;
            assert_eq!(echo.opcode, Opcode::Close);
            server
        });

        let (client, mut rx) = WebSocketClient::connect_stream(client_io, &test_url())
            .await
            .unwrap();
        client.send("hello").await.unwrap();

        assert_eq!(rx.recv().await, Some(WsEvent::Message("hello".to_string())));
        assert_eq!(rx.recv().await, Some(WsEvent::Closed(None)));
        assert!(client.send("late").await.is_err());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_without_close_reports_error() {
        let (client_io, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n")
                .await
                .unwrap();
            drop(server);
        });

        let (_client, mut rx) = WebSocketClient::connect_stream(client_io, &test_url())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(WsEvent::Closed(Some(_)))));
    }
}

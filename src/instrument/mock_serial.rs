//! In-memory serial pair for instrument protocol tests.
//!
//! [`pair`] returns two connected halves:
//!
//! - [`MockSerialPort`] implements `AsyncRead`/`AsyncWrite` and is handed to
//!   [`super::tester::WifiTester::from_io`] as a drop-in for the real port.
//! - [`InstrumentSim`] stays in the test and plays the instrument: it parses
//!   the JSON request lines the driver writes and scripts the replies.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

/// Driver-facing half of the pair.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Test-facing half: scripts the instrument's side of the conversation.
#[derive(Debug)]
pub struct InstrumentSim {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    line_buffer: Vec<u8>,
}

/// Create a connected port/simulator pair.
pub fn pair() -> (MockSerialPort, InstrumentSim) {
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    let (reads_tx, reads_rx) = mpsc::unbounded_channel();

    (
        MockSerialPort {
            writes_tx,
            reads_rx,
            read_buffer: VecDeque::new(),
        },
        InstrumentSim {
            writes_rx,
            reads_tx,
            line_buffer: Vec::new(),
        },
    )
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                // Channel closed: end-of-file
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let take = buf.remaining().min(self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..take).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "instrument simulator dropped",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl InstrumentSim {
    /// Budget for the driver to produce an expected request line.
    const EXPECT_BUDGET: Duration = Duration::from_secs(2);

    /// Await the next request line and assert its `cmd` field.
    ///
    /// Returns the full parsed request so the test can assert on arguments.
    ///
    /// # Panics
    /// Panics if no complete line arrives within 2 seconds, the line is not
    /// JSON, or the command name differs.
    pub async fn expect_command(&mut self, cmd: &str) -> Value {
        let request = self.next_request().await;
        assert_eq!(
            request.get("cmd").and_then(Value::as_str),
            Some(cmd),
            "unexpected command in {request}"
        );
        request
    }

    /// Await the next request line without asserting its command name.
    pub async fn next_request(&mut self) -> Value {
        let line = self.next_line().await;
        let text = String::from_utf8_lossy(&line).into_owned();
        serde_json::from_str(text.trim())
            .unwrap_or_else(|e| panic!("request line is not JSON ({e}): {text:?}"))
    }

    /// Reply `{"ok":true}` merged with the given extra fields.
    pub fn reply_ok(&self, extra: Value) {
        let mut reply = json!({"ok": true});
        if let (Some(target), Some(source)) = (reply.as_object_mut(), extra.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        self.reply_raw(&reply.to_string());
    }

    /// Reply `{"ok":false,"error":...}`.
    pub fn reply_err(&self, error: &str) {
        self.reply_raw(&json!({"ok": false, "error": error}).to_string());
    }

    /// Send an arbitrary reply line (for malformed-reply tests).
    pub fn reply_raw(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.reads_tx
            .send(bytes)
            .unwrap_or_else(|_| panic!("driver port dropped before reply"));
    }

    async fn next_line(&mut self) -> Vec<u8> {
        loop {
            if let Some(pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
                line.pop();
                return line;
            }
            match timeout(Self::EXPECT_BUDGET, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.line_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("driver port closed while expecting a request"),
                Err(_) => panic!(
                    "timeout waiting for a request line; partial data: {:?}",
                    String::from_utf8_lossy(&self.line_buffer)
                ),
            }
        }
    }
}

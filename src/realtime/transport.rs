//! Framed byte-level read/write over a WebSocket connection (§4.2).
//!
//! `TransportReader`/`TransportWriter` abstract one full message frame at a
//! time so the Connection pumps never touch Salvo's websocket types
//! directly. The halves are split up front so the read pump and write pump
//! each own theirs outright — no lock between two tasks that never touch
//! the same half. Deadlines are the caller's concern (the pumps apply them
//! via `tokio::time::timeout`), not the Transport's.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use salvo::async_trait;
use salvo::websocket::{Message, WebSocket};

#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Ping,
    Pong,
    Close,
}

#[derive(Debug, Clone)]
pub enum TransportError {
    Closed,
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait TransportReader: Send {
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;
}

#[async_trait]
pub trait TransportWriter: Send {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
    /// Idempotent.
    async fn close(&mut self);
}

/// Splits a transport into an owned read half and write half.
pub trait Transport: Send {
    fn split(
        self: Box<Self>,
    ) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>);
}

pub struct SalvoWebSocketTransport {
    socket: WebSocket,
}

impl SalvoWebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for SalvoWebSocketTransport {
    fn split(
        self: Box<Self>,
    ) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(SalvoWriter {
                sink,
                closed: false,
            }),
            Box::new(SalvoReader { stream }),
        )
    }
}

struct SalvoWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl TransportWriter for SalvoWriter {
    async fn write_frame(
        &mut self,
        frame: Frame,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let msg = match frame {
            Frame::Text(s) => Message::text(s),
            Frame::Ping => Message::ping(Vec::new()),
            Frame::Pong => Message::pong(Vec::new()),
            Frame::Close => Message::close(),
        };
        self.sink
            .send(msg)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.sink.send(Message::close()).await;
        let _ = self.sink.close().await;
    }
}

struct SalvoReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportReader for SalvoReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        match self.stream.next().await {
            Some(Ok(msg)) => Ok(convert_inbound(&msg)),
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
            None => Err(TransportError::Closed),
        }
    }
}

fn convert_inbound(msg: &Message) -> Frame {
    if msg.is_close() {
        Frame::Close
    } else if msg.is_ping() {
        Frame::Ping
    } else if msg.is_pong() {
        Frame::Pong
    } else if let Ok(text) = msg.to_str() {
        Frame::Text(text.to_string())
    } else {
        Frame::Close
    }
}

/// In-memory halves used by Connection tests: frames written to the writer
/// land in `outbound`, frames queued in `inbound` come back out of the
/// reader in order.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct MockState {
        pub inbound: Mutex<VecDeque<Frame>>,
        pub outbound: Mutex<Vec<Frame>>,
        pub closed: Mutex<bool>,
    }

    pub struct MockReader {
        pub state: Arc<MockState>,
    }

    pub struct MockWriter {
        pub state: Arc<MockState>,
    }

    #[async_trait]
    impl TransportReader for MockReader {
        async fn read_frame(&mut self) -> Result<Frame, TransportError> {
            self.state
                .inbound
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(TransportError::Closed)
        }
    }

    #[async_trait]
    impl TransportWriter for MockWriter {
        async fn write_frame(
            &mut self,
            frame: Frame,
        ) -> Result<(), TransportError> {
            if *self.state.closed.lock().unwrap() {
                return Err(TransportError::Closed);
            }
            self.state.outbound.lock().unwrap().push(frame);
            Ok(())
        }

        async fn close(&mut self) {
            *self.state.closed.lock().unwrap() = true;
        }
    }

    pub fn pair() -> (Arc<MockState>, MockWriter, MockReader) {
        let state = Arc::new(MockState::default());
        (
            state.clone(),
            MockWriter {
                state: state.clone(),
            },
            MockReader { state },
        )
    }

    /// A whole [`Transport`] over a pre-seeded inbound queue, for tests that
    /// drive `spawn_connection` end to end instead of exercising the pumps
    /// directly.
    pub struct MockTransport {
        pub writer: MockWriter,
        pub reader: MockReader,
    }

    impl super::Transport for MockTransport {
        fn split(
            self: Box<Self>,
        ) -> (Box<dyn super::TransportWriter>, Box<dyn super::TransportReader>) {
            (Box::new(self.writer), Box::new(self.reader))
        }
    }

    pub fn transport() -> (Arc<MockState>, MockTransport) {
        let (state, writer, reader) = pair();
        (state, MockTransport { writer, reader })
    }
}

//! Client side of `POST /api/stream-chat`.
//!
//! Each call opens one streaming exchange, decodes the body incrementally
//! and reports progress through callbacks or an event stream. Sessions
//! share nothing beyond the pooled HTTP client.

use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use parking_lot::ReentrantMutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::decoder::Utf8StreamDecoder;
use super::frames::{BodyEvent, FrameReader};
use crate::config::Framing;
use crate::error::ClientError;
use crate::message::StreamChatRequest;

/// Path of the relay endpoint, relative to the base URL.
pub const STREAM_CHAT_PATH: &str = "/api/stream-chat";

/// Receiver of one exchange's progress.
///
/// Exactly one of `on_complete` or `on_error` is called per exchange,
/// unless the exchange is cancelled, in which case neither is.
pub trait StreamCallbacks: Send + 'static {
    /// Newly decoded text. Never the whole accumulator.
    fn on_chunk(&mut self, text: &str);
    /// Full text of the reply, once the body has ended.
    fn on_complete(&mut self, full_text: String);
    fn on_error(&mut self, error: ClientError);
}

/// [`StreamCallbacks`] built from three closures.
pub struct FnCallbacks<C, D, E> {
    on_chunk: C,
    on_complete: D,
    on_error: E,
}

/// Bundle closures into a [`StreamCallbacks`] implementation.
pub fn callbacks<C, D, E>(on_chunk: C, on_complete: D, on_error: E) -> FnCallbacks<C, D, E>
where
    C: FnMut(&str) + Send + 'static,
    D: FnMut(String) + Send + 'static,
    E: FnMut(ClientError) + Send + 'static,
{
    FnCallbacks {
        on_chunk,
        on_complete,
        on_error,
    }
}

impl<C, D, E> StreamCallbacks for FnCallbacks<C, D, E>
where
    C: FnMut(&str) + Send + 'static,
    D: FnMut(String) + Send + 'static,
    E: FnMut(ClientError) + Send + 'static,
{
    fn on_chunk(&mut self, text: &str) {
        (self.on_chunk)(text)
    }

    fn on_complete(&mut self, full_text: String) {
        (self.on_complete)(full_text)
    }

    fn on_error(&mut self, error: ClientError) {
        (self.on_error)(error)
    }
}

/// Progress of one exchange, as yielded by [`ChatEventStream`].
#[derive(Debug)]
pub enum ChatEvent {
    Chunk(String),
    Complete(String),
    Error(ClientError),
}

/// Cancellation flag whose check-and-dispatch is atomic with respect to
/// [`CancelGate::cancel`].
///
/// The lock is reentrant so a callback may cancel its own exchange.
struct CancelGate {
    token: CancellationToken,
    dispatch: ReentrantMutex<()>,
}

impl CancelGate {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            dispatch: ReentrantMutex::new(()),
        }
    }

    /// Waits for a callback running on another thread, then cancels.
    fn cancel(&self) {
        let _held = self.dispatch.lock();
        self.token.cancel();
    }

    /// Run `callback` unless cancelled. Returns whether it ran.
    fn dispatch(&self, callback: impl FnOnce()) -> bool {
        let _held = self.dispatch.lock();
        if self.token.is_cancelled() {
            return false;
        }
        callback();
        true
    }
}

/// Handle returned by [`StreamChatClient::stream_chat`].
pub struct CancelHandle {
    gate: Arc<CancelGate>,
    task: JoinHandle<()>,
}

impl CancelHandle {
    /// Abort the exchange. No callback fires after this returns.
    ///
    /// If a callback is running on another thread, this waits for it to
    /// return. Calling it from inside a callback is allowed. Idempotent,
    /// and a no-op once the exchange has ended.
    pub fn cancel(&self) {
        self.gate.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.token.is_cancelled()
    }

    /// Whether the exchange has ended, by any path.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the exchange to end.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Chat stream task failed");
        }
    }
}

/// Stream of [`ChatEvent`]s for one exchange. Dropping it cancels the
/// exchange.
pub struct ChatEventStream {
    events: UnboundedReceiverStream<ChatEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ChatEventStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl StreamCallbacks for ChannelCallbacks {
    fn on_chunk(&mut self, text: &str) {
        let _ = self.tx.send(ChatEvent::Chunk(text.to_string()));
    }

    fn on_complete(&mut self, full_text: String) {
        let _ = self.tx.send(ChatEvent::Complete(full_text));
    }

    fn on_error(&mut self, error: ClientError) {
        let _ = self.tx.send(ChatEvent::Error(error));
    }
}

/// Client for a chat relay.
#[derive(Clone)]
pub struct StreamChatClient {
    http: Client,
    endpoint: String,
    framing: Framing,
}

impl StreamChatClient {
    /// Client for the relay at `base_url`, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(http: Client, base_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), STREAM_CHAT_PATH),
            framing: Framing::default(),
        }
    }

    /// Body framing the relay was configured with. Defaults to `plain`.
    ///
    /// With `sse`, only frame content reaches `on_chunk`, `[DONE]` completes
    /// the exchange and an `error` event is reported as
    /// [`ClientError::Relay`].
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Start one exchange, reporting through `callbacks`.
    ///
    /// Callbacks run sequentially on a spawned task, in body order.
    pub fn stream_chat<C: StreamCallbacks>(
        &self,
        request: StreamChatRequest,
        callbacks: C,
    ) -> CancelHandle {
        let gate = Arc::new(CancelGate::new());
        let task = tokio::spawn(run_exchange(
            self.http.clone(),
            self.endpoint.clone(),
            self.framing,
            request,
            gate.clone(),
            callbacks,
        ));
        CancelHandle { gate, task }
    }

    /// Start one exchange and return its progress as a stream.
    pub fn events(&self, request: StreamChatRequest) -> ChatEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.stream_chat(request, ChannelCallbacks { tx });
        ChatEventStream {
            events: UnboundedReceiverStream::new(rx),
            _cancel_on_drop: handle.gate.token.clone().drop_guard(),
        }
    }

    /// Run one exchange to completion and return the full reply.
    pub async fn collect(&self, request: StreamChatRequest) -> Result<String, ClientError> {
        let mut events = self.events(request);
        while let Some(event) = events.next().await {
            match event {
                ChatEvent::Chunk(_) => {}
                ChatEvent::Complete(full_text) => return Ok(full_text),
                ChatEvent::Error(e) => return Err(e),
            }
        }
        Err(ClientError::Body("stream ended without completion".to_string()))
    }
}

async fn run_exchange<C: StreamCallbacks>(
    http: Client,
    endpoint: String,
    framing: Framing,
    request: StreamChatRequest,
    gate: Arc<CancelGate>,
    mut callbacks: C,
) {
    if request.messages.is_empty() {
        gate.dispatch(|| callbacks.on_error(ClientError::EmptyHistory));
        return;
    }

    let token = gate.token.clone();
    let send = http.post(&endpoint).json(&request).send();
    let response = tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!("Chat stream cancelled before response");
            return;
        }
        response = send => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            gate.dispatch(|| callbacks.on_error(ClientError::Transport(e.to_string())));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "Chat stream rejected");
        gate.dispatch(|| {
            callbacks.on_error(ClientError::Status {
                status: status.as_u16(),
            })
        });
        return;
    }

    let mut exchange = Exchange {
        gate: &gate,
        callbacks: &mut callbacks,
        full_text: String::new(),
    };
    let mut body = response.bytes_stream();
    let mut decoder = Utf8StreamDecoder::new();
    let mut frames = FrameReader::new(framing);

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(received = exchange.full_text.len(), "Chat stream cancelled");
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                let text = decoder.decode(&bytes);
                if exchange.deliver(frames.push(&text)).is_break() {
                    return;
                }
            }
            Some(Err(e)) => {
                exchange.fail(ClientError::Body(e.to_string()));
                return;
            }
            None => break,
        }
    }

    let tail = decoder.finish();
    if exchange.deliver(frames.push(&tail)).is_break() {
        return;
    }
    match frames.finish() {
        Ok(_) => exchange.complete(),
        Err(e) => exchange.fail(e),
    }
}

/// Accumulator and callbacks of one running exchange.
struct Exchange<'a, C> {
    gate: &'a CancelGate,
    callbacks: &'a mut C,
    full_text: String,
}

impl<C: StreamCallbacks> Exchange<'_, C> {
    /// Dispatch decoded body events. Breaks once the exchange has ended.
    fn deliver(&mut self, events: Result<Vec<BodyEvent>, ClientError>) -> ControlFlow<()> {
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                self.fail(e);
                return ControlFlow::Break(());
            }
        };

        for event in events {
            match event {
                BodyEvent::Text(text) => {
                    let callbacks = &mut *self.callbacks;
                    let full_text = &mut self.full_text;
                    let delivered = self.gate.dispatch(|| {
                        full_text.push_str(&text);
                        callbacks.on_chunk(&text);
                    });
                    if !delivered {
                        return ControlFlow::Break(());
                    }
                }
                BodyEvent::Done => {
                    self.complete();
                    return ControlFlow::Break(());
                }
                BodyEvent::RelayError(message) => {
                    self.fail(ClientError::Relay(message));
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn complete(&mut self) {
        let full_text = std::mem::take(&mut self.full_text);
        let callbacks = &mut *self.callbacks;
        self.gate.dispatch(|| callbacks.on_complete(full_text));
    }

    fn fail(&mut self, error: ClientError) {
        let callbacks = &mut *self.callbacks;
        self.gate.dispatch(|| callbacks.on_error(error));
    }
}

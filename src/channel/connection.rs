//! Duplex connection over a byte stream
//!
//! A connection runs two background tasks: a reader that routes inbound frames
//! and a single writer that drains the outbound queue, so frames from
//! concurrent senders never interleave on the wire.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_io::Timer;
use async_net::unix::UnixStream;
use executor_core::{Executor, Task};
use futures_lite::{FutureExt, future};
use futures_lite::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use smol::channel::{self, Receiver, Sender};

use crate::channel::frame::{FrameKind, RawFrame, encode_frame, read_frame};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::Acknowledgement;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased task spawner bound to the executor the connection was opened with
type Spawner = Arc<dyn Fn(BoxFuture<()>) + Send + Sync>;

/// Type-erased receive handler
type ErasedHandler = Arc<dyn Fn(Message) -> BoxFuture<Message> + Send + Sync>;

type PendingReply = Sender<Result<Message>>;

/// An open duplex channel to the peer endpoint
///
/// Clones refer to the same channel. The channel is closed when the last
/// clone is dropped.
#[derive(Clone)]
pub struct Connection {
    handle: Arc<Handle>,
}

/// Owned only by user-facing clones; the background tasks hold `Shared` directly
struct Handle {
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.shared.closed.load(Ordering::SeqCst) {
            tracing::debug!("last connection handle dropped");
            self.shared.shutdown();
        }
    }
}

struct Shared {
    outbound: Sender<Vec<u8>>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Taken by the first `on_receive`
    inbound: Mutex<Option<Receiver<InboundRequest>>>,
    closed_tx: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
    spawner: Spawner,
    request_timeout: Option<Duration>,
}

struct InboundRequest {
    message: Message,
    responder: Responder,
}

impl Connection {
    /// Run the channel protocol over `stream`
    ///
    /// # Arguments
    /// * `stream` - Connected byte stream to the peer
    /// * `executor` - Executor for the reader, writer and handler tasks
    /// * `request_timeout` - Bound on each [`send`](Connection::send); `None` waits forever
    pub fn from_stream<S, E>(stream: S, executor: E, request_timeout: Option<Duration>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        E: Executor + Clone + Send + Sync + 'static,
    {
        let (reader, writer) = io::split(stream);
        let (outbound_tx, outbound_rx) = channel::unbounded();
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let (closed_tx, closed_rx) = channel::bounded(1);

        let spawner: Spawner = Arc::new(move |task: BoxFuture<()>| {
            executor.spawn(task).detach();
        });

        let shared = Arc::new(Shared {
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            inbound: Mutex::new(Some(inbound_rx)),
            closed_tx: Mutex::new(Some(closed_tx)),
            closed_rx,
            spawner,
            request_timeout,
        });

        (shared.spawner)(Box::pin(write_loop(writer, outbound_rx)));
        (shared.spawner)(Box::pin(read_loop(reader, Arc::clone(&shared), inbound_tx)));

        Self {
            handle: Arc::new(Handle { shared }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    /// Two connections joined by an in-process socket pair
    pub fn pair<E>(executor: E, request_timeout: Option<Duration>) -> Result<(Self, Self)>
    where
        E: Executor + Clone + Send + Sync + 'static,
    {
        let (a, b) = UnixStream::pair()?;
        Ok((
            Self::from_stream(a, executor.clone(), request_timeout),
            Self::from_stream(b, executor, request_timeout),
        ))
    }

    /// Send a request and wait for the peer's response
    pub async fn send(&self, message: Message) -> Result<Message> {
        let id = self.shared().next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(FrameKind::Request, id, &message)?;
        let (reply_tx, reply_rx) = channel::bounded(1);

        {
            let mut pending = self.shared().lock_pending();
            if self.shared().closed.load(Ordering::SeqCst) {
                return Err(Error::ConnectionClosed);
            }
            pending.insert(id, reply_tx);
        }

        if self.shared().outbound.send(frame).await.is_err() {
            self.shared().forget(id);
            return Err(Error::ConnectionClosed);
        }
        tracing::debug!(id, "sent request");

        let reply = async {
            reply_rx
                .recv()
                .await
                .unwrap_or_else(|_| Err(Error::ConnectionClosed))
        };
        let result = match self.shared().request_timeout {
            Some(limit) => {
                future::or(reply, async move {
                    Timer::after(limit).await;
                    Err(Error::Timeout(limit))
                })
                .await
            }
            None => reply.await,
        };

        if result.is_err() {
            self.shared().forget(id);
        }
        result
    }

    /// Register the handler for inbound requests
    ///
    /// Each request runs on its own task. Whatever the handler returns is sent
    /// back as the response; if the task ends without returning (panic,
    /// cancellation) a `Failed` response is sent in its place. Requests that
    /// arrived before registration are dispatched now, in arrival order.
    pub fn on_receive<H, Fut>(&self, handler: H) -> Result<()>
    where
        H: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Message> + Send + 'static,
    {
        let inbound = self.take_inbound()?;
        let spawner = Arc::clone(&self.shared().spawner);
        self.spawn(dispatch_loop(inbound, erase(handler), spawner));
        Ok(())
    }

    /// Register a handler that sees inbound requests one at a time
    ///
    /// A request is handed over only after the previous one was answered, so
    /// the handler observes requests in arrival order. A panicking handler is
    /// answered with `Failed` and the next request is still dispatched.
    pub fn on_receive_ordered<H, Fut>(&self, handler: H) -> Result<()>
    where
        H: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Message> + Send + 'static,
    {
        let inbound = self.take_inbound()?;
        self.spawn(dispatch_in_order(inbound, erase(handler)));
        Ok(())
    }

    fn take_inbound(&self) -> Result<Receiver<InboundRequest>> {
        self.shared()
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::HandlerAlreadyRegistered)
    }

    /// Stop sending. Queued frames are flushed, then the peer sees end of stream.
    pub fn close(&self) {
        tracing::debug!("closing channel");
        self.shared().shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.shared().closed.load(Ordering::SeqCst)
    }

    /// Resolves once the channel has ended, whichever side ended it
    pub async fn closed(&self) {
        let _ = self.shared().closed_rx.recv().await;
    }

    /// Spawn a task on the connection's executor
    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        (self.shared().spawner)(Box::pin(task));
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("request_timeout", &self.shared().request_timeout)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingReply>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, id: u64) {
        self.lock_pending().remove(&id);
    }

    fn accept_request(&self, frame: RawFrame, inbound: &Sender<InboundRequest>) {
        let responder = Responder::new(frame.id, self.outbound.clone());
        match frame.decode_message() {
            Ok(message) => {
                tracing::debug!(id = frame.id, "received request");
                // Fails only after shutdown; the dropped responder still answers.
                let _ = inbound.try_send(InboundRequest { message, responder });
            }
            Err(e) => {
                tracing::warn!(id = frame.id, error = %e, "undecodable request");
                responder.respond(Message::response(&Acknowledgement::failed(e)));
            }
        }
    }

    fn resolve(&self, frame: RawFrame) {
        let Some(reply) = self.lock_pending().remove(&frame.id) else {
            tracing::debug!(id = frame.id, "response for unknown or abandoned request");
            return;
        };
        let result = frame.decode_message();
        if let Err(e) = &result {
            tracing::warn!(id = frame.id, error = %e, "undecodable response");
        }
        let _ = reply.try_send(result);
    }

    fn shutdown(&self) {
        let abandoned = {
            let mut pending = self.lock_pending();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *pending)
        };
        if !abandoned.is_empty() {
            tracing::debug!(count = abandoned.len(), "abandoning in-flight requests");
        }
        drop(abandoned);
        self.outbound.close();
        self.closed_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Answers exactly one inbound request
///
/// Dropping a responder without calling [`respond`](Responder::respond) sends a
/// `Failed` response, so no inbound request can go unanswered.
struct Responder {
    id: u64,
    outbound: Sender<Vec<u8>>,
    answered: bool,
}

impl Responder {
    fn new(id: u64, outbound: Sender<Vec<u8>>) -> Self {
        Self {
            id,
            outbound,
            answered: false,
        }
    }

    fn respond(mut self, message: Message) {
        self.answered = true;
        self.deliver(&message);
    }

    fn deliver(&self, message: &Message) {
        let frame = encode_frame(FrameKind::Response, self.id, message).or_else(|e| {
            tracing::error!(id = self.id, error = %e, "failed to encode response");
            encode_frame(
                FrameKind::Response,
                self.id,
                &Message::response(&Acknowledgement::failed(e)),
            )
        });
        match frame {
            Ok(frame) => {
                if self.outbound.try_send(frame).is_err() {
                    tracing::debug!(id = self.id, "channel closed before response was sent");
                }
            }
            Err(e) => tracing::error!(id = self.id, error = %e, "response dropped"),
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.answered {
            tracing::error!(id = self.id, "inbound request finished without a response");
            self.deliver(&Message::response(&Acknowledgement::failed(
                "request handler did not respond",
            )));
        }
    }
}

fn erase<H, Fut>(handler: H) -> ErasedHandler
where
    H: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Message> + Send + 'static,
{
    Arc::new(move |message| -> BoxFuture<Message> { Box::pin(handler(message)) })
}

/// Hand each queued request to the handler on its own task
async fn dispatch_loop(
    inbound: Receiver<InboundRequest>,
    handler: ErasedHandler,
    spawner: Spawner,
) {
    while let Ok(InboundRequest { message, responder }) = inbound.recv().await {
        let handler = Arc::clone(&handler);
        spawner(Box::pin(async move {
            let response = handler(message).await;
            responder.respond(response);
        }));
    }
}

async fn dispatch_in_order(inbound: Receiver<InboundRequest>, handler: ErasedHandler) {
    while let Ok(InboundRequest { message, responder }) = inbound.recv().await {
        match AssertUnwindSafe(handler(message)).catch_unwind().await {
            Ok(response) => responder.respond(response),
            // the dropped responder answers `Failed`
            Err(_) => drop(responder),
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    shared: Arc<Shared>,
    inbound: Sender<InboundRequest>,
) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("peer closed the channel");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read frame");
                break;
            }
        };

        match frame.kind {
            FrameKind::Request => shared.accept_request(frame, &inbound),
            FrameKind::Response => shared.resolve(frame),
        }
    }
    shared.shutdown();
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, outbound: Receiver<Vec<u8>>) {
    while let Ok(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!(error = %e, "failed to write frame");
            break;
        }
    }
    let _ = writer.close().await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use executor_core::tokio::TokioGlobal;

    use super::*;
    use crate::message::RESPONSE_KEY;

    fn echo_ok(connection: &Connection, seen: Arc<AtomicUsize>) {
        connection
            .on_receive(move |_message| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Message::response(&Acknowledgement::Ok)
                }
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_request_response_both_directions() {
        let (left, right) = Connection::pair(TokioGlobal, None).unwrap();
        let seen_left = Arc::new(AtomicUsize::new(0));
        let seen_right = Arc::new(AtomicUsize::new(0));
        echo_ok(&left, Arc::clone(&seen_left));
        echo_ok(&right, Arc::clone(&seen_right));

        let reply = left.send(Message::new().with("Request", "ping")).await.unwrap();
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));
        let reply = right.send(Message::new().with("Request", "pong")).await.unwrap();
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));

        assert_eq!(seen_left.load(Ordering::SeqCst), 1);
        assert_eq!(seen_right.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_request_gets_one_response() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        echo_ok(&server, Arc::clone(&seen));

        let requests = [
            Message::new().with("Request", "Turn LED On"),
            Message::new().with("Bogus", "value"),
            Message::new(),
            Message::new().with("Request", "x").with("Perimeter Notification", "y"),
        ];
        let mut responses = 0;
        for request in requests.clone() {
            let reply = client.send(request).await.unwrap();
            assert_eq!(reply.iter().count(), 1);
            assert!(reply.get(RESPONSE_KEY).is_some());
            responses += 1;
        }
        assert_eq!(responses, requests.len());
        assert_eq!(seen.load(Ordering::SeqCst), requests.len());
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_correlated() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();
        server
            .on_receive(|message: Message| async move {
                let echoed = message.get("Request").unwrap_or_default().to_string();
                Message::new().with(RESPONSE_KEY, echoed)
            })
            .unwrap();

        let sends = (0..16).map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let reply = client
                    .send(Message::new().with("Request", i.to_string()))
                    .await
                    .unwrap();
                (i, reply)
            })
        });
        for send in sends.collect::<Vec<_>>() {
            let (i, reply) = send.await.unwrap();
            assert_eq!(reply.get(RESPONSE_KEY), Some(i.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn test_requests_queue_until_handler_registered() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send(Message::new().with("Request", "early")).await }
        });
        tokio::task::yield_now().await;

        echo_ok(&server, Arc::new(AtomicUsize::new(0)));
        let reply = pending.await.unwrap().unwrap();
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));
    }

    #[tokio::test]
    async fn test_handler_registers_once() {
        let (_client, server) = Connection::pair(TokioGlobal, None).unwrap();
        echo_ok(&server, Arc::new(AtomicUsize::new(0)));

        let second = server.on_receive(|_| async { Message::new() });
        assert!(matches!(second, Err(Error::HandlerAlreadyRegistered)));
    }

    #[tokio::test]
    async fn test_panicking_handler_still_answers() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();
        server
            .on_receive(|message: Message| async move {
                if message.get("Request") == Some("explode") {
                    panic!("handler blew up");
                }
                Message::response(&Acknowledgement::Ok)
            })
            .unwrap();

        let reply = client
            .send(Message::new().with("Request", "explode"))
            .await
            .unwrap();
        assert_eq!(
            reply.get(RESPONSE_KEY),
            Some("Failed: request handler did not respond")
        );

        // The channel survives the fault.
        let reply = client.send(Message::new().with("Request", "calm")).await.unwrap();
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));
    }

    #[tokio::test]
    async fn test_undecodable_request_is_answered() {
        let (raw, peer) = UnixStream::pair().unwrap();
        let server = Connection::from_stream(peer, TokioGlobal, None);
        echo_ok(&server, Arc::new(AtomicUsize::new(0)));

        // Header for request id 9 followed by a payload that is not a map.
        let mut frame = Vec::new();
        let body = [&[0u8][..], &9u64.to_be_bytes(), &[0xc1]].concat();
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);

        let mut raw_writer = raw.clone();
        raw_writer.write_all(&frame).await.unwrap();

        let mut raw_reader = raw;
        let response = read_frame(&mut raw_reader).await.unwrap().unwrap();
        assert_eq!(response.kind, FrameKind::Response);
        assert_eq!(response.id, 9);
        let message = response.decode_message().unwrap();
        assert!(message.get(RESPONSE_KEY).unwrap().starts_with("Failed: "));
    }

    #[tokio::test]
    async fn test_send_times_out_when_configured() {
        let limit = Duration::from_millis(50);
        let (client, _server) = Connection::pair(TokioGlobal, Some(limit)).unwrap();

        // No handler on the server side, so the request is never answered.
        let result = client.send(Message::new().with("Request", "hello")).await;
        assert!(matches!(result, Err(Error::Timeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn test_ordered_handler_sees_arrival_order() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();
        let (seen_tx, seen_rx) = channel::unbounded();
        server
            .on_receive_ordered(move |message: Message| {
                let seen_tx = seen_tx.clone();
                async move {
                    let value = message.get("Request").unwrap_or_default().to_string();
                    if value == "slow" {
                        Timer::after(Duration::from_millis(50)).await;
                    }
                    if value == "explode" {
                        panic!("handler blew up");
                    }
                    let _ = seen_tx.send(value).await;
                    Message::response(&Acknowledgement::Ok)
                }
            })
            .unwrap();

        // zip polls the first send first, so "slow" is queued ahead of "fast".
        let (slow, fast) = future::zip(
            client.send(Message::new().with("Request", "slow")),
            client.send(Message::new().with("Request", "fast")),
        )
        .await;
        assert_eq!(slow.unwrap().get(RESPONSE_KEY), Some("OK"));
        assert_eq!(fast.unwrap().get(RESPONSE_KEY), Some("OK"));
        assert_eq!(seen_rx.recv().await.unwrap(), "slow");
        assert_eq!(seen_rx.recv().await.unwrap(), "fast");

        let reply = client
            .send(Message::new().with("Request", "explode"))
            .await
            .unwrap();
        assert_eq!(
            reply.get(RESPONSE_KEY),
            Some("Failed: request handler did not respond")
        );
        let reply = client.send(Message::new().with("Request", "after")).await.unwrap();
        assert_eq!(reply.get(RESPONSE_KEY), Some("OK"));
        assert_eq!(seen_rx.recv().await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_channel() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();
        let extra = client.clone();
        drop(client);
        assert!(!extra.is_closed());

        drop(extra);
        tokio::time::timeout(Duration::from_secs(5), server.closed())
            .await
            .unwrap();
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_peer_closes_fails() {
        let (client, server) = Connection::pair(TokioGlobal, None).unwrap();
        server.close();
        client.closed().await;

        assert!(client.is_closed());
        let result = client.send(Message::new().with("Request", "late")).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}

//! SSE relay from an upstream generation stream to the client.
//!
//! One task per request drains the upstream [`EventStream`] through a
//! [`Relay`] and forwards the resulting [`StreamEvent`]s over a bounded
//! channel. The SSE response body reads the other end, so a client that
//! disconnects closes the channel and the task drops the upstream stream.

use std::convert::Infallible;

use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;
use crate::upstream::{EventStream, UpstreamEvent};

/// Outbound channel depth. Small: deltas are tiny and the client should set the pace.
const RELAY_CHANNEL_CAPACITY: usize = 32;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// One outbound stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    Delta(String),
    Final(String),
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }

    /// Render as an SSE event: `data: {"delta": ...}`, with `event: error` on errors.
    pub fn to_sse(&self) -> Event {
        let data = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"encoding failed"}"#.to_string());
        let event = match self {
            StreamEvent::Error(_) => Event::default().event("error"),
            _ => Event::default(),
        };
        event.data(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Connected, nothing forwarded yet.
    Open,
    /// At least one delta forwarded.
    Streaming,
    /// Terminal event emitted.
    Closed,
}

/// Upstream-to-client translation state.
#[derive(Debug)]
pub struct Relay {
    state: RelayState,
    buffer: String,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        Self {
            state: RelayState::Open,
            buffer: String::new(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Advance on one upstream item, returning the event to forward, if any.
    ///
    /// Nothing is emitted once closed.
    pub fn on_item(&mut self, item: Result<UpstreamEvent, UpstreamError>) -> Option<StreamEvent> {
        if self.state == RelayState::Closed {
            return None;
        }

        match item {
            Ok(UpstreamEvent::TextDelta(delta)) if !delta.is_empty() => {
                self.buffer.push_str(&delta);
                self.state = RelayState::Streaming;
                Some(StreamEvent::Delta(delta))
            }
            Ok(UpstreamEvent::TextDelta(_)) => None,
            Ok(UpstreamEvent::Completed) => {
                self.state = RelayState::Closed;
                Some(StreamEvent::Final(std::mem::take(&mut self.buffer)))
            }
            Ok(UpstreamEvent::Other(kind)) => {
                debug!(kind, "Ignoring upstream event");
                None
            }
            Err(e) => Some(self.fail(e.to_string())),
        }
    }

    /// Upstream ended. Yields an error unless a terminal event was already sent.
    pub fn on_end(&mut self) -> Option<StreamEvent> {
        match self.state {
            RelayState::Closed => None,
            _ => Some(self.fail("upstream stream ended before completion".to_string())),
        }
    }

    /// Fail from any non-closed state.
    pub fn fail(&mut self, message: String) -> StreamEvent {
        self.state = RelayState::Closed;
        self.buffer.clear();
        StreamEvent::Error(message)
    }
}

/// Drain `upstream` through a [`Relay`] into `tx`.
///
/// Returns once a terminal event is sent or the receiver is gone. Waiting on
/// `upstream` races `tx.closed()`, so a silent upstream cannot outlive the
/// client. `upstream` is dropped on every exit path.
pub async fn run_relay(mut upstream: EventStream, tx: mpsc::Sender<StreamEvent>, request_id: String) {
    let mut relay = Relay::new();
    let mut deltas = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                info!(request_id, deltas, "Client disconnected, abandoning upstream stream");
                return;
            }
            item = upstream.next() => item,
        };
        let event = match next {
            Some(item) => relay.on_item(item),
            None => relay.on_end(),
        };
        let Some(event) = event else { continue };

        let terminal = event.is_terminal();
        match &event {
            StreamEvent::Delta(_) => deltas += 1,
            StreamEvent::Final(text) => info!(request_id, deltas, bytes = text.len(), "Stream completed"),
            StreamEvent::Error(message) => warn!(request_id, deltas, error = %message, "Stream failed"),
        }

        if tx.send(event).await.is_err() {
            info!(request_id, deltas, "Client disconnected, abandoning upstream stream");
            return;
        }
        if terminal {
            return;
        }
    }
}

/// Spawn the relay task and return the receiving end as a stream.
pub fn spawn_relay(upstream: EventStream, request_id: String) -> impl Stream<Item = StreamEvent> {
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    tokio::spawn(run_relay(upstream, tx, request_id));
    ReceiverStream::new(rx)
}

/// Stream made of a single error event, for failures before the upstream stream opened.
pub fn error_stream(message: String) -> impl Stream<Item = StreamEvent> {
    futures::stream::once(async move { StreamEvent::Error(message) })
}

/// Wrap outbound events in an SSE response with proxy buffering disabled.
pub fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let sse = Sse::new(events.map(|event| Ok::<_, Infallible>(event.to_sse())))
        .keep_alive(KeepAlive::default());

    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::stream;

    use super::*;

    fn upstream(items: Vec<Result<UpstreamEvent, UpstreamError>>) -> EventStream {
        stream::iter(items).boxed()
    }

    async fn relay_all(items: Vec<Result<UpstreamEvent, UpstreamError>>) -> Vec<StreamEvent> {
        spawn_relay(upstream(items), "test".into()).collect().await
    }

    #[tokio::test]
    async fn test_deltas_then_final() {
        let events = relay_all(vec![
            Ok(UpstreamEvent::Other("response.created".into())),
            Ok(UpstreamEvent::TextDelta("He".into())),
            Ok(UpstreamEvent::TextDelta(String::new())),
            Ok(UpstreamEvent::TextDelta("llo".into())),
            Ok(UpstreamEvent::Completed),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("He".into()),
                StreamEvent::Delta("llo".into()),
                StreamEvent::Final("Hello".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_mid_stream() {
        let events = relay_all(vec![
            Ok(UpstreamEvent::TextDelta("He".into())),
            Err(UpstreamError::Stream("connection reset".into())),
            Ok(UpstreamEvent::TextDelta("llo".into())),
            Ok(UpstreamEvent::Completed),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("He".into()),
                StreamEvent::Error("connection reset".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_ending_early_is_error() {
        let events = relay_all(vec![Ok(UpstreamEvent::TextDelta("partial".into()))]).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_stops_consuming_after_client_disconnect() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let endless: EventStream = stream::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(UpstreamEvent::TextDelta("x".into()))
        })
        .boxed();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        run_relay(endless, tx, "gone".into()).await;

        assert_eq!(pulled.load(Ordering::SeqCst), 0);
    }

    /// Flags its owner as released when dropped.
    struct ReleaseFlag(Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_silent_upstream_released_on_disconnect() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = ReleaseFlag(released.clone());

        // One delta, then the upstream goes quiet for good.
        let silent: EventStream = stream::once(async { Ok(UpstreamEvent::TextDelta("He".into())) })
            .chain(stream::pending())
            .map(move |item| {
                let _held = &flag;
                item
            })
            .boxed();

        let mut events = spawn_relay(silent, "silent".into());
        assert_eq!(events.next().await, Some(StreamEvent::Delta("He".into())));
        drop(events);

        let released_in_time = tokio::time::timeout(Duration::from_secs(2), async {
            while !released.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released_in_time.is_ok(), "upstream still held after client disconnect");
    }

    #[test]
    fn test_relay_states() {
        let mut relay = Relay::new();
        assert_eq!(relay.state(), RelayState::Open);

        assert_eq!(relay.on_item(Ok(UpstreamEvent::Other("response.in_progress".into()))), None);
        assert_eq!(relay.state(), RelayState::Open);

        relay.on_item(Ok(UpstreamEvent::TextDelta("a".into())));
        assert_eq!(relay.state(), RelayState::Streaming);

        assert_eq!(
            relay.on_item(Ok(UpstreamEvent::Completed)),
            Some(StreamEvent::Final("a".into()))
        );
        assert_eq!(relay.state(), RelayState::Closed);

        // Exactly one terminal event.
        assert_eq!(relay.on_item(Err(UpstreamError::Stream("late".into()))), None);
        assert_eq!(relay.on_end(), None);
    }

    #[test]
    fn test_event_json_shape() {
        assert_eq!(
            serde_json::to_string(&StreamEvent::Delta("He".into())).unwrap(),
            r#"{"delta":"He"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::Final("Hello".into())).unwrap(),
            r#"{"final":"Hello"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::Error("boom".into())).unwrap(),
            r#"{"error":"boom"}"#
        );
    }
}

// WebSocket server: accepts observers and bridges their frames to the event
// loop.

use std::fmt::Display;
use std::io;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use bunutan_core::broadcast::{next_connection_id, observer_queue, ObserverRx, ObserverTx};
use bunutan_core::{ConnectionId, Outbound};

/// Events emitted by the WebSocket server to the event loop.
#[derive(Debug)]
pub enum WsEvent {
    /// A client completed the handshake. Events sent on `outbound` are
    /// written to it as text frames.
    Connected {
        id: ConnectionId,
        addr: String,
        outbound: ObserverTx,
    },
    /// A text frame was received from a client (raw JSON string).
    Message { id: ConnectionId, text: String },
    /// A client's connection ended.
    Disconnected { id: ConnectionId },
}

/// Pause after an accept error that is not specific to one connection
/// (e.g. the process is out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// True for accept errors caused by a single peer, after which the next
/// accept can proceed immediately.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Accept connections on `listener` forever, forwarding their events
/// through `tx`. Each connection is served on its own task. Accept errors
/// are logged and the loop keeps going.
///
/// Returns when the event loop has gone away.
pub async fn run(listener: TcpListener, tx: mpsc::Sender<WsEvent>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_connection_error(&e) => {
                debug!("Connection dropped before accept: {e}");
                continue;
            }
            Err(e) => {
                warn!("Accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if tx.is_closed() {
            info!("Event loop closed, WebSocket server stopping");
            break;
        }
        let tx = tx.clone();
        tokio::spawn(async move {
            serve_connection(stream, addr.to_string(), tx).await;
        });
    }

    Ok(())
}

/// Handshake one TCP connection and pump its frames until it closes.
async fn serve_connection(stream: TcpStream, addr: String, tx: mpsc::Sender<WsEvent>) {
    debug!("Accepted TCP connection from {addr}");

    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let id = next_connection_id();
    let (outbound_tx, outbound_rx) = observer_queue();
    if tx
        .send(WsEvent::Connected {
            id,
            addr: addr.clone(),
            outbound: outbound_tx,
        })
        .await
        .is_err()
    {
        return;
    }
    info!(conn_id = id, "WebSocket client connected from {addr}");

    let (write, read) = ws_stream.split();
    let mut writer = tokio::spawn(forward_outbound(outbound_rx, write, id));

    // The writer ends first when the event loop drops this observer.
    tokio::select! {
        _ = process_message_stream(read, &tx, id) => {}
        _ = &mut writer => {
            info!(conn_id = id, "Outbound queue closed, dropping connection");
        }
    }
    let _ = tx.send(WsEvent::Disconnected { id }).await;
    writer.abort();

    info!(conn_id = id, "WebSocket client {addr} disconnected");
}

/// Process raw WebSocket [`Message`] items from any [`Stream`], forwarding
/// text payloads through `tx`. Returns `Err(())` if the channel is closed
/// (receiver dropped), signalling the caller to stop.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    id: ConnectionId,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    id,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!(conn_id = id, "Client sent close frame");
                break;
            }
            Err(e) => {
                warn!(conn_id = id, "WebSocket error: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

/// Serialize queued events and write them to `sink` as text frames until the
/// queue closes or a write fails.
pub async fn forward_outbound<S>(
    mut rx: ObserverRx,
    mut sink: S,
    id: ConnectionId,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(event) = rx.recv().await {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(conn_id = id, "Failed to serialize outbound event: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!(conn_id = id, "Failed to write to client: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Helper: create a stream of Message results from a vec.
    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    /// Helper: unwrap a `WsEvent::Message`, checking its connection id.
    fn text_of(event: WsEvent, expected_id: ConnectionId) -> String {
        match event {
            WsEvent::Message { id, text } => {
                assert_eq!(id, expected_id);
                text
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_message_forwarded_to_channel() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![Ok(Message::Text("hello".into()))];

        process_message_stream(mock_stream(messages), &tx, 7)
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap(), 7), "hello");
    }

    #[tokio::test]
    async fn multiple_messages_forwarded_in_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text(r#"{"type":"connect"}"#.into())),
            Ok(Message::Text(r#"{"type":"query_pool"}"#.into())),
            Ok(Message::Text(r#"{"type":"draw","identity":"Jena"}"#.into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 1)
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap(), 1), r#"{"type":"connect"}"#);
        assert_eq!(text_of(rx.recv().await.unwrap(), 1), r#"{"type":"query_pool"}"#);
        assert_eq!(
            text_of(rx.recv().await.unwrap(), 1),
            r#"{"type":"draw","identity":"Jena"}"#
        );
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("before_close".into())),
            Ok(Message::Close(None)),
            Ok(Message::Text("after_close_should_not_appear".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 2)
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap(), 2), "before_close");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Text("before_error".into())),
            Err(WsError::ConnectionClosed),
            Ok(Message::Text("after_error_should_not_appear".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 3)
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap(), 3), "before_error");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_and_ping_messages_are_ignored() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
            Ok(Message::Text("after_ignored".into())),
        ];

        process_message_stream(mock_stream(messages), &tx, 4)
            .await
            .unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap(), 4), "after_ignored");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn returns_err_when_channel_closed() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let messages = vec![Ok(Message::Text("orphan".into()))];

        let result = process_message_stream(mock_stream(messages), &tx, 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_stream_completes_normally() {
        let (tx, mut rx) = mpsc::channel(64);
        let messages: Vec<Result<Message, WsError>> = vec![];

        process_message_stream(mock_stream(messages), &tx, 6)
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    /// Helper: a sink that records every frame written to it.
    fn recording_sink(
        written: Arc<Mutex<Vec<Message>>>,
    ) -> impl Sink<Message, Error = Infallible> + Unpin {
        Box::pin(sink::unfold(written, |written, msg: Message| async move {
            written.lock().unwrap().push(msg);
            Ok::<_, Infallible>(written)
        }))
    }

    #[tokio::test]
    async fn outbound_events_written_as_json_text() {
        let (out_tx, out_rx) = observer_queue();
        out_tx.try_send(Outbound::notice("No items remaining!")).unwrap();
        out_tx
            .try_send(Outbound::Items {
                items: vec!["A".into()],
            })
            .unwrap();
        drop(out_tx);

        let written = Arc::new(Mutex::new(Vec::new()));
        forward_outbound(out_rx, recording_sink(written.clone()), 8).await;

        let texts: Vec<serde_json::Value> = written
            .lock()
            .unwrap()
            .iter()
            .map(|m| match m {
                Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                serde_json::json!({"type": "notice", "message": "No items remaining!"}),
                serde_json::json!({"type": "items", "items": ["A"]}),
            ]
        );
    }

    #[tokio::test]
    async fn writer_stops_when_queue_closes() {
        let (out_tx, out_rx) = observer_queue();
        drop(out_tx);

        let written = Arc::new(Mutex::new(Vec::new()));
        forward_outbound(out_rx, recording_sink(written.clone()), 9).await;
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn per_peer_accept_errors_are_connection_errors() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
        ] {
            assert!(is_connection_error(&io::Error::from(kind)), "{kind:?}");
        }
        // EMFILE and friends surface as Other/Uncategorized; they back off.
        assert!(!is_connection_error(&io::Error::from_raw_os_error(24)));
        assert!(!is_connection_error(&io::Error::from(io::ErrorKind::OutOfMemory)));
    }

    #[tokio::test]
    async fn run_returns_once_event_loop_is_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let server = tokio::spawn(run(listener, tx));
        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("accept loop should stop")
            .unwrap()
            .unwrap();
    }
}

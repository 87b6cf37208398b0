// Application event loop.
//
// A single task owns the observer registry and drives the gateway. Events
// from every connection are handled one at a time in arrival order, so each
// reply or broadcast carries the state committed by the request that caused
// it, and observers are added or removed only between requests.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use bunutan_core::{Broadcaster, DrawEngine, Gateway, Response, Roster, Store};

use crate::config::Config;
use crate::ws_server::WsEvent;

/// The complete server-side state.
pub struct AppState {
    pub gateway: Gateway,
    pub observers: Broadcaster,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        AppState {
            gateway,
            observers: Broadcaster::new(),
        }
    }

    /// Build the roster, store and draw engine described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let roster = Roster::new(
            config.roster.admin.trim(),
            config
                .roster
                .participants
                .iter()
                .map(|p| p.trim().to_string())
                .collect(),
        );
        let store = Store::new(config.pool.items.clone());
        let engine = match config.draw.seed {
            Some(seed) => {
                info!(seed, "Using seeded draw engine");
                DrawEngine::seeded(seed)
            }
            None => DrawEngine::thread_rng(),
        };
        Self::new(Gateway::new(Arc::new(store), Arc::new(roster), engine))
    }

    /// Apply one server event.
    pub fn handle_event(&mut self, event: WsEvent) {
        match event {
            WsEvent::Connected { id, addr, outbound } => {
                debug!(conn_id = id, "Registering observer from {addr}");
                self.observers.register(id, outbound);
            }
            WsEvent::Message { id, text } => match self.gateway.handle_text(&text) {
                Response::Reply(event) => {
                    self.observers.send_to(id, event);
                }
                Response::Broadcast(event) => {
                    let delivered = self.observers.broadcast(&event);
                    debug!(conn_id = id, delivered, "State change broadcast");
                }
            },
            WsEvent::Disconnected { id } => {
                self.observers.unregister(id);
            }
        }
    }
}

/// Run the event loop until every sender of `ws_rx` is dropped.
pub async fn run(mut ws_rx: mpsc::Receiver<WsEvent>, mut state: AppState) -> anyhow::Result<()> {
    info!(
        items = state.gateway.store().seed().len(),
        roster = state.gateway.roster().len(),
        "Event loop started"
    );

    while let Some(event) = ws_rx.recv().await {
        state.handle_event(event);
    }

    info!("Event channel closed, event loop exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunutan_core::broadcast::{observer_queue, ObserverRx};
    use bunutan_core::draw::FixedRandomSource;
    use bunutan_core::{ConnectionId, Outbound};
    use std::collections::BTreeMap;

    fn test_state() -> AppState {
        let store = Arc::new(Store::new(vec!["A".into(), "B".into()]));
        let roster = Arc::new(Roster::new("admin", vec!["Jena".into(), "Rogie".into()]));
        let engine = DrawEngine::new(Arc::new(FixedRandomSource::first()));
        AppState::new(Gateway::new(store, roster, engine))
    }

    fn connect(
        state: &mut AppState,
        id: ConnectionId,
    ) -> ObserverRx {
        let (tx, rx) = observer_queue();
        state.handle_event(WsEvent::Connected {
            id,
            addr: format!("127.0.0.1:{}", 40000 + id),
            outbound: tx,
        });
        rx
    }

    fn send(state: &mut AppState, id: ConnectionId, text: &str) {
        state.handle_event(WsEvent::Message {
            id,
            text: text.into(),
        });
    }

    fn snapshot(assignments: &[(&str, &str)], items: &[&str]) -> Outbound {
        Outbound::Snapshot {
            assignments: assignments
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn connect_request_answers_only_requester() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        send(&mut state, 1, r#"{"type":"connect"}"#);
        assert_eq!(a.try_recv().unwrap(), snapshot(&[], &["A", "B"]));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn connecting_alone_sends_nothing() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        assert!(a.try_recv().is_err());
        assert_eq!(state.observers.len(), 1);
    }

    #[test]
    fn query_pool_answers_only_requester() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        send(&mut state, 2, r#"{"type":"query_pool"}"#);
        assert_eq!(
            b.try_recv().unwrap(),
            Outbound::Items {
                items: vec!["A".into(), "B".into()]
            }
        );
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn draw_broadcasts_to_everyone() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        send(&mut state, 1, r#"{"type":"draw","identity":"Jena"}"#);
        let expected = snapshot(&[("Jena", "A")], &["B"]);
        assert_eq!(a.try_recv().unwrap(), expected);
        assert_eq!(b.try_recv().unwrap(), expected);
    }

    #[test]
    fn rejected_draw_notifies_only_requester() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        send(&mut state, 2, r#"{"type":"draw","identity":"Bob"}"#);
        assert_eq!(
            b.try_recv().unwrap(),
            Outbound::notice("Bob is not allowed to pick.")
        );
        assert!(b.try_recv().is_err());
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn reset_requires_admin() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        send(&mut state, 1, r#"{"type":"draw","identity":"Jena"}"#);
        let _ = a.try_recv();
        let _ = b.try_recv();

        send(&mut state, 2, r#"{"type":"reset","identity":"Rogie"}"#);
        assert_eq!(
            b.try_recv().unwrap(),
            Outbound::notice("Rogie is not allowed to reset.")
        );
        assert!(a.try_recv().is_err());

        send(&mut state, 2, r#"{"type":"reset","identity":"admin"}"#);
        let expected = snapshot(&[], &["A", "B"]);
        assert_eq!(a.try_recv().unwrap(), expected);
        assert_eq!(b.try_recv().unwrap(), expected);
    }

    #[test]
    fn disconnected_observer_misses_later_broadcasts() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        state.handle_event(WsEvent::Disconnected { id: 2 });
        send(&mut state, 1, r#"{"type":"draw","identity":"Jena"}"#);

        assert!(a.try_recv().is_ok());
        // The observer's sender was dropped on unregister.
        assert!(matches!(
            b.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn malformed_frame_gets_private_notice() {
        let mut state = test_state();
        let mut a = connect(&mut state, 1);
        let mut b = connect(&mut state, 2);

        send(&mut state, 1, "hello?");
        match a.try_recv().unwrap() {
            Outbound::Notice { message } => assert!(message.starts_with("Malformed request")),
            other => panic!("expected notice, got {other:?}"),
        }
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn from_config_uses_configured_roster_and_items() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 5000

[roster]
admin = " boss "
participants = [" Jena "]

[pool]
items = ["X", "Y"]

[draw]
seed = 3
"#,
        )
        .unwrap();
        let state = AppState::from_config(&config);
        let roster = state.gateway.roster();
        assert!(roster.is_administrator("BOSS"));
        assert!(roster.is_authorized_to_draw("jena"));
        assert_eq!(state.gateway.store().seed(), &["X".to_string(), "Y".to_string()]);
    }

    #[tokio::test]
    async fn event_loop_processes_events_until_channel_closes() {
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = observer_queue();
        let handle = tokio::spawn(run(ws_rx, test_state()));

        ws_tx
            .send(WsEvent::Connected {
                id: 1,
                addr: "127.0.0.1:1".into(),
                outbound: out_tx,
            })
            .await
            .unwrap();
        ws_tx
            .send(WsEvent::Message {
                id: 1,
                text: r#"{"type":"draw","identity":"rogie"}"#.into(),
            })
            .await
            .unwrap();

        assert_eq!(
            out_rx.recv().await.unwrap(),
            snapshot(&[("rogie", "A")], &["B"])
        );

        drop(ws_tx);
        handle.await.unwrap().unwrap();
    }
}

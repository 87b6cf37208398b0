// Core of the bunutan item draw: roster, shared pool/assignment store, draw
// engine, wire protocol, per-request gateway and state broadcaster.
//
// Nothing in this crate performs network I/O; the server crate wires it to
// WebSocket connections.

pub mod broadcast;
pub mod draw;
pub mod gateway;
pub mod protocol;
pub mod roster;
pub mod store;

pub use broadcast::{Broadcaster, ConnectionId};
pub use draw::{DrawEngine, RandomSource};
pub use gateway::{Gateway, RequestError, Response};
pub use protocol::{Intent, Outbound};
pub use roster::{Participant, Roster};
pub use store::{Assignment, DrawError, Snapshot, Store};

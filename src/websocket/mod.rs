//! WebSocket Relay
//!
//! Long-lived sockets from field devices and dashboard consumers.
//!
//! ## Architecture
//!
//! - **ConnectionRegistry**: every open socket, its role, and consumer keys
//! - **Relay**: classifies frames per role, persists readings, fans out
//! - **Handler**: WebSocket upgrade and per-connection read/write loop
//! - **Messages**: the JSON frames on the wire
//!
//! ## Protocol
//!
//! A connection is anonymous until it announces a role:
//!
//! ```javascript
//! // Dashboard
//! const ws = new WebSocket('ws://localhost:3000');
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'init-frontend', frontendId: 'frontend-1234'}));
//! };
//! // every device reading arrives verbatim
//! ws.onmessage = (event) => console.log(JSON.parse(event.data));
//! // pump control goes to every device
//! ws.send(JSON.stringify({type: 'command', command: 'pump', value: 'on'}));
//! ```
//!
//! Devices announce with `{"type":"init-esp"}` and then send untagged
//! telemetry objects.

mod handler;
mod messages;
mod registry;
mod relay;

pub use handler::{root_handler, websocket_handler, ROOT_BANNER};
pub use messages::{ControlFrame, InboundMessage};
pub use registry::{
    Connection, ConnectionId, ConnectionRegistry, FrameSender, Peer, RegistryConfig,
    RegistryError, RegistryStats, Role,
};
pub use relay::{Dispatch, DropReason, Relay, RelayConfig};

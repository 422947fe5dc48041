//! # scribble-protocol
//!
//! Event vocabulary and wire codecs for the Scribble game server.
//!
//! Clients exchange JSON [`Envelope`]s over WebSocket text frames. Server
//! instances mirror room events to each other as MessagePack [`BusFrame`]s
//! on one pub/sub topic per room.
//!
//! ## Example
//!
//! ```rust
//! use scribble_protocol::{codec, Envelope, EventType};
//!
//! let env = Envelope::new(EventType::PlayerMove, serde_json::json!({"type": "guess", "text": "Elma"}));
//! let bytes = codec::encode_envelope(&env).unwrap();
//! assert_eq!(codec::decode_envelope(&bytes).unwrap(), env);
//! ```

pub mod bus;
pub mod codec;
pub mod event;
pub mod ids;

pub use bus::{BusFrame, FrameKind, Version, BUS_VERSION};
pub use codec::ProtocolError;
pub use event::{Envelope, EventType, RejectReason};
pub use ids::{InstanceId, RoomId, UserId};

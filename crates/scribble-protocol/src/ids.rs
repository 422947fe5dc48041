//! Identifiers shared by every layer of the server.
//!
//! Rooms, users and server instances are named by UUIDs. They serialize as
//! plain UUID strings in JSON so clients never see the newtype wrappers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a room.
    RoomId
);

uuid_id!(
    /// Identifier of an authenticated user.
    UserId
);

uuid_id!(
    /// Identifier of one server process on the pub/sub bus.
    InstanceId
);

impl RoomId {
    /// The pub/sub topic carrying this room's events.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("room:{}", self.0)
    }
}

impl UserId {
    /// Fallback display name used when the gateway supplies none.
    #[must_use]
    pub fn default_display_name(&self) -> String {
        let simple = self.0.simple().to_string();
        format!("User-{}", &simple[..4])
    }
}

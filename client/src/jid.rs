//! Chat endpoint identifiers.
//!
//! A JID has the shape `user[.device]@domain`. The domain distinguishes
//! the user space (`s.whatsapp.net`), groups (`g.us`), the legacy
//! consumer space (`c.us`) and broadcast lists. Bare domain JIDs (empty
//! user) identify the server itself.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Primary user domain.
pub const USER_SERVER: &str = "s.whatsapp.net";
/// Group domain.
pub const GROUP_SERVER: &str = "g.us";
/// Legacy consumer domain; normalizes to [`USER_SERVER`].
pub const CONSUMER_SERVER: &str = "c.us";
/// Broadcast-list domain.
pub const BROADCAST_SERVER: &str = "broadcast";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    /// Local part; empty for bare server JIDs.
    pub user: String,
    /// Device qualifier for multi-device endpoints.
    pub device: Option<u16>,
    /// Domain part.
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    /// A user-space JID qualified with a specific device.
    pub fn device(user: impl Into<String>, device: u16) -> Self {
        Self {
            user: user.into(),
            device: Some(device),
            server: USER_SERVER.to_string(),
        }
    }

    /// The bare server endpoint of the user space.
    pub fn server() -> Self {
        Self::new("", USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_user(&self) -> bool {
        self.server == USER_SERVER || self.server == CONSUMER_SERVER
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    /// True for bare domain JIDs such as `s.whatsapp.net`.
    pub fn is_server(&self) -> bool {
        self.user.is_empty()
    }

    /// Same endpoint ignoring the device qualifier and the legacy
    /// consumer/user domain split.
    pub fn same_user(&self, other: &Jid) -> bool {
        !self.user.is_empty()
            && self.user == other.user
            && normalized_server(&self.server) == normalized_server(&other.server)
    }

    /// Canonical device-free form: consumer JIDs map into the user space.
    pub fn normalized(&self) -> Jid {
        Jid {
            user: self.user.clone(),
            device: None,
            server: normalized_server(&self.server).to_string(),
        }
    }

    /// The same user addressed in the consumer domain.
    pub fn to_consumer(&self) -> Jid {
        Jid {
            user: self.user.clone(),
            device: None,
            server: CONSUMER_SERVER.to_string(),
        }
    }

    /// Device-specific encoding in the user space, defaulting to device 0.
    pub fn to_device_addressed(&self) -> Jid {
        Jid {
            user: self.user.clone(),
            device: Some(self.device.unwrap_or(0)),
            server: USER_SERVER.to_string(),
        }
    }
}

fn normalized_server(server: &str) -> &str {
    if server == CONSUMER_SERVER {
        USER_SERVER
    } else {
        server
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return f.write_str(&self.server);
        }
        match self.device {
            Some(device) => write!(f, "{}.{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, server) = match s.rsplit_once('@') {
            Some((local, server)) if !server.is_empty() => (local, server),
            // Bare domain form, e.g. `s.whatsapp.net` from server stanzas.
            None if s.contains('.') && !s.is_empty() => ("", s),
            _ => return Err(Error::protocol(format!("malformed jid: {s:?}"))),
        };

        let (user, device) = match local.rsplit_once('.') {
            Some((user, device)) => match device.parse::<u16>() {
                Ok(device) => (user.to_string(), Some(device)),
                // Dots inside the local part that are not device suffixes
                // are kept verbatim.
                Err(_) => (local.to_string(), None),
            },
            None => (local.to_string(), None),
        };

        Ok(Jid {
            user,
            device,
            server: server.to_string(),
        })
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use crate::consts::TCP_CHANNEL_PREFIX;
use crate::errors::{ChannelError, ChannelResult};
use crate::utils::UniqueId;

/// <sup>[`serde`](https://serde.rs)</sup>
/// Named endpoint of a duplex channel.
///
/// Channel names are strings unique within the local host:
///
/// * `tcp://<ip>:<port>` is a loopback TCP endpoint;
/// * anything else is a Unix socket path (only on Unix-like systems).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddr {
    /// <sup>`unix`</sup>
    /// Unix socket.
    #[cfg(unix)]
    Sock(PathBuf),
    /// Loopback TCP socket.
    Tcp(SocketAddr),
}

impl ChannelAddr {
    /// Parses a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidName`] if name is empty, or refers to a non-loopback or
    /// malformed TCP address, or is a socket path on a platform without Unix sockets.
    pub fn parse(name: &str) -> ChannelResult<Self> {
        if let Some(addr) = name.strip_prefix(TCP_CHANNEL_PREFIX) {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|_| ChannelError::InvalidName(name.to_string()))?;
            if !addr.ip().is_loopback() {
                return Err(ChannelError::InvalidName(name.to_string()));
            }
            return Ok(ChannelAddr::Tcp(addr));
        }

        if name.trim().is_empty() {
            return Err(ChannelError::InvalidName(name.to_string()));
        }

        #[cfg(unix)]
        return Ok(ChannelAddr::Sock(PathBuf::from(name)));
        #[cfg(not(unix))]
        return Err(ChannelError::InvalidName(name.to_string()));
    }

    /// Channel name, as accepted by [`parse`](Self::parse).
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl Default for ChannelAddr {
    #[cfg(unix)]
    fn default() -> Self {
        ChannelAddr::Sock(PathBuf::from(crate::consts::DEFAULT_CHANNEL_NAME))
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        ChannelAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 52100)))
    }
}

impl FromStr for ChannelAddr {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for ChannelAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            ChannelAddr::Sock(path) => write!(f, "{}", path.display()),
            ChannelAddr::Tcp(addr) => write!(f, "{TCP_CHANNEL_PREFIX}{addr}"),
        }
    }
}

impl Debug for ChannelAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// <sup>[`serde`](https://serde.rs)</sup>
/// Role of a process in a channel.
///
/// The first process that creates a channel name in [`Role::Server`] owns the listening endpoint,
/// others connect to it in [`Role::Client`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Role {
    /// Listens for clients and serves them one at a time.
    Server,
    /// Connects to a server.
    #[default]
    Client,
}

/// Information about a channel.
///
/// Each listener and each connection gets its own identifier, which is used to tell them apart in
/// logs.
#[derive(Clone)]
pub struct ChannelInfo {
    id: UniqueId,
    addr: ChannelAddr,
    role: Role,
}

impl ChannelInfo {
    pub(crate) fn new(addr: ChannelAddr, role: Role) -> Self {
        Self {
            id: UniqueId::new(),
            addr,
            role,
        }
    }

    /// Channel identifier.
    pub fn id(&self) -> UniqueId {
        self.id
    }

    /// Channel address.
    pub fn addr(&self) -> &ChannelAddr {
        &self.addr
    }

    /// Role of this side of the channel.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl Debug for ChannelInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let role = match self.role {
            Role::Server => "Server",
            Role::Client => "Client",
        };
        write!(f, "{role} {} {}", self.addr, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_names() {
        let addr = ChannelAddr::parse("tcp://127.0.0.1:5000").unwrap();
        assert_eq!(addr, ChannelAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 5000))));
        assert_eq!(addr.name(), "tcp://127.0.0.1:5000");

        assert!(ChannelAddr::parse("tcp://10.0.0.1:5000").is_err());
        assert!(ChannelAddr::parse("tcp://localhost").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn socket_names() {
        let addr: ChannelAddr = "/tmp/midipipe-test.sock".parse().unwrap();
        assert_eq!(addr, ChannelAddr::Sock(PathBuf::from("/tmp/midipipe-test.sock")));
        assert_eq!(addr.name(), "/tmp/midipipe-test.sock");
        assert_eq!(ChannelAddr::default().name(), crate::consts::DEFAULT_CHANNEL_NAME);
    }

    #[test]
    fn empty_name_is_invalid() {
        assert!(matches!(
            ChannelAddr::parse(" "),
            Err(ChannelError::InvalidName(_))
        ));
    }

    #[test]
    fn infos_are_unique() {
        let addr = ChannelAddr::default();
        let info_1 = ChannelInfo::new(addr.clone(), Role::Server);
        let info_2 = ChannelInfo::new(addr, Role::Server);
        assert_ne!(info_1.id(), info_2.id());
    }
}

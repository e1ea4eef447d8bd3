use crate::channel::{ChannelAddr, Role};

/// <sup>[`serde`](https://serde.rs)</sup>
/// Session configuration.
///
/// Supplied by the consumer on every [`Bridge::start`](super::Bridge::start). With the `serde`
/// feature enabled, it can be persisted by an external settings store.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionConf {
    /// Channel address.
    pub addr: ChannelAddr,
    /// Role of this process.
    pub role: Role,
}

impl SessionConf {
    /// Creates configuration.
    pub fn new(addr: ChannelAddr, role: Role) -> Self {
        Self { addr, role }
    }

    /// Configuration of a server listening on `addr`.
    pub fn server(addr: ChannelAddr) -> Self {
        Self::new(addr, Role::Server)
    }

    /// Configuration of a client connecting to `addr`.
    pub fn client(addr: ChannelAddr) -> Self {
        Self::new(addr, Role::Client)
    }
}

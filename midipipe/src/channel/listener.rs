use std::io::ErrorKind;
use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::net::{UnixDatagram, UnixListener};
#[cfg(unix)]
use std::path::{Path, PathBuf};

use crate::channel::stream::Stream;
use crate::channel::{Channel, ChannelAddr, ChannelInfo, Role};
use crate::consts::ACCEPT_POOLING_INTERVAL;
use crate::errors::{ChannelError, ChannelResult};
use crate::utils::{Outcome, Signal};

/// Listening endpoint of a channel in [`Role::Server`].
///
/// The listener is non-blocking: [`accept`](Listener::accept) polls for clients and checks the
/// stop signal in between. A Unix socket file is removed when the listener is dropped.
pub struct Listener {
    info: ChannelInfo,
    inner: Inner,
}

enum Inner {
    #[cfg(unix)]
    Sock {
        listener: UnixListener,
        path: PathBuf,
    },
    Tcp(TcpListener),
}

impl Listener {
    /// Creates a listening endpoint.
    ///
    /// A Unix socket file which is left by a dead server is removed. The liveness check doesn't
    /// connect, so a server which still owns the socket sees no client.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AddrInUse`] if another server already listens on this address.
    pub fn bind(addr: &ChannelAddr) -> ChannelResult<Self> {
        let info = ChannelInfo::new(addr.clone(), Role::Server);

        let inner = match addr {
            #[cfg(unix)]
            ChannelAddr::Sock(path) => {
                let listener = match UnixListener::bind(path) {
                    Err(err) if err.kind() == ErrorKind::AddrInUse => {
                        remove_stale_socket(&info, path)?;
                        UnixListener::bind(path)
                    }
                    bound => bound,
                }
                .map_err(|err| in_use(addr, err))?;
                listener.set_nonblocking(true)?;
                Inner::Sock {
                    listener,
                    path: path.clone(),
                }
            }
            ChannelAddr::Tcp(socket_addr) => {
                let listener = TcpListener::bind(socket_addr).map_err(|err| in_use(addr, err))?;
                listener.set_nonblocking(true)?;
                Inner::Tcp(listener)
            }
        };

        log::debug!("[{info:?}] listening");
        Ok(Self { info, inner })
    }

    /// Information about the listening endpoint.
    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Waits for a client.
    ///
    /// Returns [`Outcome::Cancelled`] if `stop` is set before a client connects.
    pub fn accept(&self, stop: &Signal) -> ChannelResult<Outcome<Channel>> {
        loop {
            if stop.is_set() {
                return Ok(Outcome::Cancelled);
            }

            let accepted = match &self.inner {
                #[cfg(unix)]
                Inner::Sock { listener, .. } => {
                    listener.accept().map(|(stream, _)| Stream::sock(stream))
                }
                Inner::Tcp(listener) => listener.accept().map(|(stream, _)| Stream::tcp(stream)),
            };

            match accepted {
                Ok(stream) => {
                    let info = ChannelInfo::new(self.info.addr().clone(), Role::Server);
                    let channel = Channel::accepted(info, stream)?;
                    log::debug!("[{:?}] client accepted", channel.info());
                    return Ok(Outcome::Done(channel));
                }
                Err(err) => match err.kind() {
                    ErrorKind::WouldBlock => {
                        if stop.wait_timeout(ACCEPT_POOLING_INTERVAL) {
                            return Ok(Outcome::Cancelled);
                        }
                    }
                    ErrorKind::Interrupted | ErrorKind::ConnectionAborted => continue,
                    _ => return Err(err.into()),
                },
            }
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("info", &self.info).finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Inner::Sock { path, .. } = &self.inner {
            if let Err(err) = std::fs::remove_file(path) {
                log::warn!("[{:?}] can't remove socket file: {err}", self.info);
            }
        }
        log::debug!("[{:?}] stopped listening", self.info);
    }
}

fn in_use(addr: &ChannelAddr, err: std::io::Error) -> ChannelError {
    match err.kind() {
        ErrorKind::AddrInUse => ChannelError::AddrInUse(addr.name()),
        _ => err.into(),
    }
}

#[cfg(unix)]
fn remove_stale_socket(info: &ChannelInfo, path: &Path) -> ChannelResult<()> {
    // A datagram connect fails with `EPROTOTYPE` while a stream socket owns the path and with
    // `ECONNREFUSED` once nobody does. Nothing is queued on the owner.
    match UnixDatagram::unbound()?.connect(path) {
        Err(err) if err.kind() == ErrorKind::ConnectionRefused => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        _ => return Err(ChannelError::AddrInUse(info.addr().name())),
    }

    log::warn!("[{info:?}] removing stale socket file");
    std::fs::remove_file(path)?;
    Ok(())
}

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crate::channel::{ChannelAddr, ChannelInfo, Role};
use crate::consts::CHANNEL_IO_POOLING_INTERVAL;
use crate::errors::{ChannelError, ChannelResult};
use crate::utils::{Outcome, Signal};

/// Connected duplex channel.
///
/// Reads and writes race a stop [`Signal`]. Every blocking call on the underlying socket is bounded
/// by a short timeout, so once stop is set the operation returns [`Outcome::Cancelled`] without
/// any system call left pending.
///
/// A channel can be cloned with [`try_clone`](Self::try_clone) to read and write from different
/// threads.
pub struct Channel {
    info: Arc<ChannelInfo>,
    stream: Stream,
}

pub(super) enum Stream {
    #[cfg(unix)]
    Sock(UnixStream),
    Tcp(TcpStream),
}

impl Channel {
    /// Connects to a server in [`Role::Client`].
    ///
    /// Makes a single attempt bounded by the operating system's own connect timeout. Use
    /// [`connect_with`](Self::connect_with) to race the attempt against a stop signal.
    pub fn connect(addr: &ChannelAddr) -> ChannelResult<Self> {
        let stream = match addr {
            #[cfg(unix)]
            ChannelAddr::Sock(path) => Stream::Sock(UnixStream::connect(path)?),
            ChannelAddr::Tcp(addr) => Stream::Tcp(TcpStream::connect(addr)?),
        };
        Self::connected(addr, stream)
    }

    /// Connects to a server in [`Role::Client`] unless `stop` is set first.
    ///
    /// A TCP handshake that doesn't complete within
    /// [`CHANNEL_IO_POOLING_INTERVAL`](crate::consts::CHANNEL_IO_POOLING_INTERVAL) is retried
    /// until it succeeds, fails, or `stop` is set. A Unix socket connect either succeeds or fails
    /// immediately, so it is attempted once.
    ///
    /// # Errors
    ///
    /// Returns the error of the first attempt which failed for a reason other than a timeout.
    pub fn connect_with(addr: &ChannelAddr, stop: &Signal) -> ChannelResult<Outcome<Self>> {
        if stop.is_set() {
            return Ok(Outcome::Cancelled);
        }

        let stream = match addr {
            #[cfg(unix)]
            ChannelAddr::Sock(path) => Stream::Sock(UnixStream::connect(path)?),
            ChannelAddr::Tcp(addr) => loop {
                match TcpStream::connect_timeout(addr, CHANNEL_IO_POOLING_INTERVAL) {
                    Ok(stream) => break Stream::Tcp(stream),
                    Err(err) if is_retryable(&err) => {
                        if stop.is_set() {
                            log::debug!("[{addr}] connect cancelled");
                            return Ok(Outcome::Cancelled);
                        }
                    }
                    Err(err) => return Err(err.into()),
                }
            },
        };
        Self::connected(addr, stream).map(Outcome::Done)
    }

    fn connected(addr: &ChannelAddr, stream: Stream) -> ChannelResult<Self> {
        let channel = Self::new(ChannelInfo::new(addr.clone(), Role::Client), stream)?;
        log::debug!("[{:?}] connected", channel.info);
        Ok(channel)
    }

    pub(super) fn accepted(info: ChannelInfo, stream: Stream) -> ChannelResult<Self> {
        Self::new(info, stream)
    }

    fn new(info: ChannelInfo, stream: Stream) -> ChannelResult<Self> {
        stream.configure()?;
        Ok(Self {
            info: Arc::new(info),
            stream,
        })
    }

    /// Information about this channel.
    pub fn info(&self) -> &ChannelInfo {
        self.info.as_ref()
    }

    /// Reads available bytes into `buf`.
    ///
    /// Blocks until at least one byte is available or `stop` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PeerClosed`] when the remote side closed the channel.
    pub fn read(&mut self, buf: &mut [u8], stop: &Signal) -> ChannelResult<Outcome<usize>> {
        loop {
            if stop.is_set() {
                return Ok(Outcome::Cancelled);
            }

            match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => return Err(ChannelError::PeerClosed),
                Ok(n) => return Ok(Outcome::Done(n)),
                Err(err) if is_retryable(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Writes all of `bytes`.
    ///
    /// Blocks while the peer doesn't read, until `stop` is set. Returns [`Outcome::Cancelled`]
    /// only if nothing was written.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Interrupted`] if `stop` is set after part of `bytes` was written.
    /// The channel is left with a partial message and should be dropped.
    pub fn write(&mut self, bytes: &[u8], stop: &Signal) -> ChannelResult<Outcome<()>> {
        let mut written = 0;

        while written < bytes.len() {
            if stop.is_set() {
                if written > 0 {
                    log::trace!("[{:?}] write interrupted at {written}", self.info);
                    return Err(ChannelError::Interrupted);
                }
                return Ok(Outcome::Cancelled);
            }

            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(ChannelError::PeerClosed),
                Ok(n) => written += n,
                Err(err) if is_retryable(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Outcome::Done(()))
    }

    /// Creates another handle to the same channel.
    pub fn try_clone(&self) -> ChannelResult<Self> {
        let stream = match &self.stream {
            #[cfg(unix)]
            Stream::Sock(stream) => Stream::Sock(stream.try_clone()?),
            Stream::Tcp(stream) => Stream::Tcp(stream.try_clone()?),
        };
        Ok(Self {
            info: self.info.clone(),
            stream,
        })
    }

    /// Shuts down both directions of the channel.
    ///
    /// Affects all handles of this channel. The remote side observes
    /// [`ChannelError::PeerClosed`].
    pub fn shutdown(&self) {
        let result = match &self.stream {
            #[cfg(unix)]
            Stream::Sock(stream) => stream.shutdown(Shutdown::Both),
            Stream::Tcp(stream) => stream.shutdown(Shutdown::Both),
        };
        if let Err(err) = result {
            log::trace!("[{:?}] shutdown: {err}", self.info);
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("info", &self.info).finish()
    }
}

impl Stream {
    #[cfg(unix)]
    pub(super) fn sock(stream: UnixStream) -> Self {
        Stream::Sock(stream)
    }

    pub(super) fn tcp(stream: TcpStream) -> Self {
        Stream::Tcp(stream)
    }

    fn configure(&self) -> std::io::Result<()> {
        let timeout = Some(CHANNEL_IO_POOLING_INTERVAL);
        match self {
            #[cfg(unix)]
            Stream::Sock(stream) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)
            }
            Stream::Tcp(stream) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                stream.set_read_timeout(timeout)?;
                stream.set_write_timeout(timeout)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            Stream::Sock(stream) => stream.read(buf),
            Stream::Tcp(stream) => stream.read(buf),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        match self {
            #[cfg(unix)]
            Stream::Sock(stream) => stream.write(bytes),
            Stream::Tcp(stream) => stream.write(bytes),
        }
    }
}

fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    fn tcp_pair() -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = ChannelAddr::Tcp(listener.local_addr().unwrap());

        let client = Channel::connect(&addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        let server =
            Channel::accepted(ChannelInfo::new(addr, Role::Server), Stream::tcp(stream)).unwrap();

        (server, client)
    }

    #[test]
    fn bytes_are_transferred_in_order() {
        let (mut server, mut client) = tcp_pair();
        let stop = Signal::new();

        client.write(&[0x90, 0x40, 0x7f], &stop).unwrap();
        client.write(&[0x80, 0x40, 0x00], &stop).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while received.len() < 6 {
            let Outcome::Done(n) = server.read(&mut buf, &stop).unwrap() else {
                panic!("unexpected cancellation");
            };
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, vec![0x90, 0x40, 0x7f, 0x80, 0x40, 0x00]);
    }

    #[test]
    fn blocked_read_is_cancellable() {
        let (mut server, _client) = tcp_pair();
        let stop = Signal::new();

        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                server.read(&mut buf, &stop).unwrap()
            })
        };

        thread::sleep(Duration::from_millis(50));
        let stopped_at = Instant::now();
        stop.set();

        assert!(handle.join().unwrap().is_cancelled());
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn blocked_write_is_cancellable() {
        let (mut server, _client) = tcp_pair();
        let stop = Signal::new();

        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                let bytes = vec![0xf8u8; 64 * 1024 * 1024];
                server.write(&bytes, &stop)
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
        let stopped_at = Instant::now();
        stop.set();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(ChannelError::Interrupted)));
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn write_cancelled_before_start_sends_nothing() {
        let (mut server, mut client) = tcp_pair();
        let stop = Signal::new();
        stop.set();

        assert!(server.write(&[0x90, 0x40, 0x7f], &stop).unwrap().is_cancelled());
        server.write(&[0xfe], &Signal::new()).unwrap();

        let mut buf = [0u8; 16];
        let Outcome::Done(n) = client.read(&mut buf, &Signal::new()).unwrap() else {
            panic!("unexpected cancellation");
        };
        assert_eq!(&buf[..n], &[0xfe]);
    }

    #[test]
    fn connect_with_reaches_listening_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = ChannelAddr::Tcp(listener.local_addr().unwrap());

        let Outcome::Done(client) = Channel::connect_with(&addr, &Signal::new()).unwrap() else {
            panic!("unexpected cancellation");
        };
        assert_eq!(client.info().role(), Role::Client);
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn connect_with_is_cancellable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = ChannelAddr::Tcp(listener.local_addr().unwrap());
        let stop = Signal::new();
        stop.set();

        assert!(Channel::connect_with(&addr, &stop).unwrap().is_cancelled());
    }

    #[test]
    fn connect_with_reports_refused_connection() {
        let addr = crate::utils::test::tcp_addr();
        assert!(Channel::connect_with(&addr, &Signal::new()).is_err());
    }

    #[test]
    fn peer_close_is_detected() {
        let (mut server, client) = tcp_pair();
        drop(client);

        let mut buf = [0u8; 16];
        let result = server.read(&mut buf, &Signal::new());
        assert!(matches!(result, Err(ChannelError::PeerClosed)));
    }

    #[test]
    fn shutdown_affects_clones() {
        let (server, mut client) = tcp_pair();
        let server_clone = server.try_clone().unwrap();
        server_clone.shutdown();

        let mut buf = [0u8; 16];
        let result = client.read(&mut buf, &Signal::new());
        assert!(matches!(result, Err(ChannelError::PeerClosed)));
        drop(server);
    }
}

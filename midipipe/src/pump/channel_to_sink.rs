use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use crate::channel::{Channel, Role};
use crate::device::{DeviceId, DeviceSink};
use crate::errors::{DeviceResult, Fault};
use crate::pump::{need_to_report, FaultHandler};
use crate::utils::{Outcome, Signal};

/// Pump which reads a channel and transmits to a device.
///
/// While attached, a reader thread owns the channel. Reads are bounded by the sink slot size, so
/// each read is transmitted as a single chunk. A chunk which is still waiting for a free slot when
/// the reader is paused is kept and transmitted first after the reader resumes. With no device
/// open, the reader keeps draining the channel and discards the data, which lets the session
/// notice a closed peer.
pub struct ChannelToSink {
    sink: Arc<DeviceSink>,
    on_fault: FaultHandler,
    link: Option<Link>,
    failed: Arc<AtomicBool>,
}

struct Link {
    attention: Signal,
    state: LinkState,
}

enum LinkState {
    Idle(Parked),
    Running(Worker),
    Lost,
}

struct Worker {
    stop: Signal,
    handle: JoinHandle<Parked>,
}

/// Channel of a paused reader with a chunk it read but didn't transmit.
struct Parked {
    channel: Channel,
    pending: Vec<u8>,
}

struct Context {
    sink: Arc<DeviceSink>,
    forward: bool,
    role: Role,
    stop: Signal,
    attention: Signal,
    failed: Arc<AtomicBool>,
    on_fault: FaultHandler,
}

impl ChannelToSink {
    /// Creates a detached pump transmitting to `sink`.
    pub fn new(sink: DeviceSink, on_fault: FaultHandler) -> Self {
        Self {
            sink: Arc::new(sink),
            on_fault,
            link: None,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier of the output device.
    pub fn device(&self) -> DeviceId {
        self.sink.id()
    }

    /// Number of transmit slots currently submitted to the driver.
    pub fn in_flight(&self) -> usize {
        self.sink.in_flight()
    }

    /// Returns `true` if attached to a channel.
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Returns `true` if transfer failed since the last attach.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Switches output device.
    ///
    /// The reader thread is stopped while the device is replaced and restarted afterwards. Data
    /// already transmitted to the old device stays with it, a chunk read but not yet transmitted
    /// goes to the new one. If the device can't be opened, the error is returned and the pump
    /// keeps draining the channel.
    pub fn set_device(&mut self, id: DeviceId) -> DeviceResult<()> {
        self.pause();
        let result = self.sink.open(id);
        self.resume();
        result
    }

    /// Attaches to a channel and starts transfer.
    ///
    /// `attention` is set when the reader thread exits on its own.
    pub fn attach(&mut self, channel: Channel, attention: Signal) {
        self.detach();
        self.failed.store(false, Ordering::Release);
        self.link = Some(Link {
            attention,
            state: LinkState::Idle(Parked {
                channel,
                pending: Vec::new(),
            }),
        });
        self.resume();
    }

    /// Stops transfer and releases the channel.
    ///
    /// Blocks until the reader thread exits. Does nothing if detached.
    pub fn detach(&mut self) {
        self.pause();
        if let Some(link) = self.link.take() {
            if let LinkState::Idle(parked) = link.state {
                if !parked.pending.is_empty() {
                    log::debug!(
                        "[{:?}] dropped {} bytes not transmitted before detach",
                        parked.channel.info(),
                        parked.pending.len()
                    );
                }
                log::trace!("[{:?}] channel to sink detached", parked.channel.info());
            }
        }
    }

    fn pause(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let LinkState::Running(worker) = std::mem::replace(&mut link.state, LinkState::Lost) else {
            return;
        };

        worker.stop.set();
        match worker.handle.join() {
            Ok(parked) => link.state = LinkState::Idle(parked),
            Err(_) => {
                log::error!("channel to sink pump panicked");
                self.failed.store(true, Ordering::Release);
                link.attention.set();
            }
        }
    }

    fn resume(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let LinkState::Idle(parked) = std::mem::replace(&mut link.state, LinkState::Lost) else {
            return;
        };

        let stop = Signal::new();
        let ctx = Context {
            sink: self.sink.clone(),
            forward: self.sink.is_open(),
            role: parked.channel.info().role(),
            stop: stop.clone(),
            attention: link.attention.clone(),
            failed: self.failed.clone(),
            on_fault: self.on_fault.clone(),
        };
        let handle = thread::spawn(move || Self::run(parked, ctx));

        link.state = LinkState::Running(Worker { stop, handle });
    }

    fn run(parked: Parked, ctx: Context) -> Parked {
        let Parked {
            mut channel,
            mut pending,
        } = parked;
        log::trace!(
            "[{:?}] channel to sink started, forward: {}, pending: {}",
            channel.info(),
            ctx.forward,
            pending.len()
        );

        if !ctx.forward && !pending.is_empty() {
            log::debug!(
                "[{:?}] dropped {} bytes, no output device",
                channel.info(),
                pending.len()
            );
            pending.clear();
        }

        let mut buf = vec![0u8; ctx.sink.slot_size()];
        loop {
            if pending.is_empty() {
                let n = match channel.read(&mut buf, &ctx.stop) {
                    Ok(Outcome::Done(n)) => n,
                    Ok(Outcome::Cancelled) => break,
                    Err(err) => {
                        if !ctx.stop.is_set() {
                            if need_to_report(&err, ctx.role) {
                                ctx.fail(Fault::Channel(err));
                            } else {
                                log::debug!("[{:?}] peer closed", channel.info());
                                ctx.failed.store(true, Ordering::Release);
                            }
                        }
                        break;
                    }
                };

                if !ctx.forward {
                    continue;
                }
                pending.extend_from_slice(&buf[..n]);
            }

            // Single chunk: cancellation leaves nothing submitted
            match ctx.sink.send(&pending, &ctx.stop) {
                Ok(Outcome::Done(_)) => pending.clear(),
                Ok(Outcome::Cancelled) => break,
                Err(err) => {
                    if !ctx.stop.is_set() {
                        ctx.fail(Fault::OutputDevice(err));
                    }
                    pending.clear();
                    break;
                }
            }
        }

        if !ctx.stop.is_set() {
            ctx.attention.set();
        }
        log::trace!("[{:?}] channel to sink stopped", channel.info());
        Parked { channel, pending }
    }
}

impl Context {
    fn fail(&self, fault: Fault) {
        log::debug!("channel to sink failed: {fault}");
        self.failed.store(true, Ordering::Release);
        (self.on_fault)(fault);
    }
}

impl std::fmt::Debug for ChannelToSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelToSink")
            .field("sink", &self.sink)
            .field("attached", &self.is_attached())
            .field("failed", &self.has_failed())
            .finish()
    }
}

impl Drop for ChannelToSink {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::DEVICE_BUFFER_COUNT;
    use crate::device::{CompletionMode, VirtualBackend, VirtualOutput};
    use crate::errors::ChannelError;
    use crate::utils::lock;
    use crate::utils::test::{channel_pair, TIMEOUT};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Fixture {
        pump: ChannelToSink,
        output: VirtualOutput,
        faults: Arc<Mutex<Vec<Fault>>>,
    }

    fn fixture() -> Fixture {
        let backend = VirtualBackend::new();
        let output = backend.add_output("Synth");
        let faults = Arc::new(Mutex::new(Vec::new()));
        let on_fault: FaultHandler = {
            let faults = faults.clone();
            Arc::new(move |fault| lock(&faults).push(fault))
        };
        let pump = ChannelToSink::new(DeviceSink::new(Arc::new(backend)), on_fault);
        Fixture {
            pump,
            output,
            faults,
        }
    }

    #[test]
    fn bytes_are_forwarded_in_one_chunk() {
        let mut f = fixture();
        f.pump.set_device(f.output.id()).unwrap();

        let (server, mut client) = channel_pair();
        f.pump.attach(server, Signal::new());

        client.write(&[0x90, 0x40, 0x7f], &Signal::new()).unwrap();
        assert_eq!(f.output.wait_bytes(3, TIMEOUT), vec![0x90, 0x40, 0x7f]);
        assert_eq!(f.output.chunks(), vec![vec![0x90, 0x40, 0x7f]]);

        f.pump.detach();
        assert!(!f.pump.has_failed());
    }

    #[test]
    fn device_can_be_swapped_while_attached() {
        let backend = VirtualBackend::new();
        let output_1 = backend.add_output("Synth");
        let output_2 = backend.add_output("Drums");
        let mut pump = ChannelToSink::new(DeviceSink::new(Arc::new(backend)), Arc::new(|_| {}));

        let (server, mut client) = channel_pair();
        pump.set_device(output_1.id()).unwrap();
        pump.attach(server, Signal::new());

        client.write(&[0xf8], &Signal::new()).unwrap();
        assert_eq!(output_1.wait_bytes(1, TIMEOUT), vec![0xf8]);

        pump.set_device(output_2.id()).unwrap();
        assert!(!output_1.is_open());

        client.write(&[0xfa], &Signal::new()).unwrap();
        assert_eq!(output_2.wait_bytes(1, TIMEOUT), vec![0xfa]);
        assert_eq!(output_1.bytes(), vec![0xf8]);
    }

    #[test]
    fn closed_peer_is_silent_for_server() {
        let mut f = fixture();
        let (server, client) = channel_pair();
        let attention = Signal::new();
        f.pump.attach(server, attention.clone());

        drop(client);
        assert!(attention.wait_timeout(TIMEOUT));
        assert!(f.pump.has_failed());
        assert!(lock(&f.faults).is_empty());
    }

    #[test]
    fn closed_peer_is_reported_for_client() {
        let mut f = fixture();
        let (server, client) = channel_pair();
        let attention = Signal::new();
        f.pump.attach(client, attention.clone());

        drop(server);
        assert!(attention.wait_timeout(TIMEOUT));
        assert!(f.pump.has_failed());
        assert!(matches!(
            lock(&f.faults).as_slice(),
            [Fault::Channel(ChannelError::PeerClosed)]
        ));
    }

    #[test]
    fn detach_cancels_blocked_transmission() {
        let mut f = fixture();
        f.output.set_completion_mode(CompletionMode::Manual);
        f.pump.set_device(f.output.id()).unwrap();

        let (server, mut client) = channel_pair();
        let attention = Signal::new();
        f.pump.attach(server, attention.clone());

        for _ in 0..20 {
            client.write(&[0xf8], &Signal::new()).unwrap();
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(Duration::from_millis(100));
        assert!(f.pump.in_flight() > 0);
        assert!(f.pump.in_flight() <= DEVICE_BUFFER_COUNT);

        f.pump.detach();
        assert!(!attention.is_set());
        assert!(!f.pump.has_failed());
        assert!(lock(&f.faults).is_empty());
    }

    #[test]
    fn device_swap_keeps_chunk_waiting_for_slot() {
        let backend = VirtualBackend::new();
        let output_1 = backend.add_output("Synth");
        let output_2 = backend.add_output("Drums");
        output_1.set_completion_mode(CompletionMode::Manual);
        let mut pump = ChannelToSink::new(DeviceSink::new(Arc::new(backend)), Arc::new(|_| {}));

        let (server, mut client) = channel_pair();
        pump.set_device(output_1.id()).unwrap();
        pump.attach(server, Signal::new());

        let mut sent = Vec::new();
        for note in 0..DEVICE_BUFFER_COUNT as u8 {
            let message = [0x90, note, 0x40];
            client.write(&message, &Signal::new()).unwrap();
            sent.extend_from_slice(&message);
            thread::sleep(Duration::from_millis(2));
        }
        client.write(&[0x80, 0x11, 0x00], &Signal::new()).unwrap();
        sent.extend_from_slice(&[0x80, 0x11, 0x00]);
        thread::sleep(Duration::from_millis(100));

        pump.set_device(output_2.id()).unwrap();
        assert!(!output_1.is_open());

        let delivered = output_1.bytes();
        let rest = output_2.wait_bytes(sent.len() - delivered.len(), TIMEOUT);
        assert_eq!([delivered, rest].concat(), sent);
        assert!(output_2.bytes().ends_with(&[0x80, 0x11, 0x00]));
        assert!(!pump.has_failed());
    }
}

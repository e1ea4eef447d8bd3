use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, Role};
use crate::device::{DeviceId, DeviceSource};
use crate::errors::{ChannelError, DeviceResult, Fault};
use crate::pump::{need_to_report, FaultHandler};
use crate::utils::{lock, Signal};

/// Pump which writes messages received by a device to a channel.
///
/// Writes happen on the device delivery thread, one message at a time. After the first failed
/// write, messages are dropped until the pump is attached to a new channel.
pub struct SourceToChannel {
    source: Arc<DeviceSource>,
    link: Arc<Mutex<Option<Link>>>,
    stop: Option<Signal>,
    failed: Arc<AtomicBool>,
    on_fault: FaultHandler,
}

struct Link {
    channel: Channel,
    role: Role,
    stop: Signal,
    attention: Signal,
    interrupted: bool,
}

impl Link {
    fn fail(&self, err: ChannelError, on_fault: &FaultHandler) {
        if need_to_report(&err, self.role) {
            log::debug!("[{:?}] source to channel failed: {err}", self.channel.info());
            on_fault(Fault::Channel(err));
        } else {
            log::debug!("[{:?}] source to channel stopped: {err}", self.channel.info());
        }
        self.attention.set();
    }
}

impl SourceToChannel {
    /// Creates a detached pump receiving from `source`.
    pub fn new(source: DeviceSource, on_fault: FaultHandler) -> Self {
        let source = Arc::new(source);
        let link: Arc<Mutex<Option<Link>>> = Arc::new(Mutex::new(None));
        let failed = Arc::new(AtomicBool::new(false));

        source.set_on_message({
            let link = link.clone();
            let failed = failed.clone();
            let on_fault = on_fault.clone();
            move |bytes| {
                let mut link = lock(&link);
                let Some(link) = link.as_mut() else {
                    return;
                };
                if failed.load(Ordering::Acquire) {
                    return;
                }

                match link.channel.write(bytes, &link.stop) {
                    Ok(_) => {}
                    Err(ChannelError::Interrupted) => {
                        failed.store(true, Ordering::Release);
                        link.interrupted = true;
                    }
                    Err(_) if link.stop.is_set() => {}
                    Err(err) => {
                        failed.store(true, Ordering::Release);
                        link.fail(err, &on_fault);
                    }
                }
            }
        });

        Self {
            source,
            link,
            stop: None,
            failed,
            on_fault,
        }
    }

    /// Identifier of the input device.
    pub fn device(&self) -> DeviceId {
        self.source.id()
    }

    /// Returns `true` if attached to a channel.
    pub fn is_attached(&self) -> bool {
        self.stop.is_some()
    }

    /// Returns `true` if transfer failed since the last attach.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Switches input device.
    ///
    /// A write blocked on a peer which doesn't read is cancelled before the old device is stopped.
    /// If that write was cut mid-message, the pump fails with [`ChannelError::Interrupted`] the
    /// same way it fails on any other channel error. The new device starts delivering immediately
    /// if the pump is attached.
    pub fn set_device(&mut self, id: DeviceId) -> DeviceResult<()> {
        self.interrupt();
        self.source.open(id)?;
        if self.is_attached() && self.source.is_open() {
            self.source.start()?;
        }
        Ok(())
    }

    /// Attaches to a channel and starts receiving.
    ///
    /// A device that fails to start is reported, while the pump stays attached.
    pub fn attach(&mut self, channel: Channel, attention: Signal) {
        self.detach();
        self.failed.store(false, Ordering::Release);

        let stop = Signal::new();
        *lock(&self.link) = Some(Link {
            role: channel.info().role(),
            channel,
            stop: stop.clone(),
            attention,
            interrupted: false,
        });
        self.stop = Some(stop);

        if self.source.is_open() {
            if let Err(err) = self.source.start() {
                (self.on_fault)(Fault::InputDevice(err));
            }
        }
    }

    /// Stops the source while staying attached.
    ///
    /// The link gets a fresh stop signal, so writes resume once the source is started again.
    fn interrupt(&mut self) {
        if let Some(stop) = &self.stop {
            stop.set();
        }
        if let Err(err) = self.source.stop() {
            log::debug!("[{}] failed to stop input: {err}", self.source.id());
        }
        if self.stop.is_none() {
            return;
        }

        let stop = Signal::new();
        if let Some(link) = lock(&self.link).as_mut() {
            link.stop = stop.clone();
            if link.interrupted {
                link.interrupted = false;
                link.fail(ChannelError::Interrupted, &self.on_fault);
            }
        }
        self.stop = Some(stop);
    }

    /// Stops receiving and releases the channel.
    ///
    /// A write in progress is cancelled. Does nothing if detached.
    pub fn detach(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        stop.set();

        if let Err(err) = self.source.stop() {
            log::debug!("[{}] failed to stop input: {err}", self.source.id());
        }
        if let Some(link) = lock(&self.link).take() {
            log::trace!("[{:?}] source to channel detached", link.channel.info());
        }
    }
}

impl std::fmt::Debug for SourceToChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceToChannel")
            .field("source", &self.source)
            .field("attached", &self.is_attached())
            .field("failed", &self.has_failed())
            .finish()
    }
}

impl Drop for SourceToChannel {
    fn drop(&mut self) {
        self.detach();
        self.source.clear_on_message();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{VirtualBackend, VirtualInput};
    use crate::utils::test::{channel_pair, read_exact, TIMEOUT};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const HUGE_SYSEX_LEN: usize = 64 * 1024 * 1024;

    fn pump_with_input() -> (SourceToChannel, VirtualInput, Arc<Mutex<Vec<Fault>>>) {
        let (pump, backend, faults) = pump_with_backend();
        (pump, backend.add_input("Keys"), faults)
    }

    fn pump_with_backend() -> (SourceToChannel, VirtualBackend, Arc<Mutex<Vec<Fault>>>) {
        let backend = VirtualBackend::new();
        let faults = Arc::new(Mutex::new(Vec::new()));
        let on_fault: FaultHandler = {
            let faults = faults.clone();
            Arc::new(move |fault| lock(&faults).push(fault))
        };
        let pump = SourceToChannel::new(DeviceSource::new(Arc::new(backend.clone())), on_fault);
        (pump, backend, faults)
    }

    /// Floods the channel with a message the peer never reads.
    fn block_on_write(input: &VirtualInput) {
        assert!(input.send_long(&vec![0xf0; HUGE_SYSEX_LEN]));
        thread::sleep(Duration::from_millis(200));
    }

    #[test]
    fn messages_are_written_in_order() {
        let (mut pump, input, _) = pump_with_input();
        pump.set_device(input.id()).unwrap();
        assert!(!input.is_started());

        let (server, mut client) = channel_pair();
        pump.attach(server, Signal::new());
        assert!(input.is_started());

        input.send_short([0x90, 0x40, 0x7f]);
        input.send_short([0xc0, 0x05, 0x00]);
        input.send_long(&[0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7]);

        assert_eq!(
            read_exact(&mut client, 11),
            vec![0x90, 0x40, 0x7f, 0xc0, 0x05, 0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7]
        );

        pump.detach();
        assert!(!input.is_started());
    }

    #[test]
    fn device_attached_late_starts_immediately() {
        let (mut pump, input, _) = pump_with_input();
        let (server, mut client) = channel_pair();
        pump.attach(server, Signal::new());

        pump.set_device(input.id()).unwrap();
        assert!(input.is_started());

        input.send_short([0xb0, 0x07, 0x64]);
        assert_eq!(read_exact(&mut client, 3), vec![0xb0, 0x07, 0x64]);
    }

    #[test]
    fn closed_peer_is_reported_for_client() {
        let (mut pump, input, faults) = pump_with_input();
        pump.set_device(input.id()).unwrap();

        let (server, client) = channel_pair();
        let attention = Signal::new();
        pump.attach(client, attention.clone());
        drop(server);

        let deadline = std::time::Instant::now() + TIMEOUT;
        while !attention.is_set() && std::time::Instant::now() < deadline {
            input.send_short([0xf8, 0x00, 0x00]);
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(attention.is_set());
        assert!(pump.has_failed());
        assert!(matches!(
            lock(&faults).first(),
            Some(Fault::Channel(ChannelError::PeerClosed))
        ));
        assert_eq!(lock(&faults).len(), 1);
    }

    #[test]
    fn failed_start_is_reported() {
        let (mut pump, input, faults) = pump_with_input();
        pump.set_device(input.id()).unwrap();
        input.fail_start(true);

        let (server, _client) = channel_pair();
        pump.attach(server, Signal::new());

        assert!(pump.is_attached());
        assert!(matches!(
            lock(&faults).as_slice(),
            [Fault::InputDevice(_)]
        ));
    }

    #[test]
    fn switching_devices_keeps_link_writable() {
        let (mut pump, backend, _) = pump_with_backend();
        let keys = backend.add_input("Keys");
        let pads = backend.add_input("Pads");
        pump.set_device(keys.id()).unwrap();

        let (server, mut client) = channel_pair();
        pump.attach(server, Signal::new());
        keys.send_short([0x90, 0x40, 0x7f]);
        assert_eq!(read_exact(&mut client, 3), vec![0x90, 0x40, 0x7f]);

        pump.set_device(pads.id()).unwrap();
        assert!(!keys.is_started());
        assert!(pads.is_started());

        pads.send_short([0x99, 0x24, 0x7f]);
        assert_eq!(read_exact(&mut client, 3), vec![0x99, 0x24, 0x7f]);
        assert!(!pump.has_failed());
    }

    #[test]
    fn device_switch_cancels_blocked_write() {
        let (mut pump, input, faults) = pump_with_input();
        pump.set_device(input.id()).unwrap();

        let (server, _client) = channel_pair();
        let attention = Signal::new();
        pump.attach(server, attention.clone());
        block_on_write(&input);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = pump.set_device(DeviceId::None);
            let _ = tx.send((pump, result));
        });

        let (pump, result) = rx.recv_timeout(TIMEOUT).unwrap();
        assert!(result.is_ok());
        assert!(pump.is_attached());
        assert_eq!(pump.device(), DeviceId::None);
        assert!(!input.is_open());
        assert_eq!(pump.has_failed(), attention.is_set());
        assert!(lock(&faults).is_empty());
    }

    #[test]
    fn detach_cancels_blocked_write() {
        let (mut pump, input, faults) = pump_with_input();
        pump.set_device(input.id()).unwrap();

        let (server, _client) = channel_pair();
        pump.attach(server, Signal::new());
        block_on_write(&input);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            pump.detach();
            let _ = tx.send(pump);
        });

        let pump = rx.recv_timeout(TIMEOUT).unwrap();
        assert!(!pump.is_attached());
        assert!(!input.is_started());
        assert!(lock(&faults).is_empty());
    }
}

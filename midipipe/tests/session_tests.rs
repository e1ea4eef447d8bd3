use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use midipipe::channel::{Channel, ChannelAddr, Role};
use midipipe::device::{DeviceSink, DeviceSource, VirtualBackend, VirtualOutput};
use midipipe::errors::{ChannelError, Fault, SessionError};
use midipipe::pump::{ChannelToSink, FaultHandler, SourceToChannel};
use midipipe::session::{self, LinkState, Pumps, SessionState, StatusCell};
use midipipe::utils::{Outcome, Signal};

static INIT_LOGGER: Once = Once::new();
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Debug;
const TIMEOUT: Duration = Duration::from_secs(3);

fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder()
            // Suppress everything below `warn` for third-party modules
            .filter_level(log::LevelFilter::Warn)
            // Allow everything above `LOG_LEVEL` from current package
            .filter_module(env!("CARGO_PKG_NAME"), LOG_LEVEL)
            .is_test(true)
            .try_init();
    });
}

fn unused_addr() -> ChannelAddr {
    let port = portpicker::pick_unused_port().unwrap();
    ChannelAddr::parse(&format!("tcp://127.0.0.1:{port}")).unwrap()
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

struct Setup {
    pumps: Pumps,
    output: VirtualOutput,
    faults: Arc<Mutex<Vec<Fault>>>,
    on_fault: FaultHandler,
}

fn setup() -> Setup {
    init_logger();

    let backend = Arc::new(VirtualBackend::new());
    let output = backend.add_output("Synth");
    let faults = Arc::new(Mutex::new(Vec::new()));
    let on_fault: FaultHandler = {
        let faults = faults.clone();
        Arc::new(move |fault| faults.lock().unwrap().push(fault))
    };

    let pumps = Pumps::new(
        ChannelToSink::new(DeviceSink::new(backend.clone()), on_fault.clone()),
        SourceToChannel::new(DeviceSource::new(backend), on_fault.clone()),
    );
    pumps.to_sink.lock().unwrap().set_device(output.id()).unwrap();

    Setup {
        pumps,
        output,
        faults,
        on_fault,
    }
}

#[test]
fn server_walks_through_link_states() {
    let s = setup();
    let status = StatusCell::default();
    let addr = unused_addr();
    assert_eq!(status.get().state, SessionState::Idle);

    let mut server = session::start(
        &addr,
        Role::Server,
        &s.pumps,
        &status,
        s.on_fault.clone(),
        &Signal::new(),
    )
    .unwrap();
    assert_eq!(server.role(), Role::Server);
    assert_eq!(status.get().state, SessionState::Running);
    assert!(wait_until(|| status.get().link == Some(LinkState::Listening)));

    let mut peer = Channel::connect(&addr).unwrap();
    assert!(wait_until(|| status.get().link == Some(LinkState::Connected)));
    peer.write(&[0x80, 0x40, 0x00], &Signal::new()).unwrap();
    assert_eq!(s.output.wait_bytes(3, TIMEOUT), vec![0x80, 0x40, 0x00]);

    drop(peer);
    assert!(wait_until(|| status.get().link == Some(LinkState::Listening)));

    server.stop();
    assert_eq!(status.get().state, SessionState::Idle);
    assert_eq!(status.get().link, None);
    assert!(s.faults.lock().unwrap().is_empty());
}

#[test]
fn server_stop_interrupts_connected_client() {
    let s = setup();
    let status = StatusCell::default();
    let addr = unused_addr();

    let mut server = session::start(
        &addr,
        Role::Server,
        &s.pumps,
        &status,
        s.on_fault.clone(),
        &Signal::new(),
    )
    .unwrap();
    let mut peer = Channel::connect(&addr).unwrap();
    assert!(wait_until(|| status.get().link == Some(LinkState::Connected)));

    server.stop();
    server.stop();
    assert!(!s.pumps.to_sink.lock().unwrap().is_attached());

    let mut buf = [0u8; 16];
    let closed = matches!(
        peer.read(&mut buf, &Signal::new()),
        Err(ChannelError::PeerClosed)
    );
    assert!(closed);
}

#[test]
fn client_connects_to_listening_peer() {
    let s = setup();
    let status = StatusCell::default();
    let addr = unused_addr();
    let listener = midipipe::channel::Listener::bind(&addr).unwrap();

    let mut client = session::start(
        &addr,
        Role::Client,
        &s.pumps,
        &status,
        s.on_fault.clone(),
        &Signal::new(),
    )
    .unwrap();
    assert_eq!(client.role(), Role::Client);
    assert_eq!(status.get().link, Some(LinkState::Connected));

    let Outcome::Done(mut peer) = listener.accept(&Signal::new()).unwrap() else {
        panic!("unexpected cancellation");
    };
    peer.write(&[0xfc], &Signal::new()).unwrap();
    assert_eq!(s.output.wait_bytes(1, TIMEOUT), vec![0xfc]);

    client.stop();
    assert_eq!(status.get().state, SessionState::Idle);
    assert!(s.faults.lock().unwrap().is_empty());
}

#[test]
fn client_without_server_fails_to_start() {
    let s = setup();
    let status = StatusCell::default();
    let addr = unused_addr();

    let result = session::start(
        &addr,
        Role::Client,
        &s.pumps,
        &status,
        s.on_fault.clone(),
        &Signal::new(),
    );
    let Err(err) = result else {
        panic!("client must not connect");
    };
    assert!(matches!(err, SessionError::Connect { name, .. } if name == addr.name()));
    assert_eq!(status.get().state, SessionState::Idle);
    assert!(!s.pumps.to_sink.lock().unwrap().is_attached());
}

#[test]
fn cancelled_client_does_not_connect() {
    let s = setup();
    let status = StatusCell::default();
    let addr = unused_addr();
    let _listener = midipipe::channel::Listener::bind(&addr).unwrap();

    let cancel = Signal::new();
    cancel.set();
    let result = session::start(
        &addr,
        Role::Client,
        &s.pumps,
        &status,
        s.on_fault.clone(),
        &cancel,
    );

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(status.get().state, SessionState::Idle);
    assert!(!s.pumps.to_sink.lock().unwrap().is_attached());
    assert!(s.faults.lock().unwrap().is_empty());
}

#[test]
fn invalid_channel_names_are_rejected() {
    assert!(matches!(
        ChannelAddr::parse(""),
        Err(ChannelError::InvalidName(_))
    ));
    assert!(matches!(
        ChannelAddr::parse("tcp://10.0.0.1:5000"),
        Err(ChannelError::InvalidName(_))
    ));
    assert!(matches!(
        ChannelAddr::parse("tcp://localhost"),
        Err(ChannelError::InvalidName(_))
    ));
}

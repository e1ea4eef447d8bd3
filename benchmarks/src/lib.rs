#[cfg(feature = "capture")]
pub mod capture;
#[cfg(feature = "relay")]
pub mod relay;

use std::time::{Duration, Instant};

use midipipe::channel::ChannelAddr;

/// Picks a free loopback TCP channel.
pub fn unused_tcp_addr() -> ChannelAddr {
    let port = portpicker::pick_unused_port().unwrap();
    ChannelAddr::parse(&format!("tcp://127.0.0.1:{port}")).unwrap()
}

/// Logs throughput of a finished run.
pub fn report(name: &str, bytes: usize, started: Instant) {
    let elapsed = started.elapsed().max(Duration::from_micros(1));
    let rate = bytes as f64 / elapsed.as_secs_f64();
    log::info!("[{name}] {bytes} bytes in {elapsed:?}, {rate:.0} bytes/s");
}

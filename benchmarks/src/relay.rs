use std::time::{Duration, Instant};

use midipipe::channel::Channel;
use midipipe::prelude::*;
use midipipe::utils::Signal;

use crate::{report, unused_tcp_addr};

const TIMEOUT: Duration = Duration::from_secs(30);

/// Streams `n_messages` note messages from a raw peer to an output device of a server bridge.
pub fn benchmark_channel_to_output(n_messages: usize) {
    let backend = VirtualBackend::new();
    let output = backend.add_output("Benchmark Out");
    let addr = unused_tcp_addr();

    let bridge = Bridge::builder()
        .backend(backend)
        .on_channel_error(|err| log::warn!("channel error: {err}"))
        .on_output_error(|err| log::warn!("output error: {err}"))
        .build();
    bridge.set_output_device(output.id()).unwrap();
    bridge.start(SessionConf::server(addr.clone())).unwrap();

    let mut peer = Channel::connect(&addr).unwrap();
    let stop = Signal::new();
    let started = Instant::now();

    for i in 0..n_messages {
        let note = (i % 0x80) as u8;
        peer.write(&[0x90, note, 0x40], &stop).unwrap();
    }

    let total = n_messages * 3;
    let received = output.wait_bytes(total, TIMEOUT);
    report("channel_to_output", received.len(), started);
    log::info!(
        "[channel_to_output] {} chunks submitted",
        output.chunks().len()
    );

    if received.len() != total {
        log::warn!("[channel_to_output] lost {} bytes", total - received.len());
    }
    bridge.stop();
}

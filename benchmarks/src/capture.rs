use std::time::Instant;

use midipipe::channel::Listener;
use midipipe::prelude::*;
use midipipe::utils::{Outcome, Signal};

use crate::{report, unused_tcp_addr};

/// Delivers `n_messages` short messages and `n_sysex` long messages from an input device of a
/// client bridge to a raw peer.
pub fn benchmark_input_to_channel(n_messages: usize, n_sysex: usize) {
    let backend = VirtualBackend::new();
    let input = backend.add_input("Benchmark In");
    let addr = unused_tcp_addr();
    let listener = Listener::bind(&addr).unwrap();

    let bridge = Bridge::builder()
        .backend(backend)
        .on_channel_error(|err| log::warn!("channel error: {err}"))
        .on_input_error(|err| log::warn!("input error: {err}"))
        .build();
    bridge.set_input_device(input.id()).unwrap();
    bridge.start(SessionConf::client(addr)).unwrap();

    let Outcome::Done(mut peer) = listener.accept(&Signal::new()).unwrap() else {
        return;
    };

    let sysex: Vec<u8> = std::iter::once(0xf0)
        .chain((0..510).map(|i| (i % 0x80) as u8))
        .chain(std::iter::once(0xf7))
        .collect();
    let total = n_messages * 3 + n_sysex * sysex.len();

    let started = Instant::now();
    let sender = std::thread::spawn(move || {
        for i in 0..n_messages {
            input.send_short([0x80, (i % 0x80) as u8, 0x00]);
        }
        for _ in 0..n_sysex {
            input.send_long(&sysex);
        }
    });

    let stop = Signal::new();
    let mut buf = [0u8; 4096];
    let mut received = 0;
    while received < total {
        match peer.read(&mut buf, &stop) {
            Ok(Outcome::Done(n)) => received += n,
            Ok(Outcome::Cancelled) => break,
            Err(err) => {
                log::warn!("[input_to_channel] read failed: {err}");
                break;
            }
        }
    }
    report("input_to_channel", received, started);

    sender.join().unwrap();
    bridge.stop();
}

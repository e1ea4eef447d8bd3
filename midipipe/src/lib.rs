//! # MidiPipe
//!
//! A bridge between local MIDI device ports and a duplex byte-stream channel shared by two
//! processes. One process owns a physical or virtual MIDI port, the other wants its data. MidiPipe
//! relays bytes in both directions without interpreting them.
//!
//! The library is built around the following entities:
//!
//! * [`Bridge`](bridge::Bridge) is the entry point. It owns the selected input and output devices,
//!   runs a session, and delivers error notifications to a consumer-supplied
//!   [`TaskQueue`](bridge::TaskQueue).
//! * A session owns a [`Channel`](channel::Channel). In [`Role::Server`](channel::Role::Server) it
//!   listens for clients and serves them one by one, in [`Role::Client`](channel::Role::Client) it
//!   connects once.
//! * Two pumps move bytes. [`ChannelToSink`](pump::ChannelToSink) reads the channel on its own
//!   thread and transmits to a [`DeviceSink`](device::DeviceSink).
//!   [`SourceToChannel`](pump::SourceToChannel) writes whatever a
//!   [`DeviceSource`](device::DeviceSource) delivers.
//! * Device drivers are abstracted by the [`Backend`](device::Backend) trait. The crate ships an
//!   in-process [`VirtualBackend`](device::VirtualBackend) and, under the `midir` feature, a
//!   hardware backend.
//!
//! Every blocking operation races a stop [`Signal`](utils::Signal), so stopping a session never
//! hangs on a silent peer or a busy device.
//!
//! # Usage
//!
//! ```rust,no_run
//! use midipipe::prelude::*;
//!
//! let backend = VirtualBackend::new();
//! let output = backend.add_output("Synth");
//!
//! let bridge = Bridge::builder()
//!     .backend(backend.clone())
//!     .on_channel_error(|err| eprintln!("channel error: {err}"))
//!     .build();
//!
//! bridge.set_output_device(output.id()).unwrap();
//! bridge
//!     .start(SessionConf::server(ChannelAddr::parse("/tmp/midipipe.sock").unwrap()))
//!     .unwrap();
//! ```
//!
//! # Features
#![doc = document_features::document_features!()]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bridge;
pub mod channel;
pub mod consts;
pub mod device;
pub mod errors;
pub mod prelude;
pub mod pump;
pub mod session;
pub mod utils;

//! Hardware device driver based on [`midir`](https://docs.rs/midir).

use std::sync::{Arc, Mutex};

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::device::{
    Backend, CompletionHandler, DeliveryHandler, DeviceId, DeviceInfo, Incoming, InputPort,
    OutputPort, Rejected, Slot,
};
use crate::errors::{DeviceError, DeviceResult};
use crate::utils::lock;

const BACKEND_NAME: &str = "midir";

/// <sup>`midir`</sup>
/// Device driver for system MIDI ports.
///
/// Ports are identified by their index in the list reported by the system at the moment of
/// opening.
///
/// Transmission is synchronous: a submitted slot is written to the port and completed on the
/// submitting thread. Received messages are always delivered as [`Incoming::Long`].
#[derive(Clone, Debug)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    /// Creates a backend which registers itself in the system under `client_name`.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn midi_in(&self) -> DeviceResult<MidiInput> {
        let mut midi_in = MidiInput::new(&self.client_name)
            .map_err(|err| DeviceError::backend(BACKEND_NAME, err.to_string()))?;
        midi_in.ignore(Ignore::None);
        Ok(midi_in)
    }

    fn midi_out(&self) -> DeviceResult<MidiOutput> {
        MidiOutput::new(&self.client_name)
            .map_err(|err| DeviceError::backend(BACKEND_NAME, err.to_string()))
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

impl Backend for MidirBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn inputs(&self) -> Vec<DeviceInfo> {
        let Ok(midi_in) = self.midi_in() else {
            return Vec::new();
        };
        midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(idx, port)| {
                let name = midi_in.port_name(port).ok()?;
                Some(DeviceInfo::new(name, DeviceId::Port(idx as u32)))
            })
            .collect()
    }

    fn outputs(&self) -> Vec<DeviceInfo> {
        let Ok(midi_out) = self.midi_out() else {
            return Vec::new();
        };
        midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(idx, port)| {
                let name = midi_out.port_name(port).ok()?;
                Some(DeviceInfo::new(name, DeviceId::Port(idx as u32)))
            })
            .collect()
    }

    fn open_output(
        &self,
        id: DeviceId,
        on_done: CompletionHandler,
    ) -> DeviceResult<Box<dyn OutputPort>> {
        let midi_out = self.midi_out()?;
        let port = id
            .port()
            .and_then(|idx| midi_out.ports().get(idx as usize).cloned())
            .ok_or(DeviceError::NoSuchDevice(id))?;

        let conn = midi_out
            .connect(&port, &self.client_name)
            .map_err(|err| DeviceError::backend(BACKEND_NAME, err.to_string()))?;

        Ok(Box::new(MidirOutputPort { conn, on_done }))
    }

    fn open_input(
        &self,
        id: DeviceId,
        deliver: DeliveryHandler,
    ) -> DeviceResult<Box<dyn InputPort>> {
        let midi_in = self.midi_in()?;
        let port = id
            .port()
            .and_then(|idx| midi_in.ports().get(idx as usize).cloned())
            .ok_or(DeviceError::NoSuchDevice(id))?;

        let started = Arc::new(Mutex::new(false));
        let conn = midi_in
            .connect(
                &port,
                &self.client_name,
                {
                    let started = started.clone();
                    move |_, bytes, _| {
                        let started = lock(&started);
                        if *started {
                            deliver(Incoming::Long(bytes));
                        }
                    }
                },
                (),
            )
            .map_err(|err| DeviceError::backend(BACKEND_NAME, err.to_string()))?;

        Ok(Box::new(MidirInputPort {
            _conn: conn,
            started,
        }))
    }
}

struct MidirOutputPort {
    conn: MidiOutputConnection,
    on_done: CompletionHandler,
}

impl OutputPort for MidirOutputPort {
    fn prepare(&mut self, _: &Slot) -> DeviceResult<()> {
        Ok(())
    }

    fn submit(&mut self, slot: Slot) -> Result<(), Rejected> {
        match self.conn.send(slot.bytes()) {
            Ok(_) => {
                (self.on_done)(slot);
                Ok(())
            }
            Err(err) => Err(Rejected {
                slot,
                error: DeviceError::backend(BACKEND_NAME, err.to_string()),
            }),
        }
    }

    fn reset(&mut self) {}

    fn unprepare(&mut self, _: &Slot) {}
}

struct MidirInputPort {
    _conn: MidiInputConnection<()>,
    started: Arc<Mutex<bool>>,
}

impl InputPort for MidirInputPort {
    fn start(&mut self) -> DeviceResult<()> {
        *lock(&self.started) = true;
        Ok(())
    }

    fn stop(&mut self) -> DeviceResult<()> {
        *lock(&self.started) = false;
        Ok(())
    }
}

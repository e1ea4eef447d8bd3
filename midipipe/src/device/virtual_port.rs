//! In-process device driver.
//!
//! [`VirtualBackend`] hosts ports which exist only inside the current process. Output ports
//! record everything submitted to them and complete slots either immediately, on a driver thread,
//! or on demand. Input ports deliver whatever the caller injects through [`VirtualInput`].
//!
//! Failures can be injected on open, slot preparation, submission, and start.

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::consts::{DEVICE_BUFFER_COUNT, DEVICE_BUFFER_SIZE};
use crate::device::{
    Backend, CompletionHandler, DeliveryHandler, DeviceId, DeviceInfo, Incoming, InputPort,
    OutputPort, Rejected, Slot, SlotPool,
};
use crate::errors::{DeviceError, DeviceResult};
use crate::utils::{lock, Outcome, Signal};

const BACKEND_NAME: &str = "virtual";

/// Defines when a [`VirtualOutput`] returns submitted slots.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CompletionMode {
    /// Slots are completed as soon as possible by a driver thread.
    #[default]
    Immediate,
    /// Slots are completed by [`VirtualOutput::complete_one`] and [`VirtualOutput::complete_all`].
    Manual,
}

/// In-process device driver.
///
/// Clones share the same set of ports.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    inputs: Vec<VirtualInput>,
    outputs: Vec<VirtualOutput>,
}

impl VirtualBackend {
    /// Creates a backend without ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output port.
    pub fn add_output(&self, name: impl Into<String>) -> VirtualOutput {
        let mut registry = lock(&self.registry);
        let id = DeviceId::Port(registry.outputs.len() as u32);
        let output = VirtualOutput::new(DeviceInfo::new(name, id));
        registry.outputs.push(output.clone());
        output
    }

    /// Adds an input port.
    pub fn add_input(&self, name: impl Into<String>) -> VirtualInput {
        let mut registry = lock(&self.registry);
        let id = DeviceId::Port(registry.inputs.len() as u32);
        let input = VirtualInput::new(DeviceInfo::new(name, id));
        registry.inputs.push(input.clone());
        input
    }

    /// Returns output port handle.
    pub fn output(&self, id: DeviceId) -> Option<VirtualOutput> {
        let idx = id.port()? as usize;
        lock(&self.registry).outputs.get(idx).cloned()
    }

    /// Returns input port handle.
    pub fn input(&self, id: DeviceId) -> Option<VirtualInput> {
        let idx = id.port()? as usize;
        lock(&self.registry).inputs.get(idx).cloned()
    }
}

impl Backend for VirtualBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn inputs(&self) -> Vec<DeviceInfo> {
        lock(&self.registry)
            .inputs
            .iter()
            .map(|input| input.shared.info.clone())
            .collect()
    }

    fn outputs(&self) -> Vec<DeviceInfo> {
        lock(&self.registry)
            .outputs
            .iter()
            .map(|output| output.shared.info.clone())
            .collect()
    }

    fn open_output(
        &self,
        id: DeviceId,
        on_done: CompletionHandler,
    ) -> DeviceResult<Box<dyn OutputPort>> {
        let output = self.output(id).ok_or(DeviceError::NoSuchDevice(id))?;
        Ok(Box::new(VirtualOutputPort::open(output, on_done)?))
    }

    fn open_input(
        &self,
        id: DeviceId,
        deliver: DeliveryHandler,
    ) -> DeviceResult<Box<dyn InputPort>> {
        let input = self.input(id).ok_or(DeviceError::NoSuchDevice(id))?;
        Ok(Box::new(VirtualInputPort::open(input, deliver)?))
    }
}

impl Debug for VirtualBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("VirtualBackend")
            .field("inputs", &registry.inputs.len())
            .field("outputs", &registry.outputs.len())
            .finish()
    }
}

/// Handle to a virtual output port.
///
/// Inspects transmitted data and controls slot completion. Handles stay valid when the port is
/// closed and reopened.
#[derive(Clone)]
pub struct VirtualOutput {
    shared: Arc<OutputShared>,
}

struct OutputShared {
    info: DeviceInfo,
    state: Mutex<OutputState>,
    cond: Condvar,
}

#[derive(Default)]
struct OutputState {
    generation: u64,
    open: bool,
    mode: CompletionMode,
    on_done: Option<CompletionHandler>,
    pending: VecDeque<Slot>,
    chunks: Vec<Vec<u8>>,
    prepared: usize,
    fail_open: bool,
    fail_prepare_at: Option<usize>,
    fail_submit: bool,
}

impl VirtualOutput {
    fn new(info: DeviceInfo) -> Self {
        Self {
            shared: Arc::new(OutputShared {
                info,
                state: Mutex::new(OutputState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Port identifier.
    pub fn id(&self) -> DeviceId {
        self.shared.info.id()
    }

    /// Port description.
    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Returns `true` if port is opened by a sink.
    pub fn is_open(&self) -> bool {
        lock(&self.shared.state).open
    }

    /// Sets completion mode.
    pub fn set_completion_mode(&self, mode: CompletionMode) {
        lock(&self.shared.state).mode = mode;
        self.shared.cond.notify_all();
    }

    /// Completes the oldest pending slot.
    ///
    /// Returns `false` if there are no pending slots.
    pub fn complete_one(&self) -> bool {
        let mut state = lock(&self.shared.state);
        Self::complete_next(&mut state)
    }

    /// Completes all pending slots and returns their number.
    pub fn complete_all(&self) -> usize {
        let mut state = lock(&self.shared.state);
        let mut completed = 0;
        while Self::complete_next(&mut state) {
            completed += 1;
        }
        completed
    }

    /// Number of submitted slots which are not completed yet.
    pub fn pending(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    /// Number of slots currently prepared.
    pub fn prepared(&self) -> usize {
        lock(&self.shared.state).prepared
    }

    /// Chunks submitted so far, in submission order.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        lock(&self.shared.state).chunks.clone()
    }

    /// Concatenation of all submitted chunks.
    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.shared.state).chunks.concat()
    }

    /// Forgets submitted chunks.
    pub fn clear(&self) {
        lock(&self.shared.state).chunks.clear();
    }

    /// Waits until at least `len` bytes were submitted or `timeout` elapses.
    ///
    /// Returns all submitted bytes.
    pub fn wait_bytes(&self, len: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        loop {
            let received: usize = state.chunks.iter().map(Vec::len).sum();
            let now = Instant::now();
            if received >= len || now >= deadline {
                return state.chunks.concat();
            }
            state = self
                .shared
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Makes subsequent opening attempts fail.
    pub fn fail_open(&self, fail: bool) {
        lock(&self.shared.state).fail_open = fail;
    }

    /// Makes slot preparation fail once `count` slots are prepared.
    pub fn fail_prepare_at(&self, count: usize) {
        lock(&self.shared.state).fail_prepare_at = Some(count);
    }

    /// Makes subsequent submissions fail.
    pub fn fail_submit(&self, fail: bool) {
        lock(&self.shared.state).fail_submit = fail;
    }

    fn complete_next(state: &mut OutputState) -> bool {
        match (state.pending.pop_front(), state.on_done.clone()) {
            (Some(slot), Some(on_done)) => {
                on_done(slot);
                true
            }
            _ => false,
        }
    }
}

impl Debug for VirtualOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualOutput")
            .field("info", &self.shared.info)
            .finish_non_exhaustive()
    }
}

struct VirtualOutputPort {
    output: VirtualOutput,
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

impl VirtualOutputPort {
    fn open(output: VirtualOutput, on_done: CompletionHandler) -> DeviceResult<Self> {
        let generation = {
            let mut state = lock(&output.shared.state);
            if state.fail_open {
                return Err(DeviceError::backend(BACKEND_NAME, "output can't be opened"));
            }
            if state.open {
                return Err(DeviceError::backend(BACKEND_NAME, "output is busy"));
            }
            state.open = true;
            state.generation += 1;
            state.on_done = Some(on_done);
            state.generation
        };

        let driver = {
            let shared = output.shared.clone();
            thread::spawn(move || Self::drive(shared, generation))
        };

        Ok(Self {
            output,
            generation,
            driver: Some(driver),
        })
    }

    fn drive(shared: Arc<OutputShared>, generation: u64) {
        log::trace!("[{:?}] driver started", shared.info);

        let mut state = lock(&shared.state);
        while state.generation == generation {
            if state.mode == CompletionMode::Immediate && VirtualOutput::complete_next(&mut state) {
                continue;
            }
            state = shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        log::trace!("[{:?}] driver stopped", shared.info);
    }
}

impl OutputPort for VirtualOutputPort {
    fn prepare(&mut self, _: &Slot) -> DeviceResult<()> {
        let mut state = lock(&self.output.shared.state);
        if state.fail_prepare_at == Some(state.prepared) {
            return Err(DeviceError::backend(BACKEND_NAME, "out of driver memory"));
        }
        state.prepared += 1;
        Ok(())
    }

    fn submit(&mut self, slot: Slot) -> Result<(), Rejected> {
        let mut state = lock(&self.output.shared.state);
        if state.fail_submit {
            return Err(Rejected {
                slot,
                error: DeviceError::backend(BACKEND_NAME, "submission rejected"),
            });
        }

        state.chunks.push(slot.bytes().to_vec());
        state.pending.push_back(slot);
        self.output.shared.cond.notify_all();
        Ok(())
    }

    fn reset(&mut self) {
        self.output.complete_all();
    }

    fn unprepare(&mut self, _: &Slot) {
        let mut state = lock(&self.output.shared.state);
        state.prepared = state.prepared.saturating_sub(1);
    }
}

impl Drop for VirtualOutputPort {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.output.shared.state);
            if state.generation == self.generation {
                state.generation += 1;
                state.open = false;
                state.on_done = None;
                state.pending.clear();
            }
        }
        self.output.shared.cond.notify_all();

        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                log::error!("[{:?}] driver panicked", self.output.shared.info);
            }
        }
    }
}

/// Handle to a virtual input port.
///
/// Injects messages which are delivered to the source that opened the port. Messages injected
/// while the port is closed or not started are dropped.
#[derive(Clone)]
pub struct VirtualInput {
    shared: Arc<InputShared>,
}

struct InputShared {
    info: DeviceInfo,
    state: Mutex<InputState>,
    started: Mutex<bool>,
}

#[derive(Default)]
struct InputState {
    queue: Option<mpsc::Sender<Event>>,
    delivered: usize,
    fail_open: bool,
    fail_start: bool,
}

enum Event {
    Short(u32),
    Long(Vec<u8>),
}

impl VirtualInput {
    fn new(info: DeviceInfo) -> Self {
        Self {
            shared: Arc::new(InputShared {
                info,
                state: Mutex::new(InputState::default()),
                started: Mutex::new(false),
            }),
        }
    }

    /// Port identifier.
    pub fn id(&self) -> DeviceId {
        self.shared.info.id()
    }

    /// Port description.
    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Returns `true` if port is opened by a source.
    pub fn is_open(&self) -> bool {
        lock(&self.shared.state).queue.is_some()
    }

    /// Returns `true` if port delivers messages.
    pub fn is_started(&self) -> bool {
        *lock(&self.shared.started)
    }

    /// Injects a short message.
    ///
    /// Bytes are packed the way drivers deliver them, trailing bytes beyond the length implied by
    /// the status byte are discarded by the receiver. Returns `false` if the message was dropped.
    pub fn send_short(&self, bytes: [u8; 3]) -> bool {
        self.inject(Event::Short(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], 0,
        ])))
    }

    /// Injects a long message.
    ///
    /// The message is delivered in receive buffers of
    /// [`DEVICE_BUFFER_SIZE`](crate::consts::DEVICE_BUFFER_SIZE) bytes. Returns `false` if the
    /// message was dropped.
    pub fn send_long(&self, bytes: &[u8]) -> bool {
        self.inject(Event::Long(bytes.to_vec()))
    }

    /// Number of deliveries performed so far.
    pub fn delivered(&self) -> usize {
        lock(&self.shared.state).delivered
    }

    /// Makes subsequent opening attempts fail.
    pub fn fail_open(&self, fail: bool) {
        lock(&self.shared.state).fail_open = fail;
    }

    /// Makes subsequent start attempts fail.
    pub fn fail_start(&self, fail: bool) {
        lock(&self.shared.state).fail_start = fail;
    }

    fn inject(&self, event: Event) -> bool {
        if !self.is_started() {
            return false;
        }
        match lock(&self.shared.state).queue.as_ref() {
            Some(queue) => queue.send(event).is_ok(),
            None => false,
        }
    }
}

impl Debug for VirtualInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualInput")
            .field("info", &self.shared.info)
            .finish_non_exhaustive()
    }
}

struct VirtualInputPort {
    input: VirtualInput,
    delivery: Option<JoinHandle<()>>,
}

impl VirtualInputPort {
    fn open(input: VirtualInput, deliver: DeliveryHandler) -> DeviceResult<Self> {
        let (tx, rx) = mpsc::channel();
        {
            let mut state = lock(&input.shared.state);
            if state.fail_open {
                return Err(DeviceError::backend(BACKEND_NAME, "input can't be opened"));
            }
            if state.queue.is_some() {
                return Err(DeviceError::backend(BACKEND_NAME, "input is busy"));
            }
            state.queue = Some(tx);
        }
        *lock(&input.shared.started) = false;

        let delivery = {
            let shared = input.shared.clone();
            thread::spawn(move || Self::deliver(shared, rx, deliver))
        };

        Ok(Self {
            input,
            delivery: Some(delivery),
        })
    }

    fn deliver(shared: Arc<InputShared>, rx: mpsc::Receiver<Event>, deliver: DeliveryHandler) {
        log::trace!("[{:?}] delivery started", shared.info);

        let buffers = SlotPool::new(DEVICE_BUFFER_COUNT, DEVICE_BUFFER_SIZE);
        let never = Signal::new();

        for event in rx {
            let started = lock(&shared.started);
            if !*started {
                continue;
            }

            match event {
                Event::Short(packed) => {
                    deliver(Incoming::Short(packed));
                    lock(&shared.state).delivered += 1;
                }
                Event::Long(bytes) => {
                    for chunk in bytes.chunks(DEVICE_BUFFER_SIZE) {
                        let Ok(Outcome::Done(buffer)) = buffers.acquire(chunk, &never) else {
                            break;
                        };
                        deliver(Incoming::Long(buffer.bytes()));
                        lock(&shared.state).delivered += 1;
                        buffers.recycle(buffer);
                    }
                }
            }
        }

        log::trace!("[{:?}] delivery stopped", shared.info);
    }
}

impl InputPort for VirtualInputPort {
    fn start(&mut self) -> DeviceResult<()> {
        if lock(&self.input.shared.state).fail_start {
            return Err(DeviceError::backend(BACKEND_NAME, "input can't be started"));
        }
        *lock(&self.input.shared.started) = true;
        Ok(())
    }

    fn stop(&mut self) -> DeviceResult<()> {
        *lock(&self.input.shared.started) = false;
        Ok(())
    }
}

impl Drop for VirtualInputPort {
    fn drop(&mut self) {
        *lock(&self.input.shared.started) = false;
        lock(&self.input.shared.state).queue = None;

        if let Some(delivery) = self.delivery.take() {
            if delivery.join().is_err() {
                log::error!("[{:?}] delivery thread panicked", self.input.shared.info);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_enumerated() {
        let backend = VirtualBackend::new();
        backend.add_output("Synth");
        backend.add_output("Drums");
        backend.add_input("Keys");

        let outputs = backend.outputs();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].name(), "Drums");
        assert_eq!(outputs[1].id(), DeviceId::Port(1));
        assert_eq!(backend.inputs()[0].name(), "Keys");
    }

    #[test]
    fn unknown_port_is_rejected() {
        let backend = VirtualBackend::new();
        let result = backend.open_output(DeviceId::Port(3), Arc::new(|_| {}));
        assert!(matches!(result, Err(DeviceError::NoSuchDevice(_))));
    }

    #[test]
    fn port_is_exclusive() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("Keys");

        let port = backend.open_input(input.id(), Arc::new(|_| {})).unwrap();
        assert!(input.is_open());
        assert!(backend.open_input(input.id(), Arc::new(|_| {})).is_err());

        drop(port);
        assert!(!input.is_open());
    }

    #[test]
    fn messages_are_dropped_until_started() {
        let backend = VirtualBackend::new();
        let input = backend.add_input("Keys");

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let mut port = backend
            .open_input(
                input.id(),
                Arc::new(move |incoming| {
                    let message = match incoming {
                        Incoming::Short(packed) => packed.to_le_bytes().to_vec(),
                        Incoming::Long(bytes) => bytes.to_vec(),
                    };
                    lock(&tx).send(message).unwrap();
                }),
            )
            .unwrap();

        assert!(!input.send_short([0x90, 0x40, 0x7f]));

        port.start().unwrap();
        assert!(input.send_short([0x90, 0x40, 0x7f]));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            vec![0x90, 0x40, 0x7f, 0x00]
        );

        let long: Vec<u8> = (0..300).map(|i| i as u8).collect();
        assert!(input.send_long(&long));
        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.len(), DEVICE_BUFFER_SIZE);
        assert_eq!([first, second].concat(), long);
    }

    #[test]
    fn immediate_completion_runs_on_driver_thread() {
        let backend = VirtualBackend::new();
        let output = backend.add_output("Synth");
        let pool = Arc::new(SlotPool::new(1, 8));

        let mut port = {
            let pool = pool.clone();
            backend
                .open_output(
                    output.id(),
                    Arc::new(move |slot| {
                        pool.recycle(slot);
                    }),
                )
                .unwrap()
        };

        for message in [[0x90, 0x40, 0x7f], [0x80, 0x40, 0x00]] {
            let Outcome::Done(slot) = pool.acquire(&message, &Signal::new()).unwrap() else {
                panic!("unexpected cancellation");
            };
            port.submit(slot).unwrap();
        }

        assert_eq!(output.wait_bytes(6, Duration::from_secs(1)).len(), 6);
        assert_eq!(output.chunks().len(), 2);
    }
}

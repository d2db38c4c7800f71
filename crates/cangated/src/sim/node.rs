//! One simulated node running on its own thread.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::SIM_TARGET;
use super::sdo_server::{ObjectStore, SdoServer};
use crate::bus::sdo::{AbortCode, REQUEST_BASE, RESPONSE_BASE};
use crate::bus::{
    CanFrame, CanInterface, EMCY_BASE, HEARTBEAT_BASE, MappedObject, NMT_ID, NmtState, NodeId,
    SYNC_ID,
};
use crate::dictionary::{AccessType, ObjectDictionary};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

const ERROR_REGISTER: (u16, u8) = (0x1001, 0);
const STORE_INDEX: u16 = 0x1010;
const RESTORE_INDEX: u16 = 0x1011;
const HEARTBEAT_TIME: (u16, u8) = (0x1017, 0);
const SAVE_SIGNATURE: [u8; 4] = *b"save";
const LOAD_SIGNATURE: [u8; 4] = *b"load";

const TPDO_COMMUNICATION: u16 = 0x1800;
const TPDO_MAPPING: u16 = 0x1A00;
const TPDO_SLOTS: u16 = 512;
const COB_ID_INVALID: u32 = 0x8000_0000;

/// Requests the owning network sends to a node thread.
pub(super) enum Control {
    /// Transmit an emergency; a code with a zero high byte resets.
    Emergency {
        code: u16,
        register: u8,
        data: Vec<u8>,
    },
    Stop,
}

/// Owner side of a running node.
pub(super) struct NodeHandle {
    node: NodeId,
    control: mpsc::Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl NodeHandle {
    /// Starts the node thread; the node boots straight away.
    pub(super) fn spawn(
        node: NodeId,
        dictionary: ObjectDictionary,
        interface: Arc<dyn CanInterface>,
    ) -> io::Result<Self> {
        let (control, requests) = mpsc::channel();
        let simulated = SimulatedNode::new(node, dictionary, interface);
        let thread = thread::Builder::new()
            .name(format!("cangate-sim-{node}"))
            .spawn(move || simulated.run(&requests))?;
        Ok(Self {
            node,
            control,
            thread: Some(thread),
        })
    }

    pub(super) fn node(&self) -> NodeId {
        self.node
    }

    /// Queues a request; `false` when the thread has gone.
    pub(super) fn send(&self, request: Control) -> bool {
        self.control.send(request).is_ok()
    }

    pub(super) fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.control.send(Control::Stop);
        if thread.join().is_err() {
            warn!(target: SIM_TARGET, node = self.node.get(), "simulated node panicked");
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

type Objects = BTreeMap<(u16, u8), Vec<u8>>;

struct Timer {
    period: Duration,
    due: Instant,
}

impl Timer {
    fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            due: now + period,
        }
    }

    /// Whether the timer fired, rearming it when it did.
    fn fire(&mut self, now: Instant) -> bool {
        if now < self.due {
            return false;
        }
        self.due = now + self.period;
        true
    }
}

struct SimulatedNode {
    node: NodeId,
    interface: Arc<dyn CanInterface>,
    store: NodeObjects,
    state: NmtState,
    server: SdoServer,
    heartbeat: Option<Timer>,
    event_timers: HashMap<u16, Timer>,
    sync_counts: HashMap<u16, u8>,
}

impl SimulatedNode {
    fn new(node: NodeId, dictionary: ObjectDictionary, interface: Arc<dyn CanInterface>) -> Self {
        Self {
            node,
            interface,
            store: NodeObjects::new(node, dictionary),
            state: NmtState::Initialising,
            server: SdoServer::default(),
            heartbeat: None,
            event_timers: HashMap::new(),
            sync_counts: HashMap::new(),
        }
    }

    fn run(mut self, requests: &mpsc::Receiver<Control>) {
        self.boot_up();
        let mut failing = false;
        loop {
            loop {
                match requests.try_recv() {
                    Ok(Control::Emergency {
                        code,
                        register,
                        data,
                    }) => self.emergency(code, register, &data),
                    Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                        debug!(target: SIM_TARGET, node = self.node.get(), "simulated node stopped");
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
            match self.interface.recv_timeout(POLL_INTERVAL) {
                Ok(Some(frame)) => {
                    failing = false;
                    self.receive(&frame);
                }
                Ok(None) => failing = false,
                Err(error) => {
                    if !failing {
                        warn!(target: SIM_TARGET, node = self.node.get(), %error, "simulated node receive failed");
                    }
                    failing = true;
                    thread::sleep(ERROR_BACKOFF);
                }
            }
            self.tick(Instant::now());
        }
    }

    fn receive(&mut self, frame: &CanFrame) {
        let id = frame.id();
        if id == NMT_ID {
            self.network_command(frame.data());
        } else if id == SYNC_ID {
            self.sync();
        } else if id == REQUEST_BASE + u32::from(self.node.get()) {
            if self.state == NmtState::Stopped {
                return;
            }
            let responses = self.server.handle(&frame.padded(), &mut self.store);
            for response in responses {
                self.transmit(RESPONSE_BASE + u32::from(self.node.get()), &response);
            }
            self.apply_side_effects();
        }
    }

    fn network_command(&mut self, data: &[u8]) {
        let [specifier, target, ..] = *data else {
            return;
        };
        if target != 0 && target != self.node.get() {
            return;
        }
        let Some(state) = NmtState::from_command_specifier(specifier) else {
            return;
        };
        match specifier {
            0x81 => {
                self.store.reset_application();
                self.boot_up();
            }
            0x82 => {
                self.store.reset_communication();
                self.boot_up();
            }
            _ => self.enter(state),
        }
    }

    fn boot_up(&mut self) {
        self.state = NmtState::Initialising;
        self.heartbeat = None;
        self.event_timers.clear();
        self.sync_counts.clear();
        self.server.reset();
        self.transmit(self.heartbeat_id(), &[NmtState::Initialising.heartbeat_code()]);
        debug!(target: SIM_TARGET, node = self.node.get(), "boot-up sent");
    }

    fn enter(&mut self, state: NmtState) {
        let previous = self.state;
        self.state = state;
        if previous == NmtState::Initialising {
            self.arm_heartbeat(Instant::now());
        }
        debug!(
            target: SIM_TARGET,
            node = self.node.get(),
            from = previous.as_str(),
            to = state.as_str(),
            "state changed"
        );
    }

    fn arm_heartbeat(&mut self, now: Instant) {
        let period = self.store.u32_value(HEARTBEAT_TIME).unwrap_or(0);
        self.heartbeat =
            (period > 0).then(|| Timer::new(Duration::from_millis(u64::from(period)), now));
    }

    fn apply_side_effects(&mut self) {
        let writes = std::mem::take(&mut self.store.written);
        let now = Instant::now();
        for (index, _) in writes {
            if (index, 0) == HEARTBEAT_TIME && self.state != NmtState::Initialising {
                self.arm_heartbeat(now);
            }
            if (TPDO_COMMUNICATION..TPDO_COMMUNICATION + TPDO_SLOTS).contains(&index) {
                self.event_timers.remove(&(index - TPDO_COMMUNICATION));
                self.sync_counts.remove(&(index - TPDO_COMMUNICATION));
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        if self.heartbeat.as_mut().is_some_and(|timer| timer.fire(now)) {
            self.transmit(self.heartbeat_id(), &[self.state.heartbeat_code()]);
        }
        if self.state != NmtState::Operational {
            return;
        }
        for slot in self.store.transmit_slots() {
            let Some(setup) = self.store.slot_setup(slot) else {
                continue;
            };
            if !matches!(setup.transmission_type, 254 | 255) || setup.event_timer_ms == 0 {
                self.event_timers.remove(&slot);
                continue;
            }
            let period = Duration::from_millis(u64::from(setup.event_timer_ms));
            let timer = self
                .event_timers
                .entry(slot)
                .or_insert_with(|| Timer::new(period, now));
            timer.period = period;
            if timer.fire(now) {
                self.produce(slot, setup.cob_id);
            }
        }
    }

    fn sync(&mut self) {
        if self.state != NmtState::Operational {
            return;
        }
        for slot in self.store.transmit_slots() {
            let Some(setup) = self.store.slot_setup(slot) else {
                continue;
            };
            if !(1..=240).contains(&setup.transmission_type) {
                continue;
            }
            let count = self.sync_counts.entry(slot).or_insert(0);
            *count += 1;
            if *count >= setup.transmission_type {
                *count = 0;
                self.produce(slot, setup.cob_id);
            }
        }
    }

    fn produce(&self, slot: u16, cob_id: u32) {
        let payload = self.store.mapped_payload(slot);
        self.transmit(cob_id, &payload);
    }

    fn emergency(&mut self, code: u16, register: u8, data: &[u8]) {
        let [code_low, code_high] = code.to_le_bytes();
        let mut payload = vec![code_low, code_high, register];
        payload.extend(data.iter().take(5));
        payload.resize(8, 0);
        let register_value = if code & 0xFF00 == 0 { 0 } else { register };
        self.store.objects.insert(ERROR_REGISTER, vec![register_value]);
        self.transmit(EMCY_BASE + u32::from(self.node.get()), &payload);
        debug!(
            target: SIM_TARGET,
            node = self.node.get(),
            code = format_args!("{code:#06x}"),
            "emergency sent"
        );
    }

    fn heartbeat_id(&self) -> u32 {
        HEARTBEAT_BASE + u32::from(self.node.get())
    }

    fn transmit(&self, id: u32, data: &[u8]) {
        if let Err(error) = self.interface.send(&CanFrame::from_parts(id, data)) {
            warn!(
                target: SIM_TARGET,
                node = self.node.get(),
                id = format_args!("{id:#05x}"),
                %error,
                "simulated node transmit failed"
            );
        }
    }
}

struct SlotSetup {
    cob_id: u32,
    transmission_type: u8,
    event_timer_ms: u16,
}

/// The node's object values, with schema defaults and the stored snapshot
/// that resets restore.
struct NodeObjects {
    dictionary: ObjectDictionary,
    defaults: Objects,
    stored: Objects,
    objects: Objects,
    written: Vec<(u16, u8)>,
}

impl NodeObjects {
    fn new(node: NodeId, dictionary: ObjectDictionary) -> Self {
        let mut defaults = Objects::new();
        for entry in dictionary.entries() {
            let bytes = entry.default_bytes(node.get()).unwrap_or_else(|error| {
                warn!(
                    target: SIM_TARGET,
                    node = node.get(),
                    index = format_args!("{:#06x}", entry.index),
                    subindex = entry.subindex,
                    %error,
                    "default value unusable, using zero"
                );
                vec![0; entry.data_type.size().unwrap_or(0)]
            });
            defaults.insert((entry.index, entry.subindex), bytes);
        }
        Self {
            dictionary,
            stored: defaults.clone(),
            objects: defaults.clone(),
            defaults,
            written: Vec::new(),
        }
    }

    fn reset_application(&mut self) {
        self.objects = self.stored.clone();
    }

    fn reset_communication(&mut self) {
        for (key, value) in &self.stored {
            if (0x1000..0x2000).contains(&key.0) {
                self.objects.insert(*key, value.clone());
            }
        }
    }

    fn u32_value(&self, key: (u16, u8)) -> Option<u32> {
        let bytes = self.objects.get(&key)?;
        let mut word = [0_u8; 4];
        for (slot, byte) in word.iter_mut().zip(bytes) {
            *slot = *byte;
        }
        Some(u32::from_le_bytes(word))
    }

    fn transmit_slots(&self) -> Vec<u16> {
        self.objects
            .keys()
            .filter(|(index, subindex)| {
                *subindex == 1
                    && (TPDO_COMMUNICATION..TPDO_COMMUNICATION + TPDO_SLOTS).contains(index)
            })
            .map(|(index, _)| index - TPDO_COMMUNICATION)
            .collect()
    }

    fn slot_setup(&self, slot: u16) -> Option<SlotSetup> {
        let index = TPDO_COMMUNICATION + slot;
        let cob_id = self.u32_value((index, 1))?;
        if cob_id & COB_ID_INVALID != 0 || cob_id & 0x7FF == 0 {
            return None;
        }
        let transmission_type = self.u32_value((index, 2)).unwrap_or(0);
        let event_timer_ms = self.u32_value((index, 5)).unwrap_or(0);
        Some(SlotSetup {
            cob_id: cob_id & 0x7FF,
            transmission_type: u8::try_from(transmission_type).unwrap_or(u8::MAX),
            event_timer_ms: u16::try_from(event_timer_ms).unwrap_or(u16::MAX),
        })
    }

    fn mapped_payload(&self, slot: u16) -> Vec<u8> {
        let index = TPDO_MAPPING + slot;
        let count = self.u32_value((index, 0)).unwrap_or(0);
        let mut payload = Vec::new();
        for member in 1..=count.min(64) {
            let Some(raw) = u8::try_from(member)
                .ok()
                .and_then(|member| self.u32_value((index, member)))
            else {
                continue;
            };
            let mapped = MappedObject::decode(raw);
            let width = usize::from(mapped.bit_length).div_ceil(8);
            let value = self
                .objects
                .get(&(mapped.index, mapped.subindex))
                .map_or(&[][..], Vec::as_slice);
            payload.extend((0..width).map(|position| value.get(position).copied().unwrap_or(0)));
        }
        payload.truncate(8);
        payload
    }

    fn lookup(&self, index: u16, subindex: u8) -> Result<AccessType, AbortCode> {
        if let Some(entry) = self.dictionary.entry(index, subindex) {
            return Ok(entry.access);
        }
        if self.dictionary.entries().any(|entry| entry.index == index) {
            Err(AbortCode::NoSuchSubindex)
        } else {
            Err(AbortCode::NoSuchObject)
        }
    }

    fn normalise(&self, index: u16, subindex: u8, data: &[u8]) -> Result<Vec<u8>, AbortCode> {
        let size = self
            .dictionary
            .data_type(index, subindex)
            .and_then(|data_type| data_type.size());
        let Some(size) = size else {
            return Ok(data.to_vec());
        };
        // Wider writes are accepted when the extra bytes are zero padding.
        if data.len() > size && data.iter().skip(size).any(|byte| *byte != 0) {
            return Err(AbortCode::LengthMismatch);
        }
        if data.len() < size {
            return Err(AbortCode::LengthMismatch);
        }
        Ok(data.iter().take(size).copied().collect())
    }
}

impl ObjectStore for NodeObjects {
    fn read(&mut self, index: u16, subindex: u8) -> Result<Vec<u8>, AbortCode> {
        if !self.lookup(index, subindex)?.readable() {
            return Err(AbortCode::WriteOnly);
        }
        Ok(self.objects.get(&(index, subindex)).cloned().unwrap_or_default())
    }

    fn write(&mut self, index: u16, subindex: u8, data: &[u8]) -> Result<(), AbortCode> {
        if !self.lookup(index, subindex)?.writable() {
            return Err(AbortCode::ReadOnly);
        }
        let value = self.normalise(index, subindex, data)?;
        match index {
            STORE_INDEX if subindex >= 1 => {
                if value != SAVE_SIGNATURE {
                    return Err(AbortCode::StoreFailed);
                }
                self.stored = self.objects.clone();
            }
            RESTORE_INDEX if subindex >= 1 => {
                if value != LOAD_SIGNATURE {
                    return Err(AbortCode::StoreFailed);
                }
                self.stored = self.defaults.clone();
            }
            _ => {
                self.objects.insert((index, subindex), value);
            }
        }
        self.written.push((index, subindex));
        Ok(())
    }
}

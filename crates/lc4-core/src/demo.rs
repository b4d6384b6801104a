//! Demo Mode - Simulated LC4 controller
//!
//! An in-process device that speaks the frame protocol over a
//! [`CommunicationChannel`]. It keeps every table in memory exactly as the
//! controller stores it (raw slot records), so uploads and captures against
//! it exercise the full stack. Used by the `--demo` CLI mode and by tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{
    ConfigurationSnapshot, DeviceClock, FlowRule, FlowRuleType, Holiday, Intermittence, Movement,
    Plan, PortMasks, PortValues, Sequence, SequenceType, SlotRecord, Table,
};
use crate::protocol::commands::{Command, ACK, NACK, REPORT, RESPONSE_BIT};
use crate::protocol::frame::{self, FrameScanner};
use crate::protocol::{CommunicationChannel, Session};

/// NACK error code: opcode not understood
pub const ERR_UNKNOWN_COMMAND: u8 = 0x01;
/// NACK error code: slot index outside the table
pub const ERR_BAD_INDEX: u8 = 0x02;
/// NACK error code: payload has the wrong size or content
pub const ERR_BAD_PAYLOAD: u8 = 0x03;
/// NACK error code: refused by an injected fault
pub const ERR_REFUSED: u8 = 0x04;

const SLOT_TABLES: [Table; 6] = [
    Table::Movements,
    Table::Sequences,
    Table::Plans,
    Table::Intermittences,
    Table::Holidays,
    Table::FlowRules,
];

fn slot_width(table: Table) -> usize {
    match table {
        Table::Movements => Movement::PAYLOAD_LEN,
        Table::Sequences => Sequence::PAYLOAD_LEN,
        Table::Plans => Plan::PAYLOAD_LEN,
        Table::Intermittences => Intermittence::PAYLOAD_LEN,
        Table::Holidays => Holiday::PAYLOAD_LEN,
        Table::FlowRules => FlowRule::PAYLOAD_LEN,
        Table::Identity => 1,
        Table::Clock => DeviceClock::PAYLOAD_LEN,
    }
}

fn empty_slot(table: Table, index: u8) -> Vec<u8> {
    match table {
        Table::Movements => Movement::empty_payload(index),
        Table::Sequences => Sequence::empty_payload(index),
        Table::Plans => Plan::empty_payload(index),
        Table::Intermittences => Intermittence::empty_payload(index),
        Table::Holidays => Holiday::empty_payload(index),
        Table::FlowRules => FlowRule::empty_payload(index),
        Table::Identity | Table::Clock => vec![index],
    }
}

fn table_position(table: Table) -> Option<usize> {
    SLOT_TABLES.iter().position(|t| *t == table)
}

/// Tunable behaviour of the simulated device
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Never answer anything
    pub silent: bool,
    /// Prefix every response with a few bytes of line noise
    pub noise: bool,
    /// Answer reads of empty slots with NACK instead of an empty record
    pub nack_empty_slots: bool,
    /// Time between monitoring reports
    pub report_interval: Duration,
    /// NACK writes with this opcode addressed to this slot index
    pub refuse_write: Option<(u8, u8)>,
    /// Seed for the noise generator
    pub seed: u64,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            silent: false,
            noise: false,
            nack_empty_slots: false,
            report_interval: Duration::from_millis(200),
            refuse_write: None,
            seed: 0x1C4,
        }
    }
}

/// Controller memory: identity, clock and raw slot records
#[derive(Debug, Clone)]
pub struct DeviceMemory {
    /// Answer to the identity query
    pub controller_id: u8,
    /// Last clock written, returned unchanged on read
    pub clock: DeviceClock,
    /// Whether report frames are being emitted
    pub monitoring: bool,
    /// Fault injection settings
    pub options: DemoOptions,
    slots: Vec<Vec<Vec<u8>>>,
    requests: Vec<u8>,
    report_cursor: usize,
}

impl Default for DeviceMemory {
    fn default() -> Self {
        Self::factory(DemoOptions::default())
    }
}

impl DeviceMemory {
    /// Memory as left by a factory reset
    pub fn factory(options: DemoOptions) -> Self {
        let slots = SLOT_TABLES
            .iter()
            .map(|table| (0..table.capacity()).map(|i| empty_slot(*table, i)).collect())
            .collect();
        Self {
            controller_id: 0,
            clock: DeviceClock {
                hour: 0,
                minute: 0,
                second: 0,
                day: 1,
                month: 1,
                year: 24,
                day_of_week: 1,
            },
            monitoring: false,
            options,
            slots,
            requests: Vec::new(),
            report_cursor: 0,
        }
    }

    /// Store every record of `snapshot` directly, bypassing the protocol
    pub fn load(&mut self, snapshot: &ConfigurationSnapshot) {
        if let Some(id) = snapshot.info.controller_id {
            self.controller_id = id;
        }
        if let Some(clock) = snapshot.info.clock {
            self.clock = clock;
        }
        self.store_all(&snapshot.movements);
        self.store_all(&snapshot.sequences);
        self.store_all(&snapshot.plans);
        self.store_all(&snapshot.intermittences);
        self.store_all(&snapshot.holidays);
        self.store_all(&snapshot.flow_rules);
    }

    fn store_all<R: SlotRecord>(&mut self, records: &[R]) {
        for record in records {
            self.store(R::TABLE, record.encode());
        }
    }

    fn store(&mut self, table: Table, payload: Vec<u8>) -> bool {
        let Some(position) = table_position(table) else {
            return false;
        };
        if payload.len() != slot_width(table) {
            return false;
        }
        match self.slots[position].get_mut(payload[0] as usize) {
            Some(slot) => {
                *slot = payload;
                true
            }
            None => false,
        }
    }

    /// Raw record in a slot
    pub fn slot(&self, table: Table, index: u8) -> Option<&[u8]> {
        let position = table_position(table)?;
        self.slots[position].get(index as usize).map(Vec::as_slice)
    }

    /// Opcodes received so far, oldest first
    pub fn requests(&self) -> &[u8] {
        &self.requests
    }

    fn handle(&mut self, opcode: u8, payload: &[u8]) -> (u8, Vec<u8>) {
        self.requests.push(opcode);
        let nack = |code: u8| (NACK, vec![opcode, code]);

        let Some(command) = Command::from_opcode(opcode) else {
            return nack(ERR_UNKNOWN_COMMAND);
        };
        let response = opcode | RESPONSE_BIT;

        if command.is_write() && self.options.refuse_write.is_some() {
            let index = payload.first().copied().unwrap_or(0);
            if self.options.refuse_write == Some((opcode, index)) {
                return nack(ERR_REFUSED);
            }
        }

        match command {
            Command::SetId => match payload {
                [id] => {
                    self.controller_id = *id;
                    (ACK, Vec::new())
                }
                _ => nack(ERR_BAD_PAYLOAD),
            },
            Command::GetId => (response, vec![self.controller_id]),
            Command::GetStatus => {
                let occupied = self.slots[0]
                    .iter()
                    .filter(|slot| slot[1] != crate::model::EMPTY_SLOT)
                    .count() as u8;
                (response, vec![self.controller_id, u8::from(self.monitoring), occupied])
            }
            Command::GetClock => (response, self.clock.encode().to_vec()),
            Command::SetClock => match DeviceClock::decode(payload) {
                Ok(clock) if clock.validate().is_ok() => {
                    self.clock = clock;
                    (ACK, Vec::new())
                }
                _ => nack(ERR_BAD_PAYLOAD),
            },
            Command::MonitoringOn | Command::MonitoringOff => {
                self.monitoring = command == Command::MonitoringOn;
                (ACK, Vec::new())
            }
            Command::FactoryReset => {
                let requests = std::mem::take(&mut self.requests);
                *self = Self::factory(self.options.clone());
                self.requests = requests;
                (ACK, Vec::new())
            }
            Command::GetHolidays => {
                let bytes = self.slots[4].iter().flatten().copied().collect();
                (response, bytes)
            }
            _ if command.is_indexed_read() => {
                let table = SLOT_TABLES
                    .iter()
                    .copied()
                    .find(|t| t.read_command() == command);
                let (Some(table), [index]) = (table, payload) else {
                    return nack(ERR_BAD_PAYLOAD);
                };
                match self.slot(table, *index) {
                    Some(slot) if self.options.nack_empty_slots && slot == &empty_slot(table, *index)[..] => {
                        nack(ERR_BAD_INDEX)
                    }
                    Some(slot) => (response, slot.to_vec()),
                    None => nack(ERR_BAD_INDEX),
                }
            }
            _ => {
                let Some(table) = SLOT_TABLES
                    .iter()
                    .copied()
                    .find(|t| t.save_command() == command)
                else {
                    return nack(ERR_UNKNOWN_COMMAND);
                };
                if payload.len() != slot_width(table) {
                    nack(ERR_BAD_PAYLOAD)
                } else if self.store(table, payload.to_vec()) {
                    (ACK, Vec::new())
                } else {
                    nack(ERR_BAD_INDEX)
                }
            }
        }
    }

    /// Next monitoring report: cycles through the stored movements
    fn next_report(&mut self) -> Vec<u8> {
        let occupied: Vec<&Vec<u8>> = self.slots[0]
            .iter()
            .filter(|slot| slot[1] != crate::model::EMPTY_SLOT)
            .collect();
        let (d, e, f) = match occupied.get(self.report_cursor % occupied.len().max(1)) {
            Some(slot) => (slot[1], slot[2], slot[3]),
            None => (0, 0, 0),
        };
        let pedestrian = (self.report_cursor % 2) as u8;
        self.report_cursor = self.report_cursor.wrapping_add(1);
        vec![self.controller_id, d, e, f, pedestrian]
    }
}

/// Shared view of a simulated controller's memory
#[derive(Clone)]
pub struct DemoHandle {
    memory: Arc<Mutex<DeviceMemory>>,
}

impl DemoHandle {
    /// Lock the device memory for inspection or changes
    pub fn memory(&self) -> MutexGuard<'_, DeviceMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change device behaviour on the fly
    pub fn set_options(&self, options: DemoOptions) {
        self.memory().options = options;
    }
}

/// Simulated controller end of a serial link
pub struct DemoController {
    memory: Arc<Mutex<DeviceMemory>>,
    scanner: FrameScanner,
    outbox: VecDeque<u8>,
    rng: StdRng,
    last_report: Instant,
}

impl DemoController {
    /// Controller with the given memory
    pub fn new(memory: DeviceMemory) -> Self {
        let seed = memory.options.seed;
        Self {
            memory: Arc::new(Mutex::new(memory)),
            scanner: FrameScanner::new(),
            outbox: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
            last_report: Instant::now(),
        }
    }

    /// Controller preloaded with [`sample_snapshot`]
    pub fn with_sample_config() -> Self {
        let mut memory = DeviceMemory::default();
        memory.load(&sample_snapshot());
        Self::new(memory)
    }

    /// Handle for inspecting memory after the controller is attached
    pub fn handle(&self) -> DemoHandle {
        DemoHandle {
            memory: Arc::clone(&self.memory),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_frame(&mut self, opcode: u8, payload: &[u8], noise: bool) {
        let Ok(bytes) = frame::encode(opcode, payload) else {
            return;
        };
        if noise {
            // Values below the first marker byte never fake a frame start
            let count = self.rng.gen_range(1..4);
            for _ in 0..count {
                let byte = self.rng.gen_range(0x00..0x40u8);
                self.outbox.push_back(byte);
            }
        }
        self.outbox.extend(bytes);
    }

    fn process_incoming(&mut self) {
        while let Some(result) = self.scanner.next_frame() {
            let request = match result {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(error = %e, "demo controller dropped bad frame");
                    continue;
                }
            };
            let (silent, noise, (opcode, payload)) = {
                let mut memory = self.lock();
                let silent = memory.options.silent;
                let noise = memory.options.noise;
                (silent, noise, memory.handle(request.command, &request.payload))
            };
            if !silent {
                self.queue_frame(opcode, &payload, noise);
            }
        }
    }

    fn emit_due_report(&mut self) {
        let report = {
            let mut memory = self.lock();
            if !memory.monitoring
                || memory.options.silent
                || self.last_report.elapsed() < memory.options.report_interval
            {
                return;
            }
            memory.next_report()
        };
        self.last_report = Instant::now();
        self.queue_frame(REPORT, &report, false);
    }
}

impl Read for DemoController {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.emit_due_report();
        if self.outbox.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.outbox.len());
        for (dst, src) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for DemoController {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scanner.push(buf);
        self.process_incoming();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for DemoController {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.outbox.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.emit_due_report();
        Ok(self.outbox.len() as u32)
    }

    fn name(&self) -> String {
        "demo".to_string()
    }
}

/// Attach a simulated controller to `session` and return its handle
pub fn attach(session: &Session, controller: DemoController) -> DemoHandle {
    let handle = controller.handle();
    session.attach(Box::new(controller));
    tracing::info!("demo controller attached");
    handle
}

/// A small four-way intersection: two phases with amber clearances
pub fn sample_snapshot() -> ConfigurationSnapshot {
    let movement = |id: u8, d: u8, e: u8, times: [u8; 5]| Movement {
        id,
        ports: PortValues {
            d,
            e,
            f: 0,
            h: 0,
            j: 0,
        },
        times,
    };
    ConfigurationSnapshot {
        // Groups 1+2 green, 3+4 red; then amber; then swapped
        movements: vec![
            movement(0, 0b0010_0110, 0b0100_0000, [30, 20, 15, 0, 0]),
            movement(1, 0b0100_1010, 0b0100_0000, [3, 3, 3, 0, 0]),
            movement(2, 0b1001_0000, 0b1001_0000, [25, 20, 15, 0, 0]),
            movement(3, 0b1001_0001, 0b0010_0000, [3, 3, 3, 0, 0]),
        ],
        sequences: vec![Sequence {
            id: 0,
            sequence_type: SequenceType::Automatic,
            anchor_step: 0,
            movement_refs: vec![0, 1, 2, 3],
        }],
        plans: vec![
            Plan {
                id: 0,
                day_type_id: 10,
                sequence_id: 0,
                time_selector: 0,
                hour: 6,
                minute: 0,
            },
            Plan {
                id: 1,
                day_type_id: 9,
                sequence_id: 0,
                time_selector: 1,
                hour: 8,
                minute: 0,
            },
            Plan {
                id: 2,
                day_type_id: 7,
                sequence_id: 0,
                time_selector: 2,
                hour: 22,
                minute: 30,
            },
        ],
        // Night plan flashes the amber lamps of groups 1 and 2
        intermittences: vec![Intermittence {
            id: 9,
            plan_id: 2,
            movement_id: 1,
            masks: PortMasks {
                d: 0b0100_1000,
                e: 0,
                f: 0,
            },
        }],
        holidays: vec![Holiday {
            id: 0,
            day: 25,
            month: 12,
        }],
        // Demand on inputs 1 or 8 skips from the first green to the second
        flow_rules: vec![FlowRule {
            id: 4,
            sequence_id: 0,
            origin_movement_id: 0,
            rule_type: FlowRuleType::Other(2),
            demand_mask: 0x81,
            destination_movement_id: 2,
        }],
        ..Default::default()
    }
}

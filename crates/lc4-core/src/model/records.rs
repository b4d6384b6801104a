//! Table records and their binary layouts

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};

use super::lights::{self, SignalGroupState, SIGNAL_GROUPS};
use super::snapshot::ConfigurationSnapshot;
use super::{check_len, check_range, ModelError, SlotRecord, Table, EMPTY_SLOT};

/// Movement references a sequence can hold
pub const MAX_SEQUENCE_STEPS: usize = 12;

/// Time selectors per movement
pub const TIME_SLOTS: usize = 5;

/// Accepts a byte as a number or as a hex string ("0A", "0x0A").
///
/// Older project files stored port values the way the controller printed them.
fn de_byte<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ByteRepr {
        Number(u8),
        Text(String),
    }

    match ByteRepr::deserialize(deserializer)? {
        ByteRepr::Number(n) => Ok(n),
        ByteRepr::Text(s) => {
            let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
            u8::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
        }
    }
}

/// Accepts a controller id as a number or decimal text.
///
/// Older project files kept whatever the controller answered, including
/// placeholders such as "N/A"; text that is not a number reads as no id.
fn de_controller_id<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(u8),
        Text(String),
    }

    Ok(match Option::<IdRepr>::deserialize(deserializer)? {
        Some(IdRepr::Number(n)) => Some(n),
        Some(IdRepr::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Output port bytes driving the signal lamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortValues {
    /// Lamps of groups 1 to 3; 0xFF marks an empty slot
    #[serde(rename = "portD", deserialize_with = "de_byte")]
    pub d: u8,
    /// Lamps of groups 3 to 6
    #[serde(rename = "portE", deserialize_with = "de_byte")]
    pub e: u8,
    /// Lamps of groups 6 to 8
    #[serde(rename = "portF", deserialize_with = "de_byte")]
    pub f: u8,
    /// Auxiliary outputs
    #[serde(rename = "portH", deserialize_with = "de_byte")]
    pub h: u8,
    /// Auxiliary outputs
    #[serde(rename = "portJ", deserialize_with = "de_byte")]
    pub j: u8,
}

/// One signal state of the intersection with its durations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Slot, 0..60
    pub id: u8,
    /// Output bytes, flattened into the record in project files
    #[serde(flatten)]
    pub ports: PortValues,
    /// Duration in seconds for each time selector
    pub times: [u8; TIME_SLOTS],
}

impl Movement {
    /// Lamp states of the eight signal groups
    pub fn group_states(&self) -> [SignalGroupState; SIGNAL_GROUPS] {
        lights::group_states(self.ports.d, self.ports.e, self.ports.f)
    }

    /// Duration for a time selector, if the selector exists
    pub fn duration(&self, time_selector: u8) -> Option<u8> {
        self.times.get(time_selector as usize).copied()
    }
}

impl SlotRecord for Movement {
    const TABLE: Table = Table::Movements;
    const PAYLOAD_LEN: usize = 11;

    fn index(&self) -> u8 {
        self.id
    }

    fn encode(&self) -> Vec<u8> {
        let p = &self.ports;
        let mut payload = vec![self.id, p.d, p.e, p.f, p.h, p.j];
        payload.extend_from_slice(&self.times);
        payload
    }

    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError> {
        check_len(Self::TABLE, Self::PAYLOAD_LEN, payload)?;
        if payload[1] == EMPTY_SLOT {
            return Ok(None);
        }
        let mut times = [0u8; TIME_SLOTS];
        times.copy_from_slice(&payload[6..11]);
        Ok(Some(Self {
            id: payload[0],
            ports: PortValues {
                d: payload[1],
                e: payload[2],
                f: payload[3],
                h: payload[4],
                j: payload[5],
            },
            times,
        }))
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.check_index()?;
        // Port D = 0xFF is how the controller marks an empty slot
        check_range(Self::TABLE, self.id, "portD", self.ports.d, 0, EMPTY_SLOT - 1)
    }

    fn records(snapshot: &ConfigurationSnapshot) -> &[Self] {
        &snapshot.movements
    }

    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self> {
        &mut snapshot.movements
    }
}

/// How a sequence advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum SequenceType {
    /// Fixed-time cycling (type 0)
    Automatic,
    /// Any other firmware-defined type, carried through unchanged
    Other(u8),
}

impl From<u8> for SequenceType {
    fn from(value: u8) -> Self {
        match value {
            0 => SequenceType::Automatic,
            other => SequenceType::Other(other),
        }
    }
}

impl From<SequenceType> for u8 {
    fn from(value: SequenceType) -> Self {
        match value {
            SequenceType::Automatic => 0,
            SequenceType::Other(other) => other,
        }
    }
}

/// An ordered cycle of movements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Slot, 0..8
    pub id: u8,
    /// Advance mode
    #[serde(rename = "type")]
    pub sequence_type: SequenceType,
    /// Step the cycle is synchronised on
    pub anchor_step: u8,
    /// Movement slots in cycle order
    #[serde(rename = "movements")]
    pub movement_refs: Vec<u8>,
}

impl SlotRecord for Sequence {
    const TABLE: Table = Table::Sequences;
    const PAYLOAD_LEN: usize = 16;

    fn index(&self) -> u8 {
        self.id
    }

    fn encode(&self) -> Vec<u8> {
        let steps = self.movement_refs.len().min(MAX_SEQUENCE_STEPS);
        let mut payload = vec![
            self.id,
            self.sequence_type.into(),
            self.anchor_step,
            steps as u8,
        ];
        payload.extend_from_slice(&self.movement_refs[..steps]);
        payload.resize(Self::PAYLOAD_LEN, EMPTY_SLOT);
        payload
    }

    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError> {
        check_len(Self::TABLE, Self::PAYLOAD_LEN, payload)?;
        if payload[1] == EMPTY_SLOT {
            return Ok(None);
        }
        let count = match payload[3] as usize {
            n if n <= MAX_SEQUENCE_STEPS => n,
            _ => MAX_SEQUENCE_STEPS,
        };
        let movement_refs = payload[4..4 + count]
            .iter()
            .copied()
            .take_while(|&r| r != EMPTY_SLOT)
            .collect();
        Ok(Some(Self {
            id: payload[0],
            sequence_type: payload[1].into(),
            anchor_step: payload[2],
            movement_refs,
        }))
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.check_index()?;
        if self.movement_refs.len() > MAX_SEQUENCE_STEPS {
            return Err(ModelError::TooManySteps {
                index: self.id,
                count: self.movement_refs.len(),
            });
        }
        check_range(Self::TABLE, self.id, "type", self.sequence_type.into(), 0, EMPTY_SLOT - 1)?;
        check_range(Self::TABLE, self.id, "anchor_step", self.anchor_step, 0, MAX_SEQUENCE_STEPS as u8 - 1)?;
        let max_movement = Table::Movements.capacity() - 1;
        for &movement in &self.movement_refs {
            check_range(Self::TABLE, self.id, "movements", movement, 0, max_movement)?;
        }
        Ok(())
    }

    fn records(snapshot: &ConfigurationSnapshot) -> &[Self] {
        &snapshot.sequences
    }

    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self> {
        &mut snapshot.sequences
    }
}

/// Starts a sequence at a time of day on the days selected by `day_type_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Slot, 0..20
    pub id: u8,
    /// Day selector, see [`lights::day_type_label`]; 255 marks an empty slot
    pub day_type_id: u8,
    /// Sequence started by the plan
    pub sequence_id: u8,
    /// Which of the movement durations applies
    #[serde(rename = "time_sel", alias = "time_selector")]
    pub time_selector: u8,
    /// Start hour
    pub hour: u8,
    /// Start minute
    pub minute: u8,
}

impl Plan {
    /// Highest day type understood by the firmware
    pub const MAX_DAY_TYPE: u8 = 14;

    /// Start time in minutes after midnight
    pub fn start_minute_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    /// Whether this plan is scheduled on `date`
    pub fn applies_on(&self, date: NaiveDate, holidays: &[Holiday]) -> bool {
        let is_holiday = holidays.iter().any(|h| h.matches(date));
        lights::day_type_applies(self.day_type_id, date.weekday(), is_holiday)
    }
}

impl SlotRecord for Plan {
    const TABLE: Table = Table::Plans;
    const PAYLOAD_LEN: usize = 6;

    fn index(&self) -> u8 {
        self.id
    }

    fn encode(&self) -> Vec<u8> {
        vec![
            self.id,
            self.day_type_id,
            self.sequence_id,
            self.time_selector,
            self.hour,
            self.minute,
        ]
    }

    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError> {
        check_len(Self::TABLE, Self::PAYLOAD_LEN, payload)?;
        if payload[1] == EMPTY_SLOT {
            return Ok(None);
        }
        Ok(Some(Self {
            id: payload[0],
            day_type_id: payload[1],
            sequence_id: payload[2],
            time_selector: payload[3],
            hour: payload[4],
            minute: payload[5],
        }))
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.check_index()?;
        let t = Self::TABLE;
        check_range(t, self.id, "day_type_id", self.day_type_id, 0, Self::MAX_DAY_TYPE)?;
        check_range(t, self.id, "sequence_id", self.sequence_id, 0, Table::Sequences.capacity() - 1)?;
        check_range(t, self.id, "time_sel", self.time_selector, 0, TIME_SLOTS as u8 - 1)?;
        check_range(t, self.id, "hour", self.hour, 0, 23)?;
        check_range(t, self.id, "minute", self.minute, 0, 59)
    }

    fn records(snapshot: &ConfigurationSnapshot) -> &[Self] {
        &snapshot.plans
    }

    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self> {
        &mut snapshot.plans
    }
}

/// Per-port blink masks for an intermittence rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMasks {
    /// Blinking bits of port D
    #[serde(rename = "maskD", deserialize_with = "de_byte")]
    pub d: u8,
    /// Blinking bits of port E
    #[serde(rename = "maskE", deserialize_with = "de_byte")]
    pub e: u8,
    /// Blinking bits of port F
    #[serde(rename = "maskF", deserialize_with = "de_byte")]
    pub f: u8,
}

/// Flashes the masked lamps of a movement while a plan is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intermittence {
    /// Slot, 0..10
    pub id: u8,
    /// Plan during which the rule applies
    pub plan_id: u8,
    /// Movement whose lamps flash
    pub movement_id: u8,
    /// Lamps that flash
    #[serde(flatten)]
    pub masks: PortMasks,
}

impl SlotRecord for Intermittence {
    const TABLE: Table = Table::Intermittences;
    const PAYLOAD_LEN: usize = 6;

    fn index(&self) -> u8 {
        self.id
    }

    fn encode(&self) -> Vec<u8> {
        vec![
            self.id,
            self.plan_id,
            self.movement_id,
            self.masks.d,
            self.masks.e,
            self.masks.f,
        ]
    }

    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError> {
        check_len(Self::TABLE, Self::PAYLOAD_LEN, payload)?;
        if payload[1] == EMPTY_SLOT {
            return Ok(None);
        }
        Ok(Some(Self {
            id: payload[0],
            plan_id: payload[1],
            movement_id: payload[2],
            masks: PortMasks {
                d: payload[3],
                e: payload[4],
                f: payload[5],
            },
        }))
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.check_index()?;
        check_range(Self::TABLE, self.id, "plan_id", self.plan_id, 0, Table::Plans.capacity() - 1)?;
        check_range(Self::TABLE, self.id, "movement_id", self.movement_id, 0, Table::Movements.capacity() - 1)
    }

    fn records(snapshot: &ConfigurationSnapshot) -> &[Self] {
        &snapshot.intermittences
    }

    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self> {
        &mut snapshot.intermittences
    }
}

/// A calendar day handled with the holiday day type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    /// Slot, 0..20
    pub id: u8,
    /// Day of month
    pub day: u8,
    /// Month, 1 = January
    pub month: u8,
}

impl Holiday {
    /// Whether `date` falls on this holiday (any year)
    pub fn matches(&self, date: NaiveDate) -> bool {
        date.day() == self.day as u32 && date.month() == self.month as u32
    }
}

impl SlotRecord for Holiday {
    const TABLE: Table = Table::Holidays;
    const PAYLOAD_LEN: usize = 3;

    fn index(&self) -> u8 {
        self.id
    }

    fn encode(&self) -> Vec<u8> {
        vec![self.id, self.day, self.month]
    }

    /// Day 0 (zero-filled) or 0xFF marks a cleared slot
    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError> {
        check_len(Self::TABLE, Self::PAYLOAD_LEN, payload)?;
        if payload[1] == 0 || payload[1] == EMPTY_SLOT {
            return Ok(None);
        }
        Ok(Some(Self {
            id: payload[0],
            day: payload[1],
            month: payload[2],
        }))
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.check_index()?;
        check_range(Self::TABLE, self.id, "day", self.day, 1, 31)?;
        check_range(Self::TABLE, self.id, "month", self.month, 1, 12)
    }

    fn empty_payload(index: u8) -> Vec<u8> {
        vec![index, 0, 0]
    }

    fn records(snapshot: &ConfigurationSnapshot) -> &[Self] {
        &snapshot.holidays
    }

    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self> {
        &mut snapshot.holidays
    }
}

/// What a flow rule does when its demand condition holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum FlowRuleType {
    /// Jump to the destination movement (type 0)
    Goto,
    /// Any other firmware-defined type, carried through unchanged
    Other(u8),
}

impl From<u8> for FlowRuleType {
    fn from(value: u8) -> Self {
        match value {
            0 => FlowRuleType::Goto,
            other => FlowRuleType::Other(other),
        }
    }
}

impl From<FlowRuleType> for u8 {
    fn from(value: FlowRuleType) -> Self {
        match value {
            FlowRuleType::Goto => 0,
            FlowRuleType::Other(other) => other,
        }
    }
}

/// Demand-driven transition inside a sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    /// Slot, 0..10
    pub id: u8,
    /// Sequence the rule belongs to
    pub sequence_id: u8,
    /// Movement at which the rule is checked
    pub origin_movement_id: u8,
    /// Action taken
    pub rule_type: FlowRuleType,
    /// Bit n set: demand input n+1 must be active
    pub demand_mask: u8,
    /// Movement jumped to
    pub destination_movement_id: u8,
}

impl FlowRule {
    /// Zero-based demand inputs referenced by the mask
    pub fn demand_inputs(&self) -> Vec<u8> {
        (0..8).filter(|bit| self.demand_mask & (1 << bit) != 0).collect()
    }
}

impl SlotRecord for FlowRule {
    const TABLE: Table = Table::FlowRules;
    const PAYLOAD_LEN: usize = 6;

    fn index(&self) -> u8 {
        self.id
    }

    fn encode(&self) -> Vec<u8> {
        vec![
            self.id,
            self.sequence_id,
            self.origin_movement_id,
            self.rule_type.into(),
            self.demand_mask,
            self.destination_movement_id,
        ]
    }

    fn decode(payload: &[u8]) -> Result<Option<Self>, ModelError> {
        check_len(Self::TABLE, Self::PAYLOAD_LEN, payload)?;
        if payload[1] == EMPTY_SLOT {
            return Ok(None);
        }
        Ok(Some(Self {
            id: payload[0],
            sequence_id: payload[1],
            origin_movement_id: payload[2],
            rule_type: payload[3].into(),
            demand_mask: payload[4],
            destination_movement_id: payload[5],
        }))
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.check_index()?;
        let t = Self::TABLE;
        let max_movement = Table::Movements.capacity() - 1;
        check_range(t, self.id, "sequence_id", self.sequence_id, 0, Table::Sequences.capacity() - 1)?;
        check_range(t, self.id, "origin_movement_id", self.origin_movement_id, 0, max_movement)?;
        check_range(t, self.id, "destination_movement_id", self.destination_movement_id, 0, max_movement)
    }

    fn records(snapshot: &ConfigurationSnapshot) -> &[Self] {
        &snapshot.flow_rules
    }

    fn records_mut(snapshot: &mut ConfigurationSnapshot) -> &mut Vec<Self> {
        &mut snapshot.flow_rules
    }
}

/// Controller real-time clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClock {
    /// 0..24
    pub hour: u8,
    /// 0..60
    pub minute: u8,
    /// 0..60
    pub second: u8,
    /// Day of month
    pub day: u8,
    /// 1 = January
    pub month: u8,
    /// Two-digit year (2000 + year)
    pub year: u8,
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: u8,
}

impl DeviceClock {
    /// Size of the clock record
    pub const PAYLOAD_LEN: usize = 7;

    /// Build from any chrono date-time (e.g. `chrono::Local::now()`)
    pub fn from_datetime<T: Datelike + Timelike>(dt: &T) -> Self {
        Self {
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            day: dt.day() as u8,
            month: dt.month() as u8,
            year: dt.year().rem_euclid(100) as u8,
            day_of_week: dt.weekday().number_from_monday() as u8,
        }
    }

    /// Calendar date-time, if the fields form a valid one
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2000 + self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)
    }

    /// Wire layout: hour, minute, second, day, month, year, day of week
    pub fn encode(&self) -> [u8; Self::PAYLOAD_LEN] {
        [
            self.hour,
            self.minute,
            self.second,
            self.day,
            self.month,
            self.year,
            self.day_of_week,
        ]
    }

    /// Parse the 7-byte clock record
    pub fn decode(payload: &[u8]) -> Result<Self, ModelError> {
        check_len(Table::Clock, Self::PAYLOAD_LEN, payload)?;
        Ok(Self {
            hour: payload[0],
            minute: payload[1],
            second: payload[2],
            day: payload[3],
            month: payload[4],
            year: payload[5],
            day_of_week: payload[6],
        })
    }

    /// Check every field against its calendar range
    pub fn validate(&self) -> Result<(), ModelError> {
        let t = Table::Clock;
        check_range(t, 0, "hour", self.hour, 0, 23)?;
        check_range(t, 0, "minute", self.minute, 0, 59)?;
        check_range(t, 0, "second", self.second, 0, 59)?;
        check_range(t, 0, "day", self.day, 1, 31)?;
        check_range(t, 0, "month", self.month, 1, 12)?;
        check_range(t, 0, "year", self.year, 0, 99)?;
        check_range(t, 0, "day_of_week", self.day_of_week, 1, 7)
    }
}

/// Controller identity and clock at capture time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerInfo {
    /// Identity byte, `None` when the controller refused or never answered
    #[serde(deserialize_with = "de_controller_id")]
    pub controller_id: Option<u8>,
    /// Clock reading taken during the capture
    pub clock: Option<DeviceClock>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};

    fn movement() -> Movement {
        Movement {
            id: 7,
            ports: PortValues {
                d: 0x24,
                e: 0x92,
                f: 0x49,
                h: 0x00,
                j: 0x01,
            },
            times: [20, 3, 2, 0, 0],
        }
    }

    #[test]
    fn test_movement_layout() {
        let payload = movement().encode();
        assert_eq!(payload, vec![7, 0x24, 0x92, 0x49, 0x00, 0x01, 20, 3, 2, 0, 0]);
        assert_eq!(Movement::decode(&payload), Ok(Some(movement())));
    }

    #[test]
    fn test_empty_movement_slot_is_absent() {
        let payload = [12, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(Movement::decode(&payload), Ok(None));
        // Port D alone decides emptiness
        let payload = [12, 0xFF, 0, 0, 0, 0, 1, 2, 3, 4, 5];
        assert_eq!(Movement::decode(&payload), Ok(None));
    }

    #[test]
    fn test_movement_wrong_length() {
        assert_eq!(
            Movement::decode(&[1, 2, 3]),
            Err(ModelError::PayloadLength {
                table: Table::Movements,
                expected: 11,
                actual: 3
            })
        );
    }

    #[test]
    fn test_sequence_layout_pads_with_sentinel() {
        let seq = Sequence {
            id: 2,
            sequence_type: SequenceType::Automatic,
            anchor_step: 1,
            movement_refs: vec![0, 1, 2],
        };
        let payload = seq.encode();
        assert_eq!(payload.len(), 16);
        assert_eq!(&payload[..7], &[2, 0, 1, 3, 0, 1, 2]);
        assert!(payload[7..].iter().all(|&b| b == 0xFF));
        assert_eq!(Sequence::decode(&payload), Ok(Some(seq)));
    }

    #[test]
    fn test_sequence_decode_stops_at_sentinel() {
        let mut payload = vec![1, 3, 0, 12, 4, 5, 0xFF];
        payload.resize(16, 0xFF);
        let seq = Sequence::decode(&payload).expect("decode").expect("present");
        assert_eq!(seq.movement_refs, vec![4, 5]);
        assert_eq!(seq.sequence_type, SequenceType::Other(3));
    }

    #[test]
    fn test_empty_plan_slot() {
        assert_eq!(Plan::decode(&[3, 255, 0, 0, 0, 0]), Ok(None));
    }

    #[test]
    fn test_plan_validation() {
        let mut plan = Plan {
            id: 1,
            day_type_id: 10,
            sequence_id: 2,
            time_selector: 0,
            hour: 6,
            minute: 30,
        };
        assert!(plan.validate().is_ok());
        plan.hour = 24;
        assert!(matches!(
            plan.validate(),
            Err(ModelError::FieldOutOfRange { field: "hour", .. })
        ));
        plan.hour = 6;
        plan.id = 20;
        assert!(matches!(plan.validate(), Err(ModelError::IndexOutOfRange { .. })));
    }

    #[test]
    fn test_plan_schedule() {
        let weekdays = Plan {
            id: 0,
            day_type_id: 10,
            sequence_id: 0,
            time_selector: 0,
            hour: 7,
            minute: 15,
        };
        let monday = NaiveDate::from_ymd_opt(2024, 6, 10).expect("date");
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 15).expect("date");
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert!(weekdays.applies_on(monday, &[]));
        assert!(!weekdays.applies_on(saturday, &[]));
        assert_eq!(weekdays.start_minute_of_day(), 435);

        let holiday_plan = Plan {
            day_type_id: 14,
            ..weekdays.clone()
        };
        let holidays = [Holiday {
            id: 0,
            day: 15,
            month: 6,
        }];
        assert!(holiday_plan.applies_on(saturday, &holidays));
        assert!(!holiday_plan.applies_on(monday, &holidays));
    }

    #[test]
    fn test_holiday_empty_payload_is_zero_filled() {
        assert_eq!(Holiday::empty_payload(4), vec![4, 0, 0]);
        assert_eq!(Holiday::decode(&[4, 0, 0]), Ok(None));
        assert_eq!(Plan::empty_payload(4), vec![4, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_intermittence_layout() {
        let rule = Intermittence {
            id: 9,
            plan_id: 2,
            movement_id: 41,
            masks: PortMasks {
                d: 0x48,
                e: 0x01,
                f: 0x80,
            },
        };
        let payload = rule.encode();
        assert_eq!(payload, vec![9, 2, 41, 0x48, 0x01, 0x80]);
        assert_eq!(Intermittence::decode(&payload), Ok(Some(rule)));
        assert_eq!(Intermittence::decode(&Intermittence::empty_payload(9)), Ok(None));
    }

    #[test]
    fn test_flow_rule_layout() {
        let rule = FlowRule {
            id: 4,
            sequence_id: 7,
            origin_movement_id: 12,
            rule_type: FlowRuleType::Other(2),
            demand_mask: 0x81,
            destination_movement_id: 33,
        };
        let payload = rule.encode();
        assert_eq!(payload, vec![4, 7, 12, 2, 0x81, 33]);
        assert_eq!(FlowRule::decode(&payload), Ok(Some(rule.clone())));
        assert_eq!(rule.demand_inputs(), vec![0, 7]);
        assert_eq!(FlowRule::decode(&[4, 0xFF, 0, 0, 0, 0]), Ok(None));
    }

    #[test]
    fn test_flow_rule_demand_inputs() {
        let rule = FlowRule {
            id: 0,
            sequence_id: 1,
            origin_movement_id: 2,
            rule_type: FlowRuleType::Goto,
            demand_mask: 0b0000_0101,
            destination_movement_id: 4,
        };
        assert_eq!(rule.demand_inputs(), vec![0, 2]);
        assert_eq!(rule.encode(), vec![0, 1, 2, 0, 5, 4]);
    }

    #[test]
    fn test_clock_from_datetime() {
        let dt = NaiveDate::from_ymd_opt(2025, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 59))
            .expect("datetime");
        let clock = DeviceClock::from_datetime(&dt);
        assert_eq!(clock.encode(), [14, 5, 59, 9, 3, 25, 7]);
        assert!(clock.validate().is_ok());
        assert_eq!(clock.to_naive(), Some(dt));
    }

    #[test]
    fn test_controller_id_from_text() {
        let info: ControllerInfo = serde_json::from_str(r#"{"controller_id":" 5 "}"#).expect("parse");
        assert_eq!(info.controller_id, Some(5));
        let info: ControllerInfo = serde_json::from_str(r#"{"controller_id":"N/A"}"#).expect("parse");
        assert_eq!(info.controller_id, None);
        let info: ControllerInfo = serde_json::from_str(r#"{"controller_id":12}"#).expect("parse");
        assert_eq!(info.controller_id, Some(12));
        let info: ControllerInfo = serde_json::from_str("{}").expect("parse");
        assert_eq!(info, ControllerInfo::default());
    }

    #[test]
    fn test_legacy_hex_port_values() {
        let json = r#"{"id":3,"portD":"A4","portE":"0x10","portF":0,"portH":"00","portJ":"ff","times":[1,2,3,4,5]}"#;
        let mov: Movement = serde_json::from_str(json).expect("parse");
        assert_eq!(mov.ports.d, 0xA4);
        assert_eq!(mov.ports.e, 0x10);
        assert_eq!(mov.ports.j, 0xFF);
    }
}

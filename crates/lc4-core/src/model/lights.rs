//! Signal lamp decoding and day-type schedules

use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Signal groups wired to ports D, E and F
pub const SIGNAL_GROUPS: usize = 8;

/// Lamp colour within a signal group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lamp {
    /// Stop
    Red,
    /// Clearance
    Amber,
    /// Go
    Green,
}

impl Lamp {
    /// Lamps in wiring order
    pub const ALL: [Lamp; 3] = [Lamp::Red, Lamp::Amber, Lamp::Green];

    fn offset(self) -> u32 {
        match self {
            Lamp::Red => 0,
            Lamp::Amber => 1,
            Lamp::Green => 2,
        }
    }

    /// Short label prefix used on the controller cabinet (V = verde)
    pub fn prefix(self) -> char {
        match self {
            Lamp::Red => 'R',
            Lamp::Amber => 'A',
            Lamp::Green => 'V',
        }
    }

    /// Bit of the 24-bit D:E:F word driving this lamp in `group` (1-based).
    ///
    /// Lamps are packed from the most significant bit of port D: R1 = D7,
    /// A1 = D6, V1 = D5, R2 = D4 and so on down to V8 = F0.
    pub fn bit(self, group: u8) -> Option<u32> {
        if group == 0 || group as usize > SIGNAL_GROUPS {
            return None;
        }
        let position = (group as u32 - 1) * 3 + self.offset();
        Some(23 - position)
    }

    /// Cabinet label such as `R1` or `V8`
    pub fn label(self, group: u8) -> String {
        format!("{}{}", self.prefix(), group)
    }
}

/// Lamp states of one signal group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalGroupState {
    /// 1-based group number
    pub group: u8,
    /// Red lamp lit
    pub red: bool,
    /// Amber lamp lit
    pub amber: bool,
    /// Green lamp lit
    pub green: bool,
}

impl SignalGroupState {
    /// State of one lamp
    pub fn is_lit(&self, lamp: Lamp) -> bool {
        match lamp {
            Lamp::Red => self.red,
            Lamp::Amber => self.amber,
            Lamp::Green => self.green,
        }
    }

    /// True when no lamp of the group is on
    pub fn is_dark(&self) -> bool {
        !(self.red || self.amber || self.green)
    }

    /// Labels of the lit lamps, e.g. `["R3"]`
    pub fn lit_labels(&self) -> Vec<String> {
        Lamp::ALL
            .iter()
            .filter(|lamp| self.is_lit(**lamp))
            .map(|lamp| lamp.label(self.group))
            .collect()
    }
}

fn port_word(d: u8, e: u8, f: u8) -> u32 {
    (d as u32) << 16 | (e as u32) << 8 | f as u32
}

/// Decode port bytes D, E and F into the state of every signal group
pub fn group_states(d: u8, e: u8, f: u8) -> [SignalGroupState; SIGNAL_GROUPS] {
    let word = port_word(d, e, f);
    let mut states = [SignalGroupState::default(); SIGNAL_GROUPS];
    for (i, state) in states.iter_mut().enumerate() {
        let group = i as u8 + 1;
        let lit = |lamp: Lamp| lamp.bit(group).is_some_and(|bit| word & (1 << bit) != 0);
        *state = SignalGroupState {
            group,
            red: lit(Lamp::Red),
            amber: lit(Lamp::Amber),
            green: lit(Lamp::Green),
        };
    }
    states
}

/// Whether a plan with `day_type` runs on a day.
///
/// Unknown day types never apply.
pub fn day_type_applies(day_type: u8, weekday: Weekday, is_holiday: bool) -> bool {
    use Weekday::*;
    match day_type {
        0 => weekday == Sun,
        1 => weekday == Mon,
        2 => weekday == Tue,
        3 => weekday == Wed,
        4 => weekday == Thu,
        5 => weekday == Fri,
        6 => weekday == Sat,
        7 => true,
        8 => weekday != Sun,
        9 => matches!(weekday, Sat | Sun),
        10 => !matches!(weekday, Sat | Sun),
        11 => matches!(weekday, Fri | Sat | Sun),
        12 => matches!(weekday, Mon | Tue | Wed | Thu),
        13 => matches!(weekday, Fri | Sat),
        14 => is_holiday,
        _ => false,
    }
}

/// Human-readable name of a day type
pub fn day_type_label(day_type: u8) -> &'static str {
    match day_type {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        7 => "Every day",
        8 => "Monday to Saturday",
        9 => "Saturday and Sunday",
        10 => "Monday to Friday",
        11 => "Friday to Sunday",
        12 => "Monday to Thursday",
        13 => "Friday and Saturday",
        14 => "Holidays",
        _ => "Unknown",
    }
}

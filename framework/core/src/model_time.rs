use num_enum::{FromPrimitive, IntoPrimitive};

/// Week day for the model clock broadcast.
///
/// The enum values match the wire representation of the model-time
/// packet.
///
/// Default value is `1` ([`ModelWeekday::Sunday`])
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModelWeekday {
    #[default]
    Sunday = 1,
    Monday = 2,
    Tuesday = 3,
    Wednesday = 4,
    Thursday = 5,
    Friday = 6,
    Saturday = 7,
}

/// Month for the model calendar broadcast.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModelMonth {
    #[default]
    January = 1,
    February = 2,
    March = 3,
    April = 4,
    May = 5,
    June = 6,
    July = 7,
    August = 8,
    September = 9,
    October = 10,
    November = 11,
    December = 12,
}

/// Accelerated layout clock state.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModelTime {
    pub weekday: ModelWeekday,
    pub hour: u8,
    pub minute: u8,
    /// Model minutes per real minute; 0 freezes the clock.
    pub rate: u8,
}

impl Default for ModelTime {
    fn default() -> Self {
        Self {
            weekday: ModelWeekday::Sunday,
            hour: 0,
            minute: 0,
            rate: 1,
        }
    }
}

impl ModelTime {
    /// Advance by one model minute, wrapping day and weekday.
    pub fn tick_minute(&mut self) {
        self.minute += 1;
        if self.minute >= 60 {
            self.minute = 0;
            self.hour += 1;
            if self.hour >= 24 {
                self.hour = 0;
                let next = u8::from(self.weekday) % 7 + 1;
                self.weekday = ModelWeekday::from_primitive(next);
            }
        }
    }
}

/// Model calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModelDate {
    pub day: u8,
    pub month: ModelMonth,
    pub year: u16,
}

impl Default for ModelDate {
    fn default() -> Self {
        Self {
            day: 1,
            month: ModelMonth::January,
            year: 2000,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_minute_wrap() {
        let mut t = ModelTime {
            weekday: ModelWeekday::Saturday,
            hour: 23,
            minute: 59,
            rate: 8,
        };
        t.tick_minute();
        assert_eq!((t.hour, t.minute), (0, 0));
        assert_eq!(t.weekday, ModelWeekday::Sunday);
    }
}

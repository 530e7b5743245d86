use crate::model_time::ModelTime;
use crate::speed::Speed;

/// Notifications the core emits towards other firmware components
/// (front ends, protocol adapters, displays).
///
/// Payloads are snapshots; receivers must not reach back into the core
/// from the notification context.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Track mode changed; carries the raw mode code.
    SysStatus { mode: u8 },
    LocoSpeed { adr: u16, speed: Speed },
    LocoFunction { adr: u16, fnum: u8, on: bool },
    /// A decoder parameter (CV, configuration) changed.
    LocoParameter { adr: u16 },
    /// The decoder database changed shape (add/remove/rename).
    LocoDb,
    Turnout { adr: u16, dir: bool, energized: bool },
    Feedback { node: u8, port: u16, on: bool },
    /// A new feedback node appeared on the bus.
    FbNew { node: u8 },
    Consist { adr: u16 },
    Current { main_ma: u16, prog_ma: u16 },
    /// A RailCom reply was observed for this address.
    RailCom { adr: u16 },
    ModelTime { time: ModelTime },
    LogMsg,
    /// Accessory output format configuration changed.
    AccFmt,
}

/// Receiver seam for core events.
///
/// Implementations must be cheap; the core calls this from its poll
/// path, never from interrupt context.
pub trait EventSink {
    fn notify(&mut self, event: Event);
}

/// A sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn notify(&mut self, _event: Event) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_null_sink_swallows() {
        let mut sink = NullEventSink;
        sink.notify(Event::LocoDb);
    }
}

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

#[macro_use]
mod macros;

pub mod config {
    //! Capacities and fixed timings of the signal path.
    #![allow(unused)]

    /// Command packets the scheduler queue can hold.
    pub const COMMAND_QUEUE_DEPTH: usize = 32;
    /// Bit buffers in the pool between encoder and signal generator.
    pub const BITBUF_RING_DEPTH: usize = 8;
    /// Live locos the refresh list can track.
    pub const MAX_LIVE_LOCOS: usize = 64;
    /// Reply listeners that can be registered at once.
    pub const MAX_REPLY_LISTENERS: usize = 16;
    /// Queued reply deliveries between receiver and router worker.
    pub const REPLY_QUEUE_DEPTH: usize = 16;

    /// Power-off lead-in before the RailCom cutout opens.
    pub const CUTOUT_DELAY_US: u16 = 50;
    /// End of RailCom window 1, relative to cutout open.
    pub const CUTOUT_W1_US: u16 = 165;
    /// End of RailCom window 2, relative to window 1.
    pub const CUTOUT_W2_US: u16 = 270;
    /// BiDi-bus acknowledge sample point after the cutout closed.
    pub const BIDI_ACK_SAMPLE_US: u16 = 1500;
}

pub mod fmtcfg;
pub mod crc;
pub mod packet;
pub mod wire;
pub mod queue;
pub mod refresh;
pub mod signal;
pub mod mode;
pub mod phy;
pub mod railcom;
pub mod m3reply;
pub mod router;
pub mod prog;

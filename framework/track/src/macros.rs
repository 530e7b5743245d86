#[cfg(not(any(feature = "log", feature = "defmt")))]
#[macro_use]
mod log_none {
    macro_rules! sig_log {
        (trace, $($arg:expr),*) => {{ $( let _ = $arg; )* }};
        (debug, $($arg:expr),*) => {{ $( let _ = $arg; )* }};
    }
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_use]
mod log_log {
    macro_rules! sig_log {
        (trace, $($arg:expr),*) => { ::log::trace!($($arg),*) };
        (debug, $($arg:expr),*) => { ::log::debug!($($arg),*) };
    }
}

#[cfg(feature = "defmt")]
#[macro_use]
mod log_defmt {
    macro_rules! sig_log {
        (trace, $($arg:expr),*) => { ::defmt::trace!($($arg),*) };
        (debug, $($arg:expr),*) => { ::defmt::debug!($($arg),*) };
    }
}

macro_rules! sig_trace {
    ($($arg:expr),*) => (sig_log!(trace, $($arg),*));
}

macro_rules! sig_debug {
    ($($arg:expr),*) => (sig_log!(debug, $($arg),*));
}

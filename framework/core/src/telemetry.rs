/// Snapshot of the power-stage measurements the core consumes.
///
/// Producers overwrite the whole value in one go; readers copy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    /// Track voltage in 0.1 V units.
    pub track_dv: u16,
    /// Main track current in mA.
    pub track_ma: u16,
    /// Programming track current in mA.
    pub prog_ma: u16,
    /// Supply voltage in mV.
    pub supply_mv: u16,
    /// Internal temperature in degrees Celsius.
    pub temp_c: i8,
    pub phy_link: bool,
}

/// Read access to live telemetry.
///
/// The power-stage driver implements this; the programming-track
/// engine and the mode machine poll it.
pub trait TelemetrySource {
    fn telemetry(&self) -> Telemetry;
}

//! Telemetry source collaborator boundary.
//!
//! The sensor behind the published readings is deliberately outside this
//! crate: the orchestrator only needs a way to initialize it once and read a
//! single floating-point value per tick.

/// A source of telemetry readings.
pub trait TelemetrySource {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Prepares the source. Called once at boot, before the first read.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Reads the current value.
    fn read(&mut self) -> Result<f64, Self::Error>;
}

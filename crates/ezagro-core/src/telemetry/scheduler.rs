use alloc::format;
use alloc::string::String;

use log::{info, warn};

use super::{TelemetrySink, UNAVAILABLE, VirtualPin, whole};
use crate::app_state::AppState;
use crate::constants::FIRMWARE_VERSION;
use crate::display::StatusDisplay;
use crate::sensors::{ClimateReadings, Co2Readings, Sensor};

/// What a single tick managed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub climate_ok: bool,
    pub co2_ok: bool,
    pub publish_failures: u8,
}

/// Periodic measure, publish and display cycle
///
/// One call to [`TelemetryScheduler::tick`] is one full cycle. The caller
/// owns the pacing; ticks run to completion one after the other, so the CO2
/// link never sees two exchanges at once.
pub struct TelemetryScheduler<C, X, T, D> {
    climate: C,
    co2: X,
    sink: T,
    display: D,
}

impl<C, X, T, D> TelemetryScheduler<C, X, T, D>
where
    C: Sensor<Readings = ClimateReadings>,
    X: Sensor<Readings = Co2Readings>,
    T: TelemetrySink,
    D: StatusDisplay,
{
    pub const fn new(climate: C, co2: X, sink: T, display: D) -> Self {
        Self {
            climate,
            co2,
            sink,
            display,
        }
    }

    pub fn sink(&self) -> &T {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut T {
        &mut self.sink
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn into_parts(self) -> (C, X, T, D) {
        (self.climate, self.co2, self.sink, self.display)
    }

    /// Run one measurement cycle
    ///
    /// Never fails: unreadable sensors are published as [`UNAVAILABLE`] and
    /// rejected publishes are counted in the report.
    pub async fn tick(&mut self, state: &AppState) -> TickReport {
        let mut report = TickReport::default();

        let (temperature, pressure) = match self.climate.read().await {
            Ok(readings) => {
                report.climate_ok = true;
                (
                    whole(readings.temperature_celsius),
                    whole(readings.pressure_pa),
                )
            }
            Err(e) => {
                warn!("{}", e);
                (String::from(UNAVAILABLE), String::from(UNAVAILABLE))
            }
        };

        self.publish(VirtualPin::TEMPERATURE, &temperature, &mut report)
            .await;
        self.publish(VirtualPin::PRESSURE, &pressure, &mut report)
            .await;

        let co2 = match self.co2.read().await {
            Ok(readings) => {
                report.co2_ok = true;
                format!("{}", readings.co2_ppm)
            }
            Err(e) => {
                warn!("{}", e);
                String::from(UNAVAILABLE)
            }
        };
        self.publish(VirtualPin::CO2, &co2, &mut report).await;

        let identity = format!("{} {}", state.config().device_id(), FIRMWARE_VERSION);
        let climate = format!("P: {}Pa T: {}C", pressure, temperature);
        self.display.show(&[&identity, &climate]);

        info!("{}", identity);
        info!("{}", climate);
        info!("CO2: {}", co2);

        report
    }

    async fn publish(&mut self, pin: VirtualPin, value: &str, report: &mut TickReport) {
        if let Err(e) = self.sink.publish(pin, value).await {
            warn!("Failed to publish {} to {}: {:?}", value, pin, e);
            report.publish_failures = report.publish_failures.saturating_add(1);
        }
    }
}

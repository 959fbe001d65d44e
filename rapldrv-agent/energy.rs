use std::collections::HashMap;
use std::time::{Duration, Instant};

use rapldrv_raw::rapl::{msr, EnergyStatus, RaplPowerUnit};
use rapldrv_raw::RegisterLayout;

use crate::client::Client;
use crate::enum_with_data;
use crate::error::{RaplDrvError, Result};

enum_with_data! {
    /// RAPL power domains with an energy status counter
    pub enum EnergyDomain: u32 {
        Package => ("package", msr::MSR_PKG_ENERGY_STATUS),
        Core => ("core", msr::MSR_PP0_ENERGY_STATUS),
        Uncore => ("uncore", msr::MSR_PP1_ENERGY_STATUS),
        Dram => ("dram", msr::MSR_DRAM_ENERGY_STATUS),
        Platform => ("platform", msr::MSR_PLATFORM_ENERGY_STATUS),
    }
    impl register -> u32
}

impl EnergyDomain {
    pub fn from_name(name: &str) -> Option<EnergyDomain> {
        EnergyDomain::all()
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
    }
}

/// Energy used by one domain between two readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub domain: EnergyDomain,
    pub joules: f64,
    pub elapsed: Duration,
}

impl PowerReading {
    pub fn between(
        domain: EnergyDomain,
        unit: &RaplPowerUnit,
        before: &EnergyStatus,
        after: &EnergyStatus,
        elapsed: Duration,
    ) -> Self {
        Self {
            domain,
            joules: after.joules_since(before, unit),
            elapsed,
        }
    }

    /// Average power over the interval; zero for an empty interval
    pub fn watts(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.joules / secs
        } else {
            0.0
        }
    }
}

/// Samples energy counters through the device and turns them into power
pub struct RaplMonitor {
    unit: RaplPowerUnit,
    domains: Vec<EnergyDomain>,
    last_readings: HashMap<EnergyDomain, (EnergyStatus, Instant)>,
}

impl RaplMonitor {
    /// Read the unit register and a first reading of every domain.
    /// Domains the CPU does not implement are dropped with a warning.
    pub async fn new(client: &mut Client, domains: &[EnergyDomain]) -> Result<Self> {
        let unit: RaplPowerUnit = client.read_layout().await?;
        tracing::debug!(
            "RAPL energy unit {} J, power unit {} W",
            unit.energy_unit_multiplier(),
            unit.power_unit_multiplier()
        );

        let mut last_readings = HashMap::new();
        let mut supported = Vec::new();
        for &domain in domains {
            match client.read_register(domain.register()).await {
                Ok(raw) => {
                    let reading = EnergyStatus::from_msr_value(raw);
                    last_readings.insert(domain, (reading, Instant::now()));
                    supported.push(domain);
                }
                Err(e) => tracing::warn!("Skipping {} energy domain: {}", domain.name(), e),
            }
        }

        if supported.is_empty() {
            return Err(RaplDrvError::MsrError(
                "no requested RAPL energy domain is readable".to_string(),
            ));
        }

        Ok(Self {
            unit,
            domains: supported,
            last_readings,
        })
    }

    pub fn unit(&self) -> &RaplPowerUnit {
        &self.unit
    }

    pub fn domains(&self) -> &[EnergyDomain] {
        &self.domains
    }

    /// Energy used by each domain since the previous call (or `new`)
    pub async fn get_power_consumption(
        &mut self,
        client: &mut Client,
    ) -> Result<Vec<PowerReading>> {
        let mut readings = Vec::with_capacity(self.domains.len());

        for &domain in &self.domains {
            let raw = client.read_register(domain.register()).await?;
            let now = Instant::now();
            let current = EnergyStatus::from_msr_value(raw);

            if let Some((last, at)) = self.last_readings.insert(domain, (current, now)) {
                readings.push(PowerReading::between(
                    domain,
                    &self.unit,
                    &last,
                    &current,
                    now.duration_since(at),
                ));
            }
        }

        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_lookup() {
        assert_eq!(EnergyDomain::from_name("DRAM"), Some(EnergyDomain::Dram));
        assert_eq!(EnergyDomain::from_name("gpu"), None);
        assert_eq!(EnergyDomain::Package.register(), 0x611);
    }

    #[test]
    fn test_power_reading() {
        let unit = RaplPowerUnit::from_msr_value(0x000A_0E03);
        let before = EnergyStatus {
            total_energy_consumed: 0xFFFF_C000,
        };
        let after = EnergyStatus {
            total_energy_consumed: 0x0000_4000,
        };

        // 0x8000 ticks across the wrap at 1/16384 J each
        let reading = PowerReading::between(
            EnergyDomain::Package,
            &unit,
            &before,
            &after,
            Duration::from_millis(500),
        );
        assert_eq!(reading.joules, 2.0);
        assert_eq!(reading.watts(), 4.0);

        let instant = PowerReading {
            elapsed: Duration::ZERO,
            ..reading
        };
        assert_eq!(instant.watts(), 0.0);
    }

    #[tokio::test]
    async fn test_monitor_over_simulated_device() {
        use crate::access::SimulatedRegisters;
        use crate::common::clock::MonotonicClock;
        use crate::device::Device;
        use crate::dispatch::Dispatcher;
        use crate::server::Server;
        use std::sync::Arc;
        use tokio_util::sync::CancellationToken;

        let path = std::env::temp_dir().join(format!("rapldrv-energy-{}.sock", std::process::id()));
        let dispatcher = Dispatcher::new(
            Arc::new(SimulatedRegisters::rapl_package()),
            Arc::new(MonotonicClock),
        );
        let device = Arc::new(Device::create("RAPLDriver", &path, dispatcher));
        let token = CancellationToken::new();
        let server = tokio::spawn(Server::bind(device).unwrap().run(token.clone()));

        let mut client = Client::connect(&path).await.unwrap();
        let mut monitor = RaplMonitor::new(&mut client, &EnergyDomain::all()).await.unwrap();

        // The simulated package has no PP1 or platform counter
        assert_eq!(
            monitor.domains(),
            &[EnergyDomain::Package, EnergyDomain::Core, EnergyDomain::Dram]
        );
        assert_eq!(monitor.unit().energy_units, 14);

        // Each simulated read advances the counters by a fixed step
        let readings = monitor.get_power_consumption(&mut client).await.unwrap();
        let joules: Vec<f64> = readings.iter().map(|r| r.joules).collect();
        assert_eq!(joules, vec![1.0, 0.5, 0.125]);

        drop(client);
        token.cancel();
        server.await.unwrap().unwrap();
    }
}

use std::fmt;

use crate::report::{PowerReport, StatsReport};

/// Outcome of evaluating one configuration.
///
/// Energy and EDP exist only when CPI, leakage and runtime dynamic power were
/// all read; a result lacking any of them is unmeasurable and carries a
/// failure note instead.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    cpi: Option<f64>,
    total_leakage: Option<f64>,
    runtime_dynamic: Option<f64>,
    energy: Option<f64>,
    edp: Option<f64>,
    pub ipc: Option<f64>,
    pub l1i_miss_rate: Option<f64>,
    pub l1d_miss_rate: Option<f64>,
    pub l2_miss_rate: Option<f64>,
    failure: Option<String>,
}

impl TrialResult {
    pub fn from_readings(
        cpi: Option<f64>,
        total_leakage: Option<f64>,
        runtime_dynamic: Option<f64>,
    ) -> Self {
        let (energy, edp, failure) = match (cpi, total_leakage, runtime_dynamic) {
            (Some(cpi), Some(leakage), Some(dynamic)) => {
                let energy = energy(leakage, dynamic, cpi);
                (Some(energy), Some(energy * cpi), None)
            }
            _ => {
                let missing: Vec<_> = [
                    ("CPI", cpi),
                    ("Total Leakage", total_leakage),
                    ("Runtime Dynamic", runtime_dynamic),
                ]
                .into_iter()
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| name)
                .collect();
                (None, None, Some(format!("missing {}", missing.join(", "))))
            }
        };
        Self {
            cpi,
            total_leakage,
            runtime_dynamic,
            energy,
            edp,
            ipc: None,
            l1i_miss_rate: None,
            l1d_miss_rate: None,
            l2_miss_rate: None,
            failure,
        }
    }

    pub fn from_reports(stats: &StatsReport, power: &PowerReport) -> Self {
        let mut result =
            Self::from_readings(stats.cpi, power.total_leakage, power.runtime_dynamic);
        result.ipc = stats.ipc;
        result.l1i_miss_rate = stats.l1i_miss_rate;
        result.l1d_miss_rate = stats.l1d_miss_rate;
        result.l2_miss_rate = stats.l2_miss_rate;
        result
    }

    /// A trial whose measurement pipeline broke before any report could be read.
    pub fn unmeasurable(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::from_readings(None, None, None)
        }
    }

    pub fn cpi(&self) -> Option<f64> {
        self.cpi
    }

    pub fn total_leakage(&self) -> Option<f64> {
        self.total_leakage
    }

    pub fn runtime_dynamic(&self) -> Option<f64> {
        self.runtime_dynamic
    }

    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn edp(&self) -> Option<f64> {
        self.edp
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_measured(&self) -> bool {
        self.edp.is_some()
    }

    /// True when `self` has an EDP strictly below `edp`.
    pub fn improves_on(&self, edp: f64) -> bool {
        self.edp.is_some_and(|own| own < edp)
    }
}

/// Energy proxy: total power scaled by cycles per instruction.
pub fn energy(total_leakage: f64, runtime_dynamic: f64, cpi: f64) -> f64 {
    (total_leakage + runtime_dynamic) * cpi
}

impl fmt::Display for TrialResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.edp, self.energy, self.cpi) {
            (Some(edp), Some(energy), Some(cpi)) => {
                write!(f, "EDP={edp:.6} energy={energy:.6} CPI={cpi:.4}")
            }
            _ => write!(
                f,
                "unmeasurable ({})",
                self.failure.as_deref().unwrap_or("no metrics")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_energy_and_edp() {
        let result = TrialResult::from_readings(Some(2.0), Some(0.5), Some(1.5));
        assert_eq!(result.energy(), Some(4.0));
        assert_eq!(result.edp(), Some(8.0));
        assert!(result.is_measured());
        assert!(result.failure().is_none());
    }

    #[test]
    fn partial_readings_are_unmeasurable() {
        let cases = [
            (None, Some(0.5), Some(1.5)),
            (Some(2.0), None, Some(1.5)),
            (Some(2.0), Some(0.5), None),
        ];
        for (cpi, leakage, dynamic) in cases {
            let result = TrialResult::from_readings(cpi, leakage, dynamic);
            assert_eq!(result.energy(), None);
            assert_eq!(result.edp(), None);
            assert!(!result.is_measured());
            assert_eq!(result.cpi(), cpi);
            assert_eq!(result.total_leakage(), leakage);
            assert_eq!(result.runtime_dynamic(), dynamic);
        }
    }

    #[test]
    fn failure_names_missing_metrics() {
        let result = TrialResult::from_readings(Some(1.0), None, None);
        assert_eq!(
            result.failure(),
            Some("missing Total Leakage, Runtime Dynamic")
        );
    }

    #[test]
    fn zero_power_still_counts_as_measured() {
        let result = TrialResult::from_readings(Some(1.0), Some(0.0), Some(0.0));
        assert_eq!(result.edp(), Some(0.0));
    }

    #[test]
    fn improvement_is_strict() {
        let result = TrialResult::from_readings(Some(2.0), Some(0.5), Some(1.5));
        assert!(result.improves_on(8.5));
        assert!(!result.improves_on(8.0));
        assert!(!TrialResult::unmeasurable("simulator exited with 1").improves_on(f64::MAX));
    }

    #[test]
    fn carries_cache_metrics_from_reports() {
        let stats = StatsReport {
            cpi: Some(1.0),
            ipc: Some(1.0),
            l1d_miss_rate: Some(0.1),
            ..StatsReport::default()
        };
        let power = PowerReport {
            total_leakage: Some(1.0),
            runtime_dynamic: Some(2.0),
        };
        let result = TrialResult::from_reports(&stats, &power);
        assert_eq!(result.edp(), Some(3.0));
        assert_eq!(result.ipc, Some(1.0));
        assert_eq!(result.l1d_miss_rate, Some(0.1));
        assert_eq!(result.l2_miss_rate, None);
    }
}

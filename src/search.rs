//! Greedy coordinate descent on EDP, one parameter at a time.

use std::io::Write;

use log::info;

use crate::{
    config::{Configuration, ParameterSpace, Workload},
    error::{ExploreError, Result},
    ledger::{Ledger, TrialRecord},
    metrics::TrialResult,
    pipeline::Evaluator,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Best {
    pub edp: f64,
    pub result: TrialResult,
}

impl Best {
    fn from_measured(result: TrialResult) -> Option<Self> {
        result.edp().map(|edp| Self { edp, result })
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub configuration: Configuration,
    pub best: Best,
    pub trials: u64, // candidates evaluated after the baseline
    pub passes: u32,
}

pub struct GreedySearch<'a> {
    space: &'a ParameterSpace,
    baseline: &'a Configuration,
    workload: &'a Workload,
}

impl<'a> GreedySearch<'a> {
    pub fn new(
        space: &'a ParameterSpace,
        baseline: &'a Configuration,
        workload: &'a Workload,
    ) -> Self {
        Self {
            space,
            baseline,
            workload,
        }
    }

    /// Runs passes until one adopts nothing. Ledger iterations continue after
    /// the last row already in `ledger`.
    pub fn run<E, W>(&self, evaluator: &mut E, ledger: &mut Ledger<W>) -> Result<SearchOutcome>
    where
        E: Evaluator,
        W: Write,
    {
        let mut current = self.baseline.clone();
        let tag = format!("base_{}_{}", self.workload.name, current.label());
        let baseline = evaluator.evaluate(self.workload, &current, &tag)?;
        let mut best = match Best::from_measured(baseline.clone()) {
            Some(best) => best,
            None => {
                return Err(ExploreError::BaselineUnmeasurable {
                    reason: baseline.failure().unwrap_or("no EDP").to_string(),
                });
            }
        };
        info!("baseline {} on {}", best.result, self.workload.name);

        let first_iteration = ledger.next_iteration();
        let mut iteration = first_iteration;
        let mut passes = 0u32;
        let mut improved = true;
        while improved {
            improved = false;
            passes += 1;
            info!("pass {passes} from EDP={:.6}", best.edp);

            for axis in self.space.axes() {
                let parameter = axis.parameter;
                let mut best_local = best.clone();
                for value in &axis.values {
                    if current.get(parameter) == Some(value) {
                        continue;
                    }

                    let candidate = current.with(parameter, value.clone());
                    let tag = format!("iter{iteration:04}_{parameter}_{}", candidate.label());
                    info!("[iter {iteration}] trying {parameter}={value}");
                    let result = evaluator.evaluate(self.workload, &candidate, &tag)?;
                    let is_better = result.improves_on(best_local.edp);

                    ledger.append(&TrialRecord {
                        iteration,
                        parameter,
                        value,
                        result: &result,
                        improved: is_better,
                        configuration: &candidate,
                    })?;

                    if is_better {
                        if let Some(next) = Best::from_measured(result) {
                            info!("  improvement: {:.6} -> {:.6}", best_local.edp, next.edp);
                            best_local = next;
                            current = candidate;
                            improved = true;
                        }
                    }
                    iteration += 1;
                }
                best = best_local;
            }
        }

        Ok(SearchOutcome {
            configuration: current,
            best,
            trials: iteration - first_iteration,
            passes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::{
        config::{Axis, ExplorerConfig, ParamValue, Parameter},
        ledger::{LedgerRecord, read_records},
    };

    /// Deterministic objective: EDP is a sum of per-(parameter, value) costs, 1.0 by default.
    struct TableEvaluator {
        costs: HashMap<(Parameter, ParamValue), f64>,
        unmeasurable: Vec<(Parameter, ParamValue)>,
        calls: Vec<(Configuration, String)>,
    }

    impl TableEvaluator {
        fn new(costs: &[(Parameter, ParamValue, f64)]) -> Self {
            Self {
                costs: costs
                    .iter()
                    .map(|(p, v, c)| ((*p, v.clone()), *c))
                    .collect(),
                unmeasurable: Vec::new(),
                calls: Vec::new(),
            }
        }
    }

    impl Evaluator for TableEvaluator {
        fn evaluate(
            &mut self,
            _workload: &Workload,
            candidate: &Configuration,
            tag: &str,
        ) -> Result<TrialResult> {
            self.calls.push((candidate.clone(), tag.to_string()));
            if candidate
                .iter()
                .any(|(p, v)| self.unmeasurable.contains(&(p, v.clone())))
            {
                return Ok(TrialResult::from_readings(Some(1.0), None, Some(1.0)));
            }
            let edp: f64 = candidate
                .iter()
                .map(|(p, v)| self.costs.get(&(p, v.clone())).copied().unwrap_or(1.0))
                .sum();
            // cpi = 1 makes energy == edp == leakage + dynamic
            Ok(TrialResult::from_readings(Some(1.0), Some(edp), Some(0.0)))
        }
    }

    fn v(s: &str) -> ParamValue {
        ParamValue::from(s)
    }

    fn run(
        config: &ExplorerConfig,
        evaluator: &mut TableEvaluator,
    ) -> (Result<SearchOutcome>, Vec<LedgerRecord>) {
        let mut ledger = Ledger::from_writer(Vec::new(), true).unwrap();
        let workload = config.workload(None).unwrap();
        let outcome = GreedySearch::new(&config.parameters, &config.baseline, workload)
            .run(evaluator, &mut ledger);
        let bytes = ledger.into_inner().unwrap();
        (outcome, read_records(bytes.as_slice()).unwrap())
    }

    /// Rows in a pass where nothing is adopted.
    fn trials_per_pass(config: &ExplorerConfig) -> usize {
        config
            .parameters
            .axes()
            .iter()
            .map(|axis| axis.values.len() - 1)
            .sum()
    }

    #[test]
    fn no_improvement_stops_after_one_pass() {
        let config = ExplorerConfig::default();
        // Every value other than the baseline's costs more.
        let mut evaluator = TableEvaluator::new(&[
            (Parameter::L1iSize, v("32kB"), 2.0),
            (Parameter::L1iSize, v("128kB"), 2.0),
            (Parameter::L1dSize, v("32kB"), 2.0),
            (Parameter::L1dSize, v("128kB"), 2.0),
            (Parameter::L2Size, v("256kB"), 2.0),
            (Parameter::L2Size, v("1MB"), 2.0),
            (Parameter::FetchWidth, ParamValue::Int(2), 2.0),
            (Parameter::FetchWidth, ParamValue::Int(6), 2.0),
            (Parameter::CommitWidth, ParamValue::Int(2), 2.0),
            (Parameter::CommitWidth, ParamValue::Int(6), 2.0),
            (Parameter::BranchPredictorType, ParamValue::Int(7), 2.0),
        ]);
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        assert_eq!(outcome.passes, 1);
        assert_eq!(outcome.configuration, config.baseline);
        assert_eq!(outcome.best.edp, 6.0);
        assert_eq!(records.len(), trials_per_pass(&config));
        assert_eq!(outcome.trials as usize, records.len());
        assert!(records.iter().all(|r| !r.is_improvement()));
        // baseline + one evaluation per row
        assert_eq!(evaluator.calls.len(), records.len() + 1);
    }

    #[test]
    fn improvement_is_adopted_immediately_and_triggers_another_pass() {
        let config = ExplorerConfig::default();
        let mut evaluator = TableEvaluator::new(&[(Parameter::L1iSize, v("32kB"), 0.5)]);
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.configuration.get(Parameter::L1iSize), Some(&v("32kB")));
        assert_eq!(outcome.best.edp, 5.5);

        let first = &records[0];
        assert_eq!((first.parameter.as_str(), first.value.as_str()), ("l1i_size", "32kB"));
        assert!(first.is_improvement());

        // Later parameters in the same pass run on top of the adopted value.
        let l2_row = records.iter().find(|r| r.parameter == "l2_size").unwrap();
        let blob: Configuration = serde_json::from_str(&l2_row.configuration).unwrap();
        assert_eq!(blob.get(Parameter::L1iSize), Some(&v("32kB")));

        assert_eq!(records.iter().filter(|r| r.is_improvement()).count(), 1);
        // After adopting 32kB, the old 64kB value becomes a candidate in the same pass.
        assert_eq!(records.len(), 2 * trials_per_pass(&config) + 1);
    }

    #[test]
    fn current_value_is_never_evaluated() {
        let config = ExplorerConfig::default();
        let mut evaluator = TableEvaluator::new(&[
            (Parameter::L2Size, v("1MB"), 0.1),
            (Parameter::FetchWidth, ParamValue::Int(6), 0.2),
        ]);
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        // Replay the ledger: no row may retry the value current at that moment.
        let mut current = config.baseline.clone();
        for record in &records {
            let parameter: Parameter = record.parameter.parse().unwrap();
            let candidate: Configuration = serde_json::from_str(&record.configuration).unwrap();
            assert_ne!(current.get(parameter).unwrap().to_string(), record.value);
            assert_eq!(candidate.get(parameter).unwrap().to_string(), record.value);
            if record.is_improvement() {
                current = candidate;
            }
        }
        assert_eq!(current, outcome.configuration);
    }

    #[test]
    fn iterations_are_contiguous() {
        let config = ExplorerConfig::default();
        let mut evaluator = TableEvaluator::new(&[
            (Parameter::L1dSize, v("128kB"), 0.4),
            (Parameter::CommitWidth, ParamValue::Int(2), 0.9),
        ]);
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        let iterations: Vec<_> = records.iter().map(|r| r.iteration).collect();
        let expected: Vec<_> = (1..=records.len() as u64).collect();
        assert_eq!(iterations, expected);
        assert_eq!(outcome.trials, records.len() as u64);
    }

    #[test]
    fn rerun_continues_the_ledger_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let config = ExplorerConfig::default();
        let workload = config.workload(None).unwrap();
        let search = GreedySearch::new(&config.parameters, &config.baseline, workload);

        let mut trials = Vec::new();
        for _ in 0..2 {
            let mut evaluator = TableEvaluator::new(&[]);
            let mut ledger = Ledger::open(&path).unwrap();
            trials.push(search.run(&mut evaluator, &mut ledger).unwrap().trials);
        }
        assert_eq!(trials, vec![11, 11]);

        let records = crate::ledger::read_ledger(&path).unwrap();
        let iterations: Vec<_> = records.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, (1..=22).collect::<Vec<u64>>());
    }

    #[test]
    fn ties_keep_the_earlier_value() {
        let mut config = ExplorerConfig::default();
        config.parameters = ParameterSpace::from(vec![Axis::new(
            Parameter::L2Size,
            [v("256kB"), v("512kB"), v("1MB")],
        )]);
        let mut evaluator = TableEvaluator::new(&[
            (Parameter::L2Size, v("256kB"), 0.5),
            (Parameter::L2Size, v("1MB"), 0.5),
        ]);
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        assert_eq!(outcome.configuration.get(Parameter::L2Size), Some(&v("256kB")));
        let flags: Vec<_> = records.iter().map(|r| r.is_improvement()).collect();
        // pass 1: 256kB YES, 512kB NO, 1MB tie NO; pass 2: 512kB NO, 1MB tie NO
        assert_eq!(flags, vec![true, false, false, false, false]);
        assert_eq!(outcome.passes, 2);
    }

    #[test]
    fn best_edp_never_increases_within_a_parameter() {
        let mut config = ExplorerConfig::default();
        config.parameters = ParameterSpace::from(vec![Axis::new(
            Parameter::FetchWidth,
            [2, 3, 4, 5, 6, 8].map(ParamValue::Int),
        )]);
        let mut evaluator = TableEvaluator::new(&[
            (Parameter::FetchWidth, ParamValue::Int(2), 0.8),
            (Parameter::FetchWidth, ParamValue::Int(3), 0.9),
            (Parameter::FetchWidth, ParamValue::Int(5), 0.3),
            (Parameter::FetchWidth, ParamValue::Int(6), 0.6),
            (Parameter::FetchWidth, ParamValue::Int(8), 0.2),
        ]);
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        let mut running = 6.0;
        let mut adopted = Vec::new();
        for record in records.iter().take(6) {
            if record.is_improvement() {
                assert!(record.edp < running);
                running = record.edp;
                adopted.push(record.value.clone());
            } else {
                assert!(record.edp >= running);
            }
        }
        assert_eq!(adopted, vec!["2", "5", "8"]);
        assert_eq!(
            outcome.configuration.get(Parameter::FetchWidth),
            Some(&ParamValue::Int(8))
        );
        assert!((outcome.best.edp - 5.2).abs() < 1e-12);
    }

    #[test]
    fn unmeasurable_candidates_are_recorded_and_skipped() {
        let config = ExplorerConfig::default();
        let mut evaluator = TableEvaluator::new(&[(Parameter::L1dSize, v("32kB"), 0.1)]);
        evaluator.unmeasurable.push((Parameter::L1dSize, v("32kB")));
        let (outcome, records) = run(&config, &mut evaluator);
        let outcome = outcome.unwrap();

        let row = records
            .iter()
            .find(|r| r.parameter == "l1d_size" && r.value == "32kB")
            .unwrap();
        assert!(row.edp.is_nan());
        assert!(row.energy.is_nan());
        assert_eq!(row.cpi, 1.0);
        assert!(!row.is_improvement());
        assert_eq!(outcome.passes, 1);
        assert_eq!(records.len(), trials_per_pass(&config));
    }

    #[test]
    fn unmeasurable_baseline_aborts() {
        let config = ExplorerConfig::default();
        let mut evaluator = TableEvaluator::new(&[]);
        evaluator.unmeasurable.push((Parameter::L1iSize, v("64kB")));
        let (outcome, records) = run(&config, &mut evaluator);

        assert!(matches!(
            outcome,
            Err(ExploreError::BaselineUnmeasurable { .. })
        ));
        assert!(records.is_empty());
    }

    #[test]
    fn tags_are_unique_across_passes() {
        let config = ExplorerConfig::default();
        let mut evaluator = TableEvaluator::new(&[
            (Parameter::L1iSize, v("128kB"), 0.5),
            (Parameter::BranchPredictorType, ParamValue::Int(7), 0.5),
        ]);
        let (outcome, _) = run(&config, &mut evaluator);
        assert_eq!(outcome.unwrap().passes, 2);

        assert!(evaluator.calls[0].1.starts_with("base_"));
        let tags: HashSet<_> = evaluator.calls.iter().map(|(_, tag)| tag.as_str()).collect();
        assert_eq!(tags.len(), evaluator.calls.len());
    }
}

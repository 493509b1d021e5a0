//! Background execution of [`simulate`] with at most one run in flight.
//!
//! The worker thread owns its own generator and reports exactly once through
//! a single-slot channel. Abandoning a run drops the receiving end; the
//! worker finishes on its own and its late result is discarded.

use super::{SimulationInputs, simulate};
use crate::common::EngineConfig;
use crate::domain::{AblationError, AblationResult, InstrumentParameters, SimulationResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug)]
pub enum RunPoll {
    /// Nothing was submitted, or the last result was already collected.
    Idle,
    Pending,
    Finished(AblationResult<SimulationResult>),
}

struct InFlight {
    run_id: u64,
    receiver: Receiver<AblationResult<SimulationResult>>,
    handle: JoinHandle<()>,
}

pub struct SimulationRunner {
    inputs: Arc<SimulationInputs>,
    config: Arc<EngineConfig>,
    in_flight: Option<InFlight>,
    next_run_id: u64,
}

impl SimulationRunner {
    pub fn new(inputs: Arc<SimulationInputs>, config: EngineConfig) -> Self {
        Self {
            inputs,
            config: Arc::new(config),
            in_flight: None,
            next_run_id: 1,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts a run on a worker thread. `seed` fixes the noise realisation;
    /// without it the generator is seeded from OS entropy.
    pub fn submit(
        &mut self,
        params: InstrumentParameters,
        seed: Option<u64>,
    ) -> AblationResult<u64> {
        if let Some(current) = &self.in_flight {
            return Err(AblationError::internal(
                "RUN.BUSY",
                format!("simulation run {} is still in flight", current.run_id),
            ));
        }

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let (sender, receiver) = bounded(1);
        let inputs = Arc::clone(&self.inputs);
        let config = Arc::clone(&self.config);
        let handle = thread::Builder::new()
            .name(format!("ablation-run-{run_id}"))
            .spawn(move || {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let outcome = simulate(&inputs, &params, &config, &mut rng);
                if sender.send(outcome).is_err() {
                    info!(run_id, "simulation result discarded after abandon");
                }
            })
            .map_err(|error| {
                AblationError::internal(
                    "RUN.WORKER_SPAWN",
                    format!("failed to start simulation worker: {error}"),
                )
            })?;

        info!(run_id, seeded = seed.is_some(), "simulation submitted");
        self.in_flight = Some(InFlight {
            run_id,
            receiver,
            handle,
        });
        Ok(run_id)
    }

    pub fn poll(&mut self) -> RunPoll {
        let Some(current) = &self.in_flight else {
            return RunPoll::Idle;
        };
        match current.receiver.try_recv() {
            Ok(outcome) => {
                self.in_flight = None;
                RunPoll::Finished(outcome)
            }
            Err(TryRecvError::Empty) => RunPoll::Pending,
            Err(TryRecvError::Disconnected) => RunPoll::Finished(Err(self.worker_lost())),
        }
    }

    /// Blocks until the in-flight run reports.
    pub fn wait(&mut self) -> AblationResult<SimulationResult> {
        let Some(current) = &self.in_flight else {
            return Err(idle_error());
        };
        match current.receiver.recv() {
            Ok(outcome) => {
                self.in_flight = None;
                outcome
            }
            Err(_) => Err(self.worker_lost()),
        }
    }

    /// Like [`Self::wait`] but gives up after `timeout`, leaving the run in
    /// flight and returning `None`.
    pub fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<AblationResult<SimulationResult>> {
        let Some(current) = &self.in_flight else {
            return Some(Err(idle_error()));
        };
        match current.receiver.recv_timeout(timeout) {
            Ok(outcome) => {
                self.in_flight = None;
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(self.worker_lost())),
        }
    }

    /// Drops the in-flight run. Returns `false` when nothing was running.
    pub fn abandon(&mut self) -> bool {
        match self.in_flight.take() {
            Some(current) => {
                warn!(run_id = current.run_id, "simulation abandoned");
                true
            }
            None => false,
        }
    }

    /// Reaps a worker whose channel closed without a result.
    fn worker_lost(&mut self) -> AblationError {
        let Some(current) = self.in_flight.take() else {
            return idle_error();
        };
        let detail = panic_detail(current.handle.join());
        warn!(run_id = current.run_id, %detail, "simulation worker lost");
        AblationError::internal(
            "RUN.WORKER_LOST",
            format!("simulation run {} failed: {detail}", current.run_id),
        )
    }
}

/// Readable reason for a joined worker that never sent its result.
fn panic_detail(joined: thread::Result<()>) -> String {
    match joined {
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Ok(()) => "worker exited without a result".to_string(),
    }
}

fn idle_error() -> AblationError {
    AblationError::internal("RUN.IDLE", "no simulation is in flight")
}

#[cfg(test)]
mod tests {
    use super::{RunPoll, SimulationRunner, panic_detail};
    use crate::common::{AlignmentConfig, EngineConfig};
    use crate::domain::{AblationErrorCategory, InstrumentParameters};
    use crate::engine::{SimulationInputs, simulate};
    use crate::stages::CraterProfile;
    use crate::tables::{LookupTables, WashoutTable};
    use ndarray::{Array2, Array3};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn small_config() -> EngineConfig {
        EngineConfig {
            alignment: AlignmentConfig {
                window_rows: 8,
                window_cols: 8,
                ..AlignmentConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn inputs(image: Array2<f64>) -> Arc<SimulationInputs> {
        let profiles =
            Array3::from_shape_fn((12, 1, 1), |(t, _, _)| 1000.0 * (-(t as f64) / 3.0).exp());
        let tables = LookupTables::new(
            vec!["Na23".to_string()],
            vec!["low".to_string()],
            None,
            WashoutTable::new(profiles).expect("washout table should build"),
        )
        .expect("tables should build");
        Arc::new(SimulationInputs::new(
            image,
            CraterProfile::Default(Array2::ones((3, 3))),
            tables,
        ))
    }

    fn gradient_image() -> Array2<f64> {
        // Wide enough that every candidate window still overlaps the signal.
        Array2::from_shape_fn((160, 480), |(r, c)| {
            1.0 + (r as f64 / 25.0).sin() + 0.5 * (c as f64 / 30.0).cos()
        })
    }

    #[test]
    fn seeded_run_matches_direct_simulation() {
        let inputs = inputs(gradient_image());
        let config = small_config();
        let params = InstrumentParameters::default();
        let direct = simulate(&inputs, &params, &config, &mut StdRng::seed_from_u64(9))
            .expect("direct run should succeed");

        let mut runner = SimulationRunner::new(Arc::clone(&inputs), config);
        runner.submit(params, Some(9)).expect("submit should succeed");
        let background = runner.wait().expect("background run should succeed");
        assert_eq!(background, direct);
        assert!(!runner.is_busy());
    }

    #[test]
    fn second_submit_is_rejected_until_the_result_is_collected() {
        let mut runner = SimulationRunner::new(inputs(gradient_image()), small_config());
        let first = runner
            .submit(InstrumentParameters::default(), Some(1))
            .unwrap();
        let error = runner
            .submit(InstrumentParameters::default(), Some(2))
            .expect_err("runner is busy");
        assert_eq!(error.placeholder(), "RUN.BUSY");
        assert_eq!(error.category(), AblationErrorCategory::InternalError);

        let outcome = runner
            .wait_timeout(Duration::from_secs(60))
            .expect("run should finish in time");
        assert!(outcome.is_ok());
        let second = runner
            .submit(InstrumentParameters::default(), Some(2))
            .unwrap();
        assert!(second > first);
        assert!(runner.abandon());
    }

    #[test]
    fn polling_reports_pending_then_finished_once() {
        let mut runner = SimulationRunner::new(inputs(gradient_image()), small_config());
        assert!(matches!(runner.poll(), RunPoll::Idle));
        runner
            .submit(InstrumentParameters::default(), Some(5))
            .unwrap();

        let mut finished = None;
        for _ in 0..6000 {
            match runner.poll() {
                RunPoll::Pending => thread::sleep(Duration::from_millis(10)),
                RunPoll::Finished(outcome) => {
                    finished = Some(outcome);
                    break;
                }
                RunPoll::Idle => panic!("run vanished while in flight"),
            }
        }
        assert!(finished.expect("run should finish").is_ok());
        assert!(matches!(runner.poll(), RunPoll::Idle));
    }

    #[test]
    fn failures_are_delivered_as_a_single_error() {
        let mut runner =
            SimulationRunner::new(inputs(Array2::from_elem((160, 160), 0.4)), small_config());
        runner
            .submit(InstrumentParameters::default(), Some(3))
            .unwrap();
        let error = runner.wait().expect_err("constant image must fail");
        assert_eq!(error.placeholder(), "RUN.NUMERIC_DEGENERACY");
    }

    #[test]
    fn abandon_frees_the_runner() {
        let mut runner = SimulationRunner::new(inputs(gradient_image()), small_config());
        assert!(!runner.abandon());
        runner
            .submit(InstrumentParameters::default(), None)
            .unwrap();
        assert!(runner.abandon());
        assert!(!runner.is_busy());
        let error = runner.wait().expect_err("nothing in flight");
        assert_eq!(error.placeholder(), "RUN.IDLE");
    }

    #[test]
    fn panic_payloads_become_readable_details() {
        let borrowed = thread::spawn(|| panic!("kernel exploded")).join();
        assert_eq!(panic_detail(borrowed), "kernel exploded");

        let owned = thread::spawn(|| std::panic::panic_any(String::from("table vanished"))).join();
        assert_eq!(panic_detail(owned), "table vanished");

        let opaque = thread::spawn(|| std::panic::panic_any(42_u32)).join();
        assert_eq!(panic_detail(opaque), "unknown panic");

        assert_eq!(panic_detail(Ok(())), "worker exited without a result");
    }
}

//! Keeps repetition rate, scanning speed and dosage mutually consistent.
//!
//! The authoritative rate is taken as given (after clamping) and the other
//! one is derived through `SS = RR * beam / D`. When the repetition rate has
//! to be derived and the ratio is fractional it is rounded up if the scanning
//! speed went up since the last settled state and down otherwise. Clamping
//! the derived rate feeds back into the authoritative one, so the loop runs
//! until nothing changes or the iteration budget is spent.

use crate::common::{EngineConfig, MAX_RECONCILE_ITERATIONS, RateBounds};
use crate::domain::{Authority, ParameterOperation, ReconcilerState};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub state: ReconcilerState,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterReconciler {
    beam_size_um: u64,
    allowed_dosages: Vec<u32>,
    repetition_rate_bounds: RateBounds,
    scanning_speed_bounds: RateBounds,
    max_iterations: usize,
}

impl ParameterReconciler {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            beam_size_um: u64::from(config.beam_size_um.max(1)),
            allowed_dosages: config.allowed_dosages.clone(),
            repetition_rate_bounds: config.repetition_rate_bounds,
            scanning_speed_bounds: config.scanning_speed_bounds,
            max_iterations: config
                .max_reconcile_iterations
                .clamp(1, MAX_RECONCILE_ITERATIONS),
        }
    }

    pub fn allowed_dosages(&self) -> &[u32] {
        &self.allowed_dosages
    }

    /// Lowest scanning speed reachable at `dosage`: one pulse per second or
    /// the configured minimum, whichever is larger.
    pub fn minimum_scanning_speed(&self, dosage: u32) -> u64 {
        let one_hertz = self.beam_size_um.div_ceil(u64::from(dosage.max(1)));
        one_hertz.max(u64::from(self.scanning_speed_bounds.min))
    }

    /// Snaps a requested dosage into the allowed set.
    ///
    /// Allowed values pass through. Anything else moves one step from the
    /// previous dosage in the direction of the request, stopping at either
    /// end of the list.
    pub fn snap_dosage(&self, requested: u32, previous: u32) -> u32 {
        let allowed = &self.allowed_dosages;
        if allowed.contains(&requested) {
            return requested;
        }
        let Some(position) = allowed.iter().position(|value| *value == previous) else {
            return self.nearest_dosage(requested);
        };
        let index = if requested > previous {
            (position + 1).min(allowed.len() - 1)
        } else {
            position.saturating_sub(1)
        };
        allowed[index]
    }

    fn nearest_dosage(&self, requested: u32) -> u32 {
        self.allowed_dosages
            .iter()
            .copied()
            .min_by_key(|value| value.abs_diff(requested))
            .unwrap_or(requested.max(1))
    }

    pub fn apply(
        &self,
        state: ReconcilerState,
        operation: ParameterOperation,
    ) -> ReconcileOutcome {
        let mut next = state;
        match operation {
            ParameterOperation::SetDosage(requested) => {
                next.dosage = self.snap_dosage(requested, state.dosage);
                if next.dosage != requested {
                    debug!(requested, snapped = next.dosage, "dosage snapped to allowed value");
                }
            }
            ParameterOperation::SetRepetitionRate(value) => {
                if state.uses_repetition_rate() {
                    next.repetition_rate = value;
                } else {
                    warn!(
                        %operation,
                        authority = %state.authority,
                        "ignoring operation on derived rate"
                    );
                }
            }
            ParameterOperation::SetScanningSpeed(value) => {
                if state.uses_repetition_rate() {
                    warn!(
                        %operation,
                        authority = %state.authority,
                        "ignoring operation on derived rate"
                    );
                } else {
                    next.scanning_speed = value;
                }
            }
            ParameterOperation::SetAuthority(authority) => next.authority = authority,
        }
        self.settle(next)
    }

    pub fn settle(&self, state: ReconcilerState) -> ReconcileOutcome {
        let mut current = state;
        if !self.allowed_dosages.contains(&current.dosage) {
            let snapped = self.nearest_dosage(current.dosage);
            warn!(dosage = current.dosage, snapped, "dosage outside the allowed set");
            current.dosage = snapped;
        }

        let mut rates = (
            u64::from(current.repetition_rate),
            u64::from(current.scanning_speed),
        );
        let mut converged = false;
        let mut iterations = 0;
        while iterations < self.max_iterations {
            iterations += 1;
            let next = self.settle_once(rates, &current);
            if next == rates && self.is_consistent(next, current.dosage) {
                converged = true;
                break;
            }
            rates = next;
        }

        if !converged {
            warn!(
                repetition_rate = rates.0,
                scanning_speed = rates.1,
                dosage = current.dosage,
                iterations,
                "BoundViolation: rates did not settle, keeping last values"
            );
        }

        current.repetition_rate = saturate(rates.0);
        current.scanning_speed = saturate(rates.1);
        current.previous_scanning_speed = current.scanning_speed;
        ReconcileOutcome {
            state: current,
            iterations,
            converged,
        }
    }

    fn settle_once(
        &self,
        (repetition_rate, scanning_speed): (u64, u64),
        state: &ReconcilerState,
    ) -> (u64, u64) {
        let dosage = u64::from(state.dosage);
        let rr_bounds = widen(self.repetition_rate_bounds);
        let ss_bounds = widen(self.scanning_speed_bounds);

        let (mut rr, mut ss) = match state.authority {
            Authority::RepetitionRate => {
                let rr = repetition_rate.clamp(rr_bounds.0, rr_bounds.1);
                (rr, rr * self.beam_size_um / dosage)
            }
            Authority::ScanningSpeed => {
                let ss = scanning_speed.clamp(ss_bounds.0, ss_bounds.1);
                let numerator = ss * dosage;
                let rr = if numerator % self.beam_size_um == 0 {
                    numerator / self.beam_size_um
                } else if ss > u64::from(state.previous_scanning_speed) {
                    numerator.div_ceil(self.beam_size_um)
                } else {
                    numerator / self.beam_size_um
                };
                (rr, rr * self.beam_size_um / dosage)
            }
        };

        let minimum = self.minimum_scanning_speed(state.dosage);
        if ss < minimum {
            rr = 1;
            ss = minimum;
        }

        let clamped_rr = rr.clamp(rr_bounds.0, rr_bounds.1);
        let clamped_ss = ss.clamp(ss_bounds.0, ss_bounds.1);
        match state.authority {
            Authority::RepetitionRate if clamped_ss != ss => {
                // Derived speed hit a bound; pull the rate back inside it.
                let rr = if clamped_ss > ss {
                    (clamped_ss * dosage).div_ceil(self.beam_size_um)
                } else {
                    clamped_ss * dosage / self.beam_size_um
                };
                (rr, clamped_ss)
            }
            Authority::ScanningSpeed if clamped_rr != rr => {
                (clamped_rr, clamped_rr * self.beam_size_um / dosage)
            }
            _ => (clamped_rr, clamped_ss),
        }
    }

    fn is_consistent(&self, (rr, ss): (u64, u64), dosage: u32) -> bool {
        let (rr_min, rr_max) = widen(self.repetition_rate_bounds);
        let (ss_min, ss_max) = widen(self.scanning_speed_bounds);
        (rr_min..=rr_max).contains(&rr)
            && (ss_min..=ss_max).contains(&ss)
            && ss == rr * self.beam_size_um / u64::from(dosage)
    }
}

fn widen(bounds: RateBounds) -> (u64, u64) {
    (u64::from(bounds.min), u64::from(bounds.max))
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Applies one operation and returns the settled state.
pub fn reconcile(
    state: ReconcilerState,
    operation: ParameterOperation,
    config: &EngineConfig,
) -> ReconcilerState {
    reconcile_with_report(state, operation, config).state
}

pub fn reconcile_with_report(
    state: ReconcilerState,
    operation: ParameterOperation,
    config: &EngineConfig,
) -> ReconcileOutcome {
    let outcome = ParameterReconciler::from_config(config).apply(state, operation);
    debug!(
        %operation,
        repetition_rate = outcome.state.repetition_rate,
        scanning_speed = outcome.state.scanning_speed,
        dosage = outcome.state.dosage,
        iterations = outcome.iterations,
        "parameters reconciled"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::{ParameterReconciler, reconcile, reconcile_with_report};
    use crate::common::EngineConfig;
    use crate::domain::{Authority, ParameterOperation, ReconcilerState};

    fn settled(state: ReconcilerState, config: &EngineConfig) -> ReconcilerState {
        ParameterReconciler::from_config(config).settle(state).state
    }

    #[test]
    fn default_state_is_already_settled() {
        let config = EngineConfig::default();
        let state = ReconcilerState::default();
        let outcome = reconcile_with_report(
            state,
            ParameterOperation::SetRepetitionRate(1000),
            &config,
        );
        assert!(outcome.converged);
        assert_eq!(outcome.state, state);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn rates_stay_in_bounds_for_every_dosage() {
        let config = EngineConfig::default();
        for dosage in [1, 2, 5, 10, 20] {
            for repetition_rate in (10..=1000).step_by(7).chain([1000]) {
                let state =
                    ReconcilerState::new(repetition_rate, 2000, dosage, Authority::RepetitionRate);
                let outcome = ParameterReconciler::from_config(&config).settle(state);
                let next = outcome.state;
                assert!(outcome.converged, "d={dosage} rr={repetition_rate}");
                assert!((10..=1000).contains(&next.repetition_rate), "{next:?}");
                assert!((10..=10_000).contains(&next.scanning_speed), "{next:?}");
                assert_eq!(
                    next.scanning_speed,
                    next.repetition_rate * 20 / next.dosage,
                    "{next:?}"
                );
            }
        }
    }

    #[test]
    fn derived_speed_above_bound_pulls_rate_back() {
        let config = EngineConfig::default();
        let state = ReconcilerState::new(1000, 2000, 1, Authority::RepetitionRate);
        let next = settled(state, &config);
        assert_eq!(next.scanning_speed, 10_000);
        assert_eq!(next.repetition_rate, 500);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let config = EngineConfig::default();
        let start = ReconcilerState::new(733, 2000, 5, Authority::ScanningSpeed);
        let once = reconcile(start, ParameterOperation::SetScanningSpeed(4321), &config);
        let twice = reconcile(
            once,
            ParameterOperation::SetScanningSpeed(once.scanning_speed),
            &config,
        );
        assert_eq!(once, twice);
        let again = reconcile(
            twice,
            ParameterOperation::SetAuthority(Authority::ScanningSpeed),
            &config,
        );
        assert_eq!(twice, again);
    }

    #[test]
    fn toggling_authority_round_trips() {
        let config = EngineConfig::default();
        let start = settled(
            ReconcilerState::new(640, 0, 10, Authority::RepetitionRate),
            &config,
        );
        let speed = reconcile(
            start,
            ParameterOperation::SetAuthority(Authority::ScanningSpeed),
            &config,
        );
        let back = reconcile(
            speed,
            ParameterOperation::SetAuthority(Authority::RepetitionRate),
            &config,
        );
        assert_eq!(speed.authority, Authority::ScanningSpeed);
        assert_eq!(
            (back.repetition_rate, back.scanning_speed),
            (start.repetition_rate, start.scanning_speed)
        );
        assert_eq!(back.authority, Authority::RepetitionRate);
    }

    #[test]
    fn fractional_rate_rounds_with_the_direction_of_change() {
        let config = EngineConfig::default();
        // 20 µm beam and dosage 1: 1 Hz per 20 µm/s.
        let start = settled(
            ReconcilerState::new(100, 2000, 1, Authority::ScanningSpeed),
            &config,
        );
        assert_eq!((start.repetition_rate, start.scanning_speed), (100, 2000));

        let up = reconcile(start, ParameterOperation::SetScanningSpeed(2005), &config);
        assert_eq!((up.repetition_rate, up.scanning_speed), (101, 2020));

        let down = reconcile(start, ParameterOperation::SetScanningSpeed(1995), &config);
        assert_eq!((down.repetition_rate, down.scanning_speed), (99, 1980));
        assert_eq!(down.previous_scanning_speed, 1980);
    }

    #[test]
    fn dosage_snaps_toward_the_requested_direction() {
        let config = EngineConfig::default();
        let start = ReconcilerState::default();
        assert_eq!(start.dosage, 10);

        let up = reconcile(start, ParameterOperation::SetDosage(11), &config);
        assert_eq!(up.dosage, 20);
        let down = reconcile(start, ParameterOperation::SetDosage(9), &config);
        assert_eq!(down.dosage, 5);
        // Far requests still move a single step.
        let far = reconcile(start, ParameterOperation::SetDosage(3), &config);
        assert_eq!(far.dosage, 5);
        let past_end = reconcile(up, ParameterOperation::SetDosage(40), &config);
        assert_eq!(past_end.dosage, 20);
        let below = reconcile(
            ReconcilerState::new(1000, 20_000, 1, Authority::RepetitionRate),
            ParameterOperation::SetDosage(0),
            &config,
        );
        assert_eq!(below.dosage, 1);
    }

    #[test]
    fn dosage_change_rederives_the_dependent_rate() {
        let config = EngineConfig::default();
        let rr_led = reconcile(
            ReconcilerState::default(),
            ParameterOperation::SetDosage(5),
            &config,
        );
        assert_eq!((rr_led.repetition_rate, rr_led.scanning_speed), (1000, 4000));

        let ss_led = reconcile(
            ReconcilerState::new(1000, 2000, 10, Authority::ScanningSpeed),
            ParameterOperation::SetDosage(5),
            &config,
        );
        assert_eq!((ss_led.repetition_rate, ss_led.scanning_speed), (500, 2000));
    }

    #[test]
    fn speed_below_floor_settles_at_lowest_feasible_rate() {
        let config = EngineConfig::default();
        let start = settled(
            ReconcilerState::new(100, 2000, 1, Authority::ScanningSpeed),
            &config,
        );
        let next = reconcile(start, ParameterOperation::SetScanningSpeed(10), &config);
        assert_eq!(next.repetition_rate, 10);
        assert_eq!(next.scanning_speed, 200);

        let reconciler = ParameterReconciler::from_config(&config);
        assert_eq!(reconciler.minimum_scanning_speed(1), 20);
        assert_eq!(reconciler.minimum_scanning_speed(20), 10);
    }

    #[test]
    fn operations_on_the_derived_rate_are_ignored() {
        let config = EngineConfig::default();
        let start = ReconcilerState::default();
        let next = reconcile(start, ParameterOperation::SetScanningSpeed(5000), &config);
        assert_eq!(next, start);

        let speed_led = settled(
            ReconcilerState::new(1000, 2000, 10, Authority::ScanningSpeed),
            &config,
        );
        let next = reconcile(speed_led, ParameterOperation::SetRepetitionRate(10), &config);
        assert_eq!(next, speed_led);
    }

    #[test]
    fn out_of_range_requests_clamp() {
        let config = EngineConfig::default();
        let next = reconcile(
            ReconcilerState::default(),
            ParameterOperation::SetRepetitionRate(5_000_000),
            &config,
        );
        assert_eq!((next.repetition_rate, next.scanning_speed), (1000, 2000));

        let speed_led = ReconcilerState::new(1000, 2000, 20, Authority::ScanningSpeed);
        let next = reconcile(speed_led, ParameterOperation::SetScanningSpeed(9000), &config);
        // RR would be 9000 Hz; the rate bound wins and the speed follows it.
        assert_eq!((next.repetition_rate, next.scanning_speed), (1000, 1000));
    }

    #[test]
    fn tiny_iteration_budget_reports_non_convergence() {
        let config = EngineConfig {
            max_reconcile_iterations: 1,
            ..EngineConfig::default()
        };
        let state = ReconcilerState::new(1000, 2000, 20, Authority::ScanningSpeed);
        let outcome =
            reconcile_with_report(state, ParameterOperation::SetScanningSpeed(9000), &config);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert!((10..=1000).contains(&outcome.state.repetition_rate));
    }
}

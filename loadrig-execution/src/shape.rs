//! Load shapes and the piecewise curves behind them

pub use loadrig_config::RampMode;
use loadrig_config::LoadShapeConfig;
use std::time::Duration;

/// One `(duration, target)` segment of a curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub duration: Duration,
    pub target: f64,
}

impl Stage {
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// Piecewise linear (or stepped) curve starting at `start`
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub start: f64,
    pub stages: Vec<Stage>,
    pub ramp: RampMode,
}

impl Curve {
    pub fn new(start: f64, stages: Vec<Stage>, ramp: RampMode) -> Self {
        Self { start, stages, ramp }
    }

    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Curve value at `elapsed`; past the end the last target holds
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        let mut offset = Duration::ZERO;
        let mut previous = self.start;

        for stage in &self.stages {
            let end = offset + stage.duration;
            if elapsed < end {
                return match self.ramp {
                    RampMode::Step => stage.target,
                    RampMode::Linear => {
                        let progress = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                        previous + (stage.target - previous) * progress
                    }
                };
            }
            offset = end;
            previous = stage.target;
        }

        previous
    }

    /// Offset at which the curve's integral reaches `n`, or `None` if the
    /// curve ends first. Used to place the n-th iteration start of an
    /// arrival-rate shape.
    pub fn time_for_integral(&self, n: f64) -> Option<Duration> {
        let mut offset = 0.0;
        let mut accumulated = 0.0;
        let mut previous = self.start;

        for stage in &self.stages {
            let d = stage.duration.as_secs_f64();
            let (r0, r1) = match self.ramp {
                RampMode::Linear => (previous, stage.target),
                RampMode::Step => (stage.target, stage.target),
            };
            let area = (r0 + r1) / 2.0 * d;

            if d > 0.0 && n < accumulated + area {
                let t = solve_segment(r0, r1, d, n - accumulated);
                return Some(Duration::from_secs_f64(offset + t));
            }

            accumulated += area;
            offset += d;
            previous = stage.target;
        }

        None
    }

    /// Integral over the whole curve
    pub fn total(&self) -> f64 {
        let mut previous = self.start;
        let mut total = 0.0;
        for stage in &self.stages {
            let (r0, r1) = match self.ramp {
                RampMode::Linear => (previous, stage.target),
                RampMode::Step => (stage.target, stage.target),
            };
            total += (r0 + r1) / 2.0 * stage.duration.as_secs_f64();
            previous = stage.target;
        }
        total
    }
}

/// Solve `r0*t + (r1-r0)/(2d)*t^2 = c` for the first `t` in `[0, d]`
fn solve_segment(r0: f64, r1: f64, d: f64, c: f64) -> f64 {
    let a = (r1 - r0) / (2.0 * d);
    let t = if a.abs() < 1e-12 {
        c / r0
    } else {
        let discriminant = (r0 * r0 + 4.0 * a * c).max(0.0);
        (-r0 + discriminant.sqrt()) / (2.0 * a)
    };
    t.clamp(0.0, d)
}

/// Open-model shape: iteration starts follow a rate curve, executed by a
/// bounded pool of virtual users
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRate {
    /// Iterations per second
    pub curve: Curve,
    pub pre_allocated_vus: u32,
    pub max_vus: u32,
}

/// How iterations are scheduled over the run
#[derive(Debug, Clone, PartialEq)]
pub enum LoadShape {
    /// `vus` users looping back-to-back for `duration`
    ConstantVus { vus: u32, duration: Duration },
    /// Concurrency following `curve`; retired users finish their iteration
    /// within `graceful_ramp_down`
    RampingVus {
        curve: Curve,
        graceful_ramp_down: Duration,
    },
    ArrivalRate(ArrivalRate),
    /// Each of `vus` users runs `iterations` iterations, within `max_duration`
    PerVuIterations {
        vus: u32,
        iterations: u32,
        max_duration: Duration,
    },
    /// `vus` users share `iterations` iterations, within `max_duration`
    SharedIterations {
        vus: u32,
        iterations: u32,
        max_duration: Duration,
    },
}

impl LoadShape {
    pub fn duration(&self) -> Duration {
        match self {
            LoadShape::ConstantVus { duration, .. } => *duration,
            LoadShape::RampingVus { curve, .. } => curve.duration(),
            LoadShape::ArrivalRate(arrival) => arrival.curve.duration(),
            LoadShape::PerVuIterations { max_duration, .. }
            | LoadShape::SharedIterations { max_duration, .. } => *max_duration,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LoadShape::ConstantVus { .. } => "constant_vus",
            LoadShape::RampingVus { .. } => "ramping_vus",
            LoadShape::ArrivalRate(_) => "arrival_rate",
            LoadShape::PerVuIterations { .. } => "per_vu_iterations",
            LoadShape::SharedIterations { .. } => "shared_iterations",
        }
    }
}

fn per_second(target: u32, time_unit: Duration) -> f64 {
    f64::from(target) / time_unit.as_secs_f64()
}

impl From<&LoadShapeConfig> for LoadShape {
    fn from(config: &LoadShapeConfig) -> Self {
        match config {
            LoadShapeConfig::ConstantVus { vus, duration } => LoadShape::ConstantVus {
                vus: *vus,
                duration: *duration,
            },
            LoadShapeConfig::RampingVus {
                start_vus,
                stages,
                ramp,
                graceful_ramp_down,
            } => LoadShape::RampingVus {
                curve: Curve::new(
                    f64::from(*start_vus),
                    stages
                        .iter()
                        .map(|s| Stage::new(s.duration, f64::from(s.target)))
                        .collect(),
                    *ramp,
                ),
                graceful_ramp_down: *graceful_ramp_down,
            },
            LoadShapeConfig::RampingArrivalRate {
                start_rate,
                time_unit,
                pre_allocated_vus,
                max_vus,
                stages,
                ramp,
            } => {
                // Without a start rate the curve opens at the first target
                let start = start_rate
                    .or_else(|| stages.first().map(|s| s.target))
                    .unwrap_or(0);
                LoadShape::ArrivalRate(ArrivalRate {
                    curve: Curve::new(
                        per_second(start, *time_unit),
                        stages
                            .iter()
                            .map(|s| Stage::new(s.duration, per_second(s.target, *time_unit)))
                            .collect(),
                        *ramp,
                    ),
                    pre_allocated_vus: *pre_allocated_vus,
                    max_vus: *max_vus,
                })
            }
            LoadShapeConfig::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                let rate = per_second(*rate, *time_unit);
                LoadShape::ArrivalRate(ArrivalRate {
                    curve: Curve::new(rate, vec![Stage::new(*duration, rate)], RampMode::Step),
                    pre_allocated_vus: *pre_allocated_vus,
                    max_vus: *max_vus,
                })
            }
            LoadShapeConfig::PerVuIterations {
                vus,
                iterations,
                max_duration,
            } => LoadShape::PerVuIterations {
                vus: *vus,
                iterations: *iterations,
                max_duration: *max_duration,
            },
            LoadShapeConfig::SharedIterations {
                vus,
                iterations,
                max_duration,
            } => LoadShape::SharedIterations {
                vus: *vus,
                iterations: *iterations,
                max_duration: *max_duration,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadrig_config::StageConfig;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_linear_ramp_values() {
        let curve = Curve::new(
            0.0,
            vec![Stage::new(secs(10), 100.0), Stage::new(secs(10), 100.0), Stage::new(secs(10), 0.0)],
            RampMode::Linear,
        );
        assert_eq!(curve.value_at(secs(0)), 0.0);
        assert_eq!(curve.value_at(secs(5)), 50.0);
        assert_eq!(curve.value_at(secs(15)), 100.0);
        assert_eq!(curve.value_at(secs(25)), 50.0);
        assert_eq!(curve.value_at(secs(99)), 0.0);
        assert_eq!(curve.duration(), secs(30));
    }

    #[test]
    fn test_step_ramp_jumps_at_stage_start() {
        let curve = Curve::new(
            0.0,
            vec![Stage::new(secs(120), 50.0), Stage::new(secs(120), 100.0)],
            RampMode::Step,
        );
        assert_eq!(curve.value_at(secs(0)), 50.0);
        assert_eq!(curve.value_at(secs(119)), 50.0);
        assert_eq!(curve.value_at(secs(120)), 100.0);
    }

    #[test]
    fn test_constant_rate_integral() {
        let curve = Curve::new(50.0, vec![Stage::new(secs(60), 50.0)], RampMode::Linear);
        assert_eq!(curve.total(), 3000.0);
        assert_eq!(curve.time_for_integral(0.0), Some(Duration::ZERO));
        assert_eq!(curve.time_for_integral(50.0), Some(secs(1)));
        assert!(curve.time_for_integral(2999.0).unwrap() < secs(60));
        assert_eq!(curve.time_for_integral(3000.0), None);
    }

    #[test]
    fn test_ramping_rate_integral() {
        // 0 -> 10/s over 10s integrates to 50 iterations
        let curve = Curve::new(0.0, vec![Stage::new(secs(10), 10.0)], RampMode::Linear);
        assert!((curve.total() - 50.0).abs() < 1e-9);

        // Half the iterations happen in the last ~29% of the stage
        let half = curve.time_for_integral(25.0).unwrap().as_secs_f64();
        assert!((half - 50f64.sqrt()).abs() < 1e-6);

        // Ramp down mirrors it
        let down = Curve::new(10.0, vec![Stage::new(secs(10), 0.0)], RampMode::Linear);
        let t = down.time_for_integral(25.0).unwrap().as_secs_f64();
        assert!((t - (10.0 - 50f64.sqrt())).abs() < 1e-6);
    }

    #[test]
    fn test_arrival_start_rate_defaults_to_first_target() {
        let config = LoadShapeConfig::RampingArrivalRate {
            start_rate: None,
            time_unit: secs(1),
            pre_allocated_vus: 50,
            max_vus: 100,
            stages: vec![StageConfig::new(secs(60), 50)],
            ramp: RampMode::Linear,
        };
        let LoadShape::ArrivalRate(arrival) = LoadShape::from(&config) else {
            panic!("expected an arrival-rate shape");
        };
        assert_eq!(arrival.curve.start, 50.0);
        assert_eq!(arrival.curve.total(), 3000.0);
        assert_eq!(arrival.max_vus, 100);
    }

    #[test]
    fn test_time_unit_scales_rate() {
        let config = LoadShapeConfig::ConstantArrivalRate {
            rate: 120,
            time_unit: secs(60),
            duration: secs(30),
            pre_allocated_vus: 5,
            max_vus: 10,
        };
        let shape = LoadShape::from(&config);
        assert_eq!(shape.duration(), secs(30));
        let LoadShape::ArrivalRate(arrival) = shape else {
            panic!("expected an arrival-rate shape");
        };
        assert_eq!(arrival.curve.value_at(secs(3)), 2.0);
    }
}

//! Built-in plans for the web-algo API
//!
//! Each preset is a complete [`LoadrigConfig`] that `loadrig generate` writes
//! out as a starting point.

use crate::domains::plan::{
    AbortConfig, CredentialConfig, ExecutorConfig, LoadShapeConfig, PhaseConfig, PlanConfig,
    RampMode, ScenarioConfig, StageConfig, StepConfig, ThinkTimeConfig,
};
use crate::domains::LoadrigConfig;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const USERS: [&str; 5] = ["fulano4", "fulano1", "fulanotest", "user123", "user321"];
const PROBLEM_CODES: [&str; 5] = ["S00000050", "S00000100", "S00000200", "S00000300", "S00000400"];
const SOLUTION_CODES: [&str; 5] = [
    "S001_S00000050",
    "S002_S00000050",
    "S003_S00000050",
    "S004_S00000050",
    "S005_S00000050",
];
const SEARCH_KEYS: [&str; 8] = ["S", "V", "C", "G", "I", "M", "F", "R"];

const SOURCE_CODE: &str = "#include <stdio.h>\nint main() {\n    printf(\"Hello World!\");\n    return 0;\n}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Functional,
    Capacity,
    Spike,
    Failover,
    Latency,
    Arrival,
}

impl Preset {
    pub fn all() -> [Preset; 6] {
        [
            Preset::Functional,
            Preset::Capacity,
            Preset::Spike,
            Preset::Failover,
            Preset::Latency,
            Preset::Arrival,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Functional => "functional",
            Preset::Capacity => "capacity",
            Preset::Spike => "spike",
            Preset::Failover => "failover",
            Preset::Latency => "latency",
            Preset::Arrival => "arrival",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Preset::Functional => "One VU walking the full journey exactly once",
            Preset::Capacity => "Ramp 0 to 500 VUs in steps of 50 to find the breaking point",
            Preset::Spike => "Staged ramp to 100 VUs with a 200-VU spike overlaid at 20 minutes",
            Preset::Failover => "10 constant VUs across NORMAL, DEGRADED and RECOVERY phases",
            Preset::Latency => "10 constant VUs measuring login latency and time to first byte",
            Preset::Arrival => "50 iterations/s with 50 pre-allocated and 100 max VUs",
        }
    }

    /// Build the full configuration for this preset
    pub fn build(&self) -> LoadrigConfig {
        let plan = match self {
            Preset::Functional => functional(),
            Preset::Capacity => capacity(),
            Preset::Spike => spike(),
            Preset::Failover => failover(),
            Preset::Latency => latency(),
            Preset::Arrival => arrival(),
        };
        LoadrigConfig {
            plan: Some(plan),
            ..LoadrigConfig::default()
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::all()
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Preset::all().iter().map(|p| p.name()).collect();
                format!("Unknown preset '{}'. Available: {}", s, names.join(", "))
            })
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn pools() -> BTreeMap<String, Vec<String>> {
    let mut pools = BTreeMap::new();
    pools.insert("search_keys".to_string(), to_strings(&SEARCH_KEYS));
    pools.insert("problem_codes".to_string(), to_strings(&PROBLEM_CODES));
    pools.insert("solution_codes".to_string(), to_strings(&SOLUTION_CODES));
    pools
}

fn credentials() -> Vec<CredentialConfig> {
    USERS.iter().map(|u| CredentialConfig::same(u)).collect()
}

fn thresholds(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (metric, expr) in entries {
        map.entry(metric.to_string()).or_default().push(expr.to_string());
    }
    map
}

fn search_step() -> StepConfig {
    StepConfig::get("search", "/problems/key/{search_keys}", &[200, 404])
}

fn problem_details_step() -> StepConfig {
    StepConfig::get(
        "problem_details",
        "/problems/{problem_codes}/details",
        &[200, 404, 422],
    )
}

fn solution_details_step() -> StepConfig {
    StepConfig::get(
        "solution_details",
        "/solutions/{solution_codes}/details",
        &[200, 404, 422],
    )
}

fn create_solution_step() -> StepConfig {
    StepConfig::post(
        "create_solution",
        "/solutions",
        json!({ "problemCode": "{problem_codes}" }),
        &[200],
    )
}

fn save_solution_step() -> StepConfig {
    StepConfig::post(
        "save_solution",
        "/solutions/save",
        json!({
            "problemCode": "{problem_codes}",
            "sourceCode": SOURCE_CODE,
            "language": "C"
        }),
        &[200],
    )
}

fn scenario(name: &str, steps: Vec<StepConfig>) -> ScenarioConfig {
    ScenarioConfig {
        name: name.to_string(),
        weight: None,
        think_time: None,
        pacing: None,
        steps,
    }
}

fn base_plan(name: &str, description: &str, load: LoadShapeConfig, scenarios: Vec<ScenarioConfig>) -> PlanConfig {
    PlanConfig {
        name: name.to_string(),
        description: Some(description.to_string()),
        executors: vec![ExecutorConfig::new("main", load)],
        phases: Vec::new(),
        abort: AbortConfig::default(),
        thresholds: BTreeMap::new(),
        credentials: credentials(),
        pools: pools(),
        scenarios,
        max_duration: None,
        grace_period: secs(30),
        preflight: true,
        record_samples: false,
    }
}

fn ramping(stages: Vec<StageConfig>) -> LoadShapeConfig {
    LoadShapeConfig::RampingVus {
        start_vus: 0,
        stages,
        ramp: RampMode::Linear,
        graceful_ramp_down: secs(30),
    }
}

fn functional() -> PlanConfig {
    let mut journey = scenario(
        "full_journey",
        vec![
            search_step(),
            problem_details_step(),
            create_solution_step(),
            solution_details_step(),
            save_solution_step(),
        ],
    );
    journey.think_time = Some(ThinkTimeConfig::fixed(Duration::from_millis(500)));
    journey.pacing = Some(ThinkTimeConfig::fixed(secs(1)));

    let mut plan = base_plan(
        Preset::Functional.name(),
        Preset::Functional.description(),
        LoadShapeConfig::PerVuIterations {
            vus: 1,
            iterations: 1,
            max_duration: mins(10),
        },
        vec![journey],
    );
    plan.thresholds = thresholds(&[
        ("http_req_duration", "p(95)<5000"),
        ("http_req_failed", "rate<0.1"),
    ]);
    plan
}

fn capacity() -> PlanConfig {
    let mut stages = Vec::new();
    for target in (50..=500).step_by(50) {
        stages.push(StageConfig::new(mins(2), target));
        stages.push(StageConfig::new(mins(2), target));
    }
    stages.push(StageConfig::new(mins(3), 0));

    let mut browse = scenario(
        "browse",
        vec![search_step(), problem_details_step(), solution_details_step()],
    );
    browse.think_time = Some(ThinkTimeConfig::uniform(
        Duration::from_millis(100),
        Duration::from_millis(200),
    ));
    browse.pacing = Some(ThinkTimeConfig::fixed(Duration::from_millis(100)));

    let mut plan = base_plan(
        Preset::Capacity.name(),
        Preset::Capacity.description(),
        ramping(stages),
        vec![browse],
    );
    plan.thresholds = thresholds(&[
        ("http_req_duration", "p(95)<2000"),
        ("http_req_failed", "rate<0.15"),
    ]);
    plan
}

/// Start of the spike executor, while the base load holds 100 VUs
const SPIKE_START: Duration = Duration::from_secs(20 * 60);

fn spike() -> PlanConfig {
    let base = vec![
        StageConfig::new(mins(2), 10),
        StageConfig::new(mins(5), 10),
        StageConfig::new(mins(2), 50),
        StageConfig::new(mins(5), 50),
        StageConfig::new(mins(2), 100),
        StageConfig::new(mins(5), 100),
        StageConfig::new(mins(3), 0),
    ];
    let spike = vec![
        StageConfig::new(secs(10), 200),
        StageConfig::new(mins(1), 200),
        StageConfig::new(secs(10), 0),
    ];

    let pause = ThinkTimeConfig::uniform(secs(1), secs(4));
    let mut browse = scenario(
        "browse",
        vec![search_step(), problem_details_step(), solution_details_step()],
    );
    browse.weight = Some(0.7);
    browse.pacing = Some(pause);
    let mut solve = scenario(
        "solve",
        vec![
            problem_details_step(),
            create_solution_step(),
            save_solution_step(),
        ],
    );
    solve.weight = Some(0.3);
    solve.pacing = Some(pause);

    let mut plan = base_plan(
        Preset::Spike.name(),
        Preset::Spike.description(),
        ramping(base),
        vec![browse, solve],
    );
    plan.executors
        .push(ExecutorConfig::new("spike", ramping(spike)).starting_after(SPIKE_START));
    plan.thresholds = thresholds(&[
        ("http_req_duration", "p(95)<2000"),
        ("http_req_failed", "rate<0.1"),
        ("login_success_rate", "rate>0.9"),
    ]);
    plan
}

fn failover() -> PlanConfig {
    let mut search = StepConfig::get("search", "/problems/key/S", &[200, 404]);
    search.timeout = Some(secs(10));
    let mut availability = scenario("availability", vec![search]);
    availability.pacing = Some(ThinkTimeConfig::fixed(secs(2)));

    let mut plan = base_plan(
        Preset::Failover.name(),
        Preset::Failover.description(),
        LoadShapeConfig::ConstantVus {
            vus: 10,
            duration: mins(10),
        },
        vec![availability],
    );
    plan.credentials = vec![CredentialConfig::same("fulano4")];
    plan.pools = BTreeMap::new();
    plan.phases = vec![
        PhaseConfig {
            name: "NORMAL".to_string(),
            start: Duration::ZERO,
            end: mins(2),
            error_threshold: None,
            window: None,
        },
        PhaseConfig {
            name: "DEGRADED".to_string(),
            start: mins(2),
            end: mins(5),
            error_threshold: Some(1000),
            window: None,
        },
        PhaseConfig {
            name: "RECOVERY".to_string(),
            start: mins(5),
            end: mins(10),
            error_threshold: None,
            window: None,
        },
    ];
    plan.thresholds = thresholds(&[
        ("login_success_rate", "rate>0.95"),
        ("http_req_duration", "p(95)<3000"),
    ]);
    plan
}

fn latency() -> PlanConfig {
    let mut login_only = scenario("login_only", Vec::new());
    login_only.pacing = Some(ThinkTimeConfig::fixed(secs(1)));

    let mut plan = base_plan(
        Preset::Latency.name(),
        Preset::Latency.description(),
        LoadShapeConfig::ConstantVus {
            vus: 10,
            duration: mins(3),
        },
        vec![login_only],
    );
    plan.credentials = vec![CredentialConfig::same("fulano4")];
    plan.pools = BTreeMap::new();
    plan.thresholds = thresholds(&[
        ("login", "p(95)<1500"),
        ("login", "avg<800"),
        ("login.waiting", "p(95)<1000"),
        ("login.waiting", "avg<500"),
    ]);
    plan
}

fn arrival() -> PlanConfig {
    let mut plan = base_plan(
        Preset::Arrival.name(),
        Preset::Arrival.description(),
        LoadShapeConfig::RampingArrivalRate {
            start_rate: None,
            time_unit: secs(1),
            pre_allocated_vus: 50,
            max_vus: 100,
            stages: vec![StageConfig::new(mins(1), 50)],
            ramp: RampMode::Linear,
        },
        vec![scenario(
            "browse",
            vec![search_step(), problem_details_step()],
        )],
    );
    plan.thresholds = thresholds(&[
        ("http_req_duration", "p(95)<2000"),
        ("backpressure_drops", "count==0"),
    ]);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Validatable;

    #[test]
    fn test_every_preset_validates() {
        for preset in Preset::all() {
            let config = preset.build();
            assert!(config.validate_all().is_ok(), "{} failed validation", preset);
            assert_eq!(config.plan().unwrap().name, preset.name());
        }
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("spike".parse::<Preset>().unwrap(), Preset::Spike);
        assert_eq!("Arrival".parse::<Preset>().unwrap(), Preset::Arrival);
        assert!("soak".parse::<Preset>().is_err());
    }

    #[test]
    fn test_capacity_stages() {
        let plan = capacity();
        assert_eq!(plan.executors[0].planned_end(), mins(43));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_spike_overlays_base_load() {
        let plan = spike();
        let names: Vec<_> = plan.executors.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["main", "spike"]);

        let base = &plan.executors[0];
        assert_eq!(base.start_delay, Duration::ZERO);
        assert_eq!(base.planned_end(), mins(24));

        let spike = &plan.executors[1];
        assert_eq!(spike.start_delay, mins(20));
        assert_eq!(spike.planned_end(), mins(20) + secs(80));
        assert!(spike.planned_end() < base.planned_end());
    }

    #[test]
    fn test_functional_runs_one_iteration() {
        let plan = functional();
        assert_eq!(plan.executors.len(), 1);
        assert_eq!(
            plan.executors[0].load,
            LoadShapeConfig::PerVuIterations {
                vus: 1,
                iterations: 1,
                max_duration: mins(10),
            }
        );
    }

    #[test]
    fn test_preset_yaml_roundtrip() {
        let config = Preset::Failover.build();
        let yaml = config.to_yaml().unwrap();
        let parsed: LoadrigConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}

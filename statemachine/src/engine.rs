//! The State Machine core: owns runtime state, evaluates transition
//! predicates, runs the periodic control tick, and applies heater setpoints.
//! Driven by a `HalAccess` implementation so the engine can run against the
//! real HAL over HTTP or an in-process fake in tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fridgeos_common::client::HalClient;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::config::{Settings, SmConfig};
use crate::model::{HeaterMode, HeaterSpec, State, Transition, PAUSED};
use crate::pid::Pid;

/// The engine's only path to hardware: an explicit trait standing in for
/// the original's `hal_client` constructor argument / `DummyHalClient` test
/// double.
#[async_trait]
pub trait HalAccess: Send + Sync {
    async fn get_temperatures(&self) -> anyhow::Result<HashMap<String, Option<f64>>>;
    async fn get_heater_values(&self) -> anyhow::Result<HashMap<String, f64>>;
    async fn set_heater_value(&self, name: &str, value: f64) -> anyhow::Result<()>;
}

pub struct HalClientAccess {
    client: HalClient,
}

impl HalClientAccess {
    pub fn new(client: HalClient) -> Self {
        HalClientAccess { client }
    }
}

#[async_trait]
impl HalAccess for HalClientAccess {
    async fn get_temperatures(&self) -> anyhow::Result<HashMap<String, Option<f64>>> {
        Ok(self.client.get_temperatures().await?)
    }

    async fn get_heater_values(&self) -> anyhow::Result<HashMap<String, f64>> {
        Ok(self.client.get_heater_values().await?)
    }

    async fn set_heater_value(&self, name: &str, value: f64) -> anyhow::Result<()> {
        self.client.set_heater_value(name, value).await?;
        Ok(())
    }
}

/// Lets the engine be parameterized over `Arc<HalClientAccess>` (production)
/// or `Arc<some fake>` (tests) interchangeably.
#[async_trait]
impl<T: HalAccess + ?Sized> HalAccess for Arc<T> {
    async fn get_temperatures(&self) -> anyhow::Result<HashMap<String, Option<f64>>> {
        (**self).get_temperatures().await
    }

    async fn get_heater_values(&self) -> anyhow::Result<HashMap<String, f64>> {
        (**self).get_heater_values().await
    }

    async fn set_heater_value(&self, name: &str, value: f64) -> anyhow::Result<()> {
        (**self).set_heater_value(name, value).await
    }
}

/// Everything the control loop and request handlers share, guarded by a
/// single mutex. Critical sections stay short and never hold the lock across
/// device I/O.
struct EngineState {
    current_state: String,
    state_entry_time: Instant,
    current_temperatures: HashMap<String, Option<f64>>,
    current_heater_values: HashMap<String, f64>,
    direct_values: HashMap<String, f64>,
    pids: HashMap<String, Pid>,
    update_num: u64,
    last_temperature_update: Instant,
}

/// A point-in-time view of the runtime state, for the `GET /info` and
/// `GET /state` HTTP handlers.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub current_state: String,
    pub time_in_current_state: f64,
    pub current_temperatures: HashMap<String, Option<f64>>,
    pub current_heater_values: HashMap<String, f64>,
    pub last_temperature_update_age: f64,
    pub update_num: u64,
}

pub struct StateMachine<H: HalAccess> {
    settings: Settings,
    heaters: Vec<HeaterSpec>,
    states: IndexMap<String, State>,
    transitions: Vec<Transition>,
    hal: H,
    state: Mutex<EngineState>,
}

impl<H: HalAccess> StateMachine<H> {
    pub fn new(config: SmConfig, hal: H) -> Self {
        let initial_state = config
            .states
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| PAUSED.to_string());

        let pids = config
            .heaters
            .iter()
            .filter_map(|heater| match &heater.mode {
                HeaterMode::Pid { p, i, d, max_value, .. } => {
                    Some((heater.name.clone(), Pid::new(*p, *i, *d, *max_value)))
                }
                HeaterMode::Direct => None,
            })
            .collect();

        let now = Instant::now();
        let state = EngineState {
            current_state: initial_state.clone(),
            state_entry_time: now,
            current_temperatures: HashMap::new(),
            current_heater_values: HashMap::new(),
            direct_values: HashMap::new(),
            pids,
            update_num: 0,
            last_temperature_update: now,
        };

        let machine = StateMachine {
            settings: config.settings,
            heaters: config.heaters,
            states: config.states,
            transitions: config.transitions,
            hal,
            state: Mutex::new(state),
        };

        machine
    }

    /// Applies the initial state's setpoints so the first tick runs with
    /// correct PID setpoints / direct values.
    pub async fn prime(&self) {
        let initial_state = { self.state.lock().await.current_state.clone() };
        self.update_heater_setpoints(&initial_state).await;
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.settings.polling_interval.max(0.0))
    }

    pub fn fridge_name(&self) -> &str {
        &self.settings.fridge_name
    }

    pub fn state_change_password(&self) -> Option<&str> {
        self.settings.state_change_password.as_deref()
    }

    pub fn available_states(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    pub fn heater_names(&self) -> Vec<String> {
        self.heaters.iter().map(|h| h.name.clone()).collect()
    }

    pub async fn current_state_targets(&self) -> HashMap<String, f64> {
        let current = self.state.lock().await.current_state.clone();
        self.states
            .get(&current)
            .map(|s| s.targets.clone())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let state = self.state.lock().await;
        let now = Instant::now();
        StateSnapshot {
            current_state: state.current_state.clone(),
            time_in_current_state: (now - state.state_entry_time).as_secs_f64(),
            current_temperatures: state.current_temperatures.clone(),
            current_heater_values: state.current_heater_values.clone(),
            last_temperature_update_age: (now - state.last_temperature_update).as_secs_f64(),
            update_num: state.update_num,
        }
    }

    /// Runs the tick body forever at `polling_interval`. Errors inside a
    /// tick are logged and swallowed; the loop does not die.
    pub async fn run_forever(&self) {
        let interval = self.polling_interval();
        loop {
            if let Err(e) = self.tick().await {
                log::error!("exception in state machine loop: {e:?}");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        // One temperature snapshot per tick, reused by both the transition
        // predicate evaluation and the heater update.
        let temperatures = self.hal.get_temperatures().await?;
        self.attempt_transition(&temperatures).await;
        self.update_heaters(&temperatures).await;
        Ok(())
    }

    async fn attempt_transition(&self, temperatures: &HashMap<String, Option<f64>>) {
        let (current, entry_time) = {
            let state = self.state.lock().await;
            (state.current_state.clone(), state.state_entry_time)
        };

        if current == PAUSED {
            log::debug!("PAUSED state - no automatic transitions allowed");
            return;
        }

        let now = Instant::now();
        for transition in &self.transitions {
            if !transition.from.iter().any(|s| s == &current) {
                continue;
            }

            // An empty criteria list is vacuously satisfied by `all`, but a
            // transition with no criteria and no timeout would never have a
            // way to fire; require at least one criterion before this branch
            // can trigger it, so an empty-criteria transition only fires via
            // its timeout.
            let criteria_met = !transition.criteria.is_empty()
                && transition
                    .criteria
                    .iter()
                    .all(|c| Self::check_criterion(c, temperatures));

            let timed_out = transition
                .max_seconds
                .is_some_and(|max| (now - entry_time).as_secs_f64() > max);

            if criteria_met || timed_out {
                log::info!(
                    "transition criteria met for {current} -> {} ({})",
                    transition.to,
                    if timed_out { "timeout" } else { "criteria" }
                );
                self.make_transition(&transition.to).await;
                return;
            }
        }
    }

    fn check_criterion(
        criterion: &crate::model::Criterion,
        temperatures: &HashMap<String, Option<f64>>,
    ) -> bool {
        match temperatures.get(&criterion.sensor) {
            Some(Some(value)) => criterion.op.apply(*value, criterion.value),
            _ => false,
        }
    }

    /// Forces a transition to `new_state` if valid. PID integral state is
    /// deliberately not reset.
    pub async fn make_transition(&self, new_state: &str) -> bool {
        if !self.states.contains_key(new_state) {
            log::error!(
                "attempted to transition to invalid state {new_state:?}. valid states: {:?}",
                self.available_states()
            );
            return false;
        }

        {
            let mut state = self.state.lock().await;
            log::info!("transitioning from {} to {new_state}", state.current_state);
            state.current_state = new_state.to_string();
            state.state_entry_time = Instant::now();
        }

        self.update_heater_setpoints(new_state).await;
        true
    }

    async fn update_heater_setpoints(&self, new_state: &str) {
        if new_state == PAUSED {
            log::info!("PAUSED state activated - heaters will not be updated");
            return;
        }

        let Some(targets) = self.states.get(new_state).map(|s| s.targets.clone()) else {
            return;
        };

        let mut state = self.state.lock().await;
        for heater in &self.heaters {
            match &heater.mode {
                HeaterMode::Pid {
                    corresponding_thermometer,
                    ..
                } => match targets.get(corresponding_thermometer) {
                    Some(value) => {
                        if let Some(pid) = state.pids.get_mut(&heater.name) {
                            pid.set_setpoint(*value);
                        }
                    }
                    None => log::warn!(
                        "no setpoint found for thermometer {corresponding_thermometer} in state {new_state}"
                    ),
                },
                HeaterMode::Direct => match targets.get(&heater.name) {
                    Some(value) => {
                        state.direct_values.insert(heater.name.clone(), *value);
                    }
                    None => log::warn!("no value found for direct heater {} in state {new_state}", heater.name),
                },
            }
        }
    }

    async fn update_heaters(&self, temperatures: &HashMap<String, Option<f64>>) {
        let heater_values = self.hal.get_heater_values().await;
        let now = Instant::now();

        let paused = {
            let mut state = self.state.lock().await;
            state.current_temperatures = temperatures.clone();
            state.last_temperature_update = now;
            match heater_values {
                Ok(values) => state.current_heater_values.extend(values),
                Err(e) => log::error!("error getting heater values from hal: {e:?}"),
            }
            state.update_num += 1;
            state.current_state == PAUSED
        };

        if paused {
            log::debug!("PAUSED state - skipping heater updates");
            return;
        }

        for heater in &self.heaters {
            match &heater.mode {
                HeaterMode::Pid {
                    corresponding_thermometer,
                    ..
                } => {
                    let reading = temperatures.get(corresponding_thermometer).copied().flatten();
                    let Some(temperature) = reading else {
                        log::error!(
                            "invalid or missing temperature for {corresponding_thermometer} (heater {})",
                            heater.name
                        );
                        continue;
                    };

                    let output = {
                        let mut state = self.state.lock().await;
                        state.pids.get_mut(&heater.name).map(|pid| pid.update(temperature))
                    };

                    let Some(output) = output else { continue };
                    self.write_heater(&heater.name, output).await;
                }
                HeaterMode::Direct => {
                    let value = { self.state.lock().await.direct_values.get(&heater.name).copied() };
                    match value {
                        Some(value) => self.write_heater(&heater.name, value).await,
                        None => log::warn!("no current_value set for direct heater {}", heater.name),
                    }
                }
            }
        }
    }

    async fn write_heater(&self, name: &str, value: f64) {
        match self.hal.set_heater_value(name, value).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.current_heater_values.insert(name.to_string(), value);
            }
            Err(e) => log::error!("error writing heater {name} to {value}: {e:?}"),
        }
    }

    /// Transitions to PAUSED (idempotent).
    pub async fn pause_system(&self) -> bool {
        let current = { self.state.lock().await.current_state.clone() };
        if current == PAUSED {
            log::info!("system is already paused");
            return true;
        }
        self.make_transition(PAUSED).await
    }

    /// Resumes from PAUSED to `target`, or the first non-PAUSED declared
    /// state if `target` is `None`. Fails if not currently paused or if
    /// `target` is an unknown state.
    pub async fn resume_system(&self, target: Option<String>) -> bool {
        let current = { self.state.lock().await.current_state.clone() };
        if current != PAUSED {
            log::info!("system is not paused");
            return false;
        }

        let target = match target {
            Some(t) => t,
            None => match self.states.keys().find(|name| name.as_str() != PAUSED) {
                Some(name) => name.clone(),
                None => {
                    log::error!("no safe states available to resume to");
                    return false;
                }
            },
        };

        if !self.states.contains_key(&target) {
            log::error!("invalid target state for resume: {target:?}");
            return false;
        }

        self.make_transition(&target).await
    }

    /// Direct external override, bypassing state configuration. Best-effort,
    /// not sticky: a direct heater's latched value is not updated, so the
    /// next `update_heater_setpoints` call reverts it.
    pub async fn set_heater_value(&self, name: &str, value: f64) -> bool {
        if !self.heaters.iter().any(|h| h.name == name) {
            log::error!("heater {name:?} not found");
            return false;
        }

        match self.hal.set_heater_value(name, value).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.current_heater_values.insert(name.to_string(), value);
                true
            }
            Err(e) => {
                log::error!("error setting heater {name:?} to {value}: {e:?}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeHal {
        temperatures: AsyncMutex<HashMap<String, Option<f64>>>,
        heater_values: AsyncMutex<HashMap<String, f64>>,
        writes: AsyncMutex<Vec<(String, f64)>>,
        write_count: AtomicUsize,
    }

    impl FakeHal {
        fn new(temperatures: HashMap<String, Option<f64>>) -> Self {
            FakeHal {
                temperatures: AsyncMutex::new(temperatures),
                heater_values: AsyncMutex::new(HashMap::new()),
                writes: AsyncMutex::new(Vec::new()),
                write_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HalAccess for FakeHal {
        async fn get_temperatures(&self) -> anyhow::Result<HashMap<String, Option<f64>>> {
            Ok(self.temperatures.lock().await.clone())
        }

        async fn get_heater_values(&self) -> anyhow::Result<HashMap<String, f64>> {
            Ok(self.heater_values.lock().await.clone())
        }

        async fn set_heater_value(&self, name: &str, value: f64) -> anyhow::Result<()> {
            self.write_count.fetch_add(1, Ordering::SeqCst);
            self.writes.lock().await.push((name.to_string(), value));
            self.heater_values.lock().await.insert(name.to_string(), value);
            Ok(())
        }
    }

    fn pid_config() -> SmConfig {
        let mut targets = HashMap::new();
        targets.insert("pump".to_string(), 50.0);

        let mut states = IndexMap::new();
        states.insert(
            "WARM".to_string(),
            State {
                name: "WARM".to_string(),
                targets,
            },
        );
        states.insert(
            PAUSED.to_string(),
            State {
                name: PAUSED.to_string(),
                targets: HashMap::new(),
            },
        );

        SmConfig {
            settings: Settings {
                fridge_name: "Test".to_string(),
                polling_interval: 0.01,
                state_change_password: None,
            },
            heaters: vec![HeaterSpec {
                name: "PUMPHEATER".to_string(),
                mode: HeaterMode::Pid {
                    p: 10.0,
                    i: 0.0,
                    d: 0.0,
                    max_value: 25.0,
                    corresponding_thermometer: "pump".to_string(),
                },
            }],
            states,
            transitions: vec![],
        }
    }

    #[tokio::test]
    async fn pid_heater_converges_to_clamped_output_on_first_tick() {
        let mut readings = HashMap::new();
        readings.insert("pump".to_string(), Some(0.0));
        let hal = Arc::new(FakeHal::new(readings));
        let sm = StateMachine::new(pid_config(), Arc::clone(&hal));
        sm.prime().await;

        sm.tick().await.unwrap();

        let writes = hal.writes.lock().await;
        assert_eq!(writes.last(), Some(&("PUMPHEATER".to_string(), 25.0)));
    }

    #[tokio::test]
    async fn paused_state_emits_no_heater_writes_over_ten_ticks() {
        let mut readings = HashMap::new();
        readings.insert("pump".to_string(), Some(0.0));
        let hal = Arc::new(FakeHal::new(readings));
        let sm = StateMachine::new(pid_config(), Arc::clone(&hal));
        sm.prime().await;

        assert!(sm.pause_system().await);
        for _ in 0..10 {
            sm.tick().await.unwrap();
        }

        assert_eq!(hal.write_count.load(Ordering::SeqCst), 0);

        assert!(sm.resume_system(Some("WARM".to_string())).await);
        assert_eq!(sm.snapshot().await.current_state, "WARM");
    }

    #[tokio::test]
    async fn update_num_increments_once_per_tick() {
        let mut readings = HashMap::new();
        readings.insert("pump".to_string(), Some(0.0));
        let hal = Arc::new(FakeHal::new(readings));
        let sm = StateMachine::new(pid_config(), Arc::clone(&hal));
        sm.prime().await;

        for _ in 0..3 {
            sm.tick().await.unwrap();
        }

        assert_eq!(sm.snapshot().await.update_num, 3);
    }

    #[tokio::test]
    async fn criterion_on_missing_sensor_never_fires() {
        let hal = Arc::new(FakeHal::new(HashMap::new()));
        let mut config = pid_config();
        config.transitions.push(Transition {
            from: vec!["WARM".to_string()],
            to: PAUSED.to_string(),
            criteria: vec![crate::model::Criterion {
                sensor: "nonexistent".to_string(),
                op: crate::model::Op::Greater,
                value: 0.0,
            }],
            max_seconds: None,
        });
        let sm = StateMachine::new(config, Arc::clone(&hal));
        sm.prime().await;
        sm.tick().await.unwrap();
        assert_eq!(sm.snapshot().await.current_state, "WARM");
    }

    #[tokio::test]
    async fn transition_fires_on_timeout_even_with_unmet_criteria() {
        // A transition with an always-false criterion still fires once
        // max_seconds has elapsed in the current state.
        let hal = Arc::new(FakeHal::new(HashMap::new()));
        let mut config = pid_config();
        config.transitions.push(Transition {
            from: vec!["WARM".to_string()],
            to: PAUSED.to_string(),
            criteria: vec![crate::model::Criterion {
                sensor: "pump".to_string(),
                op: crate::model::Op::Greater,
                value: 1_000_000.0,
            }],
            max_seconds: Some(0.02),
        });
        let sm = StateMachine::new(config, Arc::clone(&hal));
        sm.prime().await;

        sm.tick().await.unwrap();
        assert_eq!(sm.snapshot().await.current_state, "WARM");

        tokio::time::sleep(Duration::from_millis(30)).await;
        sm.tick().await.unwrap();
        assert_eq!(sm.snapshot().await.current_state, PAUSED);
    }

    #[tokio::test]
    async fn empty_criteria_transition_fires_only_at_timeout() {
        let hal = Arc::new(FakeHal::new(HashMap::new()));
        let mut config = pid_config();
        config.transitions.push(Transition {
            from: vec!["WARM".to_string()],
            to: PAUSED.to_string(),
            criteria: vec![],
            max_seconds: Some(0.02),
        });
        let sm = StateMachine::new(config, Arc::clone(&hal));
        sm.prime().await;

        sm.tick().await.unwrap();
        assert_eq!(
            sm.snapshot().await.current_state,
            "WARM",
            "an empty-criteria transition must not fire before its timeout elapses"
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        sm.tick().await.unwrap();
        assert_eq!(sm.snapshot().await.current_state, PAUSED);
    }
}

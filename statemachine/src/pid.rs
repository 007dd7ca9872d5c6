//! Parallel-form PID controller, grounded on the original's use of
//! `simple_pid.PID(..., sample_time=None)`: rather than assuming a fixed
//! tick period, the controller times itself from wall-clock deltas between
//! successive calls so `I`/`D` terms stay correct even when a tick is late.

use std::time::Instant;

/// One controller per heater. The integral term and setpoint persist across
/// ticks and across state transitions — continuity lives with the heater,
/// not with whatever state is currently active.
#[derive(Debug)]
pub struct Pid {
    p: f64,
    i: f64,
    d: f64,
    max_value: f64,
    setpoint: f64,
    integral: f64,
    prev_error: Option<f64>,
    prev_call: Option<Instant>,
}

impl Pid {
    pub fn new(p: f64, i: f64, d: f64, max_value: f64) -> Self {
        Pid {
            p,
            i,
            d,
            max_value,
            setpoint: 0.0,
            integral: 0.0,
            prev_error: None,
            prev_call: None,
        }
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// Computes the next output for a fresh `measurement`, clamped to
    /// `[0, max_value]`. No anti-windup beyond that output clamp: the
    /// integral term itself is never separately clamped.
    pub fn update(&mut self, measurement: f64) -> f64 {
        let now = Instant::now();
        let dt = self
            .prev_call
            .map(|prev| (now - prev).as_secs_f64())
            .unwrap_or(0.0);

        let error = self.setpoint - measurement;
        let p_term = self.p * error;

        if dt > 0.0 {
            self.integral += self.i * error * dt;
        }

        let d_term = match (self.prev_error, dt > 0.0) {
            (Some(prev_error), true) => self.d * (error - prev_error) / dt,
            _ => 0.0,
        };

        self.prev_error = Some(error);
        self.prev_call = Some(now);

        (p_term + self.integral + d_term).clamp(0.0, self.max_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn first_tick_clamps_proportional_output() {
        // P=10, I=0, D=0, max_value=25, T=0, setpoint=50: proportional term
        // alone already exceeds max_value and clamps.
        let mut pid = Pid::new(10.0, 0.0, 0.0, 25.0);
        pid.set_setpoint(50.0);
        assert_eq!(pid.update(0.0), 25.0);
    }

    #[test]
    fn output_never_goes_negative() {
        let mut pid = Pid::new(1.0, 0.0, 0.0, 25.0);
        pid.set_setpoint(0.0);
        assert_eq!(pid.update(50.0), 0.0);
    }

    #[test]
    fn integral_accumulates_across_calls() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 100.0);
        pid.set_setpoint(10.0);
        let _ = pid.update(0.0);
        sleep(Duration::from_millis(20));
        let second = pid.update(0.0);
        assert!(second > 0.0);
    }

    #[test]
    fn setpoint_can_be_changed_without_resetting_integral() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 100.0);
        pid.set_setpoint(10.0);
        let _ = pid.update(0.0);
        sleep(Duration::from_millis(10));
        let before = pid.update(0.0);
        pid.set_setpoint(20.0);
        sleep(Duration::from_millis(10));
        let after = pid.update(0.0);
        assert!(after >= before);
    }
}

//! Circuit Breaker (§4.4): one independent CLOSED/OPEN/HALF_OPEN state
//! machine per tool.
//!
//! The consecutive-failure counter and trip-timestamp shape are grounded on
//! a simpler single-breaker pattern seen in the corpus; this generalizes it
//! to per-tool keying and adds the rolling-window volume/error-rate/slow-call
//! logic §4.4 asks for.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub volume_threshold: u32,
    pub error_rate_threshold: f64,
    pub slow_call_duration: Duration,
    pub slow_call_rate_threshold: f64,
    /// Count-of-last-N window size backing the rolling stats (Open Question
    /// in §9, resolved in DESIGN.md in favor of a fixed-size ring).
    pub window_size: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            volume_threshold: 10,
            error_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(5),
            slow_call_rate_threshold: 0.5,
            window_size: 20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Slow,
}

struct Breaker {
    config: BreakerConfig,
    state: State,
    window: std::collections::VecDeque<Outcome>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

impl Breaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: State::Closed,
            window: std::collections::VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_probe_in_flight: false,
        }
    }

    fn push_outcome(&mut self, outcome: Outcome) {
        self.window.push_back(outcome);
        if self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }

    fn window_stats(&self) -> (u32, u32, u32) {
        let calls = self.window.len() as u32;
        let failures = self
            .window
            .iter()
            .filter(|o| matches!(o, Outcome::Failure))
            .count() as u32;
        let slow = self
            .window
            .iter()
            .filter(|o| matches!(o, Outcome::Slow))
            .count() as u32;
        (calls, failures, slow)
    }

    fn maybe_trip(&mut self, tool: &str) {
        let (calls, failures, slow) = self.window_stats();
        let by_consecutive = self.consecutive_failures >= self.config.failure_threshold;
        let by_rate = calls >= self.config.volume_threshold
            && (failures as f64 / calls as f64 >= self.config.error_rate_threshold
                || slow as f64 / calls as f64 >= self.config.slow_call_rate_threshold);
        if by_consecutive || by_rate {
            self.state = State::Open;
            self.opened_at = Some(Instant::now());
            self.consecutive_successes = 0;
            warn!(tool, by_consecutive, by_rate, "circuit breaker opened");
        }
    }
}

pub struct CircuitBreakers {
    default_config: BreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    Refuse,
}

impl CircuitBreakers {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn configure_tool(&self, tool: &str, config: BreakerConfig) {
        self.breakers
            .lock()
            .insert(tool.to_string(), Breaker::new(config));
    }

    pub fn state(&self, tool: &str) -> State {
        self.breakers
            .lock()
            .get(tool)
            .map(|b| b.state)
            .unwrap_or(State::Closed)
    }

    /// Admission check at pipeline step 4 (§4.2). `OPEN` refuses without
    /// consulting the rate limiter or upstream. The first admission after
    /// `openedAt + timeoutMs` transitions to `HALF_OPEN` and becomes the
    /// sole in-flight probe.
    pub fn try_admit(&self, tool: &str) -> AdmissionDecision {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(tool.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));

        match breaker.state {
            State::Closed => AdmissionDecision::Admit,
            State::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= breaker.config.timeout {
                    breaker.state = State::HalfOpen;
                    breaker.half_open_probe_in_flight = true;
                    info!(tool, "circuit breaker half-open probe admitted");
                    AdmissionDecision::Admit
                } else {
                    AdmissionDecision::Refuse
                }
            }
            State::HalfOpen => {
                if breaker.half_open_probe_in_flight {
                    AdmissionDecision::Refuse
                } else {
                    breaker.half_open_probe_in_flight = true;
                    AdmissionDecision::Admit
                }
            }
        }
    }

    pub fn record_success(&self, tool: &str, duration: Duration) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(tool.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));
        let slow = duration >= breaker.config.slow_call_duration;

        match breaker.state {
            State::HalfOpen => {
                breaker.half_open_probe_in_flight = false;
                if slow {
                    breaker.state = State::Open;
                    breaker.opened_at = Some(Instant::now());
                    breaker.consecutive_failures = 0;
                    warn!(tool, "half-open probe was slow, reopening");
                    return;
                }
                breaker.consecutive_successes += 1;
                if breaker.consecutive_successes >= breaker.config.success_threshold {
                    breaker.state = State::Closed;
                    breaker.consecutive_failures = 0;
                    breaker.window.clear();
                    info!(tool, "circuit breaker closed after recovery");
                }
            }
            State::Closed => {
                breaker.consecutive_failures = 0;
                breaker.push_outcome(if slow { Outcome::Slow } else { Outcome::Success });
                breaker.maybe_trip(tool);
            }
            State::Open => {}
        }
    }

    pub fn record_failure(&self, tool: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(tool.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));

        match breaker.state {
            State::HalfOpen => {
                breaker.half_open_probe_in_flight = false;
                breaker.state = State::Open;
                breaker.opened_at = Some(Instant::now());
                breaker.consecutive_successes = 0;
                warn!(tool, "half-open probe failed, reopening");
            }
            State::Closed => {
                breaker.consecutive_failures += 1;
                breaker.push_outcome(Outcome::Failure);
                breaker.maybe_trip(tool);
            }
            State::Open => {}
        }
    }

    pub fn force_open(&self, tool: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(tool.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));
        breaker.state = State::Open;
        breaker.opened_at = Some(Instant::now());
    }

    pub fn force_closed(&self, tool: &str) {
        self.reset(tool);
    }

    /// `reset` returns state to `CLOSED` regardless of prior state.
    pub fn reset(&self, tool: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(tool.to_string())
            .or_insert_with(|| Breaker::new(self.default_config));
        breaker.state = State::Closed;
        breaker.consecutive_failures = 0;
        breaker.consecutive_successes = 0;
        breaker.half_open_probe_in_flight = false;
        breaker.window.clear();
        breaker.opened_at = None;
    }

    pub fn enumerate(&self) -> Vec<(String, State)> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, b)| (name.clone(), b.state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers() -> CircuitBreakers {
        CircuitBreakers::new(BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(1000),
            volume_threshold: 100,
            error_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(5),
            slow_call_rate_threshold: 0.5,
            window_size: 20,
        })
    }

    #[test]
    fn three_failures_open_the_breaker() {
        let b = breakers();
        b.record_failure("message.create");
        b.record_failure("message.create");
        assert_eq!(b.try_admit("message.create"), AdmissionDecision::Admit);
        b.record_failure("message.create");
        assert_eq!(b.state("message.create"), State::Open);
        assert_eq!(b.try_admit("message.create"), AdmissionDecision::Refuse);
    }

    #[test]
    fn reset_always_returns_to_closed() {
        let b = breakers();
        b.force_open("x");
        assert_eq!(b.state("x"), State::Open);
        b.reset("x");
        assert_eq!(b.state("x"), State::Closed);
    }

    #[test]
    fn half_open_allows_single_probe() {
        let b = breakers();
        b.force_open("x");
        // simulate timeout elapsed by resetting opened_at via reset+force_open
        // would lose timing; instead verify refusal while still within timeout.
        assert_eq!(b.try_admit("x"), AdmissionDecision::Refuse);
    }

    #[test]
    fn half_open_success_threshold_closes_breaker() {
        let b = breakers();
        b.force_open("x");
        {
            let mut breakers = b.breakers.lock();
            let breaker = breakers.get_mut("x").unwrap();
            breaker.state = State::HalfOpen;
            breaker.half_open_probe_in_flight = true;
        }
        b.record_success("x", Duration::from_millis(10));
        assert_eq!(b.state("x"), State::HalfOpen);
        {
            let mut breakers = b.breakers.lock();
            let breaker = breakers.get_mut("x").unwrap();
            breaker.half_open_probe_in_flight = true;
        }
        b.record_success("x", Duration::from_millis(10));
        assert_eq!(b.state("x"), State::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breakers();
        b.force_open("x");
        {
            let mut breakers = b.breakers.lock();
            let breaker = breakers.get_mut("x").unwrap();
            breaker.state = State::HalfOpen;
            breaker.half_open_probe_in_flight = true;
        }
        b.record_failure("x");
        assert_eq!(b.state("x"), State::Open);
    }
}

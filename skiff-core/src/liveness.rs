use std::time::{Duration, Instant};

/// Keepalive bookkeeping for one registered user.
///
/// The probe token is always the server name, so there is nothing to match
/// here: a PONG with the right token acknowledges the outstanding probe, a
/// PONG with any other token never reaches [`Liveness::on_pong`].
#[derive(Debug)]
pub(crate) struct Liveness {
    created: Instant,
    timeout: Option<Duration>,
    last_probe: Option<Instant>,
    acked: bool,
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum LivenessStatus {
    Healthy,
    SendProbe,
    Dead(Duration),
}

impl Liveness {
    pub(crate) fn new(now: Instant, timeout: Option<Duration>) -> Self {
        Self {
            created: now,
            timeout,
            last_probe: None,
            acked: false,
        }
    }

    pub(crate) fn on_probe(&mut self, now: Instant) {
        self.last_probe = Some(now);
        self.acked = false;
    }

    pub(crate) fn on_pong(&mut self) {
        self.acked = true;
    }

    pub(crate) fn check(&self, now: Instant) -> LivenessStatus {
        let Some(timeout) = self.timeout else {
            return LivenessStatus::Healthy;
        };

        match self.last_probe {
            None => {
                if now - self.created < timeout {
                    LivenessStatus::Healthy
                } else {
                    LivenessStatus::SendProbe
                }
            }
            Some(at) => {
                let elapsed = now - at;
                if elapsed < timeout {
                    LivenessStatus::Healthy
                } else if self.acked {
                    // the probe was answered, time for the next one
                    LivenessStatus::SendProbe
                } else {
                    LivenessStatus::Dead(elapsed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{Liveness, LivenessStatus};

    #[test]
    fn no_timeout_configured() {
        let now = Instant::now();
        let state = Liveness::new(now, None);
        assert_eq!(
            state.check(now + Duration::from_secs(1000000)),
            LivenessStatus::Healthy
        );
    }

    #[test]
    fn missing_pong() {
        let timeout = Duration::from_secs(10);
        let now = Instant::now();
        let mut state = Liveness::new(now, Some(timeout));
        assert_eq!(state.check(now), LivenessStatus::Healthy);
        let now = now + Duration::from_secs(9);
        assert_eq!(state.check(now), LivenessStatus::Healthy);
        let now = now + Duration::from_secs(2);
        assert_eq!(state.check(now), LivenessStatus::SendProbe);
        state.on_probe(now);

        let now = now + Duration::from_secs(2);
        assert_eq!(state.check(now), LivenessStatus::Healthy);
        let now = now + Duration::from_secs(9);
        assert_eq!(
            state.check(now),
            LivenessStatus::Dead(Duration::from_secs(11))
        );
    }

    #[test]
    fn probe_then_pong() {
        let timeout = Duration::from_secs(10);
        let now = Instant::now();
        let mut state = Liveness::new(now, Some(timeout));
        let now = now + Duration::from_secs(11);
        assert_eq!(state.check(now), LivenessStatus::SendProbe);
        state.on_probe(now);

        let now = now + Duration::from_secs(7);
        state.on_pong();
        assert_eq!(state.check(now), LivenessStatus::Healthy);
        let now = now + Duration::from_secs(4);
        assert_eq!(state.check(now), LivenessStatus::SendProbe);
    }

    #[test]
    fn pong_right_before_the_check_saves_the_client() {
        let timeout = Duration::from_secs(10);
        let now = Instant::now();
        let mut state = Liveness::new(now, Some(timeout));
        let now = now + Duration::from_secs(11);
        state.on_probe(now);
        let now = now + Duration::from_secs(11);
        state.on_pong();
        assert_eq!(state.check(now), LivenessStatus::SendProbe);
    }
}

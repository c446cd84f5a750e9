use std::time::{Duration, Instant};

/// Liveness bookkeeping for a single connection.
///
/// The session feeds every received frame into [`record_rx`](Self::record_rx)
/// and asks [`tick`](Self::tick) what to do whenever its driver observes a
/// timer edge. The value holds no I/O; the session owns all side effects.
#[derive(Debug)]
pub(crate) struct Keepalive {
    ping_interval: Duration,
    idle_timeout: Duration,
    last_rx: Instant,
    last_ping: Instant,
}

/// What a timer tick demands of the session.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum TickAction {
    /// Nothing due yet.
    Wait,
    /// Send an empty ping.
    Ping,
    /// No traffic for the idle window; close 1001.
    CloseIdle,
}

impl Keepalive {
    pub(crate) fn new(ping_interval: Duration, idle_timeout: Duration, now: Instant) -> Self {
        Keepalive { ping_interval, idle_timeout, last_rx: now, last_ping: now }
    }

    /// Note traffic from the peer. Every received frame counts, pongs
    /// included.
    pub(crate) fn record_rx(&mut self, now: Instant) {
        self.last_rx = now;
    }

    pub(crate) fn tick(&mut self, now: Instant) -> TickAction {
        if now.saturating_duration_since(self.last_rx) > self.idle_timeout {
            TickAction::CloseIdle
        } else if now.saturating_duration_since(self.last_ping) >= self.ping_interval {
            self.last_ping = now;
            TickAction::Ping
        } else {
            TickAction::Wait
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Keepalive, TickAction};
    use std::time::{Duration, Instant};

    const PING: Duration = Duration::from_secs(30);
    const IDLE: Duration = Duration::from_secs(60);

    #[test]
    fn pings_once_per_interval() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(PING, IDLE, start);

        assert_eq!(keepalive.tick(start + Duration::from_secs(1)), TickAction::Wait);
        assert_eq!(keepalive.tick(start + Duration::from_secs(30)), TickAction::Ping);
        // Interval restarts from the ping just sent.
        assert_eq!(keepalive.tick(start + Duration::from_secs(31)), TickAction::Wait);
        keepalive.record_rx(start + Duration::from_secs(31));
        assert_eq!(keepalive.tick(start + Duration::from_secs(60)), TickAction::Ping);
    }

    #[test]
    fn idle_timeout_wins_over_ping() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(PING, IDLE, start);
        assert_eq!(keepalive.tick(start + Duration::from_secs(61)), TickAction::CloseIdle);
    }

    #[test]
    fn received_traffic_defers_idle_close() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(PING, IDLE, start);
        keepalive.record_rx(start + Duration::from_secs(45));
        assert_eq!(keepalive.tick(start + Duration::from_secs(61)), TickAction::Ping);
        assert_eq!(keepalive.tick(start + Duration::from_secs(106)), TickAction::CloseIdle);
    }
}

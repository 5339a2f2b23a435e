use std::time::Duration;

use tokio::time::Instant;

const JITTER_ALPHA: f64 = 0.125;
const RTT_ALPHA: f64 = 0.125;
const RTT_BETA: f64 = 0.25;
const SKEW_ALPHA: f64 = 0.25;

/// Arrival timing of one direction compared with its nominal interval.
#[derive(Debug, Clone)]
pub struct DirectionJitter {
    name: &'static str,
    expected: Duration,
    last: Option<Instant>,
    jitter_ms: f64,
    interval_ms: f64,
    samples: u64,
}

impl DirectionJitter {
    pub fn new(name: &'static str, expected: Duration) -> Self {
        Self {
            name,
            expected,
            last: None,
            jitter_ms: 0.0,
            interval_ms: expected.as_secs_f64() * 1000.0,
            samples: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn record(&mut self, at: Instant) {
        if let Some(last) = self.last {
            let observed = at.saturating_duration_since(last).as_secs_f64() * 1000.0;
            self.add_sample(observed, self.expected.as_secs_f64() * 1000.0);
        }
        self.last = Some(at);
    }

    fn add_sample(&mut self, observed_ms: f64, expected_ms: f64) {
        let deviation = (observed_ms - expected_ms).abs();
        if self.samples == 0 {
            self.jitter_ms = deviation;
            self.interval_ms = observed_ms;
        } else {
            self.jitter_ms = (1.0 - JITTER_ALPHA) * self.jitter_ms + JITTER_ALPHA * deviation;
            self.interval_ms = (1.0 - JITTER_ALPHA) * self.interval_ms + JITTER_ALPHA * observed_ms;
        }
        self.samples += 1;
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs_f64(self.jitter_ms / 1000.0)
    }

    pub fn mean_interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_ms.max(0.0) / 1000.0)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[derive(Debug, Clone, Default)]
pub struct JitterStats {
    pub ping: Duration,
    pub rtt_variance: Duration,
    pub server_jitter: Duration,
    pub client_jitter: Duration,
    pub clock_skew_ns: i64,
    pub heartbeats: u64,
}

/// Round trip, per-direction jitter and server clock skew. Diagnostic only;
/// nothing here feeds back into world state.
#[derive(Debug, Clone)]
pub struct JitterTracker {
    server: DirectionJitter,
    client: DirectionJitter,
    srtt_ms: f64,
    rtt_var_ms: f64,
    skew_ns: f64,
    heartbeats: u64,
}

impl JitterTracker {
    pub fn new(expected_interval: Duration) -> Self {
        Self {
            server: DirectionJitter::new("Server", expected_interval),
            client: DirectionJitter::new("Client", expected_interval),
            srtt_ms: 0.0,
            rtt_var_ms: 0.0,
            skew_ns: 0.0,
            heartbeats: 0,
        }
    }

    pub fn record_send(&mut self, at: Instant) {
        self.client.record(at);
    }

    pub fn record_arrival(&mut self, at: Instant) {
        self.server.record(at);
    }

    /// Folds one heartbeat round trip in. `client_time_ns` is the wall clock
    /// the client stamped on the request and `server_time_ns` the server's
    /// wall clock when it answered.
    pub fn record_heartbeat(
        &mut self,
        sent_at: Instant,
        received_at: Instant,
        client_time_ns: i64,
        server_time_ns: i64,
    ) {
        self.record_arrival(received_at);

        let rtt = received_at.saturating_duration_since(sent_at);
        self.update_rtt(rtt.as_secs_f64() * 1000.0);

        let one_way_ns = rtt.as_nanos() as f64 / 2.0;
        let skew = server_time_ns as f64 - (client_time_ns as f64 + one_way_ns);
        if self.heartbeats == 0 {
            self.skew_ns = skew;
        } else {
            self.skew_ns = (1.0 - SKEW_ALPHA) * self.skew_ns + SKEW_ALPHA * skew;
        }
        self.heartbeats += 1;
    }

    fn update_rtt(&mut self, rtt: f64) {
        if self.heartbeats == 0 {
            self.srtt_ms = rtt;
            self.rtt_var_ms = rtt / 2.0;
            return;
        }
        let diff = (rtt - self.srtt_ms).abs();
        self.rtt_var_ms = (1.0 - RTT_BETA) * self.rtt_var_ms + RTT_BETA * diff;
        self.srtt_ms = (1.0 - RTT_ALPHA) * self.srtt_ms + RTT_ALPHA * rtt;
    }

    /// Larger of the two directions' jitter.
    pub fn current_jitter(&self) -> Duration {
        self.server.jitter().max(self.client.jitter())
    }

    /// Estimated server-minus-client clock offset in nanoseconds.
    pub fn clock_skew(&self) -> i64 {
        self.skew_ns.round() as i64
    }

    pub fn ping(&self) -> Duration {
        Duration::from_secs_f64(self.srtt_ms.max(0.0) / 1000.0)
    }

    pub fn server(&self) -> &DirectionJitter {
        &self.server
    }

    pub fn client(&self) -> &DirectionJitter {
        &self.client
    }

    pub fn stats(&self) -> JitterStats {
        JitterStats {
            ping: self.ping(),
            rtt_variance: Duration::from_secs_f64(self.rtt_var_ms.max(0.0) / 1000.0),
            server_jitter: self.server.jitter(),
            client_jitter: self.client.jitter(),
            clock_skew_ns: self.clock_skew(),
            heartbeats: self.heartbeats,
        }
    }
}

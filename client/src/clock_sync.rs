//! Estimate of the server clock as seen from the client
//!
//! The server stamps `Connected` and every `Ping` with its own time and, for
//! pings, the RTT it has measured for us. Adding half the RTT to the stamp
//! approximates server time at the moment the packet arrives; the difference
//! to the local clock is smoothed into an offset.

/// Weight of a new offset sample
const OFFSET_SMOOTHING: f64 = 0.1;

/// Offsets further than this from the current estimate replace it outright
const RESYNC_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ServerClock {
    offset: Option<f64>,
    rtt: f64,
}

impl ServerClock {
    /// `default_rtt` is assumed until the server reports a measurement
    pub fn new(default_rtt: f64) -> Self {
        Self {
            offset: None,
            rtt: default_rtt,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = None;
    }

    /// Handshake reply; replaces any previous estimate
    pub fn on_connected(&mut self, server_time: f64, local_now: f64) {
        self.offset = Some(server_time + self.rtt / 2.0 - local_now);
    }

    pub fn on_ping(&mut self, server_time: f64, rtt: f64, local_now: f64) {
        if rtt.is_finite() && rtt >= 0.0 {
            self.rtt = rtt;
        }
        let sample = server_time + self.rtt / 2.0 - local_now;
        self.offset = Some(match self.offset {
            Some(offset) if (sample - offset).abs() <= RESYNC_THRESHOLD => {
                offset + (sample - offset) * OFFSET_SMOOTHING
            }
            _ => sample,
        });
    }

    /// Estimated server time at local time `local_now`
    pub fn server_time(&self, local_now: f64) -> f64 {
        local_now + self.offset.unwrap_or(0.0)
    }
}

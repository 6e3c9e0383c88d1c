/// Throughput measurement for a single HTTP exchange.
///
/// `classify` turns a byte count and an elapsed time into megabits per second
/// and buckets the rate. A zero elapsed time has no meaningful rate and is
/// reported as `Undefined` instead of dividing by zero.

use std::fmt;

const HIGH_MBPS: f64 = 10.0;
const MEDIUM_MBPS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughputClass {
    High,
    Medium,
    Low,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub mbps: Option<f64>,
    pub class: ThroughputClass,
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mbps {
            Some(mbps) => write!(f, "{:.2} Mbps", mbps),
            None => write!(f, "N/A"),
        }
    }
}

impl Throughput {
    pub fn undefined() -> Self {
        Throughput { mbps: None, class: ThroughputClass::Undefined }
    }
}

pub fn classify(bytes: u64, elapsed_ms: f64) -> Throughput {
    if elapsed_ms <= 0.0 || !elapsed_ms.is_finite() {
        return Throughput::undefined();
    }

    // bits per millisecond scaled to seconds, then to megabits
    let mbps = (bytes as f64 * 8.0 * 1000.0) / elapsed_ms / 1_000_000.0;
    let class = if mbps > HIGH_MBPS {
        ThroughputClass::High
    } else if mbps > MEDIUM_MBPS {
        ThroughputClass::Medium
    } else {
        ThroughputClass::Low
    };

    Throughput { mbps: Some(mbps), class }
}

//! Parsers for OS `ping` summaries
//!
//! Each output dialect gets its own function so the formats can be tested in isolation
//! from process spawning. Neither parser fails: a field that cannot be found is `None`
//! and the classifier turns that into an `unknown` status.

use std::sync::LazyLock;

use regex::Regex;

/// Loss and average latency extracted from one ping run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PingSummary {
    /// Packet loss in percent
    pub loss: Option<f64>,

    /// Average round trip in milliseconds
    pub latency: Option<f64>,
}

/// Which `ping` output format to expect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDialect {
    /// Linux iputils, BSD/macOS and BusyBox
    Unix,
    Windows,
}

impl OutputDialect {
    /// Dialect of the platform this binary was built for
    pub fn native() -> Self {
        if cfg!(windows) {
            OutputDialect::Windows
        } else {
            OutputDialect::Unix
        }
    }

    /// Flag selecting the echo count
    pub fn count_flag(&self) -> &'static str {
        match self {
            OutputDialect::Unix => "-c",
            OutputDialect::Windows => "-n",
        }
    }

    pub fn parse(&self, output: &str, count: u32) -> PingSummary {
        match self {
            OutputDialect::Unix => parse_unix(output),
            OutputDialect::Windows => parse_windows(output, count),
        }
    }
}

static UNIX_LOSS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("valid loss pattern")
});

// min/avg/max[/mdev|stddev] = a/b/c[/d] ms
static UNIX_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min/avg/max(?:/\S+)?\s*=\s*[\d.]+/([\d.]+)/").expect("valid rtt pattern")
});

static WINDOWS_LOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Lost = (\d+)").expect("valid lost pattern"));

static WINDOWS_AVERAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Average = (\d+)ms").expect("valid average pattern"));

fn capture_f64(pattern: &Regex, text: &str) -> Option<f64> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Parse the summary printed by Unix-like `ping` implementations
pub fn parse_unix(output: &str) -> PingSummary {
    PingSummary {
        loss: capture_f64(&UNIX_LOSS, output),
        latency: capture_f64(&UNIX_RTT, output),
    }
}

/// Parse the statistics block printed by Windows `ping`
///
/// Windows reports lost packets as a count, so `count` is needed to derive a
/// percentage.
pub fn parse_windows(output: &str, count: u32) -> PingSummary {
    let loss = capture_f64(&WINDOWS_LOST, output).and_then(|lost| {
        (count > 0).then(|| (lost / f64::from(count) * 100.0).min(100.0))
    });

    PingSummary {
        loss,
        latency: capture_f64(&WINDOWS_AVERAGE, output),
    }
}

//! Bound-port discovery from tunnel diagnostic output.
//!
//! `gcloud compute start-iap-tunnel` announces the local port it bound on
//! stderr, e.g. `Listening on port [54321].` or, on older releases,
//! `Picking local unused port [54321].` This text is not a versioned
//! contract; a format change surfaces as a port discovery timeout.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Classification of one diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
	/// The line announces a usable local port.
	Port(u16),
	/// The line has the announcement shape but a number outside 1..=65535.
	Anomaly(String),
	/// Ordinary diagnostic text.
	NoMatch,
}

static PORT_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?:Listening on port|Picking local unused port) \[(\d+)\]").expect("PORT_RE should compile"));

/// Classifies `line`, distinguishing out-of-range announcements from plain text.
pub fn classify(line: &str) -> ScanOutcome {
	let Some(digits) = PORT_RE.captures(line).and_then(|c| c.get(1)) else {
		return ScanOutcome::NoMatch;
	};

	match digits.as_str().parse::<u16>() {
		Ok(port) if port != 0 => ScanOutcome::Port(port),
		_ => ScanOutcome::Anomaly(digits.as_str().to_string()),
	}
}

/// Returns the announced local port in `line`, if any.
pub fn scan(line: &str) -> Option<u16> {
	match classify(line) {
		ScanOutcome::Port(port) => Some(port),
		_ => None,
	}
}

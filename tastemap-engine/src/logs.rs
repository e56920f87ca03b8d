// ---------------------------------------------------------------------------
// Recommender log trail
// ---------------------------------------------------------------------------
//
// Each recommender keeps a bounded list of structured entries that can be
// returned to callers, and mirrors every entry to `tracing`.
// ---------------------------------------------------------------------------

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Debug,
	Info,
	Warning,
	Error,
}

impl LogLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Debug => "DEBUG",
			Self::Info => "INFO",
			Self::Warning => "WARNING",
			Self::Error => "ERROR",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
	pub timestamp: DateTime<Utc>,
	pub message: String,
	pub level: LogLevel,
}

impl LogEntry {
	pub fn format(&self) -> String {
		format!(
			"[{}] [{}] {}",
			self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
			self.level.as_str(),
			self.message
		)
	}
}

/// Position in a log trail, used to collect the lines appended by one call.
#[derive(Debug, Clone, Copy)]
pub struct LogMark(usize);

pub struct RecommenderLog {
	component: String,
	entries: Vec<LogEntry>,
	max_entries: usize,
	/// Entries evicted so far; keeps marks valid across eviction.
	dropped: usize,
}

impl RecommenderLog {
	pub fn new(component: impl Into<String>) -> Self {
		Self::with_capacity(component, DEFAULT_MAX_ENTRIES)
	}

	pub fn with_capacity(component: impl Into<String>, max_entries: usize) -> Self {
		Self {
			component: component.into(),
			entries: Vec::new(),
			max_entries: max_entries.max(1),
			dropped: 0,
		}
	}

	pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
		let message = message.into();
		match level {
			LogLevel::Debug => tracing::debug!(recommender = %self.component, "{}", message),
			LogLevel::Info => tracing::info!(recommender = %self.component, "{}", message),
			LogLevel::Warning => tracing::warn!(recommender = %self.component, "{}", message),
			LogLevel::Error => tracing::error!(recommender = %self.component, "{}", message),
		}
		self.entries.push(LogEntry {
			timestamp: Utc::now(),
			message,
			level,
		});
		if self.entries.len() > self.max_entries {
			let excess = self.entries.len() - self.max_entries;
			self.entries.drain(..excess);
			self.dropped += excess;
		}
	}

	pub fn debug(&mut self, message: impl Into<String>) {
		self.push(LogLevel::Debug, message);
	}

	pub fn info(&mut self, message: impl Into<String>) {
		self.push(LogLevel::Info, message);
	}

	pub fn warning(&mut self, message: impl Into<String>) {
		self.push(LogLevel::Warning, message);
	}

	pub fn error(&mut self, message: impl Into<String>) {
		self.push(LogLevel::Error, message);
	}

	pub fn mark(&self) -> LogMark {
		LogMark(self.dropped + self.entries.len())
	}

	/// Formatted lines appended since `mark`.
	pub fn since(&self, mark: LogMark) -> Vec<String> {
		let start = mark.0.saturating_sub(self.dropped).min(self.entries.len());
		self.entries[start..].iter().map(LogEntry::format).collect()
	}

	pub fn entries(&self) -> &[LogEntry] {
		&self.entries
	}

	pub fn formatted(&self) -> Vec<String> {
		self.entries.iter().map(LogEntry::format).collect()
	}

	pub fn clear(&mut self) {
		self.dropped += self.entries.len();
		self.entries.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn push_records_level_and_message() {
		let mut log = RecommenderLog::new("test");
		log.info("hello");
		log.error("boom");
		assert_eq!(log.entries().len(), 2);
		assert_eq!(log.entries()[1].level, LogLevel::Error);
		assert!(log.formatted()[1].contains("[ERROR] boom"));
	}

	#[test]
	fn since_returns_only_new_lines() {
		let mut log = RecommenderLog::new("test");
		log.info("old");
		let mark = log.mark();
		log.warning("new");
		let lines = log.since(mark);
		assert_eq!(lines.len(), 1);
		assert!(lines[0].ends_with("[WARNING] new"));
	}

	#[test]
	fn eviction_keeps_marks_valid() {
		let mut log = RecommenderLog::with_capacity("test", 3);
		for i in 0..5 {
			log.debug(format!("line {i}"));
		}
		assert_eq!(log.entries().len(), 3);
		let mark = log.mark();
		log.info("after");
		log.info("after 2");
		let lines = log.since(mark);
		assert_eq!(lines.len(), 2);
		assert!(lines[0].ends_with("after"));
	}

	#[test]
	fn level_serializes_lowercase() {
		assert_eq!(
			serde_json::to_value(LogLevel::Warning).unwrap(),
			serde_json::json!("warning")
		);
	}
}

//! Structured JSON-line logging for the monitor.
//!
//! Newline-delimited JSON on stderr. `LOG_LEVEL` sets the minimum level,
//! `LOG_DOMAINS` (comma-separated, or "all") filters by domain.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// Event categories for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Poll,      // scheduler ticks, delays, snapshot application
    Registry,  // HTTP calls to the job registry
    Selection, // detail fetches, stale drops
    System,    // mount/unmount lifecycle
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Poll => "poll",
            Domain::Registry => "registry",
            Domain::Selection => "selection",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Emit one structured record.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(Utc::now().to_rfc3339()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str()));
    entry.insert("domain".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    for (k, v) in fields {
        entry.insert(k, v);
    }
    eprintln!("{}", Value::Object(entry));
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_u64(n: u64) -> Value {
    json!(n)
}

//! Space Logging and Tracing
//!
//! Structured events for region space operations, useful for:
//! - Collection pacing analysis
//! - Debugging region bookkeeping
//! - Production monitoring
//!
//! Events are kept in a bounded in-memory history and, when console output is
//! enabled, forwarded to the `log` facade under the `rgc` target.
//!
//! Log Levels:
//! - ERROR: Invariant violations (region dump before panicking)
//! - WARN: Allocation failures
//! - INFO: Evacuation planning, from-space reclamation, whole-space clear
//! - DEBUG: Large object frees, slow-path region hand-outs
//! - TRACE: TLAB grants and revocations

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Log level for space events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Space event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpaceEvent {
    /// `set_from_space` decided the evacuation set
    EvacuationPlanned {
        epoch: u64,
        evacuated_regions: usize,
        retained_regions: usize,
        evacuated_bytes: usize,
        forced: bool,
    },

    /// `clear_from_space` reclaimed the evacuated regions
    FromSpaceCleared {
        epoch: u64,
        freed_regions: usize,
        freed_bytes: usize,
        promoted_regions: usize,
        bitmap_cleared_regions: usize,
    },

    /// A region was checked out as a thread's TLAB
    TlabGranted { thread: u64, region: usize },

    /// A TLAB was written back into its region
    TlabRevoked {
        thread: u64,
        region: usize,
        objects: usize,
        bytes: usize,
    },

    /// A multi-region object was freed
    LargeObjectFreed { address: usize, regions: usize },

    /// No region could satisfy a request
    AllocationFailure {
        requested: usize,
        num_non_free_regions: usize,
        num_regions: usize,
        for_evacuation: bool,
    },

    /// Every region returned to Free
    SpaceCleared { regions: usize },
}

impl SpaceEvent {
    /// Level at which the event is recorded
    pub fn level(&self) -> LogLevel {
        match self {
            SpaceEvent::AllocationFailure { .. } => LogLevel::Warn,
            SpaceEvent::EvacuationPlanned { .. }
            | SpaceEvent::FromSpaceCleared { .. }
            | SpaceEvent::SpaceCleared { .. } => LogLevel::Info,
            SpaceEvent::LargeObjectFreed { .. } => LogLevel::Debug,
            SpaceEvent::TlabGranted { .. } | SpaceEvent::TlabRevoked { .. } => LogLevel::Trace,
        }
    }

    /// Render as a single-line JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

impl fmt::Display for SpaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceEvent::EvacuationPlanned {
                epoch,
                evacuated_regions,
                retained_regions,
                evacuated_bytes,
                forced,
            } => write!(
                f,
                "[RGC] Epoch {}: evacuating {} regions ({} bytes), retaining {}{}",
                epoch,
                evacuated_regions,
                evacuated_bytes,
                retained_regions,
                if *forced { " (forced)" } else { "" }
            ),
            SpaceEvent::FromSpaceCleared {
                epoch,
                freed_regions,
                freed_bytes,
                promoted_regions,
                bitmap_cleared_regions,
            } => write!(
                f,
                "[RGC] Epoch {}: freed {} regions ({} bytes), promoted {} ({} with bitmap cleared)",
                epoch, freed_regions, freed_bytes, promoted_regions, bitmap_cleared_regions
            ),
            SpaceEvent::TlabGranted { thread, region } => {
                write!(f, "[RGC] TLAB region {} granted to thread {}", region, thread)
            }
            SpaceEvent::TlabRevoked {
                thread,
                region,
                objects,
                bytes,
            } => write!(
                f,
                "[RGC] TLAB region {} revoked from thread {}: {} objects, {} bytes",
                region, thread, objects, bytes
            ),
            SpaceEvent::LargeObjectFreed { address, regions } => write!(
                f,
                "[RGC] Large object at {:#x} freed ({} regions)",
                address, regions
            ),
            SpaceEvent::AllocationFailure {
                requested,
                num_non_free_regions,
                num_regions,
                for_evacuation,
            } => write!(
                f,
                "[RGC] {} allocation of {} bytes failed ({}/{} regions in use)",
                if *for_evacuation { "Evacuation" } else { "Mutator" },
                requested,
                num_non_free_regions,
                num_regions
            ),
            SpaceEvent::SpaceCleared { regions } => {
                write!(f, "[RGC] Space cleared ({} regions)", regions)
            }
        }
    }
}

/// Event logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Forward events to the `log` facade
    pub console: bool,

    /// Render forwarded events as JSON
    pub json: bool,

    /// Prefix forwarded events with a wall-clock timestamp
    pub timestamps: bool,

    /// Number of events kept in the history
    pub max_events: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            json: false,
            timestamps: true,
            max_events: 1024,
        }
    }
}

/// Event logger - centralized recording of space events
pub struct EventLogger {
    config: LoggerConfig,
    events: Mutex<VecDeque<(Instant, SpaceEvent)>>,
    enabled: AtomicBool,
}

impl EventLogger {
    /// Create new event logger
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Record a space event
    pub fn log(&self, event: SpaceEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event.level();
        if level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(level, &event);
        }

        let mut events = self.events.lock();
        if self.config.max_events == 0 {
            return;
        }
        while events.len() >= self.config.max_events {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    fn output_console(&self, level: LogLevel, event: &SpaceEvent) {
        let level = level.as_log_level();
        if !log::log_enabled!(target: "rgc", level) {
            return;
        }

        let body = if self.config.json {
            event.to_json()
        } else {
            event.to_string()
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            log::log!(target: "rgc", level, "[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), body);
        } else {
            log::log!(target: "rgc", level, "{}", body);
        }
    }

    /// Get all recorded events, oldest first
    pub fn get_events(&self) -> Vec<(Instant, SpaceEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    /// Recorded events without their timestamps
    pub fn events(&self) -> Vec<SpaceEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogger")
            .field("config", &self.config)
            .field("events", &self.event_count())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Global event logger
lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: RwLock<Arc<EventLogger>> =
        RwLock::new(Arc::new(EventLogger::default()));
}

/// Shared handle to the global logger
pub fn global_logger() -> Arc<EventLogger> {
    Arc::clone(&GLOBAL_LOGGER.read())
}

/// Log a space event to the global logger
pub fn log_event(event: SpaceEvent) {
    GLOBAL_LOGGER.read().log(event);
}

/// Replace the global logger
///
/// Spaces created earlier keep the logger they were created with.
pub fn configure_logger(config: LoggerConfig) {
    *GLOBAL_LOGGER.write() = Arc::new(EventLogger::new(config));
}

/// Get global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.read().event_count()
}

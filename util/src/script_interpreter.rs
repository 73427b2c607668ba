//! # Script interpreter module
//!
//! This module provides an interpreter for timed command scripts. Each line of
//! a script has the form `<time_s>: <json command>;`, for example
//!
//! ```text
//! 0.0: "StartTracking";
//! 2.5: {"Guide": {"axis": "Axis1", "dir": "Forward", "duration_ms": 500}};
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::fs;
use regex::RegexBuilder;
use serde::de::DeserializeOwned;
use thiserror::Error;

// Internal
use crate::session::get_elapsed_seconds;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command which is scripted to occur at a specific time.
struct Command<T> {
    /// The time the command is supposed to execute at
    exec_time_s: f64,

    /// The command to run
    cmd: T
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use
/// `.get_pending_cmds` to acquire a list of commands that need executing.
pub struct ScriptInterpreter<T> {
    _script_path: PathBuf,
    cmds: VecDeque<Command<T>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0}")]
    ScriptNotFound(String),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid command at {0} s: {1}")]
    InvalidCmd(f64, serde_json::Error)
}

pub enum PendingCmds<T> {
    None,
    Some(Vec<T>),
    EndOfScript
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T> ScriptInterpreter<T>
where
    T: DeserializeOwned
{

    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {

        // Get the path in a buffer
        let path = PathBuf::from(script_path.as_ref());
        
        // Check that the script file exists.
        if !path.exists() {
            return Err(
                ScriptError::ScriptNotFound(path.display().to_string()));
        }

        // Load the script into a string
        let script = fs::read_to_string(&path)
            .map_err(ScriptError::ScriptLoadError)?;

        Self::from_script(path, &script)
    }

    /// Create a new interpreter from script text.
    pub fn from_script<P: AsRef<Path>>(
        script_path: P, script: &str
    ) -> Result<Self, ScriptError> {
        // Empty queue of commands
        let mut cmd_queue: VecDeque<Command<T>> = VecDeque::new();

        // Go through the script executing __the magic regex__.
        let re = RegexBuilder::
            new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .expect("script regex is valid");

        for cap in re.captures_iter(script) {
            // Both groups are mandatory in the regex so always present
            let (time_str, cmd_str) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(c)) => (t.as_str(), c.as_str()),
                _ => continue
            };

            // Parse the exec time
            let exec_time_s: f64 = time_str.parse().map_err(|e| 
                ScriptError::InvalidTimestamp(format!("{}", e)))?;

            // Parse the command from the payload. The scripts contain JSON only.
            let cmd = serde_json::from_str(cmd_str)
                .map_err(|e| ScriptError::InvalidCmd(exec_time_s, e))?;

            cmd_queue.push_back(Command {
                exec_time_s,
                cmd
            });
        }

        if cmd_queue.is_empty() {
            return Err(ScriptError::ScriptEmpty)
        }

        Ok(ScriptInterpreter {
            _script_path: script_path.as_ref().to_path_buf(),
            cmds: cmd_queue
        })
    }
}

impl<T> ScriptInterpreter<T> {
    /// Return the commands which are due according to the session clock.
    pub fn get_pending_cmds(&mut self) -> PendingCmds<T> {
        self.get_pending_cmds_at(get_elapsed_seconds())
    }

    /// Return the commands which are due at the given script time.
    pub fn get_pending_cmds_at(&mut self, current_time_s: f64) -> PendingCmds<T> {

        // If the queue is empty the script is over and we return the end of
        // script variant
        if self.cmds.is_empty() {
            return PendingCmds::EndOfScript
        }

        let mut cmd_vec: Vec<T> = vec![];

        // Pop items from the queue while the head's exec time has passed
        while self.cmds
            .front()
            .map(|c| c.exec_time_s <= current_time_s)
            .unwrap_or(false)
        {
            if let Some(c) = self.cmds.pop_front() {
                cmd_vec.push(c.cmd);
            }
        }

        if cmd_vec.is_empty() {
            PendingCmds::None
        }
        else {
            PendingCmds::Some(cmd_vec)
        }
    }

    /// Get the number of commands remaining in the script
    pub fn get_num_cmds(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.cmds.back() {
            Some(c) => c.exec_time_s,
            None => 0f64
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pending_by_time() {
        let script = "0.0: 1;\n 1.5 : 2;\n1.5: 3;\n4: 4;\n";
        let mut si: ScriptInterpreter<u32> =
            ScriptInterpreter::from_script("inline", script).unwrap();

        assert_eq!(si.get_num_cmds(), 4);
        assert_eq!(si.get_duration(), 4.0);

        match si.get_pending_cmds_at(1.0) {
            PendingCmds::Some(v) => assert_eq!(v, vec![1]),
            _ => panic!("expected the first command"),
        }
        assert!(matches!(si.get_pending_cmds_at(1.2), PendingCmds::None));
        match si.get_pending_cmds_at(2.0) {
            PendingCmds::Some(v) => assert_eq!(v, vec![2, 3]),
            _ => panic!("expected two commands"),
        }
        assert!(matches!(si.get_pending_cmds_at(5.0), PendingCmds::Some(_)));
        assert!(matches!(si.get_pending_cmds_at(6.0), PendingCmds::EndOfScript));
    }

    #[test]
    fn test_empty_script() {
        assert!(matches!(
            ScriptInterpreter::<u32>::from_script("inline", "# nothing here"),
            Err(ScriptError::ScriptEmpty)
        ));
    }
}

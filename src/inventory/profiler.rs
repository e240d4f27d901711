use super::{Error, InventorySource};

use std::process::Command;

use tracing::debug;

/// Runs `system_profiler` and returns its report on paired Bluetooth peripherals.
pub struct SystemProfiler {
    /// The program to run (usually found in `$PATH`)
    program: String,

    /// The report section to request
    data_type: String,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self {
            program: String::from("system_profiler"),
            data_type: String::from("SPBluetoothDataType"),
        }
    }

    pub fn program(mut self, program: &str) -> Self {
        self.program = String::from(program);
        self
    }

    pub fn data_type(mut self, data_type: &str) -> Self {
        self.data_type = String::from(data_type);
        self
    }
}

impl Default for SystemProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl InventorySource for SystemProfiler {
    fn query(&self) -> Result<String, Error> {
        debug!(program = %self.program, data_type = %self.data_type, "Querying the device inventory");

        // This blocks until the profiler has collected its report.
        let output = Command::new(&self.program)
            .arg(&self.data_type)
            .output()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_spawn_error() {
        let source = SystemProfiler::new().program("/nonexistent/system_profiler");
        assert!(matches!(source.query(), Err(Error::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn program_output_is_returned() {
        // `echo` prints its argument, which stands in for the report here.
        let source = SystemProfiler::new().program("echo").data_type("AirPods:");
        assert_eq!(source.query().unwrap(), "AirPods:\n");
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_is_reported() {
        let source = SystemProfiler::new().program("false");
        assert!(matches!(source.query(), Err(Error::Failed { .. })));
    }
}

use super::{Error, PrintJob, Spooler};

use std::ffi::OsString;
use std::process::Command;

use tracing::debug;

/// Prints through the CUPS command line client.
pub struct LpSpooler {
    /// The program to run (usually `lp`)
    program: String,

    /// The destination printer (`None` selects the system default)
    destination: Option<String>,
}

impl LpSpooler {
    pub fn new(destination: Option<&str>) -> Self {
        Self {
            program: String::from("lp"),
            destination: destination.map(String::from),
        }
    }

    pub fn program(mut self, program: &str) -> Self {
        self.program = String::from(program);
        self
    }

    /// Build the argument list for a job.
    pub fn args(&self, job: &PrintJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        if let Some(destination) = &self.destination {
            args.push("-d".into());
            args.push(destination.into());
        }

        if job.copies > 1 {
            args.push("-n".into());
            args.push(job.copies.to_string().into());
        }

        args.push("-t".into());
        args.push((&job.title).into());
        args.push("-o".into());
        args.push(format!("media={}", job.media).into());
        args.push("-o".into());
        args.push(format!("orientation-requested={}", job.orientation.ipp_value()).into());
        args.push(job.path.as_os_str().to_os_string());

        args
    }
}

impl Default for LpSpooler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Spooler for LpSpooler {
    fn submit(&self, job: &PrintJob) -> Result<(), Error> {
        if !job.path.is_file() {
            return Err(Error::MissingFile(job.path.clone()));
        }

        let args = self.args(job);
        debug!(program = %self.program, ?args, "Submitting print job");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::Rejected {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // `lp` answers with the request ID (e.g. "request id is Label-42 (1 file(s))").
        let response = String::from_utf8_lossy(&output.stdout);
        debug!(response = response.trim(), "Spooler accepted the job");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect()
    }

    #[test]
    fn default_destination() {
        let job = PrintJob::new(PathBuf::from("/tmp/AB12_labeled.png"), "AirPods Pro - Case");

        assert_eq!(
            strings(LpSpooler::default().args(&job)),
            [
                "-t",
                "AirPods Pro - Case",
                "-o",
                "media=Custom.80x50mm",
                "-o",
                "orientation-requested=4",
                "/tmp/AB12_labeled.png",
            ]
        );
    }

    #[test]
    fn named_destination_and_copies() {
        let mut job = PrintJob::new(PathBuf::from("label.png"), "Left");
        job.copies = 2;

        let args = strings(LpSpooler::new(Some("Brother_QL_820NWB")).args(&job));
        assert_eq!(&args[..4], ["-d", "Brother_QL_820NWB", "-n", "2"]);
    }

    #[test]
    fn missing_file_is_not_submitted() {
        let spooler = LpSpooler::default().program("/nonexistent/lp");
        let job = PrintJob::new(PathBuf::from("/nonexistent/label.png"), "Case");

        assert!(matches!(spooler.submit(&job), Err(Error::MissingFile(_))));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let spooler = LpSpooler::default().program("/nonexistent/lp");
        let job = PrintJob::new(file.path().to_path_buf(), "Case");

        assert!(matches!(spooler.submit(&job), Err(Error::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn rejected_job() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let spooler = LpSpooler::default().program("false");
        let job = PrintJob::new(file.path().to_path_buf(), "Case");

        assert!(matches!(spooler.submit(&job), Err(Error::Rejected { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn accepted_job() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let spooler = LpSpooler::default().program("true");
        let job = PrintJob::new(file.path().to_path_buf(), "Case");

        assert!(spooler.submit(&job).is_ok());
    }
}

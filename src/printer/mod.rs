use std::fmt::Display;
use std::path::PathBuf;

use tracing::{error, info};

/// Submit jobs through the CUPS `lp` command.
mod lp;
pub use lp::LpSpooler;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to run the spooler command `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("The spooler has rejected the job ({status}): {stderr}")]
    Rejected {
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("The label file {0:?} does not exist.")]
    MissingFile(PathBuf),
}

/// The physical media loaded into the printer.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Media {
    pub width_mm: f32,
    pub height_mm: f32,
}

impl Default for Media {
    fn default() -> Self {
        Self {
            width_mm: 80.0,
            height_mm: 50.0,
        }
    }
}

impl Display for Media {
    /// The custom media name as understood by CUPS (e.g. `Custom.80x50mm`).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Custom.{}x{}mm", self.width_mm, self.height_mm)
    }
}

/// The orientation requested from the spooler (IPP `orientation-requested`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Orientation {
    Portrait,

    /// Labels are composed rotated by 90 degrees.
    #[default]
    Landscape,
    ReverseLandscape,
    ReversePortrait,
}

impl Orientation {
    pub fn ipp_value(&self) -> u8 {
        use Orientation::*;

        match self {
            Portrait => 3,
            Landscape => 4,
            ReverseLandscape => 5,
            ReversePortrait => 6,
        }
    }
}

/// One rendered label file together with the media parameters to print it with.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    /// The rendered label (PNG)
    pub path: PathBuf,

    /// The job title shown in the spooler queue
    pub title: String,

    pub media: Media,
    pub orientation: Orientation,
    pub copies: u32,
}

impl PrintJob {
    pub fn new(path: PathBuf, title: &str) -> Self {
        Self {
            path,
            title: String::from(title),
            media: Media::default(),
            orientation: Orientation::default(),
            copies: 1,
        }
    }
}

/// Anything that accepts print jobs. Submission blocks until the spooler has answered.
pub trait Spooler {
    fn submit(&self, job: &PrintJob) -> Result<(), Error>;
}

impl<S: Spooler + ?Sized> Spooler for &S {
    fn submit(&self, job: &PrintJob) -> Result<(), Error> {
        (**self).submit(job)
    }
}

/// The result of submitting one job.
#[derive(Debug)]
pub struct Dispatched {
    pub job: PrintJob,
    pub result: Result<(), Error>,
}

/// Submit all jobs in order. A failing job is logged and does not stop the following ones.
pub fn dispatch<S: Spooler>(spooler: &S, jobs: Vec<PrintJob>) -> Vec<Dispatched> {
    let total = jobs.len();

    jobs.into_iter()
        .enumerate()
        .map(|(idx, job)| {
            let result = spooler.submit(&job);

            match &result {
                Ok(()) => info!(
                    job = idx + 1,
                    total,
                    path = %job.path.display(),
                    "Label sent to the printer"
                ),
                Err(err) => error!(
                    job = idx + 1,
                    total,
                    path = %job.path.display(),
                    %err,
                    "Failed to print label"
                ),
            }

            Dispatched { job, result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    /// Records every submission and fails the jobs at the given positions (1-based).
    struct FlakySpooler {
        fail_at: Vec<usize>,
        submitted: RefCell<Vec<PathBuf>>,
    }

    impl Spooler for FlakySpooler {
        fn submit(&self, job: &PrintJob) -> Result<(), Error> {
            let mut submitted = self.submitted.borrow_mut();
            submitted.push(job.path.clone());

            if self.fail_at.contains(&submitted.len()) {
                Err(Error::MissingFile(job.path.clone()))
            } else {
                Ok(())
            }
        }
    }

    fn jobs() -> Vec<PrintJob> {
        ["case.png", "left.png", "right.png"]
            .into_iter()
            .map(|name| PrintJob::new(PathBuf::from(name), name))
            .collect()
    }

    #[test]
    fn failing_job_does_not_stop_batch() {
        let spooler = FlakySpooler {
            fail_at: vec![2],
            submitted: RefCell::new(Vec::new()),
        };

        let results = dispatch(&spooler, jobs());

        assert_eq!(results.len(), 3);
        assert!(results[0].result.is_ok());
        assert!(results[1].result.is_err());
        assert!(results[2].result.is_ok());
        assert_eq!(results[2].job.path, PathBuf::from("right.png"));
        assert_eq!(spooler.submitted.borrow().len(), 3);
    }

    #[test]
    fn all_jobs_failing() {
        let spooler = FlakySpooler {
            fail_at: vec![1, 2, 3],
            submitted: RefCell::new(Vec::new()),
        };

        let results = dispatch(&spooler, jobs());
        assert!(results.iter().all(|d| d.result.is_err()));
    }

    #[test]
    fn empty_batch() {
        let spooler = FlakySpooler {
            fail_at: Vec::new(),
            submitted: RefCell::new(Vec::new()),
        };

        assert!(dispatch(&spooler, Vec::new()).is_empty());
        assert!(spooler.submitted.borrow().is_empty());
    }

    #[test]
    fn media_name() {
        assert_eq!(Media::default().to_string(), "Custom.80x50mm");
        assert_eq!(
            Media {
                width_mm: 62.0,
                height_mm: 29.5
            }
            .to_string(),
            "Custom.62x29.5mm"
        );
    }

    #[test]
    fn default_orientation_is_rotated() {
        assert_eq!(Orientation::default().ipp_value(), 4);
        assert_eq!(PrintJob::new(PathBuf::from("a.png"), "a").copies, 1);
    }
}

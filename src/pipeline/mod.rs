use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::inventory::{Component, DeviceSerialSet, Extractor, InventorySource, Serial};
use crate::label::{Compositor, Error as ComposeError};
use crate::printer::{self, Media, Orientation, PrintJob, Spooler};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The accessory family to look for in the inventory
    pub family: String,

    /// Keep the label images in this directory (`None` uses a scratch directory per run)
    pub output_dir: Option<PathBuf>,

    /// Send the labels to the printer (`false` only composes them)
    pub print: bool,

    pub copies: u32,
    pub media: Media,
    pub orientation: Orientation,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            family: String::from(crate::inventory::DEFAULT_FAMILY),
            output_dir: None,
            print: true,
            copies: 1,
            media: Media::default(),
            orientation: Orientation::default(),
        }
    }
}

/// What happened to a single component during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The inventory does not report a serial for the component.
    NotFound,

    /// The label could not be rendered or saved.
    ComposeFailed(String),

    /// The label has been rendered, but printing was not requested.
    Composed { path: PathBuf },

    /// The spooler has accepted the label.
    Printed { path: PathBuf },

    /// The spooler has refused the label.
    PrintFailed { path: PathBuf, reason: String },
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Outcome::*;

        match self {
            NotFound => write!(f, "not found"),
            ComposeFailed(reason) => write!(f, "label failed: {}", reason),
            Composed { path } => write!(f, "composed ({})", path.display()),
            Printed { .. } => write!(f, "printed"),
            PrintFailed { reason, .. } => write!(f, "print failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentReport {
    pub component: Component,
    pub serial: Serial,
    pub outcome: Outcome,
}

/// The result of a run: one report per component, in print order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub reports: Vec<ComponentReport>,

    /// Has the print dispatcher been invoked at all?
    pub dispatched: bool,
}

impl Summary {
    pub fn get(&self, component: Component) -> Option<&ComponentReport> {
        self.reports.iter().find(|r| r.component == component)
    }

    /// The number of labels that were handed to the spooler.
    pub fn print_attempts(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Printed { .. } | Outcome::PrintFailed { .. }))
            .count()
    }

    pub fn printed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Printed { .. }))
            .count()
    }

    /// Not a single label could be produced.
    pub fn nothing_to_print(&self) -> bool {
        self.reports
            .iter()
            .all(|r| matches!(r.outcome, Outcome::NotFound | Outcome::ComposeFailed(_)))
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for report in &self.reports {
            writeln!(
                f,
                "{:<6} {:<14} {}",
                report.component.key(),
                report.serial,
                report.outcome
            )?;
        }

        if self.nothing_to_print() {
            writeln!(f, "Nothing to print.")?;
        } else if self.dispatched {
            writeln!(
                f,
                "{} of {} labels printed.",
                self.printed(),
                self.print_attempts()
            )?;
        }

        Ok(())
    }
}

/// Where the label images of one run are written.
enum Scratch {
    /// Removed together with its contents when the run ends
    Temporary(TempDir),

    /// Left in place for the caller
    Kept(PathBuf),
}

impl Scratch {
    fn path(&self) -> &Path {
        match self {
            Scratch::Temporary(dir) => dir.path(),
            Scratch::Kept(path) => path,
        }
    }
}

/// Extracts the serials, composes one label per found component and prints them.
pub struct Pipeline<S, P> {
    extractor: Extractor<S>,
    compositor: Compositor,
    spooler: P,
    config: PipelineConfig,
}

impl<S: InventorySource, P: Spooler> Pipeline<S, P> {
    pub fn new(source: S, compositor: Compositor, spooler: P, config: PipelineConfig) -> Self {
        Self {
            extractor: Extractor::with_family(source, &config.family),
            compositor,
            spooler,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Query the inventory without composing anything.
    pub fn connection_state(&self) -> DeviceSerialSet {
        self.extractor.extract()
    }

    /// Print the labels of all components that are present.
    pub fn print_all(&mut self) -> Summary {
        self.run()
    }

    /// Perform one complete run. Every run starts from scratch and nothing is retried.
    pub fn run(&mut self) -> Summary {
        let serials = self.extractor.extract();
        info!(
            case = %serials.case,
            left = %serials.left,
            right = %serials.right,
            "Serial numbers"
        );

        let scratch = self.scratch();
        let mut reports = Vec::with_capacity(Component::ALL.len());
        let mut jobs = Vec::new();

        for (component, serial) in serials.iter() {
            let outcome = match serial.as_found() {
                None => {
                    info!(%component, "Serial number not found, skipping");
                    Outcome::NotFound
                }

                Some(serial) => match self.render(component, serial, &scratch) {
                    Ok(path) => {
                        jobs.push((reports.len(), self.job(component, serial, &path)));
                        Outcome::Composed { path }
                    }
                    Err(reason) => {
                        warn!(%component, serial, %reason, "Skipping label");
                        Outcome::ComposeFailed(reason)
                    }
                },
            };

            reports.push(ComponentReport {
                component,
                serial: serial.clone(),
                outcome,
            });
        }

        let mut summary = Summary {
            reports,
            dispatched: false,
        };

        if !self.config.print {
            return summary;
        }

        if jobs.is_empty() {
            info!("No labels to print");
            return summary;
        }

        // Submit in component order. The per-job results replace the "composed" outcomes.
        let (indices, jobs): (Vec<_>, Vec<_>) = jobs.into_iter().unzip();
        let results = printer::dispatch(&self.spooler, jobs);
        summary.dispatched = true;

        for (idx, dispatched) in indices.into_iter().zip(results) {
            let path = dispatched.job.path;

            summary.reports[idx].outcome = match dispatched.result {
                Ok(()) => Outcome::Printed { path },
                Err(err) => Outcome::PrintFailed {
                    path,
                    reason: err.to_string(),
                },
            };
        }

        info!(
            printed = summary.printed(),
            attempts = summary.print_attempts(),
            "Run finished"
        );

        // The scratch directory (if temporary) is removed here, after the spooler has
        // taken its copies.
        drop(scratch);

        summary
    }

    fn scratch(&self) -> Result<Scratch, String> {
        let scratch = match &self.config.output_dir {
            Some(dir) => fs::create_dir_all(dir).map(|_| Scratch::Kept(dir.clone())),

            // Composed labels are the result of a preview, so they have to outlive the run.
            None if !self.config.print => tempfile::Builder::new()
                .prefix("earbud-labels-")
                .tempdir()
                .map(|dir| Scratch::Kept(dir.keep())),

            None => tempfile::Builder::new()
                .prefix("earbud-labels-")
                .tempdir()
                .map(Scratch::Temporary),
        };

        if let Ok(Scratch::Kept(dir)) = &scratch {
            info!(dir = %dir.display(), "Labels are kept");
        }

        scratch.map_err(|err| format!("cannot create the label directory: {}", err))
    }

    fn render(
        &mut self,
        component: Component,
        serial: &str,
        scratch: &Result<Scratch, String>,
    ) -> Result<PathBuf, String> {
        let dir = scratch.as_ref().map_err(Clone::clone)?.path();

        let label = self
            .compositor
            .compose(serial, component.caption())
            .map_err(|err: ComposeError| err.to_string())?;

        // Components may report the same serial, so the key keeps their files apart.
        let path = dir.join(format!("{}_{}_labeled.png", component.key(), serial));
        label.save(&path).map_err(|err| err.to_string())?;

        info!(%component, path = %path.display(), "Label saved");
        Ok(path)
    }

    fn job(&self, component: Component, serial: &str, path: &Path) -> PrintJob {
        let title = format!(
            "{} {} {}",
            component.caption(),
            serial,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        PrintJob {
            path: path.to_path_buf(),
            title,
            media: self.config.media,
            orientation: self.config.orientation,
            copies: self.config.copies,
        }
    }
}

/// Query the host for paired earbuds and extract the serial number of every component.
pub mod inventory;

/// Compose printable barcode labels from serial numbers.
pub mod label;

/// Submit rendered labels to the system print spooler.
pub mod printer;

/// Glue the stages together: extract, compose and print in one run.
pub mod pipeline;

pub use inventory::{Component, DeviceSerialSet, Extractor, InventorySource, Serial};
pub use label::{Compositor, LabelConfig, LabelImage};
pub use pipeline::{Outcome, Pipeline, PipelineConfig, Summary};
pub use printer::{LpSpooler, Media, Orientation, PrintJob, Spooler};

pub use inventory::Error as InventoryError;
pub use label::Error as ComposeError;
pub use printer::Error as PrintError;

use std::fmt::Display;

use tracing::{debug, error};

/// Parse the free-form inventory text into serial numbers.
mod parse;
pub use parse::parse;

/// Query the Bluetooth inventory of macOS via `system_profiler`.
mod profiler;
pub use profiler::SystemProfiler;

/// The marker that opens the inventory block of the accessory family we are interested in.
pub const DEFAULT_FAMILY: &str = "AirPods";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to run the inventory command `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("The inventory command `{program}` has failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("The inventory output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("The accessory family marker cannot be matched: {0}")]
    Pattern(#[from] regex::Error),
}

/// The physical parts of a pair of earbuds that carry their own serial number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    Case,
    Left,
    Right,
}

impl Component {
    /// All components in the order they are labeled and printed.
    pub const ALL: [Component; 3] = [Component::Case, Component::Left, Component::Right];

    /// The key used for this component in reports.
    pub fn key(&self) -> &'static str {
        use Component::*;

        match self {
            Case => "case",
            Left => "left",
            Right => "right",
        }
    }

    /// The caption printed on top of the label.
    pub fn caption(&self) -> &'static str {
        use Component::*;

        match self {
            Case => "AirPods Pro - Case",
            Left => "AirPods Pro - Left Earpiece",
            Right => "AirPods Pro - Right Earpiece",
        }
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A serial number as reported by the inventory, or the marker that none was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Serial {
    Found(String),
    NotFound,
}

impl Serial {
    pub fn as_found(&self) -> Option<&str> {
        match self {
            Serial::Found(serial) => Some(serial),
            Serial::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Serial::Found(_))
    }
}

impl Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Serial::Found(serial) => f.pad(serial),
            Serial::NotFound => f.pad("Not Found"),
        }
    }
}

/// The serial numbers of all components of one accessory.
/// Every component always has an entry, even if it is `Serial::NotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSerialSet {
    pub case: Serial,
    pub left: Serial,
    pub right: Serial,
}

impl DeviceSerialSet {
    /// The state for "no accessory present".
    pub fn not_found() -> Self {
        Self {
            case: Serial::NotFound,
            left: Serial::NotFound,
            right: Serial::NotFound,
        }
    }

    pub fn get(&self, component: Component) -> &Serial {
        use Component::*;

        match component {
            Case => &self.case,
            Left => &self.left,
            Right => &self.right,
        }
    }

    /// Walk the components in their stable order (case, left, right).
    pub fn iter(&self) -> impl Iterator<Item = (Component, &Serial)> + '_ {
        Component::ALL.into_iter().map(move |c| (c, self.get(c)))
    }

    pub fn found_count(&self) -> usize {
        self.iter().filter(|(_, serial)| serial.is_found()).count()
    }

    /// Is every component present? This is what callers treat as "connected".
    pub fn all_found(&self) -> bool {
        self.found_count() == Component::ALL.len()
    }
}

impl Display for DeviceSerialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (component, serial) in self.iter() {
            writeln!(f, "{:<6} {}", component.key(), serial)?;
        }

        Ok(())
    }
}

/// A source of raw device inventory text.
pub trait InventorySource {
    fn query(&self) -> Result<String, Error>;
}

/// Extracts the serial set from an inventory source.
/// Extraction never fails: every problem degrades to "not found".
pub struct Extractor<S> {
    source: S,
    family: String,
}

impl<S: InventorySource> Extractor<S> {
    pub fn new(source: S) -> Self {
        Self::with_family(source, DEFAULT_FAMILY)
    }

    pub fn with_family(source: S, family: &str) -> Self {
        Self {
            source,
            family: String::from(family),
        }
    }

    pub fn extract(&self) -> DeviceSerialSet {
        let text = match self.source.query() {
            Ok(text) => text,
            Err(err) => {
                error!(%err, "Failed to query the device inventory");
                return DeviceSerialSet::not_found();
            }
        };

        match parse(&text, &self.family) {
            Ok(serials) => {
                debug!(
                    found = serials.found_count(),
                    family = %self.family,
                    "Extracted serial numbers"
                );
                serials
            }
            Err(err) => {
                error!(%err, "Failed to parse the device inventory");
                DeviceSerialSet::not_found()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<&'static str, ()>);

    impl InventorySource for Canned {
        fn query(&self) -> Result<String, Error> {
            self.0.map(String::from).map_err(|_| Error::Spawn {
                program: String::from("system_profiler"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    const INVENTORY: &str = "\
Bluetooth:
      Connected:
          AirPods Pro:
              Address: 00:11:22:33:44:55
              Serial Number: CASE1234
              Serial Number (Left): LEFT5678
              Serial Number (Right): RIGHT9012

";

    #[test]
    fn extract_reads_from_the_source() {
        let serials = Extractor::new(Canned(Ok(INVENTORY))).extract();

        assert_eq!(serials.case, Serial::Found(String::from("CASE1234")));
        assert_eq!(serials.left, Serial::Found(String::from("LEFT5678")));
        assert_eq!(serials.right, Serial::Found(String::from("RIGHT9012")));
        assert!(serials.all_found());
    }

    #[test]
    fn failing_source_degrades_to_not_found() {
        let serials = Extractor::new(Canned(Err(()))).extract();
        assert_eq!(serials, DeviceSerialSet::not_found());
        assert_eq!(serials.found_count(), 0);
    }

    #[test]
    fn other_family_is_not_matched() {
        let serials = Extractor::with_family(Canned(Ok(INVENTORY)), "Beats").extract();
        assert_eq!(serials, DeviceSerialSet::not_found());
    }

    #[test]
    fn set_iterates_in_print_order() {
        let keys = DeviceSerialSet::not_found()
            .iter()
            .map(|(c, _)| c.key())
            .collect::<Vec<_>>();

        assert_eq!(keys, ["case", "left", "right"]);
    }

    #[test]
    fn sentinel_displays_as_not_found() {
        assert_eq!(Serial::NotFound.to_string(), "Not Found");
        assert_eq!(Serial::Found(String::from("X1")).to_string(), "X1");
    }
}

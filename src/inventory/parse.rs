use super::{DeviceSerialSet, Error, Serial};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// The unqualified line always denotes the case. An accessory that only reports a
// single unqualified serial (a one-piece device) is therefore reported as "case".
static CASE_SERIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Serial Number: ([A-Za-z0-9]+)").unwrap());

static LEFT_SERIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Serial Number \(Left\): ([A-Za-z0-9]+)").unwrap());

static RIGHT_SERIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Serial Number \(Right\): ([A-Za-z0-9]+)").unwrap());

/// Locate the block of the accessory family inside the inventory text.
/// It starts at the first line naming the family (followed by a colon) and ends at the
/// first empty line. A block that is never closed by an empty line does not count.
fn find_block<'t>(text: &'t str, family: &str) -> Result<Option<&'t str>, Error> {
    let pattern = format!(r"(?s){}[^\n]*:.*?\n\n", regex::escape(family));
    let block = Regex::new(&pattern)?;

    Ok(block.find(text).map(|m| m.as_str()))
}

fn capture(pattern: &Regex, block: &str) -> Serial {
    pattern
        .captures(block)
        .and_then(|caps| caps.get(1))
        .map_or(Serial::NotFound, |m| Serial::Found(String::from(m.as_str())))
}

/// Turn the raw inventory text into the serial set of the given accessory family.
/// A missing block is not an error: every component is reported as not found.
pub fn parse(text: &str, family: &str) -> Result<DeviceSerialSet, Error> {
    let Some(block) = find_block(text, family)? else {
        debug!(family, "No inventory block for the accessory family");
        return Ok(DeviceSerialSet::not_found());
    };

    debug!(family, block = block.trim_end(), "Found the accessory block");

    Ok(DeviceSerialSet {
        case: capture(&CASE_SERIAL, block),
        left: capture(&LEFT_SERIAL, block),
        right: capture(&RIGHT_SERIAL, block),
    })
}

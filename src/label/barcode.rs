//! Code 128 symbology.
//!
//! Serials are encoded in code set B (printable ASCII) and switch to code set C for runs of
//! digits, which packs two digits into one symbol. Every symbol is 11 modules wide and consists
//! of three bars and three spaces, each one to four modules wide. The stop symbol adds a final
//! two-module bar.

use image::{GrayImage, Luma};

/// Bar / space widths (in modules) of all symbols, indexed by symbol value.
const PATTERNS: [&[u8; 6]; 106] = [
    b"212222", b"222122", b"222221", b"121223", b"121322", b"131222", b"122213", b"122312",
    b"132212", b"221213", b"221312", b"231212", b"112232", b"122132", b"122231", b"113222",
    b"123122", b"123221", b"223211", b"221132", b"221231", b"213212", b"223112", b"312131",
    b"311222", b"321122", b"321221", b"312212", b"322112", b"322211", b"212123", b"212321",
    b"232121", b"111323", b"131123", b"131321", b"112313", b"132113", b"132311", b"211313",
    b"231113", b"231311", b"112133", b"112331", b"132131", b"113123", b"113321", b"133121",
    b"313121", b"211331", b"231131", b"213113", b"213311", b"213131", b"311123", b"311321",
    b"331121", b"312113", b"312311", b"332111", b"314111", b"221411", b"431111", b"111224",
    b"111422", b"121124", b"121421", b"141122", b"141221", b"112214", b"112412", b"122114",
    b"122411", b"142112", b"142211", b"241211", b"221114", b"413111", b"241112", b"134111",
    b"111242", b"121142", b"121241", b"114212", b"124112", b"124211", b"411212", b"421112",
    b"421211", b"212141", b"214121", b"412121", b"111143", b"111341", b"131141", b"114113",
    b"114311", b"411113", b"411311", b"113141", b"114131", b"311141", b"411131", b"211412",
    b"211214", b"211232",
];

const STOP_PATTERN: &[u8; 7] = b"2331112";

const MODULES_PER_SYMBOL: u32 = 11;
const MODULES_STOP: u32 = 13;

const CODE_C: u8 = 99;
const CODE_B: u8 = 100;
const START_A: u8 = 103;
const START_B: u8 = 104;
const START_C: u8 = 105;
const STOP: u8 = 106;

/// Digit runs shorter than this stay in code set B.
const MIN_DIGIT_RUN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Cannot encode an empty serial.")]
    Empty,

    #[error("Cannot encode {character:?} (position {position}): only printable ASCII is supported.")]
    InvalidCharacter { character: char, position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("The row does not contain any bars.")]
    NoBars,

    #[error("The row contains {0} bars and spaces, which is no complete Code 128 symbol sequence.")]
    ElementCount(usize),

    #[error("Symbol {0} does not match any Code 128 pattern.")]
    UnknownPattern(usize),

    #[error("The row does not end with a stop symbol.")]
    NoStop,

    #[error("The row does not begin with a supported start symbol.")]
    NoStart,

    #[error("Checksum mismatch (expected {expected}, got {found}).")]
    Checksum { expected: u8, found: u8 },

    #[error("Symbol value {0} is not supported in this position.")]
    Unsupported(u8),
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum CodeSet {
    B,
    C,
}

/// Emit the start or switch symbol needed to continue in `target`.
fn select(symbols: &mut Vec<u8>, current: &mut Option<CodeSet>, target: CodeSet) {
    let symbol = match (*current, target) {
        (Some(set), target) if set == target => return,
        (None, CodeSet::B) => START_B,
        (None, CodeSet::C) => START_C,
        (Some(_), CodeSet::B) => CODE_B,
        (Some(_), CodeSet::C) => CODE_C,
    };

    symbols.push(symbol);
    *current = Some(target);
}

fn checksum(symbols: &[u8]) -> u8 {
    // The start symbol has weight 1 like the first data symbol.
    let sum = symbols
        .iter()
        .enumerate()
        .map(|(idx, &value)| (idx.max(1) as u32) * (value as u32))
        .sum::<u32>();

    (sum % 103) as u8
}

/// Encode `text` into the sequence of symbol values (start, data, checksum, stop).
pub fn encode(text: &str) -> Result<Vec<u8>, EncodeError> {
    if text.is_empty() {
        return Err(EncodeError::Empty);
    }

    if let Some((position, character)) = text
        .chars()
        .enumerate()
        .find(|(_, c)| !(' '..='~').contains(c))
    {
        return Err(EncodeError::InvalidCharacter {
            character,
            position,
        });
    }

    // All characters are ASCII at this point.
    let bytes = text.as_bytes();
    let mut symbols = Vec::with_capacity(bytes.len() + 4);
    let mut current = None;
    let mut idx = 0;

    while idx < bytes.len() {
        let digits = bytes[idx..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();

        if digits >= MIN_DIGIT_RUN {
            // Pack pairs. An odd trailing digit is picked up by code set B afterwards.
            select(&mut symbols, &mut current, CodeSet::C);

            let paired = digits - (digits % 2);

            for pair in bytes[idx..idx + paired].chunks(2) {
                symbols.push((pair[0] - b'0') * 10 + (pair[1] - b'0'));
            }

            idx += paired;
        } else {
            select(&mut symbols, &mut current, CodeSet::B);
            symbols.push(bytes[idx] - b' ');
            idx += 1;
        }
    }

    symbols.push(checksum(&symbols));
    symbols.push(STOP);

    Ok(symbols)
}

/// Expand symbol values into modules (`true` = bar).
pub fn modules(symbols: &[u8]) -> Vec<bool> {
    let mut modules = Vec::with_capacity(symbols.len() * (MODULES_PER_SYMBOL as usize) + 2);

    for &symbol in symbols {
        let pattern: &[u8] = if symbol == STOP {
            STOP_PATTERN
        } else {
            PATTERNS[symbol as usize]
        };

        for (idx, width) in pattern.iter().enumerate() {
            let bar = idx % 2 == 0;
            modules.extend(std::iter::repeat(bar).take((width - b'0') as usize));
        }
    }

    modules
}

/// Pixel geometry of a rendered barcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Width of a single module
    pub module_px: u32,

    /// Height of the bars
    pub bar_px: u32,

    /// Blank margin on the left and on the right
    pub quiet_px: u32,
}

/// Render `text` as a black-on-white barcode glyph including its quiet zones.
pub fn render(text: &str, geometry: Geometry) -> Result<GrayImage, EncodeError> {
    let modules = modules(&encode(text)?);

    let width = 2 * geometry.quiet_px + (modules.len() as u32) * geometry.module_px;
    let mut image = GrayImage::from_pixel(width, geometry.bar_px, Luma([0xff]));

    for (idx, _) in modules.iter().enumerate().filter(|(_, bar)| **bar) {
        let left = geometry.quiet_px + (idx as u32) * geometry.module_px;

        for x in left..left + geometry.module_px {
            for y in 0..geometry.bar_px {
                image.put_pixel(x, y, Luma([0x00]));
            }
        }
    }

    Ok(image)
}

/// Convert measured pixel widths into module widths, assuming the group spans `total` modules.
fn normalize(widths: &[u32], total: u32) -> Vec<u8> {
    let sum = widths.iter().sum::<u32>().max(1);

    widths
        .iter()
        .map(|w| ((2 * w * total + sum) / (2 * sum)) as u8 + b'0')
        .collect()
}

/// Read a barcode back from one raster row (`true` = dark pixel).
/// Bar widths are normalized per symbol, so any (also non-integer) scaling is tolerated.
pub fn decode_row<I>(row: I) -> Result<String, DecodeError>
where
    I: IntoIterator<Item = bool>,
{
    // Run-length encode the row.
    let mut runs: Vec<(bool, u32)> = Vec::new();

    for dark in row {
        match runs.last_mut() {
            Some((bar, len)) if *bar == dark => *len += 1,
            _ => runs.push((dark, 1)),
        }
    }

    // Drop the quiet zones.
    if runs.first().is_some_and(|(bar, _)| !bar) {
        runs.remove(0);
    }

    if runs.last().is_some_and(|(bar, _)| !bar) {
        runs.pop();
    }

    if runs.is_empty() {
        return Err(DecodeError::NoBars);
    }

    // We need a start symbol, a checksum and the stop symbol at least.
    let widths = runs.iter().map(|(_, len)| *len).collect::<Vec<_>>();

    if (widths.len() < 2 * 6 + 7) || ((widths.len() - 7) % 6 != 0) {
        return Err(DecodeError::ElementCount(widths.len()));
    }

    let (body, stop) = widths.split_at(widths.len() - 7);

    if normalize(stop, MODULES_STOP) != STOP_PATTERN {
        return Err(DecodeError::NoStop);
    }

    let symbols = body
        .chunks(6)
        .enumerate()
        .map(|(idx, chunk)| {
            let pattern = normalize(chunk, MODULES_PER_SYMBOL);

            PATTERNS
                .iter()
                .position(|p| p[..] == pattern[..])
                .map(|value| value as u8)
                .ok_or(DecodeError::UnknownPattern(idx))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Validate the checksum.
    let Some((&found, data)) = symbols.split_last() else {
        return Err(DecodeError::NoStart);
    };

    let expected = checksum(data);

    if expected != found {
        return Err(DecodeError::Checksum { expected, found });
    }

    // Interpret the data symbols.
    let mut set = match data[0] {
        START_B => CodeSet::B,
        START_C => CodeSet::C,
        START_A => return Err(DecodeError::Unsupported(START_A)),
        _ => return Err(DecodeError::NoStart),
    };

    let mut text = String::new();

    for &value in &data[1..] {
        match (set, value) {
            (CodeSet::B, 0..=94) => text.push((value + b' ') as char),
            (CodeSet::B, CODE_C) => set = CodeSet::C,
            (CodeSet::C, 0..=99) => {
                text.push((b'0' + value / 10) as char);
                text.push((b'0' + value % 10) as char);
            }
            (CodeSet::C, CODE_B) => set = CodeSet::B,
            (_, other) => return Err(DecodeError::Unsupported(other)),
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::imageops::{self, FilterType};

    const GEOMETRY: Geometry = Geometry {
        module_px: 2,
        bar_px: 10,
        quiet_px: 20,
    };

    fn middle_row(image: &GrayImage) -> Vec<bool> {
        let y = image.height() / 2;
        (0..image.width())
            .map(|x| image.get_pixel(x, y).0[0] < 0x80)
            .collect()
    }

    #[test]
    fn code_set_b_symbols() {
        // Checksum example: 104 + 48 + 2*42 + 3*42 + 4*17 + 5*18 + 6*19 + 7*35 = 879 = 55 (mod 103)
        assert_eq!(
            encode("PJJ123C").unwrap(),
            [START_B, 48, 42, 42, 17, 18, 19, 35, 55, STOP]
        );
    }

    #[test]
    fn digit_runs_switch_to_code_set_c() {
        assert_eq!(
            encode("12345678").unwrap(),
            [START_C, 12, 34, 56, 78, 47, STOP]
        );
        assert_eq!(
            encode("AB123456CD").unwrap(),
            [START_B, 33, 34, CODE_C, 12, 34, 56, CODE_B, 35, 36, 94, STOP]
        );
        // The odd digit falls back to code set B.
        assert_eq!(encode("12345").unwrap(), [START_C, 12, 34, CODE_B, 21, 54, STOP]);
    }

    #[test]
    fn short_digit_runs_stay_in_code_set_b() {
        assert_eq!(
            encode("AB12CD34").unwrap(),
            [START_B, 33, 34, 17, 18, 35, 36, 19, 20, 85, STOP]
        );
    }

    #[test]
    fn rejects_unencodable_serials() {
        assert_eq!(encode(""), Err(EncodeError::Empty));
        assert_eq!(
            encode("AB\u{e9}1"),
            Err(EncodeError::InvalidCharacter {
                character: '\u{e9}',
                position: 2
            })
        );
        assert!(matches!(
            encode("AB\tCD"),
            Err(EncodeError::InvalidCharacter { position: 2, .. })
        ));
    }

    #[test]
    fn module_count() {
        // Start, eight data symbols and the checksum, plus the 13-module stop symbol.
        assert_eq!(modules(&encode("AB12CD34").unwrap()).len(), 10 * 11 + 13);
    }

    #[test]
    fn rendered_dimensions() {
        let image = render("AB12CD34", GEOMETRY).unwrap();

        assert_eq!(image.width(), 2 * 20 + 123 * 2);
        assert_eq!(image.height(), 10);

        // Quiet zones stay blank, the first module is a bar.
        assert_eq!(image.get_pixel(19, 5).0[0], 0xff);
        assert_eq!(image.get_pixel(20, 5).0[0], 0x00);
        assert_eq!(image.get_pixel(image.width() - 1, 5).0[0], 0xff);
    }

    #[test]
    fn scans_back_rendered_glyph() {
        for serial in ["AB12CD34", "H3KDP0ABCD12", "12345", "x y~z", "99999999"] {
            let image = render(serial, GEOMETRY).unwrap();
            assert_eq!(decode_row(middle_row(&image)).unwrap(), serial);
        }
    }

    #[test]
    fn scans_back_after_nearest_scaling() {
        let image = render("GX7Q2LM0PXYZ", GEOMETRY).unwrap();
        let scaled = imageops::resize(
            &image,
            image.width() * 17 / 8,
            image.height() * 17 / 8,
            FilterType::Nearest,
        );

        assert_eq!(decode_row(middle_row(&scaled)).unwrap(), "GX7Q2LM0PXYZ");
    }

    #[test]
    fn blank_row_has_no_bars() {
        assert_eq!(decode_row([false; 40]), Err(DecodeError::NoBars));
    }

    #[test]
    fn truncated_row_is_rejected() {
        let image = render("AB12CD34", GEOMETRY).unwrap();
        let row = middle_row(&image);

        // Cut away the stop symbol and the right quiet zone.
        let cut = row.len() - 20 - 13 * 2;
        assert!(decode_row(row[..cut].iter().copied()).is_err());
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let mut symbols = encode("AB12CD34").unwrap();
        let check = symbols.len() - 2;
        symbols[check] = (symbols[check] + 1) % 103;

        let row = modules(&symbols);
        assert!(matches!(
            decode_row(row),
            Err(DecodeError::Checksum { .. })
        ));
    }
}

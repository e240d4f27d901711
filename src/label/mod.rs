use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{
    imageops::{self, FilterType},
    GrayImage, Luma,
};
use tracing::debug;

/// Encode serials as Code 128 barcodes, render them and scan them back.
pub mod barcode;
pub use barcode::{DecodeError, EncodeError};

/// Shape and rasterize the caption and serial lines.
mod text;
use text::Context as TextContext;

const MM_PER_INCH: f32 = 25.4;

const INCH_PER_METER: f32 = 1000.0 / MM_PER_INCH;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The serial cannot be encoded as a barcode: {0}")]
    Encode(#[from] EncodeError),

    #[error("Failed to load the font file {path:?}: {source}")]
    Font {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("The canvas ({width}x{height} pixels) leaves no room for the barcode after padding.")]
    CanvasTooSmall { width: u32, height: u32 },

    #[error("The barcode is too dense to print: a module would be {module_px:.2} pixels wide.")]
    TooDense { module_px: f32 },

    #[error("The composed barcode cannot be scanned: {0}")]
    Unreadable(#[from] DecodeError),

    #[error("The composed barcode scans as {found:?} instead of {expected:?}.")]
    Mismatch { expected: String, found: String },

    #[error("Failed to save the label to {path:?}: {source}")]
    Save {
        path: PathBuf,
        source: png::EncodingError,
    },
}

/// How the finished canvas is turned before it is handed to the printer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rotation {
    None,
    CounterClockwise90,
    Clockwise90,
}

/// All layout parameters of a label.
/// Together with the printer's media settings they define what ends up on paper,
/// so they are kept in one place instead of being spread around as literals.
#[derive(Debug, Clone)]
pub struct LabelConfig {
    /// Physical width of the label (before rotation)
    pub width_mm: f32,

    /// Physical height of the label (before rotation)
    pub height_mm: f32,

    /// Print resolution
    pub dpi: u32,

    /// Width of the narrowest bar
    pub module_width_mm: f32,

    /// Height of the bars
    pub module_height_mm: f32,

    /// Blank margin left and right of the bars
    pub quiet_zone_mm: f32,

    /// Horizontal space (pixels) the scaled barcode keeps free in total
    pub padding_horz: u32,

    /// Vertical space (pixels) the scaled barcode keeps free for the text lines
    pub padding_vert: u32,

    /// Y offset (pixels) of the barcode
    pub barcode_top: u32,

    /// Y offset (pixels) of the caption
    pub caption_top: u32,

    /// Gap (pixels) between the barcode and the serial line
    pub serial_gap: u32,

    /// Font size (pixels) of both text lines
    pub font_size: f32,

    /// Preferred font family (falls back to the default sans-serif face)
    pub font_family: Option<String>,

    /// Additional font file to load before rendering
    pub font_file: Option<PathBuf>,

    /// Final orientation of the image
    pub rotation: Rotation,

    /// Scan every composed label and reject it if it does not read back
    pub verify: bool,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            width_mm: 80.0,
            height_mm: 50.0,
            dpi: 300,
            module_width_mm: 0.2,
            module_height_mm: 15.0,
            quiet_zone_mm: 6.5,
            padding_horz: 100,
            padding_vert: 150,
            barcode_top: 80,
            caption_top: 20,
            serial_gap: 20,
            font_size: 32.0,
            font_family: Some(String::from("Arial")),
            font_file: None,
            rotation: Rotation::CounterClockwise90,
            verify: true,
        }
    }
}

/// Convert a physical length to pixels at the given resolution.
/// Rounds to the nearest pixel: 80mm at 300dpi is 945 pixels, not a truncated 944.
pub fn mm_to_px(mm: f32, dpi: u32) -> u32 {
    (mm / MM_PER_INCH * (dpi as f32)).round() as u32
}

impl LabelConfig {
    /// Pixel size of the canvas before rotation.
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            mm_to_px(self.width_mm, self.dpi),
            mm_to_px(self.height_mm, self.dpi),
        )
    }

    fn barcode_geometry(&self) -> barcode::Geometry {
        barcode::Geometry {
            module_px: mm_to_px(self.module_width_mm, self.dpi).max(1),
            bar_px: mm_to_px(self.module_height_mm, self.dpi).max(1),
            quiet_px: mm_to_px(self.quiet_zone_mm, self.dpi),
        }
    }
}

/// A rectangle on the unrotated canvas.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        (self.x < other.right())
            && (other.x < self.right())
            && (self.y < other.bottom())
            && (other.y < self.bottom())
    }
}

/// Where the parts of a label have been placed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    pub caption: Region,
    pub barcode: Region,
    pub serial: Region,
}

/// A finished label, ready to be printed.
pub struct LabelImage {
    /// The rotated image
    image: GrayImage,

    /// The placement of the parts before rotation
    layout: Layout,

    /// The rotation that has been applied
    rotation: Rotation,

    /// Print resolution, recorded in the saved file
    dpi: u32,
}

impl LabelImage {
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Undo the rotation, giving the canvas as it was composed.
    pub fn upright(&self) -> GrayImage {
        match self.rotation {
            Rotation::None => self.image.clone(),
            Rotation::CounterClockwise90 => imageops::rotate90(&self.image),
            Rotation::Clockwise90 => imageops::rotate270(&self.image),
        }
    }

    /// Scan the barcode across its middle, the way a hand scanner would.
    pub fn scan(&self) -> Result<String, DecodeError> {
        let upright = self.upright();
        let y = self.layout.barcode.y + self.layout.barcode.height / 2;

        barcode::decode_row((0..upright.width()).map(|x| upright.get_pixel(x, y).0[0] < 0x80))
    }

    /// Pixels per meter at the print resolution, as stored in the PNG `pHYs` chunk.
    pub fn pixels_per_meter(&self) -> u32 {
        ((self.dpi as f32) * INCH_PER_METER).round() as u32
    }

    /// Save the label as a grayscale PNG file that carries its print resolution.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        self.write_png(path).map_err(|source| Error::Save {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_png(&self, path: &Path) -> Result<(), png::EncodingError> {
        let file = BufWriter::new(File::create(path)?);

        let mut encoder = png::Encoder::new(file, self.width(), self.height());
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);

        let ppu = self.pixels_per_meter();
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: ppu,
            yppu: ppu,
            unit: png::Unit::Meter,
        }));

        let mut writer = encoder.write_header()?;
        writer.write_image_data(self.image.as_raw())?;
        writer.finish()
    }
}

/// Renders labels. Keeps the font state alive between labels.
pub struct Compositor {
    config: LabelConfig,
    text_ctx: TextContext,
}

impl Compositor {
    pub fn new(config: LabelConfig) -> Result<Self, Error> {
        let mut text_ctx = TextContext::new();

        if let Some(path) = &config.font_file {
            text_ctx
                .load_font_file(path)
                .map_err(|source| Error::Font {
                    path: path.clone(),
                    source,
                })?;
        }

        Ok(Self { config, text_ctx })
    }

    /// Compose the label for one serial: caption on top, barcode in the middle and the
    /// serial in plain text below.
    pub fn compose(&mut self, serial: &str, caption: &str) -> Result<LabelImage, Error> {
        let (width, height) = self.config.canvas_size();

        // Determine the box the barcode has to fit into.
        let (max_width, max_height) = match (
            width.checked_sub(self.config.padding_horz),
            height.checked_sub(self.config.padding_vert),
        ) {
            (Some(w), Some(h)) if (w > 0) && (h > 0) => (w, h),
            _ => return Err(Error::CanvasTooSmall { width, height }),
        };

        // Render the glyph at its native size, then scale it uniformly into the box.
        let geometry = self.config.barcode_geometry();
        let glyph = barcode::render(serial, geometry)?;

        let scale = f32::min(
            (max_width as f32) / (glyph.width() as f32),
            (max_height as f32) / (glyph.height() as f32),
        );

        // Below one pixel per module, bars would merge or vanish.
        let module_px = (geometry.module_px as f32) * scale;

        if module_px < 1.0 {
            return Err(Error::TooDense { module_px });
        }

        // Nearest neighbor keeps the edges hard. Any smoothing would blur the bars.
        let scaled_width = (((glyph.width() as f32) * scale) as u32).clamp(1, max_width);
        let scaled_height = (((glyph.height() as f32) * scale) as u32).clamp(1, max_height);
        let glyph = imageops::resize(&glyph, scaled_width, scaled_height, FilterType::Nearest);

        let mut canvas = GrayImage::from_pixel(width, height, Luma([0xff]));

        let barcode = Region {
            x: (width - scaled_width) / 2,
            y: self.config.barcode_top,
            width: scaled_width,
            height: scaled_height,
        };

        imageops::replace(&mut canvas, &glyph, barcode.x as i64, barcode.y as i64);

        // Both text lines are centered horizontally.
        let caption = self.draw_centered(&mut canvas, caption, self.config.caption_top);
        let serial_text = format!("SN: {}", serial);
        let serial_region = self.draw_centered(
            &mut canvas,
            &serial_text,
            barcode.bottom() + self.config.serial_gap,
        );

        let image = match self.config.rotation {
            Rotation::None => canvas,
            Rotation::CounterClockwise90 => imageops::rotate270(&canvas),
            Rotation::Clockwise90 => imageops::rotate90(&canvas),
        };

        let label = LabelImage {
            image,
            layout: Layout {
                caption,
                barcode,
                serial: serial_region,
            },
            rotation: self.config.rotation,
            dpi: self.config.dpi,
        };

        debug!(
            serial,
            width = label.width(),
            height = label.height(),
            scale,
            "Composed label"
        );

        if self.config.verify {
            let found = label.scan()?;

            if found != serial {
                return Err(Error::Mismatch {
                    expected: String::from(serial),
                    found,
                });
            }
        }

        Ok(label)
    }

    fn draw_centered(&mut self, canvas: &mut GrayImage, text: &str, top: u32) -> Region {
        let line = self.text_ctx.shape(
            text,
            self.config.font_family.as_deref(),
            self.config.font_size,
        );

        // A line wider than the canvas starts left of it and is clipped on both sides.
        let left = ((canvas.width() as i32) - (line.width() as i32)) / 2;
        self.text_ctx.draw(&line, canvas, left, top as i32);

        Region {
            x: left.max(0) as u32,
            y: top,
            width: line.width().min(canvas.width()),
            height: line.height(),
        }
    }
}

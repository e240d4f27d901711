use std::path::Path;

use cosmic_text::{
    Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache as RasterCache, Wrap,
};
use image::GrayImage;
use tracing::debug;

/// Line height = LINE_HEIGHT_FACTOR * font size
const LINE_HEIGHT_FACTOR: f32 = 1.3;

/// Layout width for unwrapped lines. Anything wider is clipped by the image anyway.
const MAX_LINE_WIDTH: f32 = 100_000.0;

/// Shared state for shaping and rasterizing text.
/// Loading the system fonts is expensive, so one context serves all labels.
pub(super) struct Context {
    font_system: FontSystem,
    raster_cache: RasterCache,
}

/// A single line of text that has been shaped and is ready to be drawn.
pub(super) struct Line {
    buffer: Buffer,

    /// The advance width of the shaped text in pixels
    width: f32,

    /// The height of the line box in pixels
    height: f32,
}

impl Line {
    pub fn width(&self) -> u32 {
        self.width.ceil() as u32
    }

    pub fn height(&self) -> u32 {
        self.height.ceil() as u32
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            font_system: FontSystem::new(),
            raster_cache: RasterCache::new(),
        }
    }

    /// Make the fonts in the given file available by family name.
    pub fn load_font_file(&mut self, path: &Path) -> std::io::Result<()> {
        self.font_system.db_mut().load_font_file(path)
    }

    /// Is a face of this family installed?
    pub fn has_family(&self, family: &str) -> bool {
        self.font_system.db().faces().any(|face| {
            face.families
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(family))
        })
    }

    /// Shape `text` as a single unwrapped line.
    /// If `family` is not installed, the default sans-serif face is used instead.
    pub fn shape(&mut self, text: &str, family: Option<&str>, font_size: f32) -> Line {
        let family = match family {
            Some(name) if self.has_family(name) => Family::Name(name),
            Some(name) => {
                debug!(family = name, "Font family is not installed, using the default");
                Family::SansSerif
            }
            None => Family::SansSerif,
        };

        let line_height = LINE_HEIGHT_FACTOR * font_size;
        let mut buffer = Buffer::new(&mut self.font_system, Metrics::new(font_size, line_height));

        // Labels are single lines. We never wrap, but clip while drawing.
        buffer.set_wrap(&mut self.font_system, Wrap::None);
        buffer.set_size(&mut self.font_system, MAX_LINE_WIDTH, 2.0 * line_height);
        buffer.set_text(
            &mut self.font_system,
            text,
            Attrs::new().family(family),
            Shaping::Advanced,
        );
        buffer.shape_until_scroll(&mut self.font_system, false);

        let width = buffer
            .layout_runs()
            .map(|run| run.line_w)
            .fold(0.0f32, f32::max);

        Line {
            buffer,
            width,
            height: line_height,
        }
    }

    /// Draw a shaped line with its top left corner at `(left, top)`.
    /// Pixels outside of the image are dropped.
    pub fn draw(&mut self, line: &Line, image: &mut GrayImage, left: i32, top: i32) {
        let image_width = image.width() as i32;
        let image_height = image.height() as i32;

        line.buffer.draw(
            &mut self.font_system,
            &mut self.raster_cache,
            Color::rgb(0x00, 0x00, 0x00),
            |x, y, w, h, color| {
                for y_pix in (top + y)..(top + y + h as i32) {
                    for x_pix in (left + x)..(left + x + w as i32) {
                        if (x_pix < 0)
                            || (y_pix < 0)
                            || (x_pix >= image_width)
                            || (y_pix >= image_height)
                        {
                            continue;
                        }

                        // Perform manual alpha blending of black over the existing luma.
                        // With an opaque background, this simplifies to (1 - alpha) * luma.
                        let pix = &mut image.get_pixel_mut(x_pix as u32, y_pix as u32).0;
                        let luma = (pix[0] as f32) / 255.0;
                        let alpha = (color.a() as f32) / 255.0;

                        pix[0] = ((1.0 - alpha) * luma * 255.0).round() as u8;
                    }
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::Luma;

    #[test]
    fn empty_text_has_no_width() {
        let mut ctx = Context::new();
        let line = ctx.shape("", None, 32.0);

        assert_eq!(line.width(), 0);
        assert_eq!(line.height(), 42);
    }

    #[test]
    fn missing_family_falls_back() {
        let mut ctx = Context::new();
        assert!(!ctx.has_family("No Such Typeface 1234"));

        // Shaping must not fail, whatever fonts the host has installed.
        let line = ctx.shape("SN: AB12", Some("No Such Typeface 1234"), 32.0);
        let mut image = GrayImage::from_pixel(300, 60, Luma([0xff]));
        ctx.draw(&line, &mut image, 10, 10);

        assert!(line.width() < 300);
    }

    #[test]
    fn drawing_outside_is_clipped() {
        let mut ctx = Context::new();
        let line = ctx.shape("WWWWWWWWWWWWWWWW", None, 32.0);
        let mut image = GrayImage::from_pixel(20, 20, Luma([0xff]));

        // Must not panic even though the line is far larger than the image.
        ctx.draw(&line, &mut image, -40, -10);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let mut ctx = Context::new();
        assert!(ctx
            .load_font_file(Path::new("/nonexistent/font.ttf"))
            .is_err());
    }
}

//! Status text shown on the local display

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use log::error;

/// Receives already formatted lines of text
pub trait StatusDisplay {
    fn show(&mut self, lines: &[&str]);
}

const LINE_HEIGHT: i32 = 12;
const MARGIN: i32 = 4;

/// Clears a colour panel and prints the lines top to bottom
pub struct TextPanel<D> {
    target: D,
}

impl<D> TextPanel<D>
where
    D: DrawTarget<Color = Rgb565>,
{
    pub const fn new(target: D) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    fn draw(&mut self, lines: &[&str]) -> Result<(), D::Error> {
        self.target.clear(Rgb565::BLACK)?;

        let style = MonoTextStyle::new(&FONT_6X10, Rgb565::WHITE);
        let mut y = MARGIN;
        for line in lines {
            Text::with_baseline(line, Point::new(MARGIN, y), style, Baseline::Top)
                .draw(&mut self.target)?;
            y += LINE_HEIGHT;
        }
        Ok(())
    }
}

impl<D> StatusDisplay for TextPanel<D>
where
    D: DrawTarget<Color = Rgb565>,
    D::Error: core::fmt::Debug,
{
    fn show(&mut self, lines: &[&str]) {
        if let Err(e) = self.draw(lines) {
            error!("Draw error: {:?}", e);
        }
    }
}

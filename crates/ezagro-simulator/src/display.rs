//! Status panel rendered off-screen, or in an SDL2 window with `window`

use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics_simulator::SimulatorDisplay;
#[cfg(feature = "window")]
use embedded_graphics_simulator::{OutputSettingsBuilder, Window};
use log::info;

use ezagro_core::display::{StatusDisplay, TextPanel};

/// Panel size of the node's 128x128 TFT.
pub const PANEL_WIDTH: u32 = 128;
pub const PANEL_HEIGHT: u32 = 128;

#[cfg(feature = "window")]
const WINDOW_SCALE: u32 = 2;

pub struct SimDisplay {
    panel: TextPanel<SimulatorDisplay<Rgb565>>,
    #[cfg(feature = "window")]
    window: Window,
}

impl SimDisplay {
    pub fn new() -> Self {
        let target = SimulatorDisplay::<Rgb565>::new(Size::new(PANEL_WIDTH, PANEL_HEIGHT));
        Self {
            panel: TextPanel::new(target),
            #[cfg(feature = "window")]
            window: Window::new(
                "EZagro Simulator",
                &OutputSettingsBuilder::new().scale(WINDOW_SCALE).build(),
            ),
        }
    }
}

impl StatusDisplay for SimDisplay {
    fn show(&mut self, lines: &[&str]) {
        self.panel.show(lines);
        for line in lines {
            info!("[display] {}", line);
        }
        #[cfg(feature = "window")]
        self.window.update(self.panel.target());
    }
}

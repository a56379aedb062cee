//! Live frame window for `--show`.
//!
//! Backed by `minifb` when the `display` feature is enabled. Without it,
//! showing a frame logs a single warning and does nothing.
//!
//! A zero interval holds each frame until a key is pressed; Esc or closing
//! the window ends the run.

use anyhow::Result;
use image::RgbImage;
use std::time::Duration;

#[cfg(feature = "display")]
use anyhow::Context;
#[cfg(feature = "display")]
use std::time::Instant;

#[cfg(feature = "display")]
const REFRESH: Duration = Duration::from_millis(16);

/// How long a shown frame stays up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameWait {
    /// Until any key other than Esc is pressed.
    KeyPress,
    For(Duration),
}

impl FrameWait {
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            FrameWait::KeyPress
        } else {
            FrameWait::For(interval)
        }
    }
}

pub struct FrameWindow {
    title: String,
    wait: FrameWait,
    #[cfg(feature = "display")]
    window: Option<(minifb::Window, usize, usize)>,
    #[cfg(feature = "display")]
    buffer: Vec<u32>,
    #[cfg(not(feature = "display"))]
    warned: bool,
}

impl FrameWindow {
    /// `interval` is how long each frame stays up; see [`FrameWait`].
    pub fn new(title: impl Into<String>, interval: Duration) -> Self {
        Self {
            title: title.into(),
            wait: FrameWait::from_interval(interval),
            #[cfg(feature = "display")]
            window: None,
            #[cfg(feature = "display")]
            buffer: Vec::new(),
            #[cfg(not(feature = "display"))]
            warned: false,
        }
    }

    pub fn wait(&self) -> FrameWait {
        self.wait
    }

    /// Display `frame`. Returns `false` once the user closed the window.
    #[cfg(feature = "display")]
    pub fn show(&mut self, frame: &RgbImage) -> Result<bool> {
        use minifb::{Key, KeyRepeat, Window, WindowOptions};

        let (width, height) = (frame.width() as usize, frame.height() as usize);
        let reopen = !matches!(&self.window, Some((_, w, h)) if *w == width && *h == height);
        if reopen {
            let window = Window::new(&self.title, width, height, WindowOptions::default())
                .with_context(|| format!("failed to open display window {}x{}", width, height))?;
            self.window = Some((window, width, height));
        }

        self.buffer.clear();
        self.buffer.extend(
            frame
                .pixels()
                .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32),
        );

        let Some((window, _, _)) = self.window.as_mut() else {
            return Ok(false);
        };
        let deadline = match self.wait {
            FrameWait::KeyPress => None,
            FrameWait::For(interval) => Some(Instant::now() + interval),
        };
        loop {
            window
                .update_with_buffer(&self.buffer, width, height)
                .context("failed to update display window")?;
            if !window.is_open() || window.is_key_down(Key::Escape) {
                return Ok(false);
            }
            let pause = match deadline {
                None => {
                    if !window.get_keys_pressed(KeyRepeat::No).is_empty() {
                        return Ok(true);
                    }
                    REFRESH
                }
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Ok(true);
                    }
                    REFRESH.min(left)
                }
            };
            std::thread::sleep(pause);
        }
    }

    #[cfg(not(feature = "display"))]
    pub fn show(&mut self, _frame: &RgbImage) -> Result<bool> {
        if !self.warned {
            log::warn!(
                "{}: --show needs the `display` feature; frames will not be shown",
                self.title
            );
            self.warned = true;
        }
        log::debug!("{:?} ignored without a window", self.wait);
        Ok(true)
    }
}

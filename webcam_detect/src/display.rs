use opencv::{core::Mat, highgui};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Window error: {0}")]
    Window(#[from] opencv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    Save,
}

impl KeyCommand {
    /// Maps a raw `wait_key` code; -1 means no key was pressed.
    pub fn from_key(code: i32) -> Option<Self> {
        if code < 0 {
            return None;
        }
        match (code & 0xFF) as u8 {
            b'q' => Some(KeyCommand::Quit),
            b's' => Some(KeyCommand::Save),
            _ => None,
        }
    }
}

/// Where annotated frames are shown and user commands come from.
pub trait Display {
    fn show(&mut self, frame: &Mat) -> Result<(), DisplayError>;

    /// Waits at most `timeout_ms` for one key.
    fn poll_key(&mut self, timeout_ms: i32) -> Result<Option<KeyCommand>, DisplayError>;

    fn close(&mut self) -> Result<(), DisplayError>;
}

/// A HighGUI window.
pub struct Window {
    title: String,
    open: bool,
}

impl Window {
    pub fn open(title: &str) -> Result<Self, DisplayError> {
        highgui::named_window(title, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            title: title.to_string(),
            open: true,
        })
    }
}

impl Display for Window {
    fn show(&mut self, frame: &Mat) -> Result<(), DisplayError> {
        highgui::imshow(&self.title, frame)?;
        Ok(())
    }

    fn poll_key(&mut self, timeout_ms: i32) -> Result<Option<KeyCommand>, DisplayError> {
        let key = highgui::wait_key(timeout_ms.max(1))?;
        Ok(KeyCommand::from_key(key))
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        highgui::destroy_window(&self.title)?;
        tracing::info!("Closed window {:?}", self.title);
        Ok(())
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Failed to close window on drop: {}", e);
        }
    }
}

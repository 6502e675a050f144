use anyhow::{Context, Result};
use parking_lot::Mutex;

/// Text clipboard used by yank and paste.
pub trait Clipboard: Send {
    fn read_text(&mut self) -> Result<String>;
    fn write_text(&mut self, text: &str) -> Result<()>;
}

/// The desktop clipboard. The handle is opened lazily so a headless session
/// only fails when the clipboard is actually used.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> Result<&mut arboard::Clipboard> {
        if self.inner.is_none() {
            let clipboard = arboard::Clipboard::new().context("clipboard: open system clipboard")?;
            self.inner = Some(clipboard);
        }
        self.inner
            .as_mut()
            .context("clipboard: system clipboard unavailable")
    }
}

impl Clipboard for SystemClipboard {
    fn read_text(&mut self) -> Result<String> {
        let text = self
            .handle()?
            .get_text()
            .context("clipboard: read text")?;
        Ok(text)
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.handle()?
            .set_text(text.to_string())
            .context("clipboard: write text")?;
        tracing::debug!(len = text.len(), "copied to clipboard");
        Ok(())
    }
}

/// In-process clipboard for demo mode and tests.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Mutex<String>,
}

impl MemoryClipboard {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
        }
    }

    pub fn contents(&self) -> String {
        self.text.lock().clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn read_text(&mut self) -> Result<String> {
        Ok(self.text.lock().clone())
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        *self.text.lock() = text.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_clipboard_round_trips_text() {
        let mut clipboard = MemoryClipboard::with_text("https://example.com");
        assert_eq!(clipboard.read_text().unwrap(), "https://example.com");
        clipboard.write_text("https://rust-lang.org").unwrap();
        assert_eq!(clipboard.contents(), "https://rust-lang.org");
    }
}

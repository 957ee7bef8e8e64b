use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use skiff_core::MotdProvider;

/// On-disk format: a JSON object with a `motd` array of lines. A line may
/// contain `{user_nick}`, substituted at send time.
#[derive(Debug, Deserialize)]
struct MotdFile {
    motd: Vec<String>,
}

#[derive(Debug)]
pub struct FileMotd {
    lines: Vec<String>,
}

impl FileMotd {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let string = std::fs::read_to_string(path)
            .with_context(|| format!("reading motd file {path:?}"))?;
        Self::load_from_str(string.as_str())
    }

    pub fn load_from_str(str: &str) -> Result<Self, anyhow::Error> {
        let file: MotdFile = serde_json::from_str(str).context("parsing motd file")?;
        Ok(Self { lines: file.motd })
    }

    pub fn empty() -> Self {
        Self { lines: Vec::new() }
    }
}

impl MotdProvider for FileMotd {
    fn motd(&self) -> Option<Vec<String>> {
        if self.lines.is_empty() {
            return None;
        }
        Some(self.lines.clone())
    }
}

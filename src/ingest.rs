use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

pub const EXPECTED_CONTENT_TYPE: &str = "image/jpeg";

const PREFIX: &str = "image_";
const EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

pub fn image_filename(number: u32) -> String {
    format!("{PREFIX}{number:04}.jpg")
}

/// What a previous run left behind in the image directory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Recovered {
    /// Highest number seen, 0 when the directory holds no numbered images.
    pub last_number: u32,
    /// The file for `last_number` and its modification time, when it is a `.jpg`.
    pub last_image: Option<(String, DateTime<Local>)>,
}

/// Best-effort scan so numbering continues after a restart. Files that do not follow
/// the `image_NNNN` pattern are ignored and gaps left by deleted files are not reused.
pub fn recover(dir: &Path) -> io::Result<Recovered> {
    let mut last_number = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(number) = entry.file_name().to_str().and_then(parse_number) {
            last_number = last_number.max(Some(number));
        }
    }

    let Some(last_number) = last_number else {
        return Ok(Recovered::default());
    };

    let name = image_filename(last_number);
    let last_image = fs::metadata(dir.join(&name))
        .and_then(|meta| meta.modified())
        .ok()
        .map(|modified| (name, DateTime::<Local>::from(modified)));

    Ok(Recovered {
        last_number,
        last_image,
    })
}

fn parse_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    if !EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return None;
    }
    let rest = name.strip_prefix(PREFIX)?;
    let digits = rest.split(['.', '_']).next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Writes the upload verbatim and returns where it landed.
pub async fn store(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

//! The directory-entry type returned by `dir`. See spec §3 (File Entry).

use serde::Deserialize;

/// `attr & 0x10` marks a directory; other bits are FAT attribute flags we
/// pass through without interpreting.
const ATTR_DIRECTORY: u8 = 0x10;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub attr: u8,
    pub size: u32,
    pub date: u16,
    pub time: u16,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    /// A known corruption marker: `attr == 0x2F` on a single-character
    /// name. Surfaced to the caller rather than silently skipped or
    /// repaired (§3, §9 open question).
    pub fn is_corrupted(&self) -> bool {
        self.attr == 0x2F && self.name.chars().count() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(attr: u8, name: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            attr,
            size: 0,
            date: 0,
            time: 0,
        }
    }

    #[test]
    fn directory_bit_is_respected() {
        assert!(entry(0x10, "SUB").is_dir());
        assert!(!entry(0x00, "file.txt").is_dir());
    }

    #[test]
    fn corruption_marker_requires_single_char_name() {
        assert!(entry(0x2F, "x").is_corrupted());
        assert!(!entry(0x2F, "xy").is_corrupted());
        assert!(!entry(0x00, "x").is_corrupted());
    }
}

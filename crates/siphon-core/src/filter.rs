//! Path filters applied while scanning

use std::ffi::OsStr;
use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::error::ScanError;

/// Names generated by common operating systems, regardless of the host OS
const OS_FILES: &[&str] = &[
    ".DS_Store",
    "._.DS_Store",
    ".Spotlight-V100",
    ".Trashes",
    ".fseventsd",
    ".TemporaryItems",
    "__MACOSX",
    "Thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    "$RECYCLE.BIN",
    "System Volume Information",
];

/// `*` and `?` stop at `/`; `**` crosses directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Filter settings as configured by the user
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Glob a file must match to be queued, e.g. `**/*.{pdf,tif}` style
    pub include_pattern: Option<String>,
    /// Glob excluding files and pruning directories
    pub exclude_pattern: Option<String>,
    pub follow_symlinks: bool,
    pub include_hidden: bool,
    pub include_os_files: bool,
}

/// Compiled filter. Patterns match against paths relative to the scan root,
/// with `/` separators.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    include: Option<Pattern>,
    exclude: Option<Pattern>,
    include_hidden: bool,
    include_os_files: bool,
}

impl ScanFilter {
    pub fn new(options: &FilterOptions) -> Result<Self, ScanError> {
        let compile = |p: &Option<String>| -> Result<Option<Pattern>, ScanError> {
            match p.as_deref().map(str::trim) {
                Some(p) if !p.is_empty() => Ok(Some(Pattern::new(p)?)),
                _ => Ok(None),
            }
        };
        Ok(Self {
            include: compile(&options.include_pattern)?,
            exclude: compile(&options.exclude_pattern)?,
            include_hidden: options.include_hidden,
            include_os_files: options.include_os_files,
        })
    }

    /// Whether to descend into a directory
    pub fn admits_dir(&self, relative: &Path, hidden_attr: bool) -> bool {
        if !self.admits_name(relative.file_name(), hidden_attr) {
            return false;
        }
        !self.excluded(relative)
    }

    /// Whether to queue a regular file
    pub fn admits_file(&self, relative: &Path, hidden_attr: bool) -> bool {
        if !self.admits_name(relative.file_name(), hidden_attr) {
            return false;
        }
        if let Some(include) = &self.include {
            if !include.matches_with(&slashed(relative), MATCH_OPTIONS) {
                return false;
            }
        }
        !self.excluded(relative)
    }

    fn admits_name(&self, name: Option<&OsStr>, hidden_attr: bool) -> bool {
        let Some(name) = name else { return true };
        if !self.include_hidden && (hidden_attr || is_hidden_name(name)) {
            return false;
        }
        if !self.include_os_files && is_os_file(name) {
            return false;
        }
        true
    }

    fn excluded(&self, relative: &Path) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|p| p.matches_with(&slashed(relative), MATCH_OPTIONS))
    }
}

/// Dot-prefixed names are hidden on every platform
pub fn is_hidden_name(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

pub fn is_os_file(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    OS_FILES.iter().any(|os| *os == name)
}

/// DOS "hidden" attribute. Always false off Windows.
#[cfg(windows)]
pub fn has_hidden_attribute(metadata: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
pub fn has_hidden_attribute(_metadata: &std::fs::Metadata) -> bool {
    false
}

fn slashed(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

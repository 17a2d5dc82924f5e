//! Program types, autorun settings and directory listing parsing.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::TrioError;

/// Kind of content a program slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramType {
    /// Executable BASIC program (`.BAS`).
    Normal,
    /// Plain text (`.TXT`).
    Text,
    /// Project description (`.PROJ`).
    Project,
    /// Machine configuration, read at boot (`.MCC`).
    MachineConfig,
    /// BASIC library (`.BAL`).
    BasicLib,
}

// (type, file extension, controller type code, DIR code-type column)
const PROGRAM_TYPES: [(ProgramType, &str, i64, &str); 5] = [
    (ProgramType::Normal, ".BAS", 0, "Normal"),
    (ProgramType::Text, ".TXT", 3, "Text"),
    (ProgramType::Project, ".PROJ", 7, "Project"),
    (ProgramType::MachineConfig, ".MCC", 9, "MC_CONFIG"),
    (ProgramType::BasicLib, ".BAL", 12, "BASIC Lib"),
];

impl ProgramType {
    pub const ALL: [ProgramType; 5] = [
        ProgramType::Normal,
        ProgramType::Text,
        ProgramType::Project,
        ProgramType::MachineConfig,
        ProgramType::BasicLib,
    ];

    fn row(self) -> (ProgramType, &'static str, i64, &'static str) {
        PROGRAM_TYPES[self as usize]
    }

    /// Upper-case extension including the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        self.row().1
    }

    /// Numeric type used by `SELECT` and `?PROG_TYPE`.
    #[must_use]
    pub fn code(self) -> i64 {
        self.row().2
    }

    /// Name shown in the type column of `DIR`.
    #[must_use]
    pub fn code_type_name(self) -> &'static str {
        self.row().3
    }

    /// Case-insensitive; accepts the extension with or without the dot.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.strip_prefix('.').unwrap_or(extension);
        PROGRAM_TYPES
            .iter()
            .find(|row| row.1[1..].eq_ignore_ascii_case(extension))
            .map(|row| row.0)
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        PROGRAM_TYPES
            .iter()
            .find(|row| row.2 == code)
            .map(|row| row.0)
    }

    #[must_use]
    pub fn from_code_type_name(name: &str) -> Option<Self> {
        PROGRAM_TYPES
            .iter()
            .find(|row| row.3 == name)
            .map(|row| row.0)
    }

    /// Only executable programs can be started at boot.
    #[must_use]
    pub fn supports_autorun(self) -> bool {
        self == Self::Normal
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code_type_name())
    }
}

/// Boot behaviour of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAutorun", into = "RawAutorun")]
pub enum AutorunSpec {
    None,
    Manual,
    PowerUp,
    /// Started at boot on the given process; negative selects automatically.
    Auto(i32),
}

impl AutorunSpec {
    /// Process the program is started on at boot, if any.
    #[must_use]
    pub fn process(self) -> Option<i32> {
        match self {
            Self::Auto(process) => Some(process),
            Self::None | Self::Manual | Self::PowerUp => None,
        }
    }

    #[must_use]
    pub fn is_auto(self) -> bool {
        matches!(self, Self::Auto(_))
    }

    /// Parses the `DIR` run column, or a manifest value.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text {
            "None" => return Some(Self::None),
            "Manual" => return Some(Self::Manual),
            "Power Up" => return Some(Self::PowerUp),
            _ => {}
        }
        let process = text
            .strip_prefix("Auto(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(text);
        process.parse::<i32>().ok().map(Self::Auto)
    }
}

impl fmt::Display for AutorunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Manual => f.write_str("Manual"),
            Self::PowerUp => f.write_str("Power Up"),
            Self::Auto(process) => write!(f, "Auto({process})"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawAutorun {
    Process(i64),
    Text(String),
}

impl TryFrom<RawAutorun> for AutorunSpec {
    type Error = String;

    fn try_from(value: RawAutorun) -> Result<Self, Self::Error> {
        match value {
            RawAutorun::Process(process) => i32::try_from(process)
                .map(Self::Auto)
                .map_err(|_| format!("autorun process {process} out of range")),
            RawAutorun::Text(text) => {
                Self::parse(&text).ok_or_else(|| format!("invalid autorun '{text}'"))
            }
        }
    }
}

impl From<AutorunSpec> for RawAutorun {
    fn from(value: AutorunSpec) -> Self {
        match value {
            AutorunSpec::Auto(process) => Self::Process(i64::from(process)),
            other => Self::Text(other.to_string()),
        }
    }
}

/// One row of the controller's program directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramEntry {
    pub name: SmolStr,
    pub source_size: u32,
    pub code_size: u32,
    pub autorun: AutorunSpec,
    pub program_type: ProgramType,
}

impl ProgramEntry {
    /// Local file name for this program, e.g. `STARTUP.BAS`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.program_type.extension())
    }
}

/// Directory listing keyed by program name, in controller order.
pub type ProgramTable = IndexMap<SmolStr, ProgramEntry>;

/// Program name and type for a local file, e.g. `src/startup.bas` gives
/// `("STARTUP", Normal)`.
pub fn program_from_filename(path: impl AsRef<Path>) -> Result<(SmolStr, ProgramType), TrioError> {
    let path = path.as_ref();
    match program_name_from_path(path) {
        (name, Some(program_type)) => Ok((name, program_type)),
        (_, None) => Err(TrioError::UnknownExtension(SmolStr::new(
            path.display().to_string(),
        ))),
    }
}

/// Like [`program_from_filename`] but accepts bare program names.
#[must_use]
pub fn program_name_from_path(path: impl AsRef<Path>) -> (SmolStr, Option<ProgramType>) {
    let path = path.as_ref();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_ascii_uppercase())
        .unwrap_or_default();
    let program_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ProgramType::from_extension);
    (SmolStr::new(stem), program_type)
}

const TABLE_SEPARATOR: &str = "---------\n";
const TABLE_END: &str = "OK";

/// Parses the output of `DIR`.
///
/// Rows sit between the dashed separator line and the closing `OK`. Every
/// non-blank row must parse; a listing is never partially accepted.
pub fn parse_directory(listing: &str) -> Result<ProgramTable, TrioError> {
    let table = listing
        .rfind(TABLE_END)
        .and_then(|end| {
            listing[..end]
                .rfind(TABLE_SEPARATOR)
                .map(|start| &listing[start + TABLE_SEPARATOR.len()..end])
        })
        .ok_or_else(|| TrioError::DirectoryParse {
            line: listing.to_string(),
        })?;
    let mut programs = ProgramTable::new();
    for line in table.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_directory_row(line).ok_or_else(|| TrioError::DirectoryParse {
            line: line.to_string(),
        })?;
        programs.insert(entry.name.clone(), entry);
    }
    Ok(programs)
}

/// `<name> <source> <code> <run> <type>`; the run and type columns may hold
/// two words (`Power Up`, `BASIC Lib`).
pub fn parse_directory_row(line: &str) -> Option<ProgramEntry> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let (name, rest) = next_field(line)?;
    let (source, rest) = next_field(rest)?;
    let (code, rest) = next_field(rest)?;
    let source_size = parse_size(source)?;
    let code_size = parse_size(code)?;
    let (autorun, rest) = autorun_column(leading_space(rest)?)?;
    let type_column = leading_space(rest)?;
    let program_type = PROGRAM_TYPES
        .iter()
        .find(|row| type_column.starts_with(row.3))
        .map(|row| row.0)?;
    Some(ProgramEntry {
        name: SmolStr::new(name),
        source_size,
        code_size,
        autorun,
        program_type,
    })
}

fn next_field(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    Some((&text[..end], &text[end..]))
}

fn leading_space(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    (trimmed.len() < text.len()).then_some(trimmed)
}

fn parse_size(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn autorun_column(text: &str) -> Option<(AutorunSpec, &str)> {
    for (label, autorun) in [
        ("None", AutorunSpec::None),
        ("Manual", AutorunSpec::Manual),
        ("Power Up", AutorunSpec::PowerUp),
    ] {
        if let Some(rest) = text.strip_prefix(label) {
            return Some((autorun, rest));
        }
    }
    let inner = text.strip_prefix("Auto(")?;
    let close = inner.find(')')?;
    let process = &inner[..close];
    if process.is_empty() || !process.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        return None;
    }
    let process = process.parse::<i32>().ok()?;
    Some((AutorunSpec::Auto(process), &inner[close + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "DIR\nProgram          Source  Code  Run       Type\n\
--------------------------------------------------\n\
MC_CONFIG             212     0  None      MC_CONFIG\n\
STARTUP              1830   412  Auto(-1)  Normal\n\
MOTION_LIB            904   310  Power Up  BASIC Lib\n\
NOTES                  88     0  Manual    Text\n\
OK\n";

    #[test]
    fn type_table_is_bidirectional() {
        for program_type in ProgramType::ALL {
            assert_eq!(
                ProgramType::from_extension(program_type.extension()),
                Some(program_type)
            );
            assert_eq!(ProgramType::from_code(program_type.code()), Some(program_type));
            assert_eq!(
                ProgramType::from_code_type_name(program_type.code_type_name()),
                Some(program_type)
            );
        }
        assert_eq!(ProgramType::from_code(-1), None);
        assert_eq!(ProgramType::from_extension("bas"), Some(ProgramType::Normal));
    }

    #[test]
    fn parses_listing_rows_in_order() {
        let table = parse_directory(LISTING).unwrap();
        let names: Vec<_> = table.keys().map(SmolStr::as_str).collect();
        assert_eq!(names, ["MC_CONFIG", "STARTUP", "MOTION_LIB", "NOTES"]);
        let startup = &table["STARTUP"];
        assert_eq!(startup.source_size, 1830);
        assert_eq!(startup.code_size, 412);
        assert_eq!(startup.autorun, AutorunSpec::Auto(-1));
        assert_eq!(startup.program_type, ProgramType::Normal);
        assert_eq!(table["MOTION_LIB"].autorun, AutorunSpec::PowerUp);
        assert_eq!(table["MOTION_LIB"].program_type, ProgramType::BasicLib);
        assert_eq!(table["MC_CONFIG"].file_name(), "MC_CONFIG.MCC");
    }

    #[test]
    fn empty_table_is_valid() {
        let table = parse_directory("DIR\n----------\nOK\n").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn bad_row_is_fatal() {
        let listing = "----------\nSTARTUP 10 xx None Normal\nOK";
        let err = parse_directory(listing).unwrap_err();
        assert_eq!(
            err,
            TrioError::DirectoryParse {
                line: "STARTUP 10 xx None Normal".to_string()
            }
        );
    }

    #[test]
    fn missing_table_is_fatal() {
        assert!(matches!(
            parse_directory("%[COMMAND DIR] - busy"),
            Err(TrioError::DirectoryParse { .. })
        ));
    }

    #[test]
    fn row_rejects_unknown_columns() {
        assert!(parse_directory_row(" STARTUP 1 1 None Normal").is_none());
        assert!(parse_directory_row("STARTUP 1 1 Sometimes Normal").is_none());
        assert!(parse_directory_row("STARTUP 1 1 None Binary").is_none());
        assert!(parse_directory_row("STARTUP 1 1 Auto() Normal").is_none());
    }

    #[test]
    fn filename_maps_to_program() {
        let (name, program_type) = program_from_filename("src/motion/startup.bas").unwrap();
        assert_eq!(name, "STARTUP");
        assert_eq!(program_type, ProgramType::Normal);
        assert!(matches!(
            program_from_filename("notes.md"),
            Err(TrioError::UnknownExtension(_))
        ));
        assert_eq!(program_name_from_path("startup"), ("STARTUP".into(), None));
    }

    #[test]
    fn autorun_text_forms() {
        assert_eq!(AutorunSpec::parse("Auto(3)"), Some(AutorunSpec::Auto(3)));
        assert_eq!(AutorunSpec::parse("-1"), Some(AutorunSpec::Auto(-1)));
        assert_eq!(AutorunSpec::parse("Power Up"), Some(AutorunSpec::PowerUp));
        assert_eq!(AutorunSpec::parse("sometimes"), None);
        assert_eq!(AutorunSpec::Auto(-1).to_string(), "Auto(-1)");
        assert_eq!(AutorunSpec::Manual.process(), None);
    }
}

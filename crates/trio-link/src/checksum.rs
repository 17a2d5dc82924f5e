//! Program content checksum (CRC-16, polynomial 0x8005, MSB first).
//!
//! The controller digests a program line by line: each line without its line
//! ending, then a `0xAA` separator byte. Digests computed here from a local
//! file therefore match `EDPROG"<name>",10` for the uploaded program.

const POLY: u16 = 0x8005;
const LINE_SENTINEL: u8 = 0xAA;

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u16; 256] = build_table();

/// Running CRC-16 register (init 0, no reflection, no output XOR).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let index = usize::from((self.value >> 8) as u8 ^ byte);
            self.value = (self.value << 8) ^ TABLE[index];
        }
    }

    #[must_use]
    pub fn value(&self) -> u16 {
        self.value
    }
}

/// Strips trailing `\r`/`\n` bytes.
#[must_use]
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &line[..end]
}

/// Digest of a sequence of program lines.
pub fn checksum<I>(lines: I) -> u16
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut crc = Crc16::new();
    for line in lines {
        crc.update(trim_line_ending(line.as_ref()));
        crc.update(&[LINE_SENTINEL]);
    }
    crc.value()
}

/// Splits raw file content into lines on `\n`.
///
/// A trailing `\n` does not open an extra empty line, so `b"a\nb\n"` and
/// `b"a\nb"` both yield two lines. Line endings are left in place.
#[must_use]
pub fn split_program_lines(content: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (idx, byte) in content.iter().enumerate() {
        if *byte == b'\n' {
            lines.push(&content[start..=idx]);
            start = idx + 1;
        }
    }
    if start < content.len() {
        lines.push(&content[start..]);
    }
    lines
}

/// Digest of raw file content, as read in binary mode.
#[must_use]
pub fn checksum_bytes(content: &[u8]) -> u16 {
    checksum(split_program_lines(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_matches_crc16_umts_check_value() {
        let mut crc = Crc16::new();
        crc.update(b"123456789");
        assert_eq!(crc.value(), 0xFEE8);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(checksum(Vec::<&[u8]>::new()), 0);
        assert_eq!(checksum_bytes(b""), 0);
    }

    #[test]
    fn line_boundaries_change_the_digest() {
        assert_ne!(checksum(["ab", "cd"]), checksum(["abcd"]));
        assert_ne!(checksum(["abc", "d"]), checksum(["ab", "cd"]));
    }

    #[test]
    fn line_endings_do_not_change_the_digest() {
        let crlf = checksum_bytes(b"BASE(0)\r\nWA(10)\r\n");
        let lf = checksum_bytes(b"BASE(0)\nWA(10)\n");
        let no_final = checksum_bytes(b"BASE(0)\nWA(10)");
        assert_eq!(crlf, lf);
        assert_eq!(lf, no_final);
        assert_eq!(lf, checksum(["BASE(0)", "WA(10)"]));
    }

    #[test]
    fn blank_lines_are_significant() {
        assert_ne!(checksum_bytes(b"A\n\nB\n"), checksum_bytes(b"A\nB\n"));
    }

    #[test]
    fn split_keeps_line_endings() {
        let lines = split_program_lines(b"a\r\nb\nc");
        assert_eq!(lines, vec![&b"a\r\n"[..], &b"b\n"[..], &b"c"[..]]);
    }
}

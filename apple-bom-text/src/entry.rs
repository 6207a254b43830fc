// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `Bom.txt` line grammar.
//!
//! `lsbom` prints one record per installed path: the path, the file mode
//! as octal digits, and `uid/gid`, separated by tabs. Regular files carry
//! additional size and checksum columns, which take no part in metadata
//! reconciliation and are ignored by the decoder.

use {
    crate::{BomResult, Error},
    std::{fmt, io::BufRead, path::Path},
};

/// Prefix marking an AppleDouble metadata sidecar (resource fork or
/// extended attributes split out for a sibling file).
pub const SIDECAR_PREFIX: &str = "._";

/// File mode as recorded in a BOM text line.
///
/// The octal digit string is preserved verbatim so the type digits survive
/// a round trip: `lsbom` prints `40755` for a directory, `100644` for a
/// regular file, `120755` for a symlink. Only the trailing 4 digits are
/// permission bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryMode {
    digits: String,
    permissions: u32,
}

impl EntryMode {
    /// Parse a mode from its octal digit representation.
    pub fn from_digits(digits: &str) -> Result<Self, String> {
        if digits.len() < 4 || !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(format!("invalid mode field: {}", digits));
        }

        let permissions = u32::from_str_radix(&digits[digits.len() - 4..], 8)
            .map_err(|_| format!("invalid mode field: {}", digits))?;

        Ok(Self {
            digits: digits.to_string(),
            permissions,
        })
    }

    /// The permission value (the trailing 4 octal digits).
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    /// Whether the mode describes a directory.
    ///
    /// A leading `4` signals a directory regardless of field width, so a
    /// bare `4755` counts the same as the usual `40755`.
    pub fn is_directory(&self) -> bool {
        self.digits.starts_with('4')
    }

    /// The digit string exactly as it appeared in the BOM text.
    pub fn digits(&self) -> &str {
        &self.digits
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits)
    }
}

/// One record from a BOM text file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BomEntry {
    /// Payload-root-relative path, with any leading `./` stripped.
    pub path: String,
    pub mode: EntryMode,
    pub owner_uid: u32,
    pub group_gid: u32,
}

impl BomEntry {
    /// Decode a single line of BOM text.
    ///
    /// Returns `Ok(None)` for a blank line — never expected in well-formed
    /// output, but tolerated. Anything else that fails to decode is a
    /// fatal [Error::MalformedLine] carrying the 1-based line number.
    pub fn parse_line(line: &str, line_number: u64) -> BomResult<Option<Self>> {
        let line = line.strip_suffix('\n').unwrap_or(line);

        if line.is_empty() {
            return Ok(None);
        }

        let mut fields = line.split('\t');

        let path = fields
            .next()
            .ok_or_else(|| Error::MalformedLine(line_number, "missing path field".into()))?;
        let mode = fields
            .next()
            .ok_or_else(|| Error::MalformedLine(line_number, "missing mode field".into()))?;
        let owner = fields
            .next()
            .ok_or_else(|| Error::MalformedLine(line_number, "missing uid/gid field".into()))?;

        let mode = EntryMode::from_digits(mode)
            .map_err(|message| Error::MalformedLine(line_number, message))?;

        let (uid, gid) = owner.split_once('/').ok_or_else(|| {
            Error::MalformedLine(line_number, format!("invalid uid/gid field: {}", owner))
        })?;
        let owner_uid = uid
            .parse::<u32>()
            .map_err(|_| Error::MalformedLine(line_number, format!("invalid uid: {}", uid)))?;
        let group_gid = gid
            .parse::<u32>()
            .map_err(|_| Error::MalformedLine(line_number, format!("invalid gid: {}", gid)))?;

        let path = path.strip_prefix("./").unwrap_or(path).to_string();

        Ok(Some(Self {
            path,
            mode,
            owner_uid,
            group_gid,
        }))
    }

    /// The final path component.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Whether the basename marks an AppleDouble metadata sidecar.
    pub fn is_sidecar(&self) -> bool {
        self.basename().starts_with(SIDECAR_PREFIX)
    }

    /// The sibling path a sidecar entry holds split-out metadata for.
    pub fn sidecar_sibling(&self) -> Option<String> {
        if !self.is_sidecar() {
            return None;
        }

        let stripped = &self.basename()[SIDECAR_PREFIX.len()..];

        Some(match self.path.rfind('/') {
            Some(idx) => format!("{}/{}", &self.path[..idx], stripped),
            None => stripped.to_string(),
        })
    }
}

impl fmt::Display for BomEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}/{}",
            self.path,
            self.mode.digits(),
            self.owner_uid,
            self.group_gid
        )
    }
}

/// Decode an entire BOM text stream, preserving record order.
pub fn parse_bom_text(reader: impl BufRead) -> BomResult<Vec<BomEntry>> {
    let mut entries = vec![];

    for (index, line) in reader.lines().enumerate() {
        let line = line?;

        if let Some(entry) = BomEntry::parse_line(&line, index as u64 + 1)? {
            entries.push(entry);
        }
    }

    Ok(entries)
}

/// Whether any entry in a BOM text file records ownership other than `0/0`.
///
/// Package imports use this to decide that a package's ownership cannot be
/// expressed with default semantics. A missing file reads as all-default
/// ownership; a malformed file is reported and also reads as all-default.
pub fn has_non_default_ownership(bom_path: &Path) -> bool {
    let file = match std::fs::File::open(bom_path) {
        Ok(file) => file,
        Err(_) => return false,
    };

    match parse_bom_text(std::io::BufReader::new(file)) {
        Ok(entries) => entries
            .iter()
            .any(|entry| entry.owner_uid != 0 || entry.group_gid != 0),
        Err(err) => {
            log::error!("{}", err);
            false
        }
    }
}

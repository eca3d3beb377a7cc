//! Tile coordinates and the tile-listing query.
//!
//! The tile lister prints a bracketed list of parenthesized entries, for example
//! `[(0,2,None),(1,3,"core.elf"),]`. The output is parsed by a strict recursive-descent
//! parser; anything outside the grammar below is rejected.
//!
//! ```text
//! list  := ws '[' ws (entry ws (',' ws entry ws)* (',' ws)?)? ']' ws EOF
//! entry := '(' ws uint ws ',' ws uint ws (',' ws elf ws)? (',' ws)? ')'
//! elf   := 'None' | '"' chars '"'
//! ```

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::Path;

use serde::Serialize;

use crate::error::PipelineError;
use crate::tool::ToolInvoker;

pub const TILE_LISTER_TOOL: &str = "aie-translate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TileCoordinate {
    pub col: u32,
    pub row: u32,
}

impl TileCoordinate {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

/// One core reported by the tile lister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub tile: TileCoordinate,
    /// Prebuilt executable attached to the core in the IR, if any.
    pub elf_file: Option<String>,
}

/// Queries the address-resolved module for the cores that need code generation.
pub fn enumerate_tiles(
    invoker: &ToolInvoker,
    address_resolved: &Path,
) -> Result<Vec<TileEntry>, PipelineError> {
    let args: Vec<OsString> = vec![
        "--aie-generate-corelist".into(),
        address_resolved.as_os_str().to_os_string(),
    ];
    let out = invoker
        .invoke(TILE_LISTER_TOOL, &args)
        .map_err(|e| PipelineError::tool("tile enumeration", e))?;
    if out.stdout_truncated {
        return Err(PipelineError::MalformedToolOutput {
            tool: TILE_LISTER_TOOL.to_string(),
            reason: "tile list exceeds the capture limit".to_string(),
            output: String::new(),
        });
    }
    let text = out.stdout_text();
    parse_core_list(&text).map_err(|reason| PipelineError::MalformedToolOutput {
        tool: TILE_LISTER_TOOL.to_string(),
        reason,
        output: text.clone(),
    })
}

/// Parses tile-lister output. Duplicate coordinates are rejected.
pub fn parse_core_list(text: &str) -> Result<Vec<TileEntry>, String> {
    let mut p = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    let entries = p.list()?;

    let mut seen: BTreeSet<TileCoordinate> = BTreeSet::new();
    for e in &entries {
        if !seen.insert(e.tile) {
            return Err(format!("duplicate tile {}", e.tile));
        }
    }
    Ok(entries)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn list(&mut self) -> Result<Vec<TileEntry>, String> {
        let mut out = Vec::new();
        self.ws();
        self.expect(b'[')?;
        self.ws();
        loop {
            if self.eat(b']') {
                break;
            }
            out.push(self.entry()?);
            self.ws();
            if self.eat(b',') {
                self.ws();
                continue;
            }
            self.expect(b']')?;
            break;
        }
        self.ws();
        if self.pos != self.bytes.len() {
            return Err(format!("trailing data at byte {}", self.pos));
        }
        Ok(out)
    }

    fn entry(&mut self) -> Result<TileEntry, String> {
        self.expect(b'(')?;
        self.ws();
        let col = self.uint()?;
        self.ws();
        self.expect(b',')?;
        self.ws();
        let row = self.uint()?;
        self.ws();

        let mut elf_file = None;
        if self.eat(b',') {
            self.ws();
            match self.peek() {
                Some(b')') => {}
                Some(b'"') => elf_file = Some(self.string()?),
                Some(b'N') => self.keyword(b"None")?,
                _ => return Err(self.unexpected("None, a string or ')'")),
            }
            self.ws();
            if self.eat(b',') {
                self.ws();
            }
        }
        self.expect(b')')?;

        Ok(TileEntry {
            tile: TileCoordinate::new(col, row),
            elf_file,
        })
    }

    fn uint(&mut self) -> Result<u32, String> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.unexpected("an unsigned integer"));
        }
        let digits = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| format!("invalid integer at byte {start}"))?;
        digits
            .parse::<u32>()
            .map_err(|_| format!("integer out of range at byte {start}: {digits}"))
    }

    fn string(&mut self) -> Result<String, String> {
        let start = self.pos;
        self.expect(b'"')?;
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.peek() {
                None => return Err(format!("unterminated string starting at byte {start}")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    // The lister does not escape file names, so any other backslash
                    // (e.g. a Windows path separator) is kept as-is.
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        _ => out.push(b'\\'),
                    }
                }
                Some(b'\n' | b'\r') => {
                    return Err(format!("newline inside string at byte {}", self.pos))
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        String::from_utf8(out).map_err(|_| format!("string at byte {start} is not UTF-8"))
    }

    fn keyword(&mut self, kw: &[u8]) -> Result<(), String> {
        if self.bytes[self.pos..].starts_with(kw) {
            self.pos += kw.len();
            return Ok(());
        }
        Err(self.unexpected(&String::from_utf8_lossy(kw)))
    }

    fn ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, b: u8) -> Result<(), String> {
        if self.eat(b) {
            return Ok(());
        }
        Err(self.unexpected(&format!("'{}'", b as char)))
    }

    fn unexpected(&self, wanted: &str) -> String {
        match self.peek() {
            Some(b) if b.is_ascii_graphic() => {
                format!("expected {wanted} at byte {}, found '{}'", self.pos, b as char)
            }
            Some(b) => format!("expected {wanted} at byte {}, found 0x{b:02x}", self.pos),
            None => format!("expected {wanted}, found end of output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(entries: &[TileEntry]) -> Vec<(u32, u32)> {
        entries.iter().map(|e| (e.tile.col, e.tile.row)).collect()
    }

    #[test]
    fn parses_lister_output_with_trailing_comma() {
        let entries = parse_core_list("[(0,2,None),(1,3,\"core_1_3.elf\"),]\n").expect("parse");
        assert_eq!(coords(&entries), vec![(0, 2), (1, 3)]);
        assert_eq!(entries[0].elf_file, None);
        assert_eq!(entries[1].elf_file.as_deref(), Some("core_1_3.elf"));
    }

    #[test]
    fn parses_pairs_and_whitespace() {
        let entries = parse_core_list("  [ ( 7 , 4 ) , (0,0) ]  ").expect("parse");
        assert_eq!(coords(&entries), vec![(7, 4), (0, 0)]);
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_core_list("[]").expect("parse").is_empty());
        assert!(parse_core_list("[ ]\n").expect("parse").is_empty());
    }

    #[test]
    fn keeps_enumeration_order() {
        let entries = parse_core_list("[(3,4),(1,2),(0,5)]").expect("parse");
        assert_eq!(coords(&entries), vec![(3, 4), (1, 2), (0, 5)]);
    }

    #[test]
    fn rejects_expressions_and_garbage() {
        for bad in [
            "",
            "not a list",
            "[(0,1)",
            "[(0,1)] extra",
            "[(0,1),,]",
            "[(0)]",
            "[(0,1,2)]",
            "[(0,-1)]",
            "[(0,1+1)]",
            "[(0,1,__import__('os'))]",
            "[(0,1,\"unterminated)]",
            "[(0,1,\"dangling\\\")]",
            "[(0,99999999999)]",
            "[(0,1)],",
            "((0,1))",
        ] {
            assert!(parse_core_list(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_duplicate_tiles() {
        let err = parse_core_list("[(1,2),(1,2)]").expect_err("duplicate");
        assert!(err.contains("duplicate tile (1,2)"), "{err}");
    }

    #[test]
    fn error_mentions_position() {
        let err = parse_core_list("[(0,x)]").expect_err("bad row");
        assert_eq!(err, "expected an unsigned integer at byte 4, found 'x'");
    }

    #[test]
    fn escaped_quotes_in_elf_names() {
        let entries = parse_core_list(r#"[(0,1,"a\"b\\c")]"#).expect("parse");
        assert_eq!(entries[0].elf_file.as_deref(), Some("a\"b\\c"));
    }

    #[test]
    fn unescaped_backslashes_in_elf_names_are_kept() {
        let entries = parse_core_list(r#"[(0,1,"C:\b\core.elf"),(2,3)]"#).expect("parse");
        assert_eq!(entries[0].elf_file.as_deref(), Some(r"C:\b\core.elf"));
        assert_eq!(entries[1].tile, TileCoordinate::new(2, 3));
    }
}

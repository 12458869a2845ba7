//! Line-level source maps.
//!
//! Every stage that rewrites code reports, for each line it generated, the
//! line of its input that line came from. Composing those tables stage by
//! stage gives the bundle's map back to the original module files. Column
//! positions are not tracked.

use sourcemap::SourceMapBuilder;
use swc_core::common::{BytePos, SourceFile};

use crate::errors::{DashpackError, Result};

/// Input line (0-based) for each generated line; `None` for synthesized lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    lines: Vec<Option<u32>>,
}

impl LineTable {
    /// Every line of `code` maps to itself
    pub fn identity(code: &str) -> Self {
        Self {
            lines: (0..line_count(code) as u32).map(Some).collect(),
        }
    }

    /// Built from code generator mappings (input position, generated line)
    /// for code parsed from the single file `fm`
    pub fn from_mappings(fm: &SourceFile, mappings: &[(BytePos, u32)]) -> Self {
        let mut lines: Vec<Option<u32>> = Vec::new();

        for &(pos, generated) in mappings {
            if pos.is_dummy() || pos < fm.start_pos || pos > fm.end_pos {
                continue;
            }
            let Some(source_line) = fm.lookup_line(pos) else {
                continue;
            };

            let generated = generated as usize;
            if lines.len() <= generated {
                lines.resize(generated + 1, None);
            }
            // the first mapping on a line wins
            if lines[generated].is_none() {
                lines[generated] = Some(source_line as u32);
            }
        }

        Self { lines }
    }

    pub fn get(&self, line: usize) -> Option<u32> {
        self.lines.get(line).copied().flatten()
    }

    /// `self` maps through `earlier`: generated line -> `earlier`'s input line
    pub fn then(&self, earlier: &LineTable) -> LineTable {
        LineTable {
            lines: self
                .lines
                .iter()
                .map(|line| line.and_then(|l| earlier.get(l as usize)))
                .collect(),
        }
    }
}

/// Original (source, line) for each line of a bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleMap {
    sources: Vec<String>,
    lines: Vec<Option<(u32, u32)>>,
}

impl BundleMap {
    pub fn add_source(&mut self, name: &str) -> u32 {
        match self.sources.iter().position(|s| s == name) {
            Some(index) => index as u32,
            None => {
                self.sources.push(name.to_string());
                (self.sources.len() - 1) as u32
            }
        }
    }

    /// Append one generated line
    pub fn push_line(&mut self, origin: Option<(u32, u32)>) {
        self.lines.push(origin);
    }

    /// Append generated lines mapped through `table` into `source`
    pub fn push_lines(&mut self, source: u32, count: usize, table: &LineTable) {
        for line in 0..count {
            self.lines.push(table.get(line).map(|original| (source, original)));
        }
    }

    pub fn origin(&self, line: usize) -> Option<(&str, u32)> {
        let (source, original) = self.lines.get(line).copied().flatten()?;
        Some((self.sources.get(source as usize)?.as_str(), original))
    }

    /// The map of code that was regenerated from this bundle's code
    pub fn remap(&self, table: &LineTable) -> BundleMap {
        BundleMap {
            sources: self.sources.clone(),
            lines: table
                .lines
                .iter()
                .map(|line| line.and_then(|l| self.lines.get(l as usize).copied().flatten()))
                .collect(),
        }
    }

    /// Source map v3 JSON for `file`, with sources relative to `source_root`
    pub fn to_json(&self, file: &str, source_root: &str) -> Result<String> {
        let mut builder = SourceMapBuilder::new(Some(file));
        builder.set_source_root(Some(source_root));

        let ids: Vec<u32> = self.sources.iter().map(|s| builder.add_source(s.as_str())).collect();
        for (generated, origin) in self.lines.iter().enumerate() {
            if let Some((source, original)) = origin {
                let source = ids.get(*source as usize).copied();
                builder.add_raw(generated as u32, 0, *original, 0, source, None, false);
            }
        }

        let mut bytes = Vec::new();
        builder
            .into_sourcemap()
            .to_writer(&mut bytes)
            .map_err(|e| DashpackError::assembly(file, format!("failed to write source map: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| DashpackError::assembly(file, format!("source map is not UTF-8: {}", e)))
    }
}

/// Lines as `str::split('\n')` sees them
pub fn line_count(code: &str) -> usize {
    code.split('\n').count()
}

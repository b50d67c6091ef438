//! Semantic splitter: Markdown (or JSON) into hierarchical chunks.
//!
//! Markdown is divided along its heading structure. Every chunk carries a
//! `section` with the heading trail (`path`) from the page root and the
//! heading depth (`level`); chunks are emitted in document order, which is
//! what gives the store its `sort_order` invariant.
//!
//! Oversized sections are split at paragraph boundaries within the
//! `max_chunk_size` budget. Two block kinds get special treatment so the
//! pieces stay usable on their own:
//! - fenced code blocks are closed and reopened with the same language;
//! - tables re-emit their header and separator rows in every piece.
//!
//! JSON content is recognized and split recursively along object and
//! array boundaries, keeping each chunk independently parseable.

use serde_json::Value;

use crate::models::{ContentChunk, SectionInfo};

pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1500;

pub struct SemanticSplitter {
    max_chunk_size: usize,
}

impl SemanticSplitter {
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(64),
        }
    }

    /// Split content into ordered chunks. Blank input yields no chunks;
    /// anything else yields at least one.
    pub fn split(&self, content: &str) -> Vec<ContentChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        if let Some(chunks) = self.try_split_json(content) {
            return chunks;
        }

        let mut chunks = Vec::new();
        // Stack of (level, heading) pairs leading to the current section.
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut section_lines: Vec<String> = Vec::new();
        let mut in_fence = false;

        let flush =
            |stack: &[(usize, String)], lines: &mut Vec<String>, chunks: &mut Vec<ContentChunk>, me: &Self| {
                let text = lines.join("\n");
                lines.clear();
                if text.trim().is_empty() {
                    return;
                }
                let section = SectionInfo {
                    level: stack.last().map(|(l, _)| *l).unwrap_or(0),
                    path: stack.iter().map(|(_, h)| h.clone()).collect(),
                };
                for piece in me.split_section(&text) {
                    chunks.push(ContentChunk {
                        content: piece,
                        section: section.clone(),
                    });
                }
            };

        for line in content.lines() {
            if is_fence_delimiter(line) {
                in_fence = !in_fence;
            }
            if !in_fence {
                if let Some((level, heading)) = parse_heading(line) {
                    flush(&stack, &mut section_lines, &mut chunks, self);
                    while stack.last().is_some_and(|(l, _)| *l >= level) {
                        stack.pop();
                    }
                    stack.push((level, heading));
                    section_lines.push(line.to_string());
                    continue;
                }
            }
            section_lines.push(line.to_string());
        }
        flush(&stack, &mut section_lines, &mut chunks, self);

        if chunks.is_empty() {
            chunks.push(ContentChunk {
                content: content.trim().to_string(),
                section: SectionInfo {
                    level: 0,
                    path: Vec::new(),
                },
            });
        }
        chunks
    }

    /// Split one section's text into pieces within the size budget.
    fn split_section(&self, text: &str) -> Vec<String> {
        let text = text.trim_matches('\n');
        if text.len() <= self.max_chunk_size {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut current = String::new();
        for block in parse_blocks(text) {
            let rendered = block.render();
            let joined_len = if current.is_empty() {
                rendered.len()
            } else {
                current.len() + 2 + rendered.len()
            };
            if joined_len > self.max_chunk_size && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if rendered.len() > self.max_chunk_size {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                pieces.extend(self.split_block(block));
            } else {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(&rendered);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    /// Split a single oversized block.
    fn split_block(&self, block: Block) -> Vec<String> {
        match block {
            Block::Fence { info, lines } => {
                let overhead = info.len() + 10;
                let budget = self.max_chunk_size.saturating_sub(overhead).max(32);
                let mut pieces = Vec::new();
                let mut body = String::new();
                for line in lines {
                    if !body.is_empty() && body.len() + 1 + line.len() > budget {
                        pieces.push(format!("```{info}\n{body}\n```"));
                        body.clear();
                    }
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&line);
                }
                if !body.is_empty() {
                    pieces.push(format!("```{info}\n{body}\n```"));
                }
                pieces
            }
            Block::Table { header, rows } => {
                let mut pieces = Vec::new();
                let mut body: Vec<String> = Vec::new();
                let header_len: usize = header.iter().map(|l| l.len() + 1).sum();
                let budget = self.max_chunk_size.saturating_sub(header_len).max(32);
                for row in rows {
                    let body_len: usize = body.iter().map(|l| l.len() + 1).sum();
                    if !body.is_empty() && body_len + row.len() > budget {
                        pieces.push(format!("{}\n{}", header.join("\n"), body.join("\n")));
                        body.clear();
                    }
                    body.push(row);
                }
                if !body.is_empty() {
                    pieces.push(format!("{}\n{}", header.join("\n"), body.join("\n")));
                }
                pieces
            }
            Block::Paragraph(text) => {
                // Hard split at line or space boundaries.
                let mut pieces = Vec::new();
                let mut remaining = text.as_str();
                while !remaining.is_empty() {
                    if remaining.len() <= self.max_chunk_size {
                        pieces.push(remaining.to_string());
                        break;
                    }
                    let window = floor_char_boundary(remaining, self.max_chunk_size);
                    let split_at = remaining[..window]
                        .rfind('\n')
                        .or_else(|| remaining[..window].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(window);
                    pieces.push(remaining[..split_at].trim_end().to_string());
                    remaining = &remaining[split_at..];
                }
                pieces.retain(|p| !p.is_empty());
                pieces
            }
        }
    }

    /// Recursive JSON splitting, keeping each chunk parseable.
    fn try_split_json(&self, content: &str) -> Option<Vec<ContentChunk>> {
        let trimmed = content.trim_start();
        if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
            return None;
        }
        let value: Value = serde_json::from_str(content).ok()?;
        let mut chunks = Vec::new();
        self.split_json_value(&value, &mut Vec::new(), &mut chunks);
        Some(chunks)
    }

    fn split_json_value(&self, value: &Value, path: &mut Vec<String>, out: &mut Vec<ContentChunk>) {
        let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
        if rendered.len() <= self.max_chunk_size {
            out.push(ContentChunk {
                content: rendered,
                section: SectionInfo {
                    level: path.len(),
                    path: path.clone(),
                },
            });
            return;
        }
        match value {
            Value::Object(map) => {
                for (key, inner) in map {
                    path.push(key.clone());
                    let wrapped = serde_json::json!({ key.clone(): inner.clone() });
                    let rendered = serde_json::to_string_pretty(&wrapped).unwrap_or_default();
                    if rendered.len() <= self.max_chunk_size {
                        out.push(ContentChunk {
                            content: rendered,
                            section: SectionInfo {
                                level: path.len(),
                                path: path.clone(),
                            },
                        });
                    } else {
                        self.split_json_value(inner, path, out);
                    }
                    path.pop();
                }
            }
            Value::Array(items) => {
                let mut group: Vec<Value> = Vec::new();
                let mut group_len = 2usize;
                for item in items {
                    let item_len = serde_json::to_string_pretty(item)
                        .map(|s| s.len())
                        .unwrap_or(0);
                    if item_len > self.max_chunk_size {
                        if !group.is_empty() {
                            self.emit_json_array(&std::mem::take(&mut group), path, out);
                            group_len = 2;
                        }
                        self.split_json_value(item, path, out);
                        continue;
                    }
                    if group_len + item_len > self.max_chunk_size && !group.is_empty() {
                        self.emit_json_array(&std::mem::take(&mut group), path, out);
                        group_len = 2;
                    }
                    group.push(item.clone());
                    group_len += item_len + 2;
                }
                if !group.is_empty() {
                    self.emit_json_array(&group, path, out);
                }
            }
            _ => {
                // A scalar too large for the budget: fall through to the
                // paragraph splitter so nothing is dropped.
                for piece in self.split_block(Block::Paragraph(rendered)) {
                    out.push(ContentChunk {
                        content: piece,
                        section: SectionInfo {
                            level: path.len(),
                            path: path.clone(),
                        },
                    });
                }
            }
        }
    }

    fn emit_json_array(&self, items: &[Value], path: &[String], out: &mut Vec<ContentChunk>) {
        let rendered = serde_json::to_string_pretty(&Value::Array(items.to_vec()))
            .unwrap_or_default();
        out.push(ContentChunk {
            content: rendered,
            section: SectionInfo {
                level: path.len(),
                path: path.to_vec(),
            },
        });
    }
}

impl Default for SemanticSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_SIZE)
    }
}

enum Block {
    Paragraph(String),
    Fence { info: String, lines: Vec<String> },
    Table { header: Vec<String>, rows: Vec<String> },
}

impl Block {
    fn render(&self) -> String {
        match self {
            Block::Paragraph(text) => text.clone(),
            Block::Fence { info, lines } => {
                format!("```{}\n{}\n```", info, lines.join("\n"))
            }
            Block::Table { header, rows } => {
                let mut all = header.clone();
                all.extend(rows.iter().cloned());
                all.join("\n")
            }
        }
    }
}

fn is_fence_delimiter(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let heading = rest.trim().trim_end_matches('#').trim().to_string();
    if heading.is_empty() {
        return None;
    }
    Some((hashes, heading))
}

fn is_table_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('|')
}

fn is_table_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Largest index `<= max` that lies on a char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Group a section's lines into paragraphs, fenced code blocks, and tables.
fn parse_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut lines = text.lines().peekable();

    let flush_paragraph = |paragraph: &mut Vec<String>, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            let text = paragraph.join("\n").trim().to_string();
            paragraph.clear();
            if !text.is_empty() {
                blocks.push(Block::Paragraph(text));
            }
        }
    };

    while let Some(line) = lines.next() {
        if is_fence_delimiter(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let info = line.trim_start().trim_start_matches(['`', '~']).trim().to_string();
            let mut body = Vec::new();
            for inner in lines.by_ref() {
                if is_fence_delimiter(inner) {
                    break;
                }
                body.push(inner.to_string());
            }
            blocks.push(Block::Fence { info, lines: body });
        } else if is_table_line(line)
            && lines.peek().map(|next| is_table_separator(next)).unwrap_or(false)
        {
            flush_paragraph(&mut paragraph, &mut blocks);
            let header = vec![
                line.to_string(),
                lines.next().map(str::to_string).unwrap_or_default(),
            ];
            let mut rows = Vec::new();
            while lines.peek().map(|next| is_table_line(next)).unwrap_or(false) {
                rows.push(lines.next().map(str::to_string).unwrap_or_default());
            }
            blocks.push(Block::Table { header, rows });
        } else if line.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
        } else {
            paragraph.push(line.to_string());
        }
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(chunks: &[ContentChunk]) -> Vec<Vec<String>> {
        chunks.iter().map(|c| c.section.path.clone()).collect()
    }

    #[test]
    fn blank_input_yields_nothing() {
        assert!(SemanticSplitter::default().split("   \n\n").is_empty());
    }

    #[test]
    fn heading_trail_becomes_the_path() {
        let md = "intro text\n\n# Guide\n\nwelcome\n\n## Install\n\nsteps\n\n### Linux\n\napt\n\n## Usage\n\nrun it";
        let chunks = SemanticSplitter::default().split(md);
        assert_eq!(
            paths(&chunks),
            vec![
                vec![],
                vec!["Guide".to_string()],
                vec!["Guide".to_string(), "Install".to_string()],
                vec!["Guide".to_string(), "Install".to_string(), "Linux".to_string()],
                vec!["Guide".to_string(), "Usage".to_string()],
            ]
        );
        assert_eq!(chunks[0].section.level, 0);
        assert_eq!(chunks[3].section.level, 3);
        // The heading line stays with its section's first chunk.
        assert!(chunks[1].content.starts_with("# Guide"));
    }

    #[test]
    fn sibling_heading_pops_the_stack() {
        let md = "# A\n\nx\n\n## B\n\ny\n\n# C\n\nz";
        let chunks = SemanticSplitter::default().split(md);
        assert_eq!(
            paths(&chunks),
            vec![
                vec!["A".to_string()],
                vec!["A".to_string(), "B".to_string()],
                vec!["C".to_string()],
            ]
        );
    }

    #[test]
    fn hashes_inside_code_fences_are_not_headings() {
        let md = "# Real\n\n```bash\n# comment, not a heading\necho hi\n```\n\ntail";
        let chunks = SemanticSplitter::default().split(md);
        assert_eq!(paths(&chunks), vec![vec!["Real".to_string()]]);
        assert!(chunks[0].content.contains("# comment, not a heading"));
    }

    #[test]
    fn oversized_section_splits_at_paragraphs() {
        let para = "word ".repeat(40).trim_end().to_string();
        let md = format!("# Big\n\n{para}\n\n{para}\n\n{para}");
        let chunks = SemanticSplitter::new(300).split(&md);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 300, "chunk over budget");
            assert_eq!(chunk.section.path, vec!["Big".to_string()]);
        }
    }

    #[test]
    fn split_code_fences_reopen_with_language() {
        let body = (0..60)
            .map(|i| format!("let x{i} = {i};"))
            .collect::<Vec<_>>()
            .join("\n");
        let md = format!("# Code\n\n```rust\n{body}\n```");
        let chunks = SemanticSplitter::new(300).split(&md);
        let fenced: Vec<_> = chunks
            .iter()
            .filter(|c| c.content.contains("```rust"))
            .collect();
        assert!(fenced.len() > 1);
        for chunk in fenced {
            assert!(chunk.content.starts_with("```rust\n") || chunk.content.contains("\n```rust\n"));
            assert!(chunk.content.trim_end().ends_with("```"));
        }
    }

    #[test]
    fn split_tables_keep_their_header() {
        let rows = (0..80)
            .map(|i| format!("| row{i} | value{i} |"))
            .collect::<Vec<_>>()
            .join("\n");
        let md = format!("# T\n\n| name | value |\n| --- | --- |\n{rows}");
        let chunks = SemanticSplitter::new(400).split(&md);
        let tables: Vec<_> = chunks
            .iter()
            .filter(|c| c.content.contains("| row"))
            .collect();
        assert!(tables.len() > 1);
        for chunk in tables {
            assert!(
                chunk.content.contains("| name | value |"),
                "header missing in piece: {}",
                chunk.content
            );
        }
    }

    #[test]
    fn json_splits_into_parseable_pieces() {
        let big: Vec<serde_json::Value> = (0..50)
            .map(|i| serde_json::json!({ "name": format!("item-{i}"), "index": i }))
            .collect();
        let doc = serde_json::json!({ "items": big, "meta": { "total": 50 } });
        let text = serde_json::to_string_pretty(&doc).unwrap();
        let chunks = SemanticSplitter::new(500).split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                serde_json::from_str::<serde_json::Value>(&chunk.content).is_ok(),
                "piece is not standalone JSON: {}",
                chunk.content
            );
        }
    }

    #[test]
    fn plain_text_is_a_single_root_chunk() {
        let chunks = SemanticSplitter::default().split("just some notes");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section.level, 0);
        assert!(chunks[0].section.path.is_empty());
    }
}

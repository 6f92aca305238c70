//! Newick tree parsing and writing
//!
//! Parses the parenthetical tree format: nested groups, tip and internal
//! labels, `:`-prefixed branch lengths, `;` terminator. Labels may be bare
//! (letters, digits, `_`, `.`, `-`) or single-quoted. Branch lengths are
//! written back with Rust's shortest round-trip float formatting, so a
//! parse → write → parse cycle preserves them exactly.

use crate::phylo::{PhyloNode, PhyloTree};
use crate::{Error, Result};

/// Parse a single Newick tree.
///
/// # Errors
/// Returns [`Error::Parse`] for malformed input: unbalanced parentheses,
/// a missing `;` terminator, an unparsable branch length, or trailing
/// content after the first tree.
///
/// # Example
/// ```
/// let tree = phylovar::phylo::newick::parse("((A:1.5,B:1.5):0.5,C:2.0);")?;
/// assert_eq!(tree.tip_labels(), ["A", "B", "C"]);
/// # Ok::<(), phylovar::Error>(())
/// ```
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut cursor = Cursor::new(input);
    let tree = cursor.tree()?;
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return Err(cursor.error("trailing content after tree terminator"));
    }
    Ok(tree)
}

/// Parse one or more `;`-terminated trees from a single text block.
///
/// Used for candidate-tree files where several topology-identical trees
/// with differing branch lengths are stored back to back.
///
/// # Errors
/// Returns [`Error::Parse`] for malformed input or an input with no trees.
pub fn parse_many(input: &str) -> Result<Vec<PhyloTree>> {
    let mut cursor = Cursor::new(input);
    let mut trees = Vec::new();
    loop {
        cursor.skip_whitespace();
        if cursor.at_end() {
            break;
        }
        trees.push(cursor.tree()?);
    }
    if trees.is_empty() {
        return Err(Error::Parse("input contains no trees".to_string()));
    }
    Ok(trees)
}

/// Render a tree in Newick format, `;`-terminated.
#[must_use]
pub fn write(tree: &PhyloTree) -> String {
    let mut out = String::new();
    write_node(tree.root(), true, &mut out);
    out.push(';');
    out
}

fn write_node(node: &PhyloNode, is_root: bool, out: &mut String) {
    if !node.children.is_empty() {
        out.push('(');
        for (i, child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(child, false, out);
        }
        out.push(')');
    }
    if let Some(label) = &node.label {
        if label.chars().all(is_bare_label_char) {
            out.push_str(label);
        } else {
            out.push('\'');
            out.push_str(&label.replace('\'', "''"));
            out.push('\'');
        }
    }
    if !is_root {
        out.push(':');
        out.push_str(&node.length.to_string());
    }
}

fn is_bare_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

struct Cursor<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn tree(&mut self) -> Result<PhyloTree> {
        self.skip_whitespace();
        let mut root = self.node()?;
        self.skip_whitespace();
        if !self.eat(b';') {
            return Err(self.error("expected ';' after tree"));
        }
        // A root branch length (rare but legal) carries no information for
        // a rooted analysis.
        root.length = 0.0;
        Ok(PhyloTree::new(root))
    }

    fn node(&mut self) -> Result<PhyloNode> {
        self.skip_whitespace();
        let children = if self.peek() == Some(b'(') {
            self.pos += 1;
            let mut children = vec![self.node()?];
            loop {
                self.skip_whitespace();
                if self.eat(b',') {
                    children.push(self.node()?);
                } else if self.eat(b')') {
                    break;
                } else {
                    return Err(self.error("expected ',' or ')' in group"));
                }
            }
            children
        } else {
            Vec::new()
        };

        self.skip_whitespace();
        let label = self.label()?;
        if children.is_empty() && label.is_none() {
            return Err(self.error("expected a tip label"));
        }

        self.skip_whitespace();
        let length = if self.eat(b':') {
            self.branch_length()?
        } else {
            0.0
        };

        Ok(PhyloNode {
            label,
            length,
            children,
        })
    }

    fn label(&mut self) -> Result<Option<String>> {
        if self.eat(b'\'') {
            let mut label = String::new();
            loop {
                match self.peek() {
                    Some(b'\'') => {
                        self.pos += 1;
                        // Doubled quote is an escaped quote inside the label.
                        if self.peek() == Some(b'\'') {
                            self.pos += 1;
                            label.push('\'');
                        } else {
                            return Ok(Some(label));
                        }
                    }
                    Some(_) => match self.input[self.pos..].chars().next() {
                        Some(ch) => {
                            label.push(ch);
                            self.pos += ch.len_utf8();
                        }
                        None => return Err(self.error("unterminated quoted label")),
                    },
                    None => return Err(self.error("unterminated quoted label")),
                }
            }
        }

        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_bare_label_char(b as char) && b.is_ascii() {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Ok(None);
        }
        Ok(Some(self.input[start..self.pos].to_string()))
    }

    fn branch_length(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.input[start..self.pos]
            .parse::<f64>()
            .map_err(|_| self.error("invalid branch length"))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::Parse(format!("{message} at byte {} of Newick input", self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_tree() {
        let tree = parse("((Apis_mellifera:1.5,Bombus_terrestris:1.5):0.5,Osmia_bicornis:2.0);")
            .unwrap();
        assert_eq!(
            tree.tip_labels(),
            ["Apis_mellifera", "Bombus_terrestris", "Osmia_bicornis"]
        );
        let clade = &tree.root().children[0];
        assert!((clade.length - 0.5).abs() < 1e-12);
        assert!((clade.children[1].length - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_quoted_label() {
        let tree = parse("('Lasioglossum sp. A':1,'it''s':1);").unwrap();
        assert_eq!(tree.tip_labels(), ["Lasioglossum sp. A", "it's"]);
    }

    #[test]
    fn test_parse_internal_labels_and_whitespace() {
        let tree = parse("( (A:1, B:1)node1:2 , C:3 ) root ;").unwrap();
        assert_eq!(tree.tip_labels(), ["A", "B", "C"]);
        assert_eq!(tree.root().label.as_deref(), Some("root"));
        assert_eq!(tree.root().children[0].label.as_deref(), Some("node1"));
    }

    #[test]
    fn test_parse_scientific_notation_length() {
        let tree = parse("(A:1e-3,B:2.5E2);").unwrap();
        assert!((tree.root().children[0].length - 0.001).abs() < 1e-15);
        assert!((tree.root().children[1].length - 250.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_many() {
        let trees = parse_many("(A:1,B:2);\n(A:3,B:4);\n").unwrap();
        assert_eq!(trees.len(), 2);
        assert!((trees[1].root().children[0].length - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_preserves_lengths() {
        let text = "((A:0.1234567890123456,B:1.5):0.30000000000000004,C:2e-7);";
        let tree = parse(text).unwrap();
        let reparsed = parse(&write(&tree)).unwrap();
        assert_eq!(tree, reparsed);
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(matches!(parse("((A:1,B:2):1"), Err(Error::Parse(_))));
        assert!(matches!(parse("(A:1,B:2)"), Err(Error::Parse(_))));
        assert!(matches!(parse("(A:x,B:2);"), Err(Error::Parse(_))));
        assert!(matches!(parse("(A:1,B:2); junk"), Err(Error::Parse(_))));
        assert!(matches!(parse(""), Err(Error::Parse(_))));
    }
}

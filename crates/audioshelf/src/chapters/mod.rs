//! Chapter metadata documents and the flattener that turns a nested chapter
//! tree into the ordered list of segments the transcode stage works through.

use serde::{Deserialize, Serialize};

/// Lead-in shorter than this (ms) is treated as noise, not as an intro.
pub const DEFAULT_INTRO_THRESHOLD_MS: u64 = 100;

const TITLE_SEPARATOR: &str = " - ";

/// Chapter document as persisted next to the source audio (`chapters.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterDocument {
    #[serde(default)]
    pub chapters: Vec<ChapterNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_length_ms: Option<u64>,
}

/// One node of a possibly nested chapter tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterNode {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub start_offset_ms: u64,
    #[serde(default)]
    pub length_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<ChapterNode>,
}

impl ChapterNode {
    pub fn leaf(title: &str, start_offset_ms: u64, length_ms: u64) -> Self {
        Self {
            title: title.to_string(),
            start_offset_ms,
            length_ms,
            chapters: Vec::new(),
        }
    }
}

/// A flat playback segment: one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSegment {
    pub title: String,
    pub start_offset_ms: u64,
    pub length_ms: u64,
}

impl ChapterSegment {
    pub fn end_offset_ms(&self) -> u64 {
        self.start_offset_ms.saturating_add(self.length_ms)
    }
}

/// Flattens `nodes` depth-first, left to right.
///
/// Leaves are emitted with their titles qualified by every ancestor
/// (`"Part 1 - Chapter 2"`). A parent whose first child starts more than
/// `intro_threshold_ms` after the parent itself gets a synthesized segment
/// covering that lead-in, emitted before its children.
pub fn flatten(nodes: &[ChapterNode], intro_threshold_ms: u64) -> Vec<ChapterSegment> {
    let mut out = Vec::new();
    for node in nodes {
        flatten_node(node, None, intro_threshold_ms, &mut out);
    }
    out
}

fn flatten_node(
    node: &ChapterNode,
    prefix: Option<&str>,
    intro_threshold_ms: u64,
    out: &mut Vec<ChapterSegment>,
) {
    let title = match prefix {
        Some(prefix) => format!("{}{}{}", prefix, TITLE_SEPARATOR, node.title),
        None => node.title.clone(),
    };

    let Some(first) = node.chapters.first() else {
        out.push(ChapterSegment {
            title,
            start_offset_ms: node.start_offset_ms,
            length_ms: node.length_ms,
        });
        return;
    };

    // Signed: a first child that starts before its parent means no intro.
    let intro = first.start_offset_ms as i64 - node.start_offset_ms as i64;
    if intro > intro_threshold_ms as i64 {
        out.push(ChapterSegment {
            title: title.clone(),
            start_offset_ms: node.start_offset_ms,
            length_ms: intro as u64,
        });
    }

    for child in &node.chapters {
        flatten_node(child, Some(&title), intro_threshold_ms, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(title: &str, start: u64, length: u64, chapters: Vec<ChapterNode>) -> ChapterNode {
        ChapterNode {
            title: title.to_string(),
            start_offset_ms: start,
            length_ms: length,
            chapters,
        }
    }

    fn count_leaves(nodes: &[ChapterNode]) -> usize {
        nodes
            .iter()
            .map(|n| {
                if n.chapters.is_empty() {
                    1
                } else {
                    count_leaves(&n.chapters)
                }
            })
            .sum()
    }

    #[test]
    fn test_flat_list_is_unchanged() {
        let nodes = vec![
            ChapterNode::leaf("Opening Credits", 0, 15_000),
            ChapterNode::leaf("Chapter 1", 15_000, 600_000),
            ChapterNode::leaf("Chapter 2", 615_000, 540_000),
        ];

        let segments = flatten(&nodes, DEFAULT_INTRO_THRESHOLD_MS);
        let expected: Vec<ChapterSegment> = nodes
            .iter()
            .map(|n| ChapterSegment {
                title: n.title.clone(),
                start_offset_ms: n.start_offset_ms,
                length_ms: n.length_ms,
            })
            .collect();
        assert_eq!(segments, expected);
    }

    #[test]
    fn test_nested_titles_are_qualified() {
        let nodes = vec![parent(
            "Part 1",
            0,
            1_000_000,
            vec![
                ChapterNode::leaf("Chapter 1", 0, 500_000),
                ChapterNode::leaf("Chapter 2", 500_000, 500_000),
            ],
        )];

        let titles: Vec<String> = flatten(&nodes, DEFAULT_INTRO_THRESHOLD_MS)
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Part 1 - Chapter 1", "Part 1 - Chapter 2"]);
    }

    #[test]
    fn test_intro_synthesized_before_children() {
        let nodes = vec![parent(
            "Part 1",
            10_000,
            100_000,
            vec![
                ChapterNode::leaf("Chapter 1", 40_000, 30_000),
                ChapterNode::leaf("Chapter 2", 70_000, 40_000),
            ],
        )];

        let segments = flatten(&nodes, DEFAULT_INTRO_THRESHOLD_MS);
        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[0],
            ChapterSegment {
                title: "Part 1".to_string(),
                start_offset_ms: 10_000,
                length_ms: 30_000,
            }
        );
        assert_eq!(segments[1].title, "Part 1 - Chapter 1");
    }

    #[test]
    fn test_intro_at_threshold_is_dropped() {
        let nodes = vec![parent(
            "Part 1",
            1_000,
            10_000,
            vec![ChapterNode::leaf("Chapter 1", 1_100, 9_900)],
        )];
        assert_eq!(flatten(&nodes, 100).len(), 1);
        // Same tree with a lower noise floor keeps the lead-in.
        assert_eq!(flatten(&nodes, 50).len(), 2);
    }

    #[test]
    fn test_child_starting_before_parent_has_no_intro() {
        let nodes = vec![parent(
            "Part 1",
            5_000,
            10_000,
            vec![ChapterNode::leaf("Chapter 1", 0, 15_000)],
        )];
        let segments = flatten(&nodes, DEFAULT_INTRO_THRESHOLD_MS);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].title, "Part 1 - Chapter 1");
    }

    #[test]
    fn test_deep_tree_is_preorder() {
        let nodes = vec![
            ChapterNode::leaf("Prologue", 0, 5_000),
            parent(
                "Book One",
                5_000,
                100_000,
                vec![
                    parent(
                        "Part A",
                        8_000,
                        50_000,
                        vec![
                            ChapterNode::leaf("One", 8_000, 25_000),
                            ChapterNode::leaf("Two", 33_000, 25_000),
                        ],
                    ),
                    ChapterNode::leaf("Interlude", 58_000, 47_000),
                ],
            ),
        ];

        let segments = flatten(&nodes, DEFAULT_INTRO_THRESHOLD_MS);
        let titles: Vec<&str> = segments.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Prologue",
                "Book One",
                "Book One - Part A - One",
                "Book One - Part A - Two",
                "Book One - Interlude",
            ]
        );
        // Leaves plus the one qualifying intro (Book One: 3000ms lead-in).
        assert_eq!(segments.len(), count_leaves(&nodes) + 1);
        assert_eq!(segments, flatten(&nodes, DEFAULT_INTRO_THRESHOLD_MS));
    }

    #[test]
    fn test_document_parses_with_missing_fields() {
        let doc: ChapterDocument = serde_json::from_str(
            r#"{"chapters": [{"title": "One", "length_ms": 1000,
                 "chapters": [{"title": "Inner", "start_offset_ms": 0}]}]}"#,
        )
        .unwrap();
        assert_eq!(doc.chapters[0].start_offset_ms, 0);
        assert_eq!(doc.chapters[0].chapters[0].length_ms, 0);
        assert!(doc.runtime_length_ms.is_none());
    }
}

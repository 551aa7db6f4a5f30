//! Block chunker: withholds streamed text until a structurally safe commit
//! boundary.
//!
//! The upstream runtime streams the *full accumulated reply text* after each
//! delta. The chunker tracks how much of that text has been committed for
//! display and only ever commits up to the last boundary that does not split
//! an open ``` fence, so a draft message never renders half a code block.
//!
//! The upstream may also restart mid-turn and resend text that is not an
//! extension of what was seen before. That is not an error: the chunker
//! resyncs to the new baseline and the visible text is replaced wholesale,
//! never concatenated or duplicated.

use tracing::debug;

/// Outcome of feeding one cumulative snapshot into the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The snapshot did not extend the previously seen text; the chunker
    /// reset to the new baseline and committed text must be re-rendered.
    pub resynced: bool,
}

/// Buffers cumulative reply text and commits fence-safe prefixes.
#[derive(Debug, Default)]
pub struct BlockChunker {
    seen: String,
    committed_len: usize,
}

impl BlockChunker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the full accumulated text so far.
    pub fn append(&mut self, text_so_far: &str) -> AppendOutcome {
        if text_so_far.starts_with(&self.seen) {
            if text_so_far.len() > self.seen.len() {
                self.seen.push_str(&text_so_far[self.seen.len()..]);
            }
            AppendOutcome { resynced: false }
        } else {
            debug!(
                seen_len = self.seen.len(),
                new_len = text_so_far.len(),
                "non-monotonic input, resyncing chunker baseline"
            );
            self.seen.clear();
            self.seen.push_str(text_so_far);
            self.committed_len = 0;
            AppendOutcome { resynced: true }
        }
    }

    /// Commit buffered text up to the last safe boundary and return the
    /// newly committed slice. With `force` the whole buffer commits
    /// regardless of safety (used at finalization).
    pub fn drain(&mut self, force: bool) -> Option<&str> {
        let safe_end = if force {
            self.seen.len()
        } else {
            safe_boundary(&self.seen)
        };
        if safe_end <= self.committed_len {
            return None;
        }
        let start = self.committed_len;
        self.committed_len = safe_end;
        Some(&self.seen[start..safe_end])
    }

    /// Text committed for display so far.
    #[must_use]
    pub fn committed(&self) -> &str {
        &self.seen[..self.committed_len]
    }

    /// Whether uncommitted text remains buffered.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        self.committed_len < self.seen.len()
    }

    /// Discard all buffered state without emitting.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.committed_len = 0;
    }
}

/// Byte index of the last safe commit boundary: the full buffer when no
/// fence is open, otherwise the start of the line that opened the
/// unterminated fence (so a dangling ```` ```lang ```` line is withheld too).
fn safe_boundary(text: &str) -> usize {
    let mut in_fence = false;
    let mut fence_start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            if in_fence {
                in_fence = false;
            } else {
                in_fence = true;
                fence_start = offset;
            }
        }
        offset += line.len();
    }
    if in_fence { fence_start } else { text.len() }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_commits_fully() {
        let mut chunker = BlockChunker::new();
        chunker.append("hello world");
        assert_eq!(chunker.drain(false), Some("hello world"));
        assert_eq!(chunker.committed(), "hello world");
        assert!(!chunker.has_buffered());
    }

    #[test]
    fn open_fence_is_withheld() {
        let mut chunker = BlockChunker::new();
        chunker.append("intro\n```rust\nlet x = 1;\n");
        assert_eq!(chunker.drain(false), Some("intro\n"));
        assert!(chunker.has_buffered());
    }

    #[test]
    fn closed_fence_commits() {
        let mut chunker = BlockChunker::new();
        chunker.append("intro\n```rust\nlet x = 1;\n```\noutro");
        assert_eq!(
            chunker.drain(false),
            Some("intro\n```rust\nlet x = 1;\n```\noutro")
        );
    }

    #[test]
    fn force_commits_open_fence() {
        let mut chunker = BlockChunker::new();
        chunker.append("```python\nprint(1)\n");
        assert_eq!(chunker.drain(false), None);
        assert_eq!(chunker.drain(true), Some("```python\nprint(1)\n"));
        assert!(!chunker.has_buffered());
    }

    #[test]
    fn incremental_snapshots_commit_only_new_text() {
        let mut chunker = BlockChunker::new();
        chunker.append("Hello");
        assert_eq!(chunker.drain(false), Some("Hello"));
        chunker.append("Hello world");
        assert_eq!(chunker.drain(false), Some(" world"));
        assert_eq!(chunker.committed(), "Hello world");
    }

    #[test]
    fn non_monotonic_input_resets_baseline() {
        let mut chunker = BlockChunker::new();
        chunker.append("Hello");
        assert_eq!(chunker.drain(false), Some("Hello"));

        let outcome = chunker.append("Hi there");
        assert!(outcome.resynced);
        assert_eq!(chunker.drain(true), Some("Hi there"));
        assert_eq!(chunker.committed(), "Hi there");
    }

    #[test]
    fn monotonic_extension_is_not_a_resync() {
        let mut chunker = BlockChunker::new();
        chunker.append("Hi");
        assert!(!chunker.append("Hi there").resynced);
    }

    #[test]
    fn reset_discards_without_emitting() {
        let mut chunker = BlockChunker::new();
        chunker.append("pending text");
        chunker.reset();
        assert_eq!(chunker.drain(true), None);
        assert_eq!(chunker.committed(), "");
    }

    #[test]
    fn reopened_fence_withholds_again() {
        let mut chunker = BlockChunker::new();
        chunker.append("a\n```\ncode\n```\nb\n```\nmore");
        assert_eq!(chunker.drain(false), Some("a\n```\ncode\n```\nb\n"));
        chunker.append("a\n```\ncode\n```\nb\n```\nmore\n```\n");
        assert_eq!(chunker.drain(false), Some("```\nmore\n```\n"));
    }
}

//! Sentence-aware splitting of documents into overlapping, content-addressed
//! chunks.
//!
//! Sizes are soft limits counted in characters: a chunk never breaks inside a
//! sentence, so a single sentence longer than the limit becomes a chunk of its
//! own.

use lore_index::Chunk;

use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

/// Per-call replacements for the configured chunk size and overlap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOverrides {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    #[must_use]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily split `text` into chunks for `source` in `knowledge_base`.
    ///
    /// The same inputs always produce the same chunks, ids and hashes.
    #[must_use]
    pub fn chunk(
        &self,
        knowledge_base: &str,
        source: &str,
        text: &str,
        tags: &[String],
        overrides: ChunkOverrides,
    ) -> Chunks {
        let normalized = text.replace('\r', "");
        let sentences: Vec<Sentence> = split_sentences(normalized.trim())
            .map(|s| Sentence {
                chars: s.chars().count(),
                text: s.to_owned(),
            })
            .collect();

        Chunks {
            sentences: sentences.into_iter(),
            buffer: Vec::new(),
            buffer_len: 0,
            position: 0,
            chunk_size: overrides.chunk_size.unwrap_or(self.chunk_size).max(1),
            chunk_overlap: overrides.chunk_overlap.unwrap_or(self.chunk_overlap),
            knowledge_base: knowledge_base.to_owned(),
            source: source.to_owned(),
            tags: tags.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
struct Sentence {
    text: String,
    chars: usize,
}

/// Iterator over the chunks of one document, in source order.
#[derive(Debug, Clone)]
pub struct Chunks {
    sentences: std::vec::IntoIter<Sentence>,
    buffer: Vec<Sentence>,
    /// Sum of `chars + 1` over the buffered sentences.
    buffer_len: usize,
    position: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    knowledge_base: String,
    source: String,
    tags: Vec<String>,
}

impl Chunks {
    fn emit(&mut self) -> Chunk {
        let text = self
            .buffer
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_owned();
        let hash = content_hash(&text);
        let chunk = Chunk {
            id: hash.clone(),
            knowledge_base: self.knowledge_base.clone(),
            source: self.source.clone(),
            position: self.position,
            text,
            vector: None,
            tags: self.tags.clone(),
            content_hash: hash,
        };
        self.position += 1;
        chunk
    }

    /// Keep the trailing whole sentences of the emitted buffer that fit in the
    /// overlap window.
    fn seed_overlap(&mut self) {
        if self.chunk_overlap == 0 {
            self.buffer.clear();
            self.buffer_len = 0;
            return;
        }

        let mut kept = 0;
        let mut overlap_chars = 0;
        for sentence in self.buffer.iter().rev() {
            if overlap_chars + sentence.chars > self.chunk_overlap {
                break;
            }
            overlap_chars += sentence.chars + 1;
            kept += 1;
        }
        let start = self.buffer.len() - kept;
        self.buffer.drain(..start);
        self.buffer_len = overlap_chars;
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        while let Some(sentence) = self.sentences.next() {
            let candidate = self.buffer_len + sentence.chars + 1;
            let emitted = if candidate > self.chunk_size && !self.buffer.is_empty() {
                let chunk = self.emit();
                self.seed_overlap();
                Some(chunk)
            } else {
                None
            };

            self.buffer_len += sentence.chars + 1;
            self.buffer.push(sentence);

            if emitted.is_some() {
                return emitted;
            }
        }

        if self.buffer.is_empty() {
            return None;
        }
        let chunk = self.emit();
        self.buffer.clear();
        self.buffer_len = 0;
        Some(chunk)
    }
}

/// Lowercase hex blake3 digest of `text`.
#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Split after `.`, `!` or `?` when followed by whitespace, consuming the
/// whitespace run. Pieces are trimmed and empty pieces skipped.
pub(crate) fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        if !chars.peek().is_some_and(|(_, next)| next.is_whitespace()) {
            continue;
        }
        pieces.push(&text[start..end]);
        start = end;
        while let Some((j, next)) = chars.peek().copied() {
            if !next.is_whitespace() {
                break;
            }
            start = j + next.len_utf8();
            chars.next();
        }
    }
    pieces.push(&text[start..]);

    pieces.into_iter().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(chunker: &Chunker, text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
        chunker
            .chunk(
                "kb",
                "doc.txt",
                text,
                &[],
                ChunkOverrides {
                    chunk_size: Some(size),
                    chunk_overlap: Some(overlap),
                },
            )
            .collect()
    }

    #[test]
    fn splits_on_terminators_followed_by_whitespace() {
        let parts: Vec<_> = split_sentences("One. Two!  Three?\nFour").collect();
        assert_eq!(parts, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn terminator_without_whitespace_does_not_split() {
        let parts: Vec<_> = split_sentences("Version 1.2 is out. See v2.0.1 notes").collect();
        assert_eq!(parts, vec!["Version 1.2 is out.", "See v2.0.1 notes"]);
    }

    #[test]
    fn trailing_terminator_and_whitespace() {
        let parts: Vec<_> = split_sentences("Done.   ").collect();
        assert_eq!(parts, vec!["Done."]);
    }

    #[test]
    fn empty_and_whitespace_text_yield_nothing() {
        let chunker = Chunker::default();
        assert!(collect(&chunker, "", 50, 10).is_empty());
        assert!(collect(&chunker, " \r\n\t ", 50, 10).is_empty());
    }

    #[test]
    fn portuguese_scenario_respects_soft_bound() {
        let text = "Esta é a primeira frase. Esta é a segunda frase mais longa. Terceira frase aqui.";
        let chunker = Chunker::default();
        let chunks: Vec<Chunk> = chunker
            .chunk(
                "kb-test",
                "doc.txt",
                text,
                &[],
                ChunkOverrides {
                    chunk_size: Some(50),
                    chunk_overlap: Some(10),
                },
            )
            .collect();

        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].knowledge_base, "kb-test");
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 80));
    }

    #[test]
    fn identical_input_produces_identical_chunk() {
        let chunker = Chunker::default();
        let a = collect(&chunker, "Linha 1. Linha 2. Linha 3.", 80, 0);
        let b = collect(&chunker, "Linha 1. Linha 2. Linha 3.", 80, 0);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].id, b[0].id);
        assert_eq!(a[0].content_hash, b[0].content_hash);
        assert_eq!(a[0].id, a[0].content_hash);
        assert_eq!(a[0].text, "Linha 1. Linha 2. Linha 3.");
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let chunker = Chunker::default();
        let unix = collect(&chunker, "First line.\nSecond line.", 800, 0);
        let dos = collect(&chunker, "First line.\r\nSecond line.", 800, 0);
        assert_eq!(unix[0].content_hash, dos[0].content_hash);
    }

    #[test]
    fn oversized_sentence_is_emitted_whole() {
        let long = "a".repeat(120) + ".";
        let text = format!("Short one. {long} Tail.");
        let chunks = collect(&Chunker::default(), &text, 50, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, long);
    }

    #[test]
    fn overlap_repeats_trailing_sentences() {
        let text = "Alpha one. Beta two. Gamma three. Delta four.";
        let chunks = collect(&Chunker::default(), text, 25, 12);
        assert_eq!(chunks[0].text, "Alpha one. Beta two.");
        assert!(chunks[1].text.starts_with("Beta two."));
    }

    #[test]
    fn zero_overlap_has_no_repetition() {
        let text = "Alpha one. Beta two. Gamma three. Delta four.";
        let chunks = collect(&Chunker::default(), text, 25, 0);
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(joined, text);
    }

    #[test]
    fn positions_are_sequential_and_tags_copied() {
        let tags = vec!["hr".to_owned(), "policy".to_owned()];
        let text = "One sentence here. Another sentence there. A third one follows.";
        let chunks: Vec<Chunk> = Chunker::new(20, 0)
            .chunk("kb", "a/b.md", text, &tags, ChunkOverrides::default())
            .collect();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
            assert_eq!(chunk.tags, tags);
            assert_eq!(chunk.source, "a/b.md");
            assert!(chunk.vector.is_none());
        }
    }

    #[test]
    fn overrides_fall_back_to_configured_values() {
        let chunker = Chunker::new(20, 0);
        let text = "One sentence here. Another sentence there.";
        let defaulted: Vec<Chunk> = chunker
            .chunk("kb", "s", text, &[], ChunkOverrides::default())
            .collect();
        let widened: Vec<Chunk> = chunker
            .chunk(
                "kb",
                "s",
                text,
                &[],
                ChunkOverrides {
                    chunk_size: Some(800),
                    chunk_overlap: None,
                },
            )
            .collect();
        assert_eq!(defaulted.len(), 2);
        assert_eq!(widened.len(), 1);
    }

    #[test]
    fn iterator_is_restartable_by_clone() {
        let chunks = Chunker::new(20, 5).chunk(
            "kb",
            "s",
            "One sentence here. Another sentence there. Third.",
            &[],
            ChunkOverrides::default(),
        );
        let first: Vec<Chunk> = chunks.clone().collect();
        let second: Vec<Chunk> = chunks.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = content_hash("abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    fn sentence_strategy() -> impl Strategy<Value = String> {
        ("[A-Za-zçãé]{1,12}( [a-z0-9]{1,10}){0,8}", prop::sample::select(vec!['.', '!', '?']))
            .prop_map(|(body, end)| format!("{body}{end}"))
    }

    fn document_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(sentence_strategy(), 1..30)
    }

    proptest! {
        #[test]
        fn chunking_never_panics(text in "\\PC{0,400}", size in 1usize..200, overlap in 0usize..100) {
            let _ = collect(&Chunker::default(), &text, size, overlap);
        }

        #[test]
        fn chunking_is_deterministic(text in "\\PC{0,400}", size in 1usize..200, overlap in 0usize..100) {
            let a = collect(&Chunker::default(), &text, size, overlap);
            let b = collect(&Chunker::default(), &text, size, overlap);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn chunks_are_whole_sentence_windows(sentences in document_strategy(), size in 1usize..200, overlap in 0usize..100) {
            let text = sentences.join(" ");
            let chunks = collect(&Chunker::default(), &text, size, overlap);
            for chunk in &chunks {
                let parts: Vec<String> = split_sentences(&chunk.text).map(str::to_owned).collect();
                prop_assert!(sentences.windows(parts.len()).any(|w| w == parts.as_slice()));
            }
        }

        #[test]
        fn every_sentence_is_covered(sentences in document_strategy(), size in 1usize..200, overlap in 0usize..100) {
            let text = sentences.join(" ");
            let chunks = collect(&Chunker::default(), &text, size, overlap);
            let covered: Vec<String> = chunks
                .iter()
                .flat_map(|c| split_sentences(&c.text).map(str::to_owned).collect::<Vec<_>>())
                .collect();
            for sentence in &sentences {
                prop_assert!(covered.contains(sentence));
            }
            prop_assert_eq!(chunks.first().map(|c| c.text.starts_with(&sentences[0])), Some(true));
            let last = sentences.last().unwrap();
            prop_assert_eq!(chunks.last().map(|c| c.text.ends_with(last.as_str())), Some(true));
        }

        #[test]
        fn soft_size_bound(sentences in document_strategy(), size in 1usize..200, overlap in 0usize..100) {
            let text = sentences.join(" ");
            let longest = sentences.iter().map(|s| s.chars().count()).max().unwrap_or(0);
            let bound = size.max(overlap + 1 + longest);
            for chunk in collect(&Chunker::default(), &text, size, overlap) {
                prop_assert!(chunk.text.chars().count() <= bound);
            }
        }

        #[test]
        fn positions_count_up_from_zero(sentences in document_strategy(), size in 1usize..200) {
            let text = sentences.join(" ");
            let chunks = collect(&Chunker::default(), &text, size, 0);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.position, i);
                prop_assert_eq!(&chunk.id, &chunk.content_hash);
            }
        }
    }
}

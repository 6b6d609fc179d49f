/// One token-bounded chunk produced by a `TextPipeline`, before it has been
/// assigned a `DocId` by the `MetadataStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub text: String,
}

/// Normalizes, translates, tokenizes and strips markup from raw provider
/// content, producing a lazy sequence of token-bounded chunks.
///
/// Treated as an opaque collaborator. The reference implementation below
/// performs char-budgeted whitespace chunking with a minimal URL-placeholder
/// round trip, enough to exercise the indexing core's chunk-id assignment
/// and insertion path in tests without a real NLP stack.
pub trait TextPipeline: Send + Sync + 'static {
    fn chunk(&self, raw_text: &str, token_limit: usize) -> Vec<RawChunk>;
}

#[derive(Default)]
pub struct WhitespaceChunkingPipeline;

impl TextPipeline for WhitespaceChunkingPipeline {
    fn chunk(&self, raw_text: &str, token_limit: usize) -> Vec<RawChunk> {
        let (placeholdered, urls) = placeholder_urls(raw_text);

        let mut chunks = Vec::new();
        let mut current = String::new();

        for word in placeholdered.split_whitespace() {
            let addition = if current.is_empty() { word.len() } else { word.len() + 1 };
            if !current.is_empty() && current.len() + addition > token_limit {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .map(|text| RawChunk { text: restore_urls(&text, &urls) })
            .collect()
    }
}

/// Replaces `http(s)://` tokens with `{{URL_n}}` placeholders so chunk
/// boundaries never split a URL, returning the extracted URLs in order.
fn placeholder_urls(text: &str) -> (String, Vec<String>) {
    let mut urls = Vec::new();
    let replaced = text
        .split_whitespace()
        .map(|word| {
            if word.starts_with("http://") || word.starts_with("https://") {
                urls.push(word.to_string());
                format!("{{{{URL_{}}}}}", urls.len() - 1)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    (replaced, urls)
}

fn restore_urls(text: &str, urls: &[String]) -> String {
    let mut out = text.to_string();
    for (i, url) in urls.iter().enumerate() {
        out = out.replace(&format!("{{{{URL_{}}}}}", i), url);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_the_token_limit() {
        let pipeline = WhitespaceChunkingPipeline;
        let text = "one two three four five six seven eight nine ten";
        let chunks = pipeline.chunk(text, 12);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 12 || !chunk.text.contains(' '));
        }
    }

    #[test]
    fn urls_survive_chunking_intact() {
        let pipeline = WhitespaceChunkingPipeline;
        let text = "see https://example.com/path for details";
        let chunks = pipeline.chunk(text, 1000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("https://example.com/path"));
    }
}

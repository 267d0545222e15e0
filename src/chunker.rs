/// Splits text into chunks of at most `max_words` words at line boundaries.
///
/// Lines are accumulated into the running chunk while the combined word count
/// stays within `max_words`. A single line longer than `max_words` becomes a
/// chunk of its own rather than being split mid-line.
pub fn split_into_chunks(text: &str, max_words: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();
    let mut current_words = 0;

    for paragraph in text.lines() {
        let paragraph = paragraph.trim();
        let paragraph_words = word_count(paragraph);

        if current_words + paragraph_words > max_words && current_words > 0 {
            chunks.push(current_chunk.trim().to_string());
            current_chunk.clear();
            current_words = 0;
        }

        if paragraph.is_empty() {
            continue;
        }
        if !current_chunk.is_empty() {
            current_chunk.push(' ');
        }
        current_chunk.push_str(paragraph);
        current_words += paragraph_words;
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraphs(text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_short_paragraphs_share_a_chunk() {
        let text = "Apples are red fruits.\nCars need fuel to run.";
        let chunks = split_into_chunks(text, 500);
        assert_eq!(chunks, vec!["Apples are red fruits. Cars need fuel to run."]);
    }

    #[test]
    fn test_chunks_respect_word_limit() {
        let text = (0..40)
            .map(|i| format!("line {i} has five words"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_into_chunks(&text, 12);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| word_count(chunk) <= 12));
        // two five-word lines fit, a third does not
        assert_eq!(word_count(&chunks[0]), 10);
    }

    #[test]
    fn test_oversized_paragraph_stands_alone() {
        let long = vec!["word"; 30].join(" ");
        let text = format!("short one\n{long}\nshort two");
        let chunks = split_into_chunks(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "short one");
        assert_eq!(word_count(&chunks[1]), 30);
        assert_eq!(chunks[2], "short two");
    }

    #[test]
    fn test_leading_oversized_paragraph_has_no_empty_chunk() {
        let long = vec!["word"; 8].join(" ");
        let chunks = split_into_chunks(&long, 3);
        assert_eq!(chunks, vec![long]);
    }

    #[test]
    fn test_reconstructs_paragraph_sequence() {
        let text = "First paragraph here.\n\n  Second one, indented.\nThird\n\nFourth and final paragraph of text.";
        for max_words in [1, 3, 5, 100] {
            let chunks = split_into_chunks(text, max_words);
            let rejoined = chunks.join(" ");
            let expected = paragraphs(text).join(" ");
            assert_eq!(rejoined, expected, "max_words = {max_words}");
        }
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(split_into_chunks("", 10).is_empty());
        assert!(split_into_chunks("\n  \n\t\n", 10).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta\nGamma delta epsilon\nZeta\nEta theta iota kappa";
        assert_eq!(split_into_chunks(text, 4), split_into_chunks(text, 4));
    }
}

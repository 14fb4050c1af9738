//! Inverted index: for every word, the documents it appears in.

use std::collections::BTreeSet;

use crate::mr::app::KeyValue;
use crate::mrapps::wc::split_to_words;

pub fn map(document: &str, contents: &str) -> Vec<KeyValue> {
    let words: BTreeSet<String> = split_to_words(contents).into_iter().collect();
    words
        .into_iter()
        .map(|word| new_kv!(word, document))
        .collect()
}

/// Emits `<count> <doc>,<doc>,...` with the documents sorted.
pub fn reduce(_: &str, values: &[String]) -> String {
    let documents: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    let listed: Vec<&str> = documents.into_iter().collect();
    format!("{} {}", listed.len(), listed.join(","))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_map_emits_each_word_once_per_document() {
        let kvs = map("pg-1.txt", "to be or not to be");
        let keys: Vec<&str> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["be", "not", "or", "to"]);
        assert!(kvs.iter().all(|kv| kv.value == "pg-1.txt"));
    }

    #[test]
    fn test_reduce_sorts_and_dedups_documents() {
        let values = vec![
            "b.txt".to_string(),
            "a.txt".to_string(),
            "b.txt".to_string(),
        ];
        assert_eq!(reduce("word", &values), "2 a.txt,b.txt");
    }
}

//! Word count: every word of the input is emitted with a count of one,
//! and the reduce side adds them up.

use crate::mr::app::KeyValue;

pub fn map(_: &str, contents: &str) -> Vec<KeyValue> {
    split_to_words(contents)
        .into_iter()
        .fold(vec![], |mut acc, wrd| {
            acc.push(new_kv!(wrd, "1"));
            acc
        })
}

pub fn reduce(_: &str, values: &[String]) -> String {
    values.len().to_string()
}

// split_to_words treats punctuations and whitespaces as the delimiter and
// split input string into words.
pub(crate) fn split_to_words(line: &str) -> Vec<String> {
    let mut ret = vec![];
    let mut word = String::new();
    for c in line.chars() {
        if c.is_alphabetic() {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            ret.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        ret.push(word);
    }
    ret
}

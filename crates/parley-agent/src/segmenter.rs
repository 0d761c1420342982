//! Incremental sentence segmentation of a streamed reply.
//!
//! Text arrives in fragments of arbitrary size. A unit is everything up to and
//! including the next terminator mark; whatever follows stays buffered until
//! more text arrives or the stream ends.

use parley_core::config::DEFAULT_TERMINATORS;

pub struct SentenceSegmenter {
    terminators: Vec<char>,
    buffer: String,
    /// Byte length of the buffer prefix known to hold no terminator.
    scanned: usize,
}

impl SentenceSegmenter {
    pub fn new(terminators: impl IntoIterator<Item = char>) -> Self {
        Self {
            terminators: terminators.into_iter().collect(),
            buffer: String::new(),
            scanned: 0,
        }
    }

    /// Append a fragment and iterate the units it completes.
    ///
    /// Units are produced lazily. Any not pulled from the iterator remain
    /// buffered and come out of the next `feed` or `flush`.
    pub fn feed(&mut self, fragment: &str) -> Units<'_> {
        self.buffer.push_str(fragment);
        Units { segmenter: self }
    }

    /// Take the remainder at end of stream.
    ///
    /// Returns `None` when the remainder is empty or only whitespace.
    pub fn flush(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        Some(rest)
    }

    /// Text received but not yet emitted as a unit.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn next_unit(&mut self) -> Option<String> {
        let found = self.buffer[self.scanned..]
            .char_indices()
            .find(|(_, c)| self.terminators.contains(c));

        match found {
            Some((offset, mark)) => {
                let end = self.scanned + offset + mark.len_utf8();
                self.scanned = 0;
                Some(self.buffer.drain(..end).collect())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATORS.chars())
    }
}

/// Units completed by one [`SentenceSegmenter::feed`] call.
pub struct Units<'a> {
    segmenter: &'a mut SentenceSegmenter,
}

impl Iterator for Units<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.segmenter.next_unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(fragments: &[&str]) -> Vec<String> {
        let mut segmenter = SentenceSegmenter::default();
        let mut units = Vec::new();
        for fragment in fragments {
            units.extend(segmenter.feed(fragment));
        }
        units.extend(segmenter.flush());
        units
    }

    fn chars_of(text: &str) -> Vec<String> {
        text.chars().map(String::from).collect()
    }

    #[test]
    fn test_whole_and_per_char_feeds_agree() {
        let whole = segment(&["你好，世界！"]);
        let fragments = chars_of("你好，世界！");
        let per_char = segment(&fragments.iter().map(String::as_str).collect::<Vec<_>>());

        assert_eq!(whole, vec!["你好，", "世界！"]);
        assert_eq!(per_char, whole);
    }

    #[test]
    fn test_concatenation_invariant_under_any_split() {
        let text = "Hi, there. 今天天气怎么样？还不错；走吧!  then a tail";
        let chars: Vec<char> = text.chars().collect();

        for split in 1..chars.len() {
            let head: String = chars[..split].iter().collect();
            let tail: String = chars[split..].iter().collect();
            let units = segment(&[&head, &tail]);
            assert_eq!(units.concat(), text, "split at {split}");
        }
    }

    #[test]
    fn test_each_unit_ends_with_one_terminator() {
        let units = segment(&["一，二。", "三！四？", "五；六"]);
        assert_eq!(units, vec!["一，", "二。", "三！", "四？", "五；", "六"]);

        let terminators: Vec<char> = DEFAULT_TERMINATORS.chars().collect();
        for pair in units.windows(2) {
            let last = pair[0].chars().last().unwrap();
            assert!(terminators.contains(&last));
            assert!(!pair[0][..pair[0].len() - last.len_utf8()].contains(&terminators[..]));
            assert!(!pair[1].starts_with(&terminators[..]));
        }
    }

    #[test]
    fn test_consecutive_marks_are_separate_units() {
        let units = segment(&["真的？！"]);
        assert_eq!(units, vec!["真的？", "！"]);
    }

    #[test]
    fn test_unterminated_text_waits_for_more() {
        let mut segmenter = SentenceSegmenter::default();
        assert_eq!(segmenter.feed("hello").count(), 0);
        assert_eq!(segmenter.feed(" world").count(), 0);
        assert_eq!(segmenter.pending(), "hello world");

        let units: Vec<String> = segmenter.feed(". next").collect();
        assert_eq!(units, vec!["hello world."]);
        assert_eq!(segmenter.pending(), " next");
    }

    #[test]
    fn test_unpulled_units_stay_buffered() {
        let mut segmenter = SentenceSegmenter::default();
        let first = segmenter.feed("a,b,").next();
        assert_eq!(first.as_deref(), Some("a,"));
        assert_eq!(segmenter.pending(), "b,");

        let units: Vec<String> = segmenter.feed("c").collect();
        assert_eq!(units, vec!["b,"]);
        assert_eq!(segmenter.flush().as_deref(), Some("c"));
    }

    #[test]
    fn test_flush_suppresses_blank_remainder() {
        let mut segmenter = SentenceSegmenter::default();
        assert_eq!(segmenter.flush(), None);

        assert_eq!(segmenter.feed("好。 \n").count(), 1);
        assert_eq!(segmenter.flush(), None);
        assert_eq!(segmenter.pending(), "");
    }

    #[test]
    fn test_custom_terminators() {
        let mut segmenter = SentenceSegmenter::new(['|']);
        let units: Vec<String> = segmenter.feed("a, b|c. d|").collect();
        assert_eq!(units, vec!["a, b|", "c. d|"]);
    }
}

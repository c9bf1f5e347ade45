//! Finding persisted highlight text in a sequence of text segments.
//!
//! Kept free of any document type so the search can be reasoned about (and
//! tested) on plain strings.

/// One text node's content in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a, Id> {
    pub id: Id,
    pub text: &'a str,
    /// Already inside a mark of the same attempt.
    pub marked: bool,
}

/// Byte span inside one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<Id> {
    pub id: Id,
    pub start: usize,
    pub end: usize,
}

/// First occurrence of `needle` in the unmarked text.
///
/// Consecutive unmarked segments are searched as one string, so a match may
/// cross node boundaries; marked segments break the text. Returns the
/// covered span of every segment the match touches, in order.
pub fn locate_first<Id: Copy>(segments: &[Segment<'_, Id>], needle: &str) -> Option<Vec<Span<Id>>> {
    if needle.is_empty() {
        return None;
    }

    let mut index = 0;
    while index < segments.len() {
        if segments[index].marked {
            index += 1;
            continue;
        }
        let run_end = segments[index..]
            .iter()
            .position(|s| s.marked)
            .map(|offset| index + offset)
            .unwrap_or(segments.len());

        if let Some(spans) = locate_in_run(&segments[index..run_end], needle) {
            return Some(spans);
        }
        index = run_end;
    }
    None
}

fn locate_in_run<Id: Copy>(run: &[Segment<'_, Id>], needle: &str) -> Option<Vec<Span<Id>>> {
    let mut joined = String::new();
    let mut starts = Vec::with_capacity(run.len());
    for segment in run {
        starts.push(joined.len());
        joined.push_str(segment.text);
    }

    let hit_start = joined.find(needle)?;
    let hit_end = hit_start + needle.len();

    let spans = run
        .iter()
        .zip(starts)
        .filter_map(|(segment, seg_start)| {
            let seg_end = seg_start + segment.text.len();
            let start = hit_start.max(seg_start);
            let end = hit_end.min(seg_end);
            (start < end).then(|| Span {
                id: segment.id,
                start: start - seg_start,
                end: end - seg_start,
            })
        })
        .collect();
    Some(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: u32, text: &str, marked: bool) -> Segment<'_, u32> {
        Segment { id, text, marked }
    }

    #[test]
    fn finds_match_inside_single_segment() {
        let segments = [seg(1, "The blue whale is large", false)];
        let spans = locate_first(&segments, "whale").unwrap();
        assert_eq!(spans, vec![Span { id: 1, start: 9, end: 14 }]);
    }

    #[test]
    fn skips_marked_occurrences() {
        let segments = [
            seg(1, "cats and ", false),
            seg(2, "cats", true),
            seg(3, " and more cats", false),
        ];
        let spans = locate_first(&segments, "cats").unwrap();
        assert_eq!(spans, vec![Span { id: 1, start: 0, end: 4 }]);

        let segments = [seg(1, "cats", true), seg(2, " and more cats", false)];
        let spans = locate_first(&segments, "cats").unwrap();
        assert_eq!(spans, vec![Span { id: 2, start: 10, end: 14 }]);
    }

    #[test]
    fn match_may_cross_unmarked_segments() {
        let segments = [seg(1, "the bl", false), seg(2, "ue wh", false), seg(3, "ale", false)];
        let spans = locate_first(&segments, "blue whale").unwrap();
        assert_eq!(
            spans,
            vec![
                Span { id: 1, start: 4, end: 6 },
                Span { id: 2, start: 0, end: 5 },
                Span { id: 3, start: 0, end: 3 },
            ]
        );
    }

    #[test]
    fn marked_segment_breaks_a_match() {
        let segments = [seg(1, "blue ", false), seg(2, "whale", true)];
        assert!(locate_first(&segments, "blue whale").is_none());
    }

    #[test]
    fn empty_needle_and_missing_text_find_nothing() {
        let segments = [seg(1, "text", false)];
        assert!(locate_first(&segments, "").is_none());
        assert!(locate_first(&segments, "absent").is_none());
        assert!(locate_first::<u32>(&[], "text").is_none());
    }
}

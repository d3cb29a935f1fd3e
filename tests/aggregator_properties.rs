// tests/aggregator_properties.rs

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::Value;

use devfleet::logs::{LogAggregator, LogEntry};

/// Split `text` at the given (ASCII) offsets.
fn split_at_offsets(text: &str, cuts: &[Index]) -> Vec<String> {
    let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(text.len() + 1)).collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for offset in offsets {
        chunks.push(text[start..offset].to_string());
        start = offset;
    }
    chunks.push(text[start..].to_string());
    chunks
}

fn payloads(entries: &[LogEntry]) -> Vec<Value> {
    entries
        .iter()
        .filter_map(|e| e.parsed_payload.clone())
        .collect()
}

fn object_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    // Values deliberately contain braces and quotes.
    proptest::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 {}\"]{0,12}", 1..6)
}

proptest! {
    #[test]
    fn pretty_json_survives_any_chunking(
        object in object_strategy(),
        cuts in proptest::collection::vec(any::<Index>(), 0..10),
    ) {
        let text = serde_json::to_string_pretty(&object).unwrap();
        let expected = serde_json::to_value(&object).unwrap();

        let mut agg = LogAggregator::new();
        let mut entries = Vec::new();
        for chunk in split_at_offsets(&text, &cuts) {
            entries.extend(agg.feed("api", &chunk));
        }
        entries.extend(agg.feed("api", "\n"));

        prop_assert_eq!(entries.len(), 1);
        prop_assert!(entries[0].is_json);
        prop_assert_eq!(payloads(&entries), vec![expected]);
        prop_assert!(!agg.has_open_buffer("api"));
    }

    #[test]
    fn interleaved_services_do_not_mix(
        left in object_strategy(),
        right in object_strategy(),
        cuts in proptest::collection::vec(any::<Index>(), 0..6),
    ) {
        let left_text = serde_json::to_string_pretty(&left).unwrap();
        let right_text = serde_json::to_string_pretty(&right).unwrap();
        let left_chunks = split_at_offsets(&left_text, &cuts);
        let right_chunks = split_at_offsets(&right_text, &cuts);

        let mut agg = LogAggregator::new();
        let mut web = Vec::new();
        let mut api = Vec::new();
        for i in 0..left_chunks.len().max(right_chunks.len()) {
            if let Some(chunk) = left_chunks.get(i) {
                web.extend(agg.feed("web", chunk));
            }
            if let Some(chunk) = right_chunks.get(i) {
                api.extend(agg.feed("api", chunk));
            }
        }

        prop_assert_eq!(payloads(&web), vec![serde_json::to_value(&left).unwrap()]);
        prop_assert_eq!(payloads(&api), vec![serde_json::to_value(&right).unwrap()]);
        prop_assert!(web.iter().chain(api.iter()).all(|e| e.line.is_none()));
    }

    #[test]
    fn plain_lines_pass_through_in_order(
        lines in proptest::collection::vec("[a-zA-Z0-9][a-zA-Z0-9 ]{0,20}", 1..8),
    ) {
        let mut agg = LogAggregator::new();
        let text = lines.join("\n") + "\n";
        let entries = agg.feed("web", &text);

        let got: Vec<String> = entries.iter().filter_map(|e| e.line.clone()).collect();
        let want: Vec<String> = lines.iter().map(|l| l.trim().to_string()).collect();
        prop_assert_eq!(got, want);
    }
}

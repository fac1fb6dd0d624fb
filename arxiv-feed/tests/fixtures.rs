use pretty_assertions::assert_eq;

use arxiv_feed::{parse_feed, Entry};

#[test]
fn fixtures_match_expected_output() {
    let cases = [
        (
            "search-results",
            include_str!("fixtures/xml/search-results.xml"),
            include_str!("fixtures/expected/search-results.json"),
        ),
        (
            "id-list",
            include_str!("fixtures/xml/id-list.xml"),
            include_str!("fixtures/expected/id-list.json"),
        ),
    ];

    for (name, xml, expected) in cases {
        let actual = parse_feed(xml).unwrap_or_else(|err| panic!("{name}: {err}"));
        let expected: Vec<Entry> =
            serde_json::from_str(expected).unwrap_or_else(|err| panic!("{name}: {err}"));
        assert_eq!(actual, expected, "fixture mismatch: {name}");
    }
}

#[test]
fn short_ids_follow_feed_order() {
    let entries = parse_feed(include_str!("fixtures/xml/id-list.xml")).expect("parse");
    let ids: Vec<&str> = entries.iter().map(Entry::short_id).collect();
    assert_eq!(ids, vec!["hep-th/9901001", "0704.0002"]);
}

use feedbox_core::db::open_db_in_memory;
use feedbox_core::model::entry::{Content, Enclosure, Entry, EntryFilter, EntryUpdate};
use feedbox_core::model::highlight::{HighlightSpan, HighlightedString};
use feedbox_core::repo::{
    EntryRepository, FeedRepository, SqliteEntryRepository, SqliteFeedRepository,
};
use feedbox_core::search::{
    disable, enable, is_enabled, search_entries, update_index, SearchError,
};
use rusqlite::Connection;

const T0: i64 = 1_700_000_000_000;

fn add_feed(conn: &Connection, url: &str, title: Option<&str>) {
    let repo = SqliteFeedRepository::new(conn);
    repo.add_feed(url, T0).unwrap();
    if let Some(title) = title {
        conn.execute(
            "UPDATE feeds SET title = :title WHERE url = :url;",
            rusqlite::named_params! { ":title": title, ":url": url },
        )
        .unwrap();
    }
}

fn add_entry(
    conn: &Connection,
    feed_url: &str,
    id: &str,
    title: Option<&str>,
    summary: Option<&str>,
    content: &[&str],
) {
    let repo = SqliteEntryRepository::new(conn);
    let mut entry = Entry::new(feed_url, id, T0);
    entry.title = title.map(str::to_string);
    entry.summary = summary.map(str::to_string);
    entry.content = content.iter().map(|value| Content::new(*value)).collect();

    let order: i64 = conn
        .query_row(
            "SELECT count(*) FROM entries WHERE feed = :feed;",
            rusqlite::named_params! { ":feed": feed_url },
            |row| row.get(0),
        )
        .unwrap();

    repo.upsert_entries(
        &[EntryUpdate {
            entry,
            last_updated: T0,
            first_updated: T0,
            feed_order: order,
        }],
        0,
    )
    .unwrap();
}

fn search_keys(conn: &Connection, query: &str, filter: &EntryFilter) -> Vec<(String, String)> {
    search_entries(conn, query, filter)
        .unwrap()
        .into_iter()
        .map(|result| (result.feed_url, result.id))
        .collect()
}

fn span(start: usize, stop: usize) -> HighlightSpan {
    HighlightSpan::new(start, stop)
}

#[test]
fn search_is_disabled_by_default() {
    let conn = open_db_in_memory().unwrap();
    assert!(!is_enabled(&conn).unwrap());
}

#[test]
fn enable_and_disable_are_idempotent() {
    let conn = open_db_in_memory().unwrap();

    enable(&conn).unwrap();
    assert!(is_enabled(&conn).unwrap());
    enable(&conn).unwrap();
    assert!(is_enabled(&conn).unwrap());

    disable(&conn).unwrap();
    assert!(!is_enabled(&conn).unwrap());
    disable(&conn).unwrap();
    assert!(!is_enabled(&conn).unwrap());
}

#[test]
fn update_index_fails_while_disabled() {
    let conn = open_db_in_memory().unwrap();
    let err = update_index(&conn, 0).unwrap_err();
    assert!(matches!(err, SearchError::NotEnabled));
}

#[test]
fn search_fails_while_disabled() {
    let conn = open_db_in_memory().unwrap();
    let err = search_entries(&conn, "one", &EntryFilter::default()).unwrap_err();
    assert!(matches!(err, SearchError::NotEnabled));
}

#[test]
fn empty_query_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    enable(&conn).unwrap();
    let err = search_entries(&conn, "   ", &EntryFilter::default()).unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery { .. }));
}

#[test]
fn broken_fts_syntax_is_an_invalid_query() {
    let conn = open_db_in_memory().unwrap();
    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();
    let err = search_entries(&conn, "\"unterminated", &EntryFilter::default()).unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery { .. }));
}

#[test]
fn search_before_update_finds_nothing() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "one", Some("one"), None, &[]);

    enable(&conn).unwrap();
    assert!(search_entries(&conn, "one", &EntryFilter::default())
        .unwrap()
        .is_empty());
}

#[test]
fn search_basic_metadata_and_content_highlights() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "one", Some("one"), None, &[]);
    add_entry(&conn, "http://f1", "two", Some("two"), Some("summary"), &[]);
    add_entry(
        &conn,
        "http://f1",
        "three",
        Some("shall not be named"),
        Some("does not match"),
        &["three content"],
    );

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    assert!(search_entries(&conn, "zero", &EntryFilter::default())
        .unwrap()
        .is_empty());

    let results = search_entries(&conn, "one", &EntryFilter::default()).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!((result.feed_url.as_str(), result.id.as_str()), ("http://f1", "one"));
    assert_eq!(
        result.metadata,
        vec![
            (
                ".title".to_string(),
                HighlightedString::new("one", vec![span(0, 3)]).unwrap(),
            ),
            (
                ".feed.title".to_string(),
                HighlightedString::plain("Feed #1"),
            ),
        ]
    );
    assert!(result.content.is_empty());

    let results = search_entries(&conn, "two", &EntryFilter::default()).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.id, "two");
    assert_eq!(
        result.field(".title"),
        Some(&HighlightedString::new("two", vec![span(0, 3)]).unwrap())
    );
    // The summary piece shares the matched row, so it is reported unhighlighted.
    assert_eq!(
        result.content,
        vec![(
            ".summary".to_string(),
            HighlightedString::plain("summary"),
        )]
    );

    let results = search_entries(&conn, "three", &EntryFilter::default()).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.id, "three");
    assert_eq!(
        result.field(".title"),
        Some(&HighlightedString::plain("shall not be named"))
    );
    assert_eq!(
        result.content,
        vec![(
            ".content[0].value".to_string(),
            HighlightedString::new("three content", vec![span(0, 5)]).unwrap(),
        )]
    );
}

#[test]
fn user_title_takes_precedence_in_the_index() {
    let conn = open_db_in_memory().unwrap();

    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "two", Some("two"), Some("summary"), &[]);

    add_feed(&conn, "http://f2", Some("Feed #2"));
    add_entry(&conn, "http://f2", "f2-entry", None, None, &[]);
    SqliteFeedRepository::new(&conn)
        .set_user_title("http://f2", Some("a summary of things"))
        .unwrap();

    add_feed(&conn, "http://f3", None);
    add_entry(&conn, "http://f3", "f3-entry", Some("entry summary"), None, &[]);

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    let results = search_entries(&conn, "summary", &EntryFilter::default()).unwrap();
    let keys: Vec<(&str, &str)> = results
        .iter()
        .map(|result| (result.feed_url.as_str(), result.id.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("http://f3", "f3-entry"),
            ("http://f2", "f2-entry"),
            ("http://f1", "two"),
        ]
    );

    // The entry-title match, highlighted; its feed has no title at all.
    assert_eq!(
        results[0].metadata,
        vec![(
            ".title".to_string(),
            HighlightedString::new("entry summary", vec![span(6, 13)]).unwrap(),
        )]
    );

    // The user-title match is reported under its own field name.
    assert_eq!(
        results[1].metadata,
        vec![(
            ".feed.user_title".to_string(),
            HighlightedString::new("a summary of things", vec![span(2, 9)]).unwrap(),
        )]
    );

    // The content match, with unmatched metadata reported plain.
    assert_eq!(
        results[2].field(".summary"),
        Some(&HighlightedString::new("summary", vec![span(0, 7)]).unwrap())
    );
}

#[test]
fn title_and_summary_beat_title_alone() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "one", Some("one"), None, &[]);
    add_entry(&conn, "http://f1", "two", Some("two"), None, &[]);
    add_entry(&conn, "http://f1", "three", Some("one"), Some("one"), &[]);

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    assert_eq!(
        search_keys(&conn, "one", &EntryFilter::default()),
        vec![
            ("http://f1".to_string(), "three".to_string()),
            ("http://f1".to_string(), "one".to_string()),
        ]
    );
}

#[test]
fn title_and_content_beat_title_alone() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "one", Some("one"), None, &[]);
    add_entry(&conn, "http://f1", "two", Some("two"), None, &[]);
    add_entry(&conn, "http://f1", "three", Some("one"), None, &["one"]);

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    assert_eq!(
        search_keys(&conn, "one", &EntryFilter::default()),
        vec![
            ("http://f1".to_string(), "three".to_string()),
            ("http://f1".to_string(), "one".to_string()),
        ]
    );
}

#[test]
fn content_pieces_rank_by_their_own_match_quality() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(
        &conn,
        "http://f1",
        "one",
        None,
        Some("word word"),
        &["word", "does not match", "word word word"],
    );

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    let results = search_entries(&conn, "word", &EntryFilter::default()).unwrap();
    assert_eq!(results.len(), 1);

    let paths: Vec<&str> = results[0]
        .content
        .iter()
        .map(|(path, _)| path.as_str())
        .collect();
    assert_eq!(
        paths,
        vec![".content[2].value", ".summary", ".content[0].value"]
    );
}

fn weights_fixture(conn: &Connection) {
    add_feed(conn, "http://f1", Some("one"));
    add_entry(conn, "http://f1", "entry-one", None, None, &[]);

    add_feed(conn, "http://f2", Some("two"));
    add_entry(conn, "http://f2", "entry-two", Some("one"), None, &[]);
    add_entry(conn, "http://f2", "entry-three", None, None, &["one"]);
    add_entry(conn, "http://f2", "entry-four", None, Some("one"), &[]);
    add_entry(conn, "http://f2", "entry-five", None, None, &["one", "one"]);
    add_entry(conn, "http://f2", "entry-six", None, Some("one"), &["one"]);
    add_entry(conn, "http://f2", "entry-seven", Some("does not match"), None, &[]);
}

#[test]
fn entry_title_beats_feed_title_beats_content() {
    let conn = open_db_in_memory().unwrap();
    weights_fixture(&conn);

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    let keys = search_keys(&conn, "one", &EntryFilter::default());
    assert_eq!(keys.len(), 6);
    assert_eq!(
        keys[..2],
        [
            ("http://f2".to_string(), "entry-two".to_string()),
            ("http://f1".to_string(), "entry-one".to_string()),
        ]
    );

    // The remaining entries match only content pieces of identical quality;
    // they form one equal-score group ordered by the (feed, id) tie-break.
    let mut tail = keys[2..].to_vec();
    tail.sort();
    assert_eq!(
        tail,
        vec![
            ("http://f2".to_string(), "entry-five".to_string()),
            ("http://f2".to_string(), "entry-four".to_string()),
            ("http://f2".to_string(), "entry-six".to_string()),
            ("http://f2".to_string(), "entry-three".to_string()),
        ]
    );
}

#[test]
fn chunk_size_never_changes_results_or_order() {
    let conn = open_db_in_memory().unwrap();
    weights_fixture(&conn);
    enable(&conn).unwrap();

    update_index(&conn, 0).unwrap();
    let baseline = search_entries(&conn, "one", &EntryFilter::default()).unwrap();
    assert!(!baseline.is_empty());

    for chunk_size in [1, 2, 3, 8, 256] {
        update_index(&conn, chunk_size).unwrap();
        let results = search_entries(&conn, "one", &EntryFilter::default()).unwrap();
        assert_eq!(results, baseline, "chunk size {chunk_size} changed results");
    }
}

#[test]
fn update_index_reflects_entry_changes() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "e1", Some("alpha text"), None, &[]);

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();
    assert_eq!(search_keys(&conn, "alpha", &EntryFilter::default()).len(), 1);

    // Index updates are pull-based; a write alone changes nothing.
    add_entry(&conn, "http://f1", "e1", Some("beta text"), None, &[]);
    assert_eq!(search_keys(&conn, "alpha", &EntryFilter::default()).len(), 1);
    assert!(search_keys(&conn, "beta", &EntryFilter::default()).is_empty());

    update_index(&conn, 0).unwrap();
    assert!(search_keys(&conn, "alpha", &EntryFilter::default()).is_empty());
    assert_eq!(search_keys(&conn, "beta", &EntryFilter::default()).len(), 1);
}

#[test]
fn marker_like_text_in_entries_does_not_break_highlighting() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(
        &conn,
        "http://f1",
        "e1",
        Some(">>>weird<<< one"),
        None,
        &[],
    );

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    let results = search_entries(&conn, "one", &EntryFilter::default()).unwrap();
    assert_eq!(results.len(), 1);
    let title = results[0].field(".title").unwrap();
    assert_eq!(title.value(), ">>>weird<<< one");
    assert_eq!(title.highlights(), &[span(12, 15)]);
}

#[test]
fn tri_state_filters_constrain_search() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_feed(&conn, "http://f2", Some("Feed #2"));
    add_entry(&conn, "http://f1", "e1", Some("one"), None, &[]);
    add_entry(&conn, "http://f1", "e2", Some("one"), None, &[]);
    add_entry(&conn, "http://f2", "e3", Some("one"), None, &[]);

    let entries = SqliteEntryRepository::new(&conn);
    entries.mark_read(("http://f1", "e1"), true).unwrap();
    entries.mark_important(("http://f1", "e2"), true).unwrap();
    conn.execute(
        "UPDATE entries SET enclosures = :enclosures WHERE id = 'e3';",
        rusqlite::named_params! {
            ":enclosures": serde_json::to_string(&[Enclosure::new("http://f2/file.mp3")]).unwrap(),
        },
    )
    .unwrap();

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();

    let ids = |filter: &EntryFilter| -> Vec<String> {
        let mut ids: Vec<String> = search_keys(&conn, "one", filter)
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        ids.sort();
        ids
    };

    assert_eq!(ids(&EntryFilter::default()), vec!["e1", "e2", "e3"]);

    let mut filter = EntryFilter::default();
    filter.read = Some(true);
    assert_eq!(ids(&filter), vec!["e1"]);
    filter.read = Some(false);
    assert_eq!(ids(&filter), vec!["e2", "e3"]);

    let mut filter = EntryFilter::default();
    filter.important = Some(true);
    assert_eq!(ids(&filter), vec!["e2"]);

    let mut filter = EntryFilter::default();
    filter.has_enclosures = Some(true);
    assert_eq!(ids(&filter), vec!["e3"]);
    filter.has_enclosures = Some(false);
    assert_eq!(ids(&filter), vec!["e1", "e2"]);

    let mut filter = EntryFilter::default();
    filter.feed_url = Some("http://f1".to_string());
    assert_eq!(ids(&filter), vec!["e1", "e2"]);

    filter.entry_id = Some("e2".to_string());
    assert_eq!(ids(&filter), vec!["e2"]);
    filter.entry_id = Some("missing".to_string());
    assert!(ids(&filter).is_empty());
}

#[test]
fn disabling_search_drops_the_index() {
    let conn = open_db_in_memory().unwrap();
    add_feed(&conn, "http://f1", Some("Feed #1"));
    add_entry(&conn, "http://f1", "e1", Some("one"), None, &[]);

    enable(&conn).unwrap();
    update_index(&conn, 0).unwrap();
    assert_eq!(search_keys(&conn, "one", &EntryFilter::default()).len(), 1);

    disable(&conn).unwrap();
    let err = search_entries(&conn, "one", &EntryFilter::default()).unwrap_err();
    assert!(matches!(err, SearchError::NotEnabled));

    // Re-enabling starts from an empty index; the data is derived, not owned.
    enable(&conn).unwrap();
    assert!(search_entries(&conn, "one", &EntryFilter::default())
        .unwrap()
        .is_empty());
    update_index(&conn, 0).unwrap();
    assert_eq!(search_keys(&conn, "one", &EntryFilter::default()).len(), 1);
}

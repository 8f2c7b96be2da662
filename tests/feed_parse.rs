// tests/feed_parse.rs
//
// Parser fixtures for the three supported formats, and the HTTP reader
// against a local server.

use axum::{http::header, routing::get, Router};
use chrono::{TimeZone, Utc};

use feed_relay::config::HttpConfig;
use feed_relay::feed::{detect_format, parse_feed, FeedFormat, FeedReader, HttpFeedReader};
use feed_relay::normalize::clean_html;

const RSS: &str = include_str!("fixtures/rss.xml");
const ATOM: &str = include_str!("fixtures/atom.xml");
const JSON: &str = include_str!("fixtures/feed.json");

#[test]
fn formats_are_sniffed() {
    assert_eq!(detect_format(RSS), Some(FeedFormat::Rss));
    assert_eq!(detect_format(ATOM), Some(FeedFormat::Atom));
    assert_eq!(detect_format(JSON), Some(FeedFormat::JsonFeed));
    assert_eq!(detect_format("<html><body>nope</body></html>"), None);
    assert!(parse_feed("plain text").is_err());
}

#[test]
fn rss_fixture() {
    let items = parse_feed(RSS).unwrap();
    assert_eq!(items.len(), 2, "entry without guid or link is skipped");

    let pier = &items[0];
    assert_eq!(pier.guid, "harbor-2025-0412");
    assert_eq!(clean_html(pier.title.as_deref().unwrap()), "Pier 4 reopens after repairs");
    assert_eq!(pier.summary.as_deref(), Some("Pier 4 is open again."));
    assert_eq!(
        clean_html(pier.content.as_deref().unwrap()),
        "Pier 4 is open again after six weeks of work."
    );
    assert_eq!(pier.author.as_deref(), Some("Marta Lind"));
    assert_eq!(pier.categories, vec!["infrastructure", "piers"]);
    assert_eq!(
        pier.published_at,
        Some(Utc.with_ymd_and_hms(2025, 10, 7, 8, 30, 0).unwrap())
    );

    let ferry = &items[1];
    assert_eq!(ferry.guid, "https://harbor.example.org/posts/winter-timetable");
    assert_eq!(ferry.title.as_deref(), Some("Ferry timetable - winter edition"));
    assert_eq!(ferry.summary, None);
    assert_eq!(
        clean_html(ferry.content.as_deref().unwrap()),
        "The winter timetable starts on 1 November."
    );
    assert_eq!(
        ferry.published_at,
        Some(Utc.with_ymd_and_hms(2025, 10, 6, 17, 0, 0).unwrap())
    );
}

#[test]
fn atom_fixture() {
    let items = parse_feed(ATOM).unwrap();
    assert_eq!(items.len(), 2);

    let a = &items[0];
    assert_eq!(a.guid, "tag:log.example.net,2025:incremental-2");
    assert_eq!(a.link.as_deref(), Some("https://log.example.net/incremental-2"));
    assert_eq!(a.summary.as_deref(), Some("Query caching in practice."));
    assert_eq!(clean_html(a.content.as_deref().unwrap()), "We cache queries , not files.");
    assert_eq!(a.author.as_deref(), Some("Ivo Petrov"));
    assert_eq!(a.categories, vec!["compilers"]);
    assert_eq!(
        a.published_at,
        Some(Utc.with_ymd_and_hms(2025, 10, 5, 18, 30, 2).unwrap())
    );

    let b = &items[1];
    assert_eq!(b.guid, "https://log.example.net/release-0-9");
    assert_eq!(b.content.as_deref(), Some("Mostly bug fixes."));
    assert_eq!(
        b.published_at,
        Some(Utc.with_ymd_and_hms(2025, 10, 1, 7, 0, 0).unwrap())
    );
}

#[test]
fn json_feed_fixture() {
    let items = parse_feed(JSON).unwrap();
    assert_eq!(items.len(), 2);

    let t = &items[0];
    assert_eq!(t.guid, "2025-10-04-tomatoes");
    assert_eq!(t.author.as_deref(), Some("Sam Okafor"));
    assert_eq!(t.summary.as_deref(), Some("Harvest wrap-up."));
    assert_eq!(t.categories, vec!["harvest", "tomatoes"]);

    let c = &items[1];
    assert_eq!(c.guid, "42");
    assert_eq!(c.link, None);
    assert_eq!(c.content.as_deref(), Some("Turn the pile weekly."));
    assert_eq!(c.author.as_deref(), Some("Sam"));
    assert!(c.published_at.is_some());
}

#[tokio::test]
async fn http_reader_fetches_and_parses() {
    let app = Router::new()
        .route(
            "/feed.xml",
            get(|| async { ([(header::CONTENT_TYPE, "application/rss+xml")], RSS) }),
        )
        .route("/broken", get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "down") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let reader = HttpFeedReader::new(&HttpConfig::default()).unwrap();
    let items = reader.fetch_feed(&format!("http://{addr}/feed.xml")).await.unwrap();
    assert_eq!(items.len(), 2);

    let err = reader.fetch_feed(&format!("http://{addr}/broken")).await.unwrap_err();
    assert!(format!("{err:#}").contains("502"), "{err:#}");
}

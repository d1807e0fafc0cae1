//! End-to-end: a full scraper run against a scripted local host, through
//! the file exporter.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::comment_server::{start, Payload};
use dmscrape_core::controller::ControllerConfig;
use dmscrape_core::exporter::FileExporter;
use dmscrape_core::fetcher::FetcherConfig;
use dmscrape_core::scraper::Scraper;

fn xml(ids: &[u64], maxlimit: i64, ds: i64) -> String {
    let body: String = ids
        .iter()
        .map(|id| format!(r#"<d p="0.0,1,25,16777215,{id},0,aaaa,{id}">c{id}</d>"#))
        .collect();
    format!("<i><chatserver>chat.test</chatserver><maxlimit>{maxlimit}</maxlimit><ds>{ds}</ds>{body}</i>")
}

fn idle_controller() -> ControllerConfig {
    ControllerConfig {
        normal_interval: 0.0,
        busy_interval: 0.0,
        rush_start: 0.0,
        rush_end: 0.0,
        time_zone: None,
    }
}

fn routes() -> HashMap<String, Payload> {
    let mut routes = HashMap::new();

    // A pool shorter than maxlimit: no history walk at all.
    routes.insert("/12.xml".to_string(), Payload::Plain(xml(&[12], 2, 0)));

    // A full pool whose five checkpoints must all be fetched.
    routes.insert("/34.xml".to_string(), Payload::Plain(xml(&[10, 12], 1, 0)));
    routes.insert(
        "/rolldate,34".to_string(),
        Payload::Plain(
            r#"[{"timestamp":2},{"timestamp":4},{"timestamp":6},{"timestamp":8},{"timestamp":10}]"#
                .to_string(),
        ),
    );
    for ts in [2i64, 4, 6, 8, 10] {
        routes.insert(
            format!("/dmroll,{ts},34"),
            Payload::Chunked(xml(&[ts as u64 - 1, ts as u64], 1, 0)),
        );
    }

    // A pool whose first snapshot back is not full: the walk halts there.
    routes.insert("/90.xml".to_string(), Payload::Plain(xml(&[11, 12], 2, 1)));
    routes.insert(
        "/rolldate,90".to_string(),
        Payload::Plain(r#"[{"timestamp":3},{"timestamp":10}]"#.to_string()),
    );
    routes.insert("/dmroll,10,90".to_string(), Payload::Plain(xml(&[10], 2, 1)));

    routes
}

#[tokio::test]
async fn scrapes_targets_into_the_expected_file_tree() {
    let port = start(routes());
    let out = tempfile::tempdir().unwrap();
    let exporter = Arc::new(FileExporter::new(Some(out.path()), false));

    let mut scraper = Scraper::new(exporter, true, (None, None), 3)
        .unwrap()
        .with_fetcher_config(FetcherConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..FetcherConfig::default()
        })
        .with_controller_config(idle_controller());
    scraper.add(12).unwrap();
    scraper.add(34).unwrap();
    scraper.add(90).unwrap();
    // A pool the host does not know: 404, counted as scraped.
    scraper.add(404_404).unwrap();
    scraper.run().await.unwrap();

    // No history: one file, no subdirectory.
    let single = out.path().join("12.xml");
    let text = std::fs::read_to_string(&single).unwrap();
    assert!(text.contains(r#"<d p="0.0,1,25,16777215,12,0,aaaa,12">c12</d>"#));
    assert!(!out.path().join("12").exists());

    // Full history: every checkpoint written plus the current snapshot.
    let dir = out.path().join("34");
    for ts in [2, 4, 6, 8, 10] {
        assert!(dir.join(format!("{ts},34.xml")).exists(), "missing {ts},34.xml");
    }
    let current = std::fs::read_to_string(dir.join("34.xml")).unwrap();
    assert!(current.contains(",12,0,aaaa,12\">c12</d>"));
    let oldest = std::fs::read_to_string(dir.join("2,34.xml")).unwrap();
    assert!(oldest.contains(",1,0,aaaa,1\">c1</d>"));

    // Halted walk: exactly the one confirmed snapshot plus the current.
    let dir = out.path().join("90");
    assert!(dir.join("10,90.xml").exists());
    assert!(dir.join("90.xml").exists());
    assert!(!dir.join("3,90.xml").exists(), "the walk must halt at the non-full snapshot");

    // The missing pool leaves nothing behind.
    assert!(!out.path().join("404404.xml").exists());
    assert!(!out.path().join("404404").exists());
}

#[tokio::test]
async fn joined_export_merges_history_into_one_file() {
    let port = start(routes());
    let out = tempfile::tempdir().unwrap();
    let exporter = Arc::new(FileExporter::new(Some(out.path()), true));

    let mut scraper = Scraper::new(exporter, true, (None, None), 1)
        .unwrap()
        .with_fetcher_config(FetcherConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..FetcherConfig::default()
        })
        .with_controller_config(idle_controller());
    scraper.add(34).unwrap();
    scraper.run().await.unwrap();

    assert!(!out.path().join("34").exists());
    let text = std::fs::read_to_string(out.path().join("34.xml")).unwrap();
    // The union of every snapshot, deduplicated.
    for id in 1..=10 {
        assert!(text.contains(&format!(",{id},0,aaaa,{id}\">c{id}</d>")), "missing comment {id}");
    }
    assert_eq!(text.matches("<d p=").count(), 11, "1..=10 plus 12, each exactly once");
}

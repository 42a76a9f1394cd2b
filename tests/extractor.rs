//! End-to-end pipeline tests with a scripted geometry engine.

use fences::engine::{EngineSink, EngineSummary, GeometryEngine};
use fences::models::{CompletedArea, Member, MemberType, RawObject, Tags};
use fences::{ExtractError, PolygonExtractor};

enum ScriptEvent {
    Raw(RawObject),
    Area(CompletedArea),
    GeometryError(String, RawObject),
}

/// Engine that replays a fixed event script, mimicking the ordering
/// guarantee of the real engine: completion only after all events.
struct ScriptedEngine {
    events: Vec<ScriptEvent>,
    fail_with: Option<String>,
}

impl ScriptedEngine {
    fn new(events: Vec<ScriptEvent>) -> Self {
        Self {
            events,
            fail_with: None,
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            events: Vec::new(),
            fail_with: Some(message.to_string()),
        }
    }
}

impl GeometryEngine for ScriptedEngine {
    fn run(&mut self, sink: &mut dyn EngineSink) -> anyhow::Result<EngineSummary> {
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{}", message);
        }

        let mut summary = EngineSummary {
            time_in_preprocess: 5,
            time_in_area: 7,
            time_in_area_handler: 11,
            ..Default::default()
        };

        for event in self.events.drain(..) {
            match event {
                ScriptEvent::Raw(raw) => sink.on_raw(raw),
                ScriptEvent::Area(area) => {
                    summary.area_count += 1;
                    sink.on_area(area);
                }
                ScriptEvent::GeometryError(message, raw) => {
                    summary.error_count += 1;
                    sink.on_geometry_error(&message, raw);
                }
            }
        }

        Ok(summary)
    }
}

fn admin_tags(name: Option<&str>, level: &str) -> Tags {
    let mut tags = Tags::new();
    tags.insert("boundary".to_string(), "administrative".to_string());
    tags.insert("admin_level".to_string(), level.to_string());
    if let Some(n) = name {
        tags.insert("name".to_string(), n.to_string());
    }
    tags
}

fn way_member(r: u64) -> Member {
    Member {
        member_type: MemberType::Way,
        member_ref: r,
        role: "outer".to_string(),
    }
}

fn polygon() -> serde_json::Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
    })
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_end_to_end_reconciliation() {
    // way A: candidate, geometry build fails
    let raw_a = RawObject::way(1, admin_tags(Some("Alpha"), "8"));
    // relation B: candidate, completes into an area at level 6
    let raw_b = RawObject::relation(
        2,
        admin_tags(Some("Beta"), "6"),
        vec![way_member(10), way_member(11)],
    );
    // relation C: candidate, never completes; one member is way A (a known
    // candidate), the other is absent from the source entirely
    let raw_c = RawObject::relation(
        3,
        admin_tags(Some("Gamma"), "6"),
        vec![way_member(1), way_member(99)],
    );

    let engine = ScriptedEngine::new(vec![
        ScriptEvent::Raw(raw_a.clone()),
        ScriptEvent::Raw(raw_b.clone()),
        ScriptEvent::Raw(raw_c),
        ScriptEvent::GeometryError("unable to close multipolygon rings".to_string(), raw_a),
        ScriptEvent::Area(CompletedArea {
            key: raw_b.key,
            tags: raw_b.tags,
            geometry: polygon(),
        }),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let stats = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(engine)
        .await
        .unwrap();

    assert_eq!(stats.area_total, 1);
    assert_eq!(stats.area_matched, 1);
    assert_eq!(stats.error_total, 2);
    assert_eq!(stats.error_matched, 2);
    assert_eq!(stats.time_in_preprocess, 5);
    assert_eq!(stats.time_in_area, 7);
    assert_eq!(stats.time_in_area_handler, 11);

    // exactly one level file, holding B's feature
    let level6 = read_json(&dir.path().join("admin_level_6.geojson"));
    assert_eq!(level6["type"], "FeatureCollection");
    let features = level6["features"].as_array().unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["properties"]["name"], "Beta");
    assert!(!dir.path().join("admin_level_8.geojson").exists());

    // A reported once (geometry), C reported once (reconciliation)
    let errors = read_json(&dir.path().join("errors.json"));
    let errors = errors.as_array().unwrap();
    assert_eq!(errors.len(), 2);

    assert_eq!(errors[0]["kind"], "geometry_build");
    assert_eq!(errors[0]["data"]["id"], 1);

    assert_eq!(errors[1]["kind"], "missing_way_members");
    assert_eq!(errors[1]["data"]["id"], 3);
    assert_eq!(errors[1]["missing_way_count"], 1);
}

#[tokio::test]
async fn test_missing_name_area_dropped_and_reported_once() {
    let raw = RawObject::relation(5, admin_tags(None, "4"), vec![way_member(1)]);

    let engine = ScriptedEngine::new(vec![
        ScriptEvent::Raw(raw.clone()),
        ScriptEvent::Area(CompletedArea {
            key: raw.key,
            tags: raw.tags,
            geometry: polygon(),
        }),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let stats = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(engine)
        .await
        .unwrap();

    assert_eq!(stats.area_total, 1);
    assert_eq!(stats.area_matched, 0);
    // missing-name only; the candidate must not also surface in
    // reconciliation
    assert_eq!(stats.error_matched, 1);

    assert!(!dir.path().join("admin_level_4.geojson").exists());

    let errors = read_json(&dir.path().join("errors.json"));
    let errors = errors.as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["kind"], "missing_name");
}

#[tokio::test]
async fn test_type_tag_used_as_name_fallback() {
    let mut tags = admin_tags(None, "2");
    tags.insert("type".to_string(), "X".to_string());
    let raw = RawObject::relation(9, tags, vec![way_member(1)]);

    let engine = ScriptedEngine::new(vec![
        ScriptEvent::Raw(raw.clone()),
        ScriptEvent::Area(CompletedArea {
            key: raw.key,
            tags: raw.tags,
            geometry: polygon(),
        }),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let stats = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(engine)
        .await
        .unwrap();

    assert_eq!(stats.area_matched, 1);
    assert_eq!(stats.error_matched, 0);

    let level2 = read_json(&dir.path().join("admin_level_2.geojson"));
    assert_eq!(level2["features"][0]["properties"]["type"], "X");
}

#[tokio::test]
async fn test_unfiltered_geometry_errors_suppressed() {
    // a raw object that never matched the filter fails to build: the error
    // is counted but not delivered
    let mut tags = Tags::new();
    tags.insert("leisure".to_string(), "park".to_string());
    let raw = RawObject::way(77, tags);

    let engine = ScriptedEngine::new(vec![
        ScriptEvent::Raw(raw.clone()),
        ScriptEvent::GeometryError("degenerate ring".to_string(), raw),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let stats = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(engine)
        .await
        .unwrap();

    assert_eq!(stats.error_total, 1);
    assert_eq!(stats.error_matched, 0);

    let errors = read_json(&dir.path().join("errors.json"));
    assert!(errors.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sink_io_failure_aborts_run() {
    // the output path is an existing regular file, so opening the first
    // level stream fails and the run must abort with an IO error
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("output");
    std::fs::write(&blocked, b"in the way").unwrap();

    let raw = RawObject::way(1, admin_tags(Some("Alpha"), "8"));
    let engine = ScriptedEngine::new(vec![
        ScriptEvent::Raw(raw.clone()),
        ScriptEvent::Area(CompletedArea {
            key: raw.key,
            tags: raw.tags,
            geometry: polygon(),
        }),
    ]);

    let result = PolygonExtractor::new("unused.osm.pbf", &blocked)
        .run_with_engine(engine)
        .await;

    match result {
        Err(ExtractError::Io(_)) => {}
        Err(other) => panic!("expected IO failure, got {:?}", other),
        Ok(stats) => panic!("run must not report success, got {:?}", stats),
    }
}

/// Engine that dies mid-scan without delivering a completion summary.
struct PanickingEngine;

impl GeometryEngine for PanickingEngine {
    fn run(&mut self, _sink: &mut dyn EngineSink) -> anyhow::Result<EngineSummary> {
        panic!("scan aborted");
    }
}

#[tokio::test]
async fn test_worker_panic_surfaces_as_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(PanickingEngine)
        .await;

    match result {
        Err(ExtractError::Process(message)) => {
            assert!(message.contains("panicked"));
        }
        other => panic!(
            "expected process failure, got {:?}",
            other.map(|s| s.area_total)
        ),
    }
}

#[tokio::test]
async fn test_engine_failure_surfaces_as_fatal_error() {
    let engine = ScriptedEngine::failing("input file is corrupt");

    let dir = tempfile::tempdir().unwrap();
    let result = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(engine)
        .await;

    match result {
        Err(ExtractError::Engine(e)) => {
            assert!(e.to_string().contains("input file is corrupt"));
        }
        other => panic!("expected engine failure, got {:?}", other.map(|s| s.area_total)),
    }
}

#[tokio::test]
async fn test_outputs_parse_immediately_after_completion() {
    let mut events = Vec::new();
    for id in 1..=20u64 {
        let level = if id % 2 == 0 { "6" } else { "8" };
        let raw = RawObject::way(id, admin_tags(Some(&format!("area-{}", id)), level));
        events.push(ScriptEvent::Raw(raw.clone()));
        events.push(ScriptEvent::Area(CompletedArea {
            key: raw.key,
            tags: raw.tags,
            geometry: polygon(),
        }));
    }

    let dir = tempfile::tempdir().unwrap();
    let stats = PolygonExtractor::new("unused.osm.pbf", dir.path())
        .run_with_engine(ScriptedEngine::new(events))
        .await
        .unwrap();

    assert_eq!(stats.area_matched, 20);

    // both files must be fully written and parseable the moment run returns
    for (level, expected) in [("6", 10), ("8", 10)] {
        let parsed = read_json(&dir.path().join(format!("admin_level_{}.geojson", level)));
        assert_eq!(parsed["features"].as_array().unwrap().len(), expected);
    }
    let errors = read_json(&dir.path().join("errors.json"));
    assert!(errors.as_array().unwrap().is_empty());
}

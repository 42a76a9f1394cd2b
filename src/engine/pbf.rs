//! OSM PBF geometry engine.
//!
//! Scans the input in three passes (relations, ways, nodes), spilling node
//! coordinates to a temporary sled database so country-sized extracts do not
//! need to hold every coordinate in RAM, then assembles candidate ways and
//! relations into polygons.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use hashbrown::{HashMap, HashSet};
use osmpbfreader::{NodeId, OsmId, OsmObj, OsmPbfReader, WayId};
use sled::Db;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::filter::TagFilter;
use crate::models::{CompletedArea, Member, MemberType, RawObject, Tags};

use super::{EngineSink, EngineSummary, GeometryEngine};

/// Geometry engine backed by an OSM PBF file.
pub struct PbfEngine {
    path: PathBuf,
    filter: TagFilter,
}

impl PbfEngine {
    /// Create an engine over `path`. Only objects whose tags pass `filter`
    /// are indexed and built; everything else is skipped at scan time.
    pub fn new(path: impl Into<PathBuf>, filter: TagFilter) -> Self {
        Self {
            path: path.into(),
            filter,
        }
    }
}

/// Scan state built up across the three passes.
struct ScanIndex {
    candidate_ways: Vec<RawObject>,
    candidate_relations: Vec<RawObject>,
    // outer-ring way members per candidate relation, in member order
    relation_ways: HashMap<u64, Vec<WayId>>,
    way_nodes: HashMap<WayId, Vec<NodeId>>,
    node_db: Db,
    // keeps the sled directory alive for the duration of the run
    _temp_dir: TempDir,
}

impl GeometryEngine for PbfEngine {
    fn run(&mut self, sink: &mut dyn EngineSink) -> Result<EngineSummary> {
        let start = Instant::now();
        let mut summary = EngineSummary::default();

        let file = File::open(&self.path)
            .with_context(|| format!("failed to open input file {}", self.path.display()))?;
        let mut reader = OsmPbfReader::new(BufReader::new(file));

        let index = self.scan(&mut reader, sink)?;

        info!(
            ways = index.candidate_ways.len(),
            relations = index.candidate_relations.len(),
            "assembling candidate geometries"
        );

        self.assemble(&index, start, &mut summary, sink);

        Ok(summary)
    }
}

impl PbfEngine {
    /// Pass 1-3: identify candidates, record member ways, store node
    /// coordinates.
    fn scan<R: std::io::Read + std::io::Seek>(
        &self,
        reader: &mut OsmPbfReader<R>,
        sink: &mut dyn EngineSink,
    ) -> Result<ScanIndex> {
        let mut candidate_ways = Vec::new();
        let mut candidate_relations = Vec::new();
        let mut relation_ways: HashMap<u64, Vec<WayId>> = HashMap::new();
        let mut needed_ways: HashSet<WayId> = HashSet::new();

        info!("Pass 1/3: identifying candidate ways and relations...");
        reader.rewind()?;
        for obj in reader.iter() {
            let obj = obj?;
            match &obj {
                OsmObj::Relation(rel) => {
                    let tags = convert_tags(&rel.tags);
                    if !self.filter.evaluate(&tags) {
                        continue;
                    }
                    let id = rel.id.0 as u64;
                    let mut outer_ways = Vec::new();
                    for member in &rel.refs {
                        if let OsmId::Way(way_id) = member.member {
                            if member.role == "outer" || member.role.is_empty() {
                                outer_ways.push(way_id);
                                needed_ways.insert(way_id);
                            }
                        }
                    }
                    relation_ways.insert(id, outer_ways);
                    let raw = RawObject::relation(id, tags, convert_members(&rel.refs));
                    sink.on_raw(raw.clone());
                    candidate_relations.push(raw);
                }
                OsmObj::Way(way) => {
                    let tags = convert_tags(&way.tags);
                    if !self.filter.evaluate(&tags) {
                        continue;
                    }
                    needed_ways.insert(way.id);
                    let raw = RawObject::way(way.id.0 as u64, tags);
                    sink.on_raw(raw.clone());
                    candidate_ways.push(raw);
                }
                OsmObj::Node(_) => {}
            }
        }
        info!(
            "found {} candidate ways, {} candidate relations, {} member ways",
            candidate_ways.len(),
            candidate_relations.len(),
            needed_ways.len()
        );

        info!("Pass 2/3: collecting node references...");
        reader.rewind()?;
        let mut way_nodes: HashMap<WayId, Vec<NodeId>> = HashMap::new();
        let mut needed_nodes: HashSet<NodeId> = HashSet::new();
        for obj in reader.iter() {
            let obj = obj?;
            if let OsmObj::Way(way) = obj {
                if needed_ways.contains(&way.id) {
                    for node in &way.nodes {
                        needed_nodes.insert(*node);
                    }
                    way_nodes.insert(way.id, way.nodes);
                }
            }
        }

        info!("Pass 3/3: storing {} node coordinates...", needed_nodes.len());
        reader.rewind()?;
        let temp_dir = tempfile::Builder::new().prefix("fences-geo-").tempdir()?;
        let node_db = sled::open(temp_dir.path())?;
        let mut stored = 0u64;
        for obj in reader.iter() {
            let obj = obj?;
            if let OsmObj::Node(node) = obj {
                if needed_nodes.contains(&node.id) {
                    let value = encode_node(node.lon(), node.lat());
                    node_db.insert(node.id.0.to_be_bytes(), &value)?;
                    stored += 1;
                }
            }
        }
        node_db.flush()?;
        debug!(stored, "node store complete");

        Ok(ScanIndex {
            candidate_ways,
            candidate_relations,
            relation_ways,
            way_nodes,
            node_db,
            _temp_dir: temp_dir,
        })
    }

    /// Build geometries for every candidate and deliver area / error events.
    ///
    /// Candidates whose member or node data is simply absent from the source
    /// are skipped without an error event; surfacing those is the
    /// reconciliation pass's job.
    fn assemble(
        &self,
        index: &ScanIndex,
        start: Instant,
        summary: &mut EngineSummary,
        sink: &mut dyn EngineSink,
    ) {
        for raw in &index.candidate_ways {
            let build_start = Instant::now();
            let coords = match index.way_nodes.get(&WayId(raw.key.id as i64)) {
                Some(nodes) => resolve_coords(&index.node_db, nodes),
                None => continue,
            };
            let Some(coords) = coords else { continue };

            if coords.len() < 3 {
                self.emit_error(summary, start, sink, "degenerate ring: fewer than 3 nodes", raw);
                continue;
            }
            let mut ring = coords;
            if ring.first() != ring.last() {
                ring.push(ring[0]);
            }
            if ring.len() < 4 {
                self.emit_error(summary, start, sink, "degenerate ring: fewer than 3 nodes", raw);
                continue;
            }
            let polygon = Polygon::new(LineString::new(ring), vec![]);
            let geometry = polygon_to_geojson(&polygon);
            self.emit_area(summary, start, build_start, sink, raw, geometry);
        }

        for raw in &index.candidate_relations {
            let build_start = Instant::now();
            let Some(member_ways) = index.relation_ways.get(&raw.key.id) else {
                continue;
            };

            let mut rings: Vec<Vec<Coord<f64>>> = Vec::new();
            for way_id in member_ways {
                let Some(nodes) = index.way_nodes.get(way_id) else {
                    continue;
                };
                if let Some(coords) = resolve_coords(&index.node_db, nodes) {
                    if coords.len() >= 2 {
                        rings.push(coords);
                    }
                }
            }

            // no member data at all: silent skip, reconciliation reports it
            if rings.is_empty() {
                continue;
            }

            let polygons = merge_rings_to_polygons(rings);
            if polygons.is_empty() {
                self.emit_error(summary, start, sink, "unable to close multipolygon rings", raw);
                continue;
            }
            let geometry = multipolygon_to_geojson(&MultiPolygon::new(polygons));
            self.emit_area(summary, start, build_start, sink, raw, geometry);
        }
    }

    fn emit_area(
        &self,
        summary: &mut EngineSummary,
        start: Instant,
        build_start: Instant,
        sink: &mut dyn EngineSink,
        raw: &RawObject,
        geometry: serde_json::Value,
    ) {
        if summary.area_count == 0 && summary.error_count == 0 {
            summary.time_in_preprocess = build_start.duration_since(start).as_micros() as u64;
        }
        summary.area_count += 1;

        if summary.area_count % 100_000 == 0 {
            debug!(areas = summary.area_count, "assembly progress");
        }

        let before_cb = Instant::now();
        summary.time_in_area += before_cb.duration_since(build_start).as_micros() as u64;

        sink.on_area(CompletedArea {
            key: raw.key,
            tags: raw.tags.clone(),
            geometry,
        });

        summary.time_in_area_handler += before_cb.elapsed().as_micros() as u64;
    }

    fn emit_error(
        &self,
        summary: &mut EngineSummary,
        start: Instant,
        sink: &mut dyn EngineSink,
        message: &str,
        raw: &RawObject,
    ) {
        if summary.area_count == 0 && summary.error_count == 0 {
            summary.time_in_preprocess = start.elapsed().as_micros() as u64;
        }
        summary.error_count += 1;
        sink.on_geometry_error(message, raw.clone());
    }
}

fn convert_tags(tags: &osmpbfreader::Tags) -> Tags {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn convert_members(refs: &[osmpbfreader::Ref]) -> Vec<Member> {
    refs.iter()
        .map(|r| {
            let (member_type, member_ref) = match r.member {
                OsmId::Node(id) => (MemberType::Node, id.0 as u64),
                OsmId::Way(id) => (MemberType::Way, id.0 as u64),
                OsmId::Relation(id) => (MemberType::Relation, id.0 as u64),
            };
            Member {
                member_type,
                member_ref,
                role: r.role.to_string(),
            }
        })
        .collect()
}

/// Pack a node coordinate into the sled value layout: longitude then
/// latitude, big-endian f64.
fn encode_node(lon: f64, lat: f64) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..8].copy_from_slice(&lon.to_be_bytes());
    buf[8..16].copy_from_slice(&lat.to_be_bytes());
    buf
}

fn decode_node(bytes: &[u8]) -> Option<Coord<f64>> {
    if bytes.len() != 16 {
        return None;
    }
    let lon = f64::from_be_bytes(bytes[0..8].try_into().ok()?);
    let lat = f64::from_be_bytes(bytes[8..16].try_into().ok()?);
    Some(Coord { x: lon, y: lat })
}

/// Look up the stored coordinates for a node list. Returns `None` if any
/// node is missing from the source.
fn resolve_coords(db: &Db, nodes: &[NodeId]) -> Option<Vec<Coord<f64>>> {
    let mut coords = Vec::with_capacity(nodes.len());
    for nid in nodes {
        match db.get(nid.0.to_be_bytes()) {
            Ok(Some(bytes)) => coords.push(decode_node(&bytes)?),
            _ => return None,
        }
    }
    Some(coords)
}

/// True when `segment` touches either end of `current`.
fn connects(current: &[Coord<f64>], segment: &[Coord<f64>]) -> bool {
    let (start, end) = (current.first(), current.last());
    let (seg_start, seg_end) = (segment.first(), segment.last());
    end == seg_start || end == seg_end || start == seg_end || start == seg_start
}

/// Splice `segment` onto whichever end of `current` it touches, reversing it
/// when the shared endpoint requires. Callers must check `connects` first.
fn splice_segment(current: &mut Vec<Coord<f64>>, mut segment: Vec<Coord<f64>>) {
    let start = current.first().cloned();
    let end = current.last().cloned();

    if end == segment.first().cloned() {
        segment.remove(0);
        current.extend(segment);
    } else if end == segment.last().cloned() {
        segment.reverse();
        segment.remove(0);
        current.extend(segment);
    } else if start == segment.last().cloned() {
        segment.pop();
        segment.append(current);
        *current = segment;
    } else {
        segment.reverse();
        segment.pop();
        segment.append(current);
        *current = segment;
    }
}

/// Merge disconnected way segments into closed polygon rings.
///
/// Segments that never close into a ring of at least three distinct points
/// are dropped.
pub fn merge_rings_to_polygons(rings: Vec<Vec<Coord<f64>>>) -> Vec<Polygon<f64>> {
    let mut result = Vec::new();
    let mut remaining = rings;

    while !remaining.is_empty() {
        let mut current = remaining.remove(0);

        if current.first() == current.last() && current.len() >= 4 {
            result.push(Polygon::new(LineString::new(current), vec![]));
            continue;
        }

        // grow the ring until no remaining segment touches either end
        while let Some(i) = remaining.iter().position(|seg| connects(&current, seg)) {
            let segment = remaining.remove(i);
            splice_segment(&mut current, segment);
        }

        if current.len() >= 3 {
            if current.first() != current.last() {
                current.push(current[0]);
            }
            if current.len() >= 4 {
                result.push(Polygon::new(LineString::new(current), vec![]));
            }
        }
    }

    result
}

fn ring_coordinates(ring: &LineString<f64>) -> serde_json::Value {
    serde_json::Value::Array(
        ring.coords()
            .map(|c| serde_json::json!([c.x, c.y]))
            .collect(),
    )
}

fn polygon_rings(polygon: &Polygon<f64>) -> serde_json::Value {
    let mut rings = vec![ring_coordinates(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_coordinates));
    serde_json::Value::Array(rings)
}

/// Serialize a polygon as a GeoJSON `Polygon` geometry.
pub fn polygon_to_geojson(polygon: &Polygon<f64>) -> serde_json::Value {
    serde_json::json!({
        "type": "Polygon",
        "coordinates": polygon_rings(polygon),
    })
}

/// Serialize a multipolygon as a GeoJSON `MultiPolygon` geometry.
pub fn multipolygon_to_geojson(mp: &MultiPolygon<f64>) -> serde_json::Value {
    serde_json::json!({
        "type": "MultiPolygon",
        "coordinates": serde_json::Value::Array(mp.iter().map(polygon_rings).collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64) -> Coord<f64> {
        Coord { x, y }
    }

    // a boundary around (7.4, 46.9), split into named corners
    fn corners() -> [Coord<f64>; 4] {
        [
            pt(7.40, 46.90),
            pt(7.48, 46.90),
            pt(7.48, 46.97),
            pt(7.40, 46.97),
        ]
    }

    #[test]
    fn test_closed_ring_passes_through() {
        let [a, b, c, d] = corners();
        let polygons = merge_rings_to_polygons(vec![vec![a, b, c, d, a]]);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].exterior().coords().count(), 5);
    }

    #[test]
    fn test_two_segments_close_into_one_ring() {
        let [a, b, c, d] = corners();
        let polygons = merge_rings_to_polygons(vec![vec![a, b, c], vec![c, d, a]]);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].exterior().coords().count(), 5);
    }

    #[test]
    fn test_segment_reversed_against_flow_is_spliced() {
        let [a, b, c, d] = corners();
        // second segment runs a -> d -> c, opposite to the ring direction
        let polygons = merge_rings_to_polygons(vec![vec![a, b, c], vec![a, d, c]]);
        assert_eq!(polygons.len(), 1);
    }

    #[test]
    fn test_segment_order_does_not_matter() {
        let [a, b, c, d] = corners();
        let polygons = merge_rings_to_polygons(vec![vec![c, d, a], vec![a, b, c]]);
        assert_eq!(polygons.len(), 1);
    }

    #[test]
    fn test_disjoint_segments_are_dropped() {
        let [a, b, c, d] = corners();
        // two stubs that never touch cannot close into a ring
        let polygons = merge_rings_to_polygons(vec![vec![a, b], vec![c, d]]);
        assert!(polygons.is_empty());
    }

    #[test]
    fn test_node_value_roundtrip() {
        let encoded = encode_node(7.447, 46.948);
        assert_eq!(decode_node(&encoded), Some(pt(7.447, 46.948)));
        assert_eq!(decode_node(&encoded[..8]), None);
    }

    #[test]
    fn test_polygon_geojson_shape() {
        let [a, b, c, _] = corners();
        let polygon = Polygon::new(LineString::new(vec![a, b, c, a]), vec![]);

        let value = polygon_to_geojson(&polygon);
        assert_eq!(value["type"], "Polygon");
        assert_eq!(value["coordinates"][0][0], serde_json::json!([7.40, 46.90]));
        assert_eq!(value["coordinates"][0].as_array().unwrap().len(), 4);
    }
}

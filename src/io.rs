//! Flat-file readers and writers.
//!
//! Every file is `;`-delimited with a header row. Input rows are read by
//! position, so header names are not checked.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimingError};
use crate::{
    EdgeId, EdgeSegmentRecord, GpsPoint, MatchedPath, NodeId, NodeTimestampRecord, Trajectory,
    TrajectoryId,
};

const DELIMITER: u8 = b';';

/// `entityId;trajectoryId;latitude;longitude;timestampMillis`
#[derive(Deserialize)]
struct TrajectoryRow {
    entity_id: u64,
    trajectory_id: TrajectoryId,
    latitude: f64,
    longitude: f64,
    timestamp: i64,
}

#[derive(Serialize)]
struct NodeRow {
    tid: TrajectoryId,
    #[serde(rename = "nodeId")]
    node_id: NodeId,
    lat: f64,
    lng: f64,
    timestamp: i64,
}

#[derive(Serialize)]
struct SegmentRow {
    #[serde(rename = "trajId")]
    trajectory_id: TrajectoryId,
    #[serde(rename = "edgeId")]
    edge_id: EdgeId,
    timestamp: i64,
    speed: f64,
}

#[derive(Serialize)]
struct SegmentDetailRow {
    id: TrajectoryId,
    latitude: f64,
    longitude: f64,
    timestamp: i64,
    speed: f64,
    edge_id: EdgeId,
    osm_id: Option<i64>,
}

#[derive(Serialize)]
struct PathNodeRow {
    id: EdgeId,
    latitude: f64,
    longitude: f64,
    order: usize,
}

fn malformed(line: u64, message: impl Into<String>) -> TimingError {
    TimingError::MalformedInput {
        line,
        message: message.into(),
    }
}

fn read_error(err: csv::Error) -> TimingError {
    match err.position() {
        Some(pos) => malformed(pos.line(), err.to_string()),
        None => TimingError::Io {
            message: err.to_string(),
        },
    }
}

fn write_error(err: csv::Error) -> TimingError {
    TimingError::Io {
        message: err.to_string(),
    }
}

/// Read raw trajectories.
///
/// Rows must be grouped by trajectory: a new trajectory starts whenever the
/// trajectory id differs from the previous row's. Any unparsable row or
/// out-of-range coordinate fails the whole read with `MalformedInput`.
pub fn read_trajectories<R: Read>(reader: R) -> Result<Vec<Trajectory>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut trajectories: Vec<Trajectory> = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(read_error)?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row: TrajectoryRow = record
            .deserialize(None)
            .map_err(|e| malformed(line, e.to_string()))?;

        if !GpsPoint::new(row.latitude, row.longitude).is_valid() {
            return Err(malformed(
                line,
                format!("coordinate out of range: {}, {}", row.latitude, row.longitude),
            ));
        }

        let starts_new = trajectories
            .last()
            .map_or(true, |t| t.id != row.trajectory_id);
        if starts_new {
            trajectories.push(Trajectory::new(row.trajectory_id, row.entity_id));
        }
        if let Some(current) = trajectories.last_mut() {
            current.add_point(row.latitude, row.longitude, row.timestamp);
        }
    }

    info!("[PathTiming] Read {} trajectories", trajectories.len());
    Ok(trajectories)
}

pub fn read_trajectories_file(path: impl AsRef<Path>) -> Result<Vec<Trajectory>> {
    read_trajectories(File::open(path)?)
}

fn csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_writer(writer)
}

fn write_rows<W: Write, T: Serialize>(
    writer: W,
    header: &[&str],
    rows: impl IntoIterator<Item = T>,
) -> Result<()> {
    let mut out = csv_writer(writer);
    let mut written = 0usize;
    for row in rows {
        out.serialize(row).map_err(write_error)?;
        written += 1;
    }
    // serialize() only emits the header alongside the first row
    if written == 0 {
        out.write_record(header).map_err(write_error)?;
    }
    out.flush()?;
    Ok(())
}

/// Write node timestamps as `tid;nodeId;lat;lng;timestamp`.
pub fn write_node_timestamps<W: Write>(writer: W, records: &[NodeTimestampRecord]) -> Result<()> {
    write_rows(
        writer,
        &["tid", "nodeId", "lat", "lng", "timestamp"],
        records.iter().map(|r| NodeRow {
            tid: r.trajectory_id,
            node_id: r.node_id,
            lat: r.position.latitude,
            lng: r.position.longitude,
            timestamp: r.timestamp,
        }),
    )
}

/// Write edge speeds as `trajId;edgeId;timestamp;speed`.
pub fn write_edge_segments<W: Write>(writer: W, records: &[EdgeSegmentRecord]) -> Result<()> {
    write_rows(
        writer,
        &["trajId", "edgeId", "timestamp", "speed"],
        records.iter().map(|r| SegmentRow {
            trajectory_id: r.trajectory_id,
            edge_id: r.edge_id,
            timestamp: r.timestamp(),
            speed: r.speed,
        }),
    )
}

/// Write edge speeds with position and OSM way id as
/// `id;latitude;longitude;timestamp;speed;edge_id;osm_id`.
///
/// A missing OSM id is written as an empty field.
pub fn write_edge_segment_details<W: Write>(
    writer: W,
    records: &[EdgeSegmentRecord],
) -> Result<()> {
    write_rows(
        writer,
        &[
            "id",
            "latitude",
            "longitude",
            "timestamp",
            "speed",
            "edge_id",
            "osm_id",
        ],
        records.iter().map(|r| SegmentDetailRow {
            id: r.trajectory_id,
            latitude: r.position.latitude,
            longitude: r.position.longitude,
            timestamp: r.timestamp(),
            speed: r.speed,
            edge_id: r.edge_id,
            osm_id: r.osm_id,
        }),
    )
}

/// Write the edges of a matched path as `id;latitude;longitude;order`, one
/// row per edge at its base node.
pub fn write_path_nodes<W: Write>(writer: W, path: &MatchedPath) -> Result<()> {
    write_rows(
        writer,
        &["id", "latitude", "longitude", "order"],
        path.edges.iter().enumerate().map(|(order, edge)| PathNodeRow {
            id: edge.edge_id,
            latitude: edge.base.position.latitude,
            longitude: edge.base.position.longitude,
            order,
        }),
    )
}

pub fn write_node_timestamps_file(
    path: impl AsRef<Path>,
    records: &[NodeTimestampRecord],
) -> Result<()> {
    write_node_timestamps(File::create(path)?, records)
}

pub fn write_edge_segments_file(
    path: impl AsRef<Path>,
    records: &[EdgeSegmentRecord],
) -> Result<()> {
    write_edge_segments(File::create(path)?, records)
}

pub fn write_edge_segment_details_file(
    path: impl AsRef<Path>,
    records: &[EdgeSegmentRecord],
) -> Result<()> {
    write_edge_segment_details(File::create(path)?, records)
}

pub fn write_path_nodes_file(path: impl AsRef<Path>, matched: &MatchedPath) -> Result<()> {
    write_path_nodes(File::create(path)?, matched)
}

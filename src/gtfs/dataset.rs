use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

use super::model::{Agency, Frequency, Route, ShapePoint, Stop, StopTime, Trip};
use crate::error::{Result, ValidatorError};
use crate::parser::FeedDigest;

/// Parsed static GTFS schedule.
///
/// `digest` identifies the dataset version: the MD5 of the zip bytes, or of
/// the table files concatenated in a fixed order for an unpacked directory.
#[derive(Debug, Default, Clone)]
pub struct StaticDataset {
    pub agencies: Vec<Agency>,
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub stops: Vec<Stop>,
    pub stop_times: Vec<StopTime>,
    pub frequencies: Vec<Frequency>,
    pub shapes: Vec<ShapePoint>,
    pub digest: FeedDigest,
}

const TABLES: [&str; 7] = [
    "agency.txt",
    "routes.txt",
    "trips.txt",
    "stops.txt",
    "stop_times.txt",
    "frequencies.txt",
    "shapes.txt",
];

enum TableSource {
    Dir(PathBuf),
    Zip(ZipArchive<Cursor<Vec<u8>>>),
}

impl TableSource {
    fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        match self {
            TableSource::Dir(dir) => {
                let path = dir.join(name);
                if !path.exists() {
                    return Ok(None);
                }
                Ok(Some(std::fs::read(path)?))
            }
            TableSource::Zip(archive) => {
                let mut file = match archive.by_name(name) {
                    Ok(file) => file,
                    Err(zip::result::ZipError::FileNotFound) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                let mut buf = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
        }
    }
}

impl StaticDataset {
    /// Loads a GTFS zip file or an unpacked GTFS directory.
    ///
    /// `agency.txt`, `frequencies.txt` and `shapes.txt` may be absent; the
    /// other tables are required.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let (mut source, zip_digest) = open(path)?;

        let mut tables: Vec<Option<Vec<u8>>> = Vec::with_capacity(TABLES.len());
        let mut context = md5::Context::new();
        for name in TABLES {
            let table = source.read(name)?;
            if let Some(bytes) = &table {
                debug!(table = name, bytes = bytes.len(), "Read GTFS table");
                context.consume(bytes);
            }
            tables.push(table);
        }
        let digest = zip_digest.unwrap_or_else(|| context.compute().into());

        let mut tables = tables.into_iter();
        let mut next = || tables.next().flatten();
        let agency = next();
        let routes = next();
        let trips = next();
        let stops = next();
        let stop_times = next();
        let frequencies = next();
        let shapes = next();

        let dataset = StaticDataset {
            agencies: parse_optional(agency.as_deref())?,
            routes: parse_required("routes.txt", routes.as_deref())?,
            trips: parse_required("trips.txt", trips.as_deref())?,
            stops: parse_required("stops.txt", stops.as_deref())?,
            stop_times: parse_required("stop_times.txt", stop_times.as_deref())?,
            frequencies: parse_optional(frequencies.as_deref())?,
            shapes: parse_optional(shapes.as_deref())?,
            digest,
        };

        info!(
            digest = %dataset.digest,
            routes = dataset.routes.len(),
            trips = dataset.trips.len(),
            stops = dataset.stops.len(),
            stop_times = dataset.stop_times.len(),
            "Static GTFS loaded"
        );
        Ok(dataset)
    }

    /// The digest [`StaticDataset::load`] would assign to `path`, without
    /// parsing any table.
    pub fn digest_of(path: &Path) -> Result<FeedDigest> {
        if !path.is_dir() {
            return Ok(crate::parser::feed_digest(&std::fs::read(path)?));
        }
        let mut source = TableSource::Dir(path.to_path_buf());
        let mut context = md5::Context::new();
        for name in TABLES {
            if let Some(bytes) = source.read(name)? {
                context.consume(&bytes);
            }
        }
        Ok(context.compute().into())
    }
}

fn open(path: &Path) -> Result<(TableSource, Option<FeedDigest>)> {
    if path.is_dir() {
        return Ok((TableSource::Dir(path.to_path_buf()), None));
    }
    let bytes = std::fs::read(path)?;
    let digest = crate::parser::feed_digest(&bytes);
    Ok((TableSource::Zip(ZipArchive::new(Cursor::new(bytes))?), Some(digest)))
}

fn parse_required<T: DeserializeOwned>(name: &str, bytes: Option<&[u8]>) -> Result<Vec<T>> {
    let bytes = bytes.ok_or_else(|| ValidatorError::StaticData(format!("{} not found", name)))?;
    parse_table(bytes)
}

fn parse_optional<T: DeserializeOwned>(bytes: Option<&[u8]>) -> Result<Vec<T>> {
    bytes.map(parse_table).transpose().map(Option::unwrap_or_default)
}

fn parse_table<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

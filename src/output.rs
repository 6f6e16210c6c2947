// Result rendering - the location frame consumed by the visualization layer
// and line-oriented handlers for the command-line tool

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::engine::{GeolocationMethod, GeolocationResult};
use crate::geodesy::GeoPoint;

/// Wire shape of one located signal
///
/// `possible_locations` is only present for single-receiver estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFrame {
    pub frequency_mhz: f64,
    pub modulation: Option<String>,
    pub method: GeolocationMethod,
    pub receiver_count: usize,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possible_locations: Option<Vec<GeoPoint>>,
}

impl From<&GeolocationResult> for LocationFrame {
    fn from(result: &GeolocationResult) -> Self {
        let possible_locations = (result.method == GeolocationMethod::SingleReceiver)
            .then(|| result.possible_locations.clone());

        LocationFrame {
            frequency_mhz: result.frequency_hz / 1e6,
            modulation: result.modulation.clone(),
            method: result.method,
            receiver_count: result.receiver_count,
            latitude: result.position.map(|p| p.latitude),
            longitude: result.position.map(|p| p.longitude),
            altitude: result.altitude,
            possible_locations,
        }
    }
}

/// Trait for output handlers
pub trait OutputHandler: Send {
    /// Handle a new geolocation result
    fn handle_result(&mut self, result: &GeolocationResult) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One JSON location frame per line
pub struct JsonLinesOutput<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesOutput<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesOutput { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputHandler for JsonLinesOutput<W> {
    fn handle_result(&mut self, result: &GeolocationResult) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &LocationFrame::from(result))?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// CSV format output
pub struct CsvOutput<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> CsvOutput<W> {
    pub const HEADER: &'static str = "frequency_mhz,method,latitude,longitude,altitude,uncertainty_m,receivers";

    pub fn new(writer: W) -> Self {
        CsvOutput {
            writer,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputHandler for CsvOutput<W> {
    fn handle_result(&mut self, result: &GeolocationResult) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.writer, "{}", Self::HEADER)?;
            self.header_written = true;
        }

        // Empty fields for absent values
        let (lat, lon) = match result.position {
            Some(p) => (format!("{:.6}", p.latitude), format!("{:.6}", p.longitude)),
            None => (String::new(), String::new()),
        };
        let alt = result.altitude.map(|a| format!("{:.1}", a)).unwrap_or_default();

        writeln!(
            self.writer,
            "{:.6},{},{},{},{},{:.1},{}",
            result.frequency_hz / 1e6,
            result.method,
            lat,
            lon,
            alt,
            result.uncertainty_radius_m,
            result.receiver_count
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

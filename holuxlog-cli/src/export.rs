//! Track export: GPX 1.1, KML 2.2 and JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use holuxlog::tracklog::record::validity;
use holuxlog::{LogRecord, ParsedLog};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const KML_NS: &str = "http://www.opengis.net/kml/2.2";
const CREATOR: &str = concat!("holuxlog ", env!("CARGO_PKG_VERSION"));

/// Output file format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportFormat {
    /// GPS Exchange Format 1.1.
    #[default]
    Gpx,
    /// Keyhole Markup Language 2.2.
    Kml,
    /// Decoded records as JSON.
    Json,
}

impl ExportFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gpx => "gpx",
            Self::Kml => "kml",
            Self::Json => "json",
        }
    }

    /// Parse a config file value.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name, true).ok()
    }
}

/// Render `log` in `format`.
pub fn render(log: &ParsedLog, format: ExportFormat, name: &str) -> Result<String> {
    match format {
        ExportFormat::Gpx => write_gpx(log, name),
        ExportFormat::Kml => write_kml(log, name),
        ExportFormat::Json => {
            serde_json::to_string_pretty(log).context("Failed to serialize log to JSON")
        },
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// GPX `fix` value for a validity mask.
fn fix_type(valid: u16) -> Option<&'static str> {
    if valid & validity::NO_FIX != 0 {
        Some("none")
    } else if valid & validity::DGPS != 0 {
        Some("dgps")
    } else if valid & validity::SPS != 0 {
        Some("3d")
    } else {
        None
    }
}

fn dop(value: u16) -> String {
    format!("{:.2}", f64::from(value) / 100.0)
}

struct Xml {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl Xml {
    fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self { writer })
    }

    fn start(&mut self, elem: BytesStart<'_>) -> Result<()> {
        self.writer.write_event(Event::Start(elem))?;
        Ok(())
    }

    fn open(&mut self, name: &str) -> Result<()> {
        self.start(BytesStart::new(name))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.open(name)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn finish(self) -> Result<String> {
        let bytes = self.writer.into_inner().into_inner();
        String::from_utf8(bytes).context("XML writer produced invalid UTF-8")
    }
}

/// Write one `wpt` or `trkpt`. Children follow the GPX 1.1 schema order.
fn write_gpx_point(xml: &mut Xml, tag: &str, rec: &LogRecord, name: Option<&str>) -> Result<()> {
    let (Some(lat), Some(lon)) = (rec.latitude, rec.longitude) else {
        return Ok(());
    };

    let mut elem = BytesStart::new(tag);
    elem.push_attribute(("lat", format!("{lat:.7}").as_str()));
    elem.push_attribute(("lon", format!("{lon:.7}").as_str()));
    xml.start(elem)?;

    if let Some(height) = rec.height {
        xml.text_element("ele", &format!("{height:.1}"))?;
    }
    if let Some(time) = rec.time() {
        xml.text_element("time", &format_time(time))?;
    }
    if let Some(name) = name {
        xml.text_element("name", name)?;
    }
    if let Some(fix) = rec.valid.and_then(fix_type) {
        xml.text_element("fix", fix)?;
    }
    if let Some(sats) = rec.sats_in_use {
        xml.text_element("sat", &sats.to_string())?;
    }
    if let Some(hdop) = rec.hdop {
        xml.text_element("hdop", &dop(hdop))?;
    }
    if let Some(vdop) = rec.vdop {
        xml.text_element("vdop", &dop(vdop))?;
    }
    if let Some(pdop) = rec.pdop {
        xml.text_element("pdop", &dop(pdop))?;
    }
    if let Some(age) = rec.dgps_age {
        xml.text_element("ageofdgpsdata", &format!("{age:.1}"))?;
    }
    if let Some(station) = rec.dgps_station {
        xml.text_element("dgpsid", &station.to_string())?;
    }

    // course and speed are GPX 1.0 point fields
    if rec.heading.is_some() || rec.speed.is_some() {
        xml.open("extensions")?;
        if let Some(heading) = rec.heading {
            xml.text_element("course", &format!("{heading:.1}"))?;
        }
        if let Some(speed) = rec.speed {
            // km/h to m/s
            xml.text_element("speed", &format!("{:.2}", speed / 3.6))?;
        }
        xml.close("extensions")?;
    }

    xml.close(tag)
}

/// Render GPX 1.1.
pub fn write_gpx(log: &ParsedLog, name: &str) -> Result<String> {
    let mut xml = Xml::new()?;

    let mut root = BytesStart::new("gpx");
    root.push_attribute(("version", "1.1"));
    root.push_attribute(("creator", CREATOR));
    root.push_attribute(("xmlns", GPX_NS));
    xml.start(root)?;

    xml.open("metadata")?;
    xml.text_element("name", name)?;
    if let Some(time) = first_time(log) {
        xml.text_element("time", &format_time(time))?;
    }
    xml.close("metadata")?;

    for (i, poi) in log.pois.iter().enumerate() {
        write_gpx_point(&mut xml, "wpt", poi, Some(format!("POI {}", i + 1).as_str()))?;
    }

    for (i, track) in log.tracks.iter().enumerate() {
        if !track.iter().any(LogRecord::has_position) {
            continue;
        }
        xml.open("trk")?;
        xml.text_element("name", &format!("Track {}", i + 1))?;
        xml.open("trkseg")?;
        for rec in track.iter().filter(|r| r.has_position()) {
            write_gpx_point(&mut xml, "trkpt", rec, None)?;
        }
        xml.close("trkseg")?;
        xml.close("trk")?;
    }

    xml.close("gpx")?;
    xml.finish()
}

fn kml_coordinate(rec: &LogRecord) -> Option<String> {
    let (lat, lon) = (rec.latitude?, rec.longitude?);
    Some(format!("{lon:.7},{lat:.7},{:.1}", rec.height.unwrap_or(0.0)))
}

/// Render KML 2.2.
pub fn write_kml(log: &ParsedLog, name: &str) -> Result<String> {
    let mut xml = Xml::new()?;

    let mut root = BytesStart::new("kml");
    root.push_attribute(("xmlns", KML_NS));
    xml.start(root)?;
    xml.open("Document")?;
    xml.text_element("name", name)?;

    for (i, poi) in log.pois.iter().enumerate() {
        let Some(coordinate) = kml_coordinate(poi) else {
            continue;
        };
        xml.open("Placemark")?;
        xml.text_element("name", &format!("POI {}", i + 1))?;
        if let Some(time) = poi.time() {
            xml.open("TimeStamp")?;
            xml.text_element("when", &format_time(time))?;
            xml.close("TimeStamp")?;
        }
        xml.open("Point")?;
        xml.text_element("coordinates", &coordinate)?;
        xml.close("Point")?;
        xml.close("Placemark")?;
    }

    for (i, track) in log.tracks.iter().enumerate() {
        let coordinates: Vec<String> = track
            .iter()
            .filter(|r| r.has_position())
            .filter_map(kml_coordinate)
            .collect();
        if coordinates.is_empty() {
            continue;
        }

        xml.open("Placemark")?;
        xml.text_element("name", &format!("Track {}", i + 1))?;
        let first = track.iter().find_map(LogRecord::time);
        let last = track.iter().rev().find_map(LogRecord::time);
        if let (Some(begin), Some(end)) = (first, last) {
            xml.open("TimeSpan")?;
            xml.text_element("begin", &format_time(begin))?;
            xml.text_element("end", &format_time(end))?;
            xml.close("TimeSpan")?;
        }
        xml.open("LineString")?;
        xml.text_element("tessellate", "1")?;
        xml.text_element("altitudeMode", "absolute")?;
        xml.text_element("coordinates", &coordinates.join(" "))?;
        xml.close("LineString")?;
        xml.close("Placemark")?;
    }

    xml.close("Document")?;
    xml.close("kml")?;
    xml.finish()
}

fn first_time(log: &ParsedLog) -> Option<DateTime<Utc>> {
    log.tracks.iter().flatten().find_map(LogRecord::time)
}

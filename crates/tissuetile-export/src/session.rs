//! Session document serializer.
//!
//! Writes accepted regions as an XML overlay session that slide viewers
//! can import:
//!
//! ```text
//! <?xml version="1.0"?>
//! <session software="PathCore Session Printer" version="0.1.0">
//!     <image identifier="slide.svs">
//!         <overlays>
//!             <graphic type="rectangle" name="Region 1" description=" ">
//!                 <pen color="#b5e61d" width="2" style="Solid"/>
//!                 <font>Arial,10</font>
//!                 <point-list>
//!                     <point>10,20</point>
//!                     ...
//!                 </point-list>
//!             </graphic>
//!         </overlays>
//!     </image>
//! </session>
//! ```
//!
//! Only corners strictly inside the image are listed; corners on or past
//! an edge are dropped, not clamped.
//!
//! This is a pure function with no I/O; it returns a `String`.

use std::fmt::Write;

use tissuetile_pipeline::{Dimensions, Rect, RoiRecord};

/// Value of the root element's `software` attribute.
pub const SOFTWARE: &str = "PathCore Session Printer";

/// Value of the root element's `version` attribute.
pub const FORMAT_VERSION: &str = "0.1.0";

/// Regions destined for one session document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSession {
    /// Source image path or identifier.
    pub identifier: String,
    /// Records in document order.
    pub records: Vec<RoiRecord>,
}

impl ExportSession {
    /// Build a session from records in enumeration order.
    ///
    /// Records are written last-accepted first, so the document order
    /// is the reverse of the `Region <n>` numbering. Importers that
    /// rely on document order see the regions in that reversed order.
    #[must_use]
    pub fn new(identifier: impl Into<String>, records: &[RoiRecord]) -> Self {
        Self {
            identifier: identifier.into(),
            records: records.iter().rev().cloned().collect(),
        }
    }

    /// Returns `true` if the session has no regions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Escape the five XML special characters.
fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize a session as an XML document.
///
/// `dimensions` is the level-0 image size used to drop corners that are
/// not strictly inside the image. Coordinates are truncated to integers.
///
/// # Examples
///
/// ```
/// use tissuetile_export::{ExportSession, to_session_xml};
/// use tissuetile_pipeline::{Dimensions, Rect, RoiRecord, Tile};
///
/// let tile = Tile { rect: Rect::new(10, 10, 20, 20), score: 1.0 };
/// let session = ExportSession::new("slide.svs", &[RoiRecord::new(tile, 1)]);
/// let xml = to_session_xml(&session, Dimensions::new(100, 100));
/// assert!(xml.contains(r#"name="Region 1""#));
/// assert_eq!(xml.matches("<point>").count(), 4);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_session_xml(session: &ExportSession, dimensions: Dimensions) -> String {
    let mut out = String::new();

    let _ = writeln!(out, r#"<?xml version="1.0"?>"#);
    let _ = writeln!(
        out,
        r#"<session software="{SOFTWARE}" version="{FORMAT_VERSION}">"#
    );
    let _ = writeln!(
        out,
        r#"    <image identifier="{}">"#,
        xml_escape(&session.identifier)
    );
    let _ = writeln!(out, "        <overlays>");

    for record in &session.records {
        let _ = writeln!(
            out,
            r#"            <graphic type="{}" name="{}" description="{}">"#,
            RoiRecord::SHAPE,
            xml_escape(&record.label),
            xml_escape(&record.description),
        );
        let _ = writeln!(
            out,
            r#"                <pen color="{}" width="{}" style="{}"/>"#,
            record.style.hex_color(),
            record.style.width,
            record.style.pattern.as_str(),
        );
        let _ = writeln!(
            out,
            "                <font>{}</font>",
            xml_escape(&record.style.font)
        );
        let _ = writeln!(out, "                <point-list>");
        for corner in record
            .corners
            .iter()
            .filter(|c| c.is_strictly_inside(dimensions))
        {
            let _ = writeln!(
                out,
                "                    <point>{},{}</point>",
                corner.x as i64, corner.y as i64
            );
        }
        let _ = writeln!(out, "                </point-list>");
        let _ = writeln!(out, "            </graphic>");
    }

    let _ = writeln!(out, "        </overlays>");
    let _ = writeln!(out, "    </image>");
    let _ = write!(out, "</session>");
    out
}

/// File name stem shared by all artifacts of one export: the source
/// path without its extension.
#[must_use]
pub fn default_root(identifier: &str) -> &str {
    let name_start = identifier.rfind(['/', '\\']).map_or(0, |i| i + 1);
    match identifier[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &identifier[..name_start + dot],
        _ => identifier,
    }
}

/// Name of a saved tile image.
///
/// `<root>_<cx>_<cy>_<label>.<extension>`, where `(cx, cy)` is the
/// tile centre at level 0. Unique per tile and resolution label.
#[must_use]
pub fn tile_file_name(root: &str, rect: Rect, label: &str, extension: &str) -> String {
    let (cx, cy) = rect.center();
    format!("{root}_{cx}_{cy}_{label}.{extension}")
}

/// Name of the session document for `root`.
#[must_use]
pub fn session_file_name(root: &str) -> String {
    format!("{root}_session.xml")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tissuetile_pipeline::Tile;

    use super::*;

    const DIMS: Dimensions = Dimensions::new(100, 100);

    fn record(x: u32, y: u32, size: u32, index: usize) -> RoiRecord {
        RoiRecord::new(
            Tile {
                rect: Rect::new(x, y, size, size),
                score: 1.0,
            },
            index,
        )
    }

    fn three_tiles() -> Vec<RoiRecord> {
        vec![
            record(10, 10, 20, 1),
            record(40, 10, 20, 2),
            // Right edge at 110: both right-hand corners fall outside.
            record(90, 10, 20, 3),
        ]
    }

    #[test]
    fn header_and_nesting() {
        let session = ExportSession::new("slides/case.svs", &three_tiles());
        let xml = to_session_xml(&session, DIMS);
        let lines: Vec<&str> = xml.lines().collect();
        assert_eq!(lines[0], r#"<?xml version="1.0"?>"#);
        assert_eq!(
            lines[1],
            r#"<session software="PathCore Session Printer" version="0.1.0">"#
        );
        assert_eq!(lines[2], r#"    <image identifier="slides/case.svs">"#);
        assert_eq!(lines[3], "        <overlays>");
        assert_eq!(lines[lines.len() - 3], "        </overlays>");
        assert_eq!(lines[lines.len() - 2], "    </image>");
        assert_eq!(lines[lines.len() - 1], "</session>");
    }

    #[test]
    fn one_graphic_per_record_in_reverse_order() {
        let session = ExportSession::new("a.tif", &three_tiles());
        let xml = to_session_xml(&session, DIMS);
        assert_eq!(xml.matches("<graphic ").count(), 3);
        let first = xml.find(r#"name="Region 3""#).unwrap();
        let second = xml.find(r#"name="Region 2""#).unwrap();
        let third = xml.find(r#"name="Region 1""#).unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn corners_outside_image_are_dropped() {
        let session = ExportSession::new("a.tif", &[record(90, 10, 20, 1)]);
        let xml = to_session_xml(&session, DIMS);
        assert_eq!(xml.matches("<point>").count(), 2);
        assert!(xml.contains("<point>90,10</point>"));
        assert!(xml.contains("<point>90,30</point>"));
    }

    #[test]
    fn corner_on_top_edge_is_dropped() {
        // Top-left at the origin, top-right at y = 0.
        let session = ExportSession::new("a.tif", &[record(0, 0, 20, 1)]);
        let xml = to_session_xml(&session, DIMS);
        assert_eq!(xml.matches("<point>").count(), 1);
        assert!(xml.contains("<point>20,20</point>"));
    }

    #[test]
    fn edge_tile_among_full_tiles() {
        let records = vec![
            record(10, 10, 20, 1),
            record(40, 40, 20, 2),
            // Right edge at 105: top-right and bottom-right are outside.
            record(85, 50, 20, 3),
        ];
        let xml = to_session_xml(&ExportSession::new("a.tif", &records), DIMS);
        let graphics: Vec<&str> = xml.split("<graphic ").skip(1).collect();
        assert_eq!(graphics.len(), 3);
        assert!(graphics[0].contains(r#"name="Region 3""#));
        assert_eq!(graphics[0].matches("<point>").count(), 2);
        assert_eq!(graphics[1].matches("<point>").count(), 4);
        assert_eq!(graphics[2].matches("<point>").count(), 4);
    }

    #[test]
    fn style_is_written() {
        let xml = to_session_xml(&ExportSession::new("a.tif", &three_tiles()), DIMS);
        assert!(xml.contains(r##"<pen color="#b5e61d" width="2" style="Solid"/>"##));
        assert!(xml.contains("<font>Arial,10</font>"));
        assert!(xml.contains(r#"type="rectangle""#));
        assert!(xml.contains(r#"description=" ""#));
    }

    #[test]
    fn identifier_is_escaped() {
        let session = ExportSession::new(r#"a&b "c".tif"#, &[]);
        let xml = to_session_xml(&session, DIMS);
        assert!(xml.contains(r#"identifier="a&amp;b &quot;c&quot;.tif""#));
        assert!(session.is_empty());
    }

    #[test]
    fn file_names() {
        let rect = Rect::new(100, 200, 33, 33);
        assert_eq!(
            tile_file_name("/data/case", rect, "20.0X", "tif"),
            "/data/case_116_216_20.0X.tif"
        );
        assert_eq!(session_file_name("/data/case"), "/data/case_session.xml");
    }

    #[test]
    fn default_root_strips_extension() {
        assert_eq!(default_root("/data/case.svs"), "/data/case");
        assert_eq!(default_root("case.tar.gz"), "case.tar");
        assert_eq!(default_root("/data.d/case"), "/data.d/case");
        assert_eq!(default_root(".hidden"), ".hidden");
    }
}

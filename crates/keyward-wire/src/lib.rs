//! # keyward-wire — License File Codec
//!
//! The wire format is a small XML dialect consumed by the external encoder
//! and the hardware-lock runtime:
//!
//! ```xml
//! <?xml version="1.0"?><!DOCTYPE license_server>
//!
//! <license_server port="1234" id="4CDCEE4C">
//! <feature
//!     id="WELL_EDIT"
//!     version="19.00"
//!     start="26.04.2026"
//!     end="18.06.2027"
//!     count="1"
//!     dupgroup="DISP"
//!     code="00000000000000000000000000000000" >
//! </feature>
//! <package ... >
//!     <feature id="MAPVIEW" />
//! </package>
//! </license_server>
//! ```
//!
//! Downstream tooling is byte-sensitive: attribute order, the two-decimal
//! version, and `DD.MM.YYYY` dates are part of the contract. Rendering is
//! therefore hand-formatted rather than serializer-driven, and the
//! version/date/code attributes round-trip as strings so reordering an
//! already-signed file never reformats its values.
//!
//! Parsing is event-based (`quick-xml`) and permissive about missing
//! attributes — they decode to empty/zero defaults. Malformed XML is a hard
//! error.

use std::collections::HashMap;
use std::fmt::Write as _;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use keyward_core::calendar::format_wire_date;
use keyward_core::model::{CatalogEntry, LicenseSetItem};

/// Placeholder signature code carried by entries that have not been through
/// the encoder yet: 32 zeros, same width as a real code.
pub const UNSIGNED_CODE: &str = "00000000000000000000000000000000";

/// The fixed license-server port stamped into generated files.
pub const SERVER_PORT: u32 = 1234;

/// Root-element data: the license-server port and the hardware key id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub port: u32,
    pub id: String,
}

/// One decoded license-file entry: a leaf feature, or a package with its
/// member stubs.
///
/// `version`, `start`, `end`, and `code` stay as the exact strings found in
/// the document; [`WireEntry::from_item`] formats them when an entry is
/// built from a store row instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEntry {
    pub id: String,
    pub is_package: bool,
    pub version: String,
    pub start: String,
    pub end: String,
    pub count: i32,
    pub dup_group: String,
    pub code: String,
    /// Member feature ids; empty for leaf features.
    pub members: Vec<String>,
}

/// Codec failure.
#[derive(Error, Debug)]
pub enum WireError {
    /// The document is not well-formed, or lacks a `license_server` root.
    #[error("malformed license file: {0}")]
    Malformed(String),
}

impl WireEntry {
    /// Build a wire entry from a stored license-set row and its resolved
    /// catalog entry. Formats the version with two decimals, the dates as
    /// `DD.MM.YYYY`, and stamps the unsigned placeholder code.
    pub fn from_item(item: &LicenseSetItem, entry: &CatalogEntry) -> Self {
        let members = match entry {
            CatalogEntry::Feature { .. } => Vec::new(),
            CatalogEntry::Package { members, .. } => members.clone(),
        };
        Self {
            id: item.feature.clone(),
            is_package: entry.is_package(),
            version: format_version(item.version),
            start: format_wire_date(item.start),
            end: format_wire_date(item.end),
            count: item.count,
            dup_group: item.dup_group.clone(),
            code: UNSIGNED_CODE.to_string(),
            members,
        }
    }
}

/// Render a version number the way the wire format expects it (two decimal
/// places, e.g. `19.00`).
pub fn format_version(version: f64) -> String {
    format!("{version:.2}")
}

// ── Parsing ─────────────────────────────────────────────────────────

fn attr_map(e: &BytesStart<'_>) -> Result<HashMap<String, String>, WireError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| WireError::Malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| WireError::Malformed(e.to_string()))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn take(attrs: &mut HashMap<String, String>, key: &str) -> String {
    attrs.remove(key).unwrap_or_default()
}

fn server_from_attrs(mut attrs: HashMap<String, String>) -> ServerInfo {
    let port = attrs
        .remove("port")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    ServerInfo {
        port,
        id: take(&mut attrs, "id"),
    }
}

fn entry_from_attrs(mut attrs: HashMap<String, String>, is_package: bool) -> WireEntry {
    let count = attrs
        .remove("count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    WireEntry {
        id: take(&mut attrs, "id"),
        is_package,
        version: take(&mut attrs, "version"),
        start: take(&mut attrs, "start"),
        end: take(&mut attrs, "end"),
        count,
        dup_group: take(&mut attrs, "dupgroup"),
        code: take(&mut attrs, "code"),
        members: Vec::new(),
    }
}

/// Decode a license file into its server info and entry list.
///
/// Top-level `feature` elements become leaf entries; `package` elements
/// become package entries whose member list is the nested stub ids. Entries
/// keep document order. Missing attributes decode to empty/zero defaults;
/// malformed XML fails with [`WireError::Malformed`].
pub fn parse(content: &str) -> Result<(ServerInfo, Vec<WireEntry>), WireError> {
    let mut reader = Reader::from_str(content);
    let mut server: Option<ServerInfo> = None;
    let mut entries = Vec::new();
    let mut open_package: Option<WireEntry> = None;
    let mut open_feature: Option<WireEntry> = None;

    loop {
        match reader.read_event() {
            Err(e) => return Err(WireError::Malformed(e.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"license_server" => server = Some(server_from_attrs(attr_map(&e)?)),
                b"package" => open_package = Some(entry_from_attrs(attr_map(&e)?, true)),
                b"feature" => {
                    let attrs = attr_map(&e)?;
                    if let Some(pkg) = open_package.as_mut() {
                        pkg.members.push(attrs.get("id").cloned().unwrap_or_default());
                    } else {
                        open_feature = Some(entry_from_attrs(attrs, false));
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"license_server" => server = Some(server_from_attrs(attr_map(&e)?)),
                b"package" => entries.push(entry_from_attrs(attr_map(&e)?, true)),
                b"feature" => {
                    let attrs = attr_map(&e)?;
                    if let Some(pkg) = open_package.as_mut() {
                        pkg.members.push(attrs.get("id").cloned().unwrap_or_default());
                    } else {
                        entries.push(entry_from_attrs(attrs, false));
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"package" => {
                    if let Some(pkg) = open_package.take() {
                        entries.push(pkg);
                    }
                }
                b"feature" => {
                    // Closes either a top-level feature or a member stub;
                    // stubs were already recorded on open.
                    if open_package.is_none() {
                        if let Some(feature) = open_feature.take() {
                            entries.push(feature);
                        }
                    }
                }
                _ => {}
            },
            Ok(_) => {}
        }
    }

    let server = server.ok_or_else(|| {
        WireError::Malformed("document has no license_server element".to_string())
    })?;
    Ok((server, entries))
}

// ── Canonical order & rendering ─────────────────────────────────────

/// Sort entries into canonical order: every leaf feature before every
/// package, ids ascending within each group. The sort is stable and total,
/// so applying it twice changes nothing.
pub fn reorder(entries: &mut [WireEntry]) {
    entries.sort_by(|a, b| {
        a.is_package
            .cmp(&b.is_package)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Serialize server info and entries back to the wire format.
///
/// Attribute order, indentation, and the document prologue are fixed;
/// rendering the same input always yields identical bytes.
pub fn render(server: &ServerInfo, entries: &[WireEntry]) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<?xml version=\"1.0\"?><!DOCTYPE license_server>\n\n<license_server port=\"{}\" id=\"{}\">\n",
        server.port, server.id
    );
    for entry in entries {
        let tag = if entry.is_package { "package" } else { "feature" };
        let _ = write!(
            out,
            "<{}\n\tid=\"{}\"\n\tversion=\"{}\"\n\tstart=\"{}\"\n\tend=\"{}\"\n\tcount=\"{}\"\n\tdupgroup=\"{}\"\n\tcode=\"{}\" >\n",
            tag, entry.id, entry.version, entry.start, entry.end, entry.count,
            entry.dup_group, entry.code
        );
        if entry.is_package {
            for member in &entry.members {
                let _ = writeln!(out, "\t<feature id=\"{member}\" />");
            }
        }
        let _ = writeln!(out, "</{tag}>");
    }
    out.push_str("</license_server>\n");
    out
}

/// Parse a license file, put its entries into canonical order, and render
/// it back. Idempotent: feeding the output through again yields identical
/// bytes.
pub fn reorder_document(content: &str) -> Result<String, WireError> {
    let (server, mut entries) = parse(content)?;
    reorder(&mut entries);
    Ok(render(&server, &entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<!DOCTYPE license_server>

<license_server port="1234" id="4CDCEE4C">

<package
        id="GEO_PACK"
        version="1.00"
        start="26.04.2026"
        end="18.06.2026"
        count="1"
        dupgroup="DISP"
        code="CF4449610C33DAC3A9C737CD4D93FFE1" >
    <feature id="MAPVIEW" />
    <feature id="SEIS_VIEW" />
</package>

<feature
        id="WELL_EDIT"
        version="19.00"
        start="26.04.2026"
        end="18.06.2026"
        count="3"
        dupgroup=""
        code="AB4449610C33DAC3A9C737CD4D93FFE2" >
</feature>

</license_server>
"#;

    fn sample_item() -> LicenseSetItem {
        LicenseSetItem {
            key_id: "4CDCEE4C".to_string(),
            feature: "WELL_EDIT".to_string(),
            version: 19.0,
            count: 3,
            start: NaiveDate::from_ymd_opt(2026, 4, 26).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 6, 18).unwrap(),
            dup_group: String::new(),
        }
    }

    #[test]
    fn parse_decodes_server_and_entries() {
        let (server, entries) = parse(SAMPLE).unwrap();
        assert_eq!(server.port, 1234);
        assert_eq!(server.id, "4CDCEE4C");
        assert_eq!(entries.len(), 2);

        let pkg = &entries[0];
        assert!(pkg.is_package);
        assert_eq!(pkg.id, "GEO_PACK");
        assert_eq!(pkg.members, vec!["MAPVIEW", "SEIS_VIEW"]);
        assert_eq!(pkg.code, "CF4449610C33DAC3A9C737CD4D93FFE1");

        let feature = &entries[1];
        assert!(!feature.is_package);
        assert_eq!(feature.id, "WELL_EDIT");
        assert_eq!(feature.version, "19.00");
        assert_eq!(feature.count, 3);
        assert!(feature.members.is_empty());
    }

    #[test]
    fn parse_defaults_missing_attributes() {
        let xml = r#"<license_server id="K1"><feature id="F1"></feature></license_server>"#;
        let (server, entries) = parse(xml).unwrap();
        assert_eq!(server.port, 0);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "F1");
        assert_eq!(entries[0].count, 0);
        assert_eq!(entries[0].version, "");
        assert_eq!(entries[0].code, "");
    }

    #[test]
    fn parse_rejects_mismatched_tags() {
        let xml = r#"<license_server id="K1"><feature id="F1"></license_server>"#;
        assert!(matches!(parse(xml), Err(WireError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_document_without_root() {
        assert!(matches!(parse("<other/>"), Err(WireError::Malformed(_))));
        assert!(matches!(parse(""), Err(WireError::Malformed(_))));
    }

    #[test]
    fn reorder_puts_leaf_features_before_packages() {
        let xml = reorder_document(SAMPLE).unwrap();
        let (_, entries) = parse(&xml).unwrap();
        assert_eq!(entries[0].id, "WELL_EDIT");
        assert!(!entries[0].is_package);
        assert_eq!(entries[1].id, "GEO_PACK");
        assert!(entries[1].is_package);
    }

    #[test]
    fn reorder_sorts_ids_within_groups() {
        let mut entries = vec![
            entry("P_ZULU", true),
            entry("F_ZULU", false),
            entry("P_ALFA", true),
            entry("F_ALFA", false),
        ];
        reorder(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["F_ALFA", "F_ZULU", "P_ALFA", "P_ZULU"]);
    }

    #[test]
    fn reorder_document_is_idempotent() {
        let once = reorder_document(SAMPLE).unwrap();
        let twice = reorder_document(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn reorder_preserves_signed_codes_and_value_strings() {
        let once = reorder_document(SAMPLE).unwrap();
        assert!(once.contains("code=\"CF4449610C33DAC3A9C737CD4D93FFE1\""));
        assert!(once.contains("version=\"1.00\""));
        assert!(once.contains("start=\"26.04.2026\""));
    }

    #[test]
    fn from_item_formats_store_values() {
        let entry = WireEntry::from_item(
            &sample_item(),
            &CatalogEntry::Feature {
                name: "WELL_EDIT".to_string(),
                description: String::new(),
            },
        );
        assert_eq!(entry.version, "19.00");
        assert_eq!(entry.start, "26.04.2026");
        assert_eq!(entry.end, "18.06.2026");
        assert_eq!(entry.code, UNSIGNED_CODE);
        assert!(!entry.is_package);
    }

    #[test]
    fn from_item_carries_package_members() {
        let mut item = sample_item();
        item.feature = "GEO_PACK".to_string();
        let entry = WireEntry::from_item(
            &item,
            &CatalogEntry::Package {
                name: "GEO_PACK".to_string(),
                description: String::new(),
                members: vec!["MAPVIEW".to_string(), "SEIS_VIEW".to_string()],
            },
        );
        assert!(entry.is_package);
        assert_eq!(entry.members, vec!["MAPVIEW", "SEIS_VIEW"]);
    }

    #[test]
    fn render_parse_roundtrip() {
        let server = ServerInfo {
            port: SERVER_PORT,
            id: "AA12BB34".to_string(),
        };
        let entries = vec![entry("F_ALFA", false), entry("P_ALFA", true)];
        let xml = render(&server, &entries);
        let (back_server, back_entries) = parse(&xml).unwrap();
        assert_eq!(back_server, server);
        assert_eq!(back_entries, entries);
    }

    fn entry(id: &str, is_package: bool) -> WireEntry {
        WireEntry {
            id: id.to_string(),
            is_package,
            version: "2.00".to_string(),
            start: "01.01.2026".to_string(),
            end: "01.01.2027".to_string(),
            count: 5,
            dup_group: "DISP".to_string(),
            code: UNSIGNED_CODE.to_string(),
            members: if is_package {
                vec!["F_ALFA".to_string()]
            } else {
                Vec::new()
            },
        }
    }
}

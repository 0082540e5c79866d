//! Protobuf metadata discovery from the vendor's bundled extension asset.
//!
//! The language server's `Metadata` message has no stable field numbering
//! across releases, but the numbering is recoverable from the minified
//! extension JavaScript, which registers the message with
//! `newFieldList(() => [{no:N, name:"X", ...}, ...])`. The bridge extracts
//! that table once per process; when the asset is missing or unparseable it
//! falls back to the numbering current releases ship, and the only risk is
//! a vendor-side decode error on the next call.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

/// Field numbers for the vendor `Metadata` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataFieldMap {
    pub api_key: u32,
    pub ide_name: u32,
    pub ide_version: u32,
    pub extension_version: u32,
    pub session_id: u32,
    pub locale: u32,
}

impl Default for MetadataFieldMap {
    fn default() -> Self {
        Self {
            api_key: 1,
            ide_name: 2,
            ide_version: 3,
            extension_version: 4,
            session_id: 5,
            locale: 6,
        }
    }
}

static FIELD_MAP: OnceLock<MetadataFieldMap> = OnceLock::new();

/// The process-wide metadata field map, discovered on first use.
pub fn metadata_field_map() -> &'static MetadataFieldMap {
    FIELD_MAP.get_or_init(|| {
        for path in asset_candidates() {
            let Ok(source) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Some(map) = parse_field_map(&source) {
                tracing::info!(asset = %path.display(), ?map, "Discovered metadata field map");
                return map;
            }
        }
        tracing::warn!("Extension asset not found or unparseable; using default field numbers");
        MetadataFieldMap::default()
    })
}

/// Candidate locations of the bundled extension asset, most specific first.
fn asset_candidates() -> Vec<PathBuf> {
    const SUFFIX: &str = "resources/app/extensions/windsurf/dist/extension.js";
    let mut candidates = Vec::new();

    #[cfg(target_os = "macos")]
    {
        candidates.push(PathBuf::from(
            "/Applications/Windsurf.app/Contents/Resources/app/extensions/windsurf/dist/extension.js",
        ));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(
                "Applications/Windsurf.app/Contents/Resources/app/extensions/windsurf/dist/extension.js",
            ));
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".local/share/windsurf").join(SUFFIX));
        }
        candidates.push(PathBuf::from("/usr/share/windsurf").join(SUFFIX));
        candidates.push(PathBuf::from("/opt/windsurf").join(SUFFIX));
    }

    #[cfg(target_os = "windows")]
    {
        candidates.push(PathBuf::from(r"C:\Program Files\Windsurf").join(SUFFIX));
        if let Some(data) = dirs::data_local_dir() {
            candidates.push(data.join("Programs/Windsurf").join(SUFFIX));
        }
    }

    candidates
}

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{\s*no:\s*(\d+)\s*,\s*name:\s*"([A-Za-z0-9_]+)""#).unwrap())
}

/// Extract the `Metadata` field numbering from extension source.
///
/// Takes the first `newFieldList(() => [...])` block that mentions both
/// `"api_key"` and `"ide_name"` and does not mention `"event_name"`; the
/// latter distinguishes the metadata message from the telemetry message that
/// carries the same credential fields. Unrecognized names in the block are
/// ignored; recognized names that are absent keep their defaults.
pub fn parse_field_map(source: &str) -> Option<MetadataFieldMap> {
    for block in field_list_blocks(source) {
        if !block.contains("\"api_key\"")
            || !block.contains("\"ide_name\"")
            || block.contains("\"event_name\"")
        {
            continue;
        }

        let mut map = MetadataFieldMap::default();
        for caps in entry_regex().captures_iter(block) {
            let Ok(no) = caps[1].parse::<u32>() else {
                continue;
            };
            if no == 0 {
                continue;
            }
            match &caps[2] {
                "api_key" => map.api_key = no,
                "ide_name" => map.ide_name = no,
                "ide_version" => map.ide_version = no,
                "extension_version" => map.extension_version = no,
                "session_id" => map.session_id = no,
                "locale" => map.locale = no,
                _ => {}
            }
        }
        return Some(map);
    }
    None
}

/// All `newFieldList(() => [ ... ])` blocks in the source, in order.
fn field_list_blocks(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices("newFieldList(").filter_map(move |(start, _)| {
        let rest = &source[start..];
        let end = rest.find("])")?;
        Some(&rest[..end])
    })
}

/// Entries of the vendor model enum: `(enum value, presentation name)`.
///
/// Maintenance-path extraction from
/// `setEnumType(_, "exa.codeium_common_pb.Model", [...])`. Entries whose
/// symbols mark telemetry, embedding, tab, preview, BYOK, private, or
/// experimental models are filtered before presentation, as is the zero
/// "unspecified" entry.
pub fn parse_model_enum(source: &str) -> Vec<(u32, String)> {
    const IGNORE: &[&str] = &[
        "UNSPECIFIED",
        "TELEMETRY",
        "EMBED",
        "TAB",
        "PREVIEW",
        "BYOK",
        "PRIVATE",
        "EXPERIMENTAL",
    ];

    let Some(start) = source
        .match_indices("setEnumType(")
        .map(|(i, _)| &source[i..])
        .find(|rest| {
            rest.find("])")
                .is_some_and(|end| rest[..end].contains("exa.codeium_common_pb.Model"))
        })
    else {
        return Vec::new();
    };
    let Some(end) = start.find("])") else {
        return Vec::new();
    };
    let block = &start[..end];

    let mut out = Vec::new();
    for caps in entry_regex().captures_iter(block) {
        let Ok(no) = caps[1].parse::<u32>() else {
            continue;
        };
        let symbol = caps[2].to_string();
        if no == 0 || IGNORE.iter().any(|marker| symbol.contains(marker)) {
            continue;
        }
        let name = symbol
            .strip_prefix("MODEL_")
            .unwrap_or(&symbol)
            .to_ascii_lowercase()
            .replace('_', "-");
        out.push((no, name));
    }
    out
}

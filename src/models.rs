//! Model registry: canonical ids, aliases, variant catalog, and the
//! enum/string-UID routing tables.
//!
//! Everything here is pure and deterministic: the same input and override
//! always produce the same [`ResolvedModel`]. Two routing modes exist and
//! exactly one is active per resolution: older models carry a non-zero
//! protobuf enum value, newer ones a string model UID.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Variant names the resolver recognizes as a trailing `-<variant>` suffix.
pub const KNOWN_VARIANTS: &[&str] = &[
    "low", "medium", "high", "xhigh", "thinking", "fast", "slow", "1m", "minimal",
];

/// Fallback model when the input matches nothing.
pub const DEFAULT_MODEL: &str = "claude-3.5-sonnet";
const DEFAULT_ENUM: u32 = 166;

/// One performance / reasoning / context tier of a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    /// Protobuf enum value; 0 for string-UID routing.
    pub enum_value: u32,
    /// String UID; takes precedence over the enum value when present.
    pub model_uid: Option<&'static str>,
    pub description: &'static str,
}

/// A model family with its aliases and variant catalog.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    pub canonical_id: &'static str,
    pub aliases: &'static [&'static str],
    /// Family-level enum value; 0 for string-UID families.
    pub enum_value: u32,
    pub default_variant: Option<&'static str>,
    pub variants: &'static [(&'static str, VariantSpec)],
}

impl ModelDescriptor {
    fn variant(&self, name: &str) -> Option<&VariantSpec> {
        self.variants
            .iter()
            .find_map(|(n, spec)| (*n == name).then_some(spec))
    }
}

/// The outcome of model resolution for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub canonical_id: String,
    pub variant: Option<String>,
    /// Non-zero iff this request routes by enum.
    pub enum_value: u32,
    /// Present iff this request routes by string UID.
    pub model_uid: Option<String>,
}

impl ResolvedModel {
    /// The string sent in the planner config: the UID for string-UID
    /// models, the vendor proto-name (`MODEL_` + symbol) otherwise.
    #[must_use]
    pub fn wire_name(&self) -> String {
        match &self.model_uid {
            Some(uid) => uid.clone(),
            None => format!("MODEL_{}", enum_symbol(&self.canonical_id)),
        }
    }
}

const fn uid(model_uid: &'static str, description: &'static str) -> VariantSpec {
    VariantSpec {
        enum_value: 0,
        model_uid: Some(model_uid),
        description,
    }
}

const fn legacy(enum_value: u32, description: &'static str) -> VariantSpec {
    VariantSpec {
        enum_value,
        model_uid: None,
        description,
    }
}

/// Model families with variant catalogs. Families without an entry here
/// resolve through the legacy flat enum map.
pub const CATALOG: &[ModelDescriptor] = &[
    ModelDescriptor {
        canonical_id: "claude-4.6-opus",
        aliases: &["claude-opus-4-6", "claude-4-6-opus", "claude-opus-4.6"],
        enum_value: 0,
        default_variant: Some("medium"),
        variants: &[
            ("medium", uid("claude-opus-4-6", "balanced reasoning effort")),
            ("thinking", uid("claude-opus-4-6-thinking", "extended thinking")),
            ("xhigh", uid("claude-opus-4-6-xhigh", "maximum reasoning effort")),
        ],
    },
    ModelDescriptor {
        canonical_id: "claude-4.5-sonnet",
        aliases: &["claude-sonnet-4-5", "claude-4-5-sonnet", "claude-sonnet-4.5"],
        enum_value: 0,
        default_variant: Some("medium"),
        variants: &[
            ("medium", uid("claude-sonnet-4-5", "balanced reasoning effort")),
            ("thinking", uid("claude-sonnet-4-5-thinking", "extended thinking")),
            ("1m", uid("claude-sonnet-4-5-1m", "1M-token context window")),
        ],
    },
    ModelDescriptor {
        canonical_id: "gpt-5",
        aliases: &["gpt5"],
        enum_value: 0,
        default_variant: Some("medium"),
        variants: &[
            ("minimal", uid("gpt-5-minimal", "fastest, minimal reasoning")),
            ("low", uid("gpt-5-low", "low reasoning effort")),
            ("medium", uid("gpt-5-medium", "balanced reasoning effort")),
            ("high", uid("gpt-5-high", "high reasoning effort")),
        ],
    },
    ModelDescriptor {
        canonical_id: "gpt-5.1",
        aliases: &["gpt-5-1", "gpt5.1"],
        enum_value: 0,
        default_variant: Some("high"),
        variants: &[
            ("low", uid("gpt-5.1-low", "low reasoning effort")),
            ("medium", uid("gpt-5.1-medium", "balanced reasoning effort")),
            ("high", uid("gpt-5.1-high", "high reasoning effort")),
            ("xhigh", uid("gpt-5.1-xhigh", "maximum reasoning effort")),
        ],
    },
    ModelDescriptor {
        canonical_id: "gemini-3.0-pro",
        aliases: &["gemini-3-0-pro", "gemini-3-pro"],
        enum_value: 0,
        default_variant: Some("high"),
        variants: &[
            ("low", uid("gemini-3-0-pro-low", "low thinking budget")),
            ("high", uid("gemini-3-0-pro-high", "high thinking budget")),
        ],
    },
    ModelDescriptor {
        canonical_id: "gemini-2.5-pro",
        aliases: &["gemini-2-5-pro"],
        enum_value: 267,
        default_variant: Some("fast"),
        variants: &[
            ("fast", legacy(268, "standard serving tier")),
            ("slow", legacy(269, "discounted serving tier")),
        ],
    },
    ModelDescriptor {
        canonical_id: "grok-4",
        aliases: &["grok4"],
        enum_value: 0,
        default_variant: Some("medium"),
        variants: &[
            ("medium", uid("grok-4", "standard serving")),
            ("fast", uid("grok-4-fast", "low-latency serving")),
        ],
    },
];

/// Legacy flat enum map, used when no variant catalog entry exists.
const LEGACY_MODELS: &[(&str, u32)] = &[
    ("claude-3.5-sonnet", 166),
    ("gpt-4o", 176),
    ("gpt-4o-mini", 185),
    ("o3-mini", 229),
    ("deepseek-v3", 233),
    ("deepseek-r1", 234),
    ("claude-3.7-sonnet", 236),
    ("claude-3.7-sonnet-thinking", 237),
    ("gemini-2.0-flash", 239),
    ("gemini-2.5-flash", 254),
];

/// Extra aliases on top of the per-descriptor lists.
const EXTRA_ALIASES: &[(&str, &str)] = &[
    ("claude-3-5-sonnet", "claude-3.5-sonnet"),
    ("claude-3.5-sonnet-20241022", "claude-3.5-sonnet"),
    ("claude-3-7-sonnet", "claude-3.7-sonnet"),
    ("gemini-2-0-flash", "gemini-2.0-flash"),
    ("gemini-2-5-flash", "gemini-2.5-flash"),
];

fn alias_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut map = HashMap::new();
        for desc in CATALOG {
            for alias in desc.aliases {
                map.insert(*alias, desc.canonical_id);
            }
        }
        for (alias, canonical) in EXTRA_ALIASES {
            map.insert(*alias, *canonical);
        }
        map
    })
}

fn name_to_enum() -> &'static HashMap<&'static str, u32> {
    static MAP: OnceLock<HashMap<&'static str, u32>> = OnceLock::new();
    MAP.get_or_init(|| LEGACY_MODELS.iter().copied().collect())
}

/// Reverse of the legacy map, for presentation.
pub fn enum_to_name(value: u32) -> Option<&'static str> {
    LEGACY_MODELS
        .iter()
        .find_map(|(name, e)| (*e == value).then_some(*name))
}

fn descriptor_for(canonical: &str) -> Option<&'static ModelDescriptor> {
    CATALOG.iter().find(|d| d.canonical_id == canonical)
}

/// Map an id through the alias table, or accept it if already canonical.
fn lookup_canonical(id: &str) -> Option<&'static str> {
    if let Some(canonical) = alias_map().get(id) {
        return Some(*canonical);
    }
    if let Some(desc) = descriptor_for(id) {
        return Some(desc.canonical_id);
    }
    name_to_enum().get_key_value(id).map(|(name, _)| *name)
}

/// `canonical-id` → `CANONICAL_ID` for vendor proto-name rendering.
fn enum_symbol(canonical: &str) -> String {
    canonical
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn split_known_suffix(id: &str) -> Option<(&str, &'static str)> {
    for &variant in KNOWN_VARIANTS {
        if let Some(prefix) = id
            .strip_suffix(variant)
            .and_then(|p| p.strip_suffix('-'))
        {
            if !prefix.is_empty() {
                return Some((prefix, variant));
            }
        }
    }
    None
}

/// Resolve a user-supplied model string to a routing decision.
///
/// Precedence: an explicit `override_variant` beats anything parsed from
/// the input; a `:variant` in the input beats a `-variant` suffix; a
/// canonical-id match beats an alias match. Unknown inputs fall back to
/// [`DEFAULT_MODEL`].
pub fn resolve(input: &str, override_variant: Option<&str>) -> ResolvedModel {
    let input = input.trim();

    // 1. Parse the variant out of the input: `id:variant` first, then a
    //    trailing `-variant` suffix whose prefix is a known id.
    let (mut id_part, mut variant_part) = match input.split_once(':') {
        Some((id, variant)) if !variant.is_empty() => (id, Some(variant)),
        Some((id, _)) => (id, None),
        None => (input, None),
    };
    if variant_part.is_none() {
        if let Some((prefix, tail)) = split_known_suffix(id_part) {
            if lookup_canonical(prefix).is_some() {
                id_part = prefix;
                variant_part = Some(tail);
            }
        }
    }

    // 2. The caller's override wins over anything parsed.
    let requested = override_variant.or(variant_part);

    // 3-4. Canonicalize and consult the variant catalog.
    let canonical = lookup_canonical(id_part);
    if let Some(canonical) = canonical {
        if let Some(desc) = descriptor_for(canonical) {
            return resolve_in_catalog(desc, requested);
        }
    }

    // 5. Legacy flat map. A variant-qualified legacy model exists only as
    //    a dash-joined compound key ("claude-3.7-sonnet-thinking"), so when
    //    a variant was requested the recombined key is tried first;
    //    otherwise the colon and override spellings would silently drop the
    //    tier that the suffix spelling resolves.
    let legacy = |key: &str| {
        name_to_enum().get(key).map(|value| ResolvedModel {
            canonical_id: key.to_string(),
            variant: None,
            enum_value: *value,
            model_uid: None,
        })
    };
    if let Some(variant) = requested {
        for id in [Some(id_part), canonical].into_iter().flatten() {
            if let Some(resolved) = legacy(&format!("{id}-{variant}")) {
                return resolved;
            }
        }
    }
    for candidate in [Some(input), Some(id_part), canonical].into_iter().flatten() {
        if let Some(resolved) = legacy(candidate) {
            return resolved;
        }
    }

    ResolvedModel {
        canonical_id: DEFAULT_MODEL.to_string(),
        variant: None,
        enum_value: DEFAULT_ENUM,
        model_uid: None,
    }
}

fn resolve_in_catalog(desc: &ModelDescriptor, requested: Option<&str>) -> ResolvedModel {
    // Requested variant, falling back to the family default, falling back
    // to the first catalog entry. An unknown requested name degrades to the
    // default rather than erroring; model selection must not fail a request.
    let spec_for = |name: Option<&str>| {
        name.and_then(|n| desc.variant(n).map(|spec| (n.to_string(), *spec)))
    };
    let (name, spec) = spec_for(requested)
        .or_else(|| spec_for(desc.default_variant))
        .unwrap_or_else(|| {
            let (n, spec) = desc.variants[0];
            (n.to_string(), spec)
        });

    match spec.model_uid {
        Some(uid) => ResolvedModel {
            canonical_id: desc.canonical_id.to_string(),
            variant: Some(name),
            enum_value: 0,
            model_uid: Some(uid.to_string()),
        },
        None => ResolvedModel {
            canonical_id: desc.canonical_id.to_string(),
            variant: Some(name),
            enum_value: spec.enum_value,
            model_uid: None,
        },
    }
}

/// `(id, variant names)` pairs for the models listing: catalog families
/// first, then legacy flat-map entries.
pub fn listings() -> Vec<(&'static str, Option<Vec<&'static str>>)> {
    let mut out: Vec<(&'static str, Option<Vec<&'static str>>)> = CATALOG
        .iter()
        .map(|desc| {
            (
                desc.canonical_id,
                Some(desc.variants.iter().map(|(name, _)| *name).collect()),
            )
        })
        .collect();
    for (name, _) in LEGACY_MODELS {
        out.push((*name, None));
    }
    out
}

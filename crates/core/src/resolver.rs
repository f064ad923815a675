//! Category label to map symbol resolution.
//!
//! [`Resolver`] owns an immutable lookup table built once at construction
//! and injected wherever markers are produced. Lookups normalize the label
//! first (trim, lowercase, Polish diacritics folded, inner whitespace
//! collapsed) so `" BWP "` and `"bwp"` resolve identically.
//!
//! Resolution is total: unknown, empty, or absent labels map to the
//! table's default descriptor.

use std::collections::HashMap;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Icon size in pixels for category symbols.
pub const ICON_SIZE: [u32; 2] = [25, 25];

/// Anchor point (relative to the icon's top-left) placed on the position.
pub const ICON_ANCHOR: [i32; 2] = [12, 25];

/// Popup offset relative to the anchor.
pub const POPUP_ANCHOR: [i32; 2] = [0, -25];

/// The plain pin used for points of interest is taller than category icons.
pub const PLACE_MARKER_SIZE: [u32; 2] = [25, 41];
pub const PLACE_MARKER_ANCHOR: [i32; 2] = [12, 41];

/// Label under which airborne platforms are resolved.
pub const PLATFORM_LABEL: &str = "drone";

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Visual symbol families known to the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Symbol {
    InfantryVehicle,
    Howitzer,
    Mortar,
    RocketLauncher,
    AirborneObserver,
    PlaceMarker,
    Default,
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InfantryVehicle => "infantry-vehicle",
            Self::Howitzer => "howitzer",
            Self::Mortar => "mortar",
            Self::RocketLauncher => "rocket-launcher",
            Self::AirborneObserver => "airborne-observer",
            Self::PlaceMarker => "place-marker",
            Self::Default => "default",
        }
    }
}

/// Rendering instructions for one marker icon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub symbol: Symbol,
    pub icon_url: String,
    pub icon_size: [u32; 2],
    pub icon_anchor: [i32; 2],
    pub popup_anchor: [i32; 2],
}

impl Descriptor {
    /// A category icon with the standard square geometry.
    pub fn icon(symbol: Symbol, icon_url: impl Into<String>) -> Self {
        Self {
            symbol,
            icon_url: icon_url.into(),
            icon_size: ICON_SIZE,
            icon_anchor: ICON_ANCHOR,
            popup_anchor: POPUP_ANCHOR,
        }
    }

    /// The plain pin used for points of interest.
    pub fn place_marker() -> Self {
        Self {
            symbol: Symbol::PlaceMarker,
            icon_url: "icons/marker-icon.png".to_string(),
            icon_size: PLACE_MARKER_SIZE,
            icon_anchor: PLACE_MARKER_ANCHOR,
            popup_anchor: POPUP_ANCHOR,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Immutable label to descriptor table. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Resolver {
    table: HashMap<String, Descriptor>,
    default: Descriptor,
    place_marker: Descriptor,
}

impl Resolver {
    /// Build a resolver from `(label, descriptor)` entries.
    ///
    /// Labels are normalized on insertion. Later entries win on collision.
    pub fn new<I, S>(entries: I, default: Descriptor) -> Self
    where
        I: IntoIterator<Item = (S, Descriptor)>,
        S: AsRef<str>,
    {
        let table = entries
            .into_iter()
            .map(|(label, descriptor)| (normalize(label.as_ref()), descriptor))
            .collect();
        Self {
            table,
            default,
            place_marker: Descriptor::place_marker(),
        }
    }

    /// The operational table: Polish and English category names.
    pub fn standard() -> Self {
        let infantry = Descriptor::icon(Symbol::InfantryVehicle, "icons/bwp.png");
        let howitzer = Descriptor::icon(Symbol::Howitzer, "icons/howitzer.png");
        let mortar = Descriptor::icon(Symbol::Mortar, "icons/mortar.png");
        let launcher = Descriptor::icon(Symbol::RocketLauncher, "icons/rocketlauncher.png");
        let observer = Descriptor::icon(Symbol::AirborneObserver, "icons/drone.png");

        Self::new(
            [
                ("bwp", infantry),
                ("haubica", howitzer.clone()),
                ("howitzer", howitzer),
                ("mozdzierz", mortar.clone()),
                ("mortar", mortar),
                ("wyrzutnia", launcher.clone()),
                ("rocket launcher", launcher),
                (PLATFORM_LABEL, observer),
            ],
            Descriptor::icon(Symbol::Default, "icons/default.png"),
        )
    }

    /// Resolve a category label. Never fails.
    pub fn resolve(&self, label: Option<&str>) -> &Descriptor {
        label
            .map(normalize)
            .filter(|key| !key.is_empty())
            .and_then(|key| self.table.get(&key))
            .unwrap_or(&self.default)
    }

    pub fn default_descriptor(&self) -> &Descriptor {
        &self.default
    }

    /// Descriptor for airborne platforms, independent of any category.
    pub fn platform_descriptor(&self) -> &Descriptor {
        self.resolve(Some(PLATFORM_LABEL))
    }

    pub fn place_descriptor(&self) -> &Descriptor {
        &self.place_marker
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::standard()
    }
}

/// Canonical lookup key for a label.
fn normalize(label: &str) -> String {
    let folded: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'ą' => 'a',
            'ć' => 'c',
            'ę' => 'e',
            'ł' => 'l',
            'ń' => 'n',
            'ó' => 'o',
            'ś' => 's',
            'ź' | 'ż' => 'z',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

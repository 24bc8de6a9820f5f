//! Map list resolution.
//!
//! The cluster spec declares maps as an ordered list of entries. An entry is
//! either a concrete map id (`TheIsland_WP`), a named group (`@canonical`,
//! `@official`, optionally suffixed with `NoClub` to drop Club ARK), or an
//! exclusion (`-TheIsland_WP`) which removes a map contributed by an earlier
//! entry.

use serde::{Deserialize, Serialize};

/// Club ARK, the mod map that ships with every canonical set.
pub const CLUB_ARK: &str = "BobsMissions_WP";

/// Story maps plus Club ARK, in release order.
pub const CANONICAL_MAPS: &[&str] = &[
    CLUB_ARK,
    "TheIsland_WP",
    "ScorchedEarth_WP",
    "Aberration_WP",
    "Extinction_WP",
];

/// Canonical maps plus the official non-story releases.
pub const OFFICIAL_MAPS: &[&str] = &[
    CLUB_ARK,
    "TheIsland_WP",
    "TheCenter_WP",
    "ScorchedEarth_WP",
    "Aberration_WP",
    "Extinction_WP",
];

/// A logical game map resolved from the declared map list.
///
/// Not persisted as its own object. Ports are assigned from the cluster's
/// port bases by position in the resolved list, so they are stable as long
/// as the declared list is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMap {
    /// Unreal map id, e.g. `TheIsland_WP`.
    pub id: String,
    /// Human readable name used in broadcast messages.
    pub name: String,
    /// DNS-safe identifier used in pod/service names and label values.
    pub slug: String,
    pub game_port: u16,
    pub rcon_port: u16,
}

impl GameMap {
    pub fn new(id: &str, index: u16, game_port_start: u16, rcon_port_start: u16) -> Self {
        Self {
            id: id.to_owned(),
            name: map_name(id),
            slug: map_slug(id),
            game_port: game_port_start + index,
            rcon_port: rcon_port_start + index,
        }
    }
}

/// Expand group references and apply exclusions, returning concrete map ids.
///
/// Ordering: maps that appear in the official list come first, in official
/// order; remaining custom maps follow in declared order. Duplicates keep
/// their first occurrence.
pub fn expand_maps(declared: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = vec![];
    let mut excluded: Vec<String> = vec![];

    for entry in declared {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(removed) = entry.strip_prefix('-') {
            excluded.push(removed.to_owned());
            continue;
        }
        match entry {
            "@canonical" => extend_unique(&mut selected, CANONICAL_MAPS),
            "@canonicalNoClub" => {
                extend_unique(&mut selected, &CANONICAL_MAPS[1..]);
            }
            "@official" => extend_unique(&mut selected, OFFICIAL_MAPS),
            "@officialNoClub" => {
                extend_unique(&mut selected, &OFFICIAL_MAPS[1..]);
            }
            id => {
                if !selected.iter().any(|m| m == id) {
                    selected.push(id.to_owned());
                }
            }
        }
    }

    selected.retain(|m| !excluded.contains(m));

    // official maps first in official order, customs after in declared order
    let mut ordered: Vec<String> = OFFICIAL_MAPS
        .iter()
        .filter(|m| selected.iter().any(|s| s == *m))
        .map(|m| (*m).to_owned())
        .collect();
    for map in selected {
        if !OFFICIAL_MAPS.contains(&map.as_str()) {
            ordered.push(map);
        }
    }
    ordered
}

/// Resolve declared maps into [`GameMap`]s with assigned ports.
pub fn resolve_maps(declared: &[String], game_port_start: u16, rcon_port_start: u16) -> Vec<GameMap> {
    expand_maps(declared)
        .iter()
        .enumerate()
        .map(|(idx, id)| GameMap::new(id, idx as u16, game_port_start, rcon_port_start))
        .collect()
}

fn extend_unique(selected: &mut Vec<String>, maps: &[&str]) {
    for map in maps {
        if !selected.iter().any(|m| m == map) {
            selected.push((*map).to_owned());
        }
    }
}

/// DNS-safe identifier for a map id: lowercased, `_WP` suffix stripped.
pub fn map_slug(id: &str) -> String {
    let trimmed = id.strip_suffix("_WP").unwrap_or(id);
    let mut slug = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_owned()
}

/// Display name for a map id. Known maps get their marketing name,
/// everything else falls back to splitting the camel-cased id.
pub fn map_name(id: &str) -> String {
    match id {
        CLUB_ARK => "Club ARK".to_owned(),
        "TheIsland_WP" => "The Island".to_owned(),
        "TheCenter_WP" => "The Center".to_owned(),
        "ScorchedEarth_WP" => "Scorched Earth".to_owned(),
        "Aberration_WP" => "Aberration".to_owned(),
        "Extinction_WP" => "Extinction".to_owned(),
        other => {
            let trimmed = other.strip_suffix("_WP").unwrap_or(other);
            let mut name = String::with_capacity(trimmed.len() + 4);
            let mut prev_lower = false;
            for ch in trimmed.chars() {
                if ch == '_' || ch == '-' {
                    prev_lower = false;
                    if !name.ends_with(' ') {
                        name.push(' ');
                    }
                    continue;
                }
                if ch.is_ascii_uppercase() && prev_lower && !name.is_empty() {
                    name.push(' ');
                }
                prev_lower = ch.is_ascii_lowercase();
                name.push(ch);
            }
            name.trim().to_owned()
        }
    }
}

//! Name allocation for discoveries. Names are drawn from a fixed semantic
//! vocabulary, checked against everything already visible in the store, and
//! recorded in the name reserve before they are handed out.

use anyhow::Result;
use diesel::prelude::*;
use rand::Rng;
use std::collections::HashSet;
use std::sync::OnceLock;

use diesel::sqlite::SqliteConnection;

use crate::db::TableFlags;
use crate::services::origins;

pub const NAME_STARTS: [&str; 55] = [
    "amber", "arc", "ash", "aurora", "bloom", "breeze", "brisk", "cedar", "cinder", "cloud",
    "coral", "crest", "crystal", "dawn", "drift", "dusk", "echo", "ember", "fable", "fern",
    "flint", "frost", "gale", "glimmer", "glow", "halo", "haze", "iris", "ivory", "jade", "lark",
    "luna", "meadow", "mist", "moss", "night", "nova", "onyx", "opal", "pearl", "petal", "pine",
    "quill", "rain", "raven", "ridge", "river", "sable", "shade", "silver", "sol", "storm",
    "terra", "vale", "wren",
];

pub const NAME_ENDS: [&str; 45] = [
    "beam", "bell", "bird", "brook", "burst", "chime", "cliff", "crown", "dance", "dew", "dream",
    "fall", "feather", "field", "fire", "flare", "flash", "flow", "glade", "glen", "grove",
    "heart", "hollow", "leaf", "light", "mark", "moon", "peak", "pulse", "reach", "rise", "run",
    "shine", "song", "spark", "spire", "star", "stone", "tide", "trail", "veil", "wave",
    "whisper", "wind", "wing",
];

pub const SINGLE_NAMES: [&str; 75] = [
    "abyss", "alcove", "alloy", "anthem", "atlas", "aura", "basalt", "beacon", "borealis",
    "cairn", "calyx", "canopy", "cascade", "cavern", "celeste", "cipher", "citrine", "cobalt",
    "comet", "cosmos", "current", "cyclone", "delta", "dune", "eclipse", "eddy", "enigma",
    "ephemera", "equinox", "estuary", "ferrite", "fjord", "flora", "fresco", "galaxy", "garnet",
    "geyser", "glacier", "gossamer", "harbor", "horizon", "inlet", "isle", "karst", "lagoon",
    "lantern", "lattice", "loam", "mantle", "marble", "meridian", "mirage", "monsoon", "nebula",
    "nimbus", "oasis", "obsidian", "orchard", "panorama", "pinnacle", "prairie", "prism",
    "quartz", "reef", "sierra", "solstice", "spectrum", "summit", "tempest", "thicket", "tundra",
    "umbra", "vertex", "vista", "zephyr",
];

/// Hint families for RGB-derived names, darkest to lightest within each hue
/// bucket. The first word doubles as the family name.
pub const COLOR_FAMILIES: [(&str, [&str; 5]); 15] = [
    ("shadow", ["shadow", "charcoal", "soot", "pitch", "obsidian"]),
    ("graphite", ["graphite", "iron", "smoke", "pewter", "gunmetal"]),
    ("slate", ["slate", "stone", "ash", "cinder", "flint"]),
    ("mist", ["mist", "fog", "pearl", "chalk", "linen"]),
    ("ember", ["ember", "scarlet", "crimson", "cherry", "flame"]),
    ("sunset", ["sunset", "amber", "apricot", "marigold", "honey"]),
    ("rust", ["rust", "copper", "sienna", "umber", "mahogany"]),
    ("moss", ["moss", "fern", "sage", "clover", "mint"]),
    ("forest", ["forest", "pine", "juniper", "ivy", "emerald"]),
    ("olive", ["olive", "khaki", "bronze", "mustard", "ochre"]),
    ("teal", ["teal", "lagoon", "aqua", "turquoise", "spruce"]),
    ("violet", ["violet", "lilac", "orchid", "plum", "amethyst"]),
    ("ocean", ["ocean", "azure", "cobalt", "sapphire", "cerulean"]),
    ("midnight", ["midnight", "indigo", "navy", "ink", "abyss"]),
    ("neutral", ["neutral", "taupe", "sand", "dove", "fawn"]),
];

/// Full vocabulary, used by the gibberish detector as the whitelist.
pub fn vocabulary() -> &'static HashSet<&'static str> {
    static VOCAB: OnceLock<HashSet<&'static str>> = OnceLock::new();
    VOCAB.get_or_init(|| {
        let mut set: HashSet<&'static str> = HashSet::new();
        set.extend(NAME_STARTS);
        set.extend(NAME_ENDS);
        set.extend(SINGLE_NAMES);
        for (_, words) in COLOR_FAMILIES {
            set.extend(words);
        }
        set
    })
}

/// Every display name visible in the store, loaded once and kept in sync as
/// this pool hands out new names. Uniqueness enforcement is in the UNIQUE
/// constraint on name_reserve; the pool just avoids collisions cheaply.
pub struct NamePool {
    used: HashSet<String>,
}

macro_rules! collect_names {
    ($conn:expr, $tables:expr, $used:expr, $($table:ident),+ $(,)?) => {
        $(
            if $tables.has(stringify!($table)) {
                let names: Vec<String> = crate::schema::$table::dsl::$table
                    .select(crate::schema::$table::dsl::name)
                    .load($conn)?;
                $used.extend(names);
            }
        )+
    };
}

impl NamePool {
    pub fn load(conn: &mut SqliteConnection, tables: &TableFlags) -> Result<Self> {
        let mut used: HashSet<String> = HashSet::new();
        collect_names!(
            conn,
            tables,
            used,
            name_reserve,
            static_colors,
            static_sounds,
            learned_colors,
            learned_motion,
            learned_lighting,
            learned_composition,
            learned_graphics,
            learned_temporal,
            learned_technical,
            learned_time,
            learned_gradient,
            learned_camera,
            learned_transition,
            learned_depth,
            learned_audio_semantic,
            learned_blends,
            narrative_entries,
        );
        Ok(NamePool { used })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Records the name in the reserve (first-writer-wins) and in the local
    /// set. Canonical/origin terms are valid without a reserve entry.
    pub fn reserve(
        &mut self,
        conn: &mut SqliteConnection,
        tables: &TableFlags,
        name: &str,
    ) -> Result<()> {
        if !origins::is_origin_term(name) {
            if tables.has("name_reserve") {
                use crate::schema::name_reserve::dsl;
                diesel::insert_into(dsl::name_reserve)
                    .values(crate::models::NewNameReserveEntry {
                        name: name.to_string(),
                    })
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            } else {
                tracing::warn!("name_reserve table absent; skipping reserve of '{}'", name);
            }
        }
        self.used.insert(name.to_string());
        Ok(())
    }

    /// Draws a fresh semantic name, unique across the reserve and every
    /// registry name column, reserving it before returning.
    pub fn draw_unique(&mut self, conn: &mut SqliteConnection, tables: &TableFlags) -> Result<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let candidate = draw_candidate(&mut rng);
            if !self.used.contains(&candidate) {
                self.reserve(conn, tables, &candidate)?;
                return Ok(candidate);
            }
        }
        for _ in 0..50 {
            let candidate = format!("Novel{:05}", rng.gen_range(0..100_000u32));
            if !self.used.contains(&candidate) {
                self.reserve(conn, tables, &candidate)?;
                return Ok(candidate);
            }
        }
        anyhow::bail!("name space exhausted")
    }

    /// Draws a candidate without touching the store; dry-run callers use this
    /// to report what a real run would pick.
    pub fn propose(&mut self) -> String {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let candidate = draw_candidate(&mut rng);
            if !self.used.contains(&candidate) {
                self.used.insert(candidate.clone());
                return candidate;
            }
        }
        let candidate = format!("Novel{:05}", rng.gen_range(0..100_000u32));
        self.used.insert(candidate.clone());
        candidate
    }

    /// RGB-hinted name for a static color discovery.
    pub fn color_name(
        &mut self,
        conn: &mut SqliteConnection,
        tables: &TableFlags,
        r: i32,
        g: i32,
        b: i32,
    ) -> Result<String> {
        let name = rgb_to_semantic_color_name(r, g, b, &self.used);
        self.reserve(conn, tables, &name)?;
        Ok(name)
    }

    /// Resolves a blend's display name: keep the base when free, then numbered
    /// suffixes 2..=100, then a random 4-digit suffix.
    pub fn blend_name(
        &mut self,
        conn: &mut SqliteConnection,
        tables: &TableFlags,
        base: &str,
    ) -> Result<String> {
        if !self.used.contains(base) {
            self.reserve(conn, tables, base)?;
            return Ok(base.to_string());
        }
        for n in 2..=100u32 {
            let candidate = format!("{base}{n}");
            if !self.used.contains(&candidate) {
                self.reserve(conn, tables, &candidate)?;
                return Ok(candidate);
            }
        }
        let mut rng = rand::thread_rng();
        let candidate = format!("{base}{:04}", rng.gen_range(0..10_000u32));
        self.reserve(conn, tables, &candidate)?;
        Ok(candidate)
    }
}

fn draw_candidate(rng: &mut impl Rng) -> String {
    let start = NAME_STARTS[rng.gen_range(0..NAME_STARTS.len())];
    let end = NAME_ENDS[rng.gen_range(0..NAME_ENDS.len())];
    // Awkward joins (doubled letter at the seam) fall back to a single word.
    if start.as_bytes().last() == end.as_bytes().first() {
        return SINGLE_NAMES[rng.gen_range(0..SINGLE_NAMES.len())].to_string();
    }
    format!("{start}{end}")
}

/// Deterministic RGB → hint family, then the first unused word in the family.
pub fn rgb_to_semantic_color_name(r: i32, g: i32, b: i32, seen: &HashSet<String>) -> String {
    let family = hint_family(r, g, b);
    let words = COLOR_FAMILIES
        .iter()
        .find(|(name, _)| *name == family)
        .map(|(_, words)| words)
        .expect("hint_family returns a known family");
    for word in words {
        if !seen.contains(*word) {
            return word.to_string();
        }
    }
    invented_word((r * 31 + g * 37 + b * 41).unsigned_abs() as u64)
}

fn hint_family(r: i32, g: i32, b: i32) -> &'static str {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let lum = (r + g + b) / 3;

    // Low spread means achromatic; bucket by lightness.
    if max - min < 28 {
        return match lum {
            l if l < 40 => "shadow",
            l if l < 90 => "graphite",
            l if l < 140 => "slate",
            l if l < 200 => "neutral",
            _ => "mist",
        };
    }

    if r >= g && r >= b {
        if b > g + 40 {
            "violet"
        } else if g > b + 40 && lum >= 140 {
            "sunset"
        } else if lum < 90 {
            "rust"
        } else if lum < 160 {
            "ember"
        } else {
            "sunset"
        }
    } else if g >= r && g >= b {
        if b > r + 40 {
            "teal"
        } else if lum < 80 {
            "forest"
        } else if r > b + 40 {
            "olive"
        } else {
            "moss"
        }
    } else if lum < 70 {
        "midnight"
    } else if r > g + 40 {
        "violet"
    } else if g > r + 40 {
        "teal"
    } else {
        "ocean"
    }
}

/// Pronounceable invented word, fully determined by the seed.
fn invented_word(seed: u64) -> String {
    const CONSONANTS: &[u8] = b"bcdfglmnprstvz";
    const VOWELS: &[u8] = b"aeiou";
    let len = 6 + (seed % 3) as usize;
    let mut s = seed | 1;
    let mut out = String::with_capacity(len);
    for i in 0..len {
        s = s
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let set = if i % 2 == 0 { CONSONANTS } else { VOWELS };
        out.push(set[(s >> 33) as usize % set.len()] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_sizes() {
        assert_eq!(NAME_STARTS.len(), 55);
        assert_eq!(NAME_ENDS.len(), 45);
        assert_eq!(SINGLE_NAMES.len(), 75);
        assert_eq!(COLOR_FAMILIES.len(), 15);
    }

    #[test]
    fn test_rgb_hint_families() {
        let seen = HashSet::new();
        assert_eq!(rgb_to_semantic_color_name(10, 10, 10, &seen), "shadow");
        assert_eq!(rgb_to_semantic_color_name(250, 250, 250, &seen), "mist");
        assert_eq!(rgb_to_semantic_color_name(200, 40, 40, &seen), "ember");
        assert_eq!(rgb_to_semantic_color_name(20, 30, 120, &seen), "midnight");
        assert_eq!(rgb_to_semantic_color_name(30, 120, 40, &seen), "forest");
    }

    #[test]
    fn test_rgb_skips_seen_words() {
        let mut seen = HashSet::new();
        seen.insert("shadow".to_string());
        assert_eq!(rgb_to_semantic_color_name(10, 10, 10, &seen), "charcoal");
    }

    #[test]
    fn test_rgb_falls_back_to_invented_word() {
        let mut seen = HashSet::new();
        for (_, words) in COLOR_FAMILIES {
            for w in words {
                seen.insert(w.to_string());
            }
        }
        let a = rgb_to_semantic_color_name(10, 10, 10, &seen);
        let b = rgb_to_semantic_color_name(10, 10, 10, &seen);
        // Deterministic for identical input.
        assert_eq!(a, b);
        assert!((6..=8).contains(&a.len()));
    }

    #[test]
    fn test_draw_candidate_rejects_doubled_seam() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let name = draw_candidate(&mut rng);
            assert!(!name.is_empty());
        }
    }
}

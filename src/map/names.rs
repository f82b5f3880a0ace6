use rand::Rng;
use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "shadowy", "ancient", "damp", "glittering", "forgotten", "crumbling", "silent", "echoing",
    "mossy", "frozen", "smoky", "narrow", "vast", "eerie", "humid", "dusty", "gloomy", "sunken",
    "twisted", "overgrown", "abandoned", "flooded", "musty", "luminous",
];

const PLACES: &[&str] = &[
    "cave", "hall", "grotto", "chamber", "crypt", "cavern", "vault", "den", "gallery", "shrine",
    "cellar", "hollow", "pit", "armory", "library", "larder", "sanctum", "catacomb",
];

/// Handed out once every adjective/place pair has been used.
pub const PLACEHOLDER: (&str, &str) = ("nondescript", "room");

/// Draws unique {adjective, place} pairs without replacement.
pub struct NamePool {
    pairs: Vec<(&'static str, &'static str)>,
}

impl NamePool {
    pub fn shuffled<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut pairs: Vec<(&'static str, &'static str)> = ADJECTIVES
            .iter()
            .flat_map(|adj| PLACES.iter().map(move |place| (*adj, *place)))
            .collect();
        pairs.shuffle(rng);
        Self { pairs }
    }

    #[cfg(test)]
    fn from_pairs(pairs: Vec<(&'static str, &'static str)>) -> Self {
        let mut pairs = pairs;
        pairs.reverse();
        Self { pairs }
    }

    pub fn draw(&mut self) -> (&'static str, &'static str) {
        self.pairs.pop().unwrap_or(PLACEHOLDER)
    }
}

/// "a shadowy cave", "an ancient hall"
pub fn with_article(name: &str) -> String {
    let article = match name.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    };
    format!("{} {}", article, name)
}

/// Title-cased display name for an adjective/place pair.
pub fn display_name((adjective, place): (&str, &str)) -> String {
    format!("{} {}", capitalize(adjective), capitalize(place))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Joins "to the X is Y" clauses: "A.", "A and B.", "A, B, and C."
pub fn describe_neighbors(clauses: &[String]) -> String {
    let sentence = match clauses {
        [] => return "There is no way out.".to_string(),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    };
    format!("{}.", capitalize(&sentence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_articles() {
        assert_eq!(with_article("shadowy cave"), "a shadowy cave");
        assert_eq!(with_article("ancient hall"), "an ancient hall");
        assert_eq!(with_article("Eerie crypt"), "an Eerie crypt");
    }

    #[test]
    fn test_pool_falls_back_to_placeholder() {
        let mut pool = NamePool::from_pairs(vec![("damp", "den")]);
        assert_eq!(pool.draw(), ("damp", "den"));
        assert_eq!(pool.draw(), PLACEHOLDER);
        assert_eq!(pool.draw(), PLACEHOLDER);
    }

    #[test]
    fn test_pool_pairs_are_unique() {
        let mut rng = rand::thread_rng();
        let mut pool = NamePool::shuffled(&mut rng);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..ADJECTIVES.len() * PLACES.len() {
            assert!(seen.insert(pool.draw()));
        }
        assert_eq!(pool.draw(), PLACEHOLDER);
    }

    #[test]
    fn test_describe_neighbors() {
        let one = vec!["to the north is a damp den".to_string()];
        assert_eq!(describe_neighbors(&one), "To the north is a damp den.");

        let three = vec![
            "to the north is a damp den".to_string(),
            "to the east is a narrow tunnel".to_string(),
            "to the west is an ancient hall".to_string(),
        ];
        assert_eq!(
            describe_neighbors(&three),
            "To the north is a damp den, to the east is a narrow tunnel, and to the west is an ancient hall."
        );
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(("shadowy", "cave")), "Shadowy Cave");
    }
}

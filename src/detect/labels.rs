use std::collections::HashMap;

/// Detector class names with a dedicated inventory label. Everything else is
/// title-cased.
const GROCERY_LABELS: &[(&str, &str)] = &[
    ("banana", "Banana"),
    ("apple", "Red Apple"),
    ("orange", "Orange"),
    ("broccoli", "Broccoli"),
    ("carrot", "Carrot"),
    ("bottle", "Milk"),
    ("cup", "Cereal"),
    ("box", "Cereal"),
];

/// Maps raw detector class names to inventory labels.
#[derive(Clone, Debug)]
pub struct LabelMap {
    entries: HashMap<String, String>,
}

impl LabelMap {
    /// An empty map: every label is only title-cased.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add or replace a mapping. Matching is case-insensitive.
    pub fn insert(&mut self, raw: &str, label: &str) {
        self.entries
            .insert(raw.trim().to_lowercase(), label.to_string());
    }

    pub fn map(&self, raw: &str) -> String {
        let key = raw.trim().to_lowercase();
        match self.entries.get(&key) {
            Some(label) => label.clone(),
            None => title_case(raw.trim()),
        }
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        let mut map = Self::empty();
        for (raw, label) in GROCERY_LABELS {
            map.insert(raw, label);
        }
        map
    }
}

/// Uppercase the first letter of each word, lowercase the rest. Any
/// non-alphabetic character starts a new word.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_grocery_classes() {
        let map = LabelMap::default();
        assert_eq!(map.map("apple"), "Red Apple");
        assert_eq!(map.map("Bottle"), "Milk");
        assert_eq!(map.map("cup"), "Cereal");
        assert_eq!(map.map("box"), "Cereal");
    }

    #[test]
    fn unknown_classes_are_title_cased() {
        let map = LabelMap::default();
        assert_eq!(map.map("wine glass"), "Wine Glass");
        assert_eq!(map.map("hot-dog"), "Hot-Dog");
        assert_eq!(map.map("TV"), "Tv");
    }

    #[test]
    fn custom_entries_override_defaults() {
        let mut map = LabelMap::default();
        map.insert("Bottle", "Orange Juice");
        assert_eq!(map.map("bottle"), "Orange Juice");
        assert_eq!(LabelMap::empty().map("apple"), "Apple");
    }
}

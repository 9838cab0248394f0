use ahash::AHashMap;

/// Class names of one style file mapped to their generated identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMapping {
    tokens: AHashMap<String, String>,
}

impl TokenMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tokens.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.tokens.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tokens.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    /// Entries ordered by key, for stable output.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Copy of the mapping where every key is also present camel-cased.
    ///
    /// Original keys win when a camel-cased key collides with one of them.
    pub fn with_camel_case(&self) -> TokenMapping {
        let mut tokens = AHashMap::with_capacity(self.tokens.len() * 2);
        for (key, value) in &self.tokens {
            let camel = camel_case(key);
            if camel != *key && !self.tokens.contains_key(&camel) {
                tokens.insert(camel, value.clone());
            }
        }
        tokens.extend(self.tokens.iter().map(|(k, v)| (k.clone(), v.clone())));
        TokenMapping { tokens }
    }

    pub fn map_values(self, mut f: impl FnMut(&str, String) -> String) -> TokenMapping {
        let tokens = self
            .tokens
            .into_iter()
            .map(|(k, v)| {
                let v = f(&k, v);
                (k, v)
            })
            .collect();
        TokenMapping { tokens }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TokenMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TokenMapping {
            tokens: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for TokenMapping {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.tokens
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | ' ' | '.')
}

/// `title-main` -> `titleMain`, `nav_bar--active` -> `navBarActive`,
/// `TitleMain` -> `titleMain`.
///
/// Words also break between letters and digits and at the end of an
/// acronym, so `btn-2x` -> `btn2X` and `XMLHttp` -> `xmlHttp`.
pub fn camel_case(input: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in input.chars() {
        if is_separator(c) {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            let hump = c.is_uppercase() && p.is_lowercase();
            let digits = c.is_ascii_digit() != p.is_ascii_digit();
            if hump || digits {
                words.push(std::mem::take(&mut current));
            } else if c.is_lowercase() && p.is_uppercase() {
                // `XMLHttp`: the last capital starts the next word.
                let mut run = current.chars().rev();
                run.next();
                if run.next().is_some_and(char::is_uppercase) {
                    current.pop();
                    words.push(std::mem::take(&mut current));
                    current.push(p);
                }
            }
        }
        current.push(c);
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut out = String::with_capacity(input.len());
    for (i, word) in words.iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

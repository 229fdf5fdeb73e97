/// Canonicalized gamertag used as the natural key for account lookups.
///
/// Display tags differ in case and spacing between upstream APIs ("Panda Love",
/// "panda love", "Panda  Love "); the key collapses those to one token so both
/// games and the dedup checks agree on identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GamertagKey {
    display: String,
    seo: String,
}

impl GamertagKey {
    /// Build a key from a raw display tag.
    ///
    /// Normalization steps:
    /// - trim whitespace
    /// - lowercase ASCII letters
    /// - collapse runs of whitespace/punctuation into a single dash
    /// - strip leading/trailing dashes
    pub fn new(raw: &str) -> Self {
        let display = raw.trim().to_string();
        Self {
            seo: seo_gamertag(&display),
            display,
        }
    }

    /// The tag as upstream displays it, trimmed.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Normalized lookup token.
    pub fn seo(&self) -> &str {
        &self.seo
    }

    pub fn is_empty(&self) -> bool {
        self.seo.is_empty()
    }

    /// Tag encoded for use inside an upstream URL path or query.
    pub fn for_api(&self) -> String {
        encode_gamertag_for_api(&self.display)
    }
}

pub fn seo_gamertag(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut last_dash = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

pub fn encode_gamertag_for_api(raw: &str) -> String {
    urlencoding::encode(raw.trim()).into_owned()
}

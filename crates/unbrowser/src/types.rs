//! Core shared types: acquisition tiers and URL helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownTier;

/// One acquisition strategy. Variants are declared in strictly increasing
/// cost/capability order, so `Ord` follows cost.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Learned patterns and discovered backend APIs.
    #[default]
    Intelligence,
    /// Plain stealth HTTP fetch with static extraction.
    Lightweight,
    /// Headless-browser rendering.
    Playwright,
}

impl Tier {
    /// All tiers in ascending cost order.
    pub const ALL: [Tier; 3] = [Tier::Intelligence, Tier::Lightweight, Tier::Playwright];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Intelligence => "intelligence",
            Tier::Lightweight => "lightweight",
            Tier::Playwright => "playwright",
        }
    }

    /// Tiers from the cheapest up to and including `max`.
    pub fn up_to(max: Tier) -> impl Iterator<Item = Tier> {
        Self::ALL.into_iter().filter(move |t| *t <= max)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intelligence" => Ok(Tier::Intelligence),
            "lightweight" => Ok(Tier::Lightweight),
            "playwright" | "browser" => Ok(Tier::Playwright),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Resolve the knowledge-base domain for a URL.
///
/// Lowercases the host and strips a leading `www.` so `www.example.com` and
/// `example.com` share learned patterns. Returns `None` for URLs without a
/// host (e.g. `data:` URLs) or that fail to parse.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// The page a URL addresses within its domain: path without a trailing
/// slash, plus the query. Fragments are ignored.
pub fn page_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let path = parsed.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Some(match parsed.query() {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_of() {
        assert_eq!(page_of("https://blog.test/post-a/").as_deref(), Some("/post-a"));
        assert_eq!(page_of("https://blog.test/post-a#comments").as_deref(), Some("/post-a"));
        assert_eq!(page_of("https://blog.test").as_deref(), Some("/"));
        assert_eq!(page_of("https://blog.test/?p=1").as_deref(), Some("/?p=1"));
        assert_ne!(page_of("https://blog.test/?p=1"), page_of("https://blog.test/?p=2"));
        assert!(page_of("not a url").is_none());
    }

    #[test]
    fn test_tier_order_follows_cost() {
        assert!(Tier::Intelligence < Tier::Lightweight);
        assert!(Tier::Lightweight < Tier::Playwright);
        let capped: Vec<Tier> = Tier::up_to(Tier::Lightweight).collect();
        assert_eq!(capped, vec![Tier::Intelligence, Tier::Lightweight]);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("Lightweight".parse::<Tier>().unwrap(), Tier::Lightweight);
        assert_eq!("browser".parse::<Tier>().unwrap(), Tier::Playwright);
        assert!("teleport".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_serde_snake_case() {
        let json = serde_json::to_string(&Tier::Playwright).unwrap();
        assert_eq!(json, "\"playwright\"");
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("https://www.Example.com/a/b?c=1").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            domain_of("http://news.site.org:8080/").as_deref(),
            Some("news.site.org")
        );
        assert_eq!(domain_of("not a url"), None);
        assert_eq!(domain_of("data:text/plain,hello"), None);
    }
}

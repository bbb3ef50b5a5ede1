use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};

/// A normalized entry from a syndication feed.
///
/// Lives only between the fetch and the saver step; it is never stored as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub description: String,
    pub guid: String,
}

/// Parse RSS/Atom/JSON Feed bytes into normalized items, preserving document order.
///
/// `source_url` is the feed's own URL; it feeds the fallback GUID for entries
/// that carry no upstream identifier.
pub fn parse_feed(bytes: &[u8], source_url: &str) -> Result<Vec<FeedItem>, parser::ParseFeedError> {
    // feed-rs invents an id for entries without one; an empty id lets us tell
    // upstream identifiers apart from generated ones.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    let fetched_at = Utc::now();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|d| d.trim().to_string())
                .unwrap_or_default();

            let stamped = entry.published.or(entry.updated);
            // feed-rs drops the raw date text, so the fallback GUID hashes the
            // RFC 3339 form of the parsed date. Entries whose dates fail to
            // parse hash with "" and differ only by link.
            let published_raw = stamped.map(|dt| dt.to_rfc3339()).unwrap_or_default();
            let existing = entry.id.trim();
            let guid = generate_guid(
                (!existing.is_empty()).then_some(existing),
                source_url,
                &link,
                &published_raw,
            );

            FeedItem {
                title,
                link,
                published: stamped.unwrap_or(fetched_at),
                description,
                guid,
            }
        })
        .collect();

    Ok(items)
}

/// Stable dedup key for a feed item.
///
/// An upstream identifier wins verbatim. Otherwise the key is the hex SHA-256
/// of `source_url|link|published_raw`, so refetching the same entry always
/// yields the same value.
pub fn generate_guid(
    existing: Option<&str>,
    source_url: &str,
    link: &str,
    published_raw: &str,
) -> String {
    if let Some(guid) = existing {
        return guid.to_string();
    }

    let input = format!("{}|{}|{}", source_url, link, published_raw);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

//! Cover art lookup through external metadata providers.
//!
//! Resolution is best-effort: any provider error, timeout, or malformed
//! response degrades to the placeholder reference so a missing cover never
//! blocks a presence update. Outcomes (including failures) are memoized per
//! (artist, album) for the process lifetime to bound outbound request volume.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use log::debug;
use serde_json::Value;

const RELEASE_SEARCH_URL: &str = "https://musicbrainz.org/ws/2/release/";
const COVER_ARCHIVE_BASE_URL: &str = "https://coverartarchive.org/release";
const MARKETPLACE_SEARCH_URL: &str = "https://itunes.apple.com/search";

// MusicBrainz asks clients to identify themselves with a contact route.
const LOOKUP_USER_AGENT: &str =
    "tunelink/0.1.0 (https://github.com/tunelink/tunelink; contact: cover art lookup)";

/// Reserved image reference meaning "no artwork resolved". Doubles as the
/// asset key of the bundled fallback image on the presence service.
pub const ART_PLACEHOLDER: &str = "logo";

/// Provider fallback chain with a process-lifetime outcome cache.
pub struct ArtResolver {
    http_client: ureq::Agent,
    cache: HashMap<(String, String), String>,
}

impl ArtResolver {
    pub fn new() -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(2))
            .timeout_read(Duration::from_secs(4))
            .timeout_write(Duration::from_secs(4))
            .build();

        Self {
            http_client,
            cache: HashMap::new(),
        }
    }

    /// Returns an image URL or [`ART_PLACEHOLDER`], consulting the cache
    /// first. The cache key is the raw pair, before query normalization.
    pub fn resolve(&mut self, artist: &str, album: &str) -> String {
        let cache_key = (artist.to_string(), album.to_string());
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached.clone();
        }
        let outcome = self.lookup(artist, album);
        self.store_outcome(cache_key, outcome)
    }

    fn store_outcome(&mut self, cache_key: (String, String), outcome: Option<String>) -> String {
        let art = outcome.unwrap_or_else(|| ART_PLACEHOLDER.to_string());
        self.cache.insert(cache_key, art.clone());
        art
    }

    fn lookup(&self, artist: &str, album: &str) -> Option<String> {
        let artist_term = Self::normalize_lookup_term(artist);
        let album_term = Self::normalize_lookup_term(album);
        if artist_term.is_empty() && album_term.is_empty() {
            return None;
        }

        match self.release_archive_art(&artist_term, &album_term) {
            Ok(Some(url)) => return Some(url),
            Ok(None) => debug!(
                "ArtResolver: release database had no match for '{} - {}'",
                artist_term, album_term
            ),
            Err(err) => debug!("ArtResolver: release database lookup failed: {}", err),
        }

        match self.marketplace_art(&artist_term, &album_term) {
            Ok(Some(url)) => return Some(url),
            Ok(None) => debug!(
                "ArtResolver: marketplace search had no match for '{} - {}'",
                artist_term, album_term
            ),
            Err(err) => debug!("ArtResolver: marketplace lookup failed: {}", err),
        }

        None
    }

    fn release_archive_art(&self, artist: &str, album: &str) -> Result<Option<String>, String> {
        let response = self.http_get_json(&Self::release_search_url(artist, album))?;
        Ok(Self::release_id_from_search(&response).map(|release_id| Self::cover_url(&release_id)))
    }

    fn marketplace_art(&self, artist: &str, album: &str) -> Result<Option<String>, String> {
        let response = self.http_get_json(&Self::marketplace_search_url(artist, album))?;
        Ok(Self::artwork_url_from_search(&response))
    }

    fn http_get_json(&self, url: &str) -> Result<Value, String> {
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", LOOKUP_USER_AGENT)
            .set("Accept", "application/json")
            .call()
            .map_err(|error| format!("Request failed: {error}"))?;
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| format!("Failed to read response: {error}"))?;
        serde_json::from_str(&body).map_err(|error| format!("Invalid JSON response: {error}"))
    }

    fn release_search_url(artist: &str, album: &str) -> String {
        let query = format!("artist:\"{artist}\" AND release:\"{album}\"");
        format!(
            "{}?query={}&fmt=json&limit=1",
            RELEASE_SEARCH_URL,
            urlencoding::encode(&query)
        )
    }

    fn marketplace_search_url(artist: &str, album: &str) -> String {
        let term = format!("{artist} {album}");
        format!(
            "{}?term={}&media=music&entity=album&limit=1",
            MARKETPLACE_SEARCH_URL,
            urlencoding::encode(term.trim())
        )
    }

    fn cover_url(release_id: &str) -> String {
        format!("{}/{}/front-500", COVER_ARCHIVE_BASE_URL, release_id)
    }

    fn release_id_from_search(value: &Value) -> Option<String> {
        value
            .get("releases")
            .and_then(Value::as_array)
            .and_then(|releases| releases.first())
            .and_then(|release| release.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
    }

    fn artwork_url_from_search(value: &Value) -> Option<String> {
        value
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|result| result.get("artworkUrl100"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(|url| url.replace("100x100", "512x512"))
    }

    /// Strips bracketed qualifiers ("(Remastered 2009)", "[Deluxe]") and
    /// stray quotes before querying. Best-effort match heuristic, not a
    /// guarantee of correctness.
    fn normalize_lookup_term(value: &str) -> String {
        let stripped = Self::strip_bracketed(value);
        let cleaned: String = stripped.chars().filter(|ch| *ch != '"').collect();
        Self::collapse_whitespace(&cleaned)
    }

    fn strip_bracketed(value: &str) -> String {
        let mut depth = 0usize;
        let mut out = String::with_capacity(value.len());
        for ch in value.chars() {
            match ch {
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if depth == 0 => out.push(ch),
                _ => {}
            }
        }
        out
    }

    fn collapse_whitespace(value: &str) -> String {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

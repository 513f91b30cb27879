use strsim::jaro_winkler;

use crate::{CatalogTrack, SongQuery};

// Title and artist dominate the blend; album metadata is often missing or
// differs between single and album releases.
const TITLE_WEIGHT: f64 = 0.45;
const ARTIST_WEIGHT: f64 = 0.40;
const ALBUM_WEIGHT: f64 = 0.15;

/// Scores how well a catalog candidate matches the searched song, as a
/// normalized confidence in [0, 1].
pub fn match_confidence(query: &SongQuery, candidate: &CatalogTrack) -> f64 {
    let title = jaro_winkler(&normalize(&query.title), &normalize(&candidate.title));
    let artist = jaro_winkler(&normalize(&query.artist), &normalize(&candidate.artist));

    match (&query.album, &candidate.album) {
        (Some(query_album), Some(candidate_album)) => {
            let album = jaro_winkler(&normalize(query_album), &normalize(candidate_album));

            TITLE_WEIGHT * title + ARTIST_WEIGHT * artist + ALBUM_WEIGHT * album
        }
        // Without album metadata on both sides, renormalize over the
        // remaining weights so a perfect title+artist match still scores 1.
        _ => (TITLE_WEIGHT * title + ARTIST_WEIGHT * artist) / (TITLE_WEIGHT + ARTIST_WEIGHT),
    }
}

/// Picks the best-scoring candidate, if any.
pub fn best_match(
    query: &SongQuery,
    candidates: Vec<CatalogTrack>,
) -> Option<(CatalogTrack, f64)> {
    candidates
        .into_iter()
        .map(|candidate| {
            let confidence = match_confidence(query, &candidate);
            (candidate, confidence)
        })
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

/// Lowercases and strips parenthesized or bracketed suffixes, so
/// "Song (Remastered 2011)" and "song" compare as equals.
fn normalize(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut depth = 0usize;

    for c in value.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => result.extend(c.to_lowercase()),
            _ => {}
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

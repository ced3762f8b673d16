//! Query parameter exclusion for page URLs.

use std::collections::HashSet;

use url::Url;

/// Session and click-id parameters stripped from every URL.
pub const SESSION_QUERY_PARAMETERS: [&str; 7] = [
    "gclid",
    "phpsessid",
    "jsessionid",
    "sessionid",
    "aspsessionid",
    "doing_wp_cron",
    "sid",
];

/// Every parameter name to strip for a site, lowercased and deduplicated,
/// in first-seen order.
pub fn parameters_to_exclude<'a>(
    site_excluded: impl IntoIterator<Item = &'a str>,
    global_excluded: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    SESSION_QUERY_PARAMETERS
        .iter()
        .map(|name| name.to_string())
        .chain(
            site_excluded
                .into_iter()
                .chain(global_excluded)
                .map(|name| name.trim().to_ascii_lowercase()),
        )
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}

/// Remove query parameters named in `excluded` (case-insensitive) from `url`.
///
/// Remaining parameters keep their original order and encoding. A URL that
/// does not parse, or has nothing to strip, is returned unchanged.
pub fn exclude_query_parameters(url: &str, excluded: &[String]) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let Some(query) = parsed.query() else {
        return url.to_string();
    };

    let excluded: HashSet<String> = excluded.iter().map(|p| p.to_ascii_lowercase()).collect();
    let pieces: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    let kept: Vec<&str> = pieces
        .iter()
        .copied()
        .filter(|piece| {
            let name = piece.split_once('=').map_or(*piece, |(name, _)| name);
            !excluded.contains(&name.to_ascii_lowercase())
        })
        .collect();

    if kept.len() == pieces.len() {
        return url.to_string();
    }

    let query = kept.join("&");
    parsed.set_query((!query.is_empty()).then_some(query.as_str()));
    parsed.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strips_excluded_parameters() {
        let url = "http://example.com/page?a=1&PHPSESSID=abc&b=2";
        assert_eq!(
            exclude_query_parameters(url, &names(&["phpsessid"])),
            "http://example.com/page?a=1&b=2"
        );
    }

    #[test]
    fn test_drops_empty_query_and_keeps_fragment() {
        let url = "http://example.com/page?sid=1#top";
        assert_eq!(
            exclude_query_parameters(url, &names(&["sid"])),
            "http://example.com/page#top"
        );
    }

    #[test]
    fn test_keeps_encoding_of_remaining_parameters() {
        let url = "http://example.com/?q=a%20b&gclid=x&flag";
        assert_eq!(
            exclude_query_parameters(url, &names(&["gclid"])),
            "http://example.com/?q=a%20b&flag"
        );
    }

    #[test]
    fn test_unchanged_when_nothing_matches() {
        let url = "http://Example.com?a=1";
        assert_eq!(exclude_query_parameters(url, &names(&["b"])), url);
        assert_eq!(exclude_query_parameters("not a url", &names(&["a"])), "not a url");
    }

    #[test]
    fn test_parameters_to_exclude_merges_and_lowercases() {
        let params = parameters_to_exclude(["Campaign", "sid"], ["utm_source", "CAMPAIGN"]);
        assert_eq!(&params[..7], SESSION_QUERY_PARAMETERS.map(String::from).as_slice());
        assert_eq!(&params[7..], ["campaign", "utm_source"]);
    }
}

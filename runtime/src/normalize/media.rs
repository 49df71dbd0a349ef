//! Image source selection: srcset, lazy-load attributes and CSS backgrounds.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Highest pixel density we bother with when only `x` descriptors exist.
const MAX_DENSITY: f64 = 2.0;

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("css url regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Descriptor {
    Width(u32),
    Density(f64),
    None,
}

#[derive(Debug, Clone, PartialEq)]
struct SourceCandidate {
    url: String,
    descriptor: Descriptor,
}

/// Pick one absolute http(s) URL per source and drop duplicates.
///
/// Each source may be a plain URL, a srcset, or a CSS `background-image`
/// value. Relative URLs resolve against `base_url`.
pub fn select_media(sources: &[String], base_url: &str, width_ceiling: u32) -> Vec<String> {
    let base = Url::parse(base_url).ok();
    let mut out: Vec<String> = Vec::new();
    for source in sources {
        if let Some(url) = pick_from_source(source, base.as_ref(), width_ceiling) {
            if !out.contains(&url) {
                out.push(url);
            }
        }
    }
    out
}

pub fn pick_from_source(source: &str, base: Option<&Url>, width_ceiling: u32) -> Option<String> {
    let source = source.trim();
    if source.is_empty() {
        return None;
    }

    let candidates: Vec<SourceCandidate> = if source.contains("url(") {
        css_url_re()
            .captures_iter(source)
            .map(|c| SourceCandidate {
                url: c[1].trim().to_string(),
                descriptor: Descriptor::None,
            })
            .collect()
    } else {
        parse_srcset(source)
    };

    let usable: Vec<(SourceCandidate, String)> = candidates
        .into_iter()
        .filter_map(|c| resolve(&c.url, base).map(|u| (c, u)))
        .collect();

    choose(&usable, width_ceiling)
}

/// Split a srcset into candidates. URLs are whitespace-free runs, so commas
/// inside a URL survive.
fn parse_srcset(srcset: &str) -> Vec<SourceCandidate> {
    let mut out = Vec::new();
    let mut rest = srcset;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let mut url = &rest[..url_end];
        rest = &rest[url_end..];

        let descriptor = if url.ends_with(',') {
            url = url.trim_end_matches(',');
            Descriptor::None
        } else {
            let desc_end = rest.find(',').unwrap_or(rest.len());
            let desc = rest[..desc_end].trim();
            rest = &rest[desc_end..];
            parse_descriptor(desc)
        };

        if !url.is_empty() {
            out.push(SourceCandidate {
                url: url.to_string(),
                descriptor,
            });
        }
    }
    out
}

fn parse_descriptor(desc: &str) -> Descriptor {
    if let Some(w) = desc.strip_suffix('w') {
        if let Ok(width) = w.trim().parse() {
            return Descriptor::Width(width);
        }
    }
    if let Some(x) = desc.strip_suffix('x') {
        if let Ok(density) = x.trim().parse() {
            return Descriptor::Density(density);
        }
    }
    Descriptor::None
}

fn choose(usable: &[(SourceCandidate, String)], width_ceiling: u32) -> Option<String> {
    let widths: Vec<(u32, &String)> = usable
        .iter()
        .filter_map(|(c, u)| match c.descriptor {
            Descriptor::Width(w) => Some((w, u)),
            _ => None,
        })
        .collect();
    if !widths.is_empty() {
        let under = widths
            .iter()
            .filter(|(w, _)| *w <= width_ceiling)
            .max_by_key(|(w, _)| *w);
        let pick = under.or_else(|| widths.iter().min_by_key(|(w, _)| *w));
        return pick.map(|(_, u)| (*u).clone());
    }

    let densities: Vec<(f64, &String)> = usable
        .iter()
        .filter_map(|(c, u)| match c.descriptor {
            Descriptor::Density(d) => Some((d, u)),
            _ => None,
        })
        .collect();
    if !densities.is_empty() {
        let under = densities
            .iter()
            .filter(|(d, _)| *d <= MAX_DENSITY)
            .max_by(|a, b| a.0.total_cmp(&b.0));
        let pick = under.or_else(|| densities.iter().min_by(|a, b| a.0.total_cmp(&b.0)));
        return pick.map(|(_, u)| (*u).clone());
    }

    usable.first().map(|(_, u)| u.clone())
}

/// Resolve to an absolute http(s) URL, rejecting inline and script schemes.
fn resolve(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://hotels.test/search?q=paris";

    #[test]
    fn test_srcset_largest_under_ceiling() {
        let srcset = "/img/a-320.jpg 320w, /img/a-1280.jpg 1280w, /img/a-2400.jpg 2400w".to_string();
        let picked = select_media(&[srcset], BASE, 1600);
        assert_eq!(picked, vec!["https://hotels.test/img/a-1280.jpg".to_string()]);
    }

    #[test]
    fn test_srcset_all_above_ceiling_takes_smallest() {
        let srcset = "https://cdn.test/b-2000.jpg 2000w, https://cdn.test/b-1800.jpg 1800w".to_string();
        assert_eq!(
            select_media(&[srcset], BASE, 1600),
            vec!["https://cdn.test/b-1800.jpg".to_string()]
        );
    }

    #[test]
    fn test_commas_inside_urls_survive() {
        let srcset =
            "https://img.test/w_300,h_200/x.jpg 300w, https://img.test/w_900,h_600/x.jpg 900w"
                .to_string();
        assert_eq!(
            select_media(&[srcset], BASE, 1600),
            vec!["https://img.test/w_900,h_600/x.jpg".to_string()]
        );
    }

    #[test]
    fn test_density_descriptors() {
        let srcset = "/c.jpg 1x, /c@2x.jpg 2x, /c@3x.jpg 3x".to_string();
        assert_eq!(
            select_media(&[srcset], BASE, 1600),
            vec!["https://hotels.test/c@2x.jpg".to_string()]
        );
    }

    #[test]
    fn test_background_image_and_rejections() {
        let sources = vec![
            "background-image: url('//cdn.test/bg.webp')".to_string(),
            "data:image/gif;base64,R0lGODlhAQABAAAAACw=".to_string(),
            "javascript:void(0)".to_string(),
            "//cdn.test/bg.webp".to_string(),
        ];
        assert_eq!(
            select_media(&sources, BASE, 1600),
            vec!["https://cdn.test/bg.webp".to_string()]
        );
    }

    #[test]
    fn test_selection_is_idempotent() {
        let first = select_media(&["/img/a.jpg 640w, /img/b.jpg 1200w".to_string()], BASE, 1600);
        assert_eq!(select_media(&first, BASE, 1600), first);
    }
}

//! Rating text → value on a 0–5 scale.

use crate::types::Rating;
use regex::Regex;
use std::sync::OnceLock;

const KNOWN_SCALES: &[u16] = &[5, 10, 100];

fn explicit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(?:/|out of|of|von|sur|su|de|van)\s*(\d{1,3})\b")
            .expect("explicit scale regex is valid")
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("number regex is valid"))
}

fn context_scale_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:/|out of|von|sur|su|de|van)\s*(5|10|100)\b")
            .expect("context scale regex is valid")
    })
}

/// Normalize a rating. `context` is nearby text that may name the scale
/// (for example a "/10" badge next to the score).
pub fn normalize_rating(raw_text: &str, context: Option<&str>) -> Rating {
    let raw_text = raw_text.trim();
    let context = context.map(str::trim).filter(|c| !c.is_empty());

    let (raw, explicit_scale) = match explicit_re().captures(raw_text) {
        Some(caps) => (parse_number(&caps[1]), caps[2].parse::<u16>().ok()),
        None => match number_re().find(raw_text) {
            Some(m) => (parse_number(m.as_str()), None),
            None => (star_glyphs(raw_text), star_glyphs(raw_text).map(|_| 5)),
        },
    };

    let scale = explicit_scale
        .filter(|s| KNOWN_SCALES.contains(s))
        .or_else(|| context.and_then(scale_from_context))
        .or_else(|| raw.and_then(infer_scale));

    let (scale, normalized) = match (raw, scale) {
        (Some(value), Some(scale)) if value >= 0.0 && value <= f64::from(scale) => {
            let five = value * 5.0 / f64::from(scale);
            (Some(scale), Some(round2(five.clamp(0.0, 5.0))))
        }
        _ => (None, None),
    };

    Rating {
        raw,
        raw_text: raw_text.to_string(),
        scale,
        normalized,
        context: context.map(str::to_string),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.replace(',', ".").parse().ok()
}

/// Count ★ (and ½) glyphs; ☆ marks an empty star.
fn star_glyphs(text: &str) -> Option<f64> {
    let filled = text.chars().filter(|c| *c == '★').count();
    let empty = text.chars().filter(|c| *c == '☆').count();
    let half = text.chars().filter(|c| *c == '½').count();
    if filled + empty + half == 0 {
        return None;
    }
    Some(filled as f64 + 0.5 * half as f64)
}

fn scale_from_context(context: &str) -> Option<u16> {
    if context.contains('%') {
        return Some(100);
    }
    context_scale_re()
        .captures(context)
        .and_then(|caps| caps[1].parse().ok())
}

/// Guess the scale from the value alone.
fn infer_scale(value: f64) -> Option<u16> {
    if value <= 5.0 {
        Some(5)
    } else if value <= 10.0 {
        Some(10)
    } else if value <= 100.0 {
        Some(100)
    } else {
        None
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

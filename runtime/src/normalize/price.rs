//! Price text → integer minor units, currency, basis and tax qualifier.
//!
//! Pure and total: anything unparseable leaves `amount_minor_units` empty and
//! keeps the raw text. Several competing amounts mark the price `ambiguous`
//! instead of picking one.

use crate::types::{Price, PriceBasis};
use regex::Regex;
use std::sync::OnceLock;

/// Currencies written without minor units.
const ZERO_DECIMAL: &[&str] = &["JPY", "KRW", "VND", "ISK", "HUF", "CLP", "UGX", "PYG", "XOF", "XAF"];

/// Currencies with three minor digits.
const THREE_DECIMAL: &[&str] = &["BHD", "KWD", "OMR", "JOD", "TND"];

const ISO_CODES: &[&str] = &[
    "EUR", "USD", "GBP", "CHF", "JPY", "CAD", "AUD", "NZD", "SEK", "NOK", "DKK", "PLN", "CZK",
    "HUF", "INR", "CNY", "HKD", "SGD", "KRW", "BRL", "MXN", "TRY", "ZAR", "AED", "THB", "IDR",
    "VND", "ISK", "CLP", "RUB", "ILS", "BHD", "KWD", "OMR", "JOD", "TND", "MAD", "EGP",
];

const SYMBOLS: &[(&str, &str)] = &[
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
    ("₩", "KRW"),
    ("₺", "TRY"),
    ("₽", "RUB"),
    ("₪", "ILS"),
    ("฿", "THB"),
    ("₫", "VND"),
    ("zł", "PLN"),
    ("kč", "CZK"),
    ("ft", "HUF"),
];

const PER_NIGHT: &[&str] = &[
    "per night",
    "/night",
    "/ night",
    "a night",
    "each night",
    "nightly",
    "pro nacht",
    "/nacht",
    "je nacht",
    "per nacht",
    "par nuit",
    "/nuit",
    "la nuit",
    "por noche",
    "/noche",
    "la noche",
    "a notte",
    "per notte",
    "/notte",
];

const PER_STAY: &[&str] = &[
    "per stay",
    "total",
    "for the stay",
    "for your stay",
    "insgesamt",
    "gesamt",
    "pour le séjour",
    "au total",
    "por estancia",
    "en total",
    "totale",
    "in totaal",
    "totaal",
];

const TAX_EXCLUDED: &[&str] = &[
    "excl. tax",
    "excl tax",
    "excluding tax",
    "plus tax",
    "+ tax",
    "+tax",
    "taxes not included",
    "tax not included",
    "before tax",
    "zzgl. steuern",
    "zzgl. mwst",
    "zzgl steuern",
    "zuzüglich steuern",
    "exkl. steuern",
    "exkl. mwst",
    "ohne steuern",
    "hors taxes",
    "taxes non comprises",
    "taxes en sus",
    "impuestos no incluidos",
    "+ impuestos",
    "más impuestos",
    "tasse escluse",
    "tasse non incluse",
    "excl. belasting",
    "exclusief belasting",
];

const TAX_INCLUDED: &[&str] = &[
    "incl. tax",
    "incl tax",
    "including tax",
    "includes tax",
    "taxes included",
    "tax included",
    "taxes and fees included",
    "inkl. steuern",
    "inkl. mwst",
    "inkl steuern",
    "inklusive steuern",
    "einschließlich steuern",
    "taxes incluses",
    "taxes comprises",
    "impuestos incluidos",
    "tasse incluse",
    "incl. belasting",
    "inclusief belasting",
];

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\d{1,3}(?:[.,'\u{a0}\u{202f} ]\d{3})+|\d+)(?:[.,]\d+)?")
            .expect("amount regex is valid")
    })
}

/// Numbers that count nights, guests, rooms or percentages, not money.
fn quantity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\d+\s*(?:%|nights?|nächte|nacht|nuits?|noches?|notti|notte|nachten|adults?|guests?|erwachsene|personen|rooms?|zimmer|chambres?|habitaci[oó]n(?:es)?|beds?|betten|km|m\b|mi\b)",
        )
        .expect("quantity regex is valid")
    })
}

fn stay_length_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:for|für|pour|por|per|voor)\s+\d+\s+(?:nights|nächte|nuits|noches|notti|nachten)")
            .expect("stay regex is valid")
    })
}

fn prefixed_dollar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(US|CA|C|AU|A|NZ|HK|S|R|MX)\$").expect("prefixed dollar regex is valid")
    })
}

fn iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{3})\b").expect("iso regex is valid"))
}

/// Normalize one price string.
pub fn normalize_price(raw: &str) -> Price {
    let raw = raw.trim();
    let lower = raw.to_lowercase();

    let (currency, currency_ambiguous) = detect_currency(raw, &lower);
    let basis = detect_basis(&lower);
    let taxes_included = detect_taxes(&lower);

    let without_quantities = quantity_re().replace_all(raw, " ");
    let mut amounts: Vec<i64> = Vec::new();
    let exponent = currency.map(minor_exponent).unwrap_or(2);
    for m in amount_re().find_iter(&without_quantities) {
        if let Some(minor) = to_minor_units(m.as_str(), exponent) {
            if minor > 0 && !amounts.contains(&minor) {
                amounts.push(minor);
            }
        }
    }

    let several = amounts.len() > 1;
    let amount_minor_units = if several { None } else { amounts.first().copied() };

    Price {
        amount_minor_units,
        currency: currency.map(|c| c.to_string()),
        basis,
        taxes_included,
        raw: raw.to_string(),
        ambiguous: several || (currency_ambiguous && amount_minor_units.is_some()),
    }
}

/// Minor-unit exponent for an ISO currency code.
pub fn minor_exponent(code: &str) -> u32 {
    if ZERO_DECIMAL.contains(&code) {
        0
    } else if THREE_DECIMAL.contains(&code) {
        3
    } else {
        2
    }
}

/// Returns the detected code and whether the markers were ambiguous.
fn detect_currency(raw: &str, lower: &str) -> (Option<&'static str>, bool) {
    let mut found: Vec<&'static str> = Vec::new();

    let mut dollar_prefixed = false;
    for caps in prefixed_dollar_re().captures_iter(raw) {
        dollar_prefixed = true;
        let code = match caps[1].to_uppercase().as_str() {
            "US" => "USD",
            "CA" | "C" => "CAD",
            "AU" | "A" => "AUD",
            "NZ" => "NZD",
            "HK" => "HKD",
            "S" => "SGD",
            "R" => "BRL",
            _ => "MXN",
        };
        push_code(&mut found, code);
    }

    for caps in iso_re().captures_iter(raw) {
        if let Some(code) = ISO_CODES.iter().find(|c| **c == &caps[1]) {
            push_code(&mut found, *code);
        }
    }

    for (symbol, code) in SYMBOLS {
        let hit = if symbol.chars().all(|c| c.is_alphabetic()) {
            has_word(lower, symbol)
        } else {
            lower.contains(symbol)
        };
        if hit {
            push_code(&mut found, *code);
        }
    }

    if raw.contains('$') && !dollar_prefixed && found.is_empty() {
        push_code(&mut found, "USD");
    }

    let kr_only = found.is_empty() && (has_word(lower, "kr") || has_word(lower, "kr."));

    match found.len() {
        0 => (None, kr_only),
        1 => (Some(found[0]), false),
        _ => (None, true),
    }
}

fn push_code(found: &mut Vec<&'static str>, code: &'static str) {
    if !found.contains(&code) {
        found.push(code);
    }
}

fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| c.is_whitespace() || c.is_ascii_digit() || matches!(c, ',' | ';' | '(' | ')'))
        .any(|token| token == word || token.trim_end_matches('.') == word.trim_end_matches('.'))
}

fn detect_basis(lower: &str) -> Option<PriceBasis> {
    let night = PER_NIGHT.iter().any(|k| lower.contains(k));
    let stay = PER_STAY.iter().any(|k| lower.contains(k)) || stay_length_re().is_match(lower);
    match (night, stay) {
        (true, false) => Some(PriceBasis::PerNight),
        (false, true) => Some(PriceBasis::PerStay),
        _ => None,
    }
}

fn detect_taxes(lower: &str) -> Option<bool> {
    if TAX_EXCLUDED.iter().any(|k| lower.contains(k)) {
        return Some(false);
    }
    if TAX_INCLUDED.iter().any(|k| lower.contains(k)) || has_word(lower, "ttc") {
        return Some(true);
    }
    None
}

/// Convert a numeric token with locale separators to minor units.
fn to_minor_units(token: &str, exponent: u32) -> Option<i64> {
    let cleaned: String = token
        .chars()
        .filter(|c| !matches!(c, ' ' | '\'' | '\u{a0}' | '\u{202f}'))
        .collect();

    let dots = cleaned.matches('.').count();
    let commas = cleaned.matches(',').count();

    let (int_part, frac_part) = match (dots, commas) {
        (0, 0) => (cleaned.clone(), String::new()),
        (_, _) if dots > 0 && commas > 0 => {
            let last_dot = cleaned.rfind('.')?;
            let last_comma = cleaned.rfind(',')?;
            let dec = if last_dot > last_comma { '.' } else { ',' };
            split_decimal(&cleaned, dec)
        }
        _ => {
            let sep = if dots > 0 { '.' } else { ',' };
            let occurrences = dots.max(commas);
            let after = cleaned.rsplit(sep).next().unwrap_or("");
            let zero_whole = cleaned
                .split(sep)
                .next()
                .is_some_and(|head| head.chars().all(|c| c == '0'));
            if occurrences > 1 || (after.len() == 3 && !zero_whole) {
                (cleaned.replace(sep, ""), String::new())
            } else {
                split_decimal(&cleaned, sep)
            }
        }
    };

    let int_digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
    if int_digits.is_empty() {
        return None;
    }
    let whole: i64 = int_digits.parse().ok()?;
    let scale = 10i64.checked_pow(exponent)?;

    let frac_digits: Vec<u32> = frac_part.chars().filter_map(|c| c.to_digit(10)).collect();
    let mut frac: i64 = 0;
    for i in 0..exponent as usize {
        frac = frac * 10 + i64::from(frac_digits.get(i).copied().unwrap_or(0));
    }
    let round_up = frac_digits.get(exponent as usize).is_some_and(|d| *d >= 5);

    whole
        .checked_mul(scale)?
        .checked_add(frac)?
        .checked_add(i64::from(round_up))
}

fn split_decimal(s: &str, dec: char) -> (String, String) {
    let idx = s.rfind(dec).unwrap_or(s.len());
    let int_part: String = s[..idx].chars().filter(|c| c.is_ascii_digit()).collect();
    let frac_part = s.get(idx + dec.len_utf8()..).unwrap_or("").to_string();
    (int_part, frac_part)
}

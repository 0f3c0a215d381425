use std::net::IpAddr;

use keyprobe_core::UNKNOWN_COUNTRY;

const CODES: &[&str] = &[
    "AE", "AM", "AR", "AT", "AU", "AZ", "BE", "BG", "BR", "BY", "CA", "CH", "CL", "CN", "CY", "CZ",
    "DE", "DK", "EE", "EG", "ES", "FI", "FR", "GB", "GE", "GR", "HK", "HR", "HU", "ID", "IE", "IL",
    "IN", "IQ", "IR", "IS", "IT", "JP", "KG", "KR", "KZ", "LT", "LU", "LV", "MD", "MX", "MY", "NL",
    "NO", "NZ", "PH", "PK", "PL", "PT", "RO", "RS", "RU", "SA", "SE", "SG", "SK", "TH", "TR", "TW",
    "UA", "US", "UZ", "VN", "ZA",
];

const NAMES: &[(&str, &str)] = &[
    ("armenia", "AM"), ("australia", "AU"), ("austria", "AT"), ("belarus", "BY"), ("brazil", "BR"),
    ("canada", "CA"), ("china", "CN"), ("estonia", "EE"), ("finland", "FI"), ("france", "FR"),
    ("germany", "DE"), ("hongkong", "HK"), ("india", "IN"), ("iran", "IR"), ("israel", "IL"),
    ("italy", "IT"), ("japan", "JP"), ("kazakhstan", "KZ"), ("latvia", "LV"), ("lithuania", "LT"),
    ("moldova", "MD"), ("netherlands", "NL"), ("norway", "NO"), ("poland", "PL"), ("romania", "RO"),
    ("russia", "RU"), ("singapore", "SG"), ("spain", "ES"), ("sweden", "SE"), ("switzerland", "CH"),
    ("taiwan", "TW"), ("turkey", "TR"), ("ukraine", "UA"), ("usa", "US"), ("vietnam", "VN"),
];

/// Best-effort country code: annotation first (flag emoji, bare code,
/// country name), then the hostname's ccTLD.
pub fn country_of(host: &str, annotation: Option<&str>) -> String {
    annotation
        .and_then(from_annotation)
        .or_else(|| from_host(host))
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
}

fn from_annotation(tag: &str) -> Option<String> {
    from_flag(tag).or_else(|| {
        let tokens = tag.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty());
        let mut by_name = None;
        for tok in tokens {
            if tok.len() == 2 && tok.chars().all(|c| c.is_ascii_uppercase()) && CODES.contains(&tok) {
                return Some(tok.to_string());
            }
            if by_name.is_none() {
                let lower = tok.to_lowercase();
                by_name = NAMES.iter().find(|(n, _)| *n == lower).map(|(_, cc)| cc.to_string());
            }
        }
        by_name
    })
}

// a flag is a pair of regional indicator symbols
fn from_flag(tag: &str) -> Option<String> {
    const BASE: u32 = 0x1F1E6;
    let letter = |c: char| {
        let v = c as u32;
        (BASE..BASE + 26).contains(&v).then(|| char::from(b'A' + (v - BASE) as u8))
    };
    let chars: Vec<char> = tag.chars().collect();
    chars.windows(2).find_map(|w| Some([letter(w[0])?, letter(w[1])?].iter().collect()))
}

fn from_host(host: &str) -> Option<String> {
    if host.parse::<IpAddr>().is_ok() { return None; }
    let tld = host.trim_end_matches('.').rsplit('.').next()?;
    if tld.len() != 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) { return None; }
    let cc = match tld.to_ascii_uppercase().as_str() {
        "UK" => "GB".to_string(),
        other => other.to_string(),
    };
    CODES.contains(&cc.as_str()).then_some(cc)
}

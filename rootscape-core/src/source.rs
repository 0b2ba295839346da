//! The thirteen root-server letters and their `hostname.bind` naming rules.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
}

impl Source {
    pub const ALL: [Source; 13] = [
        Source::A,
        Source::B,
        Source::C,
        Source::D,
        Source::E,
        Source::F,
        Source::G,
        Source::H,
        Source::I,
        Source::J,
        Source::K,
        Source::L,
        Source::M,
    ];

    pub fn letter(self) -> char {
        (b'a' + self.index() as u8) as char
    }

    fn index(self) -> usize {
        self as usize
    }

    /// RIPE Atlas built-in IPv4 `hostname.bind` measurement for this letter.
    pub fn measurement_id(self) -> u64 {
        match self {
            Source::A => 10309,
            Source::B => 10310,
            Source::C => 10311,
            Source::D => 10312,
            Source::E => 10313,
            Source::F => 10304,
            Source::G => 10314,
            Source::H => 10315,
            Source::I => 10305,
            Source::J => 10316,
            Source::K => 10301,
            Source::L => 10308,
            Source::M => 10306,
        }
    }

    fn rule(self) -> &'static Regex {
        &RULES[self.index()]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter().to_ascii_uppercase())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let c = c.to_ascii_lowercase();
                Source::ALL
                    .into_iter()
                    .find(|src| src.letter() == c)
                    .ok_or_else(|| format!("unknown root letter {s:?}"))
            }
            _ => Err(format!("unknown root letter {s:?}")),
        }
    }
}

// Indexed by `Source as usize`. Each pattern has the site code in group 1.
static RULES: LazyLock<[Regex; 13]> = LazyLock::new(|| {
    [
        r"^(?:rootns-|nnn1-)([a-z]{3})[0-9]$",
        r"^b[0-9]-([a-z]{3})$",
        r"^([a-z]{3})[0-9][a-z]\.c\.root-servers\.org$",
        r"^([a-z]{4})[0-9]\.droot\.maxgigapop\.net$",
        r"^(?:[a-z][0-9]+)\.([a-z]{3}[a-z]?)\.eroot$",
        r"^([a-z]{3})(?:[0-9][a-z]|\.cf)\.f\.root-servers\.org$",
        r"^groot-?-(.*?)-.*?(\.net)?$",
        r"^[0-9]+\.([a-z]{3})\.h\.root-servers\.org$",
        r"^s[0-9]\.([a-z]{3})$",
        r"^(?:rootns-(?:el)?|nnn1-)([a-z]{3})[0-9]$",
        r"^.*?\.([a-z]{2}-[a-z]{3})\.k\.ripe\.net$",
        r"^([a-z]{2}-[a-z]{3})-[a-z]{2}$",
        r"^m-([a-z]{3})(-[a-z]+)?-[0-9]$",
    ]
    .map(|pattern| Regex::new(pattern).expect("static extraction rule"))
});

/// Extracts the site code from a raw identity string, or `None` when the
/// string does not follow the letter's naming convention.
pub fn extract(source: Source, raw: &str) -> Option<String> {
    let hostname = raw.to_lowercase();
    source
        .rule()
        .captures(&hostname)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extracts_known_site_codes() {
        let cases = [
            (Source::A, "rootns-fra1", "fra"),
            (Source::A, "nnn1-lax3", "lax"),
            (Source::B, "b2-ams", "ams"),
            (Source::C, "fra1b.c.root-servers.org", "fra"),
            (Source::D, "ashb1.droot.maxgigapop.net", "ashb"),
            (Source::E, "s1.lhr.eroot", "lhr"),
            (Source::E, "w12.ords.eroot", "ords"),
            (Source::F, "ams1a.f.root-servers.org", "ams"),
            (Source::F, "sin.cf.f.root-servers.org", "sin"),
            (Source::G, "groot--col-1.net", "col"),
            (Source::H, "001.sin.h.root-servers.org", "sin"),
            (Source::I, "s1.ham", "ham"),
            (Source::J, "rootns-elfra2", "fra"),
            (Source::K, "ns1.nl-ams.k.ripe.net", "nl-ams"),
            (Source::L, "de-fra-ab", "de-fra"),
            (Source::M, "m-cdg-2", "cdg"),
            (Source::M, "m-nrt-jpix-1", "nrt"),
        ];
        for (source, raw, site) in cases {
            assert_eq!(extract(source, raw).as_deref(), Some(site), "{source} {raw}");
        }
    }

    #[test]
    fn input_is_lowercased_before_matching() {
        assert_eq!(extract(Source::A, "ROOTNS-FRA1").as_deref(), Some("fra"));
        assert_eq!(extract(Source::K, "NS1.GB-LHR.K.RIPE.NET").as_deref(), Some("gb-lhr"));
    }

    #[test]
    fn mismatched_strings_yield_none() {
        assert_eq!(extract(Source::G, "xx1"), None);
        assert_eq!(extract(Source::A, "b2-ams"), None);
        assert_eq!(extract(Source::B, ""), None);
        assert_eq!(extract(Source::I, "s1.hamburg"), None);
    }

    #[test]
    fn non_ascii_digits_do_not_match() {
        assert_eq!(extract(Source::A, "rootns-fra\u{0661}"), None);
        assert_eq!(extract(Source::H, "\u{0967}\u{0968}.sin.h.root-servers.org"), None);
        assert_eq!(extract(Source::M, "m-cdg-\u{0662}"), None);
    }

    #[test]
    fn letters_round_trip_through_from_str() {
        for source in Source::ALL {
            assert_eq!(source.letter().to_string().parse::<Source>(), Ok(source));
            assert_eq!(source.to_string().parse::<Source>(), Ok(source));
        }
        assert!("n".parse::<Source>().is_err());
        assert!("ab".parse::<Source>().is_err());
    }

    #[test]
    fn measurement_ids_are_distinct() {
        let mut ids: Vec<u64> = Source::ALL.iter().map(|s| s.measurement_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 13);
    }

    proptest! {
        #[test]
        fn extraction_is_total_and_deterministic(idx in 0usize..13, raw in ".{0,40}") {
            let source = Source::ALL[idx];
            let first = extract(source, &raw);
            let second = extract(source, &raw);
            prop_assert_eq!(first, second);
        }
    }
}

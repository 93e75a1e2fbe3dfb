//! # Unit multiplier table
//!
//! Recognized unit suffixes for implicit multiplication (spec §4.4.2) and
//! for "unit recovery" during reconstruction (spec §4.5.4).

/// Returns the multiplier for a recognized unit identifier, if any.
pub fn multiplier(ident: &str) -> Option<f64> {
    Some(match ident {
        "um" => 1e-6,
        "mm" => 1e-3,
        "mil" => 25.4e-6,
        "nm" => 1e-9,
        "cm" => 1e-2,
        "m" => 1e-3,
        "Hz" => 1.0,
        "kHz" => 1e3,
        "MHz" => 1e6,
        "GHz" => 1e9,
        "THz" => 1e12,
        "F" => 1.0,
        "pF" => 1e-12,
        "nF" => 1e-9,
        "uF" => 1e-6,
        "mF" => 1e-3,
        "ohm" => 1.0,
        "kohm" => 1e3,
        "Mohm" => 1e6,
        "H" => 1.0,
        "pH" => 1e-12,
        "nH" => 1e-9,
        "uH" => 1e-6,
        "mH" => 1e-3,
        "s" => 1.0,
        "ms" => 1e-3,
        "us" => 1e-6,
        "ns" => 1e-9,
        "ps" => 1e-12,
        _ => return None,
    })
}

/// Reverse lookup used by "unit recovery": find a unit name whose
/// multiplier is within relative tolerance of `c`. Unlike the forward
/// table above, most multiplier values here are shared by several units
/// (`Hz`/`F`/`ohm`/`H`/`s` are all `1.0`; `mm`/`m`/`mF`/`mH`/`ms` are all
/// `1e-3`; …), so a full reverse scan would silently recover the wrong
/// unit. The reference limits recovery to the two units whose multiplier
/// is otherwise unambiguous in practice, `um` and `mm`, with a
/// relative-tolerance compare rather than exact equality.
pub fn name_for_multiplier(c: f64) -> Option<&'static str> {
    const TABLE: &[(&str, f64)] = &[("um", 1e-6), ("mm", 1e-3)];
    let denom = if c.abs() > 1.0 { c.abs() } else { 1.0 };
    TABLE
        .iter()
        .find(|(_, v)| ((c - v) / denom).abs() < 1e-12)
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_unit_resolves() {
        assert_eq!(multiplier("um"), Some(1e-6));
        assert_eq!(multiplier("kohm"), Some(1e3));
    }

    #[test]
    fn unknown_unit_is_none() {
        assert_eq!(multiplier("banana"), None);
    }

    #[test]
    fn reverse_lookup_round_trips_for_fractional_units() {
        assert_eq!(name_for_multiplier(1e-6), Some("um"));
        assert_eq!(name_for_multiplier(1e-3), Some("mm"));
    }

    #[test]
    fn reverse_lookup_does_not_guess_among_ambiguous_units() {
        // 1.0 and 1e3 are each shared by several units (Hz/F/ohm/H/s,
        // kHz/kohm); recovery must not silently pick one.
        assert_eq!(name_for_multiplier(1.0), None);
        assert_eq!(name_for_multiplier(1e3), None);
    }
}

//! Device error-code dictionary for the phx42.
//!
//! `EROR`/`SERR` messages carry a numeric code; the codes below have fixed
//! human-readable texts shown to the operator. Code 21 (warming up) is the
//! only one that interpolates live data, the remaining warmup time.

/// Code reported while the analyzer is still warming up.
pub const CODE_WARMING_UP: u32 = 21;

/// Human-readable text for a device error code.
///
/// `warmup_seconds` is only consulted for [`CODE_WARMING_UP`].
pub fn describe(code: u32, warmup_seconds: Option<u32>) -> String {
    match code {
        5 => "Internal temperature is out of range.".to_string(),
        18 => "H2 pressure is too high to ignite safely.".to_string(),
        19 => "H2 pressure has dropped out of regulation.".to_string(),
        20 => "The flame went out.".to_string(),
        21 => match warmup_seconds {
            Some(secs) => format!(
                "Still warming up. About {} seconds to go before ignition is allowed.",
                secs
            ),
            None => "Still warming up; ignition is not allowed yet.".to_string(),
        },
        22 => "I can't run on H2 this low! Feed ME!".to_string(),
        24 => "Battery is too low to run the igniter.".to_string(),
        other => format!("Device error {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_h2_text_is_fixed() {
        assert_eq!(describe(22, None), "I can't run on H2 this low! Feed ME!");
    }

    #[test]
    fn test_warmup_interpolates_seconds() {
        let text = describe(21, Some(90));
        assert!(text.contains("90 seconds"));
        assert!(describe(21, None).contains("warming up"));
    }

    #[test]
    fn test_unknown_code_falls_back() {
        assert_eq!(describe(99, None), "Device error 99");
    }
}

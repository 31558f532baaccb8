use crate::ExtractError;

/// Decodes the `sfen` query parameter of a game URL.
///
/// `+` is turned into a space before percent-decoding, so an encoded `%2B`
/// still yields a literal plus.
pub fn decode_sfen(url: &str) -> Result<String, ExtractError> {
    let raw = regex!(r"sfen=([^&]*)")
        .captures(url)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ExtractError::MissingSfen {
            url: url.to_string(),
        })?
        .as_str();
    let spaced = raw.replace('+', " ");
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_becomes_space_before_percent_decoding() {
        let url = "https://example.test/kifu?sfen=A+B%20C&other=x";
        assert_eq!(decode_sfen(url).unwrap(), "A B C");
    }

    #[test]
    fn encoded_plus_survives() {
        let url = "https://example.test/kifu?sfen=lnsgk%2Bgsnl+b+-+1";
        assert_eq!(decode_sfen(url).unwrap(), "lnsgk+gsnl b - 1");
    }

    #[test]
    fn value_runs_to_end_of_string_without_ampersand() {
        let url = "https://example.test/kifu?move=12&sfen=lnsgkgsnl%2F9%2F9+w+-+12";
        assert_eq!(decode_sfen(url).unwrap(), "lnsgkgsnl/9/9 w - 12");
    }

    #[test]
    fn empty_value_decodes_to_empty_string() {
        assert_eq!(decode_sfen("https://example.test/?sfen=&x=1").unwrap(), "");
    }

    #[test]
    fn missing_parameter_is_a_malformed_url() {
        let err = decode_sfen("https://example.test/kifu?board=abc").unwrap_err();
        assert!(matches!(err, ExtractError::MissingSfen { .. }));
    }
}

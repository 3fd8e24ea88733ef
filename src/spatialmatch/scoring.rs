// Feature scores ride through the grid encoded on a 3-bit log scale
// against the owning index's scorefactor (its max score). We don't know
// the scale of the original axis, but internal consistency is all the
// ranking needs.

/// Decode a 3-bit log-scale code back into score space
pub fn decode_3bit_log_scale(code: f64, factor: f64) -> f64 {
    if code <= 0. || factor <= 0. {
        return 0.;
    }
    factor.powf(code / 7.).round()
}

/// Encode a score onto the 3-bit log scale
pub fn encode_3bit_log_scale(value: f64, factor: f64) -> u8 {
    if value <= 0. || factor <= 0. {
        return 0;
    }
    if value == 1. {
        return 1;
    }
    (7. * value.ln() / factor.ln()).round() as u8
}

/// Unpack a cache scoredist: values past the 3-bit range come through on a
/// linear scale (proximity was in play), everything else decodes like a
/// score
pub fn decode_scoredist(raw: f64, factor: f64) -> f64 {
    if raw > 7. {
        factor / 7. * raw
    } else {
        decode_3bit_log_scale(raw, factor)
    }
}

#[test]
fn decode_3bit_log_scale_test() {
    assert_eq!(decode_3bit_log_scale(0., 1000.), 0., "zero code decodes to zero");
    assert_eq!(decode_3bit_log_scale(3., 0.), 0., "zero factor decodes to zero");
    assert_eq!(decode_3bit_log_scale(7., 1000.), 1000., "the top code decodes to the factor");
    assert_eq!(decode_3bit_log_scale(3.5, 10000.), 100., "codes interpolate on the log scale");
}

#[test]
fn decode_3bit_log_scale_monotonic_test() {
    for factor in &[10., 500., 250000.] {
        let mut previous = -1.;
        for code in 0..=7 {
            let decoded = decode_3bit_log_scale(code as f64, *factor);
            assert!(
                decoded >= previous,
                "decoding is monotonic in the code for factor {}",
                factor
            );
            previous = decoded;
        }
    }
}

#[test]
fn encode_decode_round_trip_test() {
    let factor = 250000.;
    for score in &[1., 10., 1000., 250000.] {
        let code = encode_3bit_log_scale(*score, factor);
        let decoded = decode_3bit_log_scale(code as f64, factor);
        // log-scale codes are lossy; the round trip lands within the scale
        // step of the original
        assert!(
            decoded / score < 7. && score / decoded < 7.,
            "round trip of {} through code {} gave {}",
            score,
            code,
            decoded
        );
    }
}

#[test]
fn decode_scoredist_test() {
    assert_eq!(decode_scoredist(3., 343.), 12., "in-range scoredists decode like scores");
    assert_eq!(decode_scoredist(14., 7.), 14., "out-of-range scoredists scale linearly");
    assert_eq!(decode_scoredist(0., 343.), 0.);
}

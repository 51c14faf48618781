use mantis_dispatch::config::ResultOrder;
use mantis_dispatch::error::{DecodeError, EncodeError};
use mantis_dispatch::protocol::{ProtocolCodec, TERMINATOR};
use mantis_dispatch::run::{
    Area, AreaKind, AreaKindMap, AreaSelector, Decimal4, Modification, ResultValue, RunSpec,
    WireArea,
};

fn spec(modifications: &[(u16, &str)]) -> RunSpec {
    RunSpec {
        name: "protocol".to_string(),
        description: None,
        n_years: 100,
        reduction_year: 2025,
        water_content: "0.05".parse().unwrap(),
        scenario_name: "CVHM_95_99".to_string(),
        area: AreaSelector::WholeDomain,
        modifications: modifications
            .iter()
            .map(|(crop, p)| Modification::new(*crop, p.parse::<Decimal4>().unwrap()))
            .collect(),
        unsaturated_zone_travel_time: None,
    }
}

fn whole_domain() -> WireArea {
    AreaKindMap::default().resolve(&AreaSelector::WholeDomain)
}

fn encode_str(spec: &RunSpec, area: WireArea) -> String {
    let bytes = ProtocolCodec::default().encode(spec, area).unwrap();
    String::from_utf8(bytes).unwrap()
}

/// Mimics a server that answers with how many (crop, fraction) pairs it parsed.
fn record_count_echo(command: &str) -> String {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let end = tokens.iter().position(|t| *t == TERMINATOR).unwrap();
    let pairs = (end - 6) / 2;
    pairs.to_string()
}

// =============================================================================
// Encoding
// =============================================================================

#[test]
fn test_encode_full_line() {
    let line = encode_str(&spec(&[(1, "0.3"), (7, "1")]), whole_domain());
    assert_eq!(
        line,
        "100 2025 0.0500 CVHM_95_99 1 2 1 0.7000 7 0.0000 ENDofMSG\n"
    );
}

#[test]
fn test_encode_sends_fraction_removed() {
    let line = encode_str(&spec(&[(12, "0.3")]), whole_domain());
    assert!(line.contains(" 12 0.7000 "), "{line}");

    let line = encode_str(&spec(&[(12, "0")]), whole_domain());
    assert!(line.contains(" 12 1.0000 "), "{line}");
}

#[test]
fn test_encode_without_modifications() {
    let line = encode_str(&spec(&[]), whole_domain());
    assert_eq!(line, "100 2025 0.0500 CVHM_95_99 1 0 ENDofMSG\n");
}

#[test]
fn test_encode_is_single_terminated_line() {
    let line = encode_str(&spec(&[(1, "0.5"), (2, "0.25"), (3, "0.125")]), whole_domain());
    assert!(line.ends_with(" ENDofMSG\n"));
    assert_eq!(line.matches('\n').count(), 1);
    assert_eq!(line.matches(TERMINATOR).count(), 1);
}

#[test]
fn test_encode_area_kind_from_selector() {
    let kinds = AreaKindMap::default().with(AreaKind::County, 33);
    let selector = AreaSelector::Area(Area {
        kind: AreaKind::County,
        id: 19,
    });
    let area = kinds.resolve(&selector);
    assert_eq!(
        area,
        WireArea {
            kind_id: 33,
            area_id: 19
        }
    );

    let line = encode_str(&spec(&[]), area);
    let tokens: Vec<&str> = line.split_whitespace().collect();
    assert_eq!(tokens[4], "33");
}

#[test]
fn test_record_count_matches_pairs() {
    for n in 0..20u16 {
        let modifications: Vec<(u16, &str)> = (1..=n).map(|crop| (crop, "0.9")).collect();
        let line = encode_str(&spec(&modifications), whole_domain());
        let declared: usize = line.split_whitespace().nth(5).unwrap().parse().unwrap();
        assert_eq!(declared, n as usize);

        let echoed = ProtocolCodec::default()
            .decode(record_count_echo(&line).as_bytes(), 1)
            .unwrap();
        assert_eq!(echoed[0].loading, n as f64);
    }
}

#[test]
fn test_encode_rejects_proportion_above_one() {
    let err = ProtocolCodec::default()
        .encode(&spec(&[(4, "1.5")]), whole_domain())
        .unwrap_err();
    assert!(matches!(err, EncodeError::InvalidModification { crop: 4, .. }));
}

#[test]
fn test_encode_rejects_duplicate_crop() {
    let err = ProtocolCodec::default()
        .encode(&spec(&[(4, "0.5"), (4, "0.6")]), whole_domain())
        .unwrap_err();
    assert!(matches!(err, EncodeError::InvalidModification { crop: 4, .. }));
}

#[test]
fn test_encode_rejects_crop_zero() {
    let err = ProtocolCodec::default()
        .encode(&spec(&[(0, "0.5")]), whole_domain())
        .unwrap_err();
    assert!(matches!(err, EncodeError::InvalidModification { crop: 0, .. }));
}

#[test]
fn test_encode_rejects_bad_scenario() {
    let mut bad = spec(&[]);
    bad.scenario_name = "two words".to_string();
    assert_eq!(
        ProtocolCodec::default().encode(&bad, whole_domain()),
        Err(EncodeError::InvalidScenario("two words".to_string()))
    );

    bad.scenario_name.clear();
    assert!(ProtocolCodec::default().encode(&bad, whole_domain()).is_err());

    bad.scenario_name = "CVHM_95_99_\u{e9}t\u{e9}".to_string();
    assert!(matches!(
        ProtocolCodec::default().encode(&bad, whole_domain()),
        Err(EncodeError::InvalidScenario(_))
    ));
}

// =============================================================================
// Decoding
// =============================================================================

#[test]
fn test_decode_well_major() {
    let codec = ProtocolCodec::new(ResultOrder::WellMajor);
    // 2 years, 3 wells
    let values = codec.decode(b"1 2 3 4 5 6", 2).unwrap();
    assert_eq!(values.len(), 6);
    assert_eq!(
        values[1],
        ResultValue {
            year: 1,
            well: 0,
            loading: 2.0
        }
    );
    assert_eq!(
        values[4],
        ResultValue {
            year: 0,
            well: 2,
            loading: 5.0
        }
    );
}

#[test]
fn test_decode_year_major() {
    let codec = ProtocolCodec::new(ResultOrder::YearMajor);
    let values = codec.decode(b"1 2 3 4 5 6", 2).unwrap();
    assert_eq!(
        values[1],
        ResultValue {
            year: 0,
            well: 1,
            loading: 2.0
        }
    );
    assert_eq!(
        values[4],
        ResultValue {
            year: 1,
            well: 1,
            loading: 5.0
        }
    );
}

#[test]
fn test_decode_mixed_separators() {
    let codec = ProtocolCodec::default();
    let values = codec.decode(b"1.5,2.25\n3e-2\t 4 ,", 4).unwrap();
    let loadings: Vec<f64> = values.iter().map(|v| v.loading).collect();
    assert_eq!(loadings, vec![1.5, 2.25, 0.03, 4.0]);
}

#[test]
fn test_decode_empty() {
    let codec = ProtocolCodec::default();
    assert_eq!(codec.decode(b"", 10), Err(DecodeError::Empty));
    assert_eq!(codec.decode(b" \n\t,", 10), Err(DecodeError::Empty));
}

#[test]
fn test_decode_malformed_token() {
    let codec = ProtocolCodec::default();
    assert_eq!(
        codec.decode(b"1 2 ERROR 4", 2),
        Err(DecodeError::Malformed {
            position: 2,
            token: "ERROR".to_string()
        })
    );
}

#[test]
fn test_decode_rejects_non_finite() {
    let codec = ProtocolCodec::default();
    assert!(matches!(
        codec.decode(b"1 NaN", 2),
        Err(DecodeError::Malformed { position: 1, .. })
    ));
    assert!(matches!(
        codec.decode(b"inf 1", 2),
        Err(DecodeError::Malformed { position: 0, .. })
    ));
}

#[test]
fn test_decode_misaligned() {
    let codec = ProtocolCodec::default();
    assert_eq!(
        codec.decode(b"1 2 3", 2),
        Err(DecodeError::Misaligned {
            values: 3,
            years: 2
        })
    );
    assert!(matches!(
        codec.decode(b"1 2 3", 0),
        Err(DecodeError::Misaligned { .. })
    ));
}

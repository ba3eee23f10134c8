//! Property-based tests for configuration module
//!
//! These tests use proptest to generate output layouts and format tables
//! and check that validation accepts exactly the well-formed ones.

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_output(id: u32)(
        scale_factor in 1i32..=4,
        device_scale_factor in 0.5f32..4.0,
    ) -> OutputConfig {
        OutputConfig {
            id,
            scale_factor,
            device_scale_factor,
            primary: false,
        }
    }
}

fn valid_outputs() -> impl Strategy<Value = Vec<OutputConfig>> {
    (1usize..6).prop_flat_map(|count| {
        (0..count as u32)
            .map(|id| valid_output(id + 1))
            .collect::<Vec<_>>()
    })
}

fn fourcc_code() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("AR24".to_string()),
        Just("XR24".to_string()),
        Just("AB24".to_string()),
        Just("NV12".to_string()),
        Just("YV12".to_string()),
    ]
}

proptest! {
    #[test]
    fn prop_distinct_outputs_with_one_primary_validate(
        mut outputs in valid_outputs(),
        primary_index in any::<prop::sample::Index>(),
    ) {
        let primary = primary_index.index(outputs.len());
        outputs[primary].primary = true;

        let mut config = BridgeConfig::default();
        config.display.outputs = outputs;
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn prop_non_positive_scale_is_rejected(
        mut outputs in valid_outputs(),
        bad_scale in -4i32..=0,
        victim in any::<prop::sample::Index>(),
    ) {
        let victim = victim.index(outputs.len());
        outputs[victim].scale_factor = bad_scale;

        let mut config = BridgeConfig::default();
        config.display.outputs = outputs;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn prop_format_table_keeps_every_valid_code(
        codes in prop::collection::btree_set(fourcc_code(), 1..5),
        modifier in any::<u64>(),
    ) {
        let mut config = BridgeConfig::default();
        config.host.formats = codes
            .iter()
            .map(|code| FormatConfig { fourcc: code.clone(), modifiers: vec![modifier] })
            .collect();

        prop_assert!(config.validate().is_ok());
        let table = config.host.format_table();
        prop_assert_eq!(table.len(), codes.len());
        for code in &codes {
            let key = fourcc_from_str(code).unwrap();
            prop_assert_eq!(table.get(&key), Some(&vec![modifier]));
        }
    }
}

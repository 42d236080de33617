//! Unit tests for serial-session value types
//!
//! This module contains tests for:
//! - `state.rs`: LineSettings validation and SessionState
//! - `port::traits`: LineConfig, filters, USB ids and signal sets
//! - `error.rs`: SessionError display
//!
//! Property tests (proptest) cover the setter rules over their whole input range.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_session::port::{DataBits, FlowControl, LineConfig, Parity, StopBits};
use serial_session::state::MAX_BUFFER_SIZE;
use serial_session::{
    LineSettings, OutputSignals, PortFilter, PortInfo, SessionError, SessionState,
};

// ============================================================================
// LineSettings Tests
// ============================================================================

mod line_settings_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = LineSettings::new();
        assert_eq!(settings.baud_rate(), 115_200);
        assert_eq!(settings.data_bits(), DataBits::Eight);
        assert_eq!(settings.stop_bits(), StopBits::One);
        assert_eq!(settings.parity(), Parity::None);
        assert_eq!(settings.flow_control(), FlowControl::None);
        assert_eq!(settings.buffer_size(), 255);
        assert_eq!(settings.snapshot(), LineConfig::default());
    }

    #[test]
    fn test_rejected_values_leave_settings_unchanged() {
        let mut settings = LineSettings::new();
        assert!(settings.set_baud_rate(0).is_err());
        assert!(settings.set_data_bits(6).is_err());
        assert!(settings.set_stop_bits(3).is_err());
        assert!(settings.set_buffer_size(0).is_err());
        assert!(settings.set_buffer_size(MAX_BUFFER_SIZE + 1).is_err());
        assert_eq!(settings, LineSettings::new());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut settings = LineSettings::new();
        let snapshot = settings.snapshot();
        settings.set_baud_rate(9600).unwrap();
        settings.set_parity(Parity::Even);
        assert_eq!(snapshot.baud_rate, 115_200);
        assert_eq!(snapshot.parity, Parity::None);
    }

    #[test]
    fn test_from_config_validates() {
        let config = LineConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            LineSettings::from_config(config),
            Err(SessionError::InvalidSetting { field: "buffer_size", .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_any_positive_baud_is_accepted(baud in 1u32..=u32::MAX) {
            let mut settings = LineSettings::new();
            prop_assert!(settings.set_baud_rate(baud).is_ok());
            prop_assert_eq!(settings.baud_rate(), baud);
        }

        #[test]
        fn prop_only_seven_or_eight_data_bits(bits in any::<u8>()) {
            let mut settings = LineSettings::new();
            let accepted = settings.set_data_bits(bits).is_ok();
            prop_assert_eq!(accepted, bits == 7 || bits == 8);
            if !accepted {
                prop_assert_eq!(settings.data_bits(), DataBits::Eight);
            }
        }

        #[test]
        fn prop_only_one_or_two_stop_bits(bits in any::<u8>()) {
            let mut settings = LineSettings::new();
            prop_assert_eq!(settings.set_stop_bits(bits).is_ok(), bits == 1 || bits == 2);
        }

        #[test]
        fn prop_buffer_size_range(size in 0usize..=(MAX_BUFFER_SIZE + 16)) {
            let mut settings = LineSettings::new();
            let accepted = settings.set_buffer_size(size).is_ok();
            prop_assert_eq!(accepted, (1..=MAX_BUFFER_SIZE).contains(&size));
            prop_assert!(settings.snapshot().validate().is_ok());
        }
    }
}

// ============================================================================
// LineConfig Serialization Tests
// ============================================================================

mod line_config_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_json_shape() {
        let config = LineConfig {
            baud_rate: 9600,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::Two,
            parity: Parity::Odd,
            flow_control: FlowControl::Hardware,
            buffer_size: 64,
        };
        let json = serde_json::to_value(config).expect("Failed to serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "baud_rate": 9600,
                "data_bits": 7,
                "stop_bits": 2,
                "parity": "odd",
                "flow_control": "hardware",
                "buffer_size": 64
            })
        );
    }

    #[test]
    fn test_invalid_data_bits_rejected() {
        let json = r#"{"baud_rate":9600,"data_bits":5,"stop_bits":1,"parity":"none","flow_control":"none","buffer_size":255}"#;
        assert!(serde_json::from_str::<LineConfig>(json).is_err());
    }
}

// ============================================================================
// Port Identification Tests
// ============================================================================

mod port_info_tests {
    use super::*;

    #[test]
    fn test_empty_filter_list_matches_everything() {
        assert!(PortFilter::matches_any(&[], &PortInfo::default()));
        assert!(!PortFilter::matches_any(
            &[PortFilter::vendor(0x2341)],
            &PortInfo::default()
        ));
    }

    proptest! {
        #[test]
        fn prop_usb_id_format(vid in any::<u16>(), pid in any::<u16>()) {
            let id = PortInfo::usb(vid, pid).usb_id().unwrap();
            prop_assert_eq!(id.len(), 9);
            prop_assert_eq!(&id[4..5], ":");
            prop_assert!(id.chars().all(|c| c == ':' || c.is_ascii_digit() || ('a'..='f').contains(&c)));
            prop_assert_eq!(u16::from_str_radix(&id[..4], 16).unwrap(), vid);
            prop_assert_eq!(u16::from_str_radix(&id[5..], 16).unwrap(), pid);
        }

        #[test]
        fn prop_vendor_filter(vid in any::<u16>(), pid in any::<u16>(), other in any::<u16>()) {
            let info = PortInfo::usb(vid, pid);
            prop_assert!(PortFilter::vendor(vid).matches(&info));
            prop_assert!(PortFilter::usb(vid, pid).matches(&info));
            prop_assert_eq!(PortFilter::vendor(other).matches(&info), other == vid);
        }
    }
}

// ============================================================================
// State and Error Tests
// ============================================================================

mod state_and_error_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_state_default_and_display() {
        assert_eq!(SessionState::default(), SessionState::Closed);
        assert_eq!(SessionState::Closing.to_string(), "closing");
        assert!(SessionState::Opening.is_active());
        assert!(!SessionState::Closed.is_active());
    }

    #[test]
    fn test_output_signals_json_omits_untouched_lines() {
        let json = serde_json::to_string(&OutputSignals::dtr(true)).unwrap();
        assert_eq!(json, r#"{"data_terminal_ready":true}"#);
        let parsed: OutputSignals = serde_json::from_str("{}").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SessionError::AlreadyOpen.to_string(),
            "Port is already open. Close it before trying to open it again."
        );
        assert_eq!(
            SessionError::PortNotOpen.to_string(),
            "Operation requires an open serial port, but the port is closed."
        );
        assert_eq!(
            SessionError::DeviceGone.to_string(),
            "The device was disconnected"
        );
    }
}

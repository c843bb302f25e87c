//! Firmata codec tests across the legal value ranges

use firmata_scout_core::protocol::codec::{
    decode, encode_analog_write, encode_digital_write, encode_set_pin_mode, join_7bit,
    message_length, split_7bit, Direction, ANALOG_MESSAGE, DIGITAL_MESSAGE, MAX_14BIT_VALUE,
    MAX_ANALOG_PIN, MAX_PIN, SET_PIN_MODE,
};
use firmata_scout_core::protocol::{Command, DecodedEvent, FirmataDecoder, FirmwareVersion, PinMode};
use pretty_assertions::assert_eq;

#[test]
fn test_7bit_split_is_lossless() {
    for value in 0..=MAX_14BIT_VALUE {
        let (low, high) = split_7bit(value);
        assert!(low < 0x80 && high < 0x80, "value {value}");
        assert_eq!(join_7bit(low, high), value);
    }
}

#[test]
fn test_payload_bytes_never_set_high_bit() {
    for pin in 0..=MAX_PIN {
        for level in [true, false] {
            let bytes = encode_digital_write(pin, level).unwrap();
            assert_eq!(bytes[0] & 0xF0, DIGITAL_MESSAGE);
            assert!(bytes[1] < 0x80 && bytes[2] < 0x80);
        }
        let bytes = encode_set_pin_mode(pin, PinMode::Servo).unwrap();
        assert_eq!(bytes, [SET_PIN_MODE, pin, 4]);
    }
    for pin in 0..=MAX_ANALOG_PIN {
        for value in [0, 1, 127, 128, 180, 255, MAX_14BIT_VALUE] {
            let bytes = encode_analog_write(pin, value).unwrap();
            assert_eq!(bytes[0], ANALOG_MESSAGE | pin);
            assert_eq!(join_7bit(bytes[1], bytes[2]), value);
        }
    }
}

#[test]
fn test_digital_write_targets_one_bit() {
    for pin in 0..=MAX_PIN {
        let bytes = encode_digital_write(pin, true).unwrap();
        assert_eq!(bytes[0], DIGITAL_MESSAGE | (pin / 8));
        assert_eq!(join_7bit(bytes[1], bytes[2]), 1 << (pin % 8));

        let bytes = encode_digital_write(pin, false).unwrap();
        assert_eq!(join_7bit(bytes[1], bytes[2]), 0);
    }
}

#[test]
fn test_out_of_range_values_rejected() {
    assert!(encode_analog_write(3, MAX_14BIT_VALUE + 1).is_err());
    assert!(encode_analog_write(MAX_ANALOG_PIN + 1, 0).is_err());
    assert!(encode_digital_write(MAX_PIN + 1, true).is_err());
    assert!(encode_set_pin_mode(MAX_PIN + 1, PinMode::Output).is_err());
}

#[test]
fn test_commands_match_length_table() {
    let commands = [
        Command::QueryVersion,
        Command::SetPinMode {
            pin: 9,
            mode: PinMode::Pwm,
        },
        Command::DigitalWrite {
            pin: 13,
            level: true,
        },
        Command::AnalogWrite { pin: 5, value: 90 },
    ];
    for command in commands {
        let bytes = command.encode().unwrap();
        assert_eq!(
            message_length(bytes[0], Direction::Outbound),
            Some(bytes.len()),
            "{command:?}"
        );
    }
}

#[test]
fn test_decode_noise_around_report() {
    assert_eq!(
        decode(&[0x01, 0xF9, 7, 9, 0x02]),
        vec![
            DecodedEvent::UnrecognizedByte(0x01),
            DecodedEvent::VersionReport(FirmwareVersion::new(7, 9)),
            DecodedEvent::UnrecognizedByte(0x02),
        ]
    );
}

#[test]
fn test_decode_drops_split_report() {
    assert!(decode(&[0xF9, 7]).is_empty());
    assert_eq!(
        decode(&[9]),
        vec![DecodedEvent::UnrecognizedByte(9)]
    );
}

#[test]
fn test_decoder_joins_report_at_every_split_point() {
    let stream = [0x55, 0xF9, 2, 5, 0xAA];
    for cut in 0..=stream.len() {
        let mut decoder = FirmataDecoder::new();
        let mut events = decoder.feed(&stream[..cut]);
        events.extend(decoder.feed(&stream[cut..]));
        assert_eq!(
            events,
            vec![
                DecodedEvent::UnrecognizedByte(0x55),
                DecodedEvent::VersionReport(FirmwareVersion::new(2, 5)),
                DecodedEvent::UnrecognizedByte(0xAA),
            ],
            "cut at {cut}"
        );
        assert!(!decoder.has_pending());
    }
}

#[test]
fn test_decoder_byte_at_a_time() {
    let mut decoder = FirmataDecoder::new();
    let events: Vec<_> = [0xF9, 2, 5, 0xF9, 2, 6]
        .iter()
        .flat_map(|b| decoder.feed(&[*b]))
        .collect();
    assert_eq!(
        events,
        vec![
            DecodedEvent::VersionReport(FirmwareVersion::new(2, 5)),
            DecodedEvent::VersionReport(FirmwareVersion::new(2, 6)),
        ]
    );
}

//! Integration tests for tagbridge-common.

use tagbridge_common::{
    ConversionResult, DataPoint, Format, Quality, Reading, StorageKeys, TagValue, decode,
    decode_auto, encode, sanitize_chunk,
};

/// A batch as returned by the proxy decodes into readings in order.
#[test]
fn test_proxy_batch_decodes() {
    let batch = r#"[
        ["boiler.temp", 81.4, "Good", "2024-03-01 10:00:00"],
        ["boiler.state", "RUN", "Good", "2024-03-01 10:00:00"],
        ["boiler.alarms", 0, "Uncertain", null],
        ["boiler.level", null, "Error", null]
    ]"#;

    let readings: Vec<Reading> = serde_json::from_str(batch).expect("batch decode failed");

    assert_eq!(readings.len(), 4);
    assert_eq!(readings[0].value, TagValue::Float(81.4));
    assert_eq!(readings[1].value, TagValue::Text("RUN".to_string()));
    assert_eq!(readings[2].value, TagValue::Integer(0));
    assert_eq!(readings[2].quality, Quality::Uncertain);
    assert!(readings[3].quality.is_error());
    assert!(readings.iter().all(|r| r.path_for("boiler").is_some()));
}

/// Readings re-encode to the same tuple shape the proxy sends.
#[test]
fn test_reading_wire_shape() {
    let reading = Reading::good("pump.flow", 12.5).with_timestamp("t0");
    let json = serde_json::to_value(&reading).unwrap();

    assert_eq!(json, serde_json::json!(["pump.flow", 12.5, "Good", "t0"]));
}

#[test]
fn test_record_through_both_formats() {
    let mut record = ConversionResult::new("press-7", "hydraulic");
    record.attributes.push(DataPoint::new("firmware", "2.1.0"));
    record.telemetry.push(DataPoint::new("force", 950i64));
    record.telemetry.push(DataPoint::new("cycleTime", 4.25));
    record.telemetry.push(DataPoint::new("doorOpen", false));

    for format in [Format::Json, Format::Cbor] {
        let bytes = encode(&record, format).expect("encode failed");
        let decoded: ConversionResult = decode(&bytes, format).expect("decode failed");
        assert_eq!(decoded, record, "format {}", format);

        let auto: ConversionResult = decode_auto(&bytes).expect("auto decode failed");
        assert_eq!(auto.device_name, "press-7");
    }
}

#[test]
fn test_record_keys_for_configured_names() {
    let keys = StorageKeys::new("tagbridge/opcda");

    let names = [
        ("OPC-DA connector qwert", "Bucket Brigade"),
        ("plant", "line/1"),
        ("plant", "tank.level"),
    ];

    for (connector, device) in names {
        let key = keys.record(connector, device);
        let (parsed_connector, parsed_device) =
            keys.parse_record(&key).expect("record key must parse");
        assert_eq!(parsed_connector, sanitize_chunk(connector));
        assert_eq!(parsed_device, sanitize_chunk(device));
    }
}

#[test]
fn test_empty_record() {
    let record = ConversionResult::new("idle", "default");
    assert!(record.is_empty());

    let json = serde_json::to_string(&record).unwrap();
    assert_eq!(
        json,
        r#"{"deviceName":"idle","deviceType":"default","attributes":[],"telemetry":[]}"#
    );
}

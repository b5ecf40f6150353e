use crate::wire::{HEADER_LEN, Package, WireError};

#[test]
fn round_trips_a_package() {
    let pkg = Package::new(42, 7, b"hello".to_vec());
    let bytes = pkg.to_vec().unwrap();
    assert_eq!(bytes.len(), HEADER_LEN + 5);

    let (decoded, consumed) = Package::parse_from(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, pkg);
}

#[test]
fn round_trips_an_empty_body() {
    let pkg = Package::new(1, 0, Vec::new());
    let bytes = pkg.to_vec().unwrap();
    let (decoded, consumed) = Package::parse_from(&bytes).unwrap();
    assert_eq!(consumed, HEADER_LEN);
    assert_eq!(decoded, pkg);
}

#[test]
fn parse_leaves_trailing_bytes_unconsumed() {
    let pkg = Package::new(1, 1, b"abc".to_vec());
    let mut bytes = pkg.to_vec().unwrap();
    bytes.extend_from_slice(b"trailing");

    let (decoded, consumed) = Package::parse_from(&bytes).unwrap();
    assert_eq!(decoded, pkg);
    assert_eq!(&bytes[consumed..], b"trailing");
}

#[test]
fn rejects_short_header() {
    let err = Package::parse_from(&[0u8; 3]).unwrap_err();
    assert!(matches!(err, WireError::ShortHeader(3)));
}

#[test]
fn rejects_bad_checkbit() {
    let pkg = Package::new(1, 5, b"x".to_vec());
    let mut bytes = pkg.to_vec().unwrap();
    // Corrupt the checkbit byte (offset 7: len(4)+pid(2)+tp(1)).
    bytes[7] ^= 0xFF;
    let err = Package::parse_from(&bytes).unwrap_err();
    assert!(matches!(err, WireError::BadCheckbit { .. }));
}

//! Integration test: boundary cases and round-trip laws for the codec,
//! exercised through the public crate API only (no internal helpers).

use imxboot::dcd::{self, Dcd, DcdError};
use imxboot::hexfile;
use imxboot::image::{Image, Options, Variant, VariantHint};

#[test]
fn dcd_exactly_at_the_size_limit_is_accepted_one_byte_over_is_not() {
    // Each WriteData entry costs 8 bytes; header overhead is 4 (DCD) + 4
    // (WriteData record). Fill as close to 1768 bytes as an 8-byte entry
    // size allows, then push one more entry to cross the limit.
    let header_overhead = 8usize;
    let entries = (dcd::MAX_DCD_SIZE - header_overhead) / 8;
    let mut at_limit = Dcd::new(0x40);
    at_limit.push(dcd::Command::WriteData {
        op: dcd::WriteOp::WriteValue,
        width: dcd::Width::U32,
        entries: (0..entries)
            .map(|i| dcd::WriteEntry {
                addr: 0x3000_0000 + i as u32 * 4,
                value: 0,
            })
            .collect(),
    });
    assert!(dcd::binary::export(&at_limit).is_ok());

    let mut over_limit = at_limit.clone();
    if let dcd::Command::WriteData { entries, .. } = &mut over_limit.commands[0] {
        entries.push(dcd::WriteEntry {
            addr: 0x3000_1000,
            value: 0,
        });
    }
    let err = dcd::binary::export(&over_limit).unwrap_err();
    assert!(matches!(err, DcdError::OversizeSegment { .. }));
}

#[test]
fn image_with_zero_length_dcd_and_csf_has_null_pointers() {
    let options = Options::default();
    let image = Image::build_v2(Variant::V2, 0x9000_0000, vec![0x42; 16], None, None, &options)
        .expect("build succeeds");
    let bytes = image.export().expect("export succeeds");
    let reparsed = Image::parse(&bytes, VariantHint::Auto, &options).expect("parse succeeds");
    assert_eq!(reparsed.ivt_dcd().expect("dcd pointer resolves"), 0);
    assert_eq!(reparsed.ivt_csf().expect("csf pointer resolves"), 0);
}

#[test]
fn ihex_round_trip_recovers_the_byte_payload() {
    let image = hexfile::HexImage {
        base_addr: 0x0800_0000,
        bytes: (0u32..512).map(|i| (i % 256) as u8).collect(),
        entry: Some(0x0800_0100),
    };
    let text = hexfile::emit_ihex(&image);
    let parsed = hexfile::parse_ihex(&text, false).expect("ihex parses back");
    assert_eq!(parsed.bytes, image.bytes);
    assert_eq!(parsed.entry, image.entry);
}

#[test]
fn auto_variant_detection_finds_a_v2_image_at_the_default_offset() {
    let options = Options::default();
    let image = Image::build_v2(
        Variant::V2,
        0x8780_0000,
        vec![0xaa; 32],
        None,
        None,
        &options,
    )
    .expect("build succeeds");
    let bytes = image.export().expect("export succeeds");
    let found = Image::parse(&bytes, VariantHint::Auto, &Options::default())
        .expect("auto-detection recovers the container");
    assert_eq!(found.ivt_self().expect("self pointer resolves"), 0x8780_0400);
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::io::Cursor;

use zenbmff::{
    BoxType, BoxWriter, CompositionToDecodeBox, ConstructionMethod, DataEntryBox,
    DataReferenceBox, DecodeConfig, DirectReferenceSamplesList, Error, FileTypeBox, FourCC,
    FreeSpaceBox, HandlerBox, ImageRotation, ImageSpatialExtentsProperty, ItemLocation,
    ItemLocationExtent, ItemProperty, ItemPropertyAssociation, MetaBox, PropertyAssociation,
    SampleGroupDescriptionBox, SampleGroupEntry, SegmentIndexBox, SegmentReference, Stop,
    StopReason, TrackTypeBox, Unstoppable,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
}

fn brands(tags: &[&[u8; 4]]) -> zenbmff::TryVec<FourCC> {
    let mut v = zenbmff::TryVec::new();
    for tag in tags {
        v.push(FourCC::from(**tag)).expect("push brand");
    }
    v
}

// ============================================================================
// Brand boxes
// ============================================================================

#[test]
fn brand_boxes_parse_sequentially() {
    let ftyp = FileTypeBox {
        major_brand: FourCC::from(*b"isom"),
        minor_version: 512,
        compatible_brands: brands(&[b"isom", b"iso6"]),
    };
    let ttyp = TrackTypeBox {
        major_brand: FourCC::from(*b"msf1"),
        minor_version: 0,
        compatible_brands: brands(&[b"msf1"]),
    };

    let mut buffer = ftyp.to_bytes().expect("ftyp to_bytes").to_vec();
    let declared = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
    assert_eq!(declared, buffer.len(), "ftyp size field must cover the whole box");
    buffer.extend_from_slice(&ttyp.to_bytes().expect("ttyp to_bytes"));

    assert_eq!(FileTypeBox::from_bytes(&buffer).expect("ftyp reparse"), ftyp);
    // The next box starts at exactly the declared size of the first.
    assert_eq!(TrackTypeBox::from_bytes(&buffer[declared..]).expect("ttyp reparse"), ttyp);

    assert!(ftyp.has_brand(FourCC::from(*b"iso6")));
    assert!(ttyp.has_brand(FourCC::from(*b"msf1")));
    assert!(!ttyp.has_brand(FourCC::from(*b"heic")));
}

// ============================================================================
// Meta box: builders and round trips
// ============================================================================

#[test]
fn meta_builder_round_trip() {
    init_logs();
    let mut meta = MetaBox::default();
    meta.handler_mut().name.extend_from_slice(b"zenbmff").expect("handler name");
    meta.add_item(1, FourCC::from(*b"hvc1"), b"primary").expect("item 1");
    meta.add_item(2, FourCC::from(*b"Exif"), b"exif").expect("item 2");
    meta.set_primary_item(1);
    meta.add_item_extent(1, 4096, 1000).expect("extent");
    meta.add_idat_item(3, FourCC::from(*b"hvc1"), b"thumb", b"tiny").expect("idat item");
    meta.add_item_reference(FourCC::from(*b"cdsc"), 2, 1).expect("cdsc reference");
    meta.add_item_reference(FourCC::from(*b"thmb"), 3, 1).expect("thmb reference");
    meta.add_entity_group(FourCC::from(*b"altr"), 100, &[1, 3]).expect("entity group");
    let ispe = meta
        .add_property(
            ItemProperty::ImageSpatialExtents(ImageSpatialExtentsProperty { width: 1280, height: 720 }),
            &[1, 3],
            true,
        )
        .expect("add ispe");
    meta.associate_property(ispe, &[2], false).expect("associate ispe");

    let bytes = meta.to_bytes().expect("to_bytes");
    let reparsed = MetaBox::from_bytes(&bytes).expect("reparse");
    assert_eq!(reparsed, meta);

    assert_eq!(reparsed.primary_item_id(), Some(1));
    assert_eq!(reparsed.item_type(2), Some(FourCC::from(*b"Exif")));
    assert_eq!(reparsed.item_references().to_item_ids(FourCC::from(*b"cdsc"), 2), [1].as_slice());
    let group = reparsed
        .groups_list()
        .groups_of_type(FourCC::from(*b"altr"))
        .next()
        .expect("altr group");
    assert_eq!(group.group_id, 100);
    assert_eq!(group.entity_ids, [1, 3].as_slice());
    assert_eq!(
        reparsed.item_properties().find_property_index(BoxType::ImageSpatialExtentsProperty, 2),
        ispe
    );

    // Children are written in a fixed order.
    let pos = |tag: &[u8]| bytes.windows(4).position(|w| w == tag).expect("tag present");
    assert!(pos(b"hdlr") < pos(b"pitm"));
    assert!(pos(b"pitm") < pos(b"iloc"));
    assert!(pos(b"iloc") < pos(b"iinf"));
    assert!(pos(b"iinf") < pos(b"iref"));
    assert!(pos(b"iref") < pos(b"idat"));
    assert!(pos(b"idat") < pos(b"iprp"));
    assert!(pos(b"iprp") < pos(b"grpl"));
}

#[test]
fn written_size_fields_are_exact() {
    let mut meta = MetaBox::default();
    meta.add_item(7, FourCC::from(*b"hvc1"), b"image").expect("add_item");
    let meta_bytes = meta.to_bytes().expect("to_bytes");
    let declared = u32::from_be_bytes(meta_bytes[0..4].try_into().unwrap()) as usize;
    assert_eq!(declared, meta_bytes.len());

    // A sentinel box appended after the meta parses at exactly the
    // declared offset.
    let sentinel = FileTypeBox {
        major_brand: FourCC::from(*b"isom"),
        minor_version: 0,
        compatible_brands: brands(&[b"isom"]),
    };
    let mut buffer = meta_bytes.to_vec();
    buffer.extend_from_slice(&sentinel.to_bytes().expect("ftyp to_bytes"));
    assert_eq!(FileTypeBox::from_bytes(&buffer[declared..]).expect("sentinel"), sentinel);
    assert_eq!(MetaBox::from_bytes(&buffer).expect("meta"), meta);
}

#[test]
fn hidden_items_survive_round_trip() {
    let mut meta = MetaBox::default();
    meta.add_item(1, FourCC::from(*b"hvc1"), b"shown").expect("item 1");
    meta.add_item(2, FourCC::from(*b"hvc1"), b"hidden").expect("item 2");
    meta.set_item_hidden(2, true).expect("hide");

    let reparsed = MetaBox::from_bytes(&meta.to_bytes().expect("to_bytes")).expect("reparse");
    assert!(!reparsed.item_infos().entry_by_id(1).expect("item 1").hidden);
    assert!(reparsed.item_infos().entry_by_id(2).expect("item 2").hidden);
}

#[test]
fn external_data_references_parse_but_never_write() {
    let mut dref = DataReferenceBox::default();
    dref.entries
        .push(DataEntryBox::Url { flags: 1, location: Default::default() })
        .expect("url entry");

    let mut w = BoxWriter::new();
    let meta_mark = w.open_full_box(BoxType::MetadataBox, 0, 0).expect("meta");
    HandlerBox::default().write(&mut w).expect("hdlr");
    let dinf = w.open_box(BoxType::DataInformationBox).expect("dinf");
    dref.write(&mut w).expect("dref");
    w.close_box(dinf).expect("close dinf");
    w.close_box(meta_mark).expect("close meta");

    let meta = MetaBox::from_bytes(w.as_slice()).expect("parse");
    assert_eq!(meta.data_information().data_reference.entries.len(), 1);

    let rewritten = meta.to_bytes().expect("to_bytes");
    assert!(!rewritten.windows(4).any(|wnd| wnd == b"dref"), "dref is parse-only");
}

// ============================================================================
// Item payload resolution
// ============================================================================

const PAYLOAD: &[u8] = b"AAAAABBBBBCCCCC";

fn meta_pointing_at(base: u64) -> MetaBox {
    let mut meta = MetaBox::default();
    meta.add_item(1, FourCC::from(*b"hvc1"), b"image").expect("add_item");
    meta.set_primary_item(1);
    meta.set_item_base_offset(1, base).expect("base offset");
    meta.add_item_extent(1, 10, 5).expect("first extent");
    meta.add_item_extent(1, 0, 5).expect("second extent");
    meta
}

#[test]
fn read_item_from_written_file() {
    init_logs();
    let ftyp = FileTypeBox {
        major_brand: FourCC::from(*b"mif1"),
        minor_version: 0,
        compatible_brands: brands(&[b"mif1", b"heic"]),
    }
    .to_bytes()
    .expect("ftyp to_bytes");

    // Offsets are encoded in fixed-width fields, so a sizing pass with
    // a placeholder base fixes the layout.
    let sizing = meta_pointing_at(0).to_bytes().expect("sizing to_bytes");
    let payload_base = (ftyp.len() + sizing.len() + 8) as u64;
    let meta_bytes = meta_pointing_at(payload_base).to_bytes().expect("to_bytes");
    assert_eq!(sizing.len(), meta_bytes.len());

    let mut file = ftyp.to_vec();
    file.extend_from_slice(&meta_bytes);
    let mut w = BoxWriter::new();
    let mdat = w.open_box(BoxType::MediaDataBox).expect("mdat");
    w.write_bytes(PAYLOAD).expect("payload");
    w.close_box(mdat).expect("close mdat");
    file.extend_from_slice(w.as_slice());

    let meta = MetaBox::from_bytes(&file).expect("parse");
    assert_eq!(meta.primary_item_id(), Some(1));
    assert_eq!(meta.item_length(1, file.len() as u64).expect("item_length"), 10);

    let mut cursor = Cursor::new(file.as_slice());
    let data = meta.read_item(&mut cursor, 1).expect("read_item");
    // Extents concatenate in declared order, not offset order.
    assert_eq!(data, b"CCCCCAAAAA".as_ref());
}

#[test]
fn items_built_from_other_items() {
    let mut meta = MetaBox::default();
    meta.add_idat_item(1, FourCC::from(*b"hvc1"), b"source", b"0123456789").expect("idat item");
    meta.add_item(2, FourCC::from(*b"hvc1"), b"derived").expect("item 2");

    let mut extents = zenbmff::TryVec::new();
    extents.push(ItemLocationExtent { index: 0, offset: 2, length: 5 }).expect("extent");
    meta.item_locations_mut()
        .add_location(ItemLocation {
            item_id: 2,
            construction_method: ConstructionMethod::Item,
            data_reference_index: 0,
            base_offset: 0,
            extents,
        })
        .expect("location");
    meta.add_item_reference(FourCC::from(*b"iloc"), 2, 1).expect("iloc reference");

    let reparsed = MetaBox::from_bytes(&meta.to_bytes().expect("to_bytes")).expect("reparse");
    let mut empty = Cursor::new(&[][..]);
    assert_eq!(reparsed.read_item(&mut empty, 1).expect("item 1"), b"0123456789".as_ref());
    assert_eq!(reparsed.read_item(&mut empty, 2).expect("item 2"), b"23456".as_ref());
    assert_eq!(reparsed.item_length(2, 0).expect("item_length"), 5);
}

#[test]
fn cyclic_item_references_are_rejected() {
    let mut meta = MetaBox::default();
    meta.add_item(1, FourCC::from(*b"hvc1"), b"a").expect("item 1");
    meta.add_item(2, FourCC::from(*b"hvc1"), b"b").expect("item 2");
    for (from, to) in [(1u32, 2u32), (2, 1)] {
        let mut extents = zenbmff::TryVec::new();
        extents.push(ItemLocationExtent::default()).expect("extent");
        meta.item_locations_mut()
            .add_location(ItemLocation {
                item_id: from,
                construction_method: ConstructionMethod::Item,
                data_reference_index: 0,
                base_offset: 0,
                extents,
            })
            .expect("location");
        meta.add_item_reference(FourCC::from(*b"iloc"), from, to).expect("reference");
    }

    for id in [1, 2] {
        match meta.item_length(id, 0) {
            Err(Error::InvalidData(msg)) => assert_eq!(msg, "circular item reference"),
            Ok(_) => panic!("Expected cycle rejection for item {id}"),
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }
}

#[test]
fn item_construction_depth_is_bounded() {
    let mut meta = MetaBox::default();
    meta.add_idat_item(17, FourCC::from(*b"hvc1"), b"deepest", b"end").expect("idat item");
    for id in 1u32..=16 {
        meta.add_item(id, FourCC::from(*b"hvc1"), b"link").expect("item");
        let mut extents = zenbmff::TryVec::new();
        extents.push(ItemLocationExtent::default()).expect("extent");
        meta.item_locations_mut()
            .add_location(ItemLocation {
                item_id: id,
                construction_method: ConstructionMethod::Item,
                data_reference_index: 0,
                base_offset: 0,
                extents,
            })
            .expect("location");
        meta.add_item_reference(FourCC::from(*b"iloc"), id, id + 1).expect("reference");
    }

    // Sixteen hops resolve, a seventeenth does not.
    assert_eq!(meta.item_length(2, 0).expect("chain from item 2"), 3);
    match meta.item_length(1, 0) {
        Err(Error::ResourceLimitExceeded(msg)) => {
            assert_eq!(msg, "item construction depth limit exceeded")
        },
        other => panic!("Expected depth limit, got {other:?}"),
    }
}

// ============================================================================
// Property container and associations
// ============================================================================

#[test]
fn unknown_property_survives_verbatim() {
    let zzzz = BoxType::UnknownBox(u32::from_be_bytes(*b"zzzz"));

    let mut w = BoxWriter::new();
    let meta_mark = w.open_full_box(BoxType::MetadataBox, 0, 0).expect("meta");
    HandlerBox::default().write(&mut w).expect("hdlr");
    let iprp = w.open_box(BoxType::ItemPropertiesBox).expect("iprp");
    let ipco = w.open_box(BoxType::ItemPropertyContainerBox).expect("ipco");
    ImageSpatialExtentsProperty { width: 8, height: 8 }.write(&mut w).expect("ispe");
    let unknown = w.open_box(zzzz).expect("unknown");
    w.write_bytes(b"future-payload").expect("payload");
    w.close_box(unknown).expect("close unknown");
    w.close_box(ipco).expect("close ipco");
    let mut ipma = ItemPropertyAssociation::new();
    ipma.add_entry(1, 1, true).expect("associate ispe");
    ipma.add_entry(1, 2, false).expect("associate unknown");
    ipma.write(&mut w).expect("ipma");
    w.close_box(iprp).expect("close iprp");
    w.close_box(meta_mark).expect("close meta");
    let bytes = w.into_vec();

    let meta = MetaBox::from_bytes(&bytes).expect("parse");
    let props = meta.item_properties();
    assert_eq!(props.find_property_index(zzzz, 1), 2);
    let raw = match props.property_by_index(2) {
        Some(ItemProperty::Raw(raw)) => raw,
        other => panic!("Unexpected property: {other:?}"),
    };
    assert_eq!(raw.name(), zzzz);

    let mut expected = vec![0, 0, 0, 22];
    expected.extend_from_slice(b"zzzz");
    expected.extend_from_slice(b"future-payload");
    assert_eq!(raw.data(), expected.as_slice());

    // Re-serialization reproduces the unrecognized box byte for byte.
    let rewritten = meta.to_bytes().expect("to_bytes");
    assert!(rewritten.windows(expected.len()).any(|wnd| wnd == expected.as_slice()));
}

#[test]
fn property_index_widening_is_box_wide() {
    let mut meta = MetaBox::default();
    meta.add_item(1, FourCC::from(*b"hvc1"), b"").expect("add_item");
    let first = meta
        .add_property(
            ItemProperty::ImageSpatialExtents(ImageSpatialExtentsProperty { width: 64, height: 64 }),
            &[1],
            true,
        )
        .expect("add ispe");
    assert_eq!(first, 1);
    for _ in 0..198 {
        meta.add_property(ItemProperty::FreeSpace(FreeSpaceBox::new(0)), &[], false).expect("filler");
    }
    let last = meta
        .add_property(ItemProperty::ImageRotation(ImageRotation { angle: 90 }), &[1], false)
        .expect("add irot");
    assert_eq!(last, 200);

    let reparsed = MetaBox::from_bytes(&meta.to_bytes().expect("to_bytes")).expect("reparse");
    let props = reparsed.item_properties();
    assert_eq!(props.find_property_index(BoxType::ImageSpatialExtentsProperty, 1), 1);
    assert_eq!(props.find_property_index(BoxType::ImageRotationProperty, 1), 200);

    let assoc = &props.associations()[0];
    assert_eq!(assoc.flags() & 1, 1, "index 200 needs the 15-bit encoding");
    assert_eq!(assoc.version(), 0, "small item ids keep the 16-bit id form");
    let entries = assoc.association_entries(1);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], PropertyAssociation { index: 1, essential: true });
    assert_eq!(entries[1], PropertyAssociation { index: 200, essential: false });
}

#[test]
fn association_version_never_narrows() {
    let mut ipma = ItemPropertyAssociation::new();
    ipma.add_entry(70_000, 1, false).expect("wide id");
    assert_eq!(ipma.version(), 1);
    ipma.add_entry(3, 1, false).expect("small id");
    assert_eq!(ipma.version(), 1, "widening is one-way");

    let mut w = BoxWriter::new();
    ipma.write(&mut w).expect("write");
    assert_eq!(w.as_slice()[8], 1); // version byte
}

// ============================================================================
// Resource limits, cancellation, lenient mode
// ============================================================================

#[test]
fn decode_config_default_has_sane_limits() {
    let config = DecodeConfig::default();
    assert_eq!(config.peak_memory_limit, Some(1_000_000_000));
    assert_eq!(config.max_items, Some(100_000));
    assert!(!config.lenient);
}

#[test]
fn decode_config_unlimited() {
    let config = DecodeConfig::unlimited();
    assert_eq!(config.peak_memory_limit, None);
    assert_eq!(config.max_items, None);
    assert!(!config.lenient);
}

#[test]
fn decode_config_builder_methods() {
    let config = DecodeConfig::default()
        .with_peak_memory_limit(42)
        .with_max_items(7)
        .lenient(true);

    assert_eq!(config.peak_memory_limit, Some(42));
    assert_eq!(config.max_items, Some(7));
    assert!(config.lenient);
}

#[test]
fn item_count_limit_applies_to_parsing() {
    let mut meta = MetaBox::default();
    for id in 1..=6 {
        meta.add_item(id, FourCC::from(*b"hvc1"), b"").expect("add_item");
    }
    let bytes = meta.to_bytes().expect("to_bytes");

    let config = DecodeConfig::default().with_max_items(5);
    match MetaBox::from_bytes_with_config(&bytes, &config, &Unstoppable) {
        Err(Error::ResourceLimitExceeded(msg)) => assert_eq!(msg, "item count limit exceeded"),
        Ok(_) => panic!("Expected item count limit error"),
        Err(e) => panic!("Unexpected error: {e:?}"),
    }
}

#[test]
fn peak_memory_limit_applies_to_idat() {
    let mut meta = MetaBox::default();
    meta.add_idat_item(1, FourCC::from(*b"hvc1"), b"", &[0xAA; 4096]).expect("idat item");
    let bytes = meta.to_bytes().expect("to_bytes");

    let config = DecodeConfig::default().with_peak_memory_limit(1024);
    match MetaBox::from_bytes_with_config(&bytes, &config, &Unstoppable) {
        Err(Error::ResourceLimitExceeded(msg)) => assert_eq!(msg, "peak memory limit exceeded"),
        Ok(_) => panic!("Expected peak memory limit error"),
        Err(e) => panic!("Unexpected error: {e:?}"),
    }
}

#[test]
fn cancellation_during_parse() {
    struct ImmediatelyCancelled;
    impl Stop for ImmediatelyCancelled {
        fn check(&self) -> std::result::Result<(), StopReason> {
            Err(StopReason::Cancelled)
        }
    }

    let bytes = MetaBox::default().to_bytes().expect("to_bytes");
    let config = DecodeConfig::default();
    match MetaBox::from_bytes_with_config(&bytes, &config, &ImmediatelyCancelled) {
        Err(Error::Stopped(reason)) => assert_eq!(reason, StopReason::Cancelled),
        Ok(_) => panic!("Expected cancellation"),
        Err(e) => panic!("Unexpected error: {e:?}"),
    }
}

fn meta_with_flagged_ispe() -> zenbmff::TryVec<u8> {
    let mut w = BoxWriter::new();
    let meta_mark = w.open_full_box(BoxType::MetadataBox, 0, 0).expect("meta");
    HandlerBox::default().write(&mut w).expect("hdlr");
    let iprp = w.open_box(BoxType::ItemPropertiesBox).expect("iprp");
    let ipco = w.open_box(BoxType::ItemPropertyContainerBox).expect("ipco");
    // ispe requires zero flags; write a nonzero value on purpose.
    let ispe = w.open_full_box(BoxType::ImageSpatialExtentsProperty, 0, 1).expect("ispe");
    w.write_u32(1920).expect("width");
    w.write_u32(1080).expect("height");
    w.close_box(ispe).expect("close ispe");
    w.close_box(ipco).expect("close ipco");
    let mut ipma = ItemPropertyAssociation::new();
    ipma.add_entry(1, 1, true).expect("associate");
    ipma.write(&mut w).expect("ipma");
    w.close_box(iprp).expect("close iprp");
    w.close_box(meta_mark).expect("close meta");
    w.into_vec()
}

#[test]
fn lenient_mode_tolerates_nonzero_flags() {
    let bytes = meta_with_flagged_ispe();

    match MetaBox::from_bytes(&bytes) {
        Err(Error::Unsupported(msg)) => assert_eq!(msg, "expected flags to be 0"),
        Ok(_) => panic!("Expected strict parse to fail"),
        Err(e) => panic!("Unexpected error: {e:?}"),
    }

    let config = DecodeConfig::default().lenient(true);
    let meta = MetaBox::from_bytes_with_config(&bytes, &config, &Unstoppable).expect("lenient parse");
    match meta.item_properties().property_by_index(1) {
        Some(ItemProperty::ImageSpatialExtents(ispe)) => {
            assert_eq!(ispe.width, 1920);
            assert_eq!(ispe.height, 1080);
        },
        other => panic!("Unexpected property: {other:?}"),
    }
}

#[test]
fn implausible_entry_counts_are_rejected() {
    let mut w = BoxWriter::new();
    let meta_mark = w.open_full_box(BoxType::MetadataBox, 0, 0).expect("meta");
    let iinf = w.open_full_box(BoxType::ItemInfoBox, 0, 0).expect("iinf");
    w.write_u16(0xffff).expect("count");
    w.close_box(iinf).expect("close iinf");
    w.close_box(meta_mark).expect("close meta");

    match MetaBox::from_bytes(w.as_slice()) {
        Err(Error::InvalidData(msg)) => assert_eq!(msg, "iinf entry count exceeds box size"),
        Ok(_) => panic!("Expected entry count rejection"),
        Err(e) => panic!("Unexpected error: {e:?}"),
    }
}

// ============================================================================
// Segment boxes
// ============================================================================

#[test]
fn segment_index_public_round_trip() {
    let mut sidx = SegmentIndexBox {
        reference_id: 9,
        timescale: 90_000,
        earliest_presentation_time: 0,
        first_offset: 64,
        references: Default::default(),
        space_reserve: 0,
    };
    sidx.references
        .push(SegmentReference {
            reference_type: false,
            referenced_size: 4096,
            subsegment_duration: 3000,
            starts_with_sap: true,
            sap_type: 1,
            sap_delta_time: 0,
        })
        .expect("reference");

    let bytes = sidx.to_bytes().expect("to_bytes");
    assert_eq!(bytes[8], 0); // version
    assert_eq!(SegmentIndexBox::from_bytes(&bytes).expect("reparse"), sidx);

    sidx.earliest_presentation_time = u64::from(u32::MAX) + 1;
    let bytes = sidx.to_bytes().expect("to_bytes");
    assert_eq!(bytes[8], 1);
    assert_eq!(SegmentIndexBox::from_bytes(&bytes).expect("reparse"), sidx);
}

#[test]
fn segment_index_reserve_leaves_parseable_stream() {
    let mut sidx = SegmentIndexBox {
        reference_id: 1,
        timescale: 1000,
        first_offset: 100,
        space_reserve: 3,
        ..Default::default()
    };
    sidx.references.push(SegmentReference::default()).expect("reference");

    let bytes = sidx.to_bytes().expect("to_bytes");
    let reparsed = SegmentIndexBox::from_bytes(&bytes).expect("reparse");
    // Two spare slots of 12 bytes become a trailing free box, and the
    // offset is shifted past it.
    assert_eq!(reparsed.first_offset, 100 + 24);
    assert_eq!(reparsed.space_reserve, 0);
}

#[test]
fn sample_group_public_round_trip() {
    let mut sgpd = SampleGroupDescriptionBox::new(FourCC::from(*b"refs"));
    let mut ids = zenbmff::TryVec::new();
    ids.extend_from_slice(&[20, 21]).expect("ids");
    sgpd.add_entry(SampleGroupEntry::DirectReferenceSamples(DirectReferenceSamplesList {
        sample_id: 19,
        direct_reference_sample_ids: ids,
    }))
    .expect("entry");

    let bytes = sgpd.to_bytes().expect("to_bytes");
    assert_eq!(SampleGroupDescriptionBox::from_bytes(&bytes).expect("reparse"), sgpd);

    // A stream leading with some other box is rejected.
    let ftyp = FileTypeBox {
        major_brand: FourCC::from(*b"isom"),
        minor_version: 0,
        compatible_brands: brands(&[b"isom"]),
    }
    .to_bytes()
    .expect("ftyp");
    assert!(matches!(
        SampleGroupDescriptionBox::from_bytes(&ftyp),
        Err(Error::InvalidData("expected sgpd box"))
    ));
}

#[test]
fn composition_to_decode_public_round_trip() {
    let mut cslg = CompositionToDecodeBox {
        composition_to_dts_shift: -5,
        least_decode_to_display_delta: -10,
        greatest_decode_to_display_delta: 10,
        composition_start_time: 0,
        composition_end_time: 90_000,
    };
    assert_eq!(cslg.version(), 0);
    let reparsed = CompositionToDecodeBox::from_bytes(&cslg.to_bytes().expect("to_bytes"))
        .expect("reparse");
    assert_eq!(reparsed, cslg);

    cslg.composition_end_time = i64::from(i32::MAX) + 1;
    assert_eq!(cslg.version(), 1);
    let reparsed = CompositionToDecodeBox::from_bytes(&cslg.to_bytes().expect("to_bytes"))
        .expect("reparse");
    assert_eq!(reparsed, cslg);
}

#![allow(clippy::unreadable_literal)]
use pixudp_decode::word::Word;
use pixudp_decode::{
    DecoderConfig, Hit, PackageDecoder, ReadoutMode, TimestampOffset, TsFormat, PACKAGE_SIZE,
    PACKAGE_SIZE_WITH_MARGIN,
};

// Datamux words of one hit on layer 1: column 35, row 73, ts 1025
const TRIGGER: Word = [0x11, 0, 0, 0, 0, 0x05, 0x00, 0x02];
const TIMING: Word = [0x12, 0, 0, 0, 0, 0x10, 0x60, 0x00];
const ADDRESS: Word = [0x13, 0x00, 0x70, 0, 0, 0, 0x04, 0x01];

// Helper to create a header word
fn make_header(package_id: u16) -> Word {
    let id = package_id.to_be_bytes();
    [0x80, 0x81, 0x82, 0x83, 0x84, 0x85, id[0], id[1]]
}

// Helper to move a datamux word to another layer
fn on_layer(word: Word, layer: u8) -> Word {
    let mut word = word;
    word[0] = (layer << 4) | (word[0] & 0x0F);
    word
}

// Helper to build a package padded with zeros
fn make_package(words: &[Word], size: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = words.iter().flatten().copied().collect();
    assert!(bytes.len() <= size);
    bytes.resize(size, 0);
    bytes
}

fn decoder(mode: ReadoutMode, udp_bug: bool) -> PackageDecoder {
    PackageDecoder::from_config(&DecoderConfig::new().with_mode(mode).with_udp_bug(udp_bug))
}

#[test]
fn test_datamux_package() {
    let mut dec = decoder(ReadoutMode::Datamux, false);
    let package = make_package(&[make_header(513), TRIGGER, TIMING, ADDRESS], PACKAGE_SIZE);

    let hits = dec.decode_buffer(&package);

    assert_eq!(hits.len(), 1);
    let hit = hits[0];
    assert_eq!(hit.layer, 1);
    assert_eq!((hit.column, hit.row), (35, 73));
    assert_eq!(hit.ts, 1025);
    assert_eq!(hit.package_id, 513);
    assert_eq!(dec.stats().headers, 1);
    assert_eq!(dec.stats().aborted_buffers, 0);
}

#[test]
fn test_datamux_layers_interleaved() {
    let mut dec = decoder(ReadoutMode::Datamux, false);
    let words = [
        on_layer(TRIGGER, 3),
        TRIGGER,
        on_layer(TIMING, 3),
        on_layer(ADDRESS, 3),
        TIMING,
        on_layer(TRIGGER, 4),
        ADDRESS,
    ];

    let hits = dec.decode_buffer(&make_package(&words, PACKAGE_SIZE));
    let layers: Vec<i16> = hits.iter().map(|h| h.layer).collect();
    assert_eq!(layers, vec![3, 1]);
}

#[test]
fn test_hit_split_across_buffers() {
    let mut dec = decoder(ReadoutMode::Datamux, false);

    // layer 1 emits in the first buffer, so its partial record survives
    let first = dec.decode_buffer(&make_package(
        &[TRIGGER, TIMING, ADDRESS, TRIGGER, TIMING],
        PACKAGE_SIZE,
    ));
    let second = dec.decode_buffer(&make_package(&[ADDRESS], PACKAGE_SIZE));

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(dec.stats().buffers, 2);
}

#[test]
fn test_duplicated_byte_is_resynchronized() {
    let mut bytes: Vec<u8> = [TRIGGER, TIMING, ADDRESS].iter().flatten().copied().collect();
    // the readout repeats the first byte of the next trigger word
    bytes.push(TRIGGER[0]);
    for word in [TRIGGER, TIMING, ADDRESS, TRIGGER, TIMING, ADDRESS] {
        bytes.extend_from_slice(&word);
    }
    bytes.extend_from_slice(&[0; 7]);
    assert_eq!(bytes.len() % 8, 0);

    let mut dec = decoder(ReadoutMode::Datamux, true);
    let hits = dec.decode_buffer(&bytes);

    assert_eq!(hits.len(), 3);
    for hit in &hits {
        assert_eq!((hit.column, hit.row), (35, 73));
        assert_eq!(hit.ts, 1025);
        assert_eq!(hit.ts2, 16);
    }
    assert_eq!(dec.stats().unaligned, 0);

    // without the workaround the shifted words are garbage
    let mut dec = decoder(ReadoutMode::Datamux, false);
    assert_eq!(dec.decode_buffer(&bytes).len(), 1);
}

fn nomux_words() -> [Word; 8] {
    [
        make_header(7),
        [0x26, 31, 0, 0, 0, 0, 0, 0],
        [0x27, 0, 0, 0, 0, 0, 0, 0],
        [0x28, 1, 0, 0, 0, 0, 0, 3],
        [0x29, 1, 0, 0, 0, 0, 0, 4],
        [0x2A, 0x10, 0, 0, 0, 0, 0, 0x20],
        [0x2B, 0, 0, 0, 0, 0, 0x08, 0x00],
        [0x2C, 1, 0, 0, 0, 0, 0, 0],
    ]
}

#[test]
fn test_nomux_stream() {
    let mut dec = decoder(ReadoutMode::Nomux, false);
    let hits = dec.decode_buffer(&make_package(&nomux_words(), PACKAGE_SIZE));

    assert_eq!(hits.len(), 1);
    let hit = hits[0];
    assert_eq!(hit.layer, 2);
    assert_eq!((hit.column, hit.row), (100, 258));
    assert_eq!(hit.short_ts, 256 + 0x10);
    assert_eq!(hit.ts, 0x800);
    assert_eq!(hit.ts2, 0x20);
    assert_eq!(hit.trigger_index, 3);
    assert_eq!(hit.trigger_ts, 4);
    assert_eq!(hit.package_id, 7);
}

#[test]
fn test_one_hit_per_package_with_workaround() {
    let datamux = make_package(&[make_header(3), TRIGGER, TIMING, ADDRESS], PACKAGE_SIZE_WITH_MARGIN);
    let mut dec = decoder(ReadoutMode::Datamux, true);
    let hits: Vec<Hit> = (0..4).flat_map(|_| dec.decode_buffer(&datamux)).collect();
    assert_eq!(hits.len(), 4);
    assert!(hits.iter().all(|h| (h.column, h.row) == (35, 73)));
    assert_eq!(dec.stats().discarded, 0);

    let nomux = make_package(&nomux_words(), PACKAGE_SIZE_WITH_MARGIN);
    let mut dec = decoder(ReadoutMode::Nomux, true);
    let hits: Vec<Hit> = (0..4).flat_map(|_| dec.decode_buffer(&nomux)).collect();
    assert_eq!(hits.len(), 4);
    assert!(hits.iter().all(|h| (h.column, h.row) == (100, 258) && h.package_id == 7));
    assert_eq!(dec.stats().discarded, 0);
}

// Triggered words: timing, format 1 pixels on row 300, trigger
const TRG_TIMING: Word = [0x20, 0x00, 0x07, 0, 0, 0, 0x01, 0x00];
const TRG_TRIGGER: Word = [0x10, 0, 0, 0, 0x01, 0x05, 0x14, 0x03];

fn make_pixel(column_byte: u8) -> Word {
    [0x30, 0, 0, 0, 0x0A, 0x00, 0xD3, column_byte]
}

fn columns(hits: &[Hit]) -> Vec<i16> {
    hits.iter().map(|h| h.column).collect()
}

#[test]
fn test_triggered_fifo_pairing() {
    let words = [
        TRG_TIMING,
        make_pixel(31),
        make_pixel(30),
        make_pixel(29),
        TRG_TRIGGER,
    ];
    let mut dec = decoder(ReadoutMode::Triggered, false);
    let hits = dec.decode_buffer(&make_package(&words, PACKAGE_SIZE));

    assert_eq!(columns(&hits), vec![100, 101, 102]);
    for hit in &hits {
        assert_eq!(hit.trigger_ts, 65);
        assert_eq!(hit.trigger_tag, 34);
        assert_eq!(hit.short_ts, 2);
        assert!(hit.trigger_fifo_full);
    }
}

#[test]
fn test_triggered_pixels_wait_for_next_buffer_trigger() {
    let mut dec = decoder(ReadoutMode::Triggered, false);
    let first = dec.decode_buffer(&make_package(&[TRG_TIMING, make_pixel(31)], PACKAGE_SIZE));
    let second = dec.decode_buffer(&make_package(&[TRG_TRIGGER], PACKAGE_SIZE));

    assert!(first.is_empty());
    assert_eq!(columns(&second), vec![100]);
}

#[test]
fn test_triggered_double_byte_alignment() {
    let mut bytes = vec![TRG_TIMING[0]];
    for word in [TRG_TIMING, make_pixel(31), make_pixel(30), TRG_TRIGGER] {
        bytes.extend_from_slice(&word);
    }
    bytes.extend_from_slice(&[0; 7]);

    let mut dec = decoder(ReadoutMode::Triggered, true);
    let hits = dec.decode_buffer(&bytes);

    assert_eq!(columns(&hits), vec![100, 101]);
    for hit in &hits {
        assert_eq!(hit.row, 300);
        assert_eq!(hit.ts, 256);
        assert_eq!(hit.trigger_ts, 65);
    }
    assert_eq!(dec.stats().unaligned, 0);
}

#[test]
fn test_triggered_forced_format() {
    let config = DecoderConfig::new()
        .with_mode(ReadoutMode::Triggered)
        .with_udp_bug(false)
        .with_ts_format(Some(TsFormat::Format2));
    let mut dec = PackageDecoder::from_config(&config);

    let hits = dec.decode_buffer(&make_package(
        &[TRG_TIMING, make_pixel(31), TRG_TRIGGER],
        PACKAGE_SIZE,
    ));

    assert_eq!(hits.len(), 1);
    assert_eq!(dec.format_errors(), 1);
    assert_eq!(dec.stats().format_errors, 1);
}

#[test]
fn test_offsets_from_json() {
    let config = DecoderConfig::from_json(
        r#"{
            "readout": { "mode": "datamux", "udp_bug": false },
            "offsets": [ { "layer": 1, "ts": -1030, "ts2": 200 } ]
        }"#,
    )
    .unwrap();
    let mut dec = PackageDecoder::from_config(&config);
    let hits = dec.decode_buffer(&make_package(&[TRIGGER, TIMING, ADDRESS], PACKAGE_SIZE));

    let hit = hits[0];
    assert_eq!(hit.ts, -5);
    assert_eq!(hit.short_ts, 1019);
    assert_eq!(hit.ts2, 216);
    assert_eq!(hit.short_ts2, 88);
}

#[test]
fn test_offsets_via_builder() {
    let config = DecoderConfig::new()
        .with_udp_bug(false)
        .with_offset(2, TimestampOffset::new(1, 1))
        .unwrap();
    let mut dec = PackageDecoder::from_config(&config);
    let words = [
        TRIGGER,
        TIMING,
        ADDRESS,
        on_layer(TRIGGER, 2),
        on_layer(TIMING, 2),
        on_layer(ADDRESS, 2),
    ];
    let hits = dec.decode_buffer(&make_package(&words, PACKAGE_SIZE));
    assert_eq!(hits[0].ts, 1025);
    assert_eq!(hits[1].ts, 1026);
}

#[test]
fn test_reset_between_captures() {
    let mut dec = decoder(ReadoutMode::Datamux, false);
    dec.decode_buffer(&make_package(&[TRIGGER, TIMING, ADDRESS, TRIGGER, TIMING], PACKAGE_SIZE));
    dec.reset();
    let hits = dec.decode_buffer(&make_package(&[ADDRESS], PACKAGE_SIZE));
    assert!(hits.is_empty());
}

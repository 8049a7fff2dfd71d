use std::io::Cursor;

use pretty_assertions::assert_eq;
use shadercomp_vcs::{
    unpack_static_combo, write_archive, ArchiveInfo, BlockPacker, VcsArchive,
    MAX_UNPACKED_BLOCK_SIZE, SENTINEL_COMBO_ID,
};

fn pack(payloads: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut packer = BlockPacker::new();
    for (id, payload) in payloads {
        packer.push(*id, payload).unwrap();
    }
    packer.finish().unwrap()
}

fn payload(seed: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (seed.wrapping_mul(31).wrapping_add(i as u32) % 251) as u8)
        .collect()
}

#[test]
fn archive_round_trips_every_combo_tuple() {
    let inputs: Vec<(u32, Vec<(u32, Vec<u8>)>)> = vec![
        (0, vec![(0, payload(1, 100)), (1, payload(2, 60))]),
        (3, vec![(0, payload(3, 4096)), (2, payload(4, 17))]),
        (9, vec![(1, payload(5, 0))]),
    ];
    let combos: Vec<(u32, Vec<u8>)> = inputs
        .iter()
        .map(|(id, dynamics)| (*id, pack(dynamics)))
        .collect();

    let info = ArchiveInfo {
        total_combos: 20,
        dynamic_combos: 4,
        centroid_mask: 0x11,
        source_crc32: 0xFEED_F00D,
    };
    let mut out = Cursor::new(Vec::new());
    write_archive(&mut out, &info, &combos).unwrap();
    let bytes = out.into_inner();

    let archive = VcsArchive::parse(&bytes).unwrap();
    let header = archive.header();
    assert_eq!(header.total_combos, 20);
    assert_eq!(header.dynamic_combos, 4);
    assert_eq!(header.centroid_mask, 0x11);
    assert_eq!(header.source_crc32, 0xFEED_F00D);
    assert_eq!(header.static_combo_count, 4);

    let expected: Vec<(u32, u32, Vec<u8>)> = inputs
        .iter()
        .flat_map(|(sid, dynamics)| {
            dynamics
                .iter()
                .map(move |(did, bytes)| (*sid, *did, bytes.clone()))
        })
        .collect();
    assert_eq!(archive.all_combos().unwrap(), expected);
}

#[test]
fn sentinel_offset_is_end_of_body_and_sizes_the_last_combo() {
    let combos = vec![
        (0u32, pack(&[(0, payload(7, 300))])),
        (1, pack(&[(0, payload(8, 200))])),
    ];
    let info = ArchiveInfo {
        total_combos: 2,
        dynamic_combos: 1,
        centroid_mask: 0,
        source_crc32: 0,
    };
    let mut out = Cursor::new(Vec::new());
    write_archive(&mut out, &info, &combos).unwrap();
    let bytes = out.into_inner();

    let archive = VcsArchive::parse(&bytes).unwrap();
    assert_eq!(archive.end_of_body() as usize, bytes.len());

    let records = archive.records();
    assert_eq!(records.last().unwrap().static_combo_id, SENTINEL_COMBO_ID);
    let last_body =
        &bytes[records[1].file_offset as usize..records[2].file_offset as usize];
    assert_eq!(last_body, archive.packed_blob(1).unwrap());
    assert_eq!(
        unpack_static_combo(last_body).unwrap(),
        vec![(0, payload(8, 200))]
    );
}

#[test]
fn multi_block_combos_survive_the_round_trip() {
    let big: Vec<(u32, Vec<u8>)> = (0..10)
        .map(|i| (i, payload(i, MAX_UNPACKED_BLOCK_SIZE / 2)))
        .collect();
    let combos = vec![(5u32, pack(&big))];
    let info = ArchiveInfo {
        total_combos: 10,
        dynamic_combos: 10,
        centroid_mask: 0,
        source_crc32: 0,
    };
    let mut out = Cursor::new(Vec::new());
    write_archive(&mut out, &info, &combos).unwrap();
    let bytes = out.into_inner();

    let archive = VcsArchive::parse(&bytes).unwrap();
    assert_eq!(archive.dynamic_combos(5).unwrap(), big);
}

#[test]
fn alias_bodies_resolve_through_the_reader() {
    let shared = pack(&[(0, payload(1, 128)), (1, payload(1, 128))]);
    let combos = vec![(2u32, shared.clone()), (4, pack(&[(0, payload(9, 64))])), (6, shared)];
    let info = ArchiveInfo {
        total_combos: 8,
        dynamic_combos: 2,
        centroid_mask: 0,
        source_crc32: 0,
    };
    let mut out = Cursor::new(Vec::new());
    write_archive(&mut out, &info, &combos).unwrap();
    let bytes = out.into_inner();

    let archive = VcsArchive::parse(&bytes).unwrap();
    // one alias record, bodies for 2 and 4 only
    assert_eq!(archive.aliases().len(), 1);
    assert_eq!(archive.records().len(), 3);
    assert_eq!(
        archive.dynamic_combos(6).unwrap(),
        archive.dynamic_combos(2).unwrap()
    );
}

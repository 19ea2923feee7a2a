use std::cell::RefCell;
use std::rc::Rc;

use matroska_parser::{
    BlockEntry, ClusterId, EntryRef, Lacing, MkvReader, ParserError, Segment, TrackKind,
};

const EBML: u32 = 0x1A45DFA3;
const SEGMENT: u32 = 0x18538067;
const SEEK_HEAD: u32 = 0x114D9B74;
const SEEK: u32 = 0x4DBB;
const SEEK_ID: u32 = 0x53AB;
const SEEK_POSITION: u32 = 0x53AC;
const INFO: u32 = 0x1549A966;
const TIMESTAMP_SCALE: u32 = 0x2AD7B1;
const DURATION: u32 = 0x4489;
const MUXING_APP: u32 = 0x4D80;
const WRITING_APP: u32 = 0x5741;
const TRACKS: u32 = 0x1654AE6B;
const TRACK_ENTRY: u32 = 0xAE;
const TRACK_NUMBER: u32 = 0xD7;
const TRACK_UID: u32 = 0x73C5;
const TRACK_TYPE: u32 = 0x83;
const CODEC_ID: u32 = 0x86;
const VIDEO: u32 = 0xE0;
const PIXEL_WIDTH: u32 = 0xB0;
const PIXEL_HEIGHT: u32 = 0xBA;
const AUDIO: u32 = 0xE1;
const SAMPLING_FREQUENCY: u32 = 0xB5;
const CHANNELS: u32 = 0x9F;
const CLUSTER: u32 = 0x1F43B675;
const TIMESTAMP: u32 = 0xE7;
const SIMPLE_BLOCK: u32 = 0xA3;
const BLOCK_GROUP: u32 = 0xA0;
const BLOCK: u32 = 0xA1;
const BLOCK_DURATION: u32 = 0x9B;
const REFERENCE_BLOCK: u32 = 0xFB;
const CUES: u32 = 0x1C53BB6B;
const CUE_POINT: u32 = 0xBB;
const CUE_TIME: u32 = 0xB3;
const CUE_TRACK_POSITIONS: u32 = 0xB7;
const CUE_TRACK: u32 = 0xF7;
const CUE_CLUSTER_POSITION: u32 = 0xF1;
const CUE_BLOCK_NUMBER: u32 = 0x5378;

fn encode_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    bytes[skip..].to_vec()
}

fn encode_size(value: u64) -> Vec<u8> {
    for len in 1..=8_u32 {
        let max = (1_u64 << (7 * len)) - 2;
        if value <= max {
            let marked = value | (1_u64 << (7 * len));
            let mut bytes = vec![0_u8; len as usize];
            for i in 0..len {
                bytes[(len - 1 - i) as usize] = (marked >> (8 * i)) as u8;
            }
            return bytes;
        }
    }
    panic!("size too large to encode");
}

fn elem(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = encode_id(id);
    bytes.extend(encode_size(payload.len() as u64));
    bytes.extend_from_slice(payload);
    bytes
}

fn uint_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}

fn uint(id: u32, value: u64) -> Vec<u8> {
    elem(id, &uint_bytes(value))
}

fn sint(id: u32, value: i64) -> Vec<u8> {
    for len in 1..=8_u32 {
        let shift = 64 - 8 * len;
        if (value << shift) >> shift == value {
            let bytes = value.to_be_bytes();
            return elem(id, &bytes[(8 - len) as usize..]);
        }
    }
    unreachable!()
}

fn float64(id: u32, value: f64) -> Vec<u8> {
    elem(id, &value.to_be_bytes())
}

fn string_el(id: u32, value: &str) -> Vec<u8> {
    elem(id, value.as_bytes())
}

fn ebml_header() -> Vec<u8> {
    let mut payload = uint(0x4286, 1);
    payload.extend(uint(0x42F7, 1));
    payload.extend(uint(0x42F2, 4));
    payload.extend(uint(0x42F3, 8));
    payload.extend(string_el(0x4282, "webm"));
    payload.extend(uint(0x4287, 4));
    payload.extend(uint(0x4285, 2));
    elem(EBML, &payload)
}

fn info(scale: u64, duration: Option<f64>) -> Vec<u8> {
    let mut payload = uint(TIMESTAMP_SCALE, scale);
    if let Some(duration) = duration {
        payload.extend(float64(DURATION, duration));
    }
    payload.extend(string_el(MUXING_APP, "synthetic muxer"));
    payload.extend(string_el(WRITING_APP, "synthetic writer"));
    elem(INFO, &payload)
}

fn audio_track(number: u64) -> Vec<u8> {
    let mut audio = float64(SAMPLING_FREQUENCY, 48000.0);
    audio.extend(uint(CHANNELS, 2));
    let mut payload = uint(TRACK_NUMBER, number);
    payload.extend(uint(TRACK_UID, number));
    payload.extend(uint(TRACK_TYPE, 2));
    payload.extend(string_el(CODEC_ID, "A_OPUS"));
    payload.extend(elem(AUDIO, &audio));
    elem(TRACK_ENTRY, &payload)
}

fn video_track(number: u64) -> Vec<u8> {
    let mut video = uint(PIXEL_WIDTH, 640);
    video.extend(uint(PIXEL_HEIGHT, 360));
    let mut payload = uint(TRACK_NUMBER, number);
    payload.extend(uint(TRACK_UID, number));
    payload.extend(uint(TRACK_TYPE, 1));
    payload.extend(string_el(CODEC_ID, "V_VP9"));
    payload.extend(elem(VIDEO, &video));
    elem(TRACK_ENTRY, &payload)
}

fn tracks(entries: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = entries.concat();
    elem(TRACKS, &payload)
}

fn simple_block(track: u64, timecode: i16, keyframe: bool, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x80 | track as u8];
    payload.extend_from_slice(&timecode.to_be_bytes());
    payload.push(if keyframe { 0x80 } else { 0x00 });
    payload.extend_from_slice(data);
    elem(SIMPLE_BLOCK, &payload)
}

fn block_group(track: u64, timecode: i16, reference: Option<i64>, data: &[u8]) -> Vec<u8> {
    let mut block = vec![0x80 | track as u8];
    block.extend_from_slice(&timecode.to_be_bytes());
    block.push(0x00);
    block.extend_from_slice(data);
    let mut payload = elem(BLOCK, &block);
    if let Some(reference) = reference {
        payload.extend(sint(REFERENCE_BLOCK, reference));
    }
    payload.extend(uint(BLOCK_DURATION, 20));
    elem(BLOCK_GROUP, &payload)
}

fn cluster(timecode: u64, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = uint(TIMESTAMP, timecode);
    for block in blocks {
        payload.extend_from_slice(block);
    }
    elem(CLUSTER, &payload)
}

fn cue_point(time: u64, track: u64, cluster_offset: u64, block: Option<u64>) -> Vec<u8> {
    let mut positions = uint(CUE_TRACK, track);
    positions.extend(uint(CUE_CLUSTER_POSITION, cluster_offset));
    if let Some(block) = block {
        positions.extend(uint(CUE_BLOCK_NUMBER, block));
    }
    let mut payload = uint(CUE_TIME, time);
    payload.extend(elem(CUE_TRACK_POSITIONS, &positions));
    elem(CUE_POINT, &payload)
}

fn cues(points: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = points.concat();
    elem(CUES, &payload)
}

fn seek_head(entries: &[(u32, u64)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, offset) in entries {
        let mut seek = elem(SEEK_ID, &id.to_be_bytes());
        seek.extend(elem(SEEK_POSITION, &offset.to_be_bytes()));
        payload.extend(elem(SEEK, &seek));
    }
    elem(SEEK_HEAD, &payload)
}

fn file_of(parts: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = parts.concat();
    let mut file = ebml_header();
    file.extend(elem(SEGMENT, &payload));
    file
}

/// A reader over a buffer whose visible prefix can be grown, emulating a
/// live source.
#[derive(Clone)]
struct GrowingReader {
    inner: Rc<RefCell<(Vec<u8>, usize)>>,
}

impl GrowingReader {
    fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Rc::new(RefCell::new((data, 0))),
        }
    }

    fn grow(&self, bytes: usize) {
        let mut inner = self.inner.borrow_mut();
        inner.1 = (inner.1 + bytes).min(inner.0.len());
    }

    fn exhausted(&self) -> bool {
        let inner = self.inner.borrow();
        inner.1 >= inner.0.len()
    }
}

impl MkvReader for GrowingReader {
    fn read(&mut self, position: u64, buffer: &mut [u8]) -> Result<(), ParserError> {
        let inner = self.inner.borrow();
        let end = position as usize + buffer.len();
        if end > inner.1 {
            return Err(ParserError::InsufficientData);
        }
        buffer.copy_from_slice(&inner.0[position as usize..end]);
        Ok(())
    }

    fn length(&mut self) -> (Option<u64>, u64) {
        let inner = self.inner.borrow();
        (None, inner.1 as u64)
    }
}

fn collect_track_times(segment: &mut Segment<Vec<u8>>, track: u64) -> Vec<u64> {
    let mut times = Vec::new();
    let mut next = segment.first_track_entry(track).unwrap();
    while let Some(entry) = next {
        times.push(segment.entry_time_ns(entry).unwrap());
        next = segment.next_track_entry(track, entry).unwrap();
    }
    times
}

#[test]
fn parse_minimal_audio_file() {
    let file = file_of(&[
        info(1_000_000, Some(1000.0)),
        tracks(&[audio_track(1)]),
        cluster(0, &[simple_block(1, 0, true, &[1, 2, 3])]),
    ]);

    let (header, mut segment) = Segment::open(file).unwrap();
    assert_eq!(header.doc_type(), "webm");
    assert_eq!(header.doc_type_version(), 4);

    segment.parse_headers().unwrap();
    let info = segment.info().unwrap();
    assert_eq!(info.timestamp_scale().get(), 1_000_000);
    assert_eq!(info.muxing_app(), "synthetic muxer");
    assert_eq!(segment.duration_ns(), Some(1_000_000_000));

    let tracks = segment.tracks().unwrap();
    assert_eq!(tracks.len(), 1);
    let track = tracks.by_number(1).unwrap();
    assert!(track.is_audio());
    match track.kind() {
        TrackKind::Audio(audio) => {
            assert!((audio.sampling_frequency() - 48000.0).abs() < f64::EPSILON);
            assert_eq!(audio.channels(), 2);
        }
        _ => panic!("expected an audio track"),
    }
    assert_eq!(track.codec_id(), "A_OPUS");
    assert!(tracks.by_number(9).is_none());

    let id = segment.first_cluster().unwrap().unwrap();
    let entry = segment.first_entry(id).unwrap().unwrap();
    let block = segment.entry(entry).unwrap().block();
    assert_eq!(block.track(), 1);
    assert!(block.is_key());
    assert_eq!(block.lacing(), Lacing::None);
    assert_eq!(segment.entry_time_ns(entry), Some(0));
    assert!(segment.next_entry(entry).unwrap().is_none());

    let track = segment.tracks().unwrap().by_number(1).unwrap();
    assert!(track.vet_entry(segment.entry(entry).unwrap()));

    // The whole payload has been consumed.
    segment.load().unwrap();
    assert_eq!(segment.unparsed(), Some(0));
}

#[test]
fn scaled_block_time() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        cluster(5, &[simple_block(1, 0, true, &[0])]),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.parse_headers().unwrap();
    let id = segment.first_cluster().unwrap().unwrap();
    assert_eq!(segment.cluster(id).unwrap().timecode(), Some(5));
    let entry = segment.first_entry(id).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(5_000_000));
}

#[test]
fn entry_iteration_is_time_ordered() {
    let blocks = [
        simple_block(1, 0, true, &[0]),
        simple_block(2, 5, true, &[0]),
        simple_block(1, 20, false, &[0]),
        simple_block(1, 20, false, &[0]),
        simple_block(2, 25, false, &[0]),
    ];
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1), audio_track(2)]),
        cluster(100, &blocks),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    let id = segment.first_cluster().unwrap().unwrap();
    let mut last = 0;
    let mut count = 0;
    let mut next = segment.first_entry(id).unwrap();
    while let Some(entry) = next {
        let time = segment.entry_time_ns(entry).unwrap();
        assert!(time >= last, "entry times must be non-decreasing");
        last = time;
        count += 1;
        next = segment.next_entry(entry).unwrap();
    }
    assert_eq!(count, 5);

    let last = segment.last_entry(id).unwrap().unwrap();
    assert_eq!(last.index(), 4);
}

#[test]
fn cross_cluster_track_iteration() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1), audio_track(2)]),
        cluster(0, &[simple_block(1, 0, true, &[0]), simple_block(2, 1, true, &[0])]),
        cluster(50, &[simple_block(2, 0, true, &[0])]),
        cluster(100, &[simple_block(1, 0, true, &[0]), simple_block(1, 10, false, &[0])]),
    ]);

    let (_, mut segment) = Segment::open(file.clone()).unwrap();
    let times = collect_track_times(&mut segment, 1);
    assert_eq!(times, vec![0, 100_000_000, 110_000_000]);

    let (_, mut segment) = Segment::open(file).unwrap();
    let times = collect_track_times(&mut segment, 2);
    assert_eq!(times, vec![1_000_000, 50_000_000]);
}

#[test]
fn cues_greatest_lower_bound() {
    // Scale 1: raw cue times are already nanoseconds.
    let info = info(1, None);
    let tracks = tracks(&[audio_track(1)]);
    let clusters = [
        cluster(0, &[simple_block(1, 0, true, &[0])]),
        cluster(1000, &[simple_block(1, 0, true, &[0])]),
        cluster(5000, &[simple_block(1, 0, true, &[0])]),
    ];

    let mut offset = info.len() as u64 + tracks.len() as u64;
    let mut cluster_offsets = Vec::new();
    for cluster in &clusters {
        cluster_offsets.push(offset);
        offset += cluster.len() as u64;
    }
    let cues = cues(&[
        cue_point(0, 1, cluster_offsets[0], Some(1)),
        cue_point(1000, 1, cluster_offsets[1], Some(1)),
        cue_point(5000, 1, cluster_offsets[2], Some(1)),
    ]);

    let file = file_of(&[
        info,
        tracks,
        clusters[0].clone(),
        clusters[1].clone(),
        clusters[2].clone(),
        cues,
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.parse_headers().unwrap();
    segment.load().unwrap();
    assert!(segment.has_cues());

    // Greatest cue point at or before the target.
    let index = segment.find_cue(2500, 1).unwrap().unwrap();
    let point = segment.cue_point(index).unwrap();
    assert_eq!(point.timecode(), 1000);
    assert_eq!(point.position_for(1).unwrap().block(), 1);

    // Exact hits and a target past the last point.
    let index = segment.find_cue(1000, 1).unwrap().unwrap();
    assert_eq!(segment.cue_point(index).unwrap().timecode(), 1000);
    let index = segment.find_cue(1_000_000, 1).unwrap().unwrap();
    assert_eq!(segment.cue_point(index).unwrap().timecode(), 5000);

    // No cue point for an unknown track, nothing before the first point.
    assert!(segment.find_cue(2500, 7).unwrap().is_none());

    // The addressed block is reachable and correctly timed.
    let index = segment.find_cue(2500, 1).unwrap().unwrap();
    let entry = segment.cue_block(index, 1).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(1000));

    // The combined seek goes through the index.
    let entry = segment.seek(1, 2500).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(1000));
}

#[test]
fn seek_head_pointed_cues() {
    let info = info(1_000_000, None);
    let tracks = tracks(&[audio_track(1)]);
    let clusters = [
        cluster(0, &[simple_block(1, 0, true, &[0])]),
        cluster(100, &[simple_block(1, 0, true, &[0])]),
    ];

    // Seek head sizes are stable: ID and position use fixed widths.
    let head_len = seek_head(&[(CUES, 0)]).len() as u64;
    let mut offset = head_len + info.len() as u64 + tracks.len() as u64;
    let mut cluster_offsets = Vec::new();
    for cluster in &clusters {
        cluster_offsets.push(offset);
        offset += cluster.len() as u64;
    }
    let cues = cues(&[
        cue_point(0, 1, cluster_offsets[0], None),
        cue_point(100, 1, cluster_offsets[1], None),
    ]);
    let head = seek_head(&[(CUES, offset)]);
    assert_eq!(head.len() as u64, head_len);

    let file = file_of(&[
        head,
        info,
        tracks,
        clusters[0].clone(),
        clusters[1].clone(),
        cues,
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.parse_headers().unwrap();
    // The seek index was discovered without scanning any cluster.
    assert!(segment.has_cues());
    assert_eq!(segment.cluster_count(), 0);

    // Seeking goes through the index and preloads the addressed cluster.
    let entry = segment.seek(1, 150_000_000).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(100_000_000));
    assert_eq!(segment.cluster_count(), 0);

    let counts = segment.cue_point_counts().unwrap();
    assert_eq!(counts.1, 2);
}

#[test]
fn incremental_parse_matches_one_shot() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        cluster(0, &[simple_block(1, 0, true, &[1, 2]), simple_block(1, 10, false, &[3])]),
        cluster(50, &[simple_block(1, 0, false, &[4])]),
        cluster(100, &[simple_block(1, 0, true, &[5])]),
    ]);

    // One shot parse over the complete buffer.
    let (_, mut oneshot) = Segment::open(file.clone()).unwrap();
    oneshot.load().unwrap();
    let expected = collect_track_times(&mut oneshot, 1);
    assert_eq!(oneshot.cluster_count(), 3);

    // Chunked parse: every stage is retried on InsufficientData while the
    // visible prefix grows a few bytes at a time.
    let reader = GrowingReader::new(file);
    let (_, mut segment) = loop {
        match Segment::open(reader.clone()) {
            Ok(open) => break open,
            Err(error) if error.is_retryable() => reader.grow(7),
            Err(error) => panic!("unexpected error: {error}"),
        }
    };
    loop {
        match segment.parse_headers() {
            Ok(()) => break,
            Err(error) if error.is_retryable() => reader.grow(7),
            Err(error) => panic!("unexpected error: {error}"),
        }
    }

    let mut clusters = Vec::new();
    loop {
        match segment.load_cluster() {
            Ok(Some(id)) => clusters.push(id),
            Ok(None) => break,
            Err(error) if error.is_retryable() => {
                assert!(!reader.exhausted(), "parser starved on a complete buffer");
                reader.grow(7);
            }
            Err(error) => panic!("unexpected error: {error}"),
        }
    }
    assert_eq!(clusters.len(), 3);

    // A newly committed cluster is reachable from its predecessor.
    assert_eq!(segment.next_cluster(clusters[0]).unwrap(), Some(clusters[1]));
    assert_eq!(segment.next_cluster(clusters[1]).unwrap(), Some(clusters[2]));
    assert_eq!(segment.next_cluster(clusters[2]).unwrap(), None);

    let mut times = Vec::new();
    let mut next = segment.first_track_entry(1).unwrap();
    while let Some(entry) = next {
        times.push(segment.entry_time_ns(entry).unwrap());
        next = segment.next_track_entry(1, entry).unwrap();
    }
    assert_eq!(times, expected);
}

#[test]
fn add_cluster_is_idempotent() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        cluster(0, &[simple_block(1, 0, true, &[0])]),
        cluster(10, &[simple_block(1, 0, true, &[0])]),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.parse_headers().unwrap();

    let probe = segment.parse_cluster().unwrap().unwrap();
    assert!(segment.add_cluster(probe));
    // Committing the identical probe again is a no-op.
    assert!(!segment.add_cluster(probe));
    assert_eq!(segment.cluster_count(), 1);

    let second = segment.parse_cluster().unwrap().unwrap();
    assert!(second.cluster_position() > probe.cluster_position());
    assert_eq!(probe.next_position(), second.cluster_position());
    assert!(segment.add_cluster(second));
    assert_eq!(segment.cluster_count(), 2);
}

#[test]
fn unknown_size_cluster_resolved_by_sibling() {
    // A cluster with an unknown declared size, ended by the next cluster.
    let mut unknown_cluster = encode_id(CLUSTER);
    unknown_cluster.push(0xFF);
    unknown_cluster.extend(uint(TIMESTAMP, 0));
    unknown_cluster.extend(simple_block(1, 0, true, &[1, 2, 3]));
    unknown_cluster.extend(simple_block(1, 10, false, &[4]));

    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        unknown_cluster,
        cluster(50, &[simple_block(1, 0, true, &[5])]),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.load().unwrap();
    assert_eq!(segment.cluster_count(), 2);

    let first = segment.first_cluster().unwrap().unwrap();
    let entry = segment.first_entry(first).unwrap().unwrap();
    let next = segment.next_entry(entry).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(next), Some(10_000_000));
    assert!(segment.next_entry(next).unwrap().is_none());

    let second = segment.next_cluster(first).unwrap().unwrap();
    assert_eq!(segment.cluster(second).unwrap().timecode(), Some(50));
}

#[test]
fn unknown_elements_are_skipped() {
    // A valid but unmapped element between the known top level elements.
    let bogus = elem(0x6DF8, &[0xDE, 0xAD, 0xBE, 0xEF]);
    let file = file_of(&[
        bogus.clone(),
        info(1_000_000, None),
        bogus.clone(),
        tracks(&[audio_track(1)]),
        bogus,
        cluster(0, &[simple_block(1, 0, true, &[0])]),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.load().unwrap();
    assert!(segment.info().is_some());
    assert_eq!(segment.tracks().unwrap().len(), 1);
    assert_eq!(segment.cluster_count(), 1);
}

#[test]
fn block_groups_and_references() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[video_track(1)]),
        cluster(
            0,
            &[
                block_group(1, 0, None, &[1]),
                block_group(1, 10, Some(-10), &[2]),
            ],
        ),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    let id = segment.first_cluster().unwrap().unwrap();

    let entry = segment.first_entry(id).unwrap().unwrap();
    match segment.entry(entry).unwrap() {
        BlockEntry::BlockGroup(group) => {
            // No references: independently decodable.
            assert!(group.block().is_key());
            assert_eq!(group.prev_timecode(), None);
            assert_eq!(group.duration(), Some(20));
        }
        BlockEntry::SimpleBlock(_) => panic!("expected a block group"),
    }

    let entry = segment.next_entry(entry).unwrap().unwrap();
    match segment.entry(entry).unwrap() {
        BlockEntry::BlockGroup(group) => {
            assert!(!group.block().is_key());
            assert_eq!(group.prev_timecode(), Some(-10));
            assert_eq!(group.next_timecode(), None);
        }
        BlockEntry::SimpleBlock(_) => panic!("expected a block group"),
    }
}

#[test]
fn video_seek_lands_on_keyframe() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[video_track(1)]),
        cluster(
            0,
            &[
                simple_block(1, 0, true, &[0]),
                simple_block(1, 40, false, &[0]),
                simple_block(1, 80, false, &[0]),
            ],
        ),
        cluster(
            120,
            &[simple_block(1, 0, false, &[0]), simple_block(1, 40, false, &[0])],
        ),
        cluster(
            200,
            &[simple_block(1, 0, true, &[0]), simple_block(1, 40, false, &[0])],
        ),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.load().unwrap();

    // The target cluster holds no keyframe: walk back to the previous one.
    let entry = segment.seek_track(1, 150_000_000).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(0));
    let block = segment.entry(entry).unwrap().block();
    assert!(block.is_key());

    // A keyframe at or before the target within its own cluster.
    let entry = segment.seek_track(1, 230_000_000).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(200_000_000));

    // The greatest keyframe of a single cluster.
    let first = segment.first_cluster().unwrap().unwrap();
    let key = segment.max_key_entry(first, 1).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(key), Some(0));

    // An unknown track cannot be sought.
    assert!(segment.seek_track(9, 0).unwrap().is_none());
}

#[test]
fn audio_seek_nearest_entry() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        cluster(
            0,
            &[
                simple_block(1, 5, false, &[0]),
                simple_block(1, 20, false, &[0]),
                simple_block(1, 40, false, &[0]),
            ],
        ),
        cluster(100, &[simple_block(1, 0, false, &[0])]),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    segment.load().unwrap();

    // No keyframe constraint for audio.
    let entry = segment.seek_track(1, 30_000_000).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(20_000_000));

    let entry = segment.seek_track(1, 500_000_000).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(100_000_000));

    // A target before the first sample falls forward to it.
    let entry = segment.seek_track(1, 0).unwrap().unwrap();
    assert_eq!(segment.entry_time_ns(entry), Some(5_000_000));
}

#[test]
fn laced_frames_from_file() {
    // A fixed size laced block: 3 frames, 4 bytes each.
    let mut payload = vec![0x81];
    payload.extend_from_slice(&0_i16.to_be_bytes());
    payload.push(0x84); // keyframe, fixed size lacing
    payload.push(0x02); // 3 frames
    payload.extend_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
    let laced = elem(SIMPLE_BLOCK, &payload);

    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        cluster(0, &[laced]),
    ]);

    let (_, mut segment) = Segment::open(file.clone()).unwrap();
    let id = segment.first_cluster().unwrap().unwrap();
    let entry = segment.first_entry(id).unwrap().unwrap();
    let block = segment.entry(entry).unwrap().block();
    assert_eq!(block.lacing(), Lacing::FixedSize);
    assert_eq!(block.frame_count(), 3);
    let total: u64 = block.frames().iter().map(|frame| frame.len).sum();
    assert_eq!(total, 12);

    // Frame spans address the actual payload bytes.
    let frame = block.frames()[1];
    let mut buffer = vec![0_u8; frame.len as usize];
    let mut reader: &[u8] = &file;
    frame.read(&mut reader, &mut buffer).unwrap();
    assert_eq!(buffer, vec![2, 2, 2, 2]);
}

#[test]
fn entry_handles_stay_valid_across_growth() {
    let file = file_of(&[
        info(1_000_000, None),
        tracks(&[audio_track(1)]),
        cluster(0, &[simple_block(1, 0, true, &[0])]),
        cluster(10, &[simple_block(1, 0, true, &[0])]),
        cluster(20, &[simple_block(1, 0, true, &[0])]),
    ]);

    let (_, mut segment) = Segment::open(file).unwrap();
    let first: ClusterId = segment.first_cluster().unwrap().unwrap();
    let entry: EntryRef = segment.first_entry(first).unwrap().unwrap();
    let time = segment.entry_time_ns(entry);

    // Growing the cluster index must not invalidate older handles.
    segment.load().unwrap();
    assert_eq!(segment.cluster_count(), 3);
    assert_eq!(entry.cluster(), first);
    assert_eq!(segment.entry_time_ns(entry), time);
}

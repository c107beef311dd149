use proptest::prelude::*;
use termo_core::protocol::{Decoder, Message, MessageBody};
use termo_core::{Centicelsius, Sample, StatusFlags};

fn sample(sequence: u32) -> Sample {
    Sample {
        sequence,
        tick_ms: 1000 + sequence,
        temperature: Centicelsius(2543),
        flags: StatusFlags::empty(),
    }
}

fn frame(sequence: u32) -> Vec<u8> {
    Message::samples(vec![sample(sequence)])
        .unwrap()
        .encode()
        .unwrap()
}

fn decode_all(decoder: &mut Decoder, bytes: &[u8]) -> Vec<u32> {
    decoder
        .feed(bytes)
        .unwrap()
        .map(|m| m.sequence())
        .collect()
}

#[test]
fn any_single_bit_flip_is_rejected_and_recovered() {
    let original = frame(1);
    let trailing: Vec<u8> = (2..=8).flat_map(frame).collect();

    for bit in 0..original.len() * 8 {
        let mut corrupted = original.clone();
        corrupted[bit / 8] ^= 1 << (bit % 8);

        let mut stream = corrupted;
        stream.extend_from_slice(&trailing);

        let mut decoder = Decoder::new();
        let decoded = decode_all(&mut decoder, &stream);

        assert_eq!(decoded, (2..=8).collect::<Vec<_>>(), "bit {bit}");
        assert_eq!(
            decoder.stats().bytes_discarded,
            original.len() as u64,
            "bit {bit}"
        );
        assert!(decoder.stats().framing_errors() > 0);
    }
}

#[test]
fn same_frame_twice_decodes_twice() {
    let bytes = frame(4);
    let mut decoder = Decoder::new();

    let mut stream = bytes.clone();
    stream.extend_from_slice(&bytes);

    let messages: Vec<_> = decoder.feed(&stream).unwrap().collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], messages[1]);
    assert_eq!(messages[0].body, MessageBody::Samples(vec![sample(4)]));
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_change_the_result(
        cuts in proptest::collection::vec(0usize..200, 0..12)
    ) {
        let stream: Vec<u8> = (10..20).flat_map(frame).collect();

        let mut points: Vec<usize> = cuts.into_iter().map(|c| c % stream.len()).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        points.dedup();

        let mut decoder = Decoder::new();
        let mut decoded = Vec::new();
        for window in points.windows(2) {
            decoded.extend(decode_all(&mut decoder, &stream[window[0]..window[1]]));
        }

        prop_assert_eq!(decoded, (10..20).collect::<Vec<u32>>());
        prop_assert_eq!(decoder.buffered(), 0);
        prop_assert_eq!(decoder.stats().framing_errors(), 0);
    }
}

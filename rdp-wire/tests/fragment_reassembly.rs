//! End-to-end fragmenter -> reassembler scenarios across multiple frames,
//! mirroring how the host and client crates actually use this crate: one
//! `StreamContext` feeding a sequence of encoded frames through the
//! fragmenter, and one `Reassembler` consuming the resulting datagrams.

use rdp_wire::{Fragmenter, Reassembler, StreamContext};

#[test]
fn multi_frame_stream_reassembles_in_order_despite_shuffling() {
    let mut ctx = StreamContext::new(42);
    let mut reassembler = Reassembler::with_default_window();

    let frames: Vec<Vec<u8>> = (0..10)
        .map(|i| vec![i as u8; 500 + i * 37])
        .collect();

    for (i, frame) in frames.iter().enumerate() {
        let is_keyframe = i == 0;
        let mut fragments =
            Fragmenter::fragment(&mut ctx, frame, 300, i as u64 * 16_666_667, is_keyframe, 0)
                .unwrap();

        // Deliver fragments of this frame in reverse order, simulating
        // datagram reordering on an unreliable transport.
        fragments.reverse();

        let mut completed = None;
        for fragment in &fragments {
            if let Some(bytes) = reassembler
                .insert(&fragment.header, fragment.payload.clone())
                .unwrap()
            {
                completed = Some(bytes);
            }
        }

        assert_eq!(completed.as_ref(), Some(frame), "frame {i} failed to reassemble");
    }

    assert_eq!(reassembler.pending_count(), 0);
    assert_eq!(reassembler.dropped_checksum_count(), 0);
}

#[test]
fn stream_id_and_sequence_numbers_are_monotonic_across_frames() {
    let mut ctx = StreamContext::new(1);
    assert_eq!(ctx.stream_id(), 1);

    let first = Fragmenter::fragment(&mut ctx, &[0u8; 10], 50, 0, false, 0).unwrap();
    let second = Fragmenter::fragment(&mut ctx, &[0u8; 10], 50, 1, false, 0).unwrap();

    let last_seq_first = first.last().unwrap().header.sequence_number;
    let first_seq_second = second.first().unwrap().header.sequence_number;
    assert_eq!(first_seq_second, last_seq_first + 1);

    assert_eq!(
        second.first().unwrap().header.frame_number,
        first.first().unwrap().header.frame_number + 1
    );
}

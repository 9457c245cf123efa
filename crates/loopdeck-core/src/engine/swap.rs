//! Staging-to-live buffer swap
//!
//! Runs first in every audio block. O(1) per track: the staged audio moves
//! into the live position by pointer, the replaced `Shared` buffer drop is
//! deferred to the GC thread, and no sample data is copied.

use crate::engine::manager::TrackManager;
use crate::track::Track;

/// Collect staged audio for every track that requested a swap.
///
/// Lock contention with the loader skips that track for this block; the
/// request flag stays up and the swap lands next block. With no request
/// pending this is a pair of atomic loads per track.
pub fn apply_pending_swaps(manager: &mut TrackManager) {
    for track in manager.iter_mut() {
        apply_swap(track);
    }
}

fn apply_swap(track: &mut Track) {
    let Some(staged) = track.staging.take_pending() else {
        return;
    };

    log::info!(
        "Swapping in {} ({} samples @ {} Hz, {:.1} BPM) on {}",
        staged.path.display(),
        staged.num_samples,
        staged.sample_rate,
        staged.original_bpm,
        track.id
    );
    if let Some(old_path) = track.install_audio(staged) {
        track.staging.retire_path(old_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use basedrop::Shared;

    use crate::engine::gc::gc_handle;
    use crate::track::StagedAudio;
    use crate::types::StereoBuffer;

    fn staged(seconds: f64, bpm: f64) -> StagedAudio {
        let num_samples = (seconds * 48_000.0) as usize;
        StagedAudio {
            buffer: Shared::new(&gc_handle(), StereoBuffer::silence(num_samples)),
            num_samples,
            sample_rate: 48_000,
            original_bpm: bpm,
            path: PathBuf::from("/tmp/swap.wav"),
        }
    }

    #[test]
    fn test_swap_installs_and_rewinds() {
        let mut manager = TrackManager::new();
        let id = manager.create_track().unwrap();
        {
            let track = manager.get_mut(id).unwrap();
            track.read_position = 12_345.0;
            track.staging.stage(staged(4.0, 120.0));
        }

        apply_pending_swaps(&mut manager);

        let track = manager.get(id).unwrap();
        assert!(track.has_audio());
        assert_eq!(track.read_position, 0.0);
        assert!(track.loop_start >= 0.0);
        assert!(track.loop_start < track.loop_end);
        assert!(track.loop_end <= track.total_duration() + 1e-9);
    }

    #[test]
    fn test_swap_without_request_is_a_no_op() {
        let mut manager = TrackManager::new();
        let id = manager.create_track().unwrap();
        {
            let track = manager.get_mut(id).unwrap();
            track.staging.stage(staged(4.0, 120.0));
        }
        apply_pending_swaps(&mut manager);
        let position_after = {
            let track = manager.get_mut(id).unwrap();
            track.read_position = 777.0;
            track.read_position
        };

        // No new staging: repeated calls change nothing.
        apply_pending_swaps(&mut manager);
        apply_pending_swaps(&mut manager);
        let track = manager.get(id).unwrap();
        assert_eq!(track.read_position, position_after);
    }

    #[test]
    fn test_newer_stage_wins() {
        let mut manager = TrackManager::new();
        let id = manager.create_track().unwrap();
        {
            let track = manager.get_mut(id).unwrap();
            track.staging.stage(staged(2.0, 100.0));
            track.staging.stage(staged(3.0, 140.0));
        }

        apply_pending_swaps(&mut manager);
        let track = manager.get(id).unwrap();
        assert_eq!(track.audio.as_ref().unwrap().original_bpm, 140.0);
    }

    #[test]
    fn test_replaced_path_is_parked_for_off_callback_disposal() {
        let mut manager = TrackManager::new();
        let id = manager.create_track().unwrap();
        {
            let track = manager.get_mut(id).unwrap();
            track.staging.stage(staged(2.0, 100.0));
        }
        apply_pending_swaps(&mut manager);

        {
            let track = manager.get_mut(id).unwrap();
            track.staging.stage(staged(3.0, 140.0));
        }
        apply_pending_swaps(&mut manager);

        let track = manager.get(id).unwrap();
        assert_eq!(track.staging.drain_retired(), vec![PathBuf::from("/tmp/swap.wav")]);
    }
}

//! Track collection and slot assignment

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::track::Track;
use crate::types::{TrackId, NUM_SLOTS};

/// First MIDI note of the trigger range; slot `n` answers to note `60 + n`.
pub const TRIGGER_NOTE_BASE: u8 = 60;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackError {
    #[error("All {NUM_SLOTS} track slots are occupied")]
    SlotsFull,
    #[error("Unknown track {0}")]
    UnknownTrack(TrackId),
}

/// Owns every track, the slot occupancy table, and a stable display order.
///
/// Slots bind tracks to MIDI trigger notes and solo output buses; the order
/// vector only affects iteration and what the UI shows.
#[derive(Default)]
pub struct TrackManager {
    tracks: HashMap<TrackId, Track>,
    slots: [Option<TrackId>; NUM_SLOTS],
    order: Vec<TrackId>,
    next_id: u64,
}

impl TrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a track in the first free slot.
    pub fn create_track(&mut self) -> Result<TrackId, TrackError> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(TrackError::SlotsFull)?;
        self.create_in_slot(slot)
    }

    /// Create a track in a specific slot, used by session restore.
    pub fn create_track_in_slot(&mut self, slot: usize) -> Result<TrackId, TrackError> {
        if slot >= NUM_SLOTS || self.slots[slot].is_some() {
            return Err(TrackError::SlotsFull);
        }
        self.create_in_slot(slot)
    }

    fn create_in_slot(&mut self, slot: usize) -> Result<TrackId, TrackError> {
        self.next_id += 1;
        let id = TrackId(self.next_id);
        let track = Track::new(id);
        track.shared.slot_index.store(slot as i32, Ordering::Relaxed);

        self.slots[slot] = Some(id);
        self.order.push(id);
        self.tracks.insert(id, track);
        log::info!("Created {} in slot {}", id, slot);
        Ok(id)
    }

    /// Remove a track, releasing its slot and note binding.
    pub fn remove_track(&mut self, id: TrackId) -> Result<Track, TrackError> {
        let track = self.tracks.remove(&id).ok_or(TrackError::UnknownTrack(id))?;
        if let Some(slot) = self.slots.iter().position(|s| *s == Some(id)) {
            self.slots[slot] = None;
        }
        self.order.retain(|t| *t != id);
        track.shared.slot_index.store(-1, Ordering::Relaxed);
        log::info!("Removed {}", id);
        Ok(track)
    }

    /// Reorder the display order. Unknown ids are dropped, tracks missing
    /// from `ids` keep their relative position at the end.
    pub fn reorder(&mut self, ids: &[TrackId]) {
        let mut new_order: Vec<TrackId> =
            ids.iter().copied().filter(|id| self.tracks.contains_key(id)).collect();
        for id in &self.order {
            if !new_order.contains(id) {
                new_order.push(*id);
            }
        }
        self.order = new_order;
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    /// Track ids in display order.
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn slot_of(&self, id: TrackId) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(id))
    }

    pub fn track_in_slot(&self, slot: usize) -> Option<TrackId> {
        self.slots.get(slot).copied().flatten()
    }

    /// The track bound to a MIDI trigger note, if the note is in range and
    /// its slot is occupied.
    pub fn track_for_note(&self, note: u8) -> Option<TrackId> {
        let slot = note.checked_sub(TRIGGER_NOTE_BASE)? as usize;
        self.track_in_slot(slot)
    }

    pub fn note_for_slot(slot: usize) -> u8 {
        TRIGGER_NOTE_BASE + slot as u8
    }

    /// True when any track is soloed.
    pub fn any_solo(&self) -> bool {
        self.tracks.values().any(|t| t.shared.is_solo.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_fill_and_release() {
        let mut manager = TrackManager::new();
        let ids: Vec<TrackId> =
            (0..NUM_SLOTS).map(|_| manager.create_track().unwrap()).collect();
        assert_eq!(manager.create_track(), Err(TrackError::SlotsFull));

        // Removing the third track frees exactly its slot.
        manager.remove_track(ids[2]).unwrap();
        let replacement = manager.create_track().unwrap();
        assert_eq!(manager.slot_of(replacement), Some(2));
    }

    #[test]
    fn test_note_binding_follows_slot() {
        let mut manager = TrackManager::new();
        let a = manager.create_track().unwrap();
        let b = manager.create_track().unwrap();

        assert_eq!(manager.track_for_note(60), Some(a));
        assert_eq!(manager.track_for_note(61), Some(b));
        assert_eq!(manager.track_for_note(62), None);
        assert_eq!(manager.track_for_note(59), None);

        manager.remove_track(a).unwrap();
        assert_eq!(manager.track_for_note(60), None);
    }

    #[test]
    fn test_reorder_keeps_unlisted_tracks() {
        let mut manager = TrackManager::new();
        let a = manager.create_track().unwrap();
        let b = manager.create_track().unwrap();
        let c = manager.create_track().unwrap();

        manager.reorder(&[c, a, TrackId(999)]);
        assert_eq!(manager.track_ids(), vec![c, a, b]);
    }

    #[test]
    fn test_slot_index_lifecycle() {
        let mut manager = TrackManager::new();
        let id = manager.create_track().unwrap();
        let shared = manager.get(id).unwrap().shared.clone();
        assert_eq!(shared.slot_index.load(Ordering::Relaxed), 0);

        manager.remove_track(id).unwrap();
        assert_eq!(shared.slot_index.load(Ordering::Relaxed), -1);
    }
}

use std::sync::Mutex;

/// Number of elector seats the service accepts.
pub const SLOT_COUNT: usize = 7;

/// Candidates form the closed range `1..=CANDIDATE_COUNT`.
pub const CANDIDATE_COUNT: usize = 3;

/// Zero-based index of an elector seat.
pub type SlotId = usize;

/// Candidate identifier, `1..=CANDIDATE_COUNT`.
pub type Candidate = u8;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    occupied: bool,
    last_vote: Option<Candidate>,
}

/// Shared election state: one entry per elector seat.
///
/// Occupancy tracks which seats currently have a live connection. The last
/// cast ballot survives disconnects, so a seat reclaimed by a new
/// connection still counts its previous ballot until it is overwritten.
///
/// All access goes through the internal mutex; the critical sections are a
/// handful of array operations and the lock is never held across I/O.
#[derive(Default)]
pub struct VoteStore {
    slots: Mutex<[Slot; SLOT_COUNT]>,
}

impl VoteStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([Slot::default(); SLOT_COUNT]),
        }
    }

    /// Claims a seat for a new connection. Returns `false` if another live
    /// connection already holds it.
    pub fn claim(&self, slot: SlotId) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if slots[slot].occupied {
            return false;
        }
        slots[slot].occupied = true;
        true
    }

    /// Frees a seat when its connection goes away. The recorded ballot stays.
    pub fn release(&self, slot: SlotId) {
        self.slots.lock().unwrap()[slot].occupied = false;
    }

    /// Records a ballot for the seat, overwriting any earlier one.
    pub fn set_vote(&self, slot: SlotId, candidate: Candidate) {
        debug_assert!((1..=CANDIDATE_COUNT as Candidate).contains(&candidate));
        self.slots.lock().unwrap()[slot].last_vote = Some(candidate);
    }

    /// Copies the current ballots out under the lock and counts them after
    /// releasing it.
    pub fn snapshot_tally(&self) -> Tally {
        let votes: Vec<Option<Candidate>> = {
            let slots = self.slots.lock().unwrap();
            slots.iter().map(|slot| slot.last_vote).collect()
        };

        let mut counts = [0usize; CANDIDATE_COUNT];
        for candidate in votes.into_iter().flatten() {
            counts[candidate as usize - 1] += 1;
        }
        Tally { counts }
    }
}

/// Per-candidate ballot counts derived from a store snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    counts: [usize; CANDIDATE_COUNT],
}

impl Tally {
    pub fn count_for(&self, candidate: Candidate) -> usize {
        self.counts[candidate as usize - 1]
    }

    /// Total ballots cast across all seats.
    pub fn ballots(&self) -> usize {
        self.counts.iter().sum()
    }

    /// The candidate with the strictly greatest count.
    ///
    /// A tie at the top and an empty tally both yield `None`; a lone ballot
    /// beats the untouched candidates at zero.
    pub fn leader(&self) -> Option<Candidate> {
        let best = *self.counts.iter().max()?;
        if best == 0 {
            return None;
        }

        let mut at_best = self
            .counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == best);
        let (index, _) = at_best.next()?;
        if at_best.next().is_some() {
            return None;
        }
        Some(index as Candidate + 1)
    }
}

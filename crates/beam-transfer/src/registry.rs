use beam_types::PeerId;

/// Insertion-ordered map from peer identity to its current record.
///
/// At most one record per peer. Registering a peer that is already present
/// replaces the record in place, keeping its original position.
#[derive(Debug)]
pub struct SessionRegistry<T> {
    entries: Vec<(PeerId, T)>,
}

/// Result of [`SessionRegistry::register`].
#[derive(Debug)]
pub enum Registration<T> {
    Inserted,
    /// The peer was known; the displaced record is handed back to be torn down.
    Replaced(T),
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, peer: PeerId, value: T) -> Registration<T> {
        match self.entries.iter_mut().find(|(id, _)| *id == peer) {
            Some((_, slot)) => Registration::Replaced(std::mem::replace(slot, value)),
            None => {
                self.entries.push((peer, value));
                Registration::Inserted
            }
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&T> {
        self.entries
            .iter()
            .find(|(id, _)| id == peer)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(id, _)| id == peer)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &T)> {
        self.entries.iter().map(|(id, value)| (id, value))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

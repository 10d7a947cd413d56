use smb_core::error::SMBError;
use smb_core::SMBResult;

const WORD_BITS: usize = u64::BITS as usize;

/// First-fit id allocator backed by a growable bit vector.
///
/// Bit `n` is set while id `n` is handed out. Ids below `first_id` are never
/// issued, so a table starting at 1 keeps 0 free as the "no handle" value.
/// The vector starts small and doubles on exhaustion until it can address
/// `max_id`; growth never moves an id.
#[derive(Debug, Clone)]
pub struct SMBIdBitmap {
    words: Vec<u64>,
    capacity: usize,
    first_id: usize,
    max_id: usize,
    in_use: usize,
}

impl SMBIdBitmap {
    pub fn new(first_id: usize, initial_capacity: usize, max_id: usize) -> Self {
        let limit = max_id.saturating_add(1);
        let capacity = initial_capacity.max(first_id + 1).min(limit);
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            first_id,
            max_id,
            in_use: 0,
        }
    }

    /// Reserves the lowest free id, growing the vector if every addressable
    /// id is taken.
    pub fn allocate(&mut self) -> SMBResult<usize> {
        if let Some(id) = self.find_next_zero(self.first_id) {
            self.set(id);
            return Ok(id);
        }
        if self.capacity > self.max_id {
            return Err(SMBError::handle_exhausted(self.max_ids()));
        }
        let id = self.capacity;
        let grown = self.capacity.saturating_mul(2).min(self.max_id.saturating_add(1));
        self.grow(grown)?;
        self.set(id);
        Ok(id)
    }

    /// Clears `id`, returning whether it was set.
    pub fn release(&mut self, id: usize) -> bool {
        if !self.is_set(id) {
            return false;
        }
        self.words[id / WORD_BITS] &= !(1u64 << (id % WORD_BITS));
        self.in_use -= 1;
        true
    }

    pub fn is_set(&self, id: usize) -> bool {
        if id < self.first_id || id >= self.capacity {
            return false;
        }
        self.words[id / WORD_BITS] & (1u64 << (id % WORD_BITS)) != 0
    }

    /// Every id currently set, lowest first.
    pub fn iter(&self) -> impl Iterator<Item=usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, word)| {
            let mut remaining = *word;
            std::iter::from_fn(move || {
                if remaining == 0 {
                    return None;
                }
                let bit = remaining.trailing_zeros() as usize;
                remaining &= remaining - 1;
                Some(index * WORD_BITS + bit)
            })
        })
    }

    /// Number of ids currently addressable without growing.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Size of the whole id namespace.
    pub fn max_ids(&self) -> usize {
        self.max_id.saturating_add(1) - self.first_id
    }

    fn set(&mut self, id: usize) {
        self.words[id / WORD_BITS] |= 1u64 << (id % WORD_BITS);
        self.in_use += 1;
    }

    fn grow(&mut self, capacity: usize) -> SMBResult<()> {
        let words = capacity.div_ceil(WORD_BITS);
        let additional = words.saturating_sub(self.words.len());
        self.words.try_reserve_exact(additional)
            .map_err(|_| SMBError::out_of_memory(additional * size_of::<u64>()))?;
        self.words.resize(words, 0);
        self.capacity = capacity;
        Ok(())
    }

    fn find_next_zero(&self, from: usize) -> Option<usize> {
        let mut index = from / WORD_BITS;
        let mut mask = u64::MAX << (from % WORD_BITS);
        while index < self.words.len() {
            let free = !self.words[index] & mask;
            if free != 0 {
                let id = index * WORD_BITS + free.trailing_zeros() as usize;
                return (id < self.capacity).then_some(id);
            }
            mask = u64::MAX;
            index += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_issues_ids_below_the_first() {
        let mut bitmap = SMBIdBitmap::new(1, 64, 65535);
        assert_eq!(bitmap.allocate().unwrap(), 1);
        assert_eq!(bitmap.allocate().unwrap(), 2);
        assert!(!bitmap.is_set(0));
        assert!(!bitmap.release(0));
    }

    #[test]
    fn reuses_the_lowest_released_id() {
        let mut bitmap = SMBIdBitmap::new(1, 64, 65535);
        for _ in 0..10 {
            bitmap.allocate().unwrap();
        }
        assert!(bitmap.release(4));
        assert!(bitmap.release(7));
        assert_eq!(bitmap.allocate().unwrap(), 4);
        assert_eq!(bitmap.allocate().unwrap(), 7);
        assert_eq!(bitmap.allocate().unwrap(), 11);
    }

    #[test]
    fn grows_past_the_initial_word() {
        let mut bitmap = SMBIdBitmap::new(1, 64, 1000);
        let ids: Vec<usize> = (0..200).map(|_| bitmap.allocate().unwrap()).collect();
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&200));
        assert!(bitmap.capacity() >= 201);
        assert!((1..=200).all(|id| bitmap.is_set(id)));
    }

    #[test]
    fn exhausts_at_the_maximum_id() {
        let mut bitmap = SMBIdBitmap::new(1, 4, 100);
        for expected in 1..=100 {
            assert_eq!(bitmap.allocate().unwrap(), expected);
        }
        assert!(matches!(bitmap.allocate(), Err(SMBError::HandleExhausted(_))));
        bitmap.release(42);
        assert_eq!(bitmap.allocate().unwrap(), 42);
    }

    #[test]
    fn iterates_set_bits_once() {
        let mut bitmap = SMBIdBitmap::new(1, 64, 65535);
        for _ in 0..130 {
            bitmap.allocate().unwrap();
        }
        bitmap.release(64);
        let ids: Vec<usize> = bitmap.iter().collect();
        assert_eq!(ids.len(), 129);
        assert_eq!(bitmap.in_use(), 129);
        assert!(!ids.contains(&64));
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

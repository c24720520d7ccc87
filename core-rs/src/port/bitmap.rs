//! Packed claim bitmap over a port range
//!
//! Bit `i` set means port `start_port + i` is claimed by a caller of this
//! allocator. It says nothing about real OS occupancy.
//!
//! Layout (range 3000-3040, 41 ports, 2 words):
//! ```text
//! words[0]: ports 3000..=3031  (bit 0 = 3000)
//! words[1]: ports 3032..=3040  (bits 9..31 lie outside the range and are masked off)
//! ```
//!
//! Scanning starts at a rotating cursor instead of the lowest port, so
//! back-to-back allocations spread across the range. The trade-off is that
//! lowest-available-first ordering is not guaranteed.

pub const WORD_BITS: usize = 32;

#[derive(Debug, Clone)]
pub struct AllocationBitmap {
    start_port: u16,
    /// Number of ports covered
    len: usize,
    words: Vec<u32>,
    /// Bit index the next scan starts from
    cursor: usize,
}

/// Position of an in-progress wrap-around scan.
///
/// The scan reads the live bitmap on every step, so bits claimed by other
/// callers between steps are skipped.
#[derive(Debug, Clone, Copy)]
pub struct Scan {
    origin: usize,
    offset: usize,
}

impl AllocationBitmap {
    /// Zeroed bitmap covering `[start_port, end_port]`. An inverted range yields an empty bitmap.
    pub fn new(start_port: u16, end_port: u16) -> Self {
        let len = if end_port < start_port {
            0
        } else {
            (end_port - start_port) as usize + 1
        };
        AllocationBitmap {
            start_port,
            len,
            words: vec![0; len.div_ceil(WORD_BITS)],
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn index_of(&self, port: u16) -> Option<usize> {
        let idx = (port as usize).checked_sub(self.start_port as usize)?;
        (idx < self.len).then_some(idx)
    }

    fn port_at(&self, idx: usize) -> u16 {
        self.start_port + idx as u16
    }

    /// Bits of `word_idx` that map to real ports
    fn valid_mask(&self, word_idx: usize) -> u32 {
        let tail = self.len % WORD_BITS;
        if word_idx + 1 == self.words.len() && tail != 0 {
            (1u32 << tail) - 1
        } else {
            u32::MAX
        }
    }

    /// False for ports outside the range
    pub fn is_set(&self, port: u16) -> bool {
        match self.index_of(port) {
            Some(idx) => self.words[idx / WORD_BITS] & (1 << (idx % WORD_BITS)) != 0,
            None => false,
        }
    }

    /// Set or clear the bit for `port`. Returns the previous value.
    /// Ports outside the range are ignored.
    pub fn set_bit(&mut self, port: u16, used: bool) -> bool {
        let Some(idx) = self.index_of(port) else {
            return false;
        };
        let word = &mut self.words[idx / WORD_BITS];
        let mask = 1u32 << (idx % WORD_BITS);
        let previous = *word & mask != 0;
        if used {
            *word |= mask;
        } else {
            *word &= !mask;
        }
        previous
    }

    /// Set the bit only if it was clear. Returns true if this call set it.
    pub fn test_and_set(&mut self, port: u16) -> bool {
        self.index_of(port).is_some() && !self.set_bit(port, true)
    }

    /// Move the cursor just past `port`
    pub fn advance_cursor(&mut self, port: u16) {
        if let Some(idx) = self.index_of(port) {
            self.cursor = (idx + 1) % self.len;
        }
    }

    /// Begin a scan at the current cursor
    pub fn scan(&self) -> Scan {
        Scan {
            origin: self.cursor,
            offset: 0,
        }
    }

    /// Next clear bit of `scan`, wrapping once around the range.
    ///
    /// Full words are skipped whole. Inside a word the lowest clear bit is
    /// found with `trailing_zeros` on the inverted word.
    pub fn next_free(&self, scan: &mut Scan) -> Option<u16> {
        while scan.offset < self.len {
            let idx = (scan.origin + scan.offset) % self.len;
            let word_idx = idx / WORD_BITS;
            let bit = idx % WORD_BITS;
            let remaining = self.len - scan.offset;

            // Clear bits at or after `bit`, not past the end of the range,
            // and not past the scan origin once we have wrapped.
            let limit = if bit + remaining >= WORD_BITS {
                u32::MAX
            } else {
                (1u32 << (bit + remaining)) - 1
            };
            let free = !self.words[word_idx] & self.valid_mask(word_idx) & (u32::MAX << bit) & limit;

            if free == 0 {
                let word_end = ((word_idx + 1) * WORD_BITS).min(self.len);
                scan.offset += word_end - idx;
                continue;
            }

            let found = word_idx * WORD_BITS + free.trailing_zeros() as usize;
            scan.offset += found - idx + 1;
            return Some(self.port_at(found));
        }
        None
    }

    /// First clear bit from the cursor, if any
    pub fn first_free(&self) -> Option<u16> {
        self.next_free(&mut self.scan())
    }

    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Ports whose bit is set, ascending
    pub fn set_ports(&self) -> Vec<u16> {
        let mut ports = Vec::with_capacity(self.count_set());
        for (word_idx, &word) in self.words.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                ports.push(self.port_at(word_idx * WORD_BITS + bit));
                bits &= bits - 1;
            }
        }
        ports
    }
}
